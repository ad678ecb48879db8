//! Uniform provider interface over chat-completion and embedding backends.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Error text fragments that identify a context/token budget overflow.
const TOKEN_LIMIT_MARKERS: &[&str] = &[
    "context length",
    "maximum context length",
    "context window",
    "max_tokens",
    "too many tokens",
    "prompt is too long",
    "exceeds the context",
    "token limit",
];

/// A single chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    /// Ask the backend to constrain output to a JSON object.
    pub json_mode: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Failure of one provider invocation.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("authentication failed (HTTP {status}): {body}")]
    Authentication { status: u16, body: String },

    #[error("model or endpoint not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("empty response")]
    EmptyResponse,

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the failure reports a prompt or output budget overflow.
    pub fn is_token_limit(&self) -> bool {
        let msg = self.to_string().to_lowercase();
        TOKEN_LIMIT_MARKERS.iter().any(|m| msg.contains(m))
    }

    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Authentication { .. } | Self::NotFound(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Map a non-success HTTP status to a provider error, keeping the body text.
pub fn parse_http_error(status: u16, body: &str) -> ProviderError {
    let body = body.trim().to_string();
    match status {
        401 | 403 => ProviderError::Authentication { status, body },
        404 => ProviderError::NotFound(body),
        429 => ProviderError::RateLimited(body),
        400 | 413 | 422 => ProviderError::InvalidRequest(body),
        500..=599 => ProviderError::Server { status, body },
        _ => ProviderError::Http { status, body },
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Name recorded in the call log.
    fn name(&self) -> &str;

    /// Send one request and return the raw assistant text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderError>;
}

/// A text-embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Embed each text; the output has the same length and order as the input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared HTTP client for model backends.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    install_rustls_provider();
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(15))
        .build()
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

/// Read the response, mapping non-success statuses through [`parse_http_error`].
pub async fn read_success_body(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(parse_http_error(status.as_u16(), &body))
    }
}
