//! Model gateway: one logical model call over several providers.
//!
//! A call walks the configured providers in priority order. A full pass over
//! all providers is one attempt cycle; cycles repeat up to `max_retries`
//! times with backoff in between. Within a single provider invocation,
//! token-budget errors are absorbed by halving the output budget and then
//! shrinking the prompt. When JSON is required, output that cannot be parsed
//! or lacks required keys goes through a repair path before the next provider
//! is tried. Every invocation is appended to an audit log of [`CallAttempt`]s.

pub mod json;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use json::ParseError;
pub use provider::{ChatProvider, ChatRequest, Embedder, ProviderError};
pub use retry::RetryConfig;

use crate::config::{EmbeddingProviderKind, PipelineConfig};
use crate::utils::text::{collapse_whitespace, fill_template, shrink_prompt_text, truncate_chars};

/// Characters of raw output kept in each call log entry.
const RAW_PREVIEW_CHARS: usize = 300;

const REPAIR_SYSTEM_PROMPT: &str = "You are a strict JSON fixer. Return exactly one valid JSON \
object and nothing else: no markdown, no commentary.";

const REPAIR_USER_PROMPT: &str = "The text below was supposed to be a JSON object containing \
the keys <<REQUIRED_KEYS>>. Fix it so it parses and contains every required key. Keep all \
existing content; use empty lists or empty strings for keys you cannot fill.\n\n\
BROKEN OUTPUT:\n<<BROKEN>>";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("no chat provider configured")]
    NoProviders,

    #[error("{tag} failed after retries: {last_error}")]
    Exhausted { tag: String, last_error: String },

    #[error("{tag}: model output did not match the expected shape: {message}")]
    Decode { tag: String, message: String },

    #[error("no embedding backend configured")]
    NoEmbedder,

    #[error("embedding failed: {0}")]
    Embedding(#[from] ProviderError),
}

/// Which path of a logical call an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallPhase {
    Call,
    Repair,
    /// A request rejected for its token budget and re-sent smaller.
    TokenRetry,
}

/// One provider invocation. Entries are appended and never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAttempt {
    pub tag: String,
    pub provider: String,
    pub phase: CallPhase,
    /// 1-based attempt cycle.
    pub attempt: u32,
    /// The provider was not the first in priority order.
    pub fallback_used: bool,
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub raw_preview: String,
    pub recorded_at: DateTime<Utc>,
}

/// Output contract of a call.
#[derive(Debug, Clone, Copy)]
pub enum OutputSpec<'a> {
    /// Raw text, no JSON mode.
    Text,
    /// A JSON object carrying at least these keys.
    Json { required: &'a [&'a str] },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutput {
    Json(Map<String, Value>),
    Text(String),
}

/// A typed model result with the keys that must be present before decoding.
pub trait ModelOutput: DeserializeOwned {
    const REQUIRED_KEYS: &'static [&'static str];
}

/// Tunables of the gateway.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub max_retries: u32,
    pub max_tokens: u32,
    pub token_floor: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub retry: RetryConfig,
    /// Tries per provider invocation while adapting to token limits.
    pub max_token_tries: u32,
    /// Broken output longer than this is cut before being sent for repair.
    pub repair_input_chars: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_tokens: 8192,
            token_floor: 1024,
            temperature: 0.1,
            timeout: Duration::from_secs(120),
            retry: RetryConfig::default(),
            max_token_tries: 5,
            repair_input_chars: 60_000,
        }
    }
}

pub struct ModelGateway {
    providers: Vec<Arc<dyn ChatProvider>>,
    embedder: Option<Arc<dyn Embedder>>,
    settings: GatewaySettings,
    calls: Mutex<Vec<CallAttempt>>,
}

impl ModelGateway {
    pub fn new(
        providers: Vec<Arc<dyn ChatProvider>>,
        embedder: Option<Arc<dyn Embedder>>,
        settings: GatewaySettings,
    ) -> Result<Self, GatewayError> {
        if providers.is_empty() {
            return Err(GatewayError::NoProviders);
        }
        Ok(Self {
            providers,
            embedder,
            settings,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Build the provider chain described by the configuration: the
    /// OpenAI-compatible primary when configured, then the Ollama chat
    /// fallback when allowed.
    pub fn from_config(config: &PipelineConfig) -> crate::Result<Self> {
        let llm = &config.llm;
        let client = provider::build_http_client(llm.timeout)
            .map_err(|e| crate::Error::config(format!("failed to build HTTP client: {e}")))?;

        let mut providers: Vec<Arc<dyn ChatProvider>> = Vec::new();
        if let Some(base_url) = &llm.base_url {
            providers.push(Arc::new(openai::OpenAiCompatibleProvider::new(
                "primary",
                base_url.clone(),
                llm.api_key.clone(),
                llm.model.clone(),
                client.clone(),
            )));
        }
        if llm.allow_ollama_chat_fallback {
            providers.push(Arc::new(ollama::OllamaChatProvider::new(
                llm.ollama_base_url.clone(),
                llm.ollama_chat_model.clone(),
                client.clone(),
            )));
        }
        if providers.is_empty() {
            return Err(crate::Error::config(
                "no chat provider configured: set LLM_PROVIDER_BASE_URL or ALLOW_OLLAMA_CHAT_FALLBACK=true",
            ));
        }

        let emb = &config.embedding;
        let embedder: Arc<dyn Embedder> = match emb.provider {
            EmbeddingProviderKind::Ollama => Arc::new(ollama::OllamaEmbedder::new(
                emb.base_url.clone(),
                emb.model.clone(),
                client,
            )),
            EmbeddingProviderKind::OpenAi => Arc::new(openai::OpenAiEmbedder::new(
                emb.base_url.clone(),
                emb.api_key.clone(),
                emb.model.clone(),
                client,
            )),
        };

        let settings = GatewaySettings {
            max_retries: llm.max_retries,
            max_tokens: llm.max_tokens,
            token_floor: llm.token_floor,
            temperature: llm.temperature,
            timeout: llm.timeout,
            retry: llm.retry.clone(),
            ..GatewaySettings::default()
        };

        info!(
            providers = ?providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
            embedder = embedder.name(),
            "Model gateway ready"
        );
        Ok(Self::new(providers, Some(embedder), settings)?)
    }

    /// Issue one logical call.
    pub async fn call(
        &self,
        tag: &str,
        system: &str,
        user: &str,
        spec: OutputSpec<'_>,
    ) -> Result<GatewayOutput, GatewayError> {
        let json_mode = matches!(spec, OutputSpec::Json { .. });
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.settings.max_retries.max(1) {
            let delay = self.settings.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug!(tag, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }

            for (index, provider) in self.providers.iter().enumerate() {
                let started = Instant::now();
                let result = self
                    .invoke(tag, attempt, index, provider.as_ref(), system, user, json_mode)
                    .await;
                let latency = started.elapsed();

                let raw = match result {
                    Ok(raw) => raw,
                    Err(e) => {
                        last_error = format!("{}: {e}", provider.name());
                        self.record(tag, provider.name(), CallPhase::Call, attempt, index, latency, Err(&e.to_string()), "");
                        continue;
                    }
                };

                let required = match spec {
                    OutputSpec::Text => {
                        self.record(tag, provider.name(), CallPhase::Call, attempt, index, latency, Ok(()), &raw);
                        return Ok(GatewayOutput::Text(raw));
                    }
                    OutputSpec::Json { required } => required,
                };

                match json::parse_required(&raw, required) {
                    Ok(obj) => {
                        self.record(tag, provider.name(), CallPhase::Call, attempt, index, latency, Ok(()), &raw);
                        return Ok(GatewayOutput::Json(obj));
                    }
                    Err(e) => {
                        last_error = format!("{}: {e}", provider.name());
                        self.record(tag, provider.name(), CallPhase::Call, attempt, index, latency, Err(&e.to_string()), &raw);
                        if !raw.trim().is_empty()
                            && let Some(obj) = self.repair(tag, &raw, required, attempt).await
                        {
                            return Ok(GatewayOutput::Json(obj));
                        }
                    }
                }
            }
        }

        warn!(tag, error = %last_error, "Model call exhausted all providers and retries");
        Err(GatewayError::Exhausted {
            tag: tag.to_string(),
            last_error,
        })
    }

    /// Call in JSON mode and return the validated root object.
    pub async fn call_json(
        &self,
        tag: &str,
        system: &str,
        user: &str,
        required: &[&str],
    ) -> Result<Map<String, Value>, GatewayError> {
        match self.call(tag, system, user, OutputSpec::Json { required }).await? {
            GatewayOutput::Json(obj) => Ok(obj),
            GatewayOutput::Text(raw) => json::parse_required(&raw, required).map_err(|e| {
                GatewayError::Decode {
                    tag: tag.to_string(),
                    message: e.to_string(),
                }
            }),
        }
    }

    /// Call without JSON mode and return the raw text.
    pub async fn call_text(&self, tag: &str, system: &str, user: &str) -> Result<String, GatewayError> {
        match self.call(tag, system, user, OutputSpec::Text).await? {
            GatewayOutput::Text(raw) => Ok(raw),
            GatewayOutput::Json(obj) => Ok(Value::Object(obj).to_string()),
        }
    }

    /// Call in JSON mode and decode into a typed result.
    pub async fn call_typed<T: ModelOutput>(
        &self,
        tag: &str,
        system: &str,
        user: &str,
    ) -> Result<T, GatewayError> {
        let obj = self.call_json(tag, system, user, T::REQUIRED_KEYS).await?;
        serde_json::from_value(Value::Object(obj)).map_err(|e| GatewayError::Decode {
            tag: tag.to_string(),
            message: e.to_string(),
        })
    }

    /// Embed texts after whitespace normalization.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embedder = self.embedder.as_ref().ok_or(GatewayError::NoEmbedder)?;
        let normalized: Vec<String> = texts.iter().map(|t| collapse_whitespace(t)).collect();
        Ok(embedder.embed(&normalized).await?)
    }

    /// Snapshot of every call attempt so far, in append order.
    pub fn call_log(&self) -> Vec<CallAttempt> {
        self.calls.lock().clone()
    }

    /// One provider invocation with token-budget adaptation. Requests that
    /// are re-sent after a token-limit error are logged here as
    /// [`CallPhase::TokenRetry`]; the caller logs the final one.
    #[allow(clippy::too_many_arguments)]
    async fn invoke(
        &self,
        tag: &str,
        attempt: u32,
        index: usize,
        provider: &dyn ChatProvider,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> Result<String, ProviderError> {
        let floor = self.settings.token_floor;
        let mut request = ChatRequest {
            system: system.to_string(),
            user: user.to_string(),
            json_mode,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        let mut prompt_shrunk = false;
        let max_tries = self.settings.max_token_tries.max(1);
        let mut try_no = 0;

        loop {
            try_no += 1;
            let started = Instant::now();
            let err = match tokio::time::timeout(self.settings.timeout, provider.complete(&request)).await {
                Err(_) => return Err(ProviderError::Timeout),
                Ok(Ok(raw)) => return Ok(raw),
                Ok(Err(err)) => err,
            };
            if !err.is_token_limit() || try_no >= max_tries {
                return Err(err);
            }

            if request.max_tokens > floor {
                let next = (request.max_tokens / 2).max(floor);
                warn!(
                    provider = provider.name(),
                    from = request.max_tokens,
                    to = next,
                    "Token limit hit, reducing output budget"
                );
                request.max_tokens = next;
            } else if !prompt_shrunk {
                prompt_shrunk = true;
                let shrunk = shrink_prompt_text(&request.user);
                if shrunk.len() >= request.user.len() {
                    return Err(err);
                }
                warn!(
                    provider = provider.name(),
                    from_chars = request.user.chars().count(),
                    to_chars = shrunk.chars().count(),
                    "Token limit hit at budget floor, shrinking prompt"
                );
                request.user = shrunk;
            } else {
                return Err(err);
            }
            self.record(
                tag,
                provider.name(),
                CallPhase::TokenRetry,
                attempt,
                index,
                started.elapsed(),
                Err(&err.to_string()),
                "",
            );
        }
    }

    /// Coerce broken output into the required shape. Never fails; `None`
    /// means the caller moves on to the next provider or cycle.
    async fn repair(
        &self,
        tag: &str,
        broken: &str,
        required: &[&str],
        attempt: u32,
    ) -> Option<Map<String, Value>> {
        if let Some(obj) = json::heuristic_repair(broken)
            && json::validate_keys(&obj, required).is_ok()
        {
            debug!(tag, "Output repaired locally");
            return Some(obj);
        }

        let keys = serde_json::to_string(required).unwrap_or_default();
        let broken = truncate_chars(broken, self.settings.repair_input_chars);
        let user = fill_template(
            REPAIR_USER_PROMPT,
            &[("REQUIRED_KEYS", keys.as_str()), ("BROKEN", broken.as_str())],
        );

        for (index, provider) in self.providers.iter().enumerate() {
            let started = Instant::now();
            let result = self
                .invoke(tag, attempt, index, provider.as_ref(), REPAIR_SYSTEM_PROMPT, &user, true)
                .await;
            let latency = started.elapsed();
            match result {
                Ok(raw) => match json::parse_required(&raw, required) {
                    Ok(obj) => {
                        self.record(tag, provider.name(), CallPhase::Repair, attempt, index, latency, Ok(()), &raw);
                        info!(tag, provider = provider.name(), "Output repaired by model");
                        return Some(obj);
                    }
                    Err(e) => {
                        self.record(tag, provider.name(), CallPhase::Repair, attempt, index, latency, Err(&e.to_string()), &raw);
                    }
                },
                Err(e) => {
                    self.record(tag, provider.name(), CallPhase::Repair, attempt, index, latency, Err(&e.to_string()), "");
                }
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        tag: &str,
        provider: &str,
        phase: CallPhase,
        attempt: u32,
        index: usize,
        latency: Duration,
        outcome: Result<(), &str>,
        raw: &str,
    ) {
        let entry = CallAttempt {
            tag: tag.to_string(),
            provider: provider.to_string(),
            phase,
            attempt,
            fallback_used: index > 0,
            success: outcome.is_ok(),
            latency_ms: latency.as_millis() as u64,
            error: outcome.err().map(str::to_string),
            raw_preview: truncate_chars(raw, RAW_PREVIEW_CHARS),
            recorded_at: Utc::now(),
        };
        if entry.success {
            debug!(tag, provider, %phase, attempt, latency_ms = entry.latency_ms, "Model call succeeded");
        } else {
            warn!(
                tag,
                provider,
                %phase,
                attempt,
                latency_ms = entry.latency_ms,
                error = entry.error.as_deref().unwrap_or_default(),
                "Model call failed"
            );
        }
        self.calls.lock().push(entry);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted providers for exercising the gateway and the stages above it.

    use std::collections::VecDeque;

    use super::*;

    /// Replays queued responses; once the queue is empty, answers with `fallback`.
    pub struct ScriptedProvider {
        name: String,
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        fallback: Result<String, ProviderError>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        pub fn new(name: &str, script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                name: name.to_string(),
                script: Mutex::new(script.into()),
                fallback: Err(ProviderError::Transport("script exhausted".to_string())),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn always(name: &str, response: Result<String, ProviderError>) -> Self {
            Self {
                fallback: response,
                ..Self::new(name, Vec::new())
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderError> {
            self.requests.lock().push(request.clone());
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    /// Bag-of-words embedder: texts sharing words get similar vectors.
    #[derive(Default)]
    pub struct KeywordEmbedder {
        pub fail: bool,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl KeywordEmbedder {
        pub const DIMS: usize = 64;

        pub fn vector(text: &str) -> Vec<f32> {
            let mut v = vec![0.0; Self::DIMS];
            for token in text.split_whitespace() {
                let token = token.to_lowercase();
                let bucket = token.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
                v[bucket % Self::DIMS] += 1.0;
            }
            v
        }
    }

    #[async_trait::async_trait]
    impl Embedder for KeywordEmbedder {
        fn name(&self) -> &str {
            "keywords"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.lock().push(texts.to_vec());
            if self.fail {
                return Err(ProviderError::Transport("embedder down".to_string()));
            }
            Ok(texts.iter().map(|t| Self::vector(t)).collect())
        }
    }

    pub fn fast_settings() -> GatewaySettings {
        GatewaySettings {
            retry: RetryConfig::immediate(),
            ..GatewaySettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn gateway(providers: Vec<Arc<ScriptedProvider>>) -> ModelGateway {
        let providers = providers
            .into_iter()
            .map(|p| p as Arc<dyn ChatProvider>)
            .collect();
        ModelGateway::new(providers, None, fast_settings()).unwrap()
    }

    #[tokio::test]
    async fn test_first_provider_success() {
        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Ok("```json\n{\"topics\": []}\n```".to_string())],
        ));
        let gw = gateway(vec![primary.clone()]);

        let obj = gw.call_json("t", "sys", "usr", &["topics"]).await.unwrap();
        assert!(obj.contains_key("topics"));

        let log = gw.call_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].success);
        assert!(!log[0].fallback_used);
        assert!(primary.requests.lock()[0].json_mode);
    }

    #[tokio::test]
    async fn test_falls_back_to_second_provider() {
        let primary = Arc::new(ScriptedProvider::always(
            "primary",
            Err(ProviderError::Transport("connection refused".to_string())),
        ));
        let secondary = Arc::new(ScriptedProvider::new("ollama", vec![Ok(r#"{"a": 1}"#.to_string())]));
        let gw = gateway(vec![primary, secondary]);

        let obj = gw.call_json("t", "s", "u", &["a"]).await.unwrap();
        assert_eq!(obj["a"], 1);

        let log = gw.call_log();
        assert_eq!(log.len(), 2);
        assert!(!log[0].success);
        assert!(log[1].success && log[1].fallback_used);
    }

    #[tokio::test]
    async fn test_token_limit_halves_budget_then_shrinks_prompt() {
        let token_err = || Err(parse_error_body("maximum context length exceeded"));
        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![
                token_err(),
                token_err(),
                token_err(),
                token_err(),
                Ok(r#"{"ok": true}"#.to_string()),
            ],
        ));
        let gw = gateway(vec![primary.clone()]);
        let long_prompt = "x".repeat(20_000);

        gw.call_json("t", "s", &long_prompt, &["ok"]).await.unwrap();

        let requests = primary.requests.lock();
        let budgets: Vec<u32> = requests.iter().map(|r| r.max_tokens).collect();
        assert_eq!(budgets, vec![8192, 4096, 2048, 1024, 1024]);
        assert!(!requests[3].user.contains("TRUNCATED_FOR_TOKEN_LIMIT"));
        assert!(requests[4].user.contains("TRUNCATED_FOR_TOKEN_LIMIT"));
        let phases: Vec<CallPhase> = gw.call_log().iter().map(|c| c.phase).collect();
        assert_eq!(phases.len(), requests.len());
        assert_eq!(&phases[..4], &[CallPhase::TokenRetry; 4]);
        assert_eq!(phases[4], CallPhase::Call);
        assert!(gw.call_log()[..4].iter().all(|c| !c.success && c.attempt == 1));
        assert!(gw.call_log()[4].success);
        assert_eq!(CallPhase::TokenRetry.to_string(), "token_retry");
    }

    fn parse_error_body(body: &str) -> ProviderError {
        provider::parse_http_error(400, body)
    }

    #[tokio::test]
    async fn test_non_token_error_is_not_adapted() {
        let primary = Arc::new(ScriptedProvider::always(
            "primary",
            Err(ProviderError::Server {
                status: 502,
                body: "bad gateway".to_string(),
            }),
        ));
        let gw = gateway(vec![primary.clone()]);

        let err = gw.call_json("stage", "s", "u", &["a"]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Exhausted { ref tag, .. } if tag == "stage"));
        // One request per cycle, no budget retries.
        assert_eq!(primary.requests.lock().len(), 3);
        assert_eq!(gw.call_log().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_keys_go_through_model_repair() {
        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![
                Ok(r#"{"entities": {}}"#.to_string()),
                Ok(r#"{"entities": {}, "topics": []}"#.to_string()),
            ],
        ));
        let gw = gateway(vec![primary.clone()]);

        let obj = gw
            .call_json("kg", "s", "u", &["entities", "topics"])
            .await
            .unwrap();
        assert!(obj.contains_key("topics"));

        let log = gw.call_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].phase, CallPhase::Call);
        assert!(!log[0].success);
        assert_eq!(log[1].phase, CallPhase::Repair);
        assert!(log[1].success);

        let requests = primary.requests.lock();
        assert_eq!(requests[1].system, REPAIR_SYSTEM_PROMPT);
        assert!(requests[1].user.contains("\"topics\""));
    }

    #[tokio::test]
    async fn test_truncated_output_repaired_locally() {
        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Ok(r#"{"topics": [{"name": "Budget"#.to_string())],
        ));
        let gw = gateway(vec![primary.clone()]);

        let obj = gw.call_json("t", "s", "u", &["topics"]).await.unwrap();
        assert_eq!(obj["topics"][0]["name"], "Budget");
        assert_eq!(primary.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_repair_moves_to_next_cycle() {
        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![
                Ok("no json at all".to_string()),
                Ok("still nothing".to_string()),
                Ok(r#"{"a": 1}"#.to_string()),
            ],
        ));
        let gw = gateway(vec![primary]);

        let obj = gw.call_json("t", "s", "u", &["a"]).await.unwrap();
        assert_eq!(obj["a"], 1);

        let log = gw.call_log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2].attempt, 2);
        assert!(log[2].success);
    }

    #[tokio::test]
    async fn test_text_mode_returns_raw() {
        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Ok("<!doctype html><html></html>".to_string())],
        ));
        let gw = gateway(vec![primary.clone()]);

        let html = gw.call_text("render", "s", "u").await.unwrap();
        assert!(html.starts_with("<!doctype html>"));
        assert!(!primary.requests.lock()[0].json_mode);
    }

    #[tokio::test]
    async fn test_typed_call_and_missing_embedder() {
        #[derive(Debug, Deserialize)]
        struct Sample {
            topics: Vec<String>,
        }
        impl ModelOutput for Sample {
            const REQUIRED_KEYS: &'static [&'static str] = &["topics"];
        }

        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Ok(r#"{"topics": ["a", "b"]}"#.to_string())],
        ));
        let gw = gateway(vec![primary]);
        let sample: Sample = gw.call_typed("t", "s", "u").await.unwrap();
        assert_eq!(sample.topics, vec!["a", "b"]);

        assert!(gw.embed(&[]).await.unwrap().is_empty());
        assert!(matches!(
            gw.embed(&["x".to_string()]).await,
            Err(GatewayError::NoEmbedder)
        ));
    }

    #[test]
    fn test_no_providers_rejected() {
        assert!(matches!(
            ModelGateway::new(Vec::new(), None, GatewaySettings::default()),
            Err(GatewayError::NoProviders)
        ));
    }
}
