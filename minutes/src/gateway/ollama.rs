//! Ollama chat and embedding clients.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::provider::{ChatProvider, ChatRequest, Embedder, ProviderError, read_success_body};

/// Chat provider using Ollama's `/api/chat`.
pub struct OllamaChatProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaChatProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }

    fn build_request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        if request.json_mode {
            body["format"] = json!("json");
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

pub(crate) fn parse_chat(body: &str) -> Result<String, ProviderError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;
    if let Some(error) = parsed.error {
        return Err(ProviderError::InvalidRequest(error));
    }
    match parsed.message {
        Some(m) if !m.content.trim().is_empty() => Ok(m.content),
        _ => Err(ProviderError::EmptyResponse),
    }
}

#[async_trait]
impl ChatProvider for OllamaChatProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.build_request_body(request))
            .send()
            .await?;
        parse_chat(&read_success_body(response).await?)
    }
}

/// Embedder using Ollama's batch `/api/embed`.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama-embeddings"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({"model": self.model, "input": texts}))
            .send()
            .await?;
        let body = read_success_body(response).await?;
        let parsed: EmbedResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(ProviderError::Decode(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gateway::provider::build_http_client;

    #[test]
    fn test_request_body_uses_format_json() {
        let p = OllamaChatProvider::new(
            "http://localhost:11434/",
            "qwen",
            build_http_client(Duration::from_secs(5)).unwrap(),
        );
        let body = p.build_request_body(&ChatRequest {
            system: "s".to_string(),
            user: "u".to_string(),
            json_mode: true,
            max_tokens: 300,
            temperature: 0.1,
        });
        assert_eq!(body["format"], "json");
        assert_eq!(body["options"]["num_predict"], 300);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_parse_chat() {
        assert_eq!(
            parse_chat(r#"{"message":{"role":"assistant","content":"hi"}}"#).unwrap(),
            "hi"
        );
        assert!(matches!(
            parse_chat(r#"{"error":"model not loaded"}"#),
            Err(ProviderError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_chat(r#"{"message":{"content":"  "}}"#),
            Err(ProviderError::EmptyResponse)
        ));
    }
}
