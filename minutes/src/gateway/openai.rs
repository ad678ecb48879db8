//! OpenAI-compatible chat-completions and embeddings clients.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::provider::{ChatProvider, ChatRequest, Embedder, ProviderError, read_success_body};

/// Chat provider speaking the `/chat/completions` protocol.
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            client,
        }
    }

    fn build_request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Value,
}

/// Pull the assistant text out of a completion body. Content may be a plain
/// string or a list of typed parts.
pub(crate) fn parse_completion(body: &str) -> Result<String, ProviderError> {
    let parsed: CompletionResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or(ProviderError::EmptyResponse)?;
    let text = match content {
        Value::String(s) => s,
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| match p {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) => o.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };
    if text.trim().is_empty() {
        Err(ProviderError::EmptyResponse)
    } else {
        Ok(text)
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.build_request_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let body = read_success_body(builder.send().await?).await?;
        parse_completion(&body)
    }
}

/// Embedder speaking the `/embeddings` protocol.
pub struct OpenAiEmbedder {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

pub(crate) fn parse_embeddings(body: &str, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
    let mut parsed: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;
    parsed.data.sort_by_key(|row| row.index);
    if parsed.data.len() != expected {
        return Err(ProviderError::Decode(format!(
            "expected {expected} embeddings, got {}",
            parsed.data.len()
        )));
    }
    Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai-embeddings"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&json!({"model": self.model, "input": texts}));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let body = read_success_body(builder.send().await?).await?;
        parse_embeddings(&body, texts.len())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gateway::provider::build_http_client;

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            "primary",
            "http://localhost:8000/v1/",
            None,
            "m",
            build_http_client(Duration::from_secs(5)).unwrap(),
        )
    }

    #[test]
    fn test_request_body_json_mode() {
        let p = provider();
        let request = ChatRequest {
            system: "sys".to_string(),
            user: "usr".to_string(),
            json_mode: true,
            max_tokens: 512,
            temperature: 0.1,
        };
        let body = p.build_request_body(&request);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(p.base_url, "http://localhost:8000/v1");

        let body = p.build_request_body(&ChatRequest {
            json_mode: false,
            ..request
        });
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_parse_completion_variants() {
        let body = r#"{"choices":[{"message":{"content":"{\"a\":1}"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), r#"{"a":1}"#);

        let body = r#"{"choices":[{"message":{"content":[{"type":"text","text":"he"},{"type":"text","text":"llo"}]}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "hello");

        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(ProviderError::EmptyResponse)
        ));
        assert!(matches!(
            parse_completion("not json"),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_embeddings_orders_by_index() {
        let body = r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#;
        let vectors = parse_embeddings(body, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert!(parse_embeddings(body, 3).is_err());
    }
}
