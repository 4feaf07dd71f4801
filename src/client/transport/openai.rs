//! OpenAI-compatible chat completions transport.

use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::sse::{SseEvent, SseParser};
use super::traits::{Chunk, ProviderReply, Transport, TransportReply};
use super::{env_var, error_from_response, http_client};
use crate::types::{ModelRequest, Usage};
use crate::{Error, Result};

const BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiTransport {
    http: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
}

impl std::fmt::Debug for OpenAiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiTransport")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiTransport {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            api_key: Some(SecretString::from(api_key.into())),
            base_url: BASE_URL.to_string(),
        })
    }

    /// For local servers that take no key.
    pub fn unauthenticated(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            api_key: None,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `OPENAI_API_KEY` and/or `OPENAI_BASE_URL`. At least one must be set.
    pub fn from_env() -> Result<Self> {
        match (env_var("OPENAI_API_KEY"), env_var("OPENAI_BASE_URL")) {
            (Some(key), Some(url)) => Ok(Self::new(key)?.with_base_url(url)),
            (Some(key), None) => Self::new(key),
            (None, Some(url)) => Self::unauthenticated(url),
            (None, None) => Err(Error::Config(
                "OPENAI_API_KEY is not set (set OPENAI_BASE_URL for keyless local servers)".into(),
            )),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn body(request: &ModelRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": request.model.as_str(),
            "messages": messages,
            "stream": request.is_streaming(),
        });
        if let Some(max_tokens) = request.options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.options.temperature {
            body["temperature"] = json!(temperature);
        }
        if request.wants_stream_usage() {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    /// Reported by some gateways (OpenRouter, LiteLLM proxies).
    #[serde(default)]
    cost: Option<f64>,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        let base = Usage::new(usage.prompt_tokens, usage.completion_tokens);
        match usage.cost.and_then(|c| Decimal::try_from(c).ok()) {
            Some(cost) => base.with_cost(cost),
            None => base,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

/// One SSE event can carry text, usage, or both.
fn decode_event(event: SseEvent) -> Vec<Result<Chunk>> {
    let parsed: CompletionChunk = match serde_json::from_str(&event.data) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, data = %event.data, "failed to parse stream chunk");
            return Vec::new();
        }
    };

    if let Some(error) = parsed.error {
        return vec![Err(Error::Api {
            message: error.message,
            status: None,
            error_type: error.error_type,
        })];
    }

    let mut chunks: Vec<Result<Chunk>> = parsed
        .choices
        .into_iter()
        .take(1)
        .filter_map(|choice| choice.delta.content)
        .filter(|text| !text.is_empty())
        .map(|text| Ok(Chunk::Text(text)))
        .collect();
    if let Some(usage) = parsed.usage {
        chunks.push(Ok(Chunk::Usage(usage.into())));
    }
    chunks
}

#[async_trait]
impl Transport for OpenAiTransport {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn supports_stream_usage(&self) -> bool {
        true
    }

    async fn send(&self, request: &ModelRequest) -> Result<TransportReply> {
        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .json(&Self::body(request));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        if request.is_streaming() {
            let chunks = SseParser::new(response.bytes_stream())
                .map(|event| match event {
                    Ok(event) => futures::stream::iter(decode_event(event)),
                    Err(e) => futures::stream::iter(vec![Err(e)]),
                })
                .flatten();
            return Ok(TransportReply::Stream(Box::pin(chunks)));
        }

        let completion: CompletionResponse = response.json().await?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(TransportReply::Complete(ProviderReply {
            text,
            usage: completion.usage.map(Usage::from),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use rust_decimal_macros::dec;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_body_requests_stream_usage() {
        let request = ModelRequest::new("gpt-4o", vec![Message::user("hi")])
            .with_stream(true)
            .with_include_usage(true);
        let body = OpenAiTransport::body(&request);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("max_tokens").is_none());

        let request = request.with_include_usage(false);
        assert!(OpenAiTransport::body(&request).get("stream_options").is_none());
    }

    #[test]
    fn test_decode_content_delta() {
        let chunks = decode_event(event(
            r#"{"id":"c","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
        ));
        assert!(matches!(chunks.as_slice(), [Ok(Chunk::Text(t))] if t == "Hel"));
    }

    #[test]
    fn test_decode_usage_chunk_with_cost() {
        let chunks = decode_event(event(
            r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":12,"cost":0.0021}}"#,
        ));
        match chunks.as_slice() {
            [Ok(Chunk::Usage(usage))] => {
                assert_eq!(usage.prompt_tokens, 9);
                assert_eq!(usage.completion_tokens, 12);
                assert_eq!(usage.cost, Some(dec!(0.0021)));
            }
            other => panic!("unexpected chunks: {other:?}"),
        }
    }

    #[test]
    fn test_decode_role_only_delta_is_empty() {
        let chunks = decode_event(event(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#));
        assert!(chunks.is_empty());
    }
}
