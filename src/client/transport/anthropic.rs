//! Anthropic Messages API transport.

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::sse::{SseEvent, SseParser};
use super::traits::{Chunk, ProviderReply, Transport, TransportReply};
use super::{env_var, error_from_response, http_client};
use crate::types::{ModelRequest, Usage};
use crate::{Error, Result};

const BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicTransport {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    api_version: String,
}

impl std::fmt::Debug for AnthropicTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicTransport")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl AnthropicTransport {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            api_key: SecretString::from(api_key.into()),
            base_url: BASE_URL.to_string(),
            api_version: API_VERSION.to_string(),
        })
    }

    /// `ANTHROPIC_API_KEY`, plus `ANTHROPIC_BASE_URL` when set.
    pub fn from_env() -> Result<Self> {
        let key = env_var("ANTHROPIC_API_KEY")
            .ok_or_else(|| Error::Config("ANTHROPIC_API_KEY is not set".into()))?;
        let transport = Self::new(key)?;
        Ok(match env_var("ANTHROPIC_BASE_URL") {
            Some(url) => transport.with_base_url(url),
            None => transport,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn body(request: &ModelRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .conversation()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": request.model.as_str(),
            "max_tokens": request.max_tokens(),
            "messages": messages,
            "stream": request.is_streaming(),
        });
        if let Some(system) = request.system_prompt() {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.options.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Usage::new(usage.input_tokens, usage.output_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartedMessage {
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartedMessage,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        usage: Option<WireUsage>,
    },
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

fn decode_event(event: SseEvent) -> Option<Result<Chunk>> {
    let parsed: StreamEvent = match serde_json::from_str(&event.data) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, data = %event.data, "failed to parse stream event");
            return None;
        }
    };

    match parsed {
        StreamEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        } => Some(Ok(Chunk::Text(text))),
        StreamEvent::MessageStart {
            message: StartedMessage { usage: Some(usage) },
        }
        | StreamEvent::MessageDelta { usage: Some(usage) } => Some(Ok(Chunk::Usage(usage.into()))),
        StreamEvent::Error { error } => Some(Err(Error::Api {
            message: error.message,
            status: None,
            error_type: Some(error.error_type),
        })),
        _ => None,
    }
}

#[async_trait]
impl Transport for AnthropicTransport {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn supports_stream_usage(&self) -> bool {
        true
    }

    async fn send(&self, request: &ModelRequest) -> Result<TransportReply> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&Self::body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        if request.is_streaming() {
            let chunks = SseParser::new(response.bytes_stream()).filter_map(|event| async move {
                match event {
                    Ok(event) => decode_event(event),
                    Err(e) => Some(Err(e)),
                }
            });
            return Ok(TransportReply::Stream(Box::pin(chunks)));
        }

        let message: MessageResponse = response.json().await?;
        let text = message
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");
        Ok(TransportReply::Complete(ProviderReply {
            text,
            usage: message.usage.map(Usage::from),
        }))
    }
}
