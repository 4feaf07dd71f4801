//! Provider transports.

mod anthropic;
mod openai;
pub mod sse;
mod traits;

pub use anthropic::AnthropicTransport;
pub use openai::OpenAiTransport;
pub use traits::{Chunk, ChunkStream, ProviderReply, Transport, TransportReply};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::settings::DEFAULT_ATTEMPT_TIMEOUT_SECS;
use crate::config::{ConfigProvider, keys};
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest silence tolerated on an open connection, including mid-stream.
const READ_TIMEOUT: Duration = Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProviderKind {
    #[default]
    Anthropic,
    /// OpenAI and compatible chat-completions endpoints (OpenRouter, vLLM, Ollama).
    OpenAi,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" | "openai_compatible" | "openai-compatible" => Ok(Self::OpenAi),
            other => Err(format!(
                "unknown provider '{}', expected 'anthropic' or 'openai'",
                other
            )),
        }
    }
}

impl ProviderKind {
    /// Read the `provider` key, defaulting to Anthropic.
    pub async fn load(config: &dyn ConfigProvider) -> Result<Self> {
        use crate::config::ConfigProviderExt;
        Ok(config.get_parsed(keys::PROVIDER).await?.unwrap_or_default())
    }
}

/// Build the transport for `kind` from its provider's environment variables.
pub fn create_transport(kind: ProviderKind) -> Result<Arc<dyn Transport>> {
    match kind {
        ProviderKind::Anthropic => Ok(Arc::new(AnthropicTransport::from_env()?)),
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiTransport::from_env()?)),
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .build()?)
}

pub(crate) fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Error body shape shared by both providers.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    message: String,
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Turn a non-success response into the matching [`Error`].
pub(crate) async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let retry_after = retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    let (error_type, message) = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => (parsed.error.error_type, parsed.error.message),
        Err(_) => (None, body),
    };

    match status {
        429 => Error::RateLimit { retry_after },
        401 | 403 => Error::Auth { message },
        _ => Error::Api {
            message,
            status: Some(status),
            error_type,
        },
    }
}
