//! # llm-invoke
//!
//! Budgeted, retried and stream-guarded calls to hosted language models.
//!
//! Every call goes through one [`ModelClient`], which checks a process-wide
//! call and cost budget, resolves the model's context window, retries transient
//! provider failures with exponential backoff, and cuts off replies that
//! degenerate into runs of repeated closing tags.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use llm_invoke::config::{CompositeConfigProvider, MemoryConfigProvider};
//! use llm_invoke::{Message, ModelClient, ModelRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), llm_invoke::Error> {
//!     let overrides = MemoryConfigProvider::new()
//!         .value("global_call_limit", 100)
//!         .value("use_streaming", true);
//!     let config = Arc::new(CompositeConfigProvider::standard(overrides));
//!     let client = ModelClient::from_config(config).await?;
//!
//!     let request = ModelRequest::new(
//!         "claude-sonnet-4-5",
//!         vec![Message::user("What is 2 + 2?")],
//!     );
//!     let reply = client.query(&request).await?;
//!     println!("{} (cost ${})", reply.text, reply.charged_cost);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod budget;
pub mod client;
pub mod config;
pub mod models;
pub mod observability;
pub mod types;

pub use budget::{
    BudgetDenial, BudgetLimits, BudgetPermit, BudgetState, CostTracker, CostTrackingMode,
    ModelPricing, PricingTable, PricingTableBuilder, global_pricing_table, global_tracker,
};
pub use client::{
    AnthropicTransport, CallPhase, ExponentialBackoff, ModelClient, ModelClientBuilder,
    OpenAiTransport, ProviderKind, RetryConfig, RetryManager, StreamGuard, StreamGuardConfig,
    StreamingAggregator, Transport, TransportReply,
};
pub use config::{ConfigProvider, InvocationSettings};
pub use models::{ContextUsage, ContextWindowResolver, ModelId, Resolution, WindowStatus};
pub use types::{
    CallOutcome, FailureKind, FinishKind, Message, ModelReply, ModelRequest, Role, Usage,
    UsageRecord,
};

/// Error type for llm-invoke operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Provider returned an error response.
    #[error("API error (HTTP {status}): {message}", status = status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into()))]
    Api {
        message: String,
        status: Option<u16>,
        error_type: Option<String>,
    },

    /// Provider rejected the credentials.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to parse a response or the context window table.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Provider rate limit hit.
    #[error("Rate limit exceeded{}", match retry_after {
        Some(d) => format!(", retry in {:.0}s", d.as_secs_f64()),
        None => String::new(),
    })]
    RateLimit {
        retry_after: Option<std::time::Duration>,
    },

    /// A single attempt ran past its deadline.
    #[error("Operation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(std::time::Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Streaming reply broke off or could not be decoded.
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Environment variable error: {0}")]
    Env(std::env::VarError),

    /// Call refused before it was sent.
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(#[from] budget::BudgetDenial),

    /// Every allowed attempt failed with a transient error.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    /// No context window entry matches the model.
    #[error("No context window known for model {model} (looked up as {key})")]
    ContextWindowUnresolved { model: String, key: String },

    /// A completed call could not be priced.
    #[error("Cost computation failed for {model}: {reason}")]
    CostComputation { model: String, reason: String },
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Authentication or authorization failures (401, 403)
    Authorization,
    /// Configuration, request or parsing errors
    Configuration,
    /// Network, rate limit, or overload errors that may succeed on retry
    Transient,
    /// Internal errors (IO, JSON, unexpected states)
    Internal,
    /// Budget, retry or pricing limits
    ResourceLimit,
}

impl Error {
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        if self.is_overloaded() {
            return ErrorCategory::Transient;
        }
        match self {
            Error::Auth { .. } => ErrorCategory::Authorization,
            Error::Api {
                status: Some(401 | 403),
                ..
            } => ErrorCategory::Authorization,

            Error::Network(_)
            | Error::RateLimit { .. }
            | Error::Timeout(_)
            | Error::Stream(_) => ErrorCategory::Transient,
            Error::Api {
                status: Some(408 | 429 | 500..=599),
                ..
            } => ErrorCategory::Transient,

            Error::Config(_)
            | Error::Parse(_)
            | Error::Env(_)
            | Error::InvalidRequest(_)
            | Error::ContextWindowUnresolved { .. } => ErrorCategory::Configuration,
            Error::Api {
                status: Some(400..=499),
                ..
            } => ErrorCategory::Configuration,

            Error::BudgetExceeded(_)
            | Error::RetriesExhausted { .. }
            | Error::CostComputation { .. } => ErrorCategory::ResourceLimit,

            Error::Io(_) | Error::Json(_) | Error::Api { .. } => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Error::Api {
                status: Some(401),
                ..
            } | Error::Auth { .. }
        )
    }

    pub fn is_overloaded(&self) -> bool {
        match self {
            Error::Api {
                status: Some(529 | 503),
                ..
            } => true,
            Error::Api {
                error_type: Some(t),
                ..
            } if t.contains("overloaded") => true,
            Error::Api { message, .. } if message.to_lowercase().contains("overloaded") => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => *status,
            Error::RetriesExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Error::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Caller-facing classification of a failed call.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::BudgetExceeded(_) => FailureKind::BudgetExceeded,
            Error::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            Error::CostComputation { .. } => FailureKind::CostComputationFailed,
            _ => match self.category() {
                ErrorCategory::Transient => FailureKind::TransportTransient,
                ErrorCategory::Authorization | ErrorCategory::Configuration => {
                    FailureKind::TransportPermanent
                }
                ErrorCategory::Internal | ErrorCategory::ResourceLimit => FailureKind::Internal,
            },
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::InvalidValue { key, message } => {
                Error::Config(format!("Invalid value for {}: {}", key, message))
            }
            config::ConfigError::Env(e) => Error::Env(e),
            config::ConfigError::Provider { message } => Error::Config(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> Error {
        Error::Api {
            message: "boom".to_string(),
            status: Some(status),
            error_type: None,
        }
    }

    #[test]
    fn test_error_display() {
        let err = Error::Api {
            message: "Invalid API key".to_string(),
            status: Some(401),
            error_type: None,
        };
        assert!(err.to_string().contains("Invalid API key"));
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::RateLimit { retry_after: None }.is_retryable());
        assert!(api(500).is_retryable());
        assert!(api(529).is_retryable());
        assert!(api(408).is_retryable());
        assert!(Error::Timeout(std::time::Duration::from_secs(1)).is_retryable());

        assert!(!Error::auth("Invalid token").is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(404).is_retryable());
    }

    #[test]
    fn test_overloaded_by_error_type() {
        let err = Error::Api {
            message: "busy".to_string(),
            status: None,
            error_type: Some("overloaded_error".to_string()),
        };
        assert!(err.is_overloaded());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(api(503).failure_kind(), FailureKind::TransportTransient);
        assert_eq!(api(401).failure_kind(), FailureKind::TransportPermanent);
        assert_eq!(api(422).failure_kind(), FailureKind::TransportPermanent);
        assert_eq!(
            Error::RetriesExhausted {
                attempts: 3,
                last: Box::new(api(500)),
            }
            .failure_kind(),
            FailureKind::RetriesExhausted
        );
        assert_eq!(
            Error::CostComputation {
                model: "m".into(),
                reason: "unpriced".into(),
            }
            .failure_kind(),
            FailureKind::CostComputationFailed
        );
        assert_eq!(
            Error::Io(std::io::Error::other("disk")).failure_kind(),
            FailureKind::Internal
        );
    }

    #[test]
    fn test_retries_exhausted_status_code() {
        let err = Error::RetriesExhausted {
            attempts: 2,
            last: Box::new(api(502)),
        };
        assert_eq!(err.status_code(), Some(502));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_error_conversion() {
        let config_err = config::ConfigError::InvalidValue {
            key: "global_call_limit".to_string(),
            message: "not a number".to_string(),
        };
        let err: Error = config_err.into();
        assert!(matches!(err, Error::Config(_)));
    }
}
