//! Per-call invocation settings.
//!
//! Settings are read from a [`ConfigProvider`] at the start of every call, so
//! a runtime override or an environment change applies to the next call
//! without restarting anything.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;

use super::ConfigResult;
use super::provider::{ConfigProvider, ConfigProviderExt};
use crate::budget::{BudgetLimits, CostTrackingMode};
use crate::client::StreamGuardConfig;

pub mod keys {
    pub const GLOBAL_CALL_LIMIT: &str = "global_call_limit";
    pub const GLOBAL_COST_LIMIT: &str = "global_cost_limit";
    pub const COST_TRACKING: &str = "cost_tracking";
    pub const USE_STREAMING: &str = "use_streaming";
    pub const STREAM_INCLUDE_USAGE: &str = "stream_include_usage";
    pub const STREAM_GUARD_ENABLED: &str = "stream_guard_enabled";
    pub const STREAM_GUARD_WINDOW: &str = "stream_guard_window";
    pub const STREAM_GUARD_TAG_THRESHOLD: &str = "stream_guard_tag_threshold";
    pub const MODEL_RETRY_STOP_AFTER_ATTEMPT: &str = "model_retry_stop_after_attempt";
    pub const MODEL_ATTEMPT_TIMEOUT_SECS: &str = "model_attempt_timeout_secs";
    pub const CONTEXT_WINDOW_FILE: &str = "context_window_file";
    /// Read once when a client is built from configuration.
    pub const PROVIDER: &str = "provider";
}

pub const DEFAULT_STREAM_GUARD_WINDOW: usize = 8192;
pub const DEFAULT_STREAM_GUARD_TAG_THRESHOLD: usize = 50;
pub const DEFAULT_STOP_AFTER_ATTEMPT: u32 = 10;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationSettings {
    /// 0 = unlimited
    pub global_call_limit: u64,
    /// 0 = unlimited
    pub global_cost_limit: Decimal,
    pub cost_tracking: CostTrackingMode,
    pub use_streaming: bool,
    pub stream_include_usage: bool,
    pub stream_guard_enabled: bool,
    pub stream_guard_window: usize,
    pub stream_guard_tag_threshold: usize,
    pub model_retry_stop_after_attempt: u32,
    /// Bound on one attempt and on the silence between two stream chunks.
    /// Values below 1 behave as 1.
    pub model_attempt_timeout_secs: u64,
    /// Overrides the platform default table location.
    pub context_window_file: Option<PathBuf>,
}

impl Default for InvocationSettings {
    fn default() -> Self {
        Self {
            global_call_limit: 0,
            global_cost_limit: Decimal::ZERO,
            cost_tracking: CostTrackingMode::Enforce,
            use_streaming: true,
            stream_include_usage: true,
            stream_guard_enabled: false,
            stream_guard_window: DEFAULT_STREAM_GUARD_WINDOW,
            stream_guard_tag_threshold: DEFAULT_STREAM_GUARD_TAG_THRESHOLD,
            model_retry_stop_after_attempt: DEFAULT_STOP_AFTER_ATTEMPT,
            model_attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            context_window_file: None,
        }
    }
}

impl InvocationSettings {
    /// Read every setting, falling back to defaults for absent keys.
    /// A present but unparsable value is an error.
    pub async fn load(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let d = Self::default();
        Ok(Self {
            global_call_limit: provider
                .get_parsed(keys::GLOBAL_CALL_LIMIT)
                .await?
                .unwrap_or(d.global_call_limit),
            global_cost_limit: provider
                .get_parsed(keys::GLOBAL_COST_LIMIT)
                .await?
                .unwrap_or(d.global_cost_limit),
            cost_tracking: provider
                .get_parsed(keys::COST_TRACKING)
                .await?
                .unwrap_or(d.cost_tracking),
            use_streaming: provider
                .get_flag(keys::USE_STREAMING)
                .await?
                .unwrap_or(d.use_streaming),
            stream_include_usage: provider
                .get_flag(keys::STREAM_INCLUDE_USAGE)
                .await?
                .unwrap_or(d.stream_include_usage),
            stream_guard_enabled: provider
                .get_flag(keys::STREAM_GUARD_ENABLED)
                .await?
                .unwrap_or(d.stream_guard_enabled),
            stream_guard_window: provider
                .get_parsed(keys::STREAM_GUARD_WINDOW)
                .await?
                .unwrap_or(d.stream_guard_window),
            stream_guard_tag_threshold: provider
                .get_parsed(keys::STREAM_GUARD_TAG_THRESHOLD)
                .await?
                .unwrap_or(d.stream_guard_tag_threshold),
            model_retry_stop_after_attempt: provider
                .get_parsed(keys::MODEL_RETRY_STOP_AFTER_ATTEMPT)
                .await?
                .unwrap_or(d.model_retry_stop_after_attempt),
            model_attempt_timeout_secs: provider
                .get_parsed(keys::MODEL_ATTEMPT_TIMEOUT_SECS)
                .await?
                .unwrap_or(d.model_attempt_timeout_secs),
            context_window_file: provider
                .get_raw(keys::CONTEXT_WINDOW_FILE)
                .await?
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits::unlimited()
            .calls(self.global_call_limit)
            .cost(self.global_cost_limit)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.model_attempt_timeout_secs.max(1))
    }

    pub fn guard_config(&self) -> StreamGuardConfig {
        StreamGuardConfig {
            enabled: self.stream_guard_enabled,
            window_size: self.stream_guard_window,
            tag_repetition_threshold: self.stream_guard_tag_threshold,
        }
    }
}
