//! Model client: budgeted, retried, stream-guarded provider calls.

mod guard;
pub mod resilience;
mod streaming;
pub mod transport;

pub use guard::{GuardDecision, StreamGuard, StreamGuardConfig};
pub use resilience::{ExponentialBackoff, Retried, RetryAttempt, RetryConfig, RetryManager};
pub use streaming::{Aggregated, StreamFailure, StreamingAggregator};
pub use transport::{
    AnthropicTransport, Chunk, ChunkStream, OpenAiTransport, ProviderKind, ProviderReply,
    Transport, TransportReply, create_transport,
};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use crate::budget::{BudgetPermit, BudgetState, CostTracker, PricingTable, global_pricing_table, global_tracker};
use crate::config::{ConfigProvider, EnvConfigProvider, InvocationSettings};
use crate::models::{ContextUsage, ContextWindowResolver, ContextWindowTable, ModelId, Resolution};
use crate::observability::ApiCallSpan;
use crate::types::{
    CallOutcome, FailureKind, FinishKind, ModelReply, ModelRequest, Usage, UsageRecord,
};
use crate::{Error, Result};

/// Where a call is in its lifecycle. Transitions are logged at `debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    BudgetChecked,
    Attempting(u32),
    Streaming,
    Completed,
    GuardTruncated,
    Failed(FailureKind),
}

/// Entry point for model calls.
///
/// Cheap to clone; clones share the transport, tracker and configuration.
/// Settings are re-read from the configuration provider for every call.
#[derive(Clone)]
pub struct ModelClient {
    transport: Arc<dyn Transport>,
    tracker: Arc<CostTracker>,
    config: Arc<dyn ConfigProvider>,
    pricing: Arc<PricingTable>,
    backoff: ExponentialBackoff,
    attempt_timeout: Option<Duration>,
    context_window_file: Option<PathBuf>,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("transport", &self.transport)
            .field("config", &self.config.name())
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl ModelClient {
    pub fn builder() -> ModelClientBuilder {
        ModelClientBuilder::default()
    }

    /// Build a client whose transport is chosen by the `provider` key.
    pub async fn from_config(config: Arc<dyn ConfigProvider>) -> Result<Self> {
        let kind = ProviderKind::load(config.as_ref()).await?;
        Self::builder()
            .transport(create_transport(kind)?)
            .config(config)
            .build()
    }

    pub fn tracker(&self) -> &Arc<CostTracker> {
        &self.tracker
    }

    /// Calls and cost recorded so far by this client's tracker.
    pub fn stats(&self) -> BudgetState {
        self.tracker.snapshot()
    }

    /// Resolve a model's context window against the table currently in effect.
    pub async fn resolve_context_window(&self, model: &ModelId) -> Result<Resolution> {
        let settings = InvocationSettings::load(self.config.as_ref()).await?;
        self.resolver(&settings)?.resolve(model).await
    }

    /// Like [`query`](Self::query), with the result folded into a [`CallOutcome`].
    pub async fn invoke(&self, request: &ModelRequest) -> CallOutcome {
        self.query(request).await.into()
    }

    pub async fn query(&self, request: &ModelRequest) -> Result<ModelReply> {
        let span = ApiCallSpan::new(request.model.as_str(), self.transport.name());
        let result = self.run(request, &span).instrument(span.span().clone()).await;

        match &result {
            Ok(reply) => {
                let phase = if reply.is_truncated() {
                    CallPhase::GuardTruncated
                } else {
                    CallPhase::Completed
                };
                enter(&request.model, phase);
                span.finish_ok(reply.is_truncated());
            }
            Err(error) => {
                let kind = error.failure_kind();
                enter(&request.model, CallPhase::Failed(kind));
                tracing::debug!(model = %request.model, error = %error, "model call failed");
                span.finish_err(kind);
            }
        }
        result
    }

    async fn run(&self, request: &ModelRequest, span: &ApiCallSpan) -> Result<ModelReply> {
        enter(&request.model, CallPhase::Idle);
        let settings = InvocationSettings::load(self.config.as_ref()).await?;
        let request = request.effective(&settings);

        let permit = self.tracker.precheck(&settings.budget_limits())?;
        enter(&request.model, CallPhase::BudgetChecked);
        let context_window = self.context_window(&request.model, &settings).await;

        let attempt_timeout = self
            .attempt_timeout
            .unwrap_or_else(|| settings.attempt_timeout());
        let retry = RetryManager::new(RetryConfig {
            stop_after_attempt: settings.model_retry_stop_after_attempt,
            backoff: self.backoff.clone(),
            attempt_timeout: Some(attempt_timeout),
        });
        let retried = retry
            .execute(|attempt| {
                enter(&request.model, CallPhase::Attempting(attempt));
                self.transport.send(&request)
            })
            .await?;
        span.record_attempts(retried.attempts);

        enter(&request.model, CallPhase::Streaming);
        let aggregator = StreamingAggregator::new(StreamGuard::new(settings.guard_config()))
            .with_idle_timeout(attempt_timeout);
        let aggregated = match aggregator.run(retried.value).await {
            Ok(aggregated) => aggregated,
            Err(failure) => {
                self.charge_partial(permit, &request, failure.usage, &settings);
                return Err(failure.error);
            }
        };

        let (usage, estimated) = match aggregated.usage {
            Some(mut usage) if usage.total() > 0 || usage.cost.is_some() => {
                // Text cut by the guard was still generated and streamed.
                if aggregated.truncated_at.is_some() {
                    usage.cover_completion_chars(aggregated.consumed_chars);
                }
                (usage, false)
            }
            _ => {
                if request.wants_stream_usage() && self.transport.supports_stream_usage() {
                    tracing::debug!(model = %request.model, "no usage reported, estimating");
                }
                (Usage::estimate(&request, &aggregated.text), true)
            }
        };
        let mut record = UsageRecord::new(request.model.clone(), usage, &self.pricing);
        if estimated {
            record = record.estimated();
        }

        let charged_cost = permit.record(&record, settings.cost_tracking)?;
        span.record_usage(&record, charged_cost);

        let context_left_percent = context_window
            .and_then(|limit| ContextUsage::new(limit, record.prompt_tokens).left_percent());
        let finish = match aggregated.truncated_at {
            Some(offset) => FinishKind::GuardTruncated { offset },
            None => FinishKind::Completed,
        };

        Ok(ModelReply {
            text: aggregated.text,
            usage: record,
            finish,
            charged_cost,
            attempts: retried.attempts,
            context_window,
            context_left_percent,
        })
    }

    /// A failed stream is charged only for usage the provider already reported.
    fn charge_partial(
        &self,
        permit: BudgetPermit<'_>,
        request: &ModelRequest,
        usage: Option<Usage>,
        settings: &InvocationSettings,
    ) {
        let Some(usage) = usage.filter(|u| u.total() > 0 || u.cost.is_some()) else {
            return;
        };
        let record = UsageRecord::new(request.model.clone(), usage, &self.pricing);
        if let Err(e) = permit.record(&record, settings.cost_tracking) {
            tracing::warn!(model = %request.model, error = %e, "could not charge partial usage");
        }
    }

    fn resolver(&self, settings: &InvocationSettings) -> Result<ContextWindowResolver> {
        match settings
            .context_window_file
            .as_ref()
            .or(self.context_window_file.as_ref())
        {
            Some(path) => Ok(ContextWindowResolver::new(ContextWindowTable::new(path))),
            None => ContextWindowResolver::from_default_path(),
        }
    }

    /// Context window for the model, or `None` with a warning. Never fails the call.
    async fn context_window(&self, model: &ModelId, settings: &InvocationSettings) -> Option<u64> {
        let resolved = match self.resolver(settings) {
            Ok(resolver) => resolver.resolve_and_remember(model).await,
            Err(e) => Err(e),
        };
        match resolved {
            Ok(resolution) => Some(resolution.limit),
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "context window unavailable");
                None
            }
        }
    }
}

fn enter(model: &ModelId, phase: CallPhase) {
    tracing::debug!(model = %model, phase = ?phase, "call phase");
}

#[derive(Default)]
pub struct ModelClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    tracker: Option<Arc<CostTracker>>,
    config: Option<Arc<dyn ConfigProvider>>,
    pricing: Option<Arc<PricingTable>>,
    backoff: Option<ExponentialBackoff>,
    attempt_timeout: Option<Duration>,
    context_window_file: Option<PathBuf>,
}

impl ModelClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to the process-wide tracker.
    pub fn tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Defaults to `LLM_INVOKE_*` environment variables.
    pub fn config(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Some(Arc::new(pricing));
        self
    }

    pub fn backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Bound on each attempt and on each gap between stream chunks.
    /// Overrides the `model_attempt_timeout_secs` setting.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Table location used when `context_window_file` is not configured.
    pub fn context_window_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.context_window_file = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ModelClient> {
        let transport = self
            .transport
            .ok_or_else(|| Error::Config("ModelClient requires a transport".into()))?;

        Ok(ModelClient {
            transport,
            tracker: self.tracker.unwrap_or_else(global_tracker),
            config: self
                .config
                .unwrap_or_else(|| Arc::new(EnvConfigProvider::default())),
            pricing: self
                .pricing
                .unwrap_or_else(|| Arc::new(global_pricing_table().clone())),
            backoff: self.backoff.unwrap_or_default(),
            attempt_timeout: self.attempt_timeout,
            context_window_file: self.context_window_file,
        })
    }
}
