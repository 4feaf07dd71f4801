//! Reply, usage and outcome types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ModelRequest;
use crate::Error;
use crate::budget::PricingTable;
use crate::models::ModelId;

/// Rough characters-per-token ratio used when a provider reports no usage.
const CHARS_PER_TOKEN: usize = 4;

/// Token usage as reported by a provider, possibly in several partial chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Cost reported directly by the provider, when it prices calls itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Decimal>,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: Decimal) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Fold a later partial report into this one. Non-zero fields win.
    pub fn merge(&mut self, other: &Usage) {
        if other.prompt_tokens > 0 {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens > 0 {
            self.completion_tokens = other.completion_tokens;
        }
        if other.cost.is_some() {
            self.cost = other.cost;
        }
    }

    pub(crate) fn estimate(request: &ModelRequest, reply_text: &str) -> Self {
        Self::new(
            estimate_tokens(request.prompt_chars()),
            estimate_tokens(reply_text.chars().count()),
        )
    }

    /// Raise the completion count to at least the estimate for `chars` characters.
    pub(crate) fn cover_completion_chars(&mut self, chars: usize) {
        self.completion_tokens = self.completion_tokens.max(estimate_tokens(chars));
    }
}

fn estimate_tokens(chars: usize) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN) as u64
}

/// Usage attributed to one completed call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model: ModelId,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// `None` when neither the provider nor the pricing table could price the call.
    pub cost: Option<Decimal>,
    /// True when token counts were estimated locally rather than reported.
    pub estimated: bool,
}

impl UsageRecord {
    pub fn new(model: ModelId, usage: Usage, pricing: &PricingTable) -> Self {
        let cost = usage.cost.or_else(|| pricing.calculate(model.as_str(), &usage));
        Self {
            model,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost,
            estimated: false,
        }
    }

    pub fn estimated(mut self) -> Self {
        self.estimated = true;
        self
    }
}

/// How a successful call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FinishKind {
    Completed,
    /// Output was cut at `offset` (bytes) after pathological repetition.
    GuardTruncated { offset: usize },
}

/// A completed (possibly guard-truncated) reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub text: String,
    pub usage: UsageRecord,
    pub finish: FinishKind,
    /// Cost actually charged to the budget for this call.
    pub charged_cost: Decimal,
    pub attempts: u32,
    pub context_window: Option<u64>,
    pub context_left_percent: Option<u8>,
}

impl ModelReply {
    pub fn is_truncated(&self) -> bool {
        matches!(self.finish, FinishKind::GuardTruncated { .. })
    }
}

/// Failure classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransportTransient,
    TransportPermanent,
    BudgetExceeded,
    RetriesExhausted,
    CostComputationFailed,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportTransient => "transport_transient",
            Self::TransportPermanent => "transport_permanent",
            Self::BudgetExceeded => "budget_exceeded",
            Self::RetriesExhausted => "retries_exhausted",
            Self::CostComputationFailed => "cost_computation_failed",
            Self::Internal => "internal",
        }
    }
}

/// Caller-facing result of one model call.
#[derive(Debug)]
pub enum CallOutcome {
    Completed(ModelReply),
    GuardTruncated(ModelReply),
    Failed { kind: FailureKind, error: Error },
}

impl CallOutcome {
    pub fn reply(&self) -> Option<&ModelReply> {
        match self {
            Self::Completed(reply) | Self::GuardTruncated(reply) => Some(reply),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn into_result(self) -> crate::Result<ModelReply> {
        match self {
            Self::Completed(reply) | Self::GuardTruncated(reply) => Ok(reply),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

impl From<crate::Result<ModelReply>> for CallOutcome {
    fn from(result: crate::Result<ModelReply>) -> Self {
        match result {
            Ok(reply) if reply.is_truncated() => Self::GuardTruncated(reply),
            Ok(reply) => Self::Completed(reply),
            Err(error) => Self::Failed {
                kind: error.failure_kind(),
                error,
            },
        }
    }
}
