//! Structured span for model calls.

use std::time::Instant;

use rust_decimal::Decimal;
use tracing::{Level, Span, field, span};

use crate::types::{FailureKind, UsageRecord};

/// Wraps one model call in an `llm.call` span and records its result on the way out.
pub struct ApiCallSpan {
    span: Span,
    start: Instant,
}

impl ApiCallSpan {
    pub fn new(model: &str, transport: &str) -> Self {
        let span = span!(
            Level::INFO,
            "llm.call",
            model = model,
            transport = transport,
            otel.name = "llm.call",
            attempts = field::Empty,
            prompt_tokens = field::Empty,
            completion_tokens = field::Empty,
            estimated = field::Empty,
            cost = field::Empty,
            truncated = field::Empty,
            outcome = field::Empty,
            latency_ms = field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn record_attempts(&self, attempts: u32) {
        self.span.record("attempts", attempts);
    }

    pub fn record_usage(&self, usage: &UsageRecord, charged: Decimal) {
        self.span.record("prompt_tokens", usage.prompt_tokens);
        self.span.record("completion_tokens", usage.completion_tokens);
        self.span.record("estimated", usage.estimated);
        self.span.record("cost", field::display(charged));
    }

    pub fn finish_ok(self, truncated: bool) {
        self.span.record("truncated", truncated);
        self.finish(if truncated { "guard_truncated" } else { "completed" });
    }

    pub fn finish_err(self, kind: FailureKind) {
        self.finish(kind.as_str());
    }

    fn finish(self, outcome: &str) {
        self.span.record("outcome", outcome);
        self.span
            .record("latency_ms", self.start.elapsed().as_millis() as u64);
    }
}
