//! Tracing helpers for model calls.

mod spans;

pub use spans::ApiCallSpan;
