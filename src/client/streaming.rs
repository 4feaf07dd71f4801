//! Assembles a transport reply into text and usage, under the stream guard.

use std::time::Duration;

use futures::StreamExt;

use super::guard::{GuardDecision, StreamGuard};
use super::transport::{Chunk, TransportReply};
use crate::Error;
use crate::types::Usage;

/// Everything read from one reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregated {
    pub text: String,
    /// Merged usage reports, if the provider sent any.
    pub usage: Option<Usage>,
    /// Byte offset the text was cut at by the guard.
    pub truncated_at: Option<usize>,
    /// Text fragments consumed.
    pub chunks: usize,
    /// Characters across every consumed fragment, including any cut by the guard.
    pub consumed_chars: usize,
}

/// A stream that failed part-way. Carries whatever was received before the error.
#[derive(Debug)]
pub struct StreamFailure {
    pub error: Error,
    pub usage: Option<Usage>,
    pub text: String,
}

#[derive(Debug)]
pub struct StreamingAggregator {
    guard: StreamGuard,
    idle_timeout: Option<Duration>,
}

impl StreamingAggregator {
    pub fn new(guard: StreamGuard) -> Self {
        Self {
            guard,
            idle_timeout: None,
        }
    }

    /// Fail the stream with [`Error::Timeout`] when no item arrives within `limit`.
    pub fn with_idle_timeout(mut self, limit: Duration) -> Self {
        self.idle_timeout = Some(limit);
        self
    }

    pub async fn run(mut self, reply: TransportReply) -> Result<Aggregated, StreamFailure> {
        match reply {
            TransportReply::Complete(reply) => {
                let mut text = reply.text;
                let consumed_chars = text.chars().count();
                let truncated_at = match self.guard.observe(&text) {
                    GuardDecision::Truncate { offset } => {
                        text.truncate(offset);
                        Some(offset)
                    }
                    GuardDecision::Continue => None,
                };
                Ok(Aggregated {
                    text,
                    usage: reply.usage,
                    truncated_at,
                    chunks: 1,
                    consumed_chars,
                })
            }
            TransportReply::Stream(mut stream) => {
                let mut out = Aggregated::default();

                loop {
                    let next = match self.idle_timeout {
                        Some(limit) => tokio::time::timeout(limit, stream.next())
                            .await
                            .unwrap_or_else(|_| Some(Err(Error::Timeout(limit)))),
                        None => stream.next().await,
                    };
                    let Some(item) = next else { break };

                    match item {
                        Ok(Chunk::Text(fragment)) => {
                            out.text.push_str(&fragment);
                            out.chunks += 1;
                            out.consumed_chars += fragment.chars().count();
                            if let GuardDecision::Truncate { offset } = self.guard.observe(&fragment)
                            {
                                out.text.truncate(offset);
                                out.truncated_at = Some(offset);
                                break;
                            }
                        }
                        Ok(Chunk::Usage(usage)) => {
                            out.usage.get_or_insert_with(Usage::default).merge(&usage);
                        }
                        Err(error) => {
                            tracing::debug!(
                                error = %error,
                                chunks = out.chunks,
                                "stream failed part-way"
                            );
                            return Err(StreamFailure {
                                error,
                                usage: out.usage,
                                text: out.text,
                            });
                        }
                    }
                }
                // Dropping the stream here also releases the connection after a truncation.
                drop(stream);

                tracing::debug!(
                    chunks = out.chunks,
                    bytes = out.text.len(),
                    truncated = out.truncated_at.is_some(),
                    "stream finished"
                );
                Ok(out)
            }
        }
    }
}
