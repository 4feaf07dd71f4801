//! Provider transport trait definition.

use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::Result;
use crate::types::{ModelRequest, Usage};

/// One decoded piece of a streamed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Text(String),
    /// Usage report. Providers may send several partial reports per call.
    Usage(Usage),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

/// A non-streamed reply body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderReply {
    pub text: String,
    pub usage: Option<Usage>,
}

pub enum TransportReply {
    Complete(ProviderReply),
    Stream(ChunkStream),
}

impl Debug for TransportReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(reply) => f.debug_tuple("Complete").field(reply).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Sends one request to a provider.
///
/// `send` resolves once the provider has accepted the request: for streamed
/// requests that is when response headers arrive, and the body is consumed
/// through the returned [`ChunkStream`]. Errors from `send` are eligible for
/// retry; errors inside the stream are not.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Whether streamed replies can carry a usage report.
    fn supports_stream_usage(&self) -> bool {
        false
    }

    async fn send(&self, request: &ModelRequest) -> Result<TransportReply>;
}
