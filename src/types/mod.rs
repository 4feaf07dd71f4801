//! Request, reply and usage types.

mod message;
mod response;

pub use message::{DEFAULT_MAX_TOKENS, Message, ModelRequest, RequestOptions, Role};
pub use response::{
    CallOutcome, FailureKind, FinishKind, ModelReply, Usage, UsageRecord,
};
