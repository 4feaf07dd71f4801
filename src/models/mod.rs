//! Model identifiers and context window resolution.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod normalize;
mod resolver;
pub mod table;
mod window;

pub use normalize::{fallback_keys, normalize_model_name};
pub use resolver::{ContextWindowResolver, Resolution};
pub use table::{BUILTIN_TABLE, ContextWindowMap, ContextWindowTable};
pub use window::{
    ContextUsage, DEFAULT_CRITICAL_THRESHOLD, DEFAULT_WARNING_THRESHOLD, WindowStatus,
};

/// Raw model identifier as the caller supplied it, provider prefix and all.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical lookup key for tables keyed by model.
    pub fn normalized(&self) -> String {
        normalize_model_name(&self.0)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ModelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
