//! Message and request types passed to provider transports.

use serde::{Deserialize, Serialize};

use crate::config::InvocationSettings;
use crate::models::ModelId;

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a conversation. Content is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Per-call options. `None` defers to [`InvocationSettings`] at call time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// A prompt addressed to one model.
///
/// Built once through the consuming `with_*` methods and then only shared by
/// reference; the client derives an effective copy per call and never mutates
/// the caller's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model: ModelId,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub options: RequestOptions,
}

impl ModelRequest {
    pub fn new(model: impl Into<ModelId>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            options: RequestOptions::default(),
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.options.stream = Some(stream);
        self
    }

    pub fn with_include_usage(mut self, include_usage: bool) -> Self {
        self.options.include_usage = Some(include_usage);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    /// Fill unset options from the settings in effect for this call.
    pub fn effective(&self, settings: &InvocationSettings) -> Self {
        let mut request = self.clone();
        request.options.stream.get_or_insert(settings.use_streaming);
        request
            .options
            .include_usage
            .get_or_insert(settings.stream_include_usage);
        request
    }

    pub fn is_streaming(&self) -> bool {
        self.options.stream.unwrap_or(false)
    }

    pub fn wants_stream_usage(&self) -> bool {
        self.is_streaming() && self.options.include_usage.unwrap_or(false)
    }

    pub fn max_tokens(&self) -> u32 {
        self.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    /// System messages joined in order, for providers with a separate system field.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    pub(crate) fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}
