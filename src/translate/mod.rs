//! Dialect translation between the chat-completion, structured-response,
//! message and converse wire formats.
//!
//! The core of the gateway. Every converter is a pure function over the wire
//! types below (no I/O); the streaming state machines are plain structs fed
//! one event at a time.

pub mod anthropic;
pub mod anthropic_types;
pub mod bridge;
pub mod chat;
pub mod chat_types;
pub mod claude_stream;
pub mod converse;
pub mod converse_types;
pub mod responses;
pub mod responses_stream;
pub mod responses_types;
pub mod streaming;
pub mod unified;

use serde::{Deserialize, Serialize};

/// A wire dialect, on either the caller side or the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Legacy chat completions.
    Chat,
    /// Structured responses.
    Responses,
    /// Third-party messages.
    Messages,
    /// Converse API of hosted model families.
    Converse,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Chat => "chat",
            Dialect::Responses => "responses",
            Dialect::Messages => "messages",
            Dialect::Converse => "converse",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current unix time in seconds, for `created` fields.
pub(crate) fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// A fresh id with the given on-wire prefix.
pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}
