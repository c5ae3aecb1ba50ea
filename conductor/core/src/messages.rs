//! Identifiers and Message Vocabulary
//!
//! Small value types shared by the session store, the multiplexer and the
//! client-side reassembler.
//!
//! # Design Philosophy
//!
//! Sessions are addressed by an opaque identifier handed out at creation, and
//! every message carries its own identifier so that an open assistant turn can
//! be updated by key rather than by position in the history.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Session identifier
///
/// Opaque to clients. Generated as a random UUID so identifiers cannot be
/// guessed from one another.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Message identifier
///
/// Unique across processes: a client mixes identifiers fetched from the
/// daemon with ones it generates for its own open turns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("msg_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The learner
    User,
    /// The roleplay partner
    Assistant,
}

impl MessageRole {
    /// Label used when rendering history into a prompt
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// Lifecycle of a message
///
/// User messages are born `Done`. Assistant messages start `Pending`, move to
/// `Streaming` on the first text frame and end in exactly one of `Done` or
/// `Error`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created, nothing received yet
    #[default]
    Pending,
    /// At least one section value has arrived
    Streaming,
    /// Completed normally
    Done,
    /// Completed with an error
    Error,
}

impl MessageStatus {
    /// Whether this status ends the message's lifecycle
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}
