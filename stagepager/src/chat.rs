//! Chat-platform boundary types.
//!
//! The bridge consumes inbound messages and emits reactions; the chat
//! client itself lives outside this crate. [`FeedbackSink`] is the seam
//! a real integration implements. The shipped binary wires a JSON-lines
//! adapter over stdin/stdout (see `main.rs`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one inbound chat message (the platform timestamp).
///
/// Correlates a submission through batching, display, and feedback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

impl Nonce {
    /// Create a nonce from the platform's message identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this nonce.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    /// Channel the message was posted in.
    pub channel: String,
    /// Message body.
    pub text: String,
    /// Platform timestamp identifying the message.
    pub ts: String,
}

/// Reactions the bridge attaches to chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// The code is waiting for the display.
    Queued,
    /// The code is on screen.
    Shown,
    /// The display cleared, or a cancel was honored.
    Done,
    /// A `repeat` arrived with nothing to repeat.
    Rejected,
    /// The code is on the ignore list.
    Ignored,
}

impl Reaction {
    /// Platform emoji name for this reaction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "hourglass",
            Self::Shown => "calling",
            Self::Done => "thumbsup",
            Self::Rejected => "thumbsdown",
            Self::Ignored => "x",
        }
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error delivering feedback to the chat platform.
#[derive(Debug, thiserror::Error)]
#[error("could not deliver reaction: {0}")]
pub struct FeedbackError(pub String);

/// The reaction-emitting side of a chat integration.
pub trait FeedbackSink: Send + Sync + 'static {
    /// Attach `reaction` to the message identified by `nonce` in `channel`.
    fn add_reaction(
        &self,
        channel: &str,
        nonce: &Nonce,
        reaction: Reaction,
    ) -> impl std::future::Future<Output = Result<(), FeedbackError>> + Send;
}
