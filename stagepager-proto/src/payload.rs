//! Outbound payload builders for the presentation control protocol.
//!
//! The endpoint speaks one of two dialects, selected once at startup.
//! Both share the same payload shapes; they differ in the handshake
//! protocol number and in whether the endpoint echoes display
//! confirmations back (see [`FeedbackMode`]).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol dialect spoken by the presentation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Older dialect: fixed message slot, echoed confirmations.
    V6,
    /// Newer dialect: discovered message slot, no confirmations.
    V7,
}

impl ProtocolVersion {
    /// Parse the operator-facing version number (6 or 7).
    #[must_use]
    pub const fn from_major(major: u64) -> Option<Self> {
        match major {
            6 => Some(Self::V6),
            7 => Some(Self::V7),
            _ => None,
        }
    }

    /// Operator-facing version number.
    #[must_use]
    pub const fn major(self) -> u8 {
        match self {
            Self::V6 => 6,
            Self::V7 => 7,
        }
    }

    /// Wire-level protocol number sent in the handshake.
    #[must_use]
    pub const fn protocol_number(self) -> u16 {
        match self {
            Self::V6 => 600,
            Self::V7 => 701,
        }
    }

    /// How display confirmations reach the bridge under this dialect.
    #[must_use]
    pub const fn feedback_mode(self) -> FeedbackMode {
        match self {
            Self::V6 => FeedbackMode::Events,
            Self::V7 => FeedbackMode::Timed,
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.major())
    }
}

/// Whether display confirmations are delivered or guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMode {
    /// The endpoint echoes `messageSend` / `messageHide` events.
    Events,
    /// No confirmations come back; the bridge runs a fixed timer.
    Timed,
}

/// Which message template and placeholder the bridge drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSlot {
    /// Index of the message in the endpoint's template list.
    pub index: u32,
    /// Placeholder key inside that message (`${key}`).
    pub token: String,
}

impl Default for MessageSlot {
    /// The fixed slot older endpoints expose when none is configured.
    fn default() -> Self {
        Self {
            index: 0,
            token: "Message".to_string(),
        }
    }
}

/// Build the `authenticate` handshake for `version`.
#[must_use]
pub fn authenticate(version: ProtocolVersion, password: &str) -> Value {
    json!({
        "action": "authenticate",
        "protocol": version.protocol_number(),
        "password": password,
    })
}

/// Build the `messageSend` payload driving `slot` with `text`.
#[must_use]
pub fn show_message(slot: &MessageSlot, text: &str) -> Value {
    json!({
        "action": "messageSend",
        "messageIndex": slot.index,
        "messageKeys": [slot.token],
        "messageValues": [text],
    })
}

/// Build the `messageHide` payload clearing the displayed message.
#[must_use]
pub fn hide_message() -> Value {
    json!({
        "action": "messageHide",
        "index": 0,
    })
}

/// Build the `messageRequest` payload asking for the template list.
#[must_use]
pub fn request_message_list() -> Value {
    json!({
        "action": "messageRequest",
    })
}
