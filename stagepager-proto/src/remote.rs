//! Decoding for inbound frames on the presentation control endpoint.
//!
//! The control protocol is JSON text frames dispatched on an `action`
//! field. Only a handful of actions matter to the bridge; anything else
//! decodes to [`RemoteEvent::Unknown`] so callers can log the action
//! name and keep pumping.

use serde::Deserialize;
use serde_json::Value;

/// Errors that can occur while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame carries no string `action` field.
    #[error("frame has no action field")]
    MissingAction,

    /// A known action arrived with an unusable payload.
    #[error("malformed {action} payload: {detail}")]
    Malformed {
        /// The action whose payload failed to decode.
        action: String,
        /// Human-readable decode failure.
        detail: String,
    },
}

/// One message template as reported by the endpoint's template list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageTemplate {
    /// Display title of the template.
    #[serde(rename = "messageTitle")]
    pub title: String,

    /// Text components; placeholders appear as `${Token}` runs.
    #[serde(rename = "messageComponents", default)]
    pub components: Vec<String>,
}

/// An inbound control event, dispatched on the `action` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// Outcome of the `authenticate` handshake.
    Authenticate {
        /// Whether the endpoint accepted the password.
        authenticated: bool,
        /// Rejection reason, when the endpoint provides one.
        error: Option<String>,
    },

    /// The endpoint hid the active message.
    MessageHide,

    /// The endpoint put a message on screen.
    MessageSend,

    /// Response to a template list request.
    MessageList(Vec<MessageTemplate>),

    /// A presentation slide was triggered by some other console.
    PresentationTrigger,

    /// Any `clear`-prefixed action. Carries the full action name.
    Clear(String),

    /// An action the bridge does not know. Carries the action name.
    Unknown(String),
}

/// Decode one inbound text frame.
///
/// Unknown actions are not an error; they decode to
/// [`RemoteEvent::Unknown`] so the pump can log and move on. Errors are
/// reserved for frames that are not JSON, carry no `action`, or attach
/// an unusable payload to a known action.
///
/// # Errors
///
/// Returns [`RemoteError::Json`] for non-JSON input,
/// [`RemoteError::MissingAction`] when the `action` field is absent or
/// not a string, and [`RemoteError::Malformed`] when a template list
/// response has an undecodable `messages` payload.
pub fn decode(frame: &str) -> Result<RemoteEvent, RemoteError> {
    let value: Value = serde_json::from_str(frame)?;
    let Some(action) = value.get("action").and_then(Value::as_str) else {
        return Err(RemoteError::MissingAction);
    };

    let event = match action {
        "authenticate" => RemoteEvent::Authenticate {
            authenticated: truthy(value.get("authenticated")),
            error: value
                .get("error")
                .and_then(Value::as_str)
                .filter(|reason| !reason.is_empty())
                .map(str::to_string),
        },
        "messageHide" => RemoteEvent::MessageHide,
        "messageSend" => RemoteEvent::MessageSend,
        "messageRequest" => {
            let messages = value.get("messages").cloned().unwrap_or(Value::Null);
            let templates: Vec<MessageTemplate> =
                serde_json::from_value(messages).map_err(|e| RemoteError::Malformed {
                    action: action.to_string(),
                    detail: e.to_string(),
                })?;
            RemoteEvent::MessageList(templates)
        }
        "presentationTriggerIndex" => RemoteEvent::PresentationTrigger,
        other if other.starts_with("clear") => RemoteEvent::Clear(other.to_string()),
        other => RemoteEvent::Unknown(other.to_string()),
    };

    Ok(event)
}

/// Some endpoint builds report booleans as JSON numbers (`1` / `0`).
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}
