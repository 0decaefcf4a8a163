//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::error::VoiceError;
use crate::events::VoiceEvent;
use crate::state::{MachineStatus, VoiceState};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from UI to the shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current status
    GetStatus,

    /// Start a manual turn
    StartTurn,

    /// Stop listening early
    StopTurn,

    /// Interrupt the spoken reply
    Interrupt,

    /// Toggle the wake word preference
    SetWakeWordEnabled { enabled: bool },

    /// Clear the error state
    Reset,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to voice event notifications
    Subscribe,
}

/// Responses from the shell to UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current status
    Status(ShellStatus),

    /// Command accepted
    Ok,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl From<Result<(), VoiceError>> for Response {
    fn from(result: Result<(), VoiceError>) -> Self {
        match result {
            Ok(()) => Response::Ok,
            Err(err) => Response::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Push notification to subscribed clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A voice event occurred
    Event { event: VoiceEvent },
}

/// Full status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellStatus {
    /// Crate version
    pub version: String,

    /// Current voice state
    pub state: VoiceState,

    /// Persisted wake word preference as seen by the machine
    pub wake_word_enabled: bool,

    /// Cause retained while in ERROR
    pub last_error: Option<VoiceError>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl ShellStatus {
    pub fn new(status: MachineStatus, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: status.state,
            wake_word_enabled: status.wake_word_enabled,
            last_error: status.last_error,
            uptime_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetWakeWordEnabled { enabled: true };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("set_wake_word_enabled"));
        assert!(json.contains("true"));

        let parsed: Request = serde_json::from_str(r#"{"type":"start_turn"}"#).unwrap();
        assert_eq!(parsed, Request::StartTurn);
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(ShellStatus::new(MachineStatus::default(), 3));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("status"));
        assert!(json.contains("IDLE"));
    }

    #[test]
    fn test_error_response_from_result() {
        let resp = Response::from(Err::<(), _>(VoiceError::PermissionDenied));
        assert_eq!(
            resp,
            Response::Error {
                code: "permission_denied".into(),
                message: "microphone permission not granted".into(),
            }
        );
        assert_eq!(Response::from(Ok::<(), VoiceError>(())), Response::Ok);
    }
}
