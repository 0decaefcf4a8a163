//! Error taxonomy shared by the state machine, the coordinator and the bridges

use serde::{Deserialize, Serialize};

use crate::state::VoiceState;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors surfaced to callers and published on the event stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum VoiceError {
    /// Microphone (or equivalent) not granted. Recoverable by re-requesting.
    #[error("microphone permission not granted")]
    PermissionDenied,

    /// Wake-word or speech engine is not present on this device
    #[error("voice engine unavailable on this device")]
    EngineUnavailable,

    /// Operation is illegal for the current state; no state change happened
    #[error("cannot {request} while {state}")]
    InvalidTransition { state: VoiceState, request: String },

    /// A listen was requested while a session is already running
    #[error("voice session already active ({state})")]
    AlreadyActive { state: VoiceState },

    /// Listening ended without any transcript
    #[error("no speech detected")]
    NoSpeechDetected,

    /// Opaque failure reported by a native engine
    #[error("native engine failure: {0}")]
    NativeFailure(String),

    /// Persisting the wake word preference failed
    #[error("preference storage failed: {0}")]
    Storage(String),

    /// The state machine task is no longer running
    #[error("voice state machine is shut down")]
    Closed,
}

impl VoiceError {
    /// Short machine-readable code, used for IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            VoiceError::PermissionDenied => "permission_denied",
            VoiceError::EngineUnavailable => "engine_unavailable",
            VoiceError::InvalidTransition { .. } => "invalid_transition",
            VoiceError::AlreadyActive { .. } => "already_active",
            VoiceError::NoSpeechDetected => "no_speech_detected",
            VoiceError::NativeFailure(_) => "native_failure",
            VoiceError::Storage(_) => "storage",
            VoiceError::Closed => "closed",
        }
    }

    pub(crate) fn invalid(state: VoiceState, request: &str) -> Self {
        VoiceError::InvalidTransition {
            state,
            request: request.to_string(),
        }
    }
}

/// Errors reported by a native bridge call or callback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("permission missing")]
    PermissionMissing,

    #[error("engine unavailable")]
    EngineUnavailable,

    #[error("{0}")]
    Unknown(String),
}

impl From<BridgeError> for VoiceError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::PermissionMissing => VoiceError::PermissionDenied,
            BridgeError::EngineUnavailable => VoiceError::EngineUnavailable,
            BridgeError::Unknown(cause) => VoiceError::NativeFailure(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_mapping() {
        assert_eq!(
            VoiceError::from(BridgeError::PermissionMissing),
            VoiceError::PermissionDenied
        );
        assert_eq!(
            VoiceError::from(BridgeError::EngineUnavailable),
            VoiceError::EngineUnavailable
        );
        assert_eq!(
            VoiceError::from(BridgeError::Unknown("mic busy".into())),
            VoiceError::NativeFailure("mic busy".into())
        );
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = VoiceError::invalid(VoiceState::Idle, "interrupt speech");
        assert_eq!(err.to_string(), "cannot interrupt speech while IDLE");
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn test_error_serialization() {
        let json = serde_json::to_string(&VoiceError::NativeFailure("boom".into())).unwrap();
        assert!(json.contains("native_failure"));
        assert!(json.contains("boom"));

        let err: VoiceError = serde_json::from_str(r#"{"code":"no_speech_detected"}"#).unwrap();
        assert_eq!(err, VoiceError::NoSpeechDetected);
    }
}
