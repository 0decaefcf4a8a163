//! Events module for voice state transitions
//!
//! Provides the structured events republished by the state machine and the
//! ordered bus that fans them out to any number of subscribers.

mod bus;

pub use bus::{EventBus, Subscription, Unsubscribe};

use serde::{Deserialize, Serialize};

use crate::error::VoiceError;
use crate::state::VoiceState;

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Initial reconciliation with the persisted preference
    Startup,
    /// Explicit command from a UI consumer
    UserRequest,
    /// Wake-word engine fired
    WakeWord,
    /// Final transcript arrived
    Transcript,
    /// Listening ended without speech
    NoSpeech,
    /// Listening hit its time limit
    Timeout,
    /// Reply is being played back
    Response,
    /// Text-to-speech finished draining
    PlaybackComplete,
    /// Playback was cut short
    Interrupted,
    /// Wake word preference toggled
    Preference,
    /// Runtime permission grant changed
    Permission,
    /// A native engine or collaborator reported a failure
    Failure,
    /// Error cleared by the user
    Reset,
}

/// Events delivered to subscribers, strictly in commit order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// A transition was committed
    StateChanged {
        state: VoiceState,
        previous: VoiceState,
        cause: TransitionCause,
    },

    /// A final transcript was stored
    Recognized {
        /// Exact text reported by the speech engine
        text: String,
    },

    /// A failure or a non-fatal notice
    Error {
        error: VoiceError,
        /// State at the time the error was reported
        state: VoiceState,
    },
}

impl VoiceEvent {
    /// Committed state carried by a `StateChanged` event
    pub fn state(&self) -> Option<VoiceState> {
        match self {
            VoiceEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        }
    }
}

impl std::fmt::Display for VoiceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceEvent::StateChanged {
                state, previous, ..
            } => write!(f, "STATE_CHANGED ({} -> {})", previous, state),
            VoiceEvent::Recognized { text } => write!(f, "RECOGNIZED ({} chars)", text.len()),
            VoiceEvent::Error { error, .. } => write!(f, "ERROR ({})", error.code()),
        }
    }
}
