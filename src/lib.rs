//! voice-shell: voice interaction core for the mobile assistant shell
//!
//! This crate arbitrates the microphone and the speaker between:
//! - A background wake-word engine
//! - Foreground speech capture (speech-to-text)
//! - Reply playback (text-to-speech)
//!
//! Native engines stay behind the bridge traits in [`bridge`]; the shell
//! injects platform implementations and consumes [`VoiceSessionCoordinator`]
//! plus its event stream. On unix hosts the [`ipc`] server exposes the same
//! surface to an out-of-process UI.
//!
//! Out of scope:
//! - Wake-phrase training, multiple wake phrases
//! - Vendor SDK bindings, UI rendering
//! - Speaker identification, offline model management

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
#[cfg(unix)]
pub mod ipc;
pub mod session;
pub mod state;

pub use bridge::{
    Bridges, CaptureConfig, Grant, PermissionGate, PermissionSnapshot, SpeechBridge,
    WakeWordBridge,
};
pub use config::{Config, SessionConfig};
pub use error::{BridgeError, VoiceError, VoiceResult};
pub use events::{EventBus, Subscription, TransitionCause, Unsubscribe, VoiceEvent};
pub use session::{
    JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore, Responder,
    VoiceSessionCoordinator, WakeWordPreference,
};
pub use state::{MachineStatus, Trigger, VoiceState, VoiceStateMachine};
