//! Bridge contracts over the native capability providers
//!
//! The core never talks to a vendor SDK directly. Each native service is
//! driven through one of these narrow traits, injected at construction.
//! Native callbacks may fire on any thread; implementations only have to
//! invoke the registered closures, the state machine marshals them onto its
//! own task.

pub mod mock;
mod permission;
mod speech;
mod wake_word;

use std::sync::Arc;

pub use permission::{Grant, PermissionCallback, PermissionGate, PermissionSnapshot};
pub use speech::{CaptureConfig, SpeechBridge, TextCallback};
pub use wake_word::WakeWordBridge;

use crate::error::BridgeError;

/// Callback carrying no payload (detection, playback complete)
pub type SignalCallback = Box<dyn Fn() + Send + Sync>;

/// Callback carrying a native error
pub type ErrorCallback = Box<dyn Fn(BridgeError) + Send + Sync>;

/// The set of collaborators the state machine is built from
#[derive(Clone)]
pub struct Bridges {
    pub wake_word: Arc<dyn WakeWordBridge>,
    pub speech: Arc<dyn SpeechBridge>,
    pub permissions: Arc<dyn PermissionGate>,
}
