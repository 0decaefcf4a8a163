//! Session module for conversational turns
//!
//! The coordinator is the command surface handed to UI consumers; the turn
//! driver applies retry and timeout policy; the preference store persists the
//! wake word toggle.

mod coordinator;
mod driver;
mod preference;
mod responder;

pub use coordinator::VoiceSessionCoordinator;
pub use preference::{JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore, WakeWordPreference};
pub use responder::Responder;
