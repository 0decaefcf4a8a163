//! State machine module for voice interaction
//!
//! Provides an explicit state machine with seven states:
//! - Idle: nothing armed, nothing capturing
//! - WakeWordArmed: background engine waiting for the wake phrase
//! - WakeWordDetected: transient, hands the microphone to speech capture
//! - Listening: speech capture running
//! - Processing: transcript stored, waiting for a reply
//! - Speaking: reply playing back
//! - Error: a session failed; only an explicit reset clears it

mod actor;
mod machine;

pub use machine::{
    MachineOptions, MachineStatus, Trigger, TurnSignal, VoiceState, VoiceStateMachine,
};
