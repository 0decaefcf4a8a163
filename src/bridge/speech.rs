//! Contract over the OS-level speech-to-text and text-to-speech engines

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ErrorCallback, SignalCallback};
use crate::error::BridgeError;

/// Callback carrying recognized text
pub type TextCallback = Box<dyn Fn(String) + Send + Sync>;

/// Parameters handed to the recognizer when capture starts
///
/// These govern when the engine finalizes capture; they do not affect which
/// transitions are legal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Shortest utterance the engine should accept
    pub min_utterance_ms: u64,
    /// Silence after speech that ends the utterance
    pub trailing_silence_ms: u64,
    /// BCP 47 language tag
    pub language: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_utterance_ms: 300,
            trailing_silence_ms: 1500,
            language: "en-US".to_string(),
        }
    }
}

/// Speech capture and playback service
///
/// `speak` resolves when playback has started; completion is reported
/// through [`SpeechBridge::on_playback_complete`]. A final result with empty
/// text means capture ended without recognizable speech.
#[async_trait]
pub trait SpeechBridge: Send + Sync {
    /// Whether recognition is supported on this device
    fn check_availability(&self) -> bool;

    async fn start_capture(&self, config: &CaptureConfig) -> Result<(), BridgeError>;

    async fn stop_capture(&self) -> Result<(), BridgeError>;

    async fn speak(&self, text: &str) -> Result<(), BridgeError>;

    /// Abort playback immediately
    async fn interrupt(&self) -> Result<(), BridgeError>;

    fn on_partial_result(&self, callback: TextCallback);

    fn on_final_result(&self, callback: TextCallback);

    fn on_error(&self, callback: ErrorCallback);

    fn on_playback_complete(&self, callback: SignalCallback);
}
