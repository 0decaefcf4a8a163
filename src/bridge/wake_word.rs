//! Contract over the OS-level wake-word engine

use async_trait::async_trait;

use super::{ErrorCallback, SignalCallback};
use crate::error::BridgeError;

/// Background wake-word detection service
///
/// `start` and `stop` resolve once the native service acknowledged the
/// request. Detections are reported through the callback registered with
/// [`WakeWordBridge::on_detected`].
#[async_trait]
pub trait WakeWordBridge: Send + Sync {
    /// Whether the engine exists on this device
    fn check_availability(&self) -> bool;

    /// Start listening for the wake phrase
    async fn start(&self) -> Result<(), BridgeError>;

    /// Stop the engine and release the microphone
    async fn stop(&self) -> Result<(), BridgeError>;

    /// Register the detection callback, replacing any previous one
    fn on_detected(&self, callback: SignalCallback);

    /// Register a callback for asynchronous engine failures
    /// (service killed, permission revoked while running)
    fn on_error(&self, callback: ErrorCallback);
}
