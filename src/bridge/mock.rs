//! Deterministic test doubles for the bridge contracts
//!
//! The doubles count every native call and let a test fire native callbacks
//! from its own thread, the way a real engine would fire them from an
//! unspecified platform thread. [`MockBridges`] wires all three doubles to a
//! shared [`MockMicrophone`] that records any moment where the wake-word
//! engine and speech capture hold the microphone at the same time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{
    Bridges, CaptureConfig, ErrorCallback, Grant, PermissionCallback, PermissionGate,
    PermissionSnapshot, SignalCallback, SpeechBridge, TextCallback, WakeWordBridge,
};
use crate::error::BridgeError;
use crate::session::Responder;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared exclusive-resource ledger for the microphone
#[derive(Debug, Default)]
pub struct MockMicrophone {
    holder: Mutex<Option<&'static str>>,
    conflicts: AtomicUsize,
}

impl MockMicrophone {
    fn acquire(&self, owner: &'static str) {
        let mut holder = guard(&self.holder);
        if let Some(current) = *holder {
            if current != owner {
                debug!(current, owner, "microphone conflict");
                self.conflicts.fetch_add(1, Ordering::SeqCst);
            }
        }
        *holder = Some(owner);
    }

    fn release(&self, owner: &'static str) {
        let mut holder = guard(&self.holder);
        if *holder == Some(owner) {
            *holder = None;
        }
    }

    /// Who currently holds the microphone
    pub fn holder(&self) -> Option<&'static str> {
        *guard(&self.holder)
    }

    /// How many times both engines held the microphone at once
    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }
}

/// Wake-word engine double
#[derive(Default)]
pub struct MockWakeWordBridge {
    unavailable: AtomicBool,
    active: AtomicBool,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    next_start_error: Mutex<Option<BridgeError>>,
    detected: Mutex<Option<SignalCallback>>,
    error: Mutex<Option<ErrorCallback>>,
    microphone: Option<Arc<MockMicrophone>>,
}

impl MockWakeWordBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_microphone(microphone: Arc<MockMicrophone>) -> Self {
        Self {
            microphone: Some(microphone),
            ..Self::default()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make the next `start` fail with `err`
    pub fn fail_next_start(&self, err: BridgeError) {
        *guard(&self.next_start_error) = Some(err);
    }

    /// Simulate the engine hearing the wake phrase
    pub fn fire_detected(&self) {
        if let Some(callback) = guard(&self.detected).as_ref() {
            callback();
        }
    }

    /// Simulate an asynchronous engine failure
    pub fn fire_error(&self, err: BridgeError) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(mic) = &self.microphone {
            mic.release("wake_word");
        }
        if let Some(callback) = guard(&self.error).as_ref() {
            callback(err);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WakeWordBridge for MockWakeWordBridge {
    fn check_availability(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<(), BridgeError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = guard(&self.next_start_error).take() {
            return Err(err);
        }
        if let Some(mic) = &self.microphone {
            mic.acquire("wake_word");
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        if let Some(mic) = &self.microphone {
            mic.release("wake_word");
        }
        Ok(())
    }

    fn on_detected(&self, callback: SignalCallback) {
        *guard(&self.detected) = Some(callback);
    }

    fn on_error(&self, callback: ErrorCallback) {
        *guard(&self.error) = Some(callback);
    }
}

/// Speech-to-text / text-to-speech double
#[derive(Default)]
pub struct MockSpeechBridge {
    unavailable: AtomicBool,
    capturing: AtomicBool,
    speaking: AtomicBool,
    start_capture_calls: AtomicUsize,
    stop_capture_calls: AtomicUsize,
    interrupt_calls: AtomicUsize,
    spoken: Mutex<Vec<String>>,
    last_config: Mutex<Option<CaptureConfig>>,
    next_capture_error: Mutex<Option<BridgeError>>,
    next_speak_error: Mutex<Option<BridgeError>>,
    partial: Mutex<Option<TextCallback>>,
    final_result: Mutex<Option<TextCallback>>,
    error: Mutex<Option<ErrorCallback>>,
    playback_complete: Mutex<Option<SignalCallback>>,
    microphone: Option<Arc<MockMicrophone>>,
}

impl MockSpeechBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_microphone(microphone: Arc<MockMicrophone>) -> Self {
        Self {
            microphone: Some(microphone),
            ..Self::default()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn fail_next_capture(&self, err: BridgeError) {
        *guard(&self.next_capture_error) = Some(err);
    }

    pub fn fail_next_speak(&self, err: BridgeError) {
        *guard(&self.next_speak_error) = Some(err);
    }

    fn end_capture(&self) {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(mic) = &self.microphone {
            mic.release("speech");
        }
    }

    pub fn emit_partial(&self, text: &str) {
        if let Some(callback) = guard(&self.partial).as_ref() {
            callback(text.to_string());
        }
    }

    /// Simulate the recognizer finalizing capture; empty text means no speech
    pub fn emit_final(&self, text: &str) {
        self.end_capture();
        if let Some(callback) = guard(&self.final_result).as_ref() {
            callback(text.to_string());
        }
    }

    pub fn emit_error(&self, err: BridgeError) {
        self.end_capture();
        self.speaking.store(false, Ordering::SeqCst);
        if let Some(callback) = guard(&self.error).as_ref() {
            callback(err);
        }
    }

    /// Simulate text-to-speech draining its last utterance
    pub fn finish_playback(&self) {
        self.speaking.store(false, Ordering::SeqCst);
        if let Some(callback) = guard(&self.playback_complete).as_ref() {
            callback();
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn start_capture_calls(&self) -> usize {
        self.start_capture_calls.load(Ordering::SeqCst)
    }

    pub fn stop_capture_calls(&self) -> usize {
        self.stop_capture_calls.load(Ordering::SeqCst)
    }

    pub fn interrupt_calls(&self) -> usize {
        self.interrupt_calls.load(Ordering::SeqCst)
    }

    /// Every text handed to `speak`, in order
    pub fn spoken(&self) -> Vec<String> {
        guard(&self.spoken).clone()
    }

    pub fn last_config(&self) -> Option<CaptureConfig> {
        guard(&self.last_config).clone()
    }
}

#[async_trait]
impl SpeechBridge for MockSpeechBridge {
    fn check_availability(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn start_capture(&self, config: &CaptureConfig) -> Result<(), BridgeError> {
        self.start_capture_calls.fetch_add(1, Ordering::SeqCst);
        *guard(&self.last_config) = Some(config.clone());
        if let Some(err) = guard(&self.next_capture_error).take() {
            return Err(err);
        }
        if let Some(mic) = &self.microphone {
            mic.acquire("speech");
        }
        self.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_capture(&self) -> Result<(), BridgeError> {
        self.stop_capture_calls.fetch_add(1, Ordering::SeqCst);
        self.end_capture();
        Ok(())
    }

    async fn speak(&self, text: &str) -> Result<(), BridgeError> {
        guard(&self.spoken).push(text.to_string());
        if let Some(err) = guard(&self.next_speak_error).take() {
            return Err(err);
        }
        self.speaking.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), BridgeError> {
        self.interrupt_calls.fetch_add(1, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn on_partial_result(&self, callback: TextCallback) {
        *guard(&self.partial) = Some(callback);
    }

    fn on_final_result(&self, callback: TextCallback) {
        *guard(&self.final_result) = Some(callback);
    }

    fn on_error(&self, callback: ErrorCallback) {
        *guard(&self.error) = Some(callback);
    }

    fn on_playback_complete(&self, callback: SignalCallback) {
        *guard(&self.playback_complete) = Some(callback);
    }
}

/// Permission gate double; starts with everything granted
pub struct MockPermissionGate {
    snapshot: Mutex<PermissionSnapshot>,
    callbacks: Mutex<Vec<PermissionCallback>>,
}

impl MockPermissionGate {
    pub fn new(snapshot: PermissionSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Change the microphone grant and notify listeners
    pub fn set_microphone(&self, grant: Grant) {
        let snapshot = {
            let mut snapshot = guard(&self.snapshot);
            snapshot.microphone = grant;
            *snapshot
        };
        for callback in guard(&self.callbacks).iter() {
            callback(snapshot);
        }
    }
}

impl Default for MockPermissionGate {
    fn default() -> Self {
        Self::new(PermissionSnapshot::granted())
    }
}

impl PermissionGate for MockPermissionGate {
    fn snapshot(&self) -> PermissionSnapshot {
        *guard(&self.snapshot)
    }

    fn on_change(&self, callback: PermissionCallback) {
        guard(&self.callbacks).push(callback);
    }
}

/// All three doubles sharing one microphone ledger
#[derive(Clone)]
pub struct MockBridges {
    pub wake_word: Arc<MockWakeWordBridge>,
    pub speech: Arc<MockSpeechBridge>,
    pub permissions: Arc<MockPermissionGate>,
    pub microphone: Arc<MockMicrophone>,
}

impl MockBridges {
    pub fn new() -> Self {
        let microphone = Arc::new(MockMicrophone::default());
        Self {
            wake_word: Arc::new(MockWakeWordBridge::with_microphone(Arc::clone(&microphone))),
            speech: Arc::new(MockSpeechBridge::with_microphone(Arc::clone(&microphone))),
            permissions: Arc::new(MockPermissionGate::default()),
            microphone,
        }
    }

    /// Trait-object view handed to the state machine
    pub fn bridges(&self) -> Bridges {
        Bridges {
            wake_word: self.wake_word.clone(),
            speech: self.speech.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

impl Default for MockBridges {
    fn default() -> Self {
        Self::new()
    }
}

/// Responder that replays queued replies; returns `None` once exhausted
#[derive(Default)]
pub struct ScriptedResponder {
    replies: Mutex<VecDeque<Result<Option<String>, String>>>,
    transcripts: Mutex<Vec<String>>,
}

impl ScriptedResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, text: &str) {
        guard(&self.replies).push_back(Ok(Some(text.to_string())));
    }

    pub fn stay_silent(&self) {
        guard(&self.replies).push_back(Ok(None));
    }

    pub fn fail(&self, cause: &str) {
        guard(&self.replies).push_back(Err(cause.to_string()));
    }

    /// Transcripts received so far
    pub fn transcripts(&self) -> Vec<String> {
        guard(&self.transcripts).clone()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn respond(&self, transcript: &str) -> anyhow::Result<Option<String>> {
        guard(&self.transcripts).push(transcript.to_string());
        match guard(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(cause)) => Err(anyhow::anyhow!(cause)),
            None => Ok(None),
        }
    }
}
