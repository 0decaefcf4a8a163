//! Handle to the voice state machine
//!
//! The machine itself runs as a single task (see `actor.rs`). Every command
//! and every native callback is funnelled through one channel into that task,
//! so no two transitions are ever in flight at once. The handle is cheap to
//! clone and can be shared by any number of UI consumers.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::actor::{Actor, Command, Input, NativeEvent};
use crate::bridge::{Bridges, CaptureConfig, PermissionSnapshot};
use crate::error::{BridgeError, VoiceError, VoiceResult};
use crate::events::{EventBus, Subscription, TransitionCause, Unsubscribe, VoiceEvent};

/// The seven mutually exclusive interaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceState {
    #[default]
    Idle,
    WakeWordArmed,
    WakeWordDetected,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl VoiceState {
    /// Whether no session is running
    pub fn is_at_rest(self) -> bool {
        matches!(self, VoiceState::Idle | VoiceState::WakeWordArmed)
    }
}

impl std::fmt::Display for VoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceState::Idle => write!(f, "IDLE"),
            VoiceState::WakeWordArmed => write!(f, "WAKE_WORD_ARMED"),
            VoiceState::WakeWordDetected => write!(f, "WAKE_WORD_DETECTED"),
            VoiceState::Listening => write!(f, "LISTENING"),
            VoiceState::Processing => write!(f, "PROCESSING"),
            VoiceState::Speaking => write!(f, "SPEAKING"),
            VoiceState::Error => write!(f, "ERROR"),
        }
    }
}

/// What started a listen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    WakeWord,
}

/// Progress signals sent to the turn driver, if one is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnSignal {
    /// Capture started for a new listen
    ListeningStarted { trigger: Trigger },
    /// A non-empty final transcript moved the machine to PROCESSING
    Transcript(String),
    /// Capture ended without speech; the machine holds LISTENING until the
    /// driver resumes capture or stops listening
    NoSpeech,
    /// The machine came to rest or failed; the turn is over
    TurnClosed,
}

/// Snapshot published after every commit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MachineStatus {
    pub state: VoiceState,
    pub wake_word_enabled: bool,
    /// Cause retained while in ERROR
    pub last_error: Option<VoiceError>,
}

/// Construction options
#[derive(Debug, Clone, Default)]
pub struct MachineOptions {
    /// Wake word preference as read from the user's settings
    pub wake_word_enabled: bool,
    pub capture: CaptureConfig,
    /// Receives [`TurnSignal`]s. Without a driver, an empty transcript sends
    /// the machine straight back to rest.
    pub driver: Option<mpsc::UnboundedSender<TurnSignal>>,
}

/// Single authority over the current [`VoiceState`]
#[derive(Clone)]
pub struct VoiceStateMachine {
    input_tx: mpsc::UnboundedSender<Input>,
    status_rx: watch::Receiver<MachineStatus>,
    bus: EventBus,
}

impl VoiceStateMachine {
    /// Spawn the machine task in `IDLE` and hook up the native callbacks
    ///
    /// Must be called from within a tokio runtime. Call
    /// [`reconcile`](Self::reconcile) afterwards to apply the wake word
    /// preference.
    pub fn spawn(bridges: Bridges, options: MachineOptions) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(MachineStatus {
            wake_word_enabled: options.wake_word_enabled,
            ..MachineStatus::default()
        });
        let bus = EventBus::new();

        register_callbacks(&bridges, &input_tx);

        let actor = Actor::new(bridges, options, status_tx, bus.clone());
        tokio::spawn(actor.run(input_rx));

        Self {
            input_tx,
            status_rx,
            bus,
        }
    }

    /// Current state; never blocks
    pub fn get_state(&self) -> VoiceState {
        self.status_rx.borrow().state
    }

    pub fn status(&self) -> MachineStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to events from this point onward
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Callback-style subscription
    pub fn subscribe_fn<F>(&self, callback: F) -> Unsubscribe
    where
        F: FnMut(&VoiceEvent) + Send + 'static,
    {
        self.bus.subscribe_fn(callback)
    }

    /// Arm the wake word engine when the preference says so (IDLE only)
    pub async fn reconcile(&self) -> VoiceResult<()> {
        self.request(Command::Reconcile).await
    }

    pub async fn request_start_listening(&self) -> VoiceResult<()> {
        self.request(Command::StartListening).await
    }

    /// No-op unless LISTENING; buffered partial transcripts are discarded
    pub async fn request_stop_listening(&self) -> VoiceResult<()> {
        self.stop_listening(TransitionCause::UserRequest).await
    }

    pub(crate) async fn stop_listening(&self, cause: TransitionCause) -> VoiceResult<()> {
        self.request(Command::StopListening(cause)).await
    }

    pub async fn request_interrupt_speech(&self) -> VoiceResult<()> {
        self.request(Command::InterruptSpeech).await
    }

    /// Play a reply; valid only from PROCESSING
    pub async fn request_speak(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.request(Command::Speak(text.into())).await
    }

    /// Leave PROCESSING without a reply
    pub async fn finish_processing(&self) -> VoiceResult<()> {
        self.request(Command::FinishProcessing).await
    }

    /// Restart capture inside LISTENING after an empty result
    pub async fn resume_capture(&self) -> VoiceResult<()> {
        self.request(Command::ResumeCapture).await
    }

    /// Fail the current session into ERROR
    pub async fn report_failure(&self, error: VoiceError) -> VoiceResult<()> {
        self.request(Command::ReportFailure(error)).await
    }

    /// Publish a non-fatal condition, stamped with the state it was seen in
    pub(crate) async fn notice(&self, error: VoiceError) -> VoiceResult<()> {
        self.request(Command::Notice(error)).await
    }

    /// Clear ERROR back to IDLE, re-arming if the preference is enabled
    pub async fn reset(&self) -> VoiceResult<()> {
        self.request(Command::Reset).await
    }

    /// React to a toggle of the wake word preference
    pub async fn set_wake_word_enabled(&self, enabled: bool) -> VoiceResult<()> {
        self.request(Command::SetWakeWordEnabled(enabled)).await
    }

    /// Release every engine and stop the machine task
    pub async fn shutdown(&self) -> VoiceResult<()> {
        self.request(Command::Shutdown).await
    }

    pub fn on_native_wake_word_detected(&self) {
        self.forward(NativeEvent::WakeWordDetected);
    }

    pub fn on_native_wake_word_error(&self, cause: BridgeError) {
        self.forward(NativeEvent::WakeWordError(cause));
    }

    pub fn on_native_speech_partial_result(&self, text: impl Into<String>) {
        self.forward(NativeEvent::PartialResult(text.into()));
    }

    pub fn on_native_speech_final_result(&self, text: impl Into<String>) {
        self.forward(NativeEvent::FinalResult(text.into()));
    }

    pub fn on_native_speech_error(&self, cause: BridgeError) {
        self.forward(NativeEvent::SpeechError(cause));
    }

    pub fn on_native_playback_complete(&self) {
        self.forward(NativeEvent::PlaybackComplete);
    }

    pub fn on_permissions_changed(&self, snapshot: PermissionSnapshot) {
        self.forward(NativeEvent::PermissionsChanged(snapshot));
    }

    fn forward(&self, event: NativeEvent) {
        send_native(&self.input_tx, event);
    }

    async fn request(&self, command: Command) -> VoiceResult<()> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(Input::Command { command, reply })
            .map_err(|_| VoiceError::Closed)?;
        rx.await.map_err(|_| VoiceError::Closed)?
    }
}

fn send_native(tx: &mpsc::UnboundedSender<Input>, event: NativeEvent) {
    if tx.send(Input::Native(event)).is_err() {
        debug!("native callback after state machine shutdown");
    }
}

/// Marshal native callbacks, fired on arbitrary threads, into the machine task
fn register_callbacks(bridges: &Bridges, input_tx: &mpsc::UnboundedSender<Input>) {
    let tx = input_tx.clone();
    bridges
        .wake_word
        .on_detected(Box::new(move || send_native(&tx, NativeEvent::WakeWordDetected)));

    let tx = input_tx.clone();
    bridges.wake_word.on_error(Box::new(move |cause| {
        send_native(&tx, NativeEvent::WakeWordError(cause))
    }));

    let tx = input_tx.clone();
    bridges.speech.on_partial_result(Box::new(move |text| {
        send_native(&tx, NativeEvent::PartialResult(text))
    }));

    let tx = input_tx.clone();
    bridges.speech.on_final_result(Box::new(move |text| {
        send_native(&tx, NativeEvent::FinalResult(text))
    }));

    let tx = input_tx.clone();
    bridges
        .speech
        .on_error(Box::new(move |cause| send_native(&tx, NativeEvent::SpeechError(cause))));

    let tx = input_tx.clone();
    bridges
        .speech
        .on_playback_complete(Box::new(move || send_native(&tx, NativeEvent::PlaybackComplete)));

    let tx = input_tx.clone();
    bridges.permissions.on_change(Box::new(move |snapshot| {
        send_native(&tx, NativeEvent::PermissionsChanged(snapshot))
    }));
}
