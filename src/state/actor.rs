//! Core state machine implementation
//!
//! Owns the current `VoiceState` and the flags that mirror which native
//! engines are running. Only this task mutates them; every transition goes
//! through `transition_to`, which commits the new state before publishing the
//! event that describes it.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::machine::{MachineOptions, MachineStatus, Trigger, TurnSignal, VoiceState};
use crate::bridge::{Bridges, CaptureConfig, PermissionSnapshot};
use crate::error::{BridgeError, VoiceError, VoiceResult};
use crate::events::{EventBus, TransitionCause, VoiceEvent};

/// Everything the machine task consumes, in arrival order
pub(super) enum Input {
    Command {
        command: Command,
        reply: oneshot::Sender<VoiceResult<()>>,
    },
    Native(NativeEvent),
}

pub(super) enum Command {
    Reconcile,
    StartListening,
    StopListening(TransitionCause),
    InterruptSpeech,
    Speak(String),
    FinishProcessing,
    ResumeCapture,
    ReportFailure(VoiceError),
    Notice(VoiceError),
    Reset,
    SetWakeWordEnabled(bool),
    Shutdown,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Reconcile => "reconcile",
            Command::StartListening => "start listening",
            Command::StopListening(_) => "stop listening",
            Command::InterruptSpeech => "interrupt speech",
            Command::Speak(_) => "speak",
            Command::FinishProcessing => "finish processing",
            Command::ResumeCapture => "resume capture",
            Command::ReportFailure(_) => "report failure",
            Command::Notice(_) => "notice",
            Command::Reset => "reset",
            Command::SetWakeWordEnabled(_) => "set wake word enabled",
            Command::Shutdown => "shutdown",
        }
    }
}

/// Callbacks from the native bridges
#[derive(Debug)]
pub(super) enum NativeEvent {
    WakeWordDetected,
    WakeWordError(BridgeError),
    PartialResult(String),
    FinalResult(String),
    SpeechError(BridgeError),
    PlaybackComplete,
    PermissionsChanged(PermissionSnapshot),
}

pub(super) struct Actor {
    bridges: Bridges,
    capture: CaptureConfig,
    driver: Option<mpsc::UnboundedSender<TurnSignal>>,
    status_tx: watch::Sender<MachineStatus>,
    bus: EventBus,

    state: VoiceState,
    /// Time when the current state was entered
    entered_at: Instant,
    wake_word_enabled: bool,
    wake_engine_active: bool,
    capture_active: bool,
    /// Detection that arrived while SPEAKING, honored once playback ends
    pending_wake: bool,
    /// Latest partial transcript; never processed, dropped when capture ends
    partial: Option<String>,
    transcript: Option<String>,
    last_error: Option<VoiceError>,
    unavailable_reported: bool,
    running: bool,
}

impl Actor {
    pub(super) fn new(
        bridges: Bridges,
        options: MachineOptions,
        status_tx: watch::Sender<MachineStatus>,
        bus: EventBus,
    ) -> Self {
        Self {
            bridges,
            capture: options.capture,
            driver: options.driver,
            status_tx,
            bus,
            state: VoiceState::Idle,
            entered_at: Instant::now(),
            wake_word_enabled: options.wake_word_enabled,
            wake_engine_active: false,
            capture_active: false,
            pending_wake: false,
            partial: None,
            transcript: None,
            last_error: None,
            unavailable_reported: false,
            running: true,
        }
    }

    /// Run the machine, processing inputs one at a time
    pub(super) async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<Input>) {
        info!(
            wake_word_enabled = self.wake_word_enabled,
            "voice state machine started in IDLE state"
        );

        while let Some(input) = input_rx.recv().await {
            match input {
                Input::Command { command, reply } => {
                    let name = command.name();
                    let result = self.handle_command(command).await;
                    match &result {
                        Err(err @ (VoiceError::InvalidTransition { .. }
                        | VoiceError::AlreadyActive { .. })) => {
                            warn!(request = name, %err, "request rejected");
                        }
                        Err(err) => debug!(request = name, %err, "request failed"),
                        Ok(()) => trace!(request = name, state = %self.state, "request done"),
                    }
                    let _ = reply.send(result);
                }
                Input::Native(event) => self.handle_native(event).await,
            }

            if !self.running {
                break;
            }
        }

        info!("voice state machine stopped");
    }

    async fn handle_command(&mut self, command: Command) -> VoiceResult<()> {
        match command {
            Command::Reconcile => self.reconcile().await,
            Command::StartListening => self.start_listening(Trigger::Manual).await,
            Command::StopListening(cause) => self.stop_listening(cause).await,
            Command::InterruptSpeech => self.interrupt_speech().await,
            Command::Speak(text) => self.speak(text).await,
            Command::FinishProcessing => self.finish_processing().await,
            Command::ResumeCapture => self.resume_capture().await,
            Command::ReportFailure(error) => {
                if self.state != VoiceState::Error {
                    self.fail(error).await;
                }
                Ok(())
            }
            Command::Notice(error) => {
                self.report_notice(error);
                Ok(())
            }
            Command::Reset => self.reset().await,
            Command::SetWakeWordEnabled(enabled) => self.set_wake_word_enabled(enabled).await,
            Command::Shutdown => {
                self.release_engines().await;
                self.running = false;
                Ok(())
            }
        }
    }

    async fn handle_native(&mut self, event: NativeEvent) {
        match event {
            NativeEvent::WakeWordDetected => self.on_wake_word_detected().await,
            NativeEvent::WakeWordError(cause) => self.on_wake_word_error(cause).await,
            NativeEvent::PartialResult(text) => {
                if self.state == VoiceState::Listening {
                    trace!(len = text.len(), "partial transcript");
                    self.partial = Some(text);
                } else {
                    debug!(state = %self.state, "ignoring partial transcript");
                }
            }
            NativeEvent::FinalResult(text) => self.on_final_result(text).await,
            NativeEvent::SpeechError(cause) => self.on_speech_error(cause).await,
            NativeEvent::PlaybackComplete => {
                if self.state == VoiceState::Speaking {
                    self.settle(TransitionCause::PlaybackComplete).await;
                } else {
                    debug!(state = %self.state, "ignoring playback completion");
                }
            }
            NativeEvent::PermissionsChanged(snapshot) => {
                self.on_permissions_changed(snapshot).await
            }
        }
    }

    // ---- commands ----

    async fn reconcile(&mut self) -> VoiceResult<()> {
        if self.state != VoiceState::Idle || !self.wake_word_enabled {
            return Ok(());
        }
        self.arm(TransitionCause::Startup).await
    }

    async fn start_listening(&mut self, trigger: Trigger) -> VoiceResult<()> {
        match self.state {
            VoiceState::Idle | VoiceState::WakeWordArmed | VoiceState::WakeWordDetected => {}
            state => return Err(VoiceError::AlreadyActive { state }),
        }

        // Fail fast before touching any engine
        if let Err(err) = self.check_listen_preconditions() {
            match trigger {
                Trigger::WakeWord => self.fail(err.clone()).await,
                Trigger::Manual => self.report_notice(err.clone()),
            }
            return Err(err);
        }

        let cause = match trigger {
            Trigger::Manual => TransitionCause::UserRequest,
            Trigger::WakeWord => TransitionCause::WakeWord,
        };
        self.transition_to(VoiceState::Listening, cause);
        self.partial = None;
        self.transcript = None;

        // The microphone is exclusive: the wake word engine goes first
        if self.wake_engine_active {
            if let Err(err) = self.stop_wake_engine().await {
                self.fail(err.clone()).await;
                return Err(err);
            }
        }

        self.begin_capture().await?;
        self.signal(TurnSignal::ListeningStarted { trigger });
        Ok(())
    }

    async fn stop_listening(&mut self, cause: TransitionCause) -> VoiceResult<()> {
        if self.state != VoiceState::Listening {
            debug!(state = %self.state, "stop listening while not listening");
            return Ok(());
        }

        if self.partial.take().is_some() {
            debug!("discarding buffered partial transcript");
        }

        if self.capture_active {
            self.capture_active = false;
            if let Err(err) = self.bridges.speech.stop_capture().await {
                let err = VoiceError::from(err);
                self.fail(err.clone()).await;
                return Err(err);
            }
        }

        self.settle(cause).await;
        if cause == TransitionCause::NoSpeech {
            self.report_notice(VoiceError::NoSpeechDetected);
        }
        Ok(())
    }

    async fn interrupt_speech(&mut self) -> VoiceResult<()> {
        if self.state != VoiceState::Speaking {
            return Err(VoiceError::invalid(self.state, "interrupt speech"));
        }

        if let Err(err) = self.bridges.speech.interrupt().await {
            let err = VoiceError::from(err);
            self.fail(err.clone()).await;
            return Err(err);
        }

        self.settle(TransitionCause::Interrupted).await;
        Ok(())
    }

    async fn speak(&mut self, text: String) -> VoiceResult<()> {
        if self.state != VoiceState::Processing {
            return Err(VoiceError::invalid(self.state, "speak"));
        }
        if text.trim().is_empty() {
            return self.finish_processing().await;
        }

        self.transition_to(VoiceState::Speaking, TransitionCause::Response);
        if let Err(err) = self.bridges.speech.speak(&text).await {
            let err = VoiceError::from(err);
            self.fail(err.clone()).await;
            return Err(err);
        }
        Ok(())
    }

    async fn finish_processing(&mut self) -> VoiceResult<()> {
        if self.state != VoiceState::Processing {
            return Err(VoiceError::invalid(self.state, "finish processing"));
        }
        self.settle(TransitionCause::Response).await;
        Ok(())
    }

    async fn resume_capture(&mut self) -> VoiceResult<()> {
        if self.state != VoiceState::Listening {
            return Err(VoiceError::invalid(self.state, "resume capture"));
        }

        // Grants may have been revoked since the previous attempt
        if let Err(err) = self.check_listen_preconditions() {
            self.fail(err.clone()).await;
            return Err(err);
        }

        self.partial = None;
        if self.capture_active {
            self.capture_active = false;
            if let Err(err) = self.bridges.speech.stop_capture().await {
                let err = VoiceError::from(err);
                self.fail(err.clone()).await;
                return Err(err);
            }
        }

        self.begin_capture().await
    }

    async fn reset(&mut self) -> VoiceResult<()> {
        if self.state != VoiceState::Error {
            return Err(VoiceError::invalid(self.state, "reset"));
        }

        self.last_error = None;
        self.transition_to(VoiceState::Idle, TransitionCause::Reset);

        if self.wake_word_enabled {
            if let Err(err) = self.arm(TransitionCause::Reset).await {
                debug!(%err, "wake word not re-armed after reset");
            }
        }
        Ok(())
    }

    async fn set_wake_word_enabled(&mut self, enabled: bool) -> VoiceResult<()> {
        self.wake_word_enabled = enabled;
        self.publish_status();

        match (self.state, enabled) {
            (VoiceState::Idle, true) => self.arm(TransitionCause::Preference).await,
            (VoiceState::WakeWordArmed, false) => {
                if self.wake_engine_active {
                    if let Err(err) = self.stop_wake_engine().await {
                        self.fail(err.clone()).await;
                        return Err(err);
                    }
                }
                self.transition_to(VoiceState::Idle, TransitionCause::Preference);
                Ok(())
            }
            // Applied when the running session comes to rest
            _ => Ok(()),
        }
    }

    // ---- native callbacks ----

    async fn on_wake_word_detected(&mut self) {
        match self.state {
            VoiceState::WakeWordArmed => {
                info!("wake word detected");
                self.transition_to(VoiceState::WakeWordDetected, TransitionCause::WakeWord);
                if let Err(err) = self.start_listening(Trigger::WakeWord).await {
                    warn!(%err, "could not listen after wake word");
                }
            }
            VoiceState::Speaking => {
                debug!("wake word detected during playback, queued");
                self.pending_wake = true;
            }
            state => debug!(%state, "ignoring wake word detection"),
        }
    }

    async fn on_wake_word_error(&mut self, cause: BridgeError) {
        if self.state != VoiceState::WakeWordArmed {
            debug!(state = %self.state, %cause, "ignoring wake word engine error");
            return;
        }

        // The engine already stopped itself
        self.wake_engine_active = false;
        self.fail(cause.into()).await;
    }

    async fn on_final_result(&mut self, text: String) {
        if self.state != VoiceState::Listening {
            debug!(state = %self.state, "ignoring final transcript");
            return;
        }

        self.capture_active = false;
        self.partial = None;

        if text.trim().is_empty() {
            info!("listening ended without speech");
            if self.has_driver() {
                self.signal(TurnSignal::NoSpeech);
            } else {
                self.settle(TransitionCause::NoSpeech).await;
                self.report_notice(VoiceError::NoSpeechDetected);
            }
            return;
        }

        self.transcript = Some(text.clone());
        self.transition_to(VoiceState::Processing, TransitionCause::Transcript);
        self.bus.publish(VoiceEvent::Recognized { text: text.clone() });
        self.signal(TurnSignal::Transcript(text));
    }

    async fn on_speech_error(&mut self, cause: BridgeError) {
        match self.state {
            VoiceState::Listening | VoiceState::Speaking => {
                if self.state == VoiceState::Listening {
                    self.capture_active = false;
                }
                self.fail(cause.into()).await;
            }
            state => debug!(%state, %cause, "ignoring speech engine error"),
        }
    }

    async fn on_permissions_changed(&mut self, snapshot: PermissionSnapshot) {
        if snapshot.microphone.is_granted() {
            if self.state == VoiceState::Idle && self.wake_word_enabled {
                info!("microphone granted, re-arming wake word");
                if let Err(err) = self.arm(TransitionCause::Permission).await {
                    debug!(%err, "re-arming after grant failed");
                }
            }
            return;
        }

        match self.state {
            VoiceState::WakeWordArmed => {
                info!("microphone revoked, disarming wake word");
                if self.wake_engine_active {
                    if let Err(err) = self.stop_wake_engine().await {
                        warn!(%err, "failed to stop wake word engine");
                    }
                }
                self.transition_to(VoiceState::Idle, TransitionCause::Permission);
                self.report_notice(VoiceError::PermissionDenied);
            }
            VoiceState::Listening => self.fail(VoiceError::PermissionDenied).await,
            _ => {}
        }
    }

    // ---- helpers ----

    fn check_listen_preconditions(&self) -> VoiceResult<()> {
        if !self.bridges.permissions.snapshot().microphone.is_granted() {
            return Err(VoiceError::PermissionDenied);
        }
        if !self.bridges.speech.check_availability() {
            return Err(VoiceError::EngineUnavailable);
        }
        Ok(())
    }

    async fn begin_capture(&mut self) -> VoiceResult<()> {
        match self.bridges.speech.start_capture(&self.capture).await {
            Ok(()) => {
                self.capture_active = true;
                Ok(())
            }
            Err(err) => {
                let err = VoiceError::from(err);
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    async fn stop_wake_engine(&mut self) -> VoiceResult<()> {
        self.wake_engine_active = false;
        self.bridges.wake_word.stop().await.map_err(VoiceError::from)
    }

    /// Enter WAKE_WORD_ARMED and start the engine, or fall back to IDLE
    async fn arm(&mut self, cause: TransitionCause) -> VoiceResult<()> {
        if !self.bridges.wake_word.check_availability() {
            self.enter_idle(cause);
            self.report_notice(VoiceError::EngineUnavailable);
            return Err(VoiceError::EngineUnavailable);
        }

        let permissions = self.bridges.permissions.snapshot();
        if !permissions.microphone.is_granted() {
            self.enter_idle(cause);
            self.report_notice(VoiceError::PermissionDenied);
            return Err(VoiceError::PermissionDenied);
        }
        if !permissions.battery_exemption.is_granted() {
            warn!("battery optimization exemption missing, OS may stop the wake word service");
        }

        self.transition_to(VoiceState::WakeWordArmed, cause);
        match self.bridges.wake_word.start().await {
            Ok(()) => {
                self.wake_engine_active = true;
                Ok(())
            }
            Err(err) => {
                let err = VoiceError::from(err);
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    /// Return to rest after a session step, honoring a queued wake word first
    async fn settle(&mut self, cause: TransitionCause) {
        self.transcript = None;

        if std::mem::take(&mut self.pending_wake) {
            self.signal(TurnSignal::TurnClosed);
            info!("honoring wake word detected during playback");
            self.transition_to(VoiceState::WakeWordDetected, TransitionCause::WakeWord);
            if let Err(err) = self.start_listening(Trigger::WakeWord).await {
                warn!(%err, "could not listen for queued wake word");
            }
            return;
        }

        if self.wake_word_enabled {
            if let Err(err) = self.arm(cause).await {
                debug!(%err, "wake word not re-armed");
            }
        } else {
            self.enter_idle(cause);
        }
        self.signal(TurnSignal::TurnClosed);
    }

    /// Stop all engines, retain the cause and enter ERROR
    async fn fail(&mut self, error: VoiceError) {
        warn!(from = %self.state, %error, "voice session failed");

        self.pending_wake = false;
        self.partial = None;
        self.transcript = None;
        self.release_engines().await;

        self.last_error = Some(error.clone());
        if self.state == VoiceState::Error {
            self.publish_status();
        } else {
            self.transition_to(VoiceState::Error, TransitionCause::Failure);
        }
        self.bus.publish(VoiceEvent::Error {
            error,
            state: VoiceState::Error,
        });
        self.signal(TurnSignal::TurnClosed);
    }

    /// Best-effort stop of everything that may hold a resource
    async fn release_engines(&mut self) {
        if self.wake_engine_active {
            self.wake_engine_active = false;
            if let Err(err) = self.bridges.wake_word.stop().await {
                warn!(%err, "failed to stop wake word engine");
            }
        }
        if self.capture_active {
            self.capture_active = false;
            if let Err(err) = self.bridges.speech.stop_capture().await {
                warn!(%err, "failed to stop speech capture");
            }
        }
        if self.state == VoiceState::Speaking {
            if let Err(err) = self.bridges.speech.interrupt().await {
                warn!(%err, "failed to interrupt playback");
            }
        }
    }

    fn enter_idle(&mut self, cause: TransitionCause) {
        if self.state != VoiceState::Idle {
            self.transition_to(VoiceState::Idle, cause);
        }
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: VoiceState, cause: TransitionCause) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }

        let duration_ms = self.entered_at.elapsed().as_millis() as u64;
        info!(
            from = %old_state,
            to = %new_state,
            ?cause,
            duration_ms = duration_ms,
            "state transition"
        );

        self.state = new_state;
        self.entered_at = Instant::now();
        self.publish_status();

        self.bus.publish(VoiceEvent::StateChanged {
            state: new_state,
            previous: old_state,
            cause,
        });
    }

    /// Publish a non-fatal condition without changing state
    fn report_notice(&mut self, error: VoiceError) {
        if error == VoiceError::EngineUnavailable {
            if self.unavailable_reported {
                return;
            }
            self.unavailable_reported = true;
        }

        info!(%error, state = %self.state, "reporting notice");
        self.bus.publish(VoiceEvent::Error {
            error,
            state: self.state,
        });
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(MachineStatus {
            state: self.state,
            wake_word_enabled: self.wake_word_enabled,
            last_error: self.last_error.clone(),
        });
    }

    fn has_driver(&self) -> bool {
        self.driver.as_ref().is_some_and(|driver| !driver.is_closed())
    }

    fn signal(&self, signal: TurnSignal) {
        if let Some(driver) = &self.driver {
            let _ = driver.send(signal);
        }
    }
}
