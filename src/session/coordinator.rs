//! Public command surface for UI consumers
//!
//! Reads the wake word preference, builds the state machine around the
//! injected bridges and starts the turn driver. Every command returns a
//! `VoiceResult` instead of panicking so callers can render failures.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::driver::TurnDriver;
use super::{PreferenceStore, Responder, WakeWordPreference};
use crate::bridge::{Bridges, PermissionGate};
use crate::config::SessionConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::events::{Subscription, Unsubscribe, VoiceEvent};
use crate::state::{MachineOptions, MachineStatus, VoiceState, VoiceStateMachine};

/// Drives full turns on top of the [`VoiceStateMachine`]
pub struct VoiceSessionCoordinator {
    machine: VoiceStateMachine,
    permissions: Arc<dyn PermissionGate>,
    preferences: Arc<dyn PreferenceStore>,
    driver: JoinHandle<()>,
}

impl VoiceSessionCoordinator {
    /// Build the machine, apply the stored preference and start driving turns
    pub async fn start(
        bridges: Bridges,
        preferences: Arc<dyn PreferenceStore>,
        responder: Arc<dyn Responder>,
        config: SessionConfig,
    ) -> Self {
        let preference = preferences.load().unwrap_or_else(|err| {
            warn!(error = %err, "failed to load wake word preference, using default");
            WakeWordPreference::default()
        });

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let permissions = Arc::clone(&bridges.permissions);
        let machine = VoiceStateMachine::spawn(
            bridges,
            MachineOptions {
                wake_word_enabled: preference.enabled,
                capture: config.capture_config(),
                driver: Some(signal_tx),
            },
        );

        if let Err(err) = machine.reconcile().await {
            warn!(%err, "wake word not armed at startup");
        }

        let driver = tokio::spawn(TurnDriver::new(machine.clone(), responder, config).run(signal_rx));

        info!(
            wake_word_enabled = preference.enabled,
            state = %machine.get_state(),
            "voice session coordinator started"
        );

        Self {
            machine,
            permissions,
            preferences,
            driver,
        }
    }

    /// Start listening for a manual turn
    ///
    /// Fails with `PermissionDenied` without touching the state machine when
    /// the microphone is not granted.
    pub async fn start_turn(&self) -> VoiceResult<()> {
        if !self.permissions.snapshot().microphone.is_granted() {
            info!("turn refused, microphone not granted");
            self.machine.notice(VoiceError::PermissionDenied).await?;
            return Err(VoiceError::PermissionDenied);
        }

        self.machine.request_start_listening().await
    }

    /// Stop listening early; buffered partial transcripts are discarded
    pub async fn stop_turn(&self) -> VoiceResult<()> {
        self.machine.request_stop_listening().await
    }

    /// Cut the spoken reply short
    pub async fn interrupt(&self) -> VoiceResult<()> {
        self.machine.request_interrupt_speech().await
    }

    /// Persist the preference, then let the machine react to it
    pub async fn set_wake_word_enabled(&self, enabled: bool) -> VoiceResult<()> {
        self.preferences
            .save(WakeWordPreference { enabled })
            .map_err(|err| VoiceError::Storage(err.to_string()))?;

        info!(enabled, "wake word preference changed");
        self.machine.set_wake_word_enabled(enabled).await
    }

    /// Clear ERROR
    pub async fn reset(&self) -> VoiceResult<()> {
        self.machine.reset().await
    }

    pub fn state(&self) -> VoiceState {
        self.machine.get_state()
    }

    pub fn status(&self) -> MachineStatus {
        self.machine.status()
    }

    pub fn subscribe(&self) -> Subscription {
        self.machine.subscribe()
    }

    pub fn subscribe_fn<F>(&self, callback: F) -> Unsubscribe
    where
        F: FnMut(&VoiceEvent) + Send + 'static,
    {
        self.machine.subscribe_fn(callback)
    }

    /// Underlying machine, for consumers that need its primitives
    pub fn machine(&self) -> &VoiceStateMachine {
        &self.machine
    }

    /// Release every engine and stop both tasks
    pub async fn shutdown(&self) {
        if let Err(err) = self.machine.shutdown().await {
            warn!(%err, "state machine already stopped");
        }
        self.driver.abort();
        info!("voice session coordinator stopped");
    }
}
