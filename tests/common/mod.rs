//! Shared harness for the voice turn integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing_subscriber::EnvFilter;
use voice_shell::bridge::mock::{MockBridges, ScriptedResponder};
use voice_shell::{
    MemoryPreferenceStore, Responder, SessionConfig, Subscription, VoiceEvent,
    VoiceSessionCoordinator, VoiceState,
};

const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

/// Session config with short timers so retry paths finish quickly
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        retry_delay_ms: 20,
        ..SessionConfig::default()
    }
}

pub struct Harness {
    pub mocks: MockBridges,
    pub responder: Arc<ScriptedResponder>,
    pub preferences: Arc<MemoryPreferenceStore>,
    pub coordinator: VoiceSessionCoordinator,
    pub events: Subscription,
}

impl Harness {
    pub async fn start(wake_word_enabled: bool) -> Self {
        Self::with_config(
            MockBridges::new(),
            Arc::new(MemoryPreferenceStore::new(wake_word_enabled)),
            fast_config(),
        )
        .await
    }

    pub async fn with_config(
        mocks: MockBridges,
        preferences: Arc<MemoryPreferenceStore>,
        config: SessionConfig,
    ) -> Self {
        init_tracing();
        let responder = Arc::new(ScriptedResponder::new());
        let coordinator = VoiceSessionCoordinator::start(
            mocks.bridges(),
            preferences.clone(),
            responder.clone(),
            config,
        )
        .await;
        let events = coordinator.subscribe();

        Self {
            mocks,
            responder,
            preferences,
            coordinator,
            events,
        }
    }

    /// Start with a custom responder instead of the scripted one
    pub async fn with_responder(responder: Arc<dyn Responder>, config: SessionConfig) -> Self {
        init_tracing();
        let mocks = MockBridges::new();
        let preferences = Arc::new(MemoryPreferenceStore::new(false));
        let coordinator =
            VoiceSessionCoordinator::start(mocks.bridges(), preferences.clone(), responder, config)
                .await;
        let events = coordinator.subscribe();

        Self {
            mocks,
            responder: Arc::new(ScriptedResponder::new()),
            preferences,
            coordinator,
            events,
        }
    }

    pub async fn next_event(&mut self) -> VoiceEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event bus closed")
    }

    /// Events up to and including the transition into `wanted`
    pub async fn events_until(&mut self, wanted: VoiceState) -> Vec<VoiceEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = event.state() == Some(wanted);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Everything already delivered, without waiting
    pub fn drain(&mut self) -> Vec<VoiceEvent> {
        let mut seen = Vec::new();
        while let Some(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}
