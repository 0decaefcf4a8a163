//! Voice turn integration tests
//!
//! Drives the coordinator end to end against the mock bridges

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_test::{assert_err, assert_ok};
use voice_shell::bridge::mock::MockBridges;
use voice_shell::{
    BridgeError, CaptureConfig, Grant, MemoryPreferenceStore, Responder, SessionConfig,
    TransitionCause, VoiceError, VoiceEvent, VoiceState,
};

mod common;

use common::{fast_config, wait_until, Harness};

/// Responder that never answers
struct HangingResponder;

#[async_trait]
impl Responder for HangingResponder {
    async fn respond(&self, _transcript: &str) -> anyhow::Result<Option<String>> {
        std::future::pending().await
    }
}

fn notices(events: &[VoiceEvent], wanted: &VoiceError) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, VoiceEvent::Error { error, .. } if error == wanted))
        .count()
}

#[tokio::test]
async fn test_start_turn_twice_is_already_active() {
    let h = Harness::start(false).await;

    assert_ok!(h.coordinator.start_turn().await);
    let err = assert_err!(h.coordinator.start_turn().await);

    assert_eq!(
        err,
        VoiceError::AlreadyActive {
            state: VoiceState::Listening
        }
    );
    assert_eq!(h.coordinator.state(), VoiceState::Listening);
    assert_eq!(h.mocks.speech.start_capture_calls(), 1);
}

#[tokio::test]
async fn test_transcript_enters_processing_with_one_recognized_event() {
    let mut h = Harness::with_responder(Arc::new(HangingResponder), fast_config()).await;

    assert_ok!(h.coordinator.start_turn().await);
    h.mocks.speech.emit_partial("turn off");
    h.mocks.speech.emit_final("turn off the lights");

    let events = h.events_until(VoiceState::Processing).await;
    assert!(matches!(
        events.last(),
        Some(VoiceEvent::StateChanged {
            previous: VoiceState::Listening,
            cause: TransitionCause::Transcript,
            ..
        })
    ));

    let recognized = h.next_event().await;
    assert_eq!(
        recognized,
        VoiceEvent::Recognized {
            text: "turn off the lights".into()
        }
    );

    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coordinator.state(), VoiceState::Processing);
    assert!(!h
        .drain()
        .iter()
        .any(|event| matches!(event, VoiceEvent::Recognized { .. })));

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_full_turn_speaks_reply_and_rearms() {
    let mut h = Harness::start(true).await;
    assert_eq!(h.coordinator.state(), VoiceState::WakeWordArmed);
    h.responder.reply("The lights are off");

    h.mocks.wake_word.fire_detected();
    let events = h.events_until(VoiceState::Listening).await;
    assert_eq!(events[0].state(), Some(VoiceState::WakeWordDetected));
    assert!(!h.mocks.wake_word.is_active());

    h.mocks.speech.emit_final("turn off the lights");
    h.events_until(VoiceState::Speaking).await;
    assert!(h.mocks.speech.is_speaking());
    assert_eq!(h.mocks.speech.spoken(), vec!["The lights are off".to_string()]);

    h.mocks.speech.finish_playback();
    let events = h.events_until(VoiceState::WakeWordArmed).await;
    assert!(matches!(
        events.last(),
        Some(VoiceEvent::StateChanged {
            cause: TransitionCause::PlaybackComplete,
            ..
        })
    ));

    assert!(h.mocks.wake_word.is_active());
    assert_eq!(h.mocks.wake_word.start_calls(), 2);
    assert_eq!(h.responder.transcripts(), vec!["turn off the lights".to_string()]);
    assert_eq!(h.mocks.microphone.conflicts(), 0);
}

#[tokio::test]
async fn test_wake_word_during_speaking_is_queued() {
    let mut h = Harness::start(true).await;
    h.responder.reply("It is noon");

    h.mocks.wake_word.fire_detected();
    h.events_until(VoiceState::Listening).await;
    h.mocks.speech.emit_final("what time is it");
    h.events_until(VoiceState::Speaking).await;

    // Detection during playback does not cut the reply short
    h.mocks.wake_word.fire_detected();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(h.coordinator.state(), VoiceState::Speaking);
    assert_eq!(h.mocks.speech.interrupt_calls(), 0);

    h.mocks.speech.finish_playback();
    let events = h.events_until(VoiceState::Listening).await;
    let states: Vec<_> = events.iter().filter_map(VoiceEvent::state).collect();
    assert_eq!(states, vec![VoiceState::WakeWordDetected, VoiceState::Listening]);

    sleep(Duration::from_millis(50)).await;
    assert!(!h
        .drain()
        .iter()
        .any(|event| event.state() == Some(VoiceState::Listening)));
    assert_eq!(h.coordinator.state(), VoiceState::Listening);
    assert_eq!(h.mocks.speech.start_capture_calls(), 2);
    assert_eq!(h.mocks.microphone.conflicts(), 0);
}

#[tokio::test]
async fn test_empty_listens_give_one_no_speech_notice() {
    let config = SessionConfig {
        max_retries: 3,
        ..fast_config()
    };
    let mut h = Harness::with_config(
        MockBridges::new(),
        Arc::new(MemoryPreferenceStore::new(false)),
        config,
    )
    .await;

    assert_ok!(h.coordinator.start_turn().await);
    for attempt in 1..=3 {
        let speech = h.mocks.speech.clone();
        wait_until(|| speech.is_capturing() && speech.start_capture_calls() == attempt).await;
        assert_eq!(h.coordinator.state(), VoiceState::Listening);
        h.mocks.speech.emit_final("");
    }

    let events = h.events_until(VoiceState::Idle).await;
    assert!(matches!(
        events.last(),
        Some(VoiceEvent::StateChanged {
            previous: VoiceState::Listening,
            cause: TransitionCause::NoSpeech,
            ..
        })
    ));

    let notice = h.next_event().await;
    assert_eq!(
        notice,
        VoiceEvent::Error {
            error: VoiceError::NoSpeechDetected,
            state: VoiceState::Idle,
        }
    );

    sleep(Duration::from_millis(100)).await;
    assert_eq!(notices(&h.drain(), &VoiceError::NoSpeechDetected), 0);
    assert_eq!(h.coordinator.state(), VoiceState::Idle);
    assert_eq!(h.mocks.speech.start_capture_calls(), 3);
}

#[tokio::test]
async fn test_persisted_preference_survives_restart() {
    let preferences = Arc::new(MemoryPreferenceStore::new(false));

    let first = Harness::with_config(MockBridges::new(), preferences.clone(), fast_config()).await;
    assert_eq!(first.coordinator.state(), VoiceState::Idle);
    assert_ok!(first.coordinator.set_wake_word_enabled(true).await);
    assert_eq!(first.coordinator.state(), VoiceState::WakeWordArmed);
    first.coordinator.shutdown().await;
    assert!(!first.mocks.wake_word.is_active());

    let second = Harness::with_config(MockBridges::new(), preferences.clone(), fast_config()).await;
    assert_eq!(second.coordinator.state(), VoiceState::WakeWordArmed);
    assert!(second.coordinator.status().wake_word_enabled);
    assert!(second.mocks.wake_word.is_active());
    assert_eq!(preferences.saves(), 1);
}

#[tokio::test]
async fn test_start_turn_without_microphone_grant() {
    let mocks = MockBridges::new();
    mocks.permissions.set_microphone(Grant::Denied);
    let mut h = Harness::with_config(
        mocks,
        Arc::new(MemoryPreferenceStore::new(false)),
        fast_config(),
    )
    .await;

    let err = assert_err!(h.coordinator.start_turn().await);
    assert_eq!(err, VoiceError::PermissionDenied);
    assert_eq!(h.coordinator.state(), VoiceState::Idle);
    assert_eq!(h.mocks.speech.start_capture_calls(), 0);

    assert_eq!(
        h.next_event().await,
        VoiceEvent::Error {
            error: VoiceError::PermissionDenied,
            state: VoiceState::Idle,
        }
    );
}

#[tokio::test]
async fn test_interrupt_speaking_returns_to_rest() {
    let mut h = Harness::start(true).await;
    h.responder.reply("Here is a long answer");

    assert_ok!(h.coordinator.start_turn().await);
    h.mocks.speech.emit_final("tell me a story");
    h.events_until(VoiceState::Speaking).await;

    assert_ok!(h.coordinator.interrupt().await);
    assert_eq!(h.coordinator.state(), VoiceState::WakeWordArmed);
    assert_eq!(h.mocks.speech.interrupt_calls(), 1);
    assert!(!h.mocks.speech.is_speaking());

    // A late completion callback from the engine is ignored
    h.mocks.speech.finish_playback();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(h.coordinator.state(), VoiceState::WakeWordArmed);
}

#[tokio::test]
async fn test_interrupt_while_listening_is_rejected() {
    let h = Harness::start(false).await;
    assert_ok!(h.coordinator.start_turn().await);

    let err = assert_err!(h.coordinator.interrupt().await);
    assert!(matches!(
        err,
        VoiceError::InvalidTransition {
            state: VoiceState::Listening,
            ..
        }
    ));
    assert_eq!(h.coordinator.state(), VoiceState::Listening);
}

#[tokio::test]
async fn test_listen_timeout_stops_capture() {
    let config = SessionConfig {
        listen_timeout_ms: 50,
        ..fast_config()
    };
    let mut h = Harness::with_config(
        MockBridges::new(),
        Arc::new(MemoryPreferenceStore::new(false)),
        config,
    )
    .await;

    assert_ok!(h.coordinator.start_turn().await);
    let events = h.events_until(VoiceState::Idle).await;

    assert!(matches!(
        events.last(),
        Some(VoiceEvent::StateChanged {
            previous: VoiceState::Listening,
            cause: TransitionCause::Timeout,
            ..
        })
    ));
    assert!(!h.mocks.speech.is_capturing());
    assert_eq!(h.mocks.speech.start_capture_calls(), 1);
    assert_eq!(h.mocks.speech.stop_capture_calls(), 1);
}

#[tokio::test]
async fn test_stop_turn_discards_partial() {
    let mut h = Harness::start(false).await;

    assert_ok!(h.coordinator.start_turn().await);
    h.mocks.speech.emit_partial("turn off the");
    assert_ok!(h.coordinator.stop_turn().await);

    let events = h.events_until(VoiceState::Idle).await;
    assert!(!events
        .iter()
        .any(|event| matches!(event, VoiceEvent::Recognized { .. })));
    assert!(h.responder.transcripts().is_empty());
}

#[tokio::test]
async fn test_responder_failure_enters_error_until_reset() {
    let mut h = Harness::start(true).await;
    h.responder.fail("backend unreachable");

    assert_ok!(h.coordinator.start_turn().await);
    h.mocks.speech.emit_final("what is the weather");
    h.events_until(VoiceState::Error).await;

    let status = h.coordinator.status();
    assert_eq!(
        status.last_error,
        Some(VoiceError::NativeFailure(
            "responder failed: backend unreachable".into()
        ))
    );
    assert!(!h.mocks.wake_word.is_active());
    assert_eq!(h.mocks.microphone.holder(), None);

    // ERROR only clears through reset
    assert_err!(h.coordinator.start_turn().await);
    assert_ok!(h.coordinator.reset().await);
    assert_eq!(h.coordinator.state(), VoiceState::WakeWordArmed);
    assert_eq!(h.coordinator.status().last_error, None);
}

#[tokio::test]
async fn test_response_timeout_enters_error() {
    let config = SessionConfig {
        response_timeout_ms: 50,
        ..fast_config()
    };
    let mut h = Harness::with_responder(Arc::new(HangingResponder), config).await;

    assert_ok!(h.coordinator.start_turn().await);
    h.mocks.speech.emit_final("hello");
    h.events_until(VoiceState::Error).await;

    assert_eq!(
        h.coordinator.status().last_error,
        Some(VoiceError::NativeFailure("responder timed out".into()))
    );
}

#[tokio::test]
async fn test_microphone_revoked_while_listening() {
    let mut h = Harness::start(false).await;
    assert_ok!(h.coordinator.start_turn().await);

    h.mocks.permissions.set_microphone(Grant::Denied);
    h.events_until(VoiceState::Error).await;

    assert_eq!(
        h.coordinator.status().last_error,
        Some(VoiceError::PermissionDenied)
    );
    assert!(!h.mocks.speech.is_capturing());
}

#[tokio::test]
async fn test_callback_subscribers_see_every_transition() {
    let h = Harness::start(false).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let handle = h.coordinator.subscribe_fn(move |event| {
        if let Some(state) = event.state() {
            sink.lock().unwrap().push(state);
        }
    });

    assert_ok!(h.coordinator.start_turn().await);
    assert_ok!(h.coordinator.stop_turn().await);

    let observed = Arc::clone(&seen);
    wait_until(move || observed.lock().unwrap().len() == 2).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![VoiceState::Listening, VoiceState::Idle]
    );

    handle.unsubscribe();
    assert!(!handle.is_active());

    assert_ok!(h.coordinator.start_turn().await);
    sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_capture_failure_after_wake_word_enters_error() {
    let mut h = Harness::start(true).await;
    h.mocks
        .speech
        .fail_next_capture(BridgeError::Unknown("recognizer busy".into()));

    h.mocks.wake_word.fire_detected();
    h.events_until(VoiceState::Error).await;

    assert_eq!(
        h.coordinator.status().last_error,
        Some(VoiceError::NativeFailure("recognizer busy".into()))
    );
    assert_eq!(h.mocks.speech.start_capture_calls(), 1);
    assert!(!h.mocks.wake_word.is_active());
    assert_eq!(h.mocks.microphone.holder(), None);
}

#[tokio::test]
async fn test_wake_word_with_revoked_microphone_enters_error() {
    let mut h = Harness::start(true).await;

    // Revoked before the machine gets to handle the detection
    h.mocks.wake_word.fire_detected();
    h.mocks.permissions.set_microphone(Grant::Denied);

    let events = h.events_until(VoiceState::Error).await;
    let states: Vec<_> = events.iter().filter_map(VoiceEvent::state).collect();
    assert_eq!(states, vec![VoiceState::WakeWordDetected, VoiceState::Error]);

    assert_eq!(
        h.coordinator.status().last_error,
        Some(VoiceError::PermissionDenied)
    );
    assert_eq!(h.mocks.speech.start_capture_calls(), 0);
    assert!(!h.mocks.wake_word.is_active());
}

#[tokio::test]
async fn test_speak_failure_releases_every_engine() {
    let mut h = Harness::start(true).await;
    h.responder.reply("Hello there");
    h.mocks
        .speech
        .fail_next_speak(BridgeError::Unknown("synthesizer down".into()));

    assert_ok!(h.coordinator.start_turn().await);
    h.mocks.speech.emit_final("hi");
    let events = h.events_until(VoiceState::Error).await;

    assert!(events
        .iter()
        .any(|event| event.state() == Some(VoiceState::Speaking)));
    assert_eq!(
        h.coordinator.status().last_error,
        Some(VoiceError::NativeFailure("synthesizer down".into()))
    );
    assert_eq!(h.mocks.speech.spoken(), vec!["Hello there".to_string()]);
    assert_eq!(h.mocks.speech.interrupt_calls(), 1);
    assert!(!h.mocks.speech.is_speaking());
    assert!(!h.mocks.speech.is_capturing());
    assert!(!h.mocks.wake_word.is_active());
}

#[tokio::test]
async fn test_capture_thresholds_reach_the_recognizer() {
    let config = SessionConfig {
        min_utterance_ms: 450,
        trailing_silence_ms: 900,
        language: "fr-FR".into(),
        ..fast_config()
    };
    let h = Harness::with_config(
        MockBridges::new(),
        Arc::new(MemoryPreferenceStore::new(false)),
        config,
    )
    .await;

    assert_ok!(h.coordinator.start_turn().await);
    assert_eq!(
        h.mocks.speech.last_config(),
        Some(CaptureConfig {
            min_utterance_ms: 450,
            trailing_silence_ms: 900,
            language: "fr-FR".into(),
        })
    );
}

#[tokio::test]
async fn test_silent_reply_returns_to_rest() {
    let mut h = Harness::start(true).await;
    h.responder.stay_silent();

    assert_ok!(h.coordinator.start_turn().await);
    h.mocks.speech.emit_final("never mind");
    let events = h.events_until(VoiceState::WakeWordArmed).await;

    assert!(matches!(
        events.last(),
        Some(VoiceEvent::StateChanged {
            previous: VoiceState::Processing,
            cause: TransitionCause::Response,
            ..
        })
    ));
    assert!(h.mocks.speech.spoken().is_empty());
    assert_eq!(h.responder.transcripts(), vec!["never mind".to_string()]);
    assert!(h.mocks.wake_word.is_active());
}
