//! Turn driver: listen, transcript, reply, rest
//!
//! Runs as its own task and reacts to [`TurnSignal`]s from the state machine.
//! It owns the per-turn [`Session`] and applies the retry and timeout policy
//! by calling back into the machine's primitives.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use super::Responder;
use crate::config::SessionConfig;
use crate::error::VoiceError;
use crate::events::TransitionCause;
use crate::state::{Trigger, TurnSignal, VoiceState, VoiceStateMachine};

/// State of one conversational turn; never outlives it
#[derive(Debug)]
struct Session {
    started_at: Instant,
    trigger: Trigger,
    transcript: Option<String>,
    retries_remaining: u32,
}

pub(super) struct TurnDriver {
    machine: VoiceStateMachine,
    responder: Arc<dyn Responder>,
    config: SessionConfig,
    session: Option<Session>,
    retry_at: Option<Instant>,
    listen_deadline: Option<Instant>,
}

impl TurnDriver {
    pub(super) fn new(
        machine: VoiceStateMachine,
        responder: Arc<dyn Responder>,
        config: SessionConfig,
    ) -> Self {
        Self {
            machine,
            responder,
            config,
            session: None,
            retry_at: None,
            listen_deadline: None,
        }
    }

    pub(super) async fn run(mut self, mut signals: mpsc::UnboundedReceiver<TurnSignal>) {
        debug!("turn driver started");

        loop {
            let retry_at = self.retry_at;
            let listen_deadline = self.listen_deadline;

            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => break,
                },
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.retry_listen().await;
                }
                _ = sleep_until(listen_deadline.unwrap_or_else(Instant::now)), if listen_deadline.is_some() => {
                    self.listen_deadline = None;
                    self.expire_listen().await;
                }
            }
        }

        debug!("turn driver stopped");
    }

    async fn handle_signal(&mut self, signal: TurnSignal) {
        match signal {
            TurnSignal::ListeningStarted { trigger } => {
                if self.session.is_none() {
                    info!(?trigger, "voice turn started");
                    self.session = Some(Session {
                        started_at: Instant::now(),
                        trigger,
                        transcript: None,
                        retries_remaining: self.config.max_retries.max(1),
                    });
                }
                self.retry_at = None;
                self.listen_deadline = Some(Instant::now() + self.config.listen_timeout());
            }
            TurnSignal::Transcript(text) => {
                self.retry_at = None;
                self.listen_deadline = None;
                if let Some(session) = self.session.as_mut() {
                    session.transcript = Some(text.clone());
                }
                self.respond(&text).await;
            }
            TurnSignal::NoSpeech => {
                self.listen_deadline = None;
                self.handle_no_speech().await;
            }
            TurnSignal::TurnClosed => {
                self.retry_at = None;
                self.listen_deadline = None;
                if let Some(session) = self.session.take() {
                    info!(
                        trigger = ?session.trigger,
                        answered = session.transcript.is_some(),
                        duration_ms = session.started_at.elapsed().as_millis() as u64,
                        "voice turn closed"
                    );
                }
            }
        }
    }

    async fn handle_no_speech(&mut self) {
        let Some(session) = self.session.as_mut() else {
            debug!("empty listen outside a turn, stopping");
            let _ = self.machine.stop_listening(TransitionCause::NoSpeech).await;
            return;
        };

        session.retries_remaining = session.retries_remaining.saturating_sub(1);
        if session.retries_remaining > 0 {
            info!(
                retries_remaining = session.retries_remaining,
                "no speech detected, retrying"
            );
            self.retry_at = Some(Instant::now() + self.config.retry_delay());
            return;
        }

        // The machine publishes the one notice for this turn once at rest
        info!("no speech detected, giving up");
        if let Err(err) = self.machine.stop_listening(TransitionCause::NoSpeech).await {
            warn!(%err, "failed to stop listening after retries");
        }
    }

    async fn retry_listen(&mut self) {
        if self.session.is_none() {
            return;
        }

        match self.machine.resume_capture().await {
            Ok(()) => {
                self.listen_deadline = Some(Instant::now() + self.config.listen_timeout());
            }
            Err(err) => debug!(%err, "retry abandoned"),
        }
    }

    async fn expire_listen(&mut self) {
        if self.machine.get_state() != VoiceState::Listening {
            return;
        }

        info!(
            timeout_ms = self.config.listen_timeout_ms,
            "listening timed out"
        );
        if let Err(err) = self.machine.stop_listening(TransitionCause::Timeout).await {
            warn!(%err, "failed to stop listening after timeout");
        }
    }

    async fn respond(&mut self, transcript: &str) {
        let reply = timeout(
            self.config.response_timeout(),
            self.responder.respond(transcript),
        )
        .await;

        let result = match reply {
            Ok(Ok(Some(text))) => self.machine.request_speak(text).await,
            Ok(Ok(None)) => self.machine.finish_processing().await,
            Ok(Err(err)) => {
                warn!(error = %err, "responder failed");
                self.machine
                    .report_failure(VoiceError::NativeFailure(format!("responder failed: {err}")))
                    .await
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.response_timeout_ms,
                    "responder timed out"
                );
                self.machine
                    .report_failure(VoiceError::NativeFailure("responder timed out".to_string()))
                    .await
            }
        };

        if let Err(err) = result {
            debug!(%err, "reply not delivered");
        }
    }
}
