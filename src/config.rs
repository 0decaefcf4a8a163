//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bridge::CaptureConfig;

/// Shell configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Where the wake word preference is persisted
    pub preferences_path: PathBuf,

    /// Turn policy and capture thresholds
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from environment and defaults
    ///
    /// `VOICE_SHELL_DATA_DIR` overrides the data directory; otherwise it is
    /// `$HOME/.local/share/voice-shell`.
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var("VOICE_SHELL_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(&home)
                    .join(".local")
                    .join("share")
                    .join("voice-shell")
            }
        };

        Self::from_dir(data_dir)
    }

    /// Build a configuration rooted at `data_dir`, reading `settings.json`
    /// from it when present
    pub fn from_dir(data_dir: PathBuf) -> Result<Self> {
        let settings_path = data_dir.join("settings.json");
        let session = if settings_path.exists() {
            let raw = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("failed to read {}", settings_path.display()))?;
            serde_json::from_str(&raw).context("failed to parse settings.json")?
        } else {
            SessionConfig::default()
        };

        Ok(Self {
            socket_path: data_dir.join("voice.sock"),
            preferences_path: data_dir.join("preferences.json"),
            data_dir,
            session,
        })
    }

    /// Create the data directory and the parents of the socket and
    /// preference file
    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [
            Some(self.data_dir.as_path()),
            self.socket_path.parent(),
            self.preferences_path.parent(),
        ];
        for dir in dirs.into_iter().flatten() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Retry, timeout and capture policy for a conversational turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shortest utterance the recognizer should accept
    pub min_utterance_ms: u64,
    /// Silence after speech that finalizes capture
    pub trailing_silence_ms: u64,
    /// BCP 47 language tag passed to the recognizer
    pub language: String,
    /// Consecutive empty listens tolerated in one turn before giving up
    pub max_retries: u32,
    /// Pause before capture is restarted after an empty listen
    pub retry_delay_ms: u64,
    /// Hard cap on a single listening attempt
    pub listen_timeout_ms: u64,
    /// Hard cap on the external responder
    pub response_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        Self {
            min_utterance_ms: capture.min_utterance_ms,
            trailing_silence_ms: capture.trailing_silence_ms,
            language: capture.language,
            max_retries: 2,
            retry_delay_ms: 500,
            listen_timeout_ms: 10_000,
            response_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Parameters handed to the speech bridge on every capture start
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            min_utterance_ms: self.min_utterance_ms,
            trailing_silence_ms: self.trailing_silence_ms,
            language: self.language.clone(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}
