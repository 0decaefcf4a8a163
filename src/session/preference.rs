//! Persisted wake word preference
//!
//! The preference belongs to the user's settings. The coordinator reads it
//! at startup and writes it on every toggle; the state machine only reacts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Whether the background wake word engine should be armed when idle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeWordPreference {
    #[serde(rename = "wake_word_enabled")]
    pub enabled: bool,
}

/// Storage for [`WakeWordPreference`]
pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Result<WakeWordPreference>;

    fn save(&self, preference: WakeWordPreference) -> Result<()>;
}

/// JSON file store; a missing file reads as the default (disabled)
#[derive(Debug, Clone)]
pub struct JsonPreferenceStore {
    path: PathBuf,
}

impl JsonPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn load(&self) -> Result<WakeWordPreference> {
        if !self.path.exists() {
            debug!(path = ?self.path, "no stored preference, using default");
            return Ok(WakeWordPreference::default());
        }

        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw).context("failed to parse wake word preference")
    }

    fn save(&self, preference: WakeWordPreference) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("failed to create preference directory")?;
        }

        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&preference)?)
            .context("failed to write wake word preference")?;
        std::fs::rename(&tmp, &self.path).context("failed to replace wake word preference")?;

        debug!(enabled = preference.enabled, path = ?self.path, "wake word preference saved");
        Ok(())
    }
}

/// In-memory store, shared across simulated restarts in tests
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    preference: Mutex<WakeWordPreference>,
    saves: AtomicUsize,
}

impl MemoryPreferenceStore {
    pub fn new(enabled: bool) -> Self {
        Self {
            preference: Mutex::new(WakeWordPreference { enabled }),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<WakeWordPreference> {
        Ok(*self.preference.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn save(&self, preference: WakeWordPreference) -> Result<()> {
        *self.preference.lock().unwrap_or_else(PoisonError::into_inner) = preference;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
