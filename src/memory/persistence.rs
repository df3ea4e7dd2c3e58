//! Atomic JSON snapshot persistence.
//!
//! One file per logical collection (preferences, credibility, georisk,
//! trends, optimizer, debate_chair). Writes go to a temporary file first and
//! are renamed into place, so a crash mid-write can never leave a truncated
//! snapshot. Corrupt files at load time are logged and treated as absent —
//! startup never fails on bad persisted state.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct StatePersistence {
    state_dir: PathBuf,
}

impl StatePersistence {
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir)?;
        Ok(Self { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.state_dir.join(format!("{key}.json"))
    }

    /// Atomically write a collection snapshot: temp file, then rename.
    pub fn save<T: Serialize>(&self, key: &str, data: &T) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        let tmp = self.state_dir.join(format!("{key}.tmp"));
        let json = serde_json::to_vec_pretty(data)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(key, path = %path.display(), "State snapshot saved");
        Ok(())
    }

    /// Load a collection snapshot. Absent or corrupt files return None.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        if !path.exists() {
            return None;
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read state snapshot");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(key, error = %e, "Corrupt state snapshot, using defaults");
                None
            }
        }
    }
}
