//! Where progression saves go.
//!
//! The dispatcher only sees the [`ProgressStore`] trait. Saves are written
//! synchronously; a failed save is logged by the caller and retried later,
//! so implementations never need to queue or retry on their own.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::snapshot::{self, ProgressSnapshot, SnapshotError};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Backing store for progression snapshots.
pub trait ProgressStore: std::fmt::Debug {
    fn save(&mut self, snapshot: &ProgressSnapshot) -> Result<(), PersistenceError>;

    /// The most recent save, or `None` if nothing was saved yet.
    fn load(&mut self) -> Result<Option<ProgressSnapshot>, PersistenceError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Keeps the last snapshot in memory. `fail_saves` makes every save fail,
/// for exercising the retry path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub last: Option<ProgressSnapshot>,
    pub saves: u32,
    pub fail_saves: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: ProgressSnapshot) -> Self {
        Self {
            last: Some(snapshot),
            ..Self::default()
        }
    }
}

impl ProgressStore for MemoryStore {
    fn save(&mut self, snapshot: &ProgressSnapshot) -> Result<(), PersistenceError> {
        if self.fail_saves {
            return Err(PersistenceError::Unavailable("memory store set to fail".into()));
        }
        self.last = Some(snapshot.clone());
        self.saves += 1;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<ProgressSnapshot>, PersistenceError> {
        Ok(self.last.clone())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveFormat {
    #[default]
    Json,
    Binary,
}

/// Writes one save file, replacing it on every save.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    format: SaveFormat,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, format: SaveFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ProgressStore for FileStore {
    fn save(&mut self, snapshot: &ProgressSnapshot) -> Result<(), PersistenceError> {
        let bytes = match self.format {
            SaveFormat::Json => snapshot::to_json(snapshot)?.into_bytes(),
            SaveFormat::Binary => snapshot::to_bytes(snapshot)?,
        };
        // Written beside the target and renamed into place.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<ProgressSnapshot>, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let snapshot = match self.format {
            SaveFormat::Json => {
                let text = String::from_utf8_lossy(&bytes);
                snapshot::from_json(&text)?
            }
            SaveFormat::Binary => snapshot::from_bytes(&bytes)?,
        };
        Ok(Some(snapshot))
    }
}
