//! Session configuration.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration. Example `vitalis.toml`:
//!
//! ```toml
//! content_dir = "content"
//! log_filter = "vitalis=debug"
//!
//! [bus]
//! mode = "deferred"
//! max_cascade_depth = 8
//!
//! [kernel]
//! epsilon = 0.001
//! evaluation = "reactive"
//!
//! [progression]
//! autosave_interval = 30.0
//!
//! [save]
//! path = "progress.json"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vitalis_core::event::BusConfig;
use vitalis_core::kernel::KernelConfig;
use vitalis_data::loader::deserialize_file;
use vitalis_progression::dispatcher::ProgressionConfig;
use vitalis_progression::persistence::SaveFormat;

use crate::error::SessionError;

pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding the content tables.
    pub content_dir: Option<PathBuf>,
    /// `tracing` filter directive, used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub bus: BusConfig,
    pub kernel: KernelConfig,
    pub progression: ProgressionConfig,
    pub save: SaveConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            content_dir: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            bus: BusConfig::default(),
            kernel: KernelConfig::default(),
            progression: ProgressionConfig::default(),
            save: SaveConfig::default(),
        }
    }
}

/// Where progression is saved. No path keeps saves in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub path: Option<PathBuf>,
    pub format: SaveFormat,
}

impl SessionConfig {
    /// Read a config file (TOML, RON or JSON by extension). A relative
    /// `content_dir` or save path is resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let mut config: Self = deserialize_file(path).map_err(|e| SessionError::Config {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        if let Some(base) = path.parent() {
            config.content_dir = config.content_dir.map(|d| base.join(d));
            config.save.path = config.save.path.map(|p| base.join(p));
        }
        Ok(config)
    }

    pub fn with_content_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.content_dir = Some(dir.into());
        self
    }
}
