//! Run configuration (`rbsync.toml`).
//!
//! ```toml
//! [sync]
//! last_update = 1700000000
//! limit = 500
//! rhythmdb = "/home/me/.local/share/rhythmbox/rhythmdb.xml"
//! backup = true
//! duplicates = "first-match"
//! ```
//!
//! Every key is optional; missing keys take the defaults below. The file
//! itself must exist, since a run without a watermark would re-count the
//! whole scrobble history.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

pub const DEFAULT_LIMIT: u32 = 500;

/// `<config dir>/rbsync`, falling back to the working directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rbsync")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("rbsync.toml")
}

/// Where Rhythmbox keeps its database (`~/.local/share/rhythmbox/rhythmdb.xml` on Linux).
pub fn default_rhythmdb_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rhythmbox")
        .join("rhythmdb.xml")
}

/// What to do when several library entries match one scrobble.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Update the first entry in document order.
    #[default]
    FirstMatch,
    /// Leave all of them alone and report the scrobble as ambiguous.
    Skip,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Watermark: scrobbles at or before this epoch are considered synced.
    pub last_update: i64,
    /// Page size hint for the remote source.
    pub limit: u32,
    pub rhythmdb: PathBuf,
    pub backup: bool,
    pub duplicates: DuplicatePolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            last_update: 0,
            limit: DEFAULT_LIMIT,
            rhythmdb: default_rhythmdb_path(),
            backup: true,
            duplicates: DuplicatePolicy::FirstMatch,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub sync: SyncSettings,
}

impl RunConfig {
    /// Loads the configuration file. Missing or unparseable files are errors.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "cannot read {} ({}); run with --init to create it",
                path.display(),
                e
            ))
        })?;
        let config: RunConfig = toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("cannot parse {}: {}", path.display(), e)))?;

        if config.sync.limit == 0 {
            return Err(SyncError::Config("limit must be greater than 0".to_string()));
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("cannot serialize config: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        log::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Writes a default configuration unless one already exists.
    ///
    /// Returns `false` when the file was already there.
    pub fn init(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        RunConfig::default().save(path)?;
        Ok(true)
    }
}
