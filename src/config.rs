// src/config.rs

//! Engine configuration
//!
//! Loaded from an optional TOML file. A missing file yields the defaults:
//! history and packaging enabled, mirrors rooted at `packages/`, and no
//! package with filesystem sync forced on.

use crate::error::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file name
pub const DEFAULT_CONFIG_PATH: &str = "recpack.toml";

/// Filesystem sync entry for one package key
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FsSyncEntry {
    /// Explicit mirror directory; defaults to `<fs_root>/<key>`
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keep revert patches for updates and deletes
    pub history: bool,
    /// Classify mutations into packages
    pub packaging: bool,
    /// Root directory for package mirrors without an explicit path
    pub fs_root: PathBuf,
    /// Package keys with filesystem sync enabled, by key
    pub filesystem_sync: BTreeMap<String, FsSyncEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history: true,
            packaging: true,
            fs_root: PathBuf::from("packages"),
            filesystem_sync: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Filesystem sync entry configured for a package key
    pub fn fs_sync_for(&self, key: &str) -> Option<&FsSyncEntry> {
        self.filesystem_sync.get(key)
    }

    /// Default mirror directory of a package
    pub fn default_fs_path(&self, key: &str) -> PathBuf {
        self.fs_root.join(key)
    }
}
