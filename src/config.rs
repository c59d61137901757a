//! Configuration file loading.
//!
//! The cache policy is supplied once at process startup. Files are TOML,
//! resolved in this order:
//! 1. explicit path (e.g. a `--config` flag)
//! 2. `~/.tenant-cache/config.toml` (user)
//! 3. `/etc/tenant-cache/config.toml` (system)
//!
//! ```toml
//! [cache]
//! fresh_time_ms = 300000
//! dormant_time_ms = 1800000
//! clean_interval_ms = 60000
//! ```
//!
//! Omitted fields take the [`CachePolicy`] defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cache::CachePolicy;
use crate::{CacheError, Result};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
}

/// `[cache]` section, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_fresh_time_ms")]
    pub fresh_time_ms: u64,
    #[serde(default = "default_dormant_time_ms")]
    pub dormant_time_ms: u64,
    #[serde(default = "default_clean_interval_ms")]
    pub clean_interval_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            fresh_time_ms: default_fresh_time_ms(),
            dormant_time_ms: default_dormant_time_ms(),
            clean_interval_ms: default_clean_interval_ms(),
        }
    }
}

fn default_fresh_time_ms() -> u64 {
    CachePolicy::default().fresh_time.as_millis() as u64
}

fn default_dormant_time_ms() -> u64 {
    CachePolicy::default().dormant_time.as_millis() as u64
}

fn default_clean_interval_ms() -> u64 {
    CachePolicy::default().clean_interval.as_millis() as u64
}

impl Config {
    /// Load configuration from the standard locations.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::locate(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            CacheError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CacheError::Configuration(format!("Failed to parse config: {e}")))
    }

    /// The validated cache policy.
    pub fn policy(&self) -> Result<CachePolicy> {
        let policy = CachePolicy::from_millis(
            self.cache.fresh_time_ms,
            self.cache.dormant_time_ms,
            self.cache.clean_interval_ms,
        );
        policy.validate()?;
        Ok(policy)
    }

    /// Pick the file to read: the explicit path if given, otherwise the
    /// first of [`search_paths`] that is a regular file.
    fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        match explicit {
            Some(path) if path.is_file() => Ok(path.to_path_buf()),
            Some(path) => Err(CacheError::Configuration(format!(
                "config file not found: {}",
                path.display()
            ))),
            None => {
                let candidates = search_paths();
                candidates.iter().find(|p| p.is_file()).cloned().ok_or_else(|| {
                    let tried: Vec<String> =
                        candidates.iter().map(|p| p.display().to_string()).collect();
                    CacheError::Configuration(format!(
                        "no config file found (searched {})",
                        tried.join(", ")
                    ))
                })
            }
        }
    }
}

const USER_CONFIG: &str = ".tenant-cache/config.toml";
const SYSTEM_CONFIG: &str = "/etc/tenant-cache/config.toml";

/// Locations searched when no explicit path is given, most specific first.
pub fn search_paths() -> Vec<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(USER_CONFIG))
        .into_iter()
        .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG)))
        .collect()
}
