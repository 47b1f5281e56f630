//! Configuration file locations.

use std::path::{Path, PathBuf};

use crate::{APP_NAME, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};

/// Locations of the configuration files and run outputs.
///
/// Default locations:
/// - Config: `$CONVERGE_CONFIG_PATH`, else `/etc/converge/`
/// - Cache: `~/.cache/converge/`
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Directory holding `containers.yml` and `converge.toml`.
    config_dir: PathBuf,
    /// Directory for run outputs such as the statistics file.
    cache_dir: PathBuf,
}

impl ConfigPaths {
    /// Create paths for an explicit configuration directory.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_NAME);
        Self {
            config_dir: config_dir.into(),
            cache_dir,
        }
    }

    /// Create paths from `$CONVERGE_CONFIG_PATH`, falling back to the default.
    pub fn from_env() -> Self {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(dir) if !dir.is_empty() => Self::new(PathBuf::from(dir)),
            _ => Self::new(DEFAULT_CONFIG_PATH),
        }
    }

    /// Create paths with a custom base directory (for testing).
    pub fn with_base(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            config_dir: base.join("config"),
            cache_dir: base.join("cache"),
        }
    }

    /// Get the configuration directory.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the container list file path.
    pub fn containers_file(&self) -> PathBuf {
        self.config_dir.join("containers.yml")
    }

    /// Get the settings file path.
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("converge.toml")
    }

    /// Default location of the run statistics file.
    pub fn default_stats_file(&self) -> PathBuf {
        self.cache_dir.join("stats.json")
    }
}
