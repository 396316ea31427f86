//! Application configuration.
//!
//! The configuration is loaded from `soloinst/config.json` inside the
//! platform config directory (`$XDG_CONFIG_HOME` on Linux).
//! The top-level schema uses an `"instance"` key so the file can be extended
//! with additional sections later without breaking backward compatibility.
//!
//! # Example
//!
//! ```json
//! {
//!   "instance": {
//!     "single_instance": true,
//!     "app_name": "soloinst",
//!     "data_dir": "/home/me/.local/share/soloinst",
//!     "window_title": "Soloinst",
//!     "window_class": "SoloinstWindow"
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
///
/// Every field is optional. A minimal `{}` file is valid and all sections
/// fall back to their compiled-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Single-instance behaviour.
    #[serde(default)]
    pub instance: InstanceConfig,
}

/// Single-instance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Forward every launch to a running primary, even without
    /// `--single-instance` on the command line.
    pub single_instance: bool,
    /// Prefix of the lock file and socket names.
    pub app_name: String,
    /// Where the `cache/` directory holding the lock lives.  Defaults to
    /// the platform data directory plus `app_name`.
    pub data_dir: Option<PathBuf>,
    /// Substring of the primary's main window title (Windows only).
    pub window_title: String,
    /// Exact class name of the primary's main window (Windows only).
    pub window_class: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            single_instance: false,
            app_name: "soloinst".into(),
            data_dir: None,
            window_title: "Soloinst".into(),
            window_class: "SoloinstWindow".into(),
        }
    }
}

impl InstanceConfig {
    /// The configured data directory, or the platform default.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(&self.app_name)
        })
    }

    /// Directory holding the instance lock files.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    /// Directory for the socket of the Unix-socket transport.
    #[cfg(unix)]
    pub fn runtime_dir(&self) -> PathBuf {
        crate::transport::socket::default_runtime_dir()
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }
}

/// Error from loading or parsing a configuration file.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(String);
