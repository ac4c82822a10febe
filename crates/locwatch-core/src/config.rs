//! Coordinator configuration.
//!
//! Configuration is layered with the `config` crate:
//! - built-in defaults
//! - an optional TOML file (see [`default_config_path`])
//! - `LOCWATCH_*` environment variables (e.g. `LOCWATCH_UPDATE_INTERVAL_MS=5000`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Priority, UpdateRequest};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "LOCWATCH";

/// Errors raised while loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The layered sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A field holds an invalid value.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// No per-user configuration directory exists on this platform.
    #[error("cannot determine configuration directory")]
    NoConfigDir,
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// What happens to an active subscription while no UI unit is in the foreground.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundPolicy {
    /// Keep receiving updates in the background; only provider and
    /// permission changes stop the subscription.
    #[default]
    KeepUpdates,
    /// Treat "backgrounded" as an unmet precondition and stop updates.
    PauseUpdates,
}

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Desired interval between fixes, in milliseconds.
    pub update_interval_ms: u64,

    /// Fastest interval the application can handle, in milliseconds.
    pub fastest_interval_ms: Option<u64>,

    /// Accuracy/power class requested from the host.
    pub priority: Priority,

    /// Emit debug-level diagnostics for every decision.
    pub debug_logging: bool,

    /// Maximum addresses requested from the geocoder per fix.
    pub max_address_results: usize,

    /// Subscription behavior while backgrounded.
    pub background_policy: BackgroundPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 10_000,
            fastest_interval_ms: None,
            priority: Priority::HighAccuracy,
            debug_logging: false,
            max_address_results: 1,
            background_policy: BackgroundPolicy::KeepUpdates,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from `path`, which must exist, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, or a load or
    /// validation error.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load_layers(Some(path))
    }

    /// Load configuration from `path` if it exists, otherwise defaults, with
    /// environment overrides in both cases.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file cannot be parsed or the result is invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        Self::load_layers(path.exists().then_some(path))
    }

    fn load_layers(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let loaded: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Save configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)
    }

    /// Check field values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first invalid field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.update_interval_ms == 0 {
            return Err(ConfigError::Validation {
                field: "update_interval_ms",
                message: "must be greater than zero".into(),
            });
        }
        if let Some(fastest) = self.fastest_interval_ms {
            if fastest > self.update_interval_ms {
                return Err(ConfigError::Validation {
                    field: "fastest_interval_ms",
                    message: format!(
                        "{fastest} exceeds update_interval_ms ({})",
                        self.update_interval_ms
                    ),
                });
            }
        }
        if self.max_address_results == 0 {
            return Err(ConfigError::Validation {
                field: "max_address_results",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Desired interval between fixes.
    #[must_use]
    pub const fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// The request handed to the host location client.
    #[must_use]
    pub fn update_request(&self) -> UpdateRequest {
        UpdateRequest {
            interval: self.update_interval(),
            fastest_interval: self.fastest_interval_ms.map(Duration::from_millis),
            priority: self.priority,
        }
    }
}

/// Per-user configuration file location (e.g. `~/.config/locwatch/config.toml`).
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] if the platform has no home directory.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "locwatch").ok_or(ConfigError::NoConfigDir)?;
    Ok(dirs.config_dir().join("config.toml"))
}
