//! Unified error types for the locwatch core library.
//!
//! This module provides a unified error type [`LocwatchError`] that covers the
//! failure modes surfaced by the coordinator's public API. Each module also has
//! its own specific error types (`ConfigError`, `StartError`, `GeocodeError`,
//! `HostError`) for internal use. Registry and geocoder failures never reach
//! callers; they degrade to "unavailable" and "no address".
//!
//! Most conditions in this crate are *not* errors: missing permission or
//! disabled providers are steady states the coordinator waits out, and lookup
//! failures degrade to "no address". The variants below exist for the few
//! places where a caller genuinely has to react.
//!
//! # Example
//!
//! ```rust
//! use locwatch_core::error::{LocwatchError, Result};
//!
//! fn require_runtime(available: bool) -> Result<()> {
//!     if !available {
//!         return Err(LocwatchError::RuntimeUnavailable("no reactor".into()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for locwatch operations.
#[derive(Debug, Error)]
pub enum LocwatchError {
    // =========================================================================
    // HOST CAPABILITY ERRORS
    // =========================================================================
    /// The host refused to start location updates.
    #[error("Location updates could not be started: {0}")]
    StartFailed(String),

    /// Location permission has not been granted.
    #[error("Location permission not granted. Call request_permission_if_needed() first.")]
    PermissionMissing,

    /// Every recognized location provider is switched off.
    #[error("All location providers are disabled. Turn location services on in the device settings.")]
    ProvidersDisabled,

    /// No async runtime was available to run address lookups on.
    #[error("No tokio runtime available: {0}")]
    RuntimeUnavailable(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for locwatch operations.
pub type Result<T> = std::result::Result<T, LocwatchError>;

impl LocwatchError {
    /// Returns `true` if this error came from a host capability.
    #[inline]
    #[must_use]
    pub const fn is_host_error(&self) -> bool {
        matches!(
            self,
            Self::StartFailed(_)
                | Self::PermissionMissing
                | Self::ProvidersDisabled
                | Self::RuntimeUnavailable(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error represents an expected operational state.
    ///
    /// Missing permission and disabled providers are preconditions the
    /// coordinator waits out rather than failures.
    #[inline]
    #[must_use]
    pub const fn is_expected_state(&self) -> bool {
        matches!(self, Self::PermissionMissing | Self::ProvidersDisabled)
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::StartFailed(_) => "START_FAILED",
            Self::PermissionMissing => "PERMISSION_MISSING",
            Self::ProvidersDisabled => "PROVIDERS_DISABLED",
            Self::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for LocwatchError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Serialize(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Write { path, source } => Self::IoError(std::io::Error::new(
                source.kind(),
                format!("Failed to write {}: {}", path.display(), source),
            )),
            ConfigError::Validation { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::NoConfigDir => {
                Self::ConfigValidationError("Cannot determine config directory".into())
            }
        }
    }
}

impl From<crate::host::StartError> for LocwatchError {
    fn from(err: crate::host::StartError) -> Self {
        use crate::host::StartError;
        match err {
            StartError::PermissionMissing => Self::PermissionMissing,
            StartError::ProvidersDisabled => Self::ProvidersDisabled,
            StartError::Unavailable(message) => Self::StartFailed(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
