//! Host capability traits.
//!
//! The coordinator never talks to a platform API directly. Everything it needs
//! from the host (provider registry, location stream, permission prompt,
//! geocoder, user-facing notices) is reached through the traits here, held as
//! `Arc<dyn …>` so one host adapter can serve several coordinators.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Address, Coordinates, LocationResult, Provider, UpdateRequest};

/// Identifier of the permission the coordinator asks for.
pub const LOCATION_PERMISSION: &str = "android.permission.ACCESS_FINE_LOCATION";

/// Request code attached to every permission prompt this crate issues.
pub const PERMISSION_REQUEST_CODE: RequestCode = RequestCode(10101);

/// Opaque identifier correlating a permission prompt with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestCode(pub i32);

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live permission state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// The user granted the permission.
    Granted,
    /// The user denied the permission.
    Denied,
    /// The permission has never been requested.
    Unknown,
}

impl PermissionStatus {
    /// Whether location updates may be requested.
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Per-permission outcome delivered with a permission result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantResult {
    /// Permission granted.
    Granted,
    /// Permission denied.
    Denied,
}

/// Handle for an active location update registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateHandle(pub u64);

/// Why the host declined to start location updates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    /// The host says the permission is not granted.
    #[error("location permission missing")]
    PermissionMissing,

    /// Every location provider is switched off.
    #[error("all location providers disabled")]
    ProvidersDisabled,

    /// The location client could not be obtained.
    #[error("location client unavailable: {0}")]
    Unavailable(String),
}

/// A host API call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    /// Create a host error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Reverse geocoding failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocodeError {
    /// The backing service could not be reached.
    #[error("geocoder service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The coordinates were rejected by the geocoder.
    #[error("invalid coordinates {0}")]
    InvalidCoordinates(String),
}

/// User-facing notices the coordinator may raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// Location was wanted but every provider is off.
    LocationServicesDisabled,
}

impl Advisory {
    /// Text shown to the user.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::LocationServicesDisabled => {
                "Please turn location services on in the device settings"
            }
        }
    }
}

/// Registry of location providers.
pub trait ProviderRegistry: Send + Sync {
    /// Whether `provider` is currently switched on.
    ///
    /// # Errors
    ///
    /// Returns an error if the host registry could not be queried.
    fn is_provider_enabled(&self, provider: Provider) -> Result<bool, HostError>;
}

/// The host's location update stream.
pub trait LocationClient: Send + Sync {
    /// Begin delivering results into `sink` until [`LocationClient::stop_updates`].
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] if the host refuses the registration.
    fn start_updates(
        &self,
        request: &UpdateRequest,
        sink: LocationSink,
    ) -> Result<UpdateHandle, StartError>;

    /// Stop the registration identified by `handle`.
    fn stop_updates(&self, handle: UpdateHandle);
}

/// The host permission subsystem.
pub trait PermissionHost: Send + Sync {
    /// Live state of `permission`.
    fn check(&self, permission: &str) -> PermissionStatus;

    /// Show the permission prompt. The answer arrives later through
    /// [`crate::LocationCoordinator::handle_permission_result`].
    fn request(&self, permission: &str, request_code: RequestCode);
}

/// Coordinates-to-address lookup. Implementations may block.
pub trait ReverseGeocoder: Send + Sync {
    /// Up to `max_results` addresses near `coordinates`, best match first.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the lookup fails.
    fn lookup(
        &self,
        coordinates: Coordinates,
        max_results: usize,
    ) -> Result<Vec<Address>, GeocodeError>;
}

/// Best-effort user-facing notices (toasts, banners, ...).
pub trait Advisor: Send + Sync {
    /// Show `advisory` to the user.
    fn advise(&self, advisory: Advisory);
}

/// Advisor that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAdvisor;

impl Advisor for LogAdvisor {
    fn advise(&self, advisory: Advisory) {
        tracing::warn!(advisory = ?advisory, "{}", advisory.message());
    }
}

/// Receiving end the host pushes location results into.
#[derive(Clone)]
pub struct LocationSink {
    deliver: Arc<dyn Fn(Option<LocationResult>) + Send + Sync>,
}

impl LocationSink {
    /// Wrap a delivery function.
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(Option<LocationResult>) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Hand one callback's worth of data to the coordinator.
    pub fn deliver(&self, result: Option<LocationResult>) {
        (self.deliver)(result);
    }
}

impl fmt::Debug for LocationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationSink").finish_non_exhaustive()
    }
}

/// Everything the coordinator needs from the host.
#[derive(Clone)]
pub struct HostCapabilities {
    /// Provider on/off registry.
    pub providers: Arc<dyn ProviderRegistry>,

    /// Location update stream.
    pub location: Arc<dyn LocationClient>,

    /// Permission checks and prompts.
    pub permissions: Arc<dyn PermissionHost>,

    /// Reverse geocoder; `None` when the host has none.
    pub geocoder: Option<Arc<dyn ReverseGeocoder>>,

    /// User-facing notices.
    pub advisor: Arc<dyn Advisor>,
}

impl fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("geocoder", &self.geocoder.is_some())
            .finish_non_exhaustive()
    }
}
