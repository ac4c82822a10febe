//! # locwatch-core
//!
//! Location update coordinator.
//!
//! Keeps exactly one subscription to a host location stream alive while its
//! preconditions hold (permission granted, a provider enabled, updates
//! wanted), and republishes fixes and reverse-geocoded addresses to observers.
//!
//! ## Architecture
//!
//! - [`provider`] - Edge-triggered provider availability
//! - [`permission`] - Permission checks, prompts and result filtering
//! - [`controller`] - The Idle/Active subscription state machine
//! - [`publisher`] - Latest fix/address publication with stale-lookup discarding
//! - [`lifecycle`] - Foreground/background adapter
//! - [`coordinator`] - Public entry point composing all of the above
//! - [`host`] - Capability traits the host implements
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared value types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

/// Emit a `tracing` debug event only when debug logging is switched on.
macro_rules! debug_log {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            ::tracing::debug!($($arg)+);
        }
    };
}

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod observer;
pub mod permission;
pub mod provider;
pub mod publisher;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod types;

// Re-export primary types for convenience
pub use self::config::{
    default_config_path, BackgroundPolicy, ConfigError, ConfigResult, CoordinatorConfig,
};
pub use controller::{SubscriptionState, Transition, Trigger};
pub use coordinator::LocationCoordinator;
pub use error::{LocwatchError, Result};
pub use host::{
    Advisor, Advisory, GrantResult, HostCapabilities, LocationClient, LocationSink,
    PermissionHost, PermissionStatus, ProviderRegistry, RequestCode, ReverseGeocoder, StartError,
    UpdateHandle, LOCATION_PERMISSION, PERMISSION_REQUEST_CODE,
};
pub use lifecycle::{LifecycleEvent, UnitId};
pub use observer::ObserverId;
pub use types::{Address, Coordinates, LocationResult, LocationSample, Priority, Provider};
