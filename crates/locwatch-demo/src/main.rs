//! # locwatch-demo
//!
//! Sample application for the locwatch coordinator.
//!
//! Wires a [`LocationCoordinator`] to a simulated device, prompts for the
//! location permission, walks a short route and prints every fix and address
//! the coordinator publishes. Halfway through, location services are switched
//! off and back on to show the subscription being dropped and restored.
//!
//! ## Environment Variables
//!
//! - `LOCWATCH_CONFIG`: Optional. Path to a TOML configuration file
//! - `LOCWATCH_PRODUCTION`: Optional. `1`/`true` for JSON file logging
//! - `LOCWATCH_LOG_LEVEL`: Optional. Log filter (default: info)
//! - `LOCWATCH_LOG_DIR`: Optional. Production log directory
//! - `LOCWATCH_DEMO_SAMPLES`: Optional. Number of route steps (default: 12)
//! - `LOCWATCH_*`: Any coordinator setting, e.g. `LOCWATCH_UPDATE_INTERVAL_MS=1000`

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use locwatch_core::{
    default_config_path, CoordinatorConfig, GrantResult, LifecycleEvent, LocationCoordinator,
    UnitId, LOCATION_PERMISSION, PERMISSION_REQUEST_CODE,
};
use tracing::{info, warn};

mod device;
mod logging;

use device::SimulatedDevice;

/// Environment variable names
mod env_vars {
    pub const CONFIG: &str = "LOCWATCH_CONFIG";
    pub const PRODUCTION: &str = "LOCWATCH_PRODUCTION";
    pub const SAMPLES: &str = "LOCWATCH_DEMO_SAMPLES";
}

/// Default configuration values
mod defaults {
    pub const SAMPLES: u32 = 12;
    pub const PROMPT_DELAY_MS: u64 = 500;
}

/// The single UI unit of the demo.
const MAIN_SCREEN: UnitId = UnitId(1);

fn config_path() -> Result<PathBuf> {
    match std::env::var(env_vars::CONFIG) {
        Ok(path) => Ok(PathBuf::from(path)),
        Err(_) => default_config_path().context("resolving default config path"),
    }
}

fn is_production() -> bool {
    std::env::var(env_vars::PRODUCTION)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn sample_count() -> u32 {
    std::env::var(env_vars::SAMPLES)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(defaults::SAMPLES)
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path()?;
    let config = CoordinatorConfig::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    let default_level = if config.debug_logging { "debug" } else { "info" };
    logging::init(is_production(), default_level)?;

    info!(config = %path.display(), "Starting locwatch-demo");

    let mut device = SimulatedDevice::new();
    let coordinator = LocationCoordinator::init(config.clone(), device.capabilities())?;

    coordinator.subscribe_location(|sample| match sample {
        Some(sample) => info!(
            fix = %serde_json::to_string(sample).unwrap_or_default(),
            "Location"
        ),
        None => warn!("Location unavailable"),
    });
    coordinator.subscribe_address(|address| match address {
        Some(address) => info!(%address, "Address"),
        None => info!("Address unknown"),
    });

    coordinator.on_lifecycle_event(MAIN_SCREEN, LifecycleEvent::Resumed);

    match coordinator.request_updates() {
        Ok(transition) => info!(?transition, "Location updates requested"),
        Err(e) if e.is_expected_state() => info!(code = e.error_code(), "Waiting: {e}"),
        Err(e) if e.is_host_error() => {
            warn!(code = e.error_code(), error = %e, "Host refused location updates");
        }
        Err(e) => return Err(e.into()),
    }

    if coordinator.request_permission_if_needed() {
        info!("Waiting for the user to answer the permission prompt");
        tokio::time::sleep(Duration::from_millis(defaults::PROMPT_DELAY_MS)).await;
        device.answer_prompt(true);
        let handled = coordinator.handle_permission_result(
            PERMISSION_REQUEST_CODE,
            &[LOCATION_PERMISSION],
            &[GrantResult::Granted],
        );
        info!(handled, state = ?coordinator.state(), "Permission answered");
    }

    let samples = sample_count();
    let mut ticker = tokio::time::interval(config.update_interval());
    for step in 1..=samples {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        if step == samples / 2 {
            info!("Switching location services off");
            device.registry.set_all(false);
            coordinator.on_providers_changed();
        } else if step == samples / 2 + 1 {
            info!("Switching location services back on");
            device.registry.set_all(true);
            coordinator.on_providers_changed();
        }

        if !device.tick() {
            info!(step, state = ?coordinator.state(), "No subscription, fix not delivered");
        }
    }

    coordinator.on_lifecycle_event(MAIN_SCREEN, LifecycleEvent::Paused);
    coordinator.shutdown();
    coordinator.settled().await;

    info!(
        starts = device.client.start_calls(),
        stops = device.client.stop_calls(),
        lookups = device.geocoder.lookups(),
        "Demo finished"
    );
    Ok(())
}
