//! Simulated device backing the demo.
//!
//! Wraps the in-memory host capabilities and walks a fixed route so the
//! coordinator has something to report.

use std::sync::Arc;

use locwatch_core::host::LogAdvisor;
use locwatch_core::sim::{SimGeocoder, SimLocationClient, SimPermissionHost, SimProviderRegistry};
use locwatch_core::{HostCapabilities, LocationResult, LocationSample, PermissionStatus};

/// Starting point of the simulated walk (Piazza del Duomo, Milan).
const ORIGIN: (f64, f64) = (45.464_2, 9.190_0);

/// Degrees moved per step.
const STEP_DEG: f64 = 0.000_4;

/// In-memory device: provider switches, permission state and a location feed.
pub struct SimulatedDevice {
    pub registry: Arc<SimProviderRegistry>,
    pub client: Arc<SimLocationClient>,
    pub permissions: Arc<SimPermissionHost>,
    pub geocoder: Arc<SimGeocoder>,
    step: u32,
}

impl SimulatedDevice {
    /// A device with every provider on and the permission not yet asked for.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(SimProviderRegistry::all_enabled()),
            client: Arc::new(SimLocationClient::default()),
            permissions: Arc::new(SimPermissionHost::default()),
            geocoder: Arc::new(SimGeocoder::default()),
            step: 0,
        }
    }

    /// Capabilities to hand to the coordinator.
    pub fn capabilities(&self) -> HostCapabilities {
        HostCapabilities {
            providers: self.registry.clone(),
            location: self.client.clone(),
            permissions: self.permissions.clone(),
            geocoder: Some(self.geocoder.clone()),
            advisor: Arc::new(LogAdvisor),
        }
    }

    /// The user answered the permission prompt.
    pub fn answer_prompt(&self, granted: bool) {
        self.permissions.set_status(if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        });
    }

    /// Emit the next fix on the route. Every fifth step the device reports
    /// a result without a fix. Returns `false` when nothing is subscribed.
    pub fn tick(&mut self) -> bool {
        self.step += 1;
        if self.step % 5 == 0 {
            return self.client.emit(Some(LocationResult::default()));
        }
        let offset = f64::from(self.step) * STEP_DEG;
        let sample = LocationSample::at(ORIGIN.0 + offset, ORIGIN.1 - offset / 2.0)
            .with_accuracy(5.0 + (self.step % 3) as f32);
        self.client.emit(Some(LocationResult::of(sample)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locwatch_core::{CoordinatorConfig, LocationCoordinator, SubscriptionState};

    #[tokio::test]
    async fn test_device_feeds_coordinator_after_grant() {
        let mut device = SimulatedDevice::new();
        let coordinator =
            LocationCoordinator::init(CoordinatorConfig::default(), device.capabilities())
                .unwrap();
        assert_eq!(coordinator.state(), SubscriptionState::Idle);
        assert!(!device.tick());

        device.answer_prompt(true);
        assert!(coordinator.request_updates().is_ok());
        assert!(device.tick());
        coordinator.settled().await;
        assert!(coordinator.latest_location().is_some());
        assert!(coordinator.latest_address().is_some());
    }
}
