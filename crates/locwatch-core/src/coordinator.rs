//! The location coordinator: the public entry point of the crate.
//!
//! A [`LocationCoordinator`] is an ordinary value owned by whoever composes
//! the application. Several independent coordinators may coexist, each bound
//! to its own [`HostCapabilities`].

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use crate::config::CoordinatorConfig;
use crate::controller::{
    ControllerParts, SubscriptionController, SubscriptionState, Transition, Trigger,
};
use crate::error::{LocwatchError, Result};
use crate::host::{GrantResult, HostCapabilities, LocationSink, RequestCode};
use crate::lifecycle::{LifecycleBinder, LifecycleEvent, UnitId};
use crate::observer::ObserverId;
use crate::permission::{PermissionGate, PermissionOutcome};
use crate::provider::ProviderAvailabilityWatcher;
use crate::publisher::UpdatePublisher;
use crate::types::{Address, LocationSample};

/// Subscribes to device location and republishes fixes and addresses.
#[derive(Debug)]
pub struct LocationCoordinator {
    config: CoordinatorConfig,
    permissions: Arc<PermissionGate>,
    watcher: Arc<ProviderAvailabilityWatcher>,
    controller: Arc<SubscriptionController>,
    publisher: Arc<UpdatePublisher>,
    lifecycle: LifecycleBinder,
}

impl LocationCoordinator {
    /// Build a coordinator on the current tokio runtime.
    ///
    /// Location updates start immediately if permission is already granted
    /// and a provider is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or no tokio runtime is running.
    pub fn init(config: CoordinatorConfig, host: HostCapabilities) -> Result<Self> {
        let runtime =
            Handle::try_current().map_err(|e| LocwatchError::RuntimeUnavailable(e.to_string()))?;
        Self::init_with_runtime(config, host, runtime)
    }

    /// Build a coordinator that spawns address lookups on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn init_with_runtime(
        config: CoordinatorConfig,
        host: HostCapabilities,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let debug = config.debug_logging;

        let publisher = UpdatePublisher::new(
            host.geocoder.clone(),
            config.max_address_results,
            runtime,
            debug,
        );
        let permissions = Arc::new(PermissionGate::new(host.permissions.clone(), debug));
        let watcher = Arc::new(ProviderAvailabilityWatcher::new(
            host.providers.clone(),
            debug,
        ));
        let controller = SubscriptionController::new(ControllerParts {
            client: host.location.clone(),
            permissions: Arc::clone(&permissions),
            providers: Arc::clone(&watcher),
            advisor: host.advisor.clone(),
            request: config.update_request(),
            sink: publisher.sink(),
            policy: config.background_policy,
            debug_logging: debug,
        });
        let lifecycle = LifecycleBinder::new(Arc::clone(&watcher), Arc::clone(&controller), debug);

        info!(
            interval_ms = config.update_interval_ms,
            priority = ?config.priority,
            state = ?controller.state(),
            "Location coordinator initialized"
        );

        Ok(Self {
            config,
            permissions,
            watcher,
            controller,
            publisher,
            lifecycle,
        })
    }

    /// Active configuration.
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Current subscription state.
    pub fn state(&self) -> SubscriptionState {
        self.controller.state()
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Observe fixes. `None` means the host reported a result without a fix.
    /// The latest fix, if any, is delivered before this returns.
    pub fn subscribe_location<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Option<LocationSample>) + Send + Sync + 'static,
    {
        self.publisher.subscribe_location(Arc::new(observer))
    }

    /// Stop observing fixes. Idempotent.
    pub fn unsubscribe_location(&self, id: ObserverId) -> bool {
        self.publisher.unsubscribe_location(id)
    }

    /// Observe resolved addresses. `None` means no address for the latest fix.
    /// The latest address, if any, is delivered before this returns.
    pub fn subscribe_address<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Option<Address>) + Send + Sync + 'static,
    {
        self.publisher.subscribe_address(Arc::new(observer))
    }

    /// Stop observing addresses. Idempotent.
    pub fn unsubscribe_address(&self, id: ObserverId) -> bool {
        self.publisher.unsubscribe_address(id)
    }

    /// Latest published fix.
    pub fn latest_location(&self) -> Option<LocationSample> {
        self.publisher.latest_location().flatten()
    }

    /// Latest published address.
    pub fn latest_address(&self) -> Option<Address> {
        self.publisher.latest_address().flatten()
    }

    /// Wait for in-flight address lookups to finish.
    pub async fn settled(&self) {
        self.publisher.settled().await;
    }

    // -------------------------------------------------------------------------
    // Permission
    // -------------------------------------------------------------------------

    /// Prompt for the location permission unless already granted.
    /// Returns whether a prompt was issued.
    pub fn request_permission_if_needed(&self) -> bool {
        self.permissions.request_permission_if_needed()
    }

    /// Feed a permission result from the host.
    ///
    /// Returns `false` if the result belongs to a different request, so the
    /// caller can pass it on to other handlers.
    pub fn handle_permission_result(
        &self,
        request_code: RequestCode,
        permissions: &[&str],
        grant_results: &[GrantResult],
    ) -> bool {
        match self
            .permissions
            .on_permission_result(request_code, permissions, grant_results)
        {
            None => false,
            Some(PermissionOutcome::Granted) => {
                self.controller.evaluate(Trigger::PermissionGranted);
                true
            }
            Some(PermissionOutcome::Denied) => {
                self.controller.evaluate(Trigger::PermissionDenied);
                true
            }
            Some(PermissionOutcome::Dismissed) => true,
        }
    }

    // -------------------------------------------------------------------------
    // Host events
    // -------------------------------------------------------------------------

    /// Feed a foreground/background transition of a UI unit.
    pub fn on_lifecycle_event(&self, unit: UnitId, event: LifecycleEvent) -> Transition {
        self.lifecycle.on_event(unit, event)
    }

    /// Feed a provider-change broadcast. Ignored while no UI unit is in the
    /// foreground.
    pub fn on_providers_changed(&self) {
        self.watcher.on_providers_changed();
    }

    /// The sink handed to the host location client on start. Exposed for
    /// hosts that deliver results through a channel of their own.
    pub fn location_sink(&self) -> LocationSink {
        self.publisher.sink()
    }

    // -------------------------------------------------------------------------
    // Explicit control
    // -------------------------------------------------------------------------

    /// Want location updates again after [`Self::shutdown`].
    ///
    /// Updates stay wanted even when this returns an error: the subscription
    /// starts by itself once the missing precondition is met.
    ///
    /// # Errors
    ///
    /// Returns [`LocwatchError::PermissionMissing`] or
    /// [`LocwatchError::ProvidersDisabled`] if updates cannot start yet, and
    /// [`LocwatchError::StartFailed`] if the host refused the registration.
    pub fn request_updates(&self) -> Result<Transition> {
        match self.controller.set_desired(true) {
            Transition::StartFailed(e) => Err(e.into()),
            transition if self.controller.is_active() => Ok(transition),
            _ if !self.permissions.has_permission() => Err(LocwatchError::PermissionMissing),
            _ if !self.watcher.is_available() => Err(LocwatchError::ProvidersDisabled),
            transition => Ok(transition),
        }
    }

    /// Stop location updates until [`Self::request_updates`]. In-flight
    /// address lookups still complete.
    pub fn shutdown(&self) -> Transition {
        info!("Location coordinator shutting down");
        self.controller.set_desired(false)
    }
}

impl Drop for LocationCoordinator {
    fn drop(&mut self) {
        self.watcher.unregister_for_changes();
        if self.controller.is_active() {
            self.controller.set_desired(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{PermissionStatus, StartError, PERMISSION_REQUEST_CODE, LOCATION_PERMISSION};
    use crate::sim::{RecordingAdvisor, SimGeocoder, SimLocationClient, SimPermissionHost, SimProviderRegistry};

    fn host(
        client: &Arc<SimLocationClient>,
        permissions: &Arc<SimPermissionHost>,
    ) -> HostCapabilities {
        HostCapabilities {
            providers: Arc::new(SimProviderRegistry::all_enabled()),
            location: client.clone(),
            permissions: permissions.clone(),
            geocoder: Some(Arc::new(SimGeocoder::default())),
            advisor: Arc::new(RecordingAdvisor::default()),
        }
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let client = Arc::new(SimLocationClient::default());
        let permissions = Arc::new(SimPermissionHost::default());
        let config = CoordinatorConfig {
            update_interval_ms: 0,
            ..CoordinatorConfig::default()
        };
        let err = LocationCoordinator::init(config, host(&client, &permissions)).unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(client.start_calls(), 0);
    }

    #[test]
    fn test_init_requires_runtime() {
        let client = Arc::new(SimLocationClient::default());
        let permissions = Arc::new(SimPermissionHost::default());
        let err = LocationCoordinator::init(CoordinatorConfig::default(), host(&client, &permissions))
            .unwrap_err();
        assert!(matches!(err, LocwatchError::RuntimeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_request_is_built_from_config() {
        let client = Arc::new(SimLocationClient::default());
        let permissions = Arc::new(SimPermissionHost::default());
        permissions.set_status(PermissionStatus::Granted);
        let config = CoordinatorConfig {
            update_interval_ms: 1_000,
            ..CoordinatorConfig::default()
        };
        let _coordinator = LocationCoordinator::init(config, host(&client, &permissions)).unwrap();
        let request = client.last_request().unwrap();
        assert_eq!(request.interval, std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_dismissed_prompt_is_handled_without_transition() {
        let client = Arc::new(SimLocationClient::default());
        let permissions = Arc::new(SimPermissionHost::default());
        let coordinator =
            LocationCoordinator::init(CoordinatorConfig::default(), host(&client, &permissions))
                .unwrap();
        assert!(coordinator.handle_permission_result(PERMISSION_REQUEST_CODE, &[LOCATION_PERMISSION], &[]));
        assert_eq!(client.start_calls(), 0);
    }

    #[tokio::test]
    async fn test_request_updates_reports_missing_preconditions() {
        let client = Arc::new(SimLocationClient::default());
        let permissions = Arc::new(SimPermissionHost::default());
        let coordinator =
            LocationCoordinator::init(CoordinatorConfig::default(), host(&client, &permissions))
                .unwrap();

        let err = coordinator.request_updates().unwrap_err();
        assert!(matches!(err, LocwatchError::PermissionMissing));
        assert!(err.is_expected_state());

        permissions.set_status(PermissionStatus::Granted);
        assert!(matches!(
            coordinator.request_updates(),
            Ok(Transition::Started(_))
        ));
        assert!(matches!(
            coordinator.request_updates(),
            Ok(Transition::Unchanged)
        ));
    }

    #[tokio::test]
    async fn test_request_updates_surfaces_start_failure() {
        let client = Arc::new(SimLocationClient::default());
        let permissions = Arc::new(SimPermissionHost::default());
        permissions.set_status(PermissionStatus::Granted);
        client.fail_next_start(StartError::Unavailable("client not connected".into()));
        let coordinator =
            LocationCoordinator::init(CoordinatorConfig::default(), host(&client, &permissions))
                .unwrap();
        assert_eq!(coordinator.state(), SubscriptionState::Idle);

        coordinator.shutdown();
        client.fail_next_start(StartError::Unavailable("client not connected".into()));
        let err = coordinator.request_updates().unwrap_err();
        assert_eq!(err.error_code(), "START_FAILED");
        assert!(err.is_host_error());
        assert!(!err.is_expected_state());
    }

    #[tokio::test]
    async fn test_drop_stops_updates() {
        let client = Arc::new(SimLocationClient::default());
        let permissions = Arc::new(SimPermissionHost::default());
        permissions.set_status(PermissionStatus::Granted);
        let coordinator =
            LocationCoordinator::init(CoordinatorConfig::default(), host(&client, &permissions))
                .unwrap();
        assert!(client.is_streaming());
        drop(coordinator);
        assert!(!client.is_streaming());
    }
}
