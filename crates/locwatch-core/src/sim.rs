//! Simulated host capabilities.
//!
//! In-memory implementations of every [`crate::host`] trait. They record the
//! calls they receive, which makes them suitable both for tests and for the
//! demo application where no real platform is available.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::host::{
    Advisor, Advisory, GeocodeError, HostError, LocationClient, LocationSink, PermissionHost,
    PermissionStatus, ProviderRegistry, RequestCode, ReverseGeocoder, StartError, UpdateHandle,
};
use crate::types::{Address, Coordinates, LocationResult, Provider, UpdateRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// PROVIDERS
// =============================================================================

/// Provider registry whose flags are set by hand.
#[derive(Debug, Default)]
pub struct SimProviderRegistry {
    enabled: Mutex<HashMap<Provider, bool>>,
    failing: AtomicBool,
}

impl SimProviderRegistry {
    /// Registry with every provider switched on.
    #[must_use]
    pub fn all_enabled() -> Self {
        let registry = Self::default();
        for provider in Provider::ALL {
            registry.set_enabled(provider, true);
        }
        registry
    }

    /// Switch `provider` on or off.
    pub fn set_enabled(&self, provider: Provider, enabled: bool) {
        lock(&self.enabled).insert(provider, enabled);
    }

    /// Switch every provider on or off.
    pub fn set_all(&self, enabled: bool) {
        for provider in Provider::ALL {
            self.set_enabled(provider, enabled);
        }
    }

    /// Make every query fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ProviderRegistry for SimProviderRegistry {
    fn is_provider_enabled(&self, provider: Provider) -> Result<bool, HostError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HostError::new("simulated registry failure"));
        }
        Ok(lock(&self.enabled).get(&provider).copied().unwrap_or(false))
    }
}

// =============================================================================
// LOCATION STREAM
// =============================================================================

#[derive(Debug, Default)]
struct ClientState {
    active: Option<(UpdateHandle, LocationSink)>,
    next_handle: u64,
    start_calls: usize,
    stop_calls: usize,
    fail_next: Option<StartError>,
    last_request: Option<UpdateRequest>,
}

/// Location client that records start/stop calls and lets the caller push
/// results into the active registration with [`SimLocationClient::emit`].
#[derive(Debug, Default)]
pub struct SimLocationClient {
    state: Mutex<ClientState>,
}

impl SimLocationClient {
    /// Make the next `start_updates` call fail with `error`.
    pub fn fail_next_start(&self, error: StartError) {
        lock(&self.state).fail_next = Some(error);
    }

    /// Number of `start_updates` calls, successful or not.
    pub fn start_calls(&self) -> usize {
        lock(&self.state).start_calls
    }

    /// Number of `stop_updates` calls.
    pub fn stop_calls(&self) -> usize {
        lock(&self.state).stop_calls
    }

    /// Whether a registration is active.
    pub fn is_streaming(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    /// The request passed to the most recent `start_updates`.
    pub fn last_request(&self) -> Option<UpdateRequest> {
        lock(&self.state).last_request
    }

    /// Deliver `result` to the active registration.
    /// Returns `false` if nothing is registered.
    pub fn emit(&self, result: Option<LocationResult>) -> bool {
        let sink = lock(&self.state).active.as_ref().map(|(_, sink)| sink.clone());
        match sink {
            Some(sink) => {
                sink.deliver(result);
                true
            }
            None => false,
        }
    }
}

impl LocationClient for SimLocationClient {
    fn start_updates(
        &self,
        request: &UpdateRequest,
        sink: LocationSink,
    ) -> Result<UpdateHandle, StartError> {
        let mut state = lock(&self.state);
        state.start_calls += 1;
        state.last_request = Some(*request);
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state.next_handle += 1;
        let handle = UpdateHandle(state.next_handle);
        state.active = Some((handle, sink));
        Ok(handle)
    }

    fn stop_updates(&self, handle: UpdateHandle) {
        let mut state = lock(&self.state);
        state.stop_calls += 1;
        if state.active.as_ref().is_some_and(|(h, _)| *h == handle) {
            state.active = None;
        }
    }
}

// =============================================================================
// PERMISSIONS
// =============================================================================

/// Permission host with a settable status and a log of prompts.
#[derive(Debug)]
pub struct SimPermissionHost {
    status: Mutex<PermissionStatus>,
    requests: Mutex<Vec<(String, RequestCode)>>,
}

impl Default for SimPermissionHost {
    fn default() -> Self {
        Self {
            status: Mutex::new(PermissionStatus::Unknown),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl SimPermissionHost {
    /// Set the status reported by `check`.
    pub fn set_status(&self, status: PermissionStatus) {
        *lock(&self.status) = status;
    }

    /// Shorthand for granted/denied.
    pub fn set_granted(&self, granted: bool) {
        self.set_status(if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        });
    }

    /// Prompts issued so far.
    pub fn requests(&self) -> Vec<(String, RequestCode)> {
        lock(&self.requests).clone()
    }
}

impl PermissionHost for SimPermissionHost {
    fn check(&self, _permission: &str) -> PermissionStatus {
        *lock(&self.status)
    }

    fn request(&self, permission: &str, request_code: RequestCode) {
        lock(&self.requests).push((permission.to_string(), request_code));
    }
}

// =============================================================================
// GEOCODER
// =============================================================================

/// Geocoder that names each position after its coordinates.
#[derive(Debug, Default)]
pub struct SimGeocoder {
    delays: Mutex<Vec<(Coordinates, Duration)>>,
    failing: AtomicBool,
    empty: AtomicBool,
    lookups: AtomicUsize,
}

impl SimGeocoder {
    /// Block lookups for `coordinates` for `delay` before answering.
    pub fn delay_for(&self, coordinates: Coordinates, delay: Duration) {
        lock(&self.delays).push((coordinates, delay));
    }

    /// Make every lookup fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every lookup return no addresses.
    pub fn set_empty(&self, empty: bool) {
        self.empty.store(empty, Ordering::SeqCst);
    }

    /// Number of lookups performed.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// The address this geocoder produces for `coordinates`.
    #[must_use]
    pub fn address_for(coordinates: Coordinates) -> Address {
        Address {
            lines: vec![format!("Point {coordinates}")],
            locality: Some("Simulated".to_string()),
            country_code: Some("ZZ".to_string()),
            coordinates: Some(coordinates),
            ..Address::default()
        }
    }
}

impl ReverseGeocoder for SimGeocoder {
    fn lookup(
        &self,
        coordinates: Coordinates,
        max_results: usize,
    ) -> Result<Vec<Address>, GeocodeError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = lock(&self.delays)
            .iter()
            .find(|(c, _)| *c == coordinates)
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(GeocodeError::ServiceUnavailable("simulated outage".into()));
        }
        if self.empty.load(Ordering::SeqCst) || max_results == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![Self::address_for(coordinates)])
    }
}

// =============================================================================
// ADVISOR
// =============================================================================

/// Advisor that remembers what it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingAdvisor {
    shown: Mutex<Vec<Advisory>>,
}

impl RecordingAdvisor {
    /// Advisories shown so far.
    pub fn advisories(&self) -> Vec<Advisory> {
        lock(&self.shown).clone()
    }
}

impl Advisor for RecordingAdvisor {
    fn advise(&self, advisory: Advisory) {
        tracing::warn!("{}", advisory.message());
        lock(&self.shown).push(advisory);
    }
}
