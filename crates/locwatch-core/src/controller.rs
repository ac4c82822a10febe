//! Subscription state machine.
//!
//! Decides, from permission, provider availability, the `desired` flag and
//! (under [`BackgroundPolicy::PauseUpdates`]) foreground state, whether the
//! single host location subscription should exist, and issues the matching
//! start/stop calls.
//!
//! Evaluations are serialized. A caller claims the evaluation under a short
//! mutex, then queries the host and issues start/stop calls with the mutex
//! released, so a host that delivers a fix from inside `start_updates` can
//! call back into the coordinator. A trigger that arrives while another
//! evaluation is running is folded into it: the running caller evaluates
//! once more before giving up the claim. Two racing triggers (say a
//! provider-enabled broadcast and a permission grant) therefore issue at most
//! one start.
//!
//! Permission and provider availability are always read live from the host;
//! a received denial is the only trigger value that overrides them.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{info, warn};

use crate::config::BackgroundPolicy;
use crate::host::{Advisor, Advisory, LocationClient, LocationSink, StartError, UpdateHandle};
use crate::permission::PermissionGate;
use crate::provider::{AvailabilityListener, ProviderAvailabilityWatcher};
use crate::types::UpdateRequest;

/// Whether a host subscription currently exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not subscribed.
    Idle,
    /// Subscribed to the host location stream.
    Active,
}

/// The event that caused an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// First evaluation at construction.
    Init,
    /// A permission grant was received.
    PermissionGranted,
    /// A permission denial was received.
    PermissionDenied,
    /// Providers became available.
    ProvidersEnabled,
    /// Providers became unavailable.
    ProvidersDisabled,
    /// A UI unit entered the foreground.
    Foreground,
    /// The last UI unit left the foreground.
    Background,
    /// The application asked for updates.
    RequestUpdates,
    /// The application asked to stop for good.
    Shutdown,
}

impl Trigger {
    /// Triggers on which an unmet provider precondition is worth telling the user about.
    const fn is_start_attempt(self) -> bool {
        matches!(
            self,
            Self::Init
                | Self::PermissionGranted
                | Self::ProvidersEnabled
                | Self::Foreground
                | Self::RequestUpdates
        )
    }
}

/// Snapshot of the transition inputs for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inputs {
    /// Location permission is granted.
    pub permission_granted: bool,
    /// At least one provider is enabled.
    pub providers_available: bool,
    /// The application wants updates.
    pub desired: bool,
    /// Foreground precondition holds (always true under `KeepUpdates`).
    pub foreground_ok: bool,
}

impl Inputs {
    /// Whether these inputs call for an active subscription.
    #[must_use]
    pub const fn should_be_active(&self) -> bool {
        self.permission_granted && self.providers_available && self.desired && self.foreground_ok
    }
}

/// What an evaluation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `Idle -> Active`: one start call was issued.
    Started(UpdateHandle),
    /// `Active -> Idle`: one stop call was issued.
    Stopped,
    /// The host refused to start; still `Idle`.
    StartFailed(StartError),
    /// No host call was made.
    Unchanged,
}

struct ControllerState {
    handle: Option<UpdateHandle>,
    starting: bool,
    desired: bool,
    in_foreground: bool,
    advised: bool,
    evaluating: bool,
    rerun: Option<Trigger>,
}

/// Host call decided under the lock and made after releasing it.
enum Action {
    Start,
    Stop(UpdateHandle),
    Keep,
    Wait { advise: bool },
}

/// Releases the evaluation claim if a host call panics.
struct EvaluationGuard<'a>(&'a SubscriptionController);

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.0.lock();
            state.evaluating = false;
            state.starting = false;
            state.rerun = None;
        }
    }
}

/// Owns the single host location subscription.
pub struct SubscriptionController {
    client: Arc<dyn LocationClient>,
    permissions: Arc<PermissionGate>,
    providers: Arc<ProviderAvailabilityWatcher>,
    advisor: Arc<dyn Advisor>,
    request: UpdateRequest,
    sink: LocationSink,
    policy: BackgroundPolicy,
    state: Mutex<ControllerState>,
    debug_logging: bool,
}

/// Parts a [`SubscriptionController`] is assembled from.
pub struct ControllerParts {
    /// Host location stream.
    pub client: Arc<dyn LocationClient>,
    /// Permission checks.
    pub permissions: Arc<PermissionGate>,
    /// Provider availability.
    pub providers: Arc<ProviderAvailabilityWatcher>,
    /// User-facing notices.
    pub advisor: Arc<dyn Advisor>,
    /// Request handed to the host on start.
    pub request: UpdateRequest,
    /// Where the host delivers results.
    pub sink: LocationSink,
    /// Background behavior.
    pub policy: BackgroundPolicy,
    /// Emit per-decision debug events.
    pub debug_logging: bool,
}

impl SubscriptionController {
    /// Build the controller and run the entry evaluation, so a subscription
    /// starts right away if permission and providers are already in place.
    pub fn new(parts: ControllerParts) -> Arc<Self> {
        let controller = Arc::new(Self {
            client: parts.client,
            permissions: parts.permissions,
            providers: parts.providers,
            advisor: parts.advisor,
            request: parts.request,
            sink: parts.sink,
            policy: parts.policy,
            state: Mutex::new(ControllerState {
                handle: None,
                starting: false,
                desired: true,
                in_foreground: false,
                advised: false,
                evaluating: false,
                rerun: None,
            }),
            debug_logging: parts.debug_logging,
        });
        controller.evaluate(Trigger::Init);
        controller
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. A start that has been decided but not yet answered by
    /// the host counts as active.
    pub fn state(&self) -> SubscriptionState {
        let state = self.lock();
        if state.handle.is_some() || state.starting {
            SubscriptionState::Active
        } else {
            SubscriptionState::Idle
        }
    }

    /// Whether a subscription is active.
    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// Whether updates are currently wanted.
    pub fn is_desired(&self) -> bool {
        self.lock().desired
    }

    /// Set the `desired` flag and re-evaluate.
    pub fn set_desired(&self, desired: bool) -> Transition {
        self.lock().desired = desired;
        self.evaluate(if desired {
            Trigger::RequestUpdates
        } else {
            Trigger::Shutdown
        })
    }

    /// Record foreground state and re-evaluate.
    pub fn set_foreground(&self, in_foreground: bool) -> Transition {
        self.record_foreground(in_foreground);
        self.evaluate(if in_foreground {
            Trigger::Foreground
        } else {
            Trigger::Background
        })
    }

    /// Record foreground state without evaluating.
    pub fn record_foreground(&self, in_foreground: bool) {
        self.lock().in_foreground = in_foreground;
    }

    fn inputs(&self, trigger: Trigger) -> Inputs {
        let permission_granted =
            trigger != Trigger::PermissionDenied && self.permissions.has_permission();
        let providers_available = self.providers.is_available();
        let state = self.lock();
        let foreground_ok = match self.policy {
            BackgroundPolicy::KeepUpdates => true,
            BackgroundPolicy::PauseUpdates => state.in_foreground,
        };
        Inputs {
            permission_granted,
            providers_available,
            desired: state.desired,
            foreground_ok,
        }
    }

    /// Run the transition function for `trigger`.
    ///
    /// Returns what this call did. If another evaluation is running, the
    /// trigger is handed to it and this returns [`Transition::Unchanged`].
    pub fn evaluate(&self, trigger: Trigger) -> Transition {
        {
            let mut state = self.lock();
            if state.evaluating {
                state.rerun = Some(trigger);
                debug_log!(self.debug_logging, ?trigger, "evaluation deferred to running one");
                return Transition::Unchanged;
            }
            state.evaluating = true;
        }

        let _guard = EvaluationGuard(self);
        let outcome = self.step(trigger);
        loop {
            let next = {
                let mut state = self.lock();
                let next = state.rerun.take();
                if next.is_none() {
                    state.evaluating = false;
                }
                next
            };
            match next {
                Some(trigger) => {
                    self.step(trigger);
                }
                None => return outcome,
            }
        }
    }

    fn step(&self, trigger: Trigger) -> Transition {
        let inputs = self.inputs(trigger);
        let action = {
            let mut state = self.lock();
            if inputs.providers_available {
                state.advised = false;
            }
            match (state.handle, inputs.should_be_active()) {
                (None, true) => {
                    state.starting = true;
                    Action::Start
                }
                (Some(handle), false) => {
                    state.handle = None;
                    Action::Stop(handle)
                }
                (Some(_), true) => Action::Keep,
                (None, false) => {
                    let providers_only_blocker = inputs.permission_granted
                        && inputs.desired
                        && inputs.foreground_ok
                        && !inputs.providers_available;
                    let advise =
                        providers_only_blocker && trigger.is_start_attempt() && !state.advised;
                    if advise {
                        state.advised = true;
                    }
                    Action::Wait { advise }
                }
            }
        };

        match action {
            Action::Start => self.start(trigger),
            Action::Stop(handle) => {
                self.client.stop_updates(handle);
                info!(?trigger, ?inputs, "Location updates stopped");
                Transition::Stopped
            }
            Action::Keep => {
                debug_log!(
                    self.debug_logging,
                    ?trigger,
                    "start: called while currently requesting updates"
                );
                Transition::Unchanged
            }
            Action::Wait { advise } => {
                debug_log!(
                    self.debug_logging,
                    ?trigger,
                    ?inputs,
                    "stop: called while not requesting updates"
                );
                if advise {
                    self.advise_providers_disabled();
                }
                Transition::Unchanged
            }
        }
    }

    fn start(&self, trigger: Trigger) -> Transition {
        let result = self.client.start_updates(&self.request, self.sink.clone());
        let advise = {
            let mut state = self.lock();
            state.starting = false;
            match &result {
                Ok(handle) => {
                    state.handle = Some(*handle);
                    false
                }
                Err(e) => {
                    let advise = *e == StartError::ProvidersDisabled && !state.advised;
                    if advise {
                        state.advised = true;
                    }
                    advise
                }
            }
        };

        match result {
            Ok(handle) => {
                info!(?trigger, ?handle, "Location updates started");
                Transition::Started(handle)
            }
            Err(e) => {
                warn!(?trigger, error = %e, "start: skipping updates");
                if advise {
                    self.advise_providers_disabled();
                }
                Transition::StartFailed(e)
            }
        }
    }

    fn advise_providers_disabled(&self) {
        debug_log!(
            self.debug_logging,
            "start: skipping updates - all location providers disabled"
        );
        self.advisor.advise(Advisory::LocationServicesDisabled);
    }
}

impl fmt::Debug for SubscriptionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionController")
            .field("state", &self.state())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Forwards availability edges to a controller without keeping it alive.
pub struct ControllerListener(Weak<SubscriptionController>);

impl ControllerListener {
    /// Listen on behalf of `controller`.
    pub fn new(controller: &Arc<SubscriptionController>) -> Arc<Self> {
        Arc::new(Self(Arc::downgrade(controller)))
    }
}

impl AvailabilityListener for ControllerListener {
    fn on_providers_enabled(&self) {
        if let Some(controller) = self.0.upgrade() {
            controller.evaluate(Trigger::ProvidersEnabled);
        }
    }

    fn on_providers_disabled(&self) {
        if let Some(controller) = self.0.upgrade() {
            controller.evaluate(Trigger::ProvidersDisabled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::sim::{RecordingAdvisor, SimLocationClient, SimPermissionHost, SimProviderRegistry};
    use crate::types::{LocationResult, LocationSample, Provider};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    struct Fixture {
        client: Arc<SimLocationClient>,
        permissions: Arc<SimPermissionHost>,
        registry: Arc<SimProviderRegistry>,
        advisor: Arc<RecordingAdvisor>,
    }

    impl Fixture {
        fn new(granted: bool, providers: bool) -> Self {
            let permissions = Arc::new(SimPermissionHost::default());
            permissions.set_granted(granted);
            let registry = Arc::new(SimProviderRegistry::default());
            registry.set_enabled(Provider::Network, providers);
            Self {
                client: Arc::new(SimLocationClient::default()),
                permissions,
                registry,
                advisor: Arc::new(RecordingAdvisor::default()),
            }
        }

        fn controller(&self, policy: BackgroundPolicy) -> Arc<SubscriptionController> {
            SubscriptionController::new(ControllerParts {
                client: self.client.clone(),
                permissions: Arc::new(PermissionGate::new(self.permissions.clone(), false)),
                providers: Arc::new(ProviderAvailabilityWatcher::new(
                    self.registry.clone(),
                    false,
                )),
                advisor: self.advisor.clone(),
                request: CoordinatorConfig::default().update_request(),
                sink: LocationSink::new(|_| {}),
                policy,
                debug_logging: true,
            })
        }
    }

    #[test]
    fn test_entry_evaluation_starts_when_ready() {
        let fx = Fixture::new(true, true);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);
        assert_eq!(controller.state(), SubscriptionState::Active);
        assert_eq!(fx.client.start_calls(), 1);
    }

    #[test]
    fn test_idempotent_start_and_stop() {
        let fx = Fixture::new(true, true);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);

        assert_eq!(controller.evaluate(Trigger::RequestUpdates), Transition::Unchanged);
        assert_eq!(controller.evaluate(Trigger::ProvidersEnabled), Transition::Unchanged);
        assert_eq!(fx.client.start_calls(), 1);

        fx.permissions.set_granted(false);
        assert_eq!(controller.evaluate(Trigger::PermissionDenied), Transition::Stopped);
        assert_eq!(controller.evaluate(Trigger::PermissionDenied), Transition::Unchanged);
        assert_eq!(controller.evaluate(Trigger::ProvidersDisabled), Transition::Unchanged);
        assert_eq!(fx.client.stop_calls(), 1);
    }

    #[test]
    fn test_start_failure_stays_idle() {
        let fx = Fixture::new(true, true);
        fx.client
            .fail_next_start(StartError::Unavailable("no client".into()));
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);
        assert_eq!(controller.state(), SubscriptionState::Idle);
        assert!(fx.advisor.advisories().is_empty());

        // Retried only on the next trigger.
        assert!(matches!(
            controller.evaluate(Trigger::Foreground),
            Transition::Started(_)
        ));
    }

    #[test]
    fn test_start_failure_with_disabled_providers_advises() {
        let fx = Fixture::new(true, true);
        fx.client.fail_next_start(StartError::ProvidersDisabled);
        let _controller = fx.controller(BackgroundPolicy::KeepUpdates);
        assert_eq!(
            fx.advisor.advisories(),
            vec![Advisory::LocationServicesDisabled]
        );
    }

    #[test]
    fn test_disabled_providers_advise_once() {
        let fx = Fixture::new(true, false);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);
        controller.evaluate(Trigger::Foreground);
        controller.evaluate(Trigger::RequestUpdates);
        assert_eq!(fx.advisor.advisories().len(), 1);
        assert_eq!(fx.client.start_calls(), 0);
    }

    #[test]
    fn test_denied_permission_does_not_advise() {
        let fx = Fixture::new(false, false);
        let _controller = fx.controller(BackgroundPolicy::KeepUpdates);
        assert!(fx.advisor.advisories().is_empty());
    }

    #[test]
    fn test_shutdown_clears_desired() {
        let fx = Fixture::new(true, true);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);
        assert_eq!(controller.set_desired(false), Transition::Stopped);
        assert!(!controller.is_desired());
        assert_eq!(controller.evaluate(Trigger::ProvidersEnabled), Transition::Unchanged);

        assert!(matches!(controller.set_desired(true), Transition::Started(_)));
        assert_eq!(fx.client.start_calls(), 2);
    }

    #[test]
    fn test_pause_policy_follows_foreground() {
        let fx = Fixture::new(true, true);
        let controller = fx.controller(BackgroundPolicy::PauseUpdates);
        assert_eq!(controller.state(), SubscriptionState::Idle);

        assert!(matches!(controller.set_foreground(true), Transition::Started(_)));
        assert_eq!(controller.set_foreground(false), Transition::Stopped);
    }

    #[test]
    fn test_keep_policy_ignores_background() {
        let fx = Fixture::new(true, true);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);
        assert_eq!(controller.set_foreground(false), Transition::Unchanged);
        assert!(controller.is_active());
    }

    #[test]
    fn test_state_tracks_latest_inputs_in_any_order() {
        let fx = Fixture::new(false, false);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);

        let steps = [
            (true, false),
            (true, true),
            (false, true),
            (false, false),
            (true, true),
            (true, false),
            (true, true),
        ];
        for (granted, enabled) in steps {
            fx.permissions.set_granted(granted);
            fx.registry.set_enabled(Provider::Network, enabled);
            controller.evaluate(Trigger::RequestUpdates);
            assert_eq!(controller.is_active(), granted && enabled);
        }
    }

    #[test]
    fn test_listener_does_not_outlive_controller() {
        let fx = Fixture::new(true, true);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);
        let listener = ControllerListener::new(&controller);
        drop(controller);
        listener.on_providers_disabled();
        assert_eq!(fx.client.stop_calls(), 0);
    }

    #[test]
    fn test_out_of_order_provider_edges_follow_live_state() {
        let fx = Fixture::new(true, false);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);

        // The newer "disabled" edge is handled before the older "enabled" one.
        assert_eq!(controller.evaluate(Trigger::ProvidersDisabled), Transition::Unchanged);
        assert_eq!(controller.evaluate(Trigger::ProvidersEnabled), Transition::Unchanged);
        assert_eq!(controller.state(), SubscriptionState::Idle);
        assert_eq!(fx.client.start_calls(), 0);
    }

    #[test]
    fn test_stale_grant_does_not_start_without_permission() {
        let fx = Fixture::new(false, true);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);
        assert_eq!(controller.evaluate(Trigger::PermissionGranted), Transition::Unchanged);
        assert_eq!(fx.client.start_calls(), 0);
    }

    /// Delivers a fix from inside `start_updates`, like hosts that replay
    /// their last known position on subscription.
    #[derive(Default)]
    struct EagerClient {
        starts: AtomicUsize,
    }

    impl LocationClient for EagerClient {
        fn start_updates(
            &self,
            _request: &UpdateRequest,
            sink: LocationSink,
        ) -> Result<UpdateHandle, StartError> {
            sink.deliver(Some(LocationResult::of(LocationSample::at(1.0, 2.0))));
            let n = self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(UpdateHandle(n as u64 + 1))
        }

        fn stop_updates(&self, _handle: UpdateHandle) {}
    }

    #[test]
    fn test_host_may_call_back_from_start() {
        let fx = Fixture::new(false, true);
        let slot: Arc<Mutex<Weak<SubscriptionController>>> = Arc::new(Mutex::new(Weak::new()));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let sink = {
            let slot = Arc::clone(&slot);
            let observed = Arc::clone(&observed);
            LocationSink::new(move |_| {
                let controller = slot.lock().unwrap().upgrade();
                if let Some(controller) = controller {
                    observed.lock().unwrap().push(controller.state());
                    // Re-entrant trigger is folded into the running evaluation.
                    assert_eq!(controller.evaluate(Trigger::RequestUpdates), Transition::Unchanged);
                }
            })
        };
        let client = Arc::new(EagerClient::default());
        let controller = SubscriptionController::new(ControllerParts {
            client: client.clone(),
            permissions: Arc::new(PermissionGate::new(fx.permissions.clone(), false)),
            providers: Arc::new(ProviderAvailabilityWatcher::new(fx.registry.clone(), false)),
            advisor: fx.advisor.clone(),
            request: CoordinatorConfig::default().update_request(),
            sink,
            policy: BackgroundPolicy::KeepUpdates,
            debug_logging: false,
        });
        *slot.lock().unwrap() = Arc::downgrade(&controller);
        fx.permissions.set_granted(true);

        let (done_tx, done_rx) = mpsc::channel();
        let worker = {
            let controller = Arc::clone(&controller);
            std::thread::spawn(move || {
                let transition = controller.evaluate(Trigger::PermissionGranted);
                done_tx.send(transition).unwrap();
            })
        };

        let transition = done_rx.recv_timeout(Duration::from_secs(3)).unwrap();
        worker.join().unwrap();
        assert!(matches!(transition, Transition::Started(_)));
        assert_eq!(*observed.lock().unwrap(), vec![SubscriptionState::Active]);
        assert_eq!(client.starts.load(Ordering::SeqCst), 1);
        assert!(controller.is_active());
    }

    #[test]
    fn test_concurrent_evaluations_start_once() {
        let fx = Fixture::new(false, true);
        let controller = fx.controller(BackgroundPolicy::KeepUpdates);
        fx.permissions.set_granted(true);

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || {
                    controller.evaluate(if i % 2 == 0 {
                        Trigger::PermissionGranted
                    } else {
                        Trigger::ProvidersEnabled
                    })
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(controller.is_active());
        assert_eq!(fx.client.start_calls(), 1);
    }
}
