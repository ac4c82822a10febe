//! Host lifecycle adapter.
//!
//! Provider-change events are only consumed while at least one UI unit is in
//! the foreground. Entering the foreground also re-runs the subscription
//! decision, since providers may have been toggled while nobody listened.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::controller::{ControllerListener, SubscriptionController, Transition, Trigger};
use crate::provider::ProviderAvailabilityWatcher;

/// Identity of an observable UI unit (screen, window, activity, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

/// Foreground transitions reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The unit became visible and interactive.
    Resumed,
    /// The unit left the foreground.
    Paused,
}

/// Binds watcher listening and controller re-evaluation to the host lifecycle.
pub struct LifecycleBinder {
    watcher: Arc<ProviderAvailabilityWatcher>,
    controller: Arc<SubscriptionController>,
    resumed: Mutex<HashSet<UnitId>>,
    debug_logging: bool,
}

impl LifecycleBinder {
    /// Create a binder. Nothing is listening until a unit resumes.
    pub fn new(
        watcher: Arc<ProviderAvailabilityWatcher>,
        controller: Arc<SubscriptionController>,
        debug_logging: bool,
    ) -> Self {
        Self {
            watcher,
            controller,
            resumed: Mutex::new(HashSet::new()),
            debug_logging,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<UnitId>> {
        self.resumed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one lifecycle event.
    pub fn on_event(&self, unit: UnitId, event: LifecycleEvent) -> Transition {
        match event {
            LifecycleEvent::Resumed => self.on_resumed(unit),
            LifecycleEvent::Paused => self.on_paused(unit),
        }
    }

    // Listener registration and the controller's foreground flag change under
    // the `resumed` lock, so racing resume/pause events leave them matching
    // the final set of resumed units. Only the evaluation runs outside it.
    fn on_resumed(&self, unit: UnitId) -> Transition {
        {
            let mut resumed = self.lock();
            if resumed.is_empty() {
                debug_log!(
                    self.debug_logging,
                    unit = unit.0,
                    "resumed - registering provider change receiver"
                );
                self.watcher
                    .register_for_changes(ControllerListener::new(&self.controller));
                self.controller.record_foreground(true);
            }
            resumed.insert(unit);
        }
        self.controller.evaluate(Trigger::Foreground)
    }

    fn on_paused(&self, unit: UnitId) -> Transition {
        {
            let mut resumed = self.lock();
            if !(resumed.remove(&unit) && resumed.is_empty()) {
                return Transition::Unchanged;
            }
            debug_log!(
                self.debug_logging,
                unit = unit.0,
                "paused - unregistering provider change receiver"
            );
            self.watcher.unregister_for_changes();
            self.controller.record_foreground(false);
        }
        self.controller.evaluate(Trigger::Background)
    }

    /// Whether any unit is in the foreground.
    pub fn in_foreground(&self) -> bool {
        !self.lock().is_empty()
    }
}

impl fmt::Debug for LifecycleBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleBinder")
            .field("resumed", &self.lock().len())
            .finish_non_exhaustive()
    }
}
