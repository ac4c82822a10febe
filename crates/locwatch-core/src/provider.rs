//! Provider availability watching.
//!
//! Collapses the host's per-provider on/off flags into a single "can we get a
//! fix at all" boolean and turns provider-change broadcasts into
//! edge-triggered enabled/disabled notifications.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::host::ProviderRegistry;
use crate::types::Provider;

/// Receives availability edges from a [`ProviderAvailabilityWatcher`].
pub trait AvailabilityListener: Send + Sync {
    /// At least one provider became enabled.
    fn on_providers_enabled(&self);

    /// The last enabled provider was switched off.
    fn on_providers_disabled(&self);
}

struct WatchState {
    listener: Option<Arc<dyn AvailabilityListener>>,
    last_known: bool,
}

/// Edge-triggered view over the host provider registry.
pub struct ProviderAvailabilityWatcher {
    registry: Arc<dyn ProviderRegistry>,
    state: Mutex<WatchState>,
    debug_logging: bool,
}

impl ProviderAvailabilityWatcher {
    /// Create a watcher. It does not listen until [`Self::register_for_changes`].
    pub fn new(registry: Arc<dyn ProviderRegistry>, debug_logging: bool) -> Self {
        Self {
            registry,
            state: Mutex::new(WatchState {
                listener: None,
                last_known: false,
            }),
            debug_logging,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether any recognized provider is enabled right now.
    ///
    /// Registry failures count as "disabled".
    pub fn is_available(&self) -> bool {
        Provider::ALL.iter().any(|&provider| {
            match self.registry.is_provider_enabled(provider) {
                Ok(enabled) => enabled,
                Err(e) => {
                    warn!(?provider, error = %e, "Provider registry query failed");
                    false
                }
            }
        })
    }

    /// Start delivering edges to `listener`, replacing any previous listener.
    ///
    /// The current availability becomes the baseline, so no edge fires for
    /// the state at registration time.
    pub fn register_for_changes(&self, listener: Arc<dyn AvailabilityListener>) {
        let available = self.is_available();
        let mut state = self.lock();
        state.listener = Some(listener);
        state.last_known = available;
        debug_log!(
            self.debug_logging,
            available,
            "provider change listener registered"
        );
    }

    /// Stop delivering edges. Safe to call when not registered.
    pub fn unregister_for_changes(&self) {
        if self.lock().listener.take().is_some() {
            debug_log!(self.debug_logging, "provider change listener unregistered");
        }
    }

    /// Whether a listener is currently registered.
    pub fn is_listening(&self) -> bool {
        self.lock().listener.is_some()
    }

    /// Host broadcast entry point: providers were toggled.
    ///
    /// Ignored while no listener is registered. Otherwise recomputes
    /// availability and fires exactly one callback if it changed.
    pub fn on_providers_changed(&self) {
        let edge = {
            let mut state = self.lock();
            let Some(listener) = state.listener.clone() else {
                debug_log!(self.debug_logging, "provider change ignored: not listening");
                return;
            };
            let available = self.is_available();
            if available == state.last_known {
                debug_log!(
                    self.debug_logging,
                    available,
                    "provider change without availability edge"
                );
                return;
            }
            state.last_known = available;
            (listener, available)
        };

        match edge {
            (listener, true) => {
                debug_log!(self.debug_logging, "location providers enabled");
                listener.on_providers_enabled();
            }
            (listener, false) => {
                debug_log!(self.debug_logging, "location providers disabled");
                listener.on_providers_disabled();
            }
        }
    }
}

impl fmt::Debug for ProviderAvailabilityWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderAvailabilityWatcher")
            .field("listening", &self.is_listening())
            .finish_non_exhaustive()
    }
}
