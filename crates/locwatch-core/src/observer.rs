//! Last-value observer sets.
//!
//! An [`ObserverSet`] caches the most recently published value and replays it
//! to each new observer on subscription. Callbacks are invoked after the
//! internal lock is released, so an observer may subscribe, unsubscribe or
//! publish from inside its own callback.
//!
//! Deliveries are serialized per set. A value published while another thread
//! is notifying observers is queued and handed out by that thread, so every
//! observer sees values in the order they were cached.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callback registered with an [`ObserverSet`].
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identity of a registered observer, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

impl ObserverId {
    fn next() -> Self {
        Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct Delivery<T> {
    value: T,
    // `None` means every observer registered when the delivery runs.
    target: Option<ObserverId>,
}

struct Inner<T> {
    current: Option<T>,
    observers: HashMap<ObserverId, Observer<T>>,
    queue: VecDeque<Delivery<T>>,
    draining: bool,
}

/// An unordered set of observers with last-value replay.
pub struct ObserverSet<T> {
    inner: Mutex<Inner<T>>,
}

/// Hands the drain back if an observer panics mid-delivery.
struct DrainGuard<'a, T: Clone> {
    set: &'a ObserverSet<T>,
}

impl<T: Clone> Drop for DrainGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.set.lock().draining = false;
        }
    }
}

impl<T: Clone> ObserverSet<T> {
    /// Create an empty set with no cached value.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: None,
                observers: HashMap::new(),
                queue: VecDeque::new(),
                draining: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `delivery` and drain the queue unless another caller already is.
    fn enqueue(&self, mut inner: MutexGuard<'_, Inner<T>>, delivery: Delivery<T>) {
        inner.queue.push_back(delivery);
        if inner.draining {
            return;
        }
        inner.draining = true;
        drop(inner);
        self.drain();
    }

    fn drain(&self) {
        let _guard = DrainGuard { set: self };
        loop {
            let (value, observers) = {
                let mut inner = self.lock();
                let Some(delivery) = inner.queue.pop_front() else {
                    inner.draining = false;
                    return;
                };
                let observers: Vec<Observer<T>> = match delivery.target {
                    None => inner.observers.values().cloned().collect(),
                    Some(id) => inner.observers.get(&id).cloned().into_iter().collect(),
                };
                (delivery.value, observers)
            };
            for observer in observers {
                observer(&value);
            }
        }
    }

    /// Register `observer`. If a value has been published, it is delivered
    /// before this returns, unless a delivery is already under way on another
    /// thread or in an enclosing callback; then it is queued behind it.
    pub fn subscribe(&self, observer: Observer<T>) -> ObserverId {
        let id = ObserverId::next();
        let mut inner = self.lock();
        inner.observers.insert(id, observer);
        if let Some(value) = inner.current.clone() {
            self.enqueue(
                inner,
                Delivery {
                    value,
                    target: Some(id),
                },
            );
        }
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.lock().observers.remove(&id).is_some()
    }

    /// Cache `value` and deliver it to every registered observer.
    pub fn publish(&self, value: T) {
        self.publish_with(|| value);
    }

    /// Compute the value to publish under the set's lock, cache it and
    /// deliver it. Anything `make` reads is therefore judged atomically with
    /// respect to other publications on this set.
    pub fn publish_with(&self, make: impl FnOnce() -> T) {
        let mut inner = self.lock();
        let value = make();
        inner.current = Some(value.clone());
        self.enqueue(
            inner,
            Delivery {
                value,
                target: None,
            },
        );
    }

    /// The last published value, if any.
    #[must_use]
    pub fn current(&self) -> Option<T> {
        self.lock().current.clone()
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    /// Whether no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ObserverSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet").finish_non_exhaustive()
    }
}
