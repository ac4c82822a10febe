//! Latest-value publication of fixes and addresses.
//!
//! Every fix bumps a publication generation. Reverse geocoding for a fix runs
//! as a detached blocking task tagged with that generation; when it completes,
//! its address is published only if no newer fix has been published in the
//! meantime. A stale lookup is not cancelled. Its result is dropped and "no
//! address" is published in its place.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::warn;

use crate::host::{GeocodeError, LocationSink, ReverseGeocoder};
use crate::observer::{Observer, ObserverId, ObserverSet};
use crate::types::{Address, Coordinates, LocationResult, LocationSample};

/// A pending address lookup for one published fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    generation: u64,
    coordinates: Coordinates,
}

impl Resolution {
    /// Position being resolved.
    #[must_use]
    pub const fn coordinates(&self) -> Coordinates {
        self.coordinates
    }
}

/// What happened to a finished lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressPublication {
    /// An address was published.
    Published,
    /// The lookup found nothing (or failed); "no address" was published.
    Cleared,
    /// A newer fix was published first; the result was dropped and "no
    /// address" was published.
    Discarded,
}

/// Holds the latest fix and address and notifies observers.
pub struct UpdatePublisher {
    locations: ObserverSet<Option<LocationSample>>,
    addresses: ObserverSet<Option<Address>>,
    generation: AtomicU64,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
    max_results: usize,
    runtime: Handle,
    pending: AtomicUsize,
    idle: Notify,
    debug_logging: bool,
}

impl UpdatePublisher {
    /// Create a publisher. Lookups are spawned on `runtime`.
    pub fn new(
        geocoder: Option<Arc<dyn ReverseGeocoder>>,
        max_results: usize,
        runtime: Handle,
        debug_logging: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            locations: ObserverSet::new(),
            addresses: ObserverSet::new(),
            generation: AtomicU64::new(0),
            geocoder,
            max_results,
            runtime,
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            debug_logging,
        })
    }

    /// A sink the host location client can deliver into.
    pub fn sink(self: &Arc<Self>) -> LocationSink {
        let publisher = Arc::clone(self);
        LocationSink::new(move |result: Option<LocationResult>| {
            publisher.on_location_received(result.and_then(|r| r.last_location));
        })
    }

    /// Publish a fix (or the absence of one) and start resolving its address.
    pub fn on_location_received(self: &Arc<Self>, sample: Option<LocationSample>) {
        if let Some(resolution) = self.record_location(sample) {
            self.spawn_lookup(resolution);
        }
    }

    /// Publish a fix without starting a lookup. Returns the lookup to run,
    /// if any.
    pub fn record_location(&self, sample: Option<LocationSample>) -> Option<Resolution> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        match &sample {
            Some(s) => debug_log!(self.debug_logging, generation, "location update: {s}"),
            None => debug_log!(
                self.debug_logging,
                generation,
                "location update: received null location result"
            ),
        }
        let coordinates = sample.as_ref().map(|s| s.coordinates);
        self.locations.publish(sample);
        coordinates.map(|coordinates| Resolution {
            generation,
            coordinates,
        })
    }

    fn spawn_lookup(self: &Arc<Self>, resolution: Resolution) {
        let Some(geocoder) = self.geocoder.clone() else {
            self.complete_resolution(resolution, Ok(Vec::new()));
            return;
        };
        let max_results = self.max_results;
        let publisher = Arc::clone(self);
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.runtime.spawn(async move {
            let coordinates = resolution.coordinates;
            let result = tokio::task::spawn_blocking(move || {
                geocoder.lookup(coordinates, max_results)
            })
            .await
            .unwrap_or_else(|e| Err(GeocodeError::ServiceUnavailable(e.to_string())));
            publisher.complete_resolution(resolution, result);
            if publisher.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                publisher.idle.notify_waiters();
            }
        });
    }

    /// Apply a finished lookup. The staleness check runs under the address
    /// set's lock, so it is atomic with the publication it decides.
    pub fn complete_resolution(
        &self,
        resolution: Resolution,
        result: Result<Vec<Address>, GeocodeError>,
    ) -> AddressPublication {
        let address = match result {
            Ok(mut found) if !found.is_empty() => Some(found.swap_remove(0)),
            Ok(_) => None,
            Err(e) => {
                warn!(coordinates = %resolution.coordinates, error = %e, "Reverse geocoding failed");
                None
            }
        };

        let mut outcome = AddressPublication::Discarded;
        self.addresses.publish_with(|| {
            if self.generation.load(Ordering::SeqCst) != resolution.generation {
                return None;
            }
            outcome = if address.is_some() {
                AddressPublication::Published
            } else {
                AddressPublication::Cleared
            };
            address
        });

        match outcome {
            AddressPublication::Discarded => debug_log!(
                self.debug_logging,
                generation = resolution.generation,
                "address: none (newer location published)"
            ),
            AddressPublication::Cleared => debug_log!(self.debug_logging, "address: none"),
            AddressPublication::Published => debug_log!(
                self.debug_logging,
                coordinates = %resolution.coordinates,
                "address resolved"
            ),
        }
        outcome
    }

    /// Wait until no lookup is in flight.
    pub async fn settled(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Number of lookups in flight.
    pub fn pending_lookups(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Observe fixes. Receives the latest fix immediately if one was published.
    pub fn subscribe_location(&self, observer: Observer<Option<LocationSample>>) -> ObserverId {
        self.locations.subscribe(observer)
    }

    /// Stop observing fixes. Returns `false` if `id` was not registered.
    pub fn unsubscribe_location(&self, id: ObserverId) -> bool {
        self.locations.unsubscribe(id)
    }

    /// Observe addresses. Receives the latest address immediately if one was published.
    pub fn subscribe_address(&self, observer: Observer<Option<Address>>) -> ObserverId {
        self.addresses.subscribe(observer)
    }

    /// Stop observing addresses. Returns `false` if `id` was not registered.
    pub fn unsubscribe_address(&self, id: ObserverId) -> bool {
        self.addresses.unsubscribe(id)
    }

    /// Latest published fix; `None` if nothing was published yet,
    /// `Some(None)` if the host last reported no fix.
    pub fn latest_location(&self) -> Option<Option<LocationSample>> {
        self.locations.current()
    }

    /// Latest published address.
    pub fn latest_address(&self) -> Option<Option<Address>> {
        self.addresses.current()
    }
}

impl fmt::Debug for UpdatePublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdatePublisher")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("pending", &self.pending_lookups())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimGeocoder;
    use std::sync::Mutex;

    fn publisher(geocoder: Option<Arc<dyn ReverseGeocoder>>) -> Arc<UpdatePublisher> {
        UpdatePublisher::new(geocoder, 1, Handle::current(), true)
    }

    fn addresses_seen(publisher: &UpdatePublisher) -> Arc<Mutex<Vec<Option<Address>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        publisher.subscribe_address(Arc::new(move |a: &Option<Address>| {
            captured.lock().unwrap().push(a.clone());
        }));
        seen
    }

    #[tokio::test]
    async fn test_stale_resolution_publishes_none() {
        let publisher = publisher(None);
        let seen = addresses_seen(&publisher);

        let first = publisher
            .record_location(Some(LocationSample::at(1.0, 2.0)))
            .unwrap();
        let second = publisher
            .record_location(Some(LocationSample::at(3.0, 4.0)))
            .unwrap();

        let second_address = SimGeocoder::address_for(second.coordinates());
        assert_eq!(
            publisher.complete_resolution(second, Ok(vec![second_address.clone()])),
            AddressPublication::Published
        );
        assert_eq!(
            publisher.complete_resolution(
                first,
                Ok(vec![SimGeocoder::address_for(first.coordinates())])
            ),
            AddressPublication::Discarded
        );

        assert_eq!(*seen.lock().unwrap(), vec![Some(second_address), None]);
        assert_eq!(publisher.latest_address(), Some(None));
    }

    #[tokio::test]
    async fn test_lookups_completing_in_arrival_order() {
        let publisher = publisher(None);
        let seen = addresses_seen(&publisher);

        let first = publisher
            .record_location(Some(LocationSample::at(1.0, 2.0)))
            .unwrap();
        let second = publisher
            .record_location(Some(LocationSample::at(3.0, 4.0)))
            .unwrap();
        publisher.complete_resolution(first, Ok(vec![SimGeocoder::address_for(first.coordinates())]));
        publisher.complete_resolution(second, Ok(vec![SimGeocoder::address_for(second.coordinates())]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], None);
        assert_eq!(
            seen[1].as_ref().and_then(|a| a.coordinates),
            Some(Coordinates::new(3.0, 4.0))
        );
    }

    #[test]
    fn test_address_for_older_fix_never_follows_newer_one() {
        use std::sync::mpsc;
        use std::time::Duration;

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let publisher = UpdatePublisher::new(None, 1, runtime.handle().clone(), false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let captured = Arc::clone(&seen);
        publisher.subscribe_address(Arc::new(move |a: &Option<Address>| {
            let coordinates = a.as_ref().and_then(|a| a.coordinates);
            if coordinates == Some(Coordinates::new(1.0, 2.0)) {
                entered_tx.send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
            captured.lock().unwrap().push(coordinates);
        }));

        let first = publisher
            .record_location(Some(LocationSample::at(1.0, 2.0)))
            .unwrap();
        let resolver = {
            let publisher = Arc::clone(&publisher);
            std::thread::spawn(move || {
                publisher.complete_resolution(
                    first,
                    Ok(vec![SimGeocoder::address_for(first.coordinates())]),
                )
            })
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = publisher
            .record_location(Some(LocationSample::at(3.0, 4.0)))
            .unwrap();
        assert_eq!(
            publisher.complete_resolution(
                second,
                Ok(vec![SimGeocoder::address_for(second.coordinates())])
            ),
            AddressPublication::Published
        );

        release_tx.send(()).unwrap();
        assert_eq!(resolver.join().unwrap(), AddressPublication::Published);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Some(Coordinates::new(1.0, 2.0)),
                Some(Coordinates::new(3.0, 4.0))
            ]
        );
        assert_eq!(
            publisher.latest_address().flatten().and_then(|a| a.coordinates),
            Some(Coordinates::new(3.0, 4.0))
        );
    }

    #[tokio::test]
    async fn test_failed_lookup_publishes_none() {
        let publisher = publisher(None);
        let ticket = publisher
            .record_location(Some(LocationSample::at(1.0, 2.0)))
            .unwrap();
        let outcome = publisher.complete_resolution(
            ticket,
            Err(GeocodeError::ServiceUnavailable("offline".into())),
        );
        assert_eq!(outcome, AddressPublication::Cleared);
        assert_eq!(publisher.latest_address(), Some(None));
    }

    #[tokio::test]
    async fn test_null_fix_publishes_none_without_lookup() {
        let geocoder = Arc::new(SimGeocoder::default());
        let publisher = publisher(Some(geocoder.clone()));

        publisher.on_location_received(None);
        publisher.settled().await;

        assert_eq!(publisher.latest_location(), Some(None));
        assert_eq!(publisher.latest_address(), None);
        assert_eq!(geocoder.lookups(), 0);
    }

    #[tokio::test]
    async fn test_null_fix_makes_inflight_lookup_stale() {
        let publisher = publisher(None);
        let ticket = publisher
            .record_location(Some(LocationSample::at(1.0, 2.0)))
            .unwrap();
        assert!(publisher.record_location(None).is_none());
        assert_eq!(
            publisher.complete_resolution(ticket, Ok(vec![Address::default()])),
            AddressPublication::Discarded
        );
    }

    #[tokio::test]
    async fn test_spawned_lookup_publishes_address() {
        let geocoder = Arc::new(SimGeocoder::default());
        let publisher = publisher(Some(geocoder.clone()));

        publisher.sink().deliver(Some(LocationResult::of(LocationSample::at(5.0, 6.0))));
        publisher.settled().await;

        let address = publisher.latest_address().flatten().unwrap();
        assert_eq!(address.coordinates, Some(Coordinates::new(5.0, 6.0)));
        assert_eq!(geocoder.lookups(), 1);
    }

    #[tokio::test]
    async fn test_missing_geocoder_yields_no_address() {
        let publisher = publisher(None);
        publisher.on_location_received(Some(LocationSample::at(5.0, 6.0)));
        assert_eq!(publisher.latest_address(), Some(None));
        assert_eq!(publisher.pending_lookups(), 0);
    }

    #[tokio::test]
    async fn test_late_location_subscriber_gets_latest() {
        let publisher = publisher(None);
        publisher.record_location(Some(LocationSample::at(7.0, 8.0)));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let id = publisher.subscribe_location(Arc::new(move |s: &Option<LocationSample>| {
            captured.lock().unwrap().push(s.clone());
        }));

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(publisher.unsubscribe_location(id));
        assert!(!publisher.unsubscribe_location(id));
    }
}
