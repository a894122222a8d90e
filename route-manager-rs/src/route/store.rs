//! Published route state and its observers.

use super::snapshot::RouteSnapshot;
use crate::audio::{DeviceId, DeviceRecord};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Called once per publish with the snapshot that was just installed.
pub type SnapshotObserver = Arc<dyn Fn(&RouteSnapshot) + Send + Sync>;

/// Handle returned by [`RouteStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for SubscriptionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Holds the current [`RouteSnapshot`] and notifies observers when it is
/// replaced.
///
/// `publish` is meant to run on the main context only. Readers on any thread
/// get a consistent snapshot: the list and active id always change together.
#[derive(Default)]
pub struct RouteStore {
    current: RwLock<Arc<RouteSnapshot>>,
    observers: Mutex<Vec<(SubscriptionId, SnapshotObserver)>>,
    next_id: AtomicU64,
}

impl RouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.current.read().clone()
    }

    pub fn subscribe(&self, observer: SnapshotObserver) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.observers.lock().push((id, observer));
        id
    }

    /// Returns whether the id was subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Build and install a new snapshot, then notify every observer once.
    pub fn publish(&self, devices: Vec<DeviceRecord>, active: Option<DeviceId>) -> Arc<RouteSnapshot> {
        self.replace(RouteSnapshot::new(devices, active))
    }

    /// Install a prebuilt snapshot, then notify every observer once.
    pub fn replace(&self, snapshot: RouteSnapshot) -> Arc<RouteSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = snapshot.clone();
        tracing::debug!(
            devices = snapshot.len(),
            active = ?snapshot.active_device_id().map(DeviceId::as_str),
            "Published route snapshot"
        );

        // Observers may subscribe or unsubscribe from inside the callback
        let observers: Vec<SnapshotObserver> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(&snapshot);
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TransportClass;
    use std::sync::atomic::AtomicUsize;

    fn devices() -> Vec<DeviceRecord> {
        vec![
            DeviceRecord::new("a", "Speakers", TransportClass::BuiltIn),
            DeviceRecord::new("b", "Headphones", TransportClass::Usb),
        ]
    }

    #[test]
    fn test_starts_empty() {
        let store = RouteStore::new();
        let snapshot = store.snapshot();
        assert!(snapshot.is_empty());
        assert!(snapshot.active_device_id().is_none());
    }

    #[test]
    fn test_publish_orders_and_installs() {
        let store = RouteStore::new();
        store.publish(devices(), Some(DeviceId::new("a")));

        let snapshot = store.snapshot();
        let names: Vec<_> = snapshot.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Speakers", "Headphones"]);
        assert_eq!(snapshot.active_device_id(), Some(&DeviceId::new("a")));
    }

    #[test]
    fn test_each_observer_notified_once_per_publish() {
        let store = RouteStore::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        for counter in [first.clone(), second.clone()] {
            store.subscribe(Arc::new(move |_: &RouteSnapshot| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        store.publish(devices(), None);
        store.publish(devices(), None);
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observer_sees_installed_snapshot() {
        let store = Arc::new(RouteStore::new());
        let seen = Arc::new(Mutex::new(None));

        let (reader, slot) = (store.clone(), seen.clone());
        store.subscribe(Arc::new(move |snapshot: &RouteSnapshot| {
            assert_eq!(*reader.snapshot(), *snapshot);
            *slot.lock() = snapshot.active_device_id().cloned();
        }));

        store.publish(devices(), Some(DeviceId::new("b")));
        assert_eq!(*seen.lock(), Some(DeviceId::new("b")));
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let store = RouteStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = store.subscribe(Arc::new(move |_: &RouteSnapshot| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        store.publish(devices(), None);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.publish(devices(), None);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn test_observer_may_unsubscribe_itself() {
        let store = Arc::new(RouteStore::new());
        let id_cell = Arc::new(Mutex::new(None::<SubscriptionId>));

        let (inner, cell) = (store.clone(), id_cell.clone());
        let id = store.subscribe(Arc::new(move |_: &RouteSnapshot| {
            if let Some(id) = *cell.lock() {
                inner.unsubscribe(id);
            }
        }));
        *id_cell.lock() = Some(id);

        store.publish(devices(), None);
        assert_eq!(store.observer_count(), 0);
    }
}
