//! Immutable view of the device list plus the active selection.

use crate::audio::{DeviceId, DeviceRecord};
use std::cmp::Ordering;
use std::collections::HashSet;

/// The device list and active device published together.
///
/// Built wholesale on every enumeration pass and never mutated afterwards.
/// The active device, when it is in the list, comes first; everything else
/// is ordered by case-insensitive name, ties keeping enumeration order.
#[derive(Debug, Clone, Default)]
pub struct RouteSnapshot {
    devices: Vec<DeviceRecord>,
    active_device_id: Option<DeviceId>,
}

impl RouteSnapshot {
    /// Build a snapshot, dropping repeated ids and applying the ordering rule.
    pub fn new(devices: Vec<DeviceRecord>, active_device_id: Option<DeviceId>) -> Self {
        let mut seen = HashSet::new();
        let mut devices: Vec<DeviceRecord> = devices
            .into_iter()
            .filter(|d| seen.insert(d.id.clone()))
            .collect();
        order_devices(&mut devices, active_device_id.as_ref());

        Self {
            devices,
            active_device_id,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Same devices, different active id. Used for the optimistic update
    /// after a switch request is accepted.
    pub fn with_active(&self, active_device_id: DeviceId) -> Self {
        Self::new(self.devices.clone(), Some(active_device_id))
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn active_device_id(&self) -> Option<&DeviceId> {
        self.active_device_id.as_ref()
    }

    /// The active record, if the active id is in the list.
    pub fn active_device(&self) -> Option<&DeviceRecord> {
        let active = self.active_device_id.as_ref()?;
        self.devices.first().filter(|d| &d.id == active)
    }

    pub fn device(&self, id: &DeviceId) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn is_active(&self, id: &DeviceId) -> bool {
        self.active_device_id.as_ref() == Some(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceRecord> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Snapshots are equal in content: same active id and the same records in
/// the same order, transports included.
impl PartialEq for RouteSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.active_device_id == other.active_device_id
            && self.devices.len() == other.devices.len()
            && self
                .devices
                .iter()
                .zip(&other.devices)
                .all(|(a, b)| a.same_route(b))
    }
}

impl<'a> IntoIterator for &'a RouteSnapshot {
    type Item = &'a DeviceRecord;
    type IntoIter = std::slice::Iter<'a, DeviceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// Sort in place: active first, then case-insensitive name. Stable.
pub fn order_devices(devices: &mut [DeviceRecord], active: Option<&DeviceId>) {
    let is_active = |d: &DeviceRecord| Some(&d.id) == active;
    devices.sort_by(|a, b| match (is_active(a), is_active(b)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => compare_names(&a.name, &b.name),
    });
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TransportClass;
    use proptest::prelude::*;

    fn record(id: &str, name: &str) -> DeviceRecord {
        DeviceRecord::new(id, name, TransportClass::Unknown)
    }

    fn ids(snapshot: &RouteSnapshot) -> Vec<&str> {
        snapshot.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_active_device_sorts_first() {
        let snapshot = RouteSnapshot::new(
            vec![
                DeviceRecord::new("a", "Zebra Speakers", TransportClass::BuiltIn),
                DeviceRecord::new("b", "Echo Buds", TransportClass::Bluetooth),
            ],
            Some(DeviceId::new("a")),
        );
        assert_eq!(ids(&snapshot), vec!["a", "b"]);
        assert_eq!(snapshot.active_device().map(|d| d.name.as_str()), Some("Zebra Speakers"));
    }

    #[test]
    fn test_names_compare_case_insensitively() {
        let snapshot = RouteSnapshot::new(
            vec![record("1", "beta"), record("2", "Alpha"), record("3", "GAMMA")],
            None,
        );
        assert_eq!(ids(&snapshot), vec!["2", "1", "3"]);
    }

    #[test]
    fn test_equal_names_keep_enumeration_order() {
        let snapshot = RouteSnapshot::new(
            vec![record("x", "Speakers"), record("y", "speakers"), record("z", "Speakers")],
            None,
        );
        assert_eq!(ids(&snapshot), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_active_id_not_in_list() {
        let snapshot = RouteSnapshot::new(
            vec![record("b", "B"), record("a", "A")],
            Some(DeviceId::new("gone")),
        );
        assert_eq!(ids(&snapshot), vec!["a", "b"]);
        assert!(snapshot.active_device().is_none());
        assert!(snapshot.is_active(&DeviceId::new("gone")));
    }

    #[test]
    fn test_duplicate_ids_are_dropped() {
        let snapshot = RouteSnapshot::new(
            vec![record("a", "First"), record("a", "Second"), record("b", "Other")],
            None,
        );
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.device(&DeviceId::new("a")).map(|d| d.name.as_str()), Some("First"));
    }

    #[test]
    fn test_with_active_reorders() {
        let snapshot = RouteSnapshot::new(
            vec![record("a", "A"), record("b", "B"), record("c", "C")],
            Some(DeviceId::new("a")),
        );
        let switched = snapshot.with_active(DeviceId::new("c"));
        assert_eq!(ids(&switched), vec!["c", "a", "b"]);
        assert_eq!(ids(&snapshot), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_equality_includes_transport_and_active() {
        let a = RouteSnapshot::new(vec![record("a", "A")], Some(DeviceId::new("a")));
        let same = RouteSnapshot::new(vec![record("a", "A")], Some(DeviceId::new("a")));
        let other_transport = RouteSnapshot::new(
            vec![DeviceRecord::new("a", "A", TransportClass::Usb)],
            Some(DeviceId::new("a")),
        );
        let other_active = RouteSnapshot::new(vec![record("a", "A")], None);

        assert_eq!(a, same);
        assert_ne!(a, other_transport);
        assert_ne!(a, other_active);
        assert!(RouteSnapshot::empty().is_empty());
    }

    fn records_strategy() -> impl Strategy<Value = Vec<DeviceRecord>> {
        prop::collection::vec(("[a-f]{1,2}", "[A-Za-z ]{0,8}"), 0..12).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(id, name)| record(&id, &name))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_ordering_invariant(devices in records_strategy(), active in proptest::option::of("[a-f]{1,2}")) {
            let active = active.map(DeviceId::new);
            let snapshot = RouteSnapshot::new(devices, active.clone());

            let mut start = 0;
            if let Some(active) = &active {
                if snapshot.device(active).is_some() {
                    prop_assert_eq!(&snapshot.devices()[0].id, active);
                    start = 1;
                }
            }
            for pair in snapshot.devices()[start..].windows(2) {
                prop_assert_ne!(compare_names(&pair[0].name, &pair[1].name), Ordering::Greater);
            }

            let unique: HashSet<_> = snapshot.iter().map(|d| d.id.clone()).collect();
            prop_assert_eq!(unique.len(), snapshot.len());
        }
    }
}
