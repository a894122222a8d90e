//! Turns raw device ids into output device records.

use crate::audio::{AudioHardware, DeviceId, DeviceRecord};
use std::collections::HashSet;

/// Placeholder used when a device reports no name.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Query each id and keep the ones with at least one output channel.
///
/// Records come back in enumeration order; ordering for display is the
/// snapshot's job. Repeated ids are queried once.
pub fn build(hardware: &dyn AudioHardware, ids: &[DeviceId], unknown_name: &str) -> Vec<DeviceRecord> {
    let mut seen = HashSet::with_capacity(ids.len());
    let mut records = Vec::with_capacity(ids.len());

    for id in ids {
        if !seen.insert(id) {
            continue;
        }

        let channels = hardware.output_channel_count(id);
        if channels == 0 {
            tracing::trace!(device_id = %id, "Skipping device without output channels");
            continue;
        }

        let name = hardware
            .display_name(id)
            .unwrap_or_else(|| unknown_name.to_string());
        let transport = hardware.transport_class(id);
        tracing::trace!(device_id = %id, %name, %transport, channels, "Output device");

        records.push(DeviceRecord::new(id.clone(), name, transport));
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{FakeDevice, FakeHardware, TransportClass};
    use proptest::prelude::*;

    #[test]
    fn test_excludes_devices_without_output_channels() {
        let hw = FakeHardware::new()
            .with_device(FakeDevice::output("a", "Speakers", 2, TransportClass::BuiltIn))
            .with_device(FakeDevice::input("b", "Microphone"));

        let records = build(&hw, &hw.list_device_ids(), UNKNOWN_DEVICE_NAME);
        assert_eq!(records.len(), 1);
        assert!(records[0].same_route(&DeviceRecord::new("a", "Speakers", TransportClass::BuiltIn)));
    }

    #[test]
    fn test_missing_name_uses_placeholder() {
        let hw = FakeHardware::new()
            .with_device(FakeDevice::output("a", "ignored", 2, TransportClass::Usb).without_name());

        let records = build(&hw, &hw.list_device_ids(), UNKNOWN_DEVICE_NAME);
        assert_eq!(records[0].name, "Unknown Device");
        assert_eq!(records[0].transport, TransportClass::Usb);
    }

    #[test]
    fn test_unknown_ids_are_dropped() {
        let hw = FakeHardware::new();
        let records = build(&hw, &[DeviceId::new("ghost")], UNKNOWN_DEVICE_NAME);
        assert!(records.is_empty());
    }

    #[test]
    fn test_keeps_enumeration_order() {
        let hw = FakeHardware::new()
            .with_device(FakeDevice::output("z", "Zulu", 2, TransportClass::Usb))
            .with_device(FakeDevice::output("a", "Alpha", 2, TransportClass::Usb));

        let records = build(&hw, &hw.list_device_ids(), UNKNOWN_DEVICE_NAME);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }

    proptest! {
        #[test]
        fn prop_build_keeps_exactly_output_devices(
            channels in prop::collection::vec(0u32..3, 0..10),
            repeats in prop::collection::vec(0usize..10, 0..5),
        ) {
            let hw = FakeHardware::new();
            for (i, count) in channels.iter().enumerate() {
                let id = format!("dev{i}");
                hw.add_device(FakeDevice::output(&id, &id, *count, TransportClass::Unknown));
            }

            // Enumeration may repeat ids and name ids the hardware does not know
            let mut ids = hw.list_device_ids();
            ids.extend(repeats.iter().map(|i| DeviceId::new(format!("dev{i}"))));

            let records = build(&hw, &ids, UNKNOWN_DEVICE_NAME);

            let expected: HashSet<DeviceId> = channels
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(i, _)| DeviceId::new(format!("dev{i}")))
                .collect();
            let produced: Vec<DeviceId> = records.iter().map(|r| r.id.clone()).collect();
            let produced_set: HashSet<DeviceId> = produced.iter().cloned().collect();

            prop_assert_eq!(produced.len(), produced_set.len());
            prop_assert_eq!(produced_set, expected);
        }
    }
}
