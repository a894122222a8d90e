//! In-memory hardware and notification source.
//!
//! Deterministic stand-ins for the platform backends, used by the crate's own
//! tests and by embedders that want to exercise routing without real devices.

use super::device::{AudioError, DeviceId, RouteChange, TransportClass};
use super::hardware::{AudioHardware, HandlerSlot, RouteChangeHandler, RouteChangeSource};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A simulated device as the fake platform reports it.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub id: DeviceId,

    /// None simulates a failing name query
    pub name: Option<String>,

    pub output_channels: u32,
    pub transport: TransportClass,
}

impl FakeDevice {
    pub fn output(id: &str, name: &str, channels: u32, transport: TransportClass) -> Self {
        Self {
            id: DeviceId::new(id),
            name: Some(name.to_string()),
            output_channels: channels,
            transport,
        }
    }

    /// An input-only device (zero output channels).
    pub fn input(id: &str, name: &str) -> Self {
        Self::output(id, name, 0, TransportClass::BuiltIn)
    }

    pub fn without_name(mut self) -> Self {
        self.name = None;
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    devices: Vec<FakeDevice>,
    default_output: Option<DeviceId>,
    list_fails: bool,
    reject_switches: bool,
    switch_requests: Vec<DeviceId>,
}

/// In-memory [`AudioHardware`].
///
/// A switch succeeds when the target is attached and has output channels,
/// unless switches are globally rejected with [`FakeHardware::reject_switches`].
#[derive(Debug, Default)]
pub struct FakeHardware {
    state: Mutex<FakeState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    list_calls: AtomicUsize,
}

/// Tracks overlapping hardware calls for the lifetime of one query.
struct CallGuard<'a> {
    hardware: &'a FakeHardware,
}

impl<'a> CallGuard<'a> {
    fn enter(hardware: &'a FakeHardware) -> Self {
        let now = hardware.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        hardware.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { hardware }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.hardware.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: FakeDevice) -> Self {
        self.add_device(device);
        self
    }

    pub fn with_default(self, id: &str) -> Self {
        self.set_default(Some(DeviceId::new(id)));
        self
    }

    /// Attach a device, replacing any device with the same id.
    pub fn add_device(&self, device: FakeDevice) {
        let mut state = self.state.lock();
        match state.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => state.devices.push(device),
        }
    }

    /// Detach a device. Clears the default if it pointed at it.
    pub fn remove_device(&self, id: &str) {
        let mut state = self.state.lock();
        state.devices.retain(|d| d.id.as_str() != id);
        if state.default_output.as_ref().map(|d| d.as_str()) == Some(id) {
            state.default_output = None;
        }
    }

    pub fn set_default(&self, id: Option<DeviceId>) {
        self.state.lock().default_output = id;
    }

    /// Make `list_device_ids` fail (return empty) until reset.
    pub fn set_list_failure(&self, fails: bool) {
        self.state.lock().list_fails = fails;
    }

    pub fn reject_switches(&self, reject: bool) {
        self.state.lock().reject_switches = reject;
    }

    /// Every id passed to `set_default_output_id`, in call order.
    pub fn switch_requests(&self) -> Vec<DeviceId> {
        self.state.lock().switch_requests.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Highest number of hardware calls that were ever in progress at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn with_device_state<T>(&self, id: &DeviceId, f: impl FnOnce(&FakeDevice) -> T) -> Option<T> {
        let state = self.state.lock();
        state.devices.iter().find(|d| &d.id == id).map(f)
    }
}

impl AudioHardware for FakeHardware {
    fn list_device_ids(&self) -> Vec<DeviceId> {
        let _call = CallGuard::enter(self);
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.list_fails {
            return Vec::new();
        }
        state.devices.iter().map(|d| d.id.clone()).collect()
    }

    fn output_channel_count(&self, id: &DeviceId) -> u32 {
        let _call = CallGuard::enter(self);
        self.with_device_state(id, |d| d.output_channels).unwrap_or(0)
    }

    fn display_name(&self, id: &DeviceId) -> Option<String> {
        let _call = CallGuard::enter(self);
        self.with_device_state(id, |d| d.name.clone()).flatten()
    }

    fn transport_class(&self, id: &DeviceId) -> TransportClass {
        let _call = CallGuard::enter(self);
        self.with_device_state(id, |d| d.transport)
            .unwrap_or_default()
    }

    fn current_default_output_id(&self) -> Option<DeviceId> {
        let _call = CallGuard::enter(self);
        self.state.lock().default_output.clone()
    }

    fn set_default_output_id(&self, id: &DeviceId) -> bool {
        let _call = CallGuard::enter(self);
        let mut state = self.state.lock();
        state.switch_requests.push(id.clone());

        let accepted = !state.reject_switches
            && state
                .devices
                .iter()
                .any(|d| &d.id == id && d.output_channels > 0);
        if accepted {
            state.default_output = Some(id.clone());
        }
        accepted
    }
}

/// In-memory [`RouteChangeSource`]. Fire notifications through the
/// [`FakeRouteTrigger`] obtained from [`FakeRouteChangeSource::trigger`].
#[derive(Default)]
pub struct FakeRouteChangeSource {
    slot: HandlerSlot,
    fail_registration: bool,
}

impl FakeRouteChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose `register` always fails.
    pub fn failing() -> Self {
        Self {
            slot: HandlerSlot::new(),
            fail_registration: true,
        }
    }

    pub fn trigger(&self) -> FakeRouteTrigger {
        FakeRouteTrigger {
            slot: self.slot.clone(),
        }
    }
}

impl RouteChangeSource for FakeRouteChangeSource {
    fn register(&mut self, handler: RouteChangeHandler) -> Result<(), AudioError> {
        if self.fail_registration {
            return Err(AudioError::NotificationRegistration(
                "fake source refuses registration".to_string(),
            ));
        }
        self.slot.set(handler);
        Ok(())
    }

    fn unregister(&mut self) {
        self.slot.clear();
    }
}

/// Test handle standing in for the platform's notification thread.
#[derive(Clone)]
pub struct FakeRouteTrigger {
    slot: HandlerSlot,
}

impl FakeRouteTrigger {
    /// Deliver a notification. Returns false if nobody is registered.
    pub fn fire(&self, change: RouteChange) -> bool {
        self.slot.deliver(change)
    }

    pub fn is_registered(&self) -> bool {
        self.slot.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hardware() -> FakeHardware {
        FakeHardware::new()
            .with_device(FakeDevice::output("a", "Speakers", 2, TransportClass::BuiltIn))
            .with_device(FakeDevice::input("b", "Microphone"))
            .with_default("a")
    }

    #[test]
    fn test_queries_report_neutral_values_for_unknown_ids() {
        let hw = hardware();
        let missing = DeviceId::new("zz");
        assert_eq!(hw.output_channel_count(&missing), 0);
        assert_eq!(hw.display_name(&missing), None);
        assert_eq!(hw.transport_class(&missing), TransportClass::Unknown);
    }

    #[test]
    fn test_switch_only_accepts_attached_outputs() {
        let hw = hardware();
        assert!(!hw.set_default_output_id(&DeviceId::new("b")));
        assert!(!hw.set_default_output_id(&DeviceId::new("zz")));
        assert_eq!(hw.current_default_output_id(), Some(DeviceId::new("a")));

        hw.add_device(FakeDevice::output("c", "Dock", 2, TransportClass::Usb));
        assert!(hw.set_default_output_id(&DeviceId::new("c")));
        assert_eq!(hw.current_default_output_id(), Some(DeviceId::new("c")));
        assert_eq!(hw.switch_requests().len(), 3);

        hw.reject_switches(true);
        assert!(!hw.set_default_output_id(&DeviceId::new("a")));
    }

    #[test]
    fn test_remove_device_clears_default() {
        let hw = hardware();
        hw.remove_device("a");
        assert_eq!(hw.current_default_output_id(), None);
        assert_eq!(hw.list_device_ids(), vec![DeviceId::new("b")]);
    }

    #[test]
    fn test_list_failure() {
        let hw = hardware();
        hw.set_list_failure(true);
        assert!(hw.list_device_ids().is_empty());
        assert_eq!(hw.list_calls(), 1);
    }

    #[test]
    fn test_trigger_follows_registration() {
        let mut source = FakeRouteChangeSource::new();
        let trigger = source.trigger();
        assert!(!trigger.fire(RouteChange::DeviceListChanged));

        source.register(std::sync::Arc::new(|_| {})).unwrap();
        assert!(trigger.is_registered());
        assert!(trigger.fire(RouteChange::DeviceListChanged));

        source.unregister();
        assert!(!trigger.is_registered());
        assert!(FakeRouteChangeSource::failing()
            .register(std::sync::Arc::new(|_| {}))
            .is_err());
    }
}
