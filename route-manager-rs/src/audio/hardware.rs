//! Seams between the routing core and the platform audio subsystem.

use super::device::{AudioError, DeviceId, RouteChange, TransportClass};
use parking_lot::RwLock;
use std::sync::Arc;

/// Blocking queries against the platform audio subsystem.
///
/// Every call may block and must only be made from the route worker thread.
/// Failures never surface as errors: implementations log them and return the
/// neutral value documented on each method, so a flaky device cannot abort an
/// enumeration pass. Nothing is cached between calls.
pub trait AudioHardware: Send + Sync {
    /// Every attached audio device regardless of direction. Empty on failure.
    fn list_device_ids(&self) -> Vec<DeviceId>;

    /// Sum of channels across the device's output streams. 0 on failure or
    /// when the device has no output streams.
    fn output_channel_count(&self, id: &DeviceId) -> u32;

    /// None on failure.
    fn display_name(&self, id: &DeviceId) -> Option<String>;

    /// `TransportClass::Unknown` on failure.
    fn transport_class(&self, id: &DeviceId) -> TransportClass;

    /// None when the system has no resolvable default output.
    fn current_default_output_id(&self) -> Option<DeviceId>;

    /// Ask the system to route output to `id`. Returns whether the platform
    /// accepted the request; local state is reconciled by the next refresh.
    fn set_default_output_id(&self, id: &DeviceId) -> bool;
}

/// Callback invoked by a [`RouteChangeSource`] on whatever thread the
/// platform delivers notifications on.
pub type RouteChangeHandler = Arc<dyn Fn(RouteChange) + Send + Sync>;

/// Platform route-change notification source.
pub trait RouteChangeSource: Send {
    /// Start delivering notifications to `handler`. Registering twice replaces
    /// the previous handler.
    fn register(&mut self, handler: RouteChangeHandler) -> Result<(), AudioError>;

    /// Stop delivering notifications. Once this returns the handler is never
    /// invoked again. Safe to call when not registered.
    fn unregister(&mut self);
}

/// Shared handler cell for notification sources.
///
/// Platform callbacks deliver through [`HandlerSlot::deliver`] while holding a
/// read lock, so [`HandlerSlot::clear`] waits out any delivery in flight. This
/// is what lets `unregister` promise no late callbacks.
#[derive(Clone, Default)]
pub struct HandlerSlot {
    handler: Arc<RwLock<Option<RouteChangeHandler>>>,
}

impl HandlerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, handler: RouteChangeHandler) {
        *self.handler.write() = Some(handler);
    }

    pub fn clear(&self) {
        self.handler.write().take();
    }

    pub fn is_set(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Invoke the handler if one is set. Returns whether it was invoked.
    pub fn deliver(&self, change: RouteChange) -> bool {
        let guard = self.handler.read();
        match guard.as_ref() {
            Some(handler) => {
                handler(change);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handler_slot_delivers_until_cleared() {
        let slot = HandlerSlot::new();
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(!slot.deliver(RouteChange::DeviceListChanged));

        let counter = hits.clone();
        slot.set(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(slot.is_set());
        assert!(slot.deliver(RouteChange::DeviceListChanged));

        slot.clear();
        assert!(!slot.deliver(RouteChange::DeviceListChanged));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
