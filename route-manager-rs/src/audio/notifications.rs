//! Route change notifications using IMMNotificationClient.

use super::device::{AudioError, DeviceId, RouteChange};
use super::enumerator::{create_enumerator, with_com};
use super::hardware::{HandlerSlot, RouteChangeHandler, RouteChangeSource};
use windows::core::{implement, PCWSTR};
use windows::Win32::Media::Audio::{
    eRender, EDataFlow, ERole, IMMDeviceEnumerator, IMMNotificationClient,
    IMMNotificationClient_Impl, DEVICE_STATE,
};
use windows::Win32::System::Com::{CoDecrementMTAUsage, CoIncrementMTAUsage, CO_MTA_USAGE_COOKIE};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;
// Re-export windows_core so the implement macro can find it
#[allow(unused_imports)]
use windows_core;

/// Notification client that forwards endpoint events to a [`HandlerSlot`].
#[implement(IMMNotificationClient)]
struct DeviceNotificationClient {
    slot: HandlerSlot,
}

impl DeviceNotificationClient {
    fn forward(&self, change: RouteChange) {
        tracing::debug!(?change, "Endpoint notification");
        self.slot.deliver(change);
    }
}

unsafe fn pcwstr_to_id(raw: &PCWSTR) -> Option<DeviceId> {
    if raw.is_null() {
        return None;
    }
    raw.to_string().ok().map(DeviceId::from)
}

impl IMMNotificationClient_Impl for DeviceNotificationClient_Impl {
    fn OnDeviceStateChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        _dwnewstate: DEVICE_STATE,
    ) -> windows::core::Result<()> {
        if let Some(device_id) = unsafe { pcwstr_to_id(pwstrdeviceid) } {
            self.forward(RouteChange::DeviceStateChanged { device_id });
        }
        Ok(())
    }

    fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        if let Some(device_id) = unsafe { pcwstr_to_id(pwstrdeviceid) } {
            self.forward(RouteChange::DeviceAdded { device_id });
        }
        Ok(())
    }

    fn OnDeviceRemoved(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        if let Some(device_id) = unsafe { pcwstr_to_id(pwstrdeviceid) } {
            self.forward(RouteChange::DeviceRemoved { device_id });
        }
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        _role: ERole,
        pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        // Only care about render devices
        if flow != eRender {
            return Ok(());
        }

        let device_id = unsafe { pcwstr_to_id(pwstrdefaultdeviceid) };
        self.forward(RouteChange::DefaultOutputChanged { device_id });
        Ok(())
    }

    fn OnPropertyValueChanged(
        &self,
        _pwstrdeviceid: &PCWSTR,
        _key: &PROPERTYKEY,
    ) -> windows::core::Result<()> {
        Ok(())
    }
}

/// Keeps the process MTA alive independent of any one thread's COM init.
/// Released with `CoDecrementMTAUsage`, which may run on any thread.
struct MtaUsage(CO_MTA_USAGE_COOKIE);

impl MtaUsage {
    fn acquire() -> Result<Self, AudioError> {
        let cookie = unsafe { CoIncrementMTAUsage().map_err(AudioError::ComInitFailed)? };
        Ok(Self(cookie))
    }
}

impl Drop for MtaUsage {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CoDecrementMTAUsage(self.0) } {
            tracing::warn!(error = %e, "Failed to release MTA usage");
        }
    }
}

struct Registration {
    enumerator: IMMDeviceEnumerator,
    client: IMMNotificationClient,
    // Dropped last so the MTA outlives the interfaces above
    _mta: MtaUsage,
}

impl Registration {
    fn attach(
        slot: HandlerSlot,
        connect: fn() -> Result<IMMDeviceEnumerator, AudioError>,
    ) -> Result<Self, AudioError> {
        let mta = MtaUsage::acquire()?;
        with_com(|| {
            let enumerator = connect()?;
            let client: IMMNotificationClient = DeviceNotificationClient { slot }.into();
            unsafe {
                enumerator
                    .RegisterEndpointNotificationCallback(&client)
                    .map_err(|e| AudioError::NotificationRegistration(e.to_string()))?;
            }
            Ok(Self {
                enumerator,
                client,
                _mta: mta,
            })
        })
    }

    fn detach(self) {
        let result = unsafe {
            self.enumerator
                .UnregisterEndpointNotificationCallback(&self.client)
        };
        match result {
            Ok(()) => tracing::debug!("Unregistered endpoint notification client"),
            Err(e) => tracing::warn!(error = %e, "Failed to unregister endpoint notification client"),
        }
    }
}

/// Production [`RouteChangeSource`] for Windows.
///
/// Holds no per-thread COM state, so `register` and `unregister` may run on
/// different threads, including ones already in a single-threaded apartment.
pub struct WindowsRouteChangeSource {
    slot: HandlerSlot,
    registration: Option<Registration>,
    connect: fn() -> Result<IMMDeviceEnumerator, AudioError>,
}

// MMDevice enumerator and notification client are free-threaded.
unsafe impl Send for WindowsRouteChangeSource {}

impl WindowsRouteChangeSource {
    pub fn new() -> Self {
        Self::with_connector(create_enumerator)
    }

    fn with_connector(connect: fn() -> Result<IMMDeviceEnumerator, AudioError>) -> Self {
        Self {
            slot: HandlerSlot::new(),
            registration: None,
            connect,
        }
    }
}

impl Default for WindowsRouteChangeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteChangeSource for WindowsRouteChangeSource {
    fn register(&mut self, handler: RouteChangeHandler) -> Result<(), AudioError> {
        if self.registration.is_none() {
            self.registration = Some(Registration::attach(self.slot.clone(), self.connect)?);
            tracing::debug!("Registered endpoint notification client");
        }
        self.slot.set(handler);
        Ok(())
    }

    fn unregister(&mut self) {
        self.slot.clear();
        if let Some(registration) = self.registration.take() {
            registration.detach();
        }
    }
}

impl Drop for WindowsRouteChangeSource {
    fn drop(&mut self) {
        self.unregister();
    }
}
