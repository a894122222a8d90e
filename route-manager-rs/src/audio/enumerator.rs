//! Device enumeration using Windows MMDevice API.
//!
//! Provides COM initialization and the production [`AudioHardware`] for Windows.

use super::device::{AudioError, DeviceId, TransportClass};
use super::hardware::AudioHardware;
use super::policy::PolicyConfig;
use super::transport::classify_windows_endpoint;
use std::marker::PhantomData;
use windows::core::{Interface, GUID, PCWSTR, PROPVARIANT};
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::{
    eAll, eConsole, eRender, IAudioClient, IMMDevice, IMMDeviceEnumerator, IMMEndpoint,
    MMDeviceEnumerator, DEVICE_STATE_ACTIVE, WAVEFORMATEX,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED, STGM,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

// {a45c254e-df1c-4efd-8020-67d146a850e0},24
const PKEY_DEVICE_ENUMERATOR_NAME: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    pid: 24,
};

// {1da5d803-d492-4edd-8c23-e0c0ffee7f0e},0
const PKEY_AUDIO_ENDPOINT_FORM_FACTOR: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0x1da5d803_d492_4edd_8c23_e0c0ffee7f0e),
    pid: 0,
};

/// COM initialization guard that uninitializes COM on drop.
///
/// Pinned to the thread that created it: `CoUninitialize` must balance a
/// `CoInitializeEx` on the same thread.
pub struct ComGuard {
    initialized: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl ComGuard {
    /// Join the multithreaded apartment on the current thread.
    ///
    /// A thread that already lives in a single-threaded apartment (a UI
    /// thread) is used as is and left initialized on drop.
    pub fn new() -> Result<Self, AudioError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            tracing::debug!("Thread already in a single-threaded apartment");
            return Ok(Self {
                initialized: false,
                _thread_bound: PhantomData,
            });
        }
        hr.ok().map_err(AudioError::ComInitFailed)?;
        Ok(Self {
            initialized: true,
            _thread_bound: PhantomData,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Execute a closure with COM initialized for the current thread.
pub(crate) fn with_com<T, F: FnOnce() -> Result<T, AudioError>>(f: F) -> Result<T, AudioError> {
    let _com = ComGuard::new()?;
    f()
}

pub(crate) fn create_enumerator() -> Result<IMMDeviceEnumerator, AudioError> {
    unsafe { Ok(CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?) }
}

pub(crate) fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// `VT_EMPTY` means the property is absent, not a zero form factor.
fn propvariant_u32(prop: &PROPVARIANT) -> Option<u32> {
    if prop.is_empty() {
        return None;
    }
    u32::try_from(prop).ok()
}

/// Read and free the endpoint ID of a device.
fn device_id(device: &IMMDevice) -> Result<DeviceId, AudioError> {
    unsafe {
        let raw = device.GetId()?;
        let id = raw
            .to_string()
            .map_err(|e| AudioError::StringConversion(e.to_string()));
        CoTaskMemFree(Some(raw.as_ptr() as *const _));
        Ok(DeviceId::from(id?))
    }
}

/// Production [`AudioHardware`] backed by the MMDevice API.
///
/// Holds no COM objects: every query joins the MTA, creates its own
/// enumerator and releases everything before returning, so the value can be
/// shared with the route worker thread.
#[derive(Debug, Default)]
pub struct WindowsHardware;

impl WindowsHardware {
    pub fn new() -> Self {
        Self
    }

    fn open_device(
        enumerator: &IMMDeviceEnumerator,
        id: &DeviceId,
    ) -> Result<IMMDevice, AudioError> {
        let wide = to_wide(id.as_str());
        unsafe {
            enumerator
                .GetDevice(PCWSTR::from_raw(wide.as_ptr()))
                .map_err(|_| AudioError::DeviceNotFound {
                    device_id: id.to_string(),
                })
        }
    }

    fn query<T>(
        &self,
        what: &'static str,
        id: &DeviceId,
        f: impl FnOnce(&IMMDevice) -> Result<T, AudioError>,
    ) -> Result<T, AudioError> {
        with_com(|| {
            let enumerator = create_enumerator()?;
            let device = Self::open_device(&enumerator, id)?;
            f(&device)
        })
        .map_err(|e| {
            tracing::warn!(device_id = %id, query = what, error = %e, "Device query failed");
            e
        })
    }

    fn read_u32(props: &IPropertyStore, key: &PROPERTYKEY) -> Option<u32> {
        let prop = unsafe { props.GetValue(key).ok()? };
        propvariant_u32(&prop)
    }

    fn read_string(props: &IPropertyStore, key: &PROPERTYKEY) -> Option<String> {
        unsafe {
            let prop = props.GetValue(key).ok()?;
            let s = prop.to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
    }

    fn list_ids() -> Result<Vec<DeviceId>, AudioError> {
        with_com(|| unsafe {
            let enumerator = create_enumerator()?;
            let collection = enumerator.EnumAudioEndpoints(eAll, DEVICE_STATE_ACTIVE)?;
            let count = collection.GetCount()?;

            let mut ids = Vec::with_capacity(count as usize);
            for i in 0..count {
                match collection.Item(i).map_err(AudioError::from).and_then(|d| device_id(&d)) {
                    Ok(id) => ids.push(id),
                    Err(e) => tracing::debug!(index = i, error = %e, "Skipping unreadable endpoint"),
                }
            }
            Ok(ids)
        })
    }

    fn mix_format_channels(device: &IMMDevice) -> Result<u32, AudioError> {
        unsafe {
            let endpoint: IMMEndpoint = device.cast()?;
            if endpoint.GetDataFlow()? != eRender {
                return Ok(0);
            }

            let audio_client: IAudioClient = device.Activate(CLSCTX_ALL, None)?;
            let format_ptr = audio_client.GetMixFormat()?;
            if format_ptr.is_null() {
                return Ok(0);
            }

            let format: &WAVEFORMATEX = &*format_ptr;
            let channels = u32::from(format.nChannels);
            CoTaskMemFree(Some(format_ptr as *const _));
            Ok(channels)
        }
    }
}

impl AudioHardware for WindowsHardware {
    fn list_device_ids(&self) -> Vec<DeviceId> {
        Self::list_ids().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to enumerate audio endpoints");
            Vec::new()
        })
    }

    fn output_channel_count(&self, id: &DeviceId) -> u32 {
        self.query("output_channel_count", id, Self::mix_format_channels)
            .unwrap_or(0)
    }

    fn display_name(&self, id: &DeviceId) -> Option<String> {
        self.query("display_name", id, |device| unsafe {
            let props: IPropertyStore = device.OpenPropertyStore(STGM(0))?;
            // Convert DEVPROPKEY to PROPERTYKEY
            let key = PROPERTYKEY {
                fmtid: DEVPKEY_Device_FriendlyName.fmtid,
                pid: DEVPKEY_Device_FriendlyName.pid,
            };
            Ok(Self::read_string(&props, &key))
        })
        .ok()
        .flatten()
    }

    fn transport_class(&self, id: &DeviceId) -> TransportClass {
        self.query("transport_class", id, |device| unsafe {
            let props: IPropertyStore = device.OpenPropertyStore(STGM(0))?;
            let enumerator = Self::read_string(&props, &PKEY_DEVICE_ENUMERATOR_NAME);
            let form_factor = Self::read_u32(&props, &PKEY_AUDIO_ENDPOINT_FORM_FACTOR);
            Ok(classify_windows_endpoint(enumerator.as_deref(), form_factor))
        })
        .unwrap_or_default()
    }

    fn current_default_output_id(&self) -> Option<DeviceId> {
        let result = with_com(|| unsafe {
            let enumerator = create_enumerator()?;
            match enumerator.GetDefaultAudioEndpoint(eRender, eConsole) {
                Ok(device) => device_id(&device).map(Some),
                Err(_) => Ok(None),
            }
        });

        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read default output endpoint");
            None
        })
    }

    fn set_default_output_id(&self, id: &DeviceId) -> bool {
        let result = with_com(|| {
            let policy = PolicyConfig::new()?;
            policy.set_default_device_for_all_roles(id.as_str())
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(device_id = %id, error = %e, "Failed to set default output endpoint");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::System::Com::COINIT_APARTMENTTHREADED;

    #[test]
    fn test_com_guard_joins_single_threaded_apartment() {
        let handle = std::thread::spawn(|| unsafe {
            assert!(CoInitializeEx(None, COINIT_APARTMENTTHREADED).is_ok());
            let joined = ComGuard::new().map(|guard| guard.initialized).ok();
            let created = with_com(|| create_enumerator().map(|_| ())).is_ok();
            CoUninitialize();
            (joined, created)
        });

        let (joined, created) = handle.join().unwrap();
        assert_eq!(joined, Some(false));
        assert!(created);
    }

    #[test]
    fn test_com_guard_on_fresh_thread() {
        let handle = std::thread::spawn(|| ComGuard::new().map(|guard| guard.initialized).ok());
        assert_eq!(handle.join().unwrap(), Some(true));
    }

    #[test]
    fn test_propvariant_u32() {
        assert_eq!(propvariant_u32(&PROPVARIANT::from(3u32)), Some(3));
        assert_eq!(propvariant_u32(&PROPVARIANT::from(10u32)), Some(10));
        assert_eq!(propvariant_u32(&PROPVARIANT::default()), None);
    }
}
