//! CoreAudio HAL backend for macOS.
//!
//! Talks to the HAL property API directly: the device list, default output,
//! and per-device name, stream configuration and transport all come from
//! `AudioObjectGetPropertyData`. Route changes arrive through property
//! listeners on the system object.

use super::device::{AudioError, DeviceId, RouteChange, TransportClass};
use super::hardware::{AudioHardware, HandlerSlot, RouteChangeHandler, RouteChangeSource};
use super::transport::classify_coreaudio_transport;
use std::ffi::c_void;
use std::ptr;

type OSStatus = i32;
type AudioObjectID = u32;
type AudioObjectPropertySelector = u32;
type AudioObjectPropertyScope = u32;
type AudioObjectPropertyElement = u32;

const K_AUDIO_OBJECT_SYSTEM_OBJECT: AudioObjectID = 1;
const K_AUDIO_OBJECT_UNKNOWN: AudioObjectID = 0;

const K_AUDIO_HARDWARE_PROPERTY_DEVICES: AudioObjectPropertySelector = 0x64657623; // 'dev#'
const K_AUDIO_HARDWARE_PROPERTY_DEFAULT_OUTPUT_DEVICE: AudioObjectPropertySelector = 0x646f7574; // 'dout'
const K_AUDIO_OBJECT_PROPERTY_NAME: AudioObjectPropertySelector = 0x6c6e616d; // 'lnam'
const K_AUDIO_DEVICE_PROPERTY_STREAM_CONFIGURATION: AudioObjectPropertySelector = 0x736c6179; // 'slay'
const K_AUDIO_DEVICE_PROPERTY_TRANSPORT_TYPE: AudioObjectPropertySelector = 0x7472616e; // 'tran'

const K_AUDIO_OBJECT_PROPERTY_SCOPE_GLOBAL: AudioObjectPropertyScope = 0x676c6f62; // 'glob'
const K_AUDIO_OBJECT_PROPERTY_SCOPE_OUTPUT: AudioObjectPropertyScope = 0x6f757470; // 'outp'
const K_AUDIO_OBJECT_PROPERTY_ELEMENT_MAIN: AudioObjectPropertyElement = 0;

const K_CFSTRING_ENCODING_UTF8: u32 = 0x08000100;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct AudioObjectPropertyAddress {
    selector: AudioObjectPropertySelector,
    scope: AudioObjectPropertyScope,
    element: AudioObjectPropertyElement,
}

impl AudioObjectPropertyAddress {
    const fn global(selector: AudioObjectPropertySelector) -> Self {
        Self {
            selector,
            scope: K_AUDIO_OBJECT_PROPERTY_SCOPE_GLOBAL,
            element: K_AUDIO_OBJECT_PROPERTY_ELEMENT_MAIN,
        }
    }

    const fn output(selector: AudioObjectPropertySelector) -> Self {
        Self {
            selector,
            scope: K_AUDIO_OBJECT_PROPERTY_SCOPE_OUTPUT,
            element: K_AUDIO_OBJECT_PROPERTY_ELEMENT_MAIN,
        }
    }
}

// CoreAudio headers are compiled under `#pragma pack(push, 4)`
#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
struct AudioBuffer {
    number_channels: u32,
    data_byte_size: u32,
    data: *mut c_void,
}

type AudioObjectPropertyListenerProc = unsafe extern "C" fn(
    object: AudioObjectID,
    number_addresses: u32,
    addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus;

#[link(name = "CoreAudio", kind = "framework")]
unsafe extern "C" {
    fn AudioObjectGetPropertyDataSize(
        object: AudioObjectID,
        address: *const AudioObjectPropertyAddress,
        qualifier_data_size: u32,
        qualifier_data: *const c_void,
        out_data_size: *mut u32,
    ) -> OSStatus;

    fn AudioObjectGetPropertyData(
        object: AudioObjectID,
        address: *const AudioObjectPropertyAddress,
        qualifier_data_size: u32,
        qualifier_data: *const c_void,
        io_data_size: *mut u32,
        out_data: *mut c_void,
    ) -> OSStatus;

    fn AudioObjectSetPropertyData(
        object: AudioObjectID,
        address: *const AudioObjectPropertyAddress,
        qualifier_data_size: u32,
        qualifier_data: *const c_void,
        data_size: u32,
        data: *const c_void,
    ) -> OSStatus;

    fn AudioObjectAddPropertyListener(
        object: AudioObjectID,
        address: *const AudioObjectPropertyAddress,
        listener: AudioObjectPropertyListenerProc,
        client_data: *mut c_void,
    ) -> OSStatus;

    fn AudioObjectRemovePropertyListener(
        object: AudioObjectID,
        address: *const AudioObjectPropertyAddress,
        listener: AudioObjectPropertyListenerProc,
        client_data: *mut c_void,
    ) -> OSStatus;
}

#[link(name = "CoreFoundation", kind = "framework")]
unsafe extern "C" {
    fn CFStringGetLength(string: *const c_void) -> isize;
    fn CFStringGetCString(
        string: *const c_void,
        buffer: *mut i8,
        buffer_size: isize,
        encoding: u32,
    ) -> bool;
    fn CFRelease(cf: *const c_void);
}

fn check(operation: &'static str, status: OSStatus) -> Result<(), AudioError> {
    if status == 0 {
        Ok(())
    } else {
        Err(AudioError::CoreAudio { operation, status })
    }
}

fn property_size(object: AudioObjectID, address: &AudioObjectPropertyAddress) -> Result<u32, AudioError> {
    let mut size: u32 = 0;
    let status = unsafe { AudioObjectGetPropertyDataSize(object, address, 0, ptr::null(), &mut size) };
    check("AudioObjectGetPropertyDataSize", status)?;
    Ok(size)
}

fn property_u32(object: AudioObjectID, address: &AudioObjectPropertyAddress) -> Result<u32, AudioError> {
    let mut value: u32 = 0;
    let mut size = std::mem::size_of::<u32>() as u32;
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            address,
            0,
            ptr::null(),
            &mut size,
            &mut value as *mut u32 as *mut c_void,
        )
    };
    check("AudioObjectGetPropertyData", status)?;
    Ok(value)
}

/// Read a variable-length property into a byte buffer.
fn property_bytes(object: AudioObjectID, address: &AudioObjectPropertyAddress) -> Result<Vec<u8>, AudioError> {
    let size = property_size(object, address)?;
    let mut buffer = vec![0u8; size as usize];
    if size == 0 {
        return Ok(buffer);
    }

    let mut actual_size = size;
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            address,
            0,
            ptr::null(),
            &mut actual_size,
            buffer.as_mut_ptr() as *mut c_void,
        )
    };
    check("AudioObjectGetPropertyData", status)?;
    buffer.truncate(actual_size as usize);
    Ok(buffer)
}

/// Convert a CFStringRef to a Rust String, releasing the reference.
fn take_cfstring(cf_string: *const c_void) -> Option<String> {
    if cf_string.is_null() {
        return None;
    }

    unsafe {
        let length = CFStringGetLength(cf_string);
        let buffer_size = (length.max(0) * 4 + 1) as usize; // UTF-8 worst case
        let mut buffer: Vec<i8> = vec![0; buffer_size];
        let ok = CFStringGetCString(
            cf_string,
            buffer.as_mut_ptr(),
            buffer_size as isize,
            K_CFSTRING_ENCODING_UTF8,
        );
        CFRelease(cf_string);

        if !ok {
            return None;
        }
        let name = std::ffi::CStr::from_ptr(buffer.as_ptr()).to_string_lossy().into_owned();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

fn parse_object_id(id: &DeviceId) -> Option<AudioObjectID> {
    id.as_str().parse::<AudioObjectID>().ok()
}

fn to_device_id(object: AudioObjectID) -> DeviceId {
    DeviceId::new(object.to_string())
}

/// Production [`AudioHardware`] for macOS.
#[derive(Debug, Default)]
pub struct CoreAudioHardware;

impl CoreAudioHardware {
    pub fn new() -> Self {
        Self
    }

    fn object_for(id: &DeviceId) -> Result<AudioObjectID, AudioError> {
        parse_object_id(id).ok_or_else(|| AudioError::DeviceNotFound {
            device_id: id.to_string(),
        })
    }

    fn list_objects() -> Result<Vec<AudioObjectID>, AudioError> {
        let address = AudioObjectPropertyAddress::global(K_AUDIO_HARDWARE_PROPERTY_DEVICES);
        let bytes = property_bytes(K_AUDIO_OBJECT_SYSTEM_OBJECT, &address)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<AudioObjectID>())
            .map(|chunk| AudioObjectID::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Sum `mNumberChannels` over the output-scope AudioBufferList.
    fn output_channels(object: AudioObjectID) -> Result<u32, AudioError> {
        let address = AudioObjectPropertyAddress::output(K_AUDIO_DEVICE_PROPERTY_STREAM_CONFIGURATION);
        let bytes = property_bytes(object, &address)?;
        Ok(sum_buffer_list_channels(&bytes))
    }

    fn name(object: AudioObjectID) -> Result<Option<String>, AudioError> {
        let address = AudioObjectPropertyAddress::global(K_AUDIO_OBJECT_PROPERTY_NAME);
        let mut cf_string: *const c_void = ptr::null();
        let mut size = std::mem::size_of::<*const c_void>() as u32;
        let status = unsafe {
            AudioObjectGetPropertyData(
                object,
                &address,
                0,
                ptr::null(),
                &mut size,
                &mut cf_string as *mut *const c_void as *mut c_void,
            )
        };
        check("AudioObjectGetPropertyData", status)?;
        Ok(take_cfstring(cf_string))
    }
}

/// Walk a raw `AudioBufferList` (u32 count, then packed `AudioBuffer`s)
/// and total the channel counts. Truncated buffers count what is present.
fn sum_buffer_list_channels(bytes: &[u8]) -> u32 {
    if bytes.len() < std::mem::size_of::<u32>() {
        return 0;
    }
    let number_buffers = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;

    // pack(4): mBuffers follows mNumberBuffers with no padding
    let offset = std::mem::size_of::<u32>();
    let stride = std::mem::size_of::<AudioBuffer>();

    (0..number_buffers)
        .map(|i| offset + i * stride)
        .take_while(|start| start + std::mem::size_of::<u32>() <= bytes.len())
        .map(|start| {
            u32::from_ne_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]])
        })
        .sum()
}

impl AudioHardware for CoreAudioHardware {
    fn list_device_ids(&self) -> Vec<DeviceId> {
        match Self::list_objects() {
            Ok(objects) => objects.into_iter().map(to_device_id).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list CoreAudio devices");
                Vec::new()
            }
        }
    }

    fn output_channel_count(&self, id: &DeviceId) -> u32 {
        Self::object_for(id)
            .and_then(Self::output_channels)
            .unwrap_or_else(|e| {
                tracing::warn!(device_id = %id, error = %e, "Failed to read stream configuration");
                0
            })
    }

    fn display_name(&self, id: &DeviceId) -> Option<String> {
        Self::object_for(id)
            .and_then(Self::name)
            .unwrap_or_else(|e| {
                tracing::warn!(device_id = %id, error = %e, "Failed to read device name");
                None
            })
    }

    fn transport_class(&self, id: &DeviceId) -> TransportClass {
        let address = AudioObjectPropertyAddress::global(K_AUDIO_DEVICE_PROPERTY_TRANSPORT_TYPE);
        Self::object_for(id)
            .and_then(|object| property_u32(object, &address))
            .map(classify_coreaudio_transport)
            .unwrap_or_else(|e| {
                tracing::warn!(device_id = %id, error = %e, "Failed to read transport type");
                TransportClass::Unknown
            })
    }

    fn current_default_output_id(&self) -> Option<DeviceId> {
        let address = AudioObjectPropertyAddress::global(K_AUDIO_HARDWARE_PROPERTY_DEFAULT_OUTPUT_DEVICE);
        match property_u32(K_AUDIO_OBJECT_SYSTEM_OBJECT, &address) {
            Ok(K_AUDIO_OBJECT_UNKNOWN) => None,
            Ok(object) => Some(to_device_id(object)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read default output device");
                None
            }
        }
    }

    fn set_default_output_id(&self, id: &DeviceId) -> bool {
        let Some(object) = parse_object_id(id) else {
            tracing::warn!(device_id = %id, "Not a CoreAudio object id");
            return false;
        };

        let address = AudioObjectPropertyAddress::global(K_AUDIO_HARDWARE_PROPERTY_DEFAULT_OUTPUT_DEVICE);
        let status = unsafe {
            AudioObjectSetPropertyData(
                K_AUDIO_OBJECT_SYSTEM_OBJECT,
                &address,
                0,
                ptr::null(),
                std::mem::size_of::<AudioObjectID>() as u32,
                &object as *const AudioObjectID as *const c_void,
            )
        };

        match check("AudioObjectSetPropertyData", status) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(device_id = %id, error = %e, "Failed to set default output device");
                false
            }
        }
    }
}

const LISTENED_PROPERTIES: [AudioObjectPropertyAddress; 2] = [
    AudioObjectPropertyAddress::global(K_AUDIO_HARDWARE_PROPERTY_DEVICES),
    AudioObjectPropertyAddress::global(K_AUDIO_HARDWARE_PROPERTY_DEFAULT_OUTPUT_DEVICE),
];

unsafe extern "C" fn route_listener(
    _object: AudioObjectID,
    number_addresses: u32,
    addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() || addresses.is_null() {
        return 0;
    }
    let slot = &*(client_data as *const HandlerSlot);
    let addresses = std::slice::from_raw_parts(addresses, number_addresses as usize);

    for address in addresses {
        let change = match address.selector {
            K_AUDIO_HARDWARE_PROPERTY_DEFAULT_OUTPUT_DEVICE => RouteChange::DefaultOutputChanged { device_id: None },
            _ => RouteChange::DeviceListChanged,
        };
        tracing::debug!(?change, "CoreAudio property notification");
        slot.deliver(change);
    }
    0
}

/// Production [`RouteChangeSource`] for macOS.
pub struct CoreAudioRouteChangeSource {
    // Boxed: the listener's client-data pointer must stay valid until drop
    slot: Box<HandlerSlot>,
    registered: bool,
}

impl CoreAudioRouteChangeSource {
    pub fn new() -> Self {
        Self {
            slot: Box::new(HandlerSlot::new()),
            registered: false,
        }
    }

    fn client_data(&self) -> *mut c_void {
        &*self.slot as *const HandlerSlot as *mut c_void
    }

    fn remove_listeners(&self, addresses: &[AudioObjectPropertyAddress]) {
        for address in addresses {
            let status = unsafe {
                AudioObjectRemovePropertyListener(
                    K_AUDIO_OBJECT_SYSTEM_OBJECT,
                    address,
                    route_listener,
                    self.client_data(),
                )
            };
            if let Err(e) = check("AudioObjectRemovePropertyListener", status) {
                tracing::warn!(error = %e, "Failed to remove property listener");
            }
        }
    }
}

impl Default for CoreAudioRouteChangeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteChangeSource for CoreAudioRouteChangeSource {
    fn register(&mut self, handler: RouteChangeHandler) -> Result<(), AudioError> {
        self.slot.set(handler);
        if self.registered {
            return Ok(());
        }

        for (i, address) in LISTENED_PROPERTIES.iter().enumerate() {
            let status = unsafe {
                AudioObjectAddPropertyListener(
                    K_AUDIO_OBJECT_SYSTEM_OBJECT,
                    address,
                    route_listener,
                    self.client_data(),
                )
            };
            if let Err(e) = check("AudioObjectAddPropertyListener", status) {
                self.remove_listeners(&LISTENED_PROPERTIES[..i]);
                self.slot.clear();
                return Err(AudioError::NotificationRegistration(e.to_string()));
            }
        }

        self.registered = true;
        tracing::debug!("Registered CoreAudio property listeners");
        Ok(())
    }

    fn unregister(&mut self) {
        self.slot.clear();
        if self.registered {
            self.remove_listeners(&LISTENED_PROPERTIES);
            self.registered = false;
            tracing::debug!("Removed CoreAudio property listeners");
        }
    }
}

impl Drop for CoreAudioRouteChangeSource {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Byte image of an AudioBufferList as the HAL returns it on a 64-bit
    // host: mNumberBuffers at 0, then 16-byte buffers starting at 4, each
    // holding mNumberChannels, mDataByteSize (0 for stream configs), mData.
    fn buffer_list(channels: &[u32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(channels.len() as u32).to_ne_bytes());
        for count in channels {
            bytes.extend_from_slice(&count.to_ne_bytes());
            bytes.extend_from_slice(&0u32.to_ne_bytes());
            bytes.extend_from_slice(&0u64.to_ne_bytes());
        }
        bytes
    }

    #[test]
    fn test_audio_buffer_layout() {
        assert_eq!(std::mem::size_of::<AudioBuffer>(), 16);
        assert_eq!(std::mem::align_of::<AudioBuffer>(), 4);
    }

    #[test]
    fn test_sum_buffer_list_channels() {
        assert_eq!(sum_buffer_list_channels(&buffer_list(&[2])), 2);
        assert_eq!(sum_buffer_list_channels(&buffer_list(&[2, 6])), 8);
        assert_eq!(sum_buffer_list_channels(&buffer_list(&[1, 1, 1])), 3);
        assert_eq!(sum_buffer_list_channels(&buffer_list(&[])), 0);
        assert_eq!(sum_buffer_list_channels(&[]), 0);
    }

    #[test]
    fn test_sum_buffer_list_channels_truncated() {
        let mut bytes = buffer_list(&[2, 6]);
        bytes.truncate(4 + 16 + 4);
        assert_eq!(sum_buffer_list_channels(&bytes), 8);
        bytes.truncate(4 + 16 + 2);
        assert_eq!(sum_buffer_list_channels(&bytes), 2);
    }

    #[test]
    fn test_object_id_round_trip() {
        let id = to_device_id(73);
        assert_eq!(parse_object_id(&id), Some(73));
        assert_eq!(parse_object_id(&DeviceId::new("not-a-number")), None);
    }

    #[test]
    fn test_unparsable_id_reads_neutral_values() {
        let hw = CoreAudioHardware::new();
        let id = DeviceId::new("not-a-device");
        assert_eq!(hw.output_channel_count(&id), 0);
        assert_eq!(hw.display_name(&id), None);
        assert_eq!(hw.transport_class(&id), TransportClass::Unknown);
        assert!(!hw.set_default_output_id(&id));
    }

    #[test]
    fn test_default_output_is_listed() {
        let hw = CoreAudioHardware::new();
        if let Some(active) = hw.current_default_output_id() {
            assert!(hw.list_device_ids().contains(&active));
        }
    }
}
