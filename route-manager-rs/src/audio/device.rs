//! Audio device data models.
//!
//! Defines the core data structures for representing output devices,
//! their transport, route-change causes, and the error type shared by the
//! platform backends.

use std::fmt;
use thiserror::Error;

/// Opaque platform device identifier.
///
/// Stable while the device stays attached; a reconnect may hand out a new one.
/// On Windows this is the endpoint ID string from `IMMDevice::GetId`, on macOS
/// the decimal `AudioObjectID`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How an output device is attached to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportClass {
    /// Speakers or headphone jack wired to the machine itself
    BuiltIn,
    Usb,
    Bluetooth,
    /// AirPlay, Miracast and other network display sinks
    WirelessDisplay,
    /// HDMI or DisplayPort audio
    Hdmi,
    FireWire,
    /// Software devices and bare PCI/PCIe cards
    Virtual,
    #[default]
    Unknown,
}

impl TransportClass {
    /// Stable lowercase identifier, handed to icon classifiers and serialized by the FFI.
    pub fn label(&self) -> &'static str {
        match self {
            TransportClass::BuiltIn => "builtin",
            TransportClass::Usb => "usb",
            TransportClass::Bluetooth => "bluetooth",
            TransportClass::WirelessDisplay => "wireless_display",
            TransportClass::Hdmi => "hdmi",
            TransportClass::FireWire => "firewire",
            TransportClass::Virtual => "virtual",
            TransportClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransportClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An output-capable device as it was seen during one enumeration pass.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: DeviceId,

    /// Human-readable device name, or the configured placeholder
    pub name: String,

    pub transport: TransportClass,
}

impl DeviceRecord {
    pub fn new(id: impl Into<DeviceId>, name: impl Into<String>, transport: TransportClass) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport,
        }
    }

    /// Strict equality: identifier, name and transport all match.
    pub fn same_route(&self, other: &DeviceRecord) -> bool {
        self == other && self.transport == other.transport
    }
}

/// Two records are equal when identifier and name match. Use
/// [`DeviceRecord::same_route`] to also compare the transport.
impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Eq for DeviceRecord {}

/// Why the platform reported a route change.
///
/// Only used for logging; every cause triggers the same full refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteChange {
    DeviceAdded { device_id: DeviceId },
    DeviceRemoved { device_id: DeviceId },
    DeviceStateChanged { device_id: DeviceId },

    /// Default output changed (None if the system has no default)
    DefaultOutputChanged { device_id: Option<DeviceId> },

    /// The device list changed without naming a device
    DeviceListChanged,
}

/// Audio backend error types.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("No default output device available")]
    NoDefaultDevice,

    #[cfg(windows)]
    #[error("COM initialization failed: {0}")]
    ComInitFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsError(#[source] windows::core::Error),

    #[error("CoreAudio call {operation} failed with status {status}")]
    CoreAudio { operation: &'static str, status: i32 },

    #[error("Failed to register for route change notifications: {0}")]
    NotificationRegistration(String),

    #[error("String conversion error: {0}")]
    StringConversion(String),

    #[error("Platform not supported: {0}")]
    PlatformNotSupported(String),

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for AudioError {
    fn from(err: windows::core::Error) -> Self {
        AudioError::WindowsError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_transport() {
        let usb = DeviceRecord::new("a", "Speakers", TransportClass::Usb);
        let builtin = DeviceRecord::new("a", "Speakers", TransportClass::BuiltIn);

        assert_eq!(usb, builtin);
        assert!(!usb.same_route(&builtin));
        assert!(usb.same_route(&usb.clone()));
    }

    #[test]
    fn test_equality_requires_id_and_name() {
        let a = DeviceRecord::new("a", "Speakers", TransportClass::BuiltIn);
        assert_ne!(a, DeviceRecord::new("b", "Speakers", TransportClass::BuiltIn));
        assert_ne!(a, DeviceRecord::new("a", "Headphones", TransportClass::BuiltIn));
    }

    #[test]
    fn test_transport_labels_are_distinct() {
        let all = [
            TransportClass::BuiltIn,
            TransportClass::Usb,
            TransportClass::Bluetooth,
            TransportClass::WirelessDisplay,
            TransportClass::Hdmi,
            TransportClass::FireWire,
            TransportClass::Virtual,
            TransportClass::Unknown,
        ];
        let mut labels: Vec<_> = all.iter().map(|t| t.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), all.len());
        assert_eq!(TransportClass::default(), TransportClass::Unknown);
    }

    #[test]
    fn test_error_display() {
        let err = AudioError::DeviceNotFound {
            device_id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Device not found: abc");

        let err = AudioError::CoreAudio {
            operation: "AudioObjectGetPropertyData",
            status: -50,
        };
        assert!(err.to_string().contains("-50"));
    }
}
