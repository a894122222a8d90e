//! Transport classification from raw platform properties.
//!
//! Kept free of platform imports so both backends share it and the mapping
//! can be tested on every host.

use super::device::TransportClass;

/// Windows `EndpointFormFactor::RemoteNetworkDevice`
pub const FORM_FACTOR_REMOTE_NETWORK_DEVICE: u32 = 0;

/// Windows `EndpointFormFactor::DigitalAudioDisplayDevice` (HDMI, DisplayPort)
pub const FORM_FACTOR_DIGITAL_AUDIO_DISPLAY: u32 = 9;

/// Classify a Windows render endpoint.
///
/// `enumerator` is the `PKEY_Device_EnumeratorName` of the endpoint's parent
/// device node ("USB", "BTHENUM", "HDAUDIO", ...), `form_factor` the raw
/// `PKEY_AudioEndpoint_FormFactor` value. Form factor wins for display and
/// network sinks because those hang off HDAUDIO or SWD like ordinary jacks do.
pub fn classify_windows_endpoint(enumerator: Option<&str>, form_factor: Option<u32>) -> TransportClass {
    match form_factor {
        Some(FORM_FACTOR_DIGITAL_AUDIO_DISPLAY) => return TransportClass::Hdmi,
        Some(FORM_FACTOR_REMOTE_NETWORK_DEVICE) => return TransportClass::WirelessDisplay,
        _ => {}
    }

    let Some(enumerator) = enumerator else {
        return TransportClass::Unknown;
    };

    match enumerator.trim().to_ascii_uppercase().as_str() {
        "USB" => TransportClass::Usb,
        name if name.starts_with("BTH") => TransportClass::Bluetooth,
        "HDAUDIO" | "INTELAUDIO" | "ACPI" => TransportClass::BuiltIn,
        "DISPLAY" => TransportClass::Hdmi,
        "1394" | "AVC" => TransportClass::FireWire,
        "PCI" | "ROOT" | "SW" | "SWD" | "MMDEVAPI" => TransportClass::Virtual,
        _ => TransportClass::Unknown,
    }
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

pub const CA_TRANSPORT_BUILT_IN: u32 = fourcc(b"bltn");
pub const CA_TRANSPORT_AGGREGATE: u32 = fourcc(b"grup");
pub const CA_TRANSPORT_VIRTUAL: u32 = fourcc(b"virt");
pub const CA_TRANSPORT_PCI: u32 = fourcc(b"pci ");
pub const CA_TRANSPORT_USB: u32 = fourcc(b"usb ");
pub const CA_TRANSPORT_FIREWIRE: u32 = fourcc(b"1394");
pub const CA_TRANSPORT_BLUETOOTH: u32 = fourcc(b"blue");
pub const CA_TRANSPORT_BLUETOOTH_LE: u32 = fourcc(b"blea");
pub const CA_TRANSPORT_HDMI: u32 = fourcc(b"hdmi");
pub const CA_TRANSPORT_DISPLAY_PORT: u32 = fourcc(b"dprt");
pub const CA_TRANSPORT_AIRPLAY: u32 = fourcc(b"airp");

/// Classify a CoreAudio `kAudioDevicePropertyTransportType` value.
pub fn classify_coreaudio_transport(transport_type: u32) -> TransportClass {
    match transport_type {
        CA_TRANSPORT_BUILT_IN => TransportClass::BuiltIn,
        CA_TRANSPORT_USB => TransportClass::Usb,
        CA_TRANSPORT_BLUETOOTH | CA_TRANSPORT_BLUETOOTH_LE => TransportClass::Bluetooth,
        CA_TRANSPORT_AIRPLAY => TransportClass::WirelessDisplay,
        CA_TRANSPORT_HDMI | CA_TRANSPORT_DISPLAY_PORT => TransportClass::Hdmi,
        CA_TRANSPORT_FIREWIRE => TransportClass::FireWire,
        CA_TRANSPORT_VIRTUAL | CA_TRANSPORT_PCI | CA_TRANSPORT_AGGREGATE => TransportClass::Virtual,
        _ => TransportClass::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_form_factor_overrides_enumerator() {
        assert_eq!(
            classify_windows_endpoint(Some("HDAUDIO"), Some(FORM_FACTOR_DIGITAL_AUDIO_DISPLAY)),
            TransportClass::Hdmi
        );
        assert_eq!(
            classify_windows_endpoint(Some("SWD"), Some(FORM_FACTOR_REMOTE_NETWORK_DEVICE)),
            TransportClass::WirelessDisplay
        );
    }

    #[test]
    fn test_windows_enumerator_names() {
        // 1 = Speakers, 3 = Headphones
        assert_eq!(classify_windows_endpoint(Some("USB"), Some(1)), TransportClass::Usb);
        assert_eq!(classify_windows_endpoint(Some("BTHENUM"), Some(3)), TransportClass::Bluetooth);
        assert_eq!(classify_windows_endpoint(Some("BTHLEDevice"), None), TransportClass::Bluetooth);
        assert_eq!(classify_windows_endpoint(Some("hdaudio"), Some(1)), TransportClass::BuiltIn);
        assert_eq!(classify_windows_endpoint(Some("ROOT"), Some(1)), TransportClass::Virtual);
        assert_eq!(classify_windows_endpoint(Some("1394"), None), TransportClass::FireWire);
        assert_eq!(classify_windows_endpoint(Some("ACME"), None), TransportClass::Unknown);
        assert_eq!(classify_windows_endpoint(None, Some(1)), TransportClass::Unknown);
    }

    #[test]
    fn test_coreaudio_codes() {
        assert_eq!(CA_TRANSPORT_BUILT_IN, 0x626c_746e);
        assert_eq!(classify_coreaudio_transport(CA_TRANSPORT_BUILT_IN), TransportClass::BuiltIn);
        assert_eq!(classify_coreaudio_transport(CA_TRANSPORT_AIRPLAY), TransportClass::WirelessDisplay);
        assert_eq!(classify_coreaudio_transport(CA_TRANSPORT_DISPLAY_PORT), TransportClass::Hdmi);
        assert_eq!(classify_coreaudio_transport(CA_TRANSPORT_BLUETOOTH_LE), TransportClass::Bluetooth);
        assert_eq!(classify_coreaudio_transport(CA_TRANSPORT_AGGREGATE), TransportClass::Virtual);
        assert_eq!(classify_coreaudio_transport(0), TransportClass::Unknown);
    }
}
