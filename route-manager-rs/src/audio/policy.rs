//! Default endpoint switching through the undocumented `IPolicyConfig` interface.

use super::device::AudioError;
use super::enumerator::to_wide;
use windows::core::{IUnknown, IUnknown_Vtbl, GUID, HRESULT, PCWSTR};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL};

/// Device role for audio endpoints
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ERole {
    Console = 0,        // Games, system sounds, voice commands
    Multimedia = 1,     // Music, movies
    Communications = 2, // Voice chat, VoIP
}

/// IPolicyConfig COM interface (undocumented but stable)
#[windows::core::interface("F8679F50-850A-41CF-9C72-430F290290C8")]
unsafe trait IPolicyConfig: IUnknown {
    // Reserved methods to maintain vtable order
    fn reserved1(&self) -> HRESULT;
    fn reserved2(&self) -> HRESULT;
    fn reserved3(&self) -> HRESULT;
    fn reserved4(&self) -> HRESULT;
    fn reserved5(&self) -> HRESULT;
    fn reserved6(&self) -> HRESULT;
    fn reserved7(&self) -> HRESULT;
    fn reserved8(&self) -> HRESULT;
    fn reserved9(&self) -> HRESULT;
    fn reserved10(&self) -> HRESULT;

    fn SetDefaultEndpoint(&self, device_id: PCWSTR, role: u32) -> HRESULT;
}

// PolicyConfigClient CLSID
const CLSID_POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

/// Wrapper around a `PolicyConfigClient` instance.
///
/// COM must be initialized on the calling thread.
pub struct PolicyConfig {
    inner: IPolicyConfig,
}

impl PolicyConfig {
    pub fn new() -> Result<Self, AudioError> {
        let inner: IPolicyConfig =
            unsafe { CoCreateInstance(&CLSID_POLICY_CONFIG_CLIENT, None, CLSCTX_ALL)? };
        Ok(Self { inner })
    }

    /// Make `device_id` the default endpoint for one role.
    pub fn set_default_device(&self, device_id: &str, role: ERole) -> Result<(), AudioError> {
        let wide = to_wide(device_id);
        unsafe {
            self.inner
                .SetDefaultEndpoint(PCWSTR(wide.as_ptr()), role as u32)
                .ok()?;
        }
        Ok(())
    }

    /// Make `device_id` the default endpoint for every role.
    pub fn set_default_device_for_all_roles(&self, device_id: &str) -> Result<(), AudioError> {
        for role in [ERole::Console, ERole::Multimedia, ERole::Communications] {
            self.set_default_device(device_id, role)?;
        }
        tracing::debug!(device_id, "Default endpoint set for all roles");
        Ok(())
    }
}
