//! Audio module for platform audio subsystem interactions.
//!
//! This module provides the hardware query seam, device records, transport
//! classification, and the production backends for Windows (MMDevice API)
//! and macOS (CoreAudio HAL), plus in-memory fakes for tests.

pub mod device;
pub mod fake;
pub mod hardware;
pub mod transport;

#[cfg(windows)]
pub mod enumerator;
#[cfg(windows)]
pub mod notifications;
#[cfg(windows)]
pub mod policy;

#[cfg(target_os = "macos")]
pub mod coreaudio;

pub use device::{AudioError, DeviceId, DeviceRecord, RouteChange, TransportClass};
pub use fake::{FakeDevice, FakeHardware, FakeRouteChangeSource, FakeRouteTrigger};
pub use hardware::{AudioHardware, HandlerSlot, RouteChangeHandler, RouteChangeSource};

use std::sync::Arc;

/// Production hardware and notification source for the current platform.
#[cfg(windows)]
pub fn platform_hardware() -> Result<(Arc<dyn AudioHardware>, Box<dyn RouteChangeSource>), AudioError> {
    Ok((
        Arc::new(enumerator::WindowsHardware::new()),
        Box::new(notifications::WindowsRouteChangeSource::new()),
    ))
}

/// Production hardware and notification source for the current platform.
#[cfg(target_os = "macos")]
pub fn platform_hardware() -> Result<(Arc<dyn AudioHardware>, Box<dyn RouteChangeSource>), AudioError> {
    Ok((
        Arc::new(coreaudio::CoreAudioHardware::new()),
        Box::new(coreaudio::CoreAudioRouteChangeSource::new()),
    ))
}

/// Production hardware and notification source for the current platform.
#[cfg(not(any(windows, target_os = "macos")))]
pub fn platform_hardware() -> Result<(Arc<dyn AudioHardware>, Box<dyn RouteChangeSource>), AudioError> {
    Err(AudioError::PlatformNotSupported(
        std::env::consts::OS.to_string(),
    ))
}
