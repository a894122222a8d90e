//! Audio Route Manager - Library
//!
//! Tracks which audio output device the system is sending sound to and lets
//! callers switch it.
//!
//! ## Features
//!
//! - Enumerate output-capable devices with their name and transport class
//! - Publish the device list and the active device as one immutable snapshot
//! - Switch the system default output, with an optimistic update followed by
//!   a reconciling refresh
//! - Automatic refresh on device hot-plug and default-device changes
//! - Windows (MMDevice API) and macOS (CoreAudio) backends, plus in-memory
//!   fakes for tests

pub mod audio;
pub mod config;
pub mod manager;
pub mod route;

pub use audio::{
    platform_hardware, AudioError, AudioHardware, DeviceId, DeviceRecord, RouteChange,
    RouteChangeSource, TransportClass,
};
pub use config::RouteManagerConfig;
pub use manager::RouteManager;
pub use route::{MainContext, MainQueue, RouteSnapshot, SubscriptionId};
