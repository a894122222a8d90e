//! Route manager configuration.

use crate::route::UNKNOWN_DEVICE_NAME;

/// Name of the background thread that performs hardware queries.
pub const DEFAULT_WORKER_THREAD_NAME: &str = "audio-route-worker";

/// Tunables for a [`crate::RouteManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteManagerConfig {
    /// Name given to devices that report none
    pub unknown_device_name: String,

    /// Thread name of the serial hardware worker
    pub worker_thread_name: String,
}

impl Default for RouteManagerConfig {
    fn default() -> Self {
        Self {
            unknown_device_name: UNKNOWN_DEVICE_NAME.to_string(),
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

impl RouteManagerConfig {
    pub fn with_unknown_device_name(mut self, name: impl Into<String>) -> Self {
        self.unknown_device_name = name.into();
        self
    }

    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }
}
