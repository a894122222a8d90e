//! FFI bindings for the Audio Route Manager.
//!
//! This crate provides C ABI functions for embedding the route manager in a
//! non-Rust host (C# via P/Invoke, Swift via a bridging header).
//! All functions use panic::catch_unwind to prevent Rust panics from
//! unwinding across the FFI boundary.
//!
//! Snapshot observers run on whichever host thread calls
//! `route_engine_pump`; that thread is the engine's main context.

use route_manager_rs::audio::{AudioHardware, RouteChangeSource};
use route_manager_rs::{
    platform_hardware, AudioError, DeviceId, MainQueue, RouteManager, RouteManagerConfig,
    RouteSnapshot, SubscriptionId,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic;
use std::ptr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Error Handling
// ============================================================================

/// Error codes returned by FFI functions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidArgument = -2,
    DeviceNotFound = -3,
    PlatformError = -4,
    JsonError = -5,
    NotRunning = -6,
    Unsupported = -7,
    Panic = -99,
}

impl From<&AudioError> for ErrorCode {
    fn from(err: &AudioError) -> Self {
        match err {
            AudioError::DeviceNotFound { .. } | AudioError::NoDefaultDevice => ErrorCode::DeviceNotFound,
            AudioError::StringConversion(_) => ErrorCode::InvalidArgument,
            AudioError::PlatformNotSupported(_) => ErrorCode::Unsupported,
            _ => ErrorCode::PlatformError,
        }
    }
}

impl From<AudioError> for ErrorCode {
    fn from(err: AudioError) -> Self {
        ErrorCode::from(&err)
    }
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorCode, String)>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Record `err` as the last error and return its code.
fn fail(err: &AudioError) -> i32 {
    let code = ErrorCode::from(err);
    set_last_error(code, err.to_string());
    code as i32
}

// ============================================================================
// Data Types for JSON Serialization
// ============================================================================

/// Configuration for engine creation. Every field is optional.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `tracing` filter directive, e.g. "info" or "route_manager_rs=debug"
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub unknown_device_name: Option<String>,

    #[serde(default)]
    pub worker_thread_name: Option<String>,
}

impl EngineConfig {
    fn manager_config(&self) -> RouteManagerConfig {
        let mut config = RouteManagerConfig::default();
        if let Some(name) = &self.unknown_device_name {
            config = config.with_unknown_device_name(name.clone());
        }
        if let Some(name) = &self.worker_thread_name {
            config = config.with_worker_thread_name(name.clone());
        }
        config
    }
}

/// An output device as the host sees it.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceDto {
    pub id: String,
    pub name: String,
    pub transport: String,
    pub is_active: bool,
}

/// The published device list and active device.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub active_device_id: Option<String>,
    pub devices: Vec<DeviceDto>,
}

impl From<&RouteSnapshot> for SnapshotResponse {
    fn from(snapshot: &RouteSnapshot) -> Self {
        Self {
            active_device_id: snapshot.active_device_id().map(|id| id.as_str().to_string()),
            devices: snapshot
                .iter()
                .map(|device| DeviceDto {
                    id: device.id.as_str().to_string(),
                    name: device.name.clone(),
                    transport: device.transport.label().to_string(),
                    is_active: snapshot.is_active(&device.id),
                })
                .collect(),
        }
    }
}

fn snapshot_json(snapshot: &RouteSnapshot) -> Result<String, AudioError> {
    serde_json::to_string(&SnapshotResponse::from(snapshot))
        .map_err(|e| AudioError::StringConversion(e.to_string()))
}

// ============================================================================
// Engine Handle Type
// ============================================================================

/// Opaque handle to the route engine. Actually points to a RouteEngine struct.
pub type RouteEngineHandle = *mut c_void;

/// Called with the snapshot JSON after every publish. The string is owned by
/// the library and valid only for the duration of the call.
pub type SnapshotCallback = extern "C" fn(user_data: *mut c_void, snapshot_json: *const c_char);

/// Host pointer handed back to the callback untouched.
struct UserData(*mut c_void);

// The host owns the pointee and callbacks only run on the pumping thread
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

/// Internal engine state.
struct RouteEngine {
    manager: RouteManager,
    main: Arc<MainQueue>,
}

impl RouteEngine {
    fn for_platform(config: &EngineConfig) -> Result<Self, AudioError> {
        let (hardware, source) = platform_hardware()?;
        Ok(Self::with_backend(hardware, source, config.manager_config()))
    }

    fn with_backend(
        hardware: Arc<dyn AudioHardware>,
        source: Box<dyn RouteChangeSource>,
        config: RouteManagerConfig,
    ) -> Self {
        let main = Arc::new(MainQueue::new());
        let manager = RouteManager::new(hardware, source, main.clone(), config);
        Self { manager, main }
    }

    fn subscribe(&self, callback: SnapshotCallback, user_data: *mut c_void) -> SubscriptionId {
        let user_data = UserData(user_data);
        self.manager.subscribe(move |snapshot: &RouteSnapshot| {
            let json = match snapshot_json(snapshot) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize snapshot for callback");
                    return;
                }
            };
            let Ok(json) = CString::new(json) else {
                return;
            };
            callback(user_data.as_ptr(), json.as_ptr());
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Allocate a C string from a Rust string. Caller must free with route_engine_free_string.
fn alloc_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        // String contained a null byte, replace with empty
        Err(_) => CString::default().into_raw(),
    }
}

/// Parse a C string to a Rust string slice.
unsafe fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Borrow the engine behind a handle.
unsafe fn engine_ref<'a>(handle: RouteEngineHandle) -> Option<&'a RouteEngine> {
    (handle as *const RouteEngine).as_ref()
}

/// Parse the engine config. Returns the defaults plus the parse error when
/// the JSON is malformed.
fn parse_config(json: Option<&str>) -> (EngineConfig, Option<String>) {
    match json {
        None => (EngineConfig::default(), None),
        Some(json) => match serde_json::from_str(json) {
            Ok(config) => (config, None),
            Err(e) => (EngineConfig::default(), Some(e.to_string())),
        },
    }
}

/// Install the fmt subscriber once per process. Later calls are no-ops.
fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_new(level.unwrap_or("info")).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}

fn into_handle(engine: RouteEngine) -> RouteEngineHandle {
    Box::into_raw(Box::new(engine)) as RouteEngineHandle
}

/// Run `f` against the engine behind `handle`, mapping a null handle and
/// panics to error codes.
fn with_engine(handle: RouteEngineHandle, what: &str, f: impl FnOnce(&RouteEngine) -> i32) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        let Some(engine) = (unsafe { engine_ref(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "Invalid engine handle");
            return ErrorCode::InvalidHandle as i32;
        };
        f(engine)
    }));

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {what}"));
            ErrorCode::Panic as i32
        }
    }
}

fn not_running() -> i32 {
    set_last_error(ErrorCode::NotRunning, "Engine is not running");
    ErrorCode::NotRunning as i32
}

// ============================================================================
// FFI Functions - Lifecycle
// ============================================================================

/// Create a new route engine for the current platform.
///
/// # Arguments
/// * `config_json` - JSON configuration string (can be null for defaults)
///
/// # Returns
/// Handle to the engine, or null on failure. Check route_engine_last_error_code() on failure.
///
/// # Safety
/// The returned handle must be freed with route_engine_destroy().
#[no_mangle]
pub extern "C" fn route_engine_create(config_json: *const c_char) -> RouteEngineHandle {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let (config, parse_error) = parse_config(unsafe { parse_c_str(config_json) });
        init_logging(config.log_level.as_deref());
        if let Some(e) = parse_error {
            tracing::warn!(error = %e, "Invalid engine config, using defaults");
        }

        RouteEngine::for_platform(&config).map(into_handle)
    });

    match result {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            fail(&e);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during engine creation");
            ptr::null_mut()
        }
    }
}

/// Destroy a route engine instance. Stops it first if it is running.
///
/// # Safety
/// The handle must have been created by route_engine_create() and must not be used after this call.
#[no_mangle]
pub extern "C" fn route_engine_destroy(handle: RouteEngineHandle) {
    if handle.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        let _ = Box::from_raw(handle as *mut RouteEngine);
    });
}

/// Register for route changes and queue the initial refresh.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn route_engine_start(handle: RouteEngineHandle) -> i32 {
    with_engine(handle, "engine start", |engine| match engine.manager.start() {
        Ok(()) => ErrorCode::Success as i32,
        Err(e) => fail(&e),
    })
}

/// Unregister from route changes and join the worker thread.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn route_engine_stop(handle: RouteEngineHandle) -> i32 {
    with_engine(handle, "engine stop", |engine| {
        engine.manager.stop();
        ErrorCode::Success as i32
    })
}

// ============================================================================
// FFI Functions - Routing
// ============================================================================

/// Queue a full re-enumeration of output devices.
///
/// # Returns
/// 0 on success, NotRunning if the engine has not been started.
#[no_mangle]
pub extern "C" fn route_engine_refresh(handle: RouteEngineHandle) -> i32 {
    with_engine(handle, "refresh", |engine| {
        if engine.manager.refresh() {
            ErrorCode::Success as i32
        } else {
            not_running()
        }
    })
}

/// Ask the system to route output to a device.
///
/// The switch is fire-and-forget: a rejected switch still returns 0 and
/// leaves the published snapshot unchanged.
///
/// # Arguments
/// * `handle` - Engine handle
/// * `device_id` - The device ID as reported in the snapshot (UTF-8 string)
///
/// # Returns
/// 0 when the request was queued, negative error code otherwise.
#[no_mangle]
pub extern "C" fn route_engine_select(handle: RouteEngineHandle, device_id: *const c_char) -> i32 {
    with_engine(handle, "select", |engine| {
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "Invalid device ID");
            return ErrorCode::InvalidArgument as i32;
        };

        if engine.manager.select_by_id(DeviceId::new(device_id)) {
            ErrorCode::Success as i32
        } else {
            not_running()
        }
    })
}

/// Get the current snapshot.
///
/// # Returns
/// JSON string `{ "active_device_id": ..., "devices": [...] }`. Caller must
/// free with route_engine_free_string(). Returns null on failure.
#[no_mangle]
pub extern "C" fn route_engine_get_snapshot(handle: RouteEngineHandle) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(engine) = (unsafe { engine_ref(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "Invalid engine handle");
            return ptr::null_mut();
        };

        match snapshot_json(&engine.manager.current_snapshot()) {
            Ok(json) => alloc_c_string(&json),
            Err(e) => {
                set_last_error(ErrorCode::JsonError, e.to_string());
                ptr::null_mut()
            }
        }
    });

    match result {
        Ok(json) => json,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during snapshot read");
            ptr::null_mut()
        }
    }
}

// ============================================================================
// FFI Functions - Observers
// ============================================================================

/// Register a callback for every published snapshot.
///
/// Callbacks run inside route_engine_pump() on the calling thread.
///
/// # Returns
/// A subscription id greater than 0, or 0 on failure.
#[no_mangle]
pub extern "C" fn route_engine_subscribe(
    handle: RouteEngineHandle,
    callback: Option<SnapshotCallback>,
    user_data: *mut c_void,
) -> u64 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(engine) = (unsafe { engine_ref(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "Invalid engine handle");
            return 0;
        };
        let Some(callback) = callback else {
            set_last_error(ErrorCode::InvalidArgument, "Callback is null");
            return 0;
        };

        engine.subscribe(callback, user_data).as_u64()
    });

    result.unwrap_or_else(|_| {
        set_last_error(ErrorCode::Panic, "Panic during subscribe");
        0
    })
}

/// Remove a callback registered with route_engine_subscribe().
///
/// # Returns
/// 0 on success, InvalidArgument if the id is not subscribed.
#[no_mangle]
pub extern "C" fn route_engine_unsubscribe(handle: RouteEngineHandle, subscription_id: u64) -> i32 {
    with_engine(handle, "unsubscribe", |engine| {
        if engine.manager.unsubscribe(SubscriptionId::from(subscription_id)) {
            ErrorCode::Success as i32
        } else {
            set_last_error(ErrorCode::InvalidArgument, "Unknown subscription id");
            ErrorCode::InvalidArgument as i32
        }
    })
}

/// Run queued snapshot publishes and callbacks on the calling thread.
///
/// Call from the host's UI thread, e.g. on a timer or after a wake-up.
///
/// # Returns
/// Number of tasks run, or a negative error code.
#[no_mangle]
pub extern "C" fn route_engine_pump(handle: RouteEngineHandle) -> i32 {
    with_engine(handle, "pump", |engine| {
        i32::try_from(engine.main.run_pending()).unwrap_or(i32::MAX)
    })
}

// ============================================================================
// FFI Functions - Memory Management
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the route_engine_* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub extern "C" fn route_engine_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        let _ = CString::from_raw(ptr);
    });
}

// ============================================================================
// FFI Functions - Error Handling
// ============================================================================

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "C" fn route_engine_last_error_code() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as i32)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with route_engine_free_string().
/// Returns null if no error.
#[no_mangle]
pub extern "C" fn route_engine_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

// ============================================================================
// FFI Functions - Utility
// ============================================================================

/// Get the library version.
///
/// # Returns
/// Version string. Caller must free with route_engine_free_string().
#[no_mangle]
pub extern "C" fn route_engine_version() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================
