//! Route manager lifecycle and the refresh/select protocols.
//!
//! Every hardware call runs on one serial worker thread. Results cross back
//! to the consumer through the [`MainContext`], which is the only place the
//! published snapshot changes and the only place observers are called.

use crate::audio::{
    AudioError, AudioHardware, DeviceId, DeviceRecord, RouteChange, RouteChangeHandler,
    RouteChangeSource,
};
use crate::config::RouteManagerConfig;
use crate::route::{catalog, MainContext, RouteSnapshot, RouteStore, SerialQueue, SubscriptionId};
use parking_lot::Mutex;
use std::sync::Arc;

/// The work a job performs, detached from the manager so jobs own
/// everything they touch.
#[derive(Clone)]
struct Pipeline {
    hardware: Arc<dyn AudioHardware>,
    main: Arc<dyn MainContext>,
    store: Arc<RouteStore>,
    unknown_device_name: Arc<str>,
}

impl Pipeline {
    /// Read the hardware and hand the result to the main context.
    fn refresh(&self) {
        let active = self.hardware.current_default_output_id();
        let ids = self.hardware.list_device_ids();
        let records = catalog::build(self.hardware.as_ref(), &ids, &self.unknown_device_name);
        tracing::debug!(
            attached = ids.len(),
            outputs = records.len(),
            active = ?active.as_ref().map(DeviceId::as_str),
            "Route refresh"
        );

        let store = self.store.clone();
        self.main.dispatch(Box::new(move || {
            store.publish(records, active);
        }));
    }

    fn select(&self, id: DeviceId) {
        tracing::info!(device_id = %id, "Switching default output");
        if !self.hardware.set_default_output_id(&id) {
            tracing::warn!(device_id = %id, "Platform rejected output switch");
            return;
        }
        tracing::info!(device_id = %id, "Output switch accepted");

        // Show the requested device as active right away; the refresh
        // below replaces this with whatever the hardware reports.
        let store = self.store.clone();
        let requested = id;
        self.main.dispatch(Box::new(move || {
            let optimistic = store.snapshot().with_active(requested);
            store.replace(optimistic);
        }));

        self.refresh();
    }
}

/// State shared with the route-change handler.
struct Shared {
    pipeline: Pipeline,
    worker: Mutex<Option<SerialQueue>>,
}

impl Shared {
    fn submit(&self, operation: &'static str, job: impl FnOnce(&Pipeline) + Send + 'static) -> bool {
        let worker = self.worker.lock();
        let Some(queue) = worker.as_ref() else {
            tracing::warn!(operation, "Route manager is not running");
            return false;
        };

        let pipeline = self.pipeline.clone();
        queue.submit(move || job(&pipeline))
    }

    fn submit_refresh(&self) -> bool {
        self.submit("refresh", Pipeline::refresh)
    }
}

/// Tracks the system's audio output devices and the active route.
///
/// Owns the worker thread and the route-change registration between
/// [`RouteManager::start`] and [`RouteManager::stop`]. Dropping the manager
/// stops it.
pub struct RouteManager {
    shared: Arc<Shared>,
    source: Mutex<Box<dyn RouteChangeSource>>,
    config: RouteManagerConfig,
}

impl RouteManager {
    pub fn new(
        hardware: Arc<dyn AudioHardware>,
        source: Box<dyn RouteChangeSource>,
        main: Arc<dyn MainContext>,
        config: RouteManagerConfig,
    ) -> Self {
        let pipeline = Pipeline {
            hardware,
            main,
            store: Arc::new(RouteStore::new()),
            unknown_device_name: Arc::from(config.unknown_device_name.as_str()),
        };

        Self {
            shared: Arc::new(Shared {
                pipeline,
                worker: Mutex::new(None),
            }),
            source: Mutex::new(source),
            config,
        }
    }

    /// A manager bound to the current platform's audio subsystem.
    pub fn for_platform(main: Arc<dyn MainContext>, config: RouteManagerConfig) -> Result<Self, AudioError> {
        let (hardware, source) = crate::audio::platform_hardware()?;
        Ok(Self::new(hardware, source, main, config))
    }

    pub fn config(&self) -> &RouteManagerConfig {
        &self.config
    }

    /// Spawn the worker, register for route changes and queue the initial
    /// refresh. Starting a running manager does nothing.
    pub fn start(&self) -> Result<(), AudioError> {
        {
            let mut worker = self.shared.worker.lock();
            if worker.is_some() {
                tracing::debug!("Route manager already running");
                return Ok(());
            }
            *worker = Some(SerialQueue::spawn(&self.config.worker_thread_name)?);
        }

        let shared = Arc::downgrade(&self.shared);
        let handler: RouteChangeHandler = Arc::new(move |change: RouteChange| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            tracing::debug!(?change, "Route change notification");
            shared.submit_refresh();
        });

        if let Err(e) = self.source.lock().register(handler) {
            tracing::error!(error = %e, "Failed to register for route changes");
            if let Some(worker) = self.shared.worker.lock().take() {
                worker.shutdown();
            }
            return Err(e);
        }

        tracing::info!(worker = %self.config.worker_thread_name, "Route manager started");
        self.shared.submit_refresh();
        Ok(())
    }

    /// Unregister from route changes, let queued work finish and join the
    /// worker. Work already handed to the main context still runs when the
    /// consumer drains it.
    pub fn stop(&self) {
        self.source.lock().unregister();

        let Some(worker) = self.shared.worker.lock().take() else {
            return;
        };
        worker.shutdown();
        tracing::info!("Route manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.worker.lock().is_some()
    }

    /// Queue a full re-enumeration. Returns false if the manager is not
    /// running.
    pub fn refresh(&self) -> bool {
        self.shared.submit_refresh()
    }

    /// Ask the platform to route output to `device`.
    ///
    /// Fire-and-forget: a rejected switch leaves the published state as it
    /// was. Returns false only if the manager is not running.
    pub fn select(&self, device: &DeviceRecord) -> bool {
        self.select_by_id(device.id.clone())
    }

    pub fn select_by_id(&self, id: DeviceId) -> bool {
        self.shared.submit("select", move |pipeline| pipeline.select(id))
    }

    pub fn current_snapshot(&self) -> Arc<RouteSnapshot> {
        self.shared.pipeline.store.snapshot()
    }

    pub fn active_device(&self) -> Option<DeviceRecord> {
        self.current_snapshot().active_device().cloned()
    }

    /// Observe every published snapshot. Observers run on the main context.
    pub fn subscribe(&self, observer: impl Fn(&RouteSnapshot) + Send + Sync + 'static) -> SubscriptionId {
        self.shared.pipeline.store.subscribe(Arc::new(observer))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.pipeline.store.unsubscribe(id)
    }
}

impl Drop for RouteManager {
    fn drop(&mut self) {
        self.stop();
    }
}
