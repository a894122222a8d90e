//! Execution contexts: the background serial queue that owns every hardware
//! call, and the consumer-facing context that owns every publish.

use crate::audio::AudioError;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A unit of work handed to an execution context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The consumer-facing execution context.
///
/// Snapshots are published and subscribers notified only inside tasks
/// dispatched here. Tasks must run one at a time in dispatch order.
pub trait MainContext: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Channel-backed [`MainContext`] drained by its owner.
///
/// Works like a window message loop: dispatching only enqueues, and the
/// thread that owns the UI calls [`MainQueue::run_pending`] (or
/// [`MainQueue::run_until`]) to execute queued tasks. Drain from a single
/// thread.
pub struct MainQueue {
    sender: Sender<Task>,
    receiver: Mutex<Receiver<Task>>,
}

impl MainQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    fn next(&self, wait: Option<Duration>) -> Option<Task> {
        let receiver = self.receiver.lock();
        match wait {
            None => receiver.try_recv().ok(),
            Some(timeout) => match receiver.recv_timeout(timeout) {
                Ok(task) => Some(task),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
        }
    }

    /// Run every task queued so far. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.next(None) {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks as they arrive until `done` returns true or `timeout`
    /// elapses. Returns whether `done` was satisfied.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if let Some(task) = self.next(Some(remaining)) {
                task();
            }
        }
    }
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MainContext for MainQueue {
    fn dispatch(&self, task: Task) {
        // The receiver lives as long as self, so send cannot fail
        let _ = self.sender.send(task);
    }
}

/// A single worker thread running submitted jobs in FIFO order.
///
/// Jobs never overlap. Shutting down lets already-queued jobs finish, then
/// joins the thread; later submissions are rejected.
pub struct SerialQueue {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialQueue {
    pub fn spawn(name: &str) -> Result<Self, AudioError> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let thread_name = name.to_string();

        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                tracing::debug!(queue = %thread_name, "Serial queue started");
                for job in receiver {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!(queue = %thread_name, "Job panicked");
                    }
                }
                tracing::debug!(queue = %thread_name, "Serial queue stopped");
            })
            .map_err(|e| AudioError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a job. Returns false if the queue has been shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => {
                tracing::warn!(queue = %self.name, "Job submitted after shutdown");
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting jobs, drain the queue and join the worker.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            // Called from a job; the thread exits once the queue drains
            return;
        }
        if worker.join().is_err() {
            tracing::error!(queue = %self.name, "Worker thread panicked");
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_main_queue_runs_in_dispatch_order() {
        let queue = MainQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            queue.dispatch(Box::new(move || log.lock().push(i)));
        }

        assert!(log.lock().is_empty());
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn test_run_until_times_out() {
        let queue = MainQueue::new();
        assert!(!queue.run_until(Duration::from_millis(20), || false));
    }

    #[test]
    fn test_serial_queue_is_fifo() {
        let queue = SerialQueue::spawn("test-serial").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let log = log.clone();
            assert!(queue.submit(move || log.lock().push(i)));
        }

        queue.shutdown();
        assert_eq!(*log.lock(), (0..50).collect::<Vec<_>>());
        assert!(!queue.is_open());
        assert!(!queue.submit(|| {}));
    }

    #[test]
    fn test_serial_queue_survives_panicking_job() {
        let queue = SerialQueue::spawn("test-panic").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        queue.submit(|| panic!("boom"));
        let counter = ran.clone();
        queue.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        queue.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jobs_hand_off_to_main_queue() {
        let main = Arc::new(MainQueue::new());
        let queue = SerialQueue::spawn("test-handoff").unwrap();
        let seen = Arc::new(AtomicUsize::new(0));

        let (ctx, counter) = (main.clone(), seen.clone());
        queue.submit(move || {
            ctx.dispatch(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        });

        assert!(main.run_until(Duration::from_secs(5), || seen.load(Ordering::SeqCst) == 1));
    }
}
