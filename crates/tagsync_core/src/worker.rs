//! Cooperative polling worker threads.
//!
//! Each TagSync component is driven by one named thread that runs a step
//! function at a fixed interval. Stopping flips a running flag and wakes the
//! thread, so shutdown latency is bounded by one step plus the wake-up, never
//! by the full poll interval. The step itself is never interrupted.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// What the worker loop should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerControl {
    /// Sleep for one interval and step again.
    Continue,
    /// Leave the loop; the thread finishes.
    Exit,
}

#[derive(Debug)]
struct Signal {
    running: AtomicBool,
    lock: Mutex<bool>,
    wake: Condvar,
}

impl Signal {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn sleep(&self, interval: Duration) {
        let mut woken = self.lock.lock();
        if !self.is_running() {
            return;
        }
        if !*woken {
            self.wake.wait_for(&mut woken, interval);
        }
        *woken = false;
    }

    fn notify(&self) {
        let mut woken = self.lock.lock();
        *woken = true;
        self.wake.notify_all();
    }
}

/// A named background thread calling a step function at a fixed interval.
///
/// Dropping the worker stops and joins it.
#[derive(Debug)]
pub struct BackgroundWorker {
    name: String,
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Spawns a worker thread.
    ///
    /// The first step runs immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WorkerSpawn`] if the OS refuses the thread.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut step: F) -> CoreResult<Self>
    where
        F: FnMut() -> WorkerControl + Send + 'static,
    {
        let name = name.into();
        let signal = Arc::new(Signal {
            running: AtomicBool::new(true),
            lock: Mutex::new(false),
            wake: Condvar::new(),
        });

        let thread_signal = Arc::clone(&signal);
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(worker = %thread_name, "worker started");
                while thread_signal.is_running() {
                    if step() == WorkerControl::Exit {
                        break;
                    }
                    thread_signal.sleep(interval);
                }
                thread_signal.running.store(false, Ordering::SeqCst);
                debug!(worker = %thread_name, "worker exited");
            })
            .map_err(|e| CoreError::WorkerSpawn {
                name: name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            name,
            signal,
            handle: Some(handle),
        })
    }

    /// Returns the thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true while the loop has not exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.signal.is_running()
    }

    /// Cuts the current sleep short so the next step runs now.
    pub fn wake(&self) {
        self.signal.notify();
    }

    /// Stops the loop and joins the thread.
    ///
    /// Calling this from the worker thread itself only clears the flag.
    pub fn stop(&mut self) {
        self.signal.running.store(false, Ordering::SeqCst);
        self.signal.notify();

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
