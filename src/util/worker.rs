// SPDX-License-Identifier: GPL-3.0-only

//! Single-threaded worker lifecycle with cooperative cancellation.
//!
//! Every long-lived session thread (capture, software stereo, recorder) is
//! built on this primitive rather than a hand-rolled `{terminate_request,
//! terminate_done}` flag pair per thread (see spec §9 "Manual thread +
//! semaphore pairs"). It generalizes the teacher's
//! `backends::camera::frame_loop::CaptureLoopController`: a shared atomic
//! stop flag plus a join that is bounded by a timeout, so `Stop` never
//! blocks the caller forever on a wedged thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on how long `Worker::stop` waits for the thread to join
/// before giving up and reporting `ThreadStuck` (spec §5: "typical 2 s").
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A running (or finished) worker thread plus its cancellation flag.
pub struct Worker {
    name: String,
    stop_request: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a dedicated OS thread. `body` receives a clone of
    /// the stop flag and is responsible for checking it at safe points
    /// (spec §5: after each driver call, between stereo chunks, after each
    /// recorder write).
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let name = name.into();
        let stop_request = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop_request);
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(worker = %thread_name, "worker thread starting");
                body(stop_clone);
                debug!(worker = %thread_name, "worker thread exiting");
            })
            .expect("failed to spawn worker thread");

        Self {
            name,
            stop_request,
            handle: Some(handle),
        }
    }

    /// A clone of the cancellation flag, for the worker body to poll.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_request)
    }

    /// Whether the underlying thread has finished running.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Request cancellation without waiting for the thread to exit.
    pub fn request_stop(&self) {
        self.stop_request.store(true, Ordering::SeqCst);
    }

    /// Request cancellation and wait up to `timeout` for the thread to
    /// join. Returns `true` if the thread exited in time, `false` if it is
    /// still running (the caller should treat this as `ErrorKind::ThreadStuck`
    /// and must not reuse the session afterwards).
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        self.join(timeout)
    }

    /// Wait up to `timeout` for the thread to finish on its own (e.g. it
    /// observed EOF) without requesting cancellation.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        if wait_finished(&handle, timeout) {
            if let Err(panic) = handle.join() {
                warn!(worker = %self.name, ?panic, "worker thread panicked");
            }
            true
        } else {
            warn!(worker = %self.name, timeout = ?timeout, "worker thread did not stop in time");
            // Can't safely drop/join a stuck handle; leak it. The caller
            // must treat the session as unusable (spec §5, §7 ThreadStuck).
            self.handle = Some(handle);
            false
        }
    }
}

fn wait_finished(handle: &JoinHandle<()>, timeout: Duration) -> bool {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while !handle.is_finished() {
        if waited >= timeout {
            return false;
        }
        thread::sleep(step);
        waited += step;
    }
    true
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop(DEFAULT_JOIN_TIMEOUT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn stops_cooperative_worker_promptly() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let mut worker = Worker::spawn("test-cooperative", move |stop| {
            while !stop.load(Ordering::SeqCst) {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
            }
        });
        thread::sleep(Duration::from_millis(30));
        let stopped = worker.stop(DEFAULT_JOIN_TIMEOUT);
        assert!(stopped);
        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn reports_stuck_worker_without_hanging() {
        let mut worker = Worker::spawn("test-stuck", |_stop| {
            thread::sleep(Duration::from_secs(10));
        });
        let stopped = worker.stop(Duration::from_millis(20));
        assert!(!stopped);
        // Drop must not block forever trying to join the still-running thread.
    }
}
