// SPDX-License-Identifier: GPL-3.0-only

//! Single-producer/single-consumer ring buffer shared by the live capture
//! thread and the file player thread (spec §4.B, §4.D: "consumers cannot
//! distinguish playback from live by the contract alone").
//!
//! Generalizes the teacher's single-slot `SharedRecordingSender` cell (one
//! `Mutex<Option<CameraFrame>>` overwritten on each new frame) to an
//! N-slot queue, because the spec requires at least 4 slots of lookback
//! rather than a single latest-frame cell.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tracing::warn;

use crate::frame::AcquisitionMeta;

/// Minimum ring capacity the spec requires (§4.B).
pub const MIN_CAPACITY: usize = 4;

/// Undecoded bytes for one exposure, as handed up by either the live
/// driver or the file player.
#[derive(Debug, Clone)]
pub enum RawPayload {
    /// Two planes straight from [`crate::device::DriverFrame`].
    Driver { base: Vec<u8>, compare: Vec<u8> },
    /// Interleaved vendor layout read back from a raw file record,
    /// awaiting [`crate::decode`].
    Raw(Vec<u8>),
}

/// One exposure moving through the ring, before [`crate::decode`] unpacks
/// it into a [`crate::frame::FrameData`].
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub frame_number: u64,
    pub captured_at: SystemTime,
    pub meta: AcquisitionMeta,
    pub width: u32,
    pub height: u32,
    pub payload: RawPayload,
}

/// Callback invoked inline on the producer thread (capture or player) for
/// every frame, right after it is queued. Carries the short-lived decode
/// and publish work the spec keeps off a dedicated thread (spec §5:
/// "decode, single-frame filter when invoked synchronously runs on the
/// caller's thread") so the three-thread-per-session budget isn't blown by
/// a fourth dispatch thread.
pub type FrameSink = std::sync::Arc<dyn Fn(RawCapture) + Send + Sync>;

struct Shared {
    queue: VecDeque<RawCapture>,
    capacity: usize,
    closed: bool,
}

/// Bounded ring buffer with overwrite-oldest backpressure (spec §4.B:
/// "when full, the oldest unread frame is dropped and `dropped_frames` is
/// incremented").
pub struct FrameRing {
    shared: Mutex<Shared>,
    not_empty: Condvar,
    dropped_frames: AtomicU64,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            shared: Mutex::new(Shared {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Push one capture, overwriting the oldest slot if the ring is full.
    pub fn push(&self, capture: RawCapture) {
        let mut shared = self.shared.lock().expect("ring mutex poisoned");
        if shared.queue.len() >= shared.capacity {
            shared.queue.pop_front();
            let dropped = self.dropped_frames.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(dropped_frames = dropped, "capture ring overwrote an unread frame");
        }
        shared.queue.push_back(capture);
        self.not_empty.notify_one();
    }

    /// Block up to `timeout` for the next capture. Returns `None` on
    /// timeout or once the ring has been closed and drained.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<RawCapture> {
        let mut shared = self.shared.lock().expect("ring mutex poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(capture) = shared.queue.pop_front() {
                return Some(capture);
            }
            if shared.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(shared, deadline - now)
                .expect("ring mutex poisoned");
            shared = guard;
            if result.timed_out() && shared.queue.is_empty() {
                return None;
            }
        }
    }

    /// Non-blocking drain of whatever is currently queued.
    pub fn try_pop(&self) -> Option<RawCapture> {
        self.shared.lock().expect("ring mutex poisoned").queue.pop_front()
    }

    /// Mark the ring closed, waking any blocked consumer with `None`.
    pub fn close(&self) {
        let mut shared = self.shared.lock().expect("ring mutex poisoned");
        shared.closed = true;
        self.not_empty.notify_all();
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().expect("ring mutex poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(n: u64) -> RawCapture {
        RawCapture {
            frame_number: n,
            captured_at: SystemTime::UNIX_EPOCH,
            meta: AcquisitionMeta::default(),
            width: 1,
            height: 1,
            payload: RawPayload::Raw(vec![0]),
        }
    }

    #[test]
    fn overwrites_oldest_when_full_and_counts_drops() {
        let ring = FrameRing::new(MIN_CAPACITY);
        for n in 0..MIN_CAPACITY as u64 + 2 {
            ring.push(capture(n));
        }
        assert_eq!(ring.len(), MIN_CAPACITY);
        assert_eq!(ring.dropped_frames(), 2);
        let first = ring.try_pop().unwrap();
        assert_eq!(first.frame_number, 2); // 0 and 1 were overwritten
    }

    #[test]
    fn pop_blocking_times_out_on_empty_ring() {
        let ring = FrameRing::new(MIN_CAPACITY);
        let start = Instant::now();
        let result = ring.pop_blocking(Duration::from_millis(20));
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn closed_ring_wakes_blocked_consumer() {
        let ring = std::sync::Arc::new(FrameRing::new(MIN_CAPACITY));
        let ring2 = ring.clone();
        let handle = std::thread::spawn(move || ring2.pop_blocking(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        ring.close();
        assert!(handle.join().unwrap().is_none());
    }
}
