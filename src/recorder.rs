// SPDX-License-Identifier: GPL-3.0-only

//! File Recorder (spec §4.C): a bounded background worker draining an
//! ingress queue of raw records into an [`crate::rawfile`] container.
//!
//! Shaped the same way as the teacher's recording pipeline — a channel
//! feeding a dedicated writer thread — but the sink is the raw byte
//! container instead of a GStreamer muxer, since there's no encoding
//! concern for a fixed-layout byte format (that part of the teacher's
//! recorder has no counterpart here, see DESIGN.md).

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{err, Error, ErrorKind, Result};
use crate::rawfile::{RawFileHeader, RawRecord};
use crate::util::worker::{Worker, DEFAULT_JOIN_TIMEOUT};

/// Ingress queue depth (spec §4.B/§4.C): the recorder is allowed to fall
/// this many frames behind the capture thread before it is cancelled with
/// `ErrorKind::RecorderBackpressure` rather than blocking capture.
pub const MAX_QUEUE_DEPTH: usize = 32;

/// Recorder lifecycle state (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    /// A write failed, or the ingress queue exceeded `MAX_QUEUE_DEPTH`; the
    /// recorder must be `stop`ped and re-`start`ed against a fresh path
    /// before it will accept records again.
    Failed,
}

struct Shared {
    state: Mutex<RecorderState>,
    last_written_ms: AtomicU64,
    min_write_interval_ms: u64,
    /// Set when backpressure cancels the recorder, so the write loop can
    /// exit promptly without waiting for its next `stop`/timeout poll.
    cancelled: AtomicBool,
    last_error: Mutex<Option<Error>>,
}

/// One queued item for the writer thread.
enum Command {
    Record(RawRecord),
    Stop,
}

/// Background-writer recorder publishing into an `ISCRAW` file.
pub struct Recorder {
    shared: Arc<Shared>,
    sender: Mutex<Option<SyncSender<Command>>>,
    worker: Mutex<Option<Worker>>,
}

impl Recorder {
    pub fn new(min_write_interval_ms: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RecorderState::Idle),
                last_written_ms: AtomicU64::new(0),
                min_write_interval_ms,
                cancelled: AtomicBool::new(false),
                last_error: Mutex::new(None),
            }),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RecorderState {
        *self.shared.state.lock().expect("recorder state mutex poisoned")
    }

    /// The error that cancelled the recorder, if `state()` is `Failed`.
    pub fn last_error(&self) -> Option<Error> {
        self.shared.last_error.lock().expect("recorder last_error mutex poisoned").clone()
    }

    /// Open `path`, write `header`, and start the writer thread.
    pub fn start(&self, path: impl AsRef<Path>, header: RawFileHeader) -> Result<()> {
        {
            let mut state = self.shared.state.lock().expect("recorder state mutex poisoned");
            if *state != RecorderState::Idle {
                return Err(err!(InvalidState, "recorder is {state:?}, expected Idle"));
            }
            *state = RecorderState::Recording;
        }
        self.shared.cancelled.store(false, Ordering::SeqCst);
        *self.shared.last_error.lock().expect("recorder last_error mutex poisoned") = None;

        let mut file = File::create(path.as_ref()).map_err(crate::error::Error::from)?;
        file.write_all(&header.encode()).map_err(crate::error::Error::from)?;

        let (tx, rx) = mpsc::sync_channel(MAX_QUEUE_DEPTH);
        let shared = Arc::clone(&self.shared);
        let path_buf: PathBuf = path.as_ref().to_path_buf();
        let worker = Worker::spawn("recorder", move |stop| {
            write_loop(file, rx, shared, stop, path_buf);
        });

        *self.sender.lock().expect("recorder sender mutex poisoned") = Some(tx);
        *self.worker.lock().expect("recorder worker mutex poisoned") = Some(worker);
        info!("recorder started");
        Ok(())
    }

    /// Enqueue a record. Silently dropped (not an error) if the throttle
    /// window hasn't elapsed or the recorder isn't currently recording,
    /// matching spec §4.C's non-fatal drop policy. If the writer has fallen
    /// more than `MAX_QUEUE_DEPTH` records behind, the recorder is cancelled
    /// with `ErrorKind::RecorderBackpressure` instead of blocking the
    /// caller (spec §4.B: recording must never stall capture).
    pub fn enqueue(&self, record: RawRecord) {
        if self.state() != RecorderState::Recording {
            return;
        }
        let last = self.shared.last_written_ms.load(Ordering::SeqCst);
        if record.timestamp_ms < last + self.shared.min_write_interval_ms {
            return;
        }
        let tx = self.sender.lock().expect("recorder sender mutex poisoned").clone();
        let Some(tx) = tx else { return };
        match tx.try_send(Command::Record(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.cancel_for_backpressure(),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Cancel the recorder because the ingress queue is full, without
    /// blocking the caller on the writer thread joining.
    fn cancel_for_backpressure(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(max_queue_depth = MAX_QUEUE_DEPTH, "recorder ingress queue full, cancelling");
        let err = err!(RecorderBackpressure, "recorder fell more than {MAX_QUEUE_DEPTH} frames behind");
        *self.shared.last_error.lock().expect("recorder last_error mutex poisoned") = Some(err);
        *self.shared.state.lock().expect("recorder state mutex poisoned") = RecorderState::Failed;
    }

    pub fn stop(&self, timeout: Duration) -> Result<()> {
        {
            let state = self.state();
            if state == RecorderState::Idle {
                return Ok(());
            }
        }
        if let Some(tx) = self.sender.lock().expect("recorder sender mutex poisoned").take() {
            let _ = tx.try_send(Command::Stop);
        }
        let mut worker_slot = self.worker.lock().expect("recorder worker mutex poisoned");
        if let Some(mut worker) = worker_slot.take() {
            if !worker.stop(timeout) {
                error!("recorder thread did not stop within {timeout:?}");
                return Err(err!(ThreadStuck, "recorder thread did not join within {timeout:?}"));
            }
        }
        *self.shared.state.lock().expect("recorder state mutex poisoned") = RecorderState::Idle;
        info!("recorder stopped");
        Ok(())
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(0)
    }
}

fn write_loop(
    mut file: File,
    rx: Receiver<Command>,
    shared: Arc<Shared>,
    stop: Arc<std::sync::atomic::AtomicBool>,
    path: PathBuf,
) {
    let mut good_offset = file.stream_position().unwrap_or(0);
    loop {
        if stop.load(Ordering::SeqCst) || shared.cancelled.load(Ordering::SeqCst) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Command::Stop) => break,
            Ok(Command::Record(record)) => {
                let mut buf = Vec::new();
                if record.write_to(&mut buf).is_err() {
                    continue;
                }
                match file.write_all(&buf) {
                    Ok(()) => {
                        good_offset += buf.len() as u64;
                        shared.last_written_ms.store(record.timestamp_ms, Ordering::SeqCst);
                    }
                    Err(e) => {
                        warn!(error = %e, path = %path.display(), "recorder write failed, truncating to last good offset");
                        if let Err(trunc_err) = file.set_len(good_offset).and_then(|_| file.seek(SeekFrom::Start(good_offset))) {
                            error!(error = %trunc_err, "failed to truncate recorder file after write error");
                        }
                        *shared.last_error.lock().expect("recorder last_error mutex poisoned") = Some(e);
                        *shared.state.lock().expect("recorder state mutex poisoned") = RecorderState::Failed;
                        break;
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ColorMode, GrabMode, ShutterMode};
    use tempfile::tempdir;

    fn header() -> RawFileHeader {
        RawFileHeader {
            version: crate::rawfile::CURRENT_VERSION,
            model_id: 0,
            grab_mode: GrabMode::Corrected,
            color_mode: ColorMode::Mono,
            shutter_mode: ShutterMode::Manual,
            base_length: 0.1,
            bf: 60.0,
            d_inf: 2.0,
            width: 2,
            height: 2,
            interval_ms: 33,
            start_utc_ms: 0,
        }
    }

    #[test]
    fn records_persist_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.iscraw");
        let recorder = Recorder::new(0);
        recorder.start(&path, header()).unwrap();
        recorder.enqueue(RawRecord { frame_number: 1, timestamp_ms: 10, payload: vec![1, 2] });
        recorder.enqueue(RawRecord { frame_number: 2, timestamp_ms: 20, payload: vec![3, 4] });
        recorder.stop(DEFAULT_JOIN_TIMEOUT).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() > RawFileHeader::ENCODED_LEN);
        let decoded_header = RawFileHeader::decode(&bytes).unwrap();
        assert_eq!(decoded_header.width, 2);
    }

    #[test]
    fn throttle_drops_records_inside_the_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.iscraw");
        let recorder = Recorder::new(1000);
        recorder.start(&path, header()).unwrap();
        recorder.enqueue(RawRecord { frame_number: 1, timestamp_ms: 0, payload: vec![1] });
        recorder.enqueue(RawRecord { frame_number: 2, timestamp_ms: 100, payload: vec![2] }); // inside window, dropped
        recorder.stop(DEFAULT_JOIN_TIMEOUT).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let mut cursor = std::io::Cursor::new(&bytes[RawFileHeader::ENCODED_LEN..]);
        let mut count = 0;
        while RawRecord::read_from(&mut cursor).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn cancel_for_backpressure_fails_the_recorder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.iscraw");
        let recorder = Recorder::new(0);
        recorder.start(&path, header()).unwrap();

        recorder.cancel_for_backpressure();

        assert_eq!(recorder.state(), RecorderState::Failed);
        assert_eq!(recorder.last_error().unwrap().kind(), ErrorKind::RecorderBackpressure);
        let _ = recorder.stop(DEFAULT_JOIN_TIMEOUT);
    }

    #[test]
    fn enqueue_never_blocks_even_when_flooded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.iscraw");
        let recorder = Recorder::new(0);
        recorder.start(&path, header()).unwrap();

        for i in 0..(MAX_QUEUE_DEPTH as u64 * 8) {
            recorder.enqueue(RawRecord { frame_number: i, timestamp_ms: i, payload: vec![0u8; 1] });
        }

        recorder.stop(DEFAULT_JOIN_TIMEOUT).unwrap_or(());
    }

    #[test]
    fn start_when_already_recording_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.iscraw");
        let recorder = Recorder::new(0);
        recorder.start(&path, header()).unwrap();
        let err = recorder.start(&path, header()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        recorder.stop(DEFAULT_JOIN_TIMEOUT).unwrap();
    }
}
