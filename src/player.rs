// SPDX-License-Identifier: GPL-3.0-only

//! File Player (spec §4.D): reads an [`crate::rawfile`] container back and
//! publishes into the *same* [`crate::capture::FrameRing`] the live
//! capture path uses, so [`crate::controller`] never needs to know
//! whether it's live or replayed.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::capture::{FrameRing, FrameSink, RawCapture, RawPayload};
use crate::error::{err, Result};
use crate::frame::{AcquisitionMeta, ColorMode, GrabMode};
use crate::rawfile::{RawFileHeader, RawRecord};
use crate::util::worker::Worker;

/// Player lifecycle state (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    /// Reached end of file; `stop` is required before replaying.
    Eof,
}

/// Snapshot returned by `GetFileReadStatus` (spec §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileReadStatus {
    pub state: PlayerState,
    pub current_frame_number: u64,
    pub total_frames_read: u64,
}

struct Shared {
    state: Mutex<PlayerState>,
    current_frame_number: std::sync::atomic::AtomicU64,
    total_frames_read: std::sync::atomic::AtomicU64,
    /// Set by `seek` to ask the reader thread to jump to a frame number
    /// before its next read.
    seek_request: Mutex<Option<u64>>,
}

/// Replays a raw capture file at its recorded pacing, publishing into a
/// shared [`FrameRing`].
pub struct FilePlayer {
    header: RawFileHeader,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl FilePlayer {
    /// Validate the file header without starting playback.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut header_bytes = vec![0u8; RawFileHeader::ENCODED_LEN];
        file.read_exact(&mut header_bytes)?;
        let header = RawFileHeader::decode(&header_bytes)?;

        Ok(Self {
            header,
            shared: Arc::new(Shared {
                state: Mutex::new(PlayerState::Idle),
                current_frame_number: std::sync::atomic::AtomicU64::new(0),
                total_frames_read: std::sync::atomic::AtomicU64::new(0),
                seek_request: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn header(&self) -> RawFileHeader {
        self.header
    }

    pub fn read_status(&self) -> FileReadStatus {
        FileReadStatus {
            state: *self.shared.state.lock().expect("player state mutex poisoned"),
            current_frame_number: self.shared.current_frame_number.load(Ordering::SeqCst),
            total_frames_read: self.shared.total_frames_read.load(Ordering::SeqCst),
        }
    }

    /// Request a jump to `frame_number` on the next read iteration
    /// (spec §6.4 `SetReadFrameNumber`). Implemented by rescanning from
    /// the start of the record stream since records are variable-length.
    pub fn seek(&self, frame_number: u64) -> Result<()> {
        if *self.shared.state.lock().expect("player state mutex poisoned") == PlayerState::Idle {
            return Err(err!(InvalidState, "cannot seek before playback has started"));
        }
        *self.shared.seek_request.lock().expect("player seek mutex poisoned") = Some(frame_number);
        Ok(())
    }

    pub fn start(&self, path: impl AsRef<Path>, ring: Arc<FrameRing>, on_frame: FrameSink) -> Result<()> {
        {
            let mut state = self.shared.state.lock().expect("player state mutex poisoned");
            if *state != PlayerState::Idle {
                return Err(err!(InvalidState, "player is {state:?}, expected Idle"));
            }
            *state = PlayerState::Playing;
        }

        let path = path.as_ref().to_path_buf();
        let header = self.header;
        let shared = Arc::clone(&self.shared);
        let worker = Worker::spawn("player", move |stop| {
            if let Err(e) = read_loop(&path, header, &ring, &shared, &on_frame, &stop) {
                tracing::error!(error = %e, "file player aborted");
            }
            *shared.state.lock().expect("player state mutex poisoned") = PlayerState::Eof;
        });
        *self.worker.lock().expect("player worker mutex poisoned") = Some(worker);
        info!("file player started");
        Ok(())
    }

    pub fn stop(&self, timeout: Duration) -> Result<()> {
        let mut worker_slot = self.worker.lock().expect("player worker mutex poisoned");
        if let Some(mut worker) = worker_slot.take() {
            if !worker.stop(timeout) {
                return Err(err!(ThreadStuck, "player thread did not join within {timeout:?}"));
            }
        }
        *self.shared.state.lock().expect("player state mutex poisoned") = PlayerState::Idle;
        Ok(())
    }
}

fn read_loop(
    path: &Path,
    header: RawFileHeader,
    ring: &FrameRing,
    shared: &Shared,
    on_frame: &FrameSink,
    stop: &std::sync::atomic::AtomicBool,
) -> Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    reader.seek(SeekFrom::Start(RawFileHeader::ENCODED_LEN as u64))?;

    let mut last_timestamp_ms: Option<u64> = None;

    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(target) = shared.seek_request.lock().expect("player seek mutex poisoned").take() {
            reader.seek(SeekFrom::Start(RawFileHeader::ENCODED_LEN as u64))?;
            last_timestamp_ms = None;
            skip_to_frame(&mut reader, target)?;
        }

        let Some(record) = RawRecord::read_from(&mut reader)? else {
            return Ok(());
        };

        if header.interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(header.interval_ms as u64));
        } else if let Some(prev) = last_timestamp_ms {
            let delta = record.timestamp_ms.saturating_sub(prev);
            if delta > 0 {
                std::thread::sleep(Duration::from_millis(delta));
            }
        }
        last_timestamp_ms = Some(record.timestamp_ms);

        shared.current_frame_number.store(record.frame_number, Ordering::SeqCst);
        shared.total_frames_read.fetch_add(1, Ordering::SeqCst);

        let capture = RawCapture {
            frame_number: record.frame_number,
            captured_at: std::time::UNIX_EPOCH + Duration::from_millis(record.timestamp_ms),
            meta: AcquisitionMeta {
                gain: 0,
                exposure: 0,
                shutter_mode: header.shutter_mode,
                grab_mode: header.grab_mode,
                color_mode: header.color_mode,
            },
            width: header.width,
            height: header.height,
            payload: RawPayload::Raw(record.payload),
        };
        on_frame(capture.clone());
        ring.push(capture);
    }
}

/// Advance `reader` until positioned just after the first record whose
/// `frame_number >= target` (spec §4.D `SetReadFrameNumber`: the next
/// read delivers that record, not necessarily an exact match since
/// recordings can have gaps from dropped frames).
fn skip_to_frame(reader: &mut BufReader<File>, target: u64) -> Result<()> {
    loop {
        let start = reader.stream_position()?;
        let Some(record) = RawRecord::read_from(reader)? else {
            return Err(err!(OutOfRange, "no record with frame number >= {target} found in file"));
        };
        if record.frame_number >= target {
            reader.seek(SeekFrom::Start(start))?;
            return Ok(());
        }
    }
}
