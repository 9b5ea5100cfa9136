// SPDX-License-Identifier: GPL-3.0-only

//! Capture thread lifecycle (spec §4.B): `Idle -> Starting -> Running ->
//! Stopping -> Idle`, built directly on [`crate::util::worker::Worker`],
//! which generalizes the teacher's `frame_loop::CaptureLoopController`.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info};

use crate::device::DeviceAbstraction;
use crate::error::{err, ErrorKind, Result};
use crate::frame::{AcquisitionMeta, GrabMode};
use crate::util::worker::{Worker, DEFAULT_JOIN_TIMEOUT};

use super::ring::{FrameRing, FrameSink, RawCapture, RawPayload};

/// Lifecycle state of a [`CaptureThread`] (spec §4.B state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Running,
    Stopping,
}

struct Running {
    worker: Worker,
}

/// Drives a device's grab loop on a dedicated thread, publishing each
/// frame into a shared [`FrameRing`].
pub struct CaptureThread {
    state: Mutex<CaptureState>,
    running: Mutex<Option<Running>>,
}

impl CaptureThread {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CaptureState::Idle),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock().expect("capture state mutex poisoned")
    }

    /// Begin grabbing from `device` at `grab_mode`, publishing each frame
    /// into `ring` and invoking `on_frame` inline with a copy of it right
    /// after. Fails with `InvalidState` if not currently `Idle`.
    ///
    /// `on_frame` carries the decode/merge/publish work a
    /// [`crate::controller::PipelineController`] attaches to this thread
    /// rather than spawning a dedicated one for it (spec §5's three-thread
    /// budget has no room for a fourth).
    pub fn start(
        &self,
        device: Arc<DeviceAbstraction>,
        ring: Arc<FrameRing>,
        grab_mode: GrabMode,
        shutter_mode: crate::frame::ShutterMode,
        wait_time_ms: u32,
        on_frame: FrameSink,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().expect("capture state mutex poisoned");
            if *state != CaptureState::Idle {
                return Err(err!(InvalidState, "capture thread is {state:?}, expected Idle"));
            }
            *state = CaptureState::Starting;
        }

        device.with_driver(|d| d.start_grab(grab_mode)).map_err(|e| {
            *self.state.lock().expect("capture state mutex poisoned") = CaptureState::Idle;
            e
        })?;

        info!(?grab_mode, "capture session starting");
        let worker = Worker::spawn("capture", move |stop| {
            capture_loop(device, ring, grab_mode, shutter_mode, wait_time_ms, on_frame, stop);
        });

        *self.running.lock().expect("capture running mutex poisoned") = Some(Running { worker });
        *self.state.lock().expect("capture state mutex poisoned") = CaptureState::Running;
        Ok(())
    }

    /// Stop the grab loop, waiting up to `timeout` for the thread to
    /// exit. Returns `ThreadStuck` if the thread does not honor
    /// cancellation in time; the session must then be torn down rather
    /// than reused (spec §5).
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        {
            let mut state = self.state.lock().expect("capture state mutex poisoned");
            match *state {
                CaptureState::Idle => return Ok(()),
                CaptureState::Running => *state = CaptureState::Stopping,
                CaptureState::Starting | CaptureState::Stopping => {
                    return Err(err!(InvalidState, "capture thread is {state:?}"));
                }
            }
        }

        let mut running_slot = self.running.lock().expect("capture running mutex poisoned");
        let Some(mut running) = running_slot.take() else {
            *self.state.lock().expect("capture state mutex poisoned") = CaptureState::Idle;
            return Ok(());
        };

        let stopped = running.worker.stop(timeout);
        if !stopped {
            error!("capture thread did not stop within {timeout:?}");
            return Err(err!(ThreadStuck, "capture thread did not join within {timeout:?}"));
        }

        *self.state.lock().expect("capture state mutex poisoned") = CaptureState::Idle;
        info!("capture session stopped");
        Ok(())
    }
}

impl Default for CaptureThread {
    fn default() -> Self {
        Self::new()
    }
}

fn capture_loop(
    device: Arc<DeviceAbstraction>,
    ring: Arc<FrameRing>,
    grab_mode: GrabMode,
    shutter_mode: crate::frame::ShutterMode,
    wait_time_ms: u32,
    on_frame: FrameSink,
    stop: Arc<std::sync::atomic::AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        let result = device.with_driver(|d| d.get_image(wait_time_ms));
        match result {
            Ok(frame) => {
                debug!(frame_number = frame.frame_number, "captured frame");
                let capture = RawCapture {
                    frame_number: frame.frame_number,
                    captured_at: SystemTime::now(),
                    meta: AcquisitionMeta {
                        gain: frame.gain,
                        exposure: frame.exposure,
                        shutter_mode,
                        grab_mode,
                        color_mode: crate::frame::ColorMode::Mono,
                    },
                    width: frame.width,
                    height: frame.height,
                    payload: RawPayload::Driver {
                        base: frame.base_bytes,
                        compare: frame.compare_bytes,
                    },
                };
                on_frame(capture.clone());
                ring.push(capture);
            }
            Err(e) if e.kind() == ErrorKind::DeviceIO => {
                // Transient; spec §7 treats this kind as session-fatal at
                // the controller level, but the loop itself just exits so
                // the controller can observe the failed state via `stop`.
                error!(error = %e, "capture loop aborting on device I/O error");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropped frame due to transient capture error");
            }
        }
    }

    let _ = device.with_driver(|d| d.stop_grab());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDriver;
    use crate::device::{CameraModel, DeviceAbstraction};
    use crate::frame::CameraSpec;

    fn device() -> Arc<DeviceAbstraction> {
        let dev = DeviceAbstraction::new(
            crate::device::types::DeviceId { model: CameraModel::XC, index: 0 },
            Box::new(MockDriver::new(CameraModel::XC, CameraSpec::default())),
        );
        dev.open().unwrap();
        Arc::new(dev)
    }

    #[test]
    fn start_publishes_frames_then_stop_is_clean() {
        let dev = device();
        let ring = Arc::new(FrameRing::new(4));
        let capture = CaptureThread::new();
        capture.start(dev, ring.clone(), GrabMode::Corrected, crate::frame::ShutterMode::Manual, 50, Arc::new(|_| {})).unwrap();
        assert_eq!(capture.state(), CaptureState::Running);

        let got = ring.pop_blocking(Duration::from_secs(1));
        assert!(got.is_some());

        capture.stop(DEFAULT_JOIN_TIMEOUT).unwrap();
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn start_twice_is_rejected_with_invalid_state() {
        let dev = device();
        let ring = Arc::new(FrameRing::new(4));
        let capture = CaptureThread::new();
        capture
            .start(dev.clone(), ring.clone(), GrabMode::Corrected, crate::frame::ShutterMode::Manual, 50, Arc::new(|_| {}))
            .unwrap();
        let err = capture
            .start(dev, ring, GrabMode::Corrected, crate::frame::ShutterMode::Manual, 50, Arc::new(|_| {}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        capture.stop(DEFAULT_JOIN_TIMEOUT).unwrap();
    }
}
