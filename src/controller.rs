// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline Controller (spec §4.H): the top-level state machine wiring the
//! Device Abstraction, Capture Session / File Player, Frame Decoder,
//! Software Stereo Matcher, Disparity Filter and File Recorder into one
//! session, and answering the consumer-facing query API.
//!
//! Holds to the three-thread budget of spec §5 ("at most three long-lived
//! threads per session"): the capture-or-player thread decodes, merges and
//! publishes inline via the [`crate::capture::ring::FrameSink`] it's
//! started with, rather than handing that work to a fourth dispatch
//! thread. The two threads this module spawns directly are the processor
//! thread (present when software stereo or the disparity filter is
//! enabled) and the recorder thread owned by [`Recorder`] (present when
//! recording).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::capture::{CaptureThread, FrameRing, FrameSink, RawCapture};
use crate::config::{Config, PipelineConfig};
use crate::decode;
use crate::decode::layouts;
use crate::device::{CameraModel, DeviceAbstraction, OptionId, OptionValue};
use crate::error::{err, Result};
use crate::filter::{self, FilterParams};
use crate::frame::arena::FrameArena;
use crate::frame::{AcquisitionMeta, CameraSpec, ColorMode, FrameData, FrameSet, FrameSlotKind, GrabMode};
use crate::paramfile::{self, ParamFile, ParamValue};
use crate::player::{FilePlayer, PlayerState};
use crate::rawfile::{self, FileInfo, RawFileHeader};
use crate::recorder::Recorder;
use crate::stereo::{self, MatchMetricKind, StereoParams};
use crate::util::worker::{Worker, DEFAULT_JOIN_TIMEOUT};

/// Controller lifecycle state (spec §4.H: `Uninitialized -> Idle ->
/// Starting -> Running -> Stopping -> Idle -> Terminated`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated,
}

/// Which of the two consumer-facing `FrameSet`s a query targets: the raw
/// capture-side set, or the data-processing-module set (spec §4.H). The
/// spec's operation table leaves "frame" ambiguous between these two
/// producers and the `Latest`/`Previous`/`Merged` slot within one; this
/// two-part selector resolves that (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Camera,
    Processor,
}

/// `GetPosition3D` result (spec §4.H).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Pixel-space query region for `GetAreaStatistics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// `GetAreaStatistics` result (spec §4.H); pixels whose disparity is at or
/// below `d_inf` (no measurement, Invariant 3) are excluded from every
/// aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaStatistics {
    pub valid_pixel_count: u32,
    pub min_disparity: f32,
    pub max_disparity: f32,
    pub mean_disparity: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub mean_distance: f32,
}

/// One decoded exposure handed from the capture/player thread to the
/// processor thread.
struct ProcessorJob {
    frame_number: u64,
    captured_at: std::time::SystemTime,
    meta: AcquisitionMeta,
    width: u32,
    height: u32,
    p1: Vec<u8>,
    payload: ProcessorPayload,
}

enum ProcessorPayload {
    /// Rectified pair awaiting block matching (software stereo enabled).
    StereoPair(Vec<u8>),
    /// Already-decoded (and possibly double-shutter-merged) disparity
    /// plane awaiting filter passes only.
    Disparity(Vec<f32>),
}

struct SessionWorkers {
    capture: Option<CaptureThread>,
    player: Option<Arc<FilePlayer>>,
    processor: Option<Worker>,
    processor_tx: Option<Sender<ProcessorJob>>,
    recorder: Option<Arc<Recorder>>,
    ring: Arc<FrameRing>,
}

/// The top-level session object (spec §4.H).
pub struct PipelineController {
    device: Arc<DeviceAbstraction>,
    state: Mutex<ControllerState>,
    config: Mutex<Config>,
    camera_spec: Mutex<Option<CameraSpec>>,
    camera_endpoint: Arc<Mutex<FrameSet>>,
    processor_endpoint: Arc<Mutex<FrameSet>>,
    previous_decoded: Arc<Mutex<Option<FrameData>>>,
    session: Mutex<Option<SessionWorkers>>,
    stereo_params: Mutex<StereoParams>,
    filter_params: Mutex<FilterParams>,
}

impl PipelineController {
    pub fn new(device: Arc<DeviceAbstraction>) -> Self {
        Self {
            device,
            state: Mutex::new(ControllerState::Uninitialized),
            config: Mutex::new(Config::default()),
            camera_spec: Mutex::new(None),
            camera_endpoint: Arc::new(Mutex::new(FrameSet::default())),
            processor_endpoint: Arc::new(Mutex::new(FrameSet::default())),
            previous_decoded: Arc::new(Mutex::new(None)),
            session: Mutex::new(None),
            stereo_params: Mutex::new(StereoParams::default()),
            filter_params: Mutex::new(FilterParams::default()),
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock().expect("controller state mutex poisoned")
    }

    /// `Initialize(config)` (spec §4.H): bind persisted defaults and open
    /// the device. Valid from `Uninitialized`, or from `Terminated` to
    /// support the §7 recovery path ("Terminate and re-Initialize" after a
    /// session-fatal error).
    pub fn initialize(&self, config: Config) -> Result<()> {
        {
            let state = self.state.lock().expect("controller state mutex poisoned");
            match *state {
                ControllerState::Uninitialized | ControllerState::Terminated => {}
                other => {
                    return Err(err!(
                        InvalidState,
                        "initialize requires Uninitialized or Terminated, controller is {other:?}"
                    ))
                }
            }
        }

        self.device.open()?;
        *self.stereo_params.lock().expect("stereo params mutex poisoned") = config.default_stereo_params;
        *self.filter_params.lock().expect("filter params mutex poisoned") = config.default_filter_params;
        *self.config.lock().expect("config mutex poisoned") = config;
        *self.state.lock().expect("controller state mutex poisoned") = ControllerState::Idle;
        info!("pipeline controller initialized");
        Ok(())
    }

    /// `Start(pipeline_config)` (spec §4.H): validate the compatibility
    /// matrix against the device's (or, in playback, the file's) live
    /// state and spin up the session's worker threads.
    pub fn start(&self, pipeline_cfg: PipelineConfig) -> Result<()> {
        {
            let mut state = self.state.lock().expect("controller state mutex poisoned");
            if *state != ControllerState::Idle {
                return Err(err!(InvalidState, "start requires Idle, controller is {state:?}"));
            }
            *state = ControllerState::Starting;
        }

        match self.try_start(pipeline_cfg) {
            Ok(()) => {
                *self.state.lock().expect("controller state mutex poisoned") = ControllerState::Running;
                info!("pipeline controller running");
                Ok(())
            }
            Err(e) => {
                *self.state.lock().expect("controller state mutex poisoned") = ControllerState::Idle;
                Err(e)
            }
        }
    }

    fn try_start(&self, pipeline_cfg: PipelineConfig) -> Result<()> {
        pipeline_cfg.check_compatible()?;

        let (effective_grab_mode, effective_shutter_mode, camera_spec, player) = if pipeline_cfg.playback_enabled {
            let path = pipeline_cfg
                .playback_file
                .clone()
                .expect("playback_file presence already checked by check_compatible");
            let player = FilePlayer::open(&path)?;
            let header = player.header();
            // Per spec §4.D, the grab mode and camera spec visible to
            // consumers during playback are those stored in the header,
            // not the live device's current configuration.
            let spec = CameraSpec {
                base_length: header.base_length,
                bf: header.bf,
                d_inf: header.d_inf,
                max_width: header.width,
                max_height: header.height,
                serial: [0u8; 16],
                fpga_version_major: 0,
                fpga_version_minor: 0,
            };
            (header.grab_mode, header.shutter_mode, spec, Some(Arc::new(player)))
        } else {
            let shutter = self
                .device
                .get(OptionId::ShutterMode)?
                .as_shutter()
                .ok_or_else(|| err!(InvalidOption, "ShutterMode option did not return a shutter value"))?;
            let spec = self.device.camera_spec()?;
            (pipeline_cfg.grab_mode, shutter, spec, None)
        };

        check_matrix(&pipeline_cfg, effective_grab_mode, effective_shutter_mode)?;

        let arena = Arc::new(Mutex::new(FrameArena::new(camera_spec.max_width, camera_spec.max_height, 3)));

        *self.camera_endpoint.lock().expect("camera endpoint mutex poisoned") = FrameSet::default();
        *self.processor_endpoint.lock().expect("processor endpoint mutex poisoned") = FrameSet::default();
        *self.previous_decoded.lock().expect("previous-frame mutex poisoned") = None;
        *self.camera_spec.lock().expect("camera spec mutex poisoned") = Some(camera_spec);

        // Spec §5: the processor thread exists whenever software stereo
        // OR the disparity filter is enabled, not only for software
        // stereo — a disparity-filter-only (parallax) session still needs
        // somewhere to run speckle/smoothing/hole-fill.
        let processor_enabled = pipeline_cfg.sw_stereo_enabled || pipeline_cfg.disparity_filter_enabled;
        let (processor_tx, processor_worker) = if processor_enabled {
            let (tx, rx) = mpsc::channel::<ProcessorJob>();
            let endpoint = Arc::clone(&self.processor_endpoint);
            let stereo_params = *self.stereo_params.lock().expect("stereo params mutex poisoned");
            let filter_params = *self.filter_params.lock().expect("filter params mutex poisoned");
            let sw_stereo_enabled = pipeline_cfg.sw_stereo_enabled;
            let disparity_filter_enabled = pipeline_cfg.disparity_filter_enabled;
            let processor_arena = Arc::clone(&arena);
            let worker = Worker::spawn("processor", move |stop| {
                processor_loop(rx, endpoint, processor_arena, stereo_params, filter_params, sw_stereo_enabled, disparity_filter_enabled, stop);
            });
            (Some(tx), Some(worker))
        } else {
            (None, None)
        };

        let recorder = if pipeline_cfg.record_enabled {
            let output_dir = self.config.lock().expect("config mutex poisoned").output_dir.clone();
            std::fs::create_dir_all(&output_dir)?;
            let path = recording_path(&output_dir);
            let header = RawFileHeader {
                version: rawfile::CURRENT_VERSION,
                model_id: model_to_id(self.device.model()),
                grab_mode: effective_grab_mode,
                color_mode: pipeline_cfg.color_mode,
                shutter_mode: effective_shutter_mode,
                base_length: camera_spec.base_length,
                bf: camera_spec.bf,
                d_inf: camera_spec.d_inf,
                width: camera_spec.max_width,
                height: camera_spec.max_height,
                interval_ms: 0,
                start_utc_ms: now_utc_ms(),
            };
            let throttle_ms = self.config.lock().expect("config mutex poisoned").default_recorder_throttle_ms;
            let recorder = Arc::new(Recorder::new(throttle_ms));
            recorder.start(&path, header)?;
            Some(recorder)
        } else {
            None
        };

        let merge_thresholds = if merge_gate(effective_shutter_mode, pipeline_cfg.raw_capture_enabled, pipeline_cfg.playback_enabled) {
            let fp = *self.filter_params.lock().expect("filter params mutex poisoned");
            Some((fp.low_threshold, fp.high_threshold))
        } else {
            None
        };

        let on_frame = make_frame_sink(
            Arc::clone(&arena),
            Arc::clone(&self.camera_endpoint),
            Arc::clone(&self.previous_decoded),
            recorder.clone(),
            processor_tx.clone(),
            pipeline_cfg.sw_stereo_enabled,
            merge_thresholds,
        );

        let ring = Arc::new(FrameRing::new(crate::capture::ring::MIN_CAPACITY));

        let capture = if let Some(player) = &player {
            let path = pipeline_cfg
                .playback_file
                .clone()
                .expect("playback_file presence already checked by check_compatible");
            player.start(&path, Arc::clone(&ring), on_frame)?;
            None
        } else {
            let capture_thread = CaptureThread::new();
            capture_thread.start(
                Arc::clone(&self.device),
                Arc::clone(&ring),
                effective_grab_mode,
                effective_shutter_mode,
                pipeline_cfg.wait_time_ms,
                on_frame,
            )?;
            Some(capture_thread)
        };

        *self.session.lock().expect("session mutex poisoned") = Some(SessionWorkers {
            capture,
            player,
            processor: processor_worker,
            processor_tx,
            recorder,
            ring,
        });

        Ok(())
    }

    /// `Stop()` (spec §4.H): tear down this session's workers. Always
    /// lands the controller back in `Idle`, even if a worker reported
    /// `ThreadStuck` — per spec §7's own recovery guidance ("Terminate and
    /// re-Initialize"), `Terminate` must stay reachable afterwards, so
    /// `Stop` surfaces the first such error to the caller rather than
    /// leaving the controller wedged in `Stopping`.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        {
            let mut state = self.state.lock().expect("controller state mutex poisoned");
            match *state {
                ControllerState::Idle => return Ok(()),
                ControllerState::Running => *state = ControllerState::Stopping,
                other => return Err(err!(InvalidState, "stop requires Running, controller is {other:?}")),
            }
        }

        let mut first_err: Option<crate::error::Error> = None;
        if let Some(mut session) = self.session.lock().expect("session mutex poisoned").take() {
            if let Some(capture) = session.capture.take() {
                if let Err(e) = capture.stop(timeout) {
                    warn!(error = %e, "capture thread stop reported an error");
                    first_err.get_or_insert(e);
                }
            }
            if let Some(player) = session.player.take() {
                if let Err(e) = player.stop(timeout) {
                    warn!(error = %e, "player thread stop reported an error");
                    first_err.get_or_insert(e);
                }
            }
            session.processor_tx.take(); // disconnect so a blocked processor wakes on recv
            if let Some(mut processor) = session.processor.take() {
                if !processor.stop(timeout) {
                    let e = err!(ThreadStuck, "processor thread did not join within {timeout:?}");
                    warn!(error = %e, "processor thread stop reported an error");
                    first_err.get_or_insert(e);
                }
            }
            if let Some(recorder) = session.recorder.take() {
                if let Err(e) = recorder.stop(timeout) {
                    warn!(error = %e, "recorder stop reported an error");
                    first_err.get_or_insert(e);
                }
            }
        }

        *self.camera_endpoint.lock().expect("camera endpoint mutex poisoned") = FrameSet::default();
        *self.processor_endpoint.lock().expect("processor endpoint mutex poisoned") = FrameSet::default();
        *self.previous_decoded.lock().expect("previous-frame mutex poisoned") = None;
        *self.camera_spec.lock().expect("camera spec mutex poisoned") = None;
        *self.state.lock().expect("controller state mutex poisoned") = ControllerState::Idle;
        info!("pipeline controller stopped");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `Terminate()` (spec §4.H): final, one-way transition. Requires `Idle`.
    pub fn terminate(&self) -> Result<()> {
        let mut state = self.state.lock().expect("controller state mutex poisoned");
        if *state != ControllerState::Idle {
            return Err(err!(InvalidState, "terminate requires Idle, controller is {state:?}"));
        }
        if let Err(e) = self.device.close() {
            warn!(error = %e, "device close failed during terminate");
        }
        *state = ControllerState::Terminated;
        info!("pipeline controller terminated");
        Ok(())
    }

    fn require_running(&self) -> Result<()> {
        let state = *self.state.lock().expect("controller state mutex poisoned");
        if state != ControllerState::Running {
            return Err(err!(InvalidState, "pipeline is {state:?}, expected Running"));
        }
        Ok(())
    }

    fn endpoint_set(&self, endpoint: Endpoint) -> FrameSet {
        match endpoint {
            Endpoint::Camera => self.camera_endpoint.lock().expect("camera endpoint mutex poisoned").clone(),
            Endpoint::Processor => self.processor_endpoint.lock().expect("processor endpoint mutex poisoned").clone(),
        }
    }

    /// `GetCameraData(out FrameSet)` (spec §4.H): a non-blocking copy of
    /// the capture-side `FrameSet`. Returns `NotReady` if no data has
    /// been published yet.
    pub fn get_camera_data(&self) -> Result<FrameSet> {
        self.check_playback_eof();
        self.require_running()?;
        let set = self.camera_endpoint.lock().expect("camera endpoint mutex poisoned").clone();
        if set.is_empty() {
            return Err(err!(NotReady, "no camera data available yet"));
        }
        Ok(set)
    }

    /// `GetDataProcModuleData(out FrameSet)` (spec §4.H): a non-blocking
    /// copy of the processor-side `FrameSet`. Returns `NotReady` if the
    /// processor is disabled for this session or hasn't produced a result
    /// yet.
    pub fn get_data_proc_module_data(&self) -> Result<FrameSet> {
        self.check_playback_eof();
        self.require_running()?;
        let set = self.processor_endpoint.lock().expect("processor endpoint mutex poisoned").clone();
        if set.is_empty() {
            return Err(err!(NotReady, "processor is disabled or has no result yet"));
        }
        Ok(set)
    }

    /// Per spec §4.D: "EOF while pacing pauses the pipeline and the
    /// Controller stops the session." Polls the active session's player
    /// (a no-op for live capture, or a session still playing) and tears
    /// the session down back to `Idle` once it reports `Eof`.
    fn check_playback_eof(&self) {
        let hit_eof = self
            .session
            .lock()
            .expect("session mutex poisoned")
            .as_ref()
            .and_then(|s| s.player.as_ref())
            .map(|p| p.read_status().state == PlayerState::Eof)
            .unwrap_or(false);
        if hit_eof {
            if let Err(e) = self.stop(DEFAULT_JOIN_TIMEOUT) {
                warn!(error = %e, "stop after playback EOF reported an error");
            }
        }
    }

    /// `GetPositionDepth(x, y, frame, out disparity, out distance)` (spec
    /// §4.H). `distance` is `None` where Invariant 3's "no measurement"
    /// sentinel applies (disparity at or below `d_inf`).
    pub fn get_position_depth(&self, endpoint: Endpoint, slot: FrameSlotKind, x: u32, y: u32) -> Result<(f32, Option<f32>)> {
        self.require_running()?;
        let spec = self
            .camera_spec
            .lock()
            .expect("camera spec mutex poisoned")
            .ok_or_else(|| err!(NotReady, "camera spec not available"))?;
        let set = self.endpoint_set(endpoint);
        let frame = set
            .slot(slot)
            .ok_or_else(|| err!(NotReady, "no frame available on the requested endpoint/slot"))?;
        let disparity = frame
            .depth
            .as_ref()
            .and_then(|d| sample(d, frame.width, frame.height, x, y))
            .ok_or_else(|| err!(OutOfRange, "({x},{y}) outside frame bounds or no disparity plane"))?;
        Ok((disparity, spec.distance_for_disparity(disparity)))
    }

    /// `GetPosition3D(x, y, frame, out X, out Y, out Z)` (spec §4.H).
    pub fn get_position_3d(&self, endpoint: Endpoint, slot: FrameSlotKind, x: u32, y: u32) -> Result<Point3D> {
        let (_disparity, distance) = self.get_position_depth(endpoint, slot, x, y)?;
        let z = distance.ok_or_else(|| err!(OutOfRange, "no measurement at ({x},{y})"))?;

        let spec = self
            .camera_spec
            .lock()
            .expect("camera spec mutex poisoned")
            .expect("checked by get_position_depth above");
        let set = self.endpoint_set(endpoint);
        let frame = set.slot(slot).expect("checked by get_position_depth above");

        let f = spec.focal_length();
        let cx = frame.width as f32 / 2.0;
        let cy = frame.height as f32 / 2.0;
        Ok(Point3D {
            x: (x as f32 - cx) * z / f,
            y: (y as f32 - cy) * z / f,
            z,
        })
    }

    /// `GetAreaStatistics(rect, frame, out stats)` (spec §4.H).
    pub fn get_area_statistics(&self, endpoint: Endpoint, slot: FrameSlotKind, rect: Rect) -> Result<AreaStatistics> {
        self.require_running()?;
        let spec = self
            .camera_spec
            .lock()
            .expect("camera spec mutex poisoned")
            .ok_or_else(|| err!(NotReady, "camera spec not available"))?;
        let set = self.endpoint_set(endpoint);
        let frame = set
            .slot(slot)
            .ok_or_else(|| err!(NotReady, "no frame available on the requested endpoint/slot"))?;
        let depth = frame.depth.as_ref().ok_or_else(|| err!(OutOfRange, "frame has no disparity plane"))?;

        let mut valid = 0u32;
        let mut min_d = f32::MAX;
        let mut max_d = f32::MIN;
        let mut sum_d = 0.0f64;
        let mut min_z = f32::MAX;
        let mut max_z = f32::MIN;
        let mut sum_z = 0.0f64;

        for dy in 0..rect.height {
            for dx in 0..rect.width {
                let x = rect.x + dx;
                let y = rect.y + dy;
                if x >= frame.width || y >= frame.height {
                    continue;
                }
                let d = depth[(y * frame.width + x) as usize];
                if d <= spec.d_inf {
                    continue;
                }
                valid += 1;
                min_d = min_d.min(d);
                max_d = max_d.max(d);
                sum_d += d as f64;
                let z = spec.bf / (d - spec.d_inf);
                min_z = min_z.min(z);
                max_z = max_z.max(z);
                sum_z += z as f64;
            }
        }

        if valid == 0 {
            return Err(err!(OutOfRange, "no valid measurements in the requested area"));
        }

        Ok(AreaStatistics {
            valid_pixel_count: valid,
            min_disparity: min_d,
            max_disparity: max_d,
            mean_disparity: (sum_d / valid as f64) as f32,
            min_distance: min_z,
            max_distance: max_z,
            mean_distance: (sum_z / valid as f64) as f32,
        })
    }

    /// `DeviceGetOption` (spec §4.H / §6.3).
    pub fn device_get_option(&self, option: OptionId) -> Result<OptionValue> {
        self.device.get(option)
    }

    /// `DeviceSetOption` (spec §4.H / §6.3).
    pub fn device_set_option(&self, option: OptionId, value: OptionValue) -> Result<()> {
        self.device.set(option, value)
    }

    /// `GetDataProcModuleParameter` (spec §4.H / §6.3): the combined
    /// `[stereo]`/`[filter]` Module Parameter File text for the session's
    /// current matcher and filter settings.
    pub fn get_data_proc_module_parameter(&self) -> String {
        let mut file = ParamFile::new();
        stereo_params_to_paramfile(&self.stereo_params.lock().expect("stereo params mutex poisoned"), &mut file);
        filter_params_to_paramfile(&self.filter_params.lock().expect("filter params mutex poisoned"), &mut file);
        file.render()
    }

    /// `SetDataProcModuleParameter(text, persist)` (spec §4.H / §6.3).
    /// Validates before applying; when `persist` is set, also writes the
    /// new defaults into the on-disk config.
    pub fn set_data_proc_module_parameter(&self, text: &str, persist: bool) -> Result<()> {
        let file = ParamFile::parse(text)?;
        let stereo = stereo_params_from_paramfile(&file)?;
        let filter = filter_params_from_paramfile(&file)?;
        stereo.validate()?;
        filter.validate()?;

        *self.stereo_params.lock().expect("stereo params mutex poisoned") = stereo;
        *self.filter_params.lock().expect("filter params mutex poisoned") = filter;

        if persist {
            let mut config = self.config.lock().expect("config mutex poisoned");
            config.default_stereo_params = stereo;
            config.default_filter_params = filter;
            if let Some(path) = Config::default_path() {
                config.save(&path)?;
            }
        }
        Ok(())
    }

    /// `GetFileInformation(path, out header, out info)` (spec §4.H).
    pub fn get_file_information(&self, path: impl AsRef<Path>) -> Result<(RawFileHeader, FileInfo)> {
        rawfile::scan_file(path)
    }

    /// Diagnostic, not a spec operation: the live session's capture-ring
    /// drop count, surfacing [`FrameRing::dropped_frames`] for callers
    /// watching for backpressure (spec §4.B).
    pub fn dropped_frame_count(&self) -> u64 {
        self.session
            .lock()
            .expect("session mutex poisoned")
            .as_ref()
            .map(|s| s.ring.dropped_frames())
            .unwrap_or(0)
    }
}

/// Invariant 2: `FrameSet.merged` is populated only when the shutter mode
/// is double-shutter AND either raw capture is enabled or playback is
/// active. Software stereo is never double-shutter-compatible (the matrix
/// check in `try_start` already rejects that combination), so the only
/// decode-time source of the disparity plane this merge needs is the
/// parallax grab mode.
fn merge_gate(shutter_mode: crate::frame::ShutterMode, raw_capture_enabled: bool, playback_enabled: bool) -> bool {
    shutter_mode.is_double_shutter() && (raw_capture_enabled || playback_enabled)
}

fn sample(plane: &[f32], width: u32, height: u32, x: u32, y: u32) -> Option<f32> {
    if x >= width || y >= height {
        return None;
    }
    plane.get((y * width + x) as usize).copied()
}

/// The live/playback-dependent rows of the compatibility matrix (spec
/// §4.H) that [`PipelineConfig::check_compatible`] can't enforce on its
/// own because they depend on the bound device's or playback file's
/// current grab/shutter mode.
fn check_matrix(cfg: &PipelineConfig, grab_mode: GrabMode, shutter_mode: crate::frame::ShutterMode) -> Result<()> {
    if cfg.sw_stereo_enabled {
        if grab_mode != GrabMode::Corrected {
            return Err(err!(
                IncompatibleConfig,
                "software stereo matcher requires grab_mode=Corrected, got {grab_mode:?}"
            ));
        }
        if shutter_mode.is_double_shutter() {
            return Err(err!(
                IncompatibleConfig,
                "software stereo matcher is incompatible with double-shutter mode {shutter_mode:?}"
            ));
        }
    }
    if cfg.disparity_filter_enabled && !cfg.sw_stereo_enabled && grab_mode != GrabMode::Parallax {
        return Err(err!(
            IncompatibleConfig,
            "disparity filter without software stereo requires grab_mode=Parallax, got {grab_mode:?}"
        ));
    }
    if cfg.color_mode != ColorMode::Mono && grab_mode == GrabMode::BeforeCorrect {
        return Err(err!(
            IncompatibleConfig,
            "color delivery is incompatible with grab_mode=BeforeCorrect"
        ));
    }
    Ok(())
}

/// Build the callback a capture/player thread runs inline on every frame:
/// recorder enqueue, decode, double-shutter merge, camera-endpoint
/// publish, and processor hand-off. See the module doc comment for why
/// this runs here instead of on a dedicated thread.
fn make_frame_sink(
    arena: Arc<Mutex<FrameArena>>,
    camera_endpoint: Arc<Mutex<FrameSet>>,
    previous_decoded: Arc<Mutex<Option<FrameData>>>,
    recorder: Option<Arc<Recorder>>,
    processor_tx: Option<Sender<ProcessorJob>>,
    sw_stereo_enabled: bool,
    merge_thresholds: Option<(f32, f32)>,
) -> FrameSink {
    Arc::new(move |capture: RawCapture| {
        if let Some(recorder) = &recorder {
            let bytes = layouts::payload_to_bytes(&capture.payload);
            let timestamp_ms = capture
                .captured_at
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            recorder.enqueue(crate::rawfile::RawRecord {
                frame_number: capture.frame_number,
                timestamp_ms,
                payload: bytes,
            });
        }

        let decoded = {
            let mut a = arena.lock().expect("arena mutex poisoned");
            match decode::decode(capture, &mut a) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "dropping frame: decode failed");
                    return;
                }
            }
        };

        let frame_set = if let Some((low, high)) = merge_thresholds {
            let mut prev_slot = previous_decoded.lock().expect("previous-frame mutex poisoned");
            match prev_slot.take() {
                Some(prev) => {
                    let merged = merge_frames(&prev, &decoded, low, high);
                    *prev_slot = Some(decoded.clone());
                    FrameSet { latest: Some(decoded.clone()), previous: Some(prev), merged: Some(merged) }
                }
                None => {
                    *prev_slot = Some(decoded.clone());
                    FrameSet { latest: Some(decoded.clone()), previous: None, merged: None }
                }
            }
        } else {
            FrameSet { latest: Some(decoded.clone()), previous: None, merged: None }
        };

        {
            let previous = std::mem::replace(&mut *camera_endpoint.lock().expect("camera endpoint mutex poisoned"), frame_set.clone());
            release_frame_set(&arena, previous);
        }

        if let Some(tx) = &processor_tx {
            let (p1_for_proc, payload) = if sw_stereo_enabled {
                (decoded.p1.clone(), decoded.p2.clone().map(ProcessorPayload::StereoPair))
            } else {
                let source = frame_set.merged.as_ref().unwrap_or(&decoded);
                (source.p1.clone(), source.depth.clone().map(ProcessorPayload::Disparity))
            };
            if let (Some(p1), Some(payload)) = (p1_for_proc, payload) {
                let _ = tx.send(ProcessorJob {
                    frame_number: decoded.frame_number,
                    captured_at: decoded.captured_at,
                    meta: decoded.meta,
                    width: decoded.width,
                    height: decoded.height,
                    p1,
                    payload,
                });
            }
        }

        // `decoded` itself (as opposed to the clones now owned by
        // `frame_set`/the processor job) is never read again; hand its
        // arena-checked-out planes back rather than letting them drop.
        arena.lock().expect("arena mutex poisoned").release_frame(decoded);
    })
}

/// Return every plane of a displaced `FrameSet`'s frames to `arena`, so
/// overwriting `camera_endpoint`/`processor_endpoint` each tick recycles
/// the outgoing buffers instead of leaking them to the allocator (spec §3
/// Lifecycle).
fn release_frame_set(arena: &Mutex<FrameArena>, set: FrameSet) {
    let mut a = arena.lock().expect("arena mutex poisoned");
    if let Some(f) = set.latest {
        a.release_frame(f);
    }
    if let Some(f) = set.previous {
        a.release_frame(f);
    }
    if let Some(f) = set.merged {
        a.release_frame(f);
    }
}

/// Combine a double-shutter exposure pair's decoded frames into one merged
/// `FrameData`, choosing the long exposure as whichever of the two carries
/// the larger `meta.exposure` (ties favor `current`).
fn merge_frames(prev: &FrameData, current: &FrameData, low: f32, high: f32) -> FrameData {
    let (long, short) = if current.meta.exposure >= prev.meta.exposure { (current, prev) } else { (prev, current) };
    let mut merged = FrameData::empty(current.width, current.height);
    merged.frame_number = current.frame_number;
    merged.captured_at = current.captured_at;
    merged.meta = current.meta;
    if let (Some(long_disp), Some(long_p1), Some(short_disp), Some(short_p1)) =
        (long.depth.as_ref(), long.p1.as_ref(), short.depth.as_ref(), short.p1.as_ref())
    {
        let (disp, p1) = filter::merge_double_shutter(long_disp, long_p1, short_disp, short_p1, low, high);
        merged.depth = Some(disp);
        merged.p1 = Some(p1);
    }
    merged
}

/// Processor thread body (spec §5): block-match (if software stereo is
/// enabled) and/or run the disparity filter passes (if enabled), then
/// publish to the processor endpoint.
fn processor_loop(
    rx: std::sync::mpsc::Receiver<ProcessorJob>,
    endpoint: Arc<Mutex<FrameSet>>,
    arena: Arc<Mutex<FrameArena>>,
    stereo_params: StereoParams,
    filter_params: FilterParams,
    sw_stereo_enabled: bool,
    disparity_filter_enabled: bool,
    stop: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                let mut disparity = match job.payload {
                    ProcessorPayload::StereoPair(compare) if sw_stereo_enabled => {
                        match stereo::match_stereo(&job.p1, &compare, job.width, job.height, &stereo_params, &stop) {
                            Ok(d) => d,
                            Err(e) => {
                                warn!(error = %e, "stereo matching failed, dropping frame");
                                continue;
                            }
                        }
                    }
                    ProcessorPayload::StereoPair(_) => continue,
                    ProcessorPayload::Disparity(d) => d,
                };

                if disparity_filter_enabled {
                    if filter_params.speckle_enabled {
                        filter::remove_speckles(&mut disparity, job.width, job.height, filter_params.speckle_diff, filter_params.speckle_max_size);
                    }
                    if filter_params.smoothing_enabled {
                        disparity = filter::smooth(&disparity, job.width, job.height, filter_params.smoothing_radius);
                    }
                    if filter_params.hole_fill_enabled {
                        filter::fill_holes(&mut disparity, job.width, job.height, filter_params.hole_fill_max_gap);
                    }
                }

                let mut frame = FrameData::empty(job.width, job.height);
                frame.frame_number = job.frame_number;
                frame.captured_at = job.captured_at;
                frame.meta = job.meta;
                frame.p1 = Some(job.p1);
                frame.depth = Some(disparity);
                let previous = std::mem::replace(
                    &mut *endpoint.lock().expect("processor endpoint mutex poisoned"),
                    FrameSet { latest: Some(frame), previous: None, merged: None },
                );
                release_frame_set(&arena, previous);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn model_to_id(model: CameraModel) -> u32 {
    match model {
        CameraModel::VM => 0,
        CameraModel::XC => 1,
        CameraModel::K4 => 2,
        CameraModel::K4A => 3,
        CameraModel::K4J => 4,
        CameraModel::Unknown => 255,
    }
}

fn recording_path(output_dir: &str) -> PathBuf {
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    Path::new(output_dir).join(format!("capture_{ts}_{}.iscraw", uuid::Uuid::new_v4()))
}

fn now_utc_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn metric_to_text(metric: MatchMetricKind) -> &'static str {
    match metric {
        MatchMetricKind::Sad => "sad",
        MatchMetricKind::Ssd => "ssd",
    }
}

fn metric_from_text(s: &str) -> Result<MatchMetricKind> {
    match s {
        "sad" => Ok(MatchMetricKind::Sad),
        "ssd" => Ok(MatchMetricKind::Ssd),
        other => Err(err!(InvalidParameter, "unknown stereo metric {other:?}")),
    }
}

fn stereo_params_to_paramfile(p: &StereoParams, file: &mut ParamFile) {
    file.set("stereo", "window", ParamValue::Int(p.window as i64));
    file.set("stereo", "max_disparity", ParamValue::Int(p.max_disparity as i64));
    file.set("stereo", "uniqueness_ratio", ParamValue::Float(p.uniqueness_ratio));
    file.set("stereo", "extended_range", ParamValue::Bool(p.extended_range));
    file.set("stereo", "extended_matching", ParamValue::Bool(p.extended_matching));
    file.set("stereo", "metric", ParamValue::Text(metric_to_text(p.metric).to_string()));
    file.set("stereo", "lr_max_diff", ParamValue::Float(p.lr_max_diff));
    file.set("stereo", "max_cost", ParamValue::Float(p.max_cost));
}

fn stereo_params_from_paramfile(file: &ParamFile) -> Result<StereoParams> {
    let defaults = StereoParams::default();
    paramfile::require_category(file, "stereo")?;
    let metric_text = file
        .get("stereo", "metric")
        .and_then(|v| match v {
            ParamValue::Text(s) => Some(s.as_str()),
            _ => None,
        })
        .unwrap_or_else(|| metric_to_text(defaults.metric));
    Ok(StereoParams {
        window: paramfile::required_or_default(file, "stereo", "window", defaults.window as i64, |v| v.as_int()) as u32,
        max_disparity: paramfile::required_or_default(file, "stereo", "max_disparity", defaults.max_disparity as i64, |v| v.as_int())
            as u32,
        uniqueness_ratio: paramfile::required_or_default(file, "stereo", "uniqueness_ratio", defaults.uniqueness_ratio, |v| {
            v.as_float()
        }),
        extended_range: paramfile::required_or_default(file, "stereo", "extended_range", defaults.extended_range, |v| v.as_bool()),
        extended_matching: paramfile::required_or_default(file, "stereo", "extended_matching", defaults.extended_matching, |v| {
            v.as_bool()
        }),
        metric: metric_from_text(metric_text)?,
        lr_max_diff: paramfile::required_or_default(file, "stereo", "lr_max_diff", defaults.lr_max_diff, |v| v.as_float()),
        max_cost: paramfile::required_or_default(file, "stereo", "max_cost", defaults.max_cost, |v| v.as_float()),
    })
}

fn filter_params_to_paramfile(p: &FilterParams, file: &mut ParamFile) {
    file.set("filter", "speckle_enabled", ParamValue::Bool(p.speckle_enabled));
    file.set("filter", "speckle_diff", ParamValue::Float(p.speckle_diff));
    file.set("filter", "speckle_max_size", ParamValue::Int(p.speckle_max_size as i64));
    file.set("filter", "smoothing_enabled", ParamValue::Bool(p.smoothing_enabled));
    file.set("filter", "smoothing_radius", ParamValue::Int(p.smoothing_radius as i64));
    file.set("filter", "hole_fill_enabled", ParamValue::Bool(p.hole_fill_enabled));
    file.set("filter", "hole_fill_max_gap", ParamValue::Int(p.hole_fill_max_gap as i64));
    file.set("filter", "double_shutter_enabled", ParamValue::Bool(p.double_shutter_enabled));
    file.set("filter", "low_threshold", ParamValue::Float(p.low_threshold));
    file.set("filter", "high_threshold", ParamValue::Float(p.high_threshold));
}

fn filter_params_from_paramfile(file: &ParamFile) -> Result<FilterParams> {
    let defaults = FilterParams::default();
    paramfile::require_category(file, "filter")?;
    Ok(FilterParams {
        speckle_enabled: paramfile::required_or_default(file, "filter", "speckle_enabled", defaults.speckle_enabled, |v| v.as_bool()),
        speckle_diff: paramfile::required_or_default(file, "filter", "speckle_diff", defaults.speckle_diff, |v| v.as_float()),
        speckle_max_size: paramfile::required_or_default(file, "filter", "speckle_max_size", defaults.speckle_max_size as i64, |v| {
            v.as_int()
        }) as u32,
        smoothing_enabled: paramfile::required_or_default(file, "filter", "smoothing_enabled", defaults.smoothing_enabled, |v| {
            v.as_bool()
        }),
        smoothing_radius: paramfile::required_or_default(file, "filter", "smoothing_radius", defaults.smoothing_radius as i64, |v| {
            v.as_int()
        }) as u32,
        hole_fill_enabled: paramfile::required_or_default(file, "filter", "hole_fill_enabled", defaults.hole_fill_enabled, |v| {
            v.as_bool()
        }),
        hole_fill_max_gap: paramfile::required_or_default(file, "filter", "hole_fill_max_gap", defaults.hole_fill_max_gap as i64, |v| {
            v.as_int()
        }) as u32,
        double_shutter_enabled: paramfile::required_or_default(
            file,
            "filter",
            "double_shutter_enabled",
            defaults.double_shutter_enabled,
            |v| v.as_bool(),
        ),
        low_threshold: paramfile::required_or_default(file, "filter", "low_threshold", defaults.low_threshold, |v| v.as_float()),
        high_threshold: paramfile::required_or_default(file, "filter", "high_threshold", defaults.high_threshold, |v| v.as_float()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDriver;
    use crate::device::types::DeviceId;
    use crate::frame::ShutterMode;

    fn controller() -> PipelineController {
        let dev = DeviceAbstraction::new(
            DeviceId { model: CameraModel::XC, index: 0 },
            Box::new(MockDriver::new(CameraModel::XC, CameraSpec::default())),
        );
        let controller = PipelineController::new(Arc::new(dev));
        controller.initialize(Config::default()).unwrap();
        controller
    }

    fn wait_for_camera_frame(controller: &PipelineController) -> FrameSet {
        for _ in 0..200 {
            match controller.get_camera_data() {
                Ok(set) => return set,
                Err(e) if e.kind() == crate::error::ErrorKind::NotReady => {}
                Err(e) => panic!("unexpected error waiting for camera frame: {e}"),
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("no camera frame published within the test deadline");
    }

    fn wait_for_processor_frame(controller: &PipelineController) -> FrameSet {
        for _ in 0..200 {
            match controller.get_data_proc_module_data() {
                Ok(set) => return set,
                Err(e) if e.kind() == crate::error::ErrorKind::NotReady => {}
                Err(e) => panic!("unexpected error waiting for processor frame: {e}"),
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("no processor frame published within the test deadline");
    }

    #[test]
    fn full_lifecycle_publishes_frames_then_tears_down() {
        let controller = controller();
        assert_eq!(controller.state(), ControllerState::Idle);

        controller.start(PipelineConfig::default()).unwrap();
        assert_eq!(controller.state(), ControllerState::Running);

        let set = wait_for_camera_frame(&controller);
        assert!(set.latest.unwrap().frame_number >= 1);

        controller.stop(Duration::from_secs(2)).unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);

        controller.terminate().unwrap();
        assert_eq!(controller.state(), ControllerState::Terminated);
    }

    #[test]
    fn start_twice_without_stop_is_rejected() {
        let controller = controller();
        controller.start(PipelineConfig::default()).unwrap();
        let err = controller.start(PipelineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
        controller.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn terminate_requires_idle() {
        let controller = controller();
        controller.start(PipelineConfig::default()).unwrap();
        let err = controller.terminate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
        controller.stop(Duration::from_secs(2)).unwrap();
        controller.terminate().unwrap();
    }

    #[test]
    fn sw_stereo_with_double_shutter_is_rejected() {
        let controller = controller();
        controller
            .device_set_option(OptionId::ShutterMode, OptionValue::Shutter(ShutterMode::Double))
            .unwrap();
        let cfg = PipelineConfig { grab_mode: GrabMode::Corrected, sw_stereo_enabled: true, ..PipelineConfig::default() };
        let err = controller.start(cfg).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IncompatibleConfig);
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn sw_stereo_requires_corrected_grab_mode() {
        let controller = controller();
        let cfg = PipelineConfig { grab_mode: GrabMode::BeforeCorrect, sw_stereo_enabled: true, ..PipelineConfig::default() };
        let err = controller.start(cfg).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IncompatibleConfig);
    }

    #[test]
    fn sw_stereo_populates_processor_endpoint() {
        let controller = controller();
        let cfg = PipelineConfig {
            grab_mode: GrabMode::Corrected,
            sw_stereo_enabled: true,
            frame_decoder_enabled: true,
            ..PipelineConfig::default()
        };
        controller.start(cfg).unwrap();
        wait_for_camera_frame(&controller);

        let processed = wait_for_processor_frame(&controller);
        assert!(!processed.is_empty());
        controller.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn module_parameter_round_trips_through_set_and_get() {
        let controller = controller();
        let text = controller.get_data_proc_module_parameter();
        controller.set_data_proc_module_parameter(&text, false).unwrap();
        let reparsed = ParamFile::parse(&controller.get_data_proc_module_parameter()).unwrap();
        assert_eq!(reparsed.get("stereo", "window"), Some(&ParamValue::Int(9)));
    }

    #[test]
    fn set_module_parameter_rejects_invalid_values() {
        let controller = controller();
        let bad = "[stereo]\nwindow = 8_i\n[filter]\nspeckle_enabled = true\n";
        let err = controller.set_data_proc_module_parameter(bad, false).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameter);
    }

    #[test]
    fn device_option_delegation_round_trips() {
        let controller = controller();
        controller.device_set_option(OptionId::Gain, OptionValue::Int(77)).unwrap();
        let got = controller.device_get_option(OptionId::Gain).unwrap();
        assert_eq!(got.as_int(), Some(77));
    }

    #[test]
    fn get_camera_data_before_any_publish_is_not_ready_or_present() {
        let controller = controller();
        controller.start(PipelineConfig::default()).unwrap();
        match controller.get_camera_data() {
            Ok(_) => {} // a frame may already have been published
            Err(e) => assert_eq!(e.kind(), crate::error::ErrorKind::NotReady),
        }
        controller.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn get_data_proc_module_data_is_not_ready_when_processor_disabled() {
        let controller = controller();
        controller.start(PipelineConfig::default()).unwrap();
        wait_for_camera_frame(&controller);
        let err = controller.get_data_proc_module_data().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotReady);
        controller.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn merge_gate_requires_double_shutter_and_raw_capture_or_playback() {
        assert!(merge_gate(ShutterMode::Double, true, false));
        assert!(merge_gate(ShutterMode::Double2, false, true));
        assert!(!merge_gate(ShutterMode::Double, false, false));
        assert!(!merge_gate(ShutterMode::Manual, true, true));
        assert!(!merge_gate(ShutterMode::Single, true, false));
    }
}
