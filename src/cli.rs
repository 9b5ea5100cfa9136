// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands exercising the public [`stereo_dpc`] API against the
//! built-in [`stereo_dpc::device::mock::MockDriver`], standing in for the
//! excluded operator dialog (spec §1).
//!
//! Mirrors the teacher's `cli.rs`: plain functions returning
//! `Result<(), Box<dyn std::error::Error>>`, `println!` for user-facing
//! output, `tracing` for anything that belongs in a log instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stereo_dpc::config::{Config, PipelineConfig};
use stereo_dpc::controller::{Endpoint, PipelineController, Rect};
use stereo_dpc::device::mock::MockDriver;
use stereo_dpc::device::types::DeviceId;
use stereo_dpc::device::{CameraModel, DeviceAbstraction};
use stereo_dpc::frame::{CameraSpec, ColorMode, FrameSlotKind, GrabMode};
use stereo_dpc::rawfile;

/// Parse a `--model` argument into a [`CameraModel`].
fn parse_model(s: &str) -> Result<CameraModel, Box<dyn std::error::Error>> {
    Ok(match s.to_ascii_uppercase().as_str() {
        "VM" => CameraModel::VM,
        "XC" => CameraModel::XC,
        "K4" => CameraModel::K4,
        "K4A" => CameraModel::K4A,
        "K4J" => CameraModel::K4J,
        other => return Err(format!("unknown camera model {other:?}; expected VM/XC/K4/K4A/K4J").into()),
    })
}

/// Parse a `--grab-mode` argument into a [`GrabMode`].
fn parse_grab_mode(s: &str) -> Result<GrabMode, Box<dyn std::error::Error>> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "parallax" => GrabMode::Parallax,
        "corrected" => GrabMode::Corrected,
        "before-correct" | "beforecorrect" => GrabMode::BeforeCorrect,
        "bayer-s0" | "bayers0" => GrabMode::BayerS0,
        "bayer-s1" | "bayers1" => GrabMode::BayerS1,
        other => return Err(format!("unknown grab mode {other:?}").into()),
    })
}

fn mock_controller(model: CameraModel) -> PipelineController {
    let device = DeviceAbstraction::new(DeviceId { model, index: 0 }, Box::new(MockDriver::new(model, CameraSpec::default())));
    PipelineController::new(Arc::new(device))
}

/// `stereo-dpc-cli list-models`: print the closed set of supported camera
/// model families (spec §4.A).
pub fn list_models() -> Result<(), Box<dyn std::error::Error>> {
    println!("Supported camera models:");
    for model in [CameraModel::VM, CameraModel::XC, CameraModel::K4, CameraModel::K4A, CameraModel::K4J] {
        println!("  {model}");
    }
    Ok(())
}

/// `stereo-dpc-cli run`: start a session against the mock driver and
/// print each delivered frame's number and measurement coverage.
pub fn run_session(
    model: &str,
    grab_mode: &str,
    frames: u32,
    sw_stereo: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = parse_model(model)?;
    let grab_mode = parse_grab_mode(grab_mode)?;

    let controller = mock_controller(model);
    controller.initialize(Config::default())?;

    let pipeline_cfg = PipelineConfig {
        grab_mode,
        color_mode: ColorMode::Mono,
        sw_stereo_enabled: sw_stereo,
        disparity_filter_enabled: !sw_stereo && grab_mode == GrabMode::Parallax,
        ..PipelineConfig::default()
    };
    controller.start(pipeline_cfg)?;

    println!("session running (model={model}, grab_mode={grab_mode:?})");
    let mut delivered = 0u32;
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while delivered < frames && std::time::Instant::now() < deadline {
        let set = controller.get_camera_data()?;
        if let Some(frame) = set.latest {
            println!(
                "  frame #{} {}x{} exposure={} gain={}",
                frame.frame_number, frame.width, frame.height, frame.meta.exposure, frame.meta.gain
            );
            delivered += 1;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    println!("dropped frames: {}", controller.dropped_frame_count());
    controller.stop(Duration::from_secs(2))?;
    controller.terminate()?;
    Ok(())
}

/// `stereo-dpc-cli record`: capture `frames` frames from the mock driver
/// into a raw `.iscraw` file at `output`.
pub fn record(model: &str, frames: u32, output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let model = parse_model(model)?;
    let controller = mock_controller(model);
    controller.initialize(Config::default())?;

    let output_dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(output_dir)?;

    let pipeline_cfg = PipelineConfig { grab_mode: GrabMode::Corrected, record_enabled: true, ..PipelineConfig::default() };
    controller.start(pipeline_cfg)?;

    let mut delivered = 0u32;
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while delivered < frames && std::time::Instant::now() < deadline {
        let set = controller.get_camera_data()?;
        if set.latest.is_some() {
            delivered += 1;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    controller.stop(Duration::from_secs(2))?;
    controller.terminate()?;

    println!("recorded {delivered} frames (recordings land under {}; use `info` to inspect)", output_dir.display());
    Ok(())
}

/// `stereo-dpc-cli play`: replay a raw capture file and print each
/// delivered frame.
pub fn play(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let model = CameraModel::XC;
    let controller = mock_controller(model);
    controller.initialize(Config::default())?;

    let pipeline_cfg = PipelineConfig {
        playback_enabled: true,
        playback_file: Some(file.to_string_lossy().into_owned()),
        ..PipelineConfig::default()
    };
    controller.start(pipeline_cfg)?;

    let mut last_seen = 0u64;
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while std::time::Instant::now() < deadline {
        let set = controller.get_camera_data()?;
        if let Some(frame) = set.latest {
            if frame.frame_number != last_seen {
                println!("  frame #{} {}x{}", frame.frame_number, frame.width, frame.height);
                last_seen = frame.frame_number;
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    controller.stop(Duration::from_secs(2))?;
    controller.terminate()?;
    Ok(())
}

/// `stereo-dpc-cli info`: print a raw file's header and summary stats
/// without starting playback (spec §4.H `GetFileInformation`).
pub fn info(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let (header, info) = rawfile::scan_file(&file)?;
    println!("file: {}", file.display());
    println!("  version:       {}", header.version);
    println!("  grab_mode:     {:?}", header.grab_mode);
    println!("  shutter_mode:  {:?}", header.shutter_mode);
    println!("  dimensions:    {}x{}", header.width, header.height);
    println!("  b/bf/d_inf:    {}/{}/{}", header.base_length, header.bf, header.d_inf);
    println!("  total frames:  {}", info.total_frame_count);
    if let (Some(first), Some(last)) = (info.first_frame_number, info.last_frame_number) {
        println!("  frame range:   {first}..={last}");
    }
    Ok(())
}

/// `stereo-dpc-cli query`: start a brief mock session and print the
/// depth/3D measurement at one pixel (spec §4.H `GetPositionDepth`/
/// `GetPosition3D`).
pub fn query(model: &str, x: u32, y: u32) -> Result<(), Box<dyn std::error::Error>> {
    let model = parse_model(model)?;
    let controller = mock_controller(model);
    controller.initialize(Config::default())?;
    controller.start(PipelineConfig { grab_mode: GrabMode::Corrected, sw_stereo_enabled: true, ..PipelineConfig::default() })?;

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    let mut result = None;
    while std::time::Instant::now() < deadline {
        if let Ok(set) = controller.get_data_proc_module_data() {
            if !set.is_empty() {
                result = controller.get_position_3d(Endpoint::Processor, FrameSlotKind::Latest, x, y).ok();
                if result.is_some() {
                    break;
                }
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    match result {
        Some(p) => println!("({x},{y}) -> X={:.4} Y={:.4} Z={:.4}", p.x, p.y, p.z),
        None => println!("({x},{y}) has no measurement"),
    }

    let _ = controller.get_area_statistics(Endpoint::Processor, FrameSlotKind::Latest, Rect { x: 0, y: 0, width: 16, height: 16 })
        .map(|stats| {
            println!(
                "area [0,0]-[16,16): {} valid px, mean distance {:.4}",
                stats.valid_pixel_count, stats.mean_distance
            );
        });

    controller.stop(Duration::from_secs(2))?;
    controller.terminate()?;
    Ok(())
}
