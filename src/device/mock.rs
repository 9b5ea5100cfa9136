// SPDX-License-Identifier: GPL-3.0-only

//! A synthetic driver standing in for the unavailable vendor SDKs (spec
//! §1: "Vendor SDK bindings ... specified only via the interfaces they
//! consume/produce"). Generates deterministic parallax/corrected frames so
//! the rest of the pipeline — and the CLI — can run end to end without
//! real hardware, the same role the teacher's `--preview-source` file
//! backend plays for its GStreamer pipeline.

use std::collections::HashMap;

use crate::error::{err, Result};
use crate::frame::{CameraSpec, GrabMode};

use super::driver::{CameraModel, Driver, DriverFrame};
use super::option_table::{domain_of, OptionDomain, OptionId, OptionValue};

/// In-memory driver that synthesizes a stereo pair with a sloped disparity
/// ramp, useful for unit tests and the CLI demo path.
pub struct MockDriver {
    model: CameraModel,
    spec: CameraSpec,
    opened: bool,
    grabbing: bool,
    grab_mode: GrabMode,
    frame_counter: u64,
    options: HashMap<OptionId, OptionValue>,
}

impl MockDriver {
    pub fn new(model: CameraModel, spec: CameraSpec) -> Self {
        let mut options = HashMap::new();
        options.insert(OptionId::Gain, OptionValue::Int(10));
        options.insert(OptionId::Exposure, OptionValue::Int(100));
        options.insert(OptionId::FineExposure, OptionValue::Int(0));
        options.insert(OptionId::NoiseFilter, OptionValue::Int(0));
        options.insert(
            OptionId::ShutterMode,
            OptionValue::Shutter(crate::frame::ShutterMode::Manual),
        );
        for b in [
            OptionId::HdrMode,
            OptionId::HiResolutionMode,
            OptionId::AutoCalibration,
            OptionId::ManualCalibrationTrigger,
            OptionId::SelfCalibration,
            OptionId::ColorImage,
            OptionId::ColorImageCorrect,
            OptionId::ExtendedMatching,
            OptionId::SadSearchRange128,
        ] {
            options.insert(b, OptionValue::Bool(false));
        }

        Self {
            model,
            spec,
            opened: false,
            grabbing: false,
            grab_mode: GrabMode::Corrected,
            frame_counter: 0,
            options,
        }
    }

    /// A synthetic scene: a textured wall at a fixed disparity so
    /// `GetPositionDepth`/`GetPosition3D` scenarios have something
    /// meaningful to measure against.
    fn synth_pair(&self, width: u32, height: u32, disparity_px: u8) -> (Vec<u8>, Vec<u8>) {
        let mut base = vec![0u8; (width * height) as usize];
        for (i, px) in base.iter_mut().enumerate() {
            let x = (i as u32) % width;
            let y = (i as u32) / width;
            *px = (((x / 8) + (y / 8)) % 2 * 200 + 20) as u8;
        }
        let mut compare = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                let src_x = x.saturating_add(disparity_px as u32).min(width - 1);
                compare[(y * width + x) as usize] = base[(y * width + src_x) as usize];
            }
        }
        (base, compare)
    }
}

impl Driver for MockDriver {
    fn open(&mut self) -> Result<()> {
        if self.model == CameraModel::Unknown {
            return Err(err!(DeviceUnavailable, "mock driver has no model bound"));
        }
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        self.grabbing = false;
        Ok(())
    }

    fn set_run_mode(&mut self, mode: GrabMode) -> Result<()> {
        self.grab_mode = mode;
        Ok(())
    }

    fn start_grab(&mut self, mode: GrabMode) -> Result<()> {
        if !self.opened {
            return Err(err!(DeviceUnavailable, "start_grab before open"));
        }
        self.grab_mode = mode;
        self.grabbing = true;
        Ok(())
    }

    fn stop_grab(&mut self) -> Result<()> {
        self.grabbing = false;
        Ok(())
    }

    fn get_image(&mut self, _wait_time_ms: u32) -> Result<DriverFrame> {
        if !self.grabbing {
            return Err(err!(DeviceIO, "get_image while not grabbing"));
        }
        self.frame_counter += 1;
        let width = 64;
        let height = 48;
        let (base, compare) = self.synth_pair(width, height, 32);
        Ok(DriverFrame {
            frame_number: self.frame_counter,
            base_bytes: base,
            compare_bytes: compare,
            width,
            height,
            gain: self
                .options
                .get(&OptionId::Gain)
                .and_then(|v| v.as_int())
                .unwrap_or(0) as u32,
            exposure: self
                .options
                .get(&OptionId::Exposure)
                .and_then(|v| v.as_int())
                .unwrap_or(0) as u32,
        })
    }

    fn get_option(&self, option: OptionId) -> Result<OptionValue> {
        let cap = super::option_table::capability_of(self.model, option);
        if !cap.implemented {
            return Err(err!(InvalidOption, "{option:?} not implemented on {}", self.model));
        }
        if !cap.readable {
            return Err(err!(InvalidOption, "{option:?} is not readable"));
        }
        self.options
            .get(&option)
            .copied()
            .ok_or_else(|| err!(InvalidOption, "{option:?} has no value"))
    }

    fn set_option(&mut self, option: OptionId, value: OptionValue) -> Result<()> {
        let cap = super::option_table::capability_of(self.model, option);
        if !cap.implemented {
            return Err(err!(InvalidOption, "{option:?} not implemented on {}", self.model));
        }
        if !cap.writable {
            return Err(err!(NotWritable, "{option:?} is read-only on {}", self.model));
        }
        if let OptionDomain::IntRange { min, max, .. } = domain_of(option) {
            if let Some(v) = value.as_int() {
                if v < min || v > max {
                    return Err(err!(InvalidOption, "{option:?}={v} out of range [{min},{max}]"));
                }
            }
        }
        self.options.insert(option, value);
        Ok(())
    }

    fn camera_param_query(&self) -> Result<CameraSpec> {
        Ok(self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_grab_produces_increasing_frame_numbers() {
        let mut d = MockDriver::new(CameraModel::XC, CameraSpec::default());
        d.open().unwrap();
        d.start_grab(GrabMode::Corrected).unwrap();
        let f1 = d.get_image(100).unwrap();
        let f2 = d.get_image(100).unwrap();
        assert!(f2.frame_number > f1.frame_number);
    }

    #[test]
    fn get_image_before_grab_fails_with_device_io() {
        let mut d = MockDriver::new(CameraModel::XC, CameraSpec::default());
        d.open().unwrap();
        let err = d.get_image(100).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DeviceIO);
    }

    #[test]
    fn set_option_out_of_range_is_rejected() {
        let mut d = MockDriver::new(CameraModel::XC, CameraSpec::default());
        let err = d
            .set_option(OptionId::Gain, OptionValue::Int(9999))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOption);
    }

    #[test]
    fn unimplemented_option_on_vm_is_rejected() {
        let d = MockDriver::new(CameraModel::VM, CameraSpec::default());
        let err = d.get_option(OptionId::ColorImage).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOption);
    }
}
