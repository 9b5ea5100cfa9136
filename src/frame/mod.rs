// SPDX-License-Identifier: GPL-3.0-only

//! Shared frame data model (spec §3).
//!
//! Mirrors the shape of the teacher's `backends::camera::types` module
//! (one `CameraFrame` carrying `width`/`height`/`stride` next to its pixel
//! buffer) but generalized to the five stereo planes a [`FrameData`] can
//! carry and to the pre-allocated [`arena`] the spec requires instead of
//! per-frame allocation.

pub mod arena;

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Acquisition metadata captured alongside a frame (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionMeta {
    pub gain: u32,
    pub exposure: u32,
    pub shutter_mode: ShutterMode,
    pub grab_mode: GrabMode,
    pub color_mode: ColorMode,
}

impl Default for AcquisitionMeta {
    fn default() -> Self {
        Self {
            gain: 0,
            exposure: 0,
            shutter_mode: ShutterMode::Manual,
            grab_mode: GrabMode::Corrected,
            color_mode: ColorMode::Mono,
        }
    }
}

/// The raw output mode of the camera (GLOSSARY: Grab mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrabMode {
    /// Disparity (integer + fractional) plus base image.
    Parallax,
    /// Rectified stereo pair (base + compare).
    Corrected,
    /// Unrectified stereo pair.
    BeforeCorrect,
    /// Raw Bayer mosaic, sensor 0.
    BayerS0,
    /// Raw Bayer mosaic, sensor 1.
    BayerS1,
}

impl GrabMode {
    /// Whether this grab mode carries a disparity plane after decode.
    pub fn produces_disparity(self) -> bool {
        matches!(self, GrabMode::Parallax)
    }

    /// Whether this grab mode is a Bayer mosaic (no rectified pair).
    pub fn is_bayer(self) -> bool {
        matches!(self, GrabMode::BayerS0 | GrabMode::BayerS1)
    }
}

/// GLOSSARY: Shutter mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShutterMode {
    Manual,
    Single,
    Double,
    Double2,
    SystemDefault,
}

impl ShutterMode {
    /// Double-shutter merge applies to `Double` and `Double2` (spec §4.G).
    pub fn is_double_shutter(self) -> bool {
        matches!(self, ShutterMode::Double | ShutterMode::Double2)
    }
}

/// Color delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    Mono,
    Color,
    Bayer,
}

/// Per-session constants (spec §3 CameraSpec), read once at `Start` and
/// never mutated during a session (Invariant 4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSpec {
    /// Baseline length `b` (metres).
    pub base_length: f32,
    /// Focal-length * baseline product, pixel*metre units.
    pub bf: f32,
    /// Disparity reported for points at infinity; zero-measurement sentinel.
    pub d_inf: f32,
    pub max_width: u32,
    pub max_height: u32,
    pub serial: [u8; 16],
    pub fpga_version_major: u32,
    pub fpga_version_minor: u32,
}

impl CameraSpec {
    /// Focal length in pixels, derived as `bf / b` (spec §4.H GetPosition3D).
    pub fn focal_length(&self) -> f32 {
        self.bf / self.base_length
    }

    /// Metric distance along the baseline for a disparity value, or `None`
    /// if `d <= d_inf` ("no measurement", Invariant 3).
    pub fn distance_for_disparity(&self, d: f32) -> Option<f32> {
        if d <= self.d_inf {
            None
        } else {
            Some(self.bf / (d - self.d_inf))
        }
    }

    pub fn serial_str(&self) -> String {
        let end = self.serial.iter().position(|&b| b == 0).unwrap_or(self.serial.len());
        String::from_utf8_lossy(&self.serial[..end]).into_owned()
    }
}

impl Default for CameraSpec {
    fn default() -> Self {
        Self {
            base_length: 0.1,
            bf: 60.0,
            d_inf: 2.0,
            max_width: 752,
            max_height: 480,
            serial: [0u8; 16],
            fpga_version_major: 0,
            fpga_version_minor: 0,
        }
    }
}

/// One sensor frame (spec §3 FrameData).
///
/// Plane buffers are views into a [`arena::FrameArena`] slot; `FrameData`
/// itself only carries the *used* rectangle for each populated plane, per
/// the "Arena + indices for plane storage" design note in §9.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub frame_number: u64,
    pub captured_at: SystemTime,
    pub meta: AcquisitionMeta,
    pub width: u32,
    pub height: u32,
    /// Base (mono, 8-bit) plane, `width * height` bytes.
    pub p1: Option<Vec<u8>>,
    /// Compare image OR raw integer-disparity byte stream, `width * height` bytes.
    pub p2: Option<Vec<u8>>,
    /// BGR or Bayer color plane, `width * height * channels` bytes.
    pub color: Option<Vec<u8>>,
    /// Float disparity plane, `width * height` values, pixel units.
    pub depth: Option<Vec<f32>>,
    /// Interleaved vendor-specific raw sensor bytes, variable layout.
    pub raw: Option<Vec<u8>>,
}

impl FrameData {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            frame_number: 0,
            captured_at: SystemTime::UNIX_EPOCH,
            meta: AcquisitionMeta::default(),
            width,
            height,
            p1: None,
            p2: None,
            color: None,
            depth: None,
            raw: None,
        }
    }

    /// Sample the depth plane at `(x, y)`, returning `None` if out of the
    /// frame bounds or if the pixel has no measurement per Invariant 3.
    pub fn depth_at(&self, x: u32, y: u32, d_inf: f32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let depth = self.depth.as_ref()?;
        let idx = (y * self.width + x) as usize;
        let d = *depth.get(idx)?;
        if d <= d_inf {
            None
        } else {
            Some(d)
        }
    }
}

/// Up to three `FrameData` slots per exposure (spec §3 FrameSet).
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    pub latest: Option<FrameData>,
    /// Only meaningful in double-shutter mode.
    pub previous: Option<FrameData>,
    /// The algorithmic combination of `latest`/`previous` (Invariant 2).
    pub merged: Option<FrameData>,
}

impl FrameSet {
    pub fn is_empty(&self) -> bool {
        self.latest.is_none() && self.previous.is_none() && self.merged.is_none()
    }
}

/// Endpoint selector used by consumer-facing query operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSlotKind {
    Latest,
    Previous,
    Merged,
}

impl FrameSet {
    pub fn slot(&self, kind: FrameSlotKind) -> Option<&FrameData> {
        match kind {
            FrameSlotKind::Latest => self.latest.as_ref(),
            FrameSlotKind::Previous => self.previous.as_ref(),
            FrameSlotKind::Merged => self.merged.as_ref(),
        }
    }
}
