// SPDX-License-Identifier: GPL-3.0-only

//! Software Stereo Matcher (spec §4.F): block matching over a rectified
//! stereo pair, producing a sub-pixel disparity plane.

pub mod matcher;
pub mod params;

pub use matcher::match_stereo;
pub use params::{MatchMetricKind, StereoParams};
