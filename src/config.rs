// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide configuration (spec §4.H, §3): persisted defaults plus the
//! per-session pipeline configuration passed to `Start`.
//!
//! `Config` round-trips through `toml` the same way the teacher persists
//! its settings file — `#[serde(default)]` on every field so an older
//! config file missing newer fields still deserializes instead of
//! failing the whole load.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::{ColorMode, GrabMode};

fn default_output_dir() -> String {
    "./recordings".to_string()
}

fn default_throttle_ms() -> u64 {
    0
}

fn default_wait_time_ms() -> u32 {
    1000
}

/// Persisted, non-session defaults (spec §4.H).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_throttle_ms")]
    pub default_recorder_throttle_ms: u64,
    #[serde(default)]
    pub default_stereo_params: crate::stereo::StereoParams,
    #[serde(default)]
    pub default_filter_params: crate::filter::FilterParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            default_recorder_throttle_ms: default_throttle_ms(),
            default_stereo_params: crate::stereo::StereoParams::default(),
            default_filter_params: crate::filter::FilterParams::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| crate::error::err!(InvalidParameter, "malformed config file: {e}"))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| crate::error::err!(InvalidParameter, "failed to serialize config: {e}"))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// The default config file location, `$XDG_CONFIG_HOME/stereo-dpc/config.toml`
    /// or the platform equivalent.
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|d| d.join("stereo-dpc").join("config.toml"))
    }
}

/// Per-session pipeline configuration passed to `Start` (spec §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub grab_mode: GrabMode,
    pub color_mode: ColorMode,
    pub raw_capture_enabled: bool,
    pub record_enabled: bool,
    pub playback_enabled: bool,
    /// Required when `playback_enabled`; ignored otherwise.
    #[serde(default)]
    pub playback_file: Option<String>,
    pub sw_stereo_enabled: bool,
    pub frame_decoder_enabled: bool,
    pub disparity_filter_enabled: bool,
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grab_mode: GrabMode::Corrected,
            color_mode: ColorMode::Mono,
            raw_capture_enabled: false,
            record_enabled: false,
            playback_enabled: false,
            playback_file: None,
            sw_stereo_enabled: false,
            frame_decoder_enabled: true,
            disparity_filter_enabled: false,
            wait_time_ms: default_wait_time_ms(),
        }
    }
}

impl PipelineConfig {
    /// Enforce the config-only part of the compatibility matrix (spec
    /// §4.H): playback and live raw capture are mutually exclusive, the
    /// stereo matcher requires the frame decoder to be enabled upstream of
    /// it, and a playback request must name a file. The remaining rows of
    /// the matrix (grab-mode and shutter-mode constraints) depend on the
    /// bound device's current option values and are enforced by
    /// [`crate::controller::PipelineController::start`] instead.
    pub fn check_compatible(&self) -> Result<()> {
        if self.playback_enabled && self.raw_capture_enabled {
            return Err(crate::error::err!(
                IncompatibleConfig,
                "playback_enabled and raw_capture_enabled cannot both be set"
            ));
        }
        if self.playback_enabled && self.playback_file.is_none() {
            return Err(crate::error::err!(
                IncompatibleConfig,
                "playback_enabled requires playback_file"
            ));
        }
        if self.sw_stereo_enabled && !self.frame_decoder_enabled {
            return Err(crate::error::err!(
                IncompatibleConfig,
                "sw_stereo_enabled requires frame_decoder_enabled"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn playback_and_raw_capture_are_incompatible() {
        let cfg = PipelineConfig { playback_enabled: true, raw_capture_enabled: true, ..PipelineConfig::default() };
        let err = cfg.check_compatible().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IncompatibleConfig);
    }

    #[test]
    fn stereo_without_decoder_is_incompatible() {
        let cfg = PipelineConfig { sw_stereo_enabled: true, frame_decoder_enabled: false, ..PipelineConfig::default() };
        let err = cfg.check_compatible().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IncompatibleConfig);
    }

    #[test]
    fn default_pipeline_config_is_compatible() {
        PipelineConfig::default().check_compatible().unwrap();
    }
}
