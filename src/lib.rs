// SPDX-License-Identifier: GPL-3.0-only

//! Data Pipeline Controller for ITD Lab stereo cameras (VM/XC/4K families).
//!
//! This crate owns the camera session lifecycle, a multi-stage capture ->
//! decode -> (optional) software stereo -> disparity filter pipeline, raw
//! stream record/playback, and metric 3D queries over the resulting
//! disparity. It does not provide a GUI, image file writers, or 3D
//! rendering — those sit outside the core and consume the types exported
//! here.
//!
//! # Architecture
//!
//! - [`device`]: Device Abstraction — a uniform option surface over
//!   per-model camera drivers.
//! - [`capture`]: Capture Session — the live grab thread and its ring
//!   buffer.
//! - [`recorder`]: File Recorder — appends raw frames to a self-describing
//!   container.
//! - [`player`]: File Player — replays that container back into the same
//!   ring the live path uses.
//! - [`decode`]: Frame Decoder — unpacks vendor raw layouts into base/
//!   compare/disparity planes.
//! - [`stereo`]: Software Stereo Matcher — block matching over a rectified
//!   pair.
//! - [`filter`]: Disparity Filter — speckle removal, smoothing, hole-fill,
//!   and double-shutter merge.
//! - [`controller`]: Pipeline Controller — wires the above into one
//!   session and exposes the consumer-facing query API.
//! - [`frame`]: The shared data model (`FrameData`/`FrameSet`/`CameraSpec`)
//!   and its pre-allocated plane arena.
//! - [`rawfile`]: The `ISCRAW` wire format shared by the recorder and
//!   player.
//! - [`paramfile`]: The Module Parameter File text format shared by the
//!   stereo matcher and disparity filter.
//! - [`config`]: Crate-wide persisted configuration and per-session
//!   `PipelineConfig`.
//! - [`error`]: The crate-wide error taxonomy.

pub mod capture;
pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod error;
pub mod filter;
pub mod frame;
pub mod paramfile;
pub mod player;
pub mod rawfile;
pub mod recorder;
pub mod stereo;
pub mod util;

pub use config::{Config, PipelineConfig};
pub use controller::{AreaStatistics, Endpoint, PipelineController, Point3D, Rect};
pub use error::{Error, ErrorKind, Result};
pub use frame::{CameraSpec, FrameData, FrameSet, FrameSlotKind, GrabMode, ShutterMode};
