// SPDX-License-Identifier: GPL-3.0-only

//! Capture Session (spec §4.B): the background thread that pulls frames
//! from a [`crate::device::DeviceAbstraction`] and publishes them into a
//! [`ring::FrameRing`] that downstream decode/stereo/recorder consumers
//! drain independently.

pub mod ring;
pub mod session;

pub use ring::{FrameRing, FrameSink, RawCapture, RawPayload};
pub use session::{CaptureState, CaptureThread};
