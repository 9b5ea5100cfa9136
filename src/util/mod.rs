// SPDX-License-Identifier: GPL-3.0-only

//! Small cross-cutting utilities shared by the capture, stereo, and
//! recorder workers.

pub mod worker;
