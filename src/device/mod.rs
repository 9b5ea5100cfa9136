// SPDX-License-Identifier: GPL-3.0-only

//! Device Abstraction (spec §4.A).
//!
//! Presents one option surface over heterogeneous per-model drivers, the
//! same shape as the teacher's `backends::camera` split: a closed-set
//! `CameraBackend`-style trait ([`driver::Driver`]) selected by model id,
//! wrapped by a thread-safe manager ([`manager::DeviceAbstraction`]) that
//! serializes option get/set the way `CameraBackendManager` serializes
//! backend calls behind its internal mutex.

pub mod driver;
pub mod manager;
pub mod mock;
pub mod option_table;
pub mod types;

pub use driver::{CameraModel, Driver, DriverFrame};
pub use manager::DeviceAbstraction;
pub use option_table::{OptionDomain, OptionId, OptionValue};
