// SPDX-License-Identifier: GPL-3.0-only

//! Thread-safe option surface over a boxed [`Driver`] (spec §4.A / §5:
//! "Option get/set on the Device Abstraction is serialized by an internal
//! mutex"). Grounded on the teacher's `CameraBackendManager`, which wraps
//! a `Box<dyn CameraBackend>` behind a `Mutex` and exposes capability
//! queries alongside get/set so callers never touch the backend directly.

use std::sync::Mutex;

use crate::error::{err, Result};
use crate::frame::CameraSpec;

use super::driver::{CameraModel, Driver};
use super::option_table::{capability_of, descriptor_of, Capability, OptionDescriptor, OptionId, OptionValue};
use super::types::{ConnectionState, DeviceId};

struct Inner {
    driver: Box<dyn Driver>,
    state: ConnectionState,
}

/// Owns exactly one [`Driver`] instance and serializes all access to it.
///
/// Matches the teacher's manager in spirit: callers never see the trait
/// object, only this wrapper's typed methods, so capability checks happen
/// in one place regardless of which model is bound underneath.
pub struct DeviceAbstraction {
    id: DeviceId,
    model: CameraModel,
    inner: Mutex<Inner>,
}

impl DeviceAbstraction {
    pub fn new(id: DeviceId, driver: Box<dyn Driver>) -> Self {
        Self {
            id,
            model: id.model,
            inner: Mutex::new(Inner {
                driver,
                state: ConnectionState::Closed,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn model(&self) -> CameraModel {
        self.model
    }

    pub fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("device mutex poisoned");
        inner.driver.open()?;
        inner.state = ConnectionState::Open;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("device mutex poisoned");
        inner.driver.close()?;
        inner.state = ConnectionState::Closed;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock().expect("device mutex poisoned");
        inner.state == ConnectionState::Open
    }

    pub fn camera_spec(&self) -> Result<CameraSpec> {
        let inner = self.inner.lock().expect("device mutex poisoned");
        inner.driver.camera_param_query()
    }

    pub fn descriptor(&self, option: OptionId) -> OptionDescriptor {
        descriptor_of(self.model, option)
    }

    pub fn capability(&self, option: OptionId) -> Capability {
        capability_of(self.model, option)
    }

    pub fn is_implemented(&self, option: OptionId) -> bool {
        self.capability(option).implemented
    }

    pub fn is_readable(&self, option: OptionId) -> bool {
        self.capability(option).readable
    }

    pub fn is_writable(&self, option: OptionId) -> bool {
        self.capability(option).writable
    }

    /// `get_min(option)` (spec §4.A): the declared lower bound for an
    /// int-range option.
    pub fn get_min(&self, option: OptionId) -> Result<i64> {
        self.int_range(option).map(|(min, _, _)| min)
    }

    /// `get_max(option)` (spec §4.A): the declared upper bound for an
    /// int-range option.
    pub fn get_max(&self, option: OptionId) -> Result<i64> {
        self.int_range(option).map(|(_, max, _)| max)
    }

    /// `get_step(option)` (spec §4.A): the declared step for an int-range
    /// option.
    pub fn get_step(&self, option: OptionId) -> Result<i64> {
        self.int_range(option).map(|(_, _, step)| step)
    }

    fn int_range(&self, option: OptionId) -> Result<(i64, i64, i64)> {
        if !self.is_implemented(option) {
            return Err(err!(InvalidOption, "{option:?} is not implemented on {}", self.model));
        }
        match self.descriptor(option).domain {
            super::option_table::OptionDomain::IntRange { min, max, step } => Ok((min, max, step)),
            other => Err(err!(InvalidOption, "{option:?} has no int range (domain is {other:?})")),
        }
    }

    /// Get the current value of `option` (spec §6.3 `DeviceGetOption`).
    pub fn get(&self, option: OptionId) -> Result<OptionValue> {
        let cap = self.capability(option);
        if !cap.implemented {
            return Err(err!(InvalidOption, "{option:?} is not implemented on {}", self.model));
        }
        let inner = self.inner.lock().expect("device mutex poisoned");
        inner.driver.get_option(option)
    }

    /// Set `value` on `option` (spec §6.3 `DeviceSetOption`).
    pub fn set(&self, option: OptionId, value: OptionValue) -> Result<()> {
        let cap = self.capability(option);
        if !cap.implemented {
            return Err(err!(InvalidOption, "{option:?} is not implemented on {}", self.model));
        }
        if !cap.writable {
            return Err(err!(NotWritable, "{option:?} is read-only on {}", self.model));
        }
        let mut inner = self.inner.lock().expect("device mutex poisoned");
        inner.driver.set_option(option, value)
    }

    /// Access the driver exclusively for grab lifecycle calls, used by the
    /// capture session which already serializes its own start/stop
    /// transitions (spec §4.B) and therefore needs the raw driver, not the
    /// option surface.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut dyn Driver) -> Result<R>) -> Result<R> {
        let mut inner = self.inner.lock().expect("device mutex poisoned");
        f(inner.driver.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDriver;

    fn device() -> DeviceAbstraction {
        DeviceAbstraction::new(
            DeviceId { model: CameraModel::XC, index: 0 },
            Box::new(MockDriver::new(CameraModel::XC, CameraSpec::default())),
        )
    }

    #[test]
    fn open_close_round_trip_updates_state() {
        let dev = device();
        assert!(!dev.is_open());
        dev.open().unwrap();
        assert!(dev.is_open());
        dev.close().unwrap();
        assert!(!dev.is_open());
    }

    #[test]
    fn get_set_respects_capability_gate() {
        let dev = device();
        dev.set(OptionId::Gain, OptionValue::Int(42)).unwrap();
        assert_eq!(dev.get(OptionId::Gain).unwrap().as_int(), Some(42));

        let err = dev.get(OptionId::HdrMode).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOption);
    }

    #[test]
    fn get_min_max_step_read_the_declared_int_range() {
        let dev = device();
        assert_eq!(dev.get_min(OptionId::Gain).unwrap(), 0);
        assert_eq!(dev.get_max(OptionId::Gain).unwrap(), 255);
        assert_eq!(dev.get_step(OptionId::Gain).unwrap(), 1);
    }

    #[test]
    fn get_min_rejects_unimplemented_and_non_range_options() {
        let dev = device();
        let err = dev.get_min(OptionId::HdrMode).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOption);

        let err = dev.get_min(OptionId::ShutterMode).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOption);
    }

    #[test]
    fn with_driver_grants_exclusive_grab_access() {
        let dev = device();
        dev.open().unwrap();
        dev.with_driver(|d| d.start_grab(crate::frame::GrabMode::Corrected))
            .unwrap();
        let frame = dev.with_driver(|d| d.get_image(50)).unwrap();
        assert_eq!(frame.frame_number, 1);
    }
}
