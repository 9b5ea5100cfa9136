// SPDX-License-Identifier: GPL-3.0-only

//! Device Driver Interface (spec §6.1) — the vendor SDK boundary consumed
//! by the Device Abstraction. Real bindings to VM/XC/4K firmware are out of
//! scope (spec §1); this module defines the trait shape a binding must
//! satisfy and the fixed error-code mapping table, grounded on
//! `examples/original_source/.../ISCSDKLib.h`'s `ERR_*`/`FT_*` constants.

use crate::error::{Error, ErrorKind};
use crate::frame::{CameraSpec, GrabMode};

use super::option_table::{OptionId, OptionValue};

/// Camera model family (spec §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraModel {
    VM,
    XC,
    K4,
    K4A,
    K4J,
    Unknown,
}

impl std::fmt::Display for CameraModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CameraModel::VM => "VM",
            CameraModel::XC => "XC",
            CameraModel::K4 => "K4",
            CameraModel::K4A => "K4A",
            CameraModel::K4J => "K4J",
            CameraModel::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// One frame as handed back by `get_image` (spec §6.1).
#[derive(Debug, Clone)]
pub struct DriverFrame {
    pub frame_number: u64,
    pub base_bytes: Vec<u8>,
    pub compare_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub gain: u32,
    pub exposure: u32,
}

/// The interface a vendor driver binding must provide.
///
/// All methods are synchronous and may block up to an implementation's own
/// internal bound; `get_image`'s `wait_time_ms` is the caller-specified
/// upper bound on that one blocking call (spec §4.B step 1).
pub trait Driver: Send {
    fn open(&mut self) -> crate::error::Result<()>;
    fn close(&mut self) -> crate::error::Result<()>;

    fn set_run_mode(&mut self, mode: GrabMode) -> crate::error::Result<()>;
    fn start_grab(&mut self, mode: GrabMode) -> crate::error::Result<()>;
    fn stop_grab(&mut self) -> crate::error::Result<()>;

    fn get_image(&mut self, wait_time_ms: u32) -> crate::error::Result<DriverFrame>;

    fn get_option(&self, option: OptionId) -> crate::error::Result<OptionValue>;
    fn set_option(&mut self, option: OptionId, value: OptionValue) -> crate::error::Result<()>;

    fn camera_param_query(&self) -> crate::error::Result<CameraSpec>;
}

/// The driver's raw integer error code as returned by `ERR_*`/`FT_*`
/// constants in the vendor SDK header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDriverError(pub i32);

/// Maps the driver's integer error codes to [`ErrorKind`] by a fixed table
/// (spec §6.1), grounded on `ISCSDKLib.h`.
pub fn map_driver_error(code: RawDriverError, context: &str) -> Error {
    let kind = match code.0 {
        // FT_DEVICE_NOT_FOUND, FT_DEVICE_NOT_OPENED, ERR_USB_OPEN, ERR_USB_ALREADY_OPEN
        2 | 3 | -5 | -101 => ErrorKind::DeviceUnavailable,
        // ERR_WAIT_TIMEOUT, ERR_USB_ERR, ERR_USB_NO_IMAGE, FT_IO_ERROR, ERR_GETIMAGE
        -3 | -100 | -102 | 4 | -16 => ErrorKind::DeviceIO,
        // ERR_INVALID_VALUE, ERR_GRAB_MODE_ERROR, ERR_NO_CAPTURE_MODE, FT_INVALID_PARAMETER
        -17 | -12 | -18 | 6 => ErrorKind::InvalidOption,
        _ => ErrorKind::DeviceIO,
    };
    Error::new(kind, format!("{context} (driver code {})", code.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_timeout_to_device_io() {
        let e = map_driver_error(RawDriverError(-3), "get_image");
        assert_eq!(e.kind(), ErrorKind::DeviceIO);
    }

    #[test]
    fn maps_device_not_found_to_unavailable() {
        let e = map_driver_error(RawDriverError(2), "open");
        assert_eq!(e.kind(), ErrorKind::DeviceUnavailable);
    }

    #[test]
    fn maps_invalid_value_to_invalid_option() {
        let e = map_driver_error(RawDriverError(-17), "set_option");
        assert_eq!(e.kind(), ErrorKind::InvalidOption);
    }
}
