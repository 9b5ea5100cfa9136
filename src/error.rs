// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide error taxonomy
//!
//! One flat [`ErrorKind`] covers every failure surfaced by the public API
//! (see spec §7). Each site that can fail constructs an [`Error`] carrying
//! the kind plus a human-readable message and, where applicable, the
//! underlying cause.

use std::fmt;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The exhaustive error taxonomy from the design specification (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Driver missing or no camera enumerated.
    DeviceUnavailable,
    /// Transient bus / USB error; caller may retry.
    DeviceIO,
    /// Unknown option, unsupported by this model, or out-of-range value.
    InvalidOption,
    /// Write attempted on a read-only option.
    NotWritable,
    /// Module parameter out of its declared domain.
    InvalidParameter,
    /// API called in the wrong lifecycle state.
    InvalidState,
    /// Requested pipeline feature combination violates the compatibility matrix.
    IncompatibleConfig,
    /// Raw buffer size did not match the declared image dimensions.
    DecodeMismatch,
    /// Recorder cannot keep up with the incoming frame rate.
    RecorderBackpressure,
    /// Raw file version is not supported by this build.
    UnsupportedFileVersion,
    /// No data is available yet on this endpoint.
    NotReady,
    /// Query coordinates or frame number fell outside the valid domain.
    OutOfRange,
    /// A worker thread did not honor cancellation within its timeout.
    ThreadStuck,
}

impl ErrorKind {
    /// Per spec §7: does this failure tear the session down, or is it
    /// local to the call / frame that produced it?
    pub fn is_session_fatal(self) -> bool {
        matches!(self, ErrorKind::DeviceIO | ErrorKind::ThreadStuck)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::DeviceUnavailable => "device unavailable",
            ErrorKind::DeviceIO => "device I/O error",
            ErrorKind::InvalidOption => "invalid option",
            ErrorKind::NotWritable => "option not writable",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::IncompatibleConfig => "incompatible pipeline configuration",
            ErrorKind::DecodeMismatch => "raw buffer size mismatch",
            ErrorKind::RecorderBackpressure => "recorder backpressure",
            ErrorKind::UnsupportedFileVersion => "unsupported raw file version",
            ErrorKind::NotReady => "not ready",
            ErrorKind::OutOfRange => "out of range",
            ErrorKind::ThreadStuck => "worker thread stuck",
        };
        write!(f, "{s}")
    }
}

/// The crate's error type: a kind plus context.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Construct a new error of `kind` with a human-readable `message`.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::DeviceIO, e.to_string())
    }
}

/// Shorthand for constructing an [`Error`] inline, e.g. `err!(OutOfRange, "x={x}")`.
macro_rules! err {
    ($kind:ident, $($arg:tt)*) => {
        $crate::error::Error::new($crate::error::ErrorKind::$kind, format!($($arg)*))
    };
}
pub(crate) use err;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = Error::new(ErrorKind::OutOfRange, "x=99 out of [0,10)");
        let s = e.to_string();
        assert!(s.contains("out of range"));
        assert!(s.contains("x=99"));
    }

    #[test]
    fn session_fatal_classification() {
        assert!(ErrorKind::ThreadStuck.is_session_fatal());
        assert!(ErrorKind::DeviceIO.is_session_fatal());
        assert!(!ErrorKind::NotReady.is_session_fatal());
        assert!(!ErrorKind::DecodeMismatch.is_session_fatal());
    }
}
