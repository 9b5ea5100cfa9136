// SPDX-License-Identifier: GPL-3.0-only

//! The closed set of device options (spec §4.A) and their declared domains
//! and capability bits.
//!
//! Grab/shutter/option kinds are closed sets represented as tagged
//! variants rather than a class hierarchy, per the §9 design note "Tagged
//! unions over class hierarchies" — the same choice the teacher makes for
//! `CameraBackendType`/`PixelFormat`.

use crate::frame::ShutterMode;

/// Stable identifier for a device option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionId {
    Gain,
    Exposure,
    FineExposure,
    NoiseFilter,
    ShutterMode,
    HdrMode,
    HiResolutionMode,
    AutoCalibration,
    ManualCalibrationTrigger,
    SelfCalibration,
    ColorImage,
    ColorImageCorrect,
    ExtendedMatching,
    SadSearchRange128,
}

impl OptionId {
    pub const ALL: [OptionId; 14] = [
        OptionId::Gain,
        OptionId::Exposure,
        OptionId::FineExposure,
        OptionId::NoiseFilter,
        OptionId::ShutterMode,
        OptionId::HdrMode,
        OptionId::HiResolutionMode,
        OptionId::AutoCalibration,
        OptionId::ManualCalibrationTrigger,
        OptionId::SelfCalibration,
        OptionId::ColorImage,
        OptionId::ColorImageCorrect,
        OptionId::ExtendedMatching,
        OptionId::SadSearchRange128,
    ];
}

/// The declared value domain for an option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionDomain {
    Bool,
    IntRange { min: i64, max: i64, step: i64 },
    ShutterModeEnum,
}

/// A concrete option value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Shutter(ShutterMode),
}

impl OptionValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            OptionValue::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_shutter(self) -> Option<ShutterMode> {
        match self {
            OptionValue::Shutter(s) => Some(s),
            _ => None,
        }
    }
}

/// Capability bits declared for one option on one camera model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub implemented: bool,
    pub readable: bool,
    pub writable: bool,
}

impl Capability {
    pub const NONE: Capability = Capability {
        implemented: false,
        readable: false,
        writable: false,
    };
    pub const RW: Capability = Capability {
        implemented: true,
        readable: true,
        writable: true,
    };
    pub const RO: Capability = Capability {
        implemented: true,
        readable: true,
        writable: false,
    };
}

/// A full option descriptor: domain plus capability, fixed per model.
#[derive(Debug, Clone, Copy)]
pub struct OptionDescriptor {
    pub domain: OptionDomain,
    pub capability: Capability,
}

/// Domain for a given option — identical across all models in this design
/// (the value ranges are model-specific and clamped by the driver itself;
/// only the *kind* of domain is fixed here).
pub fn domain_of(option: OptionId) -> OptionDomain {
    match option {
        OptionId::Gain => OptionDomain::IntRange { min: 0, max: 255, step: 1 },
        OptionId::Exposure => OptionDomain::IntRange { min: 1, max: 2000, step: 1 },
        OptionId::FineExposure => OptionDomain::IntRange { min: 0, max: 511, step: 1 },
        OptionId::NoiseFilter => OptionDomain::IntRange { min: 0, max: 15, step: 1 },
        OptionId::ShutterMode => OptionDomain::ShutterModeEnum,
        OptionId::HdrMode => OptionDomain::Bool,
        OptionId::HiResolutionMode => OptionDomain::Bool,
        OptionId::AutoCalibration => OptionDomain::Bool,
        OptionId::ManualCalibrationTrigger => OptionDomain::Bool,
        OptionId::SelfCalibration => OptionDomain::Bool,
        OptionId::ColorImage => OptionDomain::Bool,
        OptionId::ColorImageCorrect => OptionDomain::Bool,
        OptionId::ExtendedMatching => OptionDomain::Bool,
        OptionId::SadSearchRange128 => OptionDomain::Bool,
    }
}

/// Per-model capability table. Unlisted (model, option) pairs fall back to
/// [`Capability::NONE`] — i.e. not implemented on that model.
pub fn capability_of(model: super::CameraModel, option: OptionId) -> Capability {
    use super::CameraModel::*;
    use OptionId::*;

    match (model, option) {
        // Gain/exposure/shutter/noise filter are universal across the VM/XC/4K families.
        (_, Gain) | (_, Exposure) | (_, ShutterMode) | (_, NoiseFilter) => Capability::RW,
        // Fine exposure composes with exposure on XC/4K but not on the original VM.
        (XC | K4 | K4A | K4J, FineExposure) => Capability::RW,
        (VM, FineExposure) => Capability::NONE,
        // HDR and hi-resolution modes are 4K-family features.
        (K4 | K4A | K4J, HdrMode) => Capability::RW,
        (K4 | K4A | K4J, HiResolutionMode) => Capability::RW,
        (VM | XC, HdrMode) | (VM | XC, HiResolutionMode) => Capability::NONE,
        // Calibration controls are present on all known models.
        (_, AutoCalibration) => Capability::RW,
        (_, ManualCalibrationTrigger) => Capability::RW,
        (_, SelfCalibration) => Capability::RW,
        // Color delivery, present on color-capable variants (XC/4K); VM is mono-only.
        (XC | K4 | K4A | K4J, ColorImage) => Capability::RW,
        (XC | K4 | K4A | K4J, ColorImageCorrect) => Capability::RW,
        (VM, ColorImage) | (VM, ColorImageCorrect) => Capability::NONE,
        // Software-matcher tuning, universal (consumed by the SW stereo matcher, §4.F).
        (_, ExtendedMatching) => Capability::RW,
        (_, SadSearchRange128) => Capability::RW,
        (Unknown, _) => Capability::NONE,
    }
}

pub fn descriptor_of(model: super::CameraModel, option: OptionId) -> OptionDescriptor {
    OptionDescriptor {
        domain: domain_of(option),
        capability: capability_of(model, option),
    }
}
