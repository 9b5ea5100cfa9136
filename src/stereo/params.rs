// SPDX-License-Identifier: GPL-3.0-only

//! Matcher parameter set (spec §4.F), the `stereo` section of a Module
//! Parameter File (§6.3). Validated eagerly at `set` time rather than at
//! match time, per spec's `InvalidParameter` contract.

use serde::{Deserialize, Serialize};

use crate::error::{err, Result};

/// Block-matching cost function (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMetricKind {
    Sad,
    Ssd,
}

/// Tunable parameters for [`super::matcher::match_stereo`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StereoParams {
    /// Block side length; must be odd and >= 3.
    pub window: u32,
    /// Maximum search disparity in pixels; must be > 0.
    pub max_disparity: u32,
    /// Reject a match whose best cost isn't at least this much better
    /// than the second-best candidate, as a fraction (0.0..1.0).
    pub uniqueness_ratio: f32,
    /// Enable the 128-wide SAD search range variant some 4K models
    /// expose as a device option (spec §4.A `SadSearchRange128`).
    pub extended_range: bool,
    /// Enable parabolic sub-pixel refinement around the cost minimum
    /// (spec §4.A `ExtendedMatching`, §4.F "if extended_matching is set,
    /// apply a parabolic sub-pixel refinement"). Without it the matcher
    /// emits whole-pixel disparity only.
    pub extended_matching: bool,
    pub metric: MatchMetricKind,
    /// Maximum disagreement (in pixels) the left-right consistency check
    /// (spec §4.F rejection criterion (c)) tolerates between the forward
    /// and reverse disparity estimate at a pixel before rejecting it.
    pub lr_max_diff: f32,
    /// Reject a match whose best candidate's per-pixel average cost (the
    /// block's summed SAD/SSD divided by `window * window`) exceeds this
    /// (spec §4.F rejection criterion (a)): a uniquely-best candidate can
    /// still be a poor match in absolute terms, e.g. an occluded or
    /// non-corresponding region where every disparity scores badly but one
    /// happens to be marginally least bad.
    pub max_cost: f32,
}

impl Default for StereoParams {
    fn default() -> Self {
        Self {
            window: 9,
            max_disparity: 64,
            uniqueness_ratio: 0.15,
            extended_range: false,
            extended_matching: true,
            metric: MatchMetricKind::Sad,
            lr_max_diff: 1.0,
            max_cost: 40.0,
        }
    }
}

impl StereoParams {
    /// Validate the parameter set, returning `InvalidParameter` on the
    /// first violated constraint (spec §7). Window sizes `3` and `31` are
    /// the accepted boundary values; `2`, `4`, `33` are rejected.
    pub fn validate(&self) -> Result<()> {
        if self.window < 3 || self.window > 31 || self.window % 2 == 0 {
            return Err(err!(
                InvalidParameter,
                "window must be odd and in 3..=31, got {}",
                self.window
            ));
        }
        if self.max_disparity == 0 {
            return Err(err!(InvalidParameter, "max_disparity must be > 0"));
        }
        let range_cap = if self.extended_range { 128 } else { 64 };
        if self.max_disparity > range_cap {
            return Err(err!(
                InvalidParameter,
                "max_disparity {} exceeds the {range_cap}-pixel search range",
                self.max_disparity
            ));
        }
        if !(0.0..=1.0).contains(&self.uniqueness_ratio) {
            return Err(err!(
                InvalidParameter,
                "uniqueness_ratio must be in [0.0, 1.0], got {}",
                self.uniqueness_ratio
            ));
        }
        if self.lr_max_diff < 0.0 {
            return Err(err!(InvalidParameter, "lr_max_diff must be >= 0, got {}", self.lr_max_diff));
        }
        if self.max_cost <= 0.0 {
            return Err(err!(InvalidParameter, "max_cost must be > 0, got {}", self.max_cost));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        StereoParams::default().validate().unwrap();
    }

    #[test]
    fn even_window_is_rejected() {
        let p = StereoParams { window: 8, ..StereoParams::default() };
        assert_eq!(p.validate().unwrap_err().kind(), crate::error::ErrorKind::InvalidParameter);
    }

    #[test]
    fn window_boundaries_3_and_31_are_accepted_2_4_33_are_not() {
        for w in [3, 31] {
            StereoParams { window: w, ..StereoParams::default() }.validate().unwrap();
        }
        for w in [2, 4, 33] {
            let p = StereoParams { window: w, ..StereoParams::default() };
            assert_eq!(p.validate().unwrap_err().kind(), crate::error::ErrorKind::InvalidParameter);
        }
    }

    #[test]
    fn disparity_beyond_range_cap_is_rejected() {
        let p = StereoParams { max_disparity: 100, extended_range: false, ..StereoParams::default() };
        assert_eq!(p.validate().unwrap_err().kind(), crate::error::ErrorKind::InvalidParameter);
        let p2 = StereoParams { max_disparity: 100, extended_range: true, ..StereoParams::default() };
        p2.validate().unwrap();
    }
}
