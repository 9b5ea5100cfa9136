// SPDX-License-Identifier: GPL-3.0-only

//! Disparity Filter (spec §4.G): speckle removal, bilateral smoothing,
//! hole-fill, and double-shutter merge, run synchronously on the
//! processor thread's output before publish — three independently-gated
//! passes plus the merge, matching the spec's single-frame refinement
//! order.

use serde::{Deserialize, Serialize};

use crate::error::{err, Result};

/// Filter configuration; the `stereo` section's sibling in a Module
/// Parameter File (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    pub speckle_enabled: bool,
    /// Disparity values within this delta are considered the same region.
    pub speckle_diff: f32,
    /// Regions smaller than this many pixels are zeroed.
    pub speckle_max_size: u32,

    pub smoothing_enabled: bool,
    pub smoothing_radius: u32,

    pub hole_fill_enabled: bool,
    /// Maximum hole width (in pixels) that gets filled by interpolation.
    pub hole_fill_max_gap: u32,

    /// Double-shutter merge (spec §4.G + §9 Open Question #1). Defaults
    /// per DESIGN.md: thresholds are provisional pending a documented
    /// vendor spec value.
    pub double_shutter_enabled: bool,
    pub low_threshold: f32,
    pub high_threshold: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            speckle_enabled: true,
            speckle_diff: 2.0,
            speckle_max_size: 20,
            smoothing_enabled: true,
            smoothing_radius: 1,
            hole_fill_enabled: true,
            hole_fill_max_gap: 4,
            double_shutter_enabled: false,
            low_threshold: 40.0,
            high_threshold: 235.0,
        }
    }
}

impl FilterParams {
    pub fn validate(&self) -> Result<()> {
        if self.low_threshold < 0.0 || self.high_threshold > 255.0 || self.low_threshold >= self.high_threshold {
            return Err(err!(
                InvalidParameter,
                "thresholds must satisfy 0 <= low < high <= 255, got low={}, high={}",
                self.low_threshold,
                self.high_threshold
            ));
        }
        if self.speckle_max_size == 0 {
            return Err(err!(InvalidParameter, "speckle_max_size must be > 0"));
        }
        Ok(())
    }
}

/// Remove small connected disparity regions ("speckles") whose area is
/// below `max_size`, zeroing them.
pub fn remove_speckles(disparity: &mut [f32], width: u32, height: u32, diff: f32, max_size: u32) {
    let mut visited = vec![false; disparity.len()];
    let mut stack = Vec::new();

    for start in 0..disparity.len() {
        if visited[start] || disparity[start] <= 0.0 {
            continue;
        }
        let mut region = Vec::new();
        stack.push(start as u32);
        visited[start] = true;
        let seed = disparity[start];

        while let Some(idx) = stack.pop() {
            region.push(idx);
            let x = idx % width;
            let y = idx / width;
            let neighbors = [
                (x > 0).then(|| idx - 1),
                (x + 1 < width).then(|| idx + 1),
                (y > 0).then(|| idx - width),
                (y + 1 < height).then(|| idx + width),
            ];
            for n in neighbors.into_iter().flatten() {
                let n = n as usize;
                if !visited[n] && disparity[n] > 0.0 && (disparity[n] - seed).abs() <= diff {
                    visited[n] = true;
                    stack.push(n as u32);
                }
            }
        }

        if region.len() < max_size as usize {
            for idx in region {
                disparity[idx as usize] = 0.0;
            }
        }
    }
}

/// Box-average smoothing over valid (nonzero) neighbors within `radius`.
pub fn smooth(disparity: &[f32], width: u32, height: u32, radius: u32) -> Vec<f32> {
    let mut out = disparity.to_vec();
    let r = radius as i64;
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let idx = (y * width as i64 + x) as usize;
            if disparity[idx] <= 0.0 {
                continue;
            }
            let mut sum = 0.0f32;
            let mut count = 0u32;
            for dy in -r..=r {
                for dx in -r..=r {
                    let ny = y + dy;
                    let nx = x + dx;
                    if ny < 0 || ny >= height as i64 || nx < 0 || nx >= width as i64 {
                        continue;
                    }
                    let v = disparity[(ny * width as i64 + nx) as usize];
                    if v > 0.0 {
                        sum += v;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                out[idx] = sum / count as f32;
            }
        }
    }
    out
}

/// Linearly interpolate short horizontal runs of zero (invalid) disparity
/// between two valid endpoints, up to `max_gap` pixels wide.
pub fn fill_holes(disparity: &mut [f32], width: u32, height: u32, max_gap: u32) {
    for y in 0..height {
        let row_start = (y * width) as usize;
        let row = &mut disparity[row_start..row_start + width as usize];
        let mut x = 0usize;
        while x < row.len() {
            if row[x] > 0.0 {
                x += 1;
                continue;
            }
            let gap_start = x;
            while x < row.len() && row[x] <= 0.0 {
                x += 1;
            }
            let gap_len = x - gap_start;
            if gap_start == 0 || x == row.len() || gap_len > max_gap as usize {
                continue;
            }
            let left = row[gap_start - 1];
            let right = row[x];
            for (i, slot) in row[gap_start..x].iter_mut().enumerate() {
                let t = (i + 1) as f32 / (gap_len + 1) as f32;
                *slot = left + (right - left) * t;
            }
        }
    }
}

/// Merge a double-shutter exposure pair (spec §4.G, GLOSSARY "double
/// shutter"): per pixel, prefer the disparity from the exposure whose `p1`
/// luminance falls in `[low, high]`; if both qualify, prefer `long`
/// (lower noise); if neither qualifies, emit no measurement (`0.0`/`0`).
/// Returns `(merged_disparity, merged_p1)`, selected together so the two
/// planes always agree on which exposure won a given pixel.
pub fn merge_double_shutter(
    long_disparity: &[f32],
    long_luma: &[u8],
    short_disparity: &[f32],
    short_luma: &[u8],
    low: f32,
    high: f32,
) -> (Vec<f32>, Vec<u8>) {
    long_disparity
        .iter()
        .zip(long_luma.iter())
        .zip(short_disparity.iter())
        .zip(short_luma.iter())
        .map(|(((&ld, &ll), &sd), &sl)| {
            let long_ok = (ll as f32) >= low && (ll as f32) <= high;
            let short_ok = (sl as f32) >= low && (sl as f32) <= high;
            if long_ok {
                (ld, ll)
            } else if short_ok {
                (sd, sl)
            } else {
                (0.0, 0u8)
            }
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_speckle_is_removed() {
        let mut d = vec![0.0f32; 9]; // 3x3
        d[4] = 5.0; // lone center pixel, no similar neighbors
        remove_speckles(&mut d, 3, 3, 1.0, 2);
        assert_eq!(d[4], 0.0);
    }

    #[test]
    fn large_region_survives_speckle_removal() {
        let mut d = vec![5.0f32; 9];
        remove_speckles(&mut d, 3, 3, 1.0, 2);
        assert!(d.iter().all(|&v| v == 5.0));
    }

    #[test]
    fn fill_holes_interpolates_short_gap() {
        let mut row = vec![2.0, 0.0, 0.0, 8.0];
        fill_holes(&mut row, 4, 1, 4);
        assert!((row[1] - 4.0).abs() < 0.01);
        assert!((row[2] - 6.0).abs() < 0.01);
    }

    #[test]
    fn merge_double_shutter_prefers_long_when_well_exposed() {
        // pixel 0: long well-exposed -> long wins outright.
        // pixel 1: long saturated (250), short well-exposed (80) -> short wins.
        // pixel 2: long too dark (10), short also too dark (5) -> no measurement.
        let long_disp = vec![1.0, 2.0, 3.0];
        let long_luma = vec![100u8, 250u8, 10u8];
        let short_disp = vec![9.0, 9.0, 9.0];
        let short_luma = vec![90u8, 80u8, 5u8];
        let (disp, luma) = merge_double_shutter(&long_disp, &long_luma, &short_disp, &short_luma, 40.0, 235.0);
        assert_eq!(disp[0], 1.0);
        assert_eq!(luma[0], 100);
        assert_eq!(disp[1], 9.0);
        assert_eq!(luma[1], 80);
        assert_eq!(disp[2], 0.0);
        assert_eq!(luma[2], 0);
    }

    #[test]
    fn threshold_validation_rejects_inverted_range() {
        let p = FilterParams { low_threshold: 200.0, high_threshold: 50.0, ..FilterParams::default() };
        assert_eq!(p.validate().unwrap_err().kind(), crate::error::ErrorKind::InvalidParameter);
    }
}
