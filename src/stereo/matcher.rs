// SPDX-License-Identifier: GPL-3.0-only

//! Block-matching disparity search (spec §4.F).
//!
//! Runs on its own thread via [`crate::util::worker::Worker`]; the
//! cancellation flag is polled every 16 rows, same granularity the spec
//! calls for, generalizing the teacher's "check the stop flag between
//! frame-loop iterations" into "check it between row bands" for a
//! call that can itself take tens of milliseconds on a full frame.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{err, Result};

use super::params::{MatchMetricKind, StereoParams};

const CANCEL_CHECK_ROWS: u32 = 16;

/// Per-pixel cost at one candidate disparity, matching a window in `base`
/// centered at `x` against the window in `compare` centered at `x - d`
/// (the forward/left-to-right direction: `compare` is assumed to carry
/// the same scene shifted left by the disparity).
fn block_cost(
    base: &[u8],
    compare: &[u8],
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    d: u32,
    half: u32,
    metric: MatchMetricKind,
) -> Option<i64> {
    if x < half || x + half >= width || y < half || y + half >= height {
        return None;
    }
    if x < d + half {
        return None;
    }
    let mut cost: i64 = 0;
    for wy in 0..=(2 * half) {
        let by = y + wy - half;
        for wx in 0..=(2 * half) {
            let bx = x + wx - half;
            let cx = bx - d;
            let b = base[(by * width + bx) as usize] as i64;
            let c = compare[(by * width + cx) as usize] as i64;
            let diff = b - c;
            cost += match metric {
                MatchMetricKind::Sad => diff.abs(),
                MatchMetricKind::Ssd => diff * diff,
            };
        }
    }
    Some(cost)
}

/// Per-pixel cost for the reverse (right-to-left) direction: matches a
/// window in `primary` (the image being searched from, i.e. `compare` in
/// the forward pass) centered at `x` against the window in `other` (the
/// forward pass's `base`) centered at `x + d` — the mirror image of
/// [`block_cost`]'s `x - d`, since a pixel that is `d` to the right in the
/// forward direction is `d` to the left when searched from the other
/// image.
fn block_cost_reverse(
    primary: &[u8],
    other: &[u8],
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    d: u32,
    half: u32,
    metric: MatchMetricKind,
) -> Option<i64> {
    if x < half || x + half >= width || y < half || y + half >= height {
        return None;
    }
    if x + d + half >= width {
        return None;
    }
    let mut cost: i64 = 0;
    for wy in 0..=(2 * half) {
        let by = y + wy - half;
        for wx in 0..=(2 * half) {
            let bx = x + wx - half;
            let cx = bx + d;
            let p = primary[(by * width + bx) as usize] as i64;
            let o = other[(by * width + cx) as usize] as i64;
            let diff = p - o;
            cost += match metric {
                MatchMetricKind::Sad => diff.abs(),
                MatchMetricKind::Ssd => diff * diff,
            };
        }
    }
    Some(cost)
}

/// Best candidate at one pixel: `(disparity, best_cost, second_best_cost)`.
fn best_candidate(
    base: &[u8],
    compare: &[u8],
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    half: u32,
    params: &StereoParams,
) -> Option<(u32, i64, i64)> {
    let mut best: Option<(u32, i64)> = None;
    let mut second_best = i64::MAX;

    for d in 0..=params.max_disparity {
        let Some(cost) = block_cost(base, compare, width, height, x, y, d, half, params.metric) else {
            continue;
        };
        match best {
            None => best = Some((d, cost)),
            Some((_, best_cost)) if cost < best_cost => {
                second_best = best_cost;
                best = Some((d, cost));
            }
            Some(_) => {
                if cost < second_best {
                    second_best = cost;
                }
            }
        }
    }

    best.map(|(d, cost)| (d, cost, second_best))
}

/// Reverse-direction counterpart of a single, uniqueness-gated
/// integer-disparity pass over a whole image, used only to produce the
/// right-to-left estimate [`left_right_consistency_check`] compares
/// against (no sub-pixel refinement needed for that comparison).
fn reverse_pass(primary: &[u8], other: &[u8], width: u32, height: u32, half: u32, params: &StereoParams, stop: &AtomicBool) -> Vec<f32> {
    let mut out = vec![0.0f32; (width * height) as usize];
    for y in 0..height {
        if y % CANCEL_CHECK_ROWS == 0 && stop.load(Ordering::SeqCst) {
            break;
        }
        for x in 0..width {
            let mut best: Option<(u32, i64)> = None;
            let mut second_best = i64::MAX;
            for d in 0..=params.max_disparity {
                let Some(cost) = block_cost_reverse(primary, other, width, height, x, y, d, half, params.metric) else {
                    continue;
                };
                match best {
                    None => best = Some((d, cost)),
                    Some((_, best_cost)) if cost < best_cost => {
                        second_best = best_cost;
                        best = Some((d, cost));
                    }
                    Some(_) => {
                        if cost < second_best {
                            second_best = cost;
                        }
                    }
                }
            }
            let Some((d, cost)) = best else { continue };
            if second_best != i64::MAX {
                let margin = (second_best - cost) as f32 / second_best.max(1) as f32;
                if margin < params.uniqueness_ratio {
                    continue;
                }
            }
            out[(y * width + x) as usize] = d as f32;
        }
    }
    out
}

/// Parabolic sub-pixel refinement around the integer-disparity minimum
/// (GLOSSARY: "parabola fit through the best cost and its two neighbors").
fn subpixel_refine(d: u32, cost_at: impl Fn(u32) -> Option<i64>) -> f32 {
    if d == 0 {
        return d as f32;
    }
    let (Some(c0), Some(c1), Some(c2)) = (cost_at(d - 1), cost_at(d), cost_at(d + 1)) else {
        return d as f32;
    };
    let denom = (c0 - 2 * c1 + c2) as f32;
    if denom.abs() < f32::EPSILON {
        return d as f32;
    }
    let offset = 0.5 * (c0 - c2) as f32 / denom;
    d as f32 + offset.clamp(-0.5, 0.5)
}

/// Run the matcher over one rectified stereo pair, returning a disparity
/// plane (`0.0` where no valid match was found). Cooperatively cancellable
/// via `stop`, polled every [`CANCEL_CHECK_ROWS`] rows.
pub fn match_stereo(
    base: &[u8],
    compare: &[u8],
    width: u32,
    height: u32,
    params: &StereoParams,
    stop: &AtomicBool,
) -> Result<Vec<f32>> {
    params.validate()?;
    if base.len() != (width * height) as usize || compare.len() != (width * height) as usize {
        return Err(err!(
            InvalidParameter,
            "base/compare length does not match {width}x{height}"
        ));
    }

    let half = params.window / 2;
    let window_area = ((2 * half + 1) * (2 * half + 1)) as f32;
    let mut disparity = vec![0.0f32; (width * height) as usize];

    for y in 0..height {
        if y % CANCEL_CHECK_ROWS == 0 && stop.load(Ordering::SeqCst) {
            break;
        }
        for x in 0..width {
            let Some((d, cost, second_best)) =
                best_candidate(base, compare, width, height, x, y, half, params)
            else {
                continue;
            };
            // Rejection criterion (a), spec §4.F: reject if the best
            // candidate's per-pixel average cost exceeds the threshold,
            // independent of how it compares to the runner-up.
            if cost as f32 / window_area > params.max_cost {
                continue;
            }
            if second_best != i64::MAX {
                let margin = (second_best - cost) as f32 / second_best.max(1) as f32;
                if margin < params.uniqueness_ratio {
                    continue;
                }
            }
            let sub = if params.extended_matching {
                subpixel_refine(d, |cand| block_cost(base, compare, width, height, x, y, cand, half, params.metric))
            } else {
                d as f32
            };
            disparity[(y * width + x) as usize] = sub;
        }
    }

    // Rejection criterion (c), spec §4.F: an independent reverse-direction
    // pass must agree within `lr_max_diff` pixels, or the pixel is zeroed.
    if !stop.load(Ordering::SeqCst) {
        let reverse = reverse_pass(compare, base, width, height, half, params, stop);
        left_right_consistency_check(&mut disparity, &reverse, width, params.lr_max_diff);
    }

    Ok(disparity)
}

/// Left-right consistency check (spec §4.F): recompute disparity with the
/// roles of `base`/`compare` swapped and zero out any pixel whose two
/// estimates disagree by more than `max_diff` pixels.
pub fn left_right_consistency_check(
    left_to_right: &mut [f32],
    right_to_left: &[f32],
    width: u32,
    max_diff: f32,
) {
    for (x_idx, d) in left_to_right.iter_mut().enumerate() {
        if *d <= 0.0 {
            continue;
        }
        let x = (x_idx as u32) % width;
        let matched_x = x as i64 - d.round() as i64;
        if matched_x < 0 {
            *d = 0.0;
            continue;
        }
        let row = x_idx as u32 / width;
        let other = right_to_left[(row * width + matched_x as u32) as usize];
        if (other - *d).abs() > max_diff {
            *d = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pair(width: u32, height: u32, shift: u32) -> (Vec<u8>, Vec<u8>) {
        let mut base = vec![0u8; (width * height) as usize];
        for (i, px) in base.iter_mut().enumerate() {
            let x = (i as u32) % width;
            *px = ((x * 37) % 256) as u8;
        }
        let mut compare = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                let sx = x + shift;
                let v = if sx < width { base[(y * width + sx) as usize] } else { 0 };
                compare[(y * width + x) as usize] = v;
            }
        }
        (base, compare)
    }

    #[test]
    fn recovers_known_shift_in_textured_region() {
        let (base, compare) = make_pair(40, 20, 5);
        let params = StereoParams { window: 5, max_disparity: 16, uniqueness_ratio: 0.0, ..StereoParams::default() };
        let stop = AtomicBool::new(false);
        let disparity = match_stereo(&base, &compare, 40, 20, &params, &stop).unwrap();
        let mid = (10 * 40 + 20) as usize;
        assert!((disparity[mid] - 5.0).abs() < 1.0);
    }

    #[test]
    fn left_right_consistency_check_zeroes_disagreeing_pixel() {
        // width=4, one row. Pixel 3 claims disparity 2 (matched_x = 1), but
        // the reverse pass at x=1 reports 3, a 1.0 disagreement that
        // exceeds max_diff=0.5 so it's rejected; pixel 2 (matched_x = 0,
        // reverse reports 2.0, exact match) survives.
        let mut ltr = vec![0.0, 0.0, 2.0, 2.0];
        let rtl = vec![2.0, 3.0, 0.0, 0.0];
        left_right_consistency_check(&mut ltr, &rtl, 4, 0.5);
        assert_eq!(ltr[2], 2.0);
        assert_eq!(ltr[3], 0.0);
    }

    #[test]
    fn known_shift_is_consistent_under_the_reverse_pass() {
        // Same pair as `recovers_known_shift_in_textured_region`, but with
        // `lr_max_diff` tight enough that any real forward/reverse
        // disagreement would zero the pixel — confirms the consistency
        // check wired into `match_stereo` doesn't spuriously reject a
        // genuinely matching, unoccluded pair.
        let (base, compare) = make_pair(40, 20, 5);
        let params =
            StereoParams { window: 5, max_disparity: 16, uniqueness_ratio: 0.0, lr_max_diff: 0.5, ..StereoParams::default() };
        let stop = AtomicBool::new(false);
        let disparity = match_stereo(&base, &compare, 40, 20, &params, &stop).unwrap();
        let mid = (10 * 40 + 20) as usize;
        assert!((disparity[mid] - 5.0).abs() < 1.0);
    }

    #[test]
    fn invalid_params_rejected_before_matching() {
        let (base, compare) = make_pair(16, 16, 2);
        let params = StereoParams { window: 4, ..StereoParams::default() };
        let stop = AtomicBool::new(false);
        let err = match_stereo(&base, &compare, 16, 16, &params, &stop).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameter);
    }

    #[test]
    fn cost_threshold_rejects_a_uniquely_best_but_poor_match() {
        // Two textured but mutually uncorrelated patterns: no disparity is
        // actually a good block match, so whatever candidate comes out
        // uniquely best must still be rejected on absolute cost alone.
        let width = 9u32;
        let height = 9u32;
        let mut base = vec![0u8; (width * height) as usize];
        let mut compare = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                let i = (y * width + x) as usize;
                base[i] = ((x * 53 + y * 17) % 256) as u8;
                compare[i] = ((x * 31 + y * 89 + 13) % 256) as u8;
            }
        }
        let half = 2;
        let (mid_x, mid_y) = (4u32, 4u32);
        let probe = StereoParams {
            window: 5,
            max_disparity: 4,
            uniqueness_ratio: 0.0,
            extended_matching: false,
            lr_max_diff: 1.0e6,
            max_cost: f32::MAX,
            ..StereoParams::default()
        };
        let (_, cost, _) = best_candidate(&base, &compare, width, height, mid_x, mid_y, half, &probe)
            .expect("a candidate exists within the valid search window at this pixel");
        let window_area = ((2 * half + 1) * (2 * half + 1)) as f32;
        let avg_cost = cost as f32 / window_area;
        assert!(avg_cost > 1.0, "fixture should produce a poor match, got avg_cost={avg_cost}");

        let stop = AtomicBool::new(false);
        let idx = (mid_y * width + mid_x) as usize;

        let permissive = StereoParams { max_cost: avg_cost + 1.0, ..probe };
        let disparity = match_stereo(&base, &compare, width, height, &permissive, &stop).unwrap();
        assert_ne!(disparity[idx], 0.0);

        let strict = StereoParams { max_cost: avg_cost - 1.0, ..probe };
        let disparity = match_stereo(&base, &compare, width, height, &strict, &stop).unwrap();
        assert_eq!(disparity[idx], 0.0);
    }

    #[test]
    fn cancellation_stops_early_without_panicking() {
        let (base, compare) = make_pair(32, 32, 3);
        let params = StereoParams::default();
        let stop = AtomicBool::new(true);
        let disparity = match_stereo(&base, &compare, 32, 32, &params, &stop).unwrap();
        assert_eq!(disparity.len(), (32 * 32) as usize);
    }
}
