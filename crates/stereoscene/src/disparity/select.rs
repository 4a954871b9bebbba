//! Winner-take-all disparity selection with uniqueness, sub-pixel
//! refinement and left-right consistency checking.
//!
//! Sub-pixel offsets come from a parabolic fit through the aggregated
//! costs at `d-1, d, d+1`, quantized to 1/16 pixel to match the reference
//! matcher's fixed-point output.

/// Marker for pixels with no accepted match. Replaced by 0.0 in the
/// exposed [`DisparityMap`](super::DisparityMap).
pub const INVALID: f32 = -1.0;

/// Sub-pixel quantization denominator.
pub const SUBPIXEL_SCALE: f32 = 16.0;

/// Select per-pixel disparities from the aggregated cost volume.
///
/// Returns a row-major `w·h` buffer of fractional disparities (including
/// the `min_disparity` offset), with rejected pixels set to [`INVALID`].
pub fn select_disparity(
    sum: &[u32],
    w: usize,
    h: usize,
    num_disp: usize,
    min_disparity: i32,
    uniqueness_ratio: u32,
    disp12_max_diff: i32,
) -> Vec<f32> {
    let mut disp = vec![INVALID; w * h];
    // Integer winners kept for the consistency check.
    let mut best_int = vec![-1i32; w * h];
    // Right-view disparity computed from the same aggregated volume:
    // disp2[xr] = argmin_d S(xr + d, d).
    let mut disp2 = vec![-1i32; w];

    for y in 0..h {
        for x in 0..w {
            let s = &sum[(y * w + x) * num_disp..][..num_disp];
            let (best, &best_cost) = match s.iter().enumerate().min_by_key(|(_, &v)| v) {
                Some(b) => b,
                None => continue,
            };

            // Uniqueness: every non-adjacent candidate must be worse than
            // the winner by `uniqueness_ratio` percent.
            let unique = s.iter().enumerate().all(|(d, &c)| {
                (d as i32 - best as i32).abs() <= 1
                    || c as u64 * 100 >= best_cost as u64 * (100 + uniqueness_ratio) as u64
            });
            if !unique {
                continue;
            }

            best_int[y * w + x] = best as i32;

            // Parabolic sub-pixel refinement on interior winners.
            let mut value = (min_disparity + best as i32) as f32;
            if best > 0 && best + 1 < num_disp {
                let c_prev = s[best - 1] as f32;
                let c_next = s[best + 1] as f32;
                let denom = c_prev + c_next - 2.0 * best_cost as f32;
                if denom > f32::EPSILON {
                    let offset = ((c_prev - c_next) / (2.0 * denom)).clamp(-0.5, 0.5);
                    value += offset;
                }
            }
            disp[y * w + x] = (value * SUBPIXEL_SCALE).round() / SUBPIXEL_SCALE;
        }

        if disp12_max_diff >= 0 {
            consistency_check(
                sum,
                &mut disp,
                &mut best_int,
                &mut disp2,
                w,
                y,
                num_disp,
                min_disparity,
                disp12_max_diff,
            );
        }
    }
    disp
}

#[allow(clippy::too_many_arguments)]
fn consistency_check(
    sum: &[u32],
    disp: &mut [f32],
    best_int: &mut [i32],
    disp2: &mut [i32],
    w: usize,
    y: usize,
    num_disp: usize,
    min_disparity: i32,
    disp12_max_diff: i32,
) {
    disp2.fill(-1);
    let mut disp2_cost = vec![u32::MAX; w];
    for xr in 0..w {
        for d in 0..num_disp {
            let xl = xr as i64 + (min_disparity + d as i32) as i64;
            if xl < 0 || xl >= w as i64 {
                continue;
            }
            let c = sum[(y * w + xl as usize) * num_disp + d];
            if c < disp2_cost[xr] {
                disp2_cost[xr] = c;
                disp2[xr] = min_disparity + d as i32;
            }
        }
    }
    for x in 0..w {
        let d = best_int[y * w + x];
        if d < 0 {
            continue;
        }
        let d_abs = min_disparity + d;
        let xr = x as i64 - d_abs as i64;
        if xr < 0 || xr >= w as i64 {
            continue;
        }
        let reciprocal = disp2[xr as usize];
        if reciprocal >= 0 && (reciprocal - d_abs).abs() > disp12_max_diff {
            disp[y * w + x] = INVALID;
            best_int[y * w + x] = -1;
        }
    }
}
