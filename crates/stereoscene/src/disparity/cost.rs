//! Matching cost computation for the SGM engine.
//!
//! The raw images are pre-filtered with a horizontal Sobel response clamped
//! to `±pre_filter_cap`, then a per-pixel SAD cost is accumulated over a
//! `block_size × block_size` window for every candidate disparity.

use image::GrayImage;

/// Cost assigned when the matching window has no valid right-image support
/// (candidate disparity reaches past the left image border).
pub const OUT_OF_BOUNDS_COST: u16 = u16::MAX / 4;

/// Clamped horizontal-gradient image used as the matching signal.
///
/// Values are shifted into `[0, 2·cap]` so absolute differences stay in
/// `u16` range regardless of sign.
pub fn prefilter(img: &GrayImage, cap: i16) -> Vec<i16> {
    let grad = imageproc::gradients::horizontal_sobel(img);
    grad.pixels().map(|p| p[0].clamp(-cap, cap) + cap).collect()
}

#[inline]
fn sample(pf: &[i16], w: usize, h: usize, x: i64, y: i64) -> i32 {
    // Border replication, matching the reference matcher's edge handling.
    let x = x.clamp(0, w as i64 - 1) as usize;
    let y = y.clamp(0, h as i64 - 1) as usize;
    pf[y * w + x] as i32
}

/// Dense cost volume, indexed `(y·w + x)·num_disp + d`.
///
/// `d` is the offset from `min_disparity`; the candidate disparity for
/// slot `d` is `min_disparity + d`.
pub fn cost_volume(
    left_pf: &[i16],
    right_pf: &[i16],
    w: usize,
    h: usize,
    min_disparity: i32,
    num_disp: usize,
    block_size: usize,
) -> Vec<u16> {
    let half = (block_size / 2) as i64;
    let mut volume = vec![0u16; w * h * num_disp];
    // Per-disparity absolute-difference plane, box-filtered into the volume.
    let mut ad = vec![0u32; w * h];
    let mut col_sum = vec![0u32; w];

    for d in 0..num_disp {
        let disp = min_disparity + d as i32;

        for y in 0..h {
            for x in 0..w {
                let l = left_pf[y * w + x] as i32;
                let r = sample(right_pf, w, h, x as i64 - disp as i64, y as i64);
                ad[y * w + x] = (l - r).unsigned_abs();
            }
        }

        // Sliding box sum: column sums per row band, then horizontal sum.
        for y in 0..h {
            for (x, cs) in col_sum.iter_mut().enumerate() {
                let mut s = 0u32;
                for dy in -half..=half {
                    let yy = (y as i64 + dy).clamp(0, h as i64 - 1) as usize;
                    s += ad[yy * w + x];
                }
                *cs = s;
            }
            for x in 0..w {
                let mut s = 0u32;
                for dx in -half..=half {
                    let xx = (x as i64 + dx).clamp(0, w as i64 - 1) as usize;
                    s += col_sum[xx];
                }
                let idx = (y * w + x) * num_disp + d;
                // Window reaching past the left border has no real support.
                volume[idx] = if (x as i64 - disp as i64) < 0 {
                    OUT_OF_BOUNDS_COST
                } else {
                    s.min(OUT_OF_BOUNDS_COST as u32 - 1) as u16
                };
            }
        }
    }
    volume
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient_image(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 3) % 251) as u8]))
    }

    #[test]
    fn prefilter_respects_cap() {
        let img = gradient_image(16, 8);
        let pf = prefilter(&img, 63);
        assert_eq!(pf.len(), 16 * 8);
        assert!(pf.iter().all(|&v| (0..=126).contains(&v)));
    }

    #[test]
    fn zero_disparity_cost_is_zero_for_identical_images() {
        let img = gradient_image(12, 6);
        let pf = prefilter(&img, 63);
        let vol = cost_volume(&pf, &pf, 12, 6, 0, 16, 3);
        // At d=0 both windows see identical data.
        for y in 0..6 {
            for x in 0..12 {
                assert_eq!(vol[(y * 12 + x) * 16], 0, "at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn out_of_bounds_candidates_are_penalized() {
        let img = gradient_image(12, 6);
        let pf = prefilter(&img, 63);
        let vol = cost_volume(&pf, &pf, 12, 6, 0, 16, 3);
        // x=2 cannot match disparity 5.
        assert_eq!(vol[2 * 16 + 5], OUT_OF_BOUNDS_COST);
    }
}
