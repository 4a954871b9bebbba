//! Directional cost aggregation (the "semi-global" part of SGM).
//!
//! Matching costs are swept along 8 scan directions with the classic
//! dynamic-programming recurrence: a step of ±1 disparity between
//! neighboring pixels costs `p1`, any larger jump costs `p2`, and the
//! previous pixel's minimum is subtracted to keep path costs bounded.

/// All 8 aggregation directions as (dx, dy) steps.
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (-1, 1),
    (1, -1),
    (-1, -1),
];

/// Sum of per-direction aggregated costs, indexed like the cost volume.
pub fn aggregate(cost: &[u16], w: usize, h: usize, num_disp: usize, p1: u32, p2: u32) -> Vec<u32> {
    let mut sum = vec![0u32; cost.len()];
    let mut lr = vec![0u16; cost.len()];

    for &(dx, dy) in &DIRECTIONS {
        sweep_direction(cost, &mut lr, &mut sum, w, h, num_disp, p1, p2, dx, dy);
    }
    sum
}

#[allow(clippy::too_many_arguments)]
fn sweep_direction(
    cost: &[u16],
    lr: &mut [u16],
    sum: &mut [u32],
    w: usize,
    h: usize,
    num_disp: usize,
    p1: u32,
    p2: u32,
    dx: i32,
    dy: i32,
) {
    // Traverse so that the predecessor (x-dx, y-dy) is already swept.
    let ys: Vec<usize> = if dy >= 0 {
        (0..h).collect()
    } else {
        (0..h).rev().collect()
    };
    let xs: Vec<usize> = if dx >= 0 {
        (0..w).collect()
    } else {
        (0..w).rev().collect()
    };

    for &y in &ys {
        for &x in &xs {
            let idx = (y * w + x) * num_disp;
            let px = x as i32 - dx;
            let py = y as i32 - dy;
            let inside = px >= 0 && py >= 0 && (px as usize) < w && (py as usize) < h;

            if !inside {
                // Path starts here: aggregated cost equals the raw cost.
                for d in 0..num_disp {
                    lr[idx + d] = cost[idx + d];
                    sum[idx + d] += cost[idx + d] as u32;
                }
                continue;
            }

            let prev: Vec<u16> =
                lr[(py as usize * w + px as usize) * num_disp..][..num_disp].to_vec();
            let min_prev = prev.iter().copied().min().unwrap_or(0) as u32;

            for d in 0..num_disp {
                let same = prev[d] as u32;
                let step_down = if d > 0 { prev[d - 1] as u32 + p1 } else { u32::MAX };
                let step_up = if d + 1 < num_disp {
                    prev[d + 1] as u32 + p1
                } else {
                    u32::MAX
                };
                let jump = min_prev + p2;
                let best = same.min(step_down).min(step_up).min(jump);
                let val = cost[idx + d] as u32 + best - min_prev;
                let val = val.min(u16::MAX as u32) as u16;
                lr[idx + d] = val;
                sum[idx + d] += val as u32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_preserves_unanimous_minimum() {
        // A volume where disparity 3 is free and everything else is
        // expensive: aggregation must keep 3 as the per-pixel minimum.
        let (w, h, nd) = (8, 4, 8);
        let mut cost = vec![100u16; w * h * nd];
        for p in 0..w * h {
            cost[p * nd + 3] = 0;
        }
        let sum = aggregate(&cost, w, h, nd, 8, 32);
        for p in 0..w * h {
            let s = &sum[p * nd..(p + 1) * nd];
            let best = s
                .iter()
                .enumerate()
                .min_by_key(|(_, &v)| v)
                .map(|(d, _)| d)
                .unwrap();
            assert_eq!(best, 3);
        }
    }

    #[test]
    fn smoothness_penalty_dampens_isolated_flips() {
        // One pixel prefers disparity 6 by a tiny margin while all its
        // neighbors strongly prefer 2; with a large p2 the path costs
        // pull the outlier toward the neighborhood consensus.
        let (w, h, nd) = (9, 1, 8);
        let mut cost = vec![50u16; w * h * nd];
        for x in 0..w {
            cost[(x * nd) + 2] = 0;
        }
        let mid = 4;
        cost[(mid * nd) + 2] = 10;
        cost[(mid * nd) + 6] = 8;

        let sum = aggregate(&cost, w, h, nd, 8, 1000);
        let s = &sum[mid * nd..(mid + 1) * nd];
        assert!(s[2] < s[6], "smoothness should override a 2-unit local win");
    }
}
