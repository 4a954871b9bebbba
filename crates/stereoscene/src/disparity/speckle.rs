//! Speckle filtering: removal of small connected disparity regions.
//!
//! Pixels join a component when the disparity step to a 4-neighbor stays
//! within `max_diff`; components smaller than `min_region_size` are likely
//! mismatches and are invalidated.

use super::select::INVALID;

pub fn speckle_filter(disp: &mut [f32], w: usize, h: usize, min_region_size: usize, max_diff: f32) {
    if min_region_size == 0 {
        return;
    }
    let mut label = vec![0u32; w * h];
    let mut region: Vec<usize> = Vec::with_capacity(min_region_size * 2);
    let mut stack: Vec<usize> = Vec::new();
    let mut next_label = 0u32;

    for start in 0..w * h {
        if label[start] != 0 || disp[start] == INVALID {
            continue;
        }
        next_label += 1;
        region.clear();
        stack.clear();
        stack.push(start);
        label[start] = next_label;

        while let Some(idx) = stack.pop() {
            region.push(idx);
            let (x, y) = (idx % w, idx / w);
            let d = disp[idx];

            let mut visit = |nidx: usize| {
                if label[nidx] == 0
                    && disp[nidx] != INVALID
                    && (disp[nidx] - d).abs() <= max_diff
                {
                    label[nidx] = next_label;
                    stack.push(nidx);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        if region.len() < min_region_size {
            for &idx in &region {
                disp[idx] = INVALID;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_regions_are_removed_large_ones_kept() {
        let (w, h) = (10, 10);
        let mut disp = vec![INVALID; w * h];
        // 4×4 plateau at disparity 20 (16 px) and an isolated 2-px speckle.
        for y in 2..6 {
            for x in 2..6 {
                disp[y * w + x] = 20.0;
            }
        }
        disp[8 * w + 8] = 5.0;
        disp[8 * w + 9] = 5.0;

        speckle_filter(&mut disp, w, h, 10, 1.0);

        assert_eq!(disp[3 * w + 3], 20.0);
        assert_eq!(disp[8 * w + 8], INVALID);
        assert_eq!(disp[8 * w + 9], INVALID);
    }

    #[test]
    fn large_steps_split_components() {
        let (w, h) = (8, 1);
        let mut disp = vec![INVALID; w * h];
        // Two 4-px runs separated by a 10-px disparity jump; with a
        // region threshold of 5 neither half survives on its own.
        for x in 0..4 {
            disp[x] = 10.0;
        }
        for x in 4..8 {
            disp[x] = 20.0;
        }
        speckle_filter(&mut disp, w, h, 5, 2.0);
        assert!(disp.iter().all(|&d| d == INVALID));
    }

    #[test]
    fn zero_window_disables_filtering() {
        let mut disp = vec![3.0f32; 4];
        speckle_filter(&mut disp, 2, 2, 0, 1.0);
        assert_eq!(disp, vec![3.0; 4]);
    }
}
