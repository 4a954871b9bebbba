//! Shared test utilities.
//!
//! Consolidated here to avoid per-module copies of the synthetic rig and
//! textured stereo pair builders used across the unit tests.

use crate::calib::{CameraCalib, StereoCalib};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Minimal identity-rectified rig with the given left intrinsics and a
/// 0.5 m baseline.
pub(crate) fn test_calib(fx: f64, fy: f64, cx: f64, cy: f64) -> StereoCalib {
    let cam = CameraCalib {
        k: [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]],
        d: vec![0.0; 5],
        r_rect: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        p_rect: [
            [fx, 0.0, cx, 0.0],
            [0.0, fy, cy, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
        fx,
        fy,
        cx,
        cy,
    };
    StereoCalib {
        left: cam.clone(),
        right: cam,
        baseline: 0.5,
        image_size: [16, 16],
    }
}

/// Random-texture color pair where a feature at left x appears at right
/// x - shift, i.e. the true disparity is `shift` everywhere.
pub(crate) fn textured_pair(w: u32, h: u32, shift: u32, seed: u64) -> (RgbImage, RgbImage) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise: Vec<u8> = (0..(w + shift) * h).map(|_| rng.gen()).collect();
    let left = RgbImage::from_fn(w, h, |x, y| {
        let v = noise[(y * (w + shift) + x) as usize];
        Rgb([v, v, v])
    });
    let right = RgbImage::from_fn(w, h, |x, y| {
        let v = noise[(y * (w + shift) + x + shift) as usize];
        Rgb([v, v, v])
    });
    (left, right)
}
