//! Disparity → metric depth conversion and depth statistics.
//!
//! Depth follows the rectified-stereo relation `Z = fx·baseline/d`. A
//! pixel is valid only when its disparity exceeds a small threshold and
//! the resulting depth lies inside `[min_depth, max_depth]`; everything
//! else is exposed as exactly 0.0.

use crate::disparity::DisparityMap;
use serde::{Deserialize, Serialize};

/// Disparities at or below this value are treated as unmatched.
const MIN_VALID_DISPARITY: f32 = 0.1;

/// Default near validity bound (meters).
pub const DEFAULT_MIN_DEPTH: f32 = 0.5;
/// Default far validity bound (meters).
pub const DEFAULT_MAX_DEPTH: f32 = 50.0;

/// Dense metric depth field. 0.0 denotes invalid / out of range.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DepthMap {
    /// Convert a disparity map given the left focal length (pixels) and
    /// stereo baseline (meters).
    ///
    /// Depths outside `[min_depth, max_depth]` are reset to 0, not
    /// clamped: an out-of-range measurement carries no usable signal.
    pub fn from_disparity(
        disparity: &DisparityMap,
        fx: f64,
        baseline: f64,
        min_depth: f32,
        max_depth: f32,
    ) -> Self {
        let fb = (fx * baseline) as f32;
        let data = disparity
            .as_slice()
            .iter()
            .map(|&d| {
                if d <= MIN_VALID_DISPARITY {
                    return 0.0;
                }
                let z = fb / d;
                if z < min_depth || z > max_depth {
                    0.0
                } else {
                    z
                }
            })
            .collect();
        Self {
            width: disparity.width(),
            height: disparity.height(),
            data,
        }
    }

    /// Wrap a row-major buffer. Panics if the length does not match.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), (width * height) as usize);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Summary statistics over the valid (strictly positive) depth pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthStats {
    pub valid_pixels: usize,
    pub total_pixels: usize,
    /// Percentage of valid pixels, in [0, 100].
    pub valid_percentage: f64,
    pub min_depth: f64,
    pub max_depth: f64,
    pub mean_depth: f64,
    pub median_depth: f64,
}

impl DepthStats {
    /// All numeric fields are 0 when the map holds no valid pixel.
    pub fn compute(depth: &DepthMap) -> Self {
        let total_pixels = depth.as_slice().len();
        let mut valid: Vec<f32> = depth.as_slice().iter().copied().filter(|&z| z > 0.0).collect();
        if valid.is_empty() {
            return Self {
                valid_pixels: 0,
                total_pixels,
                valid_percentage: 0.0,
                min_depth: 0.0,
                max_depth: 0.0,
                mean_depth: 0.0,
                median_depth: 0.0,
            };
        }
        valid.sort_by(|a, b| a.total_cmp(b));
        let n = valid.len();
        let median = if n % 2 == 1 {
            valid[n / 2] as f64
        } else {
            (valid[n / 2 - 1] as f64 + valid[n / 2] as f64) / 2.0
        };
        let sum: f64 = valid.iter().map(|&z| z as f64).sum();
        Self {
            valid_pixels: n,
            total_pixels,
            valid_percentage: 100.0 * n as f64 / total_pixels as f64,
            min_depth: valid[0] as f64,
            max_depth: valid[n - 1] as f64,
            mean_depth: sum / n as f64,
            median_depth: median,
        }
    }
}
