//! Dense disparity estimation via semi-global matching.
//!
//! The pipeline stages are:
//!
//! 1. **Prefilter** – horizontal Sobel response clamped to `±pre_filter_cap`.
//! 2. **Cost** – block SAD over the clamped gradient, per candidate disparity.
//! 3. **Aggregate** – 8-direction dynamic-programming sweep with P1/P2
//!    smoothness penalties.
//! 4. **Select** – winner-take-all with uniqueness margin, 1/16-px sub-pixel
//!    refinement and left-right consistency check.
//! 5. **Speckle** – removal of small connected disparity regions.
//!
//! Invalid pixels are exposed as 0.0 in the resulting [`DisparityMap`].

mod aggregate;
mod cost;
mod select;
mod speckle;

use image::GrayImage;
use serde::{Deserialize, Serialize};

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SgmError {
    /// Configuration violates a matcher constraint.
    InvalidConfig(String),
    /// Left/right image dimensions differ.
    ShapeMismatch {
        left: (u32, u32),
        right: (u32, u32),
    },
}

impl std::fmt::Display for SgmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid matcher config: {}", msg),
            Self::ShapeMismatch { left, right } => write!(
                f,
                "stereo pair dimensions differ: left {}x{}, right {}x{}",
                left.0, left.1, right.0, right.1
            ),
        }
    }
}

impl std::error::Error for SgmError {}

// ── Configuration ──────────────────────────────────────────────────────────

/// Channel count assumed by the P1/P2 derivation. The reference tuning
/// uses 3 even for grayscale inputs; kept for numeric parity.
const PENALTY_CHANNELS: u32 = 3;

/// Semi-global matcher configuration.
///
/// Defaults reproduce the reference tuning for rectified road scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgmConfig {
    /// Smallest candidate disparity (pixels).
    pub min_disparity: i32,
    /// Number of candidate disparities; positive multiple of 16.
    pub num_disparities: usize,
    /// Matching window side; odd, in 3..=11.
    pub block_size: usize,
    /// Maximum left-right disparity difference; negative disables the check.
    pub disp12_max_diff: i32,
    /// Percent margin by which the best cost must beat non-adjacent rivals.
    pub uniqueness_ratio: u32,
    /// Minimum connected-region size kept by the speckle filter (0 disables).
    pub speckle_window_size: usize,
    /// Maximum disparity step within a speckle component.
    pub speckle_range: f32,
    /// Truncation bound for the prefiltered gradient.
    pub pre_filter_cap: i16,
}

impl Default for SgmConfig {
    fn default() -> Self {
        Self {
            min_disparity: 0,
            num_disparities: 128,
            block_size: 5,
            disp12_max_diff: 1,
            uniqueness_ratio: 10,
            speckle_window_size: 100,
            speckle_range: 32.0,
            pre_filter_cap: 63,
        }
    }
}

impl SgmConfig {
    /// Small-disparity-step smoothness penalty: `8·3·block_size²`.
    pub fn p1(&self) -> u32 {
        8 * PENALTY_CHANNELS * (self.block_size * self.block_size) as u32
    }

    /// Large-disparity-step smoothness penalty: `32·3·block_size²`.
    pub fn p2(&self) -> u32 {
        32 * PENALTY_CHANNELS * (self.block_size * self.block_size) as u32
    }

    fn validate(&self) -> Result<(), SgmError> {
        if self.num_disparities == 0 || self.num_disparities % 16 != 0 {
            return Err(SgmError::InvalidConfig(format!(
                "num_disparities must be a positive multiple of 16, got {}",
                self.num_disparities
            )));
        }
        if self.block_size % 2 == 0 || !(3..=11).contains(&self.block_size) {
            return Err(SgmError::InvalidConfig(format!(
                "block_size must be odd and within 3..=11, got {}",
                self.block_size
            )));
        }
        if self.pre_filter_cap <= 0 {
            return Err(SgmError::InvalidConfig(format!(
                "pre_filter_cap must be positive, got {}",
                self.pre_filter_cap
            )));
        }
        Ok(())
    }
}

// ── Disparity map ──────────────────────────────────────────────────────────

/// Dense sub-pixel disparity field. 0.0 denotes "no match".
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DisparityMap {
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

    /// Fraction of pixels with a valid (positive) disparity.
    pub fn valid_fraction(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let valid = self.data.iter().filter(|&&d| d > 0.0).count();
        valid as f32 / self.data.len() as f32
    }
}

// ── Matcher ────────────────────────────────────────────────────────────────

/// Semi-global stereo matcher. Create once, compute on many frames.
#[derive(Debug, Clone)]
pub struct SgmMatcher {
    config: SgmConfig,
}

impl SgmMatcher {
    pub fn new(config: SgmConfig) -> Result<Self, SgmError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SgmConfig {
        &self.config
    }

    /// Compute a dense disparity map for a rectified grayscale pair.
    pub fn compute(&self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap, SgmError> {
        if left.dimensions() != right.dimensions() {
            return Err(SgmError::ShapeMismatch {
                left: left.dimensions(),
                right: right.dimensions(),
            });
        }
        let (w, h) = left.dimensions();
        let (w, h) = (w as usize, h as usize);
        let cfg = &self.config;

        let left_pf = cost::prefilter(left, cfg.pre_filter_cap);
        let right_pf = cost::prefilter(right, cfg.pre_filter_cap);

        let volume = cost::cost_volume(
            &left_pf,
            &right_pf,
            w,
            h,
            cfg.min_disparity,
            cfg.num_disparities,
            cfg.block_size,
        );
        let sum = aggregate::aggregate(&volume, w, h, cfg.num_disparities, cfg.p1(), cfg.p2());
        let mut disp = select::select_disparity(
            &sum,
            w,
            h,
            cfg.num_disparities,
            cfg.min_disparity,
            cfg.uniqueness_ratio,
            cfg.disp12_max_diff,
        );
        speckle::speckle_filter(
            &mut disp,
            w,
            h,
            cfg.speckle_window_size,
            cfg.speckle_range,
        );

        // Expose invalid and negative values as 0.0.
        for d in &mut disp {
            if *d < 0.0 {
                *d = 0.0;
            }
        }
        Ok(DisparityMap::from_raw(w as u32, h as u32, disp))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Textured left image and a copy shifted right-to-left by `shift` px.
    fn synthetic_pair(w: u32, h: u32, shift: u32, seed: u64) -> (GrayImage, GrayImage) {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise: Vec<u8> = (0..(w + shift) * h).map(|_| rng.gen()).collect();
        // A feature at left x appears at right x - shift.
        let left = GrayImage::from_fn(w, h, |x, y| Luma([noise[(y * (w + shift) + x) as usize]]));
        let right =
            GrayImage::from_fn(w, h, |x, y| Luma([noise[(y * (w + shift) + x + shift) as usize]]));
        (left, right)
    }

    fn test_config() -> SgmConfig {
        SgmConfig {
            num_disparities: 16,
            speckle_window_size: 0,
            ..SgmConfig::default()
        }
    }

    #[test]
    fn rejects_bad_num_disparities() {
        let cfg = SgmConfig {
            num_disparities: 100,
            ..SgmConfig::default()
        };
        assert!(matches!(
            SgmMatcher::new(cfg),
            Err(SgmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_even_block_size() {
        let cfg = SgmConfig {
            block_size: 4,
            ..SgmConfig::default()
        };
        assert!(matches!(
            SgmMatcher::new(cfg),
            Err(SgmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn penalties_follow_block_size() {
        let cfg = SgmConfig::default();
        assert_eq!(cfg.p1(), 8 * 3 * 25);
        assert_eq!(cfg.p2(), 32 * 3 * 25);
    }

    #[test]
    fn mismatched_dimensions_error() {
        let matcher = SgmMatcher::new(test_config()).unwrap();
        let left = GrayImage::new(32, 16);
        let right = GrayImage::new(32, 17);
        assert!(matches!(
            matcher.compute(&left, &right),
            Err(SgmError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn recovers_constant_shift_on_textured_scene() {
        let shift = 6u32;
        let (left, right) = synthetic_pair(64, 24, shift, 7);
        let matcher = SgmMatcher::new(test_config()).unwrap();
        let disp = matcher.compute(&left, &right).unwrap();

        // Central region away from borders: most valid pixels should land
        // within one pixel of the true shift.
        let mut hits = 0usize;
        let mut valid = 0usize;
        for y in 4..20 {
            for x in 24..56 {
                let d = disp.get(x, y);
                if d > 0.0 {
                    valid += 1;
                    if (d - shift as f32).abs() <= 1.0 {
                        hits += 1;
                    }
                }
            }
        }
        assert!(valid > 100, "expected dense output, got {} valid", valid);
        assert!(
            hits as f32 / valid as f32 > 0.8,
            "only {}/{} pixels near true shift",
            hits,
            valid
        );
    }

    #[test]
    fn output_is_nonnegative_and_in_range() {
        let (left, right) = synthetic_pair(48, 16, 3, 11);
        let matcher = SgmMatcher::new(test_config()).unwrap();
        let disp = matcher.compute(&left, &right).unwrap();
        let max = (test_config().min_disparity + test_config().num_disparities as i32) as f32;
        for &d in disp.as_slice() {
            assert!((0.0..max).contains(&d), "disparity {} out of range", d);
        }
    }

    #[test]
    fn valid_fraction_counts_positive_pixels() {
        let map = DisparityMap::from_raw(2, 2, vec![0.0, 1.0, 2.0, 0.0]);
        assert_eq!(map.valid_fraction(), 0.5);
    }
}
