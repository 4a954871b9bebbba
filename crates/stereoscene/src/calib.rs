//! Stereo calibration parsing, extraction and persistence.
//!
//! Provides:
//! - Line-oriented `key: v1 v2 ...` raw calibration parsing (KITTI
//!   `calib_cam_to_cam.txt` convention, cameras 02/03).
//! - Extraction of rectified stereo parameters (K, D, R_rect, P_rect,
//!   focal lengths, principal point, baseline).
//! - Lossless JSON round trip for the extracted parameters.

use nalgebra::{Matrix3, Matrix3x4};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors raised while parsing, extracting or persisting calibration data.
#[derive(Debug)]
pub enum CalibError {
    /// A raw calibration line has no `key: values` structure.
    Parse { line: usize, content: String },
    /// An expected key is absent from the raw calibration map.
    MissingKey(String),
    /// A value vector cannot be reshaped to its expected dimensions.
    Shape {
        key: String,
        expected: usize,
        got: usize,
    },
    /// The derived rig geometry is unusable (non-positive focal or baseline).
    InvalidRig(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for CalibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse { line, content } => {
                write!(f, "malformed calibration line {}: {:?}", line, content)
            }
            Self::MissingKey(key) => write!(f, "missing calibration key: {}", key),
            Self::Shape { key, expected, got } => {
                write!(f, "key {}: expected {} values, got {}", key, expected, got)
            }
            Self::InvalidRig(msg) => write!(f, "invalid stereo rig: {}", msg),
            Self::Io(e) => write!(f, "calibration io error: {}", e),
            Self::Json(e) => write!(f, "calibration serialization error: {}", e),
        }
    }
}

impl std::error::Error for CalibError {}

impl From<std::io::Error> for CalibError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for CalibError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

// ── Raw calibration map ────────────────────────────────────────────────────

/// A single raw calibration value.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Scalar(f64),
    Vector(Vec<f64>),
    Text(String),
}

/// Raw key → value map parsed from a calibration text source.
#[derive(Debug, Clone, Default)]
pub struct RawCalib {
    entries: HashMap<String, RawValue>,
}

impl RawCalib {
    /// Parse a line-oriented `key: v1 v2 ...` calibration text.
    ///
    /// Multi-value lines become numeric vectors, single numeric values
    /// become scalars and single non-numeric values are kept as text.
    /// Only structurally malformed lines (no `:` separator) fail; absence
    /// of an expected key is reported later, at extraction time.
    pub fn parse(text: &str) -> Result<Self, CalibError> {
        let mut entries = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, rest) = line.split_once(':').ok_or_else(|| CalibError::Parse {
                line: idx + 1,
                content: line.to_string(),
            })?;
            let values: Vec<&str> = rest.split_whitespace().collect();
            let value = match values.len() {
                0 => continue,
                1 => match values[0].parse::<f64>() {
                    Ok(v) => RawValue::Scalar(v),
                    Err(_) => RawValue::Text(values[0].to_string()),
                },
                _ => {
                    let parsed: Result<Vec<f64>, _> =
                        values.iter().map(|v| v.parse::<f64>()).collect();
                    match parsed {
                        Ok(v) => RawValue::Vector(v),
                        Err(_) => RawValue::Text(rest.trim().to_string()),
                    }
                }
            };
            entries.insert(key.trim().to_string(), value);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn vector(&self, key: &str) -> Result<&[f64], CalibError> {
        match self.entries.get(key) {
            Some(RawValue::Vector(v)) => Ok(v),
            Some(RawValue::Scalar(_)) | Some(RawValue::Text(_)) | None => {
                Err(CalibError::MissingKey(key.to_string()))
            }
        }
    }
}

// ── Extracted stereo parameters ────────────────────────────────────────────

/// Calibration of one rectified camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalib {
    /// Intrinsic matrix, row-major 3×3.
    pub k: [[f64; 3]; 3],
    /// Distortion coefficients (length depends on the source model).
    pub d: Vec<f64>,
    /// Rectification rotation, row-major 3×3.
    pub r_rect: [[f64; 3]; 3],
    /// Rectified projection, row-major 3×4.
    pub p_rect: [[f64; 4]; 3],
    /// Focal length x (pixels).
    pub fx: f64,
    /// Focal length y (pixels).
    pub fy: f64,
    /// Principal point x (pixels).
    pub cx: f64,
    /// Principal point y (pixels).
    pub cy: f64,
}

impl CameraCalib {
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|r, c| self.k[r][c])
    }

    pub fn r_rect_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|r, c| self.r_rect[r][c])
    }

    pub fn p_rect_matrix(&self) -> Matrix3x4<f64> {
        Matrix3x4::from_fn(|r, c| self.p_rect[r][c])
    }
}

/// Full rectified stereo rig calibration.
///
/// Immutable once constructed; the left camera is the coordinate origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoCalib {
    pub left: CameraCalib,
    pub right: CameraCalib,
    /// Distance between camera centers (meters).
    pub baseline: f64,
    /// Rectified image size [width, height] in pixels.
    pub image_size: [u32; 2],
}

/// KITTI color-camera resolution, used when the raw source carries no size.
const DEFAULT_IMAGE_SIZE: [u32; 2] = [1242, 375];

fn reshape3x3(raw: &RawCalib, key: &str) -> Result<[[f64; 3]; 3], CalibError> {
    let v = raw.vector(key)?;
    if v.len() != 9 {
        return Err(CalibError::Shape {
            key: key.to_string(),
            expected: 9,
            got: v.len(),
        });
    }
    let mut m = [[0.0; 3]; 3];
    for r in 0..3 {
        m[r].copy_from_slice(&v[r * 3..r * 3 + 3]);
    }
    Ok(m)
}

fn reshape3x4(raw: &RawCalib, key: &str) -> Result<[[f64; 4]; 3], CalibError> {
    let v = raw.vector(key)?;
    if v.len() != 12 {
        return Err(CalibError::Shape {
            key: key.to_string(),
            expected: 12,
            got: v.len(),
        });
    }
    let mut m = [[0.0; 4]; 3];
    for r in 0..3 {
        m[r].copy_from_slice(&v[r * 4..r * 4 + 4]);
    }
    Ok(m)
}

fn extract_camera(raw: &RawCalib, suffix: &str) -> Result<CameraCalib, CalibError> {
    let k = reshape3x3(raw, &format!("K_{}", suffix))?;
    let d = raw.vector(&format!("D_{}", suffix))?.to_vec();
    let r_rect = reshape3x3(raw, &format!("R_rect_{}", suffix))?;
    let p_rect = reshape3x4(raw, &format!("P_rect_{}", suffix))?;
    Ok(CameraCalib {
        fx: k[0][0],
        fy: k[1][1],
        cx: k[0][2],
        cy: k[1][2],
        k,
        d,
        r_rect,
        p_rect,
    })
}

impl StereoCalib {
    /// Extract rectified stereo parameters from a raw calibration map.
    ///
    /// Uses the KITTI camera naming (`02` = left color, `03` = right
    /// color). The baseline is derived from the rectified projections as
    /// `-P_rect_03[0,3] / P_rect_02[0,0]`, which assumes the left camera
    /// is the coordinate origin and the right projection encodes
    /// `-fx·baseline` in its first row, fourth column.
    pub fn from_raw(raw: &RawCalib) -> Result<Self, CalibError> {
        let left = extract_camera(raw, "02")?;
        let right = extract_camera(raw, "03")?;
        let baseline = -right.p_rect[0][3] / left.p_rect[0][0];
        let calib = Self {
            left,
            right,
            baseline,
            image_size: DEFAULT_IMAGE_SIZE,
        };
        calib.validate()?;
        Ok(calib)
    }

    /// Check the derived rig geometry.
    ///
    /// A negative or non-finite baseline indicates a calibration source
    /// that does not follow the rectified left-origin convention.
    pub fn validate(&self) -> Result<(), CalibError> {
        if !(self.left.fx > 0.0 && self.left.fy > 0.0) {
            return Err(CalibError::InvalidRig(format!(
                "left focal lengths must be positive, got fx={} fy={}",
                self.left.fx, self.left.fy
            )));
        }
        if !(self.baseline > 0.0 && self.baseline.is_finite()) {
            return Err(CalibError::InvalidRig(format!(
                "baseline must be positive and finite, got {}",
                self.baseline
            )));
        }
        Ok(())
    }

    /// Save the parameters as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), CalibError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load parameters previously written by [`StereoCalib::save`].
    pub fn load(path: &Path) -> Result<Self, CalibError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
