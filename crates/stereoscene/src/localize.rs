//! Fusion of 2D detections with the depth field into 3D object estimates.
//!
//! Detections come from an external detector and are treated as opaque
//! input. For each box a representative depth is resolved from the depth
//! map, the box center is back-projected through the pinhole model of the
//! left camera, and detections without any valid depth are skipped rather
//! than emitted with sentinel values.

use crate::calib::StereoCalib;
use crate::depth::DepthMap;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A 2D detection supplied by the external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection2D {
    /// Box corners `[x1, y1, x2, y2]` in pixels, x1 < x2 and y1 < y2.
    pub bbox: [f32; 4],
    pub class_id: u32,
    pub class_name: String,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

/// How a representative depth is extracted from a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthMethod {
    /// Depth at the integer-rounded box center pixel.
    Center,
    /// Median over all valid pixels in the box (robust to outliers).
    #[default]
    Median,
    /// Mean over all valid pixels in the box.
    Mean,
}

/// An object with a resolved metric 3D position in the left-camera frame.
///
/// Axes: X right-positive, Y down-positive, Z forward-positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedObject3D {
    pub class_name: String,
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: [f32; 4],
    /// Representative depth (meters).
    pub depth: f32,
    /// Position `[X, Y, Z]` (meters).
    pub position: [f64; 3],
    /// Euclidean distance from the camera center (meters).
    pub distance: f64,
}

/// Resolve a representative depth for a box, or `None` when the crop holds
/// no valid depth.
pub fn object_depth(bbox: [f32; 4], depth: &DepthMap, method: DepthMethod) -> Option<f32> {
    let x1 = (bbox[0].max(0.0) as u32).min(depth.width());
    let y1 = (bbox[1].max(0.0) as u32).min(depth.height());
    let x2 = (bbox[2].max(0.0) as u32).min(depth.width());
    let y2 = (bbox[3].max(0.0) as u32).min(depth.height());

    match method {
        DepthMethod::Center => {
            let cx = ((bbox[0] + bbox[2]) / 2.0).round() as i64;
            let cy = ((bbox[1] + bbox[3]) / 2.0).round() as i64;
            if cx < 0 || cy < 0 || cx >= depth.width() as i64 || cy >= depth.height() as i64 {
                return None;
            }
            let z = depth.get(cx as u32, cy as u32);
            (z > 0.0).then_some(z)
        }
        DepthMethod::Median | DepthMethod::Mean => {
            let mut valid: Vec<f32> = Vec::new();
            for y in y1..y2 {
                for x in x1..x2 {
                    let z = depth.get(x, y);
                    if z > 0.0 {
                        valid.push(z);
                    }
                }
            }
            if valid.is_empty() {
                return None;
            }
            match method {
                DepthMethod::Mean => {
                    Some(valid.iter().sum::<f32>() / valid.len() as f32)
                }
                _ => {
                    valid.sort_by(|a, b| a.total_cmp(b));
                    let n = valid.len();
                    if n % 2 == 1 {
                        Some(valid[n / 2])
                    } else {
                        Some((valid[n / 2 - 1] + valid[n / 2]) / 2.0)
                    }
                }
            }
        }
    }
}

/// Pinhole back-projection of a pixel with known depth.
pub fn pixel_to_3d(u: f64, v: f64, depth: f64, fx: f64, fy: f64, cx: f64, cy: f64) -> [f64; 3] {
    let x = (u - cx) * depth / fx;
    let y = (v - cy) * depth / fy;
    [x, y, depth]
}

/// Localize detections in 3D using the left-camera intrinsics.
///
/// Detections whose box yields no valid depth are dropped; the output
/// preserves the input order of the survivors.
pub fn localize(
    detections: &[Detection2D],
    depth: &DepthMap,
    calib: &StereoCalib,
    method: DepthMethod,
) -> Vec<LocalizedObject3D> {
    let cam = &calib.left;
    let mut objects = Vec::with_capacity(detections.len());

    for det in detections {
        let z = match object_depth(det.bbox, depth, method) {
            Some(z) if z > 0.0 => z,
            _ => continue,
        };
        let u = f64::from(det.bbox[0] + det.bbox[2]) / 2.0;
        let v = f64::from(det.bbox[1] + det.bbox[3]) / 2.0;
        let position = pixel_to_3d(u, v, f64::from(z), cam.fx, cam.fy, cam.cx, cam.cy);
        let distance = Vector3::from(position).norm();
        objects.push(LocalizedObject3D {
            class_name: det.class_name.clone(),
            class_id: det.class_id,
            confidence: det.confidence,
            bbox: det.bbox,
            depth: z,
            position,
            distance,
        });
    }
    objects
}
