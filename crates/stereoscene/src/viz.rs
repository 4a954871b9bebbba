//! Visualization helpers: disparity/depth normalization, colorization and
//! detection overlay drawing.
//!
//! These produce inspection artifacts only; nothing here feeds back into
//! the perception results.

use crate::depth::DepthMap;
use crate::disparity::DisparityMap;
use crate::localize::LocalizedObject3D;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Stretch valid disparities to 0–255; invalid pixels stay 0.
pub fn normalize_disparity(disp: &DisparityMap) -> GrayImage {
    let (lo, hi) = valid_range(disp.as_slice());
    let span = (hi - lo).max(f32::EPSILON);
    GrayImage::from_fn(disp.width(), disp.height(), |x, y| {
        let d = disp.get(x, y);
        if d > 0.0 {
            Luma([((d - lo) / span * 255.0) as u8])
        } else {
            Luma([0])
        }
    })
}

/// Map depth to brightness with near = bright; invalid pixels stay 0.
pub fn normalize_depth(depth: &DepthMap, max_display_depth: f32) -> GrayImage {
    GrayImage::from_fn(depth.width(), depth.height(), |x, y| {
        let z = depth.get(x, y);
        if z > 0.0 {
            let clipped = z.min(max_display_depth);
            Luma([(255.0 - clipped / max_display_depth * 255.0) as u8])
        } else {
            Luma([0])
        }
    })
}

/// Jet-style blue→cyan→yellow→red ramp over a normalized image.
pub fn colorize(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0] as f32 / 255.0;
        let r = ((1.5 - (4.0 * v - 3.0).abs()).clamp(0.0, 1.0) * 255.0) as u8;
        let g = ((1.5 - (4.0 * v - 2.0).abs()).clamp(0.0, 1.0) * 255.0) as u8;
        let b = ((1.5 - (4.0 * v - 1.0).abs()).clamp(0.0, 1.0) * 255.0) as u8;
        Rgb([r, g, b])
    })
}

/// Draw hollow bounding boxes of localized objects onto a copy of the
/// frame. Nearer objects get warmer box colors; no text labels are
/// rendered, class and distance live in the JSON report.
pub fn annotate(frame: &RgbImage, objects: &[LocalizedObject3D]) -> RgbImage {
    let mut out = frame.clone();
    for obj in objects {
        let x = obj.bbox[0].max(0.0) as i32;
        let y = obj.bbox[1].max(0.0) as i32;
        let w = (obj.bbox[2] - obj.bbox[0]).max(1.0) as u32;
        let h = (obj.bbox[3] - obj.bbox[1]).max(1.0) as u32;
        let near = (1.0 - (obj.distance / 50.0).clamp(0.0, 1.0)) as f32;
        let color = Rgb([(near * 255.0) as u8, ((1.0 - near) * 255.0) as u8, 0]);
        draw_hollow_rect_mut(&mut out, Rect::at(x, y).of_size(w, h), color);
    }
    out
}

fn valid_range(values: &[f32]) -> (f32, f32) {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for &v in values {
        if v > 0.0 {
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    if lo.is_finite() {
        (lo, hi)
    } else {
        (0.0, 0.0)
    }
}
