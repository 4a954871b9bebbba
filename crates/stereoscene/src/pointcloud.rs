//! Colored 3D point cloud construction, downsampling, per-object
//! filtering and ASCII PLY serialization.
//!
//! Back-projection uses the left-camera pinhole model; only pixels with
//! `0 < depth < max_depth` contribute a point. Downsampling is uniform
//! random without replacement: fast and density-agnostic, it trades
//! spatial uniformity for speed (a known property of the sampler, not a
//! defect).

use crate::calib::StereoCalib;
use crate::depth::DepthMap;
use crate::localize::{pixel_to_3d, LocalizedObject3D};
use image::RgbImage;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum PlyError {
    Io(std::io::Error),
    /// The file does not follow the expected ASCII vertex-list layout.
    Malformed(String),
}

impl std::fmt::Display for PlyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "ply io error: {}", e),
            Self::Malformed(msg) => write!(f, "malformed ply: {}", msg),
        }
    }
}

impl std::error::Error for PlyError {}

impl From<std::io::Error> for PlyError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ── Point cloud ────────────────────────────────────────────────────────────

/// Parallel point/color arrays; `colors[i]` is the RGB sample of
/// `points[i]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    pub points: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 3]>,
}

/// A per-object sub-cloud selected around a localized object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCloud {
    pub class_name: String,
    pub points: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 3]>,
    pub num_points: usize,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Back-project every pixel with `0 < depth < max_depth`, collecting
    /// the pixel's color. Pixels failing the bound contribute nothing.
    pub fn from_depth(
        depth: &DepthMap,
        color: &RgbImage,
        calib: &StereoCalib,
        max_depth: f32,
    ) -> Self {
        let cam = &calib.left;
        let mut points = Vec::new();
        let mut colors = Vec::new();
        for y in 0..depth.height() {
            for x in 0..depth.width() {
                let z = depth.get(x, y);
                if z <= 0.0 || z >= max_depth {
                    continue;
                }
                let p = pixel_to_3d(
                    f64::from(x),
                    f64::from(y),
                    f64::from(z),
                    cam.fx,
                    cam.fy,
                    cam.cx,
                    cam.cy,
                );
                points.push([p[0] as f32, p[1] as f32, p[2] as f32]);
                colors.push(color.get_pixel(x, y).0);
            }
        }
        Self { points, colors }
    }

    /// Uniform random downsampling without replacement.
    ///
    /// Returns the cloud unchanged when it already holds at most
    /// `target_points`. Sampled indices are sorted ascending, so the
    /// surviving points keep their original relative order.
    pub fn downsample(&self, rng: &mut StdRng, target_points: usize) -> Self {
        if self.len() <= target_points {
            return self.clone();
        }
        let mut indices = sample(rng, self.len(), target_points).into_vec();
        indices.sort_unstable();
        Self {
            points: indices.iter().map(|&i| self.points[i]).collect(),
            colors: indices.iter().map(|&i| self.colors[i]).collect(),
        }
    }

    /// Select the sub-cloud within `margin` meters of each object's 3D
    /// position. Objects with no matching points are omitted.
    pub fn filter_by_objects(
        &self,
        objects: &[LocalizedObject3D],
        margin: f32,
    ) -> Vec<ObjectCloud> {
        let mut clouds = Vec::new();
        for obj in objects {
            let center = Vector3::new(
                obj.position[0] as f32,
                obj.position[1] as f32,
                obj.position[2] as f32,
            );
            let mut points = Vec::new();
            let mut colors = Vec::new();
            for (p, c) in self.points.iter().zip(&self.colors) {
                if (Vector3::from(*p) - center).norm() < margin {
                    points.push(*p);
                    colors.push(*c);
                }
            }
            if points.is_empty() {
                continue;
            }
            clouds.push(ObjectCloud {
                class_name: obj.class_name.clone(),
                num_points: points.len(),
                points,
                colors,
            });
        }
        clouds
    }

    /// Write the cloud as ASCII PLY to `path`.
    pub fn write_ply(&self, path: &Path) -> Result<(), PlyError> {
        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_ply_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write the cloud as ASCII PLY: a header declaring the vertex count
    /// and six properties (x, y, z float; red, green, blue uchar), then
    /// one space-separated line per vertex.
    pub fn write_ply_to<W: Write>(&self, w: &mut W) -> Result<(), PlyError> {
        writeln!(w, "ply")?;
        writeln!(w, "format ascii 1.0")?;
        writeln!(w, "element vertex {}", self.len())?;
        writeln!(w, "property float x")?;
        writeln!(w, "property float y")?;
        writeln!(w, "property float z")?;
        writeln!(w, "property uchar red")?;
        writeln!(w, "property uchar green")?;
        writeln!(w, "property uchar blue")?;
        writeln!(w, "end_header")?;
        for (p, c) in self.points.iter().zip(&self.colors) {
            writeln!(w, "{} {} {} {} {} {}", p[0], p[1], p[2], c[0], c[1], c[2])?;
        }
        Ok(())
    }

    /// Serialize to an in-memory PLY byte buffer.
    pub fn to_ply_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing to a Vec cannot fail.
        self.write_ply_to(&mut buf).expect("in-memory write");
        buf
    }

    /// Parse an ASCII PLY written by [`PointCloud::write_ply`].
    pub fn read_ply(path: &Path) -> Result<Self, PlyError> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let mut declared = None;
        for line in lines.by_ref() {
            let line = line?;
            let line = line.trim();
            if let Some(count) = line.strip_prefix("element vertex ") {
                declared = Some(count.parse::<usize>().map_err(|_| {
                    PlyError::Malformed(format!("bad vertex count: {:?}", count))
                })?);
            }
            if line == "end_header" {
                break;
            }
        }
        let declared =
            declared.ok_or_else(|| PlyError::Malformed("missing element vertex line".into()))?;

        let mut cloud = Self::default();
        for line in lines {
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 6 {
                return Err(PlyError::Malformed(format!(
                    "expected 6 fields per vertex, got {}",
                    fields.len()
                )));
            }
            let parse_f = |s: &str| {
                s.parse::<f32>()
                    .map_err(|_| PlyError::Malformed(format!("bad float: {:?}", s)))
            };
            let parse_c = |s: &str| {
                s.parse::<u8>()
                    .map_err(|_| PlyError::Malformed(format!("bad color: {:?}", s)))
            };
            cloud
                .points
                .push([parse_f(fields[0])?, parse_f(fields[1])?, parse_f(fields[2])?]);
            cloud
                .colors
                .push([parse_c(fields[3])?, parse_c(fields[4])?, parse_c(fields[5])?]);
        }
        if cloud.len() != declared {
            return Err(PlyError::Malformed(format!(
                "header declares {} vertices, found {}",
                declared,
                cloud.len()
            )));
        }
        Ok(cloud)
    }
}
