//! stereoscene — stereo vision perception in pure Rust.
//!
//! Turns a rectified stereo pair into metric 3D scene understanding. The
//! pipeline stages are:
//!
//! 1. **Calib** – KITTI-style calibration parsing, stereo parameter
//!    extraction (focal lengths, principal point, baseline), JSON round trip.
//! 2. **Disparity** – dense semi-global matching with smoothness penalties,
//!    uniqueness and left-right consistency checks, speckle filtering.
//! 3. **Depth** – disparity → metric depth with validity bounds and
//!    summary statistics.
//! 4. **Localize** – fusion of external 2D detections with the depth field
//!    into 3D object estimates in the left-camera frame.
//! 5. **Pointcloud** – colored back-projection, seeded random
//!    downsampling, per-object filtering, ASCII PLY export.
//! 6. **Pipeline** – per-frame orchestration with stage timings, FPS
//!    accounting and optional artifact persistence.
//!
//! Missing depth is modeled as absence throughout (a 0.0 pixel, a skipped
//! detection), never as an error: frames degrade gracefully instead of
//! failing.
//!
//! # Example
//!
//! ```no_run
//! use stereoscene::{FrameOptions, RawCalib, SgmConfig, StereoCalib, StereoPipeline};
//!
//! # fn run(detector: Box<dyn stereoscene::Detector>) -> Result<(), Box<dyn std::error::Error>> {
//! let raw = RawCalib::parse(&std::fs::read_to_string("calib_cam_to_cam.txt")?)?;
//! let calib = StereoCalib::from_raw(&raw)?;
//! let mut pipeline = StereoPipeline::new(calib, SgmConfig::default())?
//!     .with_detector(detector);
//!
//! let left = image::open("left.png")?.to_rgb8();
//! let right = image::open("right.png")?.to_rgb8();
//! let result = pipeline.process(&left, &right, &FrameOptions::default())?;
//! println!("{} objects, {:.1} fps", result.objects.len(), result.fps);
//! # Ok(())
//! # }
//! ```

pub mod calib;
pub mod depth;
pub mod disparity;
pub mod localize;
pub mod pipeline;
pub mod pointcloud;
#[cfg(test)]
mod test_utils;
pub mod viz;

pub use calib::{CalibError, CameraCalib, RawCalib, RawValue, StereoCalib};
pub use depth::{DepthMap, DepthStats, DEFAULT_MAX_DEPTH, DEFAULT_MIN_DEPTH};
pub use disparity::{DisparityMap, SgmConfig, SgmError, SgmMatcher};
pub use localize::{
    localize, object_depth, pixel_to_3d, DepthMethod, Detection2D, LocalizedObject3D,
};
pub use pipeline::{
    Detector, FrameArtifacts, FrameOptions, OutputWriter, PipelineError, PipelineResult,
    RunningStats, StageTimings, StereoPipeline,
};
pub use pointcloud::{ObjectCloud, PlyError, PointCloud};
