//! Per-frame orchestration of the perception stages.
//!
//! The pipeline owns the calibration, the stereo matcher and the running
//! counters; external capabilities (object detection, artifact
//! persistence) are injected through the [`Detector`] and [`OutputWriter`]
//! traits so the core stays testable with deterministic stubs.
//!
//! Stage order per frame: disparity → depth (+stats) → detection →
//! localization → optional point cloud. Each stage is timed
//! independently; a failed stage aborts the frame and propagates, nothing
//! is retried here.
//!
//! A pipeline instance processes one frame at a time (`&mut self`);
//! sharing an instance across threads requires an external mutex around
//! the whole call, since the running counters are updated per frame.

use crate::calib::{CalibError, StereoCalib};
use crate::depth::{DepthMap, DepthStats};
use crate::disparity::{DisparityMap, SgmConfig, SgmError, SgmMatcher};
use crate::localize::{localize, DepthMethod, Detection2D, LocalizedObject3D};
use crate::pointcloud::PointCloud;
use crate::viz;
use image::{GrayImage, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum PipelineError {
    /// A required collaborator is missing for the requested work.
    NotReady(String),
    Sgm(SgmError),
    Calib(CalibError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotReady(msg) => write!(f, "pipeline not ready: {}", msg),
            Self::Sgm(e) => write!(f, "disparity stage failed: {}", e),
            Self::Calib(e) => write!(f, "calibration error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<SgmError> for PipelineError {
    fn from(e: SgmError) -> Self {
        Self::Sgm(e)
    }
}

impl From<CalibError> for PipelineError {
    fn from(e: CalibError) -> Self {
        Self::Calib(e)
    }
}

// ── Collaborator traits ────────────────────────────────────────────────────

/// External object-detection capability, opaque to the pipeline.
pub trait Detector {
    fn detect(&self, frame: &RgbImage) -> Vec<Detection2D>;
}

/// Artifacts offered to the output writer for one frame.
pub struct FrameArtifacts<'a> {
    pub annotated: &'a RgbImage,
    pub depth_viz: &'a GrayImage,
    /// Serialized ASCII PLY, present when a cloud was generated.
    pub cloud_ply: Option<&'a [u8]>,
}

/// External persistence capability. Failures are logged and never abort
/// the frame.
pub trait OutputWriter {
    fn write_frame(&mut self, frame_id: u64, artifacts: &FrameArtifacts<'_>) -> std::io::Result<()>;
}

// ── Options / results ──────────────────────────────────────────────────────

/// Per-frame processing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameOptions {
    pub min_depth: f32,
    pub max_depth: f32,
    pub depth_method: DepthMethod,
    /// Generate (and downsample) a colored point cloud.
    pub generate_cloud: bool,
    pub cloud_target_points: usize,
    /// Hand artifacts to the output writer, when one is configured.
    pub save_outputs: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            min_depth: crate::depth::DEFAULT_MIN_DEPTH,
            max_depth: crate::depth::DEFAULT_MAX_DEPTH,
            depth_method: DepthMethod::Median,
            generate_cloud: false,
            cloud_target_points: 10_000,
            save_outputs: false,
        }
    }
}

/// Wall-clock duration of each stage, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub disparity: f64,
    pub depth: f64,
    pub detection: f64,
    pub localization: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointcloud: Option<f64>,
    pub total: f64,
}

/// Process-wide running counters, zeroed at pipeline construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub total_frames: u64,
    pub total_time: f64,
    pub avg_fps: f64,
}

/// Aggregate output of one processed frame.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub disparity: DisparityMap,
    pub depth_map: DepthMap,
    pub depth_stats: DepthStats,
    pub detections: Vec<Detection2D>,
    pub objects: Vec<LocalizedObject3D>,
    pub cloud: Option<PointCloud>,
    pub timings: StageTimings,
    /// Instantaneous frames-per-second, `1 / timings.total`.
    pub fps: f64,
}

// ── Pipeline ───────────────────────────────────────────────────────────────

/// Stereo perception pipeline handle. Create once, process many frames.
pub struct StereoPipeline {
    calib: StereoCalib,
    matcher: SgmMatcher,
    detector: Option<Box<dyn Detector>>,
    writer: Option<Box<dyn OutputWriter>>,
    rng: StdRng,
    stats: RunningStats,
    next_frame_id: u64,
}

impl StereoPipeline {
    /// Build a pipeline from validated calibration and matcher config.
    pub fn new(calib: StereoCalib, sgm: SgmConfig) -> Result<Self, PipelineError> {
        calib.validate()?;
        let matcher = SgmMatcher::new(sgm)?;
        Ok(Self {
            calib,
            matcher,
            detector: None,
            writer: None,
            rng: StdRng::seed_from_u64(0),
            stats: RunningStats::default(),
            next_frame_id: 0,
        })
    }

    /// Inject the external object detector.
    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Inject the output writer used when `save_outputs` is requested.
    pub fn with_writer(mut self, writer: Box<dyn OutputWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Reseed the random source used by point-cloud downsampling.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn calib(&self) -> &StereoCalib {
        &self.calib
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Run the full perception pipeline on one rectified color pair.
    pub fn process(
        &mut self,
        left: &RgbImage,
        right: &RgbImage,
        options: &FrameOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let detector = self.detector.as_ref().ok_or_else(|| {
            PipelineError::NotReady("no detector configured".to_string())
        })?;
        let frame_start = Instant::now();
        let mut timings = StageTimings::default();

        let left_gray = image::imageops::grayscale(left);
        let right_gray = image::imageops::grayscale(right);

        let t = Instant::now();
        let disparity = self.matcher.compute(&left_gray, &right_gray)?;
        timings.disparity = t.elapsed().as_secs_f64();
        debug!(
            secs = timings.disparity,
            valid = disparity.valid_fraction(),
            "disparity computed"
        );

        let t = Instant::now();
        let depth_map = DepthMap::from_disparity(
            &disparity,
            self.calib.left.fx,
            self.calib.baseline,
            options.min_depth,
            options.max_depth,
        );
        let depth_stats = DepthStats::compute(&depth_map);
        timings.depth = t.elapsed().as_secs_f64();
        debug!(
            secs = timings.depth,
            valid_pct = depth_stats.valid_percentage,
            "depth converted"
        );

        let t = Instant::now();
        let detections = detector.detect(left);
        timings.detection = t.elapsed().as_secs_f64();
        debug!(secs = timings.detection, n = detections.len(), "detections received");

        let t = Instant::now();
        let objects = localize(&detections, &depth_map, &self.calib, options.depth_method);
        timings.localization = t.elapsed().as_secs_f64();
        debug!(secs = timings.localization, n = objects.len(), "objects localized");

        let cloud = if options.generate_cloud {
            let t = Instant::now();
            let full = PointCloud::from_depth(&depth_map, left, &self.calib, options.max_depth);
            let cloud = full.downsample(&mut self.rng, options.cloud_target_points);
            timings.pointcloud = Some(t.elapsed().as_secs_f64());
            debug!(points = cloud.len(), "point cloud generated");
            Some(cloud)
        } else {
            None
        };

        timings.total = frame_start.elapsed().as_secs_f64();
        let fps = 1.0 / timings.total;

        self.stats.total_frames += 1;
        self.stats.total_time += timings.total;
        self.stats.avg_fps = self.stats.total_frames as f64 / self.stats.total_time;

        let result = PipelineResult {
            disparity,
            depth_map,
            depth_stats,
            detections,
            objects,
            cloud,
            timings,
            fps,
        };

        if options.save_outputs {
            self.persist(left, &result);
        }

        info!(
            frame = self.stats.total_frames,
            objects = result.objects.len(),
            fps = format_args!("{:.1}", fps),
            "frame processed"
        );
        Ok(result)
    }

    /// Hand artifacts to the writer; failure is logged, never fatal.
    fn persist(&mut self, left: &RgbImage, result: &PipelineResult) {
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => {
                warn!("save_outputs requested but no output writer configured");
                return;
            }
        };
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;

        let annotated = viz::annotate(left, &result.objects);
        let depth_viz = viz::normalize_depth(&result.depth_map, 30.0);
        let ply = result.cloud.as_ref().map(|c| c.to_ply_bytes());
        let artifacts = FrameArtifacts {
            annotated: &annotated,
            depth_viz: &depth_viz,
            cloud_ply: ply.as_deref(),
        };
        if let Err(e) = writer.write_frame(frame_id, &artifacts) {
            warn!(frame_id, error = %e, "output writer failed; continuing");
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_calib, textured_pair};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Deterministic detector stub returning fixed detections.
    struct StubDetector(Vec<Detection2D>);

    impl Detector for StubDetector {
        fn detect(&self, _frame: &RgbImage) -> Vec<Detection2D> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        frames: Rc<RefCell<Vec<u64>>>,
        fail: bool,
    }

    impl OutputWriter for RecordingWriter {
        fn write_frame(
            &mut self,
            frame_id: u64,
            _artifacts: &FrameArtifacts<'_>,
        ) -> std::io::Result<()> {
            if self.fail {
                return Err(std::io::Error::other("disk full"));
            }
            self.frames.borrow_mut().push(frame_id);
            Ok(())
        }
    }

    fn test_pipeline(dets: Vec<Detection2D>) -> StereoPipeline {
        let calib = test_calib(100.0, 100.0, 32.0, 12.0);
        let sgm = SgmConfig {
            num_disparities: 16,
            speckle_window_size: 0,
            ..SgmConfig::default()
        };
        StereoPipeline::new(calib, sgm)
            .unwrap()
            .with_detector(Box::new(StubDetector(dets)))
    }

    fn car(bbox: [f32; 4]) -> Detection2D {
        Detection2D {
            bbox,
            class_id: 2,
            class_name: "car".into(),
            confidence: 0.85,
        }
    }

    #[test]
    fn not_ready_without_detector() {
        let calib = test_calib(100.0, 100.0, 32.0, 12.0);
        let sgm = SgmConfig {
            num_disparities: 16,
            ..SgmConfig::default()
        };
        let mut pipeline = StereoPipeline::new(calib, sgm).unwrap();
        let (left, right) = textured_pair(64, 24, 4, 3);
        let err = pipeline.process(&left, &right, &FrameOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::NotReady(_)));
    }

    #[test]
    fn process_updates_running_counters() {
        let mut pipeline = test_pipeline(vec![car([20.0, 6.0, 44.0, 18.0])]);
        let (left, right) = textured_pair(64, 24, 4, 3);
        assert_eq!(pipeline.stats().total_frames, 0);

        let r1 = pipeline.process(&left, &right, &FrameOptions::default()).unwrap();
        let r2 = pipeline.process(&left, &right, &FrameOptions::default()).unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.total_frames, 2);
        assert!(stats.total_time >= r1.timings.total);
        assert!(stats.avg_fps > 0.0);
        assert!(r2.fps > 0.0);
        assert!(r1.timings.total >= r1.timings.disparity);
    }

    #[test]
    fn cloud_is_generated_only_on_request() {
        let mut pipeline = test_pipeline(vec![]);
        let (left, right) = textured_pair(64, 24, 4, 3);

        let without = pipeline.process(&left, &right, &FrameOptions::default()).unwrap();
        assert!(without.cloud.is_none());
        assert!(without.timings.pointcloud.is_none());

        let opts = FrameOptions {
            generate_cloud: true,
            cloud_target_points: 50,
            ..FrameOptions::default()
        };
        let with = pipeline.process(&left, &right, &opts).unwrap();
        let cloud = with.cloud.unwrap();
        assert!(cloud.len() <= 50);
        assert!(with.timings.pointcloud.is_some());
    }

    #[test]
    fn writer_receives_monotonic_frame_ids() {
        let frames = Rc::new(RefCell::new(Vec::new()));
        let writer = RecordingWriter {
            frames: frames.clone(),
            fail: false,
        };
        let mut pipeline = test_pipeline(vec![]).with_writer(Box::new(writer));
        let (left, right) = textured_pair(64, 24, 4, 3);
        let opts = FrameOptions {
            save_outputs: true,
            ..FrameOptions::default()
        };
        pipeline.process(&left, &right, &opts).unwrap();
        pipeline.process(&left, &right, &opts).unwrap();
        assert_eq!(*frames.borrow(), vec![0, 1]);
    }

    #[test]
    fn writer_failure_is_not_fatal() {
        let writer = RecordingWriter {
            frames: Rc::new(RefCell::new(Vec::new())),
            fail: true,
        };
        let mut pipeline = test_pipeline(vec![]).with_writer(Box::new(writer));
        let (left, right) = textured_pair(64, 24, 4, 3);
        let opts = FrameOptions {
            save_outputs: true,
            ..FrameOptions::default()
        };
        // The frame still succeeds and counters advance.
        pipeline.process(&left, &right, &opts).unwrap();
        assert_eq!(pipeline.stats().total_frames, 1);
    }

    #[test]
    fn mismatched_pair_aborts_the_frame() {
        let mut pipeline = test_pipeline(vec![]);
        let (left, _) = textured_pair(64, 24, 4, 3);
        let (_, right) = textured_pair(32, 24, 4, 3);
        let err = pipeline.process(&left, &right, &FrameOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Sgm(SgmError::ShapeMismatch { .. })));
        // A failed stage does not advance the counters.
        assert_eq!(pipeline.stats().total_frames, 0);
    }
}
