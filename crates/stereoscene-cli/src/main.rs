//! stereoscene CLI — stereo perception from the command line.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use stereoscene::{
    DepthMethod, Detection2D, Detector, FrameOptions, RawCalib, SgmConfig, StereoCalib,
    StereoPipeline,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "stereoscene")]
#[command(about = "Stereo perception: dense depth, 3D object localization and point clouds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a raw calibration text file to the JSON parameter format.
    CalibConvert(CalibConvertArgs),

    /// Process one rectified stereo pair through the full pipeline.
    Process(ProcessArgs),
}

#[derive(Debug, Clone, Args)]
struct CalibConvertArgs {
    /// Path to the raw calibration text (KITTI calib_cam_to_cam.txt).
    #[arg(long)]
    raw: PathBuf,

    /// Path to write the extracted stereo parameters (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ProcessArgs {
    /// Left rectified color image.
    #[arg(long)]
    left: PathBuf,

    /// Right rectified color image.
    #[arg(long)]
    right: PathBuf,

    /// Stereo parameters JSON produced by calib-convert.
    #[arg(long)]
    calib: PathBuf,

    /// Detections JSON (array of {bbox, class_id, class_name, confidence}).
    /// Without it the frame is processed with an empty detection set.
    #[arg(long)]
    detections: Option<PathBuf>,

    /// Number of candidate disparities (positive multiple of 16).
    #[arg(long, default_value = "128")]
    num_disparities: usize,

    /// Matching window side (odd, 3-11).
    #[arg(long, default_value = "5")]
    block_size: usize,

    /// Near depth validity bound (meters).
    #[arg(long, default_value = "0.5")]
    min_depth: f32,

    /// Far depth validity bound (meters).
    #[arg(long, default_value = "50.0")]
    max_depth: f32,

    /// Depth extraction method for detections: center, median or mean.
    #[arg(long, default_value = "median")]
    depth_method: String,

    /// Write the downsampled point cloud (ASCII PLY) here.
    #[arg(long)]
    cloud: Option<PathBuf>,

    /// Point-cloud downsampling target.
    #[arg(long, default_value = "10000")]
    cloud_points: usize,

    /// Write a depth visualization image here.
    #[arg(long)]
    depth_viz: Option<PathBuf>,

    /// Write the annotated frame here.
    #[arg(long)]
    annotated: Option<PathBuf>,

    /// Write the frame result (objects, stats, timings) as JSON here.
    #[arg(long)]
    out: Option<PathBuf>,
}

/// Detector stub backed by a fixed detection list loaded from JSON.
struct FileDetections(Vec<Detection2D>);

impl Detector for FileDetections {
    fn detect(&self, _frame: &image::RgbImage) -> Vec<Detection2D> {
        self.0.clone()
    }
}

/// JSON shape of the per-frame result written by `process --out`.
#[derive(serde::Serialize)]
struct FrameReport {
    objects: Vec<stereoscene::LocalizedObject3D>,
    depth_stats: stereoscene::DepthStats,
    timings_ms: TimingsMs,
    fps: f64,
}

#[derive(serde::Serialize)]
struct TimingsMs {
    disparity: f64,
    depth: f64,
    detection: f64,
    localization: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pointcloud: Option<f64>,
    total: f64,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CalibConvert(args) => run_calib_convert(&args),
        Commands::Process(args) => run_process(&args),
    }
}

fn run_calib_convert(args: &CalibConvertArgs) -> CliResult<()> {
    let text = std::fs::read_to_string(&args.raw)?;
    let raw = RawCalib::parse(&text)?;
    let calib = StereoCalib::from_raw(&raw)?;
    calib.save(&args.out)?;

    println!("stereo calibration extracted");
    println!("  focal length:  {:.2} px", calib.left.fx);
    println!(
        "  principal pt:  ({:.2}, {:.2})",
        calib.left.cx, calib.left.cy
    );
    println!("  baseline:      {:.4} m", calib.baseline);
    println!("  written to:    {}", args.out.display());
    Ok(())
}

fn parse_depth_method(name: &str) -> CliResult<DepthMethod> {
    match name {
        "center" => Ok(DepthMethod::Center),
        "median" => Ok(DepthMethod::Median),
        "mean" => Ok(DepthMethod::Mean),
        other => Err(format!("unknown depth method: {:?}", other).into()),
    }
}

fn run_process(args: &ProcessArgs) -> CliResult<()> {
    let calib = StereoCalib::load(&args.calib)?;
    let left = image::open(&args.left)?.to_rgb8();
    let right = image::open(&args.right)?.to_rgb8();

    let detections: Vec<Detection2D> = match &args.detections {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    let sgm = SgmConfig {
        num_disparities: args.num_disparities,
        block_size: args.block_size,
        ..SgmConfig::default()
    };
    let mut pipeline = StereoPipeline::new(calib, sgm)?
        .with_detector(Box::new(FileDetections(detections)));

    let options = FrameOptions {
        min_depth: args.min_depth,
        max_depth: args.max_depth,
        depth_method: parse_depth_method(&args.depth_method)?,
        generate_cloud: args.cloud.is_some(),
        cloud_target_points: args.cloud_points,
        save_outputs: false,
    };
    let result = pipeline.process(&left, &right, &options)?;

    println!("frame processed");
    println!("  disparity:     {:6.1} ms", result.timings.disparity * 1e3);
    println!("  depth:         {:6.1} ms", result.timings.depth * 1e3);
    println!("  detection:     {:6.1} ms", result.timings.detection * 1e3);
    println!("  localization:  {:6.1} ms", result.timings.localization * 1e3);
    if let Some(pc) = result.timings.pointcloud {
        println!("  point cloud:   {:6.1} ms", pc * 1e3);
    }
    println!(
        "  total:         {:6.1} ms ({:.1} fps)",
        result.timings.total * 1e3,
        result.fps
    );
    println!(
        "  valid depth:   {:.1}% of pixels",
        result.depth_stats.valid_percentage
    );
    for obj in &result.objects {
        println!(
            "  {} ({:.2}): {:.1} m at ({:.1}, {:.1}, {:.1})",
            obj.class_name,
            obj.confidence,
            obj.distance,
            obj.position[0],
            obj.position[1],
            obj.position[2]
        );
    }

    if let (Some(path), Some(cloud)) = (&args.cloud, &result.cloud) {
        cloud.write_ply(path)?;
        println!("  cloud:         {} points -> {}", cloud.len(), path.display());
    }
    if let Some(path) = &args.depth_viz {
        let viz = stereoscene::viz::colorize(&stereoscene::viz::normalize_depth(
            &result.depth_map,
            30.0,
        ));
        viz.save(path)?;
    }
    if let Some(path) = &args.annotated {
        stereoscene::viz::annotate(&left, &result.objects).save(path)?;
    }
    if let Some(path) = &args.out {
        let report = FrameReport {
            objects: result.objects.clone(),
            depth_stats: result.depth_stats.clone(),
            timings_ms: TimingsMs {
                disparity: result.timings.disparity * 1e3,
                depth: result.timings.depth * 1e3,
                detection: result.timings.detection * 1e3,
                localization: result.timings.localization * 1e3,
                pointcloud: result.timings.pointcloud.map(|t| t * 1e3),
                total: result.timings.total * 1e3,
            },
            fps: result.fps,
        };
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("  report:        {}", path.display());
    }
    Ok(())
}
