//! End-to-end scenario over the public API: a synthetic disparity field
//! flows through depth conversion, 3D localization and point-cloud
//! construction with known-closed-form expectations.

use approx::assert_relative_eq;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use stereoscene::{
    localize, CameraCalib, DepthMap, DepthMethod, DepthStats, Detection2D, DisparityMap,
    PointCloud, StereoCalib,
};

fn rig(fx: f64, fy: f64, cx: f64, cy: f64, baseline: f64) -> StereoCalib {
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
        baseline,
        image_size: [4, 4],
    }
}

/// 4×4 disparity map: a 2×2 block of disparity 10 at (1..3, 1..3),
/// everything else unmatched.
fn block_disparity() -> DisparityMap {
    let mut data = vec![0.0f32; 16];
    for &(x, y) in &[(1u32, 1u32), (2, 1), (1, 2), (2, 2)] {
        data[(y * 4 + x) as usize] = 10.0;
    }
    DisparityMap::from_raw(4, 4, data)
}

#[test]
fn synthetic_block_scenario() {
    let calib = rig(100.0, 100.0, 2.0, 2.0, 0.5);
    let disparity = block_disparity();

    // fx·baseline/d = 100·0.5/10 = 5 m inside the block, 0 elsewhere.
    let depth = DepthMap::from_disparity(&disparity, calib.left.fx, calib.baseline, 0.5, 50.0);
    for y in 0..4 {
        for x in 0..4 {
            let expected = if (1..3).contains(&x) && (1..3).contains(&y) {
                5.0
            } else {
                0.0
            };
            assert_relative_eq!(depth.get(x, y), expected);
        }
    }

    let stats = DepthStats::compute(&depth);
    assert_eq!(stats.valid_pixels, 4);
    assert_relative_eq!(stats.valid_percentage, 25.0);
    assert_relative_eq!(stats.median_depth, 5.0);

    // One detection covering the block, median depth → 5 m; the bbox
    // center (2, 2) sits on the principal point, so X = Y = 0.
    let det = Detection2D {
        bbox: [1.0, 1.0, 3.0, 3.0],
        class_id: 0,
        class_name: "car".into(),
        confidence: 0.9,
    };
    let objects = localize(&[det], &depth, &calib, DepthMethod::Median);
    assert_eq!(objects.len(), 1);
    let obj = &objects[0];
    assert_relative_eq!(obj.depth, 5.0);
    assert_relative_eq!(obj.position[0], 0.0);
    assert_relative_eq!(obj.position[1], 0.0);
    assert_relative_eq!(obj.position[2], 5.0);
    assert_relative_eq!(obj.distance, 5.0);

    // Off-center principal point: X, Y follow the pinhole formula.
    let shifted = rig(100.0, 100.0, 0.0, 1.0, 0.5);
    let det = Detection2D {
        bbox: [1.0, 1.0, 3.0, 3.0],
        class_id: 0,
        class_name: "car".into(),
        confidence: 0.9,
    };
    let objects = localize(&[det], &depth, &shifted, DepthMethod::Median);
    assert_relative_eq!(objects[0].position[0], (2.0 - 0.0) * 5.0 / 100.0);
    assert_relative_eq!(objects[0].position[1], (2.0 - 1.0) * 5.0 / 100.0);
}

#[test]
fn block_scenario_point_cloud_and_object_filter() {
    let calib = rig(100.0, 100.0, 2.0, 2.0, 0.5);
    let depth = DepthMap::from_disparity(&block_disparity(), 100.0, 0.5, 0.5, 50.0);
    let color = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));

    let cloud = PointCloud::from_depth(&depth, &color, &calib, 50.0);
    assert_eq!(cloud.len(), 4);
    assert!(cloud.colors.iter().all(|&c| c == [10, 20, 30]));
    // All block points sit at Z = 5 with small lateral offsets.
    for p in &cloud.points {
        assert_relative_eq!(p[2], 5.0);
        assert!(p[0].abs() <= 0.1 && p[1].abs() <= 0.1);
    }

    let det = Detection2D {
        bbox: [1.0, 1.0, 3.0, 3.0],
        class_id: 0,
        class_name: "car".into(),
        confidence: 0.9,
    };
    let objects = localize(&[det], &depth, &calib, DepthMethod::Median);
    let sub = cloud.filter_by_objects(&objects, 0.5);
    assert_eq!(sub.len(), 1);
    assert_eq!(sub[0].num_points, 4);

    // Downsampling below the cloud size keeps everything.
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(cloud.downsample(&mut rng, 10), cloud);
    // ...and to a smaller target returns exactly that many points.
    assert_eq!(cloud.downsample(&mut rng, 2).len(), 2);
}
