use approx::assert_relative_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;

use calval_core::io::{read_yaml, write_yaml};
use calval_core::{
    aggregate, aggregate_parallel, export_poses, invert_pose, rotation_vector_to_matrix,
    AggregateError, CalibrationLayout, CameraIntrinsics, ConfigError, CornerFileDetector,
    DetectionResult, GridSpec, MatrixRecord, PatternDetector, PoseRecord,
};

/// Ground truth grid-to-camera poses `(rvec, tvec)` used to synthesise observations.
const POSES: [([f64; 3], [f64; 3]); 3] = [
    ([0.1, -0.2, 0.05], [-0.1, -0.05, 0.6]),
    ([-0.3, 0.2, 0.1], [-0.05, -0.08, 0.7]),
    ([0.0, 0.0, 0.3], [-0.09, -0.06, 0.5]),
];

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(
        [[800.0, 0.0, 320.0], [0.0, 810.0, 240.0], [0.0, 0.0, 1.0]],
        &[-0.12, 0.03, 0.001, -0.0005, 0.0],
        640,
        480,
    )
    .expect("valid intrinsics")
}

fn grid() -> GridSpec {
    GridSpec::new(7, 5, 0.03).expect("valid grid")
}

fn project_grid(rvec: &[f64; 3], tvec: &[f64; 3]) -> Vec<[f64; 2]> {
    let r = rotation_vector_to_matrix(rvec).expect("valid rotation vector");
    let camera = intrinsics().camera_model();
    grid()
        .points()
        .expect("valid grid")
        .iter()
        .map(|p| {
            let pc: [f64; 3] =
                std::array::from_fn(|i| r[i][0] * p[0] + r[i][1] * p[1] + r[i][2] * p[2] + tvec[i]);
            camera.project_point(&pc).expect("point in front of the camera")
        })
        .collect()
}

fn synthetic_detections() -> Vec<DetectionResult> {
    POSES
        .iter()
        .enumerate()
        .map(|(i, (rvec, tvec))| {
            DetectionResult::detected(format!("img_{i:02}.png"), project_grid(rvec, tvec))
        })
        .collect()
}

#[test]
fn test_recovers_synthetic_poses() -> Result<(), Box<dyn std::error::Error>> {
    let detections = synthetic_detections();
    let (poses, summary) = aggregate(&detections, &grid(), &intrinsics())?;

    assert_eq!(poses.len(), POSES.len());
    assert_eq!(summary.images_posed, POSES.len());
    assert_eq!(summary.points_per_image, 35);
    assert_eq!(summary.statistics.count, 35 * POSES.len());
    assert!(summary.failed.is_empty());
    assert!(summary.statistics.rms < 1e-5, "rms {}", summary.statistics.rms);

    for (pose, (rvec, tvec)) in poses.iter().zip(POSES.iter()) {
        let r = rotation_vector_to_matrix(rvec)?;
        let (r_nc, r_cn_n) = invert_pose(&r, tvec);
        for i in 0..3 {
            assert_relative_eq!(pose.position[i], r_cn_n[i], epsilon = 1e-4);
            assert_relative_eq!(pose.tvec[i], tvec[i], epsilon = 1e-4);
            for j in 0..3 {
                assert_relative_eq!(pose.rotation[i][j], r_nc[i][j], epsilon = 1e-4);
            }
        }
    }
    Ok(())
}

#[test]
fn test_order_and_parallel_invariance() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut detections: Vec<DetectionResult> = synthetic_detections()
        .into_iter()
        .map(|mut d| {
            if let Some(corners) = d.corners.as_mut() {
                for c in corners.iter_mut() {
                    c[0] += rng.random_range(-0.5..0.5);
                    c[1] += rng.random_range(-0.5..0.5);
                }
            }
            d
        })
        .collect();
    detections.push(DetectionResult::missed("img_03.png"));

    let (poses, summary) = aggregate(&detections, &grid(), &intrinsics())?;
    assert_eq!(summary.images_found, 4);
    assert_eq!(summary.images_detected, 3);
    assert!(summary.statistics.rms > 0.05 && summary.statistics.rms < 1.0);
    assert!(summary.statistics.mean <= summary.statistics.rms);

    let mut shuffled = detections.clone();
    shuffled.reverse();
    shuffled.swap(0, 2);
    let (shuffled_poses, shuffled_summary) = aggregate(&shuffled, &grid(), &intrinsics())?;
    assert_eq!(shuffled_summary, summary);
    assert_eq!(shuffled_poses, poses);

    let (parallel_poses, parallel_summary) =
        aggregate_parallel(&shuffled, &grid(), &intrinsics(), |_| {})?;
    assert_eq!(parallel_summary, summary);
    assert_eq!(parallel_poses, poses);
    Ok(())
}

#[test]
fn test_no_detected_grid_is_error() {
    let detections = vec![
        DetectionResult::missed("a.png"),
        DetectionResult::missed("b.png"),
    ];
    assert!(matches!(
        aggregate(&detections, &grid(), &intrinsics()),
        Err(AggregateError::NoValidPoses {
            images_found: 2,
            images_detected: 0,
            ..
        })
    ));
}

#[test]
fn test_double_inversion_is_identity() -> Result<(), Box<dyn std::error::Error>> {
    for (rvec, tvec) in POSES {
        let r = rotation_vector_to_matrix(&rvec)?;
        let (r_inv, t_inv) = invert_pose(&r, &tvec);
        let (r_back, t_back) = invert_pose(&r_inv, &t_inv);
        for i in 0..3 {
            assert_relative_eq!(t_back[i], tvec[i], epsilon = 1e-12);
            for j in 0..3 {
                assert_relative_eq!(r_back[i][j], r[i][j], epsilon = 1e-12);
            }
        }
    }
    Ok(())
}

fn write_camera_yaml(path: &Path, camera_matrix: &str, distortion: &str) -> std::io::Result<()> {
    let text = format!(
        "image_width: 640\nimage_height: 480\ncamera_matrix:\n{camera_matrix}distortion_coefficients:\n{distortion}"
    );
    std::fs::write(path, text)
}

#[test]
fn test_load_camera_params() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let path = tmp_dir.path().join("camera_params.yaml");
    let distortion = "  rows: 1\n  cols: 4\n  data: [-0.1, 0.01, 0.0, 0.0]\n";

    write_camera_yaml(
        &path,
        "  rows: 3\n  cols: 3\n  data: [800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0]\n",
        distortion,
    )?;
    let loaded = CameraIntrinsics::from_yaml_file(&path)?;
    assert_eq!(loaded.affine(), (800.0, 800.0, 320.0, 240.0));
    assert_eq!(loaded.distortion(), &[-0.1, 0.01, 0.0, 0.0, 0.0]);
    assert_eq!(loaded.source(), Some(path.as_path()));

    write_camera_yaml(
        &path,
        "  rows: 3\n  cols: 3\n  data: [800.0, 0.0, 320.0, 0.1, 800.0, 240.0, 0.0, 0.0, 1.0]\n",
        distortion,
    )?;
    assert!(matches!(
        CameraIntrinsics::from_yaml_file(&path),
        Err(ConfigError::NotUpperTriangular(_))
    ));

    write_camera_yaml(
        &path,
        "  rows: 3\n  cols: 3\n  data: [800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0]\n",
        distortion,
    )?;
    assert!(matches!(
        CameraIntrinsics::from_yaml_file(&path),
        Err(ConfigError::MatrixDataLength {
            expected: 9,
            actual: 8,
            ..
        })
    ));

    assert!(matches!(
        CameraIntrinsics::from_yaml_file(tmp_dir.path().join("missing.yaml")),
        Err(ConfigError::FileDoesNotExist(_))
    ));

    let written = intrinsics().to_yaml_file(tmp_dir.path().join("saved"))?;
    assert_eq!(written, tmp_dir.path().join("saved.yaml"));
    let reloaded = CameraIntrinsics::from_yaml_file(&written)?;
    assert_eq!(reloaded.camera_matrix(), intrinsics().camera_matrix());
    assert_eq!(reloaded.distortion(), intrinsics().distortion());
    Ok(())
}

#[test]
fn test_validate_calibration_directory() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let tmp_dir = tempfile::tempdir()?;
    let root = tmp_dir.path();
    let calibration = root.join("calibration");
    std::fs::create_dir(&calibration)?;

    intrinsics().to_yaml_file(calibration.join("camera_params.yaml"))?;
    grid().to_yaml_file(calibration.join("calibration_grid_params.yaml"))?;

    for (i, (rvec, tvec)) in POSES.iter().enumerate() {
        let image = calibration.join(format!("img_{i:02}.png"));
        std::fs::write(&image, b"")?;
        write_yaml(
            CornerFileDetector::sidecar_path(&image),
            &MatrixRecord::from_points2(&project_grid(rvec, tvec)),
        )?;
    }
    // an image without a detected grid
    std::fs::write(calibration.join("img_99.jpg"), b"")?;

    let layout = CalibrationLayout::discover(root, None)?;
    assert_eq!(layout.images.len(), 4);

    let intrinsics = CameraIntrinsics::from_yaml_file(&layout.camera_params_file)?;
    let grid = GridSpec::from_yaml_file(&layout.grid_params_file)?;
    let detections = layout
        .images
        .iter()
        .map(|image| CornerFileDetector.detect(image, &grid))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(detections.iter().filter(|d| d.is_detected()).count(), 3);

    let (poses, summary) = aggregate(&detections, &grid, &intrinsics)?;
    assert_eq!(summary.images_found, 4);
    assert_eq!(summary.images_posed, 3);
    assert!(summary.statistics.rms < 1e-5);

    // stale content is removed by the export
    let poses_dir = layout.poses_dir();
    std::fs::create_dir(&poses_dir)?;
    std::fs::write(poses_dir.join("stale.yaml"), b"")?;

    let written = export_poses(&poses, &poses_dir)?;
    assert_eq!(written.len(), 3);
    assert!(!poses_dir.join("stale.yaml").exists());

    let record: PoseRecord = read_yaml(poses_dir.join("pose_img_01.yaml"))?;
    let position = record.rCNn.to_vector("rCNn")?;
    let rotation = record.Rnc.to_matrix3("Rnc")?;
    assert_eq!(position, poses[1].position.to_vec());
    assert_eq!(rotation, poses[1].rotation);
    assert_relative_eq!(record.reprojection_error, poses[1].rms_error());
    Ok(())
}
