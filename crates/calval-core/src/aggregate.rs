use crate::camera::CameraIntrinsics;
use crate::detection::DetectionResult;
use crate::geometry::GeometryError;
use crate::grid::GridSpec;
use crate::pose::{solve_pose, PoseEstimate, SolveFailure};
use crate::stats::ErrorStatistics;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// An error type for the batch aggregation.
#[derive(thiserror::Error, Debug)]
pub enum AggregateError {
    /// No image produced a pose, so no statistics can be computed.
    #[error(
        "No valid poses: {images_detected} of {images_found} images had a detected grid and {} failed to solve",
        .failed.len()
    )]
    NoValidPoses {
        /// Number of images given to the aggregator.
        images_found: usize,
        /// Number of images with a detected grid.
        images_detected: usize,
        /// Images whose pose could not be solved.
        failed: Vec<SolveFailure>,
    },

    /// The detected corners do not match the grid.
    #[error("Expected {expected} corners for {image}, got {actual}")]
    CornerCountMismatch {
        /// Offending image.
        image: PathBuf,
        /// Number of grid points.
        expected: usize,
        /// Number of detected corners.
        actual: usize,
    },

    /// The grid points could not be generated.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Aggregated outcome of a validation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSummary {
    /// Statistics over all reprojection errors of all solved images.
    pub statistics: ErrorStatistics,
    /// Number of images given to the aggregator.
    pub images_found: usize,
    /// Number of images with a detected grid.
    pub images_detected: usize,
    /// Number of images with a solved pose.
    pub images_posed: usize,
    /// Number of grid points per image.
    pub points_per_image: usize,
    /// Images whose pose could not be solved, in file name order.
    pub failed: Vec<SolveFailure>,
}

/// Solve the pose of every image with a detected grid and pool the errors.
///
/// Images are processed in ascending file name order. Images without a
/// detection, and images whose pose fails to solve, are counted in the
/// summary but excluded from the statistics.
pub fn aggregate(
    detections: &[DetectionResult],
    grid: &GridSpec,
    intrinsics: &CameraIntrinsics,
) -> Result<(Vec<PoseEstimate>, ValidationSummary), AggregateError> {
    aggregate_with_progress(detections, grid, intrinsics, |_| {})
}

/// Like [`aggregate`], calling `on_solved` with the image path after each solve.
pub fn aggregate_with_progress(
    detections: &[DetectionResult],
    grid: &GridSpec,
    intrinsics: &CameraIntrinsics,
    mut on_solved: impl FnMut(&Path),
) -> Result<(Vec<PoseEstimate>, ValidationSummary), AggregateError> {
    let grid_points = grid.points()?;
    let detected = detected_in_order(detections, grid_points.len())?;

    let results = detected
        .iter()
        .map(|(source, corners)| {
            let res = solve_pose(&grid_points, corners, intrinsics, source);
            on_solved(source);
            res
        })
        .collect();

    summarize(detections.len(), grid_points.len(), results)
}

/// Parallel version of [`aggregate_with_progress`] running the solves on the rayon pool.
///
/// The results are identical to the sequential version.
pub fn aggregate_parallel(
    detections: &[DetectionResult],
    grid: &GridSpec,
    intrinsics: &CameraIntrinsics,
    on_solved: impl Fn(&Path) + Sync,
) -> Result<(Vec<PoseEstimate>, ValidationSummary), AggregateError> {
    let grid_points = grid.points()?;
    let detected = detected_in_order(detections, grid_points.len())?;

    let results = detected
        .par_iter()
        .map(|(source, corners)| {
            let res = solve_pose(&grid_points, corners, intrinsics, source);
            on_solved(source);
            res
        })
        .collect();

    summarize(detections.len(), grid_points.len(), results)
}

/// Detected images sorted by file name, with their corners.
fn detected_in_order(
    detections: &[DetectionResult],
    num_points: usize,
) -> Result<Vec<(&Path, &[[f64; 2]])>, AggregateError> {
    let mut detected = Vec::with_capacity(detections.len());
    for detection in detections {
        let Some(corners) = &detection.corners else {
            continue;
        };
        if corners.len() != num_points {
            return Err(AggregateError::CornerCountMismatch {
                image: detection.source.clone(),
                expected: num_points,
                actual: corners.len(),
            });
        }
        detected.push((detection.source.as_path(), corners.as_slice()));
    }

    detected.sort_by(|(a, _), (b, _)| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
    Ok(detected)
}

fn summarize(
    images_found: usize,
    points_per_image: usize,
    results: Vec<Result<PoseEstimate, SolveFailure>>,
) -> Result<(Vec<PoseEstimate>, ValidationSummary), AggregateError> {
    let images_detected = results.len();

    let mut poses = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(pose) => poses.push(pose),
            Err(failure) => {
                log::warn!("{failure}");
                failed.push(failure);
            }
        }
    }

    let errors: Vec<f64> = poses
        .iter()
        .flat_map(|p| p.reprojection_errors.iter().copied())
        .collect();

    let Some(statistics) = ErrorStatistics::from_samples(&errors) else {
        return Err(AggregateError::NoValidPoses {
            images_found,
            images_detected,
            failed,
        });
    };

    log::info!(
        "solved {} of {} detected images ({} points)",
        poses.len(),
        images_detected,
        statistics.count
    );

    let summary = ValidationSummary {
        statistics,
        images_found,
        images_detected,
        images_posed: poses.len(),
        points_per_image,
        failed,
    };
    Ok((poses, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(
            [[800.0, 0.0, 320.0], [0.0, 800.0, 240.0], [0.0, 0.0, 1.0]],
            &[0.0; 5],
            640,
            480,
        )
        .expect("valid intrinsics")
    }

    #[test]
    fn test_no_detections_is_error() -> Result<(), Box<dyn std::error::Error>> {
        let grid = GridSpec::new(3, 3, 0.1)?;
        let detections = vec![
            DetectionResult::missed("a.png"),
            DetectionResult::missed("b.png"),
        ];
        match aggregate(&detections, &grid, &intrinsics()) {
            Err(AggregateError::NoValidPoses {
                images_found,
                images_detected,
                failed,
            }) => {
                assert_eq!(images_found, 2);
                assert_eq!(images_detected, 0);
                assert!(failed.is_empty());
            }
            other => panic!("expected NoValidPoses, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_empty_input_is_error() -> Result<(), Box<dyn std::error::Error>> {
        let grid = GridSpec::new(3, 3, 0.1)?;
        assert!(matches!(
            aggregate(&[], &grid, &intrinsics()),
            Err(AggregateError::NoValidPoses { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_corner_count_mismatch() -> Result<(), Box<dyn std::error::Error>> {
        let grid = GridSpec::new(3, 3, 0.1)?;
        let detections = vec![DetectionResult::detected("a.png", vec![[0.0, 0.0]; 4])];
        assert!(matches!(
            aggregate(&detections, &grid, &intrinsics()),
            Err(AggregateError::CornerCountMismatch {
                expected: 9,
                actual: 4,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_summarize_pools_errors() {
        let pose = |name: &str, errors: Vec<f64>| PoseEstimate {
            source: PathBuf::from(name),
            position: [0.0; 3],
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            rvec: [0.0; 3],
            tvec: [0.0; 3],
            reprojection_errors: errors,
        };
        let results = vec![
            Ok(pose("a.png", vec![0.0, 1.0])),
            Err(SolveFailure {
                image: PathBuf::from("b.png"),
                reason: "degenerate".to_string(),
            }),
            Ok(pose("c.png", vec![2.0, 3.0])),
        ];

        let (poses, summary) = summarize(5, 2, results).expect("two poses");
        assert_eq!(poses.len(), 2);
        assert_eq!(summary.images_found, 5);
        assert_eq!(summary.images_detected, 3);
        assert_eq!(summary.images_posed, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.statistics.mean, 1.5);
        assert_eq!(summary.statistics.rms, 3.5f64.sqrt());
    }

    #[test]
    fn test_summarize_all_failed() {
        let results = vec![Err(SolveFailure {
            image: PathBuf::from("b.png"),
            reason: "degenerate".to_string(),
        })];
        match summarize(1, 4, results) {
            Err(AggregateError::NoValidPoses { failed, .. }) => assert_eq!(failed.len(), 1),
            other => panic!("expected NoValidPoses, got {other:?}"),
        }
    }
}
