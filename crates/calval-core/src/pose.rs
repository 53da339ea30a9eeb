use crate::camera::CameraIntrinsics;
use crate::geometry::{invert_pose, rotation_vector_to_matrix, Rotation, Translation};
use crate::stats::ErrorStatistics;
use calval_pnp::{solve_pnp, PnPMethod};
use glam::{DMat3, DVec3};
use std::path::{Path, PathBuf};

/// Minimum number of correspondences for a determined pose.
pub const MIN_CORRESPONDENCES: usize = 4;

/// Pose of one image could not be estimated.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("Failed to solve the camera pose for {image}: {reason}")]
pub struct SolveFailure {
    /// Image the failure belongs to.
    pub image: PathBuf,
    /// Description of the failure.
    pub reason: String,
}

/// Camera pose estimated from one image of the calibration grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    /// Image the pose was estimated from.
    pub source: PathBuf,
    /// Camera position expressed in the grid frame (`rCNn`).
    pub position: Translation,
    /// Camera-to-grid rotation (`Rnc`).
    pub rotation: Rotation,
    /// Grid-to-camera rotation vector as returned by the solver.
    pub rvec: [f64; 3],
    /// Grid origin expressed in the camera frame as returned by the solver.
    pub tvec: [f64; 3],
    /// Pixel distance between observed and reprojected corners, one per grid point.
    pub reprojection_errors: Vec<f64>,
}

impl PoseEstimate {
    /// Reprojection error statistics of this image.
    pub fn error_statistics(&self) -> Option<ErrorStatistics> {
        ErrorStatistics::from_samples(&self.reprojection_errors)
    }

    /// Root mean square reprojection error of this image.
    pub fn rms_error(&self) -> f64 {
        self.error_statistics().map_or(f64::NAN, |s| s.rms)
    }

    /// Mean reprojection error of this image.
    pub fn mean_error(&self) -> f64 {
        self.error_statistics().map_or(f64::NAN, |s| s.mean)
    }

    /// File stem of the source image.
    pub fn source_stem(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Estimate the camera pose from the grid corners observed in one image.
///
/// The pose is solved as grid-in-camera, the grid points are reprojected
/// through the full camera model to compute per-point errors, and the result
/// is inverted to report the camera in the grid frame.
///
/// # Arguments
///
/// * `grid_points` - Grid corners in the grid frame.
/// * `observed` - Detected pixel coordinates, aligned 1:1 with `grid_points`.
/// * `intrinsics` - Camera under validation.
/// * `source` - Identity of the image.
///
/// # Panics
///
/// If the point sets have different lengths or fewer than four points.
pub fn solve_pose(
    grid_points: &[[f64; 3]],
    observed: &[[f64; 2]],
    intrinsics: &CameraIntrinsics,
    source: impl AsRef<Path>,
) -> Result<PoseEstimate, SolveFailure> {
    assert_eq!(
        grid_points.len(),
        observed.len(),
        "grid points and observed corners must be aligned"
    );
    assert!(
        grid_points.len() >= MIN_CORRESPONDENCES,
        "at least {MIN_CORRESPONDENCES} correspondences are required, got {}",
        grid_points.len()
    );

    let source = source.as_ref();
    let fail = |reason: String| SolveFailure {
        image: source.to_path_buf(),
        reason,
    };

    let camera = intrinsics.camera_model();
    let solution = solve_pnp(grid_points, observed, &camera, PnPMethod::default())
        .map_err(|e| fail(e.to_string()))?;

    let rvec = solution.rvec;
    let tvec = solution.translation;
    let r_cn = rotation_vector_to_matrix(&rvec).map_err(|e| fail(e.to_string()))?;

    let r_mat = DMat3::from_cols_array_2d(&r_cn).transpose();
    let t_vec = DVec3::from_array(tvec);

    let mut reprojection_errors = Vec::with_capacity(grid_points.len());
    for (point, uv) in grid_points.iter().zip(observed.iter()) {
        let pc = r_mat * DVec3::from_array(*point) + t_vec;
        let [u, v] = camera
            .project_point(&pc.to_array())
            .ok_or_else(|| fail("grid point projects behind the camera".to_string()))?;
        reprojection_errors.push((u - uv[0]).hypot(v - uv[1]));
    }
    if !reprojection_errors.iter().all(|e| e.is_finite()) {
        return Err(fail("non-finite reprojection error".to_string()));
    }

    let (rotation, position) = invert_pose(&r_cn, &tvec);

    log::debug!(
        "{}: rCNn = {:?}, solver iterations = {:?}",
        source.display(),
        position,
        solution.num_iterations
    );

    Ok(PoseEstimate {
        source: source.to_path_buf(),
        position,
        rotation,
        rvec,
        tvec,
        reprojection_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::generate_grid_points;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(
            [[900.0, 0.0, 640.0], [0.0, 900.0, 360.0], [0.0, 0.0, 1.0]],
            &[0.0; 5],
            1280,
            720,
        )
        .expect("valid intrinsics")
    }

    #[test]
    #[should_panic]
    fn test_solve_pose_length_mismatch_panics() {
        let grid = generate_grid_points(3, 3, 0.1).expect("valid grid");
        let _ = solve_pose(&grid, &[[0.0, 0.0]; 8], &intrinsics(), "a.png");
    }

    #[test]
    #[should_panic]
    fn test_solve_pose_too_few_points_panics() {
        let grid = generate_grid_points(3, 1, 0.1).expect("valid grid");
        let _ = solve_pose(&grid, &[[0.0, 0.0]; 3], &intrinsics(), "a.png");
    }

    #[test]
    fn test_solve_pose_collinear_is_failure() {
        let grid = generate_grid_points(6, 1, 0.1).expect("valid grid");
        let observed: Vec<[f64; 2]> = (0..6).map(|i| [600.0 + 20.0 * i as f64, 360.0]).collect();
        let failure = solve_pose(&grid, &observed, &intrinsics(), "line.png")
            .expect_err("collinear grid does not determine a pose");
        assert_eq!(failure.image, PathBuf::from("line.png"));
    }

    #[test]
    fn test_pose_estimate_statistics() {
        let pose = PoseEstimate {
            source: PathBuf::from("/data/img_07.png"),
            position: [0.0; 3],
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            rvec: [0.0; 3],
            tvec: [0.0; 3],
            reprojection_errors: vec![0.0, 1.0, 2.0, 3.0],
        };
        assert_eq!(pose.source_stem(), "img_07");
        assert_relative_eq!(pose.rms_error(), 3.5f64.sqrt());
        assert_relative_eq!(pose.mean_error(), 1.5);
    }
}
