use glam::{DMat3, DVec3};

/// Row-major 3x3 rotation matrix.
pub type Rotation = [[f64; 3]; 3];

/// Translation (or position) vector.
pub type Translation = [f64; 3];

/// An error type for the geometry utilities.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum GeometryError {
    /// The rotation vector does not hold exactly three finite components.
    #[error("Invalid rotation vector: expected 3 finite components, got {0:?}")]
    InvalidRotation(Vec<f64>),

    /// The grid dimensions or square size are not strictly positive.
    #[error("Invalid grid dimensions: {width}x{height} with square size {square_size}")]
    InvalidGridDimensions {
        /// Number of inner corners along the fast axis.
        width: usize,
        /// Number of inner corners along the slow axis.
        height: usize,
        /// Physical size of one square.
        square_size: f64,
    },
}

/// Generate the 3D corner positions of a planar calibration grid.
///
/// The points lie in the z=0 plane of the grid frame and are laid out in
/// raster order: the x index runs fastest, matching the order in which corner
/// detectors report checkerboard corners.
///
/// # Arguments
///
/// * `width` - Number of inner corners along x.
/// * `height` - Number of inner corners along y.
/// * `square_size` - Distance between adjacent corners.
///
/// # Returns
///
/// `width * height` points `(i * square_size, j * square_size, 0)`.
pub fn generate_grid_points(
    width: usize,
    height: usize,
    square_size: f64,
) -> Result<Vec<[f64; 3]>, GeometryError> {
    if width == 0 || height == 0 || !(square_size.is_finite() && square_size > 0.0) {
        return Err(GeometryError::InvalidGridDimensions {
            width,
            height,
            square_size,
        });
    }

    let points = (0..height)
        .flat_map(|j| (0..width).map(move |i| [i as f64 * square_size, j as f64 * square_size, 0.0]))
        .collect();

    Ok(points)
}

/// Convert a Rodrigues rotation vector into a rotation matrix.
///
/// The vector direction is the rotation axis and its norm the angle in radians.
pub fn rotation_vector_to_matrix(rvec: &[f64]) -> Result<Rotation, GeometryError> {
    match rvec {
        [x, y, z] if rvec.iter().all(|v| v.is_finite()) => {
            Ok(calval_pnp::rvec_to_matrix(&[*x, *y, *z]))
        }
        _ => Err(GeometryError::InvalidRotation(rvec.to_vec())),
    }
}

/// Invert a rigid transform.
///
/// If `(r, t)` maps frame B coordinates into frame A (`pa = r * pb + t`), the
/// result maps frame A into frame B: `r_inv = rᵀ`, `t_inv = -r_inv * t`.
pub fn invert_pose(r: &Rotation, t: &Translation) -> (Rotation, Translation) {
    // glam is column-major, so the row-major input read as columns is already rᵀ
    let r_inv = DMat3::from_cols_array_2d(r);
    let t_inv = -(r_inv * DVec3::from_array(*t));

    (r_inv.transpose().to_cols_array_2d(), t_inv.to_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_generate_grid_points_raster_order() -> Result<(), GeometryError> {
        let points = generate_grid_points(3, 2, 0.5)?;
        assert_eq!(
            points,
            vec![
                [0.0, 0.0, 0.0],
                [0.5, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 0.5, 0.0],
                [0.5, 0.5, 0.0],
                [1.0, 0.5, 0.0],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_generate_grid_points_invalid() {
        assert!(generate_grid_points(0, 4, 1.0).is_err());
        assert!(generate_grid_points(4, 0, 1.0).is_err());
        assert!(generate_grid_points(4, 4, 0.0).is_err());
        assert!(generate_grid_points(4, 4, -0.1).is_err());
        assert!(generate_grid_points(4, 4, f64::NAN).is_err());
    }

    #[test]
    fn test_rotation_vector_to_matrix() -> Result<(), GeometryError> {
        let r = rotation_vector_to_matrix(&[0.0, 0.0, std::f64::consts::FRAC_PI_2])?;
        let expected = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(r[i][j], expected[i][j], epsilon = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn test_rotation_vector_wrong_length() {
        assert_eq!(
            rotation_vector_to_matrix(&[0.1, 0.2]),
            Err(GeometryError::InvalidRotation(vec![0.1, 0.2]))
        );
        assert!(rotation_vector_to_matrix(&[0.1, 0.2, 0.3, 0.4]).is_err());
        assert!(rotation_vector_to_matrix(&[0.1, f64::INFINITY, 0.3]).is_err());
    }

    #[test]
    fn test_invert_pose() -> Result<(), GeometryError> {
        let r = rotation_vector_to_matrix(&[0.0, 0.0, std::f64::consts::FRAC_PI_2])?;
        let t = [1.0, 2.0, 3.0];
        let (r_inv, t_inv) = invert_pose(&r, &t);

        // rotation by -90 degrees around z
        let expected_r = [[0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(r_inv[i][j], expected_r[i][j], epsilon = 1e-12);
            }
        }
        assert_relative_eq!(t_inv[0], -2.0, epsilon = 1e-12);
        assert_relative_eq!(t_inv[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(t_inv[2], -3.0, epsilon = 1e-12);
        Ok(())
    }
}
