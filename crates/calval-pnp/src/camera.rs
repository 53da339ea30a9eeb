//! Camera models and distortion handling for PnP solvers.
use thiserror::Error;

/// Error types for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Invalid camera intrinsics matrix
    #[error("Invalid camera intrinsics matrix: {0}")]
    InvalidIntrinsics(String),

    /// Invalid distortion parameters
    #[error("Invalid distortion parameters: {0}")]
    InvalidDistortion(String),

    /// Failed to undistort point
    #[error("Failed to undistort point: {0}")]
    UndistortFailed(String),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Represents the intrinsic parameters of a pinhole camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in x direction
    pub fx: f64,
    /// Focal length in y direction
    pub fy: f64,
    /// Principal point x coordinate
    pub cx: f64,
    /// Principal point y coordinate
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Create camera intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Create camera intrinsics from a 3x3 intrinsics matrix.
    ///
    /// The shear term `k[0][1]` is not part of the model and is ignored.
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> CameraResult<Self> {
        if k[1][0] != 0.0 || k[2][0] != 0.0 || k[2][1] != 0.0 || k[2][2] != 1.0 {
            return Err(CameraError::InvalidIntrinsics(
                "Intrinsics matrix must have form [[fx, s, cx], [0, fy, cy], [0, 0, 1]]"
                    .to_string(),
            ));
        }
        if k[0][0] <= 0.0 || k[1][1] <= 0.0 {
            return Err(CameraError::InvalidIntrinsics(format!(
                "focal lengths must be positive, got fx={}, fy={}",
                k[0][0], k[1][1]
            )));
        }

        Ok(Self {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
        })
    }

    /// Convert to 3x3 intrinsics matrix.
    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }
}

/// Represents polynomial distortion parameters using the Brown-Conrady model.
///
/// The radial part is the rational model `(1 + k1 r² + k2 r⁴ + k3 r⁶) / (1 + k4 r² + k5 r⁴ + k6 r⁶)`.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct PolynomialDistortion {
    /// Radial distortion coefficients
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
    /// Tangential distortion coefficients
    pub p1: f64,
    pub p2: f64,
}

impl PolynomialDistortion {
    /// Create distortion parameters with all coefficients set to zero (no distortion).
    pub fn none() -> Self {
        Self::radial(0.0, 0.0)
    }

    /// Create distortion parameters with only first two radial coefficients.
    pub fn radial(k1: f64, k2: f64) -> Self {
        Self::radial_tangential(k1, k2, 0.0, 0.0)
    }

    /// Create distortion parameters with radial and tangential coefficients.
    pub fn radial_tangential(k1: f64, k2: f64, p1: f64, p2: f64) -> Self {
        Self {
            k1,
            k2,
            k3: 0.0,
            k4: 0.0,
            k5: 0.0,
            k6: 0.0,
            p1,
            p2,
        }
    }

    /// Build distortion parameters from an OpenCV-ordered coefficient vector.
    ///
    /// Accepted layouts: `(k1, k2, p1, p2)`, `(k1, k2, p1, p2, k3)` and
    /// `(k1, k2, p1, p2, k3, k4, k5, k6)`.
    pub fn from_coefficients(coeffs: &[f64]) -> CameraResult<Self> {
        let mut d = match coeffs.len() {
            4 | 5 | 8 => Self::radial_tangential(coeffs[0], coeffs[1], coeffs[2], coeffs[3]),
            n => {
                return Err(CameraError::InvalidDistortion(format!(
                    "expected 4, 5 or 8 coefficients, got {n}"
                )))
            }
        };
        if coeffs.len() >= 5 {
            d.k3 = coeffs[4];
        }
        if coeffs.len() == 8 {
            d.k4 = coeffs[5];
            d.k5 = coeffs[6];
            d.k6 = coeffs[7];
        }
        if !d.to_coefficients().iter().all(|c| c.is_finite()) {
            return Err(CameraError::InvalidDistortion(
                "coefficients must be finite".to_string(),
            ));
        }
        Ok(d)
    }

    /// OpenCV-ordered coefficients `(k1, k2, p1, p2, k3, k4, k5, k6)`.
    pub fn to_coefficients(&self) -> [f64; 8] {
        [
            self.k1, self.k2, self.p1, self.p2, self.k3, self.k4, self.k5, self.k6,
        ]
    }

    /// Check if there is any distortion.
    pub fn has_distortion(&self) -> bool {
        self.to_coefficients().iter().any(|&c| c != 0.0)
    }

    /// Apply the distortion model to a normalized image point.
    pub fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let kr = (1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6)
            / (1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6);

        let x_2 = 2.0 * x;
        let y_2 = 2.0 * y;
        let xy_2 = x_2 * y;
        let xd = x * kr + xy_2 * self.p1 + self.p2 * (r2 + x_2 * x);
        let yd = y * kr + self.p1 * (r2 + y_2 * y) + xy_2 * self.p2;
        (xd, yd)
    }
}

/// A complete camera model with intrinsics and optional distortion.
#[derive(Debug, Clone)]
pub struct CameraModel {
    /// Camera intrinsics
    pub intrinsics: CameraIntrinsics,
    /// Distortion parameters (None for no distortion)
    pub distortion: Option<PolynomialDistortion>,
}

impl CameraModel {
    /// Create a camera model without distortion.
    pub fn pinhole(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: None,
        }
    }

    /// Create a camera model with distortion.
    pub fn with_distortion(intrinsics: CameraIntrinsics, distortion: PolynomialDistortion) -> Self {
        Self {
            intrinsics,
            distortion: Some(distortion),
        }
    }

    /// Check if the camera has distortion.
    pub fn has_distortion(&self) -> bool {
        self.distortion.as_ref().is_some_and(|d| d.has_distortion())
    }

    /// Get the intrinsics matrix for use with existing PnP solvers.
    pub fn intrinsics_matrix(&self) -> [[f64; 3]; 3] {
        self.intrinsics.to_matrix()
    }

    /// Project a camera-frame point to (distorted) pixel coordinates.
    ///
    /// Returns `None` for points with non-positive depth.
    pub fn project_point(&self, pc: &[f64; 3]) -> Option<[f64; 2]> {
        if pc[2] <= 0.0 {
            return None;
        }
        let x = pc[0] / pc[2];
        let y = pc[1] / pc[2];
        let (xd, yd) = match &self.distortion {
            Some(d) => d.distort_normalized(x, y),
            None => (x, y),
        };
        let intr = &self.intrinsics;
        Some([intr.fx * xd + intr.cx, intr.fy * yd + intr.cy])
    }

    /// Undistort a point using iterative method.
    pub fn undistort_point(&self, x: f64, y: f64) -> CameraResult<(f64, f64)> {
        if let Some(distortion) = &self.distortion {
            self.undistort_point_iterative(x, y, distortion)
        } else {
            Ok((x, y))
        }
    }

    /// Undistort multiple points.
    pub fn undistort_points(&self, points: &[[f64; 2]]) -> CameraResult<Vec<[f64; 2]>> {
        points
            .iter()
            .map(|&[x, y]| self.undistort_point(x, y).map(|(ux, uy)| [ux, uy]))
            .collect()
    }

    /// Apply distortion to a point.
    pub fn distort_point(&self, x: f64, y: f64) -> (f64, f64) {
        match &self.distortion {
            Some(distortion) => {
                let intr = &self.intrinsics;
                let xn = (x - intr.cx) / intr.fx;
                let yn = (y - intr.cy) / intr.fy;
                let (xd, yd) = distortion.distort_normalized(xn, yn);
                (intr.fx * xd + intr.cx, intr.fy * yd + intr.cy)
            }
            None => (x, y),
        }
    }

    /// Distort multiple points.
    pub fn distort_points(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        points
            .iter()
            .map(|&[x, y]| {
                let (dx, dy) = self.distort_point(x, y);
                [dx, dy]
            })
            .collect()
    }

    /// Iterative undistortion using the Brown-Conrady model.
    fn undistort_point_iterative(
        &self,
        x_distorted: f64,
        y_distorted: f64,
        d: &PolynomialDistortion,
    ) -> CameraResult<(f64, f64)> {
        const MAX_ITERATIONS: usize = 20;
        const EPSILON: f64 = 1e-12;

        let intr = &self.intrinsics;
        let x0 = (x_distorted - intr.cx) / intr.fx;
        let y0 = (y_distorted - intr.cy) / intr.fy;

        let mut x = x0;
        let mut y = y0;

        for _ in 0..MAX_ITERATIONS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let icdist = (1.0 + d.k4 * r2 + d.k5 * r4 + d.k6 * r6)
                / (1.0 + d.k1 * r2 + d.k2 * r4 + d.k3 * r6);
            if !icdist.is_finite() || icdist < 0.0 {
                return Err(CameraError::UndistortFailed(format!(
                    "radial model is not invertible at ({x_distorted}, {y_distorted})"
                )));
            }
            let delta_x = 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
            let delta_y = d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;
            let x_next = (x0 - delta_x) * icdist;
            let y_next = (y0 - delta_y) * icdist;

            let converged = (x_next - x).abs() < EPSILON && (y_next - y).abs() < EPSILON;
            x = x_next;
            y = y_next;
            if converged {
                break;
            }
        }

        Ok((intr.fx * x + intr.cx, intr.fy * y + intr.cy))
    }
}

impl Default for CameraModel {
    fn default() -> Self {
        Self::pinhole(CameraIntrinsics::new(1000.0, 1000.0, 640.0, 480.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_camera_intrinsics_from_matrix() -> CameraResult<()> {
        let k = [[1000.0, 0.0, 640.0], [0.0, 1000.0, 480.0], [0.0, 0.0, 1.0]];
        let intrinsics = CameraIntrinsics::from_matrix(&k)?;
        assert_eq!(intrinsics.fx, 1000.0);
        assert_eq!(intrinsics.fy, 1000.0);
        assert_eq!(intrinsics.cx, 640.0);
        assert_eq!(intrinsics.cy, 480.0);
        assert_eq!(intrinsics.to_matrix(), k);
        Ok(())
    }

    #[test]
    fn test_camera_intrinsics_rejects_lower_triangle() {
        let k = [[1000.0, 0.0, 640.0], [3.0, 1000.0, 480.0], [0.0, 0.0, 1.0]];
        assert!(CameraIntrinsics::from_matrix(&k).is_err());
    }

    #[test]
    fn test_distortion_from_coefficients() -> CameraResult<()> {
        let d = PolynomialDistortion::from_coefficients(&[0.1, -0.2, 0.001, 0.002, 0.05])?;
        assert_eq!(d.k1, 0.1);
        assert_eq!(d.k2, -0.2);
        assert_eq!(d.p1, 0.001);
        assert_eq!(d.p2, 0.002);
        assert_eq!(d.k3, 0.05);
        assert_eq!(d.k4, 0.0);

        let d4 = PolynomialDistortion::from_coefficients(&[0.1, -0.2, 0.0, 0.0])?;
        assert_eq!(d4.k3, 0.0);

        assert!(PolynomialDistortion::from_coefficients(&[0.1, 0.2, 0.3]).is_err());
        assert!(PolynomialDistortion::from_coefficients(&[f64::NAN, 0.0, 0.0, 0.0]).is_err());
        Ok(())
    }

    #[test]
    fn test_distortion_none() {
        assert!(!PolynomialDistortion::none().has_distortion());
        assert!(PolynomialDistortion::radial(0.1, 0.01).has_distortion());
    }

    #[test]
    fn test_project_point_pinhole() {
        let camera = CameraModel::pinhole(CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0));
        let uv = camera.project_point(&[0.1, -0.2, 2.0]);
        assert_eq!(uv, Some([360.0, 160.0]));
        assert!(camera.project_point(&[0.1, 0.1, -1.0]).is_none());
    }

    #[test]
    fn test_distort_undistort_roundtrip() -> CameraResult<()> {
        let intrinsics = CameraIntrinsics::new(1000.0, 1000.0, 640.0, 480.0);
        let distortion = PolynomialDistortion {
            k3: 0.002,
            ..PolynomialDistortion::radial_tangential(-0.12, 0.03, 0.0005, -0.0004)
        };
        let camera = CameraModel::with_distortion(intrinsics, distortion);

        for original in [[100.0, 200.0], [1200.0, 900.0], [640.0, 480.0]] {
            let (dx, dy) = camera.distort_point(original[0], original[1]);
            let (ux, uy) = camera.undistort_point(dx, dy)?;
            assert_relative_eq!(ux, original[0], epsilon = 1e-6);
            assert_relative_eq!(uy, original[1], epsilon = 1e-6);
        }
        Ok(())
    }
}
