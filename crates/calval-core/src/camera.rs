use crate::io::{add_extension, read_yaml, write_yaml, ConfigError, MatrixRecord};
use crate::report::format_significant;
use calval_pnp::{CameraModel, PolynomialDistortion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Absolute tolerance for the zero entries below the camera matrix diagonal.
const LOWER_TRIANGLE_ATOL: f64 = 1e-8;

/// Significant digits used when printing camera parameters.
const DISPLAY_DIGITS: usize = 7;

/// Persisted layout of the camera parameters file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraParamsRecord {
    /// Image width in pixels.
    pub image_width: u32,
    /// Image height in pixels.
    pub image_height: u32,
    /// 3x3 camera matrix.
    pub camera_matrix: MatrixRecord,
    /// Distortion coefficients `(k1, k2, p1, p2[, k3])`.
    pub distortion_coefficients: MatrixRecord,
}

/// Validated camera intrinsics: camera matrix, distortion and image size.
///
/// The camera matrix is upper triangular with positive focal lengths. The
/// distortion follows the OpenCV order `(k1, k2, p1, p2, k3)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraIntrinsics {
    camera_matrix: [[f64; 3]; 3],
    distortion: [f64; 5],
    image_width: u32,
    image_height: u32,
    source: Option<PathBuf>,
}

impl CameraIntrinsics {
    /// Create validated intrinsics.
    ///
    /// # Arguments
    ///
    /// * `camera_matrix` - Row-major 3x3 camera matrix.
    /// * `distortion` - 4 or 5 distortion coefficients; a missing `k3` is zero.
    /// * `image_width` - Image width in pixels.
    /// * `image_height` - Image height in pixels.
    pub fn new(
        camera_matrix: [[f64; 3]; 3],
        distortion: &[f64],
        image_width: u32,
        image_height: u32,
    ) -> Result<Self, ConfigError> {
        let lower = [camera_matrix[1][0], camera_matrix[2][0], camera_matrix[2][1]];
        // NaN fails the comparison as well
        if !lower.iter().all(|v| v.abs() <= LOWER_TRIANGLE_ATOL) {
            return Err(ConfigError::NotUpperTriangular(camera_matrix));
        }
        if !camera_matrix.iter().flatten().all(|v| v.is_finite()) {
            return Err(ConfigError::InvalidIntrinsics(
                "camera matrix entries must be finite".to_string(),
            ));
        }
        let (fx, fy) = (camera_matrix[0][0], camera_matrix[1][1]);
        if fx <= 0.0 || fy <= 0.0 {
            return Err(ConfigError::InvalidIntrinsics(format!(
                "focal lengths must be positive, got fx={fx}, fy={fy}"
            )));
        }
        if (camera_matrix[2][2] - 1.0).abs() > LOWER_TRIANGLE_ATOL {
            return Err(ConfigError::InvalidIntrinsics(format!(
                "expected the bottom-right camera matrix entry to be 1, got {}",
                camera_matrix[2][2]
            )));
        }
        if camera_matrix[0][1] != 0.0 {
            log::warn!(
                "camera matrix has a non-zero skew term {}, it is ignored by the projection",
                camera_matrix[0][1]
            );
        }

        let distortion = match *distortion {
            [k1, k2, p1, p2] => [k1, k2, p1, p2, 0.0],
            [k1, k2, p1, p2, k3] => [k1, k2, p1, p2, k3],
            _ => {
                return Err(ConfigError::InvalidIntrinsics(format!(
                    "expected 4 or 5 distortion coefficients, got {}",
                    distortion.len()
                )))
            }
        };
        if !distortion.iter().all(|v| v.is_finite()) {
            return Err(ConfigError::InvalidIntrinsics(
                "distortion coefficients must be finite".to_string(),
            ));
        }

        if image_width == 0 || image_height == 0 {
            return Err(ConfigError::InvalidIntrinsics(format!(
                "image size must be positive, got {image_width}x{image_height}"
            )));
        }

        Ok(Self {
            camera_matrix,
            distortion,
            image_width,
            image_height,
            source: None,
        })
    }

    /// Validate a deserialized camera parameters record.
    pub fn from_record(record: &CameraParamsRecord) -> Result<Self, ConfigError> {
        let camera_matrix = record.camera_matrix.to_matrix3("camera_matrix")?;
        let distortion = record
            .distortion_coefficients
            .to_vector("distortion_coefficients")?;
        Self::new(
            camera_matrix,
            &distortion,
            record.image_width,
            record.image_height,
        )
    }

    /// Load and validate camera parameters from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let record: CameraParamsRecord = read_yaml(path)?;
        let mut intrinsics = Self::from_record(&record)?;
        intrinsics.source = Some(path.to_path_buf());
        log::debug!("loaded camera parameters from {}", path.display());
        Ok(intrinsics)
    }

    /// The persisted representation of these intrinsics.
    pub fn to_record(&self) -> CameraParamsRecord {
        CameraParamsRecord {
            image_width: self.image_width,
            image_height: self.image_height,
            camera_matrix: MatrixRecord::from_matrix3(&self.camera_matrix),
            distortion_coefficients: MatrixRecord {
                rows: 1,
                cols: 5,
                data: self.distortion.to_vec(),
            },
        }
    }

    /// Write the intrinsics to a YAML file, appending `.yaml` when the path has no extension.
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
        let path = add_extension(path, "yaml")?;
        write_yaml(&path, &self.to_record())?;
        Ok(path)
    }

    /// Row-major 3x3 camera matrix.
    pub fn camera_matrix(&self) -> &[[f64; 3]; 3] {
        &self.camera_matrix
    }

    /// Distortion coefficients `(k1, k2, p1, p2, k3)`.
    pub fn distortion(&self) -> &[f64; 5] {
        &self.distortion
    }

    /// Image width in pixels.
    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    /// Image height in pixels.
    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    /// File the intrinsics were loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Focal lengths and principal point `(fx, fy, cx, cy)`.
    pub fn affine(&self) -> (f64, f64, f64, f64) {
        let k = &self.camera_matrix;
        (k[0][0], k[1][1], k[0][2], k[1][2])
    }

    /// Camera model used by the PnP solvers.
    pub fn camera_model(&self) -> CameraModel {
        let (fx, fy, cx, cy) = self.affine();
        let [k1, k2, p1, p2, k3] = self.distortion;
        CameraModel::with_distortion(
            calval_pnp::CameraIntrinsics::new(fx, fy, cx, cy),
            PolynomialDistortion {
                k3,
                ..PolynomialDistortion::radial_tangential(k1, k2, p1, p2)
            },
        )
    }

    /// Render the affine and distortion parameters as a LaTeX tabular.
    ///
    /// `precision` is the number of significant digits per value.
    pub fn as_latex_table(&self, precision: usize) -> String {
        let (fx, fy, cx, cy) = self.affine();
        let [k1, k2, p1, p2, k3] = self.distortion;
        let values = [fx, fy, cx, cy, k1, k2, p1, p2, k3];
        let headings = [
            "\\(f_x\\)",
            "\\(f_y\\)",
            "\\(c_x\\)",
            "\\(c_y\\)",
            "\\(k_1\\)",
            "\\(k_2\\)",
            "\\(p_1\\)",
            "\\(p_2\\)",
            "\\(k_3\\)",
        ];

        let tab = "    ";
        let row = values
            .iter()
            .map(|v| format_significant(*v, precision))
            .collect::<Vec<_>>()
            .join(" & ");

        let mut table = String::from("%% LaTeX interpretable string: \n");
        table.push_str(&format!("\\begin{{tabular}}{{{}}}\n", "c".repeat(headings.len())));
        table.push_str(&format!("{tab}{}\\\\ \\hline \n", headings.join(" & ")));
        table.push_str(&format!("{tab}{row}\\\\ \\hline \n"));
        table.push_str("\\end{tabular}\n%%");
        table
    }
}

impl fmt::Display for CameraIntrinsics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = |v: f64| format_significant(v, DISPLAY_DIGITS);
        let (fx, fy, cx, cy) = self.affine();
        let [k1, k2, p1, p2, k3] = self.distortion;

        writeln!(f, "Camera")?;
        writeln!(f, "Image size: {}x{}", self.image_width, self.image_height)?;
        writeln!(
            f,
            "Affine params: fx: {}, fy: {}, cx: {}, cy: {}",
            g(fx),
            g(fy),
            g(cx),
            g(cy)
        )?;
        writeln!(
            f,
            "Distortion params: k1: {}, k2: {}, p1: {}, p2: {}, k3: {}",
            g(k1),
            g(k2),
            g(p1),
            g(p2),
            g(k3)
        )
    }
}
