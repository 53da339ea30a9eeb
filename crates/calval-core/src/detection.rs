use crate::grid::GridSpec;
use crate::io::{read_yaml, ConfigError, MatrixRecord};
use std::path::{Path, PathBuf};

/// An error type for pattern detection.
#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    /// The detector output could not be read.
    #[error("Failed to read the detected corners. {0}")]
    Config(#[from] ConfigError),

    /// Detector specific failure.
    #[error("Pattern detection failed for {image}: {reason}")]
    Detector {
        /// Image being processed.
        image: PathBuf,
        /// Description of the failure.
        reason: String,
    },
}

/// Outcome of running the pattern detector on one image.
///
/// `corners` is `None` when no grid was found. When present it holds one
/// pixel coordinate per grid point, in the grid's raster order.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// Image the detection belongs to.
    pub source: PathBuf,
    /// Detected corners, if any.
    pub corners: Option<Vec<[f64; 2]>>,
}

impl DetectionResult {
    /// A successful detection.
    pub fn detected(source: impl Into<PathBuf>, corners: Vec<[f64; 2]>) -> Self {
        Self {
            source: source.into(),
            corners: Some(corners),
        }
    }

    /// A detection miss.
    pub fn missed(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            corners: None,
        }
    }

    /// Whether a grid was found.
    pub fn is_detected(&self) -> bool {
        self.corners.is_some()
    }
}

/// Finds the calibration grid corners in an image.
pub trait PatternDetector: Sync {
    /// Detect `grid` in `image`.
    ///
    /// A missing grid is a regular outcome ([`DetectionResult::missed`]), not an error.
    fn detect(&self, image: &Path, grid: &GridSpec) -> Result<DetectionResult, DetectError>;
}

/// Detector reading precomputed corners from a sidecar file next to each image.
///
/// For `dir/img_01.png` the corners are read from `dir/img_01.corners.yaml`,
/// an `N x 2` matrix record with one row per corner.
#[derive(Debug, Clone, Default)]
pub struct CornerFileDetector;

impl CornerFileDetector {
    /// Sidecar file extension.
    pub const SIDECAR_EXTENSION: &'static str = "corners.yaml";

    /// Path of the sidecar holding the corners of `image`.
    pub fn sidecar_path(image: &Path) -> PathBuf {
        image.with_extension(Self::SIDECAR_EXTENSION)
    }
}

impl PatternDetector for CornerFileDetector {
    fn detect(&self, image: &Path, grid: &GridSpec) -> Result<DetectionResult, DetectError> {
        let sidecar = Self::sidecar_path(image);
        if !sidecar.is_file() {
            log::debug!("no corners found for {}", image.display());
            return Ok(DetectionResult::missed(image));
        }

        let record: MatrixRecord = read_yaml(&sidecar)?;
        let corners = record.to_points2("corners")?;

        if corners.len() != grid.num_points() {
            log::warn!(
                "{}: expected {} corners for a {}x{} grid, found {}",
                sidecar.display(),
                grid.num_points(),
                grid.width(),
                grid.height(),
                corners.len()
            );
            return Ok(DetectionResult::missed(image));
        }

        Ok(DetectionResult::detected(image, corners))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_yaml;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            CornerFileDetector::sidecar_path(Path::new("/data/calibration/img.01.PNG")),
            PathBuf::from("/data/calibration/img.01.corners.yaml")
        );
    }

    #[test]
    fn test_corner_file_detector() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let grid = GridSpec::new(2, 2, 1.0)?;
        let detector = CornerFileDetector;

        let image = tmp_dir.path().join("a.png");
        let corners = vec![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]];
        write_yaml(
            CornerFileDetector::sidecar_path(&image),
            &MatrixRecord::from_points2(&corners),
        )?;
        let res = detector.detect(&image, &grid)?;
        assert_eq!(res, DetectionResult::detected(&image, corners));

        // no sidecar
        let res = detector.detect(&tmp_dir.path().join("b.png"), &grid)?;
        assert!(!res.is_detected());

        // wrong number of corners
        let image = tmp_dir.path().join("c.png");
        write_yaml(
            CornerFileDetector::sidecar_path(&image),
            &MatrixRecord::from_points2(&[[1.0, 2.0]]),
        )?;
        assert!(!detector.detect(&image, &grid)?.is_detected());

        // malformed sidecar
        let image = tmp_dir.path().join("d.png");
        std::fs::write(
            CornerFileDetector::sidecar_path(&image),
            "rows: 2\ncols: 2\ndata: [1.0]\n",
        )?;
        assert!(matches!(
            detector.detect(&image, &grid),
            Err(DetectError::Config(ConfigError::MatrixDataLength { .. }))
        ));
        Ok(())
    }
}
