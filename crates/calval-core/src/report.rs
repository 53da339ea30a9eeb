use crate::aggregate::ValidationSummary;
use crate::io::{write_yaml, ConfigError, MatrixRecord};
use crate::pose::PoseEstimate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Significant digits of the summary statistics.
pub const SUMMARY_DIGITS: usize = 4;

/// An error type for the pose export.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    /// Error to prepare the export directory.
    #[error("Failed to prepare the export directory {path}. {source}")]
    DirectoryError {
        /// Export directory.
        path: PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },

    /// Two poses would be written to the same file.
    #[error("Images {first} and {second} would both be exported as {file_name}")]
    DuplicateFileName {
        /// Shared export file name.
        file_name: String,
        /// First image with that name.
        first: PathBuf,
        /// Second image with that name.
        second: PathBuf,
    },

    /// Error to write a pose file.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Persisted layout of an exported pose.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    /// Camera position in the grid frame, 3x1.
    pub rCNn: MatrixRecord,
    /// Camera-to-grid rotation, 3x3.
    pub Rnc: MatrixRecord,
    /// Root mean square reprojection error of the image.
    pub reprojection_error: f64,
}

impl From<&PoseEstimate> for PoseRecord {
    fn from(pose: &PoseEstimate) -> Self {
        Self {
            rCNn: MatrixRecord::from_column(&pose.position),
            Rnc: MatrixRecord::from_matrix3(&pose.rotation),
            reprojection_error: pose.rms_error(),
        }
    }
}

/// Format a value with `digits` significant digits, `%g` style.
///
/// Trailing zeros are dropped and scientific notation is used for exponents
/// below -4 or at least `digits`.
pub fn format_significant(value: f64, digits: usize) -> String {
    let digits = digits.max(1);
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let scientific = format!("{:.*e}", digits - 1, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return scientific;
    };

    if exponent < -4 || exponent >= digits as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exponent.abs())
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Human readable report of a validation run.
pub fn format_summary(summary: &ValidationSummary) -> String {
    let g = |v: f64| format_significant(v, SUMMARY_DIGITS);
    let stats = &summary.statistics;

    let mut out = format!(
        "Reprojection error from {} image frames, each with {} points:\n",
        summary.images_posed, summary.points_per_image
    );
    out.push_str(&format!("  RMS: {} [pix]\n", g(stats.rms)));
    out.push_str(&format!(" Mean: {} [pix]\n", g(stats.mean)));
    out.push_str(&format!("  STD: {} [pix]\n", g(stats.std)));
    out.push_str(&format!(
        "Images: {} found, {} with a calibration grid, {} posed\n",
        summary.images_found, summary.images_detected, summary.images_posed
    ));

    if !summary.failed.is_empty() {
        out.push_str(&format!(
            "Failed to solve the pose of {} out of {} images with a calibration grid:\n",
            summary.failed.len(),
            summary.images_detected
        ));
        for failure in &summary.failed {
            out.push_str(&format!("  {}: {}\n", failure.image.display(), failure.reason));
        }
    }
    out
}

/// File name of the exported pose of `pose`.
pub fn pose_file_name(pose: &PoseEstimate) -> String {
    format!("pose_{}.yaml", pose.source_stem())
}

/// Write one `pose_<image stem>.yaml` file per pose into `dir`.
///
/// `dir` is removed first if it exists, then recreated. Poses whose images
/// share a file stem are rejected before anything is touched.
pub fn export_poses(poses: &[PoseEstimate], dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, ExportError> {
    let dir = dir.as_ref();

    let mut sources = HashMap::with_capacity(poses.len());
    for pose in poses {
        let file_name = pose_file_name(pose);
        if let Some(first) = sources.insert(file_name.clone(), &pose.source) {
            return Err(ExportError::DuplicateFileName {
                file_name,
                first: first.clone(),
                second: pose.source.clone(),
            });
        }
    }

    let dir_error = |source| ExportError::DirectoryError {
        path: dir.to_path_buf(),
        source,
    };

    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(dir_error)?;
    }
    std::fs::create_dir_all(dir).map_err(dir_error)?;

    let mut written = Vec::with_capacity(poses.len());
    for pose in poses {
        let path = dir.join(pose_file_name(pose));
        write_yaml(&path, &PoseRecord::from(pose))?;
        written.push(path);
    }
    log::info!("exported {} poses to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::SolveFailure;
    use crate::stats::ErrorStatistics;

    #[test]
    fn test_format_significant() {
        assert_eq!(format_significant(3.5f64.sqrt(), 4), "1.871");
        assert_eq!(format_significant(1.5, 4), "1.5");
        assert_eq!(format_significant(1.25f64.sqrt(), 4), "1.118");
        assert_eq!(format_significant(0.0, 4), "0");
        assert_eq!(format_significant(12346.0, 4), "1.235e+04");
        assert_eq!(format_significant(0.000123456, 4), "0.0001235");
        assert_eq!(format_significant(0.0000123456, 4), "1.235e-05");
        assert_eq!(format_significant(-0.25, 7), "-0.25");
        assert_eq!(format_significant(999.96, 4), "1000");
        assert_eq!(format_significant(9999.6, 4), "1e+04");
    }

    fn summary(failed: Vec<SolveFailure>) -> ValidationSummary {
        ValidationSummary {
            statistics: ErrorStatistics::from_samples(&[0.0, 1.0, 2.0, 3.0]).expect("non empty"),
            images_found: 3,
            images_detected: 2 + failed.len(),
            images_posed: 2,
            points_per_image: 2,
            failed,
        }
    }

    #[test]
    fn test_format_summary() {
        let text = format_summary(&summary(vec![]));
        assert_eq!(
            text,
            "Reprojection error from 2 image frames, each with 2 points:\n  RMS: 1.871 [pix]\n Mean: 1.5 [pix]\n  STD: 1.118 [pix]\nImages: 3 found, 2 with a calibration grid, 2 posed\n"
        );

        let text = format_summary(&summary(vec![SolveFailure {
            image: PathBuf::from("c.png"),
            reason: "degenerate".to_string(),
        }]));
        assert!(text.contains("Images: 3 found, 3 with a calibration grid, 2 posed\n"));
        assert!(text.contains("Failed to solve the pose of 1 out of 3 images"));
        assert!(text.contains("  c.png: degenerate\n"));
    }

    fn pose(source: &str) -> PoseEstimate {
        PoseEstimate {
            source: PathBuf::from(source),
            position: [0.1, 0.2, -0.5],
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            rvec: [0.0; 3],
            tvec: [-0.1, -0.2, 0.5],
            reprojection_errors: vec![0.5, 0.5],
        }
    }

    #[test]
    fn test_export_poses_rejects_shared_stem() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let dir = tmp_dir.path().join("poses");
        std::fs::create_dir(&dir)?;
        std::fs::write(dir.join("keep.yaml"), b"")?;

        let poses = vec![pose("calib/a.png"), pose("calib/b.png"), pose("calib/a.jpg")];
        match export_poses(&poses, &dir) {
            Err(ExportError::DuplicateFileName {
                file_name,
                first,
                second,
            }) => {
                assert_eq!(file_name, "pose_a.yaml");
                assert_eq!(first, PathBuf::from("calib/a.png"));
                assert_eq!(second, PathBuf::from("calib/a.jpg"));
            }
            other => panic!("expected DuplicateFileName, got {other:?}"),
        }
        // nothing was removed
        assert!(dir.join("keep.yaml").exists());

        let written = export_poses(&poses[..2], &dir)?;
        assert_eq!(written, vec![dir.join("pose_a.yaml"), dir.join("pose_b.yaml")]);
        Ok(())
    }
}
