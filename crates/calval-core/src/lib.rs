#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Calval Core
//!
//! Validates a camera calibration against images of a known checkerboard:
//! solve the camera pose of every image with a detected grid, reproject the
//! grid, and pool the reprojection errors into summary statistics.
//!
//! ## Example: validating synthetic observations
//!
//! ```rust
//! use calval_core::{aggregate, format_summary, CameraIntrinsics, DetectionResult, GridSpec};
//!
//! let intrinsics = CameraIntrinsics::new(
//!     [[800.0, 0.0, 320.0], [0.0, 800.0, 240.0], [0.0, 0.0, 1.0]],
//!     &[0.0, 0.0, 0.0, 0.0, 0.0],
//!     640,
//!     480,
//! )?;
//! let grid = GridSpec::new(2, 2, 0.1)?;
//!
//! // fronto-parallel board one metre in front of the camera
//! let corners = vec![[320.0, 240.0], [400.0, 240.0], [320.0, 320.0], [400.0, 320.0]];
//! let detections = vec![
//!     DetectionResult::detected("img_00.png", corners),
//!     DetectionResult::missed("img_01.png"),
//! ];
//!
//! let (poses, summary) = aggregate(&detections, &grid, &intrinsics)?;
//! assert_eq!(poses.len(), 1);
//! println!("{}", format_summary(&summary));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Batch aggregation of per-image poses into summary statistics.
pub mod aggregate;

/// Validated camera intrinsics.
pub mod camera;

/// Discovery of the calibration directory layout.
pub mod dataset;

/// Detection results and the pattern detector seam.
pub mod detection;

/// Frame conversions and grid point generation.
pub mod geometry;

/// Calibration grid parameters.
pub mod grid;

/// Matrix records and YAML helpers.
pub mod io;

/// Per-image pose estimation.
pub mod pose;

/// Summary formatting and pose export.
pub mod report;

/// Reprojection error statistics.
pub mod stats;

pub use aggregate::{
    aggregate, aggregate_parallel, aggregate_with_progress, AggregateError, ValidationSummary,
};
pub use camera::{CameraIntrinsics, CameraParamsRecord};
pub use dataset::{
    expected_calibration_directory_contents, find_images, supported_image_extensions,
    CalibrationLayout, DatasetError,
};
pub use detection::{CornerFileDetector, DetectError, DetectionResult, PatternDetector};
pub use geometry::{generate_grid_points, invert_pose, rotation_vector_to_matrix, GeometryError};
pub use grid::{GridParamsRecord, GridSpec};
pub use io::{add_extension, ConfigError, MatrixRecord};
pub use pose::{solve_pose, PoseEstimate, SolveFailure};
pub use report::{export_poses, format_significant, format_summary, ExportError, PoseRecord};
pub use stats::ErrorStatistics;
