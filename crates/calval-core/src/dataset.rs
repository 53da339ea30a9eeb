use std::path::{Path, PathBuf};

/// Name of the calibration directory below the root.
pub const CALIBRATION_DIR: &str = "calibration";
/// Camera parameters file inside the calibration directory.
pub const CAMERA_PARAMS_FILE: &str = "camera_params.yaml";
/// Grid parameters file inside the calibration directory.
pub const GRID_PARAMS_FILE: &str = "calibration_grid_params.yaml";
/// Pose export directory below the root.
pub const POSES_DIR: &str = "poses";

/// An error type for locating the validation inputs.
#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    /// The root path is not a directory.
    #[error("Expected {0} to be a directory.")]
    RootNotADirectory(PathBuf),

    /// The calibration directory is missing.
    #[error("Expected {calibration} to be a directory in {root}! This folder should contain:\n{expected}")]
    MissingCalibrationDirectory {
        /// Root directory.
        root: PathBuf,
        /// Expected calibration directory.
        calibration: PathBuf,
        /// Description of the expected directory contents.
        expected: String,
    },

    /// A required file is missing.
    #[error("Expected {path} to be a file! The calibration folder should contain:\n{expected}")]
    MissingFile {
        /// Missing file.
        path: PathBuf,
        /// Description of the expected directory contents.
        expected: String,
    },

    /// No image was found.
    #[error("Expected to find at least one image in {dir}! The calibration folder should contain:\n{expected}")]
    NoImages {
        /// Searched directory.
        dir: PathBuf,
        /// Description of the expected directory contents.
        expected: String,
    },

    /// Error to list the directory.
    #[error("Failed to read the directory. {0}")]
    IoError(#[from] std::io::Error),
}

/// Image file extensions considered when searching for calibration images.
pub fn supported_image_extensions() -> &'static [&'static str] {
    &[".jpg", ".jpeg", ".png", ".bmp", ".tiff"]
}

/// Whether the path has a supported image extension (case insensitive) and a
/// non-hidden file stem.
pub fn is_supported_image(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let hidden = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map_or(true, |s| s.starts_with('.'));
    !hidden
        && supported_image_extensions()
            .iter()
            .any(|supported| supported[1..].eq_ignore_ascii_case(ext))
}

/// List the supported images directly inside `dir`, sorted by file name.
pub fn find_images(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, DatasetError> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if path.is_file() && is_supported_image(&path) {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

fn join_with_commas(items: &[&str], joiner: &str) -> String {
    match items {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} {joiner} {last}", init.join(", ")),
    }
}

/// Human readable description of the calibration directory layout.
pub fn expected_calibration_directory_contents() -> String {
    let supported = join_with_commas(supported_image_extensions(), "or");
    [
        format!("{CAMERA_PARAMS_FILE}            # Camera parameters"),
        format!("{GRID_PARAMS_FILE}  # Calibration grid parameters"),
        format!("<first_image_filename>.(ext)  # Any file name with either {supported} extension"),
        format!("<second_image_filename>.(ext) # Any file name with either {supported} extension"),
        " ...".to_string(),
        format!("<last_image_filename>.(ext)   # Any file name with either {supported} extension"),
    ]
    .join("\n")
}

/// Input files of a validation run.
#[derive(Debug, Clone)]
pub struct CalibrationLayout {
    /// Root directory of the run.
    pub root: PathBuf,
    /// `<root>/calibration`.
    pub calibration_dir: PathBuf,
    /// Camera parameters to validate.
    pub camera_params_file: PathBuf,
    /// Grid parameters.
    pub grid_params_file: PathBuf,
    /// Calibration images, sorted by file name.
    pub images: Vec<PathBuf>,
}

impl CalibrationLayout {
    /// Locate the inputs below `root`.
    ///
    /// `camera_params_override` replaces `<root>/calibration/camera_params.yaml`.
    pub fn discover(
        root: impl AsRef<Path>,
        camera_params_override: Option<&Path>,
    ) -> Result<Self, DatasetError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(DatasetError::RootNotADirectory(root));
        }

        let calibration_dir = root.join(CALIBRATION_DIR);
        if !calibration_dir.is_dir() {
            return Err(DatasetError::MissingCalibrationDirectory {
                root,
                calibration: calibration_dir,
                expected: expected_calibration_directory_contents(),
            });
        }

        let camera_params_file = match camera_params_override {
            Some(path) => path.to_path_buf(),
            None => calibration_dir.join(CAMERA_PARAMS_FILE),
        };
        let grid_params_file = calibration_dir.join(GRID_PARAMS_FILE);
        for path in [&camera_params_file, &grid_params_file] {
            if !path.is_file() {
                return Err(DatasetError::MissingFile {
                    path: path.clone(),
                    expected: expected_calibration_directory_contents(),
                });
            }
        }

        let images = find_images(&calibration_dir)?;
        log::info!(
            "Found {} images in {}.",
            images.len(),
            calibration_dir.display()
        );
        if images.is_empty() {
            return Err(DatasetError::NoImages {
                dir: calibration_dir,
                expected: expected_calibration_directory_contents(),
            });
        }

        Ok(Self {
            root,
            calibration_dir,
            camera_params_file,
            grid_params_file,
            images,
        })
    }

    /// Directory the pose export writes to.
    pub fn poses_dir(&self) -> PathBuf {
        self.root.join(POSES_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_supported_image() {
        assert!(is_supported_image(Path::new("a/b.png")));
        assert!(is_supported_image(Path::new("a/b.JPEG")));
        assert!(is_supported_image(Path::new("b.Tiff")));
        assert!(!is_supported_image(Path::new("b.tif")));
        assert!(!is_supported_image(Path::new("b.yaml")));
        assert!(!is_supported_image(Path::new(".hidden.png")));
        assert!(!is_supported_image(Path::new("noext")));
    }

    #[test]
    fn test_join_with_commas() {
        assert_eq!(join_with_commas(&[], "or"), "");
        assert_eq!(join_with_commas(&["a"], "or"), "a");
        assert_eq!(join_with_commas(&["a", "b"], "or"), "a or b");
        assert_eq!(join_with_commas(&["a", "b", "c"], "and"), "a, b and c");
    }

    #[test]
    fn test_find_images_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        for name in ["c.png", "a.JPG", "b.bmp", "notes.txt", ".d.png", "a.corners.yaml"] {
            std::fs::write(tmp_dir.path().join(name), b"")?;
        }
        std::fs::create_dir(tmp_dir.path().join("e.png"))?;

        let images = find_images(tmp_dir.path())?;
        let names: Vec<_> = images
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.bmp", "c.png"]);
        Ok(())
    }

    #[test]
    fn test_discover_errors() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let root = tmp_dir.path();

        assert!(matches!(
            CalibrationLayout::discover(root.join("missing"), None),
            Err(DatasetError::RootNotADirectory(_))
        ));
        assert!(matches!(
            CalibrationLayout::discover(root, None),
            Err(DatasetError::MissingCalibrationDirectory { .. })
        ));

        let calibration = root.join(CALIBRATION_DIR);
        std::fs::create_dir(&calibration)?;
        assert!(matches!(
            CalibrationLayout::discover(root, None),
            Err(DatasetError::MissingFile { .. })
        ));

        std::fs::write(calibration.join(CAMERA_PARAMS_FILE), b"")?;
        std::fs::write(calibration.join(GRID_PARAMS_FILE), b"")?;
        assert!(matches!(
            CalibrationLayout::discover(root, None),
            Err(DatasetError::NoImages { .. })
        ));

        std::fs::write(calibration.join("img.png"), b"")?;
        let layout = CalibrationLayout::discover(root, None)?;
        assert_eq!(layout.images, vec![calibration.join("img.png")]);
        assert_eq!(layout.poses_dir(), root.join(POSES_DIR));

        let override_path = root.join("other.yaml");
        assert!(matches!(
            CalibrationLayout::discover(root, Some(override_path.as_path())),
            Err(DatasetError::MissingFile { .. })
        ));
        std::fs::write(&override_path, b"")?;
        let layout = CalibrationLayout::discover(root, Some(override_path.as_path()))?;
        assert_eq!(layout.camera_params_file, override_path);
        Ok(())
    }
}
