use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An error type for loading and validating persisted configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Error when the file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(PathBuf),

    /// Error to read or write the file.
    #[error("Failed to manipulate the file {path}. {source}")]
    FileError {
        /// File being accessed.
        path: PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },

    /// Error to parse or emit YAML.
    #[error("Failed to parse yaml in {path}. {source}")]
    YamlError {
        /// File being parsed.
        path: PathBuf,
        /// Underlying serde error.
        source: serde_yaml::Error,
    },

    /// The flat data of a matrix record does not match its declared shape.
    #[error("Expected '{name}' data to be of size {expected} ({rows}x{cols}), but is of length {actual}")]
    MatrixDataLength {
        /// Field name of the record.
        name: String,
        /// Declared number of rows.
        rows: usize,
        /// Declared number of columns.
        cols: usize,
        /// `rows * cols`.
        expected: usize,
        /// Actual length of the data list.
        actual: usize,
    },

    /// The declared shape does not fit in memory.
    #[error("Declared shape of '{name}' ({rows}x{cols}) is too large")]
    MatrixShapeOverflow {
        /// Field name of the record.
        name: String,
        /// Declared number of rows.
        rows: usize,
        /// Declared number of columns.
        cols: usize,
    },

    /// A matrix record has the wrong shape for its field.
    #[error("Expected '{name}' to be a {expected} matrix, got [{rows}x{cols}]")]
    MatrixShape {
        /// Field name of the record.
        name: String,
        /// Human readable expected shape.
        expected: String,
        /// Actual number of rows.
        rows: usize,
        /// Actual number of columns.
        cols: usize,
    },

    /// The camera matrix is not upper triangular.
    #[error("Expected the camera matrix to be upper triangular, got {0:?}")]
    NotUpperTriangular([[f64; 3]; 3]),

    /// Camera parameters that are out of range.
    #[error("Invalid camera parameters: {0}")]
    InvalidIntrinsics(String),

    /// Grid parameters that are out of range.
    #[error("Invalid calibration grid parameters: {0}")]
    InvalidGrid(String),

    /// The path already carries a different extension.
    #[error("File path {path} already has a different extension than '.{extension}'")]
    ExtensionMismatch {
        /// Offending path.
        path: PathBuf,
        /// Requested extension.
        extension: String,
    },
}

/// A dense matrix stored as `rows`, `cols` and a flat row-major `data` list.
///
/// This is the layout used by the persisted camera parameters, the pose
/// export files and the corner sidecar files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRecord {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Row-major values, `rows * cols` of them.
    pub data: Vec<f64>,
}

impl MatrixRecord {
    /// Create a record, checking that `data` matches the shape.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, ConfigError> {
        let record = Self { rows, cols, data };
        record.validate("matrix")?;
        Ok(record)
    }

    /// Record holding a row-major 3x3 matrix.
    pub fn from_matrix3(m: &[[f64; 3]; 3]) -> Self {
        Self {
            rows: 3,
            cols: 3,
            data: m.iter().flatten().copied().collect(),
        }
    }

    /// Record holding an `n x 1` column vector.
    pub fn from_column(v: &[f64]) -> Self {
        Self {
            rows: v.len(),
            cols: 1,
            data: v.to_vec(),
        }
    }

    /// Record holding an `N x 2` list of image points.
    pub fn from_points2(points: &[[f64; 2]]) -> Self {
        Self {
            rows: points.len(),
            cols: 2,
            data: points.iter().flatten().copied().collect(),
        }
    }

    /// Check that `rows * cols == data.len()`.
    ///
    /// `name` identifies the field in the error message.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let Some(expected) = self.rows.checked_mul(self.cols) else {
            return Err(ConfigError::MatrixShapeOverflow {
                name: name.to_string(),
                rows: self.rows,
                cols: self.cols,
            });
        };
        if expected != self.data.len() {
            return Err(ConfigError::MatrixDataLength {
                name: name.to_string(),
                rows: self.rows,
                cols: self.cols,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Interpret the record as a row-major 3x3 matrix.
    pub fn to_matrix3(&self, name: &str) -> Result<[[f64; 3]; 3], ConfigError> {
        self.validate(name)?;
        if (self.rows, self.cols) != (3, 3) {
            return Err(self.shape_error(name, "[3x3]"));
        }
        let d = &self.data;
        Ok([[d[0], d[1], d[2]], [d[3], d[4], d[5]], [d[6], d[7], d[8]]])
    }

    /// Interpret the record as a vector (a single row or a single column).
    pub fn to_vector(&self, name: &str) -> Result<Vec<f64>, ConfigError> {
        self.validate(name)?;
        if self.rows != 1 && self.cols != 1 {
            return Err(self.shape_error(name, "[1xN] or [Nx1]"));
        }
        Ok(self.data.clone())
    }

    /// Interpret the record as an `N x 2` list of image points.
    pub fn to_points2(&self, name: &str) -> Result<Vec<[f64; 2]>, ConfigError> {
        self.validate(name)?;
        if self.cols != 2 {
            return Err(self.shape_error(name, "[Nx2]"));
        }
        Ok(self.data.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
    }

    fn shape_error(&self, name: &str, expected: &str) -> ConfigError {
        ConfigError::MatrixShape {
            name: name.to_string(),
            expected: expected.to_string(),
            rows: self.rows,
            cols: self.cols,
        }
    }
}

/// Append `extension` to `path` unless it already ends with it.
///
/// Fails when the path carries a different extension.
pub fn add_extension(path: impl AsRef<Path>, extension: &str) -> Result<PathBuf, ConfigError> {
    let path = path.as_ref();
    let extension = extension.trim_start_matches('.');
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case(extension) => Ok(path.to_path_buf()),
        Some(_) => Err(ConfigError::ExtensionMismatch {
            path: path.to_path_buf(),
            extension: extension.to_string(),
        }),
        None => {
            let mut name = path.as_os_str().to_owned();
            name.push(".");
            name.push(extension);
            Ok(PathBuf::from(name))
        }
    }
}

/// Deserialize a YAML file.
pub fn read_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ConfigError::FileDoesNotExist(path.to_path_buf()));
    }
    let file = std::fs::File::open(path).map_err(|source| ConfigError::FileError {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_reader(std::io::BufReader::new(file)).map_err(|source| {
        ConfigError::YamlError {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Serialize a value into a YAML file, replacing any existing content.
pub fn write_yaml<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let text = serde_yaml::to_string(value).map_err(|source| ConfigError::YamlError {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, text).map_err(|source| ConfigError::FileError {
        path: path.to_path_buf(),
        source,
    })
}
