use crate::geometry::{generate_grid_points, GeometryError};
use crate::io::{read_yaml, write_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persisted layout of the calibration grid parameters file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridParamsRecord {
    /// Number of inner corners along x.
    pub grid_width: usize,
    /// Number of inner corners along y.
    pub grid_height: usize,
    /// Distance between adjacent corners.
    pub grid_square_size: f64,
}

/// Validated description of the checkerboard used for validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    width: usize,
    height: usize,
    square_size: f64,
}

impl GridSpec {
    /// Create a grid spec with strictly positive dimensions and square size.
    pub fn new(width: usize, height: usize, square_size: f64) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidGrid(format!(
                "grid dimensions must be positive, got {width}x{height}"
            )));
        }
        if !(square_size.is_finite() && square_size > 0.0) {
            return Err(ConfigError::InvalidGrid(format!(
                "grid square size must be positive, got {square_size}"
            )));
        }
        Ok(Self {
            width,
            height,
            square_size,
        })
    }

    /// Load and validate grid parameters from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let record: GridParamsRecord = read_yaml(path)?;
        Self::new(record.grid_width, record.grid_height, record.grid_square_size)
    }

    /// Write the grid parameters to a YAML file.
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        write_yaml(
            path,
            &GridParamsRecord {
                grid_width: self.width,
                grid_height: self.height,
                grid_square_size: self.square_size,
            },
        )
    }

    /// Inner corners along x.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Inner corners along y.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Distance between adjacent corners.
    pub fn square_size(&self) -> f64 {
        self.square_size
    }

    /// Number of corners on the grid.
    pub fn num_points(&self) -> usize {
        self.width * self.height
    }

    /// Corner positions in the grid frame, in detector raster order.
    pub fn points(&self) -> Result<Vec<[f64; 3]>, GeometryError> {
        generate_grid_points(self.width, self.height, self.square_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_spec_validation() {
        assert!(GridSpec::new(9, 6, 0.025).is_ok());
        assert!(matches!(
            GridSpec::new(0, 6, 0.025),
            Err(ConfigError::InvalidGrid(_))
        ));
        assert!(GridSpec::new(9, 6, 0.0).is_err());
        assert!(GridSpec::new(9, 6, f64::INFINITY).is_err());
    }

    #[test]
    fn test_grid_spec_points() -> Result<(), Box<dyn std::error::Error>> {
        let grid = GridSpec::new(4, 3, 0.1)?;
        let points = grid.points()?;
        assert_eq!(points.len(), grid.num_points());
        assert_eq!(points[5], [0.1, 0.1, 0.0]);
        Ok(())
    }
}
