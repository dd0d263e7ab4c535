//! Persistence of calibration results.
//!
//! The on-disk format is a flat JSON object with `camera_matrix` (3x3 nested
//! array), `dist_coeff` (nested array) and `ret` (scalar RMS reprojection
//! error). The file is overwritten on every save; there is no schema version.

use std::{fs, path::Path};

use opencv::{core::Mat, prelude::*};
use serde::{Deserialize, Serialize};

/// Default output path for calibration results.
pub const DEFAULT_CALIBRATION_PATH: &str = "camera.json";

#[derive(thiserror::Error, Debug)]
pub enum CalibIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Vision(#[from] opencv::Error),
    #[error("camera_matrix must be 3x3, got {rows}x{cols}")]
    BadMatrixShape { rows: usize, cols: usize },
    #[error("dist_coeff must not be empty")]
    EmptyDistCoeff,
}

/// Persisted intrinsic calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    /// 3x3 intrinsic matrix, row major.
    pub camera_matrix: Vec<Vec<f64>>,
    /// Distortion coefficients as a single-row nested array.
    pub dist_coeff: Vec<Vec<f64>>,
    /// RMS reprojection error reported by the solver.
    pub ret: f64,
}

impl CameraCalibration {
    /// Build from the solver's output matrices.
    pub fn from_mats(camera_matrix: &Mat, dist_coeff: &Mat, ret: f64) -> Result<Self, CalibIoError> {
        Ok(Self {
            camera_matrix: mat_to_rows(camera_matrix)?,
            dist_coeff: mat_to_rows(dist_coeff)?,
            ret,
        })
    }

    fn validate(&self) -> Result<(), CalibIoError> {
        if self.camera_matrix.len() != 3 || self.camera_matrix.iter().any(|r| r.len() != 3) {
            return Err(CalibIoError::BadMatrixShape {
                rows: self.camera_matrix.len(),
                cols: self.camera_matrix.first().map_or(0, Vec::len),
            });
        }
        if self.dist_coeff.iter().map(Vec::len).sum::<usize>() == 0 {
            return Err(CalibIoError::EmptyDistCoeff);
        }
        Ok(())
    }

    /// Intrinsic matrix as an OpenCV `Mat`.
    pub fn camera_matrix_mat(&self) -> Result<Mat, CalibIoError> {
        self.validate()?;
        Ok(rows_to_mat(&self.camera_matrix)?)
    }

    /// Distortion coefficients as an OpenCV `Mat`.
    pub fn dist_coeff_mat(&self) -> Result<Mat, CalibIoError> {
        self.validate()?;
        Ok(rows_to_mat(&self.dist_coeff)?)
    }

    /// Load a calibration from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibIoError> {
        let raw = fs::read_to_string(path)?;
        let calib: Self = serde_json::from_str(&raw)?;
        calib.validate()?;
        Ok(calib)
    }

    /// Write this calibration to disk as pretty JSON, replacing any existing
    /// file at `path`.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibIoError> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Load a board specification from JSON, falling back to the built-in
/// default when no path is given.
pub fn load_board_spec(path: Option<&Path>) -> Result<crate::board::BoardSpec, CalibIoError> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(crate::board::BoardSpec::default()),
    }
}

fn mat_to_rows(m: &Mat) -> Result<Vec<Vec<f64>>, CalibIoError> {
    let mut rows = Vec::with_capacity(m.rows().max(0) as usize);
    for r in 0..m.rows() {
        let mut row = Vec::with_capacity(m.cols().max(0) as usize);
        for c in 0..m.cols() {
            row.push(*m.at_2d::<f64>(r, c)?);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn rows_to_mat(rows: &[Vec<f64>]) -> opencv::Result<Mat> {
    Mat::from_slice_2d(rows)
}
