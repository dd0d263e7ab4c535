//! ChArUco board specification shared by every pipeline stage.

use opencv::{
    core::{Mat, Size},
    objdetect::{self, CharucoBoard, Dictionary, PredefinedDictionaryType},
    prelude::*,
};
use serde::{Deserialize, Serialize};

/// Predefined ArUco dictionary selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryKind {
    Dict4x4_50,
    Dict4x4_250,
    Dict5x5_100,
    Dict5x5_250,
    Dict6x6_100,
    #[default]
    Dict6x6_250,
    Dict7x7_250,
}

impl DictionaryKind {
    fn predefined(self) -> PredefinedDictionaryType {
        match self {
            DictionaryKind::Dict4x4_50 => PredefinedDictionaryType::DICT_4X4_50,
            DictionaryKind::Dict4x4_250 => PredefinedDictionaryType::DICT_4X4_250,
            DictionaryKind::Dict5x5_100 => PredefinedDictionaryType::DICT_5X5_100,
            DictionaryKind::Dict5x5_250 => PredefinedDictionaryType::DICT_5X5_250,
            DictionaryKind::Dict6x6_100 => PredefinedDictionaryType::DICT_6X6_100,
            DictionaryKind::Dict6x6_250 => PredefinedDictionaryType::DICT_6X6_250,
            DictionaryKind::Dict7x7_250 => PredefinedDictionaryType::DICT_7X7_250,
        }
    }

    /// Fetch the OpenCV dictionary object.
    pub fn dictionary(self) -> Result<Dictionary, BoardError> {
        Ok(objdetect::get_predefined_dictionary(self.predefined())?)
    }
}

/// Static ChArUco board specification.
///
/// `squares_x`/`squares_y` are **square counts** (not inner corner counts).
/// Lengths are in meters, matching the units of the pose translation reported
/// by the overlay.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSpec {
    pub squares_x: i32,
    pub squares_y: i32,
    pub square_length: f32,
    pub marker_length: f32,
    #[serde(default)]
    pub dictionary: DictionaryKind,
}

impl Default for BoardSpec {
    /// The 25x18 board this tool was written for, generated with
    /// <https://calib.io/pages/camera-calibration-pattern-generator>.
    fn default() -> Self {
        Self {
            squares_x: 25,
            squares_y: 18,
            square_length: 18.0 * 0.001,
            marker_length: 14.0 * 0.001,
            dictionary: DictionaryKind::Dict6x6_250,
        }
    }
}

/// Board specification validation errors.
#[derive(thiserror::Error, Debug)]
pub enum BoardError {
    #[error("squares_x and squares_y must be >= 2")]
    InvalidGridSize,
    #[error("square_length must be finite and > 0")]
    InvalidSquareLength,
    #[error("marker_length must be finite, > 0 and smaller than square_length")]
    InvalidMarkerLength,
    #[error(transparent)]
    Vision(#[from] opencv::Error),
}

impl BoardSpec {
    fn validate(&self) -> Result<(), BoardError> {
        if self.squares_x < 2 || self.squares_y < 2 {
            return Err(BoardError::InvalidGridSize);
        }
        if !self.square_length.is_finite() || self.square_length <= 0.0 {
            return Err(BoardError::InvalidSquareLength);
        }
        if !self.marker_length.is_finite()
            || self.marker_length <= 0.0
            || self.marker_length >= self.square_length
        {
            return Err(BoardError::InvalidMarkerLength);
        }
        Ok(())
    }

    /// Validate and build the OpenCV board object.
    pub fn build(&self) -> Result<CharucoBoard, BoardError> {
        self.validate()?;
        let dictionary = self.dictionary.dictionary()?;
        Ok(CharucoBoard::new_def(
            Size::new(self.squares_x, self.squares_y),
            self.square_length,
            self.marker_length,
            &dictionary,
        )?)
    }

    /// Number of inner chessboard corners the board can contribute per view.
    #[inline]
    pub fn inner_corner_count(&self) -> usize {
        ((self.squares_x - 1) * (self.squares_y - 1)).max(0) as usize
    }

    /// Render a printable preview image of the board.
    ///
    /// `px_per_square` controls the output resolution, `margin` is a white
    /// border in pixels around the pattern.
    pub fn render(&self, px_per_square: i32, margin: i32) -> Result<Mat, BoardError> {
        let board = self.build()?;
        let size = Size::new(
            self.squares_x * px_per_square + 2 * margin,
            self.squares_y * px_per_square + 2 * margin,
        );
        let mut image = Mat::default();
        board.generate_image(size, &mut image, margin, 1)?;
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_is_valid() {
        let spec = BoardSpec::default();
        assert!(spec.validate().is_ok());
        assert_eq!(spec.inner_corner_count(), 24 * 17);
    }

    #[test]
    fn rejects_degenerate_grid() {
        let spec = BoardSpec {
            squares_x: 1,
            ..BoardSpec::default()
        };
        assert!(matches!(spec.build(), Err(BoardError::InvalidGridSize)));
    }

    #[test]
    fn rejects_marker_not_smaller_than_square() {
        let spec = BoardSpec {
            marker_length: 0.018,
            ..BoardSpec::default()
        };
        assert!(matches!(spec.build(), Err(BoardError::InvalidMarkerLength)));
    }

    #[test]
    fn renders_preview_with_margin() {
        let spec = BoardSpec {
            squares_x: 5,
            squares_y: 4,
            ..BoardSpec::default()
        };
        let image = spec.render(40, 10).expect("render");
        assert_eq!(image.cols(), 5 * 40 + 20);
        assert_eq!(image.rows(), 4 * 40 + 20);
    }

    #[test]
    fn dictionary_kind_round_trips_through_json() {
        let json = serde_json::to_string(&DictionaryKind::Dict6x6_250).expect("json");
        assert_eq!(json, "\"dict6x6_250\"");
        let back: DictionaryKind = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, DictionaryKind::Dict6x6_250);
    }
}
