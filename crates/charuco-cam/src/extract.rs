//! ChArUco corner extraction from captured frames.
//!
//! Per frame: grayscale convert, ArUco marker detection, subpixel corner
//! refinement, then interpolation of the full board corners from the refined
//! markers. Frames without any detection are skipped, not padded.

use log::warn;
use opencv::{
    core::{Mat, Point2f, Size, TermCriteria, TermCriteria_COUNT, TermCriteria_EPS, Vector},
    imgproc,
    objdetect::{
        ArucoDetector, CharucoBoard, CharucoDetector, DetectorParameters, RefineParameters,
    },
    prelude::*,
};

use crate::board::{BoardError, BoardSpec};

/// Subpixel refinement search window half-size.
const SUBPIX_WINDOW: i32 = 3;
/// Subpixel refinement iteration cap.
const SUBPIX_MAX_ITERS: i32 = 100;
/// Subpixel refinement convergence epsilon.
const SUBPIX_EPS: f64 = 1e-5;

/// Refined board corners of a single frame with their corner ids.
#[derive(Debug, Default)]
pub struct FrameCorners {
    pub corners: Vector<Point2f>,
    pub ids: Vector<i32>,
}

impl FrameCorners {
    #[inline]
    pub fn len(&self) -> usize {
        self.corners.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }
}

/// Accumulated extraction output for a batch of frames.
///
/// `image_size` is taken from the last processed frame; all captured frames
/// are assumed to share one resolution.
#[derive(Debug, Default)]
pub struct Extraction {
    pub views: Vec<FrameCorners>,
    pub image_size: Size,
}

impl Extraction {
    /// Drop views with fewer than `min_points` corners. The calibration solve
    /// needs at least four points per view to be meaningful.
    pub fn retain_usable(&mut self, min_points: usize) {
        self.views.retain(|v| v.len() >= min_points);
    }
}

/// Errors raised while building the extractor or walking a frame batch.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Vision(#[from] opencv::Error),
}

/// Marker and board-corner detector bound to one board specification.
pub struct CornerExtractor {
    board: CharucoBoard,
    markers: ArucoDetector,
    charuco: CharucoDetector,
    criteria: TermCriteria,
}

impl CornerExtractor {
    pub fn new(spec: &BoardSpec) -> Result<Self, ExtractError> {
        let board = spec.build()?;
        let dictionary = spec.dictionary.dictionary()?;
        let markers = ArucoDetector::new(
            &dictionary,
            &DetectorParameters::default()?,
            RefineParameters::new(10.0, 3.0, true)?,
        )?;
        let charuco = CharucoDetector::new_def(&board)?;
        let criteria = TermCriteria::new(
            TermCriteria_COUNT + TermCriteria_EPS,
            SUBPIX_MAX_ITERS,
            SUBPIX_EPS,
        )?;
        Ok(Self {
            board,
            markers,
            charuco,
            criteria,
        })
    }

    /// The OpenCV board object backing this extractor.
    #[inline]
    pub fn board(&self) -> &CharucoBoard {
        &self.board
    }

    /// Detect markers in a grayscale image and refine their corners to
    /// subpixel accuracy. Returns parallel corner/id lists plus the rejected
    /// marker candidates.
    pub fn detect_markers(
        &self,
        gray: &Mat,
    ) -> opencv::Result<(Vector<Vector<Point2f>>, Vector<i32>, Vector<Vector<Point2f>>)> {
        let mut corners = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        let mut rejected = Vector::<Vector<Point2f>>::new();
        self.markers
            .detect_markers(gray, &mut corners, &mut ids, &mut rejected)?;

        for i in 0..corners.len() {
            let mut marker = corners.get(i)?;
            imgproc::corner_sub_pix(
                gray,
                &mut marker,
                Size::new(SUBPIX_WINDOW, SUBPIX_WINDOW),
                Size::new(-1, -1),
                self.criteria,
            )?;
            corners.set(i, marker)?;
        }

        Ok((corners, ids, rejected))
    }

    /// Interpolate full board corners from already-detected markers.
    pub fn interpolate_board_corners(
        &self,
        gray: &Mat,
        marker_corners: &mut Vector<Vector<Point2f>>,
        marker_ids: &mut Vector<i32>,
    ) -> opencv::Result<FrameCorners> {
        let mut corners = Vector::<Point2f>::new();
        let mut ids = Vector::<i32>::new();
        self.charuco
            .detect_board(gray, &mut corners, &mut ids, marker_corners, marker_ids)?;
        Ok(FrameCorners { corners, ids })
    }

    /// Extract refined board corners from a single BGR frame.
    ///
    /// Returns `None` when no markers (or no interpolated corners) were found.
    pub fn extract_frame(&self, frame: &Mat) -> Result<Option<FrameCorners>, ExtractError> {
        let gray = to_gray(frame)?;
        let (mut marker_corners, mut marker_ids, _rejected) = self.detect_markers(&gray)?;
        if marker_corners.is_empty() {
            return Ok(None);
        }
        let view = self.interpolate_board_corners(&gray, &mut marker_corners, &mut marker_ids)?;
        if view.is_empty() {
            return Ok(None);
        }
        Ok(Some(view))
    }

    /// Run extraction over a batch of frames, skipping frames without
    /// detections. The surviving view count equals the number of frames with
    /// at least one detection.
    pub fn extract_all(&self, frames: &[Mat]) -> Result<Extraction, ExtractError> {
        let mut out = Extraction::default();
        for (index, frame) in frames.iter().enumerate() {
            out.image_size = frame.size()?;
            match self.extract_frame(frame)? {
                Some(view) => out.views.push(view),
                None => warn!("frame {index}: no markers detected, skipping"),
            }
        }
        Ok(out)
    }
}

/// BGR to single-channel grayscale.
pub(crate) fn to_gray(frame: &Mat) -> opencv::Result<Mat> {
    let mut gray = Mat::default();
    imgproc::cvt_color_def(frame, &mut gray, imgproc::COLOR_BGR2GRAY)?;
    Ok(gray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    fn blank_frame() -> Mat {
        Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(255.0)).expect("mat")
    }

    fn small_board() -> BoardSpec {
        BoardSpec {
            squares_x: 5,
            squares_y: 4,
            ..BoardSpec::default()
        }
    }

    /// Render the board and lift it to a BGR frame, as if captured head-on.
    fn board_frame(spec: &BoardSpec) -> Mat {
        let rendered = spec.render(60, 20).expect("render");
        let mut frame = Mat::default();
        imgproc::cvt_color_def(&rendered, &mut frame, imgproc::COLOR_GRAY2BGR).expect("to bgr");
        frame
    }

    fn view_with(n: usize) -> FrameCorners {
        let mut corners = Vector::<Point2f>::new();
        let mut ids = Vector::<i32>::new();
        for i in 0..n {
            corners.push(Point2f::new(i as f32, i as f32));
            ids.push(i as i32);
        }
        FrameCorners { corners, ids }
    }

    #[test]
    fn blank_frame_yields_no_view() {
        let extractor = CornerExtractor::new(&BoardSpec::default()).expect("extractor");
        let view = extractor.extract_frame(&blank_frame()).expect("extract");
        assert!(view.is_none());
    }

    #[test]
    fn rendered_board_frame_yields_refined_corners() {
        let spec = small_board();
        let extractor = CornerExtractor::new(&spec).expect("extractor");
        let view = extractor
            .extract_frame(&board_frame(&spec))
            .expect("extract")
            .expect("board view");
        assert!(!view.is_empty());
        assert_eq!(view.corners.len(), view.ids.len());
        assert!(view.len() <= spec.inner_corner_count());
    }

    #[test]
    fn surviving_views_match_frames_with_detections() {
        let spec = small_board();
        let extractor = CornerExtractor::new(&spec).expect("extractor");
        let board = board_frame(&spec);
        let blank = Mat::new_rows_cols_with_default(
            board.rows(),
            board.cols(),
            CV_8UC3,
            Scalar::all(255.0),
        )
        .expect("mat");

        let frames = vec![blank.clone(), board.clone(), blank, board.clone()];
        let extraction = extractor.extract_all(&frames).expect("extract");

        assert_eq!(extraction.views.len(), 2);
        assert!(extraction.views.iter().all(|v| !v.is_empty()));
        assert_eq!(extraction.image_size, board.size().expect("size"));
    }

    #[test]
    fn undetected_frames_are_excluded_entirely() {
        let extractor = CornerExtractor::new(&BoardSpec::default()).expect("extractor");
        let frames = vec![blank_frame(), blank_frame(), blank_frame()];
        let extraction = extractor.extract_all(&frames).expect("extract");
        assert!(extraction.views.is_empty());
        assert_eq!(extraction.image_size, Size::new(640, 480));
    }

    #[test]
    fn retain_usable_filters_short_views() {
        let mut extraction = Extraction {
            views: vec![view_with(3), view_with(4), view_with(10)],
            image_size: Size::new(640, 480),
        };
        extraction.retain_usable(4);
        assert_eq!(extraction.views.len(), 2);
        assert!(extraction.views.iter().all(|v| v.len() >= 4));
    }
}
