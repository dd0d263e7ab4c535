//! Live board-pose overlay.
//!
//! For each frame the board pose is estimated against a known calibration and
//! a 3D axis plus the detected corners/markers are drawn onto the frame. Every
//! failure short of a broken display degrades to "no overlay" with a typed
//! reason; the frame is left untouched in that case.

use log::debug;
use opencv::{
    calib3d,
    core::{no_array, Mat, Point2f, Point3f, Scalar, Vector},
    highgui, objdetect,
    prelude::*,
    videoio::{self, VideoCapture},
};

use crate::{
    capture::{classify_key, CaptureOptions, KeyAction},
    extract::{to_gray, CornerExtractor},
    io::{CalibIoError, CameraCalibration},
};

/// Axis length drawn on the board, in board units (0.1 m).
const AXIS_LENGTH: f32 = 0.1;
/// Border color for rejected marker candidates.
const REJECTED_COLOR: (f64, f64, f64) = (100.0, 0.0, 240.0);

/// Errors that end the pose preview, as opposed to per-frame skips.
#[derive(thiserror::Error, Debug)]
pub enum OverlayError {
    #[error(transparent)]
    Calibration(#[from] CalibIoError),
    #[error(transparent)]
    Vision(#[from] opencv::Error),
}

/// Why a frame got no overlay.
#[derive(thiserror::Error, Debug)]
pub enum OverlaySkip {
    #[error("no markers detected")]
    NoMarkers,
    #[error("no board corners interpolated")]
    NoBoardCorners,
    #[error("only {0} corners, need at least 4 for a pose")]
    TooFewCorners(usize),
    #[error("pose estimation did not converge")]
    DegeneratePose,
    #[error("pose contains non-finite values")]
    NonFinitePose,
    #[error("vision error: {0}")]
    Vision(#[from] opencv::Error),
}

/// Estimated board pose in the camera frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardPose {
    /// Rodrigues rotation vector.
    pub rvec: [f64; 3],
    /// Translation vector in board units (meters).
    pub tvec: [f64; 3],
}

impl BoardPose {
    /// Camera-to-board distance: Euclidean norm of the translation.
    pub fn distance(&self) -> f64 {
        self.tvec.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// True when every pose component is a usable number.
    pub fn is_finite(&self) -> bool {
        self.rvec.iter().chain(self.tvec.iter()).all(|v| v.is_finite())
    }
}

/// Detect the board in `frame`, estimate its pose and draw the overlay.
///
/// On success the frame is annotated in place (axis, refined corners,
/// detected and rejected markers) and the pose is returned. On any skip the
/// frame is left unmodified.
pub fn draw_axis(
    frame: &mut Mat,
    camera_matrix: &Mat,
    dist_coeff: &Mat,
    extractor: &CornerExtractor,
) -> Result<BoardPose, OverlaySkip> {
    let gray = to_gray(frame)?;
    let (mut marker_corners, mut marker_ids, rejected) = extractor.detect_markers(&gray)?;
    if marker_corners.is_empty() {
        return Err(OverlaySkip::NoMarkers);
    }

    let view = extractor.interpolate_board_corners(&gray, &mut marker_corners, &mut marker_ids)?;
    if view.is_empty() {
        return Err(OverlaySkip::NoBoardCorners);
    }
    if view.len() < 4 {
        return Err(OverlaySkip::TooFewCorners(view.len()));
    }

    let mut object_points = Vector::<Point3f>::new();
    let mut image_points = Vector::<Point2f>::new();
    extractor
        .board()
        .match_image_points(&view.corners, &view.ids, &mut object_points, &mut image_points)?;

    let mut rvec = Mat::default();
    let mut tvec = Mat::default();
    let solved = calib3d::solve_pnp(
        &object_points,
        &image_points,
        camera_matrix,
        dist_coeff,
        &mut rvec,
        &mut tvec,
        false,
        calib3d::SOLVEPNP_ITERATIVE,
    )?;
    if !solved {
        return Err(OverlaySkip::DegeneratePose);
    }

    let pose = BoardPose {
        rvec: read_vec3(&rvec)?,
        tvec: read_vec3(&tvec)?,
    };
    if !pose.is_finite() {
        return Err(OverlaySkip::NonFinitePose);
    }

    objdetect::draw_detected_corners_charuco_def(frame, &view.corners)?;
    objdetect::draw_detected_markers_def(frame, &marker_corners)?;
    if !rejected.is_empty() {
        let (b, g, r) = REJECTED_COLOR;
        objdetect::draw_detected_markers(frame, &rejected, &no_array(), Scalar::new(b, g, r, 0.0))?;
    }
    calib3d::draw_frame_axes_def(frame, camera_matrix, dist_coeff, &rvec, &tvec, AXIS_LENGTH)?;

    debug!(
        "pose: t = {:?} r = {:?} distance = {:.3} m",
        pose.tvec,
        pose.rvec,
        pose.distance()
    );

    Ok(pose)
}

fn read_vec3(m: &Mat) -> opencv::Result<[f64; 3]> {
    Ok([*m.at::<f64>(0)?, *m.at::<f64>(1)?, *m.at::<f64>(2)?])
}

/// Live pose-overlay preview. Shows the annotated frame when a pose is found
/// and the raw frame otherwise; Esc exits.
pub fn preview_pose(
    calibration: &CameraCalibration,
    extractor: &CornerExtractor,
    opts: &CaptureOptions,
) -> Result<(), OverlayError> {
    let (camera_matrix, dist_coeff) = calibration_mats(calibration)?;

    highgui::named_window("pose", highgui::WINDOW_AUTOSIZE)?;
    let mut cam = VideoCapture::new(opts.device, videoio::CAP_ANY)?;
    cam.set(videoio::CAP_PROP_FRAME_WIDTH, opts.width as f64)?;
    cam.set(videoio::CAP_PROP_FRAME_HEIGHT, opts.height as f64)?;

    loop {
        let mut frame = Mat::default();
        cam.read(&mut frame)?;
        if frame.size()?.width < 1 {
            if classify_key(highgui::wait_key(1)?) == KeyAction::Stop {
                break;
            }
            continue;
        }

        if let Err(skip) = draw_axis(&mut frame, &camera_matrix, &dist_coeff, extractor) {
            debug!("no overlay: {skip}");
        }
        highgui::imshow("pose", &frame)?;

        if classify_key(highgui::wait_key(1)?) == KeyAction::Stop {
            break;
        }
    }
    highgui::destroy_all_windows()?;
    Ok(())
}

/// Intrinsics of a stored calibration as OpenCV matrices.
fn calibration_mats(calibration: &CameraCalibration) -> Result<(Mat, Mat), OverlayError> {
    Ok((
        calibration.camera_matrix_mat()?,
        calibration.dist_coeff_mat()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardSpec;
    use opencv::core::{Scalar, CV_8UC3};

    fn identityish_intrinsics() -> (Mat, Mat) {
        let camera_matrix = Mat::from_slice_2d(&[
            [1000.0, 0.0, 320.0],
            [0.0, 1000.0, 240.0],
            [0.0, 0.0, 1.0],
        ])
        .expect("mat");
        let dist_coeff = Mat::from_slice_2d(&[[0.0, 0.0, 0.0, 0.0, 0.0]]).expect("mat");
        (camera_matrix, dist_coeff)
    }

    #[test]
    fn blank_frame_skips_with_no_markers() {
        let extractor = CornerExtractor::new(&BoardSpec::default()).expect("extractor");
        let (camera_matrix, dist_coeff) = identityish_intrinsics();
        let mut frame =
            Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(255.0)).expect("mat");

        let result = draw_axis(&mut frame, &camera_matrix, &dist_coeff, &extractor);
        assert!(matches!(result, Err(OverlaySkip::NoMarkers)));
    }

    #[test]
    fn invalid_calibration_surfaces_as_typed_error() {
        let calibration = CameraCalibration {
            camera_matrix: vec![vec![1000.0, 0.0, 320.0]],
            dist_coeff: vec![vec![0.0; 5]],
            ret: 0.0,
        };
        let result = calibration_mats(&calibration);
        assert!(matches!(
            result,
            Err(OverlayError::Calibration(CalibIoError::BadMatrixShape {
                rows: 1,
                cols: 3
            }))
        ));
    }

    #[test]
    fn non_finite_pose_is_flagged() {
        let pose = BoardPose {
            rvec: [0.0, f64::NAN, 0.0],
            tvec: [0.0, 0.0, 1.0],
        };
        assert!(!pose.is_finite());

        let pose = BoardPose {
            rvec: [0.1, 0.2, 0.3],
            tvec: [0.0, 0.0, f64::INFINITY],
        };
        assert!(!pose.is_finite());
    }

    #[test]
    fn distance_is_translation_norm() {
        let pose = BoardPose {
            rvec: [0.0; 3],
            tvec: [3.0, 4.0, 12.0],
        };
        assert!((pose.distance() - 13.0).abs() < 1e-12);
    }
}
