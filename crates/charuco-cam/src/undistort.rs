//! Undistortion of live frames against a saved calibration.

use log::info;
use opencv::{
    calib3d,
    core::{Mat, Rect, Size},
    highgui,
    prelude::*,
    videoio::{self, VideoCapture},
};

use crate::{
    capture::{classify_key, CaptureOptions, KeyAction},
    extract::to_gray,
    io::{CalibIoError, CameraCalibration},
};

#[derive(thiserror::Error, Debug)]
pub enum UndistortError {
    #[error(transparent)]
    Calibration(#[from] CalibIoError),
    #[error(transparent)]
    Vision(#[from] opencv::Error),
    #[error("empty valid-pixel region for {width}x{height}")]
    EmptyRoi { width: i32, height: i32 },
}

/// Undistortion state for one calibration and output resolution.
///
/// Holds the optimal rectified camera matrix and the valid-pixel region of
/// interest produced by `get_optimal_new_camera_matrix` with alpha = 1 (all
/// source pixels retained).
pub struct Rectifier {
    camera_matrix: Mat,
    dist_coeff: Mat,
    optimal_matrix: Mat,
    roi: Rect,
}

impl Rectifier {
    pub fn new(calibration: &CameraCalibration, image_size: Size) -> Result<Self, UndistortError> {
        let camera_matrix = calibration.camera_matrix_mat()?;
        let dist_coeff = calibration.dist_coeff_mat()?;

        let mut roi = Rect::default();
        let optimal_matrix = calib3d::get_optimal_new_camera_matrix(
            &camera_matrix,
            &dist_coeff,
            image_size,
            1.0,
            image_size,
            Some(&mut roi),
            false,
        )?;
        if roi.width <= 0 || roi.height <= 0 {
            return Err(UndistortError::EmptyRoi {
                width: image_size.width,
                height: image_size.height,
            });
        }

        Ok(Self {
            camera_matrix,
            dist_coeff,
            optimal_matrix,
            roi,
        })
    }

    /// Valid-pixel region of the undistorted image.
    #[inline]
    pub fn roi(&self) -> Rect {
        self.roi
    }

    /// Undistort a frame against the rectified camera matrix.
    pub fn undistort(&self, src: &Mat) -> opencv::Result<Mat> {
        let mut out = Mat::default();
        calib3d::undistort(
            src,
            &mut out,
            &self.camera_matrix,
            &self.dist_coeff,
            &self.optimal_matrix,
        )?;
        Ok(out)
    }

    /// Crop an undistorted frame to the valid-pixel region.
    pub fn crop(&self, undistorted: &Mat) -> opencv::Result<Mat> {
        Mat::roi(undistorted, self.roi)?.try_clone()
    }
}

/// Live undistortion preview: shows the raw grayscale frame, the undistorted
/// frame, and the ROI crop in three windows. Esc exits.
pub fn preview_undistort(
    calibration: &CameraCalibration,
    opts: &CaptureOptions,
) -> Result<(), UndistortError> {
    let image_size = Size::new(opts.width, opts.height);
    let rectifier = Rectifier::new(calibration, image_size)?;
    info!(
        "undistortion preview at {}x{}, valid region {:?}",
        opts.width, opts.height, rectifier.roi()
    );

    let mut cam = VideoCapture::new(opts.device, videoio::CAP_ANY)?;
    cam.set(videoio::CAP_PROP_FRAME_WIDTH, opts.width as f64)?;
    cam.set(videoio::CAP_PROP_FRAME_HEIGHT, opts.height as f64)?;

    loop {
        let mut frame = Mat::default();
        cam.read(&mut frame)?;
        if frame.size()?.width < 1 {
            if classify_key(highgui::wait_key(10)?) == KeyAction::Stop {
                break;
            }
            continue;
        }

        let gray = to_gray(&frame)?;
        let undistorted = rectifier.undistort(&gray)?;
        let cropped = rectifier.crop(&undistorted)?;

        highgui::imshow("raw", &gray)?;
        highgui::imshow("undistorted", &undistorted)?;
        highgui::imshow("cropped", &cropped)?;

        if classify_key(highgui::wait_key(10)?) == KeyAction::Stop {
            break;
        }
    }
    highgui::destroy_all_windows()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC1};

    fn zero_distortion_calibration() -> CameraCalibration {
        CameraCalibration {
            camera_matrix: vec![
                vec![1000.0, 0.0, 320.0],
                vec![0.0, 1000.0, 240.0],
                vec![0.0, 0.0, 1.0],
            ],
            dist_coeff: vec![vec![0.0, 0.0, 0.0, 0.0, 0.0]],
            ret: 0.0,
        }
    }

    #[test]
    fn crop_matches_roi_dimensions() {
        let calibration = zero_distortion_calibration();
        let size = Size::new(640, 480);
        let rectifier = Rectifier::new(&calibration, size).expect("rectifier");

        let frame =
            Mat::new_rows_cols_with_default(480, 640, CV_8UC1, Scalar::all(128.0)).expect("mat");
        let undistorted = rectifier.undistort(&frame).expect("undistort");
        let cropped = rectifier.crop(&undistorted).expect("crop");

        let roi = rectifier.roi();
        assert_eq!(cropped.cols(), roi.width);
        assert_eq!(cropped.rows(), roi.height);
    }

    #[test]
    fn roi_is_non_empty_and_inside_the_frame() {
        let calibration = zero_distortion_calibration();
        let size = Size::new(640, 480);
        let rectifier = Rectifier::new(&calibration, size).expect("rectifier");

        let roi = rectifier.roi();
        assert!(roi.width > 0 && roi.height > 0);
        assert!(roi.x >= 0 && roi.y >= 0);
        assert!(roi.x + roi.width <= 640);
        assert!(roi.y + roi.height <= 480);
    }
}
