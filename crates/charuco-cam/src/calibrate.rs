//! Intrinsic calibration solve over extracted board corners.

use log::info;
use opencv::{
    calib3d,
    core::{
        Mat, Point2f, Point3f, Size, TermCriteria, TermCriteria_COUNT, TermCriteria_EPS, Vector,
        CV_64F,
    },
    prelude::*,
};

use crate::{
    extract::{CornerExtractor, Extraction},
    io::{CalibIoError, CameraCalibration},
};

/// Minimum refined corners a view must carry to enter the solve.
pub const MIN_CORNERS_PER_VIEW: usize = 4;

/// Initial focal length guess in pixels.
const INITIAL_FOCAL_LENGTH: f64 = 1000.0;
/// Solver iteration cap.
const SOLVER_MAX_ITERS: i32 = 10_000;
/// Solver convergence epsilon.
const SOLVER_EPS: f64 = 1e-9;

#[derive(thiserror::Error, Debug)]
pub enum CalibrateError {
    #[error("no usable views: every frame had fewer than {MIN_CORNERS_PER_VIEW} corners")]
    NoUsableViews,
    #[error(transparent)]
    Vision(#[from] opencv::Error),
    #[error(transparent)]
    Result(#[from] CalibIoError),
}

/// Per-view and per-parameter statistics from the extended solve.
///
/// Computed on every run but not persisted; useful for judging which views
/// hurt the fit.
#[derive(Debug, Default)]
pub struct SolveStats {
    pub per_view_errors: Vec<f64>,
    pub std_intrinsics: Vec<f64>,
    pub std_extrinsics: Vec<f64>,
}

/// Initial intrinsic guess: fixed focal length, principal point at the image
/// centre.
fn initial_camera_matrix(image_size: Size) -> opencv::Result<Mat> {
    let cx = f64::from(image_size.width) / 2.0;
    let cy = f64::from(image_size.height) / 2.0;
    Mat::from_slice_2d(&[
        [INITIAL_FOCAL_LENGTH, 0.0, cx],
        [0.0, INITIAL_FOCAL_LENGTH, cy],
        [0.0, 0.0, 1.0],
    ])
}

/// Solve for camera intrinsics and distortion from filtered views.
///
/// The extraction must already be filtered with
/// [`Extraction::retain_usable`]; degenerate solver input beyond the empty
/// case is left to OpenCV and propagates as an error.
pub fn solve(
    extractor: &CornerExtractor,
    extraction: &Extraction,
) -> Result<(CameraCalibration, SolveStats), CalibrateError> {
    if extraction.views.is_empty() {
        return Err(CalibrateError::NoUsableViews);
    }

    let mut object_points = Vector::<Vector<Point3f>>::new();
    let mut image_points = Vector::<Vector<Point2f>>::new();
    for view in &extraction.views {
        let mut obj = Vector::<Point3f>::new();
        let mut img = Vector::<Point2f>::new();
        extractor
            .board()
            .match_image_points(&view.corners, &view.ids, &mut obj, &mut img)?;
        object_points.push(obj);
        image_points.push(img);
    }

    let mut camera_matrix = initial_camera_matrix(extraction.image_size)?;
    let mut dist_coeff = Mat::zeros(1, 5, CV_64F)?.to_mat()?;
    let flags = calib3d::CALIB_USE_INTRINSIC_GUESS
        | calib3d::CALIB_RATIONAL_MODEL
        | calib3d::CALIB_FIX_ASPECT_RATIO;
    let criteria = TermCriteria::new(
        TermCriteria_COUNT + TermCriteria_EPS,
        SOLVER_MAX_ITERS,
        SOLVER_EPS,
    )?;

    let mut rvecs = Vector::<Mat>::new();
    let mut tvecs = Vector::<Mat>::new();
    let mut std_intrinsics = Mat::default();
    let mut std_extrinsics = Mat::default();
    let mut per_view_errors = Mat::default();
    let ret = calib3d::calibrate_camera_extended(
        &object_points,
        &image_points,
        extraction.image_size,
        &mut camera_matrix,
        &mut dist_coeff,
        &mut rvecs,
        &mut tvecs,
        &mut std_intrinsics,
        &mut std_extrinsics,
        &mut per_view_errors,
        flags,
        criteria,
    )?;

    info!(
        "calibrated over {} views, rms reprojection error {ret:.4}",
        extraction.views.len()
    );

    let calibration = CameraCalibration::from_mats(&camera_matrix, &dist_coeff, ret)?;
    let stats = SolveStats {
        per_view_errors: mat_to_f64s(&per_view_errors)?,
        std_intrinsics: mat_to_f64s(&std_intrinsics)?,
        std_extrinsics: mat_to_f64s(&std_extrinsics)?,
    };
    Ok((calibration, stats))
}

fn mat_to_f64s(m: &Mat) -> opencv::Result<Vec<f64>> {
    let mut out = Vec::with_capacity((m.rows().max(0) * m.cols().max(0)) as usize);
    for r in 0..m.rows() {
        for c in 0..m.cols() {
            out.push(*m.at_2d::<f64>(r, c)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardSpec;

    #[test]
    fn initial_guess_centres_principal_point() {
        let m = initial_camera_matrix(Size::new(1920, 1080)).expect("mat");
        assert_eq!(*m.at_2d::<f64>(0, 0).unwrap(), 1000.0);
        assert_eq!(*m.at_2d::<f64>(1, 1).unwrap(), 1000.0);
        assert_eq!(*m.at_2d::<f64>(0, 2).unwrap(), 960.0);
        assert_eq!(*m.at_2d::<f64>(1, 2).unwrap(), 540.0);
        assert_eq!(*m.at_2d::<f64>(2, 2).unwrap(), 1.0);
    }

    #[test]
    fn stats_conversion_reads_every_element() {
        let m = Mat::from_slice_2d(&[[0.5, 1.5], [2.5, 3.5]]).expect("mat");
        assert_eq!(mat_to_f64s(&m).expect("f64s"), vec![0.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn stats_conversion_rejects_wrongly_typed_mat() {
        let m = Mat::from_slice_2d(&[[1.0f32, 2.0], [3.0, 4.0]]).expect("mat");
        assert!(mat_to_f64s(&m).is_err());
    }

    #[test]
    fn empty_extraction_is_rejected() {
        let extractor = CornerExtractor::new(&BoardSpec::default()).expect("extractor");
        let extraction = Extraction::default();
        assert!(matches!(
            solve(&extractor, &extraction),
            Err(CalibrateError::NoUsableViews)
        ));
    }
}
