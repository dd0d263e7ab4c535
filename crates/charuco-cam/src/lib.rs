//! Interactive webcam intrinsic calibration with a ChArUco target.
//!
//! The pipeline is strictly sequential: capture frames from a live camera,
//! extract refined board corners per frame, solve for the intrinsic matrix
//! and lens distortion, persist the result as JSON, then optionally preview a
//! live pose overlay. Loading a saved calibration for live undistortion is an
//! independent entry path. All vision primitives are delegated to OpenCV.

pub mod board;
pub mod calibrate;
pub mod capture;
pub mod extract;
pub mod io;
pub mod logger;
pub mod overlay;
pub mod undistort;

pub use board::{BoardError, BoardSpec, DictionaryKind};
pub use calibrate::{solve, CalibrateError, SolveStats, MIN_CORNERS_PER_VIEW};
pub use capture::{capture_frames, classify_key, CaptureOptions, FrameCollector, KeyAction};
pub use extract::{CornerExtractor, ExtractError, Extraction, FrameCorners};
pub use io::{CalibIoError, CameraCalibration, DEFAULT_CALIBRATION_PATH};
pub use overlay::{draw_axis, preview_pose, BoardPose, OverlayError, OverlaySkip};
pub use undistort::{preview_undistort, Rectifier, UndistortError};
