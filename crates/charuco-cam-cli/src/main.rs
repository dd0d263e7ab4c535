//! Command line interface for ChArUco webcam calibration.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{debug, info, LevelFilter};
use opencv::{core::Vector, imgcodecs};

use charuco_cam::{
    capture_frames, io::load_board_spec, logger, preview_pose, preview_undistort, solve,
    BoardError, CalibIoError, CalibrateError, CameraCalibration, CaptureOptions, CornerExtractor,
    ExtractError, OverlayError, UndistortError, DEFAULT_CALIBRATION_PATH, MIN_CORNERS_PER_VIEW,
};

#[derive(Parser)]
#[command(
    name = "charuco-cam",
    about = "Intrinsic camera calibration with a printed ChArUco target",
    version
)]
struct Cli {
    /// Log pose telemetry and other diagnostics.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CameraArgs {
    /// Camera device index.
    #[arg(short, long, default_value_t = 0)]
    device: i32,

    /// Requested capture width in pixels.
    #[arg(long, default_value_t = 1920)]
    width: i32,

    /// Requested capture height in pixels.
    #[arg(long, default_value_t = 1080)]
    height: i32,
}

#[derive(Subcommand)]
enum Command {
    /// Render the calibration board to a printable image.
    Board {
        /// Output image path.
        #[arg(short, long, default_value = "board.png")]
        output: PathBuf,

        /// Pixels per board square.
        #[arg(long, default_value_t = 60)]
        px_per_square: i32,

        /// White border around the pattern, in pixels.
        #[arg(long, default_value_t = 20)]
        margin: i32,

        /// Board spec JSON; the built-in 25x18 board is used when omitted.
        #[arg(long)]
        board: Option<PathBuf>,
    },

    /// Capture frames, solve for intrinsics and save them as JSON.
    Calibrate {
        #[command(flatten)]
        camera: CameraArgs,

        /// Number of frames to capture (Enter/Space captures, Esc stops early).
        #[arg(short, long, default_value_t = 200)]
        frames: usize,

        /// Mirror the preview and captured frames horizontally.
        #[arg(long)]
        mirror: bool,

        /// Where to write the calibration.
        #[arg(short, long, default_value = DEFAULT_CALIBRATION_PATH)]
        output: PathBuf,

        /// Board spec JSON; the built-in 25x18 board is used when omitted.
        #[arg(long)]
        board: Option<PathBuf>,

        /// Skip the live pose-overlay preview after saving.
        #[arg(long)]
        no_preview: bool,
    },

    /// Load a saved calibration and preview live undistortion.
    Undistort {
        #[command(flatten)]
        camera: CameraArgs,

        /// Calibration file produced by `calibrate`.
        #[arg(short, long, default_value = DEFAULT_CALIBRATION_PATH)]
        calibration: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum AppError {
    #[error("no frames captured")]
    NoFramesCaptured,
    #[error("failed to write board image to {0}")]
    BoardImageWrite(PathBuf),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Calibrate(#[from] CalibrateError),
    #[error(transparent)]
    CalibIo(#[from] CalibIoError),
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    #[error(transparent)]
    Undistort(#[from] UndistortError),
    #[error(transparent)]
    Vision(#[from] opencv::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = logger::init(level);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), AppError> {
    match command {
        Command::Board {
            output,
            px_per_square,
            margin,
            board,
        } => run_board(&output, px_per_square, margin, board.as_deref()),
        Command::Calibrate {
            camera,
            frames,
            mirror,
            output,
            board,
            no_preview,
        } => run_calibrate(&camera, frames, mirror, &output, board.as_deref(), no_preview),
        Command::Undistort {
            camera,
            calibration,
        } => run_undistort(&camera, &calibration),
    }
}

fn run_board(
    output: &std::path::Path,
    px_per_square: i32,
    margin: i32,
    board: Option<&std::path::Path>,
) -> Result<(), AppError> {
    let spec = load_board_spec(board)?;
    let image = spec.render(px_per_square, margin)?;
    let written = imgcodecs::imwrite(
        &output.to_string_lossy(),
        &image,
        &Vector::<i32>::new(),
    )?;
    if !written {
        return Err(AppError::BoardImageWrite(output.to_path_buf()));
    }
    info!(
        "wrote {}x{} board image to {}",
        spec.squares_x,
        spec.squares_y,
        output.display()
    );
    Ok(())
}

fn run_calibrate(
    camera: &CameraArgs,
    frames: usize,
    mirror: bool,
    output: &std::path::Path,
    board: Option<&std::path::Path>,
    no_preview: bool,
) -> Result<(), AppError> {
    let spec = load_board_spec(board)?;
    let opts = CaptureOptions {
        device: camera.device,
        frames,
        mirror,
        resize: None,
        width: camera.width,
        height: camera.height,
    };

    let captured = capture_frames(&opts)?;
    if captured.is_empty() {
        return Err(AppError::NoFramesCaptured);
    }
    info!("captured {} frames", captured.len());

    let extractor = CornerExtractor::new(&spec)?;
    let mut extraction = extractor.extract_all(&captured)?;
    let detected = extraction.views.len();
    extraction.retain_usable(MIN_CORNERS_PER_VIEW);
    info!(
        "{} of {} frames had detections, {} usable for the solve",
        detected,
        captured.len(),
        extraction.views.len()
    );

    let (calibration, stats) = solve(&extractor, &extraction)?;
    debug!("per-view errors: {:?}", stats.per_view_errors);
    debug!("intrinsic std deviations: {:?}", stats.std_intrinsics);

    calibration.write_json(output)?;
    info!(
        "wrote calibration to {} (rms reprojection error {:.4})",
        output.display(),
        calibration.ret
    );

    if !no_preview {
        preview_pose(&calibration, &extractor, &opts)?;
    }
    Ok(())
}

fn run_undistort(camera: &CameraArgs, calibration: &std::path::Path) -> Result<(), AppError> {
    let calibration = CameraCalibration::load_json(calibration)?;
    let opts = CaptureOptions {
        device: camera.device,
        width: camera.width,
        height: camera.height,
        ..CaptureOptions::default()
    };
    preview_undistort(&calibration, &opts)?;
    Ok(())
}
