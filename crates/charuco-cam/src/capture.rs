//! Interactive frame capture from a live camera.
//!
//! The loop previews every frame in a named window; Enter or Space stores the
//! currently displayed frame, Esc stops early. Key handling and frame
//! accounting are split out of the device loop so they stay testable without
//! a camera attached.

use log::{info, warn};
use opencv::{
    core::{self, Mat, Size},
    highgui, imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};

const WINDOW_NAME: &str = "capture";

/// Options for one capture session.
#[derive(Clone, Copy, Debug)]
pub struct CaptureOptions {
    /// Camera device index.
    pub device: i32,
    /// Number of frames to collect before the loop ends on its own.
    pub frames: usize,
    /// Mirror the image horizontally before display and capture.
    pub mirror: bool,
    /// Optional output size; frames are resized before display and capture.
    pub resize: Option<(i32, i32)>,
    /// Requested capture width in pixels.
    pub width: i32,
    /// Requested capture height in pixels.
    pub height: i32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            device: 0,
            frames: 200,
            mirror: false,
            resize: None,
            width: 1920,
            height: 1080,
        }
    }
}

/// What a keypress means to the capture loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// Store the current frame.
    Capture,
    /// Stop the loop, keeping whatever was collected so far.
    Stop,
    /// No-op.
    Ignore,
}

/// Map a `wait_key` code to a capture action. Esc stops, Enter or Space
/// captures, everything else (including the -1 "no key" code) is ignored.
pub fn classify_key(code: i32) -> KeyAction {
    match code {
        27 => KeyAction::Stop,
        10 | 13 | 32 => KeyAction::Capture,
        _ => KeyAction::Ignore,
    }
}

/// Accumulates captured frames up to a target count.
#[derive(Debug, Default)]
pub struct FrameCollector {
    frames: Vec<Mat>,
    target: usize,
}

impl FrameCollector {
    pub fn new(target: usize) -> Self {
        Self {
            frames: Vec::new(),
            target,
        }
    }

    /// Apply one key action to the collector. Returns `false` when the loop
    /// should end, either on an explicit stop or once the target is reached.
    pub fn accept(&mut self, action: KeyAction, frame: &Mat) -> bool {
        match action {
            KeyAction::Stop => false,
            KeyAction::Ignore => true,
            KeyAction::Capture => {
                self.frames.push(frame.clone());
                info!("captured frame {}/{}", self.frames.len(), self.target);
                self.frames.len() < self.target
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn into_frames(self) -> Vec<Mat> {
        self.frames
    }
}

/// Run the interactive capture loop.
///
/// Returns the collected frames in capture order; the list may be shorter
/// than `opts.frames` (including empty) if the user stops early. A device
/// that fails to open surfaces as a stream of empty reads, not as an error.
pub fn capture_frames(opts: &CaptureOptions) -> opencv::Result<Vec<Mat>> {
    highgui::named_window(WINDOW_NAME, highgui::WINDOW_AUTOSIZE)?;
    let mut cam = VideoCapture::new(opts.device, videoio::CAP_ANY)?;
    cam.set(videoio::CAP_PROP_FRAME_WIDTH, opts.width as f64)?;
    cam.set(videoio::CAP_PROP_FRAME_HEIGHT, opts.height as f64)?;

    let mut collector = FrameCollector::new(opts.frames);
    loop {
        let mut frame = Mat::default();
        cam.read(&mut frame)?;
        if frame.size()?.width < 1 {
            warn!("empty frame from device {}", opts.device);
            // Keep polling the keyboard so Esc still works on a dead device.
            if classify_key(highgui::wait_key(1)?) == KeyAction::Stop {
                break;
            }
            continue;
        }

        let frame = prepare_frame(&frame, opts)?;
        highgui::imshow(WINDOW_NAME, &frame)?;

        let action = classify_key(highgui::wait_key(1)?);
        if !collector.accept(action, &frame) {
            break;
        }
    }
    highgui::destroy_all_windows()?;

    Ok(collector.into_frames())
}

/// Apply the mirror and resize options to a raw frame.
fn prepare_frame(frame: &Mat, opts: &CaptureOptions) -> opencv::Result<Mat> {
    let mut out = frame.clone();
    if opts.mirror {
        let mut flipped = Mat::default();
        core::flip(&out, &mut flipped, 1)?;
        out = flipped;
    }
    if let Some((w, h)) = opts.resize {
        let mut resized = Mat::default();
        imgproc::resize(
            &out,
            &mut resized,
            Size::new(w, h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
        out = resized;
    }
    Ok(out)
}
