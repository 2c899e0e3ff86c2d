//! Video capture boundary.
//!
//! Device enumeration, permissions and the driver itself live behind these
//! traits. The detector relies on two things only: frames arriving through
//! a callback, and exactly one configuration result per
//! `create_capture_session` call.

use element_detector_common::config::PixelFormat;
use element_detector_common::frame::Frame;
use std::fmt;
use std::time::Duration;

/// Called on the camera's delivery context for every captured frame.
/// Must not block.
pub type FrameSink = Box<dyn FnMut(Frame) + Send>;

/// Called once when a capture sequence stops.
pub type SequenceCompleteHook = Box<dyn FnOnce(SequenceCompleted) + Send>;

/// Receives the configured session (or the reason there is none),
/// usually on a different thread than the one that asked.
pub type ConfigureCallback = Box<dyn FnOnce(Result<Box<dyn CaptureSession>, CameraError>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCompleted {
    pub sequence_id: u64,
    pub last_frame: Option<u64>,
}

/// Format, resolution and rate for a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl fmt::Display for CaptureRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}x{}@{}", self.format, self.width, self.height, self.fps)
    }
}

pub trait CameraManager: Send + Sync {
    /// Open the named camera, giving up after `deadline`.
    fn open(&self, name: &str, deadline: Duration) -> Result<Box<dyn Camera>, CameraError>;
}

pub trait Camera: Send {
    fn supports_format(&self, format: PixelFormat) -> bool;

    /// Highest frame rate the camera offers for `format` at `width` x `height`.
    fn max_fps(&self, format: PixelFormat, width: u32, height: u32) -> Option<u32>;

    /// Start configuring a capture session. The outcome goes to
    /// `on_configured`, exactly once, unless this returns an error.
    fn create_capture_session(&mut self, on_configured: ConfigureCallback)
        -> Result<(), CameraError>;

    fn close(&mut self);
}

pub trait CaptureSession: Send {
    fn start_capture(
        &mut self,
        request: CaptureRequest,
        on_frame: FrameSink,
        on_complete: SequenceCompleteHook,
    ) -> Result<(), CameraError>;

    fn stop_capture(&mut self);

    fn close(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("failed to open camera {name}: {reason}")]
    Open { name: String, reason: String },
    #[error("camera did not open within {0:?}")]
    Timeout(Duration),
    #[error("camera does not support {0:?} frames")]
    UnsupportedFormat(PixelFormat),
    #[error("capture session configuration failed: {0}")]
    Configure(String),
    #[error("failed to start capture: {0}")]
    Capture(String),
    #[error("camera is closed")]
    Closed,
}
