//! Game-element position detection from a live robot camera.
//!
//! Frames flow one way: camera callback -> [`buffer::BoundedFrameBuffer`] ->
//! [`Detector::load_image`] -> [`classify::Classifier`] -> last-known
//! [`ElementPosition`].

pub mod buffer;
pub mod camera;
pub mod classify;
pub mod detector;
pub mod handshake;
pub mod session;
pub mod snapshot;

pub use detector::{AcquireError, Detector, DetectorError, DetectorStats};
pub use element_detector_common::frame::{ElementPosition, Frame};
pub use session::SessionState;
