mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbaImage;

/// Trait for camera frame sources.
///
/// A frame with zero width or height means "not ready yet"; the pipeline
/// skips that tick silently. Errors are fatal to the running session.
pub trait FrameSource {
    /// Grab the current frame.
    fn grab(&mut self) -> Result<RgbaImage>;

    /// Get the configured capture resolution.
    fn resolution(&self) -> (u32, u32);
}
