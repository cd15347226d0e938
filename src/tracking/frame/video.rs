//! Acquired frames and the camera-source boundary.

use image::{GrayImage, RgbImage};

/// A color + grayscale image pair of the same exposure.
#[derive(Clone)]
pub struct Frame {
    pub color: RgbImage,
    pub gray: GrayImage,
    /// Acquisition time in nanoseconds on a monotonic clock.
    pub timestamp_ns: u64,
}

impl Frame {
    pub fn new(color: RgbImage, gray: GrayImage, timestamp_ns: u64) -> Self {
        Self {
            color,
            gray,
            timestamp_ns,
        }
    }

    /// A 1x1 black frame. Used when blobs come from a recording rather than
    /// from pixels.
    pub fn blank(timestamp_ns: u64) -> Self {
        Self::new(RgbImage::new(1, 1), GrayImage::new(1, 1), timestamp_ns)
    }
}

/// Camera-acquisition collaborator.
pub trait FrameSource: Send {
    /// Whether the device is present and usable.
    fn ok(&self) -> bool;

    /// Grab the next frame, or `None` if none is available right now.
    fn grab(&mut self) -> Option<Frame>;

    /// A finite source (a recording) has nothing left to deliver.
    fn is_finished(&self) -> bool {
        false
    }
}
