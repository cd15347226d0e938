//! Frame-level types: camera model, blob measurements, acquired frames.

pub mod camera;
pub mod measurement;
pub mod video;

pub use camera::{CameraModel, Distortion};
pub use measurement::{BlobDetector, LedMeasurement};
pub use video::{Frame, FrameSource};
