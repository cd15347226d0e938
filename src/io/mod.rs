//! File formats: device descriptors, beacon calibration, recorded blobs.

pub mod blob_log;
pub mod calibration;
pub mod config;

pub use blob_log::{BlobLog, LogBlobDetector, LogFrameSource};
pub use config::DeviceDescriptor;
