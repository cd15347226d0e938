//! Tracking core: turns camera frames into sensor poses.
//!
//! This module implements the per-frame pipeline:
//! - Blob association into LED tracks
//! - Blink-code identification of tracks as beacons
//! - Beacon-based pose estimation (PnP with outlier rejection)
//! - Online refinement of the beacon geometry (autocalibration)

pub mod beacon;
pub mod frame;
pub mod identifier;
pub mod led;
pub mod params;
pub mod pose_estimation;
pub mod result;
pub mod state;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

pub use params::TrackerParams;
pub use result::{BeaconDebugReport, FrameResult, PoseReport};
pub use state::{BeaconId, LedIdentity, TrackStatus};
pub use tracker::{SensorSetup, VideoTracker};
