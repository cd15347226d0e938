//! Per-frame outputs of the tracker.
//!
//! These types describe what happened during processing of a single frame:
//! - the poses emitted per sensor
//! - blob, track and identification counts
//! - the per-sensor estimator outcome
//! - the beacon debug values streamed for the first sensor

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;
use crate::tracking::pose_estimation::{BeaconDebugData, EstimateOutcome};

/// Beacons covered by the debug report.
pub const DEBUGGABLE_BEACONS: usize = 34;

/// Values per beacon: variance, measurement x/y, residual x/y.
pub const DATAPOINTS_PER_BEACON: usize = 5;

/// A pose emitted for one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseReport {
    pub sensor: usize,
    /// T_cs: sensor coordinates into camera coordinates.
    pub pose: SE3,
    /// Acquisition time of the frame the pose was solved from.
    pub timestamp_ns: u64,
    pub correspondences: usize,
    pub rms_error_px: f64,
}

/// Summary of one processed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub timestamp_ns: u64,
    /// Blobs returned by the detector.
    pub blobs: usize,
    /// Live tracks after association and spawning.
    pub tracks: usize,
    /// Tracks identified as a beacon this frame.
    pub identified: usize,
    /// Estimator outcome, indexed by sensor.
    pub outcomes: Vec<EstimateOutcome>,
    pub poses: Vec<PoseReport>,
}

impl FrameResult {
    pub fn pose_for(&self, sensor: usize) -> Option<&PoseReport> {
        self.poses.iter().find(|p| p.sensor == sensor)
    }
}

/// Flattened per-beacon debug values, `DATAPOINTS_PER_BEACON` per beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconDebugReport {
    /// Emission time.
    pub timestamp_ns: u64,
    pub values: Vec<f64>,
}

impl BeaconDebugReport {
    /// Flatten at most [`DEBUGGABLE_BEACONS`] entries. Values never observed
    /// are reported as 0.
    pub fn from_debug_data(debug: &[BeaconDebugData], timestamp_ns: u64) -> Self {
        let values = debug
            .iter()
            .take(DEBUGGABLE_BEACONS)
            .flat_map(|d| {
                let m = d.measurement.unwrap_or_else(Vector2::zeros);
                let r = d.residual.unwrap_or_else(Vector2::zeros);
                [d.variance, m.x, m.y, r.x, r.y]
            })
            .collect();
        Self { timestamp_ns, values }
    }

    pub fn num_beacons(&self) -> usize {
        self.values.len() / DATAPOINTS_PER_BEACON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_report_is_capped() {
        let mut debug = vec![BeaconDebugData::default(); 40];
        debug[1] = BeaconDebugData {
            variance: 2.0,
            measurement: Some(Vector2::new(10.0, 20.0)),
            residual: Some(Vector2::new(0.5, -0.5)),
        };
        let report = BeaconDebugReport::from_debug_data(&debug, 7);
        assert_eq!(report.num_beacons(), DEBUGGABLE_BEACONS);
        assert_eq!(report.values.len(), DEBUGGABLE_BEACONS * DATAPOINTS_PER_BEACON);
        assert_eq!(&report.values[5..10], &[2.0, 10.0, 20.0, 0.5, -0.5]);
        assert_eq!(report.timestamp_ns, 7);
    }
}
