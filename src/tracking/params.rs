//! Tracker tunables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Parameters of the video-based tracker. Every field has a default, so a
/// configuration only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Association radius, in blob diameters of the track's last
    /// measurement.
    pub blob_move_threshold: f64,
    /// Keep a beacon identity while the detector reports the same blob id.
    pub blobs_keep_identity: bool,
    /// Frames an unmatched track survives. 0 drops it immediately.
    pub max_unmatched_frames: usize,
    /// Reprojection error (pixels) above which a correspondence is rejected.
    pub outlier_threshold_px: f64,
    /// Autocalibration measurement noise, in squared model units.
    pub measurement_variance: f64,
    /// Emit per-beacon debug values alongside poses.
    pub stream_beacon_debug_info: bool,
    /// Solve the rear panel beacons as part of the front panel sensor.
    pub include_rear_panel: bool,
    /// Head circumference in centimetres.
    pub head_circumference: f64,
    /// Millimetres from the head surface to the front beacon origin.
    pub head_to_front_beacon_origin_distance: f64,
    /// Initial variance of rear panel beacons when merged.
    pub back_panel_measurement_error: f64,
    /// Optional JSON array of calibrated beacon positions.
    pub calibration_file: Option<PathBuf>,
    /// Overrides the identifiers' contrast requirement when set.
    pub min_contrast: Option<f64>,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            blob_move_threshold: 4.0,
            blobs_keep_identity: false,
            max_unmatched_frames: 0,
            outlier_threshold_px: 8.0,
            measurement_variance: 3.0,
            stream_beacon_debug_info: false,
            include_rear_panel: false,
            head_circumference: 55.75,
            head_to_front_beacon_origin_distance: 0.0,
            back_panel_measurement_error: 3.0,
            calibration_file: None,
            min_contrast: None,
        }
    }
}

impl TrackerParams {
    /// Distance between the front and rear panel origins, in millimetres.
    pub fn distance_between_panels(&self) -> f64 {
        self.head_circumference / std::f64::consts::PI * 10.0
            + self.head_to_front_beacon_origin_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "blob_move_threshold: 6.0\ninclude_rear_panel: true\n";
        let params: TrackerParams = serde_yaml::from_str(yaml).unwrap();
        assert_relative_eq!(params.blob_move_threshold, 6.0);
        assert!(params.include_rear_panel);
        assert_eq!(params.max_unmatched_frames, 0);
        assert!(params.calibration_file.is_none());
    }

    #[test]
    fn test_distance_between_panels() {
        let params = TrackerParams {
            head_circumference: 10.0 * std::f64::consts::PI,
            head_to_front_beacon_origin_distance: 5.0,
            ..Default::default()
        };
        assert_relative_eq!(params.distance_between_panels(), 105.0, epsilon = 1e-9);
    }
}
