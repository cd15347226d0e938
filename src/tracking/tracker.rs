//! Video-based tracker: orchestrates per-frame processing.
//!
//! For every frame:
//! - runs the blob detector
//! - associates LED tracks with the nearest unclaimed blob, in track order
//! - drops stale tracks and starts new ones for leftover blobs
//! - identifies tracks by their blink codes
//! - hands each sensor the tracks identified as its beacons
//! - estimates and autocalibrates, reporting every solved pose

use anyhow::{bail, Result};
use image::{GrayImage, RgbImage};
use nalgebra::Vector3;
use tracing::{debug, info};

use crate::tracking::beacon::BeaconModel;
use crate::tracking::frame::{BlobDetector, CameraModel};
use crate::tracking::identifier::{IdentifierArena, IdentifierHandle, LedIdentifier};
use crate::tracking::led::Led;
use crate::tracking::params::TrackerParams;
use crate::tracking::pose_estimation::{
    BeaconDebugData, BeaconPoseEstimator, EstimateOutcome, EstimatorConfig,
};
use crate::tracking::result::{BeaconDebugReport, FrameResult, PoseReport};
use crate::tracking::state::TrackStatus;

/// Everything needed to register one rigid sensor.
#[derive(Debug)]
pub struct SensorSetup {
    pub identifier: Box<dyn LedIdentifier>,
    pub camera: CameraModel,
    pub positions: Vec<Vector3<f64>>,
    pub directions: Vec<Vector3<f64>>,
    pub variances: Vec<f64>,
    /// Local indices of beacons excluded from autocalibration.
    pub fixed: Vec<usize>,
    pub min_correspondences: usize,
    pub required_fixed: usize,
    pub autocalib_scale: f64,
    /// Global index of local beacon 0; the next free index when `None`.
    pub first_beacon: Option<usize>,
}

impl SensorSetup {
    pub fn new(
        identifier: Box<dyn LedIdentifier>,
        camera: CameraModel,
        positions: Vec<Vector3<f64>>,
        directions: Vec<Vector3<f64>>,
        variances: Vec<f64>,
    ) -> Self {
        let defaults = EstimatorConfig::default();
        Self {
            identifier,
            camera,
            positions,
            directions,
            variances,
            fixed: Vec::new(),
            min_correspondences: defaults.min_correspondences,
            required_fixed: defaults.required_fixed,
            autocalib_scale: 1.0,
            first_beacon: None,
        }
    }

    /// Mark beacons fixed by local index.
    pub fn with_fixed<F: Fn(usize) -> bool>(mut self, is_fixed: F) -> Self {
        self.fixed = (0..self.positions.len()).filter(|&i| is_fixed(i)).collect();
        self
    }

    pub fn with_min_correspondences(mut self, min_correspondences: usize) -> Self {
        self.min_correspondences = min_correspondences;
        self
    }

    pub fn with_required_fixed(mut self, required_fixed: usize) -> Self {
        self.required_fixed = required_fixed;
        self
    }

    pub fn with_autocalib_scale(mut self, scale: f64) -> Self {
        self.autocalib_scale = scale;
        self
    }

    pub fn with_first_beacon(mut self, first_beacon: usize) -> Self {
        self.first_beacon = Some(first_beacon);
        self
    }
}

#[derive(Debug)]
struct Sensor {
    estimator: BeaconPoseEstimator,
    identifier: IdentifierHandle,
    /// Tracks identified as this sensor's beacons in the current frame.
    claimed: Vec<usize>,
}

/// Tracks LED blobs across frames and estimates the pose of every
/// registered sensor.
pub struct VideoTracker {
    params: TrackerParams,
    detector: Box<dyn BlobDetector>,
    identifiers: IdentifierArena,
    sensors: Vec<Sensor>,
    leds: Vec<Led>,
    frames: u64,
    skipped_frames: u64,
}

impl VideoTracker {
    pub fn new(params: TrackerParams, detector: Box<dyn BlobDetector>) -> Self {
        Self {
            params,
            detector,
            identifiers: IdentifierArena::new(),
            sensors: Vec::new(),
            leds: Vec::new(),
            frames: 0,
            skipped_frames: 0,
        }
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn num_sensors(&self) -> usize {
        self.sensors.len()
    }

    /// Live LED tracks, in association order.
    pub fn leds(&self) -> &[Led] {
        &self.leds
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    pub fn frames_skipped(&self) -> u64 {
        self.skipped_frames
    }

    /// Register a sensor. Must happen before the first frame.
    ///
    /// Returns the sensor index used in pose reports.
    pub fn add_sensor(&mut self, setup: SensorSetup) -> Result<usize> {
        if self.frames > 0 {
            bail!("sensors must be registered before the first frame");
        }
        if !setup.camera.is_valid() {
            bail!("invalid camera intrinsics: {:?}", setup.camera);
        }
        let count = setup.positions.len();
        if let Some(&bad) = setup.fixed.iter().find(|&&i| i >= count) {
            bail!("fixed beacon {} is outside a model of {} beacons", bad, count);
        }
        let fixed = setup.fixed;
        let model = BeaconModel::new(
            &setup.positions,
            &setup.directions,
            &setup.variances,
            |i| fixed.contains(&i),
            setup.autocalib_scale,
        )?;
        if setup.identifier.beacon_count() > model.len() {
            bail!(
                "identifier knows {} beacons but the model has only {}",
                setup.identifier.beacon_count(),
                model.len()
            );
        }
        if setup.required_fixed > model.num_fixed() {
            bail!(
                "{} fixed beacons required but only {} are fixed",
                setup.required_fixed,
                model.num_fixed()
            );
        }

        let next_free = self
            .sensors
            .iter()
            .map(|s| s.estimator.beacon_range().end)
            .max()
            .unwrap_or(0);
        let first_beacon = setup.first_beacon.unwrap_or(next_free);
        let range = first_beacon..first_beacon + model.len();
        if let Some(other) = self.sensors.iter().position(|s| {
            let r = s.estimator.beacon_range();
            range.start < r.end && r.start < range.end
        }) {
            bail!("beacon range {:?} overlaps sensor {}", range, other);
        }

        let config = EstimatorConfig {
            min_correspondences: setup.min_correspondences,
            required_fixed: setup.required_fixed,
            outlier_threshold_px: self.params.outlier_threshold_px,
            measurement_variance: self.params.measurement_variance,
        };
        let identifier = self.identifiers.insert(setup.identifier, first_beacon);
        let sensor = self.sensors.len();
        info!(
            sensor,
            beacons = model.len(),
            fixed = model.num_fixed(),
            first_beacon,
            min_correspondences = config.min_correspondences,
            "registered sensor"
        );
        self.sensors.push(Sensor {
            estimator: BeaconPoseEstimator::new(setup.camera, model, first_beacon, config),
            identifier,
            claimed: Vec::new(),
        });
        Ok(sensor)
    }

    /// Process one acquired frame, calling `on_pose(sensor, report)` for each
    /// sensor whose pose was solved.
    pub fn process_image<F>(
        &mut self,
        color: &RgbImage,
        gray: &GrayImage,
        timestamp_ns: u64,
        mut on_pose: F,
    ) -> Result<FrameResult>
    where
        F: FnMut(usize, &PoseReport),
    {
        if self.sensors.is_empty() {
            bail!("no sensors registered");
        }
        self.frames += 1;

        for led in &mut self.leds {
            led.begin_frame();
        }

        let mut blobs = self.detector.detect(color, gray);
        let num_blobs = blobs.len();

        // Each track claims the nearest remaining blob, in track order.
        let keep_id = self.params.blobs_keep_identity;
        for led in &mut self.leds {
            let threshold = self.params.blob_move_threshold * led.measurement().diameter;
            match led.nearest(&blobs, threshold) {
                Some(idx) => {
                    let meas = blobs.remove(idx);
                    led.add_measurement(meas, keep_id, &self.identifiers);
                }
                None => led.mark_unmatched(),
            }
        }

        let max_unmatched = self.params.max_unmatched_frames;
        let before = self.leds.len();
        self.leds.retain(|led| {
            led.status() != TrackStatus::Unmatched || led.frames_unmatched() <= max_unmatched
        });
        if self.leds.len() < before {
            debug!(dropped = before - self.leds.len(), "dropped unmatched tracks");
        }

        for meas in blobs {
            self.leds.push(Led::new(meas, &self.identifiers));
        }

        self.claim_tracks();
        let identified = self.sensors.iter().map(|s| s.claimed.len()).sum();

        let mut outcomes = Vec::with_capacity(self.sensors.len());
        let mut poses = Vec::new();
        for (idx, sensor) in self.sensors.iter_mut().enumerate() {
            let outcome = sensor.estimator.estimate(&mut self.leds, &sensor.claimed);
            if let EstimateOutcome::Solved(estimate) = &outcome {
                let report = PoseReport {
                    sensor: idx,
                    pose: estimate.pose,
                    timestamp_ns,
                    correspondences: estimate.correspondences,
                    rms_error_px: estimate.rms_error_px,
                };
                on_pose(idx, &report);
                poses.push(report);
            }
            outcomes.push(outcome);
        }

        Ok(FrameResult {
            timestamp_ns,
            blobs: num_blobs,
            tracks: self.leds.len(),
            identified,
            outcomes,
            poses,
        })
    }

    /// The camera delivered nothing this cycle. Tracks are left untouched and
    /// no pose is emitted.
    pub fn process_no_frame(&mut self) {
        self.skipped_frames += 1;
        debug!(skipped = self.skipped_frames, "no frame available");
    }

    /// Assign every identified, matched track to the sensor owning its beacon.
    fn claim_tracks(&mut self) {
        for sensor in &mut self.sensors {
            sensor.claimed.clear();
        }
        for (idx, led) in self.leds.iter().enumerate() {
            if led.status() != TrackStatus::Identified {
                continue;
            }
            let Some(beacon) = led.beacon() else {
                continue;
            };
            if let Some(sensor) = self
                .sensors
                .iter_mut()
                .find(|s| s.estimator.beacon_range().contains(&beacon.0))
            {
                sensor.claimed.push(idx);
            }
        }
    }

    pub fn estimator(&self, sensor: usize) -> Option<&BeaconPoseEstimator> {
        self.sensors.get(sensor).map(|s| &s.estimator)
    }

    pub fn first_estimator(&self) -> Option<&BeaconPoseEstimator> {
        self.estimator(0)
    }

    pub fn beacon_debug_data(&self, sensor: usize) -> Option<&[BeaconDebugData]> {
        self.estimator(sensor).map(|e| e.debug_data())
    }

    /// Debug values of the first sensor, as streamed next to its poses.
    pub fn beacon_debug_report(&self, timestamp_ns: u64) -> Option<BeaconDebugReport> {
        self.first_estimator()
            .map(|e| BeaconDebugReport::from_debug_data(e.debug_data(), timestamp_ns))
    }
}
