//! Synthetic beacon scene shared by the tracking tests.

use nalgebra::{UnitQuaternion, Vector2, Vector3};

use crate::geometry::SE3;
use crate::tracking::beacon::BeaconModel;
use crate::tracking::frame::{CameraModel, LedMeasurement};
use crate::tracking::identifier::{IdentifierArena, LedIdentifier, PatternIdentifier};
use crate::tracking::led::{Led, MAX_NOVELTY};
use crate::tracking::pose_estimation::{BeaconPoseEstimator, EstimatorConfig};
use crate::tracking::tracker::SensorSetup;

pub(crate) const PATTERNS: [&str; 8] = [
    "*.....", "**....", "*.*...", "*..*..", "***...", "**.*..", "**..*.", "****..",
];

pub(crate) const BRIGHT: f64 = 6.0;
pub(crate) const DIM: f64 = 3.0;
pub(crate) const VARIANCE: f64 = 1e-4;

const GEOMETRY: [[f64; 3]; 8] = [
    [-0.08, -0.05, 0.00],
    [0.08, -0.05, 0.00],
    [0.08, 0.05, -0.02],
    [-0.08, 0.05, -0.02],
    [0.00, -0.02, -0.04],
    [0.04, 0.00, -0.01],
    [-0.04, 0.07, -0.05],
    [0.03, -0.07, -0.03],
];

/// A static sensor in front of a pinhole camera. Beacons 0 and 1 are fixed.
pub(crate) struct Scene {
    pub camera: CameraModel,
    /// True T_cs.
    pub pose: SE3,
    /// Model handed to the estimator.
    pub nominal: Vec<Vector3<f64>>,
    /// Where the beacons really are; defaults to `nominal`.
    pub truth: Vec<Vector3<f64>>,
    pub arena: IdentifierArena,
}

impl Scene {
    pub fn new() -> Self {
        Self::with_beacons(8)
    }

    pub fn with_beacons(n: usize) -> Self {
        let nominal: Vec<Vector3<f64>> = GEOMETRY[..n]
            .iter()
            .map(|p| Vector3::new(p[0], p[1], p[2]))
            .collect();
        let mut scene = Self {
            camera: CameraModel::new(600.0, 600.0, 320.0, 240.0),
            pose: SE3 {
                rotation: UnitQuaternion::from_euler_angles(0.1, -0.2, 0.05),
                translation: Vector3::new(0.02, -0.01, 0.6),
            },
            truth: nominal.clone(),
            nominal,
            arena: IdentifierArena::new(),
        };
        let identifier = scene.identifier();
        scene.arena.insert(Box::new(identifier), 0);
        scene
    }

    pub fn len(&self) -> usize {
        self.nominal.len()
    }

    pub fn identifier(&self) -> PatternIdentifier {
        PatternIdentifier::new(&PATTERNS[..self.len()]).unwrap()
    }

    pub fn code_length(&self) -> usize {
        self.identifier().code_length()
    }

    pub fn is_fixed(idx: usize) -> bool {
        idx < 2
    }

    pub fn model(&self) -> BeaconModel {
        let directions = vec![Vector3::zeros(); self.len()];
        let variances = vec![VARIANCE; self.len()];
        BeaconModel::new(&self.nominal, &directions, &variances, Self::is_fixed, 1.0).unwrap()
    }

    pub fn estimator(&self, config: EstimatorConfig) -> BeaconPoseEstimator {
        BeaconPoseEstimator::new(self.camera, self.model(), 0, config)
    }

    pub fn sensor_setup(&self) -> SensorSetup {
        SensorSetup::new(
            Box::new(self.identifier()),
            self.camera,
            self.nominal.clone(),
            vec![Vector3::zeros(); self.len()],
            vec![VARIANCE; self.len()],
        )
        .with_fixed(Self::is_fixed)
    }

    pub fn pixel(&self, beacon: usize) -> Vector2<f64> {
        self.camera
            .project(&self.pose.transform_point(&self.truth[beacon]))
            .unwrap()
    }

    /// Blob of `beacon` in frame `frame`, brightness following its code.
    pub fn measurement(&self, beacon: usize, frame: usize) -> LedMeasurement {
        let code = PATTERNS[beacon].as_bytes();
        let brightness = if code[frame % code.len()] == b'*' { BRIGHT } else { DIM };
        LedMeasurement::from_keypoint(self.pixel(beacon), brightness)
    }

    pub fn measurements(&self, frame: usize) -> Vec<LedMeasurement> {
        (0..self.len()).map(|b| self.measurement(b, frame)).collect()
    }

    fn track(&self, beacon: usize, frames: usize, offset: Vector2<f64>) -> Led {
        let shifted = |f: usize| {
            let mut m = self.measurement(beacon, f);
            m.loc += offset;
            m
        };
        let mut led = Led::new(shifted(0), &self.arena);
        for f in 1..frames {
            led.add_measurement(shifted(f), false, &self.arena);
        }
        led
    }

    /// One settled (novelty 0) identified track per beacon, with optional
    /// pixel offsets, and the indices of all of them.
    pub fn identified_leds(&self, offsets: &[(usize, Vector2<f64>)]) -> (Vec<Led>, Vec<usize>) {
        let frames = self.code_length() + MAX_NOVELTY as usize;
        let leds: Vec<Led> = (0..self.len())
            .map(|b| {
                let offset = offsets
                    .iter()
                    .find(|(idx, _)| *idx == b)
                    .map_or(Vector2::zeros(), |(_, o)| *o);
                self.track(b, frames, offset)
            })
            .collect();
        let claimed = (0..leds.len()).collect();
        (leds, claimed)
    }

    /// A track that identified `beacon` on its latest frame.
    pub fn fresh_led_for(&self, beacon: usize) -> Led {
        self.track(beacon, self.code_length(), Vector2::zeros())
    }
}
