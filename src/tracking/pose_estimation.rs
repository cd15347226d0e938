//! Beacon-based pose estimation for one sensor.
//!
//! Each frame the estimator:
//! - gathers correspondences from the identified tracks the sensor claimed
//! - enforces the minimum-correspondence policy
//! - solves PnP with outlier rejection, seeded with the previous pose
//! - revokes rejected identifications and marks the used tracks
//! - refines the beacon model (autocalibration)

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use nalgebra::Vector2;
use tracing::debug;

use crate::geometry::pnp::MIN_PNP_POINTS;
use crate::geometry::{solve_pnp_detailed, Correspondence, PnPConfig, SE3};
use crate::tracking::beacon::BeaconModel;
use crate::tracking::frame::CameraModel;
use crate::tracking::led::Led;

/// Tunables of one estimator.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorConfig {
    /// Distinct beacons needed before a solve is attempted.
    pub min_correspondences: usize,
    /// How many of those must be fixed beacons.
    pub required_fixed: usize,
    pub outlier_threshold_px: f64,
    /// Measurement variance used as the autocalibration noise term.
    pub measurement_variance: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_correspondences: MIN_PNP_POINTS,
            required_fixed: 0,
            outlier_threshold_px: 8.0,
            measurement_variance: 3.0,
        }
    }
}

/// Latest diagnostic values of one beacon.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BeaconDebugData {
    pub variance: f64,
    /// Last observed pixel, if the beacon has ever been seen.
    pub measurement: Option<Vector2<f64>>,
    /// Observed minus projected pixel, from the last solved frame that saw
    /// the beacon.
    pub residual: Option<Vector2<f64>>,
}

/// A solved pose of one sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimate {
    /// T_cs: sensor coordinates into camera coordinates.
    pub pose: SE3,
    /// Correspondences that survived outlier rejection.
    pub correspondences: usize,
    pub rms_error_px: f64,
}

/// Per-frame outcome of [`BeaconPoseEstimator::estimate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EstimateOutcome {
    Solved(PoseEstimate),
    /// The minimum-correspondence policy was not met.
    TooFewBeacons { found: usize, fixed: usize },
    /// Enough beacons, but no consistent pose.
    NoSolution,
}

impl EstimateOutcome {
    pub fn estimate(&self) -> Option<&PoseEstimate> {
        match self {
            EstimateOutcome::Solved(estimate) => Some(estimate),
            _ => None,
        }
    }
}

/// Pose estimator and beacon model of one sensor.
#[derive(Debug, Clone)]
pub struct BeaconPoseEstimator {
    camera: CameraModel,
    model: BeaconModel,
    first_beacon: usize,
    config: EstimatorConfig,
    prior: Option<SE3>,
    debug: Vec<BeaconDebugData>,
}

impl BeaconPoseEstimator {
    pub fn new(
        camera: CameraModel,
        model: BeaconModel,
        first_beacon: usize,
        config: EstimatorConfig,
    ) -> Self {
        let debug = model
            .iter()
            .map(|b| BeaconDebugData {
                variance: b.variance,
                ..Default::default()
            })
            .collect();
        Self {
            camera,
            model,
            first_beacon,
            config,
            prior: None,
            debug,
        }
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn model(&self) -> &BeaconModel {
        &self.model
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Global index of local beacon 0.
    pub fn first_beacon(&self) -> usize {
        self.first_beacon
    }

    /// Global beacon indices owned by this sensor.
    pub fn beacon_range(&self) -> std::ops::Range<usize> {
        self.first_beacon..self.first_beacon + self.model.len()
    }

    /// Pose from the last successful solve.
    pub fn prior(&self) -> Option<&SE3> {
        self.prior.as_ref()
    }

    pub fn debug_data(&self) -> &[BeaconDebugData] {
        &self.debug
    }

    /// Estimate the pose from the tracks at `claimed` (indices into `leds`),
    /// all of which must be identified as beacons of this sensor.
    ///
    /// On success, rejected tracks are marked misidentified, used tracks are
    /// marked used and the beacon model is autocalibrated. On failure nothing
    /// is revoked and the model is untouched.
    pub fn estimate(&mut self, leds: &mut [Led], claimed: &[usize]) -> EstimateOutcome {
        // Beacon -> track, one track per beacon.
        let mut by_beacon: BTreeMap<usize, usize> = BTreeMap::new();
        for &track in claimed {
            let Some(local) = self.local_index(&leds[track]) else {
                continue;
            };
            match by_beacon.entry(local) {
                Entry::Vacant(slot) => {
                    slot.insert(track);
                }
                Entry::Occupied(mut slot) => {
                    let incumbent = *slot.get();
                    // The older identification wins; ties go to the earlier track.
                    let loser = if leds[track].novelty() < leds[incumbent].novelty() {
                        slot.insert(track);
                        incumbent
                    } else {
                        track
                    };
                    debug!(
                        beacon = local + self.first_beacon,
                        track = loser,
                        "duplicate beacon claim"
                    );
                    leds[loser].mark_misidentified();
                }
            }
        }

        for (&local, &track) in &by_beacon {
            self.debug[local].measurement = Some(leds[track].location());
            self.debug[local].variance = self.model.get(local).map_or(0.0, |b| b.variance);
        }

        let found = by_beacon.len();
        let fixed = by_beacon.keys().filter(|&&b| self.is_fixed(b)).count();
        let min_correspondences = self.config.min_correspondences.max(MIN_PNP_POINTS);
        if found < min_correspondences || fixed < self.config.required_fixed {
            return EstimateOutcome::TooFewBeacons { found, fixed };
        }

        let beacons: Vec<(usize, usize)> = by_beacon.into_iter().collect();
        let correspondences: Vec<Correspondence> = beacons
            .iter()
            .filter_map(|&(local, track)| {
                self.model.get(local).map(|b| Correspondence {
                    object: b.position,
                    image: leds[track].location(),
                })
            })
            .collect();

        let pnp_config = PnPConfig {
            outlier_threshold_px: self.config.outlier_threshold_px,
            min_inliers: min_correspondences,
        };
        let solved =
            solve_pnp_detailed(&correspondences, &self.camera, self.prior.as_ref(), &pnp_config);
        let Some(result) = solved else {
            return EstimateOutcome::NoSolution;
        };
        if !is_finite(&result.pose) {
            return EstimateOutcome::NoSolution;
        }

        let fixed_inliers = beacons
            .iter()
            .zip(&result.inlier_mask)
            .filter(|((local, _), &inlier)| inlier && self.is_fixed(*local))
            .count();
        if fixed_inliers < self.config.required_fixed {
            debug!(fixed_inliers, "too few fixed beacons survived outlier rejection");
            return EstimateOutcome::NoSolution;
        }

        for (pos, &(local, track)) in beacons.iter().enumerate() {
            if !result.inlier_mask[pos] {
                leds[track].mark_misidentified();
                continue;
            }
            leds[track].mark_used();
            self.debug[local].residual = result.residuals[pos];

            let eligible = leds[track].novelty() == 0
                && self
                    .model
                    .get(local)
                    .map_or(false, |b| !b.fixed && b.faces_camera(&result.pose));
            if eligible {
                let pixel = leds[track].location();
                self.model.autocalibrate(
                    local,
                    &result.pose,
                    &self.camera,
                    &pixel,
                    self.config.measurement_variance,
                );
                self.debug[local].variance = self.model.get(local).map_or(0.0, |b| b.variance);
            }
        }

        self.prior = Some(result.pose);
        EstimateOutcome::Solved(PoseEstimate {
            pose: result.pose,
            correspondences: result.num_inliers(),
            rms_error_px: result.rms_error_px,
        })
    }

    fn local_index(&self, led: &Led) -> Option<usize> {
        let id = led.beacon()?.0;
        self.beacon_range().contains(&id).then(|| id - self.first_beacon)
    }

    fn is_fixed(&self, local: usize) -> bool {
        self.model.get(local).map_or(false, |b| b.fixed)
    }
}

fn is_finite(pose: &SE3) -> bool {
    pose.translation.iter().all(|v| v.is_finite())
        && pose.rotation.coords.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::state::LedIdentity;
    use crate::tracking::test_support::Scene;
    use approx::assert_relative_eq;

    #[test]
    fn test_solves_identified_scene() {
        let scene = Scene::new();
        let mut estimator = scene.estimator(EstimatorConfig::default());
        let (mut leds, claimed) = scene.identified_leds(&[]);

        let outcome = estimator.estimate(&mut leds, &claimed);
        let estimate = outcome.estimate().expect("pose");
        assert_eq!(estimate.correspondences, 8);
        assert!(estimate.rms_error_px < 1e-3);
        assert!(estimate.pose.angle_to(&scene.pose) < 1e-4);
        assert_relative_eq!(estimate.pose.translation, scene.pose.translation, epsilon = 1e-4);
        assert!(leds.iter().all(|l| l.was_used_last_frame()));
        assert!(estimator.prior().is_some());
        assert!(estimator.debug_data().iter().all(|d| d.residual.is_some()));
    }

    #[test]
    fn test_minimum_policy_gates_solve() {
        let scene = Scene::new();
        let config = EstimatorConfig {
            min_correspondences: 5,
            ..Default::default()
        };
        let mut estimator = scene.estimator(config);
        let (mut leds, claimed) = scene.identified_leds(&[]);

        let outcome = estimator.estimate(&mut leds, &claimed[..4]);
        assert_eq!(outcome, EstimateOutcome::TooFewBeacons { found: 4, fixed: 2 });
        assert!(estimator.prior().is_none());
        assert!(leds.iter().all(|l| l.identified() && !l.was_used_last_frame()));

        let strict = EstimatorConfig {
            required_fixed: 3,
            ..Default::default()
        };
        let mut estimator = scene.estimator(strict);
        let outcome = estimator.estimate(&mut leds, &claimed);
        assert_eq!(outcome, EstimateOutcome::TooFewBeacons { found: 8, fixed: 2 });
    }

    #[test]
    fn test_outlier_is_revoked_on_success() {
        let scene = Scene::new();
        let mut estimator = scene.estimator(EstimatorConfig::default());
        // Track 4 observed 40 px off.
        let (mut leds, claimed) = scene.identified_leds(&[(4, Vector2::new(40.0, 0.0))]);

        let outcome = estimator.estimate(&mut leds, &claimed);
        let estimate = outcome.estimate().expect("pose");
        assert_eq!(estimate.correspondences, 7);
        assert!(!leds[4].identified());
        assert!(!leds[4].was_used_last_frame());
        assert!(leds.iter().enumerate().all(|(i, l)| i == 4 || l.was_used_last_frame()));
    }

    #[test]
    fn test_single_outlier_revoked_at_every_index() {
        let config = EstimatorConfig::default();
        let offsets = [
            Vector2::new(config.outlier_threshold_px + 1.0, 0.0),
            Vector2::new(12.0, 0.0),
            Vector2::new(0.0, -12.0),
            Vector2::new(-30.0, 0.0),
        ];
        for n in MIN_PNP_POINTS + 1..=8 {
            let scene = Scene::with_beacons(n);
            for outlier in 0..n {
                for offset in offsets {
                    let case = format!("{} beacons, track {} off by {:?}", n, outlier, offset);
                    // A clean frame first, so the shifted one is solved from a prior.
                    let mut estimator = scene.estimator(config);
                    let (mut leds, claimed) = scene.identified_leds(&[]);
                    assert!(estimator.estimate(&mut leds, &claimed).estimate().is_some());

                    let (mut leds, claimed) = scene.identified_leds(&[(outlier, offset)]);
                    let outcome = estimator.estimate(&mut leds, &claimed);
                    let estimate = outcome.estimate().expect("pose");
                    assert_eq!(estimate.correspondences, n - 1, "{}", case);
                    let error = estimate.pose.angle_to(&scene.pose);
                    assert!(error < 1e-3, "{}: rotation error {}", case, error);
                    assert_eq!(leds[outlier].identity(), LedIdentity::NotRecognized, "{}", case);
                    for (i, led) in leds.iter().enumerate().filter(|&(i, _)| i != outlier) {
                        assert!(led.identified(), "{}: track {} revoked", case, i);
                        assert!(led.was_used_last_frame(), "{}: track {} unused", case, i);
                    }
                }
            }
        }
    }

    #[test]
    fn test_duplicate_claim_keeps_older_track() {
        let scene = Scene::new();
        let mut estimator = scene.estimator(EstimatorConfig::default());
        let (mut leds, mut claimed) = scene.identified_leds(&[]);

        // A fresh track claiming beacon 0 again.
        let newcomer = scene.fresh_led_for(0);
        assert!(newcomer.novelty() > leds[0].novelty());
        leds.insert(0, newcomer);
        claimed = (0..leds.len()).collect();

        let outcome = estimator.estimate(&mut leds, &claimed);
        assert!(outcome.estimate().is_some());
        assert!(!leds[0].identified());
        assert!(leds[1].identified() && leds[1].was_used_last_frame());
    }

    #[test]
    fn test_autocalibration_respects_fixed_and_variance() {
        let mut scene = Scene::new();
        let config = EstimatorConfig {
            measurement_variance: 1e-6,
            ..Default::default()
        };
        let mut estimator = scene.estimator(config);
        let nominal = estimator.model().positions();
        let variances: Vec<f64> = estimator.model().iter().map(|b| b.variance).collect();

        // Beacon 5 sits 4 mm off its nominal position in the real object.
        scene.truth[5].x += 0.004;
        for _ in 0..20 {
            let (mut leds, claimed) = scene.identified_leds(&[]);
            let outcome = estimator.estimate(&mut leds, &claimed);
            assert!(outcome.estimate().is_some());
        }

        for (idx, beacon) in estimator.model().iter().enumerate() {
            assert!(beacon.variance <= variances[idx]);
            if beacon.fixed {
                assert_eq!(beacon.position, nominal[idx]);
                assert_eq!(beacon.variance, variances[idx]);
            }
        }
        assert!(estimator.model().get(5).unwrap().variance < variances[5]);
        assert!(estimator.model().get(5).unwrap().position != nominal[5]);
    }
}
