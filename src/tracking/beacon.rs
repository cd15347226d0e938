//! Beacon geometry of one sensor, refined online by autocalibration.

use anyhow::{bail, Result};
use nalgebra::{Vector2, Vector3};

use crate::geometry::SE3;
use crate::tracking::frame::CameraModel;

/// One beacon in sensor coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beacon {
    pub position: Vector3<f64>,
    /// Emission direction; zero when unknown (treated as always visible).
    pub direction: Vector3<f64>,
    /// Positional uncertainty, shrinks with every autocalibration update.
    pub variance: f64,
    /// Fixed beacons anchor the model and are never moved.
    pub fixed: bool,
}

impl Beacon {
    /// Whether the beacon's emission direction points towards the camera
    /// under `pose` (T_cs).
    pub fn faces_camera(&self, pose: &SE3) -> bool {
        if self.direction.norm_squared() == 0.0 {
            return true;
        }
        let p_cam = pose.transform_point(&self.position);
        let d_cam = pose.transform_vector(&self.direction);
        d_cam.dot(&-p_cam) > 0.0
    }
}

/// Ordered beacons of one sensor, indexed by local beacon index.
#[derive(Debug, Clone, Default)]
pub struct BeaconModel {
    beacons: Vec<Beacon>,
}

impl BeaconModel {
    /// Build a model from parallel arrays. Initial variances are multiplied
    /// by `autocalib_scale`.
    pub fn new<F>(
        positions: &[Vector3<f64>],
        directions: &[Vector3<f64>],
        variances: &[f64],
        is_fixed: F,
        autocalib_scale: f64,
    ) -> Result<Self>
    where
        F: Fn(usize) -> bool,
    {
        if positions.is_empty() {
            bail!("beacon model is empty");
        }
        if directions.len() != positions.len() || variances.len() != positions.len() {
            bail!(
                "beacon arrays differ in length: {} positions, {} directions, {} variances",
                positions.len(),
                directions.len(),
                variances.len()
            );
        }
        if !(autocalib_scale.is_finite() && autocalib_scale > 0.0) {
            bail!("autocalibration scale must be positive, got {}", autocalib_scale);
        }
        if let Some(idx) = variances.iter().position(|v| !(v.is_finite() && *v >= 0.0)) {
            bail!("beacon {} has invalid variance {}", idx, variances[idx]);
        }

        let beacons = positions
            .iter()
            .zip(directions)
            .zip(variances)
            .enumerate()
            .map(|(idx, ((&position, &direction), &variance))| Beacon {
                position,
                direction,
                variance: variance * autocalib_scale,
                fixed: is_fixed(idx),
            })
            .collect();
        Ok(Self { beacons })
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Beacon> {
        self.beacons.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Beacon> {
        self.beacons.iter()
    }

    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.beacons.iter().map(|b| b.position).collect()
    }

    pub fn num_fixed(&self) -> usize {
        self.beacons.iter().filter(|b| b.fixed).count()
    }

    /// Move beacon `idx` towards the point on the ray through `pixel` closest
    /// to its current camera-frame position, with Kalman-style gain
    /// `var / (var + measurement_variance)`.
    ///
    /// Returns the applied gain, or `None` when nothing was updated (fixed
    /// beacon, point behind the camera, or degenerate input).
    pub fn autocalibrate(
        &mut self,
        idx: usize,
        pose: &SE3,
        camera: &CameraModel,
        pixel: &Vector2<f64>,
        measurement_variance: f64,
    ) -> Option<f64> {
        let beacon = self.beacons.get_mut(idx)?;
        if beacon.fixed {
            return None;
        }
        let denom = beacon.variance + measurement_variance;
        if !(denom.is_finite() && denom > 0.0) {
            return None;
        }

        let p_cam = pose.transform_point(&beacon.position);
        let ray = camera.ray(pixel);
        let depth = ray.dot(&p_cam);
        if depth <= 0.0 {
            return None;
        }
        let target = pose.inverse().transform_point(&(ray.into_inner() * depth));
        if !target.iter().all(|v| v.is_finite()) {
            return None;
        }

        let gain = beacon.variance / denom;
        beacon.position += (target - beacon.position) * gain;
        beacon.variance *= 1.0 - gain;
        Some(gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn camera() -> CameraModel {
        CameraModel::new(600.0, 600.0, 320.0, 240.0)
    }

    fn model() -> BeaconModel {
        let positions = [Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.05, 0.0, 0.0)];
        let directions = [Vector3::new(0.0, 0.0, -1.0), Vector3::zeros()];
        BeaconModel::new(&positions, &directions, &[1e-4, 1e-4], |i| i == 0, 2.0).unwrap()
    }

    #[test]
    fn test_rejects_inconsistent_arrays() {
        let p = [Vector3::zeros()];
        assert!(BeaconModel::new(&p, &[], &[1.0], |_| false, 1.0).is_err());
        assert!(BeaconModel::new(&[], &[], &[], |_| false, 1.0).is_err());
        assert!(BeaconModel::new(&p, &p, &[1.0], |_| false, 0.0).is_err());
        assert!(BeaconModel::new(&p, &p, &[-1.0], |_| false, 1.0).is_err());
    }

    #[test]
    fn test_variance_is_scaled() {
        let m = model();
        assert_relative_eq!(m.get(0).unwrap().variance, 2e-4);
        assert_eq!(m.num_fixed(), 1);
    }

    #[test]
    fn test_faces_camera() {
        let pose = SE3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(0.0, 0.0, 1.0),
        };
        let m = model();
        assert!(m.get(0).unwrap().faces_camera(&pose));
        assert!(m.get(1).unwrap().faces_camera(&pose));

        let flipped = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, std::f64::consts::PI, 0.0),
            translation: Vector3::new(0.0, 0.0, 1.0),
        };
        assert!(!m.get(0).unwrap().faces_camera(&flipped));
    }

    #[test]
    fn test_autocalibration_moves_towards_ray() {
        let cam = camera();
        let pose = SE3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(0.0, 0.0, 1.0),
        };
        let mut m = model();

        // Fixed beacons never move.
        let before = *m.get(0).unwrap();
        assert!(m.autocalibrate(0, &pose, &cam, &Vector2::new(330.0, 240.0), 1e-4).is_none());
        assert_eq!(*m.get(0).unwrap(), before);

        // Beacon 1 projects to x = 350; observe it at x = 344 (closer to 0).
        let var_before = m.get(1).unwrap().variance;
        let gain = m.autocalibrate(1, &pose, &cam, &Vector2::new(344.0, 240.0), 2e-4).unwrap();
        assert_relative_eq!(gain, 0.5, epsilon = 1e-12);
        let b = m.get(1).unwrap();
        assert!(b.position.x < 0.05 && b.position.x > 0.04);
        assert!(b.variance < var_before);
        assert_relative_eq!(b.variance, var_before * 0.5, epsilon = 1e-15);
    }
}
