//! SE3: rigid-body transformation (rotation + translation).
//!
//! Tracked poses are stored as T_cs: they map a point expressed in sensor
//! (beacon model) coordinates into camera coordinates, `p_c = R * p_s + t`.

use std::ops::Mul;

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use super::so3;

/// Rigid transformation: p' = R * p + t.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Construct from a rotation matrix and translation.
    ///
    /// The matrix is assumed orthonormal; use [`so3::project_to_so3`] first
    /// for matrices coming out of a linear solve.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
        }
    }

    /// Inverse transformation.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Apply the transformation to a point.
    #[inline]
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Apply only the rotation (for directions and normals).
    #[inline]
    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    /// Pack as [axis-angle rotation, translation].
    pub fn to_params(&self) -> Vector6<f64> {
        let axis_angle = self.rotation.scaled_axis();
        Vector6::new(
            axis_angle.x,
            axis_angle.y,
            axis_angle.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        )
    }

    /// Inverse of [`SE3::to_params`].
    pub fn from_params(params: &Vector6<f64>) -> Self {
        let axis_angle = Vector3::new(params[0], params[1], params[2]);
        Self {
            rotation: so3::exp(&axis_angle),
            translation: Vector3::new(params[3], params[4], params[5]),
        }
    }

    /// Rotation angle (radians) between two poses.
    pub fn angle_to(&self, other: &SE3) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for SE3 {
    type Output = SE3;

    /// Composition: `(a * b).transform_point(p) == a.transform_point(&b.transform_point(p))`.
    fn mul(self, rhs: SE3) -> SE3 {
        SE3 {
            rotation: self.rotation * rhs.rotation,
            translation: self.rotation * rhs.translation + self.translation,
        }
    }
}
