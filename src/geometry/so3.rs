//! SO(3) helpers: exponential map and projection of near-rotations.

use nalgebra::{Matrix3, Unit, UnitQuaternion, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-10;

/// Exponential map from an axis-angle vector (radians) to a unit quaternion.
pub fn exp(axis_angle: &Vector3<f64>) -> UnitQuaternion<f64> {
    let angle = axis_angle.norm();
    if angle < SMALL_ANGLE_THRESHOLD {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::from_axis_angle(&Unit::new_normalize(*axis_angle / angle), angle)
}

/// Closest rotation matrix (Frobenius norm) to `m`.
///
/// Returns `None` when the SVD does not converge or the input is
/// rank-deficient enough that no meaningful rotation exists.
pub fn project_to_so3(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    if svd.singular_values.iter().any(|s| !s.is_finite()) || svd.singular_values.max() <= 0.0 {
        return None;
    }

    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        // Flip the axis belonging to the smallest singular value.
        let (min_idx, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |acc, (i, &s)| if s < acc.1 { (i, s) } else { acc });
        let mut d = Matrix3::identity();
        d[(min_idx, min_idx)] = -1.0;
        r = u * d * v_t;
    }
    Some(r)
}
