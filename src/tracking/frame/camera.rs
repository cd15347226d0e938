//! Pinhole camera with radial-tangential (Brown-Conrady) distortion.

use nalgebra::{Matrix3, Unit, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Points closer than this to the image plane are not projected.
const MIN_DEPTH: f64 = 1e-6;

/// Fixed-point iterations used to invert the distortion model.
const UNDISTORT_ITERATIONS: usize = 20;

/// Radial (k1, k2, k3) and tangential (p1, p2) distortion coefficients,
/// in the usual OpenCV ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// Build from an OpenCV-style `[k1, k2, p1, p2, k3]` array.
    pub fn from_coeffs(coeffs: [f64; 5]) -> Self {
        Self {
            k1: coeffs[0],
            k2: coeffs[1],
            p1: coeffs[2],
            p2: coeffs[3],
            k3: coeffs[4],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0 && self.k3 == 0.0
    }

    /// Apply distortion to undistorted normalized coordinates.
    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, d: &Vector2<f64>) -> Vector2<f64> {
        if self.is_zero() {
            return *d;
        }
        let (x0, y0) = (d.x, d.y);
        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (x0 - dx) / radial;
            y = (y0 - dy) / radial;
        }
        Vector2::new(x, y)
    }
}

/// Camera intrinsics plus distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion: Distortion::default(),
        }
    }

    /// Build from a 3x3 intrinsic matrix.
    pub fn from_k(k: &Matrix3<f64>) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    pub fn with_distortion(mut self, distortion: Distortion) -> Self {
        self.distortion = distortion;
        self
    }

    /// Focal lengths must be positive and finite.
    pub fn is_valid(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx > 0.0
            && self.fy > 0.0
    }

    /// Intrinsic matrix K.
    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Project a camera-frame point to (distorted) pixel coordinates.
    ///
    /// Returns `None` for points at or behind the image plane.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Vector2<f64>> {
        if p_cam.z <= MIN_DEPTH {
            return None;
        }
        let n = Vector2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        let d = self.distortion.distort(&n);
        Some(Vector2::new(
            self.fx * d.x + self.cx,
            self.fy * d.y + self.cy,
        ))
    }

    /// Undistorted normalized image coordinates of a pixel.
    pub fn pixel_to_normalized(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let d = Vector2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy);
        self.distortion.undistort(&d)
    }

    /// Unit viewing ray through a pixel, in camera coordinates.
    pub fn ray(&self, pixel: &Vector2<f64>) -> Unit<Vector3<f64>> {
        let n = self.pixel_to_normalized(pixel);
        Unit::new_normalize(Vector3::new(n.x, n.y, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn distorted_camera() -> CameraModel {
        CameraModel::new(700.0, 700.0, 320.0, 240.0)
            .with_distortion(Distortion::from_coeffs([-0.12, 0.03, 0.001, -0.0005, 0.0]))
    }

    #[test]
    fn test_rejects_zero_focal() {
        assert!(!CameraModel::new(0.0, 700.0, 320.0, 240.0).is_valid());
        assert!(CameraModel::new(700.0, 700.0, 320.0, 240.0).is_valid());
    }

    #[test]
    fn test_project_behind_camera_is_none() {
        let cam = CameraModel::new(700.0, 700.0, 320.0, 240.0);
        assert!(cam.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
        assert!(cam.project(&Vector3::new(0.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_project_then_ray_roundtrip_with_distortion() {
        let cam = distorted_camera();
        let p = Vector3::new(40.0, -25.0, 300.0);
        let pixel = cam.project(&p).unwrap();
        let ray = cam.ray(&pixel);

        assert_relative_eq!(ray.into_inner(), p.normalize(), epsilon = 1e-8);
    }

    #[test]
    fn test_principal_point_maps_to_optical_axis() {
        let cam = distorted_camera();
        let n = cam.pixel_to_normalized(&Vector2::new(320.0, 240.0));
        assert_relative_eq!(n, Vector2::zeros(), epsilon = 1e-12);
    }
}
