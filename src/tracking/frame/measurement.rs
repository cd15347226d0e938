//! Per-frame blob observations and the detector boundary.

use std::f64::consts::PI;

use image::{GrayImage, RgbImage};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// One frame's 2-D observation of a candidate LED.
///
/// Locations are in image pixels; the camera model attached to each sensor
/// accounts for lens distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedMeasurement {
    /// Blob center in pixels.
    pub loc: Vector2<f64>,
    /// Abstract brightness fed to the blink-code identifier. Currently the
    /// blob diameter.
    pub brightness: f64,
    /// Blob diameter in pixels.
    pub diameter: f64,
    /// Blob area in pixels.
    pub area: f64,
    /// Blob circularity in [0, 1].
    pub circularity: f64,
    /// Upright bounding box (width, height), if the detector reports one.
    pub bounding_box: Option<Vector2<f64>>,
    /// The detector's own blob tracking id, if it tracks blobs itself.
    pub blob_id: Option<u64>,
}

impl LedMeasurement {
    /// Build from a keypoint location and size, the way a simple blob
    /// detector reports it.
    pub fn from_keypoint(loc: Vector2<f64>, size: f64) -> Self {
        let radius = size / 2.0;
        Self {
            loc,
            brightness: size,
            diameter: size,
            area: radius * radius * PI,
            circularity: 0.0,
            bounding_box: None,
            blob_id: None,
        }
    }

    pub fn with_blob_id(mut self, blob_id: u64) -> Self {
        self.blob_id = Some(blob_id);
        self
    }

    pub fn with_circularity(mut self, circularity: f64) -> Self {
        self.circularity = circularity.clamp(0.0, 1.0);
        self
    }

    pub fn with_bounding_box(mut self, width: f64, height: f64) -> Self {
        self.bounding_box = Some(Vector2::new(width, height));
        self
    }

    /// Euclidean pixel distance between two blob centers.
    #[inline]
    pub fn distance_to(&self, other: &Vector2<f64>) -> f64 {
        (self.loc - other).norm()
    }

    /// True when both measurements carry the same detector blob id.
    pub fn same_blob_as(&self, other: &LedMeasurement) -> bool {
        matches!((self.blob_id, other.blob_id), (Some(a), Some(b)) if a == b)
    }
}

/// Turns an acquired frame into candidate LED measurements.
pub trait BlobDetector: Send {
    fn detect(&mut self, color: &RgbImage, gray: &GrayImage) -> Vec<LedMeasurement>;
}

impl<F> BlobDetector for F
where
    F: FnMut(&RgbImage, &GrayImage) -> Vec<LedMeasurement> + Send,
{
    fn detect(&mut self, color: &RgbImage, gray: &GrayImage) -> Vec<LedMeasurement> {
        self(color, gray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_keypoint_area_and_brightness() {
        let m = LedMeasurement::from_keypoint(Vector2::new(10.0, 20.0), 4.0);
        assert_relative_eq!(m.brightness, 4.0);
        assert_relative_eq!(m.diameter, 4.0);
        assert_relative_eq!(m.area, 4.0 * PI, epsilon = 1e-12);
        assert!(m.blob_id.is_none());
    }

    #[test]
    fn test_same_blob_requires_both_ids() {
        let a = LedMeasurement::from_keypoint(Vector2::zeros(), 3.0);
        let b = a.with_blob_id(7);
        assert!(!a.same_blob_as(&b));
        assert!(b.same_blob_as(&b.with_circularity(0.5)));
        assert!(!b.same_blob_as(&a.with_blob_id(8)));
    }
}
