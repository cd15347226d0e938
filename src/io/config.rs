//! Device descriptors: camera, tracker parameters and per-sensor beacon
//! tables, loaded from YAML or JSON.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::io::calibration::calibrated_positions;
use crate::tracking::frame::{CameraModel, Distortion};
use crate::tracking::identifier::{LedIdentifier, PatternIdentifier, UnifiedIdentifier};
use crate::tracking::{SensorSetup, TrackerParams};

/// Initial variance of beacons whose descriptor lists none.
pub const DEFAULT_BEACON_VARIANCE: f64 = 3.0;

/// Variance scale applied when positions come from a calibration file.
pub const CALIBRATED_AUTOCALIB_SCALE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraDescriptor {
    pub fn to_model(&self) -> Result<CameraModel> {
        let model =
            CameraModel::new(self.fx, self.fy, self.cx, self.cy).with_distortion(self.distortion);
        if !model.is_valid() {
            bail!(
                "invalid camera intrinsics fx={} fy={} cx={} cy={}",
                self.fx,
                self.fy,
                self.cx,
                self.cy
            );
        }
        Ok(model)
    }
}

fn default_min_correspondences() -> usize {
    4
}

/// Beacon table of one rigid sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    /// Blink patterns over `*` (bright) and `.` (dim), in beacon order.
    pub patterns: Vec<String>,
    pub positions: Vec<[f64; 3]>,
    /// Emission directions; all unknown when empty.
    #[serde(default)]
    pub directions: Vec<[f64; 3]>,
    /// Initial variances; [`DEFAULT_BEACON_VARIANCE`] each when empty.
    #[serde(default)]
    pub variances: Vec<f64>,
    /// One-based ids of beacons excluded from autocalibration.
    #[serde(default)]
    pub fixed_beacons: Vec<usize>,
    /// Treat every beacon as fixed.
    #[serde(default)]
    pub all_fixed: bool,
    #[serde(default = "default_min_correspondences")]
    pub min_correspondences: usize,
    #[serde(default)]
    pub required_fixed: usize,
    /// Patterns are rendered, not captured: relax the contrast requirement.
    #[serde(default)]
    pub simulated: bool,
}

impl SensorDescriptor {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn is_fixed(&self, idx: usize) -> bool {
        self.all_fixed || self.fixed_beacons.contains(&(idx + 1))
    }

    fn identifier(&self, min_contrast: Option<f64>) -> Result<PatternIdentifier> {
        let identifier = if self.simulated {
            PatternIdentifier::simulated(&self.patterns)
        } else {
            PatternIdentifier::new(&self.patterns)
        }
        .with_context(|| format!("invalid blink patterns for sensor {}", self.label()))?;
        Ok(match min_contrast {
            Some(c) => identifier.with_min_contrast(c),
            None => identifier,
        })
    }

    fn positions(&self) -> Vec<Vector3<f64>> {
        self.positions.iter().map(|&p| Vector3::from(p)).collect()
    }

    fn directions(&self) -> Result<Vec<Vector3<f64>>> {
        if self.directions.is_empty() {
            return Ok(vec![Vector3::zeros(); self.len()]);
        }
        if self.directions.len() != self.len() {
            bail!(
                "sensor {} has {} directions for {} beacons",
                self.label(),
                self.directions.len(),
                self.len()
            );
        }
        Ok(self.directions.iter().map(|&d| Vector3::from(d)).collect())
    }

    fn variances(&self) -> Vec<f64> {
        if self.variances.is_empty() {
            vec![DEFAULT_BEACON_VARIANCE; self.len()]
        } else {
            self.variances.clone()
        }
    }

    fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<unnamed>".to_string())
    }
}

/// A tracked device: one camera, tracker parameters, and its sensors. With
/// `params.include_rear_panel`, the second sensor is the rear panel and is
/// merged into the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub camera: CameraDescriptor,
    #[serde(default)]
    pub params: TrackerParams,
    pub sensors: Vec<SensorDescriptor>,
}

impl DeviceDescriptor {
    /// Load from a `.json` file, or YAML otherwise.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        let descriptor: Self = if is_json {
            serde_json::from_reader(file)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            serde_yaml::from_reader(file)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let descriptor: Self = serde_yaml::from_str(s)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sensors.is_empty() {
            bail!("device has no sensors");
        }
        if self.params.include_rear_panel && self.sensors.len() < 2 {
            bail!("include_rear_panel needs a second (rear panel) sensor");
        }
        for sensor in &self.sensors {
            if sensor.is_empty() {
                bail!("sensor {} has no beacons", sensor.label());
            }
            let out_of_range = sensor
                .fixed_beacons
                .iter()
                .find(|&&id| id == 0 || id > sensor.len());
            if let Some(&id) = out_of_range {
                bail!(
                    "sensor {} lists fixed beacon {} outside 1..={}",
                    sensor.label(),
                    id,
                    sensor.len()
                );
            }
        }
        Ok(())
    }

    /// Sensor setups in registration order, with the rear panel merge and
    /// the calibration file applied.
    pub fn sensor_setups(&self) -> Result<Vec<SensorSetup>> {
        self.validate()?;
        let camera = self.camera.to_model()?;
        let min_contrast = self.params.min_contrast;
        let calibration = self.params.calibration_file.as_deref();

        let mut setups = Vec::with_capacity(self.sensors.len());
        let rest = if self.params.include_rear_panel {
            setups.push(self.merged_panels(camera)?);
            &self.sensors[2..]
        } else {
            let front = &self.sensors[0];
            let mut positions = front.positions();
            let mut autocalib_scale = 1.0;
            if let Some(calibrated) = calibrated_positions(calibration, positions.len()) {
                positions = calibrated;
                autocalib_scale = CALIBRATED_AUTOCALIB_SCALE;
            }
            setups.push(
                SensorSetup::new(
                    Box::new(front.identifier(min_contrast)?),
                    camera,
                    positions,
                    front.directions()?,
                    front.variances(),
                )
                .with_fixed(|i| front.is_fixed(i))
                .with_min_correspondences(front.min_correspondences)
                .with_required_fixed(front.required_fixed)
                .with_autocalib_scale(autocalib_scale),
            );
            &self.sensors[1..]
        };

        for sensor in rest {
            setups.push(
                SensorSetup::new(
                    Box::new(sensor.identifier(min_contrast)?),
                    camera,
                    sensor.positions(),
                    sensor.directions()?,
                    sensor.variances(),
                )
                .with_fixed(|i| sensor.is_fixed(i))
                .with_min_correspondences(sensor.min_correspondences)
                .with_required_fixed(sensor.required_fixed),
            );
        }
        Ok(setups)
    }

    /// Front and rear panel as one rigid sensor. The rear panel is rotated
    /// 180 degrees about Y and pushed back by the panel distance.
    fn merged_panels(&self, camera: CameraModel) -> Result<SensorSetup> {
        let front = &self.sensors[0];
        let back = &self.sensors[1];
        let offset = self.params.distance_between_panels();

        let mut positions = front.positions();
        positions.extend(back.positions().iter().map(|p| Vector3::new(-p.x, p.y, -p.z - offset)));
        let mut directions = front.directions()?;
        directions.extend(back.directions()?.iter().map(|d| Vector3::new(-d.x, d.y, -d.z)));
        let mut variances = front.variances();
        let back_error = self.params.back_panel_measurement_error;
        variances.extend(std::iter::repeat(back_error).take(back.len()));

        let mut autocalib_scale = 1.0;
        let calibration_file = self.params.calibration_file.as_deref();
        if let Some(calibrated) = calibrated_positions(calibration_file, positions.len()) {
            positions = calibrated;
            autocalib_scale = CALIBRATED_AUTOCALIB_SCALE;
        }

        let identifier = UnifiedIdentifier::new(vec![
            Box::new(front.identifier(self.params.min_contrast)?) as Box<dyn LedIdentifier>,
            Box::new(back.identifier(self.params.min_contrast)?),
        ])?;
        info!(
            front = front.len(),
            back = back.len(),
            distance_between_panels = offset,
            "merging rear panel into the front sensor"
        );

        let front_len = front.len();
        Ok(SensorSetup::new(Box::new(identifier), camera, positions, directions, variances)
            .with_fixed(|i| i < front_len && front.is_fixed(i))
            .with_min_correspondences(front.min_correspondences)
            .with_required_fixed(front.required_fixed)
            .with_autocalib_scale(autocalib_scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DEVICE: &str = r#"
camera:
  fx: 700.0
  fy: 700.0
  cx: 320.0
  cy: 240.0
params:
  head_circumference: 50.0
  head_to_front_beacon_origin_distance: 10.0
  back_panel_measurement_error: 2.5
sensors:
  - name: front
    patterns: ["**....", "*.*...", "***...", "*.....", "**.*.."]
    positions: [[0, 0, 0], [10, 0, 0], [0, 10, 0], [10, 10, -5], [5, 5, -10]]
    fixed_beacons: [1, 2]
    min_correspondences: 4
  - name: back
    patterns: ["**....", "*.*...", "***...", "*....."]
    positions: [[1, 0, 2], [-1, 0, 2], [0, 1, 2], [0, -1, 2]]
    directions: [[0, 0, 1], [0, 0, 1], [0, 0, 1], [0, 0, 1]]
    all_fixed: true
"#;

    #[test]
    fn test_separate_sensors() {
        let device = DeviceDescriptor::from_yaml_str(DEVICE).unwrap();
        let setups = device.sensor_setups().unwrap();
        assert_eq!(setups.len(), 2);

        let front = &setups[0];
        assert_eq!(front.fixed, vec![0, 1]);
        assert_eq!(front.variances, vec![DEFAULT_BEACON_VARIANCE; 5]);
        assert_eq!(front.directions[3], Vector3::zeros());
        assert_eq!(front.identifier.beacon_count(), 5);

        let back = &setups[1];
        assert_eq!(back.fixed, vec![0, 1, 2, 3]);
        assert_eq!(back.directions[0], Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_rear_panel_merge() {
        let mut device = DeviceDescriptor::from_yaml_str(DEVICE).unwrap();
        device.params.include_rear_panel = true;
        let setups = device.sensor_setups().unwrap();
        assert_eq!(setups.len(), 1);

        let merged = &setups[0];
        let offset = 50.0 / std::f64::consts::PI * 10.0 + 10.0;
        assert_eq!(merged.positions.len(), 9);
        let expected = Vector3::new(-1.0, 0.0, -2.0 - offset);
        assert_relative_eq!(merged.positions[5], expected, epsilon = 1e-9);
        assert_eq!(merged.directions[6], Vector3::new(0.0, 0.0, -1.0));
        assert_relative_eq!(merged.variances[8], 2.5);
        // Only the front panel's fixed beacons stay fixed.
        assert_eq!(merged.fixed, vec![0, 1]);
        assert_eq!(merged.identifier.beacon_count(), 9);
    }

    #[test]
    fn test_rejects_bad_descriptors() {
        let mut device = DeviceDescriptor::from_yaml_str(DEVICE).unwrap();
        device.sensors[0].fixed_beacons = vec![0];
        assert!(device.validate().is_err());

        let mut device = DeviceDescriptor::from_yaml_str(DEVICE).unwrap();
        device.sensors[1].directions.pop();
        assert!(device.sensor_setups().is_err());

        let mut device = DeviceDescriptor::from_yaml_str(DEVICE).unwrap();
        device.sensors.truncate(1);
        device.params.include_rear_panel = true;
        assert!(device.validate().is_err());

        let mut device = DeviceDescriptor::from_yaml_str(DEVICE).unwrap();
        device.camera.fx = 0.0;
        assert!(device.sensor_setups().is_err());
    }

    #[test]
    fn test_calibration_file_replaces_positions() {
        let name = format!("vbtracker-{}-device-calib.json", std::process::id());
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, "[[1,1,1],[2,2,2],[3,3,3],[4,4,4],[5,5,5]]").unwrap();

        let mut device = DeviceDescriptor::from_yaml_str(DEVICE).unwrap();
        device.params.calibration_file = Some(path.clone());
        let setups = device.sensor_setups().unwrap();
        assert_eq!(setups[0].positions[4], Vector3::new(5.0, 5.0, 5.0));
        assert_relative_eq!(setups[0].autocalib_scale, CALIBRATED_AUTOCALIB_SCALE);
        // The back panel never takes the calibration.
        assert_eq!(setups[1].positions[0], Vector3::new(1.0, 0.0, 2.0));

        // Wrong length for the merged model: nominal geometry is kept.
        device.params.include_rear_panel = true;
        let setups = device.sensor_setups().unwrap();
        assert_eq!(setups[0].positions[4], Vector3::new(5.0, 5.0, -10.0));
        assert_relative_eq!(setups[0].autocalib_scale, 1.0);

        std::fs::remove_file(&path).unwrap();
    }
}
