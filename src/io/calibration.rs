//! Beacon calibration files: a JSON array of `[x, y, z]` positions, one per
//! beacon in model order.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::Vector3;
use tracing::{info, warn};

/// Read every position from a calibration file.
pub fn load_beacon_positions(path: &Path) -> Result<Vec<Vector3<f64>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let points: Vec<[f64; 3]> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse beacon positions from {}", path.display()))?;
    Ok(points.into_iter().map(Vector3::from).collect())
}

/// Write positions in the same format `load_beacon_positions` reads.
pub fn save_beacon_positions(path: &Path, positions: &[Vector3<f64>]) -> Result<()> {
    let points: Vec<[f64; 3]> = positions.iter().map(|p| [p.x, p.y, p.z]).collect();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &points)
        .with_context(|| format!("Failed to write beacon positions to {}", path.display()))?;
    Ok(())
}

/// Calibrated positions for a model of `expected` beacons, if `path` names
/// a readable file of exactly that length. Any problem is logged and the
/// caller keeps its nominal geometry.
pub fn calibrated_positions(path: Option<&Path>, expected: usize) -> Option<Vec<Vector3<f64>>> {
    let path = path?;
    match load_beacon_positions(path) {
        Ok(points) if points.len() == expected => {
            info!(path = %path.display(), beacons = expected, "loaded beacon calibration");
            Some(points)
        }
        Ok(points) => {
            warn!(
                path = %path.display(),
                found = points.len(),
                expected,
                "beacon calibration has the wrong length, using nominal positions"
            );
            None
        }
        Err(e) => {
            warn!("Could not load beacon calibration: {:#}. Using nominal positions.", e);
            None
        }
    }
}
