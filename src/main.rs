use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rust_vbtracker::io::calibration::save_beacon_positions;
use rust_vbtracker::io::{BlobLog, DeviceDescriptor};
use rust_vbtracker::system::{SystemOptions, TrackerMessage, TrackingSystem};
use rust_vbtracker::tracking::{PoseReport, VideoTracker};

/// Replay a recorded blob log through the beacon tracker and write the
/// resulting poses as CSV.
#[derive(Debug, Parser)]
#[command(name = "rust-vbtracker", version)]
struct Args {
    /// Device descriptor (YAML, or JSON with a .json extension).
    config: PathBuf,

    /// Blob log CSV: timestamp_ns,x,y,size[,blob_id][,circularity].
    blobs: PathBuf,

    /// Pose output CSV. Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the first sensor's autocalibrated beacon positions here when
    /// the replay ends.
    #[arg(long)]
    save_calibration: Option<PathBuf>,

    /// Also log the first sensor's beacon debug values.
    #[arg(long)]
    stream_debug: bool,
}

#[derive(Debug, Serialize)]
struct PoseRow {
    sensor: usize,
    timestamp_ns: u64,
    tx: f64,
    ty: f64,
    tz: f64,
    qw: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    correspondences: usize,
    rms_error_px: f64,
}

impl From<&PoseReport> for PoseRow {
    fn from(report: &PoseReport) -> Self {
        let t = report.pose.translation;
        let q = report.pose.rotation;
        Self {
            sensor: report.sensor,
            timestamp_ns: report.timestamp_ns,
            tx: t.x,
            ty: t.y,
            tz: t.z,
            qw: q.w,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            correspondences: report.correspondences,
            rms_error_px: report.rms_error_px,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut device = DeviceDescriptor::from_path(&args.config)?;
    if args.stream_debug {
        device.params.stream_beacon_debug_info = true;
    }

    let log = BlobLog::load(&args.blobs)?;
    info!(frames = log.len(), path = %args.blobs.display(), "loaded blob log");
    let (source, detector) = log.into_replay();

    let mut tracker = VideoTracker::new(device.params.clone(), Box::new(detector));
    for setup in device.sensor_setups()? {
        tracker.add_sensor(setup)?;
    }

    let options = SystemOptions::from_params(&device.params).lossless();
    let system = TrackingSystem::start(tracker, Box::new(source), options)?;

    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut writer = csv::Writer::from_writer(out);

    let mut poses = 0usize;
    for msg in system.reports().iter() {
        match msg {
            TrackerMessage::Pose(report) => {
                writer.serialize(PoseRow::from(&report))?;
                poses += 1;
            }
            TrackerMessage::BeaconDebug(report) => {
                info!(beacons = report.num_beacons(), values = ?report.values, "beacon debug");
            }
        }
    }
    writer.flush()?;

    let tracker = system.wait()?;
    info!(
        frames = tracker.frames_processed(),
        poses,
        "replay finished"
    );

    if let Some(path) = &args.save_calibration {
        match tracker.first_estimator() {
            Some(estimator) => {
                save_beacon_positions(path, &estimator.model().positions())?;
                info!(path = %path.display(), "saved beacon calibration");
            }
            None => warn!("no sensor to save a calibration for"),
        }
    }
    Ok(())
}
