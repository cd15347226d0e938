//! State shared between the capture thread, the tracker thread and pollers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::tracking::PoseReport;

pub struct SharedState {
    /// Latest pose per sensor, `None` until the first solve.
    latest_poses: RwLock<Vec<Option<PoseReport>>>,

    /// Frames the capture thread discarded because the tracker was busy.
    frames_dropped: AtomicU64,

    /// Ask both threads to finish.
    shutdown_requested: AtomicBool,
}

impl SharedState {
    pub fn new(num_sensors: usize) -> Arc<Self> {
        Arc::new(Self {
            latest_poses: RwLock::new(vec![None; num_sensors]),
            frames_dropped: AtomicU64::new(0),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn latest_pose(&self, sensor: usize) -> Option<PoseReport> {
        self.latest_poses.read().get(sensor).copied().flatten()
    }

    pub fn publish_pose(&self, report: &PoseReport) {
        if let Some(slot) = self.latest_poses.write().get_mut(report.sensor) {
            *slot = Some(*report);
        }
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn record_dropped_frame(&self) -> u64 {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}
