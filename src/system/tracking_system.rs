//! Tracking System - capture and tracker threads around a `VideoTracker`.
//!
//! The capture thread polls a `FrameSource` and hands frames to the tracker
//! thread through a single-slot channel. When the tracker is still busy with
//! the previous frame, a new frame is dropped unless the system runs
//! lossless. The tracker thread owns the `VideoTracker`, publishes poses to
//! the shared state and sends every report on an unbounded channel.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::tracking::frame::FrameSource;
use crate::tracking::{PoseReport, TrackerParams, VideoTracker};

use super::messages::{CaptureMessage, TrackerMessage};
use super::shared_state::SharedState;

/// Pause before polling again a source that is unavailable or had no frame.
const UNAVAILABLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemOptions {
    /// Block the capture thread instead of dropping frames. Required when
    /// replaying a recording whose detector must see every frame.
    pub lossless: bool,
    /// Send the first sensor's beacon debug values after each of its poses.
    pub stream_beacon_debug_info: bool,
}

impl SystemOptions {
    pub fn from_params(params: &TrackerParams) -> Self {
        Self {
            lossless: false,
            stream_beacon_debug_info: params.stream_beacon_debug_info,
        }
    }

    pub fn lossless(mut self) -> Self {
        self.lossless = true;
        self
    }
}

pub struct TrackingSystem {
    shared: Arc<SharedState>,
    reports: Receiver<TrackerMessage>,
    capture_handle: Option<JoinHandle<()>>,
    tracker_handle: Option<JoinHandle<Result<VideoTracker>>>,
}

impl TrackingSystem {
    /// Spawn both threads. The tracker must have its sensors registered.
    pub fn start(
        tracker: VideoTracker,
        source: Box<dyn FrameSource>,
        options: SystemOptions,
    ) -> Result<Self> {
        if tracker.num_sensors() == 0 {
            bail!("cannot start tracking without registered sensors");
        }
        let shared = SharedState::new(tracker.num_sensors());
        let (frame_tx, frame_rx) = bounded::<CaptureMessage>(1);
        let (report_tx, reports) = unbounded::<TrackerMessage>();

        let capture_handle =
            Self::spawn_capture(Arc::clone(&shared), source, frame_tx, options.lossless);
        let tracker_handle =
            Self::spawn_tracker(Arc::clone(&shared), tracker, frame_rx, report_tx, options);
        info!(lossless = options.lossless, "tracking system started");

        Ok(Self {
            shared,
            reports,
            capture_handle: Some(capture_handle),
            tracker_handle: Some(tracker_handle),
        })
    }

    fn spawn_capture(
        shared: Arc<SharedState>,
        mut source: Box<dyn FrameSource>,
        frame_tx: Sender<CaptureMessage>,
        lossless: bool,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            while !shared.is_shutdown_requested() {
                if !source.ok() {
                    thread::sleep(UNAVAILABLE_POLL_INTERVAL);
                    continue;
                }
                let msg = match source.grab() {
                    Some(frame) => CaptureMessage::Frame(frame),
                    None if source.is_finished() => break,
                    None => {
                        thread::sleep(UNAVAILABLE_POLL_INTERVAL);
                        CaptureMessage::NoFrame
                    }
                };
                if lossless {
                    if frame_tx.send(msg).is_err() {
                        break;
                    }
                    continue;
                }
                match frame_tx.try_send(msg) {
                    Ok(()) => {}
                    Err(TrySendError::Full(CaptureMessage::Frame(_))) => {
                        let dropped = shared.record_dropped_frame();
                        debug!(dropped, "tracker busy, dropped frame");
                    }
                    Err(TrySendError::Full(CaptureMessage::NoFrame)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            debug!("capture thread finished");
        })
    }

    fn spawn_tracker(
        shared: Arc<SharedState>,
        mut tracker: VideoTracker,
        frame_rx: Receiver<CaptureMessage>,
        report_tx: Sender<TrackerMessage>,
        options: SystemOptions,
    ) -> JoinHandle<Result<VideoTracker>> {
        thread::spawn(move || {
            for msg in frame_rx.iter() {
                if shared.is_shutdown_requested() {
                    break;
                }
                let frame = match msg {
                    CaptureMessage::Frame(frame) => frame,
                    CaptureMessage::NoFrame => {
                        tracker.process_no_frame();
                        continue;
                    }
                };
                let publish = |_: usize, report: &PoseReport| {
                    shared.publish_pose(report);
                    // A closed receiver only means nobody listens any more.
                    let _ = report_tx.send(TrackerMessage::Pose(*report));
                };
                let result =
                    tracker.process_image(&frame.color, &frame.gray, frame.timestamp_ns, publish)?;

                if options.stream_beacon_debug_info && result.pose_for(0).is_some() {
                    if let Some(report) = tracker.beacon_debug_report(emission_time_ns()) {
                        let _ = report_tx.send(TrackerMessage::BeaconDebug(report));
                    }
                }
            }
            info!(
                frames = tracker.frames_processed(),
                skipped = tracker.frames_skipped(),
                dropped = shared.frames_dropped(),
                "tracker thread finished"
            );
            Ok(tracker)
        })
    }

    /// Report channel. Disconnects once the tracker thread has finished.
    pub fn reports(&self) -> Receiver<TrackerMessage> {
        self.reports.clone()
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn latest_pose(&self, sensor: usize) -> Option<PoseReport> {
        self.shared.latest_pose(sensor)
    }

    /// Ask both threads to stop after their current frame.
    pub fn shutdown(&self) {
        self.shared.request_shutdown();
    }

    /// Wait for both threads and hand the tracker back. Returns when the
    /// source is exhausted or after `shutdown`.
    pub fn wait(mut self) -> Result<VideoTracker> {
        if let Some(handle) = self.capture_handle.take() {
            handle.join().map_err(|_| anyhow!("capture thread panicked"))?;
        }
        let handle = self
            .tracker_handle
            .take()
            .ok_or_else(|| anyhow!("tracker thread already joined"))?;
        handle.join().map_err(|_| anyhow!("tracker thread panicked"))?
    }
}

impl Drop for TrackingSystem {
    fn drop(&mut self) {
        self.shared.request_shutdown();
        if let Some(handle) = self.capture_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.tracker_handle.take() {
            match handle.join() {
                Ok(Err(e)) => warn!("tracker thread failed: {:#}", e),
                Err(_) => warn!("tracker thread panicked"),
                Ok(Ok(_)) => {}
            }
        }
    }
}

fn emission_time_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
