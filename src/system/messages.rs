//! Inter-thread message types.

use crate::tracking::frame::Frame;
use crate::tracking::{BeaconDebugReport, PoseReport};

/// Sent from the capture thread to the tracker thread.
pub enum CaptureMessage {
    Frame(Frame),
    /// The source is present but delivered nothing this cycle.
    NoFrame,
}

/// Reports published by the tracker thread, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerMessage {
    Pose(PoseReport),
    /// Per-beacon debug values of the first sensor. Only sent when that
    /// sensor was solved in the same frame.
    BeaconDebug(BeaconDebugReport),
}
