//! Threaded tracking system.
//!
//! `TrackingSystem` runs a capture thread and a tracker thread around a
//! configured `VideoTracker`, along with the shared state and the message
//! types passed between them.

pub mod messages;
pub mod shared_state;
mod tracking_system;

pub use messages::{CaptureMessage, TrackerMessage};
pub use shared_state::SharedState;
pub use tracking_system::{SystemOptions, TrackingSystem};
