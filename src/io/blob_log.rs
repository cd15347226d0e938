//! Recorded blob detections, replayed in place of a camera.
//!
//! CSV with a header row: `timestamp_ns,x,y,size[,blob_id][,circularity]`,
//! one blob per row. Rows sharing a timestamp form one frame; a frame with
//! no blobs is written as a row with empty `x`, `y` and `size`.

use std::collections::VecDeque;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use image::{GrayImage, RgbImage};
use nalgebra::Vector2;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::tracking::frame::{BlobDetector, Frame, FrameSource, LedMeasurement};

#[derive(Debug, Deserialize)]
struct BlobRecord {
    timestamp_ns: u64,
    x: Option<f64>,
    y: Option<f64>,
    size: Option<f64>,
    #[serde(default)]
    blob_id: Option<u64>,
    #[serde(default)]
    circularity: Option<f64>,
}

/// Blobs of one recorded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedFrame {
    pub timestamp_ns: u64,
    pub blobs: Vec<LedMeasurement>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobLog {
    frames: Vec<LoggedFrame>,
}

impl BlobLog {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("Failed to read blob log {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut frames: Vec<LoggedFrame> = Vec::new();
        for (line, rec) in rdr.deserialize::<BlobRecord>().enumerate() {
            let rec = rec?;
            let starts_frame = frames.last().map_or(true, |f| f.timestamp_ns != rec.timestamp_ns);
            if starts_frame {
                if let Some(prev) = frames.last() {
                    if rec.timestamp_ns < prev.timestamp_ns {
                        bail!("row {}: timestamp {} goes backwards", line + 1, rec.timestamp_ns);
                    }
                }
                frames.push(LoggedFrame {
                    timestamp_ns: rec.timestamp_ns,
                    blobs: Vec::new(),
                });
            }
            let (x, y, size) = match (rec.x, rec.y, rec.size) {
                (Some(x), Some(y), Some(size)) => (x, y, size),
                (None, None, None) => continue,
                _ => bail!("row {}: x, y and size must be given together", line + 1),
            };
            if size <= 0.0 {
                bail!("row {}: blob size {} is not positive", line + 1, size);
            }
            let mut meas = LedMeasurement::from_keypoint(Vector2::new(x, y), size);
            if let Some(id) = rec.blob_id {
                meas = meas.with_blob_id(id);
            }
            if let Some(c) = rec.circularity {
                meas = meas.with_circularity(c);
            }
            if let Some(frame) = frames.last_mut() {
                frame.blobs.push(meas);
            }
        }
        debug!(frames = frames.len(), "loaded blob log");
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[LoggedFrame] {
        &self.frames
    }

    /// A frame source and a detector that replay this log in lockstep: the
    /// detector returns the blobs of the frame the source handed out last.
    pub fn into_replay(self) -> (LogFrameSource, LogBlobDetector) {
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let source = LogFrameSource {
            frames: self.frames.into_iter(),
            pending: Arc::clone(&pending),
            finished: false,
        };
        (source, LogBlobDetector { pending })
    }
}

/// Hands out one blank frame per logged timestamp.
pub struct LogFrameSource {
    frames: std::vec::IntoIter<LoggedFrame>,
    pending: Arc<Mutex<VecDeque<Vec<LedMeasurement>>>>,
    finished: bool,
}

impl FrameSource for LogFrameSource {
    fn ok(&self) -> bool {
        true
    }

    fn grab(&mut self) -> Option<Frame> {
        match self.frames.next() {
            Some(frame) => {
                self.pending.lock().push_back(frame.blobs);
                Some(Frame::blank(frame.timestamp_ns))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Returns logged blobs in the order their frames were grabbed.
pub struct LogBlobDetector {
    pending: Arc<Mutex<VecDeque<Vec<LedMeasurement>>>>,
}

impl BlobDetector for LogBlobDetector {
    fn detect(&mut self, _color: &RgbImage, _gray: &GrayImage) -> Vec<LedMeasurement> {
        self.pending.lock().pop_front().unwrap_or_default()
    }
}
