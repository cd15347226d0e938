//! Blink-code identification of LED tracks.
//!
//! An identifier maps a brightness history (newest sample first) to a beacon
//! index local to its own table, or to one of the sentinel identities.
//! Identifiers are pure functions of the history.
//!
//! Identifiers are owned by the tracker in an [`IdentifierArena`]; tracks
//! only hold an [`IdentifierHandle`] to the one that resolved them.

mod pattern;
mod unified;

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

pub use pattern::PatternIdentifier;
pub use unified::UnifiedIdentifier;

use crate::tracking::state::LedIdentity;

/// Bounded brightness history, newest sample first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrightnessHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl BrightnessHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Build from samples given newest first. Used by tests and replay.
    pub fn from_newest_first(samples: &[f64]) -> Self {
        let mut history = Self::with_capacity(samples.len());
        for &s in samples.iter().rev() {
            history.push(s);
        }
        history
    }

    /// Add the newest sample, dropping the oldest beyond capacity.
    pub fn push(&mut self, brightness: f64) {
        self.samples.push_front(brightness);
        self.samples.truncate(self.capacity);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn newest(&self) -> Option<f64> {
        self.samples.front().copied()
    }

    /// Samples, newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = f64> + ExactSizeIterator + '_ {
        self.samples.iter().copied()
    }

    /// (min, max) over the newest `n` samples.
    pub fn extrema(&self, n: usize) -> Option<(f64, f64)> {
        self.samples.iter().take(n).fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Capability: resolve a brightness history to a beacon identity.
pub trait LedIdentifier: fmt::Debug + Send + Sync {
    /// Number of samples needed before a beacon can be resolved.
    fn code_length(&self) -> usize;

    /// Number of beacons this identifier can report (indices `0..count`).
    fn beacon_count(&self) -> usize;

    /// Resolve a history to a local beacon index or a sentinel.
    fn resolve(&self, history: &BrightnessHistory) -> LedIdentity;

    /// Whether the newest sample is in the bright state. Only meaningful when
    /// the history resolves to a beacon.
    fn is_bright(&self, history: &BrightnessHistory) -> bool {
        match (history.newest(), history.extrema(self.code_length())) {
            (Some(newest), Some((lo, hi))) => newest > (lo + hi) / 2.0,
            _ => false,
        }
    }
}

/// Non-owning reference from a track to an identifier in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentifierHandle(usize);

impl IdentifierHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Outcome of resolving one history against the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    /// Identity in the global beacon index space.
    pub identity: LedIdentity,
    /// The identifier that produced the identity.
    pub handle: Option<IdentifierHandle>,
    pub bright: bool,
}

#[derive(Debug)]
struct ArenaEntry {
    identifier: Box<dyn LedIdentifier>,
    first_beacon: usize,
}

/// Identifiers allocated once per sensor, outliving every track.
#[derive(Debug, Default)]
pub struct IdentifierArena {
    entries: Vec<ArenaEntry>,
}

impl IdentifierArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identifier whose local index 0 maps to global beacon
    /// `first_beacon`.
    pub fn insert(
        &mut self,
        identifier: Box<dyn LedIdentifier>,
        first_beacon: usize,
    ) -> IdentifierHandle {
        self.entries.push(ArenaEntry {
            identifier,
            first_beacon,
        });
        IdentifierHandle(self.entries.len() - 1)
    }

    pub fn get(&self, handle: IdentifierHandle) -> Option<&dyn LedIdentifier> {
        self.entries.get(handle.0).map(|e| e.identifier.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// History length tracks must keep: the longest code length.
    pub fn history_len(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.identifier.code_length())
            .max()
            .unwrap_or(1)
            .max(1)
    }

    /// Resolve a history, trying `preferred` first and then every other
    /// identifier in registration order. The first beacon wins; otherwise the
    /// most specific sentinel is returned.
    pub fn resolve(
        &self,
        history: &BrightnessHistory,
        preferred: Option<IdentifierHandle>,
    ) -> Resolution {
        let preferred = preferred.filter(|h| h.0 < self.entries.len());
        let order = preferred
            .into_iter()
            .chain((0..self.entries.len()).map(IdentifierHandle).filter(|h| Some(*h) != preferred));

        let mut best = Resolution {
            identity: LedIdentity::Unresolved,
            handle: preferred.or_else(|| (!self.entries.is_empty()).then_some(IdentifierHandle(0))),
            bright: false,
        };

        for handle in order {
            let entry = &self.entries[handle.0];
            match entry.identifier.resolve(history) {
                LedIdentity::Beacon(local) if local.0 < entry.identifier.beacon_count() => {
                    return Resolution {
                        identity: LedIdentity::Beacon(local.offset(entry.first_beacon)),
                        handle: Some(handle),
                        bright: entry.identifier.is_bright(history),
                    };
                }
                LedIdentity::Beacon(local) => {
                    debug!(
                        identifier = handle.0,
                        index = local.0,
                        "identifier reported an index beyond its beacon count"
                    );
                    if LedIdentity::NotRecognized.specificity() > best.identity.specificity() {
                        best.identity = LedIdentity::NotRecognized;
                        best.handle = Some(handle);
                    }
                }
                sentinel => {
                    if sentinel.specificity() > best.identity.specificity() {
                        best.identity = sentinel;
                        best.handle = Some(handle);
                    }
                }
            }
        }
        best
    }
}
