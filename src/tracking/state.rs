//! Identity and per-frame state of LED tracks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Global beacon index, unique across all sensors of one tracker.
///
/// Identifiers produce indices local to their own beacon table; the tracker
/// offsets them into the global range owned by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BeaconId(pub usize);

impl BeaconId {
    #[inline]
    pub fn offset(self, by: usize) -> BeaconId {
        BeaconId(self.0 + by)
    }
}

impl fmt::Display for BeaconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an LED track is believed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedIdentity {
    /// Positively identified beacon.
    Beacon(BeaconId),
    /// No identifier attached, or not enough history yet.
    Unresolved,
    /// The brightness extrema are too close to tell bright from dim.
    InsufficientContrast,
    /// Enough history, but no known blink pattern matches.
    NotRecognized,
}

impl LedIdentity {
    #[inline]
    pub fn is_beacon(&self) -> bool {
        matches!(self, LedIdentity::Beacon(_))
    }

    pub fn beacon(&self) -> Option<BeaconId> {
        match self {
            LedIdentity::Beacon(id) => Some(*id),
            _ => None,
        }
    }

    /// Integer view: beacon index, or -1 / -2 / -3 for the three sentinels.
    pub fn raw(&self) -> i64 {
        match self {
            LedIdentity::Beacon(id) => id.0 as i64,
            LedIdentity::Unresolved => -1,
            LedIdentity::InsufficientContrast => -2,
            LedIdentity::NotRecognized => -3,
        }
    }

    /// Display id: sentinels unchanged, beacons one-based.
    pub fn one_based(&self) -> i64 {
        match self {
            LedIdentity::Beacon(id) => id.0 as i64 + 1,
            other => other.raw(),
        }
    }

    /// How much a sentinel says about the history. Used to pick the most
    /// informative answer when several identifiers disagree.
    pub(crate) fn specificity(&self) -> u8 {
        match self {
            LedIdentity::Unresolved => 0,
            LedIdentity::InsufficientContrast => 1,
            LedIdentity::NotRecognized => 2,
            LedIdentity::Beacon(_) => 3,
        }
    }
}

impl Default for LedIdentity {
    fn default() -> Self {
        Self::Unresolved
    }
}

/// Per-frame state of one LED track.
///
/// Reset to `Unmatched` at the start of every frame. A track that receives
/// a measurement moves to `Identified` or `Unidentified` once its identity
/// is re-resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackStatus {
    /// No measurement associated this frame.
    #[default]
    Unmatched,
    /// Matched and resolved to a beacon.
    Identified,
    /// Matched but resolved to a sentinel.
    Unidentified,
}

impl TrackStatus {
    /// Status of a track that was matched and resolved to `identity`.
    pub fn resolved(identity: LedIdentity) -> Self {
        if identity.is_beacon() {
            Self::Identified
        } else {
            Self::Unidentified
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_and_one_based_ids() {
        assert_eq!(LedIdentity::Beacon(BeaconId(0)).raw(), 0);
        assert_eq!(LedIdentity::Beacon(BeaconId(0)).one_based(), 1);
        assert_eq!(LedIdentity::Unresolved.raw(), -1);
        assert_eq!(LedIdentity::InsufficientContrast.one_based(), -2);
        assert_eq!(LedIdentity::NotRecognized.one_based(), -3);
    }

    #[test]
    fn test_specificity_order() {
        let not_recognized = LedIdentity::NotRecognized.specificity();
        let low_contrast = LedIdentity::InsufficientContrast.specificity();
        assert!(not_recognized > low_contrast);
        assert!(low_contrast > LedIdentity::Unresolved.specificity());
    }
}
