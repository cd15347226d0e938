//! LED tracks: one physical blob followed across frames.

use nalgebra::Vector2;
use tracing::debug;

use crate::tracking::frame::LedMeasurement;
use crate::tracking::identifier::{BrightnessHistory, IdentifierArena, IdentifierHandle};
use crate::tracking::state::{BeaconId, LedIdentity, TrackStatus};

/// Novelty of a freshly (re)identified track. Decays by one per frame.
pub const MAX_NOVELTY: u8 = 4;

/// State of a blob over time, used to identify it by its blink code.
#[derive(Debug, Clone)]
pub struct Led {
    measurement: LedMeasurement,
    history: BrightnessHistory,
    identity: LedIdentity,
    identifier: Option<IdentifierHandle>,
    bright: bool,
    novelty: u8,
    status: TrackStatus,
    used_last_frame: bool,
    frames_unmatched: usize,
}

impl Led {
    /// Start a track from its first measurement.
    pub fn new(meas: LedMeasurement, identifiers: &IdentifierArena) -> Self {
        let mut history = BrightnessHistory::with_capacity(identifiers.history_len());
        history.push(meas.brightness);
        let resolution = identifiers.resolve(&history, None);
        let status = TrackStatus::resolved(resolution.identity);
        Self {
            measurement: meas,
            history,
            identity: resolution.identity,
            identifier: resolution.handle,
            bright: resolution.bright,
            novelty: MAX_NOVELTY,
            status,
            used_last_frame: false,
            frames_unmatched: 0,
        }
    }

    /// Add the measurement for the frame following the previous one and
    /// re-resolve the identity.
    ///
    /// With `blobs_keep_id`, a detector blob id carried over from the previous
    /// measurement keeps an existing beacon identity when the new history
    /// only resolves to a sentinel.
    pub fn add_measurement(
        &mut self,
        meas: LedMeasurement,
        blobs_keep_id: bool,
        identifiers: &IdentifierArena,
    ) {
        let same_blob = blobs_keep_id && self.measurement.same_blob_as(&meas);
        self.history.push(meas.brightness);
        self.measurement = meas;
        self.frames_unmatched = 0;

        let resolution = identifiers.resolve(&self.history, self.identifier);
        let previous = self.identity;
        let identity = if same_blob && previous.is_beacon() && !resolution.identity.is_beacon() {
            previous
        } else {
            resolution.identity
        };

        match identity.beacon() {
            Some(id) if previous.beacon() != Some(id) => {
                debug!(beacon = id.0, previous = previous.raw(), "LED identified");
                self.novelty = MAX_NOVELTY;
            }
            _ => self.novelty = self.novelty.saturating_sub(1),
        }

        if resolution.handle.is_some() {
            self.identifier = resolution.handle;
        }
        self.bright = if identity == resolution.identity {
            resolution.bright
        } else {
            self.identifier
                .and_then(|h| identifiers.get(h))
                .map_or(false, |id| id.is_bright(&self.history))
        };
        self.identity = identity;
        self.status = TrackStatus::resolved(identity);
    }

    pub fn measurement(&self) -> &LedMeasurement {
        &self.measurement
    }

    pub fn location(&self) -> Vector2<f64> {
        self.measurement.loc
    }

    pub fn identity(&self) -> LedIdentity {
        self.identity
    }

    /// Beacon index, or the negative sentinel value.
    pub fn id(&self) -> i64 {
        self.identity.raw()
    }

    pub fn one_based_id(&self) -> i64 {
        self.identity.one_based()
    }

    pub fn identified(&self) -> bool {
        self.identity.is_beacon()
    }

    pub fn beacon(&self) -> Option<BeaconId> {
        self.identity.beacon()
    }

    /// How recently the current identity was acquired: `MAX_NOVELTY` on the
    /// frame it changed, down to 0.
    pub fn novelty(&self) -> u8 {
        self.novelty
    }

    /// Latest bright/dim state. Only meaningful when identified.
    pub fn is_bright(&self) -> bool {
        self.bright
    }

    pub fn status(&self) -> TrackStatus {
        self.status
    }

    pub fn identifier(&self) -> Option<IdentifierHandle> {
        self.identifier
    }

    pub fn history(&self) -> &BrightnessHistory {
        &self.history
    }

    pub fn was_used_last_frame(&self) -> bool {
        self.used_last_frame
    }

    pub fn mark_used(&mut self) {
        self.used_last_frame = true;
    }

    pub fn reset_used(&mut self) {
        self.used_last_frame = false;
    }

    /// Refute the identification from model-based knowledge. The history is
    /// discarded so identification starts over.
    pub fn mark_misidentified(&mut self) {
        debug!(id = self.identity.raw(), "LED marked misidentified");
        self.identity = LedIdentity::NotRecognized;
        self.history.clear();
        self.bright = false;
        if self.status == TrackStatus::Identified {
            self.status = TrackStatus::Unidentified;
        }
    }

    /// Index of the candidate nearest to this track within `threshold`
    /// pixels. Ties go to the earliest candidate.
    pub fn nearest(&self, candidates: &[LedMeasurement], threshold: f64) -> Option<usize> {
        let loc = self.location();
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            let d = candidate.distance_to(&loc);
            if d <= threshold && best.map_or(true, |(_, bd)| d < bd) {
                best = Some((idx, d));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Per-frame reset before association.
    pub fn begin_frame(&mut self) {
        self.status = TrackStatus::Unmatched;
        self.used_last_frame = false;
    }

    /// Record a frame without a matching measurement.
    pub fn mark_unmatched(&mut self) {
        self.status = TrackStatus::Unmatched;
        self.frames_unmatched += 1;
    }

    /// Consecutive frames without a matching measurement.
    pub fn frames_unmatched(&self) -> usize {
        self.frames_unmatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::identifier::PatternIdentifier;

    const PATTERNS: [&str; 2] = ["**..", "*..."];

    fn arena() -> IdentifierArena {
        let mut arena = IdentifierArena::new();
        arena.insert(Box::new(PatternIdentifier::new(&PATTERNS).unwrap()), 0);
        arena
    }

    fn meas(x: f64, bright: bool) -> LedMeasurement {
        LedMeasurement::from_keypoint(Vector2::new(x, 10.0), if bright { 6.0 } else { 2.0 })
    }

    fn feed(led: &mut Led, arena: &IdentifierArena, pattern: &str, keep: bool) {
        for c in pattern.chars() {
            led.add_measurement(meas(5.0, c == '*'), keep, arena);
        }
    }

    #[test]
    fn test_new_track_is_unresolved_and_novel() {
        let arena = arena();
        let led = Led::new(meas(5.0, true), &arena);
        assert_eq!(led.identity(), LedIdentity::Unresolved);
        assert_eq!(led.id(), -1);
        assert_eq!(led.novelty(), MAX_NOVELTY);
        assert!(!led.identified());
        assert_eq!(led.status(), TrackStatus::Unidentified);
        assert_eq!(led.history().capacity(), 4);
    }

    #[test]
    fn test_identifies_after_code_length() {
        let arena = arena();
        let mut led = Led::new(meas(5.0, true), &arena);
        // "*" + "*.." completes "**..".
        feed(&mut led, &arena, "*..", false);
        assert_eq!(led.beacon(), Some(BeaconId(0)));
        assert_eq!(led.one_based_id(), 1);
        assert_eq!(led.status(), TrackStatus::Identified);
        assert_eq!(led.novelty(), MAX_NOVELTY);
        assert!(!led.is_bright());
    }

    #[test]
    fn test_novelty_decays_and_resets_on_new_id() {
        let arena = arena();
        let mut led = Led::new(meas(5.0, true), &arena);
        feed(&mut led, &arena, "*..", false);

        let mut last = led.novelty();
        for _ in 0..3 {
            feed(&mut led, &arena, "**..", false);
            assert!(led.novelty() <= last);
            last = led.novelty();
        }
        assert_eq!(led.novelty(), 0);
        assert_eq!(led.beacon(), Some(BeaconId(0)));

        // "**.." then "*." leaves "..*." in the window: a rotation of "*...".
        feed(&mut led, &arena, "*.", false);
        assert_eq!(led.beacon(), Some(BeaconId(1)));
        assert_eq!(led.novelty(), MAX_NOVELTY);
        feed(&mut led, &arena, ".", false);
        assert_eq!(led.novelty(), MAX_NOVELTY - 1);
    }

    #[test]
    fn test_blob_id_keeps_identity_through_sentinel() {
        let mut arena = IdentifierArena::new();
        arena.insert(Box::new(PatternIdentifier::new(&["**.."]).unwrap()), 0);
        let mut led = Led::new(meas(5.0, true).with_blob_id(3), &arena);
        for c in "*..".chars() {
            led.add_measurement(meas(5.0, c == '*').with_blob_id(3), true, &arena);
        }
        assert_eq!(led.beacon(), Some(BeaconId(0)));

        // "*..." is not a known code, then flat brightness lacks contrast.
        for _ in 0..4 {
            led.add_measurement(meas(5.0, false).with_blob_id(3), true, &arena);
        }
        assert_eq!(led.beacon(), Some(BeaconId(0)));

        // A new blob id breaks the continuity.
        led.add_measurement(meas(5.0, false).with_blob_id(4), true, &arena);
        assert!(!led.identified());
    }

    #[test]
    fn test_mark_misidentified_restarts_identification() {
        let arena = arena();
        let mut led = Led::new(meas(5.0, true), &arena);
        feed(&mut led, &arena, "*..", false);
        assert!(led.identified());

        led.mark_misidentified();
        assert_eq!(led.identity(), LedIdentity::NotRecognized);
        assert_eq!(led.id(), -3);
        assert!(led.history().is_empty());

        feed(&mut led, &arena, "**.", false);
        assert_eq!(led.identity(), LedIdentity::Unresolved);
        feed(&mut led, &arena, ".", false);
        assert_eq!(led.beacon(), Some(BeaconId(0)));
    }

    #[test]
    fn test_nearest_threshold_and_ties() {
        let arena = arena();
        let led = Led::new(meas(5.0, true), &arena);
        let candidates = vec![meas(8.0, true), meas(2.0, true), meas(5.5, true)];
        assert_eq!(led.nearest(&candidates, 10.0), Some(2));
        assert_eq!(led.nearest(&candidates, 0.4), None);
        // Exactly at the threshold still matches.
        assert_eq!(led.nearest(&candidates, 0.5), Some(2));
        // Equidistant candidates: the earliest wins.
        assert_eq!(led.nearest(&candidates[..2], 3.0), Some(0));
        assert_eq!(led.nearest(&[], 100.0), None);
    }

    #[test]
    fn test_frame_bookkeeping() {
        let arena = arena();
        let mut led = Led::new(meas(5.0, true), &arena);
        led.mark_used();
        assert!(led.was_used_last_frame());
        led.begin_frame();
        assert!(!led.was_used_last_frame());
        assert_eq!(led.status(), TrackStatus::Unmatched);
        led.mark_unmatched();
        led.mark_unmatched();
        assert_eq!(led.frames_unmatched(), 2);
        led.add_measurement(meas(5.0, false), false, &arena);
        assert_eq!(led.frames_unmatched(), 0);
        assert_eq!(led.status(), TrackStatus::Unidentified);
    }
}
