//! Cyclic blink-pattern matcher.
//!
//! Each beacon repeats a fixed sequence of bright (`*`) and dim (`.`)
//! frames. The newest `code_length` samples are thresholded halfway between
//! their extrema and compared, oldest first, against every rotation of every
//! known pattern: the tracker can start observing a beacon at any phase.

use anyhow::{bail, Result};

use super::{BrightnessHistory, LedIdentifier};
use crate::tracking::state::{BeaconId, LedIdentity};

/// Contrast required of real camera images: `max - min >= 0.3 * max`.
pub const DEFAULT_MIN_CONTRAST: f64 = 0.3;

/// Rendered frames have clean on/off levels; accept weaker modulation.
pub const SIMULATED_MIN_CONTRAST: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct PatternIdentifier {
    /// One entry per beacon; `true` is bright.
    patterns: Vec<Vec<bool>>,
    code_length: usize,
    min_contrast: f64,
}

impl PatternIdentifier {
    /// Build from pattern strings, one per beacon, in beacon index order.
    ///
    /// Fails on an empty table, mixed lengths, characters other than `*` and
    /// `.`, patterns without both states, or two patterns that are rotations
    /// of each other (they could never be told apart).
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        if patterns.is_empty() {
            bail!("blink pattern table is empty");
        }

        let mut parsed: Vec<Vec<bool>> = Vec::with_capacity(patterns.len());
        for (idx, pattern) in patterns.iter().enumerate() {
            let pattern = pattern.as_ref();
            let bits = pattern
                .chars()
                .map(|c| match c {
                    '*' => Ok(true),
                    '.' => Ok(false),
                    other => bail!("blink pattern {} has invalid character {:?}", idx, other),
                })
                .collect::<Result<Vec<bool>>>()?;

            if bits.len() < 2 {
                bail!("blink pattern {} is shorter than two frames", idx);
            }
            if let Some(first) = parsed.first() {
                if first.len() != bits.len() {
                    bail!(
                        "blink pattern {} has length {}, expected {}",
                        idx,
                        bits.len(),
                        first.len()
                    );
                }
            }
            if bits.iter().all(|&b| b) || bits.iter().all(|&b| !b) {
                bail!("blink pattern {} never changes state", idx);
            }
            if let Some(dup) = parsed.iter().position(|p| matches_any_rotation(&bits, p)) {
                bail!("blink patterns {} and {} are rotations of each other", dup, idx);
            }
            parsed.push(bits);
        }

        let code_length = parsed[0].len();
        Ok(Self {
            patterns: parsed,
            code_length,
            min_contrast: DEFAULT_MIN_CONTRAST,
        })
    }

    /// Identifier tuned for synthetic/rendered imagery.
    pub fn simulated<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        Ok(Self::new(patterns)?.with_min_contrast(SIMULATED_MIN_CONTRAST))
    }

    /// Relative contrast (`(max - min) / max`) below which a history is
    /// reported as [`LedIdentity::InsufficientContrast`].
    pub fn with_min_contrast(mut self, min_contrast: f64) -> Self {
        self.min_contrast = min_contrast.max(0.0);
        self
    }

    pub fn min_contrast(&self) -> f64 {
        self.min_contrast
    }
}

/// True if `bits` equals some cyclic rotation of `pattern`.
fn matches_any_rotation(bits: &[bool], pattern: &[bool]) -> bool {
    let n = pattern.len();
    if bits.len() != n {
        return false;
    }
    (0..n).any(|shift| (0..n).all(|i| bits[i] == pattern[(i + shift) % n]))
}

impl LedIdentifier for PatternIdentifier {
    fn code_length(&self) -> usize {
        self.code_length
    }

    fn beacon_count(&self) -> usize {
        self.patterns.len()
    }

    fn resolve(&self, history: &BrightnessHistory) -> LedIdentity {
        if history.len() < self.code_length {
            return LedIdentity::Unresolved;
        }
        let (lo, hi) = match history.extrema(self.code_length) {
            Some(extrema) => extrema,
            None => return LedIdentity::Unresolved,
        };
        if hi <= 0.0 || hi - lo < self.min_contrast * hi || hi == lo {
            return LedIdentity::InsufficientContrast;
        }

        let threshold = (lo + hi) / 2.0;
        let bits: Vec<bool> = history
            .iter()
            .take(self.code_length)
            .rev()
            .map(|v| v > threshold)
            .collect();

        self.patterns
            .iter()
            .position(|p| matches_any_rotation(&bits, p))
            .map_or(LedIdentity::NotRecognized, |idx| LedIdentity::Beacon(BeaconId(idx)))
    }
}
