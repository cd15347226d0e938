//! Several beacon tables merged into one index space.
//!
//! Used when front and rear panel beacons are solved as a single rigid
//! sensor: part `k` reports indices offset by the beacon counts of parts
//! `0..k`.

use anyhow::{bail, Result};

use super::{BrightnessHistory, LedIdentifier};
use crate::tracking::state::LedIdentity;

#[derive(Debug)]
pub struct UnifiedIdentifier {
    parts: Vec<Box<dyn LedIdentifier>>,
}

impl UnifiedIdentifier {
    pub fn new(parts: Vec<Box<dyn LedIdentifier>>) -> Result<Self> {
        if parts.is_empty() {
            bail!("unified identifier needs at least one part");
        }
        Ok(Self { parts })
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }
}

impl LedIdentifier for UnifiedIdentifier {
    fn code_length(&self) -> usize {
        self.parts.iter().map(|p| p.code_length()).max().unwrap_or(1)
    }

    fn beacon_count(&self) -> usize {
        self.parts.iter().map(|p| p.beacon_count()).sum()
    }

    fn resolve(&self, history: &BrightnessHistory) -> LedIdentity {
        let mut offset = 0;
        let mut best = LedIdentity::Unresolved;
        for part in &self.parts {
            match part.resolve(history) {
                LedIdentity::Beacon(local) if local.0 < part.beacon_count() => {
                    return LedIdentity::Beacon(local.offset(offset));
                }
                LedIdentity::Beacon(_) => best = LedIdentity::NotRecognized,
                sentinel if sentinel.specificity() > best.specificity() => best = sentinel,
                _ => {}
            }
            offset += part.beacon_count();
        }
        best
    }

    fn is_bright(&self, history: &BrightnessHistory) -> bool {
        self.parts
            .iter()
            .find(|p| p.resolve(history).is_beacon())
            .map_or(false, |p| p.is_bright(history))
    }
}
