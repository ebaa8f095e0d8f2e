//! Value-scaled signature requirements.
//!
//! Tiers are evaluated from the highest `min_value` down; the first tier whose
//! `min_value` does not exceed the operation value decides. Values below every
//! tier fall back to the owner set's default `required`.

use std::collections::BTreeSet;

use custody_types::{CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};

use crate::owners::{OwnerSet, MAX_OWNERS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTier {
    pub min_value: u64,
    pub required_signatures: usize,
}

impl ThresholdTier {
    pub fn new(min_value: u64, required_signatures: usize) -> Self {
        Self {
            min_value,
            required_signatures,
        }
    }
}

/// Tier table, kept sorted by descending `min_value`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTiers {
    tiers: Vec<ThresholdTier>,
}

impl ThresholdTiers {
    pub fn new(tiers: impl IntoIterator<Item = ThresholdTier>) -> CustodyResult<Self> {
        let mut tiers: Vec<ThresholdTier> = tiers.into_iter().collect();
        let mut seen = BTreeSet::new();
        for tier in &tiers {
            if tier.required_signatures == 0 || tier.required_signatures > MAX_OWNERS {
                return Err(CustodyError::InvalidOwnerChange(format!(
                    "tier at {} requires {} signatures, outside 1..={MAX_OWNERS}",
                    tier.min_value, tier.required_signatures
                )));
            }
            if !seen.insert(tier.min_value) {
                return Err(CustodyError::InvalidOwnerChange(format!(
                    "duplicate tier at min_value {}",
                    tier.min_value
                )));
            }
        }
        tiers.sort_by(|a, b| b.min_value.cmp(&a.min_value));
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[ThresholdTier] {
        &self.tiers
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Matching tier for `value`, if any.
    pub fn lookup(&self, value: u64) -> Option<&ThresholdTier> {
        self.tiers.iter().find(|tier| tier.min_value <= value)
    }

    /// Signatures needed to execute an operation of `value`.
    ///
    /// Capped at the current owner count, the same way owner removal lowers `required`.
    pub fn required_signatures(&self, value: u64, owners: &OwnerSet) -> usize {
        let required = self
            .lookup(value)
            .map(|tier| tier.required_signatures)
            .unwrap_or_else(|| owners.required());
        required.min(owners.len())
    }
}
