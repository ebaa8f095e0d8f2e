//! Valuation input boundary.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use custody_types::{AssetId, CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};

/// Current holding value of one asset, in the common unit of account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub value: u64,
    pub as_of: DateTime<Utc>,
}

/// Source of current holding values. Implementations wrap price oracles.
pub trait ValuationFeed: Send + Sync {
    fn asset_value(&self, asset: &AssetId) -> CustodyResult<Valuation>;
}

/// Feed backed by values pushed in by the caller.
#[derive(Debug, Default)]
pub struct StaticValuationFeed {
    values: RwLock<BTreeMap<AssetId, Valuation>>,
}

impl StaticValuationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, asset: impl Into<AssetId>, value: u64, as_of: DateTime<Utc>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(asset.into(), Valuation { value, as_of });
        }
    }

    pub fn remove(&self, asset: &AssetId) {
        if let Ok(mut values) = self.values.write() {
            values.remove(asset);
        }
    }
}

impl ValuationFeed for StaticValuationFeed {
    fn asset_value(&self, asset: &AssetId) -> CustodyResult<Valuation> {
        let values = self
            .values
            .read()
            .map_err(|_| CustodyError::Storage("valuation feed lock poisoned".into()))?;
        values
            .get(asset)
            .copied()
            .ok_or_else(|| CustodyError::ValuationUnavailable {
                asset: asset.clone(),
                reason: "no valuation published".into(),
            })
    }
}
