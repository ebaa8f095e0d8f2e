use custody_types::{AssetId, CustodyError, CustodyResult, BASIS_POINTS_TOTAL};
use serde::{Deserialize, Serialize};

/// Target allocation for one asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub asset: AssetId,
    /// Share of total portfolio value, in basis points.
    pub target_bps: u32,
    /// Relative drift from target, in basis points, tolerated before acting.
    pub rebalance_threshold_bps: u32,
    pub is_active: bool,
}

impl AssetConfig {
    pub fn new(asset: impl Into<AssetId>, target_bps: u32, rebalance_threshold_bps: u32) -> Self {
        Self {
            asset: asset.into(),
            target_bps,
            rebalance_threshold_bps,
            is_active: true,
        }
    }

    pub fn validate(&self) -> CustodyResult<()> {
        if self.asset.is_empty() {
            return Err(CustodyError::InvalidAssetConfig("asset is empty".into()));
        }
        if self.target_bps > BASIS_POINTS_TOTAL {
            return Err(CustodyError::InvalidAssetConfig(format!(
                "{}: target {} bps exceeds {BASIS_POINTS_TOTAL}",
                self.asset, self.target_bps
            )));
        }
        if self.rebalance_threshold_bps == 0 || self.rebalance_threshold_bps > BASIS_POINTS_TOTAL {
            return Err(CustodyError::InvalidAssetConfig(format!(
                "{}: threshold must be within 1..={BASIS_POINTS_TOTAL} bps, got {}",
                self.asset, self.rebalance_threshold_bps
            )));
        }
        Ok(())
    }
}
