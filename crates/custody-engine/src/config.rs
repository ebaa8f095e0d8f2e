//! Treasury configuration loaded from TOML.

use std::path::{Path, PathBuf};

use custody_auth::{OwnerSet, ThresholdTier, ThresholdTiers};
use custody_ledger::AllocationConfig;
use custody_rebalancer::AssetConfig;
use custody_types::{AccountId, CustodyError, CustodyResult, OwnerId, Role};
use serde::{Deserialize, Serialize};

/// Where committed state is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Process memory only.
    #[default]
    Memory,
    /// Whole-state JSON file, rewritten after every committed transaction.
    File { path: PathBuf },
}

impl StorageConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnersSection {
    pub members: Vec<OwnerId>,
    pub required: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSection {
    pub operations_bps: u32,
    pub reserves_bps: u32,
    pub upgrades_bps: u32,
    pub profits_bps: u32,
}

impl Default for AllocationSection {
    fn default() -> Self {
        Self {
            operations_bps: 4_000,
            reserves_bps: 2_000,
            upgrades_bps: 2_000,
            profits_bps: 2_000,
        }
    }
}

impl AllocationSection {
    pub fn build(&self) -> CustodyResult<AllocationConfig> {
        AllocationConfig::new(
            self.operations_bps,
            self.reserves_bps,
            self.upgrades_bps,
            self.profits_bps,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockSection {
    /// Spends strictly above this amount are deferred.
    pub threshold: u64,
    pub delay_hours: u64,
}

impl Default for TimelockSection {
    fn default() -> Self {
        Self {
            threshold: 10_000,
            delay_hours: 48,
        }
    }
}

impl TimelockSection {
    pub fn delay_secs(&self) -> CustodyResult<u64> {
        self.delay_hours
            .checked_mul(3_600)
            .ok_or_else(|| CustodyError::Config("timelock delay_hours is too large".into()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceSection {
    pub interval_secs: u64,
    pub max_valuation_age_secs: u64,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

impl Default for RebalanceSection {
    fn default() -> Self {
        Self {
            interval_secs: 86_400,
            max_valuation_age_secs: 3_600,
            assets: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesSection {
    #[serde(default)]
    pub admin: Vec<AccountId>,
    #[serde(default)]
    pub emergency: Vec<AccountId>,
    #[serde(default)]
    pub treasurers: Vec<AccountId>,
    #[serde(default)]
    pub spenders: Vec<AccountId>,
    #[serde(default)]
    pub rebalancers: Vec<AccountId>,
}

impl RolesSection {
    pub fn grants(&self) -> impl Iterator<Item = (Role, &AccountId)> {
        [
            (Role::Admin, &self.admin),
            (Role::Emergency, &self.emergency),
            (Role::Treasurer, &self.treasurers),
            (Role::Spender, &self.spenders),
            (Role::Rebalancer, &self.rebalancers),
        ]
        .into_iter()
        .flat_map(|(role, members)| members.iter().map(move |account| (role, account)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryConfig {
    pub treasury_account: AccountId,
    pub upgrade_authority: AccountId,
    pub owners: OwnersSection,
    #[serde(default)]
    pub tiers: Vec<ThresholdTier>,
    #[serde(default)]
    pub allocation: AllocationSection,
    #[serde(default)]
    pub timelock: TimelockSection,
    #[serde(default)]
    pub rebalance: RebalanceSection,
    #[serde(default)]
    pub roles: RolesSection,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl TreasuryConfig {
    pub fn load(path: impl AsRef<Path>) -> CustodyResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CustodyError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> CustodyResult<Self> {
        let config: TreasuryConfig =
            toml::from_str(contents).map_err(|e| CustodyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CustodyResult<String> {
        toml::to_string_pretty(self).map_err(|e| CustodyError::Config(e.to_string()))
    }

    pub fn validate(&self) -> CustodyResult<()> {
        if self.treasury_account.is_empty() {
            return Err(CustodyError::Config("treasury_account must be set".into()));
        }
        if self.upgrade_authority.is_empty() {
            return Err(CustodyError::Config("upgrade_authority must be set".into()));
        }
        if self.roles.admin.is_empty() {
            return Err(CustodyError::Config("at least one admin is required".into()));
        }
        self.owner_set()?;
        self.threshold_tiers()?;
        self.allocation.build()?;
        self.timelock.delay_secs()?;
        for asset in &self.rebalance.assets {
            asset.validate()?;
        }
        Ok(())
    }

    pub fn owner_set(&self) -> CustodyResult<OwnerSet> {
        OwnerSet::new(self.owners.members.iter().cloned(), self.owners.required)
    }

    pub fn threshold_tiers(&self) -> CustodyResult<ThresholdTiers> {
        ThresholdTiers::new(self.tiers.iter().copied())
    }

    /// A documented starting configuration.
    pub fn sample() -> String {
        SAMPLE_CONFIG.to_string()
    }
}

const SAMPLE_CONFIG: &str = r#"# Account every managed asset is held in.
treasury_account = "treasury"

# Sole account allowed to swap the treasury logic.
upgrade_authority = "upgrade-council"

# Co-signers for multi-party operations. 1 <= required <= members <= 20.
[owners]
members = ["alice", "bob", "carol", "dave", "erin"]
required = 2

# Value-scaled signature requirements, matched by the highest min_value
# not above the operation value. Below every tier, owners.required applies.
[[tiers]]
min_value = 10000
required_signatures = 3

[[tiers]]
min_value = 100000
required_signatures = 4

# Revenue split in basis points; must sum to 10000.
[allocation]
operations_bps = 4000
reserves_bps = 2000
upgrades_bps = 2000
profits_bps = 2000

# Spends strictly above `threshold` wait `delay_hours` before release.
[timelock]
threshold = 10000
delay_hours = 48

[rebalance]
interval_secs = 86400
max_valuation_age_secs = 3600

[[rebalance.assets]]
asset = "ETH"
target_bps = 6000
rebalance_threshold_bps = 500
is_active = true

[[rebalance.assets]]
asset = "USDC"
target_bps = 4000
rebalance_threshold_bps = 500
is_active = true

[roles]
admin = ["admin"]
emergency = ["guardian"]
treasurers = ["payments"]
spenders = ["ops-bot"]
rebalancers = ["rebalance-bot"]

[storage]
backend = "file"
path = "custody-state.json"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_parses_and_validates() {
        let config = TreasuryConfig::from_toml_str(&TreasuryConfig::sample()).unwrap();
        assert_eq!(config.owners.members.len(), 5);
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.timelock.delay_secs().unwrap(), 48 * 3_600);
        assert_eq!(config.rebalance.assets.len(), 2);
        assert_eq!(config.storage.label(), "file");
        assert_eq!(config.roles.grants().count(), 5);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = TreasuryConfig::from_toml_str(
            r#"
            treasury_account = "treasury"
            upgrade_authority = "council"

            [owners]
            members = ["alice"]
            required = 1

            [roles]
            admin = ["admin"]
            "#,
        )
        .unwrap();
        assert_eq!(config.allocation, AllocationSection::default());
        assert_eq!(config.storage, StorageConfig::Memory);
        assert!(config.tiers.is_empty());
    }

    #[test]
    fn rejects_bad_allocation() {
        let mut config = TreasuryConfig::from_toml_str(&TreasuryConfig::sample()).unwrap();
        config.allocation.profits_bps = 1_999;
        assert!(matches!(
            config.validate(),
            Err(CustodyError::AllocationNotFullySummed { total: 9_999 })
        ));
    }

    #[test]
    fn rejects_unreachable_quorum() {
        let mut config = TreasuryConfig::from_toml_str(&TreasuryConfig::sample()).unwrap();
        config.owners.required = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = TreasuryConfig::from_toml_str(&TreasuryConfig::sample()).unwrap();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(TreasuryConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn parse_errors_are_config_errors() {
        assert!(matches!(
            TreasuryConfig::from_toml_str("treasury_account = "),
            Err(CustodyError::Config(_))
        ));
    }
}
