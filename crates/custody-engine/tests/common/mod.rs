//! Shared fixtures for the treasury integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use custody_engine::{MemorySink, Treasury, TreasuryConfig};
use custody_ledger::{AssetRegistry, AssetTransfer, InMemoryAsset};
use custody_rebalancer::{RecordingVenue, StaticValuationFeed};
use custody_types::{AccountId, AssetId, ManualClock, OwnerId};

pub const BASE_CONFIG: &str = r#"
treasury_account = "treasury"
upgrade_authority = "council"

[owners]
members = ["alice", "bob", "carol", "dave"]
required = 3

[[tiers]]
min_value = 0
required_signatures = 2

[[tiers]]
min_value = 10000
required_signatures = 4

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
"#;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
}

pub fn account(name: &str) -> AccountId {
    AccountId::new(name)
}

pub fn owner(name: &str) -> OwnerId {
    OwnerId::new(name)
}

pub fn usdc() -> AssetId {
    AssetId::new("USDC")
}

pub fn config() -> TreasuryConfig {
    TreasuryConfig::from_toml_str(BASE_CONFIG).unwrap()
}

pub struct Harness {
    pub treasury: Arc<Treasury>,
    pub clock: ManualClock,
    pub usdc: Arc<InMemoryAsset>,
    pub sink: Arc<MemorySink>,
    pub feed: Arc<StaticValuationFeed>,
    pub venue: Arc<RecordingVenue>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: TreasuryConfig) -> Self {
        Self::with_extra_assets(config, AssetRegistry::new())
    }

    /// `assets` is extended with the USDC token every harness carries.
    pub fn with_extra_assets(config: TreasuryConfig, assets: AssetRegistry) -> Self {
        let clock = ManualClock::new(start());
        let usdc = Arc::new(InMemoryAsset::new("USDC", "treasury"));
        let sink = Arc::new(MemorySink::new());
        let feed = Arc::new(StaticValuationFeed::new());
        let venue = Arc::new(RecordingVenue::new());

        let treasury = Treasury::builder(config)
            .with_assets(assets.with(usdc.clone()))
            .with_clock(Arc::new(clock.clone()))
            .with_sink(sink.clone())
            .with_feed(feed.clone())
            .with_venue(venue.clone())
            .build()
            .unwrap();

        Self {
            treasury: Arc::new(treasury),
            clock,
            usdc,
            sink,
            feed,
            venue,
        }
    }

    /// Mint `amount` USDC to the payments account and deposit it as revenue.
    pub fn deposit(&self, amount: u64) {
        let payer = account("payments");
        self.usdc.mint(&payer, amount).unwrap();
        self.treasury
            .receive_revenue(&payer, &usdc(), amount, "subscription revenue")
            .unwrap();
    }

    pub fn held(&self, holder: &str) -> u64 {
        self.usdc.balance_of(&account(holder))
    }
}
