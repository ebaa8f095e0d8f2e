use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use custody_types::{AssetId, CustodyError, CustodyResult, TreasuryEvent, BASIS_POINTS_TOTAL};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AssetConfig;
use crate::feed::ValuationFeed;
use crate::plan::{plan_adjustments, Adjustment, Holding};
use crate::venue::RebalanceVenue;

/// One day.
pub const DEFAULT_REBALANCE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// One hour.
pub const DEFAULT_MAX_VALUATION_AGE_SECS: u64 = 60 * 60;

/// Outcome of a rebalance pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebalanceReport {
    pub at: DateTime<Utc>,
    pub total_value: u64,
    /// Adjustments the venue carried out, in planning order.
    pub adjustments: Vec<Adjustment>,
    /// Set when a venue call failed and ended the pass early.
    pub halted: Option<RebalanceHalt>,
}

impl RebalanceReport {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

/// The venue call that stopped a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebalanceHalt {
    pub adjustment: Adjustment,
    pub error: CustodyError,
    /// Planned adjustments after the failed one that were never issued.
    pub skipped: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rebalancer {
    configs: BTreeMap<AssetId, AssetConfig>,
    interval_secs: u64,
    max_valuation_age_secs: u64,
    last_rebalance: Option<DateTime<Utc>>,
    #[serde(skip)]
    events: Vec<TreasuryEvent>,
}

impl Default for Rebalancer {
    fn default() -> Self {
        Self::new(DEFAULT_REBALANCE_INTERVAL_SECS, DEFAULT_MAX_VALUATION_AGE_SECS)
    }
}

impl Rebalancer {
    pub fn new(interval_secs: u64, max_valuation_age_secs: u64) -> Self {
        Self {
            configs: BTreeMap::new(),
            interval_secs,
            max_valuation_age_secs,
            last_rebalance: None,
            events: Vec::new(),
        }
    }

    pub fn configs(&self) -> impl Iterator<Item = &AssetConfig> {
        self.configs.values()
    }

    pub fn config(&self, asset: &AssetId) -> Option<&AssetConfig> {
        self.configs.get(asset)
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn max_valuation_age_secs(&self) -> u64 {
        self.max_valuation_age_secs
    }

    pub fn last_rebalance(&self) -> Option<DateTime<Utc>> {
        self.last_rebalance
    }

    pub fn drain_events(&mut self) -> Vec<TreasuryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Add or replace an asset's target. Active targets may not exceed 100%.
    pub fn register_asset(&mut self, config: AssetConfig) -> CustodyResult<()> {
        config.validate()?;
        let others = self.active_target_bps(Some(&config.asset));
        if config.is_active && others + config.target_bps as u64 > BASIS_POINTS_TOTAL as u64 {
            return Err(CustodyError::InvalidAssetConfig(format!(
                "active targets would total {} bps",
                others + config.target_bps as u64
            )));
        }
        info!(
            asset = %config.asset,
            target_bps = config.target_bps,
            threshold_bps = config.rebalance_threshold_bps,
            active = config.is_active,
            "Asset config registered"
        );
        self.configs.insert(config.asset.clone(), config);
        Ok(())
    }

    pub fn set_asset_active(&mut self, asset: &AssetId, active: bool) -> CustodyResult<()> {
        let others = self.active_target_bps(Some(asset));
        let config = self
            .configs
            .get_mut(asset)
            .ok_or_else(|| CustodyError::UnknownAsset(asset.clone()))?;
        if active && others + config.target_bps as u64 > BASIS_POINTS_TOTAL as u64 {
            return Err(CustodyError::InvalidAssetConfig(format!(
                "activating {asset} would put active targets at {} bps",
                others + config.target_bps as u64
            )));
        }
        config.is_active = active;
        info!(asset = %asset, active, "Asset activation changed");
        Ok(())
    }

    pub fn set_interval(&mut self, interval_secs: u64) -> CustodyResult<()> {
        to_duration(interval_secs)?;
        self.interval_secs = interval_secs;
        Ok(())
    }

    pub fn set_max_valuation_age(&mut self, max_age_secs: u64) -> CustodyResult<()> {
        to_duration(max_age_secs)?;
        self.max_valuation_age_secs = max_age_secs;
        Ok(())
    }

    /// Earliest instant the next pass may run.
    pub fn next_allowed(&self) -> CustodyResult<Option<DateTime<Utc>>> {
        let Some(last) = self.last_rebalance else {
            return Ok(None);
        };
        let next = last
            .checked_add_signed(to_duration(self.interval_secs)?)
            .ok_or_else(|| {
                CustodyError::InvariantViolation("rebalance interval overflows the calendar".into())
            })?;
        Ok(Some(next))
    }

    /// Read fresh values for every active asset.
    pub fn holdings(&self, now: DateTime<Utc>, feed: &dyn ValuationFeed) -> CustodyResult<Vec<Holding>> {
        let max_age = to_duration(self.max_valuation_age_secs)?;
        let mut holdings = Vec::new();
        for config in self.configs.values().filter(|c| c.is_active) {
            let valuation = feed.asset_value(&config.asset).map_err(|err| match err {
                CustodyError::ValuationUnavailable { .. } => err,
                other => CustodyError::ValuationUnavailable {
                    asset: config.asset.clone(),
                    reason: other.to_string(),
                },
            })?;
            if now.signed_duration_since(valuation.as_of) > max_age {
                warn!(asset = %config.asset, as_of = %valuation.as_of, "Stale valuation");
                return Err(CustodyError::ValuationUnavailable {
                    asset: config.asset.clone(),
                    reason: format!("valuation from {} is stale", valuation.as_of),
                });
            }
            holdings.push(Holding {
                asset: config.asset.clone(),
                target_bps: config.target_bps,
                rebalance_threshold_bps: config.rebalance_threshold_bps,
                value: valuation.value,
            });
        }
        Ok(holdings)
    }

    pub fn rebalance(
        &mut self,
        now: DateTime<Utc>,
        feed: &dyn ValuationFeed,
        venue: &dyn RebalanceVenue,
    ) -> CustodyResult<RebalanceReport> {
        self.rebalance_with(now, feed, venue, plan_adjustments)
    }

    /// Rebalance with a caller-supplied planner.
    ///
    /// `last_rebalance` moves once every valuation was fresh and a plan
    /// exists, before the first venue call. A venue failure ends the pass:
    /// the adjustments already executed stay in the report and in the events,
    /// the failure is returned in [`RebalanceReport::halted`], and the
    /// interval still applies, so a retry cannot issue them a second time.
    pub fn rebalance_with<P>(
        &mut self,
        now: DateTime<Utc>,
        feed: &dyn ValuationFeed,
        venue: &dyn RebalanceVenue,
        planner: P,
    ) -> CustodyResult<RebalanceReport>
    where
        P: FnOnce(&[Holding]) -> CustodyResult<Vec<Adjustment>>,
    {
        if let Some(next_allowed) = self.next_allowed()? {
            if now < next_allowed {
                debug!(next_allowed = %next_allowed, "Rebalance requested too early");
                return Err(CustodyError::RebalanceTooFrequent { next_allowed });
            }
        }

        let holdings = self.holdings(now, feed)?;
        let total_value = holdings.iter().try_fold(0u64, |acc, h| {
            acc.checked_add(h.value).ok_or_else(|| {
                CustodyError::InvariantViolation("portfolio value overflows u64".into())
            })
        })?;
        let planned = planner(&holdings)?;
        self.last_rebalance = Some(now);

        let planned_count = planned.len();
        let mut executed = Vec::with_capacity(planned_count);
        let mut halted = None;
        for (position, adjustment) in planned.into_iter().enumerate() {
            if let Err(error) = venue.execute(&adjustment) {
                warn!(
                    asset = %adjustment.asset,
                    venue = venue.venue(),
                    error = %error,
                    executed = executed.len(),
                    "Venue rejected adjustment; pass halted"
                );
                halted = Some(RebalanceHalt {
                    adjustment,
                    error,
                    skipped: planned_count - position - 1,
                });
                break;
            }
            info!(
                asset = %adjustment.asset,
                venue = venue.venue(),
                direction = ?adjustment.direction,
                before = adjustment.before,
                after = adjustment.after,
                "Asset rebalanced"
            );
            self.events.push(TreasuryEvent::AssetRebalanced {
                asset: adjustment.asset.clone(),
                before: adjustment.before,
                after: adjustment.after,
            });
            executed.push(adjustment);
        }

        Ok(RebalanceReport {
            at: now,
            total_value,
            adjustments: executed,
            halted,
        })
    }

    fn active_target_bps(&self, excluding: Option<&AssetId>) -> u64 {
        self.configs
            .values()
            .filter(|c| c.is_active && Some(&c.asset) != excluding)
            .map(|c| c.target_bps as u64)
            .sum()
    }
}

fn to_duration(secs: u64) -> CustodyResult<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| CustodyError::Config(format!("{secs}s is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::StaticValuationFeed;
    use crate::venue::RecordingVenue;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
    }

    fn sixty_forty() -> Rebalancer {
        let mut rebalancer = Rebalancer::default();
        rebalancer
            .register_asset(AssetConfig::new("ETH", 6_000, 500))
            .unwrap();
        rebalancer
            .register_asset(AssetConfig::new("USDC", 4_000, 500))
            .unwrap();
        rebalancer
    }

    fn feed(eth: u64, usdc: u64, as_of: DateTime<Utc>) -> StaticValuationFeed {
        let feed = StaticValuationFeed::new();
        feed.set("ETH", eth, as_of);
        feed.set("USDC", usdc, as_of);
        feed
    }

    #[test]
    fn rebalances_drifted_portfolio() {
        let mut rebalancer = sixty_forty();
        let venue = RecordingVenue::new();
        let report = rebalancer
            .rebalance(t0(), &feed(7_000, 3_000, t0()), &venue)
            .unwrap();
        assert_eq!(report.total_value, 10_000);
        assert_eq!(report.adjustments.len(), 2);
        assert_eq!(venue.executed().len(), 2);
        assert_eq!(rebalancer.last_rebalance(), Some(t0()));
        assert_eq!(rebalancer.drain_events().len(), 2);
    }

    /// Fails its `fail_on`-th call (1-based), records the rest.
    struct FlakyVenue {
        inner: RecordingVenue,
        calls: std::sync::Mutex<usize>,
        fail_on: usize,
    }

    impl RebalanceVenue for FlakyVenue {
        fn venue(&self) -> &'static str {
            "flaky"
        }

        fn execute(&self, adjustment: &Adjustment) -> CustodyResult<()> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == self.fail_on {
                return Err(CustodyError::TransferFailed {
                    asset: adjustment.asset.clone(),
                    reason: "venue offline".into(),
                });
            }
            self.inner.execute(adjustment)
        }
    }

    #[test]
    fn venue_failure_keeps_executed_prefix() {
        let mut rebalancer = sixty_forty();
        let venue = FlakyVenue {
            inner: RecordingVenue::new(),
            calls: std::sync::Mutex::new(0),
            fail_on: 2,
        };
        let report = rebalancer
            .rebalance(t0(), &feed(8_000, 2_000, t0()), &venue)
            .unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.adjustments.len(), 1);
        assert_eq!(report.adjustments[0].asset, AssetId::new("ETH"));
        let halt = report.halted.unwrap();
        assert_eq!(halt.adjustment.asset, AssetId::new("USDC"));
        assert_eq!(halt.skipped, 0);
        assert!(matches!(halt.error, CustodyError::TransferFailed { .. }));

        assert_eq!(venue.inner.executed().len(), 1);
        assert_eq!(rebalancer.drain_events().len(), 1);
        assert_eq!(rebalancer.last_rebalance(), Some(t0()));

        // The executed reduction is not reissued by an immediate retry.
        assert!(matches!(
            rebalancer.rebalance(t0(), &feed(6_000, 2_000, t0()), &venue),
            Err(CustodyError::RebalanceTooFrequent { .. })
        ));
        assert_eq!(venue.inner.executed().len(), 1);
    }

    #[test]
    fn interval_is_enforced() {
        let mut rebalancer = sixty_forty();
        let venue = RecordingVenue::new();
        rebalancer
            .rebalance(t0(), &feed(6_000, 4_000, t0()), &venue)
            .unwrap();

        let later = t0() + Duration::hours(23);
        let err = rebalancer
            .rebalance(later, &feed(7_000, 3_000, later), &venue)
            .unwrap_err();
        assert!(matches!(err, CustodyError::RebalanceTooFrequent { .. }));

        let next_day = t0() + Duration::hours(24);
        assert!(rebalancer
            .rebalance(next_day, &feed(7_000, 3_000, next_day), &venue)
            .is_ok());
    }

    #[test]
    fn stale_valuation_aborts_without_moving_clock() {
        let mut rebalancer = sixty_forty();
        let venue = RecordingVenue::new();
        let now = t0() + Duration::hours(2);
        let err = rebalancer
            .rebalance(now, &feed(7_000, 3_000, t0()), &venue)
            .unwrap_err();
        assert!(matches!(err, CustodyError::ValuationUnavailable { .. }));
        assert!(rebalancer.last_rebalance().is_none());
        assert!(venue.executed().is_empty());
    }

    #[test]
    fn missing_valuation_aborts() {
        let mut rebalancer = sixty_forty();
        let feed = feed(7_000, 3_000, t0());
        feed.remove(&AssetId::new("USDC"));
        let err = rebalancer
            .rebalance(t0(), &feed, &RecordingVenue::new())
            .unwrap_err();
        assert!(matches!(
            err,
            CustodyError::ValuationUnavailable { ref asset, .. } if asset == &AssetId::new("USDC")
        ));
    }

    #[test]
    fn active_targets_capped_at_full_allocation() {
        let mut rebalancer = sixty_forty();
        let err = rebalancer
            .register_asset(AssetConfig::new("BTC", 1, 500))
            .unwrap_err();
        assert!(matches!(err, CustodyError::InvalidAssetConfig(_)));

        let mut inactive = AssetConfig::new("BTC", 2_000, 500);
        inactive.is_active = false;
        rebalancer.register_asset(inactive).unwrap();
        assert!(rebalancer
            .set_asset_active(&AssetId::new("BTC"), true)
            .is_err());

        rebalancer
            .set_asset_active(&AssetId::new("ETH"), false)
            .unwrap();
        rebalancer
            .set_asset_active(&AssetId::new("BTC"), true)
            .unwrap();

        // Replacing an existing config only counts its new target.
        rebalancer
            .register_asset(AssetConfig::new("USDC", 8_000, 500))
            .unwrap();
    }

    #[test]
    fn inactive_assets_are_not_valued() {
        let mut rebalancer = sixty_forty();
        rebalancer
            .set_asset_active(&AssetId::new("ETH"), false)
            .unwrap();
        let feed = StaticValuationFeed::new();
        feed.set("USDC", 100, t0());
        let report = rebalancer
            .rebalance(t0(), &feed, &RecordingVenue::new())
            .unwrap();
        assert_eq!(report.total_value, 100);
    }
}
