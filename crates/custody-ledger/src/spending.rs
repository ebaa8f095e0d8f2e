//! Category spends, with large disbursements deferred behind a maturity delay.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use custody_types::{
    AccountId, AssetId, Category, CustodyError, CustodyResult, SpendRequest, TreasuryEvent,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::asset::AssetRegistry;
use crate::audit::{RecordDraft, RecordKind};
use crate::ledger::CategoryLedger;

/// 48 hours.
pub const DEFAULT_TIMELOCK_DELAY_SECS: u64 = 48 * 60 * 60;

/// Spends strictly above this amount (minor units) are timelocked.
pub const DEFAULT_TIMELOCK_THRESHOLD: u64 = 10_000;

/// A deferred spend waiting for maturity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockEntry {
    pub matures_at: DateTime<Utc>,
    pub category: Category,
    pub asset: AssetId,
    pub amount: u64,
    pub recipient: AccountId,
    pub description: String,
    pub submitted_at: DateTime<Utc>,
    pub initiator: AccountId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpendOutcome {
    /// Funds left the treasury; `record_id` names the debit audit record.
    Executed { record_id: String },
    /// Deferred until `matures_at`; nothing was debited or transferred.
    Scheduled {
        key: String,
        matures_at: DateTime<Utc>,
    },
}

/// Deterministic key of a timelocked spend.
pub fn timelock_key(
    asset: &AssetId,
    amount: u64,
    recipient: &AccountId,
    submitted_at: DateTime<Utc>,
) -> CustodyResult<String> {
    let material = serde_json::json!({
        "asset": asset,
        "amount": amount,
        "recipient": recipient,
        "submitted_at": submitted_at,
    });
    let bytes = serde_json::to_vec(&material)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpendingController {
    timelock_threshold: u64,
    timelock_delay_secs: u64,
    timelocks: BTreeMap<String, TimelockEntry>,
    #[serde(skip)]
    events: Vec<TreasuryEvent>,
}

impl Default for SpendingController {
    fn default() -> Self {
        Self::new(DEFAULT_TIMELOCK_THRESHOLD, DEFAULT_TIMELOCK_DELAY_SECS)
    }
}

impl SpendingController {
    pub fn new(timelock_threshold: u64, timelock_delay_secs: u64) -> Self {
        Self {
            timelock_threshold,
            timelock_delay_secs,
            timelocks: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn timelock_threshold(&self) -> u64 {
        self.timelock_threshold
    }

    pub fn timelock_delay_secs(&self) -> u64 {
        self.timelock_delay_secs
    }

    pub fn set_timelock_threshold(&mut self, threshold: u64) {
        self.timelock_threshold = threshold;
        info!(threshold, "Timelock threshold updated");
    }

    pub fn set_timelock_delay_secs(&mut self, delay_secs: u64) -> CustodyResult<()> {
        if i64::try_from(delay_secs).is_err() {
            return Err(CustodyError::Config(format!(
                "timelock delay {delay_secs}s is out of range"
            )));
        }
        self.timelock_delay_secs = delay_secs;
        info!(delay_secs, "Timelock delay updated");
        Ok(())
    }

    /// Whether `amount` would be deferred under the current threshold.
    pub fn requires_timelock(&self, amount: u64) -> bool {
        amount > self.timelock_threshold
    }

    pub fn timelock(&self, key: &str) -> Option<&TimelockEntry> {
        self.timelocks.get(key)
    }

    pub fn timelocks(&self) -> impl Iterator<Item = (&String, &TimelockEntry)> {
        self.timelocks.iter()
    }

    pub fn drain_events(&mut self) -> Vec<TreasuryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Spend with the built-in threshold rule.
    pub fn spend(
        &mut self,
        ledger: &mut CategoryLedger,
        assets: &AssetRegistry,
        request: &SpendRequest,
        initiator: &AccountId,
        now: DateTime<Utc>,
    ) -> CustodyResult<SpendOutcome> {
        let timelocked = self.requires_timelock(request.amount);
        self.spend_with(ledger, assets, request, initiator, now, timelocked)
    }

    /// Spend with the timelock decision made by the caller.
    pub fn spend_with(
        &mut self,
        ledger: &mut CategoryLedger,
        assets: &AssetRegistry,
        request: &SpendRequest,
        initiator: &AccountId,
        now: DateTime<Utc>,
        timelocked: bool,
    ) -> CustodyResult<SpendOutcome> {
        request.validate()?;
        let available = ledger.balance(&request.asset, request.category);
        if available < request.amount {
            warn!(
                asset = %request.asset,
                category = %request.category,
                requested = request.amount,
                available,
                "Spend rejected: insufficient category funds"
            );
            return Err(CustodyError::InsufficientCategoryFunds {
                asset: request.asset.clone(),
                category: request.category,
                requested: request.amount,
                available,
            });
        }

        if timelocked {
            return self.schedule(ledger, request, initiator, now);
        }

        let record_id = self.disburse(
            ledger,
            assets,
            request.category,
            &request.asset,
            request.amount,
            &request.recipient,
            &request.description,
            initiator,
            now,
        )?;
        Ok(SpendOutcome::Executed { record_id })
    }

    /// Execute a matured spend. Anyone holding the original parameters may call it.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_timelocked(
        &mut self,
        ledger: &mut CategoryLedger,
        assets: &AssetRegistry,
        asset: &AssetId,
        amount: u64,
        recipient: &AccountId,
        submitted_at: DateTime<Utc>,
        caller: &AccountId,
        now: DateTime<Utc>,
    ) -> CustodyResult<String> {
        let key = timelock_key(asset, amount, recipient, submitted_at)?;
        let entry = self
            .timelocks
            .get(&key)
            .cloned()
            .ok_or_else(|| CustodyError::TimelockNotFound(key.clone()))?;
        if now < entry.matures_at {
            debug!(key = %key, matures_at = %entry.matures_at, "Timelock not mature");
            return Err(CustodyError::TimelockNotMature {
                key,
                matures_at: entry.matures_at,
            });
        }

        self.timelocks.remove(&key);
        let result = self.disburse(
            ledger,
            assets,
            entry.category,
            &entry.asset,
            entry.amount,
            &entry.recipient,
            &entry.description,
            caller,
            now,
        );
        match result {
            Ok(record_id) => {
                info!(key = %key, asset = %entry.asset, amount = entry.amount, "Timelocked spend executed");
                self.events.push(TreasuryEvent::TimelockExecuted { key });
                Ok(record_id)
            }
            Err(err) => {
                self.timelocks.insert(key, entry);
                Err(err)
            }
        }
    }

    pub fn cancel_timelocked(&mut self, key: &str) -> CustodyResult<TimelockEntry> {
        let entry = self
            .timelocks
            .remove(key)
            .ok_or_else(|| CustodyError::TimelockNotFound(key.to_string()))?;
        info!(key = %key, asset = %entry.asset, amount = entry.amount, "Timelocked spend cancelled");
        self.events.push(TreasuryEvent::TimelockCancelled {
            key: key.to_string(),
        });
        Ok(entry)
    }

    fn schedule(
        &mut self,
        ledger: &mut CategoryLedger,
        request: &SpendRequest,
        initiator: &AccountId,
        now: DateTime<Utc>,
    ) -> CustodyResult<SpendOutcome> {
        let key = timelock_key(&request.asset, request.amount, &request.recipient, now)?;
        if self.timelocks.contains_key(&key) {
            return Err(CustodyError::TimelockAlreadyScheduled(key));
        }
        let delay = i64::try_from(self.timelock_delay_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                CustodyError::Config(format!(
                    "timelock delay {}s is out of range",
                    self.timelock_delay_secs
                ))
            })?;
        let matures_at = now.checked_add_signed(delay).ok_or_else(|| {
            CustodyError::InvariantViolation("timelock maturity overflows the calendar".into())
        })?;

        ledger.record_transaction(RecordDraft {
            kind: RecordKind::TimelockScheduled,
            asset: request.asset.clone(),
            amount: request.amount,
            category: Some(request.category),
            description: request.description.clone(),
            initiator: initiator.clone(),
            timestamp: now,
        })?;

        self.timelocks.insert(
            key.clone(),
            TimelockEntry {
                matures_at,
                category: request.category,
                asset: request.asset.clone(),
                amount: request.amount,
                recipient: request.recipient.clone(),
                description: request.description.clone(),
                submitted_at: now,
                initiator: initiator.clone(),
            },
        );
        info!(
            key = %key,
            asset = %request.asset,
            amount = request.amount,
            matures_at = %matures_at,
            "Spend timelocked"
        );
        self.events.push(TreasuryEvent::TimelockScheduled {
            key: key.clone(),
            asset: request.asset.clone(),
            amount: request.amount,
            matures_at,
        });
        Ok(SpendOutcome::Scheduled { key, matures_at })
    }

    /// Debit, transfer, record. A failed transfer restores the debit.
    #[allow(clippy::too_many_arguments)]
    fn disburse(
        &mut self,
        ledger: &mut CategoryLedger,
        assets: &AssetRegistry,
        category: Category,
        asset: &AssetId,
        amount: u64,
        recipient: &AccountId,
        description: &str,
        initiator: &AccountId,
        now: DateTime<Utc>,
    ) -> CustodyResult<String> {
        let draft = RecordDraft {
            kind: RecordKind::Debit,
            asset: asset.clone(),
            amount,
            category: Some(category),
            description: format!("{description} (to {recipient})"),
            initiator: initiator.clone(),
            timestamp: now,
        };
        draft.validate()?;
        let handle = assets.get(asset)?;

        ledger.debit(asset, category, amount)?;
        if let Err(err) = handle.transfer(recipient, amount) {
            warn!(asset = %asset, amount, recipient = %recipient, error = %err, "Transfer failed, debit reversed");
            ledger.reverse_debit(asset, category, amount)?;
            return Err(err);
        }

        let record = ledger.record_transaction(draft)?;
        info!(asset = %asset, category = %category, amount, recipient = %recipient, "Spend executed");
        Ok(record.id)
    }
}
