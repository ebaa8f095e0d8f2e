//! Swappable treasury logic over persistent state.
//!
//! State lives in [`TreasuryState`]; behavior that may change between
//! releases lives behind [`TreasuryLogic`]. A swap keeps the state as is
//! unless the new logic declares a different layout, in which case a
//! [`StateMigration`] bridging exactly the two layouts must run with it.

use std::fmt;

use chrono::{DateTime, Utc};
use custody_ledger::{AllocationConfig, SpendingController};
use custody_rebalancer::{plan_adjustments, Adjustment, Holding};
use custody_types::{AccountId, CategorySplit, CustodyError, CustodyResult, Role};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::{TreasuryState, STATE_LAYOUT_VERSION};

/// Identity of a logic implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicDescriptor {
    pub name: String,
    pub version: String,
    /// State layout this logic reads and writes.
    pub layout: u32,
}

impl fmt::Display for LogicDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (layout {})", self.name, self.version, self.layout)
    }
}

/// Behavior the facade forwards every non-administrative call through.
///
/// The provided methods are the standard rules; a new version overrides
/// only what it changes.
pub trait TreasuryLogic: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> LogicDescriptor;

    fn split_revenue(
        &self,
        allocation: &AllocationConfig,
        amount: u64,
    ) -> CustodyResult<CategorySplit> {
        allocation.split(amount)
    }

    fn requires_timelock(&self, spending: &SpendingController, amount: u64) -> bool {
        spending.requires_timelock(amount)
    }

    fn plan_rebalance(&self, holdings: &[Holding]) -> CustodyResult<Vec<Adjustment>> {
        plan_adjustments(holdings)
    }
}

/// The logic shipped with this build.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardLogic;

impl TreasuryLogic for StandardLogic {
    fn descriptor(&self) -> LogicDescriptor {
        LogicDescriptor {
            name: "standard".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            layout: STATE_LAYOUT_VERSION,
        }
    }
}

/// Rewrites state from one layout to the next.
pub trait StateMigration: Send + Sync {
    fn from_layout(&self) -> u32;

    fn to_layout(&self) -> u32;

    fn migrate(&self, state: &mut TreasuryState) -> CustodyResult<()>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub from: LogicDescriptor,
    pub to: LogicDescriptor,
    pub by: AccountId,
    pub at: DateTime<Utc>,
}

/// Upgrade authority plus the installed-version history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeHistory {
    authority: AccountId,
    active: LogicDescriptor,
    history: Vec<UpgradeRecord>,
}

impl UpgradeHistory {
    pub fn new(authority: AccountId, active: LogicDescriptor) -> Self {
        Self {
            authority,
            active,
            history: Vec::new(),
        }
    }

    pub fn authority(&self) -> &AccountId {
        &self.authority
    }

    pub fn active(&self) -> &LogicDescriptor {
        &self.active
    }

    pub fn history(&self) -> &[UpgradeRecord] {
        &self.history
    }

    pub fn ensure_authority(&self, caller: &AccountId) -> CustodyResult<()> {
        if caller == &self.authority {
            return Ok(());
        }
        warn!(caller = %caller, "Upgrade call rejected: not the upgrade authority");
        Err(CustodyError::Unauthorized {
            caller: caller.clone(),
            role: Role::UpgradeAuthority,
        })
    }

    pub fn transfer_authority(&mut self, new_authority: AccountId) -> CustodyResult<()> {
        if new_authority.is_empty() {
            return Err(CustodyError::InvalidDestination);
        }
        self.authority = new_authority;
        Ok(())
    }

    pub(crate) fn record(&mut self, to: LogicDescriptor, by: AccountId, at: DateTime<Utc>) {
        let from = std::mem::replace(&mut self.active, to.clone());
        self.history.push(UpgradeRecord { from, to, by, at });
    }
}

/// Bring `state` to `target` layout, running `migration` when the layouts differ.
pub fn migrate_state(
    state: &mut TreasuryState,
    target: u32,
    migration: Option<&dyn StateMigration>,
) -> CustodyResult<()> {
    let stored = state.layout_version;
    if stored == target {
        return Ok(());
    }
    let migration = migration
        .filter(|m| m.from_layout() == stored && m.to_layout() == target)
        .ok_or(CustodyError::LayoutMismatch {
            stored,
            expected: target,
        })?;
    migration.migrate(state).map_err(|err| match err {
        CustodyError::MigrationFailed(_) => err,
        other => CustodyError::MigrationFailed(other.to_string()),
    })?;
    state.layout_version = target;
    state
        .verify()
        .map_err(|err| CustodyError::MigrationFailed(format!("post-migration check: {err}")))
}
