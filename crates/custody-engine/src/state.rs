use custody_auth::AuthorizationEngine;
use custody_ledger::{CategoryLedger, SpendingController};
use custody_rebalancer::Rebalancer;
use custody_types::{AccountId, CustodyError, CustodyResult, TreasuryEvent};
use serde::{Deserialize, Serialize};

use crate::emergency::EmergencyControl;
use crate::roles::RoleRegistry;
use crate::upgrade::UpgradeHistory;

/// Layout of [`TreasuryState`] as written by this build.
pub const STATE_LAYOUT_VERSION: u32 = 1;

/// Everything the treasury persists. Survives logic upgrades.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreasuryState {
    pub layout_version: u32,
    /// Account the managed assets are held in.
    pub treasury_account: AccountId,
    pub auth: AuthorizationEngine,
    pub ledger: CategoryLedger,
    pub spending: SpendingController,
    pub rebalancer: Rebalancer,
    pub emergency: EmergencyControl,
    pub roles: RoleRegistry,
    pub upgrades: UpgradeHistory,
    #[serde(skip)]
    events: Vec<TreasuryEvent>,
}

impl TreasuryState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        treasury_account: AccountId,
        auth: AuthorizationEngine,
        ledger: CategoryLedger,
        spending: SpendingController,
        rebalancer: Rebalancer,
        roles: RoleRegistry,
        upgrades: UpgradeHistory,
    ) -> Self {
        Self {
            layout_version: STATE_LAYOUT_VERSION,
            treasury_account,
            auth,
            ledger,
            spending,
            rebalancer,
            emergency: EmergencyControl::default(),
            roles,
            upgrades,
            events: Vec::new(),
        }
    }

    /// Queue an event that no component emits itself.
    pub fn emit(&mut self, event: TreasuryEvent) {
        self.events.push(event);
    }

    /// Collect pending events from every component, in emission order per component.
    pub fn drain_events(&mut self) -> Vec<TreasuryEvent> {
        let mut events = std::mem::take(&mut self.events);
        events.extend(self.auth.drain_events());
        events.extend(self.ledger.drain_events());
        events.extend(self.spending.drain_events());
        events.extend(self.rebalancer.drain_events());
        events.extend(self.emergency.drain_events());
        events.extend(self.roles.drain_events());
        events
    }

    /// Integrity checks run on every reload and after migrations.
    pub fn verify(&self) -> CustodyResult<()> {
        if self.treasury_account.is_empty() {
            return Err(CustodyError::InvariantViolation(
                "treasury account is empty".into(),
            ));
        }
        self.ledger.verify_integrity()
    }
}
