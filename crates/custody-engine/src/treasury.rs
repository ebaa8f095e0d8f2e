//! The treasury facade.
//!
//! Every public operation checks the caller's role and the pause state, then
//! runs as one [`StateStore`] transaction. Behavior that may change between
//! releases (revenue split, timelock decision, rebalance plan) is delegated
//! to the active [`TreasuryLogic`]. Events reach the [`EventSink`] only after
//! their transaction commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use custody_auth::{
    AuthorizationEngine, Destination, ExecutionStatus, OperationExecutor, OperationPayload,
    ProposedOperation,
};
use custody_ledger::{
    AllocationConfig, AssetRegistry, CategoryLedger, FinancialRecord, RecordDraft, RecordKind,
    SpendOutcome, SpendingController, TimelockEntry,
};
use custody_rebalancer::{
    AssetConfig, Direction, RebalanceReport, RebalanceVenue, Rebalancer, RecordingVenue,
    StaticValuationFeed, ValuationFeed,
};
use custody_types::{
    AccountId, AssetId, Category, CategorySplit, Clock, CustodyError, CustodyResult, OperationId,
    OwnerId, Role, SpendRequest, SystemClock, TreasuryEvent,
};
use tracing::{info, warn};

use crate::config::TreasuryConfig;
use crate::emergency::{EmergencyControl, EmergencyState};
use crate::gateway::{CallGateway, RejectingGateway};
use crate::roles::RoleRegistry;
use crate::sink::{EventSink, TracingSink};
use crate::state::TreasuryState;
use crate::store::{StateStore, TreasuryCore};
use crate::upgrade::{
    migrate_state, LogicDescriptor, StandardLogic, StateMigration, TreasuryLogic, UpgradeHistory,
    UpgradeRecord,
};

/// Assembles a [`Treasury`] from configuration and its external collaborators.
pub struct TreasuryBuilder {
    config: TreasuryConfig,
    assets: AssetRegistry,
    feed: Arc<dyn ValuationFeed>,
    venue: Arc<dyn RebalanceVenue>,
    gateway: Arc<dyn CallGateway>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    logic: Arc<dyn TreasuryLogic>,
}

impl TreasuryBuilder {
    pub fn new(config: TreasuryConfig) -> Self {
        Self {
            config,
            assets: AssetRegistry::new(),
            feed: Arc::new(StaticValuationFeed::new()),
            venue: Arc::new(RecordingVenue::new()),
            gateway: Arc::new(RejectingGateway),
            sink: Arc::new(TracingSink),
            clock: Arc::new(SystemClock),
            logic: Arc::new(StandardLogic),
        }
    }

    pub fn with_assets(mut self, assets: AssetRegistry) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_feed(mut self, feed: Arc<dyn ValuationFeed>) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_venue(mut self, venue: Arc<dyn RebalanceVenue>) -> Self {
        self.venue = venue;
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn CallGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_logic(mut self, logic: Arc<dyn TreasuryLogic>) -> Self {
        self.logic = logic;
        self
    }

    pub fn build(self) -> CustodyResult<Treasury> {
        self.config.validate()?;
        let config = &self.config;
        let descriptor = self.logic.descriptor();

        let store = StateStore::open(config.storage.clone(), self.logic.clone(), || {
            genesis_state(config, descriptor)
        })?;

        Ok(Treasury {
            store,
            assets: self.assets,
            feed: self.feed,
            venue: self.venue,
            gateway: self.gateway,
            sink: self.sink,
            clock: self.clock,
        })
    }
}

fn genesis_state(config: &TreasuryConfig, logic: LogicDescriptor) -> CustodyResult<TreasuryState> {
    let auth = AuthorizationEngine::new(config.owner_set()?, config.threshold_tiers()?);
    let ledger = CategoryLedger::new(config.allocation.build()?);
    let spending = SpendingController::new(config.timelock.threshold, config.timelock.delay_secs()?);

    let mut rebalancer = Rebalancer::new(
        config.rebalance.interval_secs,
        config.rebalance.max_valuation_age_secs,
    );
    for asset in &config.rebalance.assets {
        rebalancer.register_asset(asset.clone())?;
    }

    let mut roles = RoleRegistry::new();
    for (role, account) in config.roles.grants() {
        roles.grant(role, account.clone())?;
    }

    let mut state = TreasuryState::new(
        config.treasury_account.clone(),
        auth,
        ledger,
        spending,
        rebalancer,
        roles,
        UpgradeHistory::new(config.upgrade_authority.clone(), logic),
    );
    // Genesis setup is not an event stream.
    state.drain_events();
    Ok(state)
}

pub struct Treasury {
    store: StateStore,
    assets: AssetRegistry,
    feed: Arc<dyn ValuationFeed>,
    venue: Arc<dyn RebalanceVenue>,
    gateway: Arc<dyn CallGateway>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Treasury {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Treasury")
            .field("store", &self.store)
            .field("assets", &self.assets.assets().collect::<Vec<_>>())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Treasury {
    pub fn builder(config: TreasuryConfig) -> TreasuryBuilder {
        TreasuryBuilder::new(config)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    fn run<T>(
        &self,
        f: impl FnOnce(&mut TreasuryCore, DateTime<Utc>) -> CustodyResult<T>,
    ) -> CustodyResult<T> {
        let now = self.clock.now();
        let committed = self.store.transact(|core| f(core, now))?;
        for event in &committed.events {
            self.sink.publish(event);
        }
        match committed.persist_error {
            Some(err) => Err(err),
            None => Ok(committed.value),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&TreasuryState) -> T) -> CustodyResult<T> {
        self.store.read(|core| f(&core.state))
    }

    // --- Revenue ---

    /// Pull `amount` from the caller into the treasury and distribute it.
    pub fn receive_revenue(
        &self,
        caller: &AccountId,
        asset: &AssetId,
        amount: u64,
        description: &str,
    ) -> CustodyResult<CategorySplit> {
        self.run(|core, now| {
            let state = &mut core.state;
            state.roles.ensure(caller, Role::Treasurer)?;
            state.emergency.ensure_active()?;
            if amount == 0 {
                return Err(CustodyError::InvalidAmount(
                    "revenue amount must be positive".into(),
                ));
            }
            let handle = self.assets.get(asset)?;

            let split = core.logic.split_revenue(state.ledger.allocation(), amount)?;
            state
                .ledger
                .credit_split(asset, amount, &split, caller, description, now)?;
            state.emit(TreasuryEvent::RevenueReceived {
                asset: asset.clone(),
                amount,
                from: caller.clone(),
                description: description.to_string(),
            });

            handle.transfer_from(caller, &state.treasury_account, amount)?;
            info!(asset = %asset, amount, from = %caller, "Revenue received");
            Ok(split)
        })
    }

    /// Distribute funds that already sit in the treasury account.
    pub fn distribute_revenue(
        &self,
        caller: &AccountId,
        asset: &AssetId,
        amount: u64,
        description: &str,
    ) -> CustodyResult<CategorySplit> {
        self.run(|core, now| {
            let state = &mut core.state;
            state.roles.ensure(caller, Role::Treasurer)?;
            state.emergency.ensure_active()?;
            self.assets.get(asset)?;
            if amount == 0 {
                return Err(CustodyError::InvalidAmount(
                    "revenue amount must be positive".into(),
                ));
            }
            let split = core.logic.split_revenue(state.ledger.allocation(), amount)?;
            state
                .ledger
                .credit_split(asset, amount, &split, caller, description, now)?;
            Ok(split)
        })
    }

    pub fn update_allocation(
        &self,
        caller: &AccountId,
        allocation: AllocationConfig,
    ) -> CustodyResult<()> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.ledger.update_allocation(allocation);
            Ok(())
        })
    }

    // --- Spending ---

    /// Single-party category spend. Large amounts are timelocked.
    pub fn spend(&self, caller: &AccountId, request: SpendRequest) -> CustodyResult<SpendOutcome> {
        self.run(|core, now| {
            let state = &mut core.state;
            state.roles.ensure(caller, Role::Spender)?;
            state.emergency.ensure_active()?;
            let timelocked = core.logic.requires_timelock(&state.spending, request.amount);
            state.spending.spend_with(
                &mut state.ledger,
                &self.assets,
                &request,
                caller,
                now,
                timelocked,
            )
        })
    }

    /// Release a matured timelocked spend. Open to any caller.
    pub fn execute_timelocked(
        &self,
        caller: &AccountId,
        asset: &AssetId,
        amount: u64,
        recipient: &AccountId,
        submitted_at: DateTime<Utc>,
    ) -> CustodyResult<String> {
        self.run(|core, now| {
            let state = &mut core.state;
            state.emergency.ensure_active()?;
            state.spending.execute_timelocked(
                &mut state.ledger,
                &self.assets,
                asset,
                amount,
                recipient,
                submitted_at,
                caller,
                now,
            )
        })
    }

    pub fn cancel_timelocked(&self, caller: &AccountId, key: &str) -> CustodyResult<TimelockEntry> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.spending.cancel_timelocked(key)
        })
    }

    pub fn set_timelock_threshold(&self, caller: &AccountId, threshold: u64) -> CustodyResult<()> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.spending.set_timelock_threshold(threshold);
            Ok(())
        })
    }

    pub fn set_timelock_delay(&self, caller: &AccountId, delay_secs: u64) -> CustodyResult<()> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.spending.set_timelock_delay_secs(delay_secs)
        })
    }

    // --- Multi-party operations ---

    pub fn submit_operation(
        &self,
        proposer: &OwnerId,
        destination: Destination,
        value: u64,
        payload: OperationPayload,
    ) -> CustodyResult<(OperationId, ExecutionStatus)> {
        self.run(|core, now| {
            self.with_dispatch(core, now, |auth, dispatch| {
                auth.submit(proposer, destination, value, payload, now, dispatch)
            })
        })
    }

    pub fn confirm_operation(
        &self,
        owner: &OwnerId,
        id: OperationId,
    ) -> CustodyResult<ExecutionStatus> {
        self.run(|core, now| {
            self.with_dispatch(core, now, |auth, dispatch| {
                auth.confirm(id, owner, now, dispatch)
            })
        })
    }

    pub fn revoke_confirmation(&self, owner: &OwnerId, id: OperationId) -> CustodyResult<()> {
        self.run(|core, _| core.state.auth.revoke(id, owner))
    }

    /// Retry execution of an operation that already has quorum.
    pub fn execute_operation(&self, id: OperationId) -> CustodyResult<ExecutionStatus> {
        self.run(|core, now| {
            self.with_dispatch(core, now, |auth, dispatch| {
                auth.attempt_execute(id, now, dispatch)
            })
        })
    }

    fn with_dispatch<T>(
        &self,
        core: &mut TreasuryCore,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut AuthorizationEngine, &mut OperationDispatch<'_>) -> CustodyResult<T>,
    ) -> CustodyResult<T> {
        let TreasuryCore { state, logic } = core;
        let TreasuryState {
            auth,
            ledger,
            spending,
            emergency,
            ..
        } = state;
        let mut dispatch = OperationDispatch {
            ledger,
            spending,
            emergency,
            logic: logic.as_ref(),
            assets: &self.assets,
            gateway: self.gateway.as_ref(),
            now,
        };
        f(auth, &mut dispatch)
    }

    // --- Rebalancing ---

    /// Run a rebalance pass.
    ///
    /// Adjustments the venue executed are committed with their audit records
    /// even when a later venue call fails; that failure is then returned and
    /// the interval blocks an immediate retry.
    pub fn rebalance(&self, caller: &AccountId) -> CustodyResult<RebalanceReport> {
        let report = self.run(|core, now| {
            let TreasuryCore { state, logic } = core;
            state.roles.ensure(caller, Role::Rebalancer)?;
            state.emergency.ensure_active()?;

            let report = state.rebalancer.rebalance_with(
                now,
                self.feed.as_ref(),
                self.venue.as_ref(),
                |holdings| logic.plan_rebalance(holdings),
            )?;
            for adjustment in &report.adjustments {
                let verb = match adjustment.direction {
                    Direction::Reduce => "reduce",
                    Direction::Increase => "increase",
                };
                state.ledger.record_transaction(RecordDraft {
                    kind: RecordKind::Rebalance,
                    asset: adjustment.asset.clone(),
                    amount: adjustment.amount,
                    category: None,
                    description: format!(
                        "rebalance: {verb} {} from {} to {}",
                        adjustment.asset, adjustment.before, adjustment.after
                    ),
                    initiator: caller.clone(),
                    timestamp: now,
                })?;
            }
            Ok(report)
        })?;

        if let Some(halt) = &report.halted {
            warn!(
                asset = %halt.adjustment.asset,
                executed = report.adjustments.len(),
                skipped = halt.skipped,
                error = %halt.error,
                "Rebalance halted; executed adjustments committed"
            );
            return Err(halt.error.clone());
        }
        Ok(report)
    }

    pub fn register_asset(&self, caller: &AccountId, config: AssetConfig) -> CustodyResult<()> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.rebalancer.register_asset(config)
        })
    }

    pub fn set_asset_active(
        &self,
        caller: &AccountId,
        asset: &AssetId,
        active: bool,
    ) -> CustodyResult<()> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.rebalancer.set_asset_active(asset, active)
        })
    }

    pub fn set_rebalance_interval(&self, caller: &AccountId, interval_secs: u64) -> CustodyResult<()> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.rebalancer.set_interval(interval_secs)
        })
    }

    pub fn set_max_valuation_age(&self, caller: &AccountId, max_age_secs: u64) -> CustodyResult<()> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.rebalancer.set_max_valuation_age(max_age_secs)
        })
    }

    // --- Emergency control ---

    pub fn pause(&self, caller: &AccountId, reason: &str) -> CustodyResult<()> {
        self.run(|core, now| {
            core.state.roles.ensure(caller, Role::Emergency)?;
            core.state.emergency.pause(caller, reason, now)
        })
    }

    pub fn unpause(&self, caller: &AccountId) -> CustodyResult<()> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.emergency.unpause(caller)
        })
    }

    /// Move funds out while paused, bypassing category balances.
    pub fn emergency_withdraw(
        &self,
        caller: &AccountId,
        asset: &AssetId,
        amount: u64,
        recipient: &AccountId,
    ) -> CustodyResult<FinancialRecord> {
        self.run(|core, now| {
            let state = &mut core.state;
            state.roles.ensure(caller, Role::Emergency)?;
            state.emergency.ensure_paused()?;
            if amount == 0 {
                return Err(CustodyError::InvalidAmount(
                    "withdrawal amount must be positive".into(),
                ));
            }
            if recipient.is_empty() {
                return Err(CustodyError::InvalidDestination);
            }
            let handle = self.assets.get(asset)?;

            let record = state.ledger.record_transaction(RecordDraft {
                kind: RecordKind::EmergencyWithdrawal,
                asset: asset.clone(),
                amount,
                category: None,
                description: format!("emergency withdrawal to {recipient}"),
                initiator: caller.clone(),
                timestamp: now,
            })?;
            state.emit(TreasuryEvent::EmergencyWithdrawal {
                asset: asset.clone(),
                amount,
                recipient: recipient.clone(),
            });

            handle.transfer(recipient, amount)?;
            warn!(asset = %asset, amount, recipient = %recipient, by = %caller, "Emergency withdrawal executed");
            Ok(record)
        })
    }

    // --- Upgrades ---

    /// Install new logic. A layout change requires a migration bridging
    /// exactly the stored and the new layout.
    pub fn upgrade(
        &self,
        caller: &AccountId,
        logic: Arc<dyn TreasuryLogic>,
        migration: Option<&dyn StateMigration>,
    ) -> CustodyResult<LogicDescriptor> {
        self.run(|core, now| {
            core.state.upgrades.ensure_authority(caller)?;
            let to = logic.descriptor();
            migrate_state(&mut core.state, to.layout, migration)?;

            let from = core.state.upgrades.active().clone();
            core.state.upgrades.record(to.clone(), caller.clone(), now);
            core.logic = logic;

            info!(from = %from, to = %to, by = %caller, "Treasury logic upgraded");
            core.state.emit(TreasuryEvent::LogicUpgraded {
                from: from.version,
                to: to.version.clone(),
                layout: to.layout,
            });
            Ok(to)
        })
    }

    pub fn transfer_upgrade_authority(
        &self,
        caller: &AccountId,
        new_authority: AccountId,
    ) -> CustodyResult<()> {
        self.run(|core, _| {
            core.state.upgrades.ensure_authority(caller)?;
            info!(from = %caller, to = %new_authority, "Upgrade authority transferred");
            core.state.upgrades.transfer_authority(new_authority)
        })
    }

    // --- Roles ---

    pub fn grant_role(&self, caller: &AccountId, role: Role, account: AccountId) -> CustodyResult<bool> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            core.state.roles.grant(role, account)
        })
    }

    pub fn revoke_role(&self, caller: &AccountId, role: Role, account: &AccountId) -> CustodyResult<bool> {
        self.run(|core, _| {
            core.state.roles.ensure(caller, Role::Admin)?;
            Ok(core.state.roles.revoke(role, account))
        })
    }

    // --- Queries ---

    pub fn balance(&self, asset: &AssetId, category: Category) -> CustodyResult<u64> {
        self.read(|state| state.ledger.balance(asset, category))
    }

    pub fn balances_for(&self, asset: &AssetId) -> CustodyResult<CategorySplit> {
        self.read(|state| state.ledger.balances_for(asset))
    }

    pub fn records(&self) -> CustodyResult<Vec<FinancialRecord>> {
        self.read(|state| state.ledger.records().to_vec())
    }

    pub fn operation(&self, id: OperationId) -> CustodyResult<Option<ProposedOperation>> {
        self.read(|state| state.auth.operation(id).cloned())
    }

    pub fn pending_operations(&self) -> CustodyResult<Vec<ProposedOperation>> {
        self.read(|state| {
            state
                .auth
                .pending_operations()
                .into_iter()
                .cloned()
                .collect()
        })
    }

    pub fn owners(&self) -> CustodyResult<Vec<OwnerId>> {
        self.read(|state| state.auth.owners().iter().cloned().collect())
    }

    pub fn required(&self) -> CustodyResult<usize> {
        self.read(|state| state.auth.required())
    }

    pub fn required_signatures(&self, value: u64) -> CustodyResult<usize> {
        self.read(|state| state.auth.required_signatures(value))
    }

    pub fn timelocks(&self) -> CustodyResult<Vec<(String, TimelockEntry)>> {
        self.read(|state| {
            state
                .spending
                .timelocks()
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect()
        })
    }

    pub fn is_paused(&self) -> CustodyResult<bool> {
        self.read(|state| state.emergency.is_paused())
    }

    pub fn emergency_state(&self) -> CustodyResult<EmergencyState> {
        self.read(|state| state.emergency.state().clone())
    }

    pub fn active_logic(&self) -> CustodyResult<LogicDescriptor> {
        self.store.read(|core| core.logic.descriptor())
    }

    pub fn upgrade_history(&self) -> CustodyResult<Vec<UpgradeRecord>> {
        self.read(|state| state.upgrades.history().to_vec())
    }

    pub fn upgrade_authority(&self) -> CustodyResult<AccountId> {
        self.read(|state| state.upgrades.authority().clone())
    }

    pub fn has_role(&self, account: &AccountId, role: Role) -> CustodyResult<bool> {
        self.read(|state| state.roles.has(account, role))
    }

    pub fn last_rebalance(&self) -> CustodyResult<Option<DateTime<Utc>>> {
        self.read(|state| state.rebalancer.last_rebalance())
    }

    /// Audit chain, allocation and conservation checks.
    pub fn verify(&self) -> CustodyResult<()> {
        self.read(TreasuryState::verify)?
    }

    /// A copy of the full persistent state.
    pub fn snapshot(&self) -> CustodyResult<TreasuryState> {
        self.read(TreasuryState::clone)
    }
}

/// Carries out the effect of a multi-party operation once it has quorum.
struct OperationDispatch<'a> {
    ledger: &'a mut CategoryLedger,
    spending: &'a mut SpendingController,
    emergency: &'a EmergencyControl,
    logic: &'a dyn TreasuryLogic,
    assets: &'a AssetRegistry,
    gateway: &'a dyn CallGateway,
    now: DateTime<Utc>,
}

impl OperationExecutor for OperationDispatch<'_> {
    fn execute(&mut self, operation: &ProposedOperation) -> CustodyResult<()> {
        self.emergency.ensure_active()?;
        match &operation.payload {
            OperationPayload::Spend(request) => {
                let initiator = AccountId::new(format!("multisig:{}", operation.id));
                let timelocked = self.logic.requires_timelock(self.spending, request.amount);
                self.spending.spend_with(
                    self.ledger,
                    self.assets,
                    request,
                    &initiator,
                    self.now,
                    timelocked,
                )?;
                Ok(())
            }
            OperationPayload::Call { data } => match &operation.destination {
                Destination::Account(account) => self.gateway.call(account, operation.value, data),
                Destination::Engine => Err(CustodyError::InvalidPayload(
                    "calls must target an account".into(),
                )),
            },
            OperationPayload::Governance(_) => Err(CustodyError::InvalidPayload(
                "governance changes are applied by the authorization engine".into(),
            )),
        }
    }
}
