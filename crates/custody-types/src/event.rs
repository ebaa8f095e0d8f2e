//! Domain events consumed by off-line monitoring and audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AccountId, AssetId, Category, OperationId, OwnerId, Role};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TreasuryEvent {
    RevenueReceived {
        asset: AssetId,
        amount: u64,
        from: AccountId,
        description: String,
    },
    FundsDistributed {
        category: Category,
        asset: AssetId,
        amount: u64,
    },
    AssetRebalanced {
        asset: AssetId,
        before: u64,
        after: u64,
    },
    TransactionRecorded {
        id: String,
        category: Option<Category>,
        amount: u64,
    },
    EmergencyWithdrawal {
        asset: AssetId,
        amount: u64,
        recipient: AccountId,
    },
    AllocationConfigUpdated {
        operations_bps: u32,
        reserves_bps: u32,
        upgrades_bps: u32,
        profits_bps: u32,
    },
    OperationSubmitted {
        id: OperationId,
        proposer: OwnerId,
        value: u64,
    },
    OperationConfirmed {
        id: OperationId,
        owner: OwnerId,
    },
    ConfirmationRevoked {
        id: OperationId,
        owner: OwnerId,
    },
    OperationExecuted {
        id: OperationId,
    },
    OperationExecutionFailed {
        id: OperationId,
        reason: String,
    },
    OwnerAdded {
        owner: OwnerId,
    },
    OwnerRemoved {
        owner: OwnerId,
    },
    RequirementChanged {
        required: usize,
    },
    ThresholdTiersChanged {
        tiers: usize,
    },
    TimelockScheduled {
        key: String,
        asset: AssetId,
        amount: u64,
        matures_at: DateTime<Utc>,
    },
    TimelockExecuted {
        key: String,
    },
    TimelockCancelled {
        key: String,
    },
    Paused {
        by: AccountId,
        reason: String,
    },
    Unpaused {
        by: AccountId,
    },
    LogicUpgraded {
        from: String,
        to: String,
        layout: u32,
    },
    RoleGranted {
        role: Role,
        account: AccountId,
    },
    RoleRevoked {
        role: Role,
        account: AccountId,
    },
}

impl TreasuryEvent {
    /// Stable short name, used as the `tracing` message for the event.
    pub fn name(&self) -> &'static str {
        match self {
            TreasuryEvent::RevenueReceived { .. } => "revenue_received",
            TreasuryEvent::FundsDistributed { .. } => "funds_distributed",
            TreasuryEvent::AssetRebalanced { .. } => "asset_rebalanced",
            TreasuryEvent::TransactionRecorded { .. } => "transaction_recorded",
            TreasuryEvent::EmergencyWithdrawal { .. } => "emergency_withdrawal",
            TreasuryEvent::AllocationConfigUpdated { .. } => "allocation_config_updated",
            TreasuryEvent::OperationSubmitted { .. } => "operation_submitted",
            TreasuryEvent::OperationConfirmed { .. } => "operation_confirmed",
            TreasuryEvent::ConfirmationRevoked { .. } => "confirmation_revoked",
            TreasuryEvent::OperationExecuted { .. } => "operation_executed",
            TreasuryEvent::OperationExecutionFailed { .. } => "operation_execution_failed",
            TreasuryEvent::OwnerAdded { .. } => "owner_added",
            TreasuryEvent::OwnerRemoved { .. } => "owner_removed",
            TreasuryEvent::RequirementChanged { .. } => "requirement_changed",
            TreasuryEvent::ThresholdTiersChanged { .. } => "threshold_tiers_changed",
            TreasuryEvent::TimelockScheduled { .. } => "timelock_scheduled",
            TreasuryEvent::TimelockExecuted { .. } => "timelock_executed",
            TreasuryEvent::TimelockCancelled { .. } => "timelock_cancelled",
            TreasuryEvent::Paused { .. } => "paused",
            TreasuryEvent::Unpaused { .. } => "unpaused",
            TreasuryEvent::LogicUpgraded { .. } => "logic_upgraded",
            TreasuryEvent::RoleGranted { .. } => "role_granted",
            TreasuryEvent::RoleRevoked { .. } => "role_revoked",
        }
    }
}
