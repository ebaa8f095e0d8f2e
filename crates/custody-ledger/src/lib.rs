#![deny(unsafe_code)]
//! Categorized revenue ledger and spending controls.
//!
//! - [`AllocationConfig`]: basis-point split of incoming revenue
//! - [`CategoryBalances`]: per-asset, per-category balances with conservation totals
//! - [`AuditTrail`]: append-only, BLAKE3 hash-chained [`FinancialRecord`]s
//! - [`CategoryLedger`]: revenue distribution over the three pieces above
//! - [`SpendingController`]: immediate and timelocked category spends
//! - [`AssetTransfer`] / [`AssetRegistry`]: the transfer boundary every managed asset satisfies

pub mod allocation;
pub mod asset;
pub mod audit;
pub mod balances;
pub mod ledger;
pub mod spending;

pub use allocation::AllocationConfig;
pub use asset::{AssetRegistry, AssetTransfer, InMemoryAsset};
pub use audit::{AuditTrail, FinancialRecord, RecordDraft, RecordKind};
pub use balances::{AssetTotals, CategoryBalances};
pub use ledger::CategoryLedger;
pub use spending::{timelock_key, SpendOutcome, SpendingController, TimelockEntry};
