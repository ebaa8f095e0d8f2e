#![deny(unsafe_code)]
//! Multi-party transaction authorization.
//!
//! This crate provides:
//! - the co-signer set with its quorum size ([`OwnerSet`])
//! - value-scaled signature requirements ([`ThresholdTiers`])
//! - proposed operations and their payloads ([`ProposedOperation`], [`OperationPayload`])
//! - the submit / confirm / revoke / execute pipeline ([`AuthorizationEngine`])
//!
//! Owner-set and tier changes are ordinary operations with a
//! [`GovernanceChange`] payload targeting the engine itself, so they pass
//! through exactly the same quorum rules as fund movements.

pub mod engine;
pub mod operation;
pub mod owners;
pub mod tiers;

pub use engine::{AuthorizationEngine, OperationExecutor};
pub use operation::{
    Destination, ExecutionStatus, GovernanceChange, OperationPayload, ProposedOperation,
};
pub use owners::{OwnerSet, MAX_OWNERS};
pub use tiers::{ThresholdTier, ThresholdTiers};
