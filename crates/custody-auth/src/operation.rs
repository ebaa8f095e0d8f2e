use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use custody_types::{AccountId, CustodyError, CustodyResult, OperationId, OwnerId, SpendRequest};
use serde::{Deserialize, Serialize};

use crate::tiers::ThresholdTier;

/// Where an operation's effect lands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "account", rename_all = "snake_case")]
pub enum Destination {
    /// The authorization engine itself (governance changes).
    Engine,
    Account(AccountId),
}

impl Destination {
    pub fn account(id: impl Into<AccountId>) -> Self {
        Destination::Account(id.into())
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Engine => f.write_str("engine"),
            Destination::Account(id) => write!(f, "{id}"),
        }
    }
}

/// Changes to the authorization engine's own configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum GovernanceChange {
    AddOwner { owner: OwnerId },
    RemoveOwner { owner: OwnerId },
    ReplaceOwner { old: OwnerId, new: OwnerId },
    ChangeRequirement { required: usize },
    SetThresholdTiers { tiers: Vec<ThresholdTier> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationPayload {
    Governance(GovernanceChange),
    /// Category spend executed by the spending controller.
    Spend(SpendRequest),
    /// Opaque call forwarded to the external call gateway.
    Call { data: Vec<u8> },
}

impl OperationPayload {
    /// Check the payload fits `destination` and `value`.
    pub fn validate_for(&self, destination: &Destination, value: u64) -> CustodyResult<()> {
        if let Destination::Account(account) = destination {
            if account.is_empty() {
                return Err(CustodyError::InvalidDestination);
            }
        }
        match (self, destination) {
            (OperationPayload::Governance(_), Destination::Engine) => {
                if value != 0 {
                    return Err(CustodyError::InvalidPayload(
                        "governance changes carry no value".into(),
                    ));
                }
                Ok(())
            }
            (OperationPayload::Governance(_), Destination::Account(_)) => Err(
                CustodyError::InvalidPayload("governance changes must target the engine".into()),
            ),
            (OperationPayload::Spend(request), Destination::Account(account)) => {
                request.validate()?;
                if &request.recipient != account {
                    return Err(CustodyError::InvalidPayload(format!(
                        "spend recipient {} differs from destination {account}",
                        request.recipient
                    )));
                }
                if request.amount != value {
                    return Err(CustodyError::InvalidPayload(format!(
                        "spend amount {} differs from operation value {value}",
                        request.amount
                    )));
                }
                Ok(())
            }
            (OperationPayload::Call { .. }, Destination::Account(_)) => Ok(()),
            (_, Destination::Engine) => Err(CustodyError::InvalidPayload(
                "only governance changes may target the engine".into(),
            )),
        }
    }
}

/// A candidate operation collecting confirmations.
///
/// Only `confirmations`, `executed` and `executed_at` change after submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedOperation {
    pub id: OperationId,
    pub destination: Destination,
    pub value: u64,
    pub payload: OperationPayload,
    pub proposer: OwnerId,
    pub confirmations: BTreeSet<OwnerId>,
    pub executed: bool,
    pub submitted_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl ProposedOperation {
    pub fn is_confirmed_by(&self, owner: &OwnerId) -> bool {
        self.confirmations.contains(owner)
    }
}

/// Outcome of an execution attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending {
        confirmations: usize,
        required: usize,
    },
    Executed,
    /// Quorum was met but the call failed; the operation stays retryable.
    Failed {
        reason: String,
    },
}

impl ExecutionStatus {
    pub fn is_executed(&self) -> bool {
        matches!(self, ExecutionStatus::Executed)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ExecutionStatus::Pending { .. })
    }
}
