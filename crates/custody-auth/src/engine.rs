use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use custody_types::{CustodyError, CustodyResult, OperationId, OwnerId, TreasuryEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::operation::{
    Destination, ExecutionStatus, GovernanceChange, OperationPayload, ProposedOperation,
};
use crate::owners::OwnerSet;
use crate::tiers::ThresholdTiers;

/// Performs the external effect of a non-governance operation.
///
/// Governance changes are applied by the engine itself and never reach the executor.
pub trait OperationExecutor {
    fn execute(&mut self, operation: &ProposedOperation) -> CustodyResult<()>;
}

impl<F> OperationExecutor for F
where
    F: FnMut(&ProposedOperation) -> CustodyResult<()>,
{
    fn execute(&mut self, operation: &ProposedOperation) -> CustodyResult<()> {
        self(operation)
    }
}

/// Owner registry plus the submit / confirm / revoke / execute pipeline.
///
/// Execution marks the operation executed before the executor runs and rolls
/// the flag back if the executor fails, so a failed call stays retryable and a
/// successful one can never run twice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationEngine {
    owners: OwnerSet,
    tiers: ThresholdTiers,
    operations: BTreeMap<OperationId, ProposedOperation>,
    next_id: u64,
    #[serde(skip)]
    events: Vec<TreasuryEvent>,
}

impl AuthorizationEngine {
    pub fn new(owners: OwnerSet, tiers: ThresholdTiers) -> Self {
        Self {
            owners,
            tiers,
            operations: BTreeMap::new(),
            next_id: 0,
            events: Vec::new(),
        }
    }

    pub fn owners(&self) -> &OwnerSet {
        &self.owners
    }

    pub fn required(&self) -> usize {
        self.owners.required()
    }

    pub fn tiers(&self) -> &ThresholdTiers {
        &self.tiers
    }

    pub fn required_signatures(&self, value: u64) -> usize {
        self.tiers.required_signatures(value, &self.owners)
    }

    /// Confirmations `op` needs before it may execute.
    ///
    /// Governance changes carry no value, so they never drop below the
    /// default quorum even when a low-value tier asks for fewer signatures.
    pub fn required_for(&self, op: &ProposedOperation) -> usize {
        let tiered = self.tiers.required_signatures(op.value, &self.owners);
        match op.payload {
            OperationPayload::Governance(_) => tiered.max(self.owners.required()),
            _ => tiered,
        }
    }

    pub fn operation(&self, id: OperationId) -> Option<&ProposedOperation> {
        self.operations.get(&id)
    }

    pub fn operations(&self) -> impl Iterator<Item = &ProposedOperation> {
        self.operations.values()
    }

    pub fn pending_operations(&self) -> Vec<&ProposedOperation> {
        self.operations.values().filter(|op| !op.executed).collect()
    }

    /// Confirmations from owners that are still registered.
    pub fn confirmation_count(&self, id: OperationId) -> CustodyResult<usize> {
        let op = self.get(id)?;
        Ok(self.count_current(&op.confirmations))
    }

    /// Events produced since the last drain.
    pub fn drain_events(&mut self) -> Vec<TreasuryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Propose an operation; the proposer's confirmation is recorded and
    /// execution is attempted right away.
    pub fn submit(
        &mut self,
        proposer: &OwnerId,
        destination: Destination,
        value: u64,
        payload: OperationPayload,
        now: DateTime<Utc>,
        executor: &mut dyn OperationExecutor,
    ) -> CustodyResult<(OperationId, ExecutionStatus)> {
        if let Err(err) = self.owners.ensure_owner(proposer) {
            warn!(proposer = %proposer, "Submission rejected: not an owner");
            return Err(err);
        }
        payload.validate_for(&destination, value)?;

        let id = OperationId(self.next_id);
        self.next_id += 1;

        let mut confirmations = BTreeSet::new();
        confirmations.insert(proposer.clone());
        self.operations.insert(
            id,
            ProposedOperation {
                id,
                destination,
                value,
                payload,
                proposer: proposer.clone(),
                confirmations,
                executed: false,
                submitted_at: now,
                executed_at: None,
            },
        );

        info!(operation = %id, proposer = %proposer, value, "Operation submitted");
        self.events.push(TreasuryEvent::OperationSubmitted {
            id,
            proposer: proposer.clone(),
            value,
        });

        let status = self.try_execute(id, now, executor)?;
        Ok((id, status))
    }

    /// Add `owner`'s confirmation and attempt execution.
    pub fn confirm(
        &mut self,
        id: OperationId,
        owner: &OwnerId,
        now: DateTime<Utc>,
        executor: &mut dyn OperationExecutor,
    ) -> CustodyResult<ExecutionStatus> {
        if let Err(err) = self.owners.ensure_owner(owner) {
            warn!(operation = %id, owner = %owner, "Confirmation rejected: not an owner");
            return Err(err);
        }
        let op = self.get_mut(id)?;
        if op.executed {
            return Err(CustodyError::AlreadyExecuted(id));
        }
        if !op.confirmations.insert(owner.clone()) {
            return Err(CustodyError::AlreadyConfirmed {
                operation: id,
                owner: owner.clone(),
            });
        }

        debug!(operation = %id, owner = %owner, "Confirmation recorded");
        self.events.push(TreasuryEvent::OperationConfirmed {
            id,
            owner: owner.clone(),
        });

        self.try_execute(id, now, executor)
    }

    /// Withdraw a prior confirmation.
    pub fn revoke(&mut self, id: OperationId, owner: &OwnerId) -> CustodyResult<()> {
        self.owners.ensure_owner(owner)?;
        let op = self.get_mut(id)?;
        if op.executed {
            return Err(CustodyError::AlreadyExecuted(id));
        }
        if !op.confirmations.remove(owner) {
            return Err(CustodyError::NotConfirmed {
                operation: id,
                owner: owner.clone(),
            });
        }

        info!(operation = %id, owner = %owner, "Confirmation revoked");
        self.events.push(TreasuryEvent::ConfirmationRevoked {
            id,
            owner: owner.clone(),
        });
        Ok(())
    }

    /// Explicit execution attempt. Fails with `QuorumNotMet` when the
    /// operation lacks confirmations.
    pub fn attempt_execute(
        &mut self,
        id: OperationId,
        now: DateTime<Utc>,
        executor: &mut dyn OperationExecutor,
    ) -> CustodyResult<ExecutionStatus> {
        let op = self.get(id)?;
        if op.executed {
            return Err(CustodyError::AlreadyExecuted(id));
        }
        match self.try_execute(id, now, executor)? {
            ExecutionStatus::Pending {
                confirmations,
                required,
            } => Err(CustodyError::QuorumNotMet {
                operation: id,
                confirmations,
                required,
            }),
            status => Ok(status),
        }
    }

    fn try_execute(
        &mut self,
        id: OperationId,
        now: DateTime<Utc>,
        executor: &mut dyn OperationExecutor,
    ) -> CustodyResult<ExecutionStatus> {
        let op = self.get(id)?;
        let required = self.required_for(op);
        let confirmations = self.count_current(&op.confirmations);
        if confirmations < required {
            debug!(operation = %id, confirmations, required, "Quorum not yet reached");
            return Ok(ExecutionStatus::Pending {
                confirmations,
                required,
            });
        }

        // Effects before interaction: the flag is set before the executor can observe anything.
        let op = self.get_mut(id)?;
        op.executed = true;
        op.executed_at = Some(now);
        let operation = op.clone();

        let outcome = match &operation.payload {
            OperationPayload::Governance(change) => self.apply_governance(change),
            _ => executor.execute(&operation),
        };

        match outcome {
            Ok(()) => {
                info!(
                    operation = %id,
                    destination = %operation.destination,
                    value = operation.value,
                    confirmations,
                    required,
                    "Operation executed"
                );
                self.events.push(TreasuryEvent::OperationExecuted { id });
                Ok(ExecutionStatus::Executed)
            }
            Err(err) => {
                let op = self.get_mut(id)?;
                op.executed = false;
                op.executed_at = None;
                let reason = err.to_string();
                warn!(operation = %id, reason = %reason, "Operation execution failed; left retryable");
                self.events.push(TreasuryEvent::OperationExecutionFailed {
                    id,
                    reason: reason.clone(),
                });
                Ok(ExecutionStatus::Failed { reason })
            }
        }
    }

    fn apply_governance(&mut self, change: &GovernanceChange) -> CustodyResult<()> {
        match change {
            GovernanceChange::AddOwner { owner } => {
                self.owners.add(owner.clone())?;
                self.events.push(TreasuryEvent::OwnerAdded {
                    owner: owner.clone(),
                });
            }
            GovernanceChange::RemoveOwner { owner } => {
                if let Some(required) = self.owners.remove(owner)? {
                    self.events
                        .push(TreasuryEvent::RequirementChanged { required });
                }
                self.events.push(TreasuryEvent::OwnerRemoved {
                    owner: owner.clone(),
                });
            }
            GovernanceChange::ReplaceOwner { old, new } => {
                self.owners.replace(old, new.clone())?;
                self.events.push(TreasuryEvent::OwnerRemoved { owner: old.clone() });
                self.events.push(TreasuryEvent::OwnerAdded { owner: new.clone() });
            }
            GovernanceChange::ChangeRequirement { required } => {
                self.owners.change_requirement(*required)?;
                self.events.push(TreasuryEvent::RequirementChanged {
                    required: *required,
                });
            }
            GovernanceChange::SetThresholdTiers { tiers } => {
                self.tiers = ThresholdTiers::new(tiers.iter().copied())?;
                self.events.push(TreasuryEvent::ThresholdTiersChanged {
                    tiers: self.tiers.len(),
                });
            }
        }
        info!(change = ?change, owners = self.owners.len(), required = self.owners.required(), "Governance change applied");
        Ok(())
    }

    fn count_current(&self, confirmations: &BTreeSet<OwnerId>) -> usize {
        confirmations
            .iter()
            .filter(|owner| self.owners.contains(owner))
            .count()
    }

    fn get(&self, id: OperationId) -> CustodyResult<&ProposedOperation> {
        self.operations
            .get(&id)
            .ok_or(CustodyError::UnknownOperation(id))
    }

    fn get_mut(&mut self, id: OperationId) -> CustodyResult<&mut ProposedOperation> {
        self.operations
            .get_mut(&id)
            .ok_or(CustodyError::UnknownOperation(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::ThresholdTier;
    use chrono::TimeZone;
    use custody_types::{Category, SpendRequest};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name)
    }

    fn engine() -> AuthorizationEngine {
        let owners = OwnerSet::new(["alice", "bob", "carol", "dave"].map(OwnerId::new), 3).unwrap();
        let tiers = ThresholdTiers::new([
            ThresholdTier::new(1_000, 2),
            ThresholdTier::new(10_000, 4),
        ])
        .unwrap();
        AuthorizationEngine::new(owners, tiers)
    }

    fn spend(amount: u64) -> (Destination, u64, OperationPayload) {
        (
            Destination::account("vendor"),
            amount,
            OperationPayload::Spend(SpendRequest::new(
                Category::Operations,
                "USDC",
                amount,
                "vendor",
                "invoice",
            )),
        )
    }

    fn counting() -> impl FnMut(&ProposedOperation) -> CustodyResult<()> {
        |_op: &ProposedOperation| Ok(())
    }

    #[test]
    fn small_spend_executes_on_second_confirmation() {
        let mut engine = engine();
        let mut calls = 0;
        let mut exec = |_op: &ProposedOperation| {
            calls += 1;
            Ok(())
        };
        let (dest, value, payload) = spend(5_000);
        let (id, status) = engine
            .submit(&owner("alice"), dest, value, payload, now(), &mut exec)
            .unwrap();
        assert_eq!(
            status,
            ExecutionStatus::Pending {
                confirmations: 1,
                required: 2
            }
        );

        let status = engine.confirm(id, &owner("bob"), now(), &mut exec).unwrap();
        assert!(status.is_executed());
        assert!(engine.operation(id).unwrap().executed);
        assert_eq!(calls, 1);
    }

    #[test]
    fn late_confirmation_rejected_after_execution() {
        let mut engine = engine();
        let mut exec = counting();
        let (dest, value, payload) = spend(5_000);
        let (id, _) = engine
            .submit(&owner("alice"), dest, value, payload, now(), &mut exec)
            .unwrap();
        engine.confirm(id, &owner("bob"), now(), &mut exec).unwrap();

        assert_eq!(
            engine.confirm(id, &owner("carol"), now(), &mut exec),
            Err(CustodyError::AlreadyExecuted(id))
        );
        assert_eq!(
            engine.attempt_execute(id, now(), &mut exec),
            Err(CustodyError::AlreadyExecuted(id))
        );
    }

    #[test]
    fn duplicate_and_foreign_confirmations_rejected() {
        let mut engine = engine();
        let mut exec = counting();
        let (dest, value, payload) = spend(50_000);
        let (id, _) = engine
            .submit(&owner("alice"), dest, value, payload, now(), &mut exec)
            .unwrap();

        assert!(matches!(
            engine.confirm(id, &owner("alice"), now(), &mut exec),
            Err(CustodyError::AlreadyConfirmed { .. })
        ));
        assert!(matches!(
            engine.confirm(id, &owner("mallory"), now(), &mut exec),
            Err(CustodyError::NotAnOwner(_))
        ));
        assert!(matches!(
            engine.confirm(OperationId(99), &owner("bob"), now(), &mut exec),
            Err(CustodyError::UnknownOperation(_))
        ));
    }

    #[test]
    fn unregistered_proposer_rejected() {
        let mut engine = engine();
        let (dest, value, payload) = spend(10);
        let err = engine
            .submit(&owner("mallory"), dest, value, payload, now(), &mut counting())
            .unwrap_err();
        assert_eq!(err, CustodyError::NotAnOwner(owner("mallory")));
        assert!(engine.operations().next().is_none());
    }

    #[test]
    fn failed_execution_rolls_back_and_is_retryable() {
        let mut engine = engine();
        let mut failing =
            |_op: &ProposedOperation| Err(CustodyError::TransferFailed {
                asset: "USDC".into(),
                reason: "rail offline".into(),
            });
        let (dest, value, payload) = spend(5_000);
        let (id, _) = engine
            .submit(&owner("alice"), dest, value, payload, now(), &mut failing)
            .unwrap();
        let status = engine.confirm(id, &owner("bob"), now(), &mut failing).unwrap();
        assert!(matches!(status, ExecutionStatus::Failed { .. }));
        assert!(!engine.operation(id).unwrap().executed);
        assert_eq!(engine.confirmation_count(id).unwrap(), 2);

        let status = engine.attempt_execute(id, now(), &mut counting()).unwrap();
        assert!(status.is_executed());
    }

    #[test]
    fn executor_sees_operation_already_marked_executed() {
        let mut engine = engine();
        let mut observed = None;
        let mut exec = |op: &ProposedOperation| {
            observed = Some(op.executed);
            Ok(())
        };
        let (dest, value, payload) = spend(5_000);
        let (id, _) = engine
            .submit(&owner("alice"), dest, value, payload, now(), &mut exec)
            .unwrap();
        engine.confirm(id, &owner("bob"), now(), &mut exec).unwrap();
        assert_eq!(observed, Some(true));
    }

    #[test]
    fn explicit_execute_below_quorum_fails() {
        let mut engine = engine();
        let (dest, value, payload) = spend(50_000);
        let (id, _) = engine
            .submit(&owner("alice"), dest, value, payload, now(), &mut counting())
            .unwrap();
        assert_eq!(
            engine.attempt_execute(id, now(), &mut counting()),
            Err(CustodyError::QuorumNotMet {
                operation: id,
                confirmations: 1,
                required: 4
            })
        );
    }

    #[test]
    fn revoke_drops_confirmation() {
        let mut engine = engine();
        let mut exec = counting();
        let (dest, value, payload) = spend(50_000);
        let (id, _) = engine
            .submit(&owner("alice"), dest, value, payload, now(), &mut exec)
            .unwrap();
        engine.confirm(id, &owner("bob"), now(), &mut exec).unwrap();
        engine.revoke(id, &owner("bob")).unwrap();
        assert_eq!(engine.confirmation_count(id).unwrap(), 1);
        assert!(matches!(
            engine.revoke(id, &owner("bob")),
            Err(CustodyError::NotConfirmed { .. })
        ));
    }

    #[test]
    fn governance_changes_need_quorum() {
        let mut engine = engine();
        let mut exec = counting();
        let change = OperationPayload::Governance(GovernanceChange::AddOwner {
            owner: owner("erin"),
        });
        let (id, status) = engine
            .submit(&owner("alice"), Destination::Engine, 0, change, now(), &mut exec)
            .unwrap();
        assert!(status.is_pending());
        assert!(!engine.owners().contains(&owner("erin")));

        engine.confirm(id, &owner("bob"), now(), &mut exec).unwrap();
        let status = engine.confirm(id, &owner("carol"), now(), &mut exec).unwrap();
        assert!(status.is_executed());
        assert!(engine.owners().contains(&owner("erin")));
        assert_eq!(engine.owners().len(), 5);
    }

    #[test]
    fn governance_ignores_low_value_tier() {
        let owners = OwnerSet::new(["alice", "bob", "carol", "dave"].map(OwnerId::new), 3).unwrap();
        let tiers = ThresholdTiers::new([ThresholdTier::new(0, 1)]).unwrap();
        let mut engine = AuthorizationEngine::new(owners, tiers);
        let mut exec = counting();

        let (dest, value, payload) = spend(500);
        let (_, status) = engine
            .submit(&owner("alice"), dest, value, payload, now(), &mut exec)
            .unwrap();
        assert!(status.is_executed());

        let change = OperationPayload::Governance(GovernanceChange::SetThresholdTiers {
            tiers: vec![ThresholdTier::new(0, 1)],
        });
        let (id, status) = engine
            .submit(&owner("alice"), Destination::Engine, 0, change, now(), &mut exec)
            .unwrap();
        assert_eq!(
            status,
            ExecutionStatus::Pending {
                confirmations: 1,
                required: 3
            }
        );
        assert_eq!(engine.required_for(engine.operation(id).unwrap()), 3);
        assert!(engine.confirm(id, &owner("bob"), now(), &mut exec).unwrap().is_pending());
        assert!(engine
            .confirm(id, &owner("carol"), now(), &mut exec)
            .unwrap()
            .is_executed());
    }

    #[test]
    fn removing_owners_lowers_requirement_via_pipeline() {
        let owners = OwnerSet::new(["alice", "bob"].map(OwnerId::new), 2).unwrap();
        let mut engine = AuthorizationEngine::new(owners, ThresholdTiers::default());
        let mut exec = counting();
        let change = OperationPayload::Governance(GovernanceChange::RemoveOwner {
            owner: owner("bob"),
        });
        let (id, _) = engine
            .submit(&owner("alice"), Destination::Engine, 0, change, now(), &mut exec)
            .unwrap();
        engine.confirm(id, &owner("bob"), now(), &mut exec).unwrap();
        assert_eq!(engine.owners().len(), 1);
        assert_eq!(engine.required(), 1);
        let events = engine.drain_events();
        assert!(events.contains(&TreasuryEvent::RequirementChanged { required: 1 }));
    }

    #[test]
    fn invalid_governance_change_fails_without_side_effects() {
        let mut engine = engine();
        let mut exec = counting();
        let change = OperationPayload::Governance(GovernanceChange::ChangeRequirement {
            required: 9,
        });
        let (id, _) = engine
            .submit(&owner("alice"), Destination::Engine, 0, change, now(), &mut exec)
            .unwrap();
        engine.confirm(id, &owner("bob"), now(), &mut exec).unwrap();
        let status = engine.confirm(id, &owner("carol"), now(), &mut exec).unwrap();
        assert!(matches!(status, ExecutionStatus::Failed { .. }));
        assert_eq!(engine.required(), 3);
        assert!(!engine.operation(id).unwrap().executed);
    }

    #[test]
    fn removed_owner_confirmations_stop_counting() {
        let mut engine = engine();
        let mut exec = counting();
        let (dest, value, payload) = spend(50_000);
        let (spend_id, _) = engine
            .submit(&owner("alice"), dest, value, payload, now(), &mut exec)
            .unwrap();
        engine.confirm(spend_id, &owner("dave"), now(), &mut exec).unwrap();
        assert_eq!(engine.confirmation_count(spend_id).unwrap(), 2);

        let change = OperationPayload::Governance(GovernanceChange::ReplaceOwner {
            old: owner("dave"),
            new: owner("erin"),
        });
        let (gov, _) = engine
            .submit(&owner("alice"), Destination::Engine, 0, change, now(), &mut exec)
            .unwrap();
        engine.confirm(gov, &owner("bob"), now(), &mut exec).unwrap();
        engine.confirm(gov, &owner("carol"), now(), &mut exec).unwrap();

        assert_eq!(engine.confirmation_count(spend_id).unwrap(), 1);
    }
}
