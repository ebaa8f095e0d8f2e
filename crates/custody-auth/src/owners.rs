use std::collections::BTreeSet;

use custody_types::{CustodyError, CustodyResult, OwnerId};
use serde::{Deserialize, Serialize};

/// Upper bound on registered co-signers.
pub const MAX_OWNERS: usize = 20;

/// Registered co-signers and the default quorum size.
///
/// Invariant: `1 <= required <= owners.len() <= MAX_OWNERS`. Every mutator
/// validates before touching state, so a rejected change leaves the set as it was.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSet {
    owners: BTreeSet<OwnerId>,
    required: usize,
}

impl OwnerSet {
    pub fn new(owners: impl IntoIterator<Item = OwnerId>, required: usize) -> CustodyResult<Self> {
        let mut set = BTreeSet::new();
        for owner in owners {
            if owner.is_empty() {
                return Err(CustodyError::InvalidOwnerChange("empty owner id".into()));
            }
            if !set.insert(owner.clone()) {
                return Err(CustodyError::InvalidOwnerChange(format!(
                    "duplicate owner {owner}"
                )));
            }
        }
        check_bounds(set.len(), required)?;
        Ok(Self {
            owners: set,
            required,
        })
    }

    pub fn contains(&self, owner: &OwnerId) -> bool {
        self.owners.contains(owner)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn iter(&self) -> impl Iterator<Item = &OwnerId> {
        self.owners.iter()
    }

    pub fn ensure_owner(&self, owner: &OwnerId) -> CustodyResult<()> {
        if self.contains(owner) {
            Ok(())
        } else {
            Err(CustodyError::NotAnOwner(owner.clone()))
        }
    }

    pub fn add(&mut self, owner: OwnerId) -> CustodyResult<()> {
        if owner.is_empty() {
            return Err(CustodyError::InvalidOwnerChange("empty owner id".into()));
        }
        if self.contains(&owner) {
            return Err(CustodyError::InvalidOwnerChange(format!(
                "{owner} is already an owner"
            )));
        }
        if self.owners.len() >= MAX_OWNERS {
            return Err(CustodyError::InvalidOwnerChange(format!(
                "owner limit of {MAX_OWNERS} reached"
            )));
        }
        self.owners.insert(owner);
        Ok(())
    }

    /// Remove an owner. Lowers `required` when it would exceed the remaining owner count.
    ///
    /// Returns the new `required` if it changed.
    pub fn remove(&mut self, owner: &OwnerId) -> CustodyResult<Option<usize>> {
        self.ensure_owner(owner)?;
        if self.owners.len() == 1 {
            return Err(CustodyError::InvalidOwnerChange(
                "cannot remove the last owner".into(),
            ));
        }
        self.owners.remove(owner);
        if self.required > self.owners.len() {
            self.required = self.owners.len();
            return Ok(Some(self.required));
        }
        Ok(None)
    }

    pub fn replace(&mut self, old: &OwnerId, new: OwnerId) -> CustodyResult<()> {
        self.ensure_owner(old)?;
        if new.is_empty() {
            return Err(CustodyError::InvalidOwnerChange("empty owner id".into()));
        }
        if self.contains(&new) {
            return Err(CustodyError::InvalidOwnerChange(format!(
                "{new} is already an owner"
            )));
        }
        self.owners.remove(old);
        self.owners.insert(new);
        Ok(())
    }

    pub fn change_requirement(&mut self, required: usize) -> CustodyResult<()> {
        check_bounds(self.owners.len(), required)?;
        self.required = required;
        Ok(())
    }
}

fn check_bounds(owners: usize, required: usize) -> CustodyResult<()> {
    if owners == 0 || owners > MAX_OWNERS {
        return Err(CustodyError::InvalidOwnerChange(format!(
            "owner count {owners} outside 1..={MAX_OWNERS}"
        )));
    }
    if required == 0 || required > owners {
        return Err(CustodyError::InvalidOwnerChange(format!(
            "required {required} outside 1..={owners}"
        )));
    }
    Ok(())
}
