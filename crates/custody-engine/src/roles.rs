use std::collections::{BTreeMap, BTreeSet};

use custody_types::{AccountId, CustodyError, CustodyResult, Role, TreasuryEvent};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Role grants for the administrative surface.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRegistry {
    grants: BTreeMap<Role, BTreeSet<AccountId>>,
    #[serde(skip)]
    events: Vec<TreasuryEvent>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, account: &AccountId, role: Role) -> bool {
        self.grants
            .get(&role)
            .is_some_and(|members| members.contains(account))
    }

    pub fn ensure(&self, account: &AccountId, role: Role) -> CustodyResult<()> {
        if self.has(account, role) {
            return Ok(());
        }
        warn!(caller = %account, role = %role, "Unauthorized call rejected");
        Err(CustodyError::Unauthorized {
            caller: account.clone(),
            role,
        })
    }

    pub fn members(&self, role: Role) -> impl Iterator<Item = &AccountId> {
        self.grants.get(&role).into_iter().flatten()
    }

    /// Returns `false` if the account already held the role.
    pub fn grant(&mut self, role: Role, account: AccountId) -> CustodyResult<bool> {
        if role == Role::UpgradeAuthority {
            return Err(CustodyError::InvalidPayload(
                "the upgrade authority is transferred, not granted".into(),
            ));
        }
        if account.is_empty() {
            return Err(CustodyError::InvalidDestination);
        }
        let added = self.grants.entry(role).or_default().insert(account.clone());
        if added {
            info!(role = %role, account = %account, "Role granted");
            self.events.push(TreasuryEvent::RoleGranted { role, account });
        }
        Ok(added)
    }

    /// Returns `false` if the account did not hold the role.
    pub fn revoke(&mut self, role: Role, account: &AccountId) -> bool {
        let removed = self
            .grants
            .get_mut(&role)
            .is_some_and(|members| members.remove(account));
        if removed {
            info!(role = %role, account = %account, "Role revoked");
            self.events.push(TreasuryEvent::RoleRevoked {
                role,
                account: account.clone(),
            });
        }
        removed
    }

    pub fn drain_events(&mut self) -> Vec<TreasuryEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_check_revoke() {
        let mut roles = RoleRegistry::new();
        let ops = AccountId::new("ops-bot");
        assert!(roles.ensure(&ops, Role::Spender).is_err());

        assert!(roles.grant(Role::Spender, ops.clone()).unwrap());
        assert!(!roles.grant(Role::Spender, ops.clone()).unwrap());
        roles.ensure(&ops, Role::Spender).unwrap();
        assert!(!roles.has(&ops, Role::Admin));

        assert!(roles.revoke(Role::Spender, &ops));
        assert!(!roles.revoke(Role::Spender, &ops));
        assert_eq!(
            roles.ensure(&ops, Role::Spender),
            Err(CustodyError::Unauthorized {
                caller: ops,
                role: Role::Spender
            })
        );
        assert_eq!(roles.drain_events().len(), 2);
    }

    #[test]
    fn upgrade_authority_is_not_grantable() {
        let mut roles = RoleRegistry::new();
        assert!(roles
            .grant(Role::UpgradeAuthority, AccountId::new("mallory"))
            .is_err());
    }
}
