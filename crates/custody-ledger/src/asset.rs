//! Transfer boundary for managed assets.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use custody_types::{AccountId, AssetId, CustodyError, CustodyResult};

/// Minimal token contract every managed asset must satisfy.
///
/// `transfer` moves funds out of the account the handle is bound to (the
/// treasury); `transfer_from` moves funds between arbitrary accounts.
pub trait AssetTransfer: Send + Sync {
    fn asset(&self) -> &AssetId;

    fn transfer(&self, to: &AccountId, amount: u64) -> CustodyResult<()>;

    fn transfer_from(&self, from: &AccountId, to: &AccountId, amount: u64) -> CustodyResult<()>;

    fn balance_of(&self, owner: &AccountId) -> u64;
}

/// In-process token with a fixed holder account. Used by the CLI and tests.
#[derive(Debug)]
pub struct InMemoryAsset {
    asset: AssetId,
    holder: AccountId,
    balances: Mutex<HashMap<AccountId, u64>>,
}

impl InMemoryAsset {
    pub fn new(asset: impl Into<AssetId>, holder: impl Into<AccountId>) -> Self {
        Self {
            asset: asset.into(),
            holder: holder.into(),
            balances: Mutex::new(HashMap::new()),
        }
    }

    /// Create units out of thin air for `owner`.
    pub fn mint(&self, owner: &AccountId, amount: u64) -> CustodyResult<()> {
        let mut balances = self.lock()?;
        let entry = balances.entry(owner.clone()).or_insert(0);
        *entry = entry.checked_add(amount).ok_or_else(|| self.failure("mint overflow"))?;
        Ok(())
    }

    pub fn holder(&self) -> &AccountId {
        &self.holder
    }

    fn lock(&self) -> CustodyResult<std::sync::MutexGuard<'_, HashMap<AccountId, u64>>> {
        self.balances
            .lock()
            .map_err(|_| self.failure("balance lock poisoned"))
    }

    fn failure(&self, reason: impl Into<String>) -> CustodyError {
        CustodyError::TransferFailed {
            asset: self.asset.clone(),
            reason: reason.into(),
        }
    }

    fn move_funds(&self, from: &AccountId, to: &AccountId, amount: u64) -> CustodyResult<()> {
        let mut balances = self.lock()?;
        let available = balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(self.failure(format!(
                "{from} holds {available}, cannot send {amount}"
            )));
        }
        if from == to {
            return Ok(());
        }
        let received = balances
            .get(to)
            .copied()
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or_else(|| self.failure("receiver balance overflow"))?;
        balances.insert(from.clone(), available - amount);
        balances.insert(to.clone(), received);
        Ok(())
    }
}

impl AssetTransfer for InMemoryAsset {
    fn asset(&self) -> &AssetId {
        &self.asset
    }

    fn transfer(&self, to: &AccountId, amount: u64) -> CustodyResult<()> {
        self.move_funds(&self.holder, to, amount)
    }

    fn transfer_from(&self, from: &AccountId, to: &AccountId, amount: u64) -> CustodyResult<()> {
        self.move_funds(from, to, amount)
    }

    fn balance_of(&self, owner: &AccountId) -> u64 {
        self.lock()
            .map(|balances| balances.get(owner).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Registered asset handles, keyed by asset code.
#[derive(Clone, Default)]
pub struct AssetRegistry {
    assets: BTreeMap<AssetId, Arc<dyn AssetTransfer>>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: Arc<dyn AssetTransfer>) {
        self.assets.insert(handle.asset().clone(), handle);
    }

    pub fn with(mut self, handle: Arc<dyn AssetTransfer>) -> Self {
        self.register(handle);
        self
    }

    pub fn get(&self, asset: &AssetId) -> CustodyResult<&Arc<dyn AssetTransfer>> {
        self.assets
            .get(asset)
            .ok_or_else(|| CustodyError::UnknownAsset(asset.clone()))
    }

    pub fn contains(&self, asset: &AssetId) -> bool {
        self.assets.contains_key(asset)
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetId> {
        self.assets.keys()
    }
}

impl std::fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRegistry")
            .field("assets", &self.assets.keys().collect::<Vec<_>>())
            .finish()
    }
}
