use std::collections::BTreeMap;

use custody_types::{AssetId, Category, CategorySplit, CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};

/// Lifetime credit/debit totals for one asset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTotals {
    pub credited: u64,
    pub debited: u64,
}

/// `(asset, category) -> amount`, never negative.
///
/// Totals are tracked alongside so that `sum(balances) == credited - debited`
/// can be checked for every asset at any point.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBalances {
    balances: BTreeMap<AssetId, BTreeMap<Category, u64>>,
    totals: BTreeMap<AssetId, AssetTotals>,
}

impl CategoryBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, asset: &AssetId, category: Category) -> u64 {
        self.balances
            .get(asset)
            .and_then(|per_asset| per_asset.get(&category))
            .copied()
            .unwrap_or(0)
    }

    pub fn balances_for(&self, asset: &AssetId) -> CategorySplit {
        let mut split = CategorySplit::default();
        for category in Category::ALL {
            split.set(category, self.balance(asset, category));
        }
        split
    }

    pub fn totals(&self, asset: &AssetId) -> AssetTotals {
        self.totals.get(asset).copied().unwrap_or_default()
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetId> {
        self.balances.keys()
    }

    /// Sum over the four categories.
    pub fn asset_total(&self, asset: &AssetId) -> CustodyResult<u64> {
        self.balances_for(asset).total()
    }

    /// Credit every part of `split`; nothing changes if any part would overflow.
    pub fn credit_split(&mut self, asset: &AssetId, split: &CategorySplit) -> CustodyResult<()> {
        let total = split.total()?;
        let credited = self
            .totals(asset)
            .credited
            .checked_add(total)
            .ok_or_else(|| overflow(asset))?;
        for (category, part) in split.iter() {
            self.balance(asset, category)
                .checked_add(part)
                .ok_or_else(|| overflow(asset))?;
        }

        let per_asset = self.balances.entry(asset.clone()).or_default();
        for (category, part) in split.iter() {
            *per_asset.entry(category).or_insert(0) += part;
        }
        self.totals.entry(asset.clone()).or_default().credited = credited;
        Ok(())
    }

    pub fn credit(&mut self, asset: &AssetId, category: Category, amount: u64) -> CustodyResult<()> {
        let mut split = CategorySplit::default();
        split.set(category, amount);
        self.credit_split(asset, &split)
    }

    /// Debit `amount`; rejected before any change when the category is short.
    pub fn debit(&mut self, asset: &AssetId, category: Category, amount: u64) -> CustodyResult<()> {
        let available = self.balance(asset, category);
        if available < amount {
            return Err(CustodyError::InsufficientCategoryFunds {
                asset: asset.clone(),
                category,
                requested: amount,
                available,
            });
        }
        let debited = self
            .totals(asset)
            .debited
            .checked_add(amount)
            .ok_or_else(|| overflow(asset))?;

        if let Some(balance) = self
            .balances
            .get_mut(asset)
            .and_then(|per_asset| per_asset.get_mut(&category))
        {
            *balance = available - amount;
        }
        self.totals.entry(asset.clone()).or_default().debited = debited;
        Ok(())
    }

    /// Undo a debit whose external transfer failed.
    pub fn reverse_debit(
        &mut self,
        asset: &AssetId,
        category: Category,
        amount: u64,
    ) -> CustodyResult<()> {
        let totals = self.totals(asset);
        let debited = totals.debited.checked_sub(amount).ok_or_else(|| {
            CustodyError::InvariantViolation(format!(
                "reversing {amount} of {asset} exceeds recorded debits {}",
                totals.debited
            ))
        })?;
        let restored = self
            .balance(asset, category)
            .checked_add(amount)
            .ok_or_else(|| overflow(asset))?;

        self.balances
            .entry(asset.clone())
            .or_default()
            .insert(category, restored);
        self.totals.entry(asset.clone()).or_default().debited = debited;
        Ok(())
    }

    /// Fund conservation for one asset.
    pub fn verify_asset(&self, asset: &AssetId) -> CustodyResult<()> {
        let totals = self.totals(asset);
        let held = self.asset_total(asset)?;
        let expected = totals.credited.checked_sub(totals.debited).ok_or_else(|| {
            CustodyError::InvariantViolation(format!(
                "{asset}: debited {} exceeds credited {}",
                totals.debited, totals.credited
            ))
        })?;
        if held != expected {
            return Err(CustodyError::InvariantViolation(format!(
                "{asset}: category balances {held} != credited {} - debited {}",
                totals.credited, totals.debited
            )));
        }
        Ok(())
    }

    pub fn verify_conservation(&self) -> CustodyResult<()> {
        for asset in self.totals.keys() {
            self.verify_asset(asset)?;
        }
        Ok(())
    }
}

fn overflow(asset: &AssetId) -> CustodyError {
    CustodyError::InvariantViolation(format!("{asset} balance overflow"))
}
