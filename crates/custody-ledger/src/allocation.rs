use custody_types::{Category, CategorySplit, CustodyError, CustodyResult, BASIS_POINTS_TOTAL};
use serde::{Deserialize, Serialize};

/// Revenue split in basis points. The four parts always sum to 10,000.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationConfig {
    operations_bps: u32,
    reserves_bps: u32,
    upgrades_bps: u32,
    profits_bps: u32,
}

impl AllocationConfig {
    pub fn new(
        operations_bps: u32,
        reserves_bps: u32,
        upgrades_bps: u32,
        profits_bps: u32,
    ) -> CustodyResult<Self> {
        let total = [operations_bps, reserves_bps, upgrades_bps, profits_bps]
            .iter()
            .try_fold(0u32, |acc, bps| acc.checked_add(*bps))
            .unwrap_or(u32::MAX);
        if total != BASIS_POINTS_TOTAL {
            return Err(CustodyError::AllocationNotFullySummed { total });
        }
        Ok(Self {
            operations_bps,
            reserves_bps,
            upgrades_bps,
            profits_bps,
        })
    }

    pub fn bps(&self, category: Category) -> u32 {
        match category {
            Category::Operations => self.operations_bps,
            Category::Reserves => self.reserves_bps,
            Category::Upgrades => self.upgrades_bps,
            Category::Profits => self.profits_bps,
        }
    }

    /// Split `amount` by basis points. Profits takes whatever the integer
    /// division of the other three leaves, so the parts sum exactly to `amount`.
    pub fn split(&self, amount: u64) -> CustodyResult<CategorySplit> {
        let mut split = CategorySplit::default();
        let mut assigned: u64 = 0;
        for category in [Category::Operations, Category::Reserves, Category::Upgrades] {
            let part = (amount as u128 * self.bps(category) as u128 / BASIS_POINTS_TOTAL as u128) as u64;
            split.set(category, part);
            assigned += part;
        }
        let remainder = amount.checked_sub(assigned).ok_or_else(|| {
            CustodyError::InvariantViolation(format!(
                "allocation assigned {assigned} out of {amount}"
            ))
        })?;
        split.set(Category::Profits, remainder);
        Ok(split)
    }
}

impl Default for AllocationConfig {
    /// 40% operations, 20% reserves, 20% upgrades, 20% profits.
    fn default() -> Self {
        Self {
            operations_bps: 4_000,
            reserves_bps: 2_000,
            upgrades_bps: 2_000,
            profits_bps: 2_000,
        }
    }
}
