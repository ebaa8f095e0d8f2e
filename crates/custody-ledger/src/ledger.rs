use chrono::{DateTime, Utc};
use custody_types::{
    AccountId, AssetId, Category, CategorySplit, CustodyError, CustodyResult, TreasuryEvent,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::allocation::AllocationConfig;
use crate::audit::{AuditTrail, FinancialRecord, RecordDraft, RecordKind};
use crate::balances::{AssetTotals, CategoryBalances};

/// Category balances, their allocation rule and the audit trail behind them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryLedger {
    allocation: AllocationConfig,
    balances: CategoryBalances,
    audit: AuditTrail,
    #[serde(skip)]
    events: Vec<TreasuryEvent>,
}

impl CategoryLedger {
    pub fn new(allocation: AllocationConfig) -> Self {
        Self {
            allocation,
            ..Self::default()
        }
    }

    pub fn allocation(&self) -> &AllocationConfig {
        &self.allocation
    }

    pub fn balances(&self) -> &CategoryBalances {
        &self.balances
    }

    pub fn balance(&self, asset: &AssetId, category: Category) -> u64 {
        self.balances.balance(asset, category)
    }

    pub fn balances_for(&self, asset: &AssetId) -> CategorySplit {
        self.balances.balances_for(asset)
    }

    pub fn totals(&self, asset: &AssetId) -> AssetTotals {
        self.balances.totals(asset)
    }

    pub fn asset_total(&self, asset: &AssetId) -> CustodyResult<u64> {
        self.balances.asset_total(asset)
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn records(&self) -> &[FinancialRecord] {
        self.audit.records()
    }

    pub fn verify_chain(&self) -> bool {
        self.audit.verify_chain()
    }

    pub fn verify_conservation(&self) -> CustodyResult<()> {
        self.balances.verify_conservation()
    }

    /// Audit chain, allocation and conservation checks, as run on a reloaded ledger.
    pub fn verify_integrity(&self) -> CustodyResult<()> {
        self.audit.verify()?;
        AllocationConfig::new(
            self.allocation.bps(Category::Operations),
            self.allocation.bps(Category::Reserves),
            self.allocation.bps(Category::Upgrades),
            self.allocation.bps(Category::Profits),
        )?;
        self.balances.verify_conservation()
    }

    pub fn drain_events(&mut self) -> Vec<TreasuryEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn update_allocation(&mut self, allocation: AllocationConfig) {
        self.allocation = allocation;
        info!(
            operations = allocation.bps(Category::Operations),
            reserves = allocation.bps(Category::Reserves),
            upgrades = allocation.bps(Category::Upgrades),
            profits = allocation.bps(Category::Profits),
            "Allocation config updated"
        );
        self.events.push(TreasuryEvent::AllocationConfigUpdated {
            operations_bps: allocation.bps(Category::Operations),
            reserves_bps: allocation.bps(Category::Reserves),
            upgrades_bps: allocation.bps(Category::Upgrades),
            profits_bps: allocation.bps(Category::Profits),
        });
    }

    /// Split `amount` with the current allocation and credit every category.
    pub fn distribute_revenue(
        &mut self,
        asset: &AssetId,
        amount: u64,
        initiator: &AccountId,
        description: &str,
        now: DateTime<Utc>,
    ) -> CustodyResult<CategorySplit> {
        if amount == 0 {
            return Err(CustodyError::InvalidAmount(
                "revenue amount must be positive".into(),
            ));
        }
        let split = self.allocation.split(amount)?;
        self.credit_split(asset, amount, &split, initiator, description, now)?;
        Ok(split)
    }

    /// Credit a precomputed split. A split that does not add up to `amount`
    /// indicates a logic defect and is rejected as an invariant violation.
    pub fn credit_split(
        &mut self,
        asset: &AssetId,
        amount: u64,
        split: &CategorySplit,
        initiator: &AccountId,
        description: &str,
        now: DateTime<Utc>,
    ) -> CustodyResult<()> {
        let total = split.total()?;
        if total != amount {
            return Err(CustodyError::InvariantViolation(format!(
                "split of {asset} sums to {total}, expected {amount}"
            )));
        }
        let drafts: Vec<RecordDraft> = split
            .iter()
            .filter(|(_, part)| *part > 0)
            .map(|(category, part)| RecordDraft {
                kind: RecordKind::Credit,
                asset: asset.clone(),
                amount: part,
                category: Some(category),
                description: format!("revenue distribution: {description}"),
                initiator: initiator.clone(),
                timestamp: now,
            })
            .collect();
        for draft in &drafts {
            draft.validate()?;
        }

        self.balances.credit_split(asset, split)?;
        for draft in drafts {
            let category = draft.category;
            let part = draft.amount;
            self.record(draft)?;
            if let Some(category) = category {
                self.events.push(TreasuryEvent::FundsDistributed {
                    category,
                    asset: asset.clone(),
                    amount: part,
                });
            }
        }

        info!(asset = %asset, amount, "Revenue distributed");
        Ok(())
    }

    /// Debit one category; rejected before any change when the balance is short.
    pub fn debit(&mut self, asset: &AssetId, category: Category, amount: u64) -> CustodyResult<()> {
        self.balances.debit(asset, category, amount)?;
        debug!(asset = %asset, category = %category, amount, "Category debited");
        Ok(())
    }

    pub fn reverse_debit(
        &mut self,
        asset: &AssetId,
        category: Category,
        amount: u64,
    ) -> CustodyResult<()> {
        self.balances.reverse_debit(asset, category, amount)
    }

    /// Append an audit record. Fails only on malformed input.
    pub fn record_transaction(&mut self, draft: RecordDraft) -> CustodyResult<FinancialRecord> {
        self.record(draft)
    }

    fn record(&mut self, draft: RecordDraft) -> CustodyResult<FinancialRecord> {
        let record = self.audit.append(draft)?.clone();
        self.events.push(TreasuryEvent::TransactionRecorded {
            id: record.id.clone(),
            category: record.category,
            amount: record.amount,
        });
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> AssetId {
        AssetId::new("USDC")
    }

    fn payments() -> AccountId {
        AccountId::new("payments")
    }

    #[test]
    fn distributes_default_split() {
        let mut ledger = CategoryLedger::default();
        let split = ledger
            .distribute_revenue(&usdc(), 1_000, &payments(), "invoice 17", Utc::now())
            .unwrap();
        assert_eq!(split.operations, 400);
        assert_eq!(ledger.balance(&usdc(), Category::Operations), 400);
        assert_eq!(ledger.balance(&usdc(), Category::Reserves), 200);
        assert_eq!(ledger.balance(&usdc(), Category::Upgrades), 200);
        assert_eq!(ledger.balance(&usdc(), Category::Profits), 200);
        assert_eq!(ledger.records().len(), 4);
        assert!(ledger.verify_chain());
        ledger.verify_conservation().unwrap();

        let distributed = ledger
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, TreasuryEvent::FundsDistributed { .. }))
            .count();
        assert_eq!(distributed, 4);
    }

    #[test]
    fn zero_parts_are_not_recorded() {
        let mut ledger = CategoryLedger::new(AllocationConfig::new(10_000, 0, 0, 0).unwrap());
        ledger
            .distribute_revenue(&usdc(), 77, &payments(), "tip", Utc::now())
            .unwrap();
        assert_eq!(ledger.records().len(), 1);
        assert_eq!(ledger.balance(&usdc(), Category::Operations), 77);
    }

    #[test]
    fn zero_revenue_rejected() {
        let mut ledger = CategoryLedger::default();
        assert!(matches!(
            ledger.distribute_revenue(&usdc(), 0, &payments(), "nothing", Utc::now()),
            Err(CustodyError::InvalidAmount(_))
        ));
    }

    #[test]
    fn mismatched_split_is_fatal() {
        let mut ledger = CategoryLedger::default();
        let split = CategorySplit {
            operations: 10,
            reserves: 0,
            upgrades: 0,
            profits: 0,
        };
        let err = ledger
            .credit_split(&usdc(), 11, &split, &payments(), "bad", Utc::now())
            .unwrap_err();
        assert!(matches!(err, CustodyError::InvariantViolation(_)));
        assert_eq!(ledger.asset_total(&usdc()).unwrap(), 0);
        assert!(ledger.records().is_empty());
    }

    #[test]
    fn malformed_initiator_leaves_balances_untouched() {
        let mut ledger = CategoryLedger::default();
        let err = ledger
            .distribute_revenue(&usdc(), 100, &AccountId::new(""), "x", Utc::now())
            .unwrap_err();
        assert!(matches!(err, CustodyError::MalformedRecord(_)));
        assert_eq!(ledger.asset_total(&usdc()).unwrap(), 0);
    }
}
