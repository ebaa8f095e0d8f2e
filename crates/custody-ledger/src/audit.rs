use chrono::{DateTime, Utc};
use custody_types::{AccountId, AssetId, Category, CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Credit,
    Debit,
    TimelockScheduled,
    EmergencyWithdrawal,
    Rebalance,
}

/// Input for a new audit record; the trail assigns id, index and hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordDraft {
    pub kind: RecordKind,
    pub asset: AssetId,
    pub amount: u64,
    pub category: Option<Category>,
    pub description: String,
    pub initiator: AccountId,
    pub timestamp: DateTime<Utc>,
}

impl RecordDraft {
    pub fn validate(&self) -> CustodyResult<()> {
        if self.asset.is_empty() {
            return Err(CustodyError::MalformedRecord("asset is empty".into()));
        }
        if self.description.trim().is_empty() {
            return Err(CustodyError::MalformedRecord("description is empty".into()));
        }
        if self.initiator.is_empty() {
            return Err(CustodyError::MalformedRecord("initiator is empty".into()));
        }
        Ok(())
    }
}

/// Immutable audit entry. `content_hash` covers every field plus the previous
/// record's hash, chaining the trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub id: String,
    pub index: u64,
    pub kind: RecordKind,
    pub asset: AssetId,
    pub amount: u64,
    pub category: Option<Category>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub initiator: AccountId,
    pub previous_hash: Option<String>,
    pub content_hash: String,
}

/// Append-only audit trail. No API mutates or removes a stored record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTrail {
    records: Vec<FinancialRecord>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records, rejecting gaps and broken hashes.
    pub fn from_records(records: Vec<FinancialRecord>) -> CustodyResult<Self> {
        let trail = Self { records };
        trail.verify()?;
        Ok(trail)
    }

    /// Check index continuity and the hash chain.
    pub fn verify(&self) -> CustodyResult<()> {
        for (expected, record) in self.records.iter().enumerate() {
            if record.index != expected as u64 {
                return Err(CustodyError::InvariantViolation(format!(
                    "audit index gap at position {expected} (found {})",
                    record.index
                )));
            }
        }
        if !self.verify_chain() {
            return Err(CustodyError::InvariantViolation(
                "audit hash-chain verification failed".into(),
            ));
        }
        Ok(())
    }

    pub fn records(&self) -> &[FinancialRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&FinancialRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn append(&mut self, draft: RecordDraft) -> CustodyResult<&FinancialRecord> {
        draft.validate()?;
        let index = self.records.len() as u64;
        let previous_hash = self.records.last().map(|r| r.content_hash.clone());
        let mut record = FinancialRecord {
            id: Uuid::new_v4().to_string(),
            index,
            kind: draft.kind,
            asset: draft.asset,
            amount: draft.amount,
            category: draft.category,
            description: draft.description,
            timestamp: draft.timestamp,
            initiator: draft.initiator,
            previous_hash,
            content_hash: String::new(),
        };
        record.content_hash = compute_record_hash(&record)?;
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for record in &self.records {
            if record.previous_hash != previous_hash {
                return false;
            }
            match compute_record_hash(record) {
                Ok(hash) if hash == record.content_hash => {}
                _ => return false,
            }
            previous_hash = Some(record.content_hash.clone());
        }
        true
    }
}

fn compute_record_hash(record: &FinancialRecord) -> CustodyResult<String> {
    let material = serde_json::json!({
        "id": record.id,
        "index": record.index,
        "kind": record.kind,
        "asset": record.asset,
        "amount": record.amount,
        "category": record.category,
        "description": record.description,
        "timestamp": record.timestamp,
        "initiator": record.initiator,
        "previous_hash": record.previous_hash,
    });

    let bytes = serde_json::to_vec(&material)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(amount: u64) -> RecordDraft {
        RecordDraft {
            kind: RecordKind::Credit,
            asset: AssetId::new("USDC"),
            amount,
            category: Some(Category::Operations),
            description: "client payment".into(),
            initiator: AccountId::new("payments"),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn verifies_hash_chain() {
        let mut trail = AuditTrail::new();
        trail.append(draft(10)).unwrap();
        trail.append(draft(20)).unwrap();
        assert!(trail.verify_chain());
        assert_eq!(
            trail.records()[1].previous_hash.as_deref(),
            Some(trail.records()[0].content_hash.as_str())
        );
    }

    #[test]
    fn content_hash_is_a_digest_of_the_record() {
        let mut trail = AuditTrail::new();
        trail.append(draft(10)).unwrap();
        trail.append(draft(10)).unwrap();
        let records = trail.records();
        for record in records {
            assert_eq!(record.content_hash.len(), 64);
            assert_eq!(compute_record_hash(record).unwrap(), record.content_hash);
        }
        assert_ne!(records[0].content_hash, records[1].content_hash);
    }

    #[test]
    fn detects_tampered_amount() {
        let mut trail = AuditTrail::new();
        trail.append(draft(10)).unwrap();
        trail.append(draft(20)).unwrap();

        let mut records = trail.records().to_vec();
        records[0].amount = 1_000_000;
        assert!(AuditTrail::from_records(records).is_err());
    }

    #[test]
    fn rehydrates_clean_records() {
        let mut trail = AuditTrail::new();
        let first_id = trail.append(draft(10)).unwrap().id.clone();
        let rebuilt = AuditTrail::from_records(trail.records().to_vec()).unwrap();
        assert_eq!(rebuilt.len(), 1);
        assert!(rebuilt.find(&first_id).is_some());
    }

    #[test]
    fn malformed_drafts_rejected() {
        let mut trail = AuditTrail::new();
        let mut bad = draft(1);
        bad.description = "  ".into();
        assert!(matches!(
            trail.append(bad),
            Err(CustodyError::MalformedRecord(_))
        ));
        let mut bad = draft(1);
        bad.initiator = AccountId::new("");
        assert!(trail.append(bad).is_err());
        assert!(trail.is_empty());
    }
}
