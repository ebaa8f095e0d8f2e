//! File-backed state: reload after restart and tamper detection.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{account, config, owner, usdc, Harness};
use custody_auth::{Destination, OperationPayload};
use custody_engine::{load_state, StorageConfig, Treasury, TreasuryConfig};
use custody_ledger::{AssetRegistry, InMemoryAsset};
use custody_types::{Category, CustodyError, SpendRequest};
use uuid::Uuid;

fn temp_state_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("custody-test-{}", Uuid::new_v4()))
        .join("state.json")
}

fn file_config(path: &Path) -> TreasuryConfig {
    let mut config = config();
    config.storage = StorageConfig::file(path);
    config
}

fn reopen(config: TreasuryConfig) -> Result<Treasury, CustodyError> {
    Treasury::builder(config)
        .with_assets(AssetRegistry::new().with(Arc::new(InMemoryAsset::new("USDC", "treasury"))))
        .build()
}

#[test]
fn state_survives_a_restart() {
    let path = temp_state_path();
    let config = file_config(&path);

    let (records, pending) = {
        let h = Harness::with_config(config.clone());
        h.deposit(10_000);
        h.treasury
            .spend(
                &account("ops-bot"),
                SpendRequest::new(Category::Operations, "USDC", 500, "vendor", "hosting"),
            )
            .unwrap();
        let (id, _) = h
            .treasury
            .submit_operation(
                &owner("alice"),
                Destination::account("vendor"),
                700,
                OperationPayload::Spend(SpendRequest::new(
                    Category::Reserves,
                    "USDC",
                    700,
                    "vendor",
                    "retainer",
                )),
            )
            .unwrap();
        h.treasury.pause(&account("guardian"), "maintenance").unwrap();
        (h.treasury.records().unwrap(), id)
    };
    assert!(path.exists());

    let treasury = reopen(config).unwrap();
    assert_eq!(treasury.records().unwrap(), records);
    assert_eq!(
        treasury.balance(&usdc(), Category::Operations).unwrap(),
        3_500
    );
    assert!(treasury.is_paused().unwrap());
    let operation = treasury.operation(pending).unwrap().unwrap();
    assert!(!operation.executed);
    assert_eq!(operation.confirmations.len(), 1);
    treasury.verify().unwrap();

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn tampered_audit_trail_is_rejected_on_load() {
    let path = temp_state_path();
    let config = file_config(&path);
    {
        let h = Harness::with_config(config.clone());
        h.deposit(10_000);
    }

    let mut state: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    state["ledger"]["audit"]["records"][0]["amount"] = serde_json::json!(1);
    std::fs::write(&path, serde_json::to_vec(&state).unwrap()).unwrap();

    assert!(matches!(
        load_state(&path),
        Err(CustodyError::InvariantViolation(_))
    ));
    assert!(matches!(
        reopen(config),
        Err(CustodyError::InvariantViolation(_))
    ));

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn rolled_back_calls_leave_the_file_untouched() {
    let path = temp_state_path();
    let h = Harness::with_config(file_config(&path));
    h.deposit(1_000);
    let before = std::fs::read(&path).unwrap();

    assert!(h
        .treasury
        .spend(
            &account("ops-bot"),
            SpendRequest::new(Category::Operations, "USDC", 5_000, "vendor", "too much"),
        )
        .is_err());
    assert_eq!(std::fs::read(&path).unwrap(), before);

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn write_failure_after_a_transfer_keeps_the_commit() {
    let path = temp_state_path();
    let h = Harness::with_config(file_config(&path));
    h.deposit(10_000);
    let t = &h.treasury;

    // A non-empty directory where the state file belongs makes the write fail.
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir_all(path.join("blocker")).unwrap();

    let result = t.spend(
        &account("ops-bot"),
        SpendRequest::new(Category::Operations, "USDC", 900, "vendor", "hosting"),
    );
    let err = result.unwrap_err();
    assert!(matches!(err, CustodyError::NotPersisted(_)));
    assert!(!err.is_retryable());

    // The tokens left, and the ledger says so.
    assert_eq!(h.held("vendor"), 900);
    assert_eq!(h.held("treasury"), 9_100);
    assert_eq!(t.balance(&usdc(), Category::Operations).unwrap(), 3_100);
    assert_eq!(t.balances_for(&usdc()).unwrap().total().unwrap(), 9_100);
    t.verify().unwrap();

    // The next successful write stores everything, including the unpersisted spend.
    std::fs::remove_dir_all(&path).unwrap();
    t.spend(
        &account("ops-bot"),
        SpendRequest::new(Category::Operations, "USDC", 100, "vendor", "hosting"),
    )
    .unwrap();
    let reopened = reopen(file_config(&path)).unwrap();
    assert_eq!(
        reopened.balance(&usdc(), Category::Operations).unwrap(),
        3_000
    );
    assert_eq!(reopened.records().unwrap(), t.records().unwrap());

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}
