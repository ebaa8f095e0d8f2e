use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{AccountId, AssetId, Category, OperationId, OwnerId, Role};

pub type CustodyResult<T> = Result<T, CustodyError>;

/// Errors raised anywhere in the custody core.
///
/// Every failure is returned synchronously; nothing is queued for a silent retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    // --- Authorization errors ---
    #[error("{0} is not a registered owner")]
    NotAnOwner(OwnerId),

    #[error("owner {owner} already confirmed {operation}")]
    AlreadyConfirmed {
        operation: OperationId,
        owner: OwnerId,
    },

    #[error("owner {owner} has not confirmed {operation}")]
    NotConfirmed {
        operation: OperationId,
        owner: OwnerId,
    },

    #[error("quorum not met for {operation}: {confirmations} of {required} confirmations")]
    QuorumNotMet {
        operation: OperationId,
        confirmations: usize,
        required: usize,
    },

    #[error("unknown operation {0}")]
    UnknownOperation(OperationId),

    #[error("operation {0} already executed")]
    AlreadyExecuted(OperationId),

    #[error("destination must not be empty")]
    InvalidDestination,

    #[error("invalid operation payload: {0}")]
    InvalidPayload(String),

    #[error("invalid owner change: {0}")]
    InvalidOwnerChange(String),

    #[error("{caller} lacks the {role} role")]
    Unauthorized { caller: AccountId, role: Role },

    // --- Ledger errors ---
    #[error("insufficient {category} funds for {asset}: requested {requested}, available {available}")]
    InsufficientCategoryFunds {
        asset: AssetId,
        category: Category,
        requested: u64,
        available: u64,
    },

    #[error("allocation must sum to 10000 basis points, got {total}")]
    AllocationNotFullySummed { total: u32 },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("malformed transaction record: {0}")]
    MalformedRecord(String),

    #[error("invalid asset configuration: {0}")]
    InvalidAssetConfig(String),

    #[error("asset {0} is not registered")]
    UnknownAsset(AssetId),

    #[error("transfer of {asset} failed: {reason}")]
    TransferFailed { asset: AssetId, reason: String },

    // --- Timelock errors ---
    #[error("no timelock entry for key {0}")]
    TimelockNotFound(String),

    #[error("timelock {key} matures at {matures_at}")]
    TimelockNotMature {
        key: String,
        matures_at: DateTime<Utc>,
    },

    #[error("timelock {0} is already scheduled")]
    TimelockAlreadyScheduled(String),

    // --- Lifecycle errors ---
    #[error("system is paused")]
    SystemPaused,

    #[error("system is not paused")]
    NotPaused,

    #[error("system is already paused")]
    AlreadyPaused,

    #[error("rebalance not allowed before {next_allowed}")]
    RebalanceTooFrequent { next_allowed: DateTime<Utc> },

    #[error("valuation for {asset} unavailable: {reason}")]
    ValuationUnavailable { asset: AssetId, reason: String },

    #[error("re-entrant call rejected while another state mutation is in flight")]
    Reentrancy,

    // --- Upgrade errors ---
    #[error("state layout mismatch: stored layout {stored}, logic expects {expected}")]
    LayoutMismatch { stored: u32, expected: u32 },

    #[error("state migration failed: {0}")]
    MigrationFailed(String),

    // --- Fatal ---
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    // --- Infrastructure ---
    #[error("storage error: {0}")]
    Storage(String),

    /// The operation took effect (funds may have moved) but the state file
    /// was not updated. Do not repeat the call.
    #[error("committed but not persisted: {0}")]
    NotPersisted(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification used for retry policy and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Ledger,
    Timelock,
    Lifecycle,
    Upgrade,
    Fatal,
    Infrastructure,
}

impl ErrorKind {
    /// Transient conditions that clear on their own; the caller may try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timelock | ErrorKind::Lifecycle)
    }
}

impl CustodyError {
    pub fn kind(&self) -> ErrorKind {
        use CustodyError::*;
        match self {
            NotAnOwner(_)
            | AlreadyConfirmed { .. }
            | NotConfirmed { .. }
            | QuorumNotMet { .. }
            | UnknownOperation(_)
            | AlreadyExecuted(_)
            | InvalidDestination
            | InvalidPayload(_)
            | InvalidOwnerChange(_)
            | Unauthorized { .. } => ErrorKind::Authorization,
            InsufficientCategoryFunds { .. }
            | AllocationNotFullySummed { .. }
            | InvalidAmount(_)
            | MalformedRecord(_)
            | InvalidAssetConfig(_)
            | UnknownAsset(_)
            | TransferFailed { .. } => ErrorKind::Ledger,
            TimelockNotFound(_) | TimelockNotMature { .. } | TimelockAlreadyScheduled(_) => {
                ErrorKind::Timelock
            }
            SystemPaused
            | NotPaused
            | AlreadyPaused
            | RebalanceTooFrequent { .. }
            | ValuationUnavailable { .. }
            | Reentrancy => ErrorKind::Lifecycle,
            LayoutMismatch { .. } | MigrationFailed(_) => ErrorKind::Upgrade,
            InvariantViolation(_) => ErrorKind::Fatal,
            Storage(_) | NotPersisted(_) | Config(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<serde_json::Error> for CustodyError {
    fn from(err: serde_json::Error) -> Self {
        CustodyError::Storage(format!("serialization: {err}"))
    }
}

impl From<std::io::Error> for CustodyError {
    fn from(err: std::io::Error) -> Self {
        CustodyError::Storage(format!("io: {err}"))
    }
}
