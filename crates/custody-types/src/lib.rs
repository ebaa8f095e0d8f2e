#![deny(unsafe_code)]
//! # custody-types
//!
//! Vocabulary shared by every crate of the treasury custody core:
//!
//! - identifiers ([`OwnerId`], [`AccountId`], [`AssetId`], [`OperationId`])
//! - the four ledger [`Category`] partitions and [`SpendRequest`]
//! - the domain [`TreasuryEvent`] stream
//! - the [`CustodyError`] taxonomy
//! - a [`Clock`] abstraction so time-based rules can be driven in tests

pub mod clock;
pub mod error;
pub mod event;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CustodyError, CustodyResult, ErrorKind};
pub use event::TreasuryEvent;
pub use types::{
    AccountId, AssetId, Category, CategorySplit, OperationId, OwnerId, Role, SpendRequest,
    BASIS_POINTS_TOTAL,
};
