#![deny(unsafe_code)]
//! Treasury facade over the authorization, ledger and rebalancing engines.
//!
//! [`Treasury`] is the single entry point. It adds what the component crates
//! leave out: role-gated access ([`RoleRegistry`]), the emergency pause
//! overlay ([`EmergencyControl`]), swappable logic over persistent state
//! ([`TreasuryLogic`], [`StateMigration`]) and an all-or-nothing,
//! reentrancy-safe [`StateStore`] with optional file persistence.

pub mod config;
pub mod emergency;
pub mod gateway;
pub mod roles;
pub mod sink;
pub mod state;
pub mod store;
pub mod treasury;
pub mod upgrade;

pub use config::{
    AllocationSection, OwnersSection, RebalanceSection, RolesSection, StorageConfig,
    TimelockSection, TreasuryConfig,
};
pub use emergency::{EmergencyControl, EmergencyState};
pub use gateway::{CallGateway, RejectingGateway};
pub use roles::RoleRegistry;
pub use sink::{EventSink, MemorySink, TracingSink};
pub use state::{TreasuryState, STATE_LAYOUT_VERSION};
pub use store::{load_state, Committed, StateStore, TreasuryCore};
pub use treasury::{Treasury, TreasuryBuilder};
pub use upgrade::{
    migrate_state, LogicDescriptor, StandardLogic, StateMigration, TreasuryLogic, UpgradeHistory,
    UpgradeRecord,
};
