#![deny(unsafe_code)]
//! Portfolio rebalancing against per-asset target allocations.
//!
//! The [`Rebalancer`] reads current holdings from a [`ValuationFeed`], plans
//! [`Adjustment`]s for assets that drifted past their band, and hands them to
//! a [`RebalanceVenue`]. Planning is a pure function ([`plan_adjustments`]) so
//! alternative logic can swap it out.

pub mod config;
pub mod feed;
pub mod plan;
pub mod rebalancer;
pub mod venue;

pub use config::AssetConfig;
pub use feed::{StaticValuationFeed, Valuation, ValuationFeed};
pub use plan::{deviation_bps, plan_adjustments, Adjustment, Direction, Holding};
pub use rebalancer::{RebalanceHalt, RebalanceReport, Rebalancer};
pub use venue::{RebalanceVenue, RecordingVenue};
