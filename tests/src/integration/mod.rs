//! # Integration Scenarios
//!
//! Multi-node flows over one shared ledger, driven through
//! [`crate::harness::TestNetwork`].
//!
//! - `collateral` - collateral locks follow the registry
//! - `dismissal` - dismiss voting and heartbeat-driven auto dismissal
//! - `instant_rounds` - instant transactions, vice-blocks, reward split
//! - `recovery` - reorgs, reindex and restart determinism

pub mod collateral;
pub mod dismissal;
pub mod instant_rounds;
pub mod recovery;
