//! Domain layer for the masternode subsystem
//!
//! Chain-derived state (registry, dismiss votes, teams) lives in
//! `ChainState` and is only ever produced by applying blocks. Gossip-derived
//! state (heartbeats, round votes, instant transactions) is kept beside it
//! and rebuilt from messages after a restart.
//!
//! - registry / dismiss: masternode lifecycle and dismiss voting
//! - heartbeat: liveness classification
//! - team / rounds / reward: dPoS team, vice-blocks, reward split
//! - instant: instant-transaction voting
//! - chain_state / replay: block fold, checkpoints, recovery

mod chain_state;
mod config;
mod dismiss;
mod error;
mod heartbeat;
mod instant;
mod masternode;
mod operation;
mod registry;
mod replay;
mod reward;
mod rounds;
mod team;

pub use chain_state::*;
pub use config::*;
pub use dismiss::*;
pub use error::*;
pub use heartbeat::*;
pub use instant::*;
pub use masternode::*;
pub use operation::*;
pub use registry::*;
pub use replay::*;
pub use reward::*;
pub use rounds::*;
pub use team::*;
