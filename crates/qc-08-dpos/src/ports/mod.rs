//! Ports layer (hexagonal architecture)
//!
//! Inbound: `MasternodeApi`. Outbound: ledger, event bus, signatures,
//! local operator key, snapshots, time.

mod inbound;
mod outbound;

pub use inbound::*;
pub use outbound::*;
