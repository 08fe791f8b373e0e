//! Adapters layer (hexagonal architecture)
//!
//! In-memory and file-backed implementations of the outbound ports, used
//! by the node runtime and the test suites.

mod event_bus;
mod ledger;
mod signature;
mod snapshot;

pub use event_bus::*;
pub use ledger::*;
pub use signature::*;
pub use snapshot::*;
