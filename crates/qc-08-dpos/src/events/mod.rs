//! Events layer
//!
//! Consumed: gossip from peers. Published: state changes for subscribers.

mod consumed;
mod published;

pub use consumed::*;
pub use published::*;
