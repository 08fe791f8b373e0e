//! # Shared Types Crate
//!
//! Ledger entities and error types shared by the masternode subsystem,
//! the node runtime, and the test suite.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: cross-crate types are defined here.
//! - **Ledger as a collaborator**: nothing here knows about masternodes;
//!   masternode operations travel inside `Transaction::metadata`.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
