//! # Quantum-Chain Test Suite
//!
//! Unified test crate for the masternode subsystem:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # Multi-node network over one in-memory ledger
//! ├── benchmarks/       # Performance tests per subsystem
//! │   └── qc_08_dpos.rs
//! │
//! └── integration/      # Multi-node flows
//!     ├── dismissal.rs
//!     ├── instant_rounds.rs
//!     └── recovery.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # By category
//! cargo test -p qc-tests integration::dismissal
//! cargo test -p qc-tests integration::recovery
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

pub mod benchmarks;
pub mod harness;
pub mod integration;
