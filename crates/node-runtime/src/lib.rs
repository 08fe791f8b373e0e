//! # Node Runtime Library
//!
//! This library exposes the internal modules of the node runtime for testing.
//! The main entry point is the `main.rs` binary.
//!
//! - `container` - configuration and the wired masternode subsystem
//! - `lock` - exclusive data directory lock

pub mod container;
pub mod lock;

pub use container::{ConfigError, NodeConfig, NodeDposService, SubsystemContainer};
pub use lock::{DataDirLock, LockError};
