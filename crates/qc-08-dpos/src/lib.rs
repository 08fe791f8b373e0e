//! # qc-08-dpos
//!
//! Masternode and dPoS subsystem for Quantum-Chain.
//!
//! ## Architecture
//!
//! The subsystem sits beside a UTXO ledger. Masternode transactions are
//! ordinary ledger transactions whose metadata carries an encoded
//! `MasternodeOperation`; everything else about masternodes is derived.
//!
//! ### Chain-derived state
//!
//! `ChainState` (registry, dismiss votes, teams) is a deterministic fold
//! over ledger blocks. The service advances it with `sync`, rewinds it to
//! a checkpoint on reorg, and can rebuild it from genesis with `reindex`.
//! Two nodes that applied the same blocks report the same `state_digest`.
//!
//! ```text
//! Ledger ──blocks──→ ChainState ──events──→ [Event Bus]
//!    ↑                   │
//!    └──vice-blocks──── Rounds ←──gossip── peers
//! ```
//!
//! ### Gossip-derived state
//!
//! Heartbeats, vice-blocks, round votes and instant-transaction votes come
//! from peers and are never written to the chain. Every signed message is
//! re-verified on arrival; the recovered signer is the only identity
//! trusted.
//!
//! ### dPoS rounds
//!
//! Once the team is full, its members vote on vice-blocks for the next
//! height. An approved vice-block is handed to the ledger as a block with
//! a `DposSeal`; its reward is split between the proposer and the team.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qc_08_dpos::{DposConfig, DposDependencies, DposService};
//! use qc_08_dpos::adapters::{InMemoryEventBus, InMemoryLedger, InMemorySnapshotStore, K256Verifier};
//!
//! let service = DposService::new(DposDependencies {
//!     ledger,
//!     event_bus,
//!     sig_verifier: Arc::new(K256Verifier),
//!     snapshots,
//!     signer: Some(operator_key),
//!     config: DposConfig::regtest(),
//! });
//!
//! service.start().await?;
//! service.send_heartbeat(operator, None).await?;
//! service.on_timer().await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod events;
pub mod metrics;
pub mod ports;
pub mod service;
pub mod state;

// Re-export main types
pub use adapters::{
    FileSnapshotStore, InMemoryEventBus, InMemoryLedger, InMemorySnapshotStore, K256Signer,
    K256Verifier,
};
pub use domain::{
    AnnounceRequest, ChainState, ChainTip, DposConfig, DposError, DposResult, InstantStatus,
    Liveness, MasternodeId, MasternodeOperation, MasternodeStatus, QuorumRule, Team,
};
pub use events::{DposEvent, GossipMessage};
pub use ports::{
    Balances, EventBus, GossipSnapshot, HeartbeatReceipt, LedgerAdapter, MasternodeApi,
    MasternodeSigner, SignatureVerifier, SnapshotStore, SyncReport, TimeSource,
};
pub use service::{DposDependencies, DposService};
