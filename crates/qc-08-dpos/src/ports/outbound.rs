//! Driven ports (outbound dependencies)

use crate::domain::{ChainState, DposResult, InstantPool, RoundVoting};
use crate::events::{DposEvent, GossipMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{
    Address, Amount, Block, Hash, LedgerResult, OutPoint, SignedPayload, Transaction,
};

/// Read access to the UTXO ledger plus transaction and block submission.
///
/// The ledger owns script validation and admission-time double-spend
/// rejection; the masternode subsystem only reads blocks and submits
/// transactions it built.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Height of the active chain tip.
    async fn block_height(&self) -> LedgerResult<u64>;

    /// Block at `height` on the active chain.
    async fn block(&self, height: u64) -> LedgerResult<Block>;

    async fn raw_transaction(&self, hash: &Hash) -> LedgerResult<Vec<u8>>;

    fn encode_transaction(&self, tx: &Transaction) -> Vec<u8>;

    fn decode_transaction(&self, raw: &[u8]) -> LedgerResult<Transaction>;

    /// Outpoint exists, is unspent, and has at least `confirmations`.
    async fn is_collateral_mature(&self, outpoint: &OutPoint, confirmations: u64) -> LedgerResult<bool>;

    /// Value held by `address` in masternode collateral outputs.
    async fn locked_balance(&self, address: &Address) -> LedgerResult<Amount>;

    /// Spendable value held by `address`.
    async fn balance(&self, address: &Address) -> LedgerResult<Amount>;

    /// Add inputs owned by `payer` covering the outputs, plus change.
    async fn fund_transaction(&self, tx: Transaction, payer: &Address) -> LedgerResult<Transaction>;

    /// Admit a transaction to the mempool.
    async fn submit_transaction(&self, raw: Vec<u8>) -> LedgerResult<Hash>;

    /// Hand an approved vice-block to the ledger.
    async fn submit_block(&self, block: Block) -> LedgerResult<Hash>;
}

/// Event bus for subscribers and peer relay.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: DposEvent) -> Result<(), String>;

    /// Relay a gossip message to peers.
    async fn relay(&self, message: GossipMessage) -> Result<(), String>;
}

/// Signature verification with signer recovery.
pub trait SignatureVerifier: Send + Sync {
    /// Address of the key that produced `auth` over `hash`, if valid.
    fn verify(&self, hash: &Hash, auth: &SignedPayload) -> Option<Address>;
}

/// The local operator key, present when this node runs a masternode.
pub trait MasternodeSigner: Send + Sync {
    fn operator_address(&self) -> Address;

    fn sign(&self, hash: &Hash) -> DposResult<SignedPayload>;
}

/// Round and instant-transaction state learned from peers. Persisted
/// beside the chain snapshot but never part of the state digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipSnapshot {
    pub rounds: RoundVoting,
    pub instant: InstantPool,
}

/// Persistence of masternode state across restarts.
pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> DposResult<Option<ChainState>>;

    fn save(&self, state: &ChainState) -> DposResult<()>;

    fn load_gossip(&self) -> DposResult<Option<GossipSnapshot>>;

    fn save_gossip(&self, gossip: &GossipSnapshot) -> DposResult<()>;
}

/// Wall clock for liveness and round timeouts.
pub trait TimeSource: Send + Sync {
    /// Current unix time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Default time source using system time
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
