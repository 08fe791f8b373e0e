//! # Core Ledger Entities
//!
//! The ledger-side shapes consumed by the masternode subsystem. The ledger
//! itself (UTXO set, script engine, mining) lives outside this workspace;
//! these types are the narrow contract it is seen through.
//!
//! ## Clusters
//!
//! - **Primitives**: `Hash`, `Address`, `Signature`, `PublicKey`, `Amount`
//! - **Chain**: `Block`, `BlockHeader`, `DposSeal`, `Transaction`
//! - **Coins**: `OutPoint`, `TxOut`

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};

// =============================================================================
// CLUSTER A: PRIMITIVES
// =============================================================================

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// A 64-byte compact ECDSA signature (r || s).
pub type Signature = [u8; 64];

/// A 33-byte SEC1-compressed secp256k1 public key.
pub type PublicKey = [u8; 33];

/// A 20-byte address.
pub type Address = [u8; 20];

/// Amount in base units.
pub type Amount = u64;

/// Base units per coin.
pub const COIN: Amount = 100_000_000;

/// The all-zero hash, used as the parent of genesis.
pub const ZERO_HASH: Hash = [0u8; 32];

/// SHA-256 over a byte slice.
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

// =============================================================================
// CLUSTER B: COINS
// =============================================================================

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Hash of the transaction that created the output.
    pub txid: Hash,
    /// Output index.
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Value in base units.
    pub value: Amount,
    /// Receiving address.
    pub address: Address,
}

// =============================================================================
// CLUSTER C: THE CHAIN
// =============================================================================

/// A ledger transaction.
///
/// `signer` is authenticated by the ledger's script engine before the
/// transaction is admitted; consumers treat it as trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Spent outputs.
    pub inputs: Vec<OutPoint>,
    /// Created outputs.
    pub outputs: Vec<TxOut>,
    /// Address that authorized the transaction.
    pub signer: Address,
    /// Opaque payload (masternode operations are carried here).
    pub metadata: Vec<u8>,
    /// Requests instant (sub-block) finality.
    pub instantly: bool,
    /// Disambiguates otherwise identical transactions.
    pub nonce: u64,
}

impl Transaction {
    /// Compute the transaction hash.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update((self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.txid);
            hasher.update(input.vout.to_le_bytes());
        }
        hasher.update((self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            hasher.update(output.value.to_le_bytes());
            hasher.update(output.address);
        }
        hasher.update(self.signer);
        hasher.update((self.metadata.len() as u32).to_le_bytes());
        hasher.update(&self.metadata);
        hasher.update([self.instantly as u8]);
        hasher.update(self.nonce.to_le_bytes());
        hasher.finalize().into()
    }

    /// Returns true if any input of `self` is also spent by `other`.
    pub fn conflicts_with(&self, other: &Transaction) -> bool {
        self.inputs.iter().any(|i| other.inputs.contains(i))
    }
}

/// Seal carried by a block produced through dPoS round voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DposSeal {
    /// Voting round inside the tip the block was agreed on.
    pub round: u32,
    /// Operator address of the proposing masternode.
    pub proposer: Address,
    /// Operator addresses that voted for the block.
    pub approved_by: Vec<Address>,
}

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height in the chain.
    pub height: u64,
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Commitment to the ordered transaction hashes.
    pub merkle_root: Hash,
    /// Unix time in milliseconds.
    pub timestamp: u64,
    /// Present on vice-blocks, absent on proof-of-work blocks.
    pub dpos: Option<DposSeal>,
}

impl BlockHeader {
    /// Compute the block hash.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.parent_hash);
        hasher.update(self.merkle_root);
        hasher.update(self.timestamp.to_le_bytes());
        if let Some(seal) = &self.dpos {
            hasher.update(seal.round.to_le_bytes());
            hasher.update(seal.proposer);
            for voter in &seal.approved_by {
                hasher.update(voter);
            }
        }
        hasher.finalize().into()
    }
}

/// A block as delivered by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block, computing its merkle root.
    pub fn new(
        parent_hash: Hash,
        height: u64,
        timestamp: u64,
        transactions: Vec<Transaction>,
        dpos: Option<DposSeal>,
    ) -> Self {
        let merkle_root = merkle_root(&transactions);
        Self {
            header: BlockHeader {
                height,
                parent_hash,
                merkle_root,
                timestamp,
                dpos,
            },
            transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn is_vice_block(&self) -> bool {
        self.header.dpos.is_some()
    }

    /// Returns true if the block contains the transaction.
    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.transactions.iter().any(|tx| &tx.hash() == tx_hash)
    }
}

/// Flat commitment over transaction hashes.
pub fn merkle_root(transactions: &[Transaction]) -> Hash {
    let mut hasher = Sha256::new();
    for tx in transactions {
        hasher.update(tx.hash());
    }
    hasher.finalize().into()
}

/// A signed message envelope shared by gossip payloads.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    /// Signer public key.
    #[serde_as(as = "Bytes")]
    pub public_key: PublicKey,
    /// Signature over the payload's signing hash.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}
