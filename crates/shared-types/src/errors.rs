//! # Error Types
//!
//! Defines error types used across crates.

use thiserror::Error;

/// Errors surfaced by the ledger adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No block at the requested height on the active chain.
    #[error("Block not found at height {0}")]
    BlockNotFound(u64),

    /// Unknown transaction hash.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Raw bytes did not decode to a transaction.
    #[error("TX decode failed: {0}")]
    DecodeFailed(String),

    /// Input is unknown or already spent.
    #[error("Input not found or already spent: {txid}:{vout}")]
    MissingInput { txid: String, vout: u32 },

    /// Input is already spent by a pending transaction.
    #[error("Input conflicts with pending transaction {conflict}")]
    ConflictingInput { conflict: String },

    /// Payer cannot cover the outputs.
    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    /// Outputs exceed inputs.
    #[error("Outputs ({outputs}) exceed inputs ({inputs})")]
    ValueOverflow { inputs: u64, outputs: u64 },

    /// Block was refused by the ledger.
    #[error("Block rejected: {0}")]
    BlockRejected(String),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
