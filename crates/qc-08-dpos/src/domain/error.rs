//! Error types for the masternode subsystem
//!
//! Validation and state-conflict errors are returned before any mutation.
//! `QuorumNotReached` is an expected outcome, not a failure of the node.

use super::MasternodeId;
use shared_types::{Address, Hash, LedgerError};

/// Masternode / dPoS error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DposError {
    // --- registry ---
    #[error("Masternode {0:?} already announced")]
    DuplicateAnnounce(MasternodeId),

    #[error("Masternode with auth address {0:?} already exists")]
    AuthAddressInUse(Address),

    #[error("ownerAuthAddress and operatorAuthAddress must be different")]
    OwnerIsOperator,

    #[error("Invalid masternode name length {0}, expected 3..=255")]
    InvalidName(usize),

    #[error("Operator reward ratio {ratio} exceeds {max}")]
    InvalidRewardRatio { ratio: u32, max: u32 },

    #[error("Announce must pay {expected} to the collateral address in output 0")]
    MissingCollateral { expected: u64 },

    #[error("Masternode {0:?} does not exist")]
    UnknownMasternode(MasternodeId),

    #[error("Can't activate. Minimal activation height not reached (block {min_height}, current {height})")]
    CollateralNotMature { min_height: u64, height: u64 },

    #[error("Masternode {0:?} is already active")]
    AlreadyActive(MasternodeId),

    #[error("Masternode {0:?} was never activated")]
    NotActivated(MasternodeId),

    #[error("Collateral of masternode {0:?} was already spent")]
    AlreadyResigned(MasternodeId),

    #[error("Masternode {0:?} was dismissed by voting")]
    AlreadyDismissed(MasternodeId),

    #[error("You are not an owner!")]
    NotOwner,

    #[error("You are not an operator!")]
    NotOperator,

    #[error("Signer {0:?} is not the current operator")]
    StaleOperator(Address),

    #[error("Resign transaction does not spend the collateral of {0:?}")]
    CollateralNotSpent(MasternodeId),

    // --- dismiss voting ---
    #[error("Masternode can't vote against itself")]
    SelfVote,

    #[error("You are not an active operator!")]
    NotActive,

    #[error("Target masternode {0:?} is already resigned or dismissed")]
    TargetDead(MasternodeId),

    #[error("Vote against {0:?} already exists!")]
    DuplicateVote(Hash),

    #[error("Vote against {0:?} does not exist!")]
    NoSuchVote(MasternodeId),

    #[error("You've reached MAX_DISMISS_VOTES_PER_MN! ({0})")]
    TooManyVotes(usize),

    #[error("reason_desc too long ({0} > 255)")]
    ReasonTooLong(usize),

    #[error("Dismissing quorum not reached! (min quorum = {quorum}, current votes = {votes})")]
    QuorumNotReached { quorum: usize, votes: usize },

    // --- heartbeat ---
    #[error("Heartbeat signer {0:?} is not a current operator")]
    StaleSigner(Address),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Timestamp too far in future: {timestamp}, current is {now}")]
    FutureTimestamp { timestamp: u64, now: u64 },

    // --- rounds and instant transactions ---
    #[error("Operator {0:?} is not a member of the current team")]
    NotTeamMember(Address),

    #[error("Vote or block for stale tip {0:?}")]
    StaleTip(Hash),

    #[error("Invalid round {0}")]
    InvalidRound(u32),

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error("Conflicting vote from {0:?} (doublesign)")]
    DoubleSign(Address),

    #[error("Voter {0:?} exceeded the transaction vote limit")]
    TooManyTxVotes(Address),

    #[error("Transaction {0:?} was not submitted as instant")]
    NotInstant(Hash),

    #[error("Transaction {0:?} already known")]
    DuplicateTransaction(Hash),

    #[error("Vice-block {0:?} already known")]
    DuplicateViceBlock(Hash),

    #[error("No local operator key configured")]
    NoLocalOperator,

    #[error("No signing key for address {0:?}")]
    UnknownSigningKey(Address),

    // --- chain application and recovery ---
    #[error("Malformed masternode operation: {0}")]
    MalformedOperation(String),

    #[error("Block at height {height} does not extend tip {tip:?}")]
    DisconnectedBlock { height: u64, tip: Option<Hash> },

    #[error("No team recorded for sealed block at height {0}")]
    MissingTeam(u64),

    #[error("State divergence at height {height}: live {live:?} != replayed {replayed:?}")]
    StateDivergence {
        height: u64,
        live: Hash,
        replayed: Hash,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Snapshot store error: {0}")]
    Snapshot(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Event bus error: {0}")]
    EventBusError(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl DposError {
    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            DposError::DuplicateAnnounce(_) => "duplicate_announce",
            DposError::AuthAddressInUse(_) => "auth_in_use",
            DposError::CollateralNotMature { .. } => "collateral_not_mature",
            DposError::AlreadyActive(_) => "already_active",
            DposError::NotOwner => "not_owner",
            DposError::StaleOperator(_) => "stale_operator",
            DposError::SelfVote => "self_vote",
            DposError::NotActive => "not_active",
            DposError::DuplicateVote(_) => "duplicate_vote",
            DposError::NoSuchVote(_) => "no_such_vote",
            DposError::QuorumNotReached { .. } => "quorum_not_reached",
            DposError::StaleSigner(_) => "stale_signer",
            DposError::InvalidSignature => "invalid_signature",
            DposError::NotTeamMember(_) => "not_team_member",
            DposError::DoubleSign(_) => "doublesign",
            _ => "other",
        }
    }
}

impl From<bincode::Error> for DposError {
    fn from(e: bincode::Error) -> Self {
        DposError::Serialization(e.to_string())
    }
}

/// Result type for masternode operations
pub type DposResult<T> = Result<T, DposError>;
