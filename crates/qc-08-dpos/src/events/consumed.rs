//! Consumed events (gossip)
//!
//! Every signed message is re-verified on arrival; the signer address
//! recovered by the `SignatureVerifier` is the only identity trusted.

use crate::domain::{HeartbeatMessage, RoundVote, TxVote, ViceBlock};
use serde::{Deserialize, Serialize};
use shared_types::{Hash, SignedPayload, Transaction};

/// Message relayed between masternode peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipMessage {
    Heartbeat(HeartbeatMessage),
    ViceBlock {
        block: ViceBlock,
        auth: SignedPayload,
    },
    RoundVote {
        vote: RoundVote,
        auth: SignedPayload,
    },
    /// Instant transaction asking the team for votes.
    Transaction(Transaction),
    TxVote {
        vote: TxVote,
        auth: SignedPayload,
    },
}

impl GossipMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            GossipMessage::Heartbeat(_) => "heartbeat",
            GossipMessage::ViceBlock { .. } => "vice_block",
            GossipMessage::RoundVote { .. } => "round_vote",
            GossipMessage::Transaction(_) => "transaction",
            GossipMessage::TxVote { .. } => "tx_vote",
        }
    }

    /// Digest the sender signed, if the message is signed.
    pub fn signing_hash(&self) -> Option<Hash> {
        match self {
            GossipMessage::Heartbeat(m) => Some(HeartbeatMessage::signing_hash(m.timestamp)),
            GossipMessage::ViceBlock { block, .. } => Some(block.hash()),
            GossipMessage::RoundVote { vote, .. } => Some(vote.signing_hash()),
            GossipMessage::Transaction(_) => None,
            GossipMessage::TxVote { vote, .. } => Some(vote.signing_hash()),
        }
    }

    pub fn auth(&self) -> Option<SignedPayload> {
        match self {
            GossipMessage::Heartbeat(m) => Some(m.auth()),
            GossipMessage::ViceBlock { auth, .. }
            | GossipMessage::RoundVote { auth, .. }
            | GossipMessage::TxVote { auth, .. } => Some(auth.clone()),
            GossipMessage::Transaction(_) => None,
        }
    }
}
