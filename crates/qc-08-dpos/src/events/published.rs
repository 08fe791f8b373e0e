//! Published events (outgoing)
//!
//! Emitted after the state change they describe is visible through the
//! API. Events derived from blocks are re-emitted when a reorg replays
//! those blocks.

use crate::domain::MasternodeId;
use serde::{Deserialize, Serialize};
use shared_types::{Address, Hash};

/// State change notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DposEvent {
    MasternodeAnnounced {
        id: MasternodeId,
        height: u64,
    },
    MasternodeActivated {
        id: MasternodeId,
        height: u64,
        /// Activated by the auto-activation rule.
        automatic: bool,
    },
    MasternodeResigned {
        id: MasternodeId,
        height: u64,
    },
    OperatorRewardChanged {
        id: MasternodeId,
        height: u64,
    },
    DismissVoteRecorded {
        tx: Hash,
        against: MasternodeId,
        height: u64,
    },
    DismissVoteRecalled {
        tx: Hash,
        against: MasternodeId,
        height: u64,
    },
    MasternodeDismissed {
        id: MasternodeId,
        height: u64,
        automatic: bool,
    },
    /// Team in charge from `height` on.
    TeamChanged {
        height: u64,
        members: Vec<MasternodeId>,
    },
    ViceBlockApproved {
        hash: Hash,
        height: u64,
        round: u32,
        approved_by: Vec<Address>,
    },
    InstantTxFinalized {
        tx: Hash,
        approved_by: Vec<Address>,
    },
    InstantTxRejected {
        tx: Hash,
    },
    InstantTxRevoked {
        tx: Hash,
    },
    /// Blocks from `from_height` were (re)applied, e.g. after a reorg.
    ChainReplayed {
        from_height: u64,
        to_height: u64,
        digest: Hash,
    },
}
