use crate::domain::{
    ChainState, Checkpoints, DposConfig, HeartbeatTracker, InstantPool, MasternodeId,
    RoundVoting,
};
use parking_lot::RwLock;
use shared_types::Hash;
use std::collections::BTreeSet;

/// Encapsulates the mutable state of the masternode service.
/// Chain-derived state is written only by the sync path; the rest is
/// filled from gossip and the local clock.
///
/// Lock order: chain, checkpoints, rounds, instant.
pub struct DposState {
    pub chain: RwLock<ChainState>,
    pub checkpoints: RwLock<Checkpoints>,
    pub heartbeats: RwLock<HeartbeatTracker>,
    pub rounds: RwLock<RoundVoting>,
    pub instant: RwLock<InstantPool>,
    /// Tip the current round started on and when (unix ms).
    pub round_started: RwLock<Option<(Hash, u64)>>,
    /// Tip whose approved vice-block was already handled.
    pub last_approved: RwLock<Option<Hash>>,
    /// Masternodes the local operator already voted to dismiss as outdated.
    pub auto_dismissed: RwLock<BTreeSet<MasternodeId>>,
}

impl DposState {
    pub fn new(config: &DposConfig, startup_time: u64) -> Self {
        Self {
            chain: RwLock::new(ChainState::new()),
            checkpoints: RwLock::new(Checkpoints::from_config(config)),
            heartbeats: RwLock::new(HeartbeatTracker::new(startup_time)),
            rounds: RwLock::new(RoundVoting::new()),
            instant: RwLock::new(InstantPool::new()),
            round_started: RwLock::new(None),
            last_approved: RwLock::new(None),
            auto_dismissed: RwLock::new(BTreeSet::new()),
        }
    }

    /// Forget heartbeats and timers; they repopulate from resent messages.
    pub fn reset_liveness(&self, startup_time: u64) {
        self.heartbeats.write().clear(startup_time);
        *self.round_started.write() = None;
        self.auto_dismissed.write().clear();
    }

    /// Forget everything learned from peers. Used when the ledger's genesis
    /// no longer matches ours.
    pub fn clear_gossip(&self, startup_time: u64) {
        self.reset_liveness(startup_time);
        self.rounds.write().clear();
        self.instant.write().clear();
        *self.last_approved.write() = None;
    }
}
