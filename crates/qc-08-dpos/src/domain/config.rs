//! Subsystem configuration
//!
//! Every threshold that is a policy rather than a protocol rule lives here,
//! with regtest and mainnet presets.

use super::{DposError, DposResult};
use serde::{Deserialize, Serialize};
use shared_types::{Amount, COIN};

/// Rule turning a voter count into a minimum number of agreeing votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumRule {
    /// `floor(2n/3) + 1`
    TwoThirdsPlusOne,
    /// `max(floor(2n/3), floor)`
    TwoThirdsWithFloor(usize),
    /// `floor(n/2) + 1`
    Majority,
}

impl QuorumRule {
    /// Minimum votes required among `voters`.
    pub fn threshold(&self, voters: usize) -> usize {
        match self {
            QuorumRule::TwoThirdsPlusOne => voters * 2 / 3 + 1,
            QuorumRule::TwoThirdsWithFloor(floor) => (voters * 2 / 3).max(*floor),
            QuorumRule::Majority => voters / 2 + 1,
        }
    }
}

/// Heartbeat liveness settings.
///
/// `T_stale = max(active, period_floor_nodes) * per_node_period_ms` and
/// `T_outdated = T_stale * outdated_factor` unless overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub period_floor_nodes: u64,
    pub per_node_period_ms: u64,
    pub outdated_factor: u64,
    /// Fixed stale threshold, replacing the node-count formula.
    pub stale_after_ms: Option<u64>,
    /// Fixed outdated threshold, replacing the node-count formula.
    pub outdated_after_ms: Option<u64>,
    /// Messages stamped further than this into the future are rejected.
    pub max_future_drift_ms: u64,
    /// Messages kept per sender.
    pub history_len: usize,
    /// Cast dismiss votes against outdated nodes when running as an operator.
    pub auto_dismiss_outdated: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period_floor_nodes: 30,
            per_node_period_ms: 1_000,
            outdated_factor: 20,
            stale_after_ms: None,
            outdated_after_ms: None,
            max_future_drift_ms: 4_444,
            history_len: 16,
            auto_dismiss_outdated: true,
        }
    }
}

/// Block reward split between the proposer and the rest of the team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPolicy {
    /// Percentage of the block reward paid to the proposer.
    pub proposer_percent: u64,
    /// Reward paid by every vice-block.
    pub block_subsidy: Amount,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            proposer_percent: 50,
            block_subsidy: 625 * COIN / 100,
        }
    }
}

/// Team and round settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    pub team_size: usize,
    /// Blocks between team recomputations.
    pub rotation_interval: u64,
    pub round_quorum: QuorumRule,
    pub tx_quorum: QuorumRule,
    /// Tx votes a single voter may cast per (tip, round).
    pub max_tx_votes_per_voter: usize,
    /// A round without progress for this long is passed.
    pub round_timeout_ms: u64,
    /// Votes and vice-blocks for tips older than this are pruned.
    pub vote_retention_blocks: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            team_size: 10,
            rotation_interval: 1,
            round_quorum: QuorumRule::Majority,
            tx_quorum: QuorumRule::Majority,
            max_tx_votes_per_voter: 1_000,
            round_timeout_ms: 5 * 60 * 1_000,
            vote_retention_blocks: 100,
        }
    }
}

/// Complete masternode subsystem configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DposConfig {
    /// Exact amount an announce must lock.
    pub collateral_amount: Amount,
    /// Blocks between announce and the earliest activation.
    pub activation_delay: u64,
    /// Activate matured masternodes without an explicit transaction.
    pub auto_activation: bool,
    pub max_dismiss_votes_per_mn: usize,
    pub dismiss_quorum: QuorumRule,
    /// Finalize dismissals without an explicit transaction once quorum is met.
    pub auto_finalization: bool,
    /// Blocks between in-memory state checkpoints.
    pub snapshot_interval: u64,
    /// Checkpoints retained for reorg rewinds.
    pub snapshots_kept: usize,
    pub heartbeat: HeartbeatConfig,
    pub rounds: RoundConfig,
    pub reward: RewardPolicy,
}

impl Default for DposConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl DposConfig {
    pub fn mainnet() -> Self {
        Self {
            collateral_amount: 1_000_000 * COIN,
            activation_delay: 100,
            auto_activation: true,
            max_dismiss_votes_per_mn: 20,
            dismiss_quorum: QuorumRule::TwoThirdsWithFloor(32),
            auto_finalization: true,
            snapshot_interval: 100,
            snapshots_kept: 10,
            heartbeat: HeartbeatConfig::default(),
            rounds: RoundConfig::default(),
            reward: RewardPolicy::default(),
        }
    }

    pub fn regtest() -> Self {
        Self {
            collateral_amount: 1_000 * COIN,
            activation_delay: 10,
            dismiss_quorum: QuorumRule::TwoThirdsPlusOne,
            snapshot_interval: 10,
            rounds: RoundConfig {
                team_size: 4,
                ..RoundConfig::default()
            },
            ..Self::mainnet()
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> DposResult<()> {
        if self.collateral_amount == 0 {
            return Err(DposError::InvalidConfig("collateral_amount must be > 0".into()));
        }
        if self.rounds.team_size == 0 {
            return Err(DposError::InvalidConfig("team_size must be > 0".into()));
        }
        if self.rounds.rotation_interval == 0 {
            return Err(DposError::InvalidConfig("rotation_interval must be > 0".into()));
        }
        if self.reward.proposer_percent > 100 {
            return Err(DposError::InvalidConfig(format!(
                "proposer_percent {} > 100",
                self.reward.proposer_percent
            )));
        }
        if self.heartbeat.outdated_factor < 2 {
            return Err(DposError::InvalidConfig("outdated_factor must be >= 2".into()));
        }
        if let (Some(stale), Some(outdated)) = (
            self.heartbeat.stale_after_ms,
            self.heartbeat.outdated_after_ms,
        ) {
            if stale >= outdated {
                return Err(DposError::InvalidConfig(
                    "stale threshold must be below outdated threshold".into(),
                ));
            }
        }
        if self.snapshot_interval == 0 {
            return Err(DposError::InvalidConfig("snapshot_interval must be > 0".into()));
        }
        Ok(())
    }
}
