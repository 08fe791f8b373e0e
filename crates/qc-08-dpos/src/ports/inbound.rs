//! Driving ports (inbound API)

use crate::domain::{
    AnnounceRequest, ChainTip, DposResult, HeartbeatEntry, InstantTransaction, Liveness,
    MasternodeEntry, MasternodeId, MasternodeView, RewardSplit, RoundVote, Team, TxVote,
    ViceBlock,
};
use crate::events::GossipMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{Address, Amount, Hash, SignedPayload, Transaction};

/// Balances of one address as seen by the ledger and the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub spendable: Amount,
    /// Collateral outputs the ledger holds for the address.
    pub locked: Amount,
    /// Collateral of live masternodes at the address.
    pub collateral: Amount,
}

/// A heartbeat signed and posted by this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReceipt {
    /// Unix ms carried by the message.
    pub timestamp: u64,
    pub signature: SignedPayload,
    pub hash: Hash,
}

/// Result of a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub tip: Option<ChainTip>,
    pub applied: u64,
    /// Blocks rolled back by a reorg.
    pub disconnected: u64,
}

/// Masternode API
#[async_trait]
pub trait MasternodeApi: Send + Sync {
    // --- registry ---

    /// Build, fund and submit an announce. Returns the future masternode id.
    async fn announce(&self, request: AnnounceRequest) -> DposResult<MasternodeId>;

    async fn activate(&self, node: MasternodeId, operator: Address) -> DposResult<Hash>;

    async fn resign(&self, node: MasternodeId, payout: Address, owner: Address) -> DposResult<Hash>;

    async fn set_operator_reward(
        &self,
        node: MasternodeId,
        operator_auth_address: Address,
        operator_reward_address: Option<Address>,
        operator_reward_ratio: u32,
        signer: Address,
    ) -> DposResult<Hash>;

    // --- dismiss voting (signed by the local operator) ---

    async fn dismiss_vote(
        &self,
        against: MasternodeId,
        reason_code: u16,
        reason_desc: String,
    ) -> DposResult<Hash>;

    async fn dismiss_vote_recall(&self, against: MasternodeId) -> DposResult<Hash>;

    async fn finalize_dismiss_voting(&self, against: MasternodeId) -> DposResult<Hash>;

    // --- listings ---

    async fn list_masternodes(
        &self,
        ids: Option<Vec<MasternodeId>>,
        verbose: bool,
    ) -> DposResult<Vec<MasternodeEntry>>;

    async fn list_active_masternodes(&self) -> Vec<MasternodeView>;

    async fn balances(&self, address: Address) -> DposResult<Balances>;

    // --- heartbeat ---

    /// Sign a heartbeat with the key of `sender` and relay it. The
    /// timestamp defaults to the current time.
    async fn send_heartbeat(
        &self,
        sender: Address,
        timestamp: Option<u64>,
    ) -> DposResult<HeartbeatReceipt>;

    async fn list_heartbeats(&self) -> Vec<HeartbeatEntry>;

    async fn filter_masternodes_by_liveness(&self, class: Liveness) -> Vec<MasternodeId>;

    // --- rounds and instant transactions ---

    async fn get_team(&self, height: Option<u64>) -> Option<Team>;

    async fn list_vice_blocks(&self) -> Vec<ViceBlock>;

    async fn list_round_votes(&self) -> Vec<RoundVote>;

    async fn list_tx_votes(&self) -> Vec<TxVote>;

    async fn list_instant_transactions(&self) -> Vec<InstantTransaction>;

    async fn list_committed_txs(&self) -> Vec<InstantTransaction>;

    /// Submit a wallet transaction; `instantly` routes it to team voting.
    async fn submit_transaction(&self, tx: Transaction, instantly: bool) -> DposResult<Hash>;

    async fn reward_split(&self, height: u64) -> DposResult<Option<RewardSplit>>;

    /// Process a message received from a peer.
    async fn handle_gossip(&self, message: GossipMessage) -> DposResult<()>;

    // --- recovery ---

    /// Catch up with the ledger, following reorgs.
    async fn sync(&self) -> DposResult<SyncReport>;

    /// Drop all state and replay the ledger from genesis.
    async fn reindex(&self) -> DposResult<SyncReport>;

    async fn state_digest(&self) -> DposResult<Hash>;
}
