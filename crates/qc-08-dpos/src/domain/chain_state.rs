//! Chain-derived masternode state
//!
//! `ChainState` is a fold over blocks: registry, outstanding dismiss votes,
//! teams and vice-block seals. Nothing else feeds it, so two nodes that
//! applied the same blocks hold byte-identical state and equal digests.
//!
//! Per block:
//! 1. for a vice-block, its reward split against the registry of the parent;
//! 2. masternode operations in transaction order (failures are skipped);
//! 3. auto-activation;
//! 4. auto-finalization of dismiss votes, in id order, quorum recomputed
//!    before every node;
//! 5. at rotation boundaries, the team for the next height.

use super::{
    next_team, split_reward, BlockContext, Dismissal, DismissVote, DposConfig, DposError,
    DposResult, MasternodeEntry, MasternodeId, MasternodeOperation, MasternodeView, Registry,
    RewardSplit, Team, VoteBook,
};
use serde::{Deserialize, Serialize};
use shared_types::{sha256, Block, DposSeal, Hash, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Hash,
}

/// A masternode operation that took effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOperation {
    pub tx: Hash,
    pub operation: MasternodeOperation,
    /// Masternode whose record or votes changed.
    pub masternode: MasternodeId,
}

/// What applying one block changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    pub height: u64,
    pub hash: Hash,
    pub applied: Vec<AppliedOperation>,
    /// Masternode transactions that failed validation, with the reason.
    pub skipped: Vec<(Hash, DposError)>,
    pub auto_activated: Vec<MasternodeId>,
    pub auto_dismissed: Vec<MasternodeId>,
    /// Set when the team for the next height differs from the current one.
    pub new_team: Option<Team>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    tip: Option<ChainTip>,
    registry: Registry,
    votes: VoteBook,
    /// Team in charge from the key height on, stored when it changes.
    teams: BTreeMap<u64, Team>,
    seals: BTreeMap<u64, DposSeal>,
    /// Payouts fixed when the seal was applied.
    rewards: BTreeMap<u64, RewardSplit>,
    block_hashes: BTreeMap<u64, Hash>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tip(&self) -> Option<ChainTip> {
        self.tip
    }

    /// Height of the next block to apply.
    pub fn next_height(&self) -> u64 {
        self.tip.map_or(0, |t| t.height + 1)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn votes(&self) -> &VoteBook {
        &self.votes
    }

    pub fn hash_at(&self, height: u64) -> Option<Hash> {
        self.block_hashes.get(&height).copied()
    }

    /// Team in charge of producing `height`.
    pub fn team_at(&self, height: u64) -> Option<&Team> {
        self.teams.range(..=height).next_back().map(|(_, team)| team)
    }

    /// Team voting on top of the current tip.
    pub fn current_team(&self) -> Option<&Team> {
        self.team_at(self.next_height())
    }

    pub fn seal_at(&self, height: u64) -> Option<&DposSeal> {
        self.seals.get(&height)
    }

    /// Canonical digest of the chain-derived state.
    pub fn digest(&self) -> DposResult<Hash> {
        Ok(sha256(&bincode::serialize(self)?))
    }

    // === BLOCK APPLICATION ===

    pub fn apply_block(&mut self, block: &Block, config: &DposConfig) -> DposResult<BlockOutcome> {
        let height = block.height();
        let hash = block.hash();
        let connects = match self.tip {
            None => height == 0,
            Some(tip) => height == tip.height + 1 && block.header.parent_hash == tip.hash,
        };
        if !connects {
            return Err(DposError::DisconnectedBlock {
                height,
                tip: self.tip.map(|t| t.hash),
            });
        }

        let ctx = BlockContext {
            height,
            timestamp: block.header.timestamp,
            block_hash: hash,
        };
        let mut outcome = BlockOutcome {
            height,
            hash,
            ..BlockOutcome::default()
        };

        if let Some(seal) = &block.header.dpos {
            self.seal(height, seal, config);
        }

        for tx in &block.transactions {
            let tx_hash = tx.hash();
            let operation = match MasternodeOperation::from_transaction(tx) {
                Ok(Some(op)) => op,
                Ok(None) => continue,
                Err(e) => {
                    debug!(height, tx = %hex::encode(tx_hash), error = %e, "skipping undecodable masternode tx");
                    outcome.skipped.push((tx_hash, e));
                    continue;
                }
            };
            match self.apply_operation(tx_hash, tx, operation.clone(), &ctx, config) {
                Ok(masternode) => outcome.applied.push(AppliedOperation {
                    tx: tx_hash,
                    operation,
                    masternode,
                }),
                Err(e) => {
                    debug!(height, tx = %hex::encode(tx_hash), kind = operation.kind(), error = %e, "skipping masternode tx");
                    outcome.skipped.push((tx_hash, e));
                }
            }
        }

        if config.auto_activation {
            outcome.auto_activated = self.registry.auto_activate(&ctx);
        }
        if config.auto_finalization {
            outcome.auto_dismissed = self.auto_finalize(&ctx, config);
        }

        if height % config.rounds.rotation_interval == 0 {
            let current = self.team_at(height + 1).cloned().unwrap_or_default();
            let next = next_team(
                &current,
                &self.registry,
                config.rounds.team_size,
                height + 1,
                &hash,
            );
            if next != current {
                self.teams.insert(height + 1, next.clone());
                outcome.new_team = Some(next);
            }
        }

        self.block_hashes.insert(height, hash);
        self.tip = Some(ChainTip { height, hash });
        Ok(outcome)
    }

    fn seal(&mut self, height: u64, seal: &DposSeal, config: &DposConfig) {
        self.seals.insert(height, seal.clone());
        let Some(team) = self.team_at(height) else {
            warn!(height, "vice-block sealed without a team");
            return;
        };
        match split_reward(
            &config.reward,
            config.reward.block_subsidy,
            team,
            &seal.proposer,
            &self.registry,
        ) {
            Ok(split) => {
                self.rewards.insert(height, split);
            }
            Err(e) => warn!(height, error = %e, "no reward split for vice-block"),
        }
    }

    fn operator_node(&self, tx: &Transaction) -> DposResult<MasternodeId> {
        self.registry
            .by_operator(&tx.signer)
            .ok_or(DposError::NotActive)
    }

    /// Validate an operation against the current state without applying it.
    pub fn check_operation(
        &self,
        tx: &Transaction,
        operation: &MasternodeOperation,
        height: u64,
        config: &DposConfig,
    ) -> DposResult<()> {
        match operation {
            MasternodeOperation::Announce(req) => {
                self.registry.check_announce(&tx.hash(), req, tx, config)
            }
            MasternodeOperation::Activate { node } => {
                self.registry.check_activate(&tx.signer, node, height)
            }
            MasternodeOperation::Resign { node, .. } => {
                self.registry.check_resign(&tx.signer, tx, node)
            }
            MasternodeOperation::SetOperatorReward {
                node,
                operator_auth_address,
                operator_reward_ratio,
                ..
            } => self.registry.check_set_operator_reward(
                &tx.signer,
                node,
                operator_auth_address,
                *operator_reward_ratio,
            ),
            MasternodeOperation::DismissVote {
                against,
                reason_desc,
                ..
            } => {
                let from = self.operator_node(tx)?;
                self.votes
                    .check_record(&self.registry, &from, against, reason_desc, config)
            }
            MasternodeOperation::DismissVoteRecall { against } => {
                let from = self.operator_node(tx)?;
                self.votes.check_recall(&self.registry, &from, against)
            }
            MasternodeOperation::FinalizeDismissVoting { against } => {
                let from = self.operator_node(tx)?;
                if !self.registry.is_active(&from) {
                    return Err(DposError::NotActive);
                }
                self.check_finalize(against, config)
            }
        }
    }

    fn apply_operation(
        &mut self,
        tx_hash: Hash,
        tx: &Transaction,
        operation: MasternodeOperation,
        ctx: &BlockContext,
        config: &DposConfig,
    ) -> DposResult<MasternodeId> {
        match operation {
            MasternodeOperation::Announce(req) => {
                self.registry.announce(tx_hash, tx, req, ctx, config)
            }
            MasternodeOperation::Activate { node } => {
                self.registry.activate(tx_hash, &tx.signer, &node, ctx)?;
                Ok(node)
            }
            MasternodeOperation::Resign { node, payout } => {
                self.registry.resign(tx_hash, tx, &node, payout, ctx)?;
                self.votes.clear_for(&node);
                Ok(node)
            }
            MasternodeOperation::SetOperatorReward {
                node,
                operator_auth_address,
                operator_reward_address,
                operator_reward_ratio,
            } => {
                self.registry.set_operator_reward(
                    &tx.signer,
                    &node,
                    operator_auth_address,
                    operator_reward_address,
                    operator_reward_ratio,
                )?;
                Ok(node)
            }
            MasternodeOperation::DismissVote {
                against,
                reason_code,
                reason_desc,
            } => {
                let from = self.operator_node(tx)?;
                let vote = DismissVote {
                    vote_tx: tx_hash,
                    from,
                    against,
                    reason_code,
                    reason_desc,
                    height_created: ctx.height,
                };
                self.votes.record(&self.registry, vote, config)?;
                Ok(against)
            }
            MasternodeOperation::DismissVoteRecall { against } => {
                let from = self.operator_node(tx)?;
                self.votes.recall(&self.registry, &from, &against)?;
                Ok(against)
            }
            MasternodeOperation::FinalizeDismissVoting { against } => {
                self.check_operation(
                    tx,
                    &MasternodeOperation::FinalizeDismissVoting { against },
                    ctx.height,
                    config,
                )?;
                let from = self.operator_node(tx)?;
                self.finalize_dismissal(&against, Some(tx_hash), Some(from), ctx, config)?;
                Ok(against)
            }
        }
    }

    // === DISMISSAL ===

    /// Current dismiss quorum for the live active count.
    pub fn dismiss_quorum(&self, config: &DposConfig) -> usize {
        config.dismiss_quorum.threshold(self.registry.active_count())
    }

    pub fn check_finalize(&self, against: &MasternodeId, config: &DposConfig) -> DposResult<()> {
        let target = self.registry.require(against)?;
        if target.is_dead() {
            return Err(DposError::TargetDead(*against));
        }
        let quorum = self.dismiss_quorum(config);
        let votes = self.votes.counter_votes_against(against);
        if votes < quorum {
            return Err(DposError::QuorumNotReached { quorum, votes });
        }
        Ok(())
    }

    fn finalize_dismissal(
        &mut self,
        against: &MasternodeId,
        tx: Option<Hash>,
        finalized_by: Option<MasternodeId>,
        ctx: &BlockContext,
        config: &DposConfig,
    ) -> DposResult<()> {
        self.check_finalize(against, config)?;
        self.registry.dismiss(
            against,
            Dismissal {
                height: ctx.height,
                tx,
                finalized_by,
            },
        )?;
        let cleared = self.votes.clear_for(against);
        info!(height = ctx.height, id = %super::id_hex(against), cleared, "masternode dismissed");
        Ok(())
    }

    fn auto_finalize(&mut self, ctx: &BlockContext, config: &DposConfig) -> Vec<MasternodeId> {
        let candidates: Vec<MasternodeId> = self
            .registry
            .iter()
            .filter(|(_, mn)| !mn.is_dead())
            .map(|(id, _)| *id)
            .collect();
        candidates
            .into_iter()
            .filter(|id| self.finalize_dismissal(id, None, None, ctx, config).is_ok())
            .collect()
    }

    // === VIEWS ===

    pub fn view(&self, id: &MasternodeId) -> Option<MasternodeView> {
        self.registry.get(id).map(|mn| MasternodeView {
            id: *id,
            status: mn.status(),
            node: mn.clone(),
            counter_votes_against: self.votes.counter_votes_against(id),
            counter_votes_from: self.votes.counter_votes_from(id),
        })
    }

    /// Listing in id order; all records when `ids` is `None`.
    pub fn list(&self, ids: Option<&[MasternodeId]>, verbose: bool) -> DposResult<Vec<MasternodeEntry>> {
        let selected: Vec<MasternodeId> = match ids {
            Some(ids) => {
                let mut ids = ids.to_vec();
                ids.sort();
                ids.dedup();
                ids
            }
            None => self.registry.iter().map(|(id, _)| *id).collect(),
        };
        selected
            .into_iter()
            .map(|id| {
                let view = self.view(&id).ok_or(DposError::UnknownMasternode(id))?;
                Ok(MasternodeEntry {
                    id,
                    status: view.status,
                    mn: verbose.then_some(view),
                })
            })
            .collect()
    }

    pub fn list_active(&self) -> Vec<MasternodeView> {
        self.registry
            .active_ids()
            .filter_map(|id| self.view(id))
            .collect()
    }

    /// Reward split of the vice-block at `height` as paid when it was
    /// sealed; `None` for proof-of-work blocks.
    pub fn reward_split(&self, height: u64) -> DposResult<Option<RewardSplit>> {
        let Some(seal) = self.seals.get(&height) else {
            return Ok(None);
        };
        if let Some(split) = self.rewards.get(&height) {
            return Ok(Some(split.clone()));
        }
        match self.team_at(height) {
            None => Err(DposError::MissingTeam(height)),
            Some(_) => Err(DposError::NotTeamMember(seal.proposer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnnounceRequest, MasternodeStatus};
    use shared_types::{OutPoint, TxOut, ZERO_HASH};

    struct Chain {
        config: DposConfig,
        state: ChainState,
        tip: Hash,
    }

    impl Chain {
        fn new() -> Self {
            let mut config = DposConfig::regtest();
            config.auto_finalization = false;
            let mut chain = Self {
                config,
                state: ChainState::new(),
                tip: ZERO_HASH,
            };
            chain.mine(vec![]);
            chain
        }

        fn mine(&mut self, transactions: Vec<Transaction>) -> BlockOutcome {
            let height = self.state.next_height();
            let block = Block::new(self.tip, height, height * 1_000, transactions, None);
            self.tip = block.hash();
            self.state.apply_block(&block, &self.config).unwrap()
        }

        fn mine_until(&mut self, height: u64) {
            while self.state.next_height() <= height {
                self.mine(vec![]);
            }
        }
    }

    fn op_tx(signer: [u8; 20], op: MasternodeOperation, nonce: u64) -> Transaction {
        Transaction {
            inputs: vec![],
            outputs: vec![],
            signer,
            metadata: op.encode().unwrap(),
            instantly: false,
            nonce,
        }
    }

    fn announce_tx(seed: u8, config: &DposConfig) -> Transaction {
        let op = MasternodeOperation::Announce(AnnounceRequest {
            name: format!("node-{seed}"),
            owner_auth_address: [seed; 20],
            operator_auth_address: [seed + 100; 20],
            owner_reward_address: [seed; 20],
            operator_reward_address: None,
            operator_reward_ratio: 0,
            collateral_address: [seed; 20],
        });
        Transaction {
            inputs: vec![OutPoint::new([seed; 32], 0)],
            outputs: vec![TxOut {
                value: config.collateral_amount,
                address: [seed; 20],
            }],
            signer: [seed; 20],
            metadata: op.encode().unwrap(),
            instantly: false,
            nonce: 0,
        }
    }

    fn vote_tx(from: u8, against: MasternodeId, nonce: u64) -> Transaction {
        op_tx(
            [from + 100; 20],
            MasternodeOperation::DismissVote {
                against,
                reason_code: 0,
                reason_desc: String::new(),
            },
            nonce,
        )
    }

    fn four_active(chain: &mut Chain) -> Vec<MasternodeId> {
        let txs: Vec<Transaction> = (1..=4).map(|s| announce_tx(s, &chain.config)).collect();
        let ids = txs.iter().map(|tx| tx.hash()).collect();
        chain.mine(txs);
        chain.mine_until(11);
        ids
    }

    #[test]
    fn test_disconnected_block_rejected() {
        let mut chain = Chain::new();
        let block = Block::new([9; 32], 1, 0, vec![], None);
        assert!(matches!(
            chain.state.apply_block(&block, &chain.config),
            Err(DposError::DisconnectedBlock { height: 1, .. })
        ));
    }

    #[test]
    fn test_auto_activation_and_team() {
        let mut chain = Chain::new();
        let ids = four_active(&mut chain);
        assert_eq!(chain.state.registry().active_count(), 4);
        for id in &ids {
            assert_eq!(chain.state.view(id).unwrap().status, MasternodeStatus::Active);
        }
        let team = chain.state.current_team().unwrap();
        assert!(team.is_full(4));
    }

    #[test]
    fn test_failing_operation_is_skipped() {
        let mut chain = Chain::new();
        let ids = four_active(&mut chain);
        let outcome = chain.mine(vec![vote_tx(1, ids[0], 1)]);
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].1, DposError::SelfVote);
    }

    #[test]
    fn test_finalize_requires_quorum() {
        let mut chain = Chain::new();
        let ids = four_active(&mut chain);
        let target = ids[3];

        chain.mine(vec![vote_tx(1, target, 1), vote_tx(2, target, 1)]);
        let finalize = op_tx(
            [101; 20],
            MasternodeOperation::FinalizeDismissVoting { against: target },
            2,
        );
        let height = chain.state.next_height();
        assert_eq!(
            chain.state.check_operation(
                &finalize,
                &MasternodeOperation::FinalizeDismissVoting { against: target },
                height,
                &chain.config
            ),
            Err(DposError::QuorumNotReached {
                quorum: 3,
                votes: 2
            })
        );

        chain.mine(vec![vote_tx(3, target, 1), vote_tx(4, ids[0], 1)]);
        let outcome = chain.mine(vec![finalize]);
        assert_eq!(outcome.applied.len(), 1);
        let view = chain.state.view(&target).unwrap();
        assert_eq!(view.status, MasternodeStatus::ActivatedDismissed);
        assert_eq!(view.counter_votes_against, 0);
        assert_eq!(view.counter_votes_from, 0);
        assert!(chain.state.votes().is_empty());
    }

    #[test]
    fn test_auto_finalization_runs_after_transactions() {
        let mut chain = Chain::new();
        chain.config.auto_finalization = true;
        let ids = four_active(&mut chain);
        let target = ids[0];

        let outcome = chain.mine(vec![
            vote_tx(2, target, 1),
            vote_tx(3, target, 1),
            vote_tx(4, target, 1),
        ]);
        assert_eq!(outcome.auto_dismissed, vec![target]);
        assert_eq!(chain.state.registry().active_count(), 3);
    }

    #[test]
    fn test_digest_tracks_content() {
        let mut a = Chain::new();
        let mut b = Chain::new();
        four_active(&mut a);
        four_active(&mut b);
        assert_eq!(a.state.digest().unwrap(), b.state.digest().unwrap());
        a.mine(vec![]);
        assert_ne!(a.state.digest().unwrap(), b.state.digest().unwrap());
    }

    #[test]
    fn test_reward_split_for_vice_block() {
        let mut chain = Chain::new();
        four_active(&mut chain);
        let team = chain.state.current_team().unwrap().clone();
        let proposer = team.operators()[0];
        let height = chain.state.next_height();
        let block = Block::new(
            chain.tip,
            height,
            height * 1_000,
            vec![],
            Some(DposSeal {
                round: 1,
                proposer,
                approved_by: team.operators(),
            }),
        );
        chain.state.apply_block(&block, &chain.config).unwrap();

        let split = chain.state.reward_split(height).unwrap().unwrap();
        assert_eq!(split.total, chain.config.reward.block_subsidy);
        assert_eq!(chain.state.reward_split(height - 1), Ok(None));
    }

    fn sealed_block(chain: &Chain, proposer: shared_types::Address, transactions: Vec<Transaction>) -> Block {
        let height = chain.state.next_height();
        Block::new(
            chain.tip,
            height,
            height * 1_000,
            transactions,
            Some(DposSeal {
                round: 1,
                proposer,
                approved_by: vec![proposer],
            }),
        )
    }

    #[test]
    fn test_reward_split_fixed_at_seal() {
        let mut chain = Chain::new();
        let ids = four_active(&mut chain);
        let proposer = chain.state.current_team().unwrap().operators()[0];
        let block = sealed_block(&chain, proposer, vec![]);
        let height = block.height();
        chain.tip = block.hash();
        chain.state.apply_block(&block, &chain.config).unwrap();
        let sealed = chain.state.reward_split(height).unwrap().unwrap();

        // Owners hand their whole reward to a new operator address later on.
        let updates: Vec<Transaction> = (1..=4u8)
            .zip(&ids)
            .map(|(seed, id)| {
                op_tx(
                    [seed; 20],
                    MasternodeOperation::SetOperatorReward {
                        node: *id,
                        operator_auth_address: [seed + 100; 20],
                        operator_reward_address: Some([0xaa; 20]),
                        operator_reward_ratio: crate::domain::RATIO_BASE,
                    },
                    1,
                )
            })
            .collect();
        let outcome = chain.mine(updates);
        assert_eq!(outcome.applied.len(), 4);

        assert_eq!(chain.state.reward_split(height).unwrap(), Some(sealed.clone()));
        assert!(sealed.shares.iter().all(|s| s.address != [0xaa; 20]));
    }

    #[test]
    fn test_seal_without_team_reports_missing_team() {
        let mut chain = Chain::new();
        let block = sealed_block(&chain, [7; 20], vec![]);
        let height = block.height();
        chain.tip = block.hash();
        chain.state.apply_block(&block, &chain.config).unwrap();
        assert_eq!(
            chain.state.reward_split(height),
            Err(DposError::MissingTeam(height))
        );
    }

    #[test]
    fn test_list_unknown_id() {
        let chain = Chain::new();
        assert_eq!(
            chain.state.list(Some(&[[5; 32]]), false),
            Err(DposError::UnknownMasternode([5; 32]))
        );
    }
}
