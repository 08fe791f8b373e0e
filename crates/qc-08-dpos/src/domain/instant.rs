//! Instant transactions
//!
//! Transactions flagged `instantly` are voted on by the current team.
//! `tx_quorum` YES votes finalize a transaction before it is mined; once
//! more NO votes arrive than `team_size - quorum`, it can never finalize
//! and is rejected. A reorg that drops the block carrying a finalized
//! transaction revokes it unless the new chain includes it again.
//!
//! Settled entries (mined, rejected, revoked, or left undecided) are pruned
//! once they fall out of the vote retention window. Finalized transactions
//! waiting for a block stay until mined.

use super::{vote_signing_hash, DposError, DposResult, RoundContext, VoteChoice, VoteDecision};
use serde::{Deserialize, Serialize};
use shared_types::{Address, Block, Hash, OutPoint, Transaction};
use std::collections::{BTreeMap, BTreeSet};

/// A team member's vote on a pending instant transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxVote {
    pub voter: Address,
    pub tip: Hash,
    pub round: u32,
    pub choice: VoteChoice,
}

impl TxVote {
    pub fn signing_hash(&self) -> Hash {
        vote_signing_hash(b"tx-vote", &self.tip, self.round, &self.choice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstantStatus {
    Pending,
    Finalized,
    Rejected,
    /// Finalized, mined, then dropped by a reorg.
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantTransaction {
    pub hash: Hash,
    pub tx: Transaction,
    pub status: InstantStatus,
    pub finalized_at_tip: Option<Hash>,
    pub approved_by: Vec<Address>,
    pub mined_at: Option<u64>,
    /// Height the transaction was first voted on.
    pub submitted_height: u64,
    /// Order of finalization on this node.
    sequence: Option<u64>,
}

/// Pending and decided instant transactions with their votes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantPool {
    txs: BTreeMap<Hash, InstantTransaction>,
    /// Votes per transaction; votes may arrive before the transaction.
    votes: BTreeMap<Hash, BTreeMap<Address, TxVote>>,
    per_voter: BTreeMap<(Hash, u32, Address), usize>,
    /// Inputs this node voted YES for, and the transaction they went to.
    pledged: BTreeMap<OutPoint, Hash>,
    /// Mined instant transactions whose block was disconnected.
    unmined: BTreeSet<Hash>,
    next_sequence: u64,
}

impl InstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &Hash) -> Option<&InstantTransaction> {
        self.txs.get(hash)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Register a pending transaction. Returns the status reached if
    /// buffered votes already decide it.
    pub fn submit(
        &mut self,
        tx: Transaction,
        ctx: &RoundContext<'_>,
    ) -> DposResult<(Hash, Option<InstantStatus>)> {
        let hash = tx.hash();
        if !tx.instantly {
            return Err(DposError::NotInstant(hash));
        }
        if self.txs.contains_key(&hash) {
            return Err(DposError::DuplicateTransaction(hash));
        }
        self.txs.insert(
            hash,
            InstantTransaction {
                hash,
                tx,
                status: InstantStatus::Pending,
                finalized_at_tip: None,
                approved_by: Vec::new(),
                mined_at: None,
                submitted_height: ctx.height,
                sequence: None,
            },
        );
        Ok((hash, self.evaluate(&hash, ctx)))
    }

    /// Record a vote. Returns the status reached if this vote decided the
    /// transaction.
    pub fn vote(
        &mut self,
        vote: TxVote,
        ctx: &RoundContext<'_>,
        max_per_voter: usize,
    ) -> DposResult<Option<InstantStatus>> {
        if vote.tip != ctx.tip {
            return Err(DposError::StaleTip(vote.tip));
        }
        if vote.round == 0 {
            return Err(DposError::InvalidRound(vote.round));
        }
        if vote.choice.decision == VoteDecision::Pass {
            return Err(DposError::InvalidVote("PASS is not a transaction vote".into()));
        }
        if !ctx.team.contains_operator(&vote.voter) {
            return Err(DposError::NotTeamMember(vote.voter));
        }

        let subject = vote.choice.subject;
        if let Some(previous) = self.votes.get(&subject).and_then(|v| v.get(&vote.voter)) {
            if previous.choice == vote.choice {
                return Err(DposError::DuplicateVote(subject));
            }
            return Err(DposError::DoubleSign(vote.voter));
        }
        let counter = self
            .per_voter
            .entry((vote.tip, vote.round, vote.voter))
            .or_default();
        if *counter >= max_per_voter {
            return Err(DposError::TooManyTxVotes(vote.voter));
        }
        *counter += 1;

        self.votes
            .entry(subject)
            .or_default()
            .insert(vote.voter, vote);
        Ok(self.evaluate(&subject, ctx))
    }

    fn evaluate(&mut self, hash: &Hash, ctx: &RoundContext<'_>) -> Option<InstantStatus> {
        let entry = self.txs.get_mut(hash)?;
        if entry.status != InstantStatus::Pending {
            return None;
        }
        let votes = self.votes.get(hash)?;
        let (yes, no): (Vec<&TxVote>, Vec<&TxVote>) = votes
            .values()
            .filter(|v| ctx.team.contains_operator(&v.voter))
            .partition(|v| v.choice.decision == VoteDecision::Yes);

        if yes.len() >= ctx.quorum.max(1) {
            entry.status = InstantStatus::Finalized;
            entry.finalized_at_tip = Some(ctx.tip);
            entry.approved_by = yes.iter().map(|v| v.voter).collect();
            entry.sequence = Some(self.next_sequence);
            self.next_sequence += 1;
            Some(InstantStatus::Finalized)
        } else if no.len() > ctx.team_size.saturating_sub(ctx.quorum) {
            entry.status = InstantStatus::Rejected;
            Some(InstantStatus::Rejected)
        } else {
            None
        }
    }

    /// Local voting policy: YES unless an input is already pledged to
    /// another transaction. A YES pledges the inputs.
    pub fn local_choice(&mut self, hash: &Hash) -> Option<VoteChoice> {
        let entry = self.txs.get(hash)?;
        if entry.status != InstantStatus::Pending {
            return None;
        }
        let conflict = entry
            .tx
            .inputs
            .iter()
            .any(|input| self.pledged.get(input).is_some_and(|h| h != hash));
        if conflict {
            return Some(VoteChoice::no(*hash));
        }
        for input in &entry.tx.inputs {
            self.pledged.insert(*input, *hash);
        }
        Some(VoteChoice::yes(*hash))
    }

    /// Mark instant transactions carried by a connected block as mined.
    pub fn block_connected(&mut self, block: &Block) {
        for tx in &block.transactions {
            let hash = tx.hash();
            if let Some(entry) = self.txs.get_mut(&hash) {
                entry.mined_at = Some(block.height());
                self.unmined.remove(&hash);
            }
        }
    }

    /// Clear mined heights above `fork_height` after a reorg rewind.
    pub fn blocks_disconnected(&mut self, fork_height: u64) {
        for entry in self.txs.values_mut() {
            if entry.mined_at.is_some_and(|h| h > fork_height) {
                entry.mined_at = None;
                if entry.status == InstantStatus::Finalized {
                    self.unmined.insert(entry.hash);
                }
            }
        }
    }

    /// Revoke finalized transactions the new chain did not re-include.
    pub fn finish_reorg(&mut self) -> Vec<Hash> {
        let revoked: Vec<Hash> = std::mem::take(&mut self.unmined).into_iter().collect();
        for hash in &revoked {
            if let Some(entry) = self.txs.get_mut(hash) {
                entry.status = InstantStatus::Revoked;
                entry.sequence = None;
            }
        }
        self.pledged.retain(|_, h| !revoked.contains(h));
        revoked
    }

    /// Finalized transactions in finalization order.
    pub fn list_instant(&self) -> Vec<&InstantTransaction> {
        let mut finalized: Vec<&InstantTransaction> = self
            .txs
            .values()
            .filter(|e| e.status == InstantStatus::Finalized)
            .collect();
        finalized.sort_by_key(|e| e.sequence);
        finalized
    }

    /// Finalized transactions already mined, by height.
    pub fn list_committed(&self) -> Vec<&InstantTransaction> {
        let mut committed: Vec<&InstantTransaction> = self
            .list_instant()
            .into_iter()
            .filter(|e| e.mined_at.is_some())
            .collect();
        committed.sort_by_key(|e| (e.mined_at, e.sequence));
        committed
    }

    pub fn list_votes(&self) -> Vec<TxVote> {
        self.votes
            .values()
            .flat_map(|v| v.values().cloned())
            .collect()
    }

    /// Forget votes for tips other than `keep` and undecided orphans.
    pub fn prune_votes(&mut self, keep: &BTreeSet<Hash>) {
        let txs = &self.txs;
        for votes in self.votes.values_mut() {
            votes.retain(|_, v| keep.contains(&v.tip));
        }
        self.votes
            .retain(|hash, votes| !votes.is_empty() || txs.contains_key(hash));
        self.per_voter.retain(|(tip, _, _), _| keep.contains(tip));
    }

    /// Drop entries settled more than `retention` blocks below `height`.
    pub fn prune(&mut self, height: u64, retention: u64) -> usize {
        let expired = |at: u64| at.saturating_add(retention) < height;
        let dropped: BTreeSet<Hash> = self
            .txs
            .values()
            .filter(|e| match (e.status, e.mined_at) {
                (InstantStatus::Finalized, Some(mined)) => expired(mined),
                (InstantStatus::Finalized, None) => false,
                _ => expired(e.submitted_height),
            })
            .map(|e| e.hash)
            .collect();
        if dropped.is_empty() {
            return 0;
        }
        self.txs.retain(|hash, _| !dropped.contains(hash));
        self.votes.retain(|hash, _| !dropped.contains(hash));
        self.pledged.retain(|_, hash| !dropped.contains(hash));
        self.unmined.retain(|hash| !dropped.contains(hash));
        dropped.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
