//! dPoS rounds: vice-blocks and round votes
//!
//! Within one tip the team votes in numbered rounds starting at 1. Each
//! member casts at most one vote per round: YES or NO for a vice-block, or
//! PASS to give up on the round. A vice-block collecting `quorum` YES votes
//! is approved. A round is occupied once enough PASS votes arrived that no
//! vice-block of that round can reach quorum any more.
//!
//! Conflicting votes from one member in the same round are doublesigns,
//! detected the same way equivocating attestations are.

use super::{DposError, DposResult, Team};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{merkle_root, Address, Block, DposSeal, Hash, Transaction, ZERO_HASH};
use std::cmp::Reverse;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VoteDecision {
    Yes,
    No,
    Pass,
}

/// What a vote is about. PASS carries no subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoteChoice {
    pub subject: Hash,
    pub decision: VoteDecision,
}

impl VoteChoice {
    pub fn yes(subject: Hash) -> Self {
        Self {
            subject,
            decision: VoteDecision::Yes,
        }
    }

    pub fn no(subject: Hash) -> Self {
        Self {
            subject,
            decision: VoteDecision::No,
        }
    }

    pub fn pass() -> Self {
        Self {
            subject: ZERO_HASH,
            decision: VoteDecision::Pass,
        }
    }

    fn check(&self) -> DposResult<()> {
        match (self.decision, self.subject == ZERO_HASH) {
            (VoteDecision::Pass, false) => {
                Err(DposError::InvalidVote("PASS must not carry a subject".into()))
            }
            (VoteDecision::Yes | VoteDecision::No, true) => {
                Err(DposError::InvalidVote("missing vote subject".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Digest signed by a voter. `domain` separates round votes from tx votes.
pub(crate) fn vote_signing_hash(domain: &[u8], tip: &Hash, round: u32, choice: &VoteChoice) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(tip);
    hasher.update(round.to_le_bytes());
    hasher.update(choice.subject);
    hasher.update([choice.decision as u8]);
    hasher.finalize().into()
}

/// A team member's vote on vice-blocks of one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundVote {
    /// Operator address, recovered from the signature.
    pub voter: Address,
    pub tip: Hash,
    pub round: u32,
    pub choice: VoteChoice,
}

impl RoundVote {
    pub fn signing_hash(&self) -> Hash {
        vote_signing_hash(b"round-vote", &self.tip, self.round, &self.choice)
    }
}

/// A block proposal on top of `tip`, produced by a team member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViceBlock {
    pub tip: Hash,
    pub round: u32,
    pub height: u64,
    /// Operator address of the proposer.
    pub proposer: Address,
    /// Unix ms.
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

impl ViceBlock {
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(b"vice-block");
        hasher.update(self.tip);
        hasher.update(self.round.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.proposer);
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(merkle_root(&self.transactions));
        hasher.finalize().into()
    }

    /// Seal the proposal into a ledger block.
    pub fn to_block(&self, approved_by: Vec<Address>) -> Block {
        Block::new(
            self.tip,
            self.height,
            self.timestamp,
            self.transactions.clone(),
            Some(DposSeal {
                round: self.round,
                proposer: self.proposer,
                approved_by,
            }),
        )
    }
}

/// A vice-block that reached quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedViceBlock {
    pub block: ViceBlock,
    pub approved_by: Vec<Address>,
}

impl ApprovedViceBlock {
    pub fn to_block(&self) -> Block {
        self.block.to_block(self.approved_by.clone())
    }
}

/// The tip voting is happening on, with the team in charge of it.
#[derive(Debug, Clone, Copy)]
pub struct RoundContext<'a> {
    pub tip: Hash,
    /// Height of the block being agreed on.
    pub height: u64,
    pub team: &'a Team,
    pub team_size: usize,
    pub quorum: usize,
}

impl RoundContext<'_> {
    /// Member expected to propose in `round`. Rotates with height and round
    /// so a passed round hands the proposal to the next member.
    pub fn leader(&self, round: u32) -> Option<Address> {
        let operators = self.team.operators();
        if operators.is_empty() {
            return None;
        }
        let index = (self.height + round as u64) % operators.len() as u64;
        operators.get(index as usize).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TipRounds {
    height: u64,
    vice_blocks: BTreeMap<Hash, ViceBlock>,
    votes: BTreeMap<(u32, Address), RoundVote>,
}

impl TipRounds {
    fn yes_voters(&self, block: &ViceBlock, hash: &Hash) -> Vec<Address> {
        self.votes
            .range((block.round, [0u8; 20])..=(block.round, [0xffu8; 20]))
            .filter(|(_, v)| v.choice == VoteChoice::yes(*hash))
            .map(|((_, voter), _)| *voter)
            .collect()
    }

    fn pass_count(&self, round: u32) -> usize {
        self.votes
            .range((round, [0u8; 20])..=(round, [0xffu8; 20]))
            .filter(|(_, v)| v.choice.decision == VoteDecision::Pass)
            .count()
    }
}

/// Vice-blocks and round votes, kept per tip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundVoting {
    tips: BTreeMap<Hash, TipRounds>,
}

impl RoundVoting {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_position(tip: &Hash, round: u32, ctx: &RoundContext<'_>) -> DposResult<()> {
        if tip != &ctx.tip {
            return Err(DposError::StaleTip(*tip));
        }
        if round == 0 {
            return Err(DposError::InvalidRound(round));
        }
        Ok(())
    }

    fn tip_mut(&mut self, ctx: &RoundContext<'_>) -> &mut TipRounds {
        let rounds = self.tips.entry(ctx.tip).or_default();
        rounds.height = ctx.height;
        rounds
    }

    pub fn add_vice_block(&mut self, block: ViceBlock, ctx: &RoundContext<'_>) -> DposResult<Hash> {
        Self::check_position(&block.tip, block.round, ctx)?;
        if block.height != ctx.height {
            return Err(DposError::StaleTip(block.tip));
        }
        if !ctx.team.contains_operator(&block.proposer) {
            return Err(DposError::NotTeamMember(block.proposer));
        }

        let hash = block.hash();
        let rounds = self.tip_mut(ctx);
        if rounds.vice_blocks.contains_key(&hash) {
            return Err(DposError::DuplicateViceBlock(hash));
        }
        if rounds
            .vice_blocks
            .values()
            .any(|b| b.round == block.round && b.proposer == block.proposer)
        {
            return Err(DposError::DoubleSign(block.proposer));
        }
        rounds.vice_blocks.insert(hash, block);
        Ok(hash)
    }

    pub fn add_vote(&mut self, vote: RoundVote, ctx: &RoundContext<'_>) -> DposResult<()> {
        Self::check_position(&vote.tip, vote.round, ctx)?;
        vote.choice.check()?;
        if !ctx.team.contains_operator(&vote.voter) {
            return Err(DposError::NotTeamMember(vote.voter));
        }

        let rounds = self.tip_mut(ctx);
        let key = (vote.round, vote.voter);
        if let Some(previous) = rounds.votes.get(&key) {
            if previous.choice == vote.choice {
                return Err(DposError::DuplicateVote(vote.choice.subject));
            }
            return Err(DposError::DoubleSign(vote.voter));
        }
        rounds.votes.insert(key, vote);
        Ok(())
    }

    pub fn has_voted(&self, tip: &Hash, round: u32, voter: &Address) -> bool {
        self.tips
            .get(tip)
            .is_some_and(|r| r.votes.contains_key(&(round, *voter)))
    }

    /// No vice-block of `round` can reach quorum any more.
    pub fn is_round_occupied(&self, round: u32, ctx: &RoundContext<'_>) -> bool {
        self.tips.get(&ctx.tip).is_some_and(|r| {
            r.pass_count(round) > ctx.team_size.saturating_sub(ctx.quorum)
        })
    }

    /// Lowest round still open for voting.
    pub fn current_round(&self, ctx: &RoundContext<'_>) -> u32 {
        let mut round = 1;
        while self.is_round_occupied(round, ctx) {
            round += 1;
        }
        round
    }

    /// Proposal the local node should vote for in `round`: most YES votes,
    /// ties by highest hash.
    pub fn best_candidate(&self, round: u32, ctx: &RoundContext<'_>) -> Option<Hash> {
        let rounds = self.tips.get(&ctx.tip)?;
        rounds
            .vice_blocks
            .iter()
            .filter(|(_, b)| b.round == round)
            .max_by_key(|(hash, b)| (rounds.yes_voters(b, hash).len(), **hash))
            .map(|(hash, _)| *hash)
    }

    /// Approved vice-block of the lowest round, most YES votes, highest hash.
    pub fn approved(&self, ctx: &RoundContext<'_>) -> Option<ApprovedViceBlock> {
        let rounds = self.tips.get(&ctx.tip)?;
        rounds
            .vice_blocks
            .iter()
            .map(|(hash, block)| (hash, block, rounds.yes_voters(block, hash)))
            .filter(|(_, _, yes)| yes.len() >= ctx.quorum.max(1))
            .min_by_key(|(hash, block, yes)| (block.round, Reverse(yes.len()), Reverse(**hash)))
            .map(|(_, block, approved_by)| ApprovedViceBlock {
                block: block.clone(),
                approved_by,
            })
    }

    pub fn vice_block(&self, hash: &Hash) -> Option<&ViceBlock> {
        self.tips.values().find_map(|r| r.vice_blocks.get(hash))
    }

    /// All known vice-blocks ordered by height, round, hash.
    pub fn list_vice_blocks(&self) -> Vec<ViceBlock> {
        let mut blocks: Vec<(u64, u32, Hash, &ViceBlock)> = self
            .tips
            .values()
            .flat_map(|r| r.vice_blocks.iter())
            .map(|(hash, b)| (b.height, b.round, *hash, b))
            .collect();
        blocks.sort_by_key(|(height, round, hash, _)| (*height, *round, *hash));
        blocks.into_iter().map(|(_, _, _, b)| b.clone()).collect()
    }

    /// All known round votes ordered by height, round, voter.
    pub fn list_votes(&self) -> Vec<RoundVote> {
        let mut tips: Vec<&TipRounds> = self.tips.values().collect();
        tips.sort_by_key(|r| r.height);
        tips.into_iter()
            .flat_map(|r| r.votes.values().cloned())
            .collect()
    }

    /// Drop everything for tips more than `retention` blocks below `height`.
    pub fn prune(&mut self, height: u64, retention: u64) -> usize {
        let before = self.tips.len();
        self.tips
            .retain(|_, r| r.height.saturating_add(retention) >= height);
        before - self.tips.len()
    }

    pub fn clear(&mut self) {
        self.tips.clear();
    }
}
