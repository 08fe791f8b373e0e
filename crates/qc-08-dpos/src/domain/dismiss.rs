//! Dismiss votes
//!
//! Outstanding votes are the only source of the per-masternode vote
//! counters: a counter is the number of rows referencing the node, counted
//! at read time.

use super::{DposConfig, DposError, DposResult, MasternodeId, Registry};
use serde::{Deserialize, Serialize};
use shared_types::Hash;
use std::collections::{BTreeMap, BTreeSet};

/// Longest accepted `reason_desc`, in bytes.
pub const MAX_REASON_DESC_LEN: usize = 255;

/// Reason code used by automatic votes against unresponsive nodes.
pub const REASON_OUTDATED: u16 = 1;

/// An outstanding vote by one active masternode against another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DismissVote {
    pub vote_tx: Hash,
    pub from: MasternodeId,
    pub against: MasternodeId,
    pub reason_code: u16,
    pub reason_desc: String,
    pub height_created: u64,
}

/// Outstanding dismiss votes keyed by `(from, against)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBook {
    votes: BTreeMap<(MasternodeId, MasternodeId), DismissVote>,
    /// `(against, from)` mirror of the keys of `votes`.
    by_against: BTreeSet<(MasternodeId, MasternodeId)>,
}

impl VoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn get(&self, from: &MasternodeId, against: &MasternodeId) -> Option<&DismissVote> {
        self.votes.get(&(*from, *against))
    }

    /// All outstanding votes ordered by `(from, against)`.
    pub fn iter(&self) -> impl Iterator<Item = &DismissVote> {
        self.votes.values()
    }

    pub fn votes_from<'a>(
        &'a self,
        from: &MasternodeId,
    ) -> impl Iterator<Item = &'a DismissVote> + 'a {
        self.votes
            .range((*from, [0u8; 32])..=(*from, [0xffu8; 32]))
            .map(|(_, v)| v)
    }

    pub fn votes_against<'a>(
        &'a self,
        against: &MasternodeId,
    ) -> impl Iterator<Item = &'a DismissVote> + 'a {
        self.by_against
            .range((*against, [0u8; 32])..=(*against, [0xffu8; 32]))
            .filter_map(|(against, from)| self.votes.get(&(*from, *against)))
    }

    pub fn counter_votes_from(&self, id: &MasternodeId) -> usize {
        self.votes_from(id).count()
    }

    pub fn counter_votes_against(&self, id: &MasternodeId) -> usize {
        self.votes_against(id).count()
    }

    pub fn check_record(
        &self,
        registry: &Registry,
        from: &MasternodeId,
        against: &MasternodeId,
        reason_desc: &str,
        config: &DposConfig,
    ) -> DposResult<()> {
        if from == against {
            return Err(DposError::SelfVote);
        }
        if !registry.is_active(from) {
            return Err(DposError::NotActive);
        }
        let target = registry.require(against)?;
        if target.is_dead() {
            return Err(DposError::TargetDead(*against));
        }
        if reason_desc.len() > MAX_REASON_DESC_LEN {
            return Err(DposError::ReasonTooLong(reason_desc.len()));
        }
        if self.votes.contains_key(&(*from, *against)) {
            return Err(DposError::DuplicateVote(*against));
        }
        if self.counter_votes_from(from) >= config.max_dismiss_votes_per_mn {
            return Err(DposError::TooManyVotes(config.max_dismiss_votes_per_mn));
        }
        Ok(())
    }

    pub fn record(
        &mut self,
        registry: &Registry,
        vote: DismissVote,
        config: &DposConfig,
    ) -> DposResult<()> {
        self.check_record(registry, &vote.from, &vote.against, &vote.reason_desc, config)?;
        self.by_against.insert((vote.against, vote.from));
        self.votes.insert((vote.from, vote.against), vote);
        Ok(())
    }

    pub fn check_recall(
        &self,
        registry: &Registry,
        from: &MasternodeId,
        against: &MasternodeId,
    ) -> DposResult<()> {
        if !registry.is_active(from) {
            return Err(DposError::NotActive);
        }
        if !self.votes.contains_key(&(*from, *against)) {
            return Err(DposError::NoSuchVote(*against));
        }
        Ok(())
    }

    pub fn recall(
        &mut self,
        registry: &Registry,
        from: &MasternodeId,
        against: &MasternodeId,
    ) -> DposResult<DismissVote> {
        self.check_recall(registry, from, against)?;
        self.remove(from, against)
            .ok_or(DposError::NoSuchVote(*against))
    }

    fn remove(&mut self, from: &MasternodeId, against: &MasternodeId) -> Option<DismissVote> {
        self.by_against.remove(&(*against, *from));
        self.votes.remove(&(*from, *against))
    }

    /// Remove every vote cast by or against `id`. Returns the number removed.
    pub fn clear_for(&mut self, id: &MasternodeId) -> usize {
        let pairs: Vec<(MasternodeId, MasternodeId)> = self
            .votes_from(id)
            .chain(self.votes_against(id))
            .map(|v| (v.from, v.against))
            .collect();
        pairs
            .iter()
            .filter(|(from, against)| self.remove(from, against).is_some())
            .count()
    }
}
