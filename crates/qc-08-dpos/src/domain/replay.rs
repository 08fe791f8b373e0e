//! Replay and checkpoints
//!
//! State is recomputed, never patched: a reindex folds every block from
//! genesis into an empty `ChainState`, and a reorg restores the newest
//! checkpoint at or below the fork point and folds the new branch on top.

use super::{ChainState, DposConfig, DposResult};
use shared_types::Block;
use std::collections::BTreeMap;

/// Fold `blocks` (in height order, starting at genesis) into a fresh state.
pub fn replay<'a, I>(blocks: I, config: &DposConfig) -> DposResult<ChainState>
where
    I: IntoIterator<Item = &'a Block>,
{
    let mut state = ChainState::new();
    for block in blocks {
        state.apply_block(block, config)?;
    }
    Ok(state)
}

/// In-memory states kept every `interval` blocks.
#[derive(Debug, Clone)]
pub struct Checkpoints {
    interval: u64,
    keep: usize,
    states: BTreeMap<u64, ChainState>,
}

impl Checkpoints {
    pub fn new(interval: u64, keep: usize) -> Self {
        Self {
            interval: interval.max(1),
            keep: keep.max(1),
            states: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &DposConfig) -> Self {
        Self::new(config.snapshot_interval, config.snapshots_kept)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Keep a copy of `state` if its tip sits on a checkpoint height.
    pub fn observe(&mut self, state: &ChainState) -> bool {
        let Some(tip) = state.tip() else {
            return false;
        };
        if tip.height % self.interval != 0 {
            return false;
        }
        self.states.insert(tip.height, state.clone());
        while self.states.len() > self.keep {
            self.states.pop_first();
        }
        true
    }

    /// Newest checkpoint at or below `height`.
    pub fn at_or_below(&self, height: u64) -> Option<&ChainState> {
        self.states.range(..=height).next_back().map(|(_, s)| s)
    }

    pub fn latest(&self) -> Option<&ChainState> {
        self.states.values().next_back()
    }

    /// Drop checkpoints above `height`; they describe an abandoned branch.
    pub fn truncate_above(&mut self, height: u64) {
        self.states.retain(|h, _| *h <= height);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
