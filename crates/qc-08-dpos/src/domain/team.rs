//! dPoS team selection
//!
//! Rotation per boundary:
//! 1. a full team releases its longest-serving member (lowest join height,
//!    ties by id);
//! 2. members that are no longer active leave;
//! 3. free seats go to active non-members ordered by
//!    `sha256(id || block_hash)`, joining at the boundary height.

use super::{MasternodeId, Registry};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{Address, Hash};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub join_height: u64,
    pub operator_auth_address: Address,
}

/// Masternodes empowered to vote for one height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    members: BTreeMap<MasternodeId, TeamMember>,
}

impl Team {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// dPoS runs only with a full team.
    pub fn is_full(&self, team_size: usize) -> bool {
        self.members.len() == team_size
    }

    pub fn contains(&self, id: &MasternodeId) -> bool {
        self.members.contains_key(id)
    }

    pub fn member_by_operator(&self, operator: &Address) -> Option<MasternodeId> {
        self.members
            .iter()
            .find(|(_, m)| &m.operator_auth_address == operator)
            .map(|(id, _)| *id)
    }

    pub fn contains_operator(&self, operator: &Address) -> bool {
        self.member_by_operator(operator).is_some()
    }

    /// Members in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&MasternodeId, &TeamMember)> {
        self.members.iter()
    }

    pub fn operators(&self) -> Vec<Address> {
        self.members
            .values()
            .map(|m| m.operator_auth_address)
            .collect()
    }

    pub fn insert(&mut self, id: MasternodeId, member: TeamMember) {
        self.members.insert(id, member);
    }
}

fn selection_key(id: &MasternodeId, block_hash: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(id);
    hasher.update(block_hash);
    hasher.finalize().into()
}

/// Compute the team that follows `current` at boundary `height`.
pub fn next_team(
    current: &Team,
    registry: &Registry,
    team_size: usize,
    height: u64,
    block_hash: &Hash,
) -> Team {
    let mut team = current.clone();

    if team.len() >= team_size {
        let oldest = team
            .members
            .iter()
            .min_by_key(|(id, m)| (m.join_height, **id))
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            team.members.remove(&id);
        }
    }

    team.members.retain(|id, _| registry.is_active(id));
    for (id, member) in team.members.iter_mut() {
        if let Some(mn) = registry.get(id) {
            member.operator_auth_address = mn.operator_auth_address;
        }
    }

    let free = team_size.saturating_sub(team.len());
    if free > 0 {
        let mut candidates: Vec<(Hash, MasternodeId)> = registry
            .active_ids()
            .filter(|id| !team.contains(id))
            .map(|id| (selection_key(id, block_hash), *id))
            .collect();
        candidates.sort();

        for (_, id) in candidates.into_iter().take(free) {
            if let Some(mn) = registry.get(&id) {
                team.insert(
                    id,
                    TeamMember {
                        join_height: height,
                        operator_auth_address: mn.operator_auth_address,
                    },
                );
            }
        }
    }
    team
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnnounceRequest, BlockContext, DposConfig};
    use shared_types::{OutPoint, Transaction, TxOut};

    fn registry_with(count: u8) -> (Registry, Vec<MasternodeId>) {
        let config = DposConfig::regtest();
        let mut registry = Registry::new();
        let mut ids = Vec::new();
        for seed in 1..=count {
            let req = AnnounceRequest {
                name: format!("mn-{seed}"),
                owner_auth_address: [seed; 20],
                operator_auth_address: [seed + 100; 20],
                owner_reward_address: [seed; 20],
                operator_reward_address: None,
                operator_reward_ratio: 0,
                collateral_address: [seed; 20],
            };
            let tx = Transaction {
                inputs: vec![OutPoint::new([seed; 32], 0)],
                outputs: vec![TxOut {
                    value: config.collateral_amount,
                    address: [seed; 20],
                }],
                signer: [seed; 20],
                metadata: vec![],
                instantly: false,
                nonce: 0,
            };
            let ctx = BlockContext {
                height: 1,
                timestamp: 0,
                block_hash: [0; 32],
            };
            ids.push(registry.announce(tx.hash(), &tx, req, &ctx, &config).unwrap());
        }
        registry.auto_activate(&BlockContext {
            height: 11,
            timestamp: 0,
            block_hash: [0; 32],
        });
        (registry, ids)
    }

    #[test]
    fn test_fill_empty_team() {
        let (registry, _) = registry_with(6);
        let team = next_team(&Team::new(), &registry, 4, 12, &[1; 32]);
        assert_eq!(team.len(), 4);
        assert!(team.is_full(4));
        assert!(team.iter().all(|(_, m)| m.join_height == 12));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let (registry, _) = registry_with(6);
        let a = next_team(&Team::new(), &registry, 4, 12, &[1; 32]);
        let b = next_team(&Team::new(), &registry, 4, 12, &[1; 32]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_full_team_rotates_oldest_member() {
        let (registry, ids) = registry_with(6);
        let mut team = Team::new();
        for (i, id) in ids.iter().take(4).enumerate() {
            team.insert(
                *id,
                TeamMember {
                    join_height: i as u64 + 1,
                    operator_auth_address: registry.get(id).unwrap().operator_auth_address,
                },
            );
        }

        let next = next_team(&team, &registry, 4, 20, &[2; 32]);
        assert_eq!(next.len(), 4);
        for id in &ids[1..4] {
            assert!(next.contains(id));
        }
        // the released seat is re-drawn; even the old member rejoins fresh
        let joined: Vec<u64> = next.iter().map(|(_, m)| m.join_height).collect();
        assert!(!joined.contains(&1));
        assert_eq!(joined.iter().filter(|h| **h == 20).count(), 1);
    }

    #[test]
    fn test_small_registry_leaves_team_short() {
        let (registry, _) = registry_with(3);
        let team = next_team(&Team::new(), &registry, 4, 12, &[1; 32]);
        assert_eq!(team.len(), 3);
        assert!(!team.is_full(4));
    }
}
