//! Vice-block reward split
//!
//! The proposer takes `proposer_percent` of the total; the remainder is
//! divided equally among the other members. Integer dust stays with the
//! proposer. Each member's amount is then split between its owner and
//! operator reward addresses by `operator_reward_ratio`. Zero-value
//! shares are left out.

use super::{DposError, DposResult, MasternodeId, Registry, RewardPolicy, Team, RATIO_BASE};
use serde::{Deserialize, Serialize};
use shared_types::{Address, Amount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardRole {
    Proposer,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardShare {
    pub masternode: MasternodeId,
    pub role: RewardRole,
    pub address: Address,
    pub amount: Amount,
}

/// Payouts for one vice-block, ordered proposer first then by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSplit {
    pub total: Amount,
    pub proposer: MasternodeId,
    pub shares: Vec<RewardShare>,
}

impl RewardSplit {
    /// Sum of everything paid to the masternode, owner and operator parts together.
    pub fn amount_for(&self, id: &MasternodeId) -> Amount {
        self.shares
            .iter()
            .filter(|s| &s.masternode == id)
            .map(|s| s.amount)
            .sum()
    }
}

/// Split `total` across `team` with `proposer` (operator address) leading.
pub fn split_reward(
    policy: &RewardPolicy,
    total: Amount,
    team: &Team,
    proposer: &Address,
    registry: &Registry,
) -> DposResult<RewardSplit> {
    let proposer_id = team
        .member_by_operator(proposer)
        .ok_or(DposError::NotTeamMember(*proposer))?;

    let others = team.len().saturating_sub(1) as Amount;
    let (proposer_amount, member_amount) = if others == 0 {
        (total, 0)
    } else {
        let base = total * policy.proposer_percent / 100;
        let each = (total - base) / others;
        (total - each * others, each)
    };

    let mut shares = Vec::with_capacity(team.len() * 2);
    push_member(&mut shares, registry, &proposer_id, RewardRole::Proposer, proposer_amount)?;
    for (id, _) in team.iter().filter(|(id, _)| **id != proposer_id) {
        push_member(&mut shares, registry, id, RewardRole::Member, member_amount)?;
    }

    Ok(RewardSplit {
        total,
        proposer: proposer_id,
        shares,
    })
}

fn push_member(
    shares: &mut Vec<RewardShare>,
    registry: &Registry,
    id: &MasternodeId,
    role: RewardRole,
    amount: Amount,
) -> DposResult<()> {
    let mn = registry.require(id)?;
    let operator_part = amount * mn.operator_reward_ratio as Amount / RATIO_BASE as Amount;
    let owner_part = amount - operator_part;

    let operator_address = mn.operator_payout_address();
    let parts = if operator_address == mn.owner_reward_address {
        [(mn.owner_reward_address, amount), (operator_address, 0)]
    } else {
        [
            (mn.owner_reward_address, owner_part),
            (operator_address, operator_part),
        ]
    };
    shares.extend(
        parts
            .into_iter()
            .filter(|(_, amount)| *amount > 0)
            .map(|(address, amount)| RewardShare {
                masternode: *id,
                role,
                address,
                amount,
            }),
    );
    Ok(())
}
