//! Masternode record and lifecycle status

use serde::{Deserialize, Serialize};
use shared_types::{Address, Amount, Hash, OutPoint};
use std::fmt;
use std::str::FromStr;

/// Masternode identity: hash of the announcing transaction.
pub type MasternodeId = Hash;

/// Denominator of `operator_reward_ratio` (10_000 = 100%).
pub const RATIO_BASE: u32 = 10_000;

/// Render an id the way listings show it.
pub fn id_hex(id: &MasternodeId) -> String {
    hex::encode(id)
}

/// How a masternode became active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    pub height: u64,
    /// Block time (unix ms) of the activating block.
    pub timestamp: u64,
    /// `None` when activated by the per-block auto-activation rule.
    pub tx: Option<Hash>,
}

/// Collateral spend by the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resignation {
    pub height: u64,
    pub tx: Hash,
    pub payout: Address,
}

/// Finalized dismiss voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dismissal {
    pub height: u64,
    /// `None` when finalized by the per-block auto-finalization rule.
    pub tx: Option<Hash>,
    pub finalized_by: Option<MasternodeId>,
}

/// A staked node eligible for dPoS voting once active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Masternode {
    pub name: String,
    pub owner_auth_address: Address,
    pub operator_auth_address: Address,
    pub owner_reward_address: Address,
    pub operator_reward_address: Option<Address>,
    /// Share of rewards paid to the operator, in parts of `RATIO_BASE`.
    pub operator_reward_ratio: u32,
    pub collateral_address: Address,
    pub collateral_amount: Amount,
    pub collateral: OutPoint,
    pub announce_height: u64,
    pub min_activation_height: u64,
    pub activation: Option<Activation>,
    pub resignation: Option<Resignation>,
    pub dismissal: Option<Dismissal>,
}

impl Masternode {
    pub fn is_dead(&self) -> bool {
        self.resignation.is_some() || self.dismissal.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_some() && !self.is_dead()
    }

    pub fn dead_since_height(&self) -> Option<u64> {
        self.resignation
            .as_ref()
            .map(|r| r.height)
            .or_else(|| self.dismissal.as_ref().map(|d| d.height))
    }

    pub fn status(&self) -> MasternodeStatus {
        match (&self.activation, &self.resignation, &self.dismissal) {
            (Some(_), _, Some(_)) => MasternodeStatus::ActivatedDismissed,
            (None, _, Some(_)) => MasternodeStatus::AnnouncedDismissed,
            (_, Some(_), None) => MasternodeStatus::ActivatedResigned,
            (Some(_), None, None) => MasternodeStatus::Active,
            (None, None, None) => MasternodeStatus::Announced,
        }
    }

    /// Address receiving the operator's share of rewards.
    pub fn operator_payout_address(&self) -> Address {
        self.operator_reward_address
            .unwrap_or(self.owner_reward_address)
    }
}

/// Lifecycle status derived from the transitions present on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MasternodeStatus {
    Announced,
    Active,
    ActivatedResigned,
    AnnouncedDismissed,
    ActivatedDismissed,
}

impl MasternodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasternodeStatus::Announced => "announced",
            MasternodeStatus::Active => "active",
            MasternodeStatus::ActivatedResigned => "activated, resigned",
            MasternodeStatus::AnnouncedDismissed => "announced, dismissed",
            MasternodeStatus::ActivatedDismissed => "activated, dismissed",
        }
    }
}

impl fmt::Display for MasternodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MasternodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "announced" => Ok(MasternodeStatus::Announced),
            "active" => Ok(MasternodeStatus::Active),
            "activated, resigned" => Ok(MasternodeStatus::ActivatedResigned),
            "announced, dismissed" => Ok(MasternodeStatus::AnnouncedDismissed),
            "activated, dismissed" => Ok(MasternodeStatus::ActivatedDismissed),
            other => Err(format!("unknown masternode status '{other}'")),
        }
    }
}

/// Read model returned by listings: the record plus counters computed from
/// the outstanding dismiss votes at the time of the read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeView {
    pub id: MasternodeId,
    pub status: MasternodeStatus,
    pub node: Masternode,
    pub counter_votes_against: usize,
    pub counter_votes_from: usize,
}

/// One row of `list_masternodes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeEntry {
    pub id: MasternodeId,
    pub status: MasternodeStatus,
    /// Present when the listing was requested verbose.
    pub mn: Option<MasternodeView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Masternode {
        Masternode {
            name: "node".into(),
            owner_auth_address: [1u8; 20],
            operator_auth_address: [2u8; 20],
            owner_reward_address: [3u8; 20],
            operator_reward_address: None,
            operator_reward_ratio: 0,
            collateral_address: [4u8; 20],
            collateral_amount: 1_000,
            collateral: OutPoint::new([9u8; 32], 0),
            announce_height: 1,
            min_activation_height: 11,
            activation: None,
            resignation: None,
            dismissal: None,
        }
    }

    #[test]
    fn test_status_strings() {
        let mut mn = sample();
        assert_eq!(mn.status().to_string(), "announced");

        mn.activation = Some(Activation {
            height: 11,
            timestamp: 0,
            tx: None,
        });
        assert_eq!(mn.status().to_string(), "active");
        assert!(mn.is_active());

        let mut resigned = mn.clone();
        resigned.resignation = Some(Resignation {
            height: 20,
            tx: [5u8; 32],
            payout: [6u8; 20],
        });
        assert_eq!(resigned.status().to_string(), "activated, resigned");
        assert_eq!(resigned.dead_since_height(), Some(20));

        mn.dismissal = Some(Dismissal {
            height: 21,
            tx: None,
            finalized_by: None,
        });
        assert_eq!(mn.status().to_string(), "activated, dismissed");
        assert!(!mn.is_active());

        let mut early = sample();
        early.dismissal = mn.dismissal.clone();
        assert_eq!(early.status().to_string(), "announced, dismissed");
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            MasternodeStatus::Announced,
            MasternodeStatus::Active,
            MasternodeStatus::ActivatedResigned,
            MasternodeStatus::AnnouncedDismissed,
            MasternodeStatus::ActivatedDismissed,
        ] {
            assert_eq!(status.as_str().parse::<MasternodeStatus>(), Ok(status));
        }
        assert!("resigned".parse::<MasternodeStatus>().is_err());
    }

    #[test]
    fn test_operator_payout_falls_back_to_owner() {
        let mut mn = sample();
        assert_eq!(mn.operator_payout_address(), [3u8; 20]);
        mn.operator_reward_address = Some([7u8; 20]);
        assert_eq!(mn.operator_payout_address(), [7u8; 20]);
    }
}
