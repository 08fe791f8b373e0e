//! Masternode operations carried in transaction metadata
//!
//! Envelope: `b"MNTX" || bincode(MasternodeOperation)`. Transactions without
//! the marker are ordinary ledger transactions and are ignored here.

use super::{DposError, DposResult, MasternodeId};
use serde::{Deserialize, Serialize};
use shared_types::{Address, Transaction};

/// Metadata marker of masternode transactions.
pub const METADATA_MARKER: &[u8; 4] = b"MNTX";

/// Fields of an announce request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub name: String,
    pub owner_auth_address: Address,
    pub operator_auth_address: Address,
    pub owner_reward_address: Address,
    pub operator_reward_address: Option<Address>,
    pub operator_reward_ratio: u32,
    pub collateral_address: Address,
}

/// Recognized masternode transaction payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasternodeOperation {
    Announce(AnnounceRequest),
    Activate {
        node: MasternodeId,
    },
    Resign {
        node: MasternodeId,
        payout: Address,
    },
    SetOperatorReward {
        node: MasternodeId,
        operator_auth_address: Address,
        operator_reward_address: Option<Address>,
        operator_reward_ratio: u32,
    },
    DismissVote {
        against: MasternodeId,
        reason_code: u16,
        reason_desc: String,
    },
    DismissVoteRecall {
        against: MasternodeId,
    },
    FinalizeDismissVoting {
        against: MasternodeId,
    },
}

impl MasternodeOperation {
    /// Encode as transaction metadata.
    pub fn encode(&self) -> DposResult<Vec<u8>> {
        let mut out = METADATA_MARKER.to_vec();
        out.extend(bincode::serialize(self)?);
        Ok(out)
    }

    /// Decode transaction metadata. `Ok(None)` for non-masternode metadata.
    pub fn decode(metadata: &[u8]) -> DposResult<Option<Self>> {
        match metadata.strip_prefix(METADATA_MARKER.as_slice()) {
            None => Ok(None),
            Some(body) => bincode::deserialize(body)
                .map(Some)
                .map_err(|e| DposError::MalformedOperation(e.to_string())),
        }
    }

    /// Decode the operation carried by a transaction, if any.
    pub fn from_transaction(tx: &Transaction) -> DposResult<Option<Self>> {
        Self::decode(&tx.metadata)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MasternodeOperation::Announce(_) => "announce",
            MasternodeOperation::Activate { .. } => "activate",
            MasternodeOperation::Resign { .. } => "resign",
            MasternodeOperation::SetOperatorReward { .. } => "set_operator_reward",
            MasternodeOperation::DismissVote { .. } => "dismiss_vote",
            MasternodeOperation::DismissVoteRecall { .. } => "dismiss_vote_recall",
            MasternodeOperation::FinalizeDismissVoting { .. } => "finalize_dismiss_voting",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_metadata_is_not_an_operation() {
        assert_eq!(MasternodeOperation::decode(b"hello"), Ok(None));
        assert_eq!(MasternodeOperation::decode(&[]), Ok(None));
    }

    #[test]
    fn test_truncated_operation_is_malformed() {
        let op = MasternodeOperation::DismissVote {
            against: [7u8; 32],
            reason_code: 1,
            reason_desc: "offline".into(),
        };
        let encoded = op.encode().unwrap();
        assert_eq!(MasternodeOperation::decode(&encoded), Ok(Some(op)));

        let truncated = &encoded[..encoded.len() - 3];
        assert!(matches!(
            MasternodeOperation::decode(truncated),
            Err(DposError::MalformedOperation(_))
        ));
    }
}
