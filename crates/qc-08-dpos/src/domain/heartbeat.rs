//! Heartbeat liveness tracking
//!
//! Operators gossip signed, timestamped beacons. Classification is computed
//! at query time and never stored:
//!
//! ```text
//! elapsed = now - max(last beacon or startup time, activation time)
//!
//!   0 ──── recently ──── T_stale ──── stale ──── T_outdated ──── outdated ───▶
//! ```

use super::{DposError, DposResult, HeartbeatConfig, Masternode, MasternodeId, Registry};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};
use shared_types::{Address, Hash, PublicKey, Signature, SignedPayload};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

const HEARTBEAT_DOMAIN: &[u8] = b"heartbeat";

/// A signed liveness beacon.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Unix ms.
    pub timestamp: u64,
    #[serde_as(as = "Bytes")]
    pub public_key: PublicKey,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl HeartbeatMessage {
    /// Digest the operator signs for `timestamp`.
    pub fn signing_hash(timestamp: u64) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(HEARTBEAT_DOMAIN);
        hasher.update(timestamp.to_le_bytes());
        hasher.finalize().into()
    }

    pub fn from_auth(timestamp: u64, auth: SignedPayload) -> Self {
        Self {
            timestamp,
            public_key: auth.public_key,
            signature: auth.signature,
        }
    }

    /// Message identity as relayed between nodes.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.public_key);
        hasher.update(self.signature);
        hasher.finalize().into()
    }

    pub fn auth(&self) -> SignedPayload {
        SignedPayload {
            public_key: self.public_key,
            signature: self.signature,
        }
    }
}

/// Liveness class of a masternode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Liveness {
    Recently,
    Stale,
    Outdated,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Liveness::Recently => "recently",
            Liveness::Stale => "stale",
            Liveness::Outdated => "outdated",
        })
    }
}

impl FromStr for Liveness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recently" => Ok(Liveness::Recently),
            "stale" => Ok(Liveness::Stale),
            "outdated" => Ok(Liveness::Outdated),
            other => Err(format!("unknown liveness class '{other}'")),
        }
    }
}

/// Thresholds in effect for the current active-node count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPeriods {
    pub stale_after_ms: u64,
    pub outdated_after_ms: u64,
}

impl HeartbeatPeriods {
    pub fn new(config: &HeartbeatConfig, active_count: usize) -> Self {
        let base =
            (active_count as u64).max(config.period_floor_nodes) * config.per_node_period_ms;
        let stale_after_ms = config.stale_after_ms.unwrap_or(base);
        let outdated_after_ms = config
            .outdated_after_ms
            .unwrap_or(stale_after_ms * config.outdated_factor);
        Self {
            stale_after_ms,
            outdated_after_ms,
        }
    }

    pub fn classify(&self, elapsed_ms: u64) -> Liveness {
        if elapsed_ms < self.stale_after_ms {
            Liveness::Recently
        } else if elapsed_ms < self.outdated_after_ms {
            Liveness::Stale
        } else {
            Liveness::Outdated
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Accepted,
    /// Same sender and timestamp already recorded.
    Duplicate,
    /// Not at least one stale period newer than the latest beacon.
    TooFrequent,
}

/// Latest beacon of one operator, as listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatEntry {
    pub operator: Address,
    pub masternode: MasternodeId,
    pub message: HeartbeatMessage,
}

/// Per-operator bounded beacon history.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatTracker {
    startup_time: u64,
    history: BTreeMap<Address, VecDeque<HeartbeatMessage>>,
}

impl HeartbeatTracker {
    pub fn new(startup_time: u64) -> Self {
        Self {
            startup_time,
            history: BTreeMap::new(),
        }
    }

    pub fn startup_time(&self) -> u64 {
        self.startup_time
    }

    /// Record a beacon whose signature resolved to `signer`.
    pub fn record(
        &mut self,
        registry: &Registry,
        signer: Address,
        message: HeartbeatMessage,
        now: u64,
        config: &HeartbeatConfig,
    ) -> DposResult<RecordOutcome> {
        if registry.by_operator(&signer).is_none() {
            return Err(DposError::StaleSigner(signer));
        }
        if message.timestamp > now + config.max_future_drift_ms {
            return Err(DposError::FutureTimestamp {
                timestamp: message.timestamp,
                now,
            });
        }

        let periods = HeartbeatPeriods::new(config, registry.active_count());
        let entries = self.history.entry(signer).or_default();
        if entries.iter().any(|m| m.timestamp == message.timestamp) {
            return Ok(RecordOutcome::Duplicate);
        }
        if let Some(last) = entries.back() {
            if message.timestamp < last.timestamp + periods.stale_after_ms {
                return Ok(RecordOutcome::TooFrequent);
            }
        }

        entries.push_back(message);
        while entries.len() > config.history_len.max(1) {
            entries.pop_front();
        }
        Ok(RecordOutcome::Accepted)
    }

    pub fn last_timestamp(&self, operator: &Address) -> Option<u64> {
        self.history
            .get(operator)
            .and_then(|h| h.back())
            .map(|m| m.timestamp)
    }

    /// Beacons of one operator, oldest first.
    pub fn history(&self, operator: &Address) -> impl Iterator<Item = &HeartbeatMessage> {
        self.history.get(operator).into_iter().flatten()
    }

    pub fn classify(&self, mn: &Masternode, now: u64, periods: &HeartbeatPeriods) -> Liveness {
        let seen = self
            .last_timestamp(&mn.operator_auth_address)
            .unwrap_or(self.startup_time);
        let activated = mn.activation.as_ref().map_or(0, |a| a.timestamp);
        periods.classify(now.saturating_sub(seen.max(activated)))
    }

    /// Active masternodes currently in `class`, in id order.
    pub fn filter(
        &self,
        registry: &Registry,
        class: Liveness,
        now: u64,
        config: &HeartbeatConfig,
    ) -> Vec<MasternodeId> {
        let periods = HeartbeatPeriods::new(config, registry.active_count());
        registry
            .active_ids()
            .filter(|id| {
                registry
                    .get(id)
                    .is_some_and(|mn| self.classify(mn, now, &periods) == class)
            })
            .copied()
            .collect()
    }

    /// Latest beacon per live operator, oldest first.
    pub fn list(&self, registry: &Registry) -> Vec<HeartbeatEntry> {
        let mut entries: Vec<HeartbeatEntry> = self
            .history
            .iter()
            .filter_map(|(operator, h)| {
                let masternode = registry.by_operator(operator)?;
                h.back().map(|message| HeartbeatEntry {
                    operator: *operator,
                    masternode,
                    message: message.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.message.timestamp, a.operator).cmp(&(b.message.timestamp, b.operator))
        });
        entries
    }

    /// Drop histories of addresses that no longer operate a live node.
    pub fn retain_live(&mut self, registry: &Registry) {
        self.history
            .retain(|operator, _| registry.by_operator(operator).is_some());
    }

    pub fn clear(&mut self, startup_time: u64) {
        self.startup_time = startup_time;
        self.history.clear();
    }
}
