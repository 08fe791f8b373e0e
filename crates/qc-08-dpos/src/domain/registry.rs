//! Masternode registry
//!
//! Durable mapping of masternode id to lifecycle state, with owner and
//! operator indexes over live (not resigned, not dismissed) nodes.
//! All mutation happens while a block is applied; `check_*` functions are
//! shared by block application and by request pre-validation so both
//! reject the same inputs with the same errors.

use super::{
    Activation, AnnounceRequest, Dismissal, DposConfig, DposError, DposResult, Masternode,
    MasternodeId, Resignation, RATIO_BASE,
};
use serde::{Deserialize, Serialize};
use shared_types::{Address, Amount, Hash, OutPoint, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Position of the block being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    /// Block time, unix ms.
    pub timestamp: u64,
    pub block_hash: Hash,
}

/// Collateral is always output 0 of the announce transaction.
pub const COLLATERAL_VOUT: u32 = 0;

/// Masternode records plus lookup indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    nodes: BTreeMap<MasternodeId, Masternode>,
    by_owner: BTreeMap<Address, MasternodeId>,
    by_operator: BTreeMap<Address, MasternodeId>,
    active: BTreeSet<MasternodeId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &MasternodeId) -> Option<&Masternode> {
        self.nodes.get(id)
    }

    pub fn require(&self, id: &MasternodeId) -> DposResult<&Masternode> {
        self.nodes.get(id).ok_or(DposError::UnknownMasternode(*id))
    }

    /// All records in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&MasternodeId, &Masternode)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Active ids in id order.
    pub fn active_ids(&self) -> impl Iterator<Item = &MasternodeId> {
        self.active.iter()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: &MasternodeId) -> bool {
        self.active.contains(id)
    }

    /// Live masternode operated by `address`.
    pub fn by_operator(&self, address: &Address) -> Option<MasternodeId> {
        self.by_operator.get(address).copied()
    }

    /// Live masternode owned by `address`.
    pub fn by_owner(&self, address: &Address) -> Option<MasternodeId> {
        self.by_owner.get(address).copied()
    }

    /// Active masternode operated by `address`.
    pub fn active_by_operator(&self, address: &Address) -> Option<MasternodeId> {
        self.by_operator(address).filter(|id| self.active.contains(id))
    }

    /// Collateral locked by live masternodes at `address`.
    pub fn locked_collateral(&self, address: &Address) -> Amount {
        self.nodes
            .values()
            .filter(|mn| !mn.is_dead() && &mn.collateral_address == address)
            .map(|mn| mn.collateral_amount)
            .sum()
    }

    /// Collateral outpoints held by live masternodes.
    pub fn live_collaterals(&self) -> BTreeSet<OutPoint> {
        self.nodes
            .values()
            .filter(|mn| !mn.is_dead())
            .map(|mn| mn.collateral)
            .collect()
    }

    fn auth_in_use(&self, address: &Address, except: Option<&MasternodeId>) -> bool {
        [self.by_owner.get(address), self.by_operator.get(address)]
            .into_iter()
            .flatten()
            .any(|id| Some(id) != except)
    }

    fn require_alive(&self, id: &MasternodeId) -> DposResult<&Masternode> {
        let mn = self.require(id)?;
        if mn.resignation.is_some() {
            return Err(DposError::AlreadyResigned(*id));
        }
        if mn.dismissal.is_some() {
            return Err(DposError::AlreadyDismissed(*id));
        }
        Ok(mn)
    }

    // === ANNOUNCE ===

    pub fn check_announce(
        &self,
        id: &MasternodeId,
        req: &AnnounceRequest,
        tx: &Transaction,
        config: &DposConfig,
    ) -> DposResult<()> {
        if self.nodes.contains_key(id) {
            return Err(DposError::DuplicateAnnounce(*id));
        }
        if !(3..=255).contains(&req.name.len()) {
            return Err(DposError::InvalidName(req.name.len()));
        }
        if req.owner_auth_address == req.operator_auth_address {
            return Err(DposError::OwnerIsOperator);
        }
        if req.operator_reward_ratio > RATIO_BASE {
            return Err(DposError::InvalidRewardRatio {
                ratio: req.operator_reward_ratio,
                max: RATIO_BASE,
            });
        }
        for address in [&req.owner_auth_address, &req.operator_auth_address] {
            if self.auth_in_use(address, None) {
                return Err(DposError::AuthAddressInUse(*address));
            }
        }
        match tx.outputs.first() {
            Some(out)
                if out.value == config.collateral_amount
                    && out.address == req.collateral_address => {}
            _ => {
                return Err(DposError::MissingCollateral {
                    expected: config.collateral_amount,
                })
            }
        }
        Ok(())
    }

    pub fn announce(
        &mut self,
        tx_hash: Hash,
        tx: &Transaction,
        req: AnnounceRequest,
        ctx: &BlockContext,
        config: &DposConfig,
    ) -> DposResult<MasternodeId> {
        let id = tx_hash;
        self.check_announce(&id, &req, tx, config)?;

        self.by_owner.insert(req.owner_auth_address, id);
        self.by_operator.insert(req.operator_auth_address, id);
        self.nodes.insert(
            id,
            Masternode {
                name: req.name,
                owner_auth_address: req.owner_auth_address,
                operator_auth_address: req.operator_auth_address,
                owner_reward_address: req.owner_reward_address,
                operator_reward_address: req.operator_reward_address,
                operator_reward_ratio: req.operator_reward_ratio,
                collateral_address: req.collateral_address,
                collateral_amount: config.collateral_amount,
                collateral: OutPoint::new(tx_hash, COLLATERAL_VOUT),
                announce_height: ctx.height,
                min_activation_height: ctx.height + config.activation_delay,
                activation: None,
                resignation: None,
                dismissal: None,
            },
        );
        Ok(id)
    }

    // === ACTIVATE ===

    pub fn check_activate(
        &self,
        signer: &Address,
        id: &MasternodeId,
        height: u64,
    ) -> DposResult<()> {
        let mn = self.require_alive(id)?;
        if &mn.operator_auth_address != signer {
            return Err(DposError::NotOperator);
        }
        if mn.activation.is_some() {
            return Err(DposError::AlreadyActive(*id));
        }
        if height < mn.min_activation_height {
            return Err(DposError::CollateralNotMature {
                min_height: mn.min_activation_height,
                height,
            });
        }
        Ok(())
    }

    pub fn activate(
        &mut self,
        tx_hash: Hash,
        signer: &Address,
        id: &MasternodeId,
        ctx: &BlockContext,
    ) -> DposResult<()> {
        self.check_activate(signer, id, ctx.height)?;
        self.set_active(id, Some(tx_hash), ctx);
        Ok(())
    }

    fn set_active(&mut self, id: &MasternodeId, tx: Option<Hash>, ctx: &BlockContext) {
        if let Some(mn) = self.nodes.get_mut(id) {
            mn.activation = Some(Activation {
                height: ctx.height,
                timestamp: ctx.timestamp,
                tx,
            });
            self.active.insert(*id);
        }
    }

    /// Per-block hook: activate every matured announced node, in id order.
    pub fn auto_activate(&mut self, ctx: &BlockContext) -> Vec<MasternodeId> {
        let matured: Vec<MasternodeId> = self
            .nodes
            .iter()
            .filter(|(_, mn)| {
                mn.activation.is_none() && !mn.is_dead() && mn.min_activation_height <= ctx.height
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &matured {
            self.set_active(id, None, ctx);
            debug!(height = ctx.height, id = %super::id_hex(id), "auto-activated masternode");
        }
        matured
    }

    // === RESIGN ===

    pub fn check_resign(
        &self,
        signer: &Address,
        tx: &Transaction,
        id: &MasternodeId,
    ) -> DposResult<()> {
        let mn = self.require_alive(id)?;
        if &mn.owner_auth_address != signer {
            return Err(DposError::NotOwner);
        }
        if mn.activation.is_none() {
            return Err(DposError::NotActivated(*id));
        }
        if !tx.inputs.contains(&mn.collateral) {
            return Err(DposError::CollateralNotSpent(*id));
        }
        Ok(())
    }

    pub fn resign(
        &mut self,
        tx_hash: Hash,
        tx: &Transaction,
        id: &MasternodeId,
        payout: Address,
        ctx: &BlockContext,
    ) -> DposResult<()> {
        self.check_resign(&tx.signer, tx, id)?;
        if let Some(mn) = self.nodes.get_mut(id) {
            mn.resignation = Some(Resignation {
                height: ctx.height,
                tx: tx_hash,
                payout,
            });
        }
        self.retire(id);
        Ok(())
    }

    // === SET OPERATOR REWARD ===

    pub fn check_set_operator_reward(
        &self,
        signer: &Address,
        id: &MasternodeId,
        operator: &Address,
        ratio: u32,
    ) -> DposResult<()> {
        let mn = self.require_alive(id)?;
        if signer != &mn.owner_auth_address && signer != &mn.operator_auth_address {
            return Err(DposError::StaleOperator(*signer));
        }
        if ratio > RATIO_BASE {
            return Err(DposError::InvalidRewardRatio {
                ratio,
                max: RATIO_BASE,
            });
        }
        if operator == &mn.owner_auth_address {
            return Err(DposError::OwnerIsOperator);
        }
        if self.auth_in_use(operator, Some(id)) {
            return Err(DposError::AuthAddressInUse(*operator));
        }
        Ok(())
    }

    pub fn set_operator_reward(
        &mut self,
        signer: &Address,
        id: &MasternodeId,
        operator: Address,
        reward_address: Option<Address>,
        ratio: u32,
    ) -> DposResult<()> {
        self.check_set_operator_reward(signer, id, &operator, ratio)?;
        let Some(mn) = self.nodes.get_mut(id) else {
            return Err(DposError::UnknownMasternode(*id));
        };
        let previous = std::mem::replace(&mut mn.operator_auth_address, operator);
        mn.operator_reward_address = reward_address;
        mn.operator_reward_ratio = ratio;
        self.by_operator.remove(&previous);
        self.by_operator.insert(operator, *id);
        Ok(())
    }

    // === DISMISSAL ===

    /// Record a finalized dismissal. Vote cleanup is the caller's job.
    pub fn dismiss(&mut self, id: &MasternodeId, dismissal: Dismissal) -> DposResult<()> {
        self.require_alive(id)?;
        if let Some(mn) = self.nodes.get_mut(id) {
            mn.dismissal = Some(dismissal);
        }
        self.retire(id);
        Ok(())
    }

    /// Drop a dead node from the active set and release its auth addresses.
    fn retire(&mut self, id: &MasternodeId) {
        self.active.remove(id);
        if let Some(mn) = self.nodes.get(id) {
            if self.by_owner.get(&mn.owner_auth_address) == Some(id) {
                self.by_owner.remove(&mn.owner_auth_address);
            }
            if self.by_operator.get(&mn.operator_auth_address) == Some(id) {
                self.by_operator.remove(&mn.operator_auth_address);
            }
        }
    }
}
