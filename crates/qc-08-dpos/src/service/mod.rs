//! Masternode Service - Core business logic
//!
//! # Architecture
//! - Chain-derived state is a fold over ledger blocks, advanced by `sync`
//!   under a single async lock; reorgs rewind to a checkpoint and replay.
//! - Gossip (heartbeats, vice-blocks, votes, instant transactions) is
//!   re-verified on arrival; the recovered signer is the only identity
//!   trusted.
//! - When an operator key is configured the node takes part in rounds:
//!   it proposes when it leads a round, votes for the best vice-block,
//!   votes on instant transactions, and passes rounds that time out.

use crate::domain::{
    replay, AnnounceRequest, ApprovedViceBlock, BlockOutcome, ChainState, Checkpoints, DposConfig,
    DposError, DposResult, HeartbeatEntry, HeartbeatMessage, InstantStatus, InstantTransaction,
    Liveness, MasternodeEntry, MasternodeId, MasternodeOperation, MasternodeView, QuorumRule,
    RecordOutcome, RewardSplit, RoundContext, RoundVote, Team, TxVote, ViceBlock, VoteChoice,
    REASON_OUTDATED,
};
use crate::events::{DposEvent, GossipMessage};
use crate::ports::{
    Balances, EventBus, GossipSnapshot, HeartbeatReceipt, LedgerAdapter, MasternodeApi,
    MasternodeSigner, SignatureVerifier, SnapshotStore, SyncReport, SystemTimeSource, TimeSource,
};
use crate::state::DposState;
use async_trait::async_trait;
use shared_types::{Address, Block, Hash, OutPoint, Transaction, TxOut};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn short(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}

/// Masternode Service
pub struct DposService<L, E, V, S>
where
    L: LedgerAdapter,
    E: EventBus,
    V: SignatureVerifier,
    S: SnapshotStore,
{
    ledger: Arc<L>,
    event_bus: Arc<E>,
    sig_verifier: Arc<V>,
    snapshots: Arc<S>,
    signer: Option<Arc<dyn MasternodeSigner>>,
    state: Arc<DposState>,
    config: DposConfig,
    time_source: Box<dyn TimeSource>,
    sync_lock: tokio::sync::Mutex<()>,
}

/// Dependencies for DposService
pub struct DposDependencies<L, E, V, S> {
    pub ledger: Arc<L>,
    pub event_bus: Arc<E>,
    pub sig_verifier: Arc<V>,
    pub snapshots: Arc<S>,
    /// Operator key; `None` on nodes that only follow the chain.
    pub signer: Option<Arc<dyn MasternodeSigner>>,
    pub config: DposConfig,
}

impl<L, E, V, S> DposService<L, E, V, S>
where
    L: LedgerAdapter,
    E: EventBus,
    V: SignatureVerifier,
    S: SnapshotStore,
{
    /// Create a new DposService
    pub fn new(deps: DposDependencies<L, E, V, S>) -> Self {
        let time_source: Box<dyn TimeSource> = Box::new(SystemTimeSource);
        let state = DposState::new(&deps.config, time_source.now_ms());
        Self {
            ledger: deps.ledger,
            event_bus: deps.event_bus,
            sig_verifier: deps.sig_verifier,
            snapshots: deps.snapshots,
            signer: deps.signer,
            state: Arc::new(state),
            config: deps.config,
            time_source,
            sync_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Set custom time source (for testing). Restarts the liveness clock.
    pub fn with_time_source(mut self, time_source: Box<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self.state.reset_liveness(self.time_source.now_ms());
        self
    }

    pub fn config(&self) -> &DposConfig {
        &self.config
    }

    /// Operator address of the local key, if any.
    pub fn operator_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.operator_address())
    }

    /// Current tip of the chain-derived state.
    pub fn tip(&self) -> Option<crate::domain::ChainTip> {
        self.state.chain.read().tip()
    }

    fn now(&self) -> u64 {
        self.time_source.now_ms()
    }

    fn require_signer(&self) -> DposResult<&Arc<dyn MasternodeSigner>> {
        self.signer.as_ref().ok_or(DposError::NoLocalOperator)
    }

    async fn publish(&self, event: DposEvent) -> DposResult<()> {
        self.event_bus
            .publish(event)
            .await
            .map_err(DposError::EventBusError)
    }

    async fn publish_all(&self, events: Vec<DposEvent>) -> DposResult<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    async fn relay(&self, message: GossipMessage) -> DposResult<()> {
        self.event_bus
            .relay(message)
            .await
            .map_err(DposError::EventBusError)
    }

    /// Voting context on top of the current tip. `None` while the team is
    /// not full, which keeps dPoS switched off.
    fn round_context<'a>(&self, chain: &'a ChainState, rule: QuorumRule) -> Option<RoundContext<'a>> {
        let tip = chain.tip()?;
        let team = chain.current_team()?;
        let team_size = self.config.rounds.team_size;
        if !team.is_full(team_size) {
            return None;
        }
        Some(RoundContext {
            tip: tip.hash,
            height: tip.height + 1,
            team,
            team_size,
            quorum: rule.threshold(team_size),
        })
    }

    // === STARTUP AND SYNC ===

    /// Restore the saved snapshots if they are still on the ledger's chain,
    /// then catch up.
    pub async fn start(&self) -> DposResult<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        if let Some(saved) = self.snapshots.load()? {
            if let Some(tip) = saved.tip() {
                let on_chain = match self.ledger.block(tip.height).await {
                    Ok(block) => block.hash() == tip.hash,
                    Err(_) => false,
                };
                if on_chain {
                    info!(height = tip.height, "restored masternode snapshot");
                    {
                        let mut chain = self.state.chain.write();
                        let mut checkpoints = self.state.checkpoints.write();
                        checkpoints.clear();
                        checkpoints.observe(&saved);
                        *chain = saved;
                    }
                    self.restore_gossip();
                } else {
                    info!(height = tip.height, "snapshot is off the active chain, reindexing");
                }
            }
        }
        self.sync_locked().await
    }

    fn restore_gossip(&self) {
        match self.snapshots.load_gossip() {
            Ok(Some(gossip)) => {
                info!(
                    vice_blocks = gossip.rounds.list_vice_blocks().len(),
                    instant = gossip.instant.len(),
                    "restored gossip snapshot"
                );
                *self.state.rounds.write() = gossip.rounds;
                *self.state.instant.write() = gossip.instant;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "ignoring unreadable gossip snapshot"),
        }
    }

    async fn fetch_blocks(&self, from: u64, to: u64) -> DposResult<Vec<Block>> {
        let mut blocks = Vec::with_capacity(to.saturating_sub(from) as usize + 1);
        for height in from..=to {
            blocks.push(self.ledger.block(height).await?);
        }
        Ok(blocks)
    }

    /// Highest height at which our chain and the ledger's agree.
    async fn find_fork(&self, from: u64) -> DposResult<Option<u64>> {
        let mut height = from;
        loop {
            let ours = self.state.chain.read().hash_at(height);
            let theirs = self.ledger.block(height).await?.hash();
            if ours == Some(theirs) {
                return Ok(Some(height));
            }
            if height == 0 {
                return Ok(None);
            }
            height -= 1;
        }
    }

    /// Restore the state as of `fork` from the newest usable checkpoint.
    async fn rewind_to(&self, fork: u64) -> DposResult<()> {
        let base = {
            let mut checkpoints = self.state.checkpoints.write();
            checkpoints.truncate_above(fork);
            checkpoints.at_or_below(fork).cloned()
        }
        .unwrap_or_default();

        let blocks = self.fetch_blocks(base.next_height(), fork).await?;
        let mut state = base;
        for block in &blocks {
            state.apply_block(block, &self.config)?;
        }
        *self.state.chain.write() = state;
        self.state.instant.write().blocks_disconnected(fork);
        Ok(())
    }

    fn outcome_events(outcome: &BlockOutcome) -> Vec<DposEvent> {
        let height = outcome.height;
        let mut events = Vec::new();
        for applied in &outcome.applied {
            let id = applied.masternode;
            crate::metrics::record_transition(applied.operation.kind());
            events.push(match &applied.operation {
                MasternodeOperation::Announce(_) => DposEvent::MasternodeAnnounced { id, height },
                MasternodeOperation::Activate { .. } => DposEvent::MasternodeActivated {
                    id,
                    height,
                    automatic: false,
                },
                MasternodeOperation::Resign { .. } => DposEvent::MasternodeResigned { id, height },
                MasternodeOperation::SetOperatorReward { .. } => {
                    DposEvent::OperatorRewardChanged { id, height }
                }
                MasternodeOperation::DismissVote { .. } => DposEvent::DismissVoteRecorded {
                    tx: applied.tx,
                    against: id,
                    height,
                },
                MasternodeOperation::DismissVoteRecall { .. } => DposEvent::DismissVoteRecalled {
                    tx: applied.tx,
                    against: id,
                    height,
                },
                MasternodeOperation::FinalizeDismissVoting { .. } => {
                    DposEvent::MasternodeDismissed {
                        id,
                        height,
                        automatic: false,
                    }
                }
            });
        }
        for (_, e) in &outcome.skipped {
            crate::metrics::record_operation_skipped(e.label());
        }
        for id in &outcome.auto_activated {
            crate::metrics::record_transition("auto_activate");
            events.push(DposEvent::MasternodeActivated {
                id: *id,
                height,
                automatic: true,
            });
        }
        for id in &outcome.auto_dismissed {
            crate::metrics::record_transition("auto_dismiss");
            events.push(DposEvent::MasternodeDismissed {
                id: *id,
                height,
                automatic: true,
            });
        }
        if let Some(team) = &outcome.new_team {
            events.push(DposEvent::TeamChanged {
                height: height + 1,
                members: team.iter().map(|(id, _)| *id).collect(),
            });
        }
        events
    }

    /// Apply one ledger block and return the events it produced.
    fn connect_block(&self, block: &Block) -> DposResult<Vec<DposEvent>> {
        let outcome = {
            let mut chain = self.state.chain.write();
            let outcome = chain.apply_block(block, &self.config)?;
            self.state.checkpoints.write().observe(&chain);
            outcome
        };
        self.state.instant.write().block_connected(block);
        crate::metrics::record_block_applied();
        Ok(Self::outcome_events(&outcome))
    }

    /// Housekeeping after the tip moved.
    fn prune_after_sync(&self) {
        let chain = self.state.chain.read();
        let Some(tip) = chain.tip() else {
            return;
        };
        self.state.heartbeats.write().retain_live(chain.registry());

        let retention = self.config.rounds.vote_retention_blocks;
        let pruned = self
            .state
            .rounds
            .write()
            .prune(tip.height + 1, retention);
        let keep: BTreeSet<Hash> = (tip.height.saturating_sub(retention)..=tip.height)
            .filter_map(|h| chain.hash_at(h))
            .collect();
        let settled = {
            let mut instant = self.state.instant.write();
            instant.prune_votes(&keep);
            instant.prune(tip.height, retention)
        };
        if pruned > 0 || settled > 0 {
            debug!(pruned, settled, "pruned gossip for old tips");
        }
    }

    fn save_snapshot(&self) {
        {
            let chain = self.state.chain.read();
            if let Err(e) = self.snapshots.save(&chain) {
                warn!(error = %e, "failed to save masternode snapshot");
            }
        }
        self.save_gossip();
    }

    fn save_gossip(&self) {
        let gossip = GossipSnapshot {
            rounds: self.state.rounds.read().clone(),
            instant: self.state.instant.read().clone(),
        };
        if let Err(e) = self.snapshots.save_gossip(&gossip) {
            warn!(error = %e, "failed to save gossip snapshot");
        }
    }

    async fn sync_inner(&self) -> DposResult<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        self.sync_locked().await
    }

    /// Sync pass; the caller holds `sync_lock`.
    async fn sync_locked(&self) -> DposResult<SyncReport> {
        let started = std::time::Instant::now();
        let ledger_height = self.ledger.block_height().await?;
        let local_tip = self.state.chain.read().tip();

        let mut report = SyncReport::default();
        let mut fork_height = None;
        if let Some(tip) = local_tip {
            match self.find_fork(tip.height.min(ledger_height)).await? {
                Some(fork) if fork == tip.height => {}
                Some(fork) => {
                    report.disconnected = tip.height - fork;
                    warn!(
                        fork,
                        disconnected = report.disconnected,
                        "chain reorganized, rewinding masternode state"
                    );
                    self.rewind_to(fork).await?;
                    fork_height = Some(fork);
                }
                None => {
                    report.disconnected = tip.height + 1;
                    warn!("ledger genesis changed, dropping all masternode state");
                    *self.state.chain.write() = ChainState::new();
                    self.state.checkpoints.write().clear();
                    self.state.clear_gossip(self.now());
                }
            }
        }

        let next = self.state.chain.read().next_height();
        for height in next..=ledger_height {
            let block = self.ledger.block(height).await?;
            let events = self.connect_block(&block)?;
            report.applied += 1;
            self.publish_all(events).await?;
        }
        report.tip = self.state.chain.read().tip();

        if let Some(fork) = fork_height {
            let revoked = self.state.instant.write().finish_reorg();
            for tx in revoked {
                warn!(tx = %short(&tx), "instant transaction revoked by reorg");
                crate::metrics::record_instant_tx("revoked");
                self.publish(DposEvent::InstantTxRevoked { tx }).await?;
            }
            let digest = self.state.chain.read().digest()?;
            self.publish(DposEvent::ChainReplayed {
                from_height: fork + 1,
                to_height: ledger_height,
                digest,
            })
            .await?;
            crate::metrics::record_replay_latency(started.elapsed().as_secs_f64());
        }

        if report.applied > 0 || report.disconnected > 0 {
            self.prune_after_sync();
            self.save_snapshot();
            debug!(
                applied = report.applied,
                disconnected = report.disconnected,
                height = ledger_height,
                "masternode state synced"
            );
        }
        Ok(report)
    }

    async fn reindex_inner(&self) -> DposResult<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        let started = std::time::Instant::now();
        let height = self.ledger.block_height().await?;
        let blocks = self.fetch_blocks(0, height).await?;

        let mut state = ChainState::new();
        let mut checkpoints = Checkpoints::from_config(&self.config);
        for block in &blocks {
            state.apply_block(block, &self.config)?;
            checkpoints.observe(&state);
        }
        let digest = state.digest()?;
        let tip = state.tip();

        *self.state.chain.write() = state;
        *self.state.checkpoints.write() = checkpoints;
        let revoked = {
            let mut instant = self.state.instant.write();
            instant.blocks_disconnected(0);
            for block in &blocks {
                instant.block_connected(block);
            }
            instant.finish_reorg()
        };
        self.state.reset_liveness(self.now());
        self.prune_after_sync();
        self.save_snapshot();

        for tx in revoked {
            crate::metrics::record_instant_tx("revoked");
            self.publish(DposEvent::InstantTxRevoked { tx }).await?;
        }
        self.publish(DposEvent::ChainReplayed {
            from_height: 0,
            to_height: height,
            digest,
        })
        .await?;

        let elapsed = started.elapsed().as_secs_f64();
        crate::metrics::record_replay_latency(elapsed);
        info!(blocks = blocks.len(), digest = %short(&digest), elapsed, "reindex complete");
        Ok(SyncReport {
            tip,
            applied: blocks.len() as u64,
            disconnected: 0,
        })
    }

    /// Re-derive the state from genesis and compare it with the live one.
    pub async fn verify_replay(&self) -> DposResult<Hash> {
        let _guard = self.sync_lock.lock().await;
        let (tip, live) = {
            let chain = self.state.chain.read();
            (chain.tip(), chain.digest()?)
        };
        let Some(tip) = tip else {
            return Ok(live);
        };
        let blocks = self.fetch_blocks(0, tip.height).await?;
        let replayed = replay(&blocks, &self.config)?.digest()?;
        if replayed != live {
            error!(
                height = tip.height,
                live = %short(&live),
                replayed = %short(&replayed),
                "masternode state diverged from a replay of the chain"
            );
            return Err(DposError::StateDivergence {
                height: tip.height,
                live,
                replayed,
            });
        }
        Ok(live)
    }

    // === MASTERNODE TRANSACTIONS ===

    /// Encode `operation` into a transaction, fund it, pre-validate it
    /// against the current state and hand it to the ledger.
    async fn submit_operation(
        &self,
        signer: Address,
        payer: Address,
        operation: MasternodeOperation,
        inputs: Vec<OutPoint>,
        outputs: Vec<TxOut>,
    ) -> DposResult<Hash> {
        let tx = Transaction {
            inputs,
            outputs,
            signer,
            metadata: operation.encode()?,
            instantly: false,
            nonce: self.now(),
        };
        let tx = self.ledger.fund_transaction(tx, &payer).await?;
        {
            let chain = self.state.chain.read();
            chain.check_operation(&tx, &operation, chain.next_height(), &self.config)?;
        }
        let hash = self
            .ledger
            .submit_transaction(self.ledger.encode_transaction(&tx))
            .await?;
        info!(kind = operation.kind(), tx = %short(&hash), "submitted masternode transaction");
        Ok(hash)
    }

    async fn submit_as_operator(&self, operation: MasternodeOperation) -> DposResult<Hash> {
        let operator = self.require_signer()?.operator_address();
        self.submit_operation(operator, operator, operation, vec![], vec![])
            .await
    }

    // === GOSSIP ===

    fn verify_signer(&self, message: &GossipMessage) -> DposResult<Option<Address>> {
        let (Some(hash), Some(auth)) = (message.signing_hash(), message.auth()) else {
            return Ok(None);
        };
        self.sig_verifier
            .verify(&hash, &auth)
            .map(Some)
            .ok_or(DposError::InvalidSignature)
    }

    async fn ingest_heartbeat(&self, signer: Address, message: HeartbeatMessage) -> DposResult<RecordOutcome> {
        let now = self.now();
        let outcome = {
            let chain = self.state.chain.read();
            self.state.heartbeats.write().record(
                chain.registry(),
                signer,
                message,
                now,
                &self.config.heartbeat,
            )
        };
        match &outcome {
            Ok(RecordOutcome::Accepted) => crate::metrics::record_heartbeat("accepted"),
            Ok(RecordOutcome::Duplicate) => crate::metrics::record_heartbeat("duplicate"),
            Ok(RecordOutcome::TooFrequent) => crate::metrics::record_heartbeat("too_frequent"),
            Err(e) => crate::metrics::record_heartbeat(e.label()),
        }
        outcome
    }

    async fn ingest_vice_block(&self, block: ViceBlock) -> DposResult<Hash> {
        let chain = self.state.chain.read();
        let ctx = self
            .round_context(&chain, self.config.rounds.round_quorum)
            .ok_or(DposError::NotTeamMember(block.proposer))?;
        self.state.rounds.write().add_vice_block(block, &ctx)
    }

    async fn ingest_round_vote(&self, vote: RoundVote) -> DposResult<()> {
        let chain = self.state.chain.read();
        let ctx = self
            .round_context(&chain, self.config.rounds.round_quorum)
            .ok_or(DposError::NotTeamMember(vote.voter))?;
        self.state.rounds.write().add_vote(vote, &ctx)
    }

    async fn ingest_tx_vote(&self, vote: TxVote) -> DposResult<()> {
        let subject = vote.choice.subject;
        let status = {
            let chain = self.state.chain.read();
            let ctx = self
                .round_context(&chain, self.config.rounds.tx_quorum)
                .ok_or(DposError::NotTeamMember(vote.voter))?;
            self.state
                .instant
                .write()
                .vote(vote, &ctx, self.config.rounds.max_tx_votes_per_voter)?
        };
        self.instant_decided(subject, status).await
    }

    async fn instant_decided(&self, tx: Hash, status: Option<InstantStatus>) -> DposResult<()> {
        match status {
            Some(InstantStatus::Finalized) => {
                let approved_by = self
                    .state
                    .instant
                    .read()
                    .get(&tx)
                    .map(|e| e.approved_by.clone())
                    .unwrap_or_default();
                info!(tx = %short(&tx), votes = approved_by.len(), "instant transaction finalized");
                crate::metrics::record_instant_tx("finalized");
                self.publish(DposEvent::InstantTxFinalized { tx, approved_by })
                    .await
            }
            Some(InstantStatus::Rejected) => {
                info!(tx = %short(&tx), "instant transaction rejected");
                crate::metrics::record_instant_tx("rejected");
                self.publish(DposEvent::InstantTxRejected { tx }).await
            }
            _ => Ok(()),
        }
    }

    /// Register an instant transaction and cast the local vote on it.
    /// `admitted` is false when the ledger refused the transaction.
    async fn accept_instant(&self, tx: Transaction, admitted: bool) -> DposResult<()> {
        let (hash, status) = {
            let chain = self.state.chain.read();
            let Some(ctx) = self.round_context(&chain, self.config.rounds.tx_quorum) else {
                debug!(tx = %short(&tx.hash()), "dPoS inactive, instant transaction left to mining");
                return Ok(());
            };
            self.state.instant.write().submit(tx, &ctx)?
        };
        self.instant_decided(hash, status).await?;
        if let Some((message, status)) = self.local_tx_vote(&hash, admitted)? {
            self.relay(message).await?;
            self.instant_decided(hash, status).await?;
        }
        Ok(())
    }

    /// Sign and record the local vote on `hash`. Returns the message to
    /// relay and the status the vote decided, if any.
    fn local_tx_vote(
        &self,
        hash: &Hash,
        admitted: bool,
    ) -> DposResult<Option<(GossipMessage, Option<InstantStatus>)>> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let me = signer.operator_address();
        let chain = self.state.chain.read();
        let (Some(round_ctx), Some(tx_ctx)) = (
            self.round_context(&chain, self.config.rounds.round_quorum),
            self.round_context(&chain, self.config.rounds.tx_quorum),
        ) else {
            return Ok(None);
        };
        if !tx_ctx.team.contains_operator(&me) {
            return Ok(None);
        }
        let round = self.state.rounds.read().current_round(&round_ctx);

        let mut instant = self.state.instant.write();
        let choice = if admitted {
            instant.local_choice(hash)
        } else {
            Some(VoteChoice::no(*hash))
        };
        let Some(choice) = choice else {
            return Ok(None);
        };
        let vote = TxVote {
            voter: me,
            tip: tx_ctx.tip,
            round,
            choice,
        };
        let auth = signer.sign(&vote.signing_hash())?;
        let status = instant.vote(vote.clone(), &tx_ctx, self.config.rounds.max_tx_votes_per_voter)?;
        Ok(Some((GossipMessage::TxVote { vote, auth }, status)))
    }

    // === ROUNDS ===

    /// Vote YES for the best vice-block of the lowest open round.
    fn local_round_vote(&self) -> DposResult<Option<GossipMessage>> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let me = signer.operator_address();
        let chain = self.state.chain.read();
        let Some(ctx) = self.round_context(&chain, self.config.rounds.round_quorum) else {
            return Ok(None);
        };
        if !ctx.team.contains_operator(&me) {
            return Ok(None);
        }
        let mut rounds = self.state.rounds.write();
        let round = rounds.current_round(&ctx);
        if rounds.has_voted(&ctx.tip, round, &me) {
            return Ok(None);
        }
        let Some(candidate) = rounds.best_candidate(round, &ctx) else {
            return Ok(None);
        };
        let vote = RoundVote {
            voter: me,
            tip: ctx.tip,
            round,
            choice: VoteChoice::yes(candidate),
        };
        let auth = signer.sign(&vote.signing_hash())?;
        rounds.add_vote(vote.clone(), &ctx)?;
        Ok(Some(GossipMessage::RoundVote { vote, auth }))
    }

    fn approved_vice_block(&self) -> Option<ApprovedViceBlock> {
        let chain = self.state.chain.read();
        let ctx = self.round_context(&chain, self.config.rounds.round_quorum)?;
        let approved = self.state.rounds.read().approved(&ctx)?;
        let mut last = self.state.last_approved.write();
        if *last == Some(ctx.tip) {
            return None;
        }
        *last = Some(ctx.tip);
        Some(approved)
    }

    /// Cast the local round vote and hand an approved vice-block to the
    /// ledger.
    async fn drive_rounds(&self) -> DposResult<()> {
        if let Some(message) = self.local_round_vote()? {
            self.relay(message).await?;
        }
        let Some(approved) = self.approved_vice_block() else {
            return Ok(());
        };

        let block = approved.to_block();
        let hash = approved.block.hash();
        info!(
            height = approved.block.height,
            round = approved.block.round,
            votes = approved.approved_by.len(),
            vice_block = %short(&hash),
            "vice-block approved"
        );
        crate::metrics::record_vice_block_approved();
        self.publish(DposEvent::ViceBlockApproved {
            hash,
            height: approved.block.height,
            round: approved.block.round,
            approved_by: approved.approved_by.clone(),
        })
        .await?;
        // Peers submit the same block; only the first one extends the tip.
        if let Err(e) = self.ledger.submit_block(block).await {
            debug!(error = %e, "ledger did not take approved vice-block");
        }
        Ok(())
    }

    /// Propose a vice-block carrying the finalized, not yet mined instant
    /// transactions when the local operator leads the current round.
    pub async fn propose_vice_block(&self) -> DposResult<Option<Hash>> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let me = signer.operator_address();
        let message = {
            let chain = self.state.chain.read();
            let Some(ctx) = self.round_context(&chain, self.config.rounds.round_quorum) else {
                return Ok(None);
            };
            let mut rounds = self.state.rounds.write();
            let round = rounds.current_round(&ctx);
            if ctx.leader(round) != Some(me) {
                return Ok(None);
            }
            let transactions: Vec<Transaction> = self
                .state
                .instant
                .read()
                .list_instant()
                .into_iter()
                .filter(|e| e.mined_at.is_none())
                .map(|e| e.tx.clone())
                .collect();
            if transactions.is_empty() {
                return Ok(None);
            }
            let block = ViceBlock {
                tip: ctx.tip,
                round,
                height: ctx.height,
                proposer: me,
                timestamp: self.now(),
                transactions,
            };
            let auth = signer.sign(&block.hash())?;
            match rounds.add_vice_block(block.clone(), &ctx) {
                Ok(_) => {}
                Err(DposError::DoubleSign(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
            GossipMessage::ViceBlock { block, auth }
        };
        let hash = match &message {
            GossipMessage::ViceBlock { block, .. } => block.hash(),
            _ => return Ok(None),
        };
        debug!(vice_block = %short(&hash), "proposed vice-block");
        self.relay(message).await?;
        self.drive_rounds().await?;
        Ok(Some(hash))
    }

    /// PASS the current round if it made no progress for `round_timeout_ms`.
    fn round_timeout_vote(&self, now: u64) -> DposResult<Option<GossipMessage>> {
        let chain = self.state.chain.read();
        let Some(ctx) = self.round_context(&chain, self.config.rounds.round_quorum) else {
            return Ok(None);
        };
        let mut started = self.state.round_started.write();
        match *started {
            Some((tip, at)) if tip == ctx.tip => {
                if now.saturating_sub(at) < self.config.rounds.round_timeout_ms {
                    return Ok(None);
                }
                *started = Some((tip, now));
            }
            _ => {
                *started = Some((ctx.tip, now));
                return Ok(None);
            }
        }

        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let me = signer.operator_address();
        if !ctx.team.contains_operator(&me) {
            return Ok(None);
        }
        let mut rounds = self.state.rounds.write();
        let round = rounds.current_round(&ctx);
        if rounds.has_voted(&ctx.tip, round, &me) {
            return Ok(None);
        }
        let vote = RoundVote {
            voter: me,
            tip: ctx.tip,
            round,
            choice: VoteChoice::pass(),
        };
        let auth = signer.sign(&vote.signing_hash())?;
        rounds.add_vote(vote.clone(), &ctx)?;
        info!(round, "round timed out, passing");
        Ok(Some(GossipMessage::RoundVote { vote, auth }))
    }

    /// Vote to dismiss outdated masternodes, once per target and within
    /// the per-voter limit.
    async fn auto_dismiss_outdated(&self, now: u64) -> DposResult<()> {
        if !self.config.heartbeat.auto_dismiss_outdated {
            return Ok(());
        }
        let Some(me) = self.operator_address() else {
            return Ok(());
        };
        let targets: Vec<MasternodeId> = {
            let chain = self.state.chain.read();
            let registry = chain.registry();
            let Some(my_id) = registry.active_by_operator(&me) else {
                return Ok(());
            };
            let remaining = self
                .config
                .max_dismiss_votes_per_mn
                .saturating_sub(chain.votes().counter_votes_from(&my_id));
            let done = self.state.auto_dismissed.read();
            self.state
                .heartbeats
                .read()
                .filter(registry, Liveness::Outdated, now, &self.config.heartbeat)
                .into_iter()
                .filter(|id| *id != my_id && !done.contains(id))
                .filter(|id| chain.votes().get(&my_id, id).is_none())
                .take(remaining)
                .collect()
        };

        for target in targets {
            let op = MasternodeOperation::DismissVote {
                against: target,
                reason_code: REASON_OUTDATED,
                reason_desc: "outdated".into(),
            };
            match self.submit_as_operator(op).await {
                Ok(tx) => {
                    info!(against = %short(&target), tx = %short(&tx), "voted to dismiss outdated masternode");
                    self.state.auto_dismissed.write().insert(target);
                }
                Err(e) => debug!(against = %short(&target), error = %e, "auto dismiss vote failed"),
            }
        }
        Ok(())
    }

    /// Periodic work: round timeouts, proposals, local votes, approvals
    /// and automatic dismiss votes.
    pub async fn on_timer(&self) -> DposResult<()> {
        let now = self.now();
        if let Some(message) = self.round_timeout_vote(now)? {
            self.relay(message).await?;
        }
        self.propose_vice_block().await?;
        self.drive_rounds().await?;
        let result = self.auto_dismiss_outdated(now).await;
        self.save_gossip();
        result
    }
}

#[async_trait]
impl<L, E, V, S> MasternodeApi for DposService<L, E, V, S>
where
    L: LedgerAdapter + 'static,
    E: EventBus + 'static,
    V: SignatureVerifier + 'static,
    S: SnapshotStore + 'static,
{
    async fn announce(&self, request: AnnounceRequest) -> DposResult<MasternodeId> {
        let owner = request.owner_auth_address;
        let collateral = TxOut {
            value: self.config.collateral_amount,
            address: request.collateral_address,
        };
        self.submit_operation(
            owner,
            owner,
            MasternodeOperation::Announce(request),
            vec![],
            vec![collateral],
        )
        .await
    }

    async fn activate(&self, node: MasternodeId, operator: Address) -> DposResult<Hash> {
        let collateral = {
            let chain = self.state.chain.read();
            chain.registry().require(&node)?.collateral
        };
        if !self
            .ledger
            .is_collateral_mature(&collateral, self.config.activation_delay)
            .await?
        {
            let chain = self.state.chain.read();
            let mn = chain.registry().require(&node)?;
            return Err(DposError::CollateralNotMature {
                min_height: mn.min_activation_height,
                height: chain.next_height(),
            });
        }
        self.submit_operation(
            operator,
            operator,
            MasternodeOperation::Activate { node },
            vec![],
            vec![],
        )
        .await
    }

    async fn resign(&self, node: MasternodeId, payout: Address, owner: Address) -> DposResult<Hash> {
        let (collateral, amount) = {
            let chain = self.state.chain.read();
            let mn = chain.registry().require(&node)?;
            (mn.collateral, mn.collateral_amount)
        };
        self.submit_operation(
            owner,
            owner,
            MasternodeOperation::Resign { node, payout },
            vec![collateral],
            vec![TxOut {
                value: amount,
                address: payout,
            }],
        )
        .await
    }

    async fn set_operator_reward(
        &self,
        node: MasternodeId,
        operator_auth_address: Address,
        operator_reward_address: Option<Address>,
        operator_reward_ratio: u32,
        signer: Address,
    ) -> DposResult<Hash> {
        self.submit_operation(
            signer,
            signer,
            MasternodeOperation::SetOperatorReward {
                node,
                operator_auth_address,
                operator_reward_address,
                operator_reward_ratio,
            },
            vec![],
            vec![],
        )
        .await
    }

    async fn dismiss_vote(
        &self,
        against: MasternodeId,
        reason_code: u16,
        reason_desc: String,
    ) -> DposResult<Hash> {
        self.submit_as_operator(MasternodeOperation::DismissVote {
            against,
            reason_code,
            reason_desc,
        })
        .await
    }

    async fn dismiss_vote_recall(&self, against: MasternodeId) -> DposResult<Hash> {
        self.submit_as_operator(MasternodeOperation::DismissVoteRecall { against })
            .await
    }

    async fn finalize_dismiss_voting(&self, against: MasternodeId) -> DposResult<Hash> {
        self.submit_as_operator(MasternodeOperation::FinalizeDismissVoting { against })
            .await
    }

    async fn list_masternodes(
        &self,
        ids: Option<Vec<MasternodeId>>,
        verbose: bool,
    ) -> DposResult<Vec<MasternodeEntry>> {
        self.state.chain.read().list(ids.as_deref(), verbose)
    }

    async fn list_active_masternodes(&self) -> Vec<MasternodeView> {
        self.state.chain.read().list_active()
    }

    async fn balances(&self, address: Address) -> DposResult<Balances> {
        let spendable = self.ledger.balance(&address).await?;
        let locked = self.ledger.locked_balance(&address).await?;
        let collateral = self.state.chain.read().registry().locked_collateral(&address);
        Ok(Balances {
            spendable,
            locked,
            collateral,
        })
    }

    async fn send_heartbeat(
        &self,
        sender: Address,
        timestamp: Option<u64>,
    ) -> DposResult<HeartbeatReceipt> {
        let signer = self.require_signer()?;
        if signer.operator_address() != sender {
            return Err(DposError::UnknownSigningKey(sender));
        }
        let timestamp = timestamp.unwrap_or_else(|| self.now());
        let auth = signer.sign(&HeartbeatMessage::signing_hash(timestamp))?;
        let message = HeartbeatMessage::from_auth(timestamp, auth.clone());
        let hash = message.hash();

        let outcome = self.ingest_heartbeat(sender, message.clone()).await?;
        if outcome == RecordOutcome::Accepted {
            self.relay(GossipMessage::Heartbeat(message)).await?;
        }
        Ok(HeartbeatReceipt {
            timestamp,
            signature: auth,
            hash,
        })
    }

    async fn list_heartbeats(&self) -> Vec<HeartbeatEntry> {
        let chain = self.state.chain.read();
        self.state.heartbeats.read().list(chain.registry())
    }

    async fn filter_masternodes_by_liveness(&self, class: Liveness) -> Vec<MasternodeId> {
        let now = self.now();
        let chain = self.state.chain.read();
        self.state
            .heartbeats
            .read()
            .filter(chain.registry(), class, now, &self.config.heartbeat)
    }

    async fn get_team(&self, height: Option<u64>) -> Option<Team> {
        let chain = self.state.chain.read();
        let height = height.unwrap_or_else(|| chain.next_height());
        chain.team_at(height).cloned()
    }

    async fn list_vice_blocks(&self) -> Vec<ViceBlock> {
        self.state.rounds.read().list_vice_blocks()
    }

    async fn list_round_votes(&self) -> Vec<RoundVote> {
        self.state.rounds.read().list_votes()
    }

    async fn list_tx_votes(&self) -> Vec<TxVote> {
        self.state.instant.read().list_votes()
    }

    async fn list_instant_transactions(&self) -> Vec<InstantTransaction> {
        self.state
            .instant
            .read()
            .list_instant()
            .into_iter()
            .cloned()
            .collect()
    }

    async fn list_committed_txs(&self) -> Vec<InstantTransaction> {
        self.state
            .instant
            .read()
            .list_committed()
            .into_iter()
            .cloned()
            .collect()
    }

    async fn submit_transaction(&self, mut tx: Transaction, instantly: bool) -> DposResult<Hash> {
        tx.instantly = instantly;
        let hash = self
            .ledger
            .submit_transaction(self.ledger.encode_transaction(&tx))
            .await?;
        if instantly {
            self.relay(GossipMessage::Transaction(tx.clone())).await?;
            self.accept_instant(tx, true).await?;
            self.save_gossip();
        }
        Ok(hash)
    }

    async fn reward_split(&self, height: u64) -> DposResult<Option<RewardSplit>> {
        self.state.chain.read().reward_split(height)
    }

    async fn handle_gossip(&self, message: GossipMessage) -> DposResult<()> {
        let kind = message.kind();
        let signer = self.verify_signer(&message)?;
        let result = match (message, signer) {
            (GossipMessage::Heartbeat(beacon), Some(signer)) => {
                self.ingest_heartbeat(signer, beacon).await.map(|_| ())
            }
            (GossipMessage::ViceBlock { block, .. }, Some(signer)) => {
                if block.proposer != signer {
                    return Err(DposError::InvalidSignature);
                }
                self.ingest_vice_block(block).await?;
                self.drive_rounds().await
            }
            (GossipMessage::RoundVote { vote, .. }, Some(signer)) => {
                if vote.voter != signer {
                    return Err(DposError::InvalidSignature);
                }
                self.ingest_round_vote(vote).await?;
                self.drive_rounds().await
            }
            (GossipMessage::TxVote { vote, .. }, Some(signer)) => {
                if vote.voter != signer {
                    return Err(DposError::InvalidSignature);
                }
                self.ingest_tx_vote(vote).await
            }
            (GossipMessage::Transaction(tx), _) => {
                if !tx.instantly {
                    return Err(DposError::NotInstant(tx.hash()));
                }
                let admitted = match self
                    .ledger
                    .submit_transaction(self.ledger.encode_transaction(&tx))
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        debug!(tx = %short(&tx.hash()), error = %e, "ledger refused relayed instant transaction");
                        false
                    }
                };
                self.accept_instant(tx, admitted).await
            }
            (_, None) => Err(DposError::InvalidSignature),
        };
        match &result {
            Ok(()) => self.save_gossip(),
            Err(e) => debug!(kind, error = %e, "gossip message rejected"),
        }
        result
    }

    async fn sync(&self) -> DposResult<SyncReport> {
        self.sync_inner().await
    }

    async fn reindex(&self) -> DposResult<SyncReport> {
        self.reindex_inner().await
    }

    async fn state_digest(&self) -> DposResult<Hash> {
        self.state.chain.read().digest()
    }
}
