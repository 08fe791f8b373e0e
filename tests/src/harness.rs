//! # Test Network
//!
//! Several masternode services sharing one in-memory ledger. Gossip is
//! moved by draining each node's outbox into every other node until no
//! node has anything left to say.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use qc_08_dpos::adapters::{
    InMemoryEventBus, InMemoryLedger, InMemorySnapshotStore, K256Signer, K256Verifier,
};
use qc_08_dpos::domain::AnnounceRequest;
use qc_08_dpos::ports::{MasternodeApi, MasternodeSigner, TimeSource};
use qc_08_dpos::{DposConfig, DposDependencies, DposEvent, DposService, MasternodeId};
use shared_types::{Address, Block, Hash, Transaction, TxOut, COIN};

/// Start of the simulated clock (unix ms).
pub const GENESIS_TIME: u64 = 1_700_000_000_000;

/// Address funded at genesis for wallet transfers.
pub const WALLET: Address = [0x77; 20];

pub type TestService =
    DposService<InMemoryLedger, InMemoryEventBus, K256Verifier, InMemorySnapshotStore>;

/// Clock shared by every node of a network.
#[derive(Clone)]
pub struct SharedClock(Arc<AtomicU64>);

impl SharedClock {
    pub fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl TimeSource for SharedClock {
    fn now_ms(&self) -> u64 {
        self.now()
    }
}

pub fn operator_key(i: usize) -> K256Signer {
    K256Signer::from_seed(format!("network-operator-{i}").as_bytes())
        .expect("seeded key is valid")
}

pub fn owner_address(i: usize) -> Address {
    let mut address = [0xA0; 20];
    address[..8].copy_from_slice(&(i as u64).to_be_bytes());
    address
}

pub fn announce_request(i: usize) -> AnnounceRequest {
    AnnounceRequest {
        name: format!("masternode-{i}"),
        owner_auth_address: owner_address(i),
        operator_auth_address: operator_key(i).operator_address(),
        owner_reward_address: owner_address(i),
        operator_reward_address: None,
        operator_reward_ratio: 0,
        collateral_address: owner_address(i),
    }
}

/// One participant of the network.
pub struct TestNode {
    pub service: TestService,
    pub bus: Arc<InMemoryEventBus>,
    pub snapshots: Arc<InMemorySnapshotStore>,
    pub operator: Address,
}

impl TestNode {
    pub fn events(&self) -> Vec<DposEvent> {
        self.bus.get_events()
    }
}

pub struct TestNetwork {
    pub ledger: Arc<InMemoryLedger>,
    pub nodes: Vec<TestNode>,
    pub clock: SharedClock,
    pub config: DposConfig,
}

impl TestNetwork {
    /// `size` operator nodes; each owner is funded for a few collaterals.
    pub fn new(size: usize, config: DposConfig) -> Self {
        let mut allocations: Vec<TxOut> = (0..size + 2)
            .map(|i| TxOut {
                value: config.collateral_amount * 3,
                address: owner_address(i),
            })
            .collect();
        allocations.push(TxOut {
            value: 1_000 * COIN,
            address: WALLET,
        });
        let ledger = Arc::new(InMemoryLedger::new(allocations, &config));
        let clock = SharedClock::new(GENESIS_TIME);

        let nodes = (0..size)
            .map(|i| Self::spawn_node(&ledger, &clock, &config, Some(operator_key(i))))
            .collect();
        Self {
            ledger,
            nodes,
            clock,
            config,
        }
    }

    fn spawn_node(
        ledger: &Arc<InMemoryLedger>,
        clock: &SharedClock,
        config: &DposConfig,
        key: Option<K256Signer>,
    ) -> TestNode {
        let bus = Arc::new(InMemoryEventBus::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let operator = key.as_ref().map(|k| k.operator_address()).unwrap_or_default();
        let service = DposService::new(DposDependencies {
            ledger: Arc::clone(ledger),
            event_bus: Arc::clone(&bus),
            sig_verifier: Arc::new(K256Verifier),
            snapshots: Arc::clone(&snapshots),
            signer: key.map(|k| Arc::new(k) as Arc<dyn MasternodeSigner>),
            config: config.clone(),
        })
        .with_time_source(Box::new(clock.clone()));
        TestNode {
            service,
            bus,
            snapshots,
            operator,
        }
    }

    /// A follower (no operator key) on the same ledger.
    pub fn follower(&self) -> TestNode {
        Self::spawn_node(&self.ledger, &self.clock, &self.config, None)
    }

    /// Replace node `i` by a fresh service that keeps its snapshot store
    /// and event bus, as after a process restart.
    pub fn restart(&mut self, i: usize) -> &TestService {
        let old = &self.nodes[i];
        let service = DposService::new(DposDependencies {
            ledger: Arc::clone(&self.ledger),
            event_bus: Arc::clone(&old.bus),
            sig_verifier: Arc::new(K256Verifier),
            snapshots: Arc::clone(&old.snapshots),
            signer: Some(Arc::new(operator_key(i)) as Arc<dyn MasternodeSigner>),
            config: self.config.clone(),
        })
        .with_time_source(Box::new(self.clock.clone()));
        self.nodes[i].service = service;
        &self.nodes[i].service
    }

    pub fn node(&self, i: usize) -> &TestService {
        &self.nodes[i].service
    }

    pub async fn sync_all(&self) {
        for node in &self.nodes {
            node.service.sync().await.expect("sync");
        }
    }

    /// Mine the mempool into a block and let every node apply it.
    pub async fn mine(&self) -> Block {
        let block = self.ledger.mine_block(self.clock.now());
        self.sync_all().await;
        block
    }

    /// Announce one masternode per node and mine until the team is full.
    pub async fn bring_up(&self) -> Vec<MasternodeId> {
        let mut ids = Vec::new();
        for i in 0..self.nodes.len() {
            let id = self
                .node(0)
                .announce(announce_request(i))
                .await
                .expect("announce");
            ids.push(id);
        }
        self.mine().await;
        for _ in 0..self.config.activation_delay {
            self.mine().await;
        }
        ids
    }

    /// Deliver relayed gossip until every outbox stays empty. Returns the
    /// number of deliveries that were rejected.
    pub async fn deliver_gossip(&self) -> usize {
        let mut rejected = 0;
        loop {
            let mut moved = false;
            for (i, sender) in self.nodes.iter().enumerate() {
                for message in sender.bus.drain_outbox() {
                    moved = true;
                    for (j, receiver) in self.nodes.iter().enumerate() {
                        if i != j && receiver.service.handle_gossip(message.clone()).await.is_err() {
                            rejected += 1;
                        }
                    }
                }
            }
            if !moved {
                return rejected;
            }
        }
    }

    /// Run every node's timer once and spread what it produced.
    pub async fn tick(&self) {
        for node in &self.nodes {
            node.service.on_timer().await.expect("timer");
        }
        self.deliver_gossip().await;
    }

    pub async fn digests(&self) -> Vec<Hash> {
        let mut digests = Vec::new();
        for node in &self.nodes {
            digests.push(node.service.state_digest().await.expect("digest"));
        }
        digests
    }

    /// Transfer from the genesis wallet, funded but not submitted.
    pub async fn wallet_transfer(&self, value: u64, nonce: u64) -> Transaction {
        use qc_08_dpos::ports::LedgerAdapter;
        let tx = Transaction {
            inputs: vec![],
            outputs: vec![TxOut {
                value,
                address: [0x99; 20],
            }],
            signer: WALLET,
            metadata: vec![],
            instantly: false,
            nonce,
        };
        self.ledger.fund_transaction(tx, &WALLET).await.expect("fund")
    }
}
