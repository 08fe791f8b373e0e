//! # Quantum-Chain Masternode Node
//!
//! Runs the masternode subsystem on top of a dev ledger.
//!
//! ## Tasks
//!
//! ```text
//! miner ──mine_block──→ InMemoryLedger
//!                             │
//! dpos loop ──sync / on_timer─┘──→ events logged, gossip drained
//! heartbeat ──send_heartbeat (operators only)
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults, then `QC_*` environment)
//! 2. Validate it
//! 3. Lock the data directory
//! 4. Restore the masternode snapshot or reindex
//! 5. Spawn the tasks and wait for Ctrl+C

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use node_runtime::container::config::{parse_address, parse_key};
use node_runtime::{DataDirLock, NodeConfig, SubsystemContainer};
use qc_08_dpos::MasternodeApi;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The node runtime driving the masternode subsystem.
pub struct NodeRuntime {
    container: Arc<SubsystemContainer>,
    _lock: DataDirLock,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl NodeRuntime {
    pub fn new(config: NodeConfig) -> Result<Self> {
        info!("Creating masternode node runtime");
        config.validate().context("invalid configuration")?;
        let lock = DataDirLock::acquire(&config.storage.data_dir, config.storage.min_free_bytes)
            .context("failed to lock data directory")?;
        let container = Arc::new(SubsystemContainer::new(config)?);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        Ok(Self {
            container,
            _lock: lock,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let config = &self.container.config;
        info!("===========================================");
        info!("  Quantum-Chain Masternode Node v0.1.0");
        info!("  Network: {}", config.dpos.network);
        info!("===========================================");

        let dpos = &self.container.dpos;
        let report = if config.dpos.reindex {
            dpos.reindex().await?
        } else {
            dpos.start().await?
        };
        info!(
            height = report.tip.map(|t| t.height),
            applied = report.applied,
            "masternode state ready"
        );

        if config.mining.enabled {
            self.spawn_miner();
        }
        self.spawn_dpos_loop();
        if dpos.operator_address().is_some() {
            self.spawn_heartbeat();
        }

        info!("Data Dir: {:?}", config.storage.data_dir);
        Ok(())
    }

    fn spawn_miner(&self) {
        let ledger = Arc::clone(&self.container.ledger);
        let period = Duration::from_millis(self.container.config.mining.block_time_ms);
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let block = ledger.mine_block(now_ms());
                        info!(height = block.height(), txs = block.transactions.len(), "mined block");
                    }
                    _ = shutdown.changed() => {
                        info!("Miner shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_dpos_loop(&self) {
        let container = Arc::clone(&self.container);
        let period = Duration::from_millis(container.config.dpos.timer_interval_ms);
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut seen = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = container.dpos.sync().await {
                            error!(error = %e, "masternode sync failed");
                            continue;
                        }
                        if let Err(e) = container.dpos.on_timer().await {
                            warn!(error = %e, "masternode timer failed");
                        }
                        let events = container.event_bus.get_events();
                        for event in events.iter().skip(seen) {
                            info!(?event, "masternode event");
                        }
                        seen = events.len();
                        // No peer transport on the dev network.
                        for message in container.event_bus.drain_outbox() {
                            debug!(kind = message.kind(), "dropping gossip without peers");
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("Masternode loop shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_heartbeat(&self) {
        let dpos = Arc::clone(&self.container.dpos);
        let Some(operator) = dpos.operator_address() else {
            return;
        };
        let period = Duration::from_millis(self.container.config.dpos.heartbeat_interval_ms);
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match dpos.send_heartbeat(operator, None).await {
                            Ok(sent) => debug!(
                                timestamp = sent.timestamp,
                                hash = %hex::encode(&sent.hash[..8]),
                                "heartbeat sent"
                            ),
                            Err(e) => debug!(error = %e, "heartbeat not sent"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Signal the tasks and give them a moment to stop.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        match self.container.dpos.verify_replay().await {
            Ok(digest) => info!(digest = %hex::encode(&digest[..8]), "masternode state verified"),
            Err(e) => error!(error = %e, "masternode state verification failed"),
        }
        info!("Shutdown complete");
    }
}

/// Load configuration from environment.
fn load_config() -> Result<NodeConfig> {
    let mut config = NodeConfig::default();

    if let Ok(dir) = std::env::var("QC_DATA_DIR") {
        config.storage.data_dir = dir.into();
    }
    if let Ok(network) = std::env::var("QC_NETWORK") {
        config.dpos.network = network;
    }
    if let Ok(key) = std::env::var("QC_OPERATOR_KEY") {
        config.dpos.operator_key = Some(parse_key(&key)?);
        info!("Loaded operator key from environment");
    }
    if let Ok(flag) = std::env::var("QC_REINDEX") {
        config.dpos.reindex = matches!(flag.as_str(), "1" | "true");
    }
    if let Ok(flag) = std::env::var("QC_MINING") {
        config.mining.enabled = !matches!(flag.as_str(), "0" | "false");
    }
    if let Ok(ms) = std::env::var("QC_BLOCK_TIME_MS") {
        if let Ok(ms) = ms.parse() {
            config.mining.block_time_ms = ms;
        }
    }
    if let Ok(ms) = std::env::var("QC_TIMER_INTERVAL_MS") {
        if let Ok(ms) = ms.parse() {
            config.dpos.timer_interval_ms = ms;
        }
    }
    if let Ok(addresses) = std::env::var("QC_GENESIS_ADDRESSES") {
        for address in addresses.split(',').filter(|a| !a.trim().is_empty()) {
            match parse_address(address) {
                Some(address) => config.genesis.fund(address),
                None => warn!(address, "ignoring malformed genesis address"),
            }
        }
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config()?;
    let runtime = NodeRuntime::new(config)?;
    runtime.start().await?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
