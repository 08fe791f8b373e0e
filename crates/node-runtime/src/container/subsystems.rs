//! # Subsystem Container
//!
//! Holds the dev ledger and the masternode service and wires the service
//! to its adapters.
//!
//! ```text
//! InMemoryLedger ──blocks──→ DposService ──events──→ InMemoryEventBus
//!                                  │
//!                          FileSnapshotStore (data_dir)
//! ```

use std::sync::Arc;

use tracing::info;

use qc_08_dpos::adapters::{FileSnapshotStore, InMemoryEventBus, InMemoryLedger, K256Signer, K256Verifier};
use qc_08_dpos::ports::MasternodeSigner;
use qc_08_dpos::{DposDependencies, DposResult, DposService};

use crate::container::config::NodeConfig;

/// Concrete masternode service of the node.
pub type NodeDposService =
    DposService<InMemoryLedger, InMemoryEventBus, K256Verifier, FileSnapshotStore>;

/// Central container holding the subsystem instances.
pub struct SubsystemContainer {
    /// Node configuration.
    pub config: NodeConfig,
    /// Dev ledger shared by the miner and the masternode service.
    pub ledger: Arc<InMemoryLedger>,
    /// Published events and outgoing gossip.
    pub event_bus: Arc<InMemoryEventBus>,
    /// Masternode subsystem.
    pub dpos: Arc<NodeDposService>,
}

impl SubsystemContainer {
    /// Build the container. Fails if the configuration was not validated
    /// or the operator key is unusable.
    pub fn new(config: NodeConfig) -> DposResult<Self> {
        let dpos_config = config
            .dpos_config()
            .map_err(|e| qc_08_dpos::DposError::InvalidConfig(e.to_string()))?;

        let signer = match config.dpos.operator_key {
            Some(secret) => {
                let signer = K256Signer::from_secret(&secret)?;
                info!(operator = %hex::encode(signer.operator_address()), "running as masternode operator");
                Some(Arc::new(signer) as Arc<dyn MasternodeSigner>)
            }
            None => None,
        };

        let ledger = Arc::new(InMemoryLedger::new(config.genesis.outputs(), &dpos_config));
        let event_bus = Arc::new(InMemoryEventBus::new());
        let snapshots = Arc::new(FileSnapshotStore::in_dir(&config.storage.data_dir));

        let dpos = Arc::new(DposService::new(DposDependencies {
            ledger: Arc::clone(&ledger),
            event_bus: Arc::clone(&event_bus),
            sig_verifier: Arc::new(K256Verifier),
            snapshots,
            signer,
            config: dpos_config,
        }));

        Ok(Self {
            config,
            ledger,
            event_bus,
            dpos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_with_operator() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.dpos.operator_key = Some([7u8; 32]);

        let container = SubsystemContainer::new(config).unwrap();
        assert!(container.dpos.operator_address().is_some());
        assert_eq!(container.ledger.height(), 0);
    }

    #[test]
    fn test_container_rejects_zero_key() {
        let mut config = NodeConfig::default();
        config.dpos.operator_key = Some([0u8; 32]);
        assert!(SubsystemContainer::new(config).is_err());
    }
}
