//! # Node Configuration
//!
//! Runtime parameters for the masternode node. Defaults suit a local
//! regtest network; every field can be overridden from `QC_*` variables.
//!
//! ## Validation
//!
//! - The network name must be `regtest` or `mainnet`
//! - Loop intervals must be non-zero
//! - An operator key, when given, must be 32 bytes of hex

use std::path::PathBuf;

use qc_08_dpos::DposConfig;
use shared_types::{Address, Amount, TxOut, COIN};

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Masternode configuration.
    pub dpos: DposSection,
    /// Dev ledger block production.
    pub mining: MiningConfig,
    /// Genesis allocations of the dev ledger.
    pub genesis: GenesisConfig,
}

impl NodeConfig {
    /// Check the configuration before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dpos_config()?;
        if self.dpos.timer_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("dpos.timer_interval_ms"));
        }
        if self.dpos.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("dpos.heartbeat_interval_ms"));
        }
        if self.mining.enabled && self.mining.block_time_ms == 0 {
            return Err(ConfigError::ZeroInterval("mining.block_time_ms"));
        }
        Ok(())
    }

    /// Subsystem parameters of the selected network.
    pub fn dpos_config(&self) -> Result<DposConfig, ConfigError> {
        let config = match self.dpos.network.as_str() {
            "regtest" => DposConfig::regtest(),
            "mainnet" => DposConfig::mainnet(),
            other => return Err(ConfigError::UnknownNetwork(other.to_string())),
        };
        config
            .validate()
            .map_err(|e| ConfigError::InvalidDpos(e.to_string()))?;
        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Network name is not a known preset.
    UnknownNetwork(String),
    /// A loop interval is zero.
    ZeroInterval(&'static str),
    /// Operator key is not 32 bytes of hex.
    InvalidOperatorKey,
    /// The selected preset failed its own checks.
    InvalidDpos(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownNetwork(name) => {
                write!(f, "unknown network '{name}', expected regtest or mainnet")
            }
            ConfigError::ZeroInterval(field) => write!(f, "{field} must be greater than zero"),
            ConfigError::InvalidOperatorKey => write!(
                f,
                "operator key must be 32 bytes (64 hex chars). Check QC_OPERATOR_KEY."
            ),
            ConfigError::InvalidDpos(reason) => write!(f, "invalid masternode parameters: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory holding the lock file and the masternode snapshot.
    pub data_dir: PathBuf,
    /// Refuse to start with less free space than this.
    pub min_free_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            min_free_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Masternode configuration.
#[derive(Debug, Clone)]
pub struct DposSection {
    /// `regtest` or `mainnet`.
    pub network: String,
    /// Operator secret key; without one the node only follows the chain.
    pub operator_key: Option<[u8; 32]>,
    /// Period of sync, round and auto-dismiss work.
    pub timer_interval_ms: u64,
    /// Period of local heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Rebuild the masternode state from genesis on startup.
    pub reindex: bool,
}

impl Default for DposSection {
    fn default() -> Self {
        Self {
            network: "regtest".to_string(),
            operator_key: None,
            timer_interval_ms: 1_000,
            heartbeat_interval_ms: 30_000,
            reindex: false,
        }
    }
}

/// Dev ledger block production.
#[derive(Debug, Clone)]
pub struct MiningConfig {
    /// Mine pending transactions on a timer.
    pub enabled: bool,
    /// Target block time in milliseconds.
    pub block_time_ms: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_time_ms: 10_000,
        }
    }
}

/// Genesis allocations of the dev ledger.
#[derive(Debug, Clone, Default)]
pub struct GenesisConfig {
    pub allocations: Vec<(Address, Amount)>,
}

impl GenesisConfig {
    pub fn outputs(&self) -> Vec<TxOut> {
        self.allocations
            .iter()
            .map(|(address, value)| TxOut {
                value: *value,
                address: *address,
            })
            .collect()
    }

    /// Fund `address` with enough for a few regtest collaterals.
    pub fn fund(&mut self, address: Address) {
        self.allocations.push((address, 10_000 * COIN));
    }
}

/// Parse a 32-byte hex secret.
pub fn parse_key(hex_key: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|_| ConfigError::InvalidOperatorKey)?;
    bytes.try_into().map_err(|_| ConfigError::InvalidOperatorKey)
}

/// Parse a 20-byte hex address.
pub fn parse_address(hex_address: &str) -> Option<Address> {
    hex::decode(hex_address.trim().trim_start_matches("0x"))
        .ok()?
        .try_into()
        .ok()
}
