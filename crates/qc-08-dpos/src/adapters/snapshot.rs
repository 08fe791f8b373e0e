//! Snapshot stores
//!
//! A chain snapshot only shortens startup. It is trusted only while its tip
//! is still on the ledger's active chain; otherwise the node reindexes.
//! The gossip snapshot (vice-blocks, round votes, instant transactions) is
//! restored together with a trusted chain snapshot.

use crate::domain::{ChainState, DposError, DposResult};
use crate::ports::{GossipSnapshot, SnapshotStore};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Keeps the latest snapshots in memory.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    state: RwLock<Option<ChainState>>,
    gossip: RwLock<Option<GossipSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self) -> DposResult<Option<ChainState>> {
        Ok(self.state.read().clone())
    }

    fn save(&self, state: &ChainState) -> DposResult<()> {
        *self.state.write() = Some(state.clone());
        Ok(())
    }

    fn load_gossip(&self) -> DposResult<Option<GossipSnapshot>> {
        Ok(self.gossip.read().clone())
    }

    fn save_gossip(&self, gossip: &GossipSnapshot) -> DposResult<()> {
        *self.gossip.write() = Some(gossip.clone());
        Ok(())
    }
}

/// Bincode snapshot files, replaced atomically on save.
pub struct FileSnapshotStore {
    path: PathBuf,
    gossip_path: PathBuf,
}

impl FileSnapshotStore {
    /// Chain snapshot at `path`, gossip snapshot next to it with the
    /// `gossip` extension.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let gossip_path = path.with_extension("gossip");
        Self { path, gossip_path }
    }

    /// Store `masternodes.snapshot` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("masternodes.snapshot"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn gossip_path(&self) -> &Path {
        &self.gossip_path
    }
}

fn read_file<T: DeserializeOwned>(path: &Path) -> DposResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DposError::Snapshot(e.to_string())),
    };
    bincode::deserialize(&bytes)
        .map(Some)
        .map_err(|e| DposError::Snapshot(format!("corrupt snapshot {}: {e}", path.display())))
}

fn write_file<T: Serialize>(path: &Path, value: &T) -> DposResult<()> {
    let bytes = bincode::serialize(value)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| DposError::Snapshot(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| DposError::Snapshot(e.to_string()))
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> DposResult<Option<ChainState>> {
        read_file(&self.path)
    }

    fn save(&self, state: &ChainState) -> DposResult<()> {
        write_file(&self.path, state)
    }

    fn load_gossip(&self) -> DposResult<Option<GossipSnapshot>> {
        read_file(&self.gossip_path)
    }

    fn save_gossip(&self, gossip: &GossipSnapshot) -> DposResult<()> {
        write_file(&self.gossip_path, gossip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DposConfig, InstantPool, RoundVoting};
    use shared_types::{Block, ZERO_HASH};

    fn state_at(height: u64) -> ChainState {
        let config = DposConfig::regtest();
        let mut state = ChainState::new();
        let mut parent = ZERO_HASH;
        for h in 0..=height {
            let block = Block::new(parent, h, h, vec![], None);
            parent = block.hash();
            state.apply_block(&block, &config).unwrap();
        }
        state
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::in_dir(dir.path());
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(store.load_gossip().unwrap(), None);

        let state = state_at(3);
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
        assert!(!store.path().with_extension("tmp").exists());

        let gossip = GossipSnapshot {
            rounds: RoundVoting::new(),
            instant: InstantPool::new(),
        };
        store.save_gossip(&gossip).unwrap();
        assert!(store.gossip_path().exists());
        assert_eq!(store.load_gossip().unwrap(), Some(gossip));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::in_dir(dir.path());
        fs::write(store.path(), b"garbage").unwrap();
        assert!(matches!(store.load(), Err(DposError::Snapshot(_))));
    }

    #[test]
    fn test_memory_store_keeps_latest() {
        let store = InMemorySnapshotStore::new();
        store.save(&state_at(1)).unwrap();
        store.save(&state_at(2)).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.tip().map(|t| t.height), Some(2));
    }
}
