//! In-memory ledger
//!
//! A single-chain UTXO ledger with a mempool, enough to drive the
//! masternode subsystem in tests and on a local dev network:
//!
//! - admission rejects inputs already spent on chain or by a pending
//!   transaction, which is where double-spends of instant transactions die;
//! - the ledger keeps its own masternode view of the chain; the collateral
//!   output of every live masternode is counted as locked and never picked
//!   by `fund_transaction`. Dismissal or resignation releases it, and an
//!   announce the registry skipped never locks anything;
//! - `rewind` drops blocks from the tip so tests can build a competing
//!   branch.

use crate::domain::{ChainState, DposConfig};
use crate::ports::LedgerAdapter;
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{
    Address, Amount, Block, Hash, LedgerError, LedgerResult, OutPoint, Transaction, TxOut,
    ZERO_HASH,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Utxo {
    output: TxOut,
    height: u64,
}

#[derive(Debug, Default)]
struct LedgerInner {
    chain: Vec<Block>,
    utxos: BTreeMap<OutPoint, Utxo>,
    /// Pending transactions in arrival order.
    mempool: Vec<Transaction>,
    mempool_spends: BTreeMap<OutPoint, Hash>,
    /// Masternode registry as of the tip, source of collateral locks.
    masternodes: ChainState,
    config: DposConfig,
}

fn short(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}

impl LedgerInner {
    fn tip(&self) -> Option<&Block> {
        self.chain.last()
    }

    fn connect(&mut self, block: Block) {
        let height = block.height();
        for tx in &block.transactions {
            let hash = tx.hash();
            for input in &tx.inputs {
                self.utxos.remove(input);
            }
            for (vout, output) in tx.outputs.iter().enumerate() {
                self.utxos.insert(
                    OutPoint::new(hash, vout as u32),
                    Utxo {
                        output: output.clone(),
                        height,
                    },
                );
            }
        }
        if let Err(e) = self.masternodes.apply_block(&block, &self.config) {
            warn!(height, error = %e, "masternode view did not take block");
        }
        let included: BTreeSet<Hash> = block.transactions.iter().map(|tx| tx.hash()).collect();
        self.chain.push(block);
        self.mempool.retain(|tx| !included.contains(&tx.hash()));
        self.revalidate_mempool();
    }

    fn rebuild_utxos(&mut self) {
        let chain = std::mem::take(&mut self.chain);
        self.utxos.clear();
        self.masternodes = ChainState::new();
        for block in chain {
            self.connect(block);
        }
    }

    /// Drop pending transactions whose inputs vanished or clash.
    fn revalidate_mempool(&mut self) {
        let pending = std::mem::take(&mut self.mempool);
        self.mempool_spends.clear();
        for tx in pending {
            let hash = tx.hash();
            if self.check(&tx).is_ok() {
                for input in &tx.inputs {
                    self.mempool_spends.insert(*input, hash);
                }
                self.mempool.push(tx);
            } else {
                debug!(tx = %short(&hash), "evicting invalid pending transaction");
            }
        }
    }

    fn input_value(&self, input: &OutPoint) -> LedgerResult<Amount> {
        self.utxos
            .get(input)
            .map(|u| u.output.value)
            .ok_or_else(|| LedgerError::MissingInput {
                txid: hex::encode(input.txid),
                vout: input.vout,
            })
    }

    fn check(&self, tx: &Transaction) -> LedgerResult<()> {
        let mut seen = BTreeSet::new();
        let mut inputs: Amount = 0;
        for input in &tx.inputs {
            if !seen.insert(*input) {
                return Err(LedgerError::ConflictingInput {
                    conflict: hex::encode(tx.hash()),
                });
            }
            if let Some(conflict) = self.mempool_spends.get(input) {
                return Err(LedgerError::ConflictingInput {
                    conflict: hex::encode(conflict),
                });
            }
            inputs += self.input_value(input)?;
        }
        let outputs: Amount = tx.outputs.iter().map(|o| o.value).sum();
        if outputs > inputs {
            return Err(LedgerError::ValueOverflow { inputs, outputs });
        }
        Ok(())
    }

    fn spendable(&self, address: &Address) -> Vec<(OutPoint, Amount)> {
        let locked = self.masternodes.registry().live_collaterals();
        self.utxos
            .iter()
            .filter(|(outpoint, u)| {
                &u.output.address == address
                    && !locked.contains(*outpoint)
                    && !self.mempool_spends.contains_key(outpoint)
            })
            .map(|(outpoint, u)| (*outpoint, u.output.value))
            .collect()
    }

    fn find_transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.mempool
            .iter()
            .chain(self.chain.iter().flat_map(|b| b.transactions.iter()))
            .find(|tx| &tx.hash() == hash)
    }
}

/// Shared in-memory ledger.
pub struct InMemoryLedger {
    inner: RwLock<LedgerInner>,
}

impl InMemoryLedger {
    /// Start a chain whose genesis block pays `allocations`. `config`
    /// decides which announces the ledger's masternode view accepts.
    pub fn new(allocations: Vec<TxOut>, config: &DposConfig) -> Self {
        let genesis_tx = Transaction {
            inputs: vec![],
            outputs: allocations,
            signer: [0u8; 20],
            metadata: b"genesis".to_vec(),
            instantly: false,
            nonce: 0,
        };
        let genesis = Block::new(ZERO_HASH, 0, 0, vec![genesis_tx], None);
        let mut inner = LedgerInner {
            config: config.clone(),
            ..LedgerInner::default()
        };
        inner.connect(genesis);
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn height(&self) -> u64 {
        self.inner.read().chain.len().saturating_sub(1) as u64
    }

    pub fn tip_hash(&self) -> Hash {
        self.inner.read().tip().map_or(ZERO_HASH, |b| b.hash())
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner.read().mempool.clone()
    }

    /// Mine every pending transaction into a new proof-of-work block.
    pub fn mine_block(&self, timestamp: u64) -> Block {
        let pending = self.pending_transactions();
        self.mine_with(pending, timestamp)
    }

    /// Mine a block with exactly `transactions`; invalid ones are dropped.
    pub fn mine_with(&self, transactions: Vec<Transaction>, timestamp: u64) -> Block {
        let mut inner = self.inner.write();
        let (parent, height) = inner
            .tip()
            .map_or((ZERO_HASH, 0), |b| (b.hash(), b.height() + 1));

        // Each transaction is checked against the UTXOs left by the ones before it.
        let mut staged = LedgerInner {
            utxos: inner.utxos.clone(),
            ..LedgerInner::default()
        };
        let mut accepted = Vec::new();
        for tx in transactions {
            if staged.check(&tx).is_ok() {
                let hash = tx.hash();
                for input in &tx.inputs {
                    staged.utxos.remove(input);
                }
                for (vout, output) in tx.outputs.iter().enumerate() {
                    staged.utxos.insert(
                        OutPoint::new(hash, vout as u32),
                        Utxo {
                            output: output.clone(),
                            height,
                        },
                    );
                }
                accepted.push(tx);
            }
        }

        let block = Block::new(parent, height, timestamp, accepted, None);
        inner.connect(block.clone());
        block
    }

    /// Disconnect blocks above `height`. With `resurrect`, their
    /// transactions go back to the mempool.
    pub fn rewind(&self, height: u64, resurrect: bool) -> Vec<Block> {
        let mut inner = self.inner.write();
        let keep = (height as usize + 1).min(inner.chain.len());
        let removed = inner.chain.split_off(keep);
        inner.rebuild_utxos();
        if resurrect {
            let mut returned: Vec<Transaction> = removed
                .iter()
                .flat_map(|b| b.transactions.iter().cloned())
                .collect();
            returned.append(&mut inner.mempool);
            inner.mempool = returned;
            inner.revalidate_mempool();
        }
        removed
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(Vec::new(), &DposConfig::default())
    }
}

#[async_trait]
impl LedgerAdapter for InMemoryLedger {
    async fn block_height(&self) -> LedgerResult<u64> {
        Ok(self.height())
    }

    async fn block(&self, height: u64) -> LedgerResult<Block> {
        self.inner
            .read()
            .chain
            .get(height as usize)
            .cloned()
            .ok_or(LedgerError::BlockNotFound(height))
    }

    async fn raw_transaction(&self, hash: &Hash) -> LedgerResult<Vec<u8>> {
        let inner = self.inner.read();
        let tx = inner
            .find_transaction(hash)
            .ok_or_else(|| LedgerError::TransactionNotFound(hex::encode(hash)))?;
        Ok(self.encode_transaction(tx))
    }

    fn encode_transaction(&self, tx: &Transaction) -> Vec<u8> {
        bincode::serialize(tx).unwrap_or_default()
    }

    fn decode_transaction(&self, raw: &[u8]) -> LedgerResult<Transaction> {
        bincode::deserialize(raw).map_err(|e| LedgerError::DecodeFailed(e.to_string()))
    }

    async fn is_collateral_mature(
        &self,
        outpoint: &OutPoint,
        confirmations: u64,
    ) -> LedgerResult<bool> {
        let inner = self.inner.read();
        let tip = inner.chain.len().saturating_sub(1) as u64;
        Ok(inner
            .utxos
            .get(outpoint)
            .is_some_and(|u| tip + 1 - u.height >= confirmations))
    }

    async fn locked_balance(&self, address: &Address) -> LedgerResult<Amount> {
        let inner = self.inner.read();
        Ok(inner
            .masternodes
            .registry()
            .live_collaterals()
            .iter()
            .filter_map(|outpoint| inner.utxos.get(outpoint))
            .filter(|u| &u.output.address == address)
            .map(|u| u.output.value)
            .sum())
    }

    async fn balance(&self, address: &Address) -> LedgerResult<Amount> {
        Ok(self
            .inner
            .read()
            .spendable(address)
            .iter()
            .map(|(_, v)| v)
            .sum())
    }

    async fn fund_transaction(
        &self,
        mut tx: Transaction,
        payer: &Address,
    ) -> LedgerResult<Transaction> {
        let needed: Amount = tx.outputs.iter().map(|o| o.value).sum();
        let already: Amount = {
            let inner = self.inner.read();
            tx.inputs
                .iter()
                .map(|i| inner.input_value(i))
                .sum::<LedgerResult<Amount>>()?
        };
        if already >= needed {
            return Ok(tx);
        }

        let candidates = self.inner.read().spendable(payer);
        let mut gathered = already;
        for (outpoint, value) in candidates {
            if gathered >= needed {
                break;
            }
            if tx.inputs.contains(&outpoint) {
                continue;
            }
            tx.inputs.push(outpoint);
            gathered += value;
        }
        if gathered < needed {
            return Err(LedgerError::InsufficientFunds {
                needed,
                available: gathered,
            });
        }
        if gathered > needed {
            tx.outputs.push(TxOut {
                value: gathered - needed,
                address: *payer,
            });
        }
        Ok(tx)
    }

    async fn submit_transaction(&self, raw: Vec<u8>) -> LedgerResult<Hash> {
        let tx = self.decode_transaction(&raw)?;
        let hash = tx.hash();
        let mut inner = self.inner.write();
        if inner.mempool.iter().any(|p| p.hash() == hash) {
            return Ok(hash);
        }
        inner.check(&tx)?;
        for input in &tx.inputs {
            inner.mempool_spends.insert(*input, hash);
        }
        inner.mempool.push(tx);
        debug!(tx = %short(&hash), "transaction admitted");
        Ok(hash)
    }

    async fn submit_block(&self, block: Block) -> LedgerResult<Hash> {
        let hash = block.hash();
        let mut inner = self.inner.write();
        let (parent, height) = inner
            .tip()
            .map_or((ZERO_HASH, 0), |b| (b.hash(), b.height() + 1));
        if block.header.parent_hash != parent || block.height() != height {
            return Err(LedgerError::BlockRejected(format!(
                "block {} does not extend tip at height {}",
                short(&hash),
                height.saturating_sub(1)
            )));
        }
        // Block transactions may spend outputs the mempool already pledged.
        let saved = std::mem::take(&mut inner.mempool_spends);
        let checked = block.transactions.iter().try_for_each(|tx| inner.check(tx));
        inner.mempool_spends = saved;
        checked.map_err(|e| LedgerError::BlockRejected(e.to_string()))?;

        inner.connect(block);
        Ok(hash)
    }
}
