//! Durable ledger store
//!
//! Validation reads and writes persistent state only through [`LedgerStore`].
//! Failures are opaque `anyhow` errors and surface as
//! [`ConsensusError::Storage`](crate::error::ConsensusError::Storage).

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context};

use crate::block_index::DiskBlockIndexRecord;
use crate::serialize::{transaction_offsets, Decodable, Encodable, Reader};
use crate::types::*;

/// Changes applied by [`LedgerStore::write_batch`] all together or not at all
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// `None` erases the record
    pub tx_indexes: Vec<(Hash, Option<TxIndex>)>,
    pub block_indexes: Vec<DiskBlockIndexRecord>,
    pub best_chain: Option<Hash>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.tx_indexes.is_empty() && self.block_indexes.is_empty() && self.best_chain.is_none()
    }
}

pub trait LedgerStore: Send {
    fn get_tx_index(&self, hash: &Hash) -> anyhow::Result<Option<TxIndex>>;

    /// Appends an encoded block, returning its (file, position)
    fn append_block(&mut self, block_bytes: &[u8]) -> anyhow::Result<(u32, u32)>;

    fn read_block(&self, file: u32, block_pos: u32) -> anyhow::Result<Block>;

    fn read_transaction(&self, pos: &DiskTxPos) -> anyhow::Result<Transaction>;

    fn read_block_index(&self, hash: &Hash) -> anyhow::Result<Option<DiskBlockIndexRecord>>;

    fn best_chain(&self) -> anyhow::Result<Option<Hash>>;

    fn write_batch(&mut self, batch: WriteBatch) -> anyhow::Result<()>;

    fn put_tx_index(&mut self, hash: &Hash, index: &TxIndex) -> anyhow::Result<()> {
        self.write_batch(WriteBatch {
            tx_indexes: vec![(*hash, Some(index.clone()))],
            ..WriteBatch::default()
        })
    }

    fn erase_tx_index(&mut self, hash: &Hash) -> anyhow::Result<()> {
        self.write_batch(WriteBatch { tx_indexes: vec![(*hash, None)], ..WriteBatch::default() })
    }
}

/// In-memory store: one growing block file plus index maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Vec<Vec<u8>>,
    tx_indexes: HashMap<Hash, TxIndex>,
    block_indexes: HashMap<Hash, DiskBlockIndexRecord>,
    best_chain: Option<Hash>,
    fail_writes: bool,
}

/// Block files are numbered from 1
const FIRST_FILE: u32 = 1;

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later write fail, for exercising storage-failure paths
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn tx_index_count(&self) -> usize {
        self.tx_indexes.len()
    }

    fn file(&self, file: u32) -> anyhow::Result<&Vec<u8>> {
        file.checked_sub(FIRST_FILE)
            .and_then(|i| self.files.get(i as usize))
            .ok_or_else(|| anyhow!("block file {} does not exist", file))
    }

    /// Stores `tx` alone in a fresh block and indexes it as unspent
    pub fn insert_transaction(&mut self, tx: &Transaction) -> anyhow::Result<DiskTxPos> {
        let block = Block {
            header: BlockHeader {
                version: 0,
                prev_block_hash: NULL_HASH,
                merkle_root: tx.hash(),
                timestamp: tx.time,
                bits: 0,
                nonce: 0,
            },
            transactions: vec![tx.clone()],
            signature: Vec::new(),
        };
        let (file, block_pos) = self.append_block(&block.encode_to_vec())?;
        let pos = DiskTxPos::new(file, block_pos, block_pos + transaction_offsets(&block)[0]);
        self.put_tx_index(&tx.hash(), &TxIndex::new(pos, tx.outputs.len()))?;
        Ok(pos)
    }
}

impl LedgerStore for MemoryStore {
    fn get_tx_index(&self, hash: &Hash) -> anyhow::Result<Option<TxIndex>> {
        Ok(self.tx_indexes.get(hash).cloned())
    }

    fn append_block(&mut self, block_bytes: &[u8]) -> anyhow::Result<(u32, u32)> {
        if self.fail_writes {
            bail!("block file write refused");
        }
        if self.files.is_empty() {
            self.files.push(Vec::new());
        }
        let file_number = FIRST_FILE + self.files.len() as u32 - 1;
        let file = self.files.last_mut().ok_or_else(|| anyhow!("no block file"))?;
        let pos = u32::try_from(file.len()).context("block file full")?;
        file.extend_from_slice(block_bytes);
        Ok((file_number, pos))
    }

    fn read_block(&self, file: u32, block_pos: u32) -> anyhow::Result<Block> {
        let data = self.file(file)?;
        let bytes = data
            .get(block_pos as usize..)
            .ok_or_else(|| anyhow!("block position {} past end of file {}", block_pos, file))?;
        let block = Block::decode(&mut Reader::new(bytes))
            .with_context(|| format!("decoding block at {}:{}", file, block_pos))?;
        Ok(block)
    }

    fn read_transaction(&self, pos: &DiskTxPos) -> anyhow::Result<Transaction> {
        let data = self.file(pos.file)?;
        let bytes = data
            .get(pos.tx_pos as usize..)
            .ok_or_else(|| anyhow!("transaction position {:?} past end of file", pos))?;
        let tx = Transaction::decode(&mut Reader::new(bytes))
            .with_context(|| format!("decoding transaction at {:?}", pos))?;
        Ok(tx)
    }

    fn read_block_index(&self, hash: &Hash) -> anyhow::Result<Option<DiskBlockIndexRecord>> {
        Ok(self.block_indexes.get(hash).cloned())
    }

    fn best_chain(&self) -> anyhow::Result<Option<Hash>> {
        Ok(self.best_chain)
    }

    fn write_batch(&mut self, batch: WriteBatch) -> anyhow::Result<()> {
        if self.fail_writes {
            bail!("index write refused");
        }
        for (hash, index) in batch.tx_indexes {
            match index {
                Some(index) => {
                    self.tx_indexes.insert(hash, index);
                }
                None => {
                    self.tx_indexes.remove(&hash);
                }
            }
        }
        for record in batch.block_indexes {
            self.block_indexes.insert(record.block_hash, record);
        }
        if let Some(best) = batch.best_chain {
            self.best_chain = Some(best);
        }
        Ok(())
    }
}
