//! UTXO ledger: input resolution, spend marking and its inverse
//!
//! Spends are staged in a [`TestPool`] overlay keyed by transaction hash. The
//! overlay is consulted before the committed index and is only written to the
//! store once a whole block (or reorganization) has succeeded.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConsensusError, Result};
use crate::params::ChainParams;
use crate::script::ScriptVerifier;
use crate::storage::{LedgerStore, WriteBatch};
use crate::transaction::{is_coinbase, is_coinstake};
use crate::types::*;

/// Resolved inputs: producing transaction and its index, by hash
pub type MapPrevTx = HashMap<Hash, (TxIndex, Transaction)>;

/// Uncommitted index changes. A null index marks an erased record.
pub type TestPool = HashMap<Hash, TxIndex>;

/// Position recorded for outputs that only exist in the mempool
pub const MEMPOOL_TX_POS: DiskTxPos = DiskTxPos { file: 1, block_pos: 1, tx_pos: 1 };

/// Where a transaction is being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationContext {
    /// Admission to the memory pool
    Mempool,
    /// Connecting a block to the chain
    Block,
    /// Speculative check of a candidate block, nothing is committed
    Miner,
}

impl ValidationContext {
    /// Spends are staged in the test pool
    pub fn stages_spends(&self) -> bool {
        matches!(self, ValidationContext::Block | ValidationContext::Miner)
    }
}

/// Unconfirmed transactions an input may resolve to
pub trait PendingTransactions {
    fn pending_transaction(&self, hash: &Hash) -> Option<Transaction>;
}

impl PendingTransactions for HashMap<Hash, Transaction> {
    fn pending_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.get(hash).cloned()
    }
}

/// Height of the block stored at a transaction position
pub trait ConfirmationHeights {
    fn confirmation_height(&self, pos: &DiskTxPos) -> Option<u32>;
}

/// Everything input resolution reads from
pub struct UtxoView<'a> {
    pub store: &'a dyn LedgerStore,
    pub test_pool: &'a TestPool,
    pub pending: &'a dyn PendingTransactions,
    pub context: ValidationContext,
}

impl<'a> UtxoView<'a> {
    /// Overlay first, then the committed index
    pub fn tx_index(&self, hash: &Hash) -> Result<Option<TxIndex>> {
        if let Some(index) = self.test_pool.get(hash) {
            return Ok(if index.is_null() { None } else { Some(index.clone()) });
        }
        self.store.get_tx_index(hash).map_err(ConsensusError::Storage)
    }

    fn transaction(&self, hash: &Hash, index: &TxIndex) -> Result<Transaction> {
        if let Some(tx) = self.pending.pending_transaction(hash) {
            return Ok(tx);
        }
        if index.pos == MEMPOOL_TX_POS {
            return Err(ConsensusError::MissingInputs(format!(
                "{} left the mempool",
                hex::encode(hash)
            )));
        }
        self.store.read_transaction(&index.pos).map_err(ConsensusError::Storage)
    }
}

/// Result of [`fetch_inputs`]
#[derive(Debug, Clone, Default)]
pub struct FetchedInputs {
    pub inputs: MapPrevTx,
    /// An input names an output its transaction does not have
    pub invalid: bool,
}

/// FetchInputs: resolve every prevout to its producing transaction and index.
///
/// Fails with `MissingInputs` when a producing transaction is unknown. In the
/// mempool context, outputs of pooled transactions resolve with the
/// [`MEMPOOL_TX_POS`] sentinel.
pub fn fetch_inputs(tx: &Transaction, view: &UtxoView<'_>) -> Result<FetchedInputs> {
    let mut fetched = FetchedInputs::default();
    if is_coinbase(tx) {
        return Ok(fetched);
    }

    for input in &tx.inputs {
        let hash = input.prevout.hash;
        if fetched.inputs.contains_key(&hash) {
            continue;
        }

        let resolved = match view.tx_index(&hash)? {
            Some(index) => Some((view.transaction(&hash, &index)?, index)),
            None if view.context == ValidationContext::Mempool => view
                .pending
                .pending_transaction(&hash)
                .map(|prev| {
                    let index = TxIndex::new(MEMPOOL_TX_POS, prev.outputs.len());
                    (prev, index)
                }),
            None => None,
        };

        let (prev, index) = resolved.ok_or_else(|| {
            ConsensusError::MissingInputs(format!(
                "{} input {} not found",
                hex::encode(tx.hash()),
                hex::encode(hash)
            ))
        })?;
        fetched.inputs.insert(hash, (index, prev));
    }

    for input in &tx.inputs {
        let n = input.prevout.index as usize;
        let (index, prev) = &fetched.inputs[&input.prevout.hash];
        if n >= prev.outputs.len() || n >= index.spent.len() {
            debug!(
                "prevout {}:{} out of range ({} outputs)",
                hex::encode(input.prevout.hash),
                n,
                prev.outputs.len()
            );
            fetched.invalid = true;
        }
    }

    Ok(fetched)
}

/// Output referenced by `prevout` among resolved inputs
pub fn prev_output<'a>(inputs: &'a MapPrevTx, prevout: &OutPoint) -> Result<&'a TxOutput> {
    let (_, prev) = inputs.get(&prevout.hash).ok_or_else(|| {
        ConsensusError::MissingInputs(format!("{} not resolved", hex::encode(prevout.hash)))
    })?;
    prev.outputs.get(prevout.index as usize).ok_or_else(|| {
        ConsensusError::Malformed(format!(
            "prevout {}:{} out of range",
            hex::encode(prevout.hash),
            prevout.index
        ))
    })
}

/// Collaborators of [`connect_inputs`]
pub struct SpendContext<'a> {
    pub verifier: &'a dyn ScriptVerifier,
    pub params: &'a ChainParams,
    pub heights: &'a dyn ConfirmationHeights,
    /// Height the spending transaction confirms at
    pub spend_height: u32,
    pub context: ValidationContext,
}

/// ConnectInputs: authorize and mark every input spent by `pos_this_tx`.
///
/// For each input:
/// 1. coinbase/coinstake outputs must have `coinbase_maturity` confirmations
/// 2. the input transaction may not be timestamped after `tx`
/// 3. the output must be spendable and unspent (overlay included)
/// 4. the unlock script must satisfy the lock script
///
/// Spent markers land in `inputs`; in block and miner context the updated
/// indexes are staged in `test_pool`. Nothing is written to the store.
pub fn connect_inputs(
    tx: &Transaction,
    inputs: &mut MapPrevTx,
    test_pool: &mut TestPool,
    pos_this_tx: DiskTxPos,
    spend: &SpendContext<'_>,
) -> Result<()> {
    if is_coinbase(tx) {
        return Ok(());
    }

    for (i, input) in tx.inputs.iter().enumerate() {
        let prevout = input.prevout;
        let n = prevout.index as usize;
        let (index, prev) = inputs.get_mut(&prevout.hash).ok_or_else(|| {
            ConsensusError::MissingInputs(format!("{} not resolved", hex::encode(prevout.hash)))
        })?;

        let output = match prev.outputs.get(n) {
            Some(output) if n < index.spent.len() => output,
            _ => {
                return Err(ConsensusError::Malformed(format!(
                    "prevout {}:{} out of range",
                    hex::encode(prevout.hash),
                    n
                )))
            }
        };

        if is_coinbase(prev) || is_coinstake(prev) {
            let mature = spend
                .heights
                .confirmation_height(&index.pos)
                .map_or(false, |height| {
                    spend.spend_height.saturating_sub(height) >= spend.params.coinbase_maturity
                });
            if !mature {
                return Err(ConsensusError::Malformed(format!(
                    "spend of immature {} {}",
                    prev.tx_type.as_str(),
                    hex::encode(prevout.hash)
                )));
            }
        }

        if prev.time > tx.time {
            return Err(ConsensusError::Malformed(format!(
                "timestamp {} earlier than input transaction {}",
                tx.time, prev.time
            )));
        }

        if output.is_unspendable() {
            return Err(ConsensusError::Malformed(format!(
                "prevout {}:{} is unspendable",
                hex::encode(prevout.hash),
                n
            )));
        }

        if let Some(spender) = index.spent_by(n) {
            return Err(ConsensusError::DoubleSpend(format!(
                "{}:{} already spent at {:?}",
                hex::encode(prevout.hash),
                n,
                spender
            )));
        }

        if !spend.verifier.verify(
            &input.unlock_script,
            &output.lock_script,
            tx,
            i,
            spend.params.script_flags,
        ) {
            return Err(ConsensusError::Malformed(format!(
                "script verification failed for input {} of {}",
                i,
                hex::encode(tx.hash())
            )));
        }

        index.spent[n] = pos_this_tx;
        if spend.context.stages_spends() {
            test_pool.insert(prevout.hash, index.clone());
        }
    }

    Ok(())
}

/// DisconnectInputs: clear the spent marker of every input and erase the
/// transaction's own index, all staged in `test_pool`.
pub fn disconnect_inputs(
    tx: &Transaction,
    store: &dyn LedgerStore,
    test_pool: &mut TestPool,
) -> Result<()> {
    if !is_coinbase(tx) {
        for input in &tx.inputs {
            let prevout = input.prevout;
            let mut index = match test_pool.get(&prevout.hash) {
                Some(index) if !index.is_null() => index.clone(),
                Some(_) => {
                    return Err(ConsensusError::BlockValidation(format!(
                        "input {} erased before its spender",
                        hex::encode(prevout.hash)
                    )))
                }
                None => store
                    .get_tx_index(&prevout.hash)
                    .map_err(ConsensusError::Storage)?
                    .ok_or_else(|| {
                        ConsensusError::BlockValidation(format!(
                            "no index for input {}",
                            hex::encode(prevout.hash)
                        ))
                    })?,
            };

            let n = prevout.index as usize;
            if n >= index.spent.len() {
                return Err(ConsensusError::Malformed(format!(
                    "prevout {}:{} out of range",
                    hex::encode(prevout.hash),
                    n
                )));
            }
            index.spent[n] = DiskTxPos::null();
            test_pool.insert(prevout.hash, index);
        }
    }

    test_pool.insert(tx.hash(), TxIndex::null());
    Ok(())
}

/// Turns the overlay into store writes; null indexes become erasures
pub fn stage_test_pool(test_pool: &TestPool, batch: &mut WriteBatch) {
    for (hash, index) in test_pool {
        let value = if index.is_null() { None } else { Some(index.clone()) };
        batch.tx_indexes.push((*hash, value));
    }
}
