//! Block validation: context-free checks, connect and disconnect
//!
//! Connecting a block only stages effects: spends go into a [`TestPool`],
//! registrations into the journaled [`Registries`], and the new chain
//! aggregates are returned as a [`BlockConnection`]. Committing or rolling
//! back is the caller's job.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::block_index::BlockIndex;
use crate::constants::*;
use crate::economic::{
    add_amounts, block_reward, check_io_value, value_in_by_asset, BlockReward, SupplyState,
};
use crate::error::{ConsensusError, Result};
use crate::merkle::merkle_root;
use crate::params::ChainParams;
use crate::registry::Registries;
use crate::script::ScriptVerifier;
use crate::serialize::{transaction_offsets, Encodable};
use crate::storage::LedgerStore;
use crate::transaction::{
    check_transaction, is_coinbase, is_coinstake, pos_donation, pow_donation, value_out,
};
use crate::types::*;
use crate::utxo::{
    connect_inputs, disconnect_inputs, fetch_inputs, ConfirmationHeights, SpendContext, TestPool,
    UtxoView, ValidationContext,
};

/// Chain aggregates after a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainState {
    pub height: u32,
    pub pow_height: u32,
    pub supply: SupplyState,
    pub asset_type_count: i64,
}

impl ChainState {
    pub fn from_index(index: &BlockIndex) -> Self {
        Self {
            height: index.height,
            pow_height: index.pow_height,
            supply: SupplyState {
                money_supply: index.money_supply,
                pow_pool: index.pow_pool,
                pos_pool: index.pos_pool,
            },
            asset_type_count: index.asset_type_count,
        }
    }

    /// Writes the aggregates back into an index node
    pub fn apply_to(&self, index: &mut BlockIndex) {
        index.height = self.height;
        index.pow_height = self.pow_height;
        index.money_supply = self.supply.money_supply;
        index.pow_pool = self.supply.pow_pool;
        index.pos_pool = self.supply.pos_pool;
        index.asset_type_count = self.asset_type_count;
    }
}

/// Outcome of a successful [`connect_block`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockConnection {
    pub state: ChainState,
    /// Relay fees collected from the block's transactions
    pub fees: Amount,
    pub reward: BlockReward,
    /// Base currency paid out of nothing or the pool by this block
    pub mint: Amount,
}

/// Read-only collaborators of [`connect_block`]
pub struct BlockContext<'a> {
    pub store: &'a dyn LedgerStore,
    pub heights: &'a dyn ConfirmationHeights,
    pub verifier: &'a dyn ScriptVerifier,
    pub params: &'a ChainParams,
    /// `Block`, or `Miner` for candidates that are never committed
    pub context: ValidationContext,
}

/// Where the block's bytes live, or would live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPosition {
    pub file: u32,
    pub block_pos: u32,
}

/// CheckBlock: context-free block validity
///
/// 1. non-empty, encoded size ≤ MAX_BLOCK_SIZE
/// 2. txs[0] is the only coinbase; a coinstake may only be txs[1]
/// 3. PoS: the coinbase has exactly one output and it is empty
/// 4. every transaction passes CheckTransaction; hashes are unique
/// 5. tx.time ≤ block time + drift; coinstake time = block time
/// 6. block time ≤ adjusted time + drift
/// 7. merkle root commits to the transactions
pub fn check_block(block: &Block, params: &ChainParams, adjusted_time: u32) -> Result<()> {
    if block.transactions.is_empty() {
        return Err(ConsensusError::BlockValidation("Block has no transactions".to_string()));
    }
    let size = block.encode_to_vec().len();
    if size > MAX_BLOCK_SIZE {
        return Err(ConsensusError::BlockValidation(format!("Block too large: {} bytes", size)));
    }

    let block_time = block.header.timestamp;
    if block_time > adjusted_time.saturating_add(params.max_future_drift) {
        return Err(ConsensusError::BlockValidation(format!(
            "Block timestamp {} too far in the future",
            block_time
        )));
    }

    if !is_coinbase(&block.transactions[0]) {
        return Err(ConsensusError::BlockValidation("First transaction is not coinbase".to_string()));
    }
    for (i, tx) in block.transactions.iter().enumerate() {
        if i > 0 && tx.tx_type == TxType::Coinbase {
            return Err(ConsensusError::BlockValidation(format!("Extra coinbase at {}", i)));
        }
        if i != 1 && tx.tx_type == TxType::Coinstake {
            return Err(ConsensusError::BlockValidation(format!("Coinstake at position {}", i)));
        }
    }

    if block.is_proof_of_stake() {
        let coinbase = &block.transactions[0];
        if coinbase.outputs.len() != 1 || !coinbase.outputs[0].is_empty() {
            return Err(ConsensusError::BlockValidation(
                "Coinbase output not empty in proof-of-stake block".to_string(),
            ));
        }
        if block.transactions[1].time != block_time {
            return Err(ConsensusError::BlockValidation(format!(
                "Coinstake time {} differs from block time {}",
                block.transactions[1].time, block_time
            )));
        }
    }

    let mut hashes = HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        check_transaction(tx)?;
        if tx.time > block_time.saturating_add(params.max_future_drift) {
            return Err(ConsensusError::BlockValidation(format!(
                "Transaction time {} after block time {}",
                tx.time, block_time
            )));
        }
        if !hashes.insert(tx.hash()) {
            return Err(ConsensusError::BlockValidation("Duplicate transaction".to_string()));
        }
    }

    if merkle_root(&block.transactions) != block.header.merkle_root {
        return Err(ConsensusError::BlockValidation("Merkle root mismatch".to_string()));
    }

    Ok(())
}

/// ConnectBlock: ℬ × S_prev → S_next, effects staged in the test pool
///
/// For each transaction in order: CheckTransaction, FetchInputs, CheckIoValue,
/// registration uniqueness (ledger and earlier in this block), ConnectInputs,
/// then its own index is staged. Afterwards, unless `block` is genesis:
/// - PoW: Σ coinbase out = reward + fees
/// - PoS: Σ coinbase out = 0 ∧ coinstake out − in = reward + fees
///
/// money_supply' = money_supply + Σ base out − Σ base in; the pool of the
/// block's kind loses the reward draw and each pool gains its donations.
///
/// On error `test_pool` and `registries` may hold partial effects; callers
/// discard the pool and roll the registries back to their checkpoint.
pub fn connect_block(
    block: &Block,
    position: BlockPosition,
    parent: Option<&ChainState>,
    test_pool: &mut TestPool,
    registries: &mut Registries,
    ctx: &BlockContext<'_>,
) -> Result<BlockConnection> {
    let proof_of_stake = block.is_proof_of_stake();
    let height = parent.map_or(0, |p| p.height + 1);
    let pow_height = match parent {
        Some(p) if proof_of_stake => p.pow_height,
        Some(p) => p.pow_height + 1,
        None => 0,
    };
    let prev_supply = parent.map(|p| p.supply).unwrap_or_default();

    let offsets = transaction_offsets(block);
    let mut connected: HashMap<Hash, Transaction> = HashMap::new();
    let spend = SpendContext {
        verifier: ctx.verifier,
        params: ctx.params,
        heights: ctx.heights,
        spend_height: height,
        context: ctx.context,
    };

    let mut fees: Amount = 0;
    let mut base_in: Amount = 0;
    let mut base_out: Amount = 0;
    let mut pow_donations: Amount = 0;
    let mut pos_donations: Amount = 0;
    let mut stake_gain: Amount = 0;

    for (i, tx) in block.transactions.iter().enumerate() {
        check_transaction(tx)?;
        let hash = tx.hash();
        let pos = DiskTxPos::new(position.file, position.block_pos, position.block_pos + offsets[i]);

        let mut fetched = {
            let view = UtxoView {
                store: ctx.store,
                test_pool: &*test_pool,
                pending: &connected,
                context: ctx.context,
            };
            if view.tx_index(&hash)?.is_some() {
                return Err(ConsensusError::BlockValidation(format!(
                    "Transaction {} already confirmed",
                    hex::encode(hash)
                )));
            }
            fetch_inputs(tx, &view)?
        };
        if fetched.invalid {
            return Err(ConsensusError::Malformed(format!(
                "Transaction {} spends a nonexistent output",
                hex::encode(hash)
            )));
        }

        let fee = check_io_value(tx, &fetched.inputs, ctx.params.min_relay_fee_per_kb)?;
        registries.apply(tx, &fetched.inputs)?;
        connect_inputs(tx, &mut fetched.inputs, test_pool, pos, &spend)?;

        let tx_in = if is_coinbase(tx) {
            0
        } else {
            value_in_by_asset(tx, &fetched.inputs)?
                .get(&BASE_ASSET_ID)
                .copied()
                .unwrap_or(0)
        };
        let tx_out = value_out(tx, BASE_ASSET_ID)?;
        if is_coinstake(tx) {
            stake_gain = tx_out - tx_in;
        }

        base_in = add_amounts(base_in, tx_in)?;
        base_out = add_amounts(base_out, tx_out)?;
        fees = add_amounts(fees, fee)?;
        pow_donations = add_amounts(pow_donations, pow_donation(tx))?;
        pos_donations = add_amounts(pos_donations, pos_donation(tx))?;

        test_pool.insert(hash, TxIndex::new(pos, tx.outputs.len()));
        connected.insert(hash, tx.clone());
    }

    let kind_height = if proof_of_stake { height - pow_height } else { pow_height };
    let reward = block_reward(proof_of_stake, kind_height, &prev_supply);
    let expected = add_amounts(reward.total(), fees)?;
    let coinbase_out = value_out(&block.transactions[0], BASE_ASSET_ID)?;

    if parent.is_some() {
        if proof_of_stake {
            if coinbase_out != 0 {
                return Err(ConsensusError::BlockValidation(format!(
                    "Coinbase pays {} in proof-of-stake block",
                    coinbase_out
                )));
            }
            if stake_gain != expected {
                return Err(ConsensusError::BlockValidation(format!(
                    "Coinstake gains {}, expected reward {} + fees {}",
                    stake_gain,
                    reward.total(),
                    fees
                )));
            }
        } else if coinbase_out != expected {
            return Err(ConsensusError::BlockValidation(format!(
                "Coinbase pays {}, expected reward {} + fees {}",
                coinbase_out,
                reward.total(),
                fees
            )));
        }
    }

    let money_supply = prev_supply
        .money_supply
        .checked_add(base_out - base_in)
        .filter(|s| *s >= 0)
        .ok_or_else(|| ConsensusError::BlockValidation("Money supply out of range".to_string()))?;
    let (pow_draw, pos_draw) = match (parent.is_some(), proof_of_stake) {
        (false, _) => (0, 0),
        (true, false) => (reward.pool_draw, 0),
        (true, true) => (0, reward.pool_draw),
    };
    let pow_pool = add_amounts(prev_supply.pow_pool - pow_draw, pow_donations)?;
    let pos_pool = add_amounts(prev_supply.pos_pool - pos_draw, pos_donations)?;

    let state = ChainState {
        height,
        pow_height,
        supply: SupplyState { money_supply, pow_pool, pos_pool },
        asset_type_count: registries.asset_type_count(),
    };
    debug!(
        "connected block {} at height {}: fees {} reward {} supply {}",
        hex::encode(block.hash()),
        height,
        fees,
        reward.total(),
        money_supply
    );

    Ok(BlockConnection {
        state,
        fees,
        reward,
        mint: if parent.is_some() { reward.total() } else { base_out },
    })
}

/// DisconnectBlock: undo every transaction in reverse order.
///
/// Spend markers and erasures are staged in `test_pool`; registrations are
/// reverted in `registries`. Chain aggregates need no undo since the parent
/// node still holds them.
pub fn disconnect_block(
    block: &Block,
    store: &dyn LedgerStore,
    test_pool: &mut TestPool,
    registries: &mut Registries,
) -> Result<()> {
    for tx in block.transactions.iter().rev() {
        disconnect_inputs(tx, store, test_pool)?;
        registries.undo(tx)?;
    }
    debug!("disconnected block {}", hex::encode(block.hash()));
    Ok(())
}
