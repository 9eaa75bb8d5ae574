//! Fee/value engine and reward schedule

use std::collections::BTreeMap;

use crate::constants::*;
use crate::error::{ConsensusError, RangeError, Result};
use crate::transaction::{asset_id, not_size_fee_change};
use crate::types::*;
use crate::utxo::{prev_output, MapPrevTx};

/// MoneyRange: 0 ≤ v ≤ M_max
pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// a + b with both terms and the sum in [0, M_max]
pub fn add_amounts(a: Amount, b: Amount) -> std::result::Result<Amount, RangeError> {
    for v in [a, b] {
        if v < 0 {
            return Err(RangeError::Negative(v));
        }
    }
    let sum = a.checked_add(b).ok_or(RangeError::Overflow)?;
    if !money_range(sum) {
        return Err(RangeError::AboveMax(sum));
    }
    Ok(sum)
}

/// a - b, failing when the result would be negative
pub fn sub_amounts(a: Amount, b: Amount) -> std::result::Result<Amount, RangeError> {
    let diff = a.checked_sub(b).ok_or(RangeError::Overflow)?;
    if diff < 0 {
        return Err(RangeError::Negative(diff));
    }
    Ok(diff)
}

/// GetMinFee: f_min = r × (1 + ⌊size / 1000⌋)
///
/// Every transaction pays at least one kilobyte's worth.
pub fn min_tx_fee(tx_size: usize, fee_per_kb: Amount) -> Amount {
    let kilobytes = 1 + (tx_size / 1000) as i64;
    fee_per_kb.saturating_mul(kilobytes)
}

/// Σ prevout.amount per asset over every input of `tx`
pub fn value_in_by_asset(tx: &Transaction, inputs: &MapPrevTx) -> Result<BTreeMap<AssetId, Amount>> {
    let mut totals = BTreeMap::new();
    for input in &tx.inputs {
        let output = prev_output(inputs, &input.prevout)?;
        let total = totals.entry(output.asset_id).or_insert(0);
        *total = add_amounts(*total, output.amount)?;
    }
    Ok(totals)
}

fn value_out_by_asset(tx: &Transaction) -> Result<BTreeMap<AssetId, Amount>> {
    let mut totals = BTreeMap::new();
    for output in &tx.outputs {
        let total = totals.entry(output.asset_id).or_insert(0);
        *total = add_amounts(*total, output.amount)?;
    }
    Ok(totals)
}

/// CheckIoValue: 𝒯𝒳 × 𝒫 × ℤ → ℤ (relay fee)
///
/// Groups inputs and outputs by asset id:
/// 1. base: Σin ≥ Σout ∧ Σin − Σout − NotSizeFeeChange ≥ f_min(|tx|)
/// 2. one secondary asset k, TransferAsset only: Σin(k) = Σout(k)
/// 3. RegisterAsset/ReissueAsset mint k from nothing: no secondary inputs
///
/// Coinbase and coinstake value is checked against the block reward instead.
/// Their outputs are base only, so every input they spend must be base too.
pub fn check_io_value(tx: &Transaction, inputs: &MapPrevTx, fee_per_kb: Amount) -> Result<Amount> {
    if matches!(tx.tx_type, TxType::Coinbase | TxType::Coinstake) {
        for input in tx.inputs.iter().filter(|input| !input.prevout.is_null()) {
            let output = prev_output(inputs, &input.prevout)?;
            if output.asset_id != BASE_ASSET_ID {
                return Err(ConsensusError::ValueImbalance(format!(
                    "{} spends asset {} at {}:{}",
                    tx.tx_type.as_str(),
                    output.asset_id,
                    hex::encode(input.prevout.hash),
                    input.prevout.index
                )));
            }
        }
        return Ok(0);
    }

    let value_in = value_in_by_asset(tx, inputs)?;
    let value_out = value_out_by_asset(tx)?;
    let tx_asset = asset_id(tx);

    for (&id, &amount) in &value_in {
        if id == BASE_ASSET_ID {
            continue;
        }
        if tx.tx_type != TxType::TransferAsset || id != tx_asset {
            return Err(ConsensusError::ValueImbalance(format!(
                "unexpected input asset {} in {} transaction",
                id,
                tx.tx_type.as_str()
            )));
        }
        let out = value_out.get(&id).copied().unwrap_or(0);
        if amount != out {
            return Err(ConsensusError::ValueImbalance(format!(
                "asset {} not conserved: in {} out {}",
                id, amount, out
            )));
        }
    }

    if tx.tx_type == TxType::TransferAsset && !value_in.contains_key(&tx_asset) {
        return Err(ConsensusError::ValueImbalance(format!(
            "asset {} transferred without inputs",
            tx_asset
        )));
    }

    let base_in = value_in.get(&BASE_ASSET_ID).copied().unwrap_or(0);
    let base_out = value_out.get(&BASE_ASSET_ID).copied().unwrap_or(0);
    if base_in < base_out {
        return Err(ConsensusError::ValueImbalance(format!(
            "value in {} below value out {}",
            base_in, base_out
        )));
    }

    let gap = base_in - base_out;
    let required = not_size_fee_change(tx)?;
    let relay_fee = gap - required;
    let min_fee = min_tx_fee(tx.serialized_size(), fee_per_kb);
    if relay_fee < min_fee {
        return Err(ConsensusError::ValueImbalance(format!(
            "fee {} below minimum {} (gap {}, registration/payload/donation {})",
            relay_fee, min_fee, gap, required
        )));
    }

    Ok(relay_fee)
}

/// PoW base issuance: 50 × C × 2^(-⌊h_pow / H⌋), zero after 64 halvings
pub fn pow_new_issue(pow_height: u32) -> Amount {
    let halvings = pow_height / POW_HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    POW_INITIAL_ISSUE >> halvings
}

/// PoS base issuance: flat per block until the issuance window closes
pub fn pos_new_issue(pos_height: u32) -> Amount {
    if pos_height <= POS_ISSUE_BLOCKS {
        POS_BLOCK_ISSUE
    } else {
        0
    }
}

/// Per-block pool release: ⌊pool / 10080⌋ once pool > threshold
pub fn pool_release(pool: Amount) -> Amount {
    if pool > MIN_INCENTIVE_POOL_BALANCE {
        pool / REWARD_PERIOD_BLOCKS
    } else {
        0
    }
}

/// Reward of one block, split by source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockReward {
    /// Newly created base currency
    pub new_issue: Amount,
    /// Drawn from the incentive pool of the block's kind
    pub pool_draw: Amount,
}

impl BlockReward {
    pub fn total(&self) -> Amount {
        self.new_issue + self.pool_draw
    }
}

/// Chain aggregates the reward is computed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupplyState {
    pub money_supply: Amount,
    pub pow_pool: Amount,
    pub pos_pool: Amount,
}

impl SupplyState {
    /// Room left under the base-currency ceiling
    fn headroom(&self) -> Amount {
        let committed = self
            .money_supply
            .saturating_add(self.pow_pool)
            .saturating_add(self.pos_pool);
        MAX_BASE_SUPPLY.saturating_sub(committed).max(0)
    }
}

/// Reward for a block, drawing from the pool matching its kind.
///
/// The new issue is clamped so money supply plus both pools never passes
/// the base ceiling.
pub fn block_reward(proof_of_stake: bool, kind_height: u32, supply: &SupplyState) -> BlockReward {
    let (issue, pool) = if proof_of_stake {
        (pos_new_issue(kind_height), supply.pos_pool)
    } else {
        (pow_new_issue(kind_height), supply.pow_pool)
    };
    BlockReward {
        new_issue: issue.min(supply.headroom()),
        pool_draw: pool_release(pool),
    }
}
