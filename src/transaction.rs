//! Transaction type validation
//!
//! Nine mutually exclusive transaction shapes. A transaction is legal only when
//! its declared type matches the structural predicate for that type.

use std::collections::{BTreeMap, HashSet};

use crate::constants::*;
use crate::economic::money_range;
use crate::error::{ConsensusError, RangeError, Result};
use crate::payload::{self, AssetPayload, Donation, DonationPool};
use crate::script::is_standard_lock_script;
use crate::types::*;

/// Coinbase: |ins| = 1 ∧ ins[0].prevout = null ∧ |outs| ≥ 1 ∧ ∀o: o.asset = 0 ∧ payload = ∅
pub fn is_coinbase(tx: &Transaction) -> bool {
    tx.tx_type == TxType::Coinbase
        && tx.payload.is_empty()
        && all_base_outputs(tx)
        && tx.inputs.len() == 1
        && tx.inputs[0].prevout.is_null()
        && !tx.outputs.is_empty()
}

/// Coinstake: |ins| > 0 ∧ ins[0].prevout ≠ null ∧ |outs| ≥ 2 ∧ outs[0] = empty
/// ∧ ∀o: o.asset = 0 ∧ payload = ∅
pub fn is_coinstake(tx: &Transaction) -> bool {
    tx.tx_type == TxType::Coinstake
        && tx.payload.is_empty()
        && all_base_outputs(tx)
        && !tx.inputs.is_empty()
        && !tx.inputs[0].prevout.is_null()
        && tx.outputs.len() >= 2
        && tx.outputs[0].is_empty()
}

/// TransferBase: |ins| > 0 ∧ |outs| > 0 ∧ ∀o: o.asset = 0
/// ∧ (|payload| ≤ 1 ∨ payload is a donation)
pub fn is_transfer_base(tx: &Transaction) -> bool {
    tx.tx_type == TxType::TransferBase
        && all_base_outputs(tx)
        && !tx.inputs.is_empty()
        && !tx.outputs.is_empty()
        && (tx.payload.len() <= 1 || Donation::parse(&tx.payload).is_some())
}

/// A TransferBase whose payload routes coins to an incentive pool
pub fn is_donation(tx: &Transaction) -> bool {
    donation(tx).is_some()
}

fn donation(tx: &Transaction) -> Option<Donation> {
    if tx.tx_type != TxType::TransferBase
        || tx.inputs.is_empty()
        || tx.outputs.is_empty()
        || !all_base_outputs(tx)
    {
        return None;
    }
    Donation::parse(&tx.payload)
}

/// RegisterAsset: |ins| > 0 ∧ 1 ≤ |outs| ≤ 2 ∧ outs[0] minted asset with
/// id > 0, id mod 100 ≤ 3, amount > 0 ∧ outs[1].asset = 0 ∧ |payload| = 4
pub fn is_register_asset(tx: &Transaction) -> bool {
    tx.tx_type == TxType::RegisterAsset
        && minted_output_shape(tx)
        && tx.outputs[0].asset_id % 100 <= 3
        && tx.outputs[0].amount > 0
        && tx.payload.len() == 4
}

/// ReissueAsset: like RegisterAsset, but id mod 100 ∈ {1, 2} ∧ |payload| ≤ 1
pub fn is_reissue_asset(tx: &Transaction) -> bool {
    tx.tx_type == TxType::ReissueAsset
        && minted_output_shape(tx)
        && matches!(tx.outputs[0].asset_id % 100, 1 | 2)
        && tx.payload.len() <= 1
}

fn minted_output_shape(tx: &Transaction) -> bool {
    !tx.inputs.is_empty()
        && (1..=2).contains(&tx.outputs.len())
        && !tx.outputs[0].is_null()
        && !tx.outputs[0].is_empty()
        && tx.outputs[0].asset_id > 0
        && tx.outputs.get(1).map_or(true, |change| change.asset_id == BASE_ASSET_ID)
}

/// TransferAsset: |ins| ≥ 2 ∧ |outs| ≥ 1 ∧ |payload| ≤ 1 ∧ outputs touch at
/// most two ids; with base change it is exactly outs[0] and every other output
/// shares one non-zero id, otherwise every output shares one non-zero id
pub fn is_transfer_asset(tx: &Transaction) -> bool {
    if tx.tx_type != TxType::TransferAsset || tx.payload.len() > 1 {
        return false;
    }
    let id_count = tx.out_asset_id_count();
    if tx.inputs.len() < 2 || tx.outputs.is_empty() || !(1..=2).contains(&id_count) {
        return false;
    }
    if tx.outputs[0].asset_id == BASE_ASSET_ID {
        tx.outputs.len() >= 2
            && id_count == 2
            && tx.outputs[1..].iter().all(|o| o.asset_id != BASE_ASSET_ID)
    } else {
        id_count == 1
    }
}

/// ExchangeAsset is reserved; no transaction has this shape
pub fn is_exchange_asset(_tx: &Transaction) -> bool {
    false
}

/// RegisterAlias: |ins| > 0 ∧ 1 ≤ |outs| ≤ 2 ∧ outs[0] non-null, non-empty
/// ∧ ∀o: o.asset = 0 ∧ |payload| = 1
pub fn is_register_alias(tx: &Transaction) -> bool {
    tx.tx_type == TxType::RegisterAlias && alias_shape(tx)
}

/// TransferAlias: same shape as RegisterAlias; ownership is checked on inputs
pub fn is_transfer_alias(tx: &Transaction) -> bool {
    tx.tx_type == TxType::TransferAlias && alias_shape(tx)
}

fn alias_shape(tx: &Transaction) -> bool {
    !tx.inputs.is_empty()
        && (1..=2).contains(&tx.outputs.len())
        && !tx.outputs[0].is_null()
        && !tx.outputs[0].is_empty()
        && all_base_outputs(tx)
        && tx.payload.len() == 1
}

fn all_base_outputs(tx: &Transaction) -> bool {
    tx.outputs.iter().all(|o| o.asset_id == BASE_ASSET_ID)
}

/// Types open for use on chain
pub fn is_legal_tx_type(tx: &Transaction) -> bool {
    !matches!(tx.tx_type, TxType::Null | TxType::ExchangeAsset)
}

/// The declared type's structural predicate holds
pub fn is_legal_tx_format(tx: &Transaction) -> bool {
    match tx.tx_type {
        TxType::Coinbase => is_coinbase(tx),
        TxType::Coinstake => is_coinstake(tx),
        TxType::TransferBase => is_transfer_base(tx),
        TxType::RegisterAsset => is_register_asset(tx),
        TxType::TransferAsset => is_transfer_asset(tx),
        TxType::ExchangeAsset => is_exchange_asset(tx),
        TxType::RegisterAlias => is_register_alias(tx),
        TxType::ReissueAsset => is_reissue_asset(tx),
        TxType::TransferAlias => is_transfer_alias(tx),
        TxType::Null => false,
    }
}

/// Only suffixes 00..=03 are open
pub fn is_legal_asset_id(asset_id: AssetId) -> bool {
    asset_id >= 0 && asset_id % 100 <= 3
}

/// Flat registration fee
pub fn register_fee(tx: &Transaction) -> Amount {
    match tx.tx_type {
        TxType::RegisterAsset => MIN_REGISTER_ASSET_COST,
        TxType::RegisterAlias => MIN_REGISTER_ALIAS_COST,
        _ => 0,
    }
}

/// PayloadFee = chargeable encoded characters × per-character cost
pub fn payload_fee(tx: &Transaction) -> Amount {
    let chars = payload::chargeable_length(&tx.payload, is_donation(tx));
    chars as Amount * TX_PAYLOAD_PER_CHAR_COST
}

pub fn pow_donation(tx: &Transaction) -> Amount {
    match donation(tx) {
        Some(d) if d.pool == DonationPool::Pow => d.amount,
        _ => 0,
    }
}

pub fn pos_donation(tx: &Transaction) -> Amount {
    match donation(tx) {
        Some(d) if d.pool == DonationPool::Pos => d.amount,
        _ => 0,
    }
}

pub fn total_donation(tx: &Transaction) -> Amount {
    pow_donation(tx) + pos_donation(tx)
}

/// NotSizeFeeChange = RegisterFee + PayloadFee + TotalDonation
///
/// The part of the base-currency input/output gap not paid as relay fee.
pub fn not_size_fee_change(tx: &Transaction) -> std::result::Result<Amount, RangeError> {
    [register_fee(tx), payload_fee(tx), total_donation(tx)]
        .into_iter()
        .try_fold(0, crate::economic::add_amounts)
}

/// 0 when only base currency is touched, otherwise the one secondary asset id
pub fn asset_id(tx: &Transaction) -> AssetId {
    tx.outputs
        .iter()
        .map(|o| o.asset_id)
        .find(|id| *id != BASE_ASSET_ID)
        .unwrap_or(BASE_ASSET_ID)
}

/// Σ o.amount over outputs of `asset_id`, each term and partial sum in range
pub fn value_out(tx: &Transaction, asset_id: AssetId) -> std::result::Result<Amount, RangeError> {
    tx.outputs
        .iter()
        .filter(|o| o.asset_id == asset_id)
        .try_fold(0, |total, o| crate::economic::add_amounts(total, o.amount))
}

/// CheckTransaction: context-free validity
///
/// 1. |ins| > 0 ∧ |outs| > 0, within count and size limits
/// 2. legal type, legal format, legal asset-id suffix on every output
/// 3. ∀o: 0 ≤ o.amount ≤ M_max, per-asset totals in range
/// 4. no empty output outside coinbase/coinstake
/// 5. no duplicate inputs; coinbase unlock script 2..=100 bytes, other prevouts non-null
/// 6. legal payload, type-specific payload fields
pub fn check_transaction(tx: &Transaction) -> Result<()> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(ConsensusError::Malformed("Empty inputs or outputs".to_string()));
    }
    if tx.inputs.len() > MAX_INPUTS {
        return Err(ConsensusError::Malformed(format!("Too many inputs: {}", tx.inputs.len())));
    }
    if tx.outputs.len() > MAX_OUTPUTS {
        return Err(ConsensusError::Malformed(format!("Too many outputs: {}", tx.outputs.len())));
    }
    let tx_size = tx.serialized_size();
    if tx_size > MAX_BLOCK_SIZE {
        return Err(ConsensusError::Malformed(format!("Transaction too large: {} bytes", tx_size)));
    }

    if !is_legal_tx_type(tx) {
        return Err(ConsensusError::Malformed(format!("Illegal type {}", tx.tx_type.as_str())));
    }
    if !is_legal_tx_format(tx) {
        return Err(ConsensusError::Malformed(format!(
            "Shape does not match type {}",
            tx.tx_type.as_str()
        )));
    }

    let coinbase_or_stake = matches!(tx.tx_type, TxType::Coinbase | TxType::Coinstake);
    let mut totals: BTreeMap<AssetId, Amount> = BTreeMap::new();
    for (i, output) in tx.outputs.iter().enumerate() {
        if !is_legal_asset_id(output.asset_id) {
            return Err(ConsensusError::Malformed(format!(
                "Illegal asset id {} at output {}",
                output.asset_id, i
            )));
        }
        if output.is_empty() && !coinbase_or_stake {
            return Err(ConsensusError::Malformed(format!("Empty output at index {}", i)));
        }
        if output.amount < 0 {
            return Err(RangeError::Negative(output.amount).into());
        }
        if !money_range(output.amount) {
            return Err(RangeError::AboveMax(output.amount).into());
        }
        let total = totals.entry(output.asset_id).or_insert(0);
        *total = crate::economic::add_amounts(*total, output.amount)?;
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Err(ConsensusError::Malformed("Duplicate inputs".to_string()));
        }
    }

    if tx.tx_type == TxType::Coinbase {
        let len = tx.inputs[0].unlock_script.len();
        if !(2..=100).contains(&len) {
            return Err(ConsensusError::Malformed(format!(
                "Coinbase unlock script size {}",
                len
            )));
        }
    } else if tx.inputs.iter().any(|input| input.prevout.is_null()) {
        return Err(ConsensusError::Malformed("Null prevout".to_string()));
    }

    payload::check_payload(&tx.payload)?;
    match tx.tx_type {
        TxType::RegisterAsset => {
            AssetPayload::parse(&tx.payload)?;
            if tx.outputs[0].asset_id % 100 == 3 && tx.outputs[0].amount != 1 {
                return Err(ConsensusError::Malformed(format!(
                    "Single-unit asset {} minted with amount {}",
                    tx.outputs[0].asset_id, tx.outputs[0].amount
                )));
            }
        }
        TxType::RegisterAlias | TxType::TransferAlias => {
            payload::parse_alias(&tx.payload)?;
        }
        _ => {}
    }

    Ok(())
}

/// IsFinalTx: lock time 0, lock time already passed, or every input final
pub fn is_final_tx(tx: &Transaction, height: u32, block_time: u32) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let cutoff = if tx.lock_time < LOCKTIME_THRESHOLD { height } else { block_time };
    if tx.lock_time < cutoff {
        return true;
    }
    tx.inputs.iter().all(TxInput::is_final)
}

/// IsStandardTx: relay policy on top of validity.
///
/// Returns a short reason on refusal: "version", "tx-size", "scriptsig-size",
/// "scriptpubkey", "dust" or "non-final".
pub fn is_standard_tx(
    tx: &Transaction,
    next_height: u32,
    adjusted_time: u32,
) -> std::result::Result<(), &'static str> {
    if tx.version == 0 || tx.version > CURRENT_TX_VERSION {
        return Err("version");
    }
    if !is_final_tx(tx, next_height, adjusted_time) {
        return Err("non-final");
    }
    if tx.serialized_size() >= MAX_STANDARD_TX_SIZE {
        return Err("tx-size");
    }
    if tx
        .inputs
        .iter()
        .any(|input| input.unlock_script.len() > MAX_STANDARD_SCRIPT_SIG_SIZE)
    {
        return Err("scriptsig-size");
    }
    for output in &tx.outputs {
        if output.is_empty() {
            continue;
        }
        if !is_standard_lock_script(&output.lock_script) {
            return Err("scriptpubkey");
        }
        if output.asset_id == BASE_ASSET_ID
            && !output.is_unspendable()
            && output.amount < DUST_THRESHOLD
        {
            return Err("dust");
        }
    }
    Ok(())
}
