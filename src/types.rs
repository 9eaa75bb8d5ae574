//! Core ledger types for consensus validation

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::serialize::{double_sha256, Encodable};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Signed amount in base units
pub type Amount = i64;

/// Asset identifier; `id % 100` selects the asset behaviour
pub type AssetId = i64;

pub const NULL_HASH: Hash = [0u8; 32];

/// OutPoint: reference to output `index` of transaction `hash`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// Marker carried by the first input of a coinbase
    pub fn null() -> Self {
        Self { hash: NULL_HASH, index: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.hash == NULL_HASH && self.index == u32::MAX
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prevout: OutPoint,
    pub unlock_script: ByteString,
    pub sequence: u32,
}

impl TxInput {
    pub fn new(prevout: OutPoint, unlock_script: ByteString) -> Self {
        Self { prevout, unlock_script, sequence: SEQUENCE_FINAL }
    }

    pub fn is_final(&self) -> bool {
        self.sequence == SEQUENCE_FINAL
    }
}

/// Transaction output carrying `amount` of asset `asset_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub asset_id: AssetId,
    pub amount: Amount,
    pub lock_script: ByteString,
}

impl TxOutput {
    pub fn new(asset_id: AssetId, amount: Amount, lock_script: ByteString) -> Self {
        Self { asset_id, amount, lock_script }
    }

    /// Base-currency output
    pub fn base(amount: Amount, lock_script: ByteString) -> Self {
        Self::new(BASE_ASSET_ID, amount, lock_script)
    }

    pub fn null() -> Self {
        Self { asset_id: -1, amount: -1, lock_script: Vec::new() }
    }

    pub fn is_null(&self) -> bool {
        self.amount == -1 || self.asset_id == -1
    }

    /// Structural marker output, e.g. output 0 of a coinstake
    pub fn empty() -> Self {
        Self { asset_id: BASE_ASSET_ID, amount: 0, lock_script: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.amount == 0 && self.lock_script.is_empty()
    }

    pub fn is_unspendable(&self) -> bool {
        self.is_empty() || self.lock_script.first() == Some(&OP_RETURN)
    }

    pub fn amount_of(&self, asset_id: AssetId) -> Amount {
        if self.asset_id == asset_id {
            self.amount
        } else {
            0
        }
    }
}

/// The closed set of transaction shapes. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum TxType {
    Null = 0,
    Coinbase = 1,
    Coinstake = 2,
    TransferBase = 3,
    RegisterAsset = 4,
    TransferAsset = 5,
    ExchangeAsset = 6,
    RegisterAlias = 7,
    ReissueAsset = 8,
    TransferAlias = 9,
}

impl TxType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => TxType::Null,
            1 => TxType::Coinbase,
            2 => TxType::Coinstake,
            3 => TxType::TransferBase,
            4 => TxType::RegisterAsset,
            5 => TxType::TransferAsset,
            6 => TxType::ExchangeAsset,
            7 => TxType::RegisterAlias,
            8 => TxType::ReissueAsset,
            9 => TxType::TransferAlias,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Null => "null",
            TxType::Coinbase => "coinbase",
            TxType::Coinstake => "coinstake",
            TxType::TransferBase => "transfer_base",
            TxType::RegisterAsset => "register_asset",
            TxType::TransferAsset => "transfer_asset",
            TxType::ExchangeAsset => "exchange_asset",
            TxType::RegisterAlias => "register_alias",
            TxType::ReissueAsset => "reissue_asset",
            TxType::TransferAlias => "transfer_alias",
        }
    }
}

/// Transaction
///
/// `payload` holds Base64 text as stored on chain; see [`crate::payload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_type: TxType,
    pub version: u16,
    pub time: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
    pub payload: Vec<String>,
}

impl Transaction {
    pub fn new(tx_type: TxType, time: u32, inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            tx_type,
            version: CURRENT_TX_VERSION,
            time,
            inputs,
            outputs,
            lock_time: 0,
            payload: Vec::new(),
        }
    }

    /// Wire header: type in the high 16 bits, version in the low 16
    pub fn type_and_version(&self) -> u32 {
        ((self.tx_type as u32) << 16) | self.version as u32
    }

    /// Identity: double SHA-256 of the canonical encoding
    pub fn hash(&self) -> Hash {
        double_sha256(&self.encode_to_vec())
    }

    pub fn serialized_size(&self) -> usize {
        self.encode_to_vec().len()
    }

    pub fn is_null(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Number of distinct asset ids among the outputs
    pub fn out_asset_id_count(&self) -> usize {
        let mut ids: Vec<AssetId> = self.outputs.iter().map(|o| o.asset_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        double_sha256(&self.encode_to_vec())
    }
}

/// Block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Signature by the owner of the coinstake / coinbase output
    pub signature: ByteString,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// A block is proof-of-stake iff its second transaction is a coinstake
    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions.len() > 1 && crate::transaction::is_coinstake(&self.transactions[1])
    }

    pub fn is_proof_of_work(&self) -> bool {
        !self.is_proof_of_stake()
    }

    /// Kernel outpoint and time of the stake, null for PoW blocks
    pub fn proof_of_stake(&self) -> (OutPoint, u32) {
        if self.is_proof_of_stake() {
            let stake = &self.transactions[1];
            (stake.inputs[0].prevout, stake.time)
        } else {
            (OutPoint::null(), 0)
        }
    }

    pub fn max_transaction_time(&self) -> u32 {
        self.transactions.iter().map(|tx| tx.time).max().unwrap_or(0)
    }

    /// Last bit of the block hash
    pub fn stake_entropy_bit(&self) -> u32 {
        (self.hash()[0] & 1) as u32
    }
}

/// Position of a transaction inside the block files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiskTxPos {
    pub file: u32,
    pub block_pos: u32,
    pub tx_pos: u32,
}

impl DiskTxPos {
    pub fn new(file: u32, block_pos: u32, tx_pos: u32) -> Self {
        Self { file, block_pos, tx_pos }
    }

    pub fn null() -> Self {
        Self { file: u32::MAX, block_pos: 0, tx_pos: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.file == u32::MAX
    }
}

impl Default for DiskTxPos {
    fn default() -> Self {
        Self::null()
    }
}

/// Persistent record of a confirmed transaction and who spent its outputs.
/// A null `pos` marks the record absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIndex {
    pub pos: DiskTxPos,
    pub spent: Vec<DiskTxPos>,
}

impl TxIndex {
    pub fn new(pos: DiskTxPos, outputs: usize) -> Self {
        Self { pos, spent: vec![DiskTxPos::null(); outputs] }
    }

    pub fn null() -> Self {
        Self { pos: DiskTxPos::null(), spent: Vec::new() }
    }

    pub fn is_null(&self) -> bool {
        self.pos.is_null()
    }

    /// Spender of output `n`, `None` when unspent or out of range
    pub fn spent_by(&self, n: usize) -> Option<DiskTxPos> {
        self.spent.get(n).copied().filter(|pos| !pos.is_null())
    }

    pub fn is_spent(&self, n: usize) -> bool {
        self.spent_by(n).is_some()
    }
}

impl Default for TxIndex {
    fn default() -> Self {
        Self::null()
    }
}

/// A transaction together with the branch linking it into a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedTransaction {
    pub transaction: Transaction,
    pub block_hash: Hash,
    pub merkle_branch: Vec<Hash>,
    /// Position in the block, `-1` when unset
    pub index: i32,
}

impl ConfirmedTransaction {
    pub fn new(transaction: Transaction) -> Self {
        Self { transaction, block_hash: NULL_HASH, merkle_branch: Vec::new(), index: -1 }
    }
}
