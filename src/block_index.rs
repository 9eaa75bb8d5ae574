//! Block index tree
//!
//! Nodes live in an arena addressed by [`BlockId`]. `prev` may fan in from
//! several children; `next` is set only along the current best chain.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, Result};
use crate::serialize::{Decodable, Encodable, Reader};
use crate::types::*;
use crate::utxo::ConfirmationHeights;

pub const BLOCK_PROOF_OF_STAKE: u32 = 1 << 0;
pub const BLOCK_STAKE_ENTROPY: u32 = 1 << 1;
pub const BLOCK_STAKE_MODIFIER: u32 = 1 << 2;

/// On-disk record format version
pub const DISK_INDEX_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub usize);

/// One block's position in the chain tree and the chain aggregates after it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndex {
    pub hash: Hash,
    pub prev: Option<BlockId>,
    pub next: Option<BlockId>,
    pub file: u32,
    pub block_pos: u32,
    pub height: u32,
    /// Proof-of-work blocks up to and including this one
    pub pow_height: u32,
    pub chain_trust: u64,
    /// Distinct secondary asset ids registered up to this block
    pub asset_type_count: i64,
    pub pow_pool: Amount,
    pub pos_pool: Amount,
    /// Base currency created by this block
    pub mint: Amount,
    pub money_supply: Amount,
    pub flags: u32,
    pub stake_modifier: u64,
    pub stake_modifier_v2: Hash,
    pub prevout_stake: OutPoint,
    pub stake_time: u32,
    pub hash_proof: Hash,
    pub version: i32,
    pub merkle_root: Hash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockIndex {
    /// Index node for `block`, not yet linked into a tree
    pub fn new(block: &Block, file: u32, block_pos: u32) -> Self {
        let (prevout_stake, stake_time) = block.proof_of_stake();
        let mut flags = 0;
        if block.is_proof_of_stake() {
            flags |= BLOCK_PROOF_OF_STAKE;
        }
        if block.stake_entropy_bit() == 1 {
            flags |= BLOCK_STAKE_ENTROPY;
        }
        Self {
            hash: block.hash(),
            prev: None,
            next: None,
            file,
            block_pos,
            height: 0,
            pow_height: 0,
            chain_trust: 0,
            asset_type_count: 0,
            pow_pool: 0,
            pos_pool: 0,
            mint: 0,
            money_supply: 0,
            flags,
            stake_modifier: 0,
            stake_modifier_v2: NULL_HASH,
            prevout_stake,
            stake_time,
            hash_proof: block.hash(),
            version: block.header.version,
            merkle_root: block.header.merkle_root,
            time: block.header.timestamp,
            bits: block.header.bits,
            nonce: block.header.nonce,
        }
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.flags & BLOCK_PROOF_OF_STAKE != 0
    }

    pub fn is_proof_of_work(&self) -> bool {
        !self.is_proof_of_stake()
    }

    pub fn stake_entropy_bit(&self) -> u64 {
        ((self.flags & BLOCK_STAKE_ENTROPY) >> 1) as u64
    }

    pub fn generated_stake_modifier(&self) -> bool {
        self.flags & BLOCK_STAKE_MODIFIER != 0
    }

    pub fn set_stake_modifier(&mut self, modifier: u64, generated: bool) {
        self.stake_modifier = modifier;
        if generated {
            self.flags |= BLOCK_STAKE_MODIFIER;
        }
    }

    /// Trust contributed by this block alone
    pub fn block_trust(&self) -> u64 {
        if self.is_proof_of_stake() {
            2
        } else {
            1
        }
    }

    pub fn pos_height(&self) -> u32 {
        self.height - self.pow_height
    }
}

/// Arena of block index nodes
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    nodes: Vec<BlockIndex>,
    by_hash: HashMap<Hash, BlockId>,
    by_pos: HashMap<(u32, u32), BlockId>,
    genesis: Option<BlockId>,
    best: Option<BlockId>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node; the first node inserted is the genesis block
    pub fn insert(&mut self, index: BlockIndex) -> Result<BlockId> {
        if self.by_hash.contains_key(&index.hash) {
            return Err(ConsensusError::BlockValidation(format!(
                "block {} already indexed",
                hex::encode(index.hash)
            )));
        }
        let id = BlockId(self.nodes.len());
        self.by_hash.insert(index.hash, id);
        self.by_pos.insert((index.file, index.block_pos), id);
        self.nodes.push(index);
        if self.genesis.is_none() {
            self.genesis = Some(id);
        }
        Ok(id)
    }

    pub fn get(&self, id: BlockId) -> &BlockIndex {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: BlockId) -> &mut BlockIndex {
        &mut self.nodes[id.0]
    }

    pub fn id_of(&self, hash: &Hash) -> Option<BlockId> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn genesis(&self) -> Option<BlockId> {
        self.genesis
    }

    pub fn best(&self) -> Option<BlockId> {
        self.best
    }

    pub fn set_best(&mut self, id: BlockId) {
        self.best = Some(id);
    }

    pub fn best_height(&self) -> u32 {
        self.best.map_or(0, |id| self.get(id).height)
    }

    /// On the best chain: the tip, or any node with a `next` link
    pub fn is_in_main_chain(&self, id: BlockId) -> bool {
        self.best == Some(id) || self.get(id).next.is_some()
    }

    /// Main-chain block at `height`
    pub fn at_height(&self, height: u32) -> Option<BlockId> {
        let mut id = self.best?;
        if height > self.get(id).height {
            return None;
        }
        while self.get(id).height > height {
            id = self.get(id).prev?;
        }
        Some(id)
    }

    /// Most recent common ancestor of `a` and `b`
    pub fn find_fork(&self, mut a: BlockId, mut b: BlockId) -> Option<BlockId> {
        while a != b {
            let (ha, hb) = (self.get(a).height, self.get(b).height);
            if ha >= hb {
                a = self.get(a).prev?;
            } else {
                b = self.get(b).prev?;
            }
        }
        Some(a)
    }

    /// Nodes strictly after `ancestor` up to and including `tip`, oldest first
    pub fn path_from(&self, ancestor: BlockId, tip: BlockId) -> Vec<BlockId> {
        let mut path = Vec::new();
        let mut cursor = Some(tip);
        while let Some(id) = cursor {
            if id == ancestor {
                break;
            }
            path.push(id);
            cursor = self.get(id).prev;
        }
        path.reverse();
        path
    }
}

impl ConfirmationHeights for BlockTree {
    fn confirmation_height(&self, pos: &DiskTxPos) -> Option<u32> {
        self.by_pos.get(&(pos.file, pos.block_pos)).map(|id| self.get(*id).height)
    }
}

/// Serialized form of a [`BlockIndex`]: links become hashes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskBlockIndexRecord {
    pub version: i32,
    pub hash_next: Hash,
    pub file: u32,
    pub block_pos: u32,
    pub height: u32,
    pub pow_height: u32,
    pub asset_type_count: i64,
    pub pow_pool: Amount,
    pub pos_pool: Amount,
    pub mint: Amount,
    pub money_supply: Amount,
    pub flags: u32,
    pub stake_modifier: u64,
    pub stake_modifier_v2: Hash,
    /// Present on disk only for proof-of-stake blocks
    pub prevout_stake: OutPoint,
    pub stake_time: u32,
    pub hash_proof: Hash,
    pub block_version: i32,
    pub hash_prev: Hash,
    pub merkle_root: Hash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub block_hash: Hash,
}

impl DiskBlockIndexRecord {
    pub fn from_index(tree: &BlockTree, id: BlockId) -> Self {
        Self::from_node(tree, tree.get(id))
    }

    /// Record for `index`, which may be a staged copy of a node in `tree`.
    /// Only the hashes of its links are read from `tree`.
    pub fn from_node(tree: &BlockTree, index: &BlockIndex) -> Self {
        let link = |other: Option<BlockId>| other.map_or(NULL_HASH, |o| tree.get(o).hash);
        let (prevout_stake, stake_time) = if index.is_proof_of_stake() {
            (index.prevout_stake, index.stake_time)
        } else {
            (OutPoint::null(), 0)
        };
        Self {
            version: DISK_INDEX_VERSION,
            hash_next: link(index.next),
            file: index.file,
            block_pos: index.block_pos,
            height: index.height,
            pow_height: index.pow_height,
            asset_type_count: index.asset_type_count,
            pow_pool: index.pow_pool,
            pos_pool: index.pos_pool,
            mint: index.mint,
            money_supply: index.money_supply,
            flags: index.flags,
            stake_modifier: index.stake_modifier,
            stake_modifier_v2: index.stake_modifier_v2,
            prevout_stake,
            stake_time,
            hash_proof: index.hash_proof,
            block_version: index.version,
            hash_prev: link(index.prev),
            merkle_root: index.merkle_root,
            time: index.time,
            bits: index.bits,
            nonce: index.nonce,
            block_hash: index.hash,
        }
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.flags & BLOCK_PROOF_OF_STAKE != 0
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            version: self.block_version,
            prev_block_hash: self.hash_prev,
            merkle_root: self.merkle_root,
            timestamp: self.time,
            bits: self.bits,
            nonce: self.nonce,
        }
    }
}

impl Encodable for DiskBlockIndexRecord {
    fn encode(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.hash_next.encode(out);
        self.file.encode(out);
        self.block_pos.encode(out);
        self.height.encode(out);
        self.pow_height.encode(out);
        self.asset_type_count.encode(out);
        self.pow_pool.encode(out);
        self.pos_pool.encode(out);
        self.mint.encode(out);
        self.money_supply.encode(out);
        self.flags.encode(out);
        self.stake_modifier.encode(out);
        self.stake_modifier_v2.encode(out);
        if self.is_proof_of_stake() {
            self.prevout_stake.encode(out);
            self.stake_time.encode(out);
        }
        self.hash_proof.encode(out);
        self.block_version.encode(out);
        self.hash_prev.encode(out);
        self.merkle_root.encode(out);
        self.time.encode(out);
        self.bits.encode(out);
        self.nonce.encode(out);
        self.block_hash.encode(out);
    }
}

impl Decodable for DiskBlockIndexRecord {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let version = i32::decode(reader)?;
        let hash_next = Hash::decode(reader)?;
        let file = u32::decode(reader)?;
        let block_pos = u32::decode(reader)?;
        let height = u32::decode(reader)?;
        let pow_height = u32::decode(reader)?;
        let asset_type_count = i64::decode(reader)?;
        let pow_pool = i64::decode(reader)?;
        let pos_pool = i64::decode(reader)?;
        let mint = i64::decode(reader)?;
        let money_supply = i64::decode(reader)?;
        let flags = u32::decode(reader)?;
        let stake_modifier = u64::decode(reader)?;
        let stake_modifier_v2 = Hash::decode(reader)?;
        let (prevout_stake, stake_time) = if flags & BLOCK_PROOF_OF_STAKE != 0 {
            (OutPoint::decode(reader)?, u32::decode(reader)?)
        } else {
            (OutPoint::null(), 0)
        };
        Ok(Self {
            version,
            hash_next,
            file,
            block_pos,
            height,
            pow_height,
            asset_type_count,
            pow_pool,
            pos_pool,
            mint,
            money_supply,
            flags,
            stake_modifier,
            stake_modifier_v2,
            prevout_stake,
            stake_time,
            hash_proof: Hash::decode(reader)?,
            block_version: i32::decode(reader)?,
            hash_prev: Hash::decode(reader)?,
            merkle_root: Hash::decode(reader)?,
            time: u32::decode(reader)?,
            bits: u32::decode(reader)?,
            nonce: u32::decode(reader)?,
            block_hash: Hash::decode(reader)?,
        })
    }
}

/// Block hashes sampled at exponentially growing depth, genesis last
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockLocator {
    pub hashes: Vec<Hash>,
}

impl BlockLocator {
    /// Ten single steps back from `id`, then doubling steps
    pub fn from_index(tree: &BlockTree, id: BlockId) -> Self {
        let mut hashes = Vec::new();
        let mut cursor = Some(id);
        let mut step = 1;
        while let Some(current) = cursor {
            hashes.push(tree.get(current).hash);
            for _ in 0..step {
                cursor = cursor.and_then(|c| tree.get(c).prev);
                if cursor.is_none() {
                    break;
                }
            }
            if hashes.len() > 10 {
                step *= 2;
            }
        }
        if let Some(genesis) = tree.genesis() {
            let genesis_hash = tree.get(genesis).hash;
            if hashes.last() != Some(&genesis_hash) {
                hashes.push(genesis_hash);
            }
        }
        Self { hashes }
    }

    /// Locator for the current best chain
    pub fn from_best(tree: &BlockTree) -> Self {
        tree.best().map_or_else(Self::default, |id| Self::from_index(tree, id))
    }

    /// First main-chain block named by the locator, else genesis
    pub fn find_fork(&self, tree: &BlockTree) -> Option<BlockId> {
        self.hashes
            .iter()
            .filter_map(|hash| tree.id_of(hash))
            .find(|id| tree.is_in_main_chain(*id))
            .or_else(|| tree.genesis())
    }

    /// Blocks between the locator's tip and the fork point, estimated from
    /// the sampling steps
    pub fn distance_back(&self, tree: &BlockTree) -> u32 {
        let mut distance = 0;
        let mut step = 1;
        for hash in &self.hashes {
            if let Some(id) = tree.id_of(hash) {
                if tree.is_in_main_chain(id) {
                    return distance;
                }
            }
            distance += step;
            if distance > 10 {
                step *= 2;
            }
        }
        distance
    }

    pub fn height(&self, tree: &BlockTree) -> u32 {
        self.find_fork(tree).map_or(0, |id| tree.get(id).height)
    }
}
