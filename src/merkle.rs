//! Transaction commitment tree

use crate::serialize::hash_pair;
use crate::types::*;

/// Every level of the merkle tree, leaves first, root last.
///
/// An odd node at the end of a level is paired with itself.
pub fn build_merkle_tree(leaves: &[Hash]) -> Vec<Hash> {
    let mut tree = leaves.to_vec();
    let mut level_start = 0;
    let mut size = leaves.len();
    while size > 1 {
        for i in (0..size).step_by(2) {
            let i2 = (i + 1).min(size - 1);
            let parent = hash_pair(&tree[level_start + i], &tree[level_start + i2]);
            tree.push(parent);
        }
        level_start += size;
        size = (size + 1) / 2;
    }
    tree
}

pub fn transaction_hashes(transactions: &[Transaction]) -> Vec<Hash> {
    transactions.iter().map(Transaction::hash).collect()
}

/// Root over the block's transaction hashes, all-zero for no transactions
pub fn merkle_root(transactions: &[Transaction]) -> Hash {
    build_merkle_tree(&transaction_hashes(transactions))
        .last()
        .copied()
        .unwrap_or(NULL_HASH)
}

/// Sibling hashes from leaf `index` up to the root
pub fn merkle_branch(tree: &[Hash], leaf_count: usize, mut index: usize) -> Vec<Hash> {
    let mut branch = Vec::new();
    let mut level_start = 0;
    let mut size = leaf_count;
    while size > 1 {
        let sibling = (index ^ 1).min(size - 1);
        branch.push(tree[level_start + sibling]);
        index >>= 1;
        level_start += size;
        size = (size + 1) / 2;
    }
    branch
}

/// Root implied by `hash` at leaf `index` with `branch`
pub fn check_merkle_branch(mut hash: Hash, branch: &[Hash], mut index: usize) -> Hash {
    for other in branch {
        hash = if index & 1 == 1 { hash_pair(other, &hash) } else { hash_pair(&hash, other) };
        index >>= 1;
    }
    hash
}

impl ConfirmedTransaction {
    /// Locates the transaction in `block` and records its branch.
    /// Returns the position, or `None` when the block does not contain it.
    pub fn set_merkle_branch(&mut self, block: &Block) -> Option<usize> {
        let hash = self.transaction.hash();
        let leaves = transaction_hashes(&block.transactions);
        let position = leaves.iter().position(|h| *h == hash);
        match position {
            Some(index) => {
                let tree = build_merkle_tree(&leaves);
                self.merkle_branch = merkle_branch(&tree, leaves.len(), index);
                self.index = index as i32;
                self.block_hash = block.hash();
            }
            None => {
                self.merkle_branch.clear();
                self.index = -1;
            }
        }
        position
    }

    /// The recorded branch commits to `merkle_root`
    pub fn verify_in_block(&self, merkle_root: &Hash) -> bool {
        self.index >= 0
            && check_merkle_branch(self.transaction.hash(), &self.merkle_branch, self.index as usize)
                == *merkle_root
    }
}
