//! Memory pool of unconfirmed transactions
//!
//! The pool has its own lock so pool-only operations need no ledger access.
//! Admission checks live in [`crate::chain::Ledger::accept_to_memory_pool`];
//! everything here assumes the transaction was already validated.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::payload::{parse_alias, AssetPayload};
use crate::types::*;
use crate::utxo::PendingTransactions;

/// Input `index` of the pooled transaction `hash`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InPoint {
    pub hash: Hash,
    pub index: u32,
}

#[derive(Debug, Default)]
struct PoolMaps {
    tx_by_hash: HashMap<Hash, Transaction>,
    /// Outpoint → pooled input spending it
    next_spender: HashMap<OutPoint, InPoint>,
    transactions_updated: u64,
}

impl PoolMaps {
    fn remove(&mut self, hash: &Hash, recursive: bool, removed: &mut Vec<Transaction>) {
        let Some(tx) = self.tx_by_hash.get(hash).cloned() else {
            return;
        };
        if recursive {
            for n in 0..tx.outputs.len() as u32 {
                if let Some(child) = self.next_spender.get(&OutPoint::new(*hash, n)).copied() {
                    self.remove(&child.hash, true, removed);
                }
            }
        }
        for input in &tx.inputs {
            self.next_spender.remove(&input.prevout);
        }
        self.tx_by_hash.remove(hash);
        self.transactions_updated += 1;
        removed.push(tx);
    }
}

#[derive(Debug, Default)]
pub struct Mempool {
    maps: Mutex<PoolMaps>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PoolMaps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `tx` and indexes its inputs. No validation.
    pub fn add_unchecked(&self, hash: Hash, tx: Transaction) {
        let mut maps = self.lock();
        for (index, input) in tx.inputs.iter().enumerate() {
            maps.next_spender.insert(input.prevout, InPoint { hash, index: index as u32 });
        }
        maps.tx_by_hash.insert(hash, tx);
        maps.transactions_updated += 1;
        debug!("mempool add {} ({} pooled)", hex::encode(hash), maps.tx_by_hash.len());
    }

    /// Removes `tx`; with `recursive`, every pooled descendant too.
    /// Returns what was removed, descendants first.
    pub fn remove(&self, tx: &Transaction, recursive: bool) -> Vec<Transaction> {
        let mut removed = Vec::new();
        self.lock().remove(&tx.hash(), recursive, &mut removed);
        removed
    }

    /// Evicts every other pooled transaction spending an input of `tx`,
    /// with its descendants
    pub fn remove_conflicts(&self, tx: &Transaction) -> Vec<Transaction> {
        let hash = tx.hash();
        let mut maps = self.lock();
        let mut removed = Vec::new();
        for input in &tx.inputs {
            if let Some(conflict) = maps.next_spender.get(&input.prevout).copied() {
                if conflict.hash != hash {
                    maps.remove(&conflict.hash, true, &mut removed);
                }
            }
        }
        if !removed.is_empty() {
            debug!("mempool evicted {} conflicts of {}", removed.len(), hex::encode(hash));
        }
        removed
    }

    pub fn clear(&self) {
        let mut maps = self.lock();
        maps.tx_by_hash.clear();
        maps.next_spender.clear();
        maps.transactions_updated += 1;
    }

    pub fn lookup(&self, hash: &Hash) -> Option<Transaction> {
        self.lock().tx_by_hash.get(hash).cloned()
    }

    pub fn exists(&self, hash: &Hash) -> bool {
        self.lock().tx_by_hash.contains_key(hash)
    }

    /// Pooled input spending `prevout`
    pub fn spender_of(&self, prevout: &OutPoint) -> Option<InPoint> {
        self.lock().next_spender.get(prevout).copied()
    }

    pub fn query_hashes(&self) -> Vec<Hash> {
        self.lock().tx_by_hash.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().tx_by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transactions_updated(&self) -> u64 {
        self.lock().transactions_updated
    }

    pub fn add_transactions_updated(&self, n: u64) {
        let mut maps = self.lock();
        maps.transactions_updated = maps.transactions_updated.saturating_add(n);
    }

    /// A pooled RegisterAlias claims `alias`
    pub fn alias_exists(&self, alias: &str) -> bool {
        self.lock().tx_by_hash.values().any(|tx| {
            tx.tx_type == TxType::RegisterAlias
                && parse_alias(&tx.payload).map_or(false, |pooled| pooled == alias)
        })
    }

    /// A pooled registration or reissue collides with the asset id or one
    /// of its names
    pub fn asset_exists(&self, asset_id: AssetId, english_name: &str, local_name: &str, symbol: &str) -> bool {
        self.lock().tx_by_hash.values().any(|tx| match tx.tx_type {
            TxType::RegisterAsset => {
                tx.outputs.first().map_or(false, |o| o.asset_id == asset_id)
                    || AssetPayload::parse(&tx.payload).map_or(false, |p| {
                        p.english_name == english_name || p.local_name == local_name || p.symbol == symbol
                    })
            }
            TxType::ReissueAsset => tx.outputs.first().map_or(false, |o| o.asset_id == asset_id),
            _ => false,
        })
    }
}

impl PendingTransactions for Mempool {
    fn pending_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.lookup(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::payload::encode_entry;

    fn spend(prevouts: &[OutPoint], outputs: usize, tag: u32) -> Transaction {
        let mut tx = Transaction::new(
            TxType::TransferBase,
            10,
            prevouts.iter().map(|p| TxInput::new(*p, vec![1])).collect(),
            (0..outputs).map(|_| TxOutput::base(COIN, vec![1])).collect(),
        );
        tx.lock_time = tag;
        tx
    }

    fn add(pool: &Mempool, tx: &Transaction) {
        pool.add_unchecked(tx.hash(), tx.clone());
    }

    #[test]
    fn test_add_and_lookup() {
        let pool = Mempool::new();
        let tx = spend(&[OutPoint::new([1; 32], 0)], 1, 0);
        add(&pool, &tx);
        assert!(pool.exists(&tx.hash()));
        assert_eq!(pool.lookup(&tx.hash()), Some(tx.clone()));
        assert_eq!(pool.spender_of(&OutPoint::new([1; 32], 0)), Some(InPoint { hash: tx.hash(), index: 0 }));
        assert_eq!(pool.transactions_updated(), 1);
    }

    #[test]
    fn test_recursive_remove_takes_descendants() {
        let pool = Mempool::new();
        let parent = spend(&[OutPoint::new([1; 32], 0)], 2, 0);
        let child = spend(&[OutPoint::new(parent.hash(), 1)], 1, 1);
        let grandchild = spend(&[OutPoint::new(child.hash(), 0)], 1, 2);
        let unrelated = spend(&[OutPoint::new([2; 32], 0)], 1, 3);
        for tx in [&parent, &child, &grandchild, &unrelated] {
            add(&pool, tx);
        }

        let removed = pool.remove(&parent, false);
        assert_eq!(removed.len(), 1);
        assert_eq!(pool.len(), 3);

        add(&pool, &parent);
        let removed = pool.remove(&parent, true);
        assert_eq!(removed.len(), 3);
        assert_eq!(pool.query_hashes(), vec![unrelated.hash()]);
        assert!(pool.spender_of(&OutPoint::new(parent.hash(), 1)).is_none());
    }

    #[test]
    fn test_remove_conflicts_keeps_confirmed_tx() {
        let pool = Mempool::new();
        let shared = OutPoint::new([1; 32], 0);
        let a = spend(&[shared], 1, 0);
        let a_child = spend(&[OutPoint::new(a.hash(), 0)], 1, 1);
        let b = spend(&[shared, OutPoint::new([3; 32], 0)], 1, 2);
        add(&pool, &a);
        add(&pool, &a_child);

        let removed = pool.remove_conflicts(&b);
        assert_eq!(removed.len(), 2);
        assert!(pool.is_empty());

        add(&pool, &b);
        assert!(pool.remove_conflicts(&b).is_empty());
        assert!(pool.exists(&b.hash()));
    }

    #[test]
    fn test_clear_bumps_counter_once() {
        let pool = Mempool::new();
        add(&pool, &spend(&[OutPoint::new([1; 32], 0)], 1, 0));
        add(&pool, &spend(&[OutPoint::new([2; 32], 0)], 1, 0));
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.transactions_updated(), 3);
        pool.add_transactions_updated(5);
        assert_eq!(pool.transactions_updated(), 8);
    }

    #[test]
    fn test_registration_scans() {
        let pool = Mempool::new();
        let mut alias = spend(&[OutPoint::new([1; 32], 0)], 1, 0);
        alias.tx_type = TxType::RegisterAlias;
        alias.payload = vec![encode_entry("carol")];
        add(&pool, &alias);

        let mut asset = spend(&[OutPoint::new([2; 32], 0)], 1, 0);
        asset.tx_type = TxType::RegisterAsset;
        asset.outputs[0].asset_id = 1001;
        asset.payload = AssetPayload {
            english_name: "Gold".to_string(),
            local_name: "Oro".to_string(),
            symbol: "GLD".to_string(),
            description: String::new(),
        }
        .to_payload();
        add(&pool, &asset);

        assert!(pool.alias_exists("carol"));
        assert!(!pool.alias_exists("dave"));
        assert!(pool.asset_exists(1001, "x", "y", "Z"));
        assert!(pool.asset_exists(2001, "Gold", "y", "Z"));
        assert!(pool.asset_exists(2001, "x", "y", "GLD"));
        assert!(!pool.asset_exists(2001, "Silver", "Plata", "SLV"));
    }
}
