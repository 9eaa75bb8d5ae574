//! Ledger context
//!
//! [`Ledger`] owns the block tree, the registries, the mempool and the durable
//! store, and is the single entry point for blocks and loose transactions.
//! Mutating operations take `&mut self`, which serializes them; mempool
//! admission only reads ledger state and takes `&self`.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::block::{
    check_block, connect_block, BlockConnection, BlockContext, BlockPosition, ChainState,
};
use crate::block_index::{BlockId, BlockIndex, BlockLocator, BlockTree};
use crate::economic::check_io_value;
use crate::error::{ConsensusError, Result, ValidationState};
use crate::mempool::Mempool;
use crate::params::ChainParams;
use crate::payload::{parse_alias, AssetPayload};
use crate::registry::Registries;
use crate::reorganization::{reorganize, ChainSwitch};
use crate::script::{ScriptVerifier, StandardScriptVerifier};
use crate::serialize::Encodable;
use crate::storage::LedgerStore;
use crate::transaction::{
    check_transaction, is_coinbase, is_coinstake, is_final_tx, is_standard_tx,
};
use crate::types::*;
use crate::utxo::{
    connect_inputs, fetch_inputs, SpendContext, TestPool, UtxoView, ValidationContext,
    MEMPOOL_TX_POS,
};

/// One-way sink told about transactions entering or leaving the chain
pub trait WalletNotifier: Send {
    /// `connected` is false when the transaction was reorganized out.
    /// `block_hash` is `None` for mempool acceptance and disconnects.
    fn sync_transaction(&self, tx: &Transaction, block_hash: Option<Hash>, connected: bool);

    fn set_best_chain(&self, locator: &BlockLocator);
}

pub struct Ledger<S: LedgerStore> {
    store: S,
    tree: BlockTree,
    registries: Registries,
    params: ChainParams,
    verifier: Box<dyn ScriptVerifier>,
    mempool: Mempool,
    wallets: Vec<Box<dyn WalletNotifier>>,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, params: ChainParams, verifier: Box<dyn ScriptVerifier>) -> Self {
        Self {
            store,
            tree: BlockTree::new(),
            registries: Registries::new(),
            params,
            verifier,
            mempool: Mempool::new(),
            wallets: Vec::new(),
        }
    }

    /// Ledger verifying pay-to-pubkey-hash and pay-to-pubkey scripts
    pub fn with_standard_verifier(store: S, params: ChainParams) -> Self {
        Self::new(store, params, Box::new(StandardScriptVerifier::new()))
    }

    pub fn register_wallet(&mut self, wallet: Box<dyn WalletNotifier>) {
        self.wallets.push(wallet);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn best(&self) -> Option<&BlockIndex> {
        self.tree.best().map(|id| self.tree.get(id))
    }

    pub fn best_height(&self) -> u32 {
        self.tree.best_height()
    }

    pub fn block_locator(&self) -> BlockLocator {
        BlockLocator::from_best(&self.tree)
    }

    /// Seconds since the epoch by the local clock
    pub fn adjusted_time(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
    }

    /// Stores and connects the genesis block of an empty ledger
    pub fn init_genesis(&mut self, genesis: &Block) -> Result<BlockId> {
        if !self.tree.is_empty() {
            return Err(ConsensusError::BlockValidation("Ledger already has a genesis block".to_string()));
        }
        if genesis.header.prev_block_hash != NULL_HASH {
            return Err(ConsensusError::BlockValidation("Genesis block has a parent".to_string()));
        }
        self.process_block(genesis)
    }

    /// ProcessBlock: CheckBlock then AcceptBlock
    pub fn process_block(&mut self, block: &Block) -> Result<BlockId> {
        let hash = block.hash();
        if self.tree.contains(&hash) {
            return Err(ConsensusError::Duplicate(format!("block {} already known", hex::encode(hash))));
        }
        check_block(block, &self.params, self.adjusted_time()).map_err(|err| {
            warn!("block {} failed checks: {}", hex::encode(hash), err);
            err
        })?;
        self.accept_block(block)
    }

    /// AcceptBlock: index `block` under its parent, store it, and switch the
    /// best chain when it carries more trust
    pub fn accept_block(&mut self, block: &Block) -> Result<BlockId> {
        let hash = block.hash();
        let parent = if self.tree.is_empty() {
            None
        } else {
            let id = self.tree.id_of(&block.header.prev_block_hash).ok_or_else(|| {
                ConsensusError::MissingInputs(format!(
                    "parent {} of block {} unknown",
                    hex::encode(block.header.prev_block_hash),
                    hex::encode(hash)
                ))
            })?;
            Some(id)
        };

        let height = parent.map_or(0, |p| self.tree.get(p).height + 1);
        for tx in &block.transactions {
            if !is_final_tx(tx, height, block.header.timestamp) {
                return Err(ConsensusError::BlockValidation(format!(
                    "non-final transaction {}",
                    hex::encode(tx.hash())
                )));
            }
        }

        let (file, block_pos) = self
            .store
            .append_block(&block.encode_to_vec())
            .map_err(ConsensusError::Storage)?;
        let mut index = BlockIndex::new(block, file, block_pos);
        index.prev = parent;
        index.height = height;
        if let Some(p) = parent {
            let prev = self.tree.get(p);
            index.pow_height = prev.pow_height + u32::from(index.is_proof_of_work());
            index.chain_trust = prev.chain_trust + index.block_trust();
            let modifier = (prev.stake_modifier << 1) | index.stake_entropy_bit();
            index.set_stake_modifier(modifier, true);
        } else {
            index.chain_trust = index.block_trust();
            index.set_stake_modifier(0, true);
        }
        let trust = index.chain_trust;
        let id = self.tree.insert(index)?;
        debug!("accepted block {} at height {}", hex::encode(hash), height);

        let best_trust = self.best().map(|b| b.chain_trust);
        if best_trust.map_or(true, |best| trust > best) {
            self.set_best_chain(id)?;
        }
        Ok(id)
    }

    /// SetBestChain: connect `id` directly or reorganize onto it, then
    /// update the mempool and notify wallets
    pub fn set_best_chain(&mut self, id: BlockId) -> Result<ChainSwitch> {
        let switch = reorganize(
            &mut self.tree,
            &mut self.store,
            &mut self.registries,
            self.verifier.as_ref(),
            &self.params,
            id,
        )
        .map_err(|err| {
            warn!("invalid chain at {}: {}", hex::encode(self.tree.get(id).hash), err);
            err
        })?;

        for connected in &switch.connected {
            for tx in &connected.block.transactions {
                self.mempool.remove(tx, false);
                self.mempool.remove_conflicts(tx);
            }
        }
        for block in &switch.disconnected {
            for tx in &block.transactions {
                if is_coinbase(tx) || is_coinstake(tx) {
                    continue;
                }
                let mut state = ValidationState::new();
                if let Err(err) = self.accept_to_memory_pool(tx, &mut state) {
                    debug!("not resubmitting {}: {}", hex::encode(tx.hash()), err);
                }
            }
        }

        for wallet in &self.wallets {
            for block in &switch.disconnected {
                for tx in &block.transactions {
                    wallet.sync_transaction(tx, None, false);
                }
            }
            for connected in &switch.connected {
                let block_hash = connected.block.hash();
                for tx in &connected.block.transactions {
                    wallet.sync_transaction(tx, Some(block_hash), true);
                }
            }
            wallet.set_best_chain(&BlockLocator::from_best(&self.tree));
        }
        Ok(switch)
    }

    /// ConnectBlock on an indexed block whose parent is the best block.
    ///
    /// With `just_check` everything is validated and nothing is kept.
    pub fn connect_block(&mut self, id: BlockId, just_check: bool) -> Result<BlockConnection> {
        let index = self.tree.get(id);
        if index.prev != self.tree.best() {
            return Err(ConsensusError::BlockValidation(format!(
                "block {} does not extend the best chain",
                hex::encode(index.hash)
            )));
        }
        if just_check {
            let block = self
                .store
                .read_block(index.file, index.block_pos)
                .map_err(ConsensusError::Storage)?;
            let position = BlockPosition { file: index.file, block_pos: index.block_pos };
            return self.stage_block(&block, position);
        }

        let mut switch = self.set_best_chain(id)?;
        switch
            .connected
            .pop()
            .map(|connected| connected.connection)
            .ok_or_else(|| ConsensusError::BlockValidation("nothing connected".to_string()))
    }

    /// Validates a candidate block on top of the best block without storing
    /// or committing anything
    pub fn check_block_template(&mut self, block: &Block) -> Result<BlockConnection> {
        check_block(block, &self.params, self.adjusted_time())?;
        let position = BlockPosition { file: MEMPOOL_TX_POS.file, block_pos: MEMPOOL_TX_POS.block_pos };
        self.stage_block(block, position)
    }

    /// Connects `block` on the best block and rolls every effect back
    fn stage_block(&mut self, block: &Block, position: BlockPosition) -> Result<BlockConnection> {
        let parent = self.best().map(ChainState::from_index);
        let mut test_pool = TestPool::new();
        let checkpoint = self.registries.checkpoint();
        let ctx = BlockContext {
            store: &self.store,
            heights: &self.tree,
            verifier: self.verifier.as_ref(),
            params: &self.params,
            context: ValidationContext::Miner,
        };
        let result = connect_block(block, position, parent.as_ref(), &mut test_pool, &mut self.registries, &ctx);
        self.registries.rollback(checkpoint);
        result
    }

    /// AcceptToMemoryPool: 𝒯𝒳 → pool
    ///
    /// 1. CheckTransaction; no coinbase or coinstake
    /// 2. IsStandardTx unless non-standard relay is enabled
    /// 3. not already pooled or confirmed; no input spent by a pooled tx
    /// 4. no pooled registration of the same alias, asset id or names
    /// 5. FetchInputs against store + pool, CheckIoValue, registries
    /// 6. ConnectInputs in mempool context (scripts, maturity, spent)
    ///
    /// Failures are scored into `state`.
    pub fn accept_to_memory_pool(&self, tx: &Transaction, state: &mut ValidationState) -> Result<()> {
        let result = self.check_for_memory_pool(tx);
        let result = state.observe(result);
        match &result {
            Ok(()) => {
                let hash = tx.hash();
                self.mempool.add_unchecked(hash, tx.clone());
                for wallet in &self.wallets {
                    wallet.sync_transaction(tx, None, true);
                }
                debug!("accepted {} to memory pool", hex::encode(hash));
            }
            Err(err) => debug!("rejected {}: {}", hex::encode(tx.hash()), err),
        }
        result
    }

    fn check_for_memory_pool(&self, tx: &Transaction) -> Result<()> {
        check_transaction(tx)?;
        if matches!(tx.tx_type, TxType::Coinbase | TxType::Coinstake) {
            return Err(ConsensusError::Malformed(format!(
                "{} as individual transaction",
                tx.tx_type.as_str()
            )));
        }
        let next_height = self.best_height() + 1;
        if !self.params.accept_non_standard {
            is_standard_tx(tx, next_height, self.adjusted_time()).map_err(ConsensusError::NonStandard)?;
        }

        let hash = tx.hash();
        if self.mempool.exists(&hash) {
            return Err(ConsensusError::Duplicate(format!("{} already in memory pool", hex::encode(hash))));
        }
        if self.store.get_tx_index(&hash).map_err(ConsensusError::Storage)?.is_some() {
            return Err(ConsensusError::Duplicate(format!("{} already confirmed", hex::encode(hash))));
        }
        for input in &tx.inputs {
            if let Some(spender) = self.mempool.spender_of(&input.prevout) {
                return Err(ConsensusError::DoubleSpend(format!(
                    "{}:{} already spent by pooled {}:{}",
                    hex::encode(input.prevout.hash),
                    input.prevout.index,
                    hex::encode(spender.hash),
                    spender.index
                )));
            }
        }
        self.check_pooled_registrations(tx)?;

        let mut fetched = {
            let test_pool = TestPool::new();
            let view = UtxoView {
                store: &self.store,
                test_pool: &test_pool,
                pending: &self.mempool,
                context: ValidationContext::Mempool,
            };
            fetch_inputs(tx, &view)?
        };
        if fetched.invalid {
            return Err(ConsensusError::Malformed(format!(
                "{} spends a nonexistent output",
                hex::encode(hash)
            )));
        }

        check_io_value(tx, &fetched.inputs, self.params.min_relay_fee_per_kb)?;
        self.registries.check(tx, &fetched.inputs)?;

        let spend = SpendContext {
            verifier: self.verifier.as_ref(),
            params: &self.params,
            heights: &self.tree,
            spend_height: next_height,
            context: ValidationContext::Mempool,
        };
        let mut unused = TestPool::new();
        connect_inputs(tx, &mut fetched.inputs, &mut unused, MEMPOOL_TX_POS, &spend)
    }

    fn check_pooled_registrations(&self, tx: &Transaction) -> Result<()> {
        let collides = match tx.tx_type {
            TxType::RegisterAlias => {
                let alias = parse_alias(&tx.payload)?;
                self.mempool.alias_exists(&alias)
            }
            TxType::RegisterAsset => {
                let payload = AssetPayload::parse(&tx.payload)?;
                self.mempool.asset_exists(
                    tx.outputs[0].asset_id,
                    &payload.english_name,
                    &payload.local_name,
                    &payload.symbol,
                )
            }
            TxType::ReissueAsset => self.mempool.asset_exists(tx.outputs[0].asset_id, "", "", ""),
            _ => false,
        };
        if collides {
            return Err(ConsensusError::Duplicate(format!(
                "{} collides with a pooled registration",
                hex::encode(tx.hash())
            )));
        }
        Ok(())
    }
}

impl ConfirmedTransaction {
    /// Confirmations of the block holding this transaction; 0 when that
    /// block is unknown, off the main chain, or the branch does not check
    pub fn depth_in_main_chain<S: LedgerStore>(&self, ledger: &Ledger<S>) -> u32 {
        let tree = ledger.tree();
        let Some(id) = tree.id_of(&self.block_hash) else {
            return 0;
        };
        if !tree.is_in_main_chain(id) {
            return 0;
        }
        let index = tree.get(id);
        if !self.verify_in_block(&index.merkle_root) {
            return 0;
        }
        ledger.best_height() - index.height + 1
    }
}
