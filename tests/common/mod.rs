//! Chain builder shared by the integration tests
//!
//! Builds a regtest ledger whose genesis pays four outputs to a miner key,
//! and blocks whose coinbase pays exactly reward + relay fees.

#![allow(dead_code)]

use std::collections::HashMap;

use asset_consensus::block_index::BlockIndex;
use asset_consensus::economic::{block_reward, SupplyState};
use asset_consensus::merkle::merkle_root;
use asset_consensus::script::{hash160, p2pkh_lock_script, p2pkh_unlock_script, signature_hash};
use asset_consensus::transaction::not_size_fee_change;
use asset_consensus::*;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};

pub const GENESIS_TIME: u32 = 1_000_000;
pub const BLOCK_SPACING: u32 = 60;
pub const GENESIS_OUTPUT: Amount = 2_500 * COIN;
pub const GENESIS_OUTPUTS: usize = 4;
/// Relay fee every test transaction leaves
pub const FEE: Amount = COIN / 100;

pub struct Key {
    secp: Secp256k1<All>,
    secret: SecretKey,
    pub pubkey: Vec<u8>,
}

impl Key {
    pub fn new(seed: u8) -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
        let pubkey = PublicKey::from_secret_key(&secp, &secret).serialize().to_vec();
        Self { secp, secret, pubkey }
    }

    pub fn lock_script(&self) -> ByteString {
        p2pkh_lock_script(&hash160(&self.pubkey))
    }

    /// Signs every input as a pay-to-pubkey-hash spend
    pub fn sign(&self, tx: &mut Transaction) {
        for i in 0..tx.inputs.len() {
            let digest = signature_hash(tx, i);
            let message = Message::from_digest_slice(&digest).unwrap();
            let signature = self.secp.sign_ecdsa(&message, &self.secret);
            tx.inputs[i].unlock_script = p2pkh_unlock_script(&signature.serialize_der(), &self.pubkey);
        }
    }
}

pub fn coinbase_tx(height: u32, extra: u8, time: u32, outputs: Vec<TxOutput>) -> Transaction {
    let mut unlock = height.to_le_bytes().to_vec();
    unlock.push(extra);
    Transaction::new(TxType::Coinbase, time, vec![TxInput::new(OutPoint::null(), unlock)], outputs)
}

pub fn make_block(prev: Hash, time: u32, transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: CURRENT_BLOCK_VERSION,
            prev_block_hash: prev,
            merkle_root: merkle_root(&transactions),
            timestamp: time,
            bits: 0,
            nonce: 0,
        },
        transactions,
        signature: Vec::new(),
    }
}

pub struct TestChain {
    pub ledger: Ledger<MemoryStore>,
    pub miner: Key,
    pub genesis: Block,
    outputs: HashMap<OutPoint, TxOutput>,
}

impl TestChain {
    pub fn new() -> Self {
        let miner = Key::new(1);
        let mut ledger = Ledger::with_standard_verifier(MemoryStore::new(), ChainParams::regtest());
        let coinbase = coinbase_tx(
            0,
            0,
            GENESIS_TIME,
            vec![TxOutput::base(GENESIS_OUTPUT, miner.lock_script()); GENESIS_OUTPUTS],
        );
        let genesis = make_block(NULL_HASH, GENESIS_TIME, vec![coinbase]);
        ledger.init_genesis(&genesis).unwrap();

        let mut chain = Self { ledger, miner, genesis, outputs: HashMap::new() };
        let coinbase = chain.genesis.transactions[0].clone();
        chain.track(&coinbase);
        chain
    }

    pub fn tip(&self) -> &BlockIndex {
        self.ledger.best().unwrap()
    }

    pub fn tip_time(&self) -> u32 {
        self.tip().time
    }

    pub fn genesis_outpoint(&self, n: u32) -> OutPoint {
        OutPoint::new(self.genesis.transactions[0].hash(), n)
    }

    pub fn track(&mut self, tx: &Transaction) {
        let hash = tx.hash();
        for (n, output) in tx.outputs.iter().enumerate() {
            self.outputs.insert(OutPoint::new(hash, n as u32), output.clone());
        }
    }

    pub fn output(&self, outpoint: &OutPoint) -> TxOutput {
        self.outputs[outpoint].clone()
    }

    /// Signed transaction spending `inputs`, timestamped at the tip
    pub fn build_tx(
        &mut self,
        tx_type: TxType,
        inputs: &[OutPoint],
        outputs: Vec<TxOutput>,
        payload: Vec<String>,
        signer: &Key,
    ) -> Transaction {
        let mut tx = Transaction::new(
            tx_type,
            self.tip_time(),
            inputs.iter().map(|prevout| TxInput::new(*prevout, Vec::new())).collect(),
            outputs,
        );
        tx.payload = payload;
        signer.sign(&mut tx);
        self.track(&tx);
        tx
    }

    /// Miner-signed base transfer paying `amount` to `to`, change back to the
    /// miner after `FEE`
    pub fn pay(&mut self, from: OutPoint, amount: Amount, to: ByteString) -> Transaction {
        let change = self.output(&from).amount - amount - FEE;
        let miner_lock = self.miner.lock_script();
        let signer = Key::new(1);
        self.build_tx(
            TxType::TransferBase,
            &[from],
            vec![TxOutput::base(amount, to), TxOutput::base(change, miner_lock)],
            Vec::new(),
            &signer,
        )
    }

    /// Base value `tx` leaves above its registration, payload and donation fees
    pub fn relay_fee(&self, tx: &Transaction) -> Amount {
        if matches!(tx.tx_type, TxType::Coinbase | TxType::Coinstake) {
            return 0;
        }
        let base_in: Amount = tx
            .inputs
            .iter()
            .map(|input| self.outputs[&input.prevout].amount_of(BASE_ASSET_ID))
            .sum();
        let base_out: Amount = tx.outputs.iter().map(|o| o.amount_of(BASE_ASSET_ID)).sum();
        base_in - base_out - not_size_fee_change(tx).unwrap()
    }

    /// PoW block on `parent` whose coinbase pays reward + fees + `overpay`
    pub fn block_after(&self, parent: Hash, transactions: Vec<Transaction>, extra: u8, overpay: Amount) -> Block {
        let tree = self.ledger.tree();
        let parent_index = tree.get(tree.id_of(&parent).unwrap());
        let height = parent_index.height + 1;
        let time = parent_index.time + BLOCK_SPACING;
        let supply = SupplyState {
            money_supply: parent_index.money_supply,
            pow_pool: parent_index.pow_pool,
            pos_pool: parent_index.pos_pool,
        };
        let reward = block_reward(false, parent_index.pow_height + 1, &supply);
        let fees: Amount = transactions.iter().map(|tx| self.relay_fee(tx)).sum();

        let coinbase = coinbase_tx(
            height,
            extra,
            time,
            vec![TxOutput::base(reward.total() + fees + overpay, self.miner.lock_script())],
        );
        let mut all = vec![coinbase];
        all.extend(transactions);
        make_block(parent, time, all)
    }

    pub fn next_block(&self, transactions: Vec<Transaction>) -> Block {
        self.block_after(self.tip().hash, transactions, 0, 0)
    }

    /// Builds and processes the next block, tracking its outputs
    pub fn mine(&mut self, transactions: Vec<Transaction>) -> Result<Block> {
        let block = self.next_block(transactions);
        self.submit(&block)?;
        Ok(block)
    }

    pub fn submit(&mut self, block: &Block) -> Result<()> {
        self.ledger.process_block(block)?;
        for tx in &block.transactions {
            self.track(tx);
        }
        Ok(())
    }
}
