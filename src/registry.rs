//! Asset and alias registries
//!
//! Registrations are globally unique across everything ever confirmed. Every
//! change made through [`Registries`] is journaled, so a failed block or
//! reorganization rolls back to a checkpoint instead of working on a copy.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::MAX_ASSET_SUPPLY;
use crate::economic::add_amounts;
use crate::error::{ConsensusError, Result};
use crate::payload::{parse_alias, AssetPayload};
use crate::types::*;
use crate::utxo::{prev_output, MapPrevTx};

/// A registered secondary asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: AssetId,
    pub english_name: String,
    pub local_name: String,
    pub symbol: String,
    pub description: String,
    /// Lock script of the registering transaction's first input
    pub publisher: ByteString,
    pub supply: Amount,
    pub registered_by: Hash,
}

impl AssetRecord {
    pub fn suffix(&self) -> i64 {
        self.asset_id % 100
    }

    pub fn is_reissuable(&self) -> bool {
        matches!(self.suffix(), 1 | 2)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    assets: BTreeMap<AssetId, AssetRecord>,
    by_english: HashMap<String, AssetId>,
    by_local: HashMap<String, AssetId>,
    by_symbol: HashMap<String, AssetId>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, asset_id: AssetId) -> Option<&AssetRecord> {
        self.assets.get(&asset_id)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Id or any of the three names already taken
    pub fn check_available(&self, asset_id: AssetId, payload: &AssetPayload) -> Result<()> {
        let taken = if self.assets.contains_key(&asset_id) {
            Some(format!("asset id {}", asset_id))
        } else if self.by_english.contains_key(&payload.english_name) {
            Some(format!("english name {:?}", payload.english_name))
        } else if self.by_local.contains_key(&payload.local_name) {
            Some(format!("local name {:?}", payload.local_name))
        } else if self.by_symbol.contains_key(&payload.symbol) {
            Some(format!("symbol {:?}", payload.symbol))
        } else {
            None
        };
        match taken {
            Some(what) => Err(ConsensusError::Duplicate(format!("{} already registered", what))),
            None => Ok(()),
        }
    }

    pub fn register(&mut self, record: AssetRecord) -> Result<()> {
        let payload = AssetPayload {
            english_name: record.english_name.clone(),
            local_name: record.local_name.clone(),
            symbol: record.symbol.clone(),
            description: record.description.clone(),
        };
        self.check_available(record.asset_id, &payload)?;
        self.restore(record);
        Ok(())
    }

    fn restore(&mut self, record: AssetRecord) {
        self.by_english.insert(record.english_name.clone(), record.asset_id);
        self.by_local.insert(record.local_name.clone(), record.asset_id);
        self.by_symbol.insert(record.symbol.clone(), record.asset_id);
        self.assets.insert(record.asset_id, record);
    }

    pub fn unregister(&mut self, asset_id: AssetId) -> Option<AssetRecord> {
        let record = self.assets.remove(&asset_id)?;
        self.by_english.remove(&record.english_name);
        self.by_local.remove(&record.local_name);
        self.by_symbol.remove(&record.symbol);
        Some(record)
    }

    /// A reissue of `amount` by `issuer` is allowed
    pub fn check_reissue(&self, asset_id: AssetId, issuer: &[u8], amount: Amount) -> Result<()> {
        let record = self.assets.get(&asset_id).ok_or_else(|| {
            ConsensusError::Malformed(format!("reissue of unknown asset {}", asset_id))
        })?;
        if !record.is_reissuable() {
            return Err(ConsensusError::Malformed(format!(
                "asset {} is not reissuable",
                asset_id
            )));
        }
        if record.publisher != issuer {
            return Err(ConsensusError::Malformed(format!(
                "reissue of asset {} not signed by its publisher",
                asset_id
            )));
        }
        let supply = add_amounts(record.supply, amount)?;
        if supply > MAX_ASSET_SUPPLY {
            return Err(ConsensusError::Malformed(format!(
                "asset {} supply {} above maximum",
                asset_id, supply
            )));
        }
        Ok(())
    }

    fn adjust_supply(&mut self, asset_id: AssetId, delta: Amount) -> Result<()> {
        let record = self.assets.get_mut(&asset_id).ok_or_else(|| {
            ConsensusError::BlockValidation(format!("asset {} not registered", asset_id))
        })?;
        record.supply = record
            .supply
            .checked_add(delta)
            .filter(|s| *s >= 0)
            .ok_or_else(|| ConsensusError::BlockValidation(format!("asset {} supply underflow", asset_id)))?;
        Ok(())
    }
}

/// Alias → owner lock scripts, oldest first
#[derive(Debug, Clone, Default)]
pub struct AliasRegistry {
    owners: HashMap<String, Vec<ByteString>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self, alias: &str) -> Option<&ByteString> {
        self.owners.get(alias).and_then(|history| history.last())
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.owners.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn register(&mut self, alias: &str, owner: ByteString) -> Result<()> {
        self.check_register(alias)?;
        self.push_owner(alias, owner);
        Ok(())
    }

    pub fn check_register(&self, alias: &str) -> Result<()> {
        if self.contains(alias) {
            return Err(ConsensusError::Duplicate(format!("alias {:?} already registered", alias)));
        }
        Ok(())
    }

    /// `current_owner` holds `alias`
    pub fn check_transfer(&self, alias: &str, current_owner: &[u8]) -> Result<()> {
        let owner = self
            .owner(alias)
            .ok_or_else(|| ConsensusError::Malformed(format!("transfer of unknown alias {:?}", alias)))?;
        if owner.as_slice() != current_owner {
            return Err(ConsensusError::Malformed(format!(
                "transfer of alias {:?} not signed by its owner",
                alias
            )));
        }
        Ok(())
    }

    pub fn transfer(&mut self, alias: &str, current_owner: &[u8], new_owner: ByteString) -> Result<()> {
        self.check_transfer(alias, current_owner)?;
        self.push_owner(alias, new_owner);
        Ok(())
    }

    /// Reverts the latest registration or transfer of `alias`, returning the
    /// owner it removed
    pub fn undo(&mut self, alias: &str) -> Result<ByteString> {
        self.pop_owner(alias)
            .ok_or_else(|| ConsensusError::BlockValidation(format!("alias {:?} not registered", alias)))
    }

    fn push_owner(&mut self, alias: &str, owner: ByteString) {
        self.owners.entry(alias.to_string()).or_default().push(owner);
    }

    fn pop_owner(&mut self, alias: &str) -> Option<ByteString> {
        let history = self.owners.get_mut(alias)?;
        let owner = history.pop();
        if history.is_empty() {
            self.owners.remove(alias);
        }
        owner
    }
}

/// A registry change, kept so it can be rolled back
#[derive(Debug, Clone)]
enum Change {
    AssetRegistered(AssetId),
    AssetUnregistered(AssetRecord),
    SupplyAdjusted(AssetId, Amount),
    AliasOwnerPushed(String),
    AliasOwnerPopped(String, ByteString),
}

/// Journal position returned by [`Registries::checkpoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Both registries, applied and reverted per transaction
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub assets: AssetRegistry,
    pub aliases: AliasRegistry,
    journal: Vec<Change>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the registration effects of `tx` against the registries
    /// without applying them
    pub fn check(&self, tx: &Transaction, inputs: &MapPrevTx) -> Result<()> {
        match tx.tx_type {
            TxType::RegisterAsset => {
                let payload = AssetPayload::parse(&tx.payload)?;
                first_input_owner(tx, inputs)?;
                self.assets.check_available(tx.outputs[0].asset_id, &payload)
            }
            TxType::ReissueAsset => {
                let minted = &tx.outputs[0];
                let issuer = first_input_owner(tx, inputs)?;
                self.assets.check_reissue(minted.asset_id, &issuer, minted.amount)
            }
            TxType::RegisterAlias => self.aliases.check_register(&parse_alias(&tx.payload)?),
            TxType::TransferAlias => {
                let alias = parse_alias(&tx.payload)?;
                let current = first_input_owner(tx, inputs)?;
                self.aliases.check_transfer(&alias, &current)
            }
            _ => Ok(()),
        }
    }

    /// Applies the registration effects of `tx`. Base and asset transfers
    /// carry none.
    /// Nothing changes when it fails.
    pub fn apply(&mut self, tx: &Transaction, inputs: &MapPrevTx) -> Result<()> {
        self.check(tx, inputs)?;
        match tx.tx_type {
            TxType::RegisterAsset => {
                let payload = AssetPayload::parse(&tx.payload)?;
                let minted = &tx.outputs[0];
                let publisher = first_input_owner(tx, inputs)?;
                debug!("registering asset {} ({})", minted.asset_id, payload.symbol);
                self.assets.register(AssetRecord {
                    asset_id: minted.asset_id,
                    english_name: payload.english_name,
                    local_name: payload.local_name,
                    symbol: payload.symbol,
                    description: payload.description,
                    publisher,
                    supply: minted.amount,
                    registered_by: tx.hash(),
                })?;
                self.journal.push(Change::AssetRegistered(minted.asset_id));
            }
            TxType::ReissueAsset => {
                let minted = &tx.outputs[0];
                self.assets.adjust_supply(minted.asset_id, minted.amount)?;
                self.journal.push(Change::SupplyAdjusted(minted.asset_id, minted.amount));
            }
            TxType::RegisterAlias => {
                let alias = parse_alias(&tx.payload)?;
                self.aliases.register(&alias, tx.outputs[0].lock_script.clone())?;
                self.journal.push(Change::AliasOwnerPushed(alias));
            }
            TxType::TransferAlias => {
                let alias = parse_alias(&tx.payload)?;
                let current = first_input_owner(tx, inputs)?;
                self.aliases.transfer(&alias, &current, tx.outputs[0].lock_script.clone())?;
                self.journal.push(Change::AliasOwnerPushed(alias));
            }
            _ => {}
        }
        Ok(())
    }

    /// Reverts what [`Registries::apply`] did for `tx`
    pub fn undo(&mut self, tx: &Transaction) -> Result<()> {
        match tx.tx_type {
            TxType::RegisterAsset => {
                if let Some(record) = self.assets.unregister(tx.outputs[0].asset_id) {
                    self.journal.push(Change::AssetUnregistered(record));
                }
            }
            TxType::ReissueAsset => {
                let minted = &tx.outputs[0];
                self.assets.adjust_supply(minted.asset_id, -minted.amount)?;
                self.journal.push(Change::SupplyAdjusted(minted.asset_id, -minted.amount));
            }
            TxType::RegisterAlias | TxType::TransferAlias => {
                let alias = parse_alias(&tx.payload)?;
                let owner = self.aliases.undo(&alias)?;
                self.journal.push(Change::AliasOwnerPopped(alias, owner));
            }
            _ => {}
        }
        Ok(())
    }

    /// Marks the current state for a later [`Registries::rollback`]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    /// Reverts every change made since `checkpoint`, newest first
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            let Some(change) = self.journal.pop() else { break };
            match change {
                Change::AssetRegistered(asset_id) => {
                    self.assets.unregister(asset_id);
                }
                Change::AssetUnregistered(record) => self.assets.restore(record),
                Change::SupplyAdjusted(asset_id, delta) => {
                    if let Some(record) = self.assets.assets.get_mut(&asset_id) {
                        record.supply -= delta;
                    }
                }
                Change::AliasOwnerPushed(alias) => {
                    self.aliases.pop_owner(&alias);
                }
                Change::AliasOwnerPopped(alias, owner) => self.aliases.push_owner(&alias, owner),
            }
        }
    }

    /// Keeps every change made so far; the journal starts empty again
    pub fn commit(&mut self) {
        self.journal.clear();
    }

    /// Distinct secondary asset ids registered
    pub fn asset_type_count(&self) -> i64 {
        self.assets.len() as i64
    }
}

fn first_input_owner(tx: &Transaction, inputs: &MapPrevTx) -> Result<ByteString> {
    let first = tx
        .inputs
        .first()
        .ok_or_else(|| ConsensusError::Malformed("no inputs".to_string()))?;
    Ok(prev_output(inputs, &first.prevout)?.lock_script.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::payload::encode_entry;

    const PUBLISHER: &[u8] = &[0xaa, 0x01];
    const STRANGER: &[u8] = &[0xbb, 0x02];

    /// Resolved input map with one output owned by `owner`
    fn inputs_owned_by(owner: &[u8]) -> (MapPrevTx, TxInput) {
        let mut prev = Transaction::new(
            TxType::TransferBase,
            1,
            vec![],
            vec![TxOutput::base(2000 * COIN, owner.to_vec())],
        );
        prev.lock_time = owner[0] as u32;
        let hash = prev.hash();
        let mut map = MapPrevTx::new();
        map.insert(hash, (TxIndex::new(DiskTxPos::new(1, 0, 0), 1), prev));
        (map, TxInput::new(OutPoint::new(hash, 0), vec![]))
    }

    fn asset_payload(name: &str, symbol: &str) -> Vec<String> {
        AssetPayload {
            english_name: name.to_string(),
            local_name: name.to_string(),
            symbol: symbol.to_string(),
            description: String::new(),
        }
        .to_payload()
    }

    fn register_tx(input: TxInput, asset_id: AssetId, amount: Amount, name: &str, symbol: &str) -> Transaction {
        let mut tx = Transaction::new(
            TxType::RegisterAsset,
            2,
            vec![input],
            vec![TxOutput::new(asset_id, amount, vec![1])],
        );
        tx.payload = asset_payload(name, symbol);
        tx
    }

    fn reissue_tx(input: TxInput, asset_id: AssetId, amount: Amount) -> Transaction {
        Transaction::new(TxType::ReissueAsset, 3, vec![input], vec![TxOutput::new(asset_id, amount, vec![1])])
    }

    #[test]
    fn test_register_uniqueness() {
        let (map, input) = inputs_owned_by(PUBLISHER);
        let mut registries = Registries::new();
        registries.apply(&register_tx(input.clone(), 1001, 10, "Alpha", "ALP"), &map).unwrap();
        assert_eq!(registries.asset_type_count(), 1);
        assert_eq!(registries.assets.get(1001).unwrap().publisher, PUBLISHER.to_vec());

        for dup in [
            register_tx(input.clone(), 1001, 10, "Beta", "BET"),
            register_tx(input.clone(), 2001, 10, "Alpha", "BET"),
            register_tx(input.clone(), 2001, 10, "Beta", "ALP"),
        ] {
            assert!(matches!(registries.check(&dup, &map), Err(ConsensusError::Duplicate(_))));
        }
        assert!(registries.check(&register_tx(input, 2001, 10, "Beta", "BET"), &map).is_ok());
        assert_eq!(registries.asset_type_count(), 1);
    }

    #[test]
    fn test_reissue_rules() {
        let (map, input) = inputs_owned_by(PUBLISHER);
        let (stranger_map, stranger_input) = inputs_owned_by(STRANGER);
        let mut registries = Registries::new();
        registries.apply(&register_tx(input.clone(), 1001, 10, "Alpha", "ALP"), &map).unwrap();
        registries.apply(&register_tx(input.clone(), 1000, 10, "Fixed", "FIX"), &map).unwrap();

        registries.apply(&reissue_tx(input.clone(), 1001, 5), &map).unwrap();
        assert_eq!(registries.assets.get(1001).unwrap().supply, 15);

        assert!(registries.check(&reissue_tx(stranger_input, 1001, 5), &stranger_map).is_err());
        assert!(registries.check(&reissue_tx(input.clone(), 1000, 5), &map).is_err());
        assert!(registries.check(&reissue_tx(input.clone(), 3001, 5), &map).is_err());

        registries.undo(&reissue_tx(input, 1001, 5)).unwrap();
        assert_eq!(registries.assets.get(1001).unwrap().supply, 10);
    }

    #[test]
    fn test_alias_register_transfer_undo() {
        let (map, input) = inputs_owned_by(PUBLISHER);
        let (stranger_map, stranger_input) = inputs_owned_by(STRANGER);
        let mut registries = Registries::new();

        let mut register = Transaction::new(
            TxType::RegisterAlias,
            2,
            vec![input.clone()],
            vec![TxOutput::base(COIN, PUBLISHER.to_vec())],
        );
        register.payload = vec![encode_entry("alice")];
        registries.apply(&register, &map).unwrap();
        assert!(matches!(registries.check(&register, &map), Err(ConsensusError::Duplicate(_))));

        let mut transfer = register.clone();
        transfer.tx_type = TxType::TransferAlias;
        transfer.outputs[0].lock_script = STRANGER.to_vec();

        let mut hijack = transfer.clone();
        hijack.inputs = vec![stranger_input];
        assert!(registries.check(&hijack, &stranger_map).is_err());

        registries.apply(&transfer, &map).unwrap();
        assert_eq!(registries.aliases.owner("alice"), Some(&STRANGER.to_vec()));

        registries.undo(&transfer).unwrap();
        assert_eq!(registries.aliases.owner("alice"), Some(&PUBLISHER.to_vec()));
        registries.undo(&register).unwrap();
        assert!(!registries.aliases.contains("alice"));
    }

    #[test]
    fn test_undo_register_frees_names() {
        let (map, input) = inputs_owned_by(PUBLISHER);
        let mut registries = Registries::new();
        let tx = register_tx(input, 1003, 1, "Deed", "DEED");
        registries.apply(&tx, &map).unwrap();
        registries.undo(&tx).unwrap();
        assert!(registries.assets.is_empty());
        assert!(registries.check(&tx, &map).is_ok());
    }

    #[test]
    fn test_rollback_restores_checkpoint() {
        let (map, input) = inputs_owned_by(PUBLISHER);
        let mut registries = Registries::new();
        let gold = register_tx(input.clone(), 1001, 10, "Gold", "GLD");
        let mut alias = Transaction::new(
            TxType::RegisterAlias,
            2,
            vec![input.clone()],
            vec![TxOutput::base(COIN, PUBLISHER.to_vec())],
        );
        alias.payload = vec![encode_entry("alice")];
        registries.apply(&gold, &map).unwrap();
        registries.apply(&alias, &map).unwrap();
        registries.commit();

        let checkpoint = registries.checkpoint();
        registries.undo(&alias).unwrap();
        registries.undo(&gold).unwrap();
        registries.apply(&register_tx(input.clone(), 2001, 5, "Silver", "SLV"), &map).unwrap();
        registries.apply(&reissue_tx(input, 2001, 7), &map).unwrap();
        assert!(registries.assets.get(1001).is_none());
        assert_eq!(registries.assets.get(2001).unwrap().supply, 12);

        registries.rollback(checkpoint);
        assert_eq!(registries.asset_type_count(), 1);
        assert_eq!(registries.assets.get(1001).unwrap().supply, 10);
        assert!(registries.assets.get(2001).is_none());
        assert_eq!(registries.aliases.owner("alice"), Some(&PUBLISHER.to_vec()));
        // Names freed by the rollback can be taken again
        assert!(registries.check(&register_tx(inputs_owned_by(PUBLISHER).1, 2001, 5, "Silver", "SLV"), &map).is_ok());
        assert!(matches!(registries.check(&gold, &map), Err(ConsensusError::Duplicate(_))));
    }

    #[test]
    fn test_failed_apply_changes_nothing() {
        let (map, input) = inputs_owned_by(PUBLISHER);
        let mut registries = Registries::new();
        registries.apply(&register_tx(input.clone(), 1001, 10, "Gold", "GLD"), &map).unwrap();
        let checkpoint = registries.checkpoint();
        assert!(registries.apply(&register_tx(input, 2001, 10, "Gold", "AU"), &map).is_err());
        assert_eq!(registries.checkpoint(), checkpoint);
        assert_eq!(registries.asset_type_count(), 1);
    }
}
