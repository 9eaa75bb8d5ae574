//! Asset and alias registration through the mempool and blocks

mod common;

use asset_consensus::payload::{chargeable_length, encode_entry, AssetPayload};
use asset_consensus::*;
use common::*;

fn names(english: &str, local: &str, symbol: &str) -> Vec<String> {
    AssetPayload {
        english_name: english.to_string(),
        local_name: local.to_string(),
        symbol: symbol.to_string(),
        description: "test asset".to_string(),
    }
    .to_payload()
}

fn payload_cost(payload: &[String]) -> Amount {
    chargeable_length(payload, false) as Amount * TX_PAYLOAD_PER_CHAR_COST
}

/// Miner registers `asset_id` funded by genesis output `n`
fn register_asset(chain: &mut TestChain, n: u32, asset_id: AssetId, amount: Amount, payload: Vec<String>) -> Transaction {
    let from = chain.genesis_outpoint(n);
    let change = GENESIS_OUTPUT - MIN_REGISTER_ASSET_COST - payload_cost(&payload) - FEE;
    let miner_lock = chain.miner.lock_script();
    chain.build_tx(
        TxType::RegisterAsset,
        &[from],
        vec![TxOutput::new(asset_id, amount, miner_lock.clone()), TxOutput::base(change, miner_lock)],
        payload,
        &Key::new(1),
    )
}

/// Miner registers `alias` for `owner`, handing it `gift` to spend later
fn register_alias(chain: &mut TestChain, n: u32, alias: &str, owner: &Key, gift: Amount) -> Transaction {
    let from = chain.genesis_outpoint(n);
    let payload = vec![encode_entry(alias)];
    let change = GENESIS_OUTPUT - gift - MIN_REGISTER_ALIAS_COST - payload_cost(&payload) - FEE;
    let miner_lock = chain.miner.lock_script();
    chain.build_tx(
        TxType::RegisterAlias,
        &[from],
        vec![TxOutput::base(gift, owner.lock_script()), TxOutput::base(change, miner_lock)],
        payload,
        &Key::new(1),
    )
}

#[test]
fn test_register_asset_then_duplicate_refused() {
    let mut chain = TestChain::new();
    let registration = register_asset(&mut chain, 0, 1003, 1, names("Gold", "Oro", "GLD"));

    let mut state = ValidationState::new();
    chain.ledger.accept_to_memory_pool(&registration, &mut state).unwrap();
    assert!(chain.ledger.mempool().exists(&registration.hash()));

    chain.mine(vec![registration.clone()]).unwrap();
    assert!(chain.ledger.mempool().is_empty());
    let record = chain.ledger.registries().assets.get(1003).unwrap();
    assert_eq!(record.symbol, "GLD");
    assert_eq!(record.supply, 1);
    assert_eq!(record.publisher, chain.miner.lock_script());
    assert_eq!(chain.tip().asset_type_count, 1);

    // Same id under fresh names
    let duplicate = register_asset(&mut chain, 1, 1003, 1, names("Silver", "Plata", "SLV"));
    let err = chain.ledger.accept_to_memory_pool(&duplicate, &mut state).unwrap_err();
    assert!(matches!(err, ConsensusError::Duplicate(_)));
    assert_eq!(state.misbehavior(), 0);

    let best = chain.tip().hash;
    let err = chain.mine(vec![duplicate]).unwrap_err();
    assert!(matches!(err, ConsensusError::Duplicate(_)));
    assert_eq!(chain.tip().hash, best);
    assert_eq!(chain.ledger.registries().asset_type_count(), 1);
}

#[test]
fn test_duplicate_names_refused() {
    let mut chain = TestChain::new();
    let registration = register_asset(&mut chain, 0, 1001, 500, names("Gold", "Oro", "GLD"));
    chain.mine(vec![registration]).unwrap();

    let same_symbol = register_asset(&mut chain, 1, 2001, 500, names("Silver", "Plata", "GLD"));
    let mut state = ValidationState::new();
    assert!(matches!(
        chain.ledger.accept_to_memory_pool(&same_symbol, &mut state),
        Err(ConsensusError::Duplicate(_))
    ));
}

#[test]
fn test_same_block_duplicate_refused() {
    let mut chain = TestChain::new();
    let first = register_asset(&mut chain, 0, 1003, 1, names("Gold", "Oro", "GLD"));
    let second = register_asset(&mut chain, 1, 1003, 1, names("Silver", "Plata", "SLV"));

    let err = chain.mine(vec![first, second]).unwrap_err();
    assert!(matches!(err, ConsensusError::Duplicate(_)));
    assert_eq!(chain.tip().height, 0);
    assert!(chain.ledger.registries().assets.is_empty());
}

#[test]
fn test_pooled_registration_blocks_second() {
    let mut chain = TestChain::new();
    let first = register_asset(&mut chain, 0, 1003, 1, names("Gold", "Oro", "GLD"));
    let second = register_asset(&mut chain, 1, 2003, 1, names("Gold", "Ouro", "GLDB"));

    let mut state = ValidationState::new();
    chain.ledger.accept_to_memory_pool(&first, &mut state).unwrap();
    assert!(matches!(
        chain.ledger.accept_to_memory_pool(&second, &mut state),
        Err(ConsensusError::Duplicate(_))
    ));
    assert_eq!(chain.ledger.mempool().len(), 1);
}

#[test]
fn test_registration_without_fee_refused() {
    let mut chain = TestChain::new();
    let from = chain.genesis_outpoint(0);
    let payload = names("Gold", "Oro", "GLD");
    // Keeps the registration fee as change
    let change = GENESIS_OUTPUT - payload_cost(&payload) - FEE;
    let miner_lock = chain.miner.lock_script();
    let tx = chain.build_tx(
        TxType::RegisterAsset,
        &[from],
        vec![TxOutput::new(1001, 10, miner_lock.clone()), TxOutput::base(change, miner_lock)],
        payload,
        &Key::new(1),
    );

    let mut state = ValidationState::new();
    let err = chain.ledger.accept_to_memory_pool(&tx, &mut state).unwrap_err();
    assert!(matches!(err, ConsensusError::ValueImbalance(_)));
    assert_eq!(state.misbehavior(), 100);
}

#[test]
fn test_reissue_by_publisher() {
    let mut chain = TestChain::new();
    let registration = register_asset(&mut chain, 0, 1001, 500, names("Gold", "Oro", "GLD"));
    chain.mine(vec![registration]).unwrap();

    let from = chain.genesis_outpoint(1);
    let miner_lock = chain.miner.lock_script();
    let reissue = chain.build_tx(
        TxType::ReissueAsset,
        &[from],
        vec![TxOutput::new(1001, 250, miner_lock.clone()), TxOutput::base(GENESIS_OUTPUT - FEE, miner_lock)],
        Vec::new(),
        &Key::new(1),
    );
    chain.mine(vec![reissue]).unwrap();
    assert_eq!(chain.ledger.registries().assets.get(1001).unwrap().supply, 750);
}

#[test]
fn test_reissue_by_stranger_refused() {
    let mut chain = TestChain::new();
    let registration = register_asset(&mut chain, 0, 1001, 500, names("Gold", "Oro", "GLD"));
    let stranger = Key::new(7);
    let payment = chain.pay(chain.genesis_outpoint(1), 100 * COIN, stranger.lock_script());
    chain.mine(vec![registration, payment.clone()]).unwrap();

    let from = OutPoint::new(payment.hash(), 0);
    let reissue = chain.build_tx(
        TxType::ReissueAsset,
        &[from],
        vec![TxOutput::new(1001, 250, stranger.lock_script()), TxOutput::base(100 * COIN - FEE, stranger.lock_script())],
        Vec::new(),
        &stranger,
    );
    let mut state = ValidationState::new();
    assert!(matches!(
        chain.ledger.accept_to_memory_pool(&reissue, &mut state),
        Err(ConsensusError::Malformed(_))
    ));
    assert!(chain.mine(vec![reissue]).is_err());
    assert_eq!(chain.ledger.registries().assets.get(1001).unwrap().supply, 500);
}

#[test]
fn test_alias_register_and_transfer() {
    let mut chain = TestChain::new();
    let carol = Key::new(2);
    let dave = Key::new(3);
    let registration = register_alias(&mut chain, 0, "carol", &carol, 50 * COIN);
    chain.mine(vec![registration.clone()]).unwrap();
    assert_eq!(chain.ledger.registries().aliases.owner("carol"), Some(&carol.lock_script()));

    let payload = vec![encode_entry("carol")];
    let amount = 50 * COIN - payload_cost(&payload) - FEE;
    let transfer = chain.build_tx(
        TxType::TransferAlias,
        &[OutPoint::new(registration.hash(), 0)],
        vec![TxOutput::base(amount, dave.lock_script())],
        payload,
        &carol,
    );
    let mut state = ValidationState::new();
    chain.ledger.accept_to_memory_pool(&transfer, &mut state).unwrap();
    chain.mine(vec![transfer]).unwrap();
    assert_eq!(chain.ledger.registries().aliases.owner("carol"), Some(&dave.lock_script()));
}

#[test]
fn test_alias_transfer_by_non_owner_refused() {
    let mut chain = TestChain::new();
    let carol = Key::new(2);
    let registration = register_alias(&mut chain, 0, "carol", &carol, 50 * COIN);
    chain.mine(vec![registration]).unwrap();

    // Miner funds the transfer from its own output
    let payload = vec![encode_entry("carol")];
    let amount = GENESIS_OUTPUT - payload_cost(&payload) - FEE;
    let miner_lock = chain.miner.lock_script();
    let from = chain.genesis_outpoint(1);
    let transfer = chain.build_tx(TxType::TransferAlias, &[from], vec![TxOutput::base(amount, miner_lock)], payload, &Key::new(1));

    let mut state = ValidationState::new();
    assert!(matches!(
        chain.ledger.accept_to_memory_pool(&transfer, &mut state),
        Err(ConsensusError::Malformed(_))
    ));
    assert_eq!(chain.ledger.registries().aliases.owner("carol"), Some(&carol.lock_script()));
}

#[test]
fn test_alias_duplicate_refused() {
    let mut chain = TestChain::new();
    let carol = Key::new(2);
    let first = register_alias(&mut chain, 0, "carol", &carol, 50 * COIN);
    let mut state = ValidationState::new();
    chain.ledger.accept_to_memory_pool(&first, &mut state).unwrap();

    let second = register_alias(&mut chain, 1, "carol", &Key::new(3), 50 * COIN);
    assert!(matches!(
        chain.ledger.accept_to_memory_pool(&second, &mut state),
        Err(ConsensusError::Duplicate(_))
    ));

    chain.mine(vec![first]).unwrap();
    assert!(matches!(chain.mine(vec![second]), Err(ConsensusError::Duplicate(_))));
}

#[test]
fn test_registration_undone_by_reorg() {
    let mut chain = TestChain::new();
    let genesis_hash = chain.genesis.hash();
    let registration = register_asset(&mut chain, 0, 1003, 1, names("Gold", "Oro", "GLD"));
    chain.mine(vec![registration.clone()]).unwrap();
    assert_eq!(chain.ledger.registries().asset_type_count(), 1);

    let b1 = chain.block_after(genesis_hash, Vec::new(), 1, 0);
    chain.submit(&b1).unwrap();
    let b2 = chain.block_after(b1.hash(), Vec::new(), 1, 0);
    chain.submit(&b2).unwrap();

    assert_eq!(chain.tip().hash, b2.hash());
    assert!(chain.ledger.registries().assets.is_empty());
    assert_eq!(chain.tip().asset_type_count, 0);
    // Back in the pool, waiting for the new branch
    assert!(chain.ledger.mempool().exists(&registration.hash()));
}

#[test]
fn test_failed_reorg_keeps_registrations() {
    let mut chain = TestChain::new();
    let genesis_hash = chain.genesis.hash();
    let registration = register_asset(&mut chain, 0, 1003, 1, names("Gold", "Oro", "GLD"));
    let a1 = chain.mine(vec![registration]).unwrap();
    let b1 = chain.block_after(genesis_hash, Vec::new(), 1, 0);
    let b1_id = chain.ledger.process_block(&b1).unwrap();

    chain.ledger.store_mut().set_fail_writes(true);
    assert!(matches!(chain.ledger.set_best_chain(b1_id), Err(ConsensusError::Storage(_))));
    assert_eq!(chain.tip().hash, a1.hash());
    assert_eq!(chain.ledger.registries().assets.get(1003).unwrap().symbol, "GLD");

    // The unwound switch left the names taken
    chain.ledger.store_mut().set_fail_writes(false);
    let duplicate = register_asset(&mut chain, 1, 2003, 1, names("Silver", "Plata", "GLD"));
    let mut state = ValidationState::new();
    assert!(matches!(
        chain.ledger.accept_to_memory_pool(&duplicate, &mut state),
        Err(ConsensusError::Duplicate(_))
    ));
}
