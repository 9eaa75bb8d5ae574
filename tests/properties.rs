//! Property tests for value conservation, asset-id legality and the codec

use asset_consensus::economic::{check_io_value, min_tx_fee};
use asset_consensus::payload::{encode_entry, Donation, DonationPool};
use asset_consensus::serialize::{Decodable, Encodable};
use asset_consensus::transaction::{is_legal_asset_id, is_register_asset, payload_fee};
use asset_consensus::utxo::MapPrevTx;
use asset_consensus::*;
use proptest::prelude::*;

fn spend_of(amount: Amount, outputs: Vec<TxOutput>) -> (Transaction, MapPrevTx) {
    let prev = Transaction::new(TxType::TransferBase, 1, vec![TxInput::new(OutPoint::new([1; 32], 0), vec![1])], vec![TxOutput::base(amount, vec![0x51])]);
    let tx = Transaction::new(TxType::TransferBase, 2, vec![TxInput::new(OutPoint::new(prev.hash(), 0), vec![1])], outputs);
    let mut inputs = MapPrevTx::new();
    inputs.insert(prev.hash(), (TxIndex::new(DiskTxPos::new(1, 0, 0), 1), prev));
    (tx, inputs)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, failure_persistence: None, .. ProptestConfig::default() })]

    #[test]
    fn prop_relay_fee_boundary(input in CENT..10_000 * COIN, fee in 0i64..3 * MIN_TX_PER_K_FEE) {
        let (tx, inputs) = spend_of(input, vec![TxOutput::base(input - fee, vec![0x51])]);
        let required = min_tx_fee(tx.serialized_size(), MIN_TX_PER_K_FEE);
        match check_io_value(&tx, &inputs, MIN_TX_PER_K_FEE) {
            Ok(relay_fee) => {
                prop_assert!(fee >= required);
                prop_assert_eq!(relay_fee, fee);
            }
            Err(err) => {
                prop_assert!(fee < required);
                prop_assert!(matches!(err, ConsensusError::ValueImbalance(_)));
            }
        }
    }

    #[test]
    fn prop_outputs_above_inputs_refused(input in 1i64..10_000 * COIN, extra in 1i64..COIN) {
        let (tx, inputs) = spend_of(input, vec![TxOutput::base(input + extra, vec![0x51])]);
        prop_assert!(matches!(
            check_io_value(&tx, &inputs, MIN_TX_PER_K_FEE),
            Err(ConsensusError::ValueImbalance(_))
        ));
    }

    #[test]
    fn prop_asset_id_suffix(asset_id in 0i64..1_000_000) {
        prop_assert_eq!(is_legal_asset_id(asset_id), asset_id % 100 <= 3);

        let mut tx = Transaction::new(
            TxType::RegisterAsset,
            1,
            vec![TxInput::new(OutPoint::new([2; 32], 0), vec![1])],
            vec![TxOutput::new(asset_id, 1, vec![0x51])],
        );
        tx.payload = ["Gold", "Oro", "GLD", ""].iter().map(|s| encode_entry(s)).collect();
        prop_assert_eq!(is_register_asset(&tx), asset_id > 0 && asset_id % 100 <= 3);
    }

    #[test]
    fn prop_donation_charges_only_memo(coins in 1i64..1_000_000, memo in proptest::option::of("[a-z ]{1,40}")) {
        let donation = Donation { memo: memo.clone(), pool: DonationPool::Pos, amount: coins * COIN };
        let mut tx = Transaction::new(
            TxType::TransferBase,
            1,
            vec![TxInput::new(OutPoint::new([3; 32], 0), vec![1])],
            vec![TxOutput::base(COIN, vec![0x51])],
        );
        tx.payload = donation.to_payload();
        prop_assert_eq!(Donation::parse(&tx.payload), Some(donation));

        let memo_chars = memo.map_or(0, |m| encode_entry(&m).len()) as Amount;
        prop_assert_eq!(payload_fee(&tx), memo_chars * TX_PAYLOAD_PER_CHAR_COST);
    }

    #[test]
    fn prop_transaction_codec_keeps_identity(
        time in any::<u32>(),
        lock_time in any::<u32>(),
        amounts in proptest::collection::vec(0i64..MAX_BASE_SUPPLY, 1..5),
        unlock in proptest::collection::vec(any::<u8>(), 0..80),
        memo in "[a-zA-Z0-9]{0,30}",
    ) {
        let mut tx = Transaction::new(
            TxType::TransferBase,
            time,
            vec![TxInput::new(OutPoint::new([4; 32], 7), unlock)],
            amounts.iter().map(|a| TxOutput::base(*a, vec![0x51])).collect(),
        );
        tx.lock_time = lock_time;
        tx.payload = vec![encode_entry(&memo)];

        let bytes = tx.encode_to_vec();
        prop_assert_eq!(bytes.len(), tx.serialized_size());
        let decoded = Transaction::decode_from_slice(&bytes).unwrap();
        prop_assert_eq!(decoded.hash(), tx.hash());
        prop_assert_eq!(decoded, tx);
    }
}
