//! Ledger consensus constants

/// Base units per coin
pub const COIN: i64 = 100_000_000;

/// Smallest base-currency unit
pub const CENT: i64 = 1_000_000;

/// No amount larger than this is valid
pub const MAX_MONEY: i64 = i64::MAX;

/// Ceiling on the circulating base currency plus both incentive pools
pub const MAX_BASE_SUPPLY: i64 = 13_888_379 * COIN;

/// Ceiling on the total supply of any issued asset
pub const MAX_ASSET_SUPPLY: i64 = i64::MAX;

/// Reserved asset id of the base currency
pub const BASE_ASSET_ID: i64 = 0;

/// Maximum serialized block size
pub const MAX_BLOCK_SIZE: usize = 2_000_000;

/// Maximum size of mined blocks
pub const MAX_BLOCK_SIZE_GEN: usize = MAX_BLOCK_SIZE / 2;

/// Maximum size of a transaction we relay
pub const MAX_STANDARD_TX_SIZE: usize = MAX_BLOCK_SIZE_GEN / 5;

/// Maximum number of inputs per transaction
pub const MAX_INPUTS: usize = 10_000;

/// Maximum number of outputs per transaction
pub const MAX_OUTPUTS: usize = 10_000;

/// Maximum encoded payload length, per entry and per transaction
pub const MAX_TX_PAYLOAD_LENGTH: usize = 500;

/// Fee charged per encoded payload character
pub const TX_PAYLOAD_PER_CHAR_COST: i64 = COIN / 4;

/// Flat fee for registering a new asset
pub const MIN_REGISTER_ASSET_COST: i64 = 1000 * COIN;

/// Flat fee for registering an alias
pub const MIN_REGISTER_ALIAS_COST: i64 = 10 * COIN;

/// An incentive pool releases 1/REWARD_PERIOD_BLOCKS of its balance per block
pub const REWARD_PERIOD_BLOCKS: i64 = 10_080;

/// An incentive pool pays out only above this balance
pub const MIN_INCENTIVE_POOL_BALANCE: i64 = COIN;

/// Minimum fee per kilobyte, also the minimum fee of any transaction
pub const MIN_TX_PER_K_FEE: i64 = 10_000;

/// Outputs below this are dust for relay purposes
pub const DUST_THRESHOLD: i64 = 5_460;

// Issuance schedule. Chain parameters picked for this ledger; nothing else in
// consensus depends on their exact values.

/// Initial proof-of-work base issuance per block
pub const POW_INITIAL_ISSUE: i64 = 50 * COIN;

/// Proof-of-work issuance halves every this many PoW blocks
pub const POW_HALVING_INTERVAL: u32 = 100_000;

/// Proof-of-stake base issuance per block
pub const POS_BLOCK_ISSUE: i64 = 5 * COIN;

/// Proof-of-stake base issuance stops after this many PoS blocks
pub const POS_ISSUE_BLOCKS: u32 = 1_000_000;

/// Lock time threshold: below this lock time is a block height
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final inputs
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Maximum unlock script size of a standard input
pub const MAX_STANDARD_SCRIPT_SIG_SIZE: usize = 1650;

/// Maximum lock script size
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Current transaction version
pub const CURRENT_TX_VERSION: u16 = 1;

/// Current block version
pub const CURRENT_BLOCK_VERSION: i32 = 1;

/// OP_RETURN opcode, marks an unspendable output
pub const OP_RETURN: u8 = 0x6a;
