//! # Asset Consensus
//!
//! Consensus core of a hybrid proof-of-work / proof-of-stake ledger with
//! user-issued assets and aliases.
//!
//! The crate validates transactions and blocks, keeps the UTXO spend index,
//! the asset and alias registries, the block index tree and the memory pool,
//! and switches the best chain all-or-nothing.
//!
//! ## Architecture
//!
//! - [`transaction`]: the nine transaction shapes, fees and CheckTransaction
//! - [`economic`]: value conservation, relay fees and the reward schedule
//! - [`utxo`]: FetchInputs / ConnectInputs / DisconnectInputs over a staging overlay
//! - [`block`] and [`reorganization`]: ConnectBlock, DisconnectBlock and chain switches
//! - [`chain`]: the [`Ledger`] context tying store, tree, registries and mempool together
//!
//! Persistent state is reached only through [`storage::LedgerStore`] and
//! scripts only through [`script::ScriptVerifier`].
//!
//! ## Usage
//!
//! ```rust
//! use asset_consensus::transaction::check_transaction;
//! use asset_consensus::types::*;
//! use asset_consensus::COIN;
//!
//! let tx = Transaction::new(
//!     TxType::TransferBase,
//!     1,
//!     vec![TxInput::new(OutPoint::new([1; 32], 0), vec![0x51])],
//!     vec![TxOutput::base(COIN, vec![0x51])],
//! );
//! assert!(check_transaction(&tx).is_ok());
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod params;
pub mod serialize;
pub mod payload;
pub mod transaction;
pub mod economic;
pub mod script;
pub mod utxo;
pub mod storage;
pub mod registry;
pub mod merkle;
pub mod block_index;
pub mod block;
pub mod reorganization;
pub mod mempool;
pub mod chain;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{ConsensusError, RangeError, Result, ValidationState};
pub use params::ChainParams;
pub use chain::{Ledger, WalletNotifier};
pub use mempool::{InPoint, Mempool};
pub use storage::{LedgerStore, MemoryStore, WriteBatch};
pub use script::{ScriptVerifier, StandardScriptVerifier};
