//! Tunable network parameters

use serde::{Deserialize, Serialize};

use crate::constants::MIN_TX_PER_K_FEE;
use crate::error::{ConsensusError, Result};

/// Script verification flag: require strict DER signatures
pub const SCRIPT_VERIFY_STRICTENC: u32 = 1 << 1;

/// Network parameters consulted by validation
///
/// Loaded from JSON with missing fields taking mainnet defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Confirmations a coinbase/coinstake output needs before it can be spent
    pub coinbase_maturity: u32,
    /// Seconds a block may run ahead of adjusted time, and a transaction
    /// ahead of its block
    pub max_future_drift: u32,
    /// Minimum relay fee per 1000 bytes
    pub min_relay_fee_per_kb: i64,
    /// Relay transactions that fail the standardness policy
    pub accept_non_standard: bool,
    /// Flags passed to the script verifier
    pub script_flags: u32,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            coinbase_maturity: 500,
            max_future_drift: 5 * 60,
            min_relay_fee_per_kb: MIN_TX_PER_K_FEE,
            accept_non_standard: false,
            script_flags: SCRIPT_VERIFY_STRICTENC,
        }
    }
}

impl ChainParams {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ConsensusError::Serialization(format!("chain params: {}", e)))
    }

    /// Permissive parameters for local test chains
    pub fn regtest() -> Self {
        Self {
            coinbase_maturity: 1,
            accept_non_standard: true,
            ..Self::default()
        }
    }
}
