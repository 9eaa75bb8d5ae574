//! Transaction payload rules
//!
//! Payload entries travel as standard Base64 text. Length limits and the
//! per-character fee are measured on the encoded form.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::types::Amount;

pub const MAX_ASSET_NAME_LENGTH: usize = 32;
pub const MAX_ASSET_LOCAL_NAME_LENGTH: usize = 64;
pub const MAX_ASSET_SYMBOL_LENGTH: usize = 8;
pub const MAX_ALIAS_LENGTH: usize = 32;

/// Encode a payload entry for inclusion in a transaction
pub fn encode_entry(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Decode a payload entry back to text
pub fn decode_entry(entry: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(entry)
        .map_err(|e| ConsensusError::Malformed(format!("payload entry not base64: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|_| ConsensusError::Malformed("payload entry not utf-8".to_string()))
}

/// Total encoded length of all entries
pub fn encoded_length(payload: &[String]) -> usize {
    payload.iter().map(|entry| entry.len()).sum()
}

/// CheckPayload: every entry decodes, no entry and no total exceeds the limit
pub fn check_payload(payload: &[String]) -> Result<()> {
    for (i, entry) in payload.iter().enumerate() {
        if entry.len() > MAX_TX_PAYLOAD_LENGTH {
            return Err(ConsensusError::Malformed(format!(
                "payload entry {} too long: {} chars",
                i,
                entry.len()
            )));
        }
        decode_entry(entry)?;
    }

    let total = encoded_length(payload);
    if total > MAX_TX_PAYLOAD_LENGTH {
        return Err(ConsensusError::Malformed(format!(
            "payload too long: {} chars",
            total
        )));
    }
    Ok(())
}

/// Decoded fields of a RegisterAsset payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPayload {
    pub english_name: String,
    pub local_name: String,
    pub symbol: String,
    pub description: String,
}

impl AssetPayload {
    pub fn parse(payload: &[String]) -> Result<Self> {
        if payload.len() != 4 {
            return Err(ConsensusError::Malformed(format!(
                "asset payload needs 4 entries, got {}",
                payload.len()
            )));
        }
        let asset = AssetPayload {
            english_name: decode_entry(&payload[0])?,
            local_name: decode_entry(&payload[1])?,
            symbol: decode_entry(&payload[2])?,
            description: decode_entry(&payload[3])?,
        };
        if !is_legal_asset_payload(&asset.english_name, &asset.local_name, &asset.symbol) {
            return Err(ConsensusError::Malformed(format!(
                "illegal asset names {:?}/{:?}/{:?}",
                asset.english_name, asset.local_name, asset.symbol
            )));
        }
        Ok(asset)
    }

    /// Encoded form, ready for `Transaction::payload`
    pub fn to_payload(&self) -> Vec<String> {
        vec![
            encode_entry(&self.english_name),
            encode_entry(&self.local_name),
            encode_entry(&self.symbol),
            encode_entry(&self.description),
        ]
    }
}

pub fn is_legal_asset_payload(english_name: &str, local_name: &str, symbol: &str) -> bool {
    let english_ok = !english_name.is_empty()
        && english_name.len() <= MAX_ASSET_NAME_LENGTH
        && english_name.bytes().all(|b| (0x20..0x7f).contains(&b))
        && english_name.trim() == english_name;
    let local_len = local_name.chars().count();
    let local_ok = local_len > 0
        && local_len <= MAX_ASSET_LOCAL_NAME_LENGTH
        && !local_name.chars().any(char::is_control);
    let symbol_ok = !symbol.is_empty()
        && symbol.len() <= MAX_ASSET_SYMBOL_LENGTH
        && symbol.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    english_ok && local_ok && symbol_ok
}

pub fn is_legal_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias.len() <= MAX_ALIAS_LENGTH
        && alias.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        && !alias.bytes().all(|b| b.is_ascii_digit())
}

/// Decoded alias of a RegisterAlias/TransferAlias payload
pub fn parse_alias(payload: &[String]) -> Result<String> {
    if payload.len() != 1 {
        return Err(ConsensusError::Malformed(format!(
            "alias payload needs 1 entry, got {}",
            payload.len()
        )));
    }
    let alias = decode_entry(&payload[0])?;
    if !is_legal_alias(&alias) {
        return Err(ConsensusError::Malformed(format!("illegal alias {:?}", alias)));
    }
    Ok(alias)
}

/// Incentive pool a donation is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonationPool {
    Pow,
    Pos,
}

/// Donation payload: `[selector, amount]` or `[memo, selector, amount]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Donation {
    pub memo: Option<String>,
    pub pool: DonationPool,
    /// In base units, always a whole number of coins
    pub amount: Amount,
}

impl Donation {
    /// Parses a donation payload. Only the entry count tells whether a memo
    /// is present. Returns `None` for any payload of another shape.
    pub fn parse(payload: &[String]) -> Option<Self> {
        let (memo, selector, amount) = match payload {
            [selector, amount] => (None, selector, amount),
            [memo, selector, amount] => (Some(decode_entry(memo).ok()?), selector, amount),
            _ => return None,
        };

        let pool = match decode_entry(selector).ok()?.as_str() {
            "pow" => DonationPool::Pow,
            "pos" => DonationPool::Pos,
            _ => return None,
        };

        let coins = decode_entry(amount).ok()?;
        if coins.is_empty() || !coins.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let coins: i64 = coins.parse().ok()?;
        let amount = coins.checked_mul(COIN).filter(|v| *v > 0 && *v <= MAX_MONEY)?;

        Some(Donation { memo, pool, amount })
    }

    pub fn to_payload(&self) -> Vec<String> {
        let selector = match self.pool {
            DonationPool::Pow => "pow",
            DonationPool::Pos => "pos",
        };
        let mut payload = Vec::with_capacity(3);
        if let Some(memo) = &self.memo {
            payload.push(encode_entry(memo));
        }
        payload.push(encode_entry(selector));
        payload.push(encode_entry(&(self.amount / COIN).to_string()));
        payload
    }
}

/// Encoded characters subject to the payload fee. Donation selector and
/// amount entries are free, the memo is not.
pub fn chargeable_length(payload: &[String], is_donation: bool) -> usize {
    if is_donation {
        let free = &payload[payload.len().saturating_sub(2)..];
        encoded_length(payload) - encoded_length(free)
    } else {
        encoded_length(payload)
    }
}
