//! Spend authorization
//!
//! Validation sees scripts only through [`ScriptVerifier`]. The bundled
//! [`StandardScriptVerifier`] handles pay-to-pubkey-hash and pay-to-pubkey.

use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, VerifyOnly};
use sha2::{Digest, Sha256};

use crate::constants::OP_RETURN;
use crate::params::SCRIPT_VERIFY_STRICTENC;
use crate::serialize::{double_sha256, Encodable};
use crate::types::*;

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_PUSHDATA1: u8 = 0x4c;

/// Largest data carried by a standard OP_RETURN output
pub const MAX_NULL_DATA_SIZE: usize = 80;

/// Decides whether `unlock_script` authorizes spending an output locked by
/// `lock_script`, for input `input_index` of `tx`.
pub trait ScriptVerifier: Send + Sync {
    fn verify(
        &self,
        unlock_script: &[u8],
        lock_script: &[u8],
        tx: &Transaction,
        input_index: usize,
        flags: u32,
    ) -> bool;
}

/// HASH160 = RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha256_hash = Sha256::digest(data);
    let ripemd160_hash = Ripemd160::digest(sha256_hash);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd160_hash);
    out
}

/// OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
pub fn p2pkh_lock_script(pubkey_hash: &[u8; 20]) -> ByteString {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

/// <sig> <pubkey>
pub fn p2pkh_unlock_script(signature_der: &[u8], pubkey: &[u8]) -> ByteString {
    let mut script = Vec::with_capacity(signature_der.len() + pubkey.len() + 2);
    push_data(&mut script, signature_der);
    push_data(&mut script, pubkey);
    script
}

fn push_data(script: &mut ByteString, data: &[u8]) {
    if data.len() < OP_PUSHDATA1 as usize {
        script.push(data.len() as u8);
    } else {
        script.push(OP_PUSHDATA1);
        script.push(data.len() as u8);
    }
    script.extend_from_slice(data);
}

/// Splits a push-only script into its data items
pub fn parse_pushes(script: &[u8]) -> Option<Vec<&[u8]>> {
    let mut items = Vec::new();
    let mut pos = 0;
    while pos < script.len() {
        let opcode = script[pos];
        pos += 1;
        let len = match opcode {
            1..=0x4b => opcode as usize,
            OP_PUSHDATA1 => {
                let len = *script.get(pos)? as usize;
                pos += 1;
                len
            }
            _ => return None,
        };
        items.push(script.get(pos..pos + len)?);
        pos += len;
    }
    Some(items)
}

fn p2pkh_hash(lock_script: &[u8]) -> Option<&[u8]> {
    match lock_script {
        [OP_DUP, OP_HASH160, 20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
            Some(hash)
        }
        _ => None,
    }
}

fn p2pk_key(lock_script: &[u8]) -> Option<&[u8]> {
    match lock_script {
        [len, key @ .., OP_CHECKSIG] if (*len == 33 || *len == 65) && key.len() == *len as usize => {
            Some(key)
        }
        _ => None,
    }
}

/// Pay-to-pubkey-hash, pay-to-pubkey or a small OP_RETURN data carrier
pub fn is_standard_lock_script(lock_script: &[u8]) -> bool {
    if p2pkh_hash(lock_script).is_some() || p2pk_key(lock_script).is_some() {
        return true;
    }
    match lock_script.split_first() {
        Some((&OP_RETURN, rest)) => {
            rest.len() <= MAX_NULL_DATA_SIZE + 2
                && parse_pushes(rest).map_or(false, |items| items.len() <= 1)
        }
        _ => false,
    }
}

/// Digest signed by input `input_index`: double SHA-256 of the transaction
/// with every unlock script blanked, followed by the input index.
pub fn signature_hash(tx: &Transaction, input_index: usize) -> Hash {
    let mut blanked = tx.clone();
    for input in &mut blanked.inputs {
        input.unlock_script.clear();
    }
    let mut data = blanked.encode_to_vec();
    (input_index as u32).encode(&mut data);
    double_sha256(&data)
}

/// P2PKH / P2PK verifier over secp256k1 ECDSA
pub struct StandardScriptVerifier {
    secp: Secp256k1<VerifyOnly>,
}

impl StandardScriptVerifier {
    pub fn new() -> Self {
        Self { secp: Secp256k1::verification_only() }
    }

    fn check_signature(&self, sig_bytes: &[u8], pubkey_bytes: &[u8], digest: &Hash, flags: u32) -> bool {
        let pubkey = match PublicKey::from_slice(pubkey_bytes) {
            Ok(pk) => pk,
            Err(_) => return false,
        };

        let signature = if flags & SCRIPT_VERIFY_STRICTENC != 0 {
            Signature::from_der(sig_bytes)
        } else {
            Signature::from_der_lax(sig_bytes).map(|mut sig| {
                sig.normalize_s();
                sig
            })
        };
        let signature = match signature {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        let message = match Message::from_digest_slice(digest) {
            Ok(msg) => msg,
            Err(_) => return false,
        };

        self.secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
    }
}

impl Default for StandardScriptVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptVerifier for StandardScriptVerifier {
    fn verify(
        &self,
        unlock_script: &[u8],
        lock_script: &[u8],
        tx: &Transaction,
        input_index: usize,
        flags: u32,
    ) -> bool {
        let items = match parse_pushes(unlock_script) {
            Some(items) => items,
            None => return false,
        };
        let digest = signature_hash(tx, input_index);

        if let Some(expected) = p2pkh_hash(lock_script) {
            return match items.as_slice() {
                [sig, pubkey] => {
                    hash160(pubkey) == expected && self.check_signature(sig, pubkey, &digest, flags)
                }
                _ => false,
            };
        }
        if let Some(key) = p2pk_key(lock_script) {
            return match items.as_slice() {
                [sig] => self.check_signature(sig, key, &digest, flags),
                _ => false,
            };
        }
        false
    }
}
