//! Canonical wire encoding
//!
//! Little-endian integers, compact-size length prefixes. Every consensus hash is
//! double SHA-256 over these bytes.

use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};

use crate::error::{ConsensusError, Result};
use crate::types::*;

/// Serialized size of a block header
pub const BLOCK_HEADER_SIZE: usize = 80;

/// Double SHA-256 of `data`
pub fn double_sha256(data: &[u8]) -> Hash {
    let mut hasher = sha256d::Hash::engine();
    hasher.input(data);
    let result = sha256d::Hash::from_engine(hasher);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Double SHA-256 of two concatenated hashes
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = sha256d::Hash::engine();
    hasher.input(left);
    hasher.input(right);
    let result = sha256d::Hash::from_engine(hasher);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Encode a number as a compact-size varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffffffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}

pub fn varint_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Cursor over encoded bytes
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(ConsensusError::Serialization(format!(
                "unexpected end of data: need {} bytes, have {}",
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let value = match self.read_array::<1>()?[0] {
            0xfd => u16::from_le_bytes(self.read_array()?) as u64,
            0xfe => u32::from_le_bytes(self.read_array()?) as u64,
            0xff => u64::from_le_bytes(self.read_array()?),
            small => small as u64,
        };
        Ok(value)
    }

    /// Reads a length prefix, rejecting lengths the remaining data cannot hold
    pub fn read_length(&mut self) -> Result<usize> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(ConsensusError::Serialization(format!(
                "length {} exceeds remaining {} bytes",
                len,
                self.remaining()
            )));
        }
        Ok(len as usize)
    }
}

pub trait Encodable {
    fn encode(&self, out: &mut Vec<u8>);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

pub trait Decodable: Sized {
    fn decode(reader: &mut Reader<'_>) -> Result<Self>;

    /// Decodes a complete value; trailing bytes are an error
    fn decode_from_slice(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let value = Self::decode(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(ConsensusError::Serialization(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }
        Ok(value)
    }
}

macro_rules! impl_int_codec {
    ($($ty:ty),*) => {$(
        impl Encodable for $ty {
            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }

        impl Decodable for $ty {
            fn decode(reader: &mut Reader<'_>) -> Result<Self> {
                Ok(<$ty>::from_le_bytes(reader.read_array()?))
            }
        }
    )*};
}

impl_int_codec!(u8, u16, u32, i32, u64, i64);

impl Encodable for Hash {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Decodable for Hash {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_array()
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&encode_varint(self.len() as u64));
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let len = reader.read_length()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl Encodable for String {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&encode_varint(self.len() as u64));
        out.extend_from_slice(self.as_bytes());
    }
}

impl Decodable for String {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let len = reader.read_length()?;
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ConsensusError::Serialization(format!("invalid utf-8 string: {}", e)))
    }
}

impl Encodable for OutPoint {
    fn encode(&self, out: &mut Vec<u8>) {
        self.hash.encode(out);
        self.index.encode(out);
    }
}

impl Decodable for OutPoint {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(OutPoint { hash: Hash::decode(reader)?, index: u32::decode(reader)? })
    }
}

impl Encodable for TxInput {
    fn encode(&self, out: &mut Vec<u8>) {
        self.prevout.encode(out);
        self.unlock_script.encode(out);
        self.sequence.encode(out);
    }
}

impl Decodable for TxInput {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(TxInput {
            prevout: OutPoint::decode(reader)?,
            unlock_script: Vec::decode(reader)?,
            sequence: u32::decode(reader)?,
        })
    }
}

impl Encodable for TxOutput {
    fn encode(&self, out: &mut Vec<u8>) {
        self.asset_id.encode(out);
        self.amount.encode(out);
        self.lock_script.encode(out);
    }
}

impl Decodable for TxOutput {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(TxOutput {
            asset_id: i64::decode(reader)?,
            amount: i64::decode(reader)?,
            lock_script: Vec::decode(reader)?,
        })
    }
}

impl Encodable for Transaction {
    fn encode(&self, out: &mut Vec<u8>) {
        self.type_and_version().encode(out);
        self.time.encode(out);
        self.inputs.encode(out);
        self.outputs.encode(out);
        self.lock_time.encode(out);
        self.payload.encode(out);
    }
}

impl Decodable for Transaction {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let type_and_version = u32::decode(reader)?;
        let raw_type = (type_and_version >> 16) as u16;
        let tx_type = TxType::from_u16(raw_type).ok_or_else(|| {
            ConsensusError::Serialization(format!("unknown transaction type {}", raw_type))
        })?;
        Ok(Transaction {
            tx_type,
            version: (type_and_version & 0xffff) as u16,
            time: u32::decode(reader)?,
            inputs: Vec::decode(reader)?,
            outputs: Vec::decode(reader)?,
            lock_time: u32::decode(reader)?,
            payload: Vec::decode(reader)?,
        })
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.prev_block_hash.encode(out);
        self.merkle_root.encode(out);
        self.timestamp.encode(out);
        self.bits.encode(out);
        self.nonce.encode(out);
    }
}

impl Decodable for BlockHeader {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(BlockHeader {
            version: i32::decode(reader)?,
            prev_block_hash: Hash::decode(reader)?,
            merkle_root: Hash::decode(reader)?,
            timestamp: u32::decode(reader)?,
            bits: u32::decode(reader)?,
            nonce: u32::decode(reader)?,
        })
    }
}

impl Encodable for Block {
    fn encode(&self, out: &mut Vec<u8>) {
        self.header.encode(out);
        self.transactions.encode(out);
        self.signature.encode(out);
    }
}

impl Decodable for Block {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Block {
            header: BlockHeader::decode(reader)?,
            transactions: Vec::decode(reader)?,
            signature: Vec::decode(reader)?,
        })
    }
}

impl Encodable for DiskTxPos {
    fn encode(&self, out: &mut Vec<u8>) {
        self.file.encode(out);
        self.block_pos.encode(out);
        self.tx_pos.encode(out);
    }
}

impl Decodable for DiskTxPos {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(DiskTxPos {
            file: u32::decode(reader)?,
            block_pos: u32::decode(reader)?,
            tx_pos: u32::decode(reader)?,
        })
    }
}

impl Encodable for TxIndex {
    fn encode(&self, out: &mut Vec<u8>) {
        self.pos.encode(out);
        self.spent.encode(out);
    }
}

impl Decodable for TxIndex {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(TxIndex { pos: DiskTxPos::decode(reader)?, spent: Vec::decode(reader)? })
    }
}

/// Byte offset of each transaction relative to the start of the encoded block
pub fn transaction_offsets(block: &Block) -> Vec<u32> {
    let mut offset = BLOCK_HEADER_SIZE + varint_size(block.transactions.len() as u64);
    let mut offsets = Vec::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        offsets.push(offset as u32);
        offset += tx.serialized_size();
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        let mut tx = Transaction::new(
            TxType::RegisterAlias,
            1_700_000_000,
            vec![TxInput::new(OutPoint::new([7; 32], 3), vec![0x01, 0x02])],
            vec![TxOutput::base(5_000, vec![0x76, 0xa9])],
        );
        tx.payload = vec!["YWxpY2U=".to_string()];
        tx
    }

    #[test]
    fn test_encode_varint_boundaries() {
        assert_eq!(encode_varint(0xfc), vec![0xfc]);
        assert_eq!(encode_varint(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(encode_varint(0x1_0000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(encode_varint(u64::MAX).len(), 9);
        for value in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            assert_eq!(varint_size(value), encode_varint(value).len());
            let bytes = encode_varint(value);
            assert_eq!(Reader::new(&bytes).read_varint().unwrap(), value);
        }
    }

    #[test]
    fn test_transaction_header_layout() {
        let tx = sample_transaction();
        let bytes = tx.encode_to_vec();
        assert_eq!(&bytes[0..4], &((7u32 << 16) | 1).to_le_bytes());
        assert_eq!(&bytes[4..8], &1_700_000_000u32.to_le_bytes());
    }

    #[test]
    fn test_transaction_round_trip_keeps_hash() {
        let tx = sample_transaction();
        let decoded = Transaction::decode_from_slice(&tx.encode_to_vec()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = sample_transaction().encode_to_vec();
        bytes[2] = 42;
        assert!(matches!(
            Transaction::decode_from_slice(&bytes),
            Err(ConsensusError::Serialization(_))
        ));
    }

    #[test]
    fn test_truncated_and_trailing_data() {
        let bytes = sample_transaction().encode_to_vec();
        assert!(Transaction::decode_from_slice(&bytes[..bytes.len() - 1]).is_err());
        let mut extended = bytes.clone();
        extended.push(0);
        assert!(Transaction::decode_from_slice(&extended).is_err());
    }

    #[test]
    fn test_oversized_length_prefix() {
        let bytes = encode_varint(1_000_000);
        assert!(Vec::<u8>::decode_from_slice(&bytes).is_err());
    }

    #[test]
    fn test_block_header_size() {
        let header = BlockHeader {
            version: 1,
            prev_block_hash: [1; 32],
            merkle_root: [2; 32],
            timestamp: 3,
            bits: 4,
            nonce: 5,
        };
        assert_eq!(header.encode_to_vec().len(), BLOCK_HEADER_SIZE);
    }

    #[test]
    fn test_transaction_offsets() {
        let tx = sample_transaction();
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_block_hash: [0; 32],
                merkle_root: [0; 32],
                timestamp: 0,
                bits: 0,
                nonce: 0,
            },
            transactions: vec![tx.clone(), tx.clone()],
            signature: vec![],
        };
        let offsets = transaction_offsets(&block);
        assert_eq!(offsets[0], 81);
        assert_eq!(offsets[1] as usize, 81 + tx.serialized_size());
        let encoded = block.encode_to_vec();
        let start = offsets[1] as usize;
        let decoded = Transaction::decode(&mut Reader::new(&encoded[start..])).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_double_sha256_known_vector() {
        // sha256d("") = 5df6e0e2...
        let hash = double_sha256(b"");
        assert_eq!(hex::encode(&hash[..4]), "5df6e0e2");
    }
}
