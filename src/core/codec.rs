//! Canonical wire encoding
//!
//! Integers are little-endian and fixed width. Targets are 32-byte
//! big-endian integers. A block is its 124-byte header followed by a u32
//! transaction count and each transaction prefixed with its u32 length.
//! Variable fields carry a u16 length, escaped to a u32 length for fields
//! too long for it.
//! Transaction ids and signature messages hash this encoding, so it must
//! never change for a given version.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::address::{Address, ADDRESS_LENGTH};
use super::block::{Block, BlockHeader, BLOCK_HEADER_SIZE, MAX_BLOCK_TXS};
use super::difficulty::Target;
use super::transaction::{Transaction, TxInput, TxOutput, TxType};
use crate::crypto::hash::Hash;

/// Magic bytes opening every framed block
pub const MAGIC: [u8; 4] = *b"AEQU";

/// Largest framed block accepted from a peer
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// u16 length prefix announcing that a u32 length follows
pub const LONG_FIELD_MARKER: u16 = u16::MAX;

/// Upper bound on inputs or outputs in one transaction
pub const MAX_TX_ITEMS: usize = 10_000;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unexpected end of input: need {needed} more bytes")]
    Truncated { needed: usize },
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("unknown transaction type {0}")]
    UnknownTxType(u8),
    #[error("{what} count {count} exceeds limit {limit}")]
    TooMany {
        what: &'static str,
        count: usize,
        limit: usize,
    },
    #[error("field of {0} bytes exceeds the frame limit")]
    FieldTooLong(usize),
    #[error("invalid magic bytes")]
    BadMagic,
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether input signatures are written or emptied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    Include,
    Strip,
}

// =============================================================================
// Encoding
// =============================================================================

fn put_header(buf: &mut impl BufMut, header: &BlockHeader, include_nonce: bool) {
    buf.put_u32_le(header.version);
    buf.put_slice(&header.prev_hash);
    buf.put_slice(&header.merkle_root);
    buf.put_i64_le(header.timestamp);
    buf.put_slice(header.difficulty_target.as_bytes());
    if include_nonce {
        buf.put_u64_le(header.nonce);
    }
    buf.put_u64_le(header.epoch);
}

// A field of LONG_FIELD_MARKER bytes or more is written as the marker
// followed by a u32 length. No field is ever cut short, so two distinct
// transactions never share an encoding.
fn put_short_bytes(buf: &mut impl BufMut, bytes: &[u8]) {
    match u16::try_from(bytes.len()) {
        Ok(len) if len < LONG_FIELD_MARKER => buf.put_u16_le(len),
        _ => {
            buf.put_u16_le(LONG_FIELD_MARKER);
            buf.put_u32_le(bytes.len() as u32);
        }
    }
    buf.put_slice(bytes);
}

fn put_transaction(buf: &mut impl BufMut, tx: &Transaction, mode: SignatureMode) {
    buf.put_u32_le(tx.version);
    buf.put_u8(tx.tx_type.to_byte());

    buf.put_u32_le(tx.inputs.len() as u32);
    for input in &tx.inputs {
        buf.put_slice(&input.txid);
        buf.put_u32_le(input.index);
        put_short_bytes(buf, &input.public_key);
        match mode {
            SignatureMode::Include => put_short_bytes(buf, &input.signature),
            SignatureMode::Strip => buf.put_u16_le(0),
        }
    }

    buf.put_u32_le(tx.outputs.len() as u32);
    for output in &tx.outputs {
        buf.put_slice(output.address.as_bytes());
        buf.put_u64_le(output.amount);
    }

    buf.put_i64_le(tx.timestamp);
    put_short_bytes(buf, &tx.memo);
}

/// Full 124-byte header encoding
pub fn encode_header(header: &BlockHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE);
    put_header(&mut buf, header, true);
    buf
}

/// Header encoding with the nonce omitted, the AequiHash input
pub fn encode_header_without_nonce(header: &BlockHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE - 8);
    put_header(&mut buf, header, false);
    buf
}

pub fn encode_transaction(tx: &Transaction, mode: SignatureMode) -> Vec<u8> {
    let mut buf = Vec::new();
    put_transaction(&mut buf, tx, mode);
    buf
}

pub fn encode_block(block: &Block) -> Vec<u8> {
    let mut buf = encode_header(&block.header);
    buf.put_u32_le(block.transactions.len() as u32);
    for tx in &block.transactions {
        let bytes = encode_transaction(tx, SignatureMode::Include);
        buf.put_u32_le(bytes.len() as u32);
        buf.put_slice(&bytes);
    }
    buf
}

// =============================================================================
// Decoding
// =============================================================================

fn need(buf: &impl Buf, n: usize) -> Result<(), CodecError> {
    if buf.remaining() < n {
        Err(CodecError::Truncated {
            needed: n - buf.remaining(),
        })
    } else {
        Ok(())
    }
}

fn get_hash(buf: &mut impl Buf) -> Result<Hash, CodecError> {
    need(buf, 32)?;
    let mut out = [0u8; 32];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn get_short_bytes(buf: &mut impl Buf) -> Result<Vec<u8>, CodecError> {
    need(buf, 2)?;
    let mut len = buf.get_u16_le() as usize;
    if len == LONG_FIELD_MARKER as usize {
        need(buf, 4)?;
        len = buf.get_u32_le() as usize;
        if len > MAX_FRAME_SIZE {
            return Err(CodecError::FieldTooLong(len));
        }
    }
    need(buf, len)?;
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn get_count(buf: &mut impl Buf, what: &'static str, limit: usize) -> Result<usize, CodecError> {
    need(buf, 4)?;
    let count = buf.get_u32_le() as usize;
    if count > limit {
        return Err(CodecError::TooMany { what, count, limit });
    }
    Ok(count)
}

fn get_header(buf: &mut impl Buf) -> Result<BlockHeader, CodecError> {
    need(buf, BLOCK_HEADER_SIZE)?;
    let version = buf.get_u32_le();
    let prev_hash = get_hash(buf)?;
    let merkle_root = get_hash(buf)?;
    let timestamp = buf.get_i64_le();
    let difficulty_target = Target::from_be_bytes(get_hash(buf)?);
    let nonce = buf.get_u64_le();
    let epoch = buf.get_u64_le();
    Ok(BlockHeader {
        version,
        prev_hash,
        merkle_root,
        timestamp,
        difficulty_target,
        nonce,
        epoch,
    })
}

fn get_transaction(buf: &mut impl Buf) -> Result<Transaction, CodecError> {
    need(buf, 5)?;
    let version = buf.get_u32_le();
    let type_byte = buf.get_u8();
    let tx_type = TxType::from_byte(type_byte).ok_or(CodecError::UnknownTxType(type_byte))?;

    let input_count = get_count(buf, "input", MAX_TX_ITEMS)?;
    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let txid = get_hash(buf)?;
        need(buf, 4)?;
        let index = buf.get_u32_le();
        let public_key = get_short_bytes(buf)?;
        let signature = get_short_bytes(buf)?;
        inputs.push(TxInput {
            txid,
            index,
            public_key,
            signature,
        });
    }

    let output_count = get_count(buf, "output", MAX_TX_ITEMS)?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        need(buf, ADDRESS_LENGTH + 8)?;
        let mut address = [0u8; ADDRESS_LENGTH];
        buf.copy_to_slice(&mut address);
        let amount = buf.get_u64_le();
        outputs.push(TxOutput::new(Address::from_bytes(address), amount));
    }

    need(buf, 8)?;
    let timestamp = buf.get_i64_le();
    let memo = get_short_bytes(buf)?;

    Ok(Transaction {
        version,
        tx_type,
        inputs,
        outputs,
        timestamp,
        memo,
    })
}

fn finish(buf: &[u8]) -> Result<(), CodecError> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(CodecError::TrailingBytes(buf.len()))
    }
}

pub fn decode_header(mut bytes: &[u8]) -> Result<BlockHeader, CodecError> {
    let header = get_header(&mut bytes)?;
    finish(bytes)?;
    Ok(header)
}

pub fn decode_transaction(mut bytes: &[u8]) -> Result<Transaction, CodecError> {
    let tx = get_transaction(&mut bytes)?;
    finish(bytes)?;
    Ok(tx)
}

pub fn decode_block(mut bytes: &[u8]) -> Result<Block, CodecError> {
    let header = get_header(&mut bytes)?;
    let tx_count = get_count(&mut bytes, "transaction", MAX_BLOCK_TXS)?;

    let mut transactions = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        need(&bytes, 4)?;
        let len = bytes.get_u32_le() as usize;
        need(&bytes, len)?;
        let (body, rest) = bytes.split_at(len);
        transactions.push(decode_transaction(body)?);
        bytes = rest;
    }

    finish(bytes)?;
    Ok(Block {
        header,
        transactions,
    })
}

// =============================================================================
// Framing
// =============================================================================

/// Length-prefixed block framing for a byte-stream transport
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockCodec;

impl Encoder<Block> for BlockCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Block, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = encode_block(&item);
        if data.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(data.len()));
        }

        // Magic (4) + Length (4) + Data
        dst.reserve(8 + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);
        Ok(())
    }
}

impl Decoder for BlockCodec {
    type Item = Block;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 8 {
            return Ok(None);
        }
        if src[..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(len));
        }
        if src.len() < 8 + len {
            src.reserve(8 + len - src.len());
            return Ok(None);
        }

        src.advance(8);
        let data = src.split_to(len);
        decode_block(&data).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::ConsensusParams;
    use crate::core::transaction::{OutPoint, TransactionBuilder};
    use crate::crypto::KeyPair;

    fn sample_block() -> Block {
        let mut block = Block::genesis(&ConsensusParams::development());
        let key_pair = KeyPair::from_seed(&[3u8; 32]);
        let transfer = TransactionBuilder::new()
            .add_input(OutPoint::new([5u8; 32], 2))
            .add_output(Address::treasury(), 1_000)
            .memo("hello")
            .timestamp(42)
            .build_and_sign(&key_pair);
        block.transactions.push(transfer);
        block.update_merkle_root();
        block.header.nonce = 0xdead_beef;
        block
    }

    #[test]
    fn test_header_layout() {
        let block = sample_block();
        let bytes = encode_header(&block.header);
        assert_eq!(bytes.len(), BLOCK_HEADER_SIZE);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[36..68], &block.header.merkle_root);
        assert_eq!(&bytes[76..108], block.header.difficulty_target.as_bytes());
        assert_eq!(&bytes[108..116], &0xdead_beefu64.to_le_bytes());
        assert_eq!(encode_header_without_nonce(&block.header).len(), BLOCK_HEADER_SIZE - 8);
    }

    #[test]
    fn test_block_roundtrip() {
        let block = sample_block();
        let decoded = decode_block(&encode_block(&block)).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
    }

    #[test]
    fn test_truncated_input_rejected() {
        let bytes = encode_block(&sample_block());
        let err = decode_block(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_header(&sample_block().header);
        bytes.push(0);
        assert!(matches!(decode_header(&bytes), Err(CodecError::TrailingBytes(1))));
    }

    #[test]
    fn test_unknown_tx_type_rejected() {
        let tx = &sample_block().transactions[1];
        let mut bytes = encode_transaction(tx, SignatureMode::Include);
        bytes[4] = 9;
        assert!(matches!(decode_transaction(&bytes), Err(CodecError::UnknownTxType(9))));
    }

    #[test]
    fn test_stripped_encoding_drops_signature() {
        let tx = &sample_block().transactions[1];
        let full = encode_transaction(tx, SignatureMode::Include);
        let stripped = encode_transaction(tx, SignatureMode::Strip);
        assert_eq!(full.len() - stripped.len(), tx.inputs[0].signature.len());
    }

    #[test]
    fn test_long_fields_are_never_cut() {
        let mut long = sample_block().transactions[1].clone();
        long.memo = vec![1u8; 70_000];
        let mut other = long.clone();
        other.memo[69_999] = 2;

        let bytes = encode_transaction(&long, SignatureMode::Include);
        assert_ne!(bytes, encode_transaction(&other, SignatureMode::Include));
        assert_ne!(long.txid(), other.txid());
        assert_eq!(decode_transaction(&bytes).unwrap().memo.len(), 70_000);

        // Exactly the marker length also takes the long form
        long.memo.truncate(LONG_FIELD_MARKER as usize);
        let decoded = decode_transaction(&encode_transaction(&long, SignatureMode::Include));
        assert_eq!(decoded.unwrap(), long);
    }

    #[test]
    fn test_oversized_field_length_rejected() {
        let mut tx = sample_block().transactions[1].clone();
        tx.memo.clear();
        let mut bytes = encode_transaction(&tx, SignatureMode::Include);
        bytes.truncate(bytes.len() - 2);
        bytes.extend_from_slice(&LONG_FIELD_MARKER.to_le_bytes());
        bytes.extend_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_le_bytes());
        assert!(matches!(
            decode_transaction(&bytes),
            Err(CodecError::FieldTooLong(len)) if len == MAX_FRAME_SIZE + 1
        ));
    }

    #[test]
    fn test_framed_codec() {
        let block = sample_block();
        let mut codec = BlockCodec;
        let mut buf = BytesMut::new();
        codec.encode(block.clone(), &mut buf).unwrap();

        // Partial frame waits for more data
        let mut partial = buf.split_to(10);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);

        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, block);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_framed_codec_rejects_bad_magic() {
        let mut buf = BytesMut::from(&b"XXXX\0\0\0\x01z"[..]);
        assert!(matches!(BlockCodec.decode(&mut buf), Err(CodecError::BadMagic)));
    }
}
