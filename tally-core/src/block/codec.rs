//! Block codec: nodes to and from fixed-size blocks
//!
//! Format (all integers little-endian):
//! - 8 bytes: block id
//! - 8 bytes: pair count
//! - 8 bytes: child count
//! - 8 bytes per child id
//! - 127 bytes per pair slot: u16 key length, key bytes, u64 value,
//!   zero padding to the end of the slot
//!
//! The remainder of the block is zero.

use crate::btree::Node;
use crate::config::{BLOCK_HEADER_SIZE, BLOCK_SIZE, CHILD_ID_SIZE, MAX_KEY_LEN, PAIR_SIZE};
use crate::{BlockId, Pair, Result, TallyError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Serialize a node into one block
pub fn encode(node: &Node) -> Result<Bytes> {
    let needed = node.encoded_len();
    if needed > BLOCK_SIZE {
        return Err(TallyError::CorruptBlock(format!(
            "node {} needs {} bytes, block holds {}",
            node.id, needed, BLOCK_SIZE
        )));
    }

    let mut buf = BytesMut::with_capacity(BLOCK_SIZE);
    buf.put_u64_le(node.id);
    buf.put_u64_le(node.pairs.len() as u64);
    buf.put_u64_le(node.children.len() as u64);

    for child in &node.children {
        buf.put_u64_le(*child);
    }

    for pair in &node.pairs {
        encode_pair(&mut buf, pair)?;
    }

    buf.resize(BLOCK_SIZE, 0);
    Ok(buf.freeze())
}

/// Deserialize a block into a node
pub fn decode(data: &[u8]) -> Result<Node> {
    if data.len() < BLOCK_HEADER_SIZE {
        return Err(TallyError::CorruptBlock(format!(
            "block is {} bytes, header needs {}",
            data.len(),
            BLOCK_HEADER_SIZE
        )));
    }

    let mut cursor = data;
    let id = cursor.get_u64_le();
    let pair_count = cursor.get_u64_le();
    let child_count = cursor.get_u64_le();

    let body = (child_count as u128) * (CHILD_ID_SIZE as u128)
        + (pair_count as u128) * (PAIR_SIZE as u128);
    if body > cursor.remaining() as u128 {
        return Err(TallyError::CorruptBlock(format!(
            "block {} claims {} pairs and {} children, only {} bytes remain",
            id,
            pair_count,
            child_count,
            cursor.remaining()
        )));
    }
    if child_count != 0 && child_count != pair_count + 1 {
        return Err(TallyError::CorruptBlock(format!(
            "block {} has {} pairs but {} children",
            id, pair_count, child_count
        )));
    }

    let children: Vec<BlockId> = (0..child_count).map(|_| cursor.get_u64_le()).collect();

    let mut pairs = Vec::with_capacity(pair_count as usize);
    for _ in 0..pair_count {
        let (slot, rest) = cursor.split_at(PAIR_SIZE);
        pairs.push(decode_pair(id, slot)?);
        cursor = rest;
    }

    Ok(Node { id, pairs, children })
}

/// An encoded empty leaf for a freshly allocated block
pub fn empty_block(id: BlockId) -> Bytes {
    let mut buf = BytesMut::zeroed(BLOCK_SIZE);
    buf[..8].copy_from_slice(&id.to_le_bytes());
    buf.freeze()
}

fn encode_pair(buf: &mut BytesMut, pair: &Pair) -> Result<()> {
    let key = pair.key.as_bytes();
    if key.len() > MAX_KEY_LEN {
        return Err(TallyError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_LEN,
        });
    }

    let start = buf.len();
    buf.put_u16_le(key.len() as u16);
    buf.put_slice(key);
    buf.put_u64_le(pair.value);
    buf.resize(start + PAIR_SIZE, 0);
    Ok(())
}

fn decode_pair(block_id: BlockId, mut slot: &[u8]) -> Result<Pair> {
    let key_len = slot.get_u16_le() as usize;
    // value follows the key inside the same slot
    if key_len > MAX_KEY_LEN || key_len + 8 > slot.remaining() {
        return Err(TallyError::CorruptBlock(format!(
            "block {} has a pair with key length {}",
            block_id, key_len
        )));
    }

    let key = std::str::from_utf8(&slot[..key_len])
        .map_err(|e| TallyError::CorruptBlock(format!("block {}: {}", block_id, e)))?
        .to_string();
    slot.advance(key_len);
    let value = slot.get_u64_le();

    Ok(Pair { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_PAIRS_PER_NODE;

    fn full_internal_node() -> Node {
        Node {
            id: 42,
            pairs: (0..MAX_PAIRS_PER_NODE)
                .map(|i| Pair::new(format!("{:0>117}", i), u64::MAX - i as u64))
                .collect(),
            children: (0..=MAX_PAIRS_PER_NODE as u64).map(|i| 1000 + i).collect(),
        }
    }

    #[test]
    fn test_roundtrip_leaf() {
        let node = Node {
            id: 7,
            pairs: vec![
                Pair::new("", 1),
                Pair::new("alpha", 2),
                Pair::new("naïve query", 3),
            ],
            children: vec![],
        };

        let block = encode(&node).unwrap();
        assert_eq!(block.len(), BLOCK_SIZE);
        assert_eq!(decode(&block).unwrap(), node);
    }

    #[test]
    fn test_roundtrip_full_internal_node() {
        let node = full_internal_node();
        let block = encode(&node).unwrap();
        assert_eq!(block.len(), BLOCK_SIZE);

        let decoded = decode(&block).unwrap();
        assert_eq!(decoded, node);
        assert!(decoded.is_well_formed());
    }

    #[test]
    fn test_layout_is_little_endian() {
        let node = Node::with_single_pair(0x0102, Pair::new("ab", 0x0a0b), 3, 4);
        let block = encode(&node).unwrap();

        assert_eq!(&block[0..8], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&block[8..16], &1u64.to_le_bytes());
        assert_eq!(&block[16..24], &2u64.to_le_bytes());
        assert_eq!(&block[24..32], &3u64.to_le_bytes());
        assert_eq!(&block[32..40], &4u64.to_le_bytes());
        // pair: length prefix, key bytes, value right after the key
        assert_eq!(&block[40..42], &[2, 0]);
        assert_eq!(&block[42..44], b"ab");
        assert_eq!(&block[44..52], &0x0a0bu64.to_le_bytes());
        assert!(block[52..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_empty_block_decodes_to_empty_leaf() {
        let node = decode(&empty_block(9)).unwrap();
        assert_eq!(node, Node::new(9));
        assert!(node.is_leaf());
    }

    #[test]
    fn test_encode_rejects_long_key() {
        let mut node = Node::new(1);
        node.pairs.push(Pair::new("x".repeat(MAX_KEY_LEN + 1), 1));
        assert!(matches!(encode(&node), Err(TallyError::KeyTooLong { .. })));
    }

    #[test]
    fn test_encode_rejects_oversized_node() {
        let mut node = full_internal_node();
        node.pairs.push(Pair::new("overflow", 1));
        node.children.push(9999);
        assert!(matches!(encode(&node), Err(TallyError::CorruptBlock(_))));
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        assert!(matches!(decode(&[0u8; 10]), Err(TallyError::CorruptBlock(_))));
    }

    #[test]
    fn test_decode_rejects_bad_counts() {
        let mut block = BytesMut::zeroed(BLOCK_SIZE);
        block[8..16].copy_from_slice(&1_000_000u64.to_le_bytes());
        assert!(matches!(decode(&block), Err(TallyError::CorruptBlock(_))));

        let mut block = BytesMut::zeroed(BLOCK_SIZE);
        block[8..16].copy_from_slice(&2u64.to_le_bytes());
        block[16..24].copy_from_slice(&2u64.to_le_bytes());
        assert!(matches!(decode(&block), Err(TallyError::CorruptBlock(_))));
    }

    #[test]
    fn test_decode_rejects_corrupt_key_length() {
        let node = Node {
            id: 1,
            pairs: vec![Pair::new("key", 5)],
            children: vec![],
        };
        let mut block = BytesMut::from(&encode(&node).unwrap()[..]);
        block[24..26].copy_from_slice(&500u16.to_le_bytes());

        let err = decode(&block).unwrap_err();
        assert!(err.is_corruption());
    }
}
