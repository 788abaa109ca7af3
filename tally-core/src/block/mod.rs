//! Block layer: the on-disk unit of the index file
//!
//! The index file is a sequence of 8KB blocks. Block `i` lives at byte
//! offset `i * BLOCK_SIZE` and holds exactly one serialized B-tree node.
//! Blocks are only ever appended; ids are never reclaimed.

mod codec;
mod store;

pub use codec::{decode, empty_block, encode};
pub use store::BlockStore;
