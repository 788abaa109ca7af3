//! Tally Core - query key counting on a disk-resident B-tree
//!
//! Tally counts how often each textual key appears in an input stream and
//! keeps the running totals in a single index file.
//!
//! # Architecture
//!
//! - **Block Codec**: fixed-size 8KB blocks to and from in-memory nodes
//! - **Block Store**: append-only file of blocks addressed by integer id
//! - **B-Tree**: search, update, insert with bottom-up split propagation, export
//! - **LRU Cache**: bounded, thread-safe key -> count map that batches writes
//! - **Pipeline**: counter threads feeding a single aggregator that owns the tree
//!
//! # Example
//!
//! ```no_run
//! use tally_core::btree::BTree;
//! use tally_core::pipeline::{PipelineConfig, QueryCounter};
//!
//! # fn main() -> tally_core::Result<()> {
//! let tree = BTree::open("./indexes")?;
//! let counter = QueryCounter::start(tree, PipelineConfig::default())?;
//! for key in ["a", "b", "a"] {
//!     counter.send(key)?;
//! }
//! let (mut tree, report) = counter.finish()?;
//! assert_eq!(report.keys_counted, 3);
//! assert_eq!(tree.get("a")?, Some(2));
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod btree;
pub mod cache;
pub mod pipeline;

mod error;
mod types;

pub use error::{Result, TallyError};
pub use types::*;

/// Tally version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format constants and default tuning values
pub mod config {
    /// Size of one block on disk (8KB)
    pub const BLOCK_SIZE: usize = 8 * 1024;

    /// Block header: id, pair count, child count
    pub const BLOCK_HEADER_SIZE: usize = 3 * 8;

    /// Size of an encoded child id
    pub const CHILD_ID_SIZE: usize = 8;

    /// Longest key, in encoded bytes, that fits in a pair slot
    pub const MAX_KEY_LEN: usize = 117;

    /// Fixed pair slot: u16 length prefix, key field, u64 value
    pub const PAIR_SIZE: usize = 2 + MAX_KEY_LEN + 8;

    /// A node holding more pairs than this is split
    pub const MAX_PAIRS_PER_NODE: usize = 60;

    /// Default number of keys held by the aggregation cache
    pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

    /// Default number of counting threads
    pub const DEFAULT_WORKERS: usize = 10;

    /// Default bound of the input and eviction queues
    pub const QUEUE_CAPACITY: usize = 100;

    // A full internal node must fit in one block.
    const _: () = assert!(
        BLOCK_HEADER_SIZE
            + (MAX_PAIRS_PER_NODE + 1) * CHILD_ID_SIZE
            + MAX_PAIRS_PER_NODE * PAIR_SIZE
            <= BLOCK_SIZE
    );
}
