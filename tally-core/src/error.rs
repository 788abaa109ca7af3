//! Error types for Tally

use thiserror::Error;

/// Result type alias for Tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Tally error types
#[derive(Error, Debug)]
pub enum TallyError {
    /// IO operation on the store file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A block's length or count fields disagree with its contents
    #[error("Corrupt block: {0}")]
    CorruptBlock(String),

    /// Requested block id was never allocated
    #[error("Block {block_id} out of range (store holds {block_count} blocks)")]
    OutOfRange { block_id: u64, block_count: u64 },

    /// Key does not fit in a pair slot
    #[error("Key too long: {len} bytes, maximum is {max}")]
    KeyTooLong { len: usize, max: usize },

    /// Invalid construction parameter
    #[error("Configuration error: {0}")]
    Config(String),

    /// The pipeline stopped accepting keys
    #[error("Pipeline closed")]
    PipelineClosed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TallyError {
    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, TallyError::CorruptBlock(_) | TallyError::OutOfRange { .. })
    }

    /// Check if the error means the store can no longer be trusted.
    ///
    /// `KeyTooLong` only rejects a single pair and leaves the tree intact.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TallyError::KeyTooLong { .. } | TallyError::Config(_))
    }
}
