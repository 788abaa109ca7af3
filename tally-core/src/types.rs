//! Core types for Tally

use crate::config::MAX_KEY_LEN;
use crate::{Result, TallyError};
use std::fmt;

/// Block identifier; `id * BLOCK_SIZE` is the block's byte offset in the store file
pub type BlockId = u64;

/// A counted key and its running total
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pair {
    /// Query key
    pub key: String,
    /// Occurrence count
    pub value: u64,
}

impl Pair {
    /// Create a new pair
    pub fn new(key: impl Into<String>, value: u64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Check that the encoded key fits in a pair slot
    pub fn validate(&self) -> Result<()> {
        validate_key(&self.key)
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.key, self.value)
    }
}

/// Reject keys whose UTF-8 encoding exceeds `MAX_KEY_LEN` bytes
pub fn validate_key(key: &str) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(TallyError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_LEN,
        });
    }
    Ok(())
}
