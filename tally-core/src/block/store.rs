//! Block store: a single file of fixed-size blocks

use super::codec;
use crate::config::BLOCK_SIZE;
use crate::{BlockId, Result, TallyError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// File of fixed-size blocks addressed by id.
///
/// Ids are handed out in increasing order and never reused. There is no
/// page cache: every read and write goes to the file.
pub struct BlockStore {
    file: File,
    path: PathBuf,
    /// Number of allocated blocks; the next id to hand out
    block_count: u64,
}

impl BlockStore {
    /// Open a store file, creating it if missing.
    ///
    /// An existing file resumes with all of its blocks allocated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Self::from_file(file, path)
    }

    /// Open an existing store whose writes all fail
    #[cfg(test)]
    pub(crate) fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Self::from_file(file, path)
    }

    fn from_file(file: File, path: PathBuf) -> Result<Self> {
        let len = file.metadata()?.len();
        if len % BLOCK_SIZE_U64 != 0 {
            return Err(TallyError::CorruptBlock(format!(
                "{:?} is {} bytes, not a multiple of the {} byte block size",
                path, len, BLOCK_SIZE
            )));
        }

        let block_count = len / BLOCK_SIZE_U64;
        info!("Opened block store {:?} with {} blocks", path, block_count);

        Ok(Self {
            file,
            path,
            block_count,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of allocated blocks
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Check if no block was ever allocated
    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    /// Allocate the next block id and write an empty block there
    pub fn allocate_block(&mut self) -> Result<BlockId> {
        let id = self.block_count;
        self.write_at(id, &codec::empty_block(id))?;
        self.block_count += 1;
        debug!("Allocated block {}", id);
        Ok(id)
    }

    /// Read one block
    pub fn read_block(&mut self, id: BlockId) -> Result<Vec<u8>> {
        self.check_range(id)?;

        let mut buf = vec![0u8; BLOCK_SIZE];
        self.file.seek(SeekFrom::Start(id * BLOCK_SIZE_U64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overwrite an allocated block
    pub fn write_block(&mut self, id: BlockId, data: &[u8]) -> Result<()> {
        self.check_range(id)?;
        if data.len() != BLOCK_SIZE {
            return Err(TallyError::CorruptBlock(format!(
                "refusing to write {} bytes to block {}",
                data.len(),
                id
            )));
        }
        self.write_at(id, data)
    }

    /// Read block 0, allocating it first if the store is empty
    pub fn root_block(&mut self) -> Result<Vec<u8>> {
        if self.is_empty() {
            self.allocate_block()?;
        }
        self.read_block(0)
    }

    /// Flush written blocks to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn check_range(&self, id: BlockId) -> Result<()> {
        if id >= self.block_count {
            return Err(TallyError::OutOfRange {
                block_id: id,
                block_count: self.block_count,
            });
        }
        Ok(())
    }

    fn write_at(&mut self, id: BlockId, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(id * BLOCK_SIZE_U64))?;
        self.file.write_all(data)?;
        Ok(())
    }
}
