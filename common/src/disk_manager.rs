//! The persistent block store.
//!
//! Blocks are stored back to back in a single file with no header: block `n`
//! occupies bytes `[n * BLOCK_SIZE, (n + 1) * BLOCK_SIZE)`. The number of
//! allocated blocks is recovered from the file length when the store is opened,
//! so the length must stay a multiple of `BLOCK_SIZE`.
use super::api::{block_offset, BlockId, StoreError, BLOCK_SIZE, INVALID_BLOCK_ID};
use super::config::StoreOptions;
use super::device::{BlockDevice, FileDevice};
use log::{debug, trace, warn};
use std::path::{Path, PathBuf};

/// Manages reading, writing and allocating blocks on a block device.
#[derive(Debug)]
pub struct DiskManager {
    device: Box<dyn BlockDevice>,
    path: Option<PathBuf>,
    block_count: u32,
}

impl DiskManager {
    /// Opens (or creates) the block file at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(&StoreOptions::new(path))
    }

    /// Opens the block file described by `options`.
    pub fn open_with(options: &StoreOptions) -> Result<Self, StoreError> {
        let device = FileDevice::open(options).map_err(|source| StoreError::Open {
            path: options.path.clone(),
            source,
        })?;
        let mut manager = Self::with_device(Box::new(device)).map_err(|e| match e {
            StoreError::Sync(source) => StoreError::Open {
                path: options.path.clone(),
                source,
            },
            other => other,
        })?;
        manager.path = Some(options.path.clone());
        Ok(manager)
    }

    /// Builds a store over an already opened device.
    pub fn with_device(device: Box<dyn BlockDevice>) -> Result<Self, StoreError> {
        let len = device.len().map_err(StoreError::Sync)?;
        if len % BLOCK_SIZE as u64 != 0 {
            warn!(
                "block file length {} is not a multiple of {}, ignoring the trailing {} bytes",
                len,
                BLOCK_SIZE,
                len % BLOCK_SIZE as u64
            );
        }
        let blocks = len / BLOCK_SIZE as u64;
        let block_count = u32::try_from(blocks)
            .map_err(|_| StoreError::CapacityExceeded { block_count: blocks })?;
        debug!("block store holds {} blocks", block_count);

        Ok(Self {
            device,
            path: None,
            block_count,
        })
    }

    /// Path of the backing file, if the store is file backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of blocks allocated so far; also the next id to be handed out.
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Appends a zero-filled block, syncs it, and returns its id.
    ///
    /// The count only advances once the zeroes are durable. A failure after a
    /// partial write is not rolled back and may leave a torn tail.
    pub fn allocate_block(&mut self) -> Result<BlockId, StoreError> {
        let block_id = self.block_count;
        if block_id == INVALID_BLOCK_ID {
            return Err(StoreError::CapacityExceeded {
                block_count: block_id as u64,
            });
        }
        let offset = block_offset(block_id);
        let zeroes = [0u8; BLOCK_SIZE];

        self.device
            .write_all_at(&zeroes, offset)
            .map_err(|e| StoreError::from_io(block_id, offset, e))?;
        self.device
            .sync()
            .map_err(|e| StoreError::from_io(block_id, offset, e))?;

        self.block_count += 1;
        debug!("allocated block {} at offset {}", block_id, offset);
        Ok(block_id)
    }

    /// Reads block `block_id` into `data`.
    pub fn read_block(
        &self,
        block_id: BlockId,
        data: &mut [u8; BLOCK_SIZE],
    ) -> Result<(), StoreError> {
        let offset = self.checked_offset(block_id)?;
        trace!("reading block {} at offset {}", block_id, offset);
        self.device
            .read_exact_at(data, offset)
            .map_err(|e| StoreError::from_io(block_id, offset, e))
    }

    /// Overwrites block `block_id` with `data`. Does not sync.
    pub fn write_block(
        &mut self,
        block_id: BlockId,
        data: &[u8; BLOCK_SIZE],
    ) -> Result<(), StoreError> {
        let offset = self.checked_offset(block_id)?;
        trace!("writing block {} at offset {}", block_id, offset);
        self.device
            .write_all_at(data, offset)
            .map_err(|e| StoreError::from_io(block_id, offset, e))
    }

    /// Forces all written blocks to durable storage.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.device.sync().map_err(StoreError::Sync)
    }

    fn checked_offset(&self, block_id: BlockId) -> Result<u64, StoreError> {
        if block_id >= self.block_count {
            return Err(StoreError::OutOfRange {
                block_id,
                block_count: self.block_count,
            });
        }
        Ok(block_offset(block_id))
    }
}
