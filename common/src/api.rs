//! Defines the identifiers, constants and errors shared by the block store and
//! the buffer pools, and the API every buffer pool implements.
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A unique identifier for a block in the backing file.
///
/// Ids are dense and zero-based: block `n` lives at byte offset
/// `n * BLOCK_SIZE`. They are handed out only by allocation and never reused.
pub type BlockId = u32;

/// An index into the buffer pool's fixed array of frames.
pub type FrameId = usize;

/// A constant to represent an unused frame.
pub const INVALID_BLOCK_ID: BlockId = BlockId::MAX;

/// The size of a single block in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Byte offset of a block inside the backing file.
pub fn block_offset(block_id: BlockId) -> u64 {
    block_id as u64 * BLOCK_SIZE as u64
}

/// Errors raised by the persistent block store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The block was never allocated in this store.
    #[error("block {block_id} is out of range (allocated blocks: {block_count})")]
    OutOfRange { block_id: BlockId, block_count: u32 },

    /// The backing file ended before a whole block could be read.
    #[error("reached end of file while reading block {block_id} at offset {offset}")]
    UnexpectedEof { block_id: BlockId, offset: u64 },

    /// Any other positioning, read, write or sync fault.
    #[error("i/o failure on block {block_id} at offset {offset}: {source}")]
    Io {
        block_id: BlockId,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// A sync of the whole file failed.
    #[error("failed to sync block store: {0}")]
    Sync(#[source] io::Error),

    /// Every block id below the invalid sentinel has been handed out, or the
    /// backing file holds more blocks than an id can address.
    #[error("block store is full: {block_count} blocks, at most {} can be addressed", INVALID_BLOCK_ID)]
    CapacityExceeded { block_count: u64 },

    /// The backing file could not be opened or created.
    #[error("failed to open block store {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A specialized error type for buffer pool operations.
#[derive(Debug, Error)]
pub enum BpmError {
    /// Returned when the pool is full and no frame can be evicted.
    #[error("all {pool_size} frames are pinned, no frame can be evicted")]
    NoFreeFrames { pool_size: usize },

    /// Release of a block the caller holds no pin on.
    #[error("invalid reference to block {block_id}: {reason}")]
    InvalidReference {
        block_id: BlockId,
        reason: ReferenceFault,
    },

    /// A handle was used after its frame had been given to another block.
    #[error("handle for block {block_id} is stale, frame {frame_id} was reused")]
    StaleHandle { block_id: BlockId, frame_id: FrameId },

    /// The pool was configured with values it cannot run with.
    #[error("invalid buffer pool configuration: {0}")]
    InvalidConfig(String),

    /// Represents an error from the block store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a release named a block the caller holds no pin on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFault {
    /// The block is not resident in the pool.
    NotResident,
    /// The block is resident but every pin on it was already released.
    Unbalanced,
}

impl fmt::Display for ReferenceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceFault::NotResident => f.write_str("not resident in the buffer pool"),
            ReferenceFault::Unbalanced => f.write_str("released more times than it was pinned"),
        }
    }
}

/// The operations every buffer pool implementation offers.
///
/// Block bytes are lent to a closure for the duration of one pin, so the trait
/// fits pools that hand out checked handles as well as pools whose guards take
/// a lock on every access.
pub trait BufferPoolManager {
    /// Allocates a zero-filled block, calls `f` with its bytes and releases it
    /// dirty. Returns the new id alongside `f`'s result.
    fn create_block<R>(
        &mut self,
        f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R,
    ) -> Result<(BlockId, R), BpmError>;

    /// Pins `block_id`, calls `f` with its bytes and releases it clean.
    fn read_block<R>(
        &mut self,
        block_id: BlockId,
        f: impl FnOnce(&[u8; BLOCK_SIZE]) -> R,
    ) -> Result<R, BpmError>;

    /// Pins `block_id`, lets `f` modify its bytes and releases it dirty.
    fn write_block<R>(
        &mut self,
        block_id: BlockId,
        f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R,
    ) -> Result<R, BpmError>;

    /// Writes `block_id` back if it is resident and dirty.
    fn flush_block(&mut self, block_id: BlockId) -> Result<(), BpmError>;

    /// Writes back every dirty block and syncs the store.
    fn flush_all_blocks(&mut self) -> Result<(), BpmError>;
}

impl StoreError {
    /// Classifies a device error raised while touching `block_id`.
    pub fn from_io(block_id: BlockId, offset: u64, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            StoreError::UnexpectedEof { block_id, offset }
        } else {
            StoreError::Io {
                block_id,
                offset,
                source,
            }
        }
    }
}
