use common::api::{BlockId, BLOCK_SIZE, INVALID_BLOCK_ID};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// The content of one frame in the buffer pool.
///
/// The bytes live in a heap allocation made once when the pool is built, so a
/// frame's data never moves while the pool is alive. Only the pool changes the
/// metadata; callers read it through the accessors and write the bytes through
/// `DerefMut`.
pub struct Block {
    pub(crate) data: Box<[u8; BLOCK_SIZE]>,
    pub(crate) block_id: BlockId,
    pub(crate) pin_count: u32,
    pub(crate) is_dirty: bool,
}

impl Block {
    pub(crate) fn new() -> Self {
        Self {
            data: Box::new([0; BLOCK_SIZE]),
            block_id: INVALID_BLOCK_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }

    /// Id of the block held by this frame, `INVALID_BLOCK_ID` when unused.
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn data(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data
    }

    /// Zeroes the bytes and clears the metadata.
    pub(crate) fn reset(&mut self) {
        self.data.fill(0);
        self.block_id = INVALID_BLOCK_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

impl Deref for Block {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.data[..]
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data[..]
    }
}

// The bytes are left out, a 4 KiB dump is never useful in a panic message.
impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("block_id", &self.block_id)
            .field("pin_count", &self.pin_count)
            .field("is_dirty", &self.is_dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_everything() {
        let mut block = Block::new();
        block.block_id = 4;
        block.pin_count = 2;
        block.is_dirty = true;
        block[10] = 0xAB;

        block.reset();
        assert_eq!(block.block_id(), INVALID_BLOCK_ID);
        assert_eq!(block.pin_count(), 0);
        assert!(!block.is_dirty());
        assert!(block.iter().all(|&b| b == 0));
    }

    #[test]
    fn reset_keeps_the_allocation() {
        let mut block = Block::new();
        let before = block.data.as_ptr();
        block.reset();
        assert_eq!(before, block.data.as_ptr());
    }
}
