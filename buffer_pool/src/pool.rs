//! The single-threaded buffer pool.

use crate::block::Block;
use crate::replacer::LruReplacer;
use common::api::{
    BlockId, BpmError, BufferPoolManager, FrameId, ReferenceFault, StoreError, BLOCK_SIZE,
};
use common::config::PoolConfig;
use common::disk_manager::DiskManager;
use log::{debug, trace, warn};
use std::collections::{HashMap, VecDeque};

/// A checked reference to a pinned block.
///
/// A handle names the frame the block was loaded into and the generation of
/// that frame at the time. Every frame's generation is bumped when it is given
/// to another block, so a handle kept past its release and the frame's reuse
/// is rejected by [`BufferPool::block`] instead of exposing another block's
/// bytes.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pinned block stays in the pool until it is released"]
pub struct BlockHandle {
    block_id: BlockId,
    frame_id: FrameId,
    generation: u64,
}

impl BlockHandle {
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

/// A fixed number of frames caching blocks of a [`DiskManager`].
///
/// Blocks are pinned by [`fetch_block`](Self::fetch_block) and
/// [`new_block`](Self::new_block) and unpinned by
/// [`release_block`](Self::release_block). Only unpinned frames are evicted,
/// least recently used first, and dirty frames are written back before their
/// storage is reused. Dropping the pool flushes every dirty block.
#[derive(Debug)]
pub struct BufferPool {
    frames: Vec<Block>,
    generations: Vec<u64>,
    block_table: HashMap<BlockId, FrameId>,
    replacer: LruReplacer,
    free_list: VecDeque<FrameId>,
    disk_manager: DiskManager,
    closed: bool,
}

impl BufferPool {
    /// Creates a pool of `pool_size` frames over `disk_manager`.
    pub fn new(pool_size: usize, disk_manager: DiskManager) -> Result<Self, BpmError> {
        Self::with_config(PoolConfig::new(pool_size), disk_manager)
    }

    pub fn with_config(config: PoolConfig, disk_manager: DiskManager) -> Result<Self, BpmError> {
        let pool_size = config.pool_size;
        if pool_size == 0 {
            return Err(BpmError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }

        let frames = (0..pool_size).map(|_| Block::new()).collect();
        debug!("created buffer pool with {} frames", pool_size);

        Ok(Self {
            frames,
            generations: vec![0; pool_size],
            block_table: HashMap::with_capacity(pool_size),
            replacer: LruReplacer::new(pool_size),
            free_list: (0..pool_size).collect(),
            disk_manager,
            closed: false,
        })
    }

    /// Pins block `block_id`, reading it from disk if it is not resident.
    pub fn fetch_block(&mut self, block_id: BlockId) -> Result<BlockHandle, BpmError> {
        if let Some(&frame_id) = self.block_table.get(&block_id) {
            self.frames[frame_id].pin_count += 1;
            self.replacer.touch(frame_id);
            trace!("hit block {} in frame {}", block_id, frame_id);
            return Ok(self.handle(frame_id));
        }

        // Checked up front so a bad id never costs a resident block its frame.
        let block_count = self.disk_manager.block_count();
        if block_id >= block_count {
            return Err(StoreError::OutOfRange {
                block_id,
                block_count,
            }
            .into());
        }

        let frame_id = self.acquire_frame()?;
        if let Err(e) = self
            .disk_manager
            .read_block(block_id, &mut self.frames[frame_id].data)
        {
            self.release_frame(frame_id);
            return Err(e.into());
        }

        self.bind_frame(frame_id, block_id);
        trace!("miss block {}, loaded into frame {}", block_id, frame_id);
        Ok(self.handle(frame_id))
    }

    /// Allocates a zero-filled block on disk and pins it.
    ///
    /// The block is allocated before a frame is looked for. If no frame can be
    /// had, the block stays allocated on disk without being cached and the
    /// next call gets the following id.
    pub fn new_block(&mut self) -> Result<BlockHandle, BpmError> {
        let block_id = self.disk_manager.allocate_block()?;
        let frame_id = self.acquire_frame().map_err(|e| {
            warn!("block {} allocated but not cached: {}", block_id, e);
            e
        })?;

        self.bind_frame(frame_id, block_id);
        debug!("new block {} in frame {}", block_id, frame_id);
        Ok(self.handle(frame_id))
    }

    /// Unpins one reference to `block_id`, marking it dirty if asked.
    ///
    /// The dirty flag is sticky: releasing with `mark_dirty == false` never
    /// clears it, only a flush does.
    pub fn release_block(&mut self, block_id: BlockId, mark_dirty: bool) -> Result<(), BpmError> {
        let frame_id = *self
            .block_table
            .get(&block_id)
            .ok_or(BpmError::InvalidReference {
                block_id,
                reason: ReferenceFault::NotResident,
            })?;

        let block = &mut self.frames[frame_id];
        if block.pin_count == 0 {
            return Err(BpmError::InvalidReference {
                block_id,
                reason: ReferenceFault::Unbalanced,
            });
        }
        block.pin_count -= 1;
        if mark_dirty {
            block.is_dirty = true;
        }
        trace!(
            "released block {} (pins left: {}, dirty: {})",
            block_id,
            block.pin_count,
            block.is_dirty
        );
        Ok(())
    }

    /// Releases the pin held by `handle`.
    pub fn release(&mut self, handle: BlockHandle, mark_dirty: bool) -> Result<(), BpmError> {
        self.check(&handle)?;
        self.release_block(handle.block_id, mark_dirty)
    }

    /// The block behind a live handle.
    pub fn block(&self, handle: &BlockHandle) -> Result<&Block, BpmError> {
        self.check(handle)?;
        Ok(&self.frames[handle.frame_id])
    }

    /// Mutable access to the block behind a live handle.
    ///
    /// Writing does not mark the block dirty; release it with
    /// `mark_dirty == true` for the change to be written back.
    pub fn block_mut(&mut self, handle: &BlockHandle) -> Result<&mut Block, BpmError> {
        self.check(handle)?;
        Ok(&mut self.frames[handle.frame_id])
    }

    /// Writes `block_id` back to disk if it is resident and dirty.
    ///
    /// Pinned blocks are flushed too.
    pub fn flush_block(&mut self, block_id: BlockId) -> Result<(), BpmError> {
        if let Some(&frame_id) = self.block_table.get(&block_id) {
            if self.frames[frame_id].is_dirty {
                self.write_back(frame_id)?;
            }
        }
        Ok(())
    }

    /// Writes back every dirty block, then syncs the store once.
    pub fn flush_all_blocks(&mut self) -> Result<(), BpmError> {
        let mut flushed = 0;
        for frame_id in 0..self.frames.len() {
            if self.frames[frame_id].is_dirty {
                self.write_back(frame_id)?;
                flushed += 1;
            }
        }
        self.disk_manager.sync()?;
        debug!("flushed {} dirty blocks", flushed);
        Ok(())
    }

    /// Flushes everything and shuts the pool down, reporting any failure that
    /// `Drop` could only log.
    pub fn close(mut self) -> Result<(), BpmError> {
        let res = self.flush_all_blocks();
        self.closed = true;
        res
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn resident_count(&self) -> usize {
        self.block_table.len()
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn is_resident(&self, block_id: BlockId) -> bool {
        self.block_table.contains_key(&block_id)
    }

    /// Pin count of a resident block.
    pub fn pin_count(&self, block_id: BlockId) -> Option<u32> {
        self.resident(block_id).map(Block::pin_count)
    }

    /// Dirty flag of a resident block.
    pub fn is_dirty(&self, block_id: BlockId) -> Option<bool> {
        self.resident(block_id).map(Block::is_dirty)
    }

    pub fn disk_manager(&self) -> &DiskManager {
        &self.disk_manager
    }

    fn resident(&self, block_id: BlockId) -> Option<&Block> {
        self.block_table
            .get(&block_id)
            .map(|&frame_id| &self.frames[frame_id])
    }

    fn handle(&self, frame_id: FrameId) -> BlockHandle {
        BlockHandle {
            block_id: self.frames[frame_id].block_id,
            frame_id,
            generation: self.generations[frame_id],
        }
    }

    fn check(&self, handle: &BlockHandle) -> Result<(), BpmError> {
        let live = match (
            self.frames.get(handle.frame_id),
            self.generations.get(handle.frame_id),
        ) {
            (Some(block), Some(&generation)) => {
                generation == handle.generation
                    && block.block_id == handle.block_id
                    && block.pin_count > 0
            }
            _ => false,
        };
        if live {
            Ok(())
        } else {
            Err(BpmError::StaleHandle {
                block_id: handle.block_id,
                frame_id: handle.frame_id,
            })
        }
    }

    /// Finds a frame for a new resident block: a free one if there is any,
    /// otherwise the least recently used unpinned one.
    ///
    /// The returned frame is zeroed, unbound and in neither the free list nor
    /// the replacer.
    fn acquire_frame(&mut self) -> Result<FrameId, BpmError> {
        let frame_id = match self.free_list.pop_front() {
            Some(frame_id) => frame_id,
            None => self.evict()?,
        };

        self.frames[frame_id].reset();
        self.generations[frame_id] += 1;
        Ok(frame_id)
    }

    fn evict(&mut self) -> Result<FrameId, BpmError> {
        let frames = &self.frames;
        let frame_id = self
            .replacer
            .victim(|frame_id| frames[frame_id].pin_count == 0)
            .ok_or(BpmError::NoFreeFrames {
                pool_size: self.frames.len(),
            })?;

        // On a failed write-back the victim stays resident and dirty.
        if self.frames[frame_id].is_dirty {
            self.write_back(frame_id)?;
        }

        let block_id = self.frames[frame_id].block_id;
        self.block_table.remove(&block_id);
        self.replacer.remove(frame_id);
        debug!("evicted block {} from frame {}", block_id, frame_id);
        Ok(frame_id)
    }

    /// Puts a frame that was acquired but never bound back on the free list.
    fn release_frame(&mut self, frame_id: FrameId) {
        self.frames[frame_id].reset();
        self.generations[frame_id] += 1;
        self.free_list.push_back(frame_id);
    }

    fn bind_frame(&mut self, frame_id: FrameId, block_id: BlockId) {
        let block = &mut self.frames[frame_id];
        block.block_id = block_id;
        block.pin_count = 1;
        block.is_dirty = false;
        self.block_table.insert(block_id, frame_id);
        self.replacer.touch(frame_id);
    }

    fn write_back(&mut self, frame_id: FrameId) -> Result<(), BpmError> {
        let block = &mut self.frames[frame_id];
        self.disk_manager.write_block(block.block_id, &block.data)?;
        block.is_dirty = false;
        trace!("wrote back block {} from frame {}", block.block_id, frame_id);
        Ok(())
    }
}

impl BufferPoolManager for BufferPool {
    fn create_block<R>(
        &mut self,
        f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R,
    ) -> Result<(BlockId, R), BpmError> {
        let handle = self.new_block()?;
        let block_id = handle.block_id;
        let res = self.block_mut(&handle).map(|block| f(block.data_mut()));
        self.release(handle, true)?;
        Ok((block_id, res?))
    }

    fn read_block<R>(
        &mut self,
        block_id: BlockId,
        f: impl FnOnce(&[u8; BLOCK_SIZE]) -> R,
    ) -> Result<R, BpmError> {
        let handle = self.fetch_block(block_id)?;
        let res = self.block(&handle).map(|block| f(block.data()));
        self.release(handle, false)?;
        res
    }

    fn write_block<R>(
        &mut self,
        block_id: BlockId,
        f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R,
    ) -> Result<R, BpmError> {
        let handle = self.fetch_block(block_id)?;
        let res = self.block_mut(&handle).map(|block| f(block.data_mut()));
        self.release(handle, true)?;
        res
    }

    fn flush_block(&mut self, block_id: BlockId) -> Result<(), BpmError> {
        BufferPool::flush_block(self, block_id)
    }

    fn flush_all_blocks(&mut self) -> Result<(), BpmError> {
        BufferPool::flush_all_blocks(self)
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.flush_all_blocks() {
            warn!("failed to flush buffer pool on drop: {}", e);
        }
    }
}
