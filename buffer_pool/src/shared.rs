//! A buffer pool that can be shared between threads.
//!
//! Every operation takes one pool-wide mutex, so callers get the exact
//! semantics of [`BufferPool`] with calls serialized. Pins are held by
//! [`SharedBlockGuard`]s, which release the block when dropped.

use crate::pool::{BlockHandle, BufferPool};
use common::api::{BlockId, BpmError, BufferPoolManager, ReferenceFault, BLOCK_SIZE};
use common::disk_manager::DiskManager;
use log::warn;
use std::sync::{Mutex, MutexGuard};

/// The mutex-guarded buffer pool.
#[derive(Debug)]
pub struct SharedBufferPool {
    inner: Mutex<BufferPool>,
}

/// A pinned block of a [`SharedBufferPool`].
///
/// The guard does not hold the pool lock between calls; `read` and `write`
/// take it for the duration of the closure. Writing marks the guard dirty and
/// the block is released dirty when the guard goes away.
pub struct SharedBlockGuard<'a> {
    buffer_pool: &'a SharedBufferPool,
    handle: Option<BlockHandle>,
    block_id: BlockId,
    is_dirty: bool,
}

impl SharedBufferPool {
    pub fn new(pool_size: usize, disk_manager: DiskManager) -> Result<Self, BpmError> {
        Ok(Self::from_pool(BufferPool::new(pool_size, disk_manager)?))
    }

    pub fn from_pool(pool: BufferPool) -> Self {
        Self {
            inner: Mutex::new(pool),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferPool> {
        // The pool's bookkeeping is updated before any call that can panic,
        // so the state behind a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fetch_block(&self, block_id: BlockId) -> Result<SharedBlockGuard<'_>, BpmError> {
        let handle = self.lock().fetch_block(block_id)?;
        Ok(SharedBlockGuard::new(self, handle))
    }

    pub fn new_block(&self) -> Result<SharedBlockGuard<'_>, BpmError> {
        let handle = self.lock().new_block()?;
        Ok(SharedBlockGuard::new(self, handle))
    }

    pub fn flush_block(&self, block_id: BlockId) -> Result<(), BpmError> {
        self.lock().flush_block(block_id)
    }

    pub fn flush_all_blocks(&self) -> Result<(), BpmError> {
        self.lock().flush_all_blocks()
    }

    /// Runs `f` with exclusive access to the underlying pool.
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut BufferPool) -> R) -> R {
        let mut pool = self.lock();
        f(&mut *pool)
    }

    pub fn into_inner(self) -> BufferPool {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<'a> SharedBlockGuard<'a> {
    fn new(buffer_pool: &'a SharedBufferPool, handle: BlockHandle) -> Self {
        Self {
            buffer_pool,
            block_id: handle.block_id(),
            handle: Some(handle),
            is_dirty: false,
        }
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    fn handle(&self) -> Result<&BlockHandle, BpmError> {
        self.handle.as_ref().ok_or(BpmError::InvalidReference {
            block_id: self.block_id,
            reason: ReferenceFault::Unbalanced,
        })
    }

    /// Calls `f` with the block's bytes.
    pub fn read<R>(&self, f: impl FnOnce(&[u8; BLOCK_SIZE]) -> R) -> Result<R, BpmError> {
        let handle = self.handle()?;
        let pool = self.buffer_pool.lock();
        Ok(f(pool.block(handle)?.data()))
    }

    /// Calls `f` with the block's bytes for writing.
    pub fn write<R>(&mut self, f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R) -> Result<R, BpmError> {
        let handle = self.handle()?;
        let mut pool = self.buffer_pool.lock();
        let res = f(pool.block_mut(handle)?.data_mut());
        self.is_dirty = true;
        Ok(res)
    }

    /// Releases the pin now, reporting any failure.
    pub fn release(mut self) -> Result<(), BpmError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), BpmError> {
        match self.handle.take() {
            Some(handle) => self.buffer_pool.lock().release(handle, self.is_dirty),
            None => Ok(()),
        }
    }
}

impl BufferPoolManager for SharedBufferPool {
    fn create_block<R>(
        &mut self,
        f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R,
    ) -> Result<(BlockId, R), BpmError> {
        let mut guard = SharedBufferPool::new_block(self)?;
        let res = guard.write(f)?;
        let block_id = guard.block_id();
        guard.release()?;
        Ok((block_id, res))
    }

    fn read_block<R>(
        &mut self,
        block_id: BlockId,
        f: impl FnOnce(&[u8; BLOCK_SIZE]) -> R,
    ) -> Result<R, BpmError> {
        let guard = SharedBufferPool::fetch_block(self, block_id)?;
        let res = guard.read(f)?;
        guard.release()?;
        Ok(res)
    }

    fn write_block<R>(
        &mut self,
        block_id: BlockId,
        f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R,
    ) -> Result<R, BpmError> {
        let mut guard = SharedBufferPool::fetch_block(self, block_id)?;
        let res = guard.write(f)?;
        guard.release()?;
        Ok(res)
    }

    fn flush_block(&mut self, block_id: BlockId) -> Result<(), BpmError> {
        SharedBufferPool::flush_block(self, block_id)
    }

    fn flush_all_blocks(&mut self) -> Result<(), BpmError> {
        SharedBufferPool::flush_all_blocks(self)
    }
}

impl Drop for SharedBlockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("failed to release block {}: {}", self.block_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::device::MemoryDevice;

    fn shared_pool(pool_size: usize) -> (SharedBufferPool, MemoryDevice) {
        let device = MemoryDevice::new();
        let disk_manager = DiskManager::with_device(Box::new(device.clone())).unwrap();
        (SharedBufferPool::new(pool_size, disk_manager).unwrap(), device)
    }

    #[test]
    fn guard_releases_on_drop() {
        let (pool, _) = shared_pool(2);
        let guard = pool.new_block().unwrap();
        assert_eq!(pool.with_pool(|p| p.pin_count(0)), Some(1));
        drop(guard);
        assert_eq!(pool.with_pool(|p| p.pin_count(0)), Some(0));
    }

    #[test]
    fn write_marks_block_dirty_on_release() {
        let (pool, _) = shared_pool(2);
        let mut guard = pool.new_block().unwrap();
        assert!(!guard.is_dirty());
        guard.write(|data| data[0] = 42).unwrap();
        assert!(guard.is_dirty());
        assert_eq!(pool.with_pool(|p| p.is_dirty(0)), Some(false));

        guard.release().unwrap();
        assert_eq!(pool.with_pool(|p| p.is_dirty(0)), Some(true));
    }

    #[test]
    fn read_only_guard_releases_clean() {
        let (pool, _) = shared_pool(2);
        drop(pool.new_block().unwrap());
        let guard = pool.fetch_block(0).unwrap();
        assert_eq!(guard.read(|data| data[0]).unwrap(), 0);
        drop(guard);
        assert_eq!(pool.with_pool(|p| p.is_dirty(0)), Some(false));
    }

    #[test]
    fn into_inner_returns_the_pool() {
        let (pool, _) = shared_pool(3);
        drop(pool.new_block().unwrap());
        let pool = pool.into_inner();
        assert_eq!(pool.pool_size(), 3);
        assert!(pool.is_resident(0));
    }
}
