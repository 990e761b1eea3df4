//! A fixed-capacity cache of disk blocks with pin-counted LRU eviction.
//!
//! [`BufferPool`] is the single-threaded core. [`SharedBufferPool`] wraps it in
//! a mutex for callers that need to share one pool between threads.

pub mod block;
pub mod pool;
pub mod replacer;
pub mod shared;

pub use block::Block;
pub use pool::{BlockHandle, BufferPool};
pub use shared::{SharedBlockGuard, SharedBufferPool};
