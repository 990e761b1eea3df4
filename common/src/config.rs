//! Configuration for the block store and the buffer pool.
use std::path::{Path, PathBuf};

/// Number of frames used when the caller does not pick one.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// How the block store opens its backing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub path: PathBuf,
    /// Create the file when it does not exist yet.
    pub create: bool,
    /// Tell the kernel that reads are random, disabling readahead.
    pub access_hint: bool,
}

impl StoreOptions {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            create: true,
            access_hint: true,
        }
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn access_hint(mut self, access_hint: bool) -> Self {
        self.access_hint = access_hint;
        self
    }
}

/// Sizing of the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub pool_size: usize,
}

impl PoolConfig {
    pub fn new(pool_size: usize) -> Self {
        Self { pool_size }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_options_builder() {
        let options = StoreOptions::new("blocks.db").create(false).access_hint(false);
        assert_eq!(options.path, PathBuf::from("blocks.db"));
        assert!(!options.create);
        assert!(!options.access_hint);
    }

    #[test]
    fn default_pool_size() {
        assert_eq!(PoolConfig::default().pool_size, DEFAULT_POOL_SIZE);
    }
}
