//! Shared types and the persistent block store used by the buffer pool.

pub mod api;
pub mod config;
pub mod device;
pub mod disk_manager;
