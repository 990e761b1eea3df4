//! Random-access byte devices the block store is built on.
//!
//! The block store only needs four things from its storage: exact-length reads
//! and writes at an offset, a durable flush and the current length. `FileDevice`
//! provides them over a regular file; `MemoryDevice` keeps the bytes in memory
//! and can be told to fail, which is how the error paths get tested.
use crate::config::StoreOptions;
use log::{debug, warn};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt; // Positioned I/O, no shared seek cursor
use std::sync::{Arc, Mutex, MutexGuard};

/// A byte-addressed persistent store.
pub trait BlockDevice: Send + Debug {
    /// Fills `buf` from `offset`, failing with `UnexpectedEof` on a short read.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Writes all of `buf` at `offset`, extending the device if needed.
    fn write_all_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()>;

    /// Forces previously written bytes to durable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Current length in bytes.
    fn len(&self) -> io::Result<u64>;

    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A block device backed by a file on disk.
#[derive(Debug)]
pub struct FileDevice {
    file: File,
}

impl FileDevice {
    /// Opens the file named by `options`, creating it empty if allowed.
    pub fn open(options: &StoreOptions) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(options.create)
            .open(&options.path)?;

        if options.access_hint {
            advise_random(&file);
        }

        debug!("opened block device {}", options.path.display());
        Ok(Self { file })
    }
}

#[cfg(target_os = "linux")]
fn advise_random(file: &File) {
    use std::os::unix::io::AsRawFd;

    // posix_fadvise returns the error number instead of setting errno.
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_RANDOM) };
    if rc != 0 {
        warn!(
            "posix_fadvise(RANDOM) failed: {}",
            io::Error::from_raw_os_error(rc)
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_random(_file: &File) {}

impl BlockDevice for FileDevice {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    fn write_all_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.file.write_all_at(buf, offset)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    data: Vec<u8>,
    fail_reads: bool,
    fail_writes: bool,
    fail_syncs: bool,
    writes: usize,
    syncs: usize,
}

/// An in-memory block device.
///
/// Clones share the same bytes, so a test can keep one clone to inject faults
/// or inspect the contents after handing the other to a store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that starts out holding `data`.
    pub fn with_contents(data: Vec<u8>) -> Self {
        let device = Self::default();
        device.state().data = data;
        device
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the bytes from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn set_fail_syncs(&self, fail: bool) {
        self.state().fail_syncs = fail;
    }

    /// Cuts the device down to `len` bytes.
    pub fn truncate(&self, len: u64) {
        self.state().data.truncate(len as usize);
    }

    /// Copy of the current bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.state().data.clone()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    /// Number of successful syncs so far.
    pub fn sync_count(&self) -> usize {
        self.state().syncs
    }
}

fn injected(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected {} failure", what))
}

impl BlockDevice for MemoryDevice {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let state = self.state();
        if state.fail_reads {
            return Err(injected("read"));
        }
        let start = offset as usize;
        let end = start + buf.len();
        if end > state.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            ));
        }
        buf.copy_from_slice(&state.data[start..end]);
        Ok(())
    }

    fn write_all_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(injected("write"));
        }
        let start = offset as usize;
        let end = start + buf.len();
        if end > state.data.len() {
            state.data.resize(end, 0);
        }
        state.data[start..end].copy_from_slice(buf);
        state.writes += 1;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_syncs {
            return Err(injected("sync"));
        }
        state.syncs += 1;
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.state().data.len() as u64)
    }
}
