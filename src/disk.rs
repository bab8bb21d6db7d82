//! Fixed-size page I/O against a single backing file.
//!
//! Grounded on `original_source/server/disk/disk_manager.c`: a single
//! global lock serializes every operation, `allocate_page` is a
//! monotonic counter seeded from the file's current size, and reads
//! past end-of-file return a zero-filled page rather than failing.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

pub const PAGE_SIZE: usize = 4096;

/// First page id handed out to a freshly created database; pages below
/// this are reserved for the system catalog (see `catalog.rs`).
pub const FIRST_USER_PAGE_ID: u32 = 10;

struct Inner {
    file: File,
    path: String,
    next_page_id: u32,
}

/// Owns the database file. All operations are serialized by a single
/// mutex; this layer is not a throughput target.
pub struct DiskManager {
    inner: Mutex<Inner>,
}

impl DiskManager {
    pub fn open(path: &str) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| StorageError::disk_io(path, e))?;

        let file_size = file
            .metadata()
            .map_err(|e| StorageError::disk_io(path, e))?
            .len();
        let next_page_id = ((file_size as usize + PAGE_SIZE - 1) / PAGE_SIZE) as u32 + 1;

        debug!(path, next_page_id, "disk manager opened");

        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                path: path.to_string(),
                next_page_id,
            }),
        })
    }

    /// Reads page `page_id` into a freshly allocated 4096-byte buffer.
    /// A page id past the current end of file yields a zero-filled
    /// buffer rather than an error, so newly allocated pages read as
    /// implicitly zeroed.
    pub fn read_page(&self, page_id: u32) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let file_len = inner
            .file
            .metadata()
            .map_err(|e| StorageError::disk_io(&inner.path, e))?
            .len();

        let mut buf = vec![0u8; PAGE_SIZE];
        if offset >= file_len {
            return Ok(buf);
        }

        inner
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::disk_io(&inner.path, e))?;

        let available = (file_len - offset).min(PAGE_SIZE as u64) as usize;
        inner
            .file
            .read_exact(&mut buf[..available])
            .map_err(|e| StorageError::disk_io(&inner.path, e))?;

        Ok(buf)
    }

    /// Writes `buf` (must be exactly 4096 bytes) at `page_id`'s offset
    /// and `fsync`s before returning.
    pub fn write_page(&self, page_id: u32, buf: &[u8]) -> StorageResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "page buffer must be exactly {} bytes", PAGE_SIZE);

        let mut inner = self.inner.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;

        inner
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::disk_io(&inner.path, e))?;
        inner
            .file
            .write_all(buf)
            .map_err(|e| StorageError::disk_io(&inner.path, e))?;
        inner.file.sync_all().map_err(|e| {
            warn!(page_id, "fsync failed after page write");
            StorageError::disk_io(&inner.path, e)
        })?;

        Ok(())
    }

    /// Hands out the next monotonically increasing page id. Never
    /// recycled within a database's lifetime.
    pub fn allocate_page(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_page_id;
        inner.next_page_id += 1;
        id
    }

    /// Ensures the allocator never hands out `page_id` or anything
    /// below it. Used when a page id is assigned out of band (a
    /// table's head page equals its `table_id` by construction, and
    /// system pages are fixed), so the monotonic counter must be
    /// bumped past it to avoid a future collision.
    pub fn reserve_page(&self, page_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        if inner.next_page_id <= page_id {
            inner.next_page_id = page_id + 1;
        }
    }

    pub fn close(&self) -> StorageResult<()> {
        let inner = self.inner.lock().unwrap();
        inner.file.sync_all().map_err(|e| StorageError::disk_io(&inner.path, e))
    }
}
