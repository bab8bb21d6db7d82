//! Write-ahead log: fixed-size append-only records with a real CRC32
//! checksum.
//!
//! Grounded on `transaction/log_aries.rs`'s `RecordType`/`LogManager`
//! shape, cross-checked against `original_source/common/wal_types.h`
//! and `original_source/server/wal/wal_manager.c` for the exact field
//! layout.
//!
//! The source's own `WAL_RECORD_SIZE` (512) is internally inconsistent:
//! the two 256-byte image fields alone consume all 512 bytes, leaving
//! no room for `type`, `txn_id`, `lsn`, `prev_lsn`, `page_id`,
//! `record_size` or `checksum` — and the original C code never actually
//! uses that constant for on-disk offsets, it uses `sizeof(WALRecord)`
//! instead. This module defines the real record size as a computed
//! constant from the field layout rather than repeat that inconsistency.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::{StorageError, StorageResult};
use crate::io::{decode_fixed_str, encode_fixed_str};

pub const IMAGE_SIZE: usize = 256;

/// `1(type) + 4(txn_id) + 8(lsn) + 8(prev_lsn) + 4(page_id) +
/// 4(record_size) + 256(before_image) + 256(after_image) + 4(checksum)`.
pub const WAL_RECORD_SIZE: usize = 1 + 4 + 8 + 8 + 4 + 4 + IMAGE_SIZE + IMAGE_SIZE + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Begin,
    Commit,
    Abort,
    Insert,
    Update,
    Delete,
    Checkpoint,
    Ddl,
    /// Structural: a data page's chain was extended with a freshly
    /// allocated successor. Physical, not logical — redone unconditionally
    /// regardless of which transaction's insert triggered it, and never
    /// undone (see `recovery.rs`).
    LinkPage,
}

impl RecordType {
    fn tag(&self) -> u8 {
        match self {
            RecordType::Begin => 0,
            RecordType::Commit => 1,
            RecordType::Abort => 2,
            RecordType::Insert => 3,
            RecordType::Update => 4,
            RecordType::Delete => 5,
            RecordType::Checkpoint => 6,
            RecordType::Ddl => 7,
            RecordType::LinkPage => 8,
        }
    }

    fn from_tag(tag: u8) -> StorageResult<Self> {
        match tag {
            0 => Ok(RecordType::Begin),
            1 => Ok(RecordType::Commit),
            2 => Ok(RecordType::Abort),
            3 => Ok(RecordType::Insert),
            4 => Ok(RecordType::Update),
            5 => Ok(RecordType::Delete),
            6 => Ok(RecordType::Checkpoint),
            7 => Ok(RecordType::Ddl),
            8 => Ok(RecordType::LinkPage),
            other => Err(StorageError::WalCorruption {
                lsn: 0,
                reason: format!("invalid record type tag {}", other),
            }),
        }
    }

    pub fn is_data_mutation(&self) -> bool {
        matches!(self, RecordType::Insert | RecordType::Update | RecordType::Delete)
    }
}

#[derive(Debug, Clone)]
pub struct WalRecord {
    pub record_type: RecordType,
    pub txn_id: u32,
    pub lsn: u64,
    pub prev_lsn: u64,
    pub page_id: u32,
    pub record_size: u32,
    pub before_image: Vec<u8>,
    pub after_image: Vec<u8>,
}

impl WalRecord {
    fn encode(&self, lsn: u64) -> [u8; WAL_RECORD_SIZE] {
        let mut buf = [0u8; WAL_RECORD_SIZE];
        let mut offset = 0usize;

        buf[offset] = self.record_type.tag();
        offset += 1;
        buf[offset..offset + 4].copy_from_slice(&self.txn_id.to_le_bytes());
        offset += 4;
        buf[offset..offset + 8].copy_from_slice(&lsn.to_le_bytes());
        offset += 8;
        buf[offset..offset + 8].copy_from_slice(&self.prev_lsn.to_le_bytes());
        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&self.page_id.to_le_bytes());
        offset += 4;
        buf[offset..offset + 4].copy_from_slice(&self.record_size.to_le_bytes());
        offset += 4;

        // before/after images are opaque bytes, padded/truncated to the
        // fixed width.
        let mut before_buf = [0u8; IMAGE_SIZE];
        let n = self.before_image.len().min(IMAGE_SIZE);
        before_buf[..n].copy_from_slice(&self.before_image[..n]);
        buf[offset..offset + IMAGE_SIZE].copy_from_slice(&before_buf);
        offset += IMAGE_SIZE;

        let mut after_buf = [0u8; IMAGE_SIZE];
        let n = self.after_image.len().min(IMAGE_SIZE);
        after_buf[..n].copy_from_slice(&self.after_image[..n]);
        buf[offset..offset + IMAGE_SIZE].copy_from_slice(&after_buf);
        offset += IMAGE_SIZE;

        // checksum field is zeroed during its own computation
        let checksum = crc32fast::hash(&buf[..offset]);
        buf[offset..offset + 4].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    fn decode(bytes: &[u8], lsn: u64) -> StorageResult<Self> {
        if bytes.len() != WAL_RECORD_SIZE {
            return Err(StorageError::WalCorruption {
                lsn,
                reason: format!("short record: {} bytes", bytes.len()),
            });
        }

        let checksum_offset = WAL_RECORD_SIZE - 4;
        let expected = crc32fast::hash(&bytes[..checksum_offset]);
        let stored = u32::from_le_bytes(bytes[checksum_offset..].try_into().unwrap());
        if expected != stored {
            return Err(StorageError::WalCorruption {
                lsn,
                reason: "checksum mismatch".to_string(),
            });
        }

        let mut offset = 0usize;
        let record_type = RecordType::from_tag(bytes[offset])?;
        offset += 1;
        let txn_id = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let record_lsn = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let prev_lsn = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let page_id = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let record_size = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let before_image = bytes[offset..offset + IMAGE_SIZE].to_vec();
        offset += IMAGE_SIZE;
        let after_image = bytes[offset..offset + IMAGE_SIZE].to_vec();

        debug_assert_eq!(record_lsn, lsn);

        Ok(WalRecord {
            record_type,
            txn_id,
            lsn: record_lsn,
            prev_lsn,
            page_id,
            record_size,
            before_image,
            after_image,
        })
    }
}

struct Inner {
    file: File,
    path: String,
    current_lsn: u64,
}

/// Append-only log of fixed-width records. Every `append` `fsync`s
/// before returning, per the WAL rule: a page mutation must never be
/// observable before its WAL record is durable.
pub struct WalManager {
    inner: Mutex<Inner>,
}

impl WalManager {
    pub fn open(path: &str) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| StorageError::disk_io(path, e))?;

        let file_len = file.metadata().map_err(|e| StorageError::disk_io(path, e))?.len();
        let current_lsn = file_len / WAL_RECORD_SIZE as u64;

        info!(path, current_lsn, "wal opened");

        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                path: path.to_string(),
                current_lsn,
            }),
        })
    }

    pub fn current_lsn(&self) -> u64 {
        self.inner.lock().unwrap().current_lsn
    }

    /// Assembles, checksums, and durably appends one record. Returns
    /// the newly assigned LSN (1-based).
    pub fn append(
        &self,
        record_type: RecordType,
        txn_id: u32,
        page_id: u32,
        before_image: &[u8],
        after_image: &[u8],
    ) -> StorageResult<u64> {
        let record_size = after_image.len().max(before_image.len()) as u32;
        let mut inner = self.inner.lock().unwrap();
        let lsn = inner.current_lsn + 1;

        let record = WalRecord {
            record_type,
            txn_id,
            lsn,
            prev_lsn: 0,
            page_id,
            record_size,
            before_image: before_image.to_vec(),
            after_image: after_image.to_vec(),
        };
        let bytes = record.encode(lsn);

        let offset = (lsn - 1) * WAL_RECORD_SIZE as u64;
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::disk_io(&inner.path, e))?;
        inner
            .file
            .write_all(&bytes)
            .map_err(|e| StorageError::disk_io(&inner.path, e))?;
        inner.file.sync_all().map_err(|e| {
            warn!(lsn, "wal fsync failed");
            StorageError::disk_io(&inner.path, e)
        })?;

        inner.current_lsn = lsn;
        Ok(lsn)
    }

    /// Reads and validates the record at `lsn`. A checksum mismatch (a
    /// torn write from a crash mid-append) surfaces as
    /// `WalCorruption` rather than being silently tolerated.
    pub fn read(&self, lsn: u64) -> StorageResult<WalRecord> {
        let mut inner = self.inner.lock().unwrap();
        let offset = (lsn - 1) * WAL_RECORD_SIZE as u64;
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::disk_io(&inner.path, e))?;

        let mut buf = vec![0u8; WAL_RECORD_SIZE];
        inner
            .file
            .read_exact(&mut buf)
            .map_err(|e| StorageError::disk_io(&inner.path, e))?;

        WalRecord::decode(&buf, lsn)
    }

    pub fn flush(&self) -> StorageResult<()> {
        let inner = self.inner.lock().unwrap();
        inner.file.sync_all().map_err(|e| StorageError::disk_io(&inner.path, e))
    }

    pub fn close(&self) -> StorageResult<()> {
        self.flush()
    }

    pub fn log_begin(&self, txn_id: u32) -> StorageResult<u64> {
        self.append(RecordType::Begin, txn_id, 0, &[], &[])
    }

    pub fn log_commit(&self, txn_id: u32) -> StorageResult<u64> {
        let lsn = self.append(RecordType::Commit, txn_id, 0, &[], &[])?;
        self.flush()?;
        Ok(lsn)
    }

    pub fn log_abort(&self, txn_id: u32) -> StorageResult<u64> {
        let lsn = self.append(RecordType::Abort, txn_id, 0, &[], &[])?;
        self.flush()?;
        Ok(lsn)
    }

    pub fn log_insert(&self, txn_id: u32, page_id: u32, after_image: &[u8]) -> StorageResult<u64> {
        self.append(RecordType::Insert, txn_id, page_id, &[], after_image)
    }

    pub fn log_update(
        &self,
        txn_id: u32,
        page_id: u32,
        before_image: &[u8],
        after_image: &[u8],
    ) -> StorageResult<u64> {
        self.append(RecordType::Update, txn_id, page_id, before_image, after_image)
    }

    pub fn log_delete(&self, txn_id: u32, page_id: u32, before_image: &[u8]) -> StorageResult<u64> {
        self.append(RecordType::Delete, txn_id, page_id, before_image, &[])
    }

    pub fn log_ddl(&self, txn_id: u32, descriptor: &str) -> StorageResult<u64> {
        let bytes = encode_fixed_str(descriptor, IMAGE_SIZE);
        self.append(RecordType::Ddl, txn_id, 0, &[], &bytes)
    }

    /// Logs that `page_id`'s chain was extended with `next_page_id` as
    /// its new successor. Not associated with any transaction — it is a
    /// physical page-structure change, not a logical data mutation.
    pub fn log_link_page(&self, page_id: u32, next_page_id: u32) -> StorageResult<u64> {
        self.append(RecordType::LinkPage, 0, page_id, &[], &next_page_id.to_le_bytes())
    }

    pub fn log_checkpoint(&self) -> StorageResult<u64> {
        let lsn = self.append(RecordType::Checkpoint, 0, 0, &[], &[])?;
        self.flush()?;
        Ok(lsn)
    }

    /// Decodes a DDL record's textual descriptor.
    pub fn decode_ddl_descriptor(record: &WalRecord) -> String {
        decode_fixed_str(&record.after_image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wal");
        std::mem::forget(dir);
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn lsns_are_monotonic_and_gap_free() {
        let wal = WalManager::open(&temp_path()).unwrap();
        let a = wal.log_begin(1).unwrap();
        let b = wal.log_insert(1, 10, b"hello").unwrap();
        let c = wal.log_commit(1).unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(wal.current_lsn(), 3);
    }

    #[test]
    fn record_round_trips_through_read() {
        let wal = WalManager::open(&temp_path()).unwrap();
        let lsn = wal.log_update(5, 10, b"before", b"after").unwrap();
        let record = wal.read(lsn).unwrap();
        assert_eq!(record.txn_id, 5);
        assert_eq!(record.page_id, 10);
        assert_eq!(&record.before_image[..6], b"before");
        assert_eq!(&record.after_image[..5], b"after");
        assert!(record.record_type.is_data_mutation());
    }

    #[test]
    fn link_page_record_is_not_a_data_mutation() {
        let wal = WalManager::open(&temp_path()).unwrap();
        let lsn = wal.log_link_page(10, 11).unwrap();
        let record = wal.read(lsn).unwrap();
        assert_eq!(record.page_id, 10);
        assert_eq!(u32::from_le_bytes(record.after_image[..4].try_into().unwrap()), 11);
        assert!(!record.record_type.is_data_mutation());
    }

    #[test]
    fn torn_record_is_reported_as_corruption() {
        let path = temp_path();
        let wal = WalManager::open(&path).unwrap();
        wal.log_begin(1).unwrap();
        wal.close().unwrap();
        drop(wal);

        // Truncate the file mid-record to simulate a crash during append.
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(WAL_RECORD_SIZE as u64 - 10).unwrap();
        drop(file);

        let wal2 = WalManager::open(&path).unwrap();
        assert!(wal2.read(1).is_err());
    }
}
