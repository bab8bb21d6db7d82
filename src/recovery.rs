//! Three-phase ARIES-style crash recovery: ANALYSIS, REDO, UNDO.
//!
//! Grounded on `transaction/log_aries.rs`'s `LogManager::recover` shape
//! (get incomplete transactions, then walk the log to roll back their
//! effects) and `original_source/server/recovery/recovery.c`'s
//! analysis/redo/undo split, rebuilt against `wal.rs`'s fixed-size
//! record stream instead of the teacher's variable-length
//! self-describing log, and against `page.rs`'s slotted layout instead
//! of the teacher's whole-page before/after images.
//!
//! Unlike the teacher (which can resume from the last checkpoint), this
//! recovery always replays from LSN 1: the spec treats checkpointing as
//! a correctness-optional hint, and always starting from the beginning
//! keeps REDO's per-page slot bookkeeping simple (see `redo_one`).
//!
//! REDO also replays `RecordType::LinkPage` records unconditionally
//! (see `redo_link`): a page-chain extension is a physical allocation,
//! not a transaction's logical write, so it's redone regardless of
//! commit status and never undone.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::buffer_pool::BufferPool;
use crate::error::StorageResult;
use crate::page::DataPage;
use crate::value::FLAG_DELETED;
use crate::wal::{RecordType, WalManager, WalRecord};

#[derive(Default)]
struct TxnStatus {
    committed: bool,
}

/// Runs ANALYSIS, REDO, and UNDO against `wal`, reconciling
/// `buffer_pool`'s pages before the storage API accepts any external
/// request.
pub fn recover(buffer_pool: &Arc<BufferPool>, wal: &Arc<WalManager>) -> StorageResult<()> {
    let records = read_valid_prefix(wal);
    if records.is_empty() {
        info!("recovery: empty log, nothing to replay");
        return Ok(());
    }

    let mut txns: HashMap<u32, TxnStatus> = HashMap::new();
    for record in &records {
        match record.record_type {
            RecordType::Begin => {
                txns.entry(record.txn_id).or_default();
            }
            RecordType::Commit | RecordType::Abort => {
                txns.entry(record.txn_id).or_default().committed = true;
            }
            _ => {}
        }
    }
    info!(records = records.len(), txns = txns.len(), "recovery: analysis complete");

    let mut insert_cursors: HashMap<u32, u32> = HashMap::new();
    for record in &records {
        match record.record_type {
            // Physical page-structure changes are redone unconditionally,
            // independent of the owning transaction's commit status — the
            // chain link they describe is exactly as durable as the page
            // allocation that produced it, not as the row that triggered it.
            RecordType::LinkPage => redo_link(buffer_pool, record)?,
            _ if record.record_type.is_data_mutation() => {
                if txns.get(&record.txn_id).map(|t| t.committed).unwrap_or(false) {
                    redo_one(buffer_pool, record, &mut insert_cursors)?;
                }
            }
            _ => {}
        }
    }
    info!("recovery: redo complete");

    for record in records.iter().rev() {
        if !record.record_type.is_data_mutation() {
            continue;
        }
        if !txns.get(&record.txn_id).map(|t| t.committed).unwrap_or(false) {
            undo_one(buffer_pool, record)?;
        }
    }
    info!("recovery: undo complete");

    buffer_pool.flush_all()?;
    Ok(())
}

/// Reads LSNs `1..` until the first decode failure, which is exactly
/// the shape a crash mid-append leaves: a torn final record whose
/// checksum fails, or a short read past a truncated file.
fn read_valid_prefix(wal: &Arc<WalManager>) -> Vec<WalRecord> {
    let mut out = Vec::new();
    let mut lsn = 1u64;
    loop {
        match wal.read(lsn) {
            Ok(record) => {
                out.push(record);
                lsn += 1;
            }
            Err(_) => {
                if lsn <= wal.current_lsn() {
                    warn!(lsn, "recovery: stopping at first unreadable wal record");
                }
                break;
            }
        }
    }
    out
}

fn trim(image: &[u8], record_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; record_size];
    let n = image.len().min(record_size);
    out[..n].copy_from_slice(&image[..n]);
    out
}

fn find_slot(page: &DataPage, record_size: usize, target: &[u8]) -> Option<usize> {
    (0..DataPage::capacity(record_size)).find(|&slot| page.record(slot, record_size) == target)
}

/// Re-applies one committed data mutation. INSERT has no logged slot,
/// so the first record touching a page resets its `record_count` to
/// zero and slots are assigned by a per-page counter that advances in
/// WAL order — identical to how `append_record` assigned them the
/// first time, since every insert to a page is replayed in the order it
/// originally happened. UPDATE/DELETE locate their slot by matching the
/// logged before-image against the page's current contents, which is
/// safe because REDO always starts from LSN 1 so every prior mutation
/// of that slot has already been replayed in order.
fn redo_one(buffer_pool: &Arc<BufferPool>, record: &WalRecord, insert_cursors: &mut HashMap<u32, u32>) -> StorageResult<()> {
    let record_size = record.record_size as usize;
    if record_size == 0 {
        return Ok(());
    }

    let frame = buffer_pool.get_page(record.page_id)?;
    let mut page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));

    match record.record_type {
        RecordType::Insert => {
            let slot = match insert_cursors.get(&record.page_id) {
                Some(&next) => next,
                None => {
                    page.set_record_count(0);
                    0
                }
            };
            let bytes = trim(&record.after_image, record_size);
            page.set_record(slot as usize, record_size, &bytes);
            page.set_record_count(slot + 1);
            insert_cursors.insert(record.page_id, slot + 1);
        }
        RecordType::Update => {
            let before = trim(&record.before_image, record_size);
            let after = trim(&record.after_image, record_size);
            if let Some(slot) = find_slot(&page, record_size, &before) {
                page.set_record(slot, record_size, &after);
            }
        }
        RecordType::Delete => {
            let before = trim(&record.before_image, record_size);
            if let Some(slot) = find_slot(&page, record_size, &before) {
                let mut tombstoned = before;
                tombstoned[0] |= FLAG_DELETED;
                page.set_record(slot, record_size, &tombstoned);
                page.set_deleted_count(page.deleted_count() + 1);
            }
        }
        _ => unreachable!("caller filters to data-mutation records"),
    }

    buffer_pool.put_page_bytes(&frame, page.into_bytes());
    buffer_pool.unpin_page(&frame);
    Ok(())
}

/// Re-applies a page-chain extension: `record.page_id`'s `next_page`
/// link is set to the page id carried in the record's after-image.
/// Unconditional and never undone — see `RecordType::LinkPage`.
fn redo_link(buffer_pool: &Arc<BufferPool>, record: &WalRecord) -> StorageResult<()> {
    let frame = buffer_pool.get_page(record.page_id)?;
    let mut page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));
    let next_page_id = u32::from_le_bytes(record.after_image[..4].try_into().unwrap());
    page.set_next_page(Some(next_page_id));
    buffer_pool.put_page_bytes(&frame, page.into_bytes());
    buffer_pool.unpin_page(&frame);
    Ok(())
}

/// Reverses one uncommitted data mutation, walked in reverse LSN order.
fn undo_one(buffer_pool: &Arc<BufferPool>, record: &WalRecord) -> StorageResult<()> {
    let record_size = record.record_size as usize;
    if record_size == 0 {
        return Ok(());
    }

    let frame = buffer_pool.get_page(record.page_id)?;
    let mut page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));

    match record.record_type {
        RecordType::Insert => {
            let after = trim(&record.after_image, record_size);
            if let Some(slot) = find_slot(&page, record_size, &after) {
                let mut tombstoned = after;
                tombstoned[0] |= FLAG_DELETED;
                page.set_record(slot, record_size, &tombstoned);
                page.set_deleted_count(page.deleted_count() + 1);
            }
        }
        RecordType::Update => {
            let after = trim(&record.after_image, record_size);
            let before = trim(&record.before_image, record_size);
            if let Some(slot) = find_slot(&page, record_size, &after) {
                page.set_record(slot, record_size, &before);
            }
        }
        RecordType::Delete => {
            let before = trim(&record.before_image, record_size);
            let mut tombstoned = before.clone();
            tombstoned[0] |= FLAG_DELETED;
            if let Some(slot) = find_slot(&page, record_size, &tombstoned) {
                page.set_record(slot, record_size, &before);
                page.set_deleted_count(page.deleted_count().saturating_sub(1));
            }
        }
        _ => unreachable!("caller filters to data-mutation records"),
    }

    buffer_pool.put_page_bytes(&frame, page.into_bytes());
    buffer_pool.unpin_page(&frame);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use crate::value::{self, Column, ColumnType, Value};
    use std::sync::Arc;

    fn columns() -> Vec<Column> {
        vec![Column::new("id", ColumnType::Int, 0, false), Column::new("name", ColumnType::VarChar, 10, true)]
    }

    fn setup() -> (Arc<DiskManager>, Arc<BufferPool>, Arc<WalManager>, String, String) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("r.dat");
        let wal_path = dir.path().join("r.wal");
        std::mem::forget(dir);

        let disk = Arc::new(DiskManager::open(db_path.to_str().unwrap()).unwrap());
        let buffer_pool = Arc::new(BufferPool::new(disk.clone(), 20));
        let wal = Arc::new(WalManager::open(wal_path.to_str().unwrap()).unwrap());
        (disk, buffer_pool, wal, db_path.to_str().unwrap().to_string(), wal_path.to_str().unwrap().to_string())
    }

    /// Mimics one auto-committed insert into page 10, the way
    /// `storage::insert` would: WAL record first, then the page write.
    fn write_committed_insert(buffer_pool: &Arc<BufferPool>, wal: &Arc<WalManager>, txn_id: u32, page_id: u32, slot: u32, bytes: &[u8]) {
        wal.log_begin(txn_id).unwrap();
        wal.log_insert(txn_id, page_id, bytes).unwrap();
        wal.log_commit(txn_id).unwrap();

        let frame = buffer_pool.get_page(page_id).unwrap();
        let mut page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));
        page.set_record(slot as usize, bytes.len(), bytes);
        page.set_record_count(slot + 1);
        buffer_pool.put_page_bytes(&frame, page.into_bytes());
        buffer_pool.unpin_page(&frame);
    }

    #[test]
    fn redo_rematerializes_committed_inserts_after_simulated_crash() {
        let (disk, buffer_pool, wal, db_path, wal_path) = setup();
        let cols = columns();
        let row1 = value::serialize(&cols, &[Value::Int(1), Value::Str("a".to_string())], false).unwrap();
        let row2 = value::serialize(&cols, &[Value::Int(2), Value::Str("b".to_string())], false).unwrap();

        write_committed_insert(&buffer_pool, &wal, 1, 10, 0, &row1);
        write_committed_insert(&buffer_pool, &wal, 2, 10, 1, &row2);

        // Simulate a crash: drop the buffer pool without flushing, so
        // page 10 on disk never saw these rows, then reopen everything
        // fresh and recover purely from the WAL.
        drop(buffer_pool);
        drop(disk);
        let disk2 = Arc::new(DiskManager::open(&db_path).unwrap());
        let buffer_pool2 = Arc::new(BufferPool::new(disk2, 20));
        let wal2 = Arc::new(WalManager::open(&wal_path).unwrap());

        recover(&buffer_pool2, &wal2).unwrap();

        let records = crate::page_chain::scan_records(&buffer_pool2, 10, row1.len()).unwrap();
        assert_eq!(records.len(), 2);
        let (_, _, bytes0) = &records[0];
        let (_, _, bytes1) = &records[1];
        assert_eq!(bytes0, &row1);
        assert_eq!(bytes1, &row2);
    }

    #[test]
    fn undo_removes_uncommitted_inserts_after_simulated_crash() {
        let (disk, buffer_pool, wal, db_path, wal_path) = setup();
        let cols = columns();
        let row = value::serialize(&cols, &[Value::Int(1), Value::Str("a".to_string())], false).unwrap();

        let txn_id = 1u32;
        wal.log_begin(txn_id).unwrap();
        wal.log_insert(txn_id, 10, &row).unwrap();
        // no commit: the transaction was still active when the process died.

        let frame = buffer_pool.get_page(10).unwrap();
        let mut page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));
        page.set_record(0, row.len(), &row);
        page.set_record_count(1);
        buffer_pool.put_page_bytes(&frame, page.into_bytes());
        buffer_pool.unpin_page(&frame);
        wal.flush().unwrap();

        drop(buffer_pool);
        drop(disk);
        let disk2 = Arc::new(DiskManager::open(&db_path).unwrap());
        let buffer_pool2 = Arc::new(BufferPool::new(disk2, 20));
        let wal2 = Arc::new(WalManager::open(&wal_path).unwrap());

        recover(&buffer_pool2, &wal2).unwrap();

        let records = crate::page_chain::scan_records(&buffer_pool2, 10, row.len()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn redo_rebuilds_multi_page_chain_links_after_simulated_crash() {
        let (disk, buffer_pool, wal, db_path, wal_path) = setup();
        let cols = columns();
        let row1 = value::serialize(&cols, &[Value::Int(1), Value::Str("a".to_string())], false).unwrap();
        let row2 = value::serialize(&cols, &[Value::Int(2), Value::Str("b".to_string())], false).unwrap();

        // Row 1 lands on the head page (10); row 2 forces a chain
        // extension onto a freshly allocated page, exactly as
        // `page_chain::append_record` would do it.
        write_committed_insert(&buffer_pool, &wal, 1, 10, 0, &row1);
        wal.log_link_page(10, 11).unwrap();
        write_committed_insert(&buffer_pool, &wal, 2, 11, 0, &row2);

        // Simulate a crash before any of this reaches disk: both pages
        // are reopened from a fresh, all-zero image.
        drop(buffer_pool);
        drop(disk);
        let disk2 = Arc::new(DiskManager::open(&db_path).unwrap());
        let buffer_pool2 = Arc::new(BufferPool::new(disk2, 20));
        let wal2 = Arc::new(WalManager::open(&wal_path).unwrap());

        recover(&buffer_pool2, &wal2).unwrap();

        // Scanning from the head must not loop forever on a zeroed
        // `next_page` and must reach both rows via the restored link.
        let records = crate::page_chain::scan_records(&buffer_pool2, 10, row1.len()).unwrap();
        assert_eq!(records.len(), 2);
        let (page0, _, bytes0) = &records[0];
        let (page1, _, bytes1) = &records[1];
        assert_eq!(*page0, 10);
        assert_eq!(*page1, 11);
        assert_eq!(bytes0, &row1);
        assert_eq!(bytes1, &row2);
    }

    #[test]
    fn recovery_stops_at_a_torn_trailing_record() {
        let (_, buffer_pool, wal, _db_path, wal_path) = setup();
        wal.log_begin(1).unwrap();
        wal.log_commit(1).unwrap();
        wal.close().unwrap();
        drop(wal);

        use std::fs::OpenOptions;
        let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
        let good_len = 2 * crate::wal::WAL_RECORD_SIZE as u64;
        file.set_len(good_len + crate::wal::WAL_RECORD_SIZE as u64 - 5).unwrap();
        drop(file);

        let wal2 = Arc::new(WalManager::open(&wal_path).unwrap());
        // The torn tail shouldn't stop the two well-formed records from
        // being read and processed.
        recover(&buffer_pool, &wal2).unwrap();
    }
}
