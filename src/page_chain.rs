//! Shared page-chain traversal: appending and scanning fixed-width
//! records across a table's singly-linked chain of data pages.
//!
//! System tables (catalog, §4.4) and user tables (§4.5) are deliberately
//! unified on this one code path, per the design's note that both share
//! the same data-page layout — the rebuild step on restart is the only
//! thing that differs between them.

use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::disk::DiskManager;
use crate::error::StorageResult;
use crate::page::DataPage;
use crate::wal::WalManager;

/// Locates `head_page_id`'s chain tail with room for one more record of
/// `record_size`, allocating and linking a fresh page if the chain is
/// full, then writes `record` into the first free slot. Returns the
/// `(page_id, slot)` the record landed at. The chain-extension link
/// (when one happens) is WAL-logged before it's applied, so a crash
/// before the next flush doesn't leave the new page unreachable from
/// the chain's head (see `recovery.rs`'s `LinkPage` replay).
pub fn append_record(
    disk: &DiskManager,
    buffer_pool: &Arc<BufferPool>,
    wal: &WalManager,
    head_page_id: u32,
    record_size: usize,
    record: &[u8],
) -> StorageResult<(u32, u32)> {
    let mut page_id = head_page_id;

    loop {
        let frame = buffer_pool.get_page(page_id)?;
        let mut page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));

        if page.has_room_for(record_size) {
            let slot = page.record_count();
            page.set_record(slot as usize, record_size, record);
            page.set_record_count(slot + 1);
            buffer_pool.put_page_bytes(&frame, page.into_bytes());
            buffer_pool.unpin_page(&frame);
            return Ok((page_id, slot));
        }

        match page.next_page() {
            Some(next) => {
                buffer_pool.unpin_page(&frame);
                page_id = next;
            }
            None => {
                let new_page_id = disk.allocate_page();
                wal.log_link_page(page_id, new_page_id)?;
                page.set_next_page(Some(new_page_id));
                buffer_pool.put_page_bytes(&frame, page.into_bytes());
                buffer_pool.unpin_page(&frame);

                let new_frame = buffer_pool.get_page(new_page_id)?;
                let mut new_page = DataPage::empty();
                new_page.set_record(0, record_size, record);
                new_page.set_record_count(1);
                buffer_pool.put_page_bytes(&new_frame, new_page.into_bytes());
                buffer_pool.unpin_page(&new_frame);
                return Ok((new_page_id, 0));
            }
        }
    }
}

/// Walks the chain from `head_page_id` to its tail, returning every
/// live (non-tombstoned) record's location and bytes.
pub fn scan_records(
    buffer_pool: &Arc<BufferPool>,
    head_page_id: u32,
    record_size: usize,
) -> StorageResult<Vec<(u32, u32, Vec<u8>)>> {
    let mut out = Vec::new();
    let mut page_id = Some(head_page_id);

    while let Some(pid) = page_id {
        let frame = buffer_pool.get_page(pid)?;
        let page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));

        for slot in 0..page.record_count() {
            let record = page.record(slot as usize, record_size);
            if record[0] & crate::value::FLAG_DELETED == 0 {
                out.push((pid, slot, record.to_vec()));
            }
        }

        page_id = page.next_page();
        buffer_pool.unpin_page(&frame);
    }

    Ok(out)
}

/// Sets the tombstone bit on the record at `(page_id, slot)` without
/// compacting the page.
pub fn mark_deleted(
    buffer_pool: &Arc<BufferPool>,
    page_id: u32,
    slot: u32,
    record_size: usize,
) -> StorageResult<()> {
    let frame = buffer_pool.get_page(page_id)?;
    let mut page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));
    let mut record = page.record(slot as usize, record_size).to_vec();
    record[0] |= crate::value::FLAG_DELETED;
    page.set_record(slot as usize, record_size, &record);
    page.set_deleted_count(page.deleted_count() + 1);
    buffer_pool.put_page_bytes(&frame, page.into_bytes());
    buffer_pool.unpin_page(&frame);
    Ok(())
}

/// Overwrites the record at `(page_id, slot)` in place, preserving its
/// flag byte.
pub fn update_record(
    buffer_pool: &Arc<BufferPool>,
    page_id: u32,
    slot: u32,
    record_size: usize,
    record: &[u8],
) -> StorageResult<()> {
    let frame = buffer_pool.get_page(page_id)?;
    let mut page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));
    page.set_record(slot as usize, record_size, record);
    buffer_pool.put_page_bytes(&frame, page.into_bytes());
    buffer_pool.unpin_page(&frame);
    Ok(())
}

/// Reads back one record's raw bytes without affecting its liveness.
pub fn read_record(
    buffer_pool: &Arc<BufferPool>,
    page_id: u32,
    slot: u32,
    record_size: usize,
) -> StorageResult<Vec<u8>> {
    let frame = buffer_pool.get_page(page_id)?;
    let page = DataPage::from_bytes(buffer_pool.page_bytes(&frame));
    let record = page.record(slot as usize, record_size).to_vec();
    buffer_pool.unpin_page(&frame);
    Ok(record)
}
