//! Pinned, LRU-replaced in-memory cache of pages.
//!
//! Grounded on `original_source/server/buffer/buffer_manager.c`:
//! `BUFFER_POOL_SIZE` fixed frames, a monotonically increasing global
//! tick stamped on every access, and eviction choosing the unpinned
//! frame with the smallest tick. The C source shares this state across
//! processes via `mmap`; per the shared-memory-vs-threads redesign note
//! this crate instead guards one in-process `Mutex`, which is
//! sufficient since the disk/WAL files are never opened by more than
//! one process here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::disk::{DiskManager, PAGE_SIZE};
use crate::error::{StorageError, StorageResult};

pub const BUFFER_POOL_FRAMES: usize = 100;

struct Frame {
    page_id: Option<u32>,
    bytes: Vec<u8>,
    dirty: bool,
    pin_count: u32,
    lru_tick: u64,
}

impl Frame {
    fn empty() -> Self {
        Self {
            page_id: None,
            bytes: vec![0u8; PAGE_SIZE],
            dirty: false,
            pin_count: 0,
            lru_tick: 0,
        }
    }
}

struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<u32, usize>,
    tick: u64,
}

/// A handle to one page currently pinned in the pool. Pins are released
/// explicitly via [`BufferPool::unpin_page`]; dropping a handle without
/// unpinning leaks the pin for the lifetime of the pool (same contract
/// as the teacher's `Arc<RwLock<Page>>` guards — callers are expected
/// to balance every `get_page` with an `unpin_page`).
#[derive(Debug, Clone, Copy)]
pub struct PinnedFrame {
    pub page_id: u32,
    frame_idx: usize,
}

pub struct BufferPool {
    disk: Arc<DiskManager>,
    state: Mutex<PoolState>,
    frame_count: usize,
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>, frame_count: usize) -> Self {
        let frames = (0..frame_count).map(|_| Frame::empty()).collect();
        Self {
            disk,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                tick: 1,
            }),
            frame_count,
        }
    }

    /// Pins `page_id` in the pool, loading it from disk (evicting an
    /// unpinned victim if every frame is occupied) if not already
    /// resident. Fails with `BufferExhausted` if every frame is pinned.
    pub fn get_page(&self, page_id: u32) -> StorageResult<PinnedFrame> {
        let mut state = self.state.lock().unwrap();

        if let Some(&idx) = state.page_table.get(&page_id) {
            let tick = state.tick;
            let frame = &mut state.frames[idx];
            frame.pin_count += 1;
            frame.lru_tick = tick;
            state.tick += 1;
            return Ok(PinnedFrame { page_id, frame_idx: idx });
        }

        let victim_idx = state
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.pin_count == 0)
            .min_by_key(|(_, f)| f.lru_tick)
            .map(|(idx, _)| idx)
            .ok_or(StorageError::BufferExhausted { frames: self.frame_count })?;

        if let Some(old_page_id) = state.frames[victim_idx].page_id {
            if state.frames[victim_idx].dirty {
                let bytes = state.frames[victim_idx].bytes.clone();
                self.disk.write_page(old_page_id, &bytes)?;
            }
            state.page_table.remove(&old_page_id);
            debug!(old_page_id, new_page_id = page_id, "evicted page from buffer pool");
        }

        let bytes = self.disk.read_page(page_id)?;
        let tick = state.tick;
        state.frames[victim_idx] = Frame {
            page_id: Some(page_id),
            bytes,
            dirty: false,
            pin_count: 1,
            lru_tick: tick,
        };
        state.tick += 1;
        state.page_table.insert(page_id, victim_idx);

        Ok(PinnedFrame { page_id, frame_idx: victim_idx })
    }

    /// Decrements the pin count; at zero the frame becomes eligible for
    /// eviction (its bytes remain valid until overwritten).
    pub fn unpin_page(&self, frame: &PinnedFrame) {
        let mut state = self.state.lock().unwrap();
        let f = &mut state.frames[frame.frame_idx];
        if f.pin_count > 0 {
            f.pin_count -= 1;
        } else {
            warn!(page_id = frame.page_id, "unpin called on a frame with zero pins");
        }
    }

    pub fn mark_dirty(&self, frame: &PinnedFrame) {
        let mut state = self.state.lock().unwrap();
        state.frames[frame.frame_idx].dirty = true;
    }

    /// A copy of the frame's current bytes. Returned by value rather
    /// than reference since the frame can be reused for another page
    /// the instant the caller's pin count reaches zero.
    pub fn page_bytes(&self, frame: &PinnedFrame) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state.frames[frame.frame_idx].bytes.clone()
    }

    /// Replaces the frame's bytes and marks it dirty in one step.
    pub fn put_page_bytes(&self, frame: &PinnedFrame, bytes: Vec<u8>) {
        assert_eq!(bytes.len(), PAGE_SIZE);
        let mut state = self.state.lock().unwrap();
        let f = &mut state.frames[frame.frame_idx];
        f.bytes = bytes;
        f.dirty = true;
    }

    /// Writes every dirty frame back to disk and clears the dirty bit.
    pub fn flush_all(&self) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        for frame in state.frames.iter_mut() {
            if frame.dirty {
                if let Some(page_id) = frame.page_id {
                    self.disk.write_page(page_id, &frame.bytes)?;
                    frame.dirty = false;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(frames: usize) -> BufferPool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.dat");
        std::mem::forget(dir);
        let disk = Arc::new(DiskManager::open(path.to_str().unwrap()).unwrap());
        BufferPool::new(disk, frames)
    }

    #[test]
    fn exhausting_every_frame_fails_the_next_pin() {
        let bp = pool(2);
        let _a = bp.get_page(0).unwrap();
        let _b = bp.get_page(1).unwrap();
        let err = bp.get_page(2).unwrap_err();
        assert!(matches!(err, StorageError::BufferExhausted { frames: 2 }));
    }

    #[test]
    fn unpinning_frees_capacity_for_eviction() {
        let bp = pool(1);
        let a = bp.get_page(0).unwrap();
        bp.unpin_page(&a);
        let _b = bp.get_page(1).unwrap();
    }

    #[test]
    fn dirty_frame_is_flushed_on_eviction() {
        let bp = pool(1);
        let a = bp.get_page(0).unwrap();
        let mut bytes = bp.page_bytes(&a);
        bytes[0] = 0x42;
        bp.put_page_bytes(&a, bytes);
        bp.unpin_page(&a);

        let _b = bp.get_page(1).unwrap();
        let a_again = bp.get_page(0).unwrap();
        assert_eq!(bp.page_bytes(&a_again)[0], 0x42);
    }

    #[test]
    fn flush_all_clears_dirty_bits() {
        let bp = pool(1);
        let a = bp.get_page(0).unwrap();
        bp.put_page_bytes(&a, vec![9u8; PAGE_SIZE]);
        bp.flush_all().unwrap();

        let on_disk = bp.disk.read_page(0).unwrap();
        assert_eq!(on_disk[0], 9);
    }
}
