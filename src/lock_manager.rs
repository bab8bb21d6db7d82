//! Per-resource read/write locks with release-on-commit.
//!
//! Grounded on `transaction/concurrent_status.rs`'s S/X latch maps, with
//! two of the design's fixes applied: a real concurrent map keyed
//! directly by `resource_id` (the source's modulo-10000 open-addressed
//! table collides distinct resources), and an explicit per-txn holdings
//! set so `release` only drops locks the caller actually took (the
//! source releases every lock in the table on any commit). Deadlock
//! detection (the source's wait-for graph) is out of scope here —
//! contention is bounded by a timeout instead.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

use crate::error::{StorageError, StorageResult};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn name(&self) -> &'static str {
        match self {
            LockMode::Shared => "read",
            LockMode::Exclusive => "write",
        }
    }
}

#[derive(Default)]
struct ResourceLock {
    readers: HashSet<u32>,
    writer: Option<u32>,
}

impl ResourceLock {
    fn can_read(&self, txn_id: u32) -> bool {
        self.writer.is_none() || self.writer == Some(txn_id)
    }

    fn can_write(&self, txn_id: u32) -> bool {
        (self.writer.is_none() || self.writer == Some(txn_id))
            && (self.readers.is_empty() || (self.readers.len() == 1 && self.readers.contains(&txn_id)))
    }
}

pub struct LockManager {
    locks: DashMap<u32, Arc<Mutex<ResourceLock>>>,
    holdings: DashMap<u32, HashSet<(u32, LockMode)>>,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            holdings: DashMap::new(),
            timeout,
        }
    }

    pub fn acquire_read(&self, txn_id: u32, resource_id: u32) -> StorageResult<()> {
        self.acquire(txn_id, resource_id, LockMode::Shared)
    }

    pub fn acquire_write(&self, txn_id: u32, resource_id: u32) -> StorageResult<()> {
        self.acquire(txn_id, resource_id, LockMode::Exclusive)
    }

    fn acquire(&self, txn_id: u32, resource_id: u32, mode: LockMode) -> StorageResult<()> {
        // Clone the resource's own `Arc<Mutex<_>>` out and let the
        // `DashMap` entry guard (a shard-wide lock) drop here, before the
        // poll loop below sleeps — otherwise a holder's `release_all`
        // would need that same shard lock to release and could never run.
        let resource = self
            .locks
            .entry(resource_id)
            .or_insert_with(|| Arc::new(Mutex::new(ResourceLock::default())))
            .clone();
        let deadline = Instant::now() + self.timeout;

        loop {
            {
                let mut lock = resource.lock().unwrap();
                let granted = match mode {
                    LockMode::Shared => lock.can_read(txn_id),
                    LockMode::Exclusive => lock.can_write(txn_id),
                };
                if granted {
                    match mode {
                        LockMode::Shared => {
                            lock.readers.insert(txn_id);
                        }
                        LockMode::Exclusive => {
                            lock.writer = Some(txn_id);
                        }
                    }
                    drop(lock);
                    self.holdings.entry(txn_id).or_default().insert((resource_id, mode));
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                warn!(txn_id, resource_id, mode = mode.name(), "lock acquisition timed out");
                return Err(StorageError::LockTimeout {
                    txn_id,
                    resource_id,
                    mode: mode.name(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Releases every resource lock `txn_id` currently holds. Called on
    /// commit and abort; idempotent if the txn holds nothing.
    pub fn release_all(&self, txn_id: u32) {
        if let Some((_, held)) = self.holdings.remove(&txn_id) {
            for (resource_id, mode) in held {
                if let Some(entry) = self.locks.get(&resource_id) {
                    let mut lock = entry.lock().unwrap();
                    match mode {
                        LockMode::Shared => {
                            lock.readers.remove(&txn_id);
                        }
                        LockMode::Exclusive => {
                            if lock.writer == Some(txn_id) {
                                lock.writer = None;
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn holds(&self, txn_id: u32, resource_id: u32) -> bool {
        self.holdings
            .get(&txn_id)
            .map(|set| set.iter().any(|(id, _)| *id == resource_id))
            .unwrap_or(false)
    }
}
