//! Transaction id allocation, state machine, and commit/abort flow.
//!
//! Grounded on the old `Transaction::commit`/`abort` shape (write a log
//! record, then complete) but restructured around a proper
//! `TransactionManager` that tracks every in-flight txn's undo log
//! itself, since the design calls for `begin` to emit its own `BEGIN`
//! WAL record (the source mislays this, which breaks recovery's
//! ACTIVE-txn analysis).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::buffer_pool::BufferPool;
use crate::error::{StorageError, StorageResult};
use crate::lock_manager::LockManager;
use crate::page_chain;
use crate::wal::WalManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
}

/// A reversible effect of one transaction's mutation, applied in
/// reverse during abort. `slot`-granular rather than whole-page so an
/// abort only undoes the records this transaction actually touched.
#[derive(Debug, Clone)]
pub enum UndoAction {
    /// Undo an INSERT: tombstone the slot it landed in.
    TombstoneSlot { page_id: u32, slot: u32, record_size: usize },
    /// Undo an UPDATE or DELETE: restore the pre-mutation bytes.
    RestoreBytes { page_id: u32, slot: u32, record_size: usize, before: Vec<u8> },
}

struct TxnEntry {
    state: TxnState,
    undo_log: Vec<UndoAction>,
}

pub struct TransactionManager {
    wal: Arc<WalManager>,
    lock_manager: Arc<LockManager>,
    buffer_pool: Arc<BufferPool>,
    next_txn_id: AtomicU32,
    txns: Mutex<HashMap<u32, TxnEntry>>,
}

impl TransactionManager {
    pub fn new(wal: Arc<WalManager>, lock_manager: Arc<LockManager>, buffer_pool: Arc<BufferPool>) -> Self {
        Self {
            wal,
            lock_manager,
            buffer_pool,
            next_txn_id: AtomicU32::new(1),
            txns: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates the next id, records it ACTIVE, and emits a `BEGIN`
    /// WAL record so recovery's analysis pass can see it even if the
    /// process crashes before any mutation.
    pub fn begin(&self, _isolation: IsolationLevel) -> StorageResult<u32> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        self.wal.log_begin(txn_id)?;
        self.txns.lock().unwrap().insert(
            txn_id,
            TxnEntry {
                state: TxnState::Active,
                undo_log: Vec::new(),
            },
        );
        debug!(txn_id, "transaction started");
        Ok(txn_id)
    }

    /// Appends one reversible effect to `txn_id`'s undo log. Called by
    /// the storage API after every WAL-logged mutation.
    pub fn record_undo(&self, txn_id: u32, action: UndoAction) -> StorageResult<()> {
        let mut txns = self.txns.lock().unwrap();
        let entry = txns.get_mut(&txn_id).ok_or(StorageError::TxnNotActive { txn_id })?;
        if entry.state != TxnState::Active {
            return Err(StorageError::TxnNotActive { txn_id });
        }
        entry.undo_log.push(action);
        Ok(())
    }

    /// Rejects a non-ACTIVE transaction, writes and forces a `COMMIT`
    /// WAL record, transitions to COMMITTED, and releases every lock
    /// the transaction held.
    pub fn commit(&self, txn_id: u32) -> StorageResult<()> {
        {
            let txns = self.txns.lock().unwrap();
            match txns.get(&txn_id) {
                Some(entry) if entry.state == TxnState::Active => {}
                _ => return Err(StorageError::TxnNotActive { txn_id }),
            }
        }

        self.wal.log_commit(txn_id)?;

        let mut txns = self.txns.lock().unwrap();
        if let Some(entry) = txns.get_mut(&txn_id) {
            entry.state = TxnState::Committed;
            entry.undo_log.clear();
        }
        drop(txns);

        self.lock_manager.release_all(txn_id);
        info!(txn_id, "transaction committed");
        Ok(())
    }

    /// Writes an `ABORT` WAL record, applies the transaction's undo log
    /// to the buffer pool in reverse order, transitions to ABORTED, and
    /// releases locks.
    pub fn abort(&self, txn_id: u32) -> StorageResult<()> {
        {
            let txns = self.txns.lock().unwrap();
            match txns.get(&txn_id) {
                Some(entry) if entry.state == TxnState::Active => {}
                _ => return Err(StorageError::TxnNotActive { txn_id }),
            }
        }

        self.wal.log_abort(txn_id)?;

        let undo_log = {
            let mut txns = self.txns.lock().unwrap();
            let entry = txns.get_mut(&txn_id).unwrap();
            entry.state = TxnState::Aborted;
            std::mem::take(&mut entry.undo_log)
        };

        for action in undo_log.into_iter().rev() {
            match action {
                UndoAction::TombstoneSlot { page_id, slot, record_size } => {
                    page_chain::mark_deleted(&self.buffer_pool, page_id, slot, record_size)?;
                }
                UndoAction::RestoreBytes { page_id, slot, record_size, before } => {
                    page_chain::update_record(&self.buffer_pool, page_id, slot, record_size, &before)?;
                }
            }
        }

        self.lock_manager.release_all(txn_id);
        info!(txn_id, "transaction aborted");
        Ok(())
    }

    pub fn state(&self, txn_id: u32) -> StorageResult<TxnState> {
        self.txns
            .lock()
            .unwrap()
            .get(&txn_id)
            .map(|e| e.state)
            .ok_or(StorageError::TxnNotActive { txn_id })
    }
}
