//! Typed error surface for the storage core.
//!
//! The teacher prototype this crate grew out of threaded a single
//! stringly-typed `SimpleError` through every layer, which meant callers
//! could not distinguish a disk failure from a schema mismatch without
//! parsing the message. `StorageError` instead names every kind from the
//! design doc so callers can match on it directly.

use std::io;

use thiserror::Error;

/// Every distinguishable failure the storage core can report.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("disk i/o error on {path}: {source}")]
    DiskIo { path: String, source: io::Error },

    #[error("wal corruption at lsn {lsn}: {reason}")]
    WalCorruption { lsn: u64, reason: String },

    #[error("buffer pool exhausted: all {frames} frames are pinned")]
    BufferExhausted { frames: usize },

    #[error("schema mismatch on table '{table}': {reason}")]
    SchemaMismatch { table: String, reason: String },

    #[error("unknown table '{name}'")]
    UnknownTable { name: String },

    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("table '{name}' already exists")]
    DuplicateTable { name: String },

    #[error("lock timeout acquiring {mode} lock on resource {resource_id} for txn {txn_id}")]
    LockTimeout {
        txn_id: u32,
        resource_id: u32,
        mode: &'static str,
    },

    #[error("transaction {txn_id} is not active")]
    TxnNotActive { txn_id: u32 },

    #[error("recovery failed: {reason}")]
    RecoveryFailure { reason: String },

    #[error("{0}")]
    Other(String),
}

impl StorageError {
    pub fn disk_io(path: impl Into<String>, source: io::Error) -> Self {
        StorageError::DiskIo {
            path: path.into(),
            source,
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        StorageError::Other(msg.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
