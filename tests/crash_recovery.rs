//! Seed scenarios 4 and 5: crash recovery of committed and uncommitted
//! writes. Per the design's note on scenario simulation, a true process
//! kill isn't observable from inside `cargo test`, so both scenarios
//! drop the buffer pool and WAL handles without an explicit checkpoint
//! or flush, then reopen and run `recovery::recover` — the same
//! without-flush-before-drop technique `recovery.rs`'s own unit tests
//! use.

use std::sync::Arc;

use minidb::buffer_pool::BufferPool;
use minidb::catalog::Catalog;
use minidb::disk::DiskManager;
use minidb::recovery;
use minidb::transaction::{IsolationLevel, TransactionManager};
use minidb::value::{Column, ColumnType, Value};
use minidb::wal::WalManager;

struct Paths {
    db_file: String,
    wal_file: String,
}

fn temp_paths() -> Paths {
    let dir = tempfile::tempdir().unwrap();
    let db_file = dir.path().join("crash.dat");
    let wal_file = dir.path().join("crash.wal");
    std::mem::forget(dir);
    Paths {
        db_file: db_file.to_str().unwrap().to_string(),
        wal_file: wal_file.to_str().unwrap().to_string(),
    }
}

#[test]
fn scenario_4_committed_writes_survive_a_simulated_crash() {
    let paths = temp_paths();

    {
        let disk = Arc::new(DiskManager::open(&paths.db_file).unwrap());
        let buffer_pool = Arc::new(BufferPool::new(disk.clone(), 20));
        let wal = Arc::new(WalManager::open(&paths.wal_file).unwrap());
        recovery::recover(&buffer_pool, &wal).unwrap();

        let catalog = Arc::new(Catalog::new(disk.clone(), buffer_pool.clone()));
        catalog.bootstrap().unwrap();
        let lock_manager = Arc::new(minidb::lock_manager::LockManager::new(std::time::Duration::from_secs(5)));
        let transaction_manager = Arc::new(TransactionManager::new(wal.clone(), lock_manager.clone(), buffer_pool.clone()));
        let storage = minidb::storage::Storage::new(catalog, buffer_pool.clone(), disk.clone(), wal.clone(), lock_manager, transaction_manager);

        storage
            .run_autocommit(|txn_id| storage.create_table(txn_id, "t", vec![Column::new("id", ColumnType::Int, 0, false)]))
            .unwrap();
        storage.run_autocommit(|txn_id| storage.insert(txn_id, "t", &[Value::Int(1)])).unwrap();
        storage.run_autocommit(|txn_id| storage.insert(txn_id, "t", &[Value::Int(2)])).unwrap();

        // No explicit flush/checkpoint: the buffer pool's dirty pages may
        // still be sitting in memory only when everything below is
        // dropped, mimicking a crash right after the second commit.
    }

    let disk2 = Arc::new(DiskManager::open(&paths.db_file).unwrap());
    let buffer_pool2 = Arc::new(BufferPool::new(disk2.clone(), 20));
    let wal2 = Arc::new(WalManager::open(&paths.wal_file).unwrap());
    recovery::recover(&buffer_pool2, &wal2).unwrap();

    let catalog2 = Arc::new(Catalog::new(disk2.clone(), buffer_pool2.clone()));
    catalog2.bootstrap().unwrap();
    let lock_manager2 = Arc::new(minidb::lock_manager::LockManager::new(std::time::Duration::from_secs(5)));
    let transaction_manager2 = Arc::new(TransactionManager::new(wal2.clone(), lock_manager2.clone(), buffer_pool2.clone()));
    let storage2 = minidb::storage::Storage::new(catalog2, buffer_pool2, disk2, wal2, lock_manager2, transaction_manager2);

    let rows = storage2.run_autocommit(|txn_id| storage2.scan(txn_id, "t")).unwrap();
    assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
}

#[test]
fn scenario_5_uncommitted_writes_are_undone_after_a_simulated_crash() {
    let paths = temp_paths();

    {
        let disk = Arc::new(DiskManager::open(&paths.db_file).unwrap());
        let buffer_pool = Arc::new(BufferPool::new(disk.clone(), 20));
        let wal = Arc::new(WalManager::open(&paths.wal_file).unwrap());
        recovery::recover(&buffer_pool, &wal).unwrap();

        let catalog = Arc::new(Catalog::new(disk.clone(), buffer_pool.clone()));
        catalog.bootstrap().unwrap();
        let lock_manager = Arc::new(minidb::lock_manager::LockManager::new(std::time::Duration::from_secs(5)));
        let transaction_manager = Arc::new(TransactionManager::new(wal.clone(), lock_manager.clone(), buffer_pool.clone()));
        let storage = minidb::storage::Storage::new(catalog, buffer_pool.clone(), disk.clone(), wal.clone(), lock_manager, transaction_manager);

        storage
            .run_autocommit(|txn_id| storage.create_table(txn_id, "t", vec![Column::new("id", ColumnType::Int, 0, false)]))
            .unwrap();

        // Explicit, never-committed transaction: the process dies before
        // `commit` or `abort` runs.
        let txn_id = storage.transaction_manager.begin(IsolationLevel::ReadCommitted).unwrap();
        storage.insert(txn_id, "t", &[Value::Int(99)]).unwrap();
        storage.wal.flush().unwrap();
    }

    let disk2 = Arc::new(DiskManager::open(&paths.db_file).unwrap());
    let buffer_pool2 = Arc::new(BufferPool::new(disk2.clone(), 20));
    let wal2 = Arc::new(WalManager::open(&paths.wal_file).unwrap());
    recovery::recover(&buffer_pool2, &wal2).unwrap();

    let catalog2 = Arc::new(Catalog::new(disk2.clone(), buffer_pool2.clone()));
    catalog2.bootstrap().unwrap();
    let lock_manager2 = Arc::new(minidb::lock_manager::LockManager::new(std::time::Duration::from_secs(5)));
    let transaction_manager2 = Arc::new(TransactionManager::new(wal2.clone(), lock_manager2.clone(), buffer_pool2.clone()));
    let storage2 = minidb::storage::Storage::new(catalog2, buffer_pool2, disk2, wal2, lock_manager2, transaction_manager2);

    let rows = storage2.run_autocommit(|txn_id| storage2.scan(txn_id, "t")).unwrap();
    assert!(rows.is_empty());
}
