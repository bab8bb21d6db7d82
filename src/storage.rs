//! Public storage API: record insert/scan/update/delete, page-chain
//! traversal, and DDL, all funneled through the WAL, lock manager, and
//! transaction manager underneath.
//!
//! Grounded on the `insert`/`scan`/`update`/`delete` contract named in
//! the design's component table, composed from `catalog.rs`'s table
//! resolution, `page_chain.rs`'s chain walk, and `wal.rs`'s logging —
//! this module is the glue that was spread across `btree/table.rs` and
//! `transaction/tx.rs` in the teacher, unified here as one entry point.

use std::sync::Arc;

use tracing::{debug, info};

use crate::buffer_pool::BufferPool;
use crate::catalog::{Catalog, IndexType, SYS_TABLES_PAGE};
use crate::disk::DiskManager;
use crate::error::{StorageError, StorageResult};
use crate::lock_manager::LockManager;
use crate::page::{BTreeIndexPage, HashIndexPage};
use crate::page_chain;
use crate::predicate::Predicate;
use crate::transaction::{IsolationLevel, TransactionManager, UndoAction};
use crate::value::{self, Column, Value};
use crate::wal::WalManager;

/// Resource id reserved for the system catalog (§4.6: "the system
/// catalog is resource id 1"), distinct from the page-id namespace
/// even though it happens to share the number with `SYS_TABLES_PAGE`.
pub const CATALOG_RESOURCE_ID: u32 = SYS_TABLES_PAGE;

/// Scans never return more than this many rows.
pub const MAX_SCAN_ROWS: usize = 1000;

pub struct Storage {
    pub catalog: Arc<Catalog>,
    pub buffer_pool: Arc<BufferPool>,
    pub disk: Arc<DiskManager>,
    pub wal: Arc<WalManager>,
    pub lock_manager: Arc<LockManager>,
    pub transaction_manager: Arc<TransactionManager>,
}

impl Storage {
    pub fn new(
        catalog: Arc<Catalog>,
        buffer_pool: Arc<BufferPool>,
        disk: Arc<DiskManager>,
        wal: Arc<WalManager>,
        lock_manager: Arc<LockManager>,
        transaction_manager: Arc<TransactionManager>,
    ) -> Self {
        Self {
            catalog,
            buffer_pool,
            disk,
            wal,
            lock_manager,
            transaction_manager,
        }
    }

    /// Runs `f` inside a freshly begun transaction, committing on
    /// success and aborting on failure — the auto-commit-per-statement
    /// policy the network shell relies on.
    pub fn run_autocommit<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(u32) -> StorageResult<T>,
    {
        let txn_id = self.transaction_manager.begin(IsolationLevel::ReadCommitted)?;
        match f(txn_id) {
            Ok(value) => {
                self.transaction_manager.commit(txn_id)?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.transaction_manager.abort(txn_id);
                Err(e)
            }
        }
    }

    fn resolve_table(&self, name: &str) -> StorageResult<crate::catalog::TableInfo> {
        self.catalog
            .find_table_by_name(name)
            .ok_or_else(|| StorageError::UnknownTable { name: name.to_string() })
    }

    pub fn insert(&self, txn_id: u32, table: &str, values: &[Value]) -> StorageResult<()> {
        let info = self.resolve_table(table)?;
        self.lock_manager.acquire_write(txn_id, info.table_id)?;

        if values.len() != info.columns.len() {
            return Err(StorageError::SchemaMismatch {
                table: table.to_string(),
                reason: format!("expected {} values, got {}", info.columns.len(), values.len()),
            });
        }

        let record_size = value::record_size(&info.columns);
        let bytes = value::serialize(&info.columns, values, false).map_err(|_| StorageError::SchemaMismatch {
            table: table.to_string(),
            reason: "value types do not match column schema".to_string(),
        })?;

        let (page_id, slot) =
            page_chain::append_record(&self.disk, &self.buffer_pool, &self.wal, info.first_page_id, record_size, &bytes)?;
        self.wal.log_insert(txn_id, page_id, &bytes)?;
        self.transaction_manager
            .record_undo(txn_id, UndoAction::TombstoneSlot { page_id, slot, record_size })?;

        debug!(txn_id, table, page_id, slot, "row inserted");
        Ok(())
    }

    /// Walks the table's page chain head to tail, deserializing every
    /// live record, capped at [`MAX_SCAN_ROWS`].
    pub fn scan(&self, txn_id: u32, table: &str) -> StorageResult<Vec<Vec<Value>>> {
        let info = self.resolve_table(table)?;
        self.lock_manager.acquire_read(txn_id, info.table_id)?;

        let record_size = value::record_size(&info.columns);
        let records = page_chain::scan_records(&self.buffer_pool, info.first_page_id, record_size)?;

        records
            .into_iter()
            .take(MAX_SCAN_ROWS)
            .map(|(_, _, bytes)| value::deserialize(&info.columns, &bytes).map(|(values, _)| values))
            .collect()
    }

    pub fn update(
        &self,
        txn_id: u32,
        table: &str,
        column: &str,
        new_value: &Value,
        predicate: Option<&Predicate>,
    ) -> StorageResult<usize> {
        let info = self.resolve_table(table)?;
        self.lock_manager.acquire_write(txn_id, info.table_id)?;

        let column_index = info
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| StorageError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })?;

        let record_size = value::record_size(&info.columns);
        let records = page_chain::scan_records(&self.buffer_pool, info.first_page_id, record_size)?;
        let mut updated = 0usize;

        for (page_id, slot, before_bytes) in records {
            let (mut row, _) = value::deserialize(&info.columns, &before_bytes)?;
            if predicate.map(|p| p.matches(&row)).unwrap_or(true) {
                row[column_index] = new_value.clone();
                let after_bytes = value::serialize(&info.columns, &row, false)?;

                page_chain::update_record(&self.buffer_pool, page_id, slot, record_size, &after_bytes)?;
                self.wal.log_update(txn_id, page_id, &before_bytes, &after_bytes)?;
                self.transaction_manager.record_undo(
                    txn_id,
                    UndoAction::RestoreBytes {
                        page_id,
                        slot,
                        record_size,
                        before: before_bytes,
                    },
                )?;
                updated += 1;
            }
        }

        debug!(txn_id, table, updated, "rows updated");
        Ok(updated)
    }

    pub fn delete(&self, txn_id: u32, table: &str, predicate: Option<&Predicate>) -> StorageResult<usize> {
        let info = self.resolve_table(table)?;
        self.lock_manager.acquire_write(txn_id, info.table_id)?;

        let record_size = value::record_size(&info.columns);
        let records = page_chain::scan_records(&self.buffer_pool, info.first_page_id, record_size)?;
        let mut deleted = 0usize;

        for (page_id, slot, before_bytes) in records {
            let (row, _) = value::deserialize(&info.columns, &before_bytes)?;
            if predicate.map(|p| p.matches(&row)).unwrap_or(true) {
                page_chain::mark_deleted(&self.buffer_pool, page_id, slot, record_size)?;
                self.wal.log_delete(txn_id, page_id, &before_bytes)?;
                self.transaction_manager.record_undo(
                    txn_id,
                    UndoAction::RestoreBytes {
                        page_id,
                        slot,
                        record_size,
                        before: before_bytes,
                    },
                )?;
                deleted += 1;
            }
        }

        debug!(txn_id, table, deleted, "rows deleted");
        Ok(deleted)
    }

    pub fn create_table(&self, txn_id: u32, name: &str, columns: Vec<Column>) -> StorageResult<u32> {
        self.lock_manager.acquire_write(txn_id, CATALOG_RESOURCE_ID)?;
        let table_id = self.catalog.create_table(&self.wal, txn_id, name, columns)?;
        self.wal.log_ddl(txn_id, &format!("CREATE TABLE {} (table_id={})", name, table_id))?;
        info!(txn_id, name, table_id, "table created");
        Ok(table_id)
    }

    pub fn drop_table(&self, txn_id: u32, name: &str) -> StorageResult<()> {
        self.lock_manager.acquire_write(txn_id, CATALOG_RESOURCE_ID)?;
        self.catalog.drop_table(&self.wal, txn_id, name)?;
        self.wal.log_ddl(txn_id, &format!("DROP TABLE {}", name))?;
        Ok(())
    }

    fn create_index(
        &self,
        txn_id: u32,
        name: &str,
        table: &str,
        column: &str,
        index_type: IndexType,
    ) -> StorageResult<u32> {
        self.lock_manager.acquire_write(txn_id, CATALOG_RESOURCE_ID)?;
        let info = self.resolve_table(table)?;
        if !info.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)) {
            return Err(StorageError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }

        let root_page_id = self.disk.allocate_page();
        let frame = self.buffer_pool.get_page(root_page_id)?;
        let root_bytes = match index_type {
            IndexType::BTree => BTreeIndexPage::empty(true).into_bytes(),
            IndexType::Hash => HashIndexPage::empty().into_bytes(),
        };
        self.buffer_pool.put_page_bytes(&frame, root_bytes);
        self.buffer_pool.unpin_page(&frame);

        let index_id =
            self.catalog
                .create_index(&self.wal, txn_id, name, info.table_id, column, index_type, root_page_id)?;
        self.wal.log_ddl(txn_id, &format!("CREATE INDEX {} ON {}({})", name, table, column))?;
        Ok(index_id)
    }

    pub fn create_btree_index(&self, txn_id: u32, name: &str, table: &str, column: &str) -> StorageResult<u32> {
        self.create_index(txn_id, name, table, column, IndexType::BTree)
    }

    pub fn create_hash_index(&self, txn_id: u32, name: &str, table: &str, column: &str) -> StorageResult<u32> {
        self.create_index(txn_id, name, table, column, IndexType::Hash)
    }

    pub fn drop_index(&self, txn_id: u32, name: &str) -> StorageResult<()> {
        self.lock_manager.acquire_write(txn_id, CATALOG_RESOURCE_ID)?;
        self.catalog.drop_index(&self.wal, txn_id, name)?;
        self.wal.log_ddl(txn_id, &format!("DROP INDEX {}", name))?;
        Ok(())
    }

    pub fn describe(&self, table: &str) -> StorageResult<Vec<Column>> {
        Ok(self.resolve_table(table)?.columns)
    }

    pub fn get_all_tables(&self) -> Vec<crate::catalog::TableInfo> {
        self.catalog.all_tables()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ColumnType;
    use std::time::Duration;

    fn storage() -> Storage {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("s.dat");
        let wal_path = dir.path().join("s.wal");
        std::mem::forget(dir);

        let disk = Arc::new(DiskManager::open(db_path.to_str().unwrap()).unwrap());
        let buffer_pool = Arc::new(BufferPool::new(disk.clone(), 20));
        let catalog = Arc::new(Catalog::new(disk.clone(), buffer_pool.clone()));
        catalog.bootstrap().unwrap();
        let wal = Arc::new(crate::wal::WalManager::open(wal_path.to_str().unwrap()).unwrap());
        let lock_manager = Arc::new(LockManager::new(Duration::from_secs(5)));
        let transaction_manager =
            Arc::new(TransactionManager::new(wal.clone(), lock_manager.clone(), buffer_pool.clone()));

        Storage::new(catalog, buffer_pool, disk, wal, lock_manager, transaction_manager)
    }

    fn make_table(storage: &Storage, name: &str) -> u32 {
        storage
            .run_autocommit(|txn_id| {
                storage.create_table(
                    txn_id,
                    name,
                    vec![
                        Column::new("id", ColumnType::Int, 0, false),
                        Column::new("name", ColumnType::VarChar, 10, true),
                    ],
                )
            })
            .unwrap()
    }

    #[test]
    fn create_insert_scan_returns_rows_in_order() {
        let storage = storage();
        make_table(&storage, "t");

        storage
            .run_autocommit(|txn_id| storage.insert(txn_id, "t", &[Value::Int(1), Value::Str("a".to_string())]))
            .unwrap();
        storage
            .run_autocommit(|txn_id| storage.insert(txn_id, "t", &[Value::Int(2), Value::Str("b".to_string())]))
            .unwrap();

        let rows = storage.run_autocommit(|txn_id| storage.scan(txn_id, "t")).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::Str("a".to_string())],
                vec![Value::Int(2), Value::Str("b".to_string())],
            ]
        );
    }

    #[test]
    fn delete_then_scan_omits_the_row() {
        let storage = storage();
        make_table(&storage, "t");
        storage
            .run_autocommit(|txn_id| storage.insert(txn_id, "t", &[Value::Int(1), Value::Str("a".to_string())]))
            .unwrap();
        storage
            .run_autocommit(|txn_id| storage.insert(txn_id, "t", &[Value::Int(2), Value::Str("b".to_string())]))
            .unwrap();

        let pred = Predicate::new(0, crate::operator::Op::Equals, Value::Int(1));
        let deleted = storage.run_autocommit(|txn_id| storage.delete(txn_id, "t", Some(&pred))).unwrap();
        assert_eq!(deleted, 1);

        let rows = storage.run_autocommit(|txn_id| storage.scan(txn_id, "t")).unwrap();
        assert_eq!(rows, vec![vec![Value::Int(2), Value::Str("b".to_string())]]);
    }

    #[test]
    fn update_with_predicate_touches_matching_rows_only() {
        let storage = storage();
        storage
            .run_autocommit(|txn_id| {
                storage.create_table(
                    txn_id,
                    "e",
                    vec![Column::new("id", ColumnType::Int, 0, false), Column::new("salary", ColumnType::Int, 0, false)],
                )
            })
            .unwrap();

        for (id, salary) in [(1, 100), (2, 200), (3, 300)] {
            storage
                .run_autocommit(|txn_id| storage.insert(txn_id, "e", &[Value::Int(id), Value::Int(salary)]))
                .unwrap();
        }

        let pred = Predicate::new(0, crate::operator::Op::GreaterThanOrEq, Value::Int(2));
        let updated = storage
            .run_autocommit(|txn_id| storage.update(txn_id, "e", "salary", &Value::Int(500), Some(&pred)))
            .unwrap();
        assert_eq!(updated, 2);

        let rows = storage.run_autocommit(|txn_id| storage.scan(txn_id, "e")).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::Int(100)],
                vec![Value::Int(2), Value::Int(500)],
                vec![Value::Int(3), Value::Int(500)],
            ]
        );
    }

    #[test]
    fn insert_past_one_page_chains_a_new_page() {
        let storage = storage();
        storage
            .run_autocommit(|txn_id| storage.create_table(txn_id, "wide", vec![Column::new("id", ColumnType::Int, 0, false)]))
            .unwrap();

        for i in 0..1500 {
            storage.run_autocommit(|txn_id| storage.insert(txn_id, "wide", &[Value::Int(i)])).unwrap();
        }

        let rows = storage.run_autocommit(|txn_id| storage.scan(txn_id, "wide")).unwrap();
        assert_eq!(rows.len(), crate::storage::MAX_SCAN_ROWS);
    }

    #[test]
    fn an_aborted_insert_is_undone() {
        let storage = storage();
        make_table(&storage, "t");

        let txn_id = storage.transaction_manager.begin(IsolationLevel::ReadCommitted).unwrap();
        storage.insert(txn_id, "t", &[Value::Int(1), Value::Str("a".to_string())]).unwrap();
        storage.transaction_manager.abort(txn_id).unwrap();

        let rows = storage.run_autocommit(|txn_id| storage.scan(txn_id, "t")).unwrap();
        assert!(rows.is_empty());
    }
}
