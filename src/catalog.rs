//! Process-wide shared metadata: tables and indexes.
//!
//! Grounded on `common/catalog.rs`'s `Catalog` (a guarded map of tables,
//! lazily backed by a persisted schema table) but fixed against the two
//! bugs the design notes call out: column descriptors are persisted in
//! full rather than hard-coded per table name on reload, and a single
//! lock guards the whole catalog rather than leaving load races to the
//! caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::buffer_pool::BufferPool;
use crate::disk::DiskManager;
use crate::error::{StorageError, StorageResult};
use crate::io::{decode_fixed_str, encode_fixed_str};
use crate::page::DataPage;
use crate::page_chain;
use crate::value::{decode_columns, encode_columns, Column, ColumnType};
use crate::wal::WalManager;

pub const SYS_TABLES_PAGE: u32 = 1;
pub const SYS_COLUMNS_PAGE: u32 = 2;
pub const SYS_INDEXES_PAGE: u32 = 3;
pub const SYS_TYPES_PAGE: u32 = 4;
pub const FIRST_RESERVED_PAGE: u32 = 5;

pub const FIRST_USER_TABLE_ID: u32 = 10;
pub const FIRST_USER_INDEX_ID: u32 = 1;

const MAX_NAME_LEN: usize = 64;
// flag + table_id + name + column_count
const TABLE_RECORD_SIZE: usize = 1 + 4 + MAX_NAME_LEN + 1;
// flag + table_id + column_count + MAX_COLUMNS descriptors
const COLUMNS_RECORD_SIZE: usize = 1 + 4 + 1 + crate::value::MAX_COLUMNS * Column::DESCRIPTOR_WIDTH;
// flag + index_id + name + table_id + column_name + type_tag + root_page_id
const INDEX_RECORD_SIZE: usize = 1 + 4 + MAX_NAME_LEN + 4 + MAX_NAME_LEN + 1 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    BTree,
    Hash,
}

impl IndexType {
    fn tag(&self) -> u8 {
        match self {
            IndexType::BTree => 0,
            IndexType::Hash => 1,
        }
    }

    fn from_tag(tag: u8) -> StorageResult<Self> {
        match tag {
            0 => Ok(IndexType::BTree),
            1 => Ok(IndexType::Hash),
            other => Err(StorageError::other(format!("invalid index type tag {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub table_id: u32,
    pub name: String,
    pub columns: Vec<Column>,
    pub first_page_id: u32,
}

#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub index_id: u32,
    pub name: String,
    pub table_id: u32,
    pub column: String,
    pub index_type: IndexType,
    pub root_page_id: u32,
}

struct CatalogState {
    tables: HashMap<u32, TableInfo>,
    indexes: HashMap<u32, IndexInfo>,
    next_table_id: u32,
    next_index_id: u32,
}

pub struct Catalog {
    disk: Arc<DiskManager>,
    buffer_pool: Arc<BufferPool>,
    state: Mutex<CatalogState>,
}

fn system_columns(pairs: &[(&str, ColumnType, u8)]) -> Vec<Column> {
    pairs
        .iter()
        .map(|(name, ty, size)| Column::new(*name, *ty, *size, false))
        .collect()
}

impl Catalog {
    pub fn new(disk: Arc<DiskManager>, buffer_pool: Arc<BufferPool>) -> Self {
        Self {
            disk,
            buffer_pool,
            state: Mutex::new(CatalogState {
                tables: HashMap::new(),
                indexes: HashMap::new(),
                next_table_id: FIRST_USER_TABLE_ID,
                next_index_id: FIRST_USER_INDEX_ID,
            }),
        }
    }

    /// Installs the four built-in system tables, ensures their head
    /// pages exist, then replays every user-table and index record
    /// persisted on the system pages into memory.
    pub fn bootstrap(&self) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();

        state.tables.insert(
            SYS_TABLES_PAGE,
            TableInfo {
                table_id: SYS_TABLES_PAGE,
                name: "sys_tables".to_string(),
                columns: system_columns(&[
                    ("table_id", ColumnType::Int, 0),
                    ("name", ColumnType::VarChar, MAX_NAME_LEN as u8 - 1),
                    ("column_count", ColumnType::Int, 0),
                ]),
                first_page_id: SYS_TABLES_PAGE,
            },
        );
        state.tables.insert(
            SYS_COLUMNS_PAGE,
            TableInfo {
                table_id: SYS_COLUMNS_PAGE,
                name: "sys_columns".to_string(),
                columns: system_columns(&[
                    ("table_id", ColumnType::Int, 0),
                    ("name", ColumnType::VarChar, MAX_NAME_LEN as u8 - 1),
                    ("type", ColumnType::VarChar, 15),
                    ("declared_size", ColumnType::Int, 0),
                ]),
                first_page_id: SYS_COLUMNS_PAGE,
            },
        );
        state.tables.insert(
            SYS_INDEXES_PAGE,
            TableInfo {
                table_id: SYS_INDEXES_PAGE,
                name: "sys_indexes".to_string(),
                columns: system_columns(&[
                    ("index_id", ColumnType::Int, 0),
                    ("name", ColumnType::VarChar, MAX_NAME_LEN as u8 - 1),
                    ("table_id", ColumnType::Int, 0),
                    ("column_name", ColumnType::VarChar, MAX_NAME_LEN as u8 - 1),
                ]),
                first_page_id: SYS_INDEXES_PAGE,
            },
        );
        state.tables.insert(
            SYS_TYPES_PAGE,
            TableInfo {
                table_id: SYS_TYPES_PAGE,
                name: "sys_types".to_string(),
                columns: system_columns(&[("name", ColumnType::VarChar, 15)]),
                first_page_id: SYS_TYPES_PAGE,
            },
        );

        self.disk.reserve_page(FIRST_RESERVED_PAGE - 1);
        for page_id in [SYS_TABLES_PAGE, SYS_COLUMNS_PAGE, SYS_INDEXES_PAGE] {
            self.ensure_head_page_initialized(page_id)?;
        }

        let table_records = page_chain::scan_records(&self.buffer_pool, SYS_TABLES_PAGE, TABLE_RECORD_SIZE)?;
        let mut max_table_id = FIRST_USER_TABLE_ID - 1;

        for (_, _, bytes) in &table_records {
            let (table_id, name, column_count) = decode_table_record(bytes);
            let columns = self.read_columns_for(table_id, column_count)?;
            max_table_id = max_table_id.max(table_id);
            state.tables.insert(
                table_id,
                TableInfo {
                    table_id,
                    name,
                    columns,
                    first_page_id: table_id,
                },
            );
        }
        state.next_table_id = max_table_id + 1;

        let index_records = page_chain::scan_records(&self.buffer_pool, SYS_INDEXES_PAGE, INDEX_RECORD_SIZE)?;
        let mut max_index_id = FIRST_USER_INDEX_ID - 1;

        for (_, _, bytes) in &index_records {
            let info = decode_index_record(bytes)?;
            max_index_id = max_index_id.max(info.index_id);
            state.indexes.insert(info.index_id, info);
        }
        state.next_index_id = max_index_id + 1;

        info!(
            tables = state.tables.len(),
            indexes = state.indexes.len(),
            "catalog bootstrap complete"
        );
        Ok(())
    }

    fn ensure_head_page_initialized(&self, page_id: u32) -> StorageResult<()> {
        let frame = self.buffer_pool.get_page(page_id)?;
        let bytes = self.buffer_pool.page_bytes(&frame);
        if bytes.iter().all(|&b| b == 0) {
            self.buffer_pool.put_page_bytes(&frame, DataPage::empty().into_bytes());
        }
        self.buffer_pool.unpin_page(&frame);
        Ok(())
    }

    fn read_columns_for(&self, table_id: u32, column_count: u8) -> StorageResult<Vec<Column>> {
        let records = page_chain::scan_records(&self.buffer_pool, SYS_COLUMNS_PAGE, COLUMNS_RECORD_SIZE)?;
        for (_, _, bytes) in records {
            let (rec_table_id, columns) = decode_columns_record(&bytes, column_count)?;
            if rec_table_id == table_id {
                return Ok(columns);
            }
        }
        Err(StorageError::other(format!(
            "no column descriptors persisted for table {}",
            table_id
        )))
    }

    /// Creates a new table, rejecting a case-insensitive name collision.
    /// Allocates the next table id, reserves its head data page (equal
    /// to the table id by construction), and persists the table and
    /// column descriptors before registering it in memory. Both system-
    /// table writes are also WAL-logged as ordinary committed inserts
    /// against `SYS_TABLES_PAGE`/`SYS_COLUMNS_PAGE` (the same page-chain
    /// format user tables use), so a crash before the next flush doesn't
    /// leave the table's existence undone while its rows survive.
    pub fn create_table(&self, wal: &WalManager, txn_id: u32, name: &str, columns: Vec<Column>) -> StorageResult<u32> {
        let mut state = self.state.lock().unwrap();
        if state.tables.values().any(|t| t.name.eq_ignore_ascii_case(name)) {
            return Err(StorageError::DuplicateTable { name: name.to_string() });
        }
        if columns.len() > crate::value::MAX_COLUMNS {
            return Err(StorageError::SchemaMismatch {
                table: name.to_string(),
                reason: format!("at most {} columns are supported", crate::value::MAX_COLUMNS),
            });
        }

        let table_id = state.next_table_id;
        state.next_table_id += 1;

        self.disk.reserve_page(table_id);
        self.ensure_head_page_initialized(table_id)?;

        let table_record = encode_table_record(table_id, name, columns.len() as u8);
        page_chain::append_record(&self.disk, &self.buffer_pool, wal, SYS_TABLES_PAGE, TABLE_RECORD_SIZE, &table_record)?;
        wal.log_insert(txn_id, SYS_TABLES_PAGE, &table_record)?;

        let columns_record = encode_columns_record(table_id, &columns);
        page_chain::append_record(
            &self.disk,
            &self.buffer_pool,
            wal,
            SYS_COLUMNS_PAGE,
            COLUMNS_RECORD_SIZE,
            &columns_record,
        )?;
        wal.log_insert(txn_id, SYS_COLUMNS_PAGE, &columns_record)?;

        debug!(table_id, name, "table created");
        state.tables.insert(
            table_id,
            TableInfo {
                table_id,
                name: name.to_string(),
                columns,
                first_page_id: table_id,
            },
        );

        Ok(table_id)
    }

    /// Removes the in-memory entry and tombstones its persisted
    /// descriptor. Does not reclaim the table's page chain (see
    /// DESIGN.md for why this is an accepted limitation).
    pub fn drop_table(&self, wal: &WalManager, txn_id: u32, name: &str) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        let table_id = state
            .tables
            .values()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| t.table_id)
            .ok_or_else(|| StorageError::UnknownTable { name: name.to_string() })?;

        state.tables.remove(&table_id);
        drop(state);

        for (page_id, slot, bytes) in page_chain::scan_records(&self.buffer_pool, SYS_TABLES_PAGE, TABLE_RECORD_SIZE)? {
            let (rec_table_id, _, _) = decode_table_record(&bytes);
            if rec_table_id == table_id {
                page_chain::mark_deleted(&self.buffer_pool, page_id, slot, TABLE_RECORD_SIZE)?;
                wal.log_delete(txn_id, page_id, &bytes)?;
            }
        }

        Ok(())
    }

    pub fn find_table_by_name(&self, name: &str) -> Option<TableInfo> {
        let state = self.state.lock().unwrap();
        state.tables.values().find(|t| t.name.eq_ignore_ascii_case(name)).cloned()
    }

    pub fn find_table_by_id(&self, table_id: u32) -> Option<TableInfo> {
        self.state.lock().unwrap().tables.get(&table_id).cloned()
    }

    pub fn all_tables(&self) -> Vec<TableInfo> {
        self.state.lock().unwrap().tables.values().cloned().collect()
    }

    pub fn create_index(
        &self,
        wal: &WalManager,
        txn_id: u32,
        name: &str,
        table_id: u32,
        column: &str,
        index_type: IndexType,
        root_page_id: u32,
    ) -> StorageResult<u32> {
        let mut state = self.state.lock().unwrap();
        if state.indexes.values().any(|i| i.name.eq_ignore_ascii_case(name)) {
            return Err(StorageError::other(format!("index '{}' already exists", name)));
        }

        let index_id = state.next_index_id;
        state.next_index_id += 1;

        let record = encode_index_record(index_id, name, table_id, column, index_type, root_page_id);
        page_chain::append_record(&self.disk, &self.buffer_pool, wal, SYS_INDEXES_PAGE, INDEX_RECORD_SIZE, &record)?;
        wal.log_insert(txn_id, SYS_INDEXES_PAGE, &record)?;

        let info = IndexInfo {
            index_id,
            name: name.to_string(),
            table_id,
            column: column.to_string(),
            index_type,
            root_page_id,
        };
        state.indexes.insert(index_id, info);
        Ok(index_id)
    }

    pub fn drop_index(&self, wal: &WalManager, txn_id: u32, name: &str) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        let index_id = state
            .indexes
            .values()
            .find(|i| i.name.eq_ignore_ascii_case(name))
            .map(|i| i.index_id)
            .ok_or_else(|| StorageError::other(format!("unknown index '{}'", name)))?;
        state.indexes.remove(&index_id);
        drop(state);

        for (page_id, slot, bytes) in page_chain::scan_records(&self.buffer_pool, SYS_INDEXES_PAGE, INDEX_RECORD_SIZE)? {
            let info = decode_index_record(&bytes)?;
            if info.index_id == index_id {
                page_chain::mark_deleted(&self.buffer_pool, page_id, slot, INDEX_RECORD_SIZE)?;
                wal.log_delete(txn_id, page_id, &bytes)?;
            }
        }
        Ok(())
    }

    pub fn find_index_by_name(&self, name: &str) -> Option<IndexInfo> {
        let state = self.state.lock().unwrap();
        state.indexes.values().find(|i| i.name.eq_ignore_ascii_case(name)).cloned()
    }

    pub fn indexes_for_table(&self, table_id: u32) -> Vec<IndexInfo> {
        self.state
            .lock()
            .unwrap()
            .indexes
            .values()
            .filter(|i| i.table_id == table_id)
            .cloned()
            .collect()
    }
}

fn encode_table_record(table_id: u32, name: &str, column_count: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TABLE_RECORD_SIZE);
    buf.push(0); // flag
    buf.extend_from_slice(&table_id.to_le_bytes());
    buf.extend_from_slice(&encode_fixed_str(name, MAX_NAME_LEN));
    buf.push(column_count);
    buf
}

fn decode_table_record(bytes: &[u8]) -> (u32, String, u8) {
    let table_id = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
    let name = decode_fixed_str(&bytes[5..5 + MAX_NAME_LEN]);
    let column_count = bytes[5 + MAX_NAME_LEN];
    (table_id, name, column_count)
}

fn encode_columns_record(table_id: u32, columns: &[Column]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(COLUMNS_RECORD_SIZE);
    buf.push(0); // flag
    buf.extend_from_slice(&table_id.to_le_bytes());
    buf.push(columns.len() as u8);
    let mut descriptors = encode_columns(columns);
    descriptors.resize(crate::value::MAX_COLUMNS * Column::DESCRIPTOR_WIDTH, 0);
    buf.extend_from_slice(&descriptors);
    buf
}

fn decode_columns_record(bytes: &[u8], column_count: u8) -> StorageResult<(u32, Vec<Column>)> {
    let table_id = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
    let stored_count = bytes[5] as usize;
    let descriptors = &bytes[6..];
    let columns = decode_columns(descriptors, stored_count.min(column_count as usize))?;
    Ok((table_id, columns))
}

fn encode_index_record(
    index_id: u32,
    name: &str,
    table_id: u32,
    column: &str,
    index_type: IndexType,
    root_page_id: u32,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(INDEX_RECORD_SIZE);
    buf.push(0); // flag
    buf.extend_from_slice(&index_id.to_le_bytes());
    buf.extend_from_slice(&encode_fixed_str(name, MAX_NAME_LEN));
    buf.extend_from_slice(&table_id.to_le_bytes());
    buf.extend_from_slice(&encode_fixed_str(column, MAX_NAME_LEN));
    buf.push(index_type.tag());
    buf.extend_from_slice(&root_page_id.to_le_bytes());
    buf
}

fn decode_index_record(bytes: &[u8]) -> StorageResult<IndexInfo> {
    let index_id = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
    let mut offset = 5;
    let name = decode_fixed_str(&bytes[offset..offset + MAX_NAME_LEN]);
    offset += MAX_NAME_LEN;
    let table_id = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
    offset += 4;
    let column = decode_fixed_str(&bytes[offset..offset + MAX_NAME_LEN]);
    offset += MAX_NAME_LEN;
    let index_type = IndexType::from_tag(bytes[offset])?;
    offset += 1;
    let root_page_id = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());

    Ok(IndexInfo {
        index_id,
        name,
        table_id,
        column,
        index_type,
        root_page_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ColumnType;

    fn test_catalog() -> (Catalog, WalManager) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog_test.dat");
        let wal_path = dir.path().join("catalog_test.wal");
        std::mem::forget(dir);
        let disk = Arc::new(DiskManager::open(db_path.to_str().unwrap()).unwrap());
        let buffer_pool = Arc::new(BufferPool::new(disk.clone(), 20));
        let wal = WalManager::open(wal_path.to_str().unwrap()).unwrap();
        (Catalog::new(disk, buffer_pool), wal)
    }

    #[test]
    fn bootstrap_installs_four_system_tables() {
        let (cat, _wal) = test_catalog();
        cat.bootstrap().unwrap();
        assert!(cat.find_table_by_id(SYS_TABLES_PAGE).is_some());
        assert!(cat.find_table_by_id(SYS_COLUMNS_PAGE).is_some());
        assert!(cat.find_table_by_id(SYS_INDEXES_PAGE).is_some());
        assert!(cat.find_table_by_id(SYS_TYPES_PAGE).is_some());
    }

    #[test]
    fn create_table_assigns_table_id_as_head_page() {
        let (cat, wal) = test_catalog();
        cat.bootstrap().unwrap();

        let columns = vec![Column::new("id", ColumnType::Int, 0, false)];
        let table_id = cat.create_table(&wal, 1, "widgets", columns).unwrap();
        assert_eq!(table_id, FIRST_USER_TABLE_ID);

        let info = cat.find_table_by_id(table_id).unwrap();
        assert_eq!(info.first_page_id, table_id);
    }

    #[test]
    fn duplicate_table_name_is_rejected_case_insensitively() {
        let (cat, wal) = test_catalog();
        cat.bootstrap().unwrap();
        let columns = vec![Column::new("id", ColumnType::Int, 0, false)];
        cat.create_table(&wal, 1, "Widgets", columns.clone()).unwrap();
        let err = cat.create_table(&wal, 2, "widgets", columns).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateTable { .. }));
    }

    #[test]
    fn column_descriptors_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("reload.dat");
        let db_path = db_path.to_str().unwrap();
        let wal_path = dir.path().join("reload.wal");

        {
            let disk = Arc::new(DiskManager::open(db_path).unwrap());
            let buffer_pool = Arc::new(BufferPool::new(disk.clone(), 20));
            let wal = WalManager::open(wal_path.to_str().unwrap()).unwrap();
            let cat = Catalog::new(disk.clone(), buffer_pool.clone());
            cat.bootstrap().unwrap();
            cat.create_table(
                &wal,
                1,
                "accounts",
                vec![
                    Column::new("id", ColumnType::Int, 0, false),
                    Column::new("name", ColumnType::VarChar, 20, true),
                ],
            )
            .unwrap();
            buffer_pool.flush_all().unwrap();
        }

        let disk2 = Arc::new(DiskManager::open(db_path).unwrap());
        let buffer_pool2 = Arc::new(BufferPool::new(disk2.clone(), 20));
        let cat2 = Catalog::new(disk2, buffer_pool2);
        cat2.bootstrap().unwrap();

        let info = cat2.find_table_by_name("accounts").unwrap();
        assert_eq!(info.columns.len(), 2);
        assert_eq!(info.columns[1].name, "name");
    }
}
