//! Table facade: one schema bound to a clustered tree and any number of
//! secondary indexes.
//!
//! The clustered tree maps the primary key (always the first column) to
//! the full encoded row. Each secondary index maps a column value to the
//! primary key; a point lookup through one is the classic bookmark
//! traversal, secondary first, clustered second.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::RandomState;
use btree::BPlusTree;
use buffer::BufferPool;
use catalog::TableSchema;
use common::{ColumnId, DbError, DbResult, Row, TableId};
use hashbrown::HashMap;
use types::{SqlType, Value};

use crate::codec;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Name reserved for the clustered index.
pub const PRIMARY_INDEX: &str = "PRIMARY";

/// Secondary index: indexed-column value to primary-key cell.
pub struct SecondaryIndex {
    name: String,
    column: ColumnId,
    unique: bool,
    tree: BPlusTree,
}

impl SecondaryIndex {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> ColumnId {
        self.column
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn file_id(&self) -> TableId {
        self.tree.table_id()
    }

    /// Records `key -> pk`. Unique indexes reject a second posting for the
    /// same key.
    pub fn insert_entry(&self, key: Value, pk: &Value) -> DbResult<()> {
        self.tree.put(key, codec::encode_cell(pk)?)
    }

    /// The primary key filed under `key`; the oldest posting when the
    /// index is not unique.
    pub fn find_pk(&self, key: &Value, pk_type: SqlType) -> DbResult<Option<Value>> {
        self.tree
            .get(key)?
            .map(|bytes| codec::decode_cell(pk_type, &bytes))
            .transpose()
    }

    /// Every primary key filed under `key`, in insertion order.
    pub fn find_pks(&self, key: &Value, pk_type: SqlType) -> DbResult<Vec<Value>> {
        self.tree
            .range(Some(key), Some(key))?
            .into_iter()
            .map(|(_, bytes)| codec::decode_cell(pk_type, &bytes))
            .collect()
    }

    /// Drops the `key -> pk` posting, leaving other postings for the same
    /// key alone.
    pub fn delete_entry(&self, key: &Value, pk: &Value) -> DbResult<bool> {
        self.tree.delete_exact(key, &codec::encode_cell(pk)?)
    }
}

pub struct Table {
    name: String,
    schema: TableSchema,
    data_dir: PathBuf,
    pool: Arc<BufferPool>,
    clustered: BPlusTree,
    secondaries: Map<String, SecondaryIndex>,
}

impl Table {
    /// Creates the clustered tree for a brand-new table.
    pub fn create(
        pool: Arc<BufferPool>,
        data_dir: &Path,
        table_id: TableId,
        name: String,
        schema: TableSchema,
    ) -> DbResult<Self> {
        let clustered = BPlusTree::create(Arc::clone(&pool), data_dir, table_id, true)?;
        Ok(Self {
            name,
            schema,
            data_dir: data_dir.to_path_buf(),
            pool,
            clustered,
            secondaries: Map::default(),
        })
    }

    /// Re-attaches a table whose clustered tree already exists on disk.
    /// Secondary indexes are not persisted and start out absent.
    pub fn open(
        pool: Arc<BufferPool>,
        data_dir: &Path,
        table_id: TableId,
        name: String,
        schema: TableSchema,
    ) -> DbResult<Self> {
        let clustered = BPlusTree::open(Arc::clone(&pool), data_dir, table_id, true)?;
        Ok(Self {
            name,
            schema,
            data_dir: data_dir.to_path_buf(),
            pool,
            clustered,
            secondaries: Map::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn table_id(&self) -> TableId {
        self.clustered.table_id()
    }

    fn pk_type(&self) -> SqlType {
        self.schema.primary_key().ty
    }

    /// Validates, encodes, and inserts the row: clustered tree first, then
    /// every secondary index whose column value is non-null. A failure
    /// after the clustered insert is fatal; there is no rollback.
    pub fn insert(&self, row: &Row) -> DbResult<()> {
        let bytes = codec::encode_row(&self.schema, row)?;
        let pk = row.values[0].clone();
        self.clustered.put(pk.clone(), bytes)?;

        for index in self.secondaries.values() {
            let value = &row.values[index.column as usize];
            if !value.is_null() {
                index.insert_entry(value.clone(), &pk)?;
            }
        }
        Ok(())
    }

    pub fn select_by_pk(&self, pk: &Value) -> DbResult<Option<Row>> {
        self.clustered
            .get(pk)?
            .map(|bytes| codec::decode_row(&self.schema, &bytes))
            .transpose()
    }

    /// Rows with `lo <= pk <= hi`, in primary-key order.
    pub fn range_select(&self, lo: Option<&Value>, hi: Option<&Value>) -> DbResult<Vec<Row>> {
        self.clustered
            .range(lo, hi)?
            .into_iter()
            .map(|(_, bytes)| codec::decode_row(&self.schema, &bytes))
            .collect()
    }

    pub fn full_scan(&self) -> DbResult<Vec<Row>> {
        self.range_select(None, None)
    }

    /// Bookmark lookup: resolves `key` through a secondary index, then
    /// fetches the row from the clustered tree.
    pub fn select_by_index(&self, index_name: &str, key: &Value) -> DbResult<Option<Row>> {
        let index = self.secondary_index(index_name)?;
        match index.find_pk(key, self.pk_type())? {
            Some(pk) => self.select_by_pk(&pk),
            None => Ok(None),
        }
    }

    /// Replaces the row stored under `pk`. The new row must keep the same
    /// primary key; secondary indexes are patched from a diff of the
    /// changed indexed columns.
    pub fn update(&self, pk: &Value, new_row: &Row) -> DbResult<()> {
        let bytes = codec::encode_row(&self.schema, new_row)?;
        if new_row.values[0] != *pk {
            return Err(DbError::InvalidArgument(
                "update must not change the primary key".into(),
            ));
        }
        let old_row = self.select_by_pk(pk)?.ok_or_else(|| {
            DbError::InvalidArgument(format!("no row with primary key {pk:?}"))
        })?;

        self.clustered.delete(pk)?;
        self.clustered.put(pk.clone(), bytes)?;

        for index in self.secondaries.values() {
            let old_value = &old_row.values[index.column as usize];
            let new_value = &new_row.values[index.column as usize];
            if old_value == new_value {
                continue;
            }
            if !old_value.is_null() {
                index.delete_entry(old_value, pk)?;
            }
            if !new_value.is_null() {
                index.insert_entry(new_value.clone(), pk)?;
            }
        }
        Ok(())
    }

    /// Removes the row from the clustered tree and from every secondary
    /// index. Returns whether a row existed.
    pub fn delete(&self, pk: &Value) -> DbResult<bool> {
        let Some(old_row) = self.select_by_pk(pk)? else {
            return Ok(false);
        };
        self.clustered.delete(pk)?;

        for index in self.secondaries.values() {
            let value = &old_row.values[index.column as usize];
            if !value.is_null() {
                index.delete_entry(value, pk)?;
            }
        }
        Ok(true)
    }

    /// Attaches a new secondary index on `column_name`, back-filling it
    /// from the existing rows. `file_id` names the index's storage file.
    /// Null column values are skipped; on a unique index an existing
    /// duplicate surfaces as `DuplicateKey`.
    pub fn add_secondary_index(
        &mut self,
        index_name: &str,
        column_name: &str,
        unique: bool,
        file_id: TableId,
    ) -> DbResult<()> {
        if index_name == PRIMARY_INDEX || self.secondaries.contains_key(index_name) {
            return Err(DbError::IndexExists(index_name.to_string()));
        }
        let column = self
            .schema
            .column_index(column_name)
            .ok_or_else(|| DbError::ColumnNotFound(column_name.to_string()))?;

        let tree = BPlusTree::create(Arc::clone(&self.pool), &self.data_dir, file_id, unique)?;
        let index = SecondaryIndex {
            name: index_name.to_string(),
            column,
            unique,
            tree,
        };

        for (pk, bytes) in self.clustered.scan_all()? {
            let row = codec::decode_row(&self.schema, &bytes)?;
            let value = &row.values[column as usize];
            if !value.is_null() {
                index.insert_entry(value.clone(), &pk)?;
            }
        }

        self.secondaries.insert(index_name.to_string(), index);
        Ok(())
    }

    /// Detaches a secondary index and returns its storage file id so the
    /// engine can reclaim the files. The clustered index never detaches.
    pub fn drop_secondary_index(&mut self, index_name: &str) -> DbResult<TableId> {
        if index_name == PRIMARY_INDEX {
            return Err(DbError::ClusteredIndexImmutable);
        }
        let index = self
            .secondaries
            .remove(index_name)
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))?;
        Ok(index.file_id())
    }

    pub fn secondary_index(&self, index_name: &str) -> DbResult<&SecondaryIndex> {
        self.secondaries
            .get(index_name)
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))
    }

    pub fn has_index(&self, index_name: &str) -> bool {
        index_name == PRIMARY_INDEX || self.secondaries.contains_key(index_name)
    }

    /// Names of the secondary indexes, unordered.
    pub fn index_names(&self) -> Vec<String> {
        self.secondaries.keys().cloned().collect()
    }

    /// Storage file ids of every secondary index.
    pub fn secondary_file_ids(&self) -> Vec<TableId> {
        self.secondaries.values().map(|i| i.file_id()).collect()
    }
}
