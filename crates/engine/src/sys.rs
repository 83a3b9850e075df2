//! System catalog: schema persistence through two bootstrap tables.
//!
//! `SYS_TABLES(table_id, table_name)` and `SYS_COLUMNS(table_id, ordinal,
//! name, type_code, max_length, nullable)` occupy storage files 1 and 2.
//! Their own schemas are hardcoded here, never stored. SYS_COLUMNS rows
//! are keyed by the synthetic integer `table_id * 65536 + ordinal`, since
//! clustered keys are scalars and the natural key is composite.

use std::path::Path;
use std::sync::Arc;

use btree::BPlusTree;
use buffer::BufferPool;
use catalog::{Column, TableSchema};
use common::{DbError, DbResult, Row, TableId};
use types::{SqlType, Value};

use crate::codec;

pub(crate) const SYS_TABLES_FILE_ID: TableId = TableId(1);
pub(crate) const SYS_COLUMNS_FILE_ID: TableId = TableId(2);

/// User tables are numbered after the two catalog files.
pub(crate) const FIRST_USER_TABLE_ID: u32 = 3;

fn sys_tables_schema() -> DbResult<TableSchema> {
    TableSchema::try_new(vec![
        Column::new("table_id", SqlType::Int).with_nullable(false),
        Column::varchar("table_name", 128).with_nullable(false),
    ])
}

fn sys_columns_schema() -> DbResult<TableSchema> {
    TableSchema::try_new(vec![
        Column::new("table_id", SqlType::Int).with_nullable(false),
        Column::new("ordinal", SqlType::Int).with_nullable(false),
        Column::varchar("name", 128).with_nullable(false),
        Column::new("type_code", SqlType::Int).with_nullable(false),
        Column::new("max_length", SqlType::Int),
        Column::new("nullable", SqlType::Int).with_nullable(false),
    ])
}

fn column_key(table_id: TableId, ordinal: usize) -> Value {
    Value::Int(table_id.0 as i32 * 65_536 + ordinal as i32)
}

pub(crate) struct SysCatalog {
    tables_schema: TableSchema,
    columns_schema: TableSchema,
    tables: BPlusTree,
    columns: BPlusTree,
}

impl SysCatalog {
    /// Opens the catalog trees, creating them on first use.
    pub(crate) fn open_or_create(pool: Arc<BufferPool>, data_dir: &Path) -> DbResult<Self> {
        let tables = if BPlusTree::exists_on_disk(data_dir, SYS_TABLES_FILE_ID) {
            BPlusTree::open(Arc::clone(&pool), data_dir, SYS_TABLES_FILE_ID, true)?
        } else {
            BPlusTree::create(Arc::clone(&pool), data_dir, SYS_TABLES_FILE_ID, true)?
        };
        let columns = if BPlusTree::exists_on_disk(data_dir, SYS_COLUMNS_FILE_ID) {
            BPlusTree::open(Arc::clone(&pool), data_dir, SYS_COLUMNS_FILE_ID, true)?
        } else {
            BPlusTree::create(Arc::clone(&pool), data_dir, SYS_COLUMNS_FILE_ID, true)?
        };
        Ok(Self {
            tables_schema: sys_tables_schema()?,
            columns_schema: sys_columns_schema()?,
            tables,
            columns,
        })
    }

    /// Records one table and all of its columns.
    pub(crate) fn record_table(
        &self,
        table_id: TableId,
        name: &str,
        schema: &TableSchema,
    ) -> DbResult<()> {
        let row = Row::new(vec![
            Value::Int(table_id.0 as i32),
            Value::Varchar(name.to_string()),
        ]);
        self.tables.put(
            Value::Int(table_id.0 as i32),
            codec::encode_row(&self.tables_schema, &row)?,
        )?;

        for (ordinal, column) in schema.columns().iter().enumerate() {
            let row = Row::new(vec![
                Value::Int(table_id.0 as i32),
                Value::Int(ordinal as i32),
                Value::Varchar(column.name.clone()),
                Value::Int(column.ty.code()),
                column
                    .max_length
                    .map(|m| Value::Int(m as i32))
                    .unwrap_or(Value::Null),
                Value::Int(column.nullable as i32),
            ]);
            self.columns.put(
                column_key(table_id, ordinal),
                codec::encode_row(&self.columns_schema, &row)?,
            )?;
        }
        Ok(())
    }

    /// Forgets one table and its column rows.
    pub(crate) fn remove_table(&self, table_id: TableId) -> DbResult<()> {
        self.tables.delete(&Value::Int(table_id.0 as i32))?;
        let keys: Vec<Value> = self
            .columns
            .range(
                Some(&column_key(table_id, 0)),
                Some(&column_key(table_id, u16::MAX as usize)),
            )?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            self.columns.delete(&key)?;
        }
        Ok(())
    }

    /// Every recorded `(table_id, table_name)` pair.
    pub(crate) fn load_tables(&self) -> DbResult<Vec<(TableId, String)>> {
        let mut out = Vec::new();
        for (_, bytes) in self.tables.scan_all()? {
            let row = codec::decode_row(&self.tables_schema, &bytes)?;
            match (&row.values[0], &row.values[1]) {
                (Value::Int(id), Value::Varchar(name)) => {
                    out.push((TableId(*id as u32), name.clone()));
                }
                _ => {
                    return Err(DbError::CorruptPage(
                        "malformed SYS_TABLES row".into(),
                    ));
                }
            }
        }
        Ok(out)
    }

    /// The recorded columns of one table, in ordinal order.
    pub(crate) fn columns_for(&self, table_id: TableId) -> DbResult<Vec<Column>> {
        let mut out = Vec::new();
        for (_, bytes) in self.columns.range(
            Some(&column_key(table_id, 0)),
            Some(&column_key(table_id, u16::MAX as usize)),
        )? {
            let row = codec::decode_row(&self.columns_schema, &bytes)?;
            let (name, ty, nullable) = match (&row.values[2], &row.values[3], &row.values[5]) {
                (Value::Varchar(name), Value::Int(code), Value::Int(nullable)) => {
                    let ty = SqlType::from_code(*code).ok_or_else(|| {
                        DbError::CorruptPage(format!("unknown column type code {code}"))
                    })?;
                    (name.clone(), ty, *nullable != 0)
                }
                _ => {
                    return Err(DbError::CorruptPage(
                        "malformed SYS_COLUMNS row".into(),
                    ));
                }
            };
            let max_length = match &row.values[4] {
                Value::Int(m) => Some(*m as u16),
                Value::Null => None,
                _ => {
                    return Err(DbError::CorruptPage(
                        "malformed SYS_COLUMNS row".into(),
                    ));
                }
            };
            out.push(Column {
                name,
                ty,
                max_length,
                nullable,
            });
        }
        Ok(out)
    }
}
