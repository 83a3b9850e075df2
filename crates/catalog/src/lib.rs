use ahash::RandomState;
use common::{ColumnId, DbError, DbResult};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use types::{SqlType, Value};

type Map<K, V> = HashMap<K, V, RandomState>;

/// Describes a logical column within a table schema.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
    /// Maximum byte length of the UTF-8 payload; required for varchar.
    pub max_length: Option<u16>,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            max_length: None,
            nullable: true,
        }
    }

    pub fn varchar(name: impl Into<String>, max_length: u16) -> Self {
        Self {
            name: name.into(),
            ty: SqlType::Varchar,
            max_length: Some(max_length),
            nullable: true,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Column layout for a table, along with a name-to-ordinal lookup.
///
/// Positions are significant and stable for the table's lifetime; the first
/// column is the primary key.
#[derive(Clone, Debug)]
pub struct TableSchema {
    columns: Vec<Column>,
    name_to_ordinal: Map<String, ColumnId>,
}

impl TableSchema {
    pub fn try_new(columns: Vec<Column>) -> DbResult<Self> {
        if columns.is_empty() {
            return Err(DbError::InvalidArgument(
                "table must contain at least one column".into(),
            ));
        }
        if columns.len() > ColumnId::MAX as usize {
            return Err(DbError::InvalidArgument(
                "too many columns for a single table".into(),
            ));
        }
        let mut name_to_ordinal = Map::default();
        for (idx, column) in columns.iter().enumerate() {
            if column.name.is_empty() {
                return Err(DbError::InvalidArgument(
                    "column names must not be empty".into(),
                ));
            }
            if column.ty == SqlType::Varchar && column.max_length.is_none() {
                return Err(DbError::InvalidArgument(format!(
                    "varchar column '{}' must declare a maximum length",
                    column.name
                )));
            }
            if name_to_ordinal
                .insert(column.name.clone(), idx as ColumnId)
                .is_some()
            {
                return Err(DbError::InvalidArgument(format!(
                    "duplicate column '{}' found while building schema",
                    column.name
                )));
            }
        }
        Ok(Self {
            columns,
            name_to_ordinal,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the ordinal for a column name.
    pub fn column_index(&self, name: &str) -> Option<ColumnId> {
        self.name_to_ordinal.get(name).copied()
    }

    pub fn column(&self, ordinal: ColumnId) -> Option<&Column> {
        self.columns.get(ordinal as usize)
    }

    /// The primary-key column. Always present: schemas are non-empty.
    pub fn primary_key(&self) -> &Column {
        &self.columns[0]
    }

    /// Checks one row against this schema: arity, per-column type,
    /// nullability, and varchar length bounds. The primary-key cell must
    /// never be null.
    pub fn validate_row(&self, row: &common::Row) -> DbResult<()> {
        if row.values.len() != self.columns.len() {
            return Err(DbError::InvalidArgument(format!(
                "row has {} values, schema has {} columns",
                row.values.len(),
                self.columns.len()
            )));
        }
        for (ordinal, (value, column)) in row.values.iter().zip(&self.columns).enumerate() {
            match value {
                Value::Null => {
                    if ordinal == 0 {
                        return Err(DbError::InvalidArgument(
                            "primary-key cell must not be null".into(),
                        ));
                    }
                    if !column.nullable {
                        return Err(DbError::InvalidArgument(format!(
                            "column '{}' is not nullable",
                            column.name
                        )));
                    }
                }
                _ => {
                    if value.sql_type() != Some(column.ty) {
                        return Err(DbError::InvalidArgument(format!(
                            "value {:?} does not match type of column '{}'",
                            value, column.name
                        )));
                    }
                    if let (Value::Varchar(s), Some(max)) = (value, column.max_length) {
                        if s.len() > max as usize {
                            return Err(DbError::InvalidArgument(format!(
                                "value for column '{}' exceeds max length {}",
                                column.name, max
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
