//! Storage engine: the registry tying tables, trees, and the buffer pool
//! together.
//!
//! One engine instance owns one buffer pool (shared with its tables by
//! `Arc`) and a monotonically increasing counter of storage file ids.
//! Every tree — each table's clustered index and each secondary index —
//! receives its own file id from that counter.
//!
//! With persistence enabled the engine bootstraps the two system catalog
//! tables, replays them on startup to rebuild user tables, and records
//! every create/drop through them.
//!
//! # Example
//!
//! ```no_run
//! use common::{Config, Row};
//! use catalog::Column;
//! use engine::StorageEngine;
//! use types::{SqlType, Value};
//!
//! let mut engine = StorageEngine::open(Config::default()).unwrap();
//! engine
//!     .create_table(
//!         "users",
//!         vec![
//!             Column::new("id", SqlType::Int),
//!             Column::varchar("name", 50),
//!         ],
//!     )
//!     .unwrap();
//!
//! let users = engine.get_table("users").unwrap();
//! users
//!     .insert(&Row::new(vec![Value::Int(1), Value::Varchar("Alice".into())]))
//!     .unwrap();
//! engine.close().unwrap();
//! ```

pub mod codec;
mod sys;
mod table;

pub use table::{SecondaryIndex, Table, PRIMARY_INDEX};

use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use ahash::RandomState;
use buffer::BufferPool;
use catalog::{Column, TableSchema};
use common::{Config, DbError, DbResult, TableId};
use hashbrown::HashMap;

use sys::{SysCatalog, FIRST_USER_TABLE_ID};

type Map<K, V> = HashMap<K, V, RandomState>;

pub struct StorageEngine {
    config: Config,
    pool: Arc<BufferPool>,
    tables: Map<String, Table>,
    next_table_id: u32,
    sys: Option<SysCatalog>,
    closed: bool,
}

impl StorageEngine {
    /// Opens an engine over `config.data_dir`, creating the directory when
    /// absent. With persistence on, user tables recorded in the system
    /// catalog are reconstructed before the call returns.
    pub fn open(config: Config) -> DbResult<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let pool = Arc::new(BufferPool::new(
            config.data_dir.clone(),
            config.buffer_pool_frames,
        ));

        let mut tables = Map::default();
        let mut next_table_id = 1;
        let sys = if config.persistence {
            let sys = SysCatalog::open_or_create(Arc::clone(&pool), &config.data_dir)?;
            next_table_id = FIRST_USER_TABLE_ID;
            for (table_id, name) in sys.load_tables()? {
                let schema = TableSchema::try_new(sys.columns_for(table_id)?)?;
                let table = Table::open(
                    Arc::clone(&pool),
                    &config.data_dir,
                    table_id,
                    name.clone(),
                    schema,
                )?;
                next_table_id = next_table_id.max(table_id.0 + 1);
                tables.insert(name, table);
            }
            Some(sys)
        } else {
            None
        };

        Ok(Self {
            config,
            pool,
            tables,
            next_table_id,
            sys,
            closed: false,
        })
    }

    /// The pool shared by every table of this engine.
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> DbResult<&Table> {
        self.check_open()?;
        if name.is_empty() {
            return Err(DbError::InvalidArgument(
                "table name must not be empty".into(),
            ));
        }
        if self.tables.contains_key(name) {
            return Err(DbError::TableExists(name.to_string()));
        }
        let schema = TableSchema::try_new(columns)?;

        let table_id = self.next_file_id();
        let table = Table::create(
            Arc::clone(&self.pool),
            &self.config.data_dir,
            table_id,
            name.to_string(),
            schema,
        )?;
        if let Some(sys) = &self.sys {
            sys.record_table(table_id, name, table.schema())?;
        }
        self.tables.insert(name.to_string(), table);
        self.get_table(name)
    }

    pub fn get_table(&self, name: &str) -> DbResult<&Table> {
        self.check_open()?;
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    /// Drops the table, its secondary indexes, their cached frames, and
    /// their storage files.
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        self.check_open()?;
        let table = self
            .tables
            .remove(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))?;

        let mut file_ids = vec![table.table_id()];
        file_ids.extend(table.secondary_file_ids());
        for file_id in file_ids {
            self.pool.discard_table(file_id);
            self.remove_storage_files(file_id)?;
        }
        if let Some(sys) = &self.sys {
            sys.remove_table(table.table_id())?;
        }
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> DbResult<bool> {
        self.check_open()?;
        Ok(self.tables.contains_key(name))
    }

    /// Registered table names, sorted for stable output.
    pub fn all_table_names(&self) -> DbResult<Vec<String>> {
        self.check_open()?;
        let mut names: Vec<_> = self.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn table_count(&self) -> DbResult<usize> {
        self.check_open()?;
        Ok(self.tables.len())
    }

    /// Attaches a secondary index on `column` of `table`, back-filled from
    /// the table's existing rows.
    pub fn create_index(
        &mut self,
        table: &str,
        index_name: &str,
        column: &str,
        unique: bool,
    ) -> DbResult<()> {
        self.check_open()?;
        if index_name.is_empty() {
            return Err(DbError::InvalidArgument(
                "index name must not be empty".into(),
            ));
        }
        let file_id = TableId(self.next_table_id);
        let entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        if let Err(err) = entry.add_secondary_index(index_name, column, unique, file_id) {
            // A failed back-fill must not leave frames or files behind for
            // the next holder of this file id.
            self.pool.discard_table(file_id);
            self.remove_storage_files(file_id)?;
            return Err(err);
        }
        self.next_table_id += 1;
        Ok(())
    }

    /// Detaches a secondary index and reclaims its storage. The clustered
    /// `PRIMARY` index is immutable.
    pub fn drop_index(&mut self, table: &str, index_name: &str) -> DbResult<()> {
        self.check_open()?;
        if index_name == PRIMARY_INDEX {
            return Err(DbError::ClusteredIndexImmutable);
        }
        let entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        let file_id = entry.drop_secondary_index(index_name)?;
        self.pool.discard_table(file_id);
        self.remove_storage_files(file_id)?;
        Ok(())
    }

    /// Flushes every cached page and releases the tables. Any call after
    /// this fails with `EngineClosed`.
    pub fn close(&mut self) -> DbResult<()> {
        self.check_open()?;
        self.pool.clear()?;
        self.tables.clear();
        self.closed = true;
        Ok(())
    }

    fn check_open(&self) -> DbResult<()> {
        if self.closed {
            Err(DbError::EngineClosed)
        } else {
            Ok(())
        }
    }

    fn next_file_id(&mut self) -> TableId {
        let id = TableId(self.next_table_id);
        self.next_table_id += 1;
        id
    }

    fn remove_storage_files(&self, file_id: TableId) -> DbResult<()> {
        let data = self.config.data_dir.join(format!("table_{}.db", file_id.0));
        let meta = self
            .config
            .data_dir
            .join(format!("table_{}.pagemeta", file_id.0));
        for path in [data, meta] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
