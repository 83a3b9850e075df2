
use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Identifier for a column within a table schema.
pub type ColumnId = u16;

/// Identifier for a slot within a heap page's slot directory.
pub type SlotId = u16;

/// Logical identifier for a page within one storage file.
///
/// Pages are fixed-size; page `k` of a file lives at byte offset
/// `k * PAGE_SIZE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

/// Identifier for one storage file.
///
/// Every B+ tree — a table's clustered index as much as each secondary
/// index — owns a separate storage file, so the engine hands out one of
/// these per tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

/// Positional row representation backed by `types::Value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Canonical error type shared across storage subsystems.
///
/// Callers distinguish failures by variant, never by message text.
#[derive(Error, Debug)]
pub enum DbError {
    /// Null/empty name, wrong column count, type mismatch, bad parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("table '{0}' not found")]
    TableNotFound(String),
    #[error("table '{0}' already exists")]
    TableExists(String),
    #[error("index '{0}' not found")]
    IndexNotFound(String),
    #[error("index '{0}' already exists")]
    IndexExists(String),
    #[error("column '{0}' not found")]
    ColumnNotFound(String),
    /// The clustered index is bound to the table for its whole lifetime.
    #[error("the clustered index cannot be dropped")]
    ClusteredIndexImmutable,
    /// Unique-constraint violation in a unique tree.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// A heap page cannot fit the payload; the caller opens a new page.
    #[error("page full: need {needed} bytes, {available} available")]
    PageFull { needed: usize, available: usize },
    /// Every buffer frame is pinned during eviction. A pin/unpin pairing
    /// bug in the caller, not a recoverable condition.
    #[error("all {0} buffer frames are pinned")]
    AllPagesPinned(usize),
    /// Bad magic or kind byte while interpreting on-disk bytes.
    #[error("corrupt page: {0}")]
    CorruptPage(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("storage engine is closed")]
    EngineClosed,
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the storage engine.
///
/// The data directory is always injected, never read from a global, so a
/// process can host several independent engine instances.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_frames(512)
///     .persistence(true)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory where table data files and allocator sidecars live.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Number of pages the buffer pool keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_frames: usize,
    /// When enabled, table schemas are recorded in the system catalog and
    /// replayed on startup.
    #[builder(default = false)]
    pub persistence: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db_data"),
            buffer_pool_frames: 256,
            persistence: false,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, PageId, Row, SlotId, TableId};
    pub use types::{SqlType, Value};
}
