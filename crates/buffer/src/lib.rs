//! Buffer pool: the process-wide page cache between the trees and the disk.
//!
//! Frames are keyed by `(TableId, PageId)` and evicted LRU-first, skipping
//! pinned frames. Dirty frames are written back before leaving the cache.
//! One mutex guards the frame map, the LRU order, and the disk I/O done on
//! a miss or an eviction; page contents sit behind a per-frame latch so a
//! resident, pinned page can be read without the pool lock.
//!
//! # Example
//!
//! ```no_run
//! use buffer::BufferPool;
//! use common::{TableId, PageId};
//!
//! let pool = BufferPool::new("/tmp/db", 100);
//! let frame = pool.get(TableId(1), PageId(0)).unwrap();
//! frame.pin();
//! frame.page_mut().data[0] = 42;
//! frame.unpin(true);
//! pool.flush_all().unwrap();
//! ```


use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use common::{DbError, DbResult, PageId, TableId};
use lru::LruCache;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use storage::{PAGE_SIZE, Page};

/// A cached page plus its bookkeeping: the owning table id (stamped by the
/// loader, never inferred later), a pin count, and a dirty flag.
#[derive(Debug)]
pub struct Frame {
    table_id: TableId,
    page_id: PageId,
    page: RwLock<Page>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl Frame {
    fn new(table_id: TableId, page_id: PageId, page: Page) -> Self {
        Self {
            table_id,
            page_id,
            page: RwLock::new(page),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Keeps the frame resident until the matching `unpin`.
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases one pin; `dirty` records that the caller modified the page.
    ///
    /// # Panics
    ///
    /// Panics when the frame is not pinned — an unbalanced pin/unpin pair
    /// is a caller bug that must surface immediately.
    pub fn unpin(&self, dirty: bool) {
        if dirty {
            self.dirty.store(true, Ordering::Release);
        }
        let balanced = self
            .pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
        if balanced.is_err() {
            panic!(
                "unpin without matching pin on table {} page {}",
                self.table_id.0, self.page_id.0
            );
        }
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }
}

struct PoolInner {
    frames: LruCache<(TableId, PageId), Arc<Frame>>,
}

/// LRU page cache over file-per-table storage (`table_{id}.db`).
pub struct BufferPool {
    data_dir: PathBuf,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(data_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            data_dir: data_dir.into(),
            capacity,
            inner: Mutex::new(PoolInner {
                frames: LruCache::new(NonZeroUsize::new(capacity).expect("capacity checked")),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the key is currently cached, without touching LRU order.
    pub fn contains(&self, table_id: TableId, page_id: PageId) -> bool {
        self.inner.lock().frames.peek(&(table_id, page_id)).is_some()
    }

    /// Returns the cached frame, loading it from disk on a miss. A miss on
    /// a full cache evicts first. A page the file does not cover yet comes
    /// back zeroed.
    pub fn get(&self, table_id: TableId, page_id: PageId) -> DbResult<Arc<Frame>> {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get(&(table_id, page_id)) {
            return Ok(Arc::clone(frame));
        }

        if inner.frames.len() == self.capacity {
            self.evict_one(&mut inner)?;
        }

        let page = self.load_page(table_id, page_id)?;
        let frame = Arc::new(Frame::new(table_id, page_id, page));
        inner.frames.push((table_id, page_id), Arc::clone(&frame));
        Ok(frame)
    }

    /// A blank in-memory frame for a freshly allocated page; no disk read.
    /// Fails if the key is already cached.
    pub fn new_page(&self, table_id: TableId, page_id: PageId) -> DbResult<Arc<Frame>> {
        let mut inner = self.inner.lock();
        if inner.frames.peek(&(table_id, page_id)).is_some() {
            return Err(DbError::InvalidArgument(format!(
                "page {} of table {} is already cached",
                page_id.0, table_id.0
            )));
        }

        if inner.frames.len() == self.capacity {
            self.evict_one(&mut inner)?;
        }

        let frame = Arc::new(Frame::new(table_id, page_id, Page::new(page_id)));
        inner.frames.push((table_id, page_id), Arc::clone(&frame));
        Ok(frame)
    }

    /// Writes the page at its file offset whether dirty or not, growing the
    /// file if needed, and clears the dirty flag. A no-op for uncached keys.
    pub fn flush(&self, table_id: TableId, page_id: PageId) -> DbResult<()> {
        let frame = {
            let inner = self.inner.lock();
            inner.frames.peek(&(table_id, page_id)).map(Arc::clone)
        };
        if let Some(frame) = frame {
            self.write_page(frame.table_id, &frame.page())?;
            frame.dirty.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Writes every dirty frame using the table id stored on the frame.
    pub fn flush_all(&self) -> DbResult<()> {
        let frames: Vec<_> = {
            let inner = self.inner.lock();
            inner.frames.iter().map(|(_, f)| Arc::clone(f)).collect()
        };
        for frame in frames {
            if frame.is_dirty() {
                self.write_page(frame.table_id, &frame.page())?;
                frame.dirty.store(false, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Flushes dirty frames, then drops every frame.
    pub fn clear(&self) -> DbResult<()> {
        let mut inner = self.inner.lock();
        for (_, frame) in inner.frames.iter() {
            if frame.is_dirty() {
                self.write_page(frame.table_id, &frame.page())?;
                frame.dirty.store(false, Ordering::Release);
            }
        }
        inner.frames.clear();
        Ok(())
    }

    /// Drops one frame without writeback. For pages returned to the
    /// allocator's free list, whose contents are dead.
    pub fn discard(&self, table_id: TableId, page_id: PageId) {
        self.inner.lock().frames.pop(&(table_id, page_id));
    }

    /// Drops every frame of one table without writeback. For dropped
    /// tables whose backing file is about to be deleted.
    pub fn discard_table(&self, table_id: TableId) {
        let mut inner = self.inner.lock();
        let keys: Vec<_> = inner
            .frames
            .iter()
            .map(|(key, _)| *key)
            .filter(|(t, _)| *t == table_id)
            .collect();
        for key in keys {
            inner.frames.pop(&key);
        }
    }

    /// Evicts the least recently used unpinned frame, writing it out first
    /// when dirty. Fails with `AllPagesPinned` when no frame qualifies.
    fn evict_one(&self, inner: &mut PoolInner) -> DbResult<()> {
        let victim = inner
            .frames
            .iter()
            .rev() // LRU first
            .find(|(_, frame)| frame.pin_count() == 0)
            .map(|(key, frame)| (*key, Arc::clone(frame)));

        let Some((key, frame)) = victim else {
            return Err(DbError::AllPagesPinned(self.capacity));
        };

        if frame.is_dirty() {
            self.write_page(frame.table_id, &frame.page())?;
        }
        inner.frames.pop(&key);
        Ok(())
    }

    fn table_path(&self, table_id: TableId) -> PathBuf {
        self.data_dir.join(format!("table_{}.db", table_id.0))
    }

    fn load_page(&self, table_id: TableId, page_id: PageId) -> DbResult<Page> {
        let path = self.table_path(table_id);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Page::new(page_id)),
            Err(err) => return Err(err.into()),
        };

        let offset = page_id.0 as u64 * PAGE_SIZE as u64;
        let len = file.metadata()?.len();
        if len < offset + PAGE_SIZE as u64 {
            // The file does not reach this page yet.
            return Ok(Page::new(page_id));
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buf)?;
        Page::from_bytes(page_id, buf)
    }

    fn write_page(&self, table_id: TableId, page: &Page) -> DbResult<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.table_path(table_id))?;

        let offset = page.id.0 as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        Ok(())
    }
}
