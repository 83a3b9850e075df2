//! Per-table page-id allocation with a persistent free list.
//!
//! Snapshot format (`table_{id}.pagemeta`, big-endian):
//! magic `"PGMT"` | version `0x01` | 3 reserved bytes | `next_page_id` u32 |
//! `free_count` u32 | `free_count` free page ids, u32 each. Every mutation
//! rewrites the snapshot through a temp file and an atomic rename, so a
//! crash mid-write leaves the previous snapshot intact.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use bit_vec::BitVec;
use bytes::{Buf, BufMut};
use common::{DbError, DbResult, PageId, TableId};

const MAGIC: u32 = 0x5047_4D54; // "PGMT"
const VERSION: u8 = 0x01;
const HEADER_LEN: usize = 16;

/// Vendor of page ids for one storage file.
///
/// Freed pages are recycled before the file grows; the `allocated` bitset
/// keeps the live set flat in memory even for very large tables.
#[derive(Debug)]
pub struct PageAllocator {
    meta_path: PathBuf,
    next_page_id: u32,
    free: BTreeSet<u32>,
    allocated: BitVec,
}

impl PageAllocator {
    pub fn meta_path(data_dir: &Path, table_id: TableId) -> PathBuf {
        data_dir.join(format!("table_{}.pagemeta", table_id.0))
    }

    /// A fresh allocator with no pages handed out. Writes its first
    /// snapshot immediately.
    pub fn create(data_dir: &Path, table_id: TableId) -> DbResult<Self> {
        let allocator = Self {
            meta_path: Self::meta_path(data_dir, table_id),
            next_page_id: 0,
            free: BTreeSet::new(),
            allocated: BitVec::new(),
        };
        allocator.persist()?;
        Ok(allocator)
    }

    /// Loads the snapshot for an existing table. The `allocated` set is
    /// reconstructed as every id below `next_page_id` that is not free.
    pub fn load(data_dir: &Path, table_id: TableId) -> DbResult<Self> {
        let meta_path = Self::meta_path(data_dir, table_id);
        let raw = fs::read(&meta_path)?;
        if raw.len() < HEADER_LEN {
            return Err(DbError::CorruptPage(format!(
                "allocator snapshot {} is truncated",
                meta_path.display()
            )));
        }

        let mut buf = raw.as_slice();
        if buf.get_u32() != MAGIC {
            return Err(DbError::CorruptPage(format!(
                "allocator snapshot {} has a bad magic",
                meta_path.display()
            )));
        }
        if buf.get_u8() != VERSION {
            return Err(DbError::CorruptPage(format!(
                "allocator snapshot {} has an unsupported version",
                meta_path.display()
            )));
        }
        buf.advance(3);
        let next_page_id = buf.get_u32();
        let free_count = buf.get_u32() as usize;
        if buf.remaining() < free_count * 4 {
            return Err(DbError::CorruptPage(format!(
                "allocator snapshot {} declares {} free pages but is truncated",
                meta_path.display(),
                free_count
            )));
        }

        let mut free = BTreeSet::new();
        for _ in 0..free_count {
            free.insert(buf.get_u32());
        }

        let mut allocated = BitVec::from_elem(next_page_id as usize, false);
        for id in 0..next_page_id {
            if !free.contains(&id) {
                allocated.set(id as usize, true);
            }
        }

        Ok(Self {
            meta_path,
            next_page_id,
            free,
            allocated,
        })
    }

    pub fn exists(data_dir: &Path, table_id: TableId) -> bool {
        Self::meta_path(data_dir, table_id).exists()
    }

    /// Hands out the lowest free id, or extends the file. Persists before
    /// returning.
    pub fn allocate(&mut self) -> DbResult<PageId> {
        let id = match self.free.iter().next().copied() {
            Some(id) => {
                self.free.remove(&id);
                id
            }
            None => {
                let id = self.next_page_id;
                self.next_page_id += 1;
                id
            }
        };
        self.mark_allocated(id);
        self.persist()?;
        Ok(PageId(id))
    }

    /// Returns `id` to the free list. A no-op for ids that were never
    /// allocated.
    pub fn free(&mut self, id: PageId) -> DbResult<()> {
        if !self.is_allocated(id) {
            return Ok(());
        }
        self.allocated.set(id.0 as usize, false);
        self.free.insert(id.0);
        self.persist()
    }

    pub fn is_allocated(&self, id: PageId) -> bool {
        self.allocated.get(id.0 as usize).unwrap_or(false)
    }

    pub fn allocated_count(&self) -> usize {
        self.next_page_id as usize - self.free.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn next_page_id(&self) -> u32 {
        self.next_page_id
    }

    fn mark_allocated(&mut self, id: u32) {
        let idx = id as usize;
        if idx >= self.allocated.len() {
            self.allocated.grow(idx + 1 - self.allocated.len(), false);
        }
        self.allocated.set(idx, true);
    }

    fn persist(&self) -> DbResult<()> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.free.len() * 4);
        buf.put_u32(MAGIC);
        buf.put_u8(VERSION);
        buf.put_bytes(0, 3);
        buf.put_u32(self.next_page_id);
        buf.put_u32(self.free.len() as u32);
        for id in &self.free {
            buf.put_u32(*id);
        }

        let tmp = self.meta_path.with_extension("pagemeta.tmp");
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, &self.meta_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn allocates_sequential_ids() {
        let dir = tempdir().unwrap();
        let mut alloc = PageAllocator::create(dir.path(), TableId(1)).unwrap();

        assert_eq!(alloc.allocate().unwrap(), PageId(0));
        assert_eq!(alloc.allocate().unwrap(), PageId(1));
        assert_eq!(alloc.allocate().unwrap(), PageId(2));
        assert_eq!(alloc.allocated_count(), 3);
        assert_eq!(alloc.free_count(), 0);
        assert!(alloc.is_allocated(PageId(1)));
        assert!(!alloc.is_allocated(PageId(3)));
    }

    #[test]
    fn freed_pages_are_recycled_lowest_first() {
        let dir = tempdir().unwrap();
        let mut alloc = PageAllocator::create(dir.path(), TableId(1)).unwrap();
        for _ in 0..4 {
            alloc.allocate().unwrap();
        }

        alloc.free(PageId(2)).unwrap();
        alloc.free(PageId(1)).unwrap();
        assert_eq!(alloc.free_count(), 2);
        assert_eq!(alloc.allocated_count(), 2);

        assert_eq!(alloc.allocate().unwrap(), PageId(1));
        assert_eq!(alloc.allocate().unwrap(), PageId(2));
        assert_eq!(alloc.allocate().unwrap(), PageId(4));
    }

    #[test]
    fn free_of_unallocated_id_is_a_noop() {
        let dir = tempdir().unwrap();
        let mut alloc = PageAllocator::create(dir.path(), TableId(1)).unwrap();
        alloc.allocate().unwrap();

        alloc.free(PageId(17)).unwrap();
        assert_eq!(alloc.free_count(), 0);
        assert_eq!(alloc.allocated_count(), 1);

        // Double free is equally inert.
        alloc.free(PageId(0)).unwrap();
        alloc.free(PageId(0)).unwrap();
        assert_eq!(alloc.free_count(), 1);
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let mut alloc = PageAllocator::create(dir.path(), TableId(5)).unwrap();
        for _ in 0..10 {
            alloc.allocate().unwrap();
        }
        alloc.free(PageId(3)).unwrap();
        alloc.free(PageId(7)).unwrap();

        let reloaded = PageAllocator::load(dir.path(), TableId(5)).unwrap();
        assert_eq!(reloaded.next_page_id(), 10);
        assert_eq!(reloaded.free_count(), 2);
        assert_eq!(reloaded.allocated_count(), 8);
        for id in 0..10u32 {
            assert_eq!(
                reloaded.is_allocated(PageId(id)),
                alloc.is_allocated(PageId(id)),
                "page {id}"
            );
        }
    }

    #[test]
    fn snapshot_bytes_match_the_documented_format() {
        let dir = tempdir().unwrap();
        let mut alloc = PageAllocator::create(dir.path(), TableId(9)).unwrap();
        for _ in 0..3 {
            alloc.allocate().unwrap();
        }
        alloc.free(PageId(1)).unwrap();

        let raw = std::fs::read(PageAllocator::meta_path(dir.path(), TableId(9))).unwrap();
        assert_eq!(&raw[0..4], &[0x50, 0x47, 0x4D, 0x54]); // "PGMT"
        assert_eq!(raw[4], 0x01);
        assert_eq!(&raw[5..8], &[0, 0, 0]);
        assert_eq!(&raw[8..12], &3u32.to_be_bytes());
        assert_eq!(&raw[12..16], &1u32.to_be_bytes());
        assert_eq!(&raw[16..20], &1u32.to_be_bytes());

        // The temp file never outlives a persist.
        assert!(
            !PageAllocator::meta_path(dir.path(), TableId(9))
                .with_extension("pagemeta.tmp")
                .exists()
        );
    }

    #[test]
    fn load_rejects_corrupt_snapshots() {
        let dir = tempdir().unwrap();
        let path = PageAllocator::meta_path(dir.path(), TableId(2));

        std::fs::write(&path, b"JUNKJUNKJUNKJUNK").unwrap();
        assert!(matches!(
            PageAllocator::load(dir.path(), TableId(2)),
            Err(DbError::CorruptPage(_))
        ));

        std::fs::write(&path, b"PG").unwrap();
        assert!(matches!(
            PageAllocator::load(dir.path(), TableId(2)),
            Err(DbError::CorruptPage(_))
        ));
    }

    proptest! {
        // Persisting and reloading after any alloc/free interleaving yields
        // identical next_page_id, free set, and allocated set.
        #[test]
        fn reload_matches_after_any_sequence(ops in prop::collection::vec(any::<bool>(), 1..80)) {
            let dir = tempdir().unwrap();
            let mut alloc = PageAllocator::create(dir.path(), TableId(1)).unwrap();
            let mut live = Vec::new();
            for grow in ops {
                if grow || live.is_empty() {
                    live.push(alloc.allocate().unwrap());
                } else {
                    let id = live.remove(live.len() / 2);
                    alloc.free(id).unwrap();
                }
            }

            let reloaded = PageAllocator::load(dir.path(), TableId(1)).unwrap();
            prop_assert_eq!(reloaded.next_page_id(), alloc.next_page_id());
            prop_assert_eq!(reloaded.free_count(), alloc.free_count());
            prop_assert_eq!(reloaded.allocated_count(), alloc.allocated_count());
            for id in 0..alloc.next_page_id() {
                prop_assert_eq!(
                    reloaded.is_allocated(PageId(id)),
                    alloc.is_allocated(PageId(id))
                );
            }
        }
    }
}
