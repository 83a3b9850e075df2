//! Slotted heap page for variable-length row payloads.
//!
//! Header (11 bytes, little-endian):
//! `kind(1) | page_id(4) | free_space_end(4) | slot_count(2)`.
//!
//! The slot directory grows upward from byte 11, two bytes per slot, each
//! holding the absolute offset of a stored row; a zero offset is a
//! tombstone. Rows grow downward from the page tail, each prefixed with a
//! 4-byte length. Deleted space is never compacted.

use crate::{PAGE_SIZE, Page, PageKind};
use common::{DbError, DbResult, PageId, SlotId};

pub(crate) const HEADER_LEN: usize = 11;
const SLOT_LEN: usize = 2;
const ROW_LEN_PREFIX: usize = 4;

#[derive(Debug)]
pub struct HeapPage {
    page: Page,
}

impl HeapPage {
    /// A fresh heap page with an empty slot directory.
    pub fn new(id: PageId) -> Self {
        let mut page = Page::new(id);
        page.data[0] = PageKind::Heap as u8;
        page.data[1..5].copy_from_slice(&id.0.to_le_bytes());
        page.data[5..9].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
        // slot_count already zero
        Self { page }
    }

    /// Interprets an existing page image, validating the kind byte and the
    /// header bounds.
    pub fn from_page(page: Page) -> DbResult<Self> {
        match page.kind()? {
            PageKind::Heap => {}
            PageKind::Index => {
                return Err(DbError::CorruptPage(
                    "expected a heap page, found an index page".into(),
                ));
            }
        }
        let heap = Self { page };
        let end = heap.free_space_end();
        let used = HEADER_LEN + heap.slot_count() as usize * SLOT_LEN;
        if end > PAGE_SIZE || end < used {
            return Err(DbError::CorruptPage(format!(
                "heap page {} has free_space_end {} outside [{}, {}]",
                heap.page.id.0, end, used, PAGE_SIZE
            )));
        }
        Ok(heap)
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn into_page(self) -> Page {
        self.page
    }

    pub fn page_id(&self) -> PageId {
        PageId(u32::from_le_bytes(
            self.page.data[1..5].try_into().expect("4-byte field"),
        ))
    }

    fn free_space_end(&self) -> usize {
        u32::from_le_bytes(self.page.data[5..9].try_into().expect("4-byte field")) as usize
    }

    fn set_free_space_end(&mut self, end: usize) {
        self.page.data[5..9].copy_from_slice(&(end as u32).to_le_bytes());
    }

    pub fn slot_count(&self) -> u16 {
        u16::from_le_bytes(self.page.data[9..11].try_into().expect("2-byte field"))
    }

    fn set_slot_count(&mut self, count: u16) {
        self.page.data[9..11].copy_from_slice(&count.to_le_bytes());
    }

    fn slot(&self, slot: SlotId) -> usize {
        let at = HEADER_LEN + slot as usize * SLOT_LEN;
        u16::from_le_bytes(self.page.data[at..at + SLOT_LEN].try_into().expect("slot")) as usize
    }

    fn set_slot(&mut self, slot: SlotId, offset: usize) {
        let at = HEADER_LEN + slot as usize * SLOT_LEN;
        self.page.data[at..at + SLOT_LEN].copy_from_slice(&(offset as u16).to_le_bytes());
    }

    /// Bytes still available for one more row plus its slot entry.
    pub fn free_space(&self) -> usize {
        self.free_space_end() - (HEADER_LEN + self.slot_count() as usize * SLOT_LEN)
    }

    /// Slots that still point at a live row.
    pub fn valid_row_count(&self) -> u16 {
        (0..self.slot_count()).filter(|&s| self.slot(s) != 0).count() as u16
    }

    /// Stores `bytes` and returns its slot id, or `PageFull`.
    pub fn insert(&mut self, bytes: &[u8]) -> DbResult<SlotId> {
        let needed = bytes.len() + ROW_LEN_PREFIX + SLOT_LEN;
        let available = self.free_space();
        if needed > available {
            return Err(DbError::PageFull { needed, available });
        }

        let row_start = self.free_space_end() - ROW_LEN_PREFIX - bytes.len();
        self.page.data[row_start..row_start + ROW_LEN_PREFIX]
            .copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.page.data[row_start + ROW_LEN_PREFIX..row_start + ROW_LEN_PREFIX + bytes.len()]
            .copy_from_slice(bytes);

        let slot = self.slot_count();
        self.set_slot(slot, row_start);
        self.set_free_space_end(row_start);
        self.set_slot_count(slot + 1);
        Ok(slot)
    }

    /// Returns the stored row, or `None` for an out-of-range slot or a
    /// tombstone.
    pub fn read(&self, slot: SlotId) -> Option<&[u8]> {
        if slot >= self.slot_count() {
            return None;
        }
        let offset = self.slot(slot);
        if offset == 0 {
            return None;
        }
        let len = u32::from_le_bytes(
            self.page.data[offset..offset + ROW_LEN_PREFIX]
                .try_into()
                .expect("length prefix"),
        ) as usize;
        Some(&self.page.data[offset + ROW_LEN_PREFIX..offset + ROW_LEN_PREFIX + len])
    }

    /// Tombstones the slot. Returns false for out-of-range or already
    /// deleted slots. The row bytes stay where they are.
    pub fn delete(&mut self, slot: SlotId) -> bool {
        if slot >= self.slot_count() || self.slot(slot) == 0 {
            return false;
        }
        self.set_slot(slot, 0);
        true
    }

    /// Live rows in slot order, which is insertion order within the page.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.slot_count()).filter_map(|s| self.read(s))
    }
}
