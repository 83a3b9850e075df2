//! Page layout and per-table page allocation.
//!
//! A page is the unit of caching and I/O: a fixed 16 KiB block, identical in
//! memory and on disk. Two kinds exist — heap pages holding row payloads in
//! a slotted layout, and index pages holding one serialized tree node each.
//! The kind byte leads the header so a loader can tell them apart.

mod alloc;
mod heap;

pub use alloc::PageAllocator;
pub use heap::HeapPage;

use common::{DbError, DbResult, PageId};

/// Fixed page size, both in memory and on disk.
pub const PAGE_SIZE: usize = 16_384;

/// Length of the index-page header: kind, page id, seven reserved bytes.
pub const INDEX_HEADER_LEN: usize = 12;

/// Discriminates the two page layouts by their leading byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    Heap = 0x01,
    Index = 0x02,
}

impl PageKind {
    pub fn from_byte(byte: u8) -> DbResult<PageKind> {
        match byte {
            0x01 => Ok(PageKind::Heap),
            0x02 => Ok(PageKind::Index),
            other => Err(DbError::CorruptPage(format!(
                "unknown page kind byte 0x{other:02x}"
            ))),
        }
    }
}

/// A raw page frame: an id plus its backing buffer.
///
/// Serialization is a pure copy of the buffer; no interpretation happens at
/// this level.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: Vec<u8>,
}

impl Page {
    /// A zeroed page. Callers initialize a layout before the page is ever
    /// interpreted.
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            data: vec![0u8; PAGE_SIZE],
        }
    }

    pub fn from_bytes(id: PageId, data: Vec<u8>) -> DbResult<Self> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::CorruptPage(format!(
                "page image is {} bytes, expected {}",
                data.len(),
                PAGE_SIZE
            )));
        }
        Ok(Self { id, data })
    }

    pub fn kind(&self) -> DbResult<PageKind> {
        PageKind::from_byte(self.data[0])
    }
}

/// Index-page header layout: `kind(1) | page_id(4, LE) | reserved(7)`.
/// The node body occupies the remainder of the page.
pub mod index {
    use super::*;

    /// Writes the header into `page`, leaving the body untouched.
    pub fn init(page: &mut Page) {
        page.data[0] = PageKind::Index as u8;
        page.data[1..5].copy_from_slice(&page.id.0.to_le_bytes());
        page.data[5..INDEX_HEADER_LEN].fill(0);
    }

    /// Body capacity of an index page.
    pub fn capacity() -> usize {
        PAGE_SIZE - INDEX_HEADER_LEN
    }

    pub fn body(page: &Page) -> DbResult<&[u8]> {
        match page.kind()? {
            PageKind::Index => Ok(&page.data[INDEX_HEADER_LEN..]),
            PageKind::Heap => Err(DbError::CorruptPage(
                "expected an index page, found a heap page".into(),
            )),
        }
    }

    pub fn body_mut(page: &mut Page) -> &mut [u8] {
        &mut page.data[INDEX_HEADER_LEN..]
    }
}
