//! B+ tree index over buffer-pool pages.
//!
//! An ordered map from scalar keys (integers or strings) to opaque byte
//! payloads. Each node occupies one index page; leaves chain left-to-right
//! for range scans. The tree owns the page allocator of its storage file
//! and resolves every page through the shared buffer pool, pinning frames
//! for the duration of each visit.
//!
//! The root never moves: it lives at page 0 of the file. A root split
//! relocates the old root's content to a fresh page and rewrites page 0 as
//! the new internal root, so reopening a tree needs no persisted root
//! pointer.

mod node;
mod page;

pub use node::{Node, MAX_INTERNAL_KEYS, MAX_LEAF_ENTRIES, MIN_INTERNAL_KEYS, MIN_LEAF_ENTRIES};


use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use buffer::BufferPool;
use common::{DbError, DbResult, PageId, TableId};
use parking_lot::Mutex;
use storage::PageAllocator;
use types::Value;

pub const ROOT_PAGE: PageId = PageId(0);

fn check_key(key: &Value) -> DbResult<()> {
    if key.is_key_type() {
        Ok(())
    } else {
        Err(DbError::InvalidArgument(format!(
            "{key:?} cannot be used as an index key"
        )))
    }
}

fn cmp_keys(a: &Value, b: &Value) -> DbResult<Ordering> {
    a.cmp_key(b).ok_or_else(|| {
        DbError::InvalidArgument(format!("keys {a:?} and {b:?} are not comparable"))
    })
}

/// First child whose subtree may contain `key`: the count of separators
/// strictly below it. Entries equal to a separator can sit in the subtree
/// left of it, so equality descends left and the leaf walk continues right.
fn child_index_lower(keys: &[Value], key: &Value) -> DbResult<usize> {
    let mut idx = 0;
    for k in keys {
        if cmp_keys(k, key)? == Ordering::Less {
            idx += 1;
        } else {
            break;
        }
    }
    Ok(idx)
}

/// Child for an insertion: past every separator at or below `key`, so new
/// duplicates land after their older equals.
fn child_index_upper(keys: &[Value], key: &Value) -> DbResult<usize> {
    let mut idx = 0;
    for k in keys {
        if cmp_keys(k, key)? != Ordering::Greater {
            idx += 1;
        } else {
            break;
        }
    }
    Ok(idx)
}

/// Leaf split point: the midpoint, nudged so a run of equal keys stays in
/// one node whenever the run does not span the whole leaf.
fn leaf_split_point(entries: &[(Value, Vec<u8>)]) -> DbResult<usize> {
    let mut mid = entries.len() / 2;
    while mid < entries.len() && cmp_keys(&entries[mid].0, &entries[mid - 1].0)? == Ordering::Equal
    {
        mid += 1;
    }
    if mid == entries.len() {
        mid = entries.len() / 2;
        while mid > 1 && cmp_keys(&entries[mid].0, &entries[mid - 1].0)? == Ordering::Equal {
            mid -= 1;
        }
    }
    Ok(mid)
}

fn min_len(node: &Node) -> usize {
    if node.is_leaf() {
        MIN_LEAF_ENTRIES
    } else {
        MIN_INTERNAL_KEYS
    }
}

/// B+ tree bound to one storage file.
///
/// All operations serialize behind one per-tree lock; concurrent mutation
/// of a single tree is not supported at finer granularity.
pub struct BPlusTree {
    table_id: TableId,
    unique: bool,
    pool: Arc<BufferPool>,
    allocator: Mutex<PageAllocator>,
}

impl BPlusTree {
    /// Creates the storage file's allocator and an empty root leaf at
    /// page 0.
    pub fn create(
        pool: Arc<BufferPool>,
        data_dir: &Path,
        table_id: TableId,
        unique: bool,
    ) -> DbResult<Self> {
        let mut allocator = PageAllocator::create(data_dir, table_id)?;
        let root = allocator.allocate()?;
        let tree = Self {
            table_id,
            unique,
            pool,
            allocator: Mutex::new(allocator),
        };
        tree.write_new_node(root, &Node::new_leaf())?;
        Ok(tree)
    }

    /// Opens a tree whose allocator sidecar already exists.
    pub fn open(
        pool: Arc<BufferPool>,
        data_dir: &Path,
        table_id: TableId,
        unique: bool,
    ) -> DbResult<Self> {
        let allocator = PageAllocator::load(data_dir, table_id)?;
        Ok(Self {
            table_id,
            unique,
            pool,
            allocator: Mutex::new(allocator),
        })
    }

    /// Whether a tree for this file id has been created under `data_dir`.
    pub fn exists_on_disk(data_dir: &Path, table_id: TableId) -> bool {
        PageAllocator::exists(data_dir, table_id)
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns the payload stored under `key`; the first one in insertion
    /// order when the tree holds duplicates.
    pub fn get(&self, key: &Value) -> DbResult<Option<Vec<u8>>> {
        check_key(key)?;
        let _lock = self.allocator.lock();
        let mut pid = self.find_leaf_lower(key)?;
        loop {
            let Node::Leaf { entries, next_leaf } = self.read_node(pid)? else {
                return Err(DbError::CorruptPage(
                    "tree descent ended on an internal node".into(),
                ));
            };
            for (k, v) in &entries {
                match cmp_keys(key, k)? {
                    Ordering::Less => return Ok(None),
                    Ordering::Equal => return Ok(Some(v.clone())),
                    Ordering::Greater => {}
                }
            }
            // Every entry here is below the key; it may open the next leaf.
            match next_leaf {
                Some(next) => pid = next,
                None => return Ok(None),
            }
        }
    }

    pub fn exists(&self, key: &Value) -> DbResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Inserts `(key, value)`. Unique trees reject an already-present key
    /// with `DuplicateKey`; non-unique trees keep duplicates in insertion
    /// order.
    pub fn put(&self, key: Value, value: Vec<u8>) -> DbResult<()> {
        check_key(&key)?;
        let mut allocator = self.allocator.lock();
        if let Some((sep, right_pid)) = self.insert_rec(&mut allocator, ROOT_PAGE, key, value)? {
            // Page 0 now holds the left half of the old root. Relocate it
            // and grow the tree one level.
            let left = self.read_node(ROOT_PAGE)?;
            let left_pid = allocator.allocate()?;
            self.write_new_node(left_pid, &left)?;
            let root = Node::Internal {
                keys: vec![sep],
                children: vec![left_pid, right_pid],
            };
            self.write_node(ROOT_PAGE, &root)?;
        }
        Ok(())
    }

    /// Removes the first entry matching `key`. Returns whether an entry
    /// was removed.
    pub fn delete(&self, key: &Value) -> DbResult<bool> {
        self.delete_inner(key, None)
    }

    /// Removes the first entry matching both `key` and `value`; the way a
    /// non-unique index drops one posting without touching its duplicates.
    pub fn delete_exact(&self, key: &Value, value: &[u8]) -> DbResult<bool> {
        self.delete_inner(key, Some(value))
    }

    /// Entries with `lo <= key <= hi` in key order, duplicates in insertion
    /// order. `None` bounds are unbounded.
    pub fn range(
        &self,
        lo: Option<&Value>,
        hi: Option<&Value>,
    ) -> DbResult<Vec<(Value, Vec<u8>)>> {
        if let Some(lo) = lo {
            check_key(lo)?;
        }
        if let Some(hi) = hi {
            check_key(hi)?;
        }

        let _lock = self.allocator.lock();
        let mut pid = match lo {
            Some(lo) => self.find_leaf_lower(lo)?,
            None => self.leftmost_leaf()?,
        };

        let mut out = Vec::new();
        loop {
            let Node::Leaf { entries, next_leaf } = self.read_node(pid)? else {
                return Err(DbError::CorruptPage(
                    "tree descent ended on an internal node".into(),
                ));
            };
            for (k, v) in entries {
                if let Some(lo) = lo {
                    if cmp_keys(&k, lo)? == Ordering::Less {
                        continue;
                    }
                }
                if let Some(hi) = hi {
                    if cmp_keys(&k, hi)? == Ordering::Greater {
                        return Ok(out);
                    }
                }
                out.push((k, v));
            }
            match next_leaf {
                Some(next) => pid = next,
                None => break,
            }
        }
        Ok(out)
    }

    /// Every entry, leftmost leaf to rightmost.
    pub fn scan_all(&self) -> DbResult<Vec<(Value, Vec<u8>)>> {
        self.range(None, None)
    }

    // ---- descent helpers ----

    fn find_leaf_lower(&self, key: &Value) -> DbResult<PageId> {
        let mut pid = ROOT_PAGE;
        loop {
            match self.read_node(pid)? {
                Node::Internal { keys, children } => {
                    pid = children[child_index_lower(&keys, key)?];
                }
                Node::Leaf { .. } => return Ok(pid),
            }
        }
    }

    fn leftmost_leaf(&self) -> DbResult<PageId> {
        let mut pid = ROOT_PAGE;
        loop {
            match self.read_node(pid)? {
                Node::Internal { children, .. } => {
                    pid = *children.first().ok_or_else(|| {
                        DbError::CorruptPage("internal node has no children".into())
                    })?;
                }
                Node::Leaf { .. } => return Ok(pid),
            }
        }
    }

    // ---- insertion ----

    fn insert_rec(
        &self,
        allocator: &mut PageAllocator,
        pid: PageId,
        key: Value,
        value: Vec<u8>,
    ) -> DbResult<Option<(Value, PageId)>> {
        match self.read_node(pid)? {
            Node::Leaf {
                mut entries,
                next_leaf,
            } => {
                let mut idx = entries.len();
                let mut duplicate = false;
                for (i, (existing, _)) in entries.iter().enumerate() {
                    match cmp_keys(&key, existing)? {
                        Ordering::Less => {
                            idx = i;
                            break;
                        }
                        Ordering::Equal => duplicate = true,
                        Ordering::Greater => {}
                    }
                }
                if duplicate && self.unique {
                    return Err(DbError::DuplicateKey(format!("{key:?}")));
                }
                entries.insert(idx, (key, value));

                let node = Node::Leaf { entries, next_leaf };
                if !self.leaf_overflows(&node)? {
                    self.write_node(pid, &node)?;
                    return Ok(None);
                }

                let Node::Leaf {
                    mut entries,
                    next_leaf,
                } = node
                else {
                    unreachable!()
                };
                if entries.len() < 2 {
                    // One entry that alone exceeds a page cannot be split.
                    return Err(DbError::PageFull {
                        needed: page::encoded_len(&Node::Leaf { entries, next_leaf })?,
                        available: storage::index::capacity(),
                    });
                }
                let mid = leaf_split_point(&entries)?;
                let right_entries = entries.split_off(mid);
                let sep = right_entries[0].0.clone();
                let right_pid = allocator.allocate()?;
                let right = Node::Leaf {
                    entries: right_entries,
                    next_leaf,
                };
                let left = Node::Leaf {
                    entries,
                    next_leaf: Some(right_pid),
                };
                self.write_node(pid, &left)?;
                self.write_new_node(right_pid, &right)?;
                Ok(Some((sep, right_pid)))
            }
            Node::Internal {
                mut keys,
                mut children,
            } => {
                let idx = child_index_upper(&keys, &key)?;
                let Some((sep, new_child)) =
                    self.insert_rec(allocator, children[idx], key, value)?
                else {
                    return Ok(None);
                };
                keys.insert(idx, sep);
                children.insert(idx + 1, new_child);

                let node = Node::Internal { keys, children };
                if !self.internal_overflows(&node)? {
                    self.write_node(pid, &node)?;
                    return Ok(None);
                }

                let Node::Internal {
                    mut keys,
                    mut children,
                } = node
                else {
                    unreachable!()
                };
                let mid = keys.len() / 2;
                let right_keys = keys.split_off(mid + 1);
                let sep_up = keys.pop().ok_or_else(|| {
                    DbError::CorruptPage("internal split on an empty node".into())
                })?;
                let right_children = children.split_off(mid + 1);
                let right_pid = allocator.allocate()?;
                self.write_node(pid, &Node::Internal { keys, children })?;
                self.write_new_node(
                    right_pid,
                    &Node::Internal {
                        keys: right_keys,
                        children: right_children,
                    },
                )?;
                Ok(Some((sep_up, right_pid)))
            }
        }
    }

    fn leaf_overflows(&self, node: &Node) -> DbResult<bool> {
        Ok(node.len() > MAX_LEAF_ENTRIES || !page::fits(node)?)
    }

    fn internal_overflows(&self, node: &Node) -> DbResult<bool> {
        Ok(node.len() > MAX_INTERNAL_KEYS || !page::fits(node)?)
    }

    // ---- deletion ----

    fn delete_inner(&self, key: &Value, value: Option<&[u8]>) -> DbResult<bool> {
        check_key(key)?;
        let mut allocator = self.allocator.lock();
        let (removed, _) = self.delete_rec(&mut allocator, ROOT_PAGE, key, value)?;
        if removed {
            // A root holding a single child shrinks the tree by one level.
            if let Node::Internal { keys, children } = self.read_node(ROOT_PAGE)? {
                if keys.is_empty() && children.len() == 1 {
                    let child_pid = children[0];
                    let child = self.read_node(child_pid)?;
                    self.write_node(ROOT_PAGE, &child)?;
                    allocator.free(child_pid)?;
                    self.pool.discard(self.table_id, child_pid);
                }
            }
        }
        Ok(removed)
    }

    /// Returns `(removed, underflow)` for the subtree rooted at `pid`.
    fn delete_rec(
        &self,
        allocator: &mut PageAllocator,
        pid: PageId,
        key: &Value,
        value: Option<&[u8]>,
    ) -> DbResult<(bool, bool)> {
        match self.read_node(pid)? {
            Node::Leaf {
                mut entries,
                next_leaf,
            } => {
                let mut found = None;
                for (i, (k, v)) in entries.iter().enumerate() {
                    match cmp_keys(key, k)? {
                        Ordering::Less => break,
                        Ordering::Equal => {
                            if value.map_or(true, |want| want == v.as_slice()) {
                                found = Some(i);
                                break;
                            }
                        }
                        Ordering::Greater => {}
                    }
                }
                let Some(i) = found else {
                    return Ok((false, false));
                };
                entries.remove(i);
                let underflow = entries.len() < MIN_LEAF_ENTRIES;
                self.write_node(pid, &Node::Leaf { entries, next_leaf })?;
                Ok((true, underflow))
            }
            Node::Internal {
                mut keys,
                mut children,
            } => {
                let mut idx = child_index_lower(&keys, key)?;
                let mut removed = false;
                loop {
                    let (rm, child_underflow) =
                        self.delete_rec(allocator, children[idx], key, value)?;
                    // Repair only an underflow this removal caused; touching
                    // siblings mid-search could move entries behind the scan.
                    if rm && child_underflow && children.len() > 1 {
                        idx = self.rebalance_child(allocator, &mut keys, &mut children, idx)?;
                        self.write_node(
                            pid,
                            &Node::Internal {
                                keys: keys.clone(),
                                children: children.clone(),
                            },
                        )?;
                    }
                    if rm {
                        removed = true;
                        break;
                    }
                    // A duplicate run continues under the next child only
                    // when the separator right of this child equals the key.
                    if idx < keys.len() && cmp_keys(key, &keys[idx])? == Ordering::Equal {
                        idx += 1;
                    } else {
                        break;
                    }
                }
                Ok((removed, keys.len() < MIN_INTERNAL_KEYS))
            }
        }
    }

    /// Repairs an underflowing child by borrowing from or merging with an
    /// adjacent same-parent sibling. Returns the index now covering the
    /// child's entries. A merge whose result would not fit one page is
    /// skipped; the child stays under-occupied but the tree stays correct.
    fn rebalance_child(
        &self,
        allocator: &mut PageAllocator,
        keys: &mut Vec<Value>,
        children: &mut Vec<PageId>,
        idx: usize,
    ) -> DbResult<usize> {
        let child_pid = children[idx];
        let child = self.read_node(child_pid)?;

        if idx > 0 {
            let left_pid = children[idx - 1];
            let left = self.read_node(left_pid)?;
            if left.len() > min_len(&left) {
                let (new_sep, new_left, new_child) = borrow_from_left(&keys[idx - 1], left, child)?;
                if page::fits(&new_left)? && page::fits(&new_child)? {
                    keys[idx - 1] = new_sep;
                    self.write_node(left_pid, &new_left)?;
                    self.write_node(child_pid, &new_child)?;
                }
                return Ok(idx);
            }
            let merged = merge_nodes(left, keys[idx - 1].clone(), child)?;
            if page::fits(&merged)? {
                self.write_node(left_pid, &merged)?;
                allocator.free(child_pid)?;
                self.pool.discard(self.table_id, child_pid);
                keys.remove(idx - 1);
                children.remove(idx);
                return Ok(idx - 1);
            }
            return Ok(idx);
        }

        let right_pid = children[idx + 1];
        let right = self.read_node(right_pid)?;
        if right.len() > min_len(&right) {
            let (new_sep, new_child, new_right) = borrow_from_right(&keys[idx], child, right)?;
            if page::fits(&new_child)? && page::fits(&new_right)? {
                keys[idx] = new_sep;
                self.write_node(child_pid, &new_child)?;
                self.write_node(right_pid, &new_right)?;
            }
            return Ok(idx);
        }
        let merged = merge_nodes(child, keys[idx].clone(), right)?;
        if page::fits(&merged)? {
            self.write_node(child_pid, &merged)?;
            allocator.free(right_pid)?;
            self.pool.discard(self.table_id, right_pid);
            keys.remove(idx);
            children.remove(idx + 1);
        }
        Ok(idx)
    }

    // ---- node I/O through the buffer pool ----

    fn read_node(&self, pid: PageId) -> DbResult<Node> {
        let frame = self.pool.get(self.table_id, pid)?;
        frame.pin();
        let node = page::read_node(&frame.page());
        frame.unpin(false);
        node
    }

    fn write_node(&self, pid: PageId, node: &Node) -> DbResult<()> {
        let frame = self.pool.get(self.table_id, pid)?;
        frame.pin();
        let result = page::write_node(&mut frame.page_mut(), node);
        frame.unpin(result.is_ok());
        result
    }

    /// Writes a node into a page that has never been cached: freshly
    /// allocated, so its on-disk image (if any) is dead.
    fn write_new_node(&self, pid: PageId, node: &Node) -> DbResult<()> {
        let frame = self.pool.new_page(self.table_id, pid)?;
        frame.pin();
        let result = page::write_node(&mut frame.page_mut(), node);
        frame.unpin(result.is_ok());
        result
    }
}

/// Moves the left sibling's last entry into the child. Returns the new
/// separator and both rewritten nodes.
fn borrow_from_left(sep: &Value, left: Node, child: Node) -> DbResult<(Value, Node, Node)> {
    match (left, child) {
        (
            Node::Leaf {
                entries: mut le,
                next_leaf: ln,
            },
            Node::Leaf {
                entries: mut ce,
                next_leaf: cn,
            },
        ) => {
            let moved = le
                .pop()
                .ok_or_else(|| DbError::CorruptPage("borrow from an empty sibling".into()))?;
            let new_sep = moved.0.clone();
            ce.insert(0, moved);
            Ok((
                new_sep,
                Node::Leaf {
                    entries: le,
                    next_leaf: ln,
                },
                Node::Leaf {
                    entries: ce,
                    next_leaf: cn,
                },
            ))
        }
        (
            Node::Internal {
                keys: mut lk,
                children: mut lc,
            },
            Node::Internal {
                keys: mut ck,
                children: mut cc,
            },
        ) => {
            // Rotate through the parent separator.
            let new_sep = lk
                .pop()
                .ok_or_else(|| DbError::CorruptPage("borrow from an empty sibling".into()))?;
            let moved_child = lc
                .pop()
                .ok_or_else(|| DbError::CorruptPage("internal node has no children".into()))?;
            ck.insert(0, sep.clone());
            cc.insert(0, moved_child);
            Ok((
                new_sep,
                Node::Internal {
                    keys: lk,
                    children: lc,
                },
                Node::Internal {
                    keys: ck,
                    children: cc,
                },
            ))
        }
        _ => Err(DbError::CorruptPage("sibling nodes differ in kind".into())),
    }
}

/// Moves the right sibling's first entry into the child.
fn borrow_from_right(sep: &Value, child: Node, right: Node) -> DbResult<(Value, Node, Node)> {
    match (child, right) {
        (
            Node::Leaf {
                entries: mut ce,
                next_leaf: cn,
            },
            Node::Leaf {
                entries: mut re,
                next_leaf: rn,
            },
        ) => {
            if re.is_empty() {
                return Err(DbError::CorruptPage("borrow from an empty sibling".into()));
            }
            let moved = re.remove(0);
            ce.push(moved);
            let new_sep = re
                .first()
                .map(|(k, _)| k.clone())
                .ok_or_else(|| DbError::CorruptPage("borrow emptied the sibling".into()))?;
            Ok((
                new_sep,
                Node::Leaf {
                    entries: ce,
                    next_leaf: cn,
                },
                Node::Leaf {
                    entries: re,
                    next_leaf: rn,
                },
            ))
        }
        (
            Node::Internal {
                keys: mut ck,
                children: mut cc,
            },
            Node::Internal {
                keys: mut rk,
                children: mut rc,
            },
        ) => {
            if rk.is_empty() || rc.is_empty() {
                return Err(DbError::CorruptPage("borrow from an empty sibling".into()));
            }
            ck.push(sep.clone());
            cc.push(rc.remove(0));
            let new_sep = rk.remove(0);
            Ok((
                new_sep,
                Node::Internal {
                    keys: ck,
                    children: cc,
                },
                Node::Internal {
                    keys: rk,
                    children: rc,
                },
            ))
        }
        _ => Err(DbError::CorruptPage("sibling nodes differ in kind".into())),
    }
}

/// Appends `source` onto `target`. Leaves drop the separator and adopt the
/// source's forward link; internal nodes pull the separator down between
/// the two key runs.
fn merge_nodes(target: Node, sep: Value, source: Node) -> DbResult<Node> {
    match (target, source) {
        (
            Node::Leaf {
                entries: mut te, ..
            },
            Node::Leaf {
                entries: se,
                next_leaf: sn,
            },
        ) => {
            te.extend(se);
            Ok(Node::Leaf {
                entries: te,
                next_leaf: sn,
            })
        }
        (
            Node::Internal {
                keys: mut tk,
                children: mut tc,
            },
            Node::Internal {
                keys: sk,
                children: sc,
            },
        ) => {
            tk.push(sep);
            tk.extend(sk);
            tc.extend(sc);
            Ok(Node::Internal {
                keys: tk,
                children: tc,
            })
        }
        _ => Err(DbError::CorruptPage("sibling nodes differ in kind".into())),
    }
}
