//! Serialization of tree nodes into index pages.
//!
//! One node per page: the 12-byte index header, then the bincode-encoded
//! node body, then zero fill. The page is the single unit of tree I/O.

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult};
use storage::{index, Page};

use crate::node::Node;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Deserializes the node stored in `page`. Fails with `CorruptPage` when
/// the page is not an index page or the body does not decode.
pub fn read_node(page: &Page) -> DbResult<Node> {
    let body = index::body(page)?;
    let (node, _) = decode_from_slice(body, bincode_config())
        .map_err(|e| DbError::CorruptPage(format!("tree node failed to decode: {e}")))?;
    Ok(node)
}

/// Serializes `node` into `page`, rewriting the header and zero-filling the
/// remainder. `PageFull` when the encoding exceeds the body capacity.
pub fn write_node(page: &mut Page, node: &Node) -> DbResult<()> {
    let bytes = encode_to_vec(node, bincode_config())
        .map_err(|e| DbError::CorruptPage(format!("tree node failed to encode: {e}")))?;
    if bytes.len() > index::capacity() {
        return Err(DbError::PageFull {
            needed: bytes.len(),
            available: index::capacity(),
        });
    }

    index::init(page);
    let body = index::body_mut(page);
    body[..bytes.len()].copy_from_slice(&bytes);
    body[bytes.len()..].fill(0);
    Ok(())
}

/// Size of the node's encoding, for overflow checks before a write.
pub fn encoded_len(node: &Node) -> DbResult<usize> {
    let bytes = encode_to_vec(node, bincode_config())
        .map_err(|e| DbError::CorruptPage(format!("tree node failed to encode: {e}")))?;
    Ok(bytes.len())
}

/// Whether `node` still fits a page body.
pub fn fits(node: &Node) -> DbResult<bool> {
    Ok(encoded_len(node)? <= index::capacity())
}
