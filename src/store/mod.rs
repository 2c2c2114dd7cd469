//! Node stores: where NodeRefs are resolved from.
//!
//! - BufferStore: an in-memory byte dump produced by `write_to`.
//! - LogStore: the file-backed, append-only commit log of a tree.

use std::io::Cursor;

use crate::error::{Result, TreeError};
use crate::metrics::record_node_resolved;
use crate::node::{decode_node, read_record_header, Node};

mod cache;
mod commit_log;
mod recovery;

pub use commit_log::LogStore;
pub use recovery::{locate_last_root, Recovered, RootLocation};
use recovery::locate_last_root_at;

/// Source of persisted nodes, addressed by the offset they were written at.
pub trait NodeStore: Send + Sync {
    /// Load the node whose record starts at `offset`.
    fn resolve(&self, offset: u64) -> Result<Node>;
}

/// Resolves offsets inside a serialized dump held in memory.
///
/// `base_offset` is the stream position the dump started at (the `base_offset`
/// passed to `write_to`).
#[derive(Clone, Debug, Default)]
pub struct BufferStore {
    data: Vec<u8>,
    base_offset: u64,
}

impl BufferStore {
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_base_offset(data, 0)
    }

    pub fn with_base_offset(data: Vec<u8>, base_offset: u64) -> Self {
        Self { data, base_offset }
    }

    /// Store with no data; every resolve fails.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Last complete root record of the dump, if any.
    pub fn root(&self) -> Result<Option<Node>> {
        let mut cur = Cursor::new(&self.data[..]);
        let rec = locate_last_root_at(&mut cur, 0, self.data.len() as u64, self.base_offset)?;
        match rec.root {
            None => Ok(None),
            Some(loc) => {
                let start = loc.offset as usize;
                let bytes = &self.data[start..start + loc.size as usize];
                decode_node(bytes, self.base_offset + loc.offset).map(Some)
            }
        }
    }
}

impl NodeStore for BufferStore {
    fn resolve(&self, offset: u64) -> Result<Node> {
        let out_of_range = || {
            TreeError::corrupted(format!(
                "offset {} outside of buffer [{}, {})",
                offset,
                self.base_offset,
                self.base_offset + self.data.len() as u64
            ))
        };
        let pos = offset
            .checked_sub(self.base_offset)
            .filter(|p| *p < self.data.len() as u64)
            .ok_or_else(out_of_range)? as usize;
        let hdr = read_record_header(&self.data[pos..])?;
        let end = pos + hdr.size as usize;
        if end > self.data.len() {
            return Err(out_of_range());
        }
        let node = decode_node(&self.data[pos..end], offset)?;
        record_node_resolved();
        Ok(node)
    }
}
