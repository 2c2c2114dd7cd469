//! Point-in-time views of a tree.
//!
//! A Snapshot pins one root node. Everything reachable from it is immutable, so
//! lookups and scans need no locking; only the reader registry and the closed
//! flag sit behind the snapshot's RwLock.
//!
//! Lifecycle:
//! - readers must be closed before the snapshot (`ReadersNotClosed` otherwise);
//! - a successful `close` notifies the owner exactly once;
//! - a snapshot dropped without `close` releases itself best-effort.

use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use crate::config::{ReaderSpec, WriteOpts};
use crate::error::{Result, TreeError};
use crate::metrics::{record_snapshot_begin, record_snapshot_end};
use crate::node::{find_leaf_node, Node};
use crate::reader::Reader;
use crate::store::NodeStore;

/// Receives the release of snapshots it handed out.
pub trait SnapshotOwner: Send + Sync {
    /// Called once per successfully closed snapshot. An error keeps the snapshot open.
    fn snapshot_closed(&self, snapshot_id: u64) -> Result<()>;
}

#[derive(Default)]
struct SnapshotState {
    readers: HashMap<u64, ReaderSpec>,
    max_reader_id: u64,
    closed: bool,
}

pub struct Snapshot {
    id: u64,
    root: Node,
    store: Arc<dyn NodeStore>,
    owner: Arc<dyn SnapshotOwner>,
    state: RwLock<SnapshotState>,
}

impl Snapshot {
    pub fn new(
        id: u64,
        root: Node,
        store: Arc<dyn NodeStore>,
        owner: Arc<dyn SnapshotOwner>,
    ) -> Arc<Self> {
        record_snapshot_begin();
        debug!("snapshot {} opened at ts {}", id, root.ts());
        Arc::new(Self {
            id,
            root,
            store,
            owner,
            state: RwLock::new(SnapshotState::default()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Log offset of the root, or UNPERSISTED if it was never flushed.
    pub fn root_offset(&self) -> i64 {
        self.root.offset()
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Value and commit ts of `key` as of this snapshot.
    pub fn get(&self, key: &[u8]) -> Result<(Vec<u8>, u64)> {
        let st = self.state.read();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        self.root.get(key, &*self.store)
    }

    /// Commit ts of the root.
    pub fn ts(&self) -> Result<u64> {
        let st = self.state.read();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        Ok(self.root.ts())
    }

    /// Open a cursor positioned per `spec`. An empty range is `NoMoreEntries`.
    pub fn reader(self: &Arc<Self>, spec: Option<&ReaderSpec>) -> Result<Reader> {
        let mut st = self.state.write();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        let spec = spec.ok_or_else(|| TreeError::illegal("reader spec is required"))?;

        let (path, leaf, offset) = match find_leaf_node(
            &self.root,
            &spec.initial_key,
            spec.asc_order,
            spec.is_prefix,
            &*self.store,
        ) {
            Ok(found) => found,
            Err(TreeError::KeyNotFound) => return Err(TreeError::NoMoreEntries),
            Err(e) => return Err(e),
        };

        let id = st.max_reader_id;
        st.max_reader_id += 1;
        st.readers.insert(id, spec.clone());
        drop(st);

        Ok(Reader::new(
            Arc::clone(self),
            id,
            self.store.clone(),
            spec,
            path,
            leaf,
            offset,
        ))
    }

    /// Number of readers currently registered.
    pub fn open_readers(&self) -> usize {
        self.state.read().readers.len()
    }

    /// Deregister reader `id`. Fails once the snapshot is closed.
    pub(crate) fn closed_reader(&self, id: u64) -> Result<()> {
        let mut st = self.state.write();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        st.readers.remove(&id);
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let mut st = self.state.write();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        if !st.readers.is_empty() {
            return Err(TreeError::ReadersNotClosed);
        }
        self.owner.snapshot_closed(self.id)?;
        st.closed = true;
        record_snapshot_end();
        debug!("snapshot {} closed", self.id);
        Ok(())
    }

    /// Serialize the root subtree into `w`, returning the bytes written.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W, opts: &WriteOpts) -> Result<u64> {
        let st = self.state.read();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        let (_, n) = self.root.write_to(w, true, opts, &*self.store)?;
        Ok(n)
    }

    /// Up to `limit` versions of `key`, newest first, as `(value, ts)`.
    ///
    /// Older versions are found by following the leaf's in-memory version chain;
    /// the history ends where the chain does (nodes loaded from disk carry none).
    pub fn history(&self, key: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, u64)>> {
        let st = self.state.read();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        drop(st);

        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        let (_, leaf, i) = find_leaf_node(&self.root, key, true, false, &*self.store)?;
        let v = &leaf.values()[i];
        if v.key.as_ref() != key {
            return Err(TreeError::KeyNotFound);
        }
        out.push((v.value.to_vec(), v.ts));
        let mut wanted = v.prev_ts;

        let mut cur = Node::Leaf(leaf.clone());
        while wanted != 0 && out.len() < limit {
            let Some(prev) = cur.prev_node().cloned() else {
                break;
            };
            let Node::Leaf(l) = &prev else {
                break;
            };
            if let Ok(j) = l.search(key) {
                let e = &l.values()[j];
                if e.ts == wanted {
                    out.push((e.value.to_vec(), e.ts));
                    wanted = e.prev_ts;
                }
            }
            cur = prev;
        }
        Ok(out)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if st.closed {
            return;
        }
        st.closed = true;
        record_snapshot_end();
        if let Err(e) = self.owner.snapshot_closed(self.id) {
            warn!("snapshot {} dropped without close, release failed: {}", self.id, e);
        }
    }
}
