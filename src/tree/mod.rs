//! TBtree: the owning tree of snapshots, backed by a commit log.
//!
//! - insert builds a new root by copy-on-write; readers of older snapshots are
//!   never disturbed.
//! - flush appends the nodes created since the previous flush, ending with a
//!   root record, at the end of the log.
//! - open recovers the last complete root (see store::recovery).

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::{TreeBuilder, TreeConfig, WriteOpts};
use crate::error::{Result, TreeError};
use crate::node::{LeafNode, Node};
use crate::snapshot::{Snapshot, SnapshotOwner};
use crate::store::{LogStore, NodeStore};

mod insert;

use insert::{insert_root, InsertCtx};

struct TreeState {
    root: Node,
    last_ts: u64,
    next_snapshot_id: u64,
    active_snapshots: HashSet<u64>,
    closed: bool,
}

struct TreeInner {
    cfg: TreeConfig,
    store: Arc<LogStore>,
    state: RwLock<TreeState>,
    // Held from picking the root to appending it, so roots land in ts order.
    // Taken before `state`.
    flush_lock: Mutex<()>,
}

/// Handle to an open tree. Clones share the same tree.
#[derive(Clone)]
pub struct TBtree {
    inner: Arc<TreeInner>,
}

impl TBtree {
    /// Builder over env defaults; finish with `open`.
    pub fn builder() -> TreeBuilder {
        TreeBuilder::new()
    }

    /// Open or create the tree stored in the commit log at `path`.
    pub fn open(path: impl AsRef<Path>, cfg: TreeConfig) -> Result<Self> {
        let path = path.as_ref();
        let store = Arc::new(LogStore::open(
            path,
            cfg.node_cache_size,
            cfg.sync_on_flush,
        )?);
        let root = match store.recover_root()? {
            Some(root) => root,
            None => Node::Leaf(Arc::new(LeafNode::new(Vec::new(), None))),
        };
        let last_ts = root.ts();
        info!("TBtree opened at {} (ts {}), {}", path.display(), last_ts, cfg);

        Ok(Self {
            inner: Arc::new(TreeInner {
                cfg,
                store,
                state: RwLock::new(TreeState {
                    root,
                    last_ts,
                    next_snapshot_id: 1,
                    active_snapshots: HashSet::new(),
                    closed: false,
                }),
                flush_lock: Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.inner.cfg
    }

    /// Write `key` = `value`, returning the commit ts assigned to it.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<u64> {
        let mut st = self.inner.state.write();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        let ts = st.last_ts + 1;
        let ctx = InsertCtx {
            max_entries: self.inner.cfg.max_node_entries,
            keep_history: self.inner.cfg.keep_history,
            store: &*self.inner.store,
        };
        st.root = insert_root(&st.root, key, value, ts, &ctx)?;
        st.last_ts = ts;
        Ok(ts)
    }

    /// Latest value and commit ts of `key`.
    pub fn get(&self, key: &[u8]) -> Result<(Vec<u8>, u64)> {
        let root = {
            let st = self.inner.state.read();
            if st.closed {
                return Err(TreeError::AlreadyClosed);
            }
            st.root.clone()
        };
        root.get(key, &*self.inner.store)
    }

    /// Ts of the latest insert (or of the recovered root).
    pub fn ts(&self) -> Result<u64> {
        let st = self.inner.state.read();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        Ok(st.last_ts)
    }

    /// Frozen view of the current root. Close it (or drop it) to release it.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let mut st = self.inner.state.write();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        let id = st.next_snapshot_id;
        st.next_snapshot_id += 1;
        st.active_snapshots.insert(id);
        let root = st.root.clone();
        drop(st);

        let store: Arc<dyn NodeStore> = self.inner.store.clone();
        let owner: Arc<dyn SnapshotOwner> = self.inner.clone();
        Ok(Snapshot::new(id, root, store, owner))
    }

    /// Number of snapshots handed out and not yet released.
    pub fn active_snapshots(&self) -> usize {
        self.inner.state.read().active_snapshots.len()
    }

    /// Append everything written since the last flush. Returns the bytes appended.
    pub fn flush(&self) -> Result<u64> {
        let _flushing = self.inner.flush_lock.lock();
        let root = {
            let st = self.inner.state.read();
            if st.closed {
                return Err(TreeError::AlreadyClosed);
            }
            st.root.clone()
        };
        self.inner.flush_root(&root)
    }

    /// Flush and close. Fails while snapshots are still open.
    pub fn close(&self) -> Result<()> {
        let _flushing = self.inner.flush_lock.lock();
        let mut st = self.inner.state.write();
        if st.closed {
            return Err(TreeError::AlreadyClosed);
        }
        if !st.active_snapshots.is_empty() {
            return Err(TreeError::SnapshotsNotClosed);
        }
        self.inner.flush_root(&st.root)?;
        st.closed = true;
        info!("TBtree {} closed at ts {}", self.inner.store.path().display(), st.last_ts);
        Ok(())
    }

    /// Current length of the commit log in bytes.
    pub fn log_len(&self) -> u64 {
        self.inner.store.len()
    }
}

impl TreeBuilder {
    /// Open the tree at `path` with the built configuration.
    pub fn open(self, path: impl AsRef<Path>) -> Result<TBtree> {
        TBtree::open(path, self.build())
    }
}

impl TreeInner {
    fn flush_root(&self, root: &Node) -> Result<u64> {
        if root.is_persisted() {
            return Ok(0);
        }
        let store: &dyn NodeStore = &*self.store;
        let n = self.store.append(|w, base| {
            let (_, n) = root.write_to(w, true, &WriteOpts::incremental(base), store)?;
            Ok(n)
        })?;
        debug!("flush: {} bytes, root at {}", n, root.offset());
        Ok(n)
    }
}

impl SnapshotOwner for TreeInner {
    fn snapshot_closed(&self, snapshot_id: u64) -> Result<()> {
        let mut st = self.state.write();
        if !st.active_snapshots.remove(&snapshot_id) {
            return Err(TreeError::illegal(format!(
                "snapshot {} is not active",
                snapshot_id
            )));
        }
        Ok(())
    }
}

impl Drop for TreeInner {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if st.closed {
            return;
        }
        let root = st.root.clone();
        if let Err(e) = self.flush_root(&root) {
            warn!("TBtree dropped without close, final flush failed: {}", e);
        }
    }
}
