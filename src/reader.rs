//! Ordered, prefix-aware cursor over one snapshot.

use std::sync::Arc;

use crate::config::ReaderSpec;
use crate::error::{Result, TreeError};
use crate::metrics::{record_reader_close, record_reader_open};
use crate::node::{step_leaf, LeafNode, PathStep};
use crate::snapshot::Snapshot;
use crate::store::NodeStore;

/// One entry produced by a Reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub ts: u64,
}

/// Cursor created by `Snapshot::reader`.
///
/// `read` yields matching entries in the requested order and fails with
/// `NoMoreEntries` once the range is exhausted. A reader cannot be rewound;
/// open a new one to scan again. A reader keeps its snapshot alive, and
/// dropping an open reader deregisters it.
pub struct Reader {
    snapshot: Arc<Snapshot>,
    id: u64,
    store: Arc<dyn NodeStore>,
    initial_key: Vec<u8>,
    is_prefix: bool,
    asc_order: bool,
    path: Vec<PathStep>,
    leaf: Arc<LeafNode>,
    // Next index to read in `leaf`; None once the leaf is used up.
    next: Option<usize>,
    done: bool,
    closed: bool,
}

impl Reader {
    pub(crate) fn new(
        snapshot: Arc<Snapshot>,
        id: u64,
        store: Arc<dyn NodeStore>,
        spec: &ReaderSpec,
        path: Vec<PathStep>,
        leaf: Arc<LeafNode>,
        offset: usize,
    ) -> Self {
        record_reader_open();
        Self {
            snapshot,
            id,
            store,
            initial_key: spec.initial_key.clone(),
            is_prefix: spec.is_prefix,
            asc_order: spec.asc_order,
            path,
            leaf,
            next: Some(offset),
            done: false,
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next matching entry.
    pub fn read(&mut self) -> Result<ReadEntry> {
        if self.closed {
            return Err(TreeError::AlreadyClosed);
        }
        if self.done {
            return Err(TreeError::NoMoreEntries);
        }

        let i = loop {
            if let Some(i) = self.next {
                break i;
            }
            match step_leaf(&mut self.path, self.asc_order, &*self.store)? {
                None => {
                    self.done = true;
                    return Err(TreeError::NoMoreEntries);
                }
                Some(leaf) => {
                    self.next = match (leaf.len(), self.asc_order) {
                        (0, _) => None,
                        (_, true) => Some(0),
                        (n, false) => Some(n - 1),
                    };
                    self.leaf = leaf;
                }
            }
        };

        let v = &self.leaf.values()[i];
        if self.is_prefix && !v.key.starts_with(&self.initial_key) {
            self.done = true;
            return Err(TreeError::NoMoreEntries);
        }
        let entry = ReadEntry {
            key: v.key.to_vec(),
            value: v.value.to_vec(),
            ts: v.ts,
        };

        self.next = if self.asc_order {
            Some(i + 1).filter(|&j| j < self.leaf.len())
        } else {
            i.checked_sub(1)
        };
        Ok(entry)
    }

    /// Deregister from the snapshot. A failed deregistration leaves the reader open.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(TreeError::AlreadyClosed);
        }
        self.snapshot.closed_reader(self.id)?;
        self.closed = true;
        record_reader_close();
        Ok(())
    }
}

impl Iterator for Reader {
    type Item = Result<ReadEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read() {
            Ok(e) => Some(Ok(e)),
            Err(TreeError::NoMoreEntries) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.snapshot.closed_reader(self.id);
        record_reader_close();
    }
}
