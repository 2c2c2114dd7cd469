//! Node model: inner nodes, leaf nodes and lazy references to persisted nodes.
//!
//! Layout:
//! - mod.rs: Node enum, node variants, lookups and descent (path/leaf positioning).
//! - write.rs: serialization protocol (write_to) and the retrying byte writer.
//! - decode.rs: parsing of a single persisted record back into a node.
//!
//! Nodes are immutable once built. The only state that changes after construction is
//! the persisted offset, recorded when a node lands in a commit log.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::consts::{CHILD_REF_FIXED_SIZE, LEAF_ENTRY_FIXED_SIZE, NODE_PREFIX_SIZE, ROOT_TRAILER_SIZE, UNPERSISTED};
use crate::error::{Result, TreeError};
use crate::store::NodeStore;

mod decode;
mod write;

pub use decode::{decode_node, read_record_header, RecordHeader};
pub(crate) use write::write_fully;

/// A subtree element of any variant. Cloning is cheap (reference counted).
#[derive(Clone, Debug)]
pub enum Node {
    Inner(Arc<InnerNode>),
    Leaf(Arc<LeafNode>),
    Ref(Arc<NodeRef>),
}

/// One versioned key/value entry of a leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafValue {
    pub key: Arc<[u8]>,
    pub value: Arc<[u8]>,
    pub ts: u64,
    /// Ts of the previous version of the same key, 0 if none.
    pub prev_ts: u64,
}

impl LeafValue {
    pub fn new(key: &[u8], value: &[u8], ts: u64, prev_ts: u64) -> Self {
        Self {
            key: Arc::from(key),
            value: Arc::from(value),
            ts,
            prev_ts,
        }
    }

    fn encoded_len(&self) -> usize {
        LEAF_ENTRY_FIXED_SIZE + self.key.len() + self.value.len()
    }
}

/// Child slot of an inner node.
#[derive(Clone, Debug)]
pub struct ChildEntry {
    pub max_key: Arc<[u8]>,
    pub cts: u64,
    pub node: Node,
}

impl ChildEntry {
    /// Entry describing `node` with its own max key and ts.
    pub fn of(node: Node) -> Self {
        Self {
            max_key: node.max_key_arc(),
            cts: node.ts(),
            node,
        }
    }

    fn encoded_len(&self) -> usize {
        CHILD_REF_FIXED_SIZE + self.max_key.len()
    }
}

#[derive(Debug)]
pub struct LeafNode {
    values: Vec<LeafValue>,
    prev_node: Option<Node>,
    offset: AtomicI64,
    ts: u64,
    size: usize,
}

#[derive(Debug)]
pub struct InnerNode {
    nodes: Vec<ChildEntry>,
    prev_node: Option<Node>,
    offset: AtomicI64,
    ts: u64,
    size: usize,
}

/// Lazy pointer to a persisted node. Resolving it goes through a NodeStore,
/// which owns whatever it caches.
#[derive(Clone, Debug)]
pub struct NodeRef {
    offset: u64,
    max_key: Arc<[u8]>,
    ts: u64,
    size: u32,
}

fn empty_key() -> Arc<[u8]> {
    Arc::from(&[][..])
}

// Iterative so that long version chains are not dropped recursively.
fn unlink_chain(mut next: Option<Node>) {
    while let Some(node) = next {
        next = match node {
            Node::Leaf(arc) => match Arc::try_unwrap(arc) {
                Ok(mut leaf) => leaf.prev_node.take(),
                Err(_) => None,
            },
            Node::Inner(arc) => match Arc::try_unwrap(arc) {
                Ok(mut inner) => inner.prev_node.take(),
                Err(_) => None,
            },
            Node::Ref(_) => None,
        };
    }
}

impl LeafNode {
    /// New, not yet persisted leaf. `values` must be sorted by key without duplicates.
    pub fn new(values: Vec<LeafValue>, prev_node: Option<Node>) -> Self {
        Self::with_offset(values, prev_node, UNPERSISTED)
    }

    /// Leaf loaded from `offset` of a commit log.
    pub fn persisted(values: Vec<LeafValue>, offset: u64) -> Self {
        Self::with_offset(values, None, offset as i64)
    }

    fn with_offset(values: Vec<LeafValue>, prev_node: Option<Node>, offset: i64) -> Self {
        debug_assert!(values.windows(2).all(|w| w[0].key < w[1].key));
        let ts = values.iter().map(|v| v.ts).max().unwrap_or(0);
        let size = NODE_PREFIX_SIZE + values.iter().map(LeafValue::encoded_len).sum::<usize>();
        Self {
            values,
            prev_node,
            offset: AtomicI64::new(offset),
            ts,
            size,
        }
    }

    pub fn values(&self) -> &[LeafValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.values.binary_search_by(|v| v.key.as_ref().cmp(key))
    }

    pub fn get(&self, key: &[u8]) -> Result<(Vec<u8>, u64)> {
        match self.search(key) {
            Ok(i) => {
                let v = &self.values[i];
                Ok((v.value.to_vec(), v.ts))
            }
            Err(_) => Err(TreeError::KeyNotFound),
        }
    }
}

impl Drop for LeafNode {
    fn drop(&mut self) {
        unlink_chain(self.prev_node.take());
    }
}

impl InnerNode {
    /// New, not yet persisted inner node. Children must be ordered by max key.
    pub fn new(nodes: Vec<ChildEntry>, prev_node: Option<Node>) -> Self {
        Self::with_offset(nodes, prev_node, UNPERSISTED)
    }

    /// Inner node loaded from `offset` of a commit log; children are NodeRefs.
    pub fn persisted(nodes: Vec<ChildEntry>, offset: u64) -> Self {
        Self::with_offset(nodes, None, offset as i64)
    }

    fn with_offset(nodes: Vec<ChildEntry>, prev_node: Option<Node>, offset: i64) -> Self {
        debug_assert!(nodes.windows(2).all(|w| w[0].max_key < w[1].max_key));
        let ts = nodes.iter().map(|c| c.cts).max().unwrap_or(0);
        let size = NODE_PREFIX_SIZE + nodes.iter().map(ChildEntry::encoded_len).sum::<usize>();
        Self {
            nodes,
            prev_node,
            offset: AtomicI64::new(offset),
            ts,
            size,
        }
    }

    pub fn children(&self) -> &[ChildEntry] {
        &self.nodes
    }

    /// Index of the child whose range covers `key`, if any.
    pub(crate) fn child_index(&self, key: &[u8]) -> Option<usize> {
        let i = self.nodes.partition_point(|c| c.max_key.as_ref() < key);
        (i < self.nodes.len()).then_some(i)
    }
}

impl Drop for InnerNode {
    fn drop(&mut self) {
        unlink_chain(self.prev_node.take());
    }
}

impl NodeRef {
    pub fn new(offset: u64, max_key: Arc<[u8]>, ts: u64, size: u32) -> Self {
        Self {
            offset,
            max_key,
            ts,
            size,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Node {
    pub fn max_key(&self) -> &[u8] {
        match self {
            Node::Inner(n) => n.nodes.last().map(|c| c.max_key.as_ref()).unwrap_or(&[]),
            Node::Leaf(l) => l.values.last().map(|v| v.key.as_ref()).unwrap_or(&[]),
            Node::Ref(r) => &r.max_key,
        }
    }

    pub(crate) fn max_key_arc(&self) -> Arc<[u8]> {
        match self {
            Node::Inner(n) => n.nodes.last().map(|c| c.max_key.clone()).unwrap_or_else(empty_key),
            Node::Leaf(l) => l.values.last().map(|v| v.key.clone()).unwrap_or_else(empty_key),
            Node::Ref(r) => r.max_key.clone(),
        }
    }

    /// Commit ts of the most recent mutation in this subtree.
    pub fn ts(&self) -> u64 {
        match self {
            Node::Inner(n) => n.ts,
            Node::Leaf(l) => l.ts,
            Node::Ref(r) => r.ts,
        }
    }

    /// Serialized length of this node as a non-root record.
    pub fn size(&self) -> usize {
        match self {
            Node::Inner(n) => n.size,
            Node::Leaf(l) => l.size,
            Node::Ref(r) => r.size as usize,
        }
    }

    pub(crate) fn record_size(&self, is_root: bool) -> usize {
        if is_root {
            self.size() + ROOT_TRAILER_SIZE
        } else {
            self.size()
        }
    }

    /// On-disk offset, or UNPERSISTED.
    pub fn offset(&self) -> i64 {
        match self {
            Node::Inner(n) => n.offset.load(Ordering::Acquire),
            Node::Leaf(l) => l.offset.load(Ordering::Acquire),
            Node::Ref(r) => r.offset as i64,
        }
    }

    pub(crate) fn set_offset(&self, offset: u64) {
        match self {
            Node::Inner(n) => n.offset.store(offset as i64, Ordering::Release),
            Node::Leaf(l) => l.offset.store(offset as i64, Ordering::Release),
            Node::Ref(_) => {}
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.offset() > UNPERSISTED
    }

    /// True if created or changed since it was last persisted.
    pub fn mutated(&self) -> bool {
        !self.is_persisted()
    }

    /// Immediately preceding version of this node, if kept in memory.
    pub fn prev_node(&self) -> Option<&Node> {
        match self {
            Node::Inner(n) => n.prev_node.as_ref(),
            Node::Leaf(l) => l.prev_node.as_ref(),
            Node::Ref(_) => None,
        }
    }

    /// Materialize a reference through the store; other variants are returned as is.
    pub fn resolve(&self, store: &dyn NodeStore) -> Result<Node> {
        match self {
            Node::Ref(r) => {
                let node = store.resolve(r.offset)?;
                if let Node::Ref(_) = node {
                    return Err(TreeError::corrupted(format!(
                        "store resolved offset {} to another reference",
                        r.offset
                    )));
                }
                Ok(node)
            }
            other => Ok(other.clone()),
        }
    }

    pub fn get(&self, key: &[u8], store: &dyn NodeStore) -> Result<(Vec<u8>, u64)> {
        let mut node = self.resolve(store)?;
        loop {
            let next = match &node {
                Node::Leaf(l) => return l.get(key),
                Node::Inner(n) => {
                    let idx = n.child_index(key).ok_or(TreeError::KeyNotFound)?;
                    n.nodes[idx].node.resolve(store)?
                }
                Node::Ref(_) => unreachable!("resolve never yields a reference"),
            };
            node = next;
        }
    }
}

/// Position inside an inner node on the way from the root to a leaf.
#[derive(Clone, Debug)]
pub(crate) struct PathStep {
    pub node: Arc<InnerNode>,
    pub index: usize,
}

/// Keys that may start a descending scan: `key <= bound`, or in prefix mode
/// `key[..len(bound)] <= bound`.
fn at_or_before(key: &[u8], bound: &[u8], prefix: bool) -> bool {
    let key = if prefix {
        &key[..key.len().min(bound.len())]
    } else {
        key
    };
    key.cmp(bound) != CmpOrdering::Greater
}

/// Descend from `node` to its first (asc) or last (desc) leaf, pushing the path.
pub(crate) fn descend_edge(
    node: &Node,
    path: &mut Vec<PathStep>,
    asc: bool,
    store: &dyn NodeStore,
) -> Result<Arc<LeafNode>> {
    let mut node = node.resolve(store)?;
    loop {
        let next = match &node {
            Node::Leaf(l) => return Ok(l.clone()),
            Node::Inner(n) => {
                if n.nodes.is_empty() {
                    return Err(TreeError::corrupted("inner node without children"));
                }
                let index = if asc { 0 } else { n.nodes.len() - 1 };
                let child = n.nodes[index].node.resolve(store)?;
                path.push(PathStep {
                    node: n.clone(),
                    index,
                });
                child
            }
            Node::Ref(_) => unreachable!("resolve never yields a reference"),
        };
        node = next;
    }
}

/// Move to the adjacent leaf in scan order. Returns None past the edge of the tree.
pub(crate) fn step_leaf(
    path: &mut Vec<PathStep>,
    asc: bool,
    store: &dyn NodeStore,
) -> Result<Option<Arc<LeafNode>>> {
    loop {
        let Some(top) = path.last_mut() else {
            return Ok(None);
        };
        let has_sibling = if asc {
            top.index + 1 < top.node.nodes.len()
        } else {
            top.index > 0
        };
        if !has_sibling {
            path.pop();
            continue;
        }
        if asc {
            top.index += 1;
        } else {
            top.index -= 1;
        }
        let child = top.node.nodes[top.index].node.clone();
        return descend_edge(&child, path, asc, store).map(Some);
    }
}

/// Locate the starting leaf and entry index of a scan.
///
/// Ascending scans start at the first key `>= key`. Descending scans start at the
/// last key at or before `key` (see `at_or_before`). Fails with KeyNotFound when
/// there is no such entry.
pub(crate) fn find_leaf_node(
    root: &Node,
    key: &[u8],
    asc: bool,
    prefix: bool,
    store: &dyn NodeStore,
) -> Result<(Vec<PathStep>, Arc<LeafNode>, usize)> {
    let mut path = Vec::new();
    let mut node = root.resolve(store)?;
    loop {
        let next = match &node {
            Node::Inner(n) => {
                if n.nodes.is_empty() {
                    return Err(TreeError::KeyNotFound);
                }
                let index = if asc {
                    n.child_index(key).ok_or(TreeError::KeyNotFound)?
                } else {
                    n.nodes
                        .partition_point(|c| at_or_before(&c.max_key, key, prefix))
                        .min(n.nodes.len() - 1)
                };
                let child = n.nodes[index].node.resolve(store)?;
                path.push(PathStep {
                    node: n.clone(),
                    index,
                });
                child
            }
            Node::Leaf(l) => {
                if asc {
                    let i = l.values.partition_point(|v| v.key.as_ref() < key);
                    if i < l.values.len() {
                        return Ok((path, l.clone(), i));
                    }
                    // Everything here sorts below `key`: start at the head of the next leaf.
                    loop {
                        match step_leaf(&mut path, true, store)? {
                            None => return Err(TreeError::KeyNotFound),
                            Some(next) if !next.values.is_empty() => return Ok((path, next, 0)),
                            Some(_) => {}
                        }
                    }
                }
                let i = l.values.partition_point(|v| at_or_before(&v.key, key, prefix));
                if i > 0 {
                    return Ok((path, l.clone(), i - 1));
                }
                // Nothing here qualifies: the start is the tail of the previous leaf.
                loop {
                    match step_leaf(&mut path, false, store)? {
                        None => return Err(TreeError::KeyNotFound),
                        Some(prev) if !prev.values.is_empty() => {
                            let i = prev.values.len() - 1;
                            return Ok((path, prev, i));
                        }
                        Some(_) => {}
                    }
                }
            }
            Node::Ref(_) => unreachable!("resolve never yields a reference"),
        };
        node = next;
    }
}
