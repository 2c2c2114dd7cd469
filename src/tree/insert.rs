//! Copy-on-write insert path.
//!
//! Every node on the way from the root to the target leaf is rebuilt; untouched
//! siblings (including unresolved NodeRefs) are shared with the previous version.
//! A node that grows past `max_entries` is split in two halves and the parent
//! takes both.

use std::sync::Arc;

use crate::error::{Result, TreeError};
use crate::node::{ChildEntry, InnerNode, LeafNode, LeafValue, Node};
use crate::store::NodeStore;

pub(crate) struct InsertCtx<'a> {
    pub max_entries: usize,
    pub keep_history: bool,
    pub store: &'a dyn NodeStore,
}

impl InsertCtx<'_> {
    fn prev(&self, node: &Node) -> Option<Node> {
        self.keep_history.then(|| node.clone())
    }
}

/// New root after writing `key` = `value` at `ts`.
pub(crate) fn insert_root(
    root: &Node,
    key: &[u8],
    value: &[u8],
    ts: u64,
    ctx: &InsertCtx<'_>,
) -> Result<Node> {
    let resolved = root.resolve(ctx.store)?;
    let mut parts = insert_node(&resolved, key, value, ts, ctx)?;
    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }
    let children = parts.into_iter().map(ChildEntry::of).collect();
    Ok(Node::Inner(Arc::new(InnerNode::new(children, ctx.prev(&resolved)))))
}

// Returns the replacement of `node`: one node, or two after a split.
fn insert_node(
    node: &Node,
    key: &[u8],
    value: &[u8],
    ts: u64,
    ctx: &InsertCtx<'_>,
) -> Result<Vec<Node>> {
    match node {
        Node::Leaf(l) => {
            let mut values = l.values().to_vec();
            match l.search(key) {
                Ok(i) => {
                    let prev_ts = values[i].ts;
                    values[i] = LeafValue::new(key, value, ts, prev_ts);
                }
                Err(i) => values.insert(i, LeafValue::new(key, value, ts, 0)),
            }
            Ok(split_leaf(values, ctx.max_entries, ctx.prev(node)))
        }
        Node::Inner(n) => {
            let children = n.children();
            if children.is_empty() {
                return Err(TreeError::corrupted("inner node without children"));
            }
            let idx = n.child_index(key).unwrap_or(children.len() - 1);
            let child = children[idx].node.resolve(ctx.store)?;
            let parts = insert_node(&child, key, value, ts, ctx)?;

            let mut nodes = Vec::with_capacity(children.len() + 1);
            nodes.extend_from_slice(&children[..idx]);
            nodes.extend(parts.into_iter().map(ChildEntry::of));
            nodes.extend_from_slice(&children[idx + 1..]);
            Ok(split_inner(nodes, ctx.max_entries, ctx.prev(node)))
        }
        Node::Ref(_) => {
            let resolved = node.resolve(ctx.store)?;
            insert_node(&resolved, key, value, ts, ctx)
        }
    }
}

fn split_leaf(mut values: Vec<LeafValue>, max: usize, prev: Option<Node>) -> Vec<Node> {
    if values.len() <= max {
        return vec![Node::Leaf(Arc::new(LeafNode::new(values, prev)))];
    }
    let right = values.split_off(values.len() / 2);
    vec![
        Node::Leaf(Arc::new(LeafNode::new(values, prev.clone()))),
        Node::Leaf(Arc::new(LeafNode::new(right, prev))),
    ]
}

fn split_inner(mut nodes: Vec<ChildEntry>, max: usize, prev: Option<Node>) -> Vec<Node> {
    if nodes.len() <= max {
        return vec![Node::Inner(Arc::new(InnerNode::new(nodes, prev)))];
    }
    let right = nodes.split_off(nodes.len() / 2);
    vec![
        Node::Inner(Arc::new(InnerNode::new(nodes, prev.clone()))),
        Node::Inner(Arc::new(InnerNode::new(right, prev))),
    ]
}
