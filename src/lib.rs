//! Time-aware copy-on-write B-tree core.
//!
//! - node: inner/leaf/reference nodes, descent, record serialization and decoding
//! - snapshot + reader: frozen views of a root and ordered cursors over them
//! - store: node stores (in-memory dump, file-backed commit log) and recovery
//! - tree: the owning tree (insert, snapshots, flush, close)

pub mod config;
pub mod consts;
pub mod error;
pub mod lock;
pub mod metrics;

pub mod node;   // src/node/{mod,write,decode}.rs
pub mod store;  // src/store/{mod,cache,commit_log,recovery}.rs

pub mod reader;
pub mod snapshot;
pub mod tree;   // src/tree/{mod,insert}.rs

pub use config::{ReaderSpec, TreeBuilder, TreeConfig, WriteOpts};
pub use error::{Result, TreeError};
pub use node::{ChildEntry, InnerNode, LeafNode, LeafValue, Node, NodeRef};
pub use reader::{ReadEntry, Reader};
pub use snapshot::{Snapshot, SnapshotOwner};
pub use store::{BufferStore, LogStore, NodeStore};
pub use tree::TBtree;
