//! Centralized configuration for the tree, serialization and readers.
//!
//! - TreeConfig: tunables of the owning tree and its commit log. Can be read from env
//!   (TreeConfig::from_env) and overridden with fluent setters or TreeBuilder.
//! - WriteOpts: how a snapshot's node graph is written (full dump vs incremental log append).
//! - ReaderSpec: scan parameters of a Reader (start key, prefix mode, direction).
//!
//! Env variables:
//! - TB_MAX_NODE_ENTRIES (default 64, clamped to >= 4)
//! - TB_NODE_CACHE_SIZE  (default 4096, 0 disables the node cache)
//! - TB_KEEP_HISTORY     (default false)
//! - TB_SYNC_ON_FLUSH    (default true)

use std::fmt;

use crate::consts::{DEFAULT_MAX_NODE_ENTRIES, DEFAULT_NODE_CACHE_SIZE, MIN_NODE_ENTRIES};

fn env_bool(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

/// Tunables of the owning tree and its commit log.
#[derive(Clone, Debug)]
pub struct TreeConfig {
    /// Max children per inner node / entries per leaf before a split.
    pub max_node_entries: usize,

    /// Capacity of the resolved-node LRU cache (0 disables).
    pub node_cache_size: usize,

    /// Link every new node version to its predecessor via `prev_node`.
    /// Superseded versions stay in memory for as long as the chain is reachable.
    pub keep_history: bool,

    /// fsync the commit log after each flush.
    pub sync_on_flush: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_node_entries: DEFAULT_MAX_NODE_ENTRIES,
            node_cache_size: DEFAULT_NODE_CACHE_SIZE,
            keep_history: false,
            sync_on_flush: true,
        }
    }
}

impl TreeConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("TB_MAX_NODE_ENTRIES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.max_node_entries = n.max(MIN_NODE_ENTRIES);
            }
        }

        if let Ok(v) = std::env::var("TB_NODE_CACHE_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.node_cache_size = n;
            }
        }

        if let Ok(v) = std::env::var("TB_KEEP_HISTORY") {
            cfg.keep_history = env_bool(&v);
        }

        if let Ok(v) = std::env::var("TB_SYNC_ON_FLUSH") {
            cfg.sync_on_flush = env_bool(&v);
        }

        cfg
    }

    pub fn with_max_node_entries(mut self, n: usize) -> Self {
        self.max_node_entries = n.max(MIN_NODE_ENTRIES);
        self
    }

    pub fn with_node_cache_size(mut self, n: usize) -> Self {
        self.node_cache_size = n;
        self
    }

    pub fn with_keep_history(mut self, on: bool) -> Self {
        self.keep_history = on;
        self
    }

    pub fn with_sync_on_flush(mut self, on: bool) -> Self {
        self.sync_on_flush = on;
        self
    }
}

impl fmt::Display for TreeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TreeConfig {{ \
             max_node_entries: {}, \
             node_cache_size: {}, \
             keep_history: {}, \
             sync_on_flush: {} \
             }}",
            self.max_node_entries,
            if self.node_cache_size == 0 {
                "disabled".to_string()
            } else {
                self.node_cache_size.to_string()
            },
            self.keep_history,
            self.sync_on_flush,
        )
    }
}

/// Builder that produces a TreeConfig. `TBtree::builder()` returns one.
#[derive(Clone, Debug)]
pub struct TreeBuilder {
    cfg: TreeConfig,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self {
            cfg: TreeConfig::from_env(),
        }
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: TreeConfig::default(),
        }
    }

    pub fn max_node_entries(mut self, n: usize) -> Self {
        self.cfg = self.cfg.with_max_node_entries(n);
        self
    }

    pub fn node_cache_size(mut self, n: usize) -> Self {
        self.cfg.node_cache_size = n;
        self
    }

    pub fn keep_history(mut self, on: bool) -> Self {
        self.cfg.keep_history = on;
        self
    }

    pub fn sync_on_flush(mut self, on: bool) -> Self {
        self.cfg.sync_on_flush = on;
        self
    }

    pub fn build(self) -> TreeConfig {
        self.cfg
    }
}

/// Serialization options for `write_to`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOpts {
    /// Skip nodes that already have an on-disk offset (incremental log append).
    pub only_mutated: bool,
    /// Absolute stream position at which this call's output begins.
    pub base_offset: u64,
    /// Record each written node's landing offset in memory.
    pub commit_log: bool,
}

impl WriteOpts {
    /// Throwaway dump of the whole graph; in-memory offsets are left untouched.
    pub fn full_dump() -> Self {
        Self {
            only_mutated: false,
            base_offset: 0,
            commit_log: false,
        }
    }

    /// Append of not-yet-persisted nodes at `base_offset` of a durable log.
    pub fn incremental(base_offset: u64) -> Self {
        Self {
            only_mutated: true,
            base_offset,
            commit_log: true,
        }
    }
}

/// Scan parameters of a Reader.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaderSpec {
    pub initial_key: Vec<u8>,
    pub is_prefix: bool,
    pub asc_order: bool,
}

impl ReaderSpec {
    pub fn new(initial_key: impl Into<Vec<u8>>, is_prefix: bool, asc_order: bool) -> Self {
        Self {
            initial_key: initial_key.into(),
            is_prefix,
            asc_order,
        }
    }

    /// Ascending scan from the first key >= `initial_key`.
    pub fn ascending(initial_key: impl Into<Vec<u8>>) -> Self {
        Self::new(initial_key, false, true)
    }

    /// Descending scan from the last key <= `initial_key`.
    pub fn descending(initial_key: impl Into<Vec<u8>>) -> Self {
        Self::new(initial_key, false, false)
    }

    /// Scan of keys starting with `prefix`, in the given direction.
    pub fn prefix(prefix: impl Into<Vec<u8>>, asc_order: bool) -> Self {
        Self::new(prefix, true, asc_order)
    }
}
