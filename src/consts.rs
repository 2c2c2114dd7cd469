//! Shared format constants (node records, commit log).

// -------- Node record tags --------
pub const INNER_NODE_TYPE: u8 = 0;
pub const ROOT_INNER_NODE_TYPE: u8 = 1;
pub const LEAF_NODE_TYPE: u8 = 2;
pub const ROOT_LEAF_NODE_TYPE: u8 = 3;

// Record header: [tag u8][size u32]
pub const NODE_HDR_SIZE: usize = 1 + 4;
// Header plus the u32 child/entry count.
pub const NODE_PREFIX_SIZE: usize = NODE_HDR_SIZE + 4;
// Trailing size mirror on root records.
pub const ROOT_TRAILER_SIZE: usize = 4;

// Child ref: [max_key_len u32][max_key][cts u64][child_size u32][child_offset u64]
pub const CHILD_REF_FIXED_SIZE: usize = 4 + 8 + 4 + 8;
// Leaf entry: [key_len u32][key][value_len u32][value][ts u64][prev_ts u64]
pub const LEAF_ENTRY_FIXED_SIZE: usize = 4 + 4 + 8 + 8;

/// Offset of a node that has never been written to the commit log.
pub const UNPERSISTED: i64 = -1;

// -------- Tree shape --------
pub const MIN_NODE_ENTRIES: usize = 4;
pub const DEFAULT_MAX_NODE_ENTRIES: usize = 64;
pub const DEFAULT_NODE_CACHE_SIZE: usize = 4096;

// -------- Commit log --------
pub const LOG_MAGIC: &[u8; 8] = b"TBLOG001";
pub const LOG_VERSION: u32 = 1;
// [magic8][version u32][reserved u32]
pub const LOG_HDR_SIZE: usize = 16;
pub const LOCK_SUFFIX: &str = "lock";
