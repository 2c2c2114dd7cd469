//! Serialization of a node graph into records (children before parents).
//!
//! Record layouts (big-endian):
//! - inner: [tag u8][size u32][count u32] count x [max_key_len u32][max_key][cts u64][child_size u32][child_offset u64]
//! - leaf:  [tag u8][size u32][count u32] count x [key_len u32][key][value_len u32][value][ts u64][prev_ts u64]
//! - roots additionally end with [size u32], mirroring the header.
//!
//! `size` always counts the whole record, tag and trailer included.

use byteorder::{BigEndian, ByteOrder};
use std::io::{self, Write};

use super::{InnerNode, LeafNode, Node, NodeRef};
use crate::config::WriteOpts;
use crate::consts::{INNER_NODE_TYPE, LEAF_NODE_TYPE, ROOT_INNER_NODE_TYPE, ROOT_LEAF_NODE_TYPE};
use crate::error::Result;
use crate::metrics::{record_node_skipped, record_node_written};
use crate::store::NodeStore;

/// Write the whole buffer, looping over short writes. A sink that accepts zero
/// bytes is reported as WriteZero.
pub(crate) fn write_fully<W: Write + ?Sized>(w: &mut W, buf: &[u8]) -> io::Result<()> {
    let mut written = 0usize;
    while written < buf.len() {
        match w.write(&buf[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("sink accepted 0 of {} remaining bytes", buf.len() - written),
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[inline]
fn put_u32(buf: &mut [u8], i: &mut usize, v: u32) {
    BigEndian::write_u32(&mut buf[*i..*i + 4], v);
    *i += 4;
}

#[inline]
fn put_u64(buf: &mut [u8], i: &mut usize, v: u64) {
    BigEndian::write_u64(&mut buf[*i..*i + 8], v);
    *i += 8;
}

#[inline]
fn put_bytes(buf: &mut [u8], i: &mut usize, bytes: &[u8]) {
    put_u32(buf, i, bytes.len() as u32);
    buf[*i..*i + bytes.len()].copy_from_slice(bytes);
    *i += bytes.len();
}

impl Node {
    /// Serialize this subtree. Returns (offset of this node, bytes written by the call).
    ///
    /// With `only_mutated`, persisted nodes are skipped and report their existing
    /// offset with zero bytes. With `commit_log`, each written node keeps its landing
    /// offset (`base_offset` + bytes written before it).
    pub fn write_to<W: Write + ?Sized>(
        &self,
        w: &mut W,
        is_root: bool,
        opts: &WriteOpts,
        store: &dyn NodeStore,
    ) -> Result<(u64, u64)> {
        if opts.only_mutated && self.is_persisted() {
            record_node_skipped();
            return Ok((self.offset() as u64, 0));
        }
        let (offset, written) = match self {
            Node::Inner(n) => n.write_to(w, is_root, opts, store)?,
            Node::Leaf(l) => l.write_to(w, is_root, opts)?,
            Node::Ref(r) => return r.write_to(w, is_root, opts, store),
        };
        if opts.commit_log {
            self.set_offset(offset);
        }
        Ok((offset, written))
    }
}

impl InnerNode {
    fn write_to<W: Write + ?Sized>(
        &self,
        w: &mut W,
        is_root: bool,
        opts: &WriteOpts,
        store: &dyn NodeStore,
    ) -> Result<(u64, u64)> {
        let mut child_bytes = 0u64;
        let mut child_offsets = Vec::with_capacity(self.nodes.len());
        for c in &self.nodes {
            let child_opts = WriteOpts {
                base_offset: opts.base_offset + child_bytes,
                ..*opts
            };
            let (off, n) = c.node.write_to(w, false, &child_opts, store)?;
            child_bytes += n;
            child_offsets.push(off);
        }

        let size = self.size + if is_root { 4 } else { 0 };
        let mut buf = vec![0u8; size];
        let mut i = 0usize;

        buf[i] = if is_root {
            ROOT_INNER_NODE_TYPE
        } else {
            INNER_NODE_TYPE
        };
        i += 1;
        put_u32(&mut buf, &mut i, size as u32);
        put_u32(&mut buf, &mut i, self.nodes.len() as u32);

        for (c, off) in self.nodes.iter().zip(child_offsets) {
            put_bytes(&mut buf, &mut i, &c.max_key);
            put_u64(&mut buf, &mut i, c.cts);
            put_u32(&mut buf, &mut i, c.node.size() as u32);
            put_u64(&mut buf, &mut i, off);
        }

        if is_root {
            put_u32(&mut buf, &mut i, size as u32);
        }
        debug_assert_eq!(i, size);

        write_fully(w, &buf)?;
        record_node_written(size);

        Ok((opts.base_offset + child_bytes, child_bytes + size as u64))
    }
}

impl LeafNode {
    fn write_to<W: Write + ?Sized>(
        &self,
        w: &mut W,
        is_root: bool,
        opts: &WriteOpts,
    ) -> Result<(u64, u64)> {
        let size = self.size + if is_root { 4 } else { 0 };
        let mut buf = vec![0u8; size];
        let mut i = 0usize;

        buf[i] = if is_root {
            ROOT_LEAF_NODE_TYPE
        } else {
            LEAF_NODE_TYPE
        };
        i += 1;
        put_u32(&mut buf, &mut i, size as u32);
        put_u32(&mut buf, &mut i, self.values.len() as u32);

        for v in &self.values {
            put_bytes(&mut buf, &mut i, &v.key);
            put_bytes(&mut buf, &mut i, &v.value);
            put_u64(&mut buf, &mut i, v.ts);
            put_u64(&mut buf, &mut i, v.prev_ts);
        }

        if is_root {
            put_u32(&mut buf, &mut i, size as u32);
        }
        debug_assert_eq!(i, size);

        write_fully(w, &buf)?;
        record_node_written(size);

        Ok((opts.base_offset, size as u64))
    }
}

impl NodeRef {
    fn write_to<W: Write + ?Sized>(
        &self,
        w: &mut W,
        is_root: bool,
        opts: &WriteOpts,
        store: &dyn NodeStore,
    ) -> Result<(u64, u64)> {
        // An unresolved reference points at data that is durable already.
        if opts.only_mutated {
            record_node_skipped();
            return Ok((self.offset, 0));
        }
        let node = store.resolve(self.offset)?;
        if let Node::Ref(_) = node {
            return Err(crate::error::TreeError::corrupted(format!(
                "store resolved offset {} to another reference",
                self.offset
            )));
        }
        node.write_to(w, is_root, opts, store)
    }
}
