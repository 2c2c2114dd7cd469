//! Parsing of one persisted node record.

use byteorder::{BigEndian, ByteOrder};
use std::sync::Arc;

use super::{ChildEntry, InnerNode, LeafNode, LeafValue, Node, NodeRef};
use crate::consts::{
    INNER_NODE_TYPE, LEAF_NODE_TYPE, NODE_HDR_SIZE, NODE_PREFIX_SIZE, ROOT_INNER_NODE_TYPE,
    ROOT_LEAF_NODE_TYPE, ROOT_TRAILER_SIZE,
};
use crate::error::{Result, TreeError};

/// Leading [tag u8][size u32] of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub tag: u8,
    pub size: u32,
}

impl RecordHeader {
    pub fn is_root(&self) -> bool {
        self.tag == ROOT_INNER_NODE_TYPE || self.tag == ROOT_LEAF_NODE_TYPE
    }

    fn min_size(&self) -> usize {
        NODE_PREFIX_SIZE + if self.is_root() { ROOT_TRAILER_SIZE } else { 0 }
    }
}

/// Parse and sanity-check the header at the start of `buf`.
pub fn read_record_header(buf: &[u8]) -> Result<RecordHeader> {
    if buf.len() < NODE_HDR_SIZE {
        return Err(TreeError::corrupted(format!(
            "record header needs {} bytes, got {}",
            NODE_HDR_SIZE,
            buf.len()
        )));
    }
    let hdr = RecordHeader {
        tag: buf[0],
        size: BigEndian::read_u32(&buf[1..NODE_HDR_SIZE]),
    };
    if hdr.tag > ROOT_LEAF_NODE_TYPE {
        return Err(TreeError::corrupted(format!("unknown node tag {}", hdr.tag)));
    }
    if (hdr.size as usize) < hdr.min_size() {
        return Err(TreeError::corrupted(format!(
            "record size {} below minimum {} for tag {}",
            hdr.size,
            hdr.min_size(),
            hdr.tag
        )));
    }
    Ok(hdr)
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(TreeError::corrupted(format!(
                "record truncated at byte {} (need {} more)",
                self.pos, n
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    fn bytes(&mut self) -> Result<Arc<[u8]>> {
        let len = self.u32()? as usize;
        Ok(Arc::from(self.take(len)?))
    }
}

/// Decode the record held exactly by `record`, which was read from `offset`.
///
/// Inner nodes come back with NodeRef children; both variants are marked as
/// persisted at `offset`.
pub fn decode_node(record: &[u8], offset: u64) -> Result<Node> {
    let hdr = read_record_header(record)?;
    if hdr.size as usize != record.len() {
        return Err(TreeError::corrupted(format!(
            "record at {} declares {} bytes, got {}",
            offset,
            hdr.size,
            record.len()
        )));
    }

    let body_end = if hdr.is_root() {
        let tail = BigEndian::read_u32(&record[record.len() - ROOT_TRAILER_SIZE..]);
        if tail != hdr.size {
            return Err(TreeError::corrupted(format!(
                "root record at {}: header size {} != trailing size {}",
                offset, hdr.size, tail
            )));
        }
        record.len() - ROOT_TRAILER_SIZE
    } else {
        record.len()
    };

    let mut d = Decoder {
        buf: &record[..body_end],
        pos: NODE_HDR_SIZE,
    };
    let count = d.u32()? as usize;

    let node = match hdr.tag {
        INNER_NODE_TYPE | ROOT_INNER_NODE_TYPE => {
            if count == 0 {
                return Err(TreeError::corrupted(format!(
                    "inner record at {} has no children",
                    offset
                )));
            }
            let mut nodes = Vec::with_capacity(count.min(body_end));
            for _ in 0..count {
                let max_key = d.bytes()?;
                let cts = d.u64()?;
                let size = d.u32()?;
                let child_offset = d.u64()?;
                if child_offset >= offset {
                    return Err(TreeError::corrupted(format!(
                        "child offset {} not before parent at {}",
                        child_offset, offset
                    )));
                }
                if nodes.last().is_some_and(|p: &ChildEntry| p.max_key >= max_key) {
                    return Err(TreeError::corrupted(format!(
                        "inner record at {} has unordered children",
                        offset
                    )));
                }
                let child = NodeRef::new(child_offset, max_key.clone(), cts, size);
                nodes.push(ChildEntry {
                    max_key,
                    cts,
                    node: Node::Ref(Arc::new(child)),
                });
            }
            Node::Inner(Arc::new(InnerNode::persisted(nodes, offset)))
        }
        LEAF_NODE_TYPE | ROOT_LEAF_NODE_TYPE => {
            let mut values = Vec::with_capacity(count.min(body_end));
            for _ in 0..count {
                let key = d.bytes()?;
                let value = d.bytes()?;
                let ts = d.u64()?;
                let prev_ts = d.u64()?;
                if values.last().is_some_and(|p: &LeafValue| p.key >= key) {
                    return Err(TreeError::corrupted(format!(
                        "leaf record at {} has unordered keys",
                        offset
                    )));
                }
                values.push(LeafValue {
                    key,
                    value,
                    ts,
                    prev_ts,
                });
            }
            Node::Leaf(Arc::new(LeafNode::persisted(values, offset)))
        }
        _ => unreachable!("tag validated by read_record_header"),
    };

    if d.pos != body_end {
        return Err(TreeError::corrupted(format!(
            "record at {} has {} trailing bytes",
            offset,
            body_end - d.pos
        )));
    }
    Ok(node)
}
