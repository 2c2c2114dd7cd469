//! Locating the last complete root record of a commit log.
//!
//! Fast path: a log that ends in a root record carries the record size in its
//! last four bytes, so the root can be found from the tail alone.
//! Slow path (torn tail): walk the record chain forward from the header and keep
//! the last root record that is fully present.

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use std::io::{Read, Seek, SeekFrom};

use crate::consts::{NODE_HDR_SIZE, ROOT_TRAILER_SIZE};
use crate::error::Result;
use crate::node::{decode_node, read_record_header};

/// Position of a root record inside the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootLocation {
    pub offset: u64,
    pub size: u32,
}

/// Outcome of a recovery scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recovered {
    pub root: Option<RootLocation>,
    /// Everything past this position is garbage from an interrupted append.
    pub valid_end: u64,
}

fn read_at<R: Read + Seek>(r: &mut R, pos: u64, buf: &mut [u8]) -> Result<()> {
    r.seek(SeekFrom::Start(pos))?;
    r.read_exact(buf)?;
    Ok(())
}

/// Check that stream range `[pos, pos + size)` holds a decodable root record.
fn is_root_record<R: Read + Seek>(r: &mut R, pos: u64, size: u32, origin: u64) -> Result<bool> {
    let mut rec = vec![0u8; size as usize];
    read_at(r, pos, &mut rec)?;
    match read_record_header(&rec) {
        Ok(h) if h.is_root() && h.size == size => {}
        _ => return Ok(false),
    }
    Ok(decode_node(&rec, origin + pos).is_ok())
}

/// Find the last complete root record among the records stored in `[start, end)`.
/// Stream positions are log offsets.
pub fn locate_last_root<R: Read + Seek>(r: &mut R, start: u64, end: u64) -> Result<Recovered> {
    locate_last_root_at(r, start, end, 0)
}

/// Same as `locate_last_root` for a stream whose position 0 is log offset `origin`.
/// Returned locations are stream positions.
pub(crate) fn locate_last_root_at<R: Read + Seek>(
    r: &mut R,
    start: u64,
    end: u64,
    origin: u64,
) -> Result<Recovered> {
    if end <= start {
        return Ok(Recovered {
            root: None,
            valid_end: start,
        });
    }

    // Fast path: trailing size mirror.
    if end - start >= (NODE_HDR_SIZE + ROOT_TRAILER_SIZE) as u64 {
        let mut tail = [0u8; ROOT_TRAILER_SIZE];
        read_at(r, end - ROOT_TRAILER_SIZE as u64, &mut tail)?;
        let size = BigEndian::read_u32(&tail);
        if size as u64 <= end - start {
            let offset = end - size as u64;
            if is_root_record(r, offset, size, origin)? {
                debug!("recovery: root at {} ({} bytes) found from the tail", offset, size);
                return Ok(Recovered {
                    root: Some(RootLocation { offset, size }),
                    valid_end: end,
                });
            }
        }
    }

    // Slow path: walk the record chain.
    debug!("recovery: tail is not a root record, scanning from {}", start);
    let mut pos = start;
    let mut last: Option<RootLocation> = None;
    let mut hdr = [0u8; NODE_HDR_SIZE];
    while pos + NODE_HDR_SIZE as u64 <= end {
        read_at(r, pos, &mut hdr)?;
        let h = match read_record_header(&hdr) {
            Ok(h) => h,
            Err(_) => break,
        };
        if pos + h.size as u64 > end {
            debug!("recovery: partial record at {}, need {} bytes", pos, h.size);
            break;
        }
        if h.is_root() {
            if !is_root_record(r, pos, h.size, origin)? {
                break;
            }
            last = Some(RootLocation {
                offset: pos,
                size: h.size,
            });
        }
        pos += h.size as u64;
    }

    let valid_end = last.map(|l| l.offset + l.size as u64).unwrap_or(start);
    Ok(Recovered {
        root: last,
        valid_end,
    })
}
