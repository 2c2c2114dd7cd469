//! File-backed append-only commit log.
//!
//! Layout: [magic8 "TBLOG001"][version u32][reserved u32] followed by node records
//! exactly as produced by `Node::write_to`. Offsets stored in records are absolute
//! file positions. Every flush ends with a root record.

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::cache::NodeCache;
use super::recovery::locate_last_root;
use super::NodeStore;
use crate::consts::{LOG_HDR_SIZE, LOG_MAGIC, LOG_VERSION, NODE_HDR_SIZE};
use crate::error::{Result, TreeError};
use crate::lock::{try_acquire_exclusive_lock, LockGuard};
use crate::metrics::{
    record_cache_hit, record_cache_miss, record_log_flush, record_log_torn_tail,
    record_node_resolved,
};
use crate::node::{decode_node, read_record_header, Node};

pub struct LogStore {
    path: PathBuf,
    writer: Mutex<File>,
    reader: Mutex<File>,
    len: AtomicU64,
    cache: Mutex<NodeCache>,
    // Set after a failed append; nodes may already carry offsets of lost bytes.
    failed: AtomicBool,
    sync: bool,
    _lock: LockGuard,
}

fn write_log_header(f: &mut File) -> Result<()> {
    let mut hdr = [0u8; LOG_HDR_SIZE];
    hdr[..8].copy_from_slice(LOG_MAGIC);
    BigEndian::write_u32(&mut hdr[8..12], LOG_VERSION);
    BigEndian::write_u32(&mut hdr[12..16], 0);
    f.seek(SeekFrom::Start(0))?;
    f.write_all(&hdr)?;
    f.sync_all()?;
    Ok(())
}

fn check_log_header(f: &mut File, path: &Path) -> Result<()> {
    let mut hdr = [0u8; LOG_HDR_SIZE];
    f.seek(SeekFrom::Start(0))?;
    f.read_exact(&mut hdr)?;
    if &hdr[..8] != LOG_MAGIC {
        return Err(TreeError::corrupted(format!(
            "bad commit log magic in {}",
            path.display()
        )));
    }
    let version = BigEndian::read_u32(&hdr[8..12]);
    if version != LOG_VERSION {
        return Err(TreeError::corrupted(format!(
            "unsupported commit log version {} in {}",
            version,
            path.display()
        )));
    }
    Ok(())
}

impl LogStore {
    /// Open (or create) the log at `path`, holding its lock until dropped.
    pub fn open(path: impl AsRef<Path>, cache_size: usize, sync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = try_acquire_exclusive_lock(&path)?;

        let mut writer = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let mut len = writer.metadata()?.len();
        if len < LOG_HDR_SIZE as u64 {
            debug!(
                "LogStore::open: {} shorter than header ({} bytes), writing fresh header",
                path.display(),
                len
            );
            writer.set_len(0)?;
            write_log_header(&mut writer)?;
            len = LOG_HDR_SIZE as u64;
        } else {
            check_log_header(&mut writer, &path)?;
        }
        let reader = OpenOptions::new().read(true).open(&path)?;

        debug!("LogStore::open: {} ({} bytes)", path.display(), len);
        Ok(Self {
            path,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            len: AtomicU64::new(len),
            cache: Mutex::new(NodeCache::new(cache_size)),
            failed: AtomicBool::new(false),
            sync,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the log in bytes, header included.
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    /// True if no record has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() <= LOG_HDR_SIZE as u64
    }

    /// Find the last complete root, cutting off any torn tail behind it.
    pub fn recover_root(&self) -> Result<Option<Node>> {
        let end = self.len();
        let rec = {
            let mut r = self.reader.lock();
            locate_last_root(&mut *r, LOG_HDR_SIZE as u64, end)?
        };

        if rec.valid_end < end {
            warn!(
                "commit log {}: dropping {} byte(s) of incomplete tail at {}",
                self.path.display(),
                end - rec.valid_end,
                rec.valid_end
            );
            let w = self.writer.lock();
            w.set_len(rec.valid_end)?;
            w.sync_all()?;
            self.len.store(rec.valid_end, Ordering::Release);
            record_log_torn_tail();
        }

        match rec.root {
            None => Ok(None),
            Some(loc) => {
                let root = self.resolve(loc.offset)?;
                info!(
                    "commit log {}: recovered root at {} (ts {})",
                    self.path.display(),
                    loc.offset,
                    root.ts()
                );
                Ok(Some(root))
            }
        }
    }

    /// Append the bytes produced by `f` at the end of the log.
    ///
    /// `f` receives the sink and the absolute offset it starts at, and returns the
    /// number of bytes it wrote. After a failed append the store refuses further
    /// appends.
    pub fn append<F>(&self, f: F) -> Result<u64>
    where
        F: FnOnce(&mut dyn Write, u64) -> Result<u64>,
    {
        if self.failed.load(Ordering::Acquire) {
            return Err(TreeError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("commit log {} failed earlier", self.path.display()),
            )));
        }

        let mut file = self.writer.lock();
        let base = self.len();
        let res = (|| -> Result<u64> {
            file.seek(SeekFrom::Start(base))?;
            let mut bw = BufWriter::new(&mut *file);
            let n = f(&mut bw, base)?;
            bw.flush()?;
            drop(bw);
            if self.sync {
                file.sync_data()?;
            }
            Ok(n)
        })();

        match res {
            Ok(n) => {
                self.len.store(base + n, Ordering::Release);
                record_log_flush();
                debug!("commit log append: {} bytes at {}", n, base);
                Ok(n)
            }
            Err(e) => {
                self.failed.store(true, Ordering::Release);
                warn!(
                    "commit log {}: append at {} failed: {}",
                    self.path.display(),
                    base,
                    e
                );
                Err(e)
            }
        }
    }

    fn read_record(&self, offset: u64) -> Result<Vec<u8>> {
        let end = self.len();
        if offset < LOG_HDR_SIZE as u64 || offset + NODE_HDR_SIZE as u64 > end {
            return Err(TreeError::corrupted(format!(
                "offset {} outside of commit log [{}, {})",
                offset, LOG_HDR_SIZE, end
            )));
        }
        let mut r = self.reader.lock();
        let mut hdr = [0u8; NODE_HDR_SIZE];
        r.seek(SeekFrom::Start(offset))?;
        r.read_exact(&mut hdr)?;
        let h = read_record_header(&hdr)?;
        if offset + h.size as u64 > end {
            return Err(TreeError::corrupted(format!(
                "record at {} ({} bytes) runs past end of log {}",
                offset, h.size, end
            )));
        }
        let mut rec = vec![0u8; h.size as usize];
        rec[..NODE_HDR_SIZE].copy_from_slice(&hdr);
        r.read_exact(&mut rec[NODE_HDR_SIZE..])?;
        Ok(rec)
    }
}

impl NodeStore for LogStore {
    fn resolve(&self, offset: u64) -> Result<Node> {
        if let Some(node) = self.cache.lock().get(offset) {
            record_cache_hit();
            return Ok(node);
        }
        record_cache_miss();

        let rec = self.read_record(offset)?;
        let node = decode_node(&rec, offset)?;
        record_node_resolved();
        self.cache.lock().put(offset, node.clone());
        Ok(node)
    }
}
