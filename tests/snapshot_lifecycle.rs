// tests/snapshot_lifecycle.rs
//
// Covers:
// 1) Snapshot get/ts after close -> AlreadyClosed, never stale data.
// 2) Snapshot close with open readers -> ReadersNotClosed; succeeds once they close.
// 3) Reader on an empty snapshot -> NoMoreEntries; no ReaderSpec -> IllegalArgument.
// 4) Snapshots are frozen: later inserts are invisible to them.
// 5) Tree close refuses while snapshots are open.
// 6) An open reader keeps its snapshot registered after the last handle is dropped.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use tbtree::{ReaderSpec, TBtree, TreeBuilder, TreeError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tbtest-life-{prefix}-{pid}-{t}-{id}"))
}

fn open_tree(prefix: &str) -> Result<TBtree> {
    let root = unique_root(prefix);
    fs::create_dir_all(&root)?;
    Ok(TreeBuilder::from_default()
        .max_node_entries(8)
        .sync_on_flush(false)
        .open(root.join("tree.log"))?)
}

#[test]
fn closed_snapshot_rejects_reads() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let tree = open_tree("closed")?;
    tree.insert(b"alpha", b"1")?;

    let snap = tree.snapshot()?;
    assert_eq!(snap.get(b"alpha")?, (b"1".to_vec(), 1));
    assert_eq!(snap.ts()?, 1);

    snap.close()?;
    assert!(matches!(snap.get(b"alpha"), Err(TreeError::AlreadyClosed)));
    assert!(matches!(snap.ts(), Err(TreeError::AlreadyClosed)));
    assert!(matches!(snap.close(), Err(TreeError::AlreadyClosed)));
    assert_eq!(tree.active_snapshots(), 0);
    Ok(())
}

#[test]
fn readers_block_snapshot_close() -> Result<()> {
    let tree = open_tree("readers")?;
    for i in 0..50u32 {
        tree.insert(format!("k{i:03}").as_bytes(), &i.to_be_bytes())?;
    }
    let snap = tree.snapshot()?;
    let mut r1 = snap.reader(Some(&ReaderSpec::ascending("k010")))?;
    let mut r2 = snap.reader(Some(&ReaderSpec::prefix("k04", false)))?;

    assert!(matches!(snap.close(), Err(TreeError::ReadersNotClosed)));
    assert_eq!(r1.read()?.key, b"k010");
    r1.close()?;
    assert!(matches!(snap.close(), Err(TreeError::ReadersNotClosed)));
    assert_eq!(r2.read()?.key, b"k049");
    r2.close()?;
    snap.close()?;
    assert!(matches!(r1.read(), Err(TreeError::AlreadyClosed)));
    Ok(())
}

#[test]
fn empty_snapshot_and_missing_spec() -> Result<()> {
    let tree = open_tree("empty")?;
    let snap = tree.snapshot()?;
    for key in ["", "a", "zzzz"] {
        for asc in [true, false] {
            let spec = ReaderSpec::new(key, false, asc);
            assert!(matches!(snap.reader(Some(&spec)), Err(TreeError::NoMoreEntries)));
        }
    }
    assert!(matches!(snap.reader(None), Err(TreeError::IllegalArgument(_))));
    assert!(matches!(snap.get(b"a"), Err(TreeError::KeyNotFound)));
    snap.close()?;
    Ok(())
}

#[test]
fn snapshot_is_frozen() -> Result<()> {
    let tree = open_tree("frozen")?;
    tree.insert(b"k1", b"old")?;
    let snap = tree.snapshot()?;

    tree.insert(b"k1", b"new")?;
    tree.insert(b"k2", b"later")?;

    assert_eq!(snap.get(b"k1")?.0, b"old");
    assert!(matches!(snap.get(b"k2"), Err(TreeError::KeyNotFound)));
    assert_eq!(snap.ts()?, 1);
    assert_eq!(tree.get(b"k1")?, (b"new".to_vec(), 2));
    assert_eq!(tree.ts()?, 3);

    let keys: Vec<Vec<u8>> = snap
        .reader(Some(&ReaderSpec::ascending("")))?
        .map(|e| e.map(|e| e.key))
        .collect::<tbtree::Result<_>>()?;
    assert_eq!(keys, vec![b"k1".to_vec()]);
    snap.close()?;
    Ok(())
}

#[test]
fn tree_close_waits_for_snapshots() -> Result<()> {
    let tree = open_tree("treeclose")?;
    tree.insert(b"a", b"1")?;
    let snap = tree.snapshot()?;
    assert!(matches!(tree.close(), Err(TreeError::SnapshotsNotClosed)));

    snap.close()?;
    tree.close()?;
    assert!(matches!(tree.close(), Err(TreeError::AlreadyClosed)));
    assert!(matches!(tree.insert(b"b", b"2"), Err(TreeError::AlreadyClosed)));
    assert!(matches!(tree.snapshot(), Err(TreeError::AlreadyClosed)));
    Ok(())
}

#[test]
fn dropped_snapshot_is_released() -> Result<()> {
    let tree = open_tree("dropped")?;
    {
        let _snap = tree.snapshot()?;
        assert_eq!(tree.active_snapshots(), 1);
    }
    assert_eq!(tree.active_snapshots(), 0);
    tree.close()?;
    Ok(())
}

#[test]
fn open_reader_outlives_snapshot_handle() -> Result<()> {
    let tree = open_tree("orphan")?;
    tree.insert(b"a", b"1")?;
    tree.insert(b"b", b"2")?;
    let snap = tree.snapshot()?;
    let mut r = snap.reader(Some(&ReaderSpec::ascending("")))?;
    drop(snap);

    assert_eq!(tree.active_snapshots(), 1);
    assert!(matches!(tree.close(), Err(TreeError::SnapshotsNotClosed)));
    assert_eq!(r.read()?.key, b"a");
    assert_eq!(r.read()?.key, b"b");
    r.close()?;
    drop(r);

    assert_eq!(tree.active_snapshots(), 0);
    tree.close()?;
    Ok(())
}
