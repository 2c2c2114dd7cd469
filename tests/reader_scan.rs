// tests/reader_scan.rs
//
// Covers:
// 1) Ascending readers produce strictly increasing keys, descending strictly decreasing.
// 2) Prefix readers produce exactly the keys with the prefix, in both directions.
// 3) Start positions: ascending from the first key >= start, descending from the last <= start.
// 4) Scans over a tree reloaded from disk (NodeRefs resolved through the log).

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use oorandom::Rand64;

use tbtree::{ReaderSpec, Snapshot, TBtree, TreeBuilder, TreeError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tbtest-scan-{prefix}-{pid}-{t}-{id}"))
}

fn log_path(prefix: &str) -> Result<PathBuf> {
    let root = unique_root(prefix);
    fs::create_dir_all(&root)?;
    Ok(root.join("tree.log"))
}

/// Random insertion order over "p{0..8}-{000..060}".
fn fill(tree: &TBtree, seed: u128) -> Result<BTreeSet<String>> {
    let mut keys: Vec<String> = (0..8)
        .flat_map(|p| (0..60).map(move |i| format!("p{p}-{i:03}")))
        .collect();
    let mut rng = Rand64::new(seed);
    for i in (1..keys.len()).rev() {
        let j = rng.rand_range(0..(i as u64 + 1)) as usize;
        keys.swap(i, j);
    }
    for k in &keys {
        tree.insert(k.as_bytes(), k.as_bytes())?;
    }
    Ok(keys.into_iter().collect())
}

fn scan(snap: &std::sync::Arc<Snapshot>, spec: ReaderSpec) -> Result<Vec<String>> {
    let r = match snap.reader(Some(&spec)) {
        Ok(r) => r,
        Err(TreeError::NoMoreEntries) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for e in r {
        let e = e?;
        assert_eq!(e.key, e.value);
        out.push(String::from_utf8(e.key)?);
    }
    Ok(out)
}

fn check_scans(snap: &std::sync::Arc<Snapshot>, all: &BTreeSet<String>) -> Result<()> {
    // full scans
    let asc = scan(snap, ReaderSpec::ascending(""))?;
    assert_eq!(asc.len(), all.len());
    assert!(asc.windows(2).all(|w| w[0] < w[1]));
    let desc = scan(snap, ReaderSpec::descending("~"))?;
    assert!(desc.windows(2).all(|w| w[0] > w[1]));
    assert_eq!(desc.iter().rev().cloned().collect::<Vec<_>>(), asc);

    // start positions
    let from = scan(snap, ReaderSpec::ascending("p3-0305"))?;
    assert_eq!(from.first().map(String::as_str), Some("p3-031"));
    let upto = scan(snap, ReaderSpec::descending("p3-0305"))?;
    assert_eq!(upto.first().map(String::as_str), Some("p3-030"));

    // prefixes
    for p in ["p0-", "p5-", "p7-05", "p2-059"] {
        let want: Vec<String> = all.iter().filter(|k| k.starts_with(p)).cloned().collect();
        assert_eq!(scan(snap, ReaderSpec::prefix(p, true))?, want, "asc prefix {p}");
        let mut rev = want.clone();
        rev.reverse();
        assert_eq!(scan(snap, ReaderSpec::prefix(p, false))?, rev, "desc prefix {p}");
    }
    for p in ["p9", "p4-9", "a", "p3-0305"] {
        assert!(scan(snap, ReaderSpec::prefix(p, true))?.is_empty(), "asc prefix {p}");
        assert!(scan(snap, ReaderSpec::prefix(p, false))?.is_empty(), "desc prefix {p}");
    }
    Ok(())
}

#[test]
fn scans_over_in_memory_tree() -> Result<()> {
    let tree = TreeBuilder::from_default()
        .max_node_entries(5)
        .sync_on_flush(false)
        .open(log_path("mem")?)?;
    let all = fill(&tree, 42)?;
    let snap = tree.snapshot()?;
    check_scans(&snap, &all)?;
    snap.close()?;
    Ok(())
}

#[test]
fn scans_over_reloaded_tree() -> Result<()> {
    let path = log_path("reload")?;
    let all = {
        let tree = TreeBuilder::from_default()
            .max_node_entries(6)
            .node_cache_size(8)
            .sync_on_flush(false)
            .open(&path)?;
        let all = fill(&tree, 7)?;
        tree.close()?;
        all
    };

    let tree = TreeBuilder::from_default()
        .max_node_entries(6)
        .node_cache_size(8)
        .open(&path)?;
    let snap = tree.snapshot()?;
    check_scans(&snap, &all)?;
    snap.close()?;
    Ok(())
}

#[test]
fn reader_is_not_restartable() -> Result<()> {
    let tree = TreeBuilder::from_default().open(log_path("once")?)?;
    tree.insert(b"a", b"a")?;
    tree.insert(b"b", b"b")?;
    let snap = tree.snapshot()?;
    let mut r = snap.reader(Some(&ReaderSpec::ascending("")))?;
    assert_eq!(r.read()?.key, b"a");
    assert_eq!(r.read()?.key, b"b");
    assert!(matches!(r.read(), Err(TreeError::NoMoreEntries)));
    assert!(matches!(r.read(), Err(TreeError::NoMoreEntries)));
    r.close()?;
    snap.close()?;
    Ok(())
}
