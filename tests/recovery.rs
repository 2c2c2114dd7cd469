// tests/recovery.rs
//
// Covers:
// 1) Reopen after close: all keys and the ts counter come back.
// 2) Garbage behind the last root is cut off on open.
// 3) A flush torn in the middle falls back to the previous root.
// 4) A second open of a locked log fails.
// 5) History of a key with keep_history on; reloaded trees only know the latest version.
// 6) A root record without children is not accepted as a root.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use tbtree::consts::{LOG_HDR_SIZE, LOG_MAGIC, LOG_VERSION, ROOT_INNER_NODE_TYPE};
use tbtree::{TBtree, TreeBuilder, TreeError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tbtest-rec-{prefix}-{pid}-{t}-{id}"))
}

fn log_path(prefix: &str) -> Result<PathBuf> {
    let root = unique_root(prefix);
    fs::create_dir_all(&root)?;
    Ok(root.join("tree.log"))
}

fn open(path: &PathBuf) -> Result<TBtree> {
    Ok(TreeBuilder::from_default()
        .max_node_entries(8)
        .sync_on_flush(false)
        .open(path)?)
}

fn key(i: u32) -> Vec<u8> {
    format!("key-{i:05}").into_bytes()
}

#[test]
fn reopen_restores_keys_and_ts() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = log_path("reopen")?;
    {
        let tree = open(&path)?;
        for i in 0..500 {
            tree.insert(&key(i), &i.to_be_bytes())?;
        }
        tree.close()?;
    }

    let tree = open(&path)?;
    assert_eq!(tree.ts()?, 500);
    for i in 0..500 {
        assert_eq!(tree.get(&key(i))?, (i.to_be_bytes().to_vec(), i as u64 + 1));
    }
    assert_eq!(tree.insert(b"next", b"x")?, 501);
    Ok(())
}

#[test]
fn garbage_tail_is_truncated() -> Result<()> {
    let path = log_path("garbage")?;
    let clean_len = {
        let tree = open(&path)?;
        for i in 0..100 {
            tree.insert(&key(i), b"v")?;
        }
        tree.close()?;
        tree.log_len()
    };
    {
        let mut f = OpenOptions::new().append(true).open(&path)?;
        f.write_all(&[0xAB; 37])?;
    }
    assert_eq!(fs::metadata(&path)?.len(), clean_len + 37);

    let tree = open(&path)?;
    assert_eq!(tree.log_len(), clean_len);
    assert_eq!(fs::metadata(&path)?.len(), clean_len);
    assert_eq!(tree.ts()?, 100);
    assert_eq!(tree.get(&key(99))?.0, b"v");
    Ok(())
}

#[test]
fn torn_flush_falls_back_to_previous_root() -> Result<()> {
    let path = log_path("torn")?;
    let (first_len, second_len) = {
        let tree = open(&path)?;
        for i in 0..100 {
            tree.insert(&key(i), b"first")?;
        }
        tree.flush()?;
        let first_len = tree.log_len();
        for i in 100..150 {
            tree.insert(&key(i), b"second")?;
        }
        tree.flush()?;
        let second_len = tree.log_len();
        tree.close()?;
        (first_len, second_len)
    };
    assert!(second_len > first_len);

    // cut the second flush short, as a crash mid-append would
    let f = OpenOptions::new().write(true).open(&path)?;
    f.set_len(second_len - 7)?;
    drop(f);

    let tree = open(&path)?;
    assert_eq!(tree.log_len(), first_len);
    assert_eq!(tree.ts()?, 100);
    assert_eq!(tree.get(&key(42))?.0, b"first");
    assert!(matches!(tree.get(&key(120)), Err(TreeError::KeyNotFound)));

    // appends continue from the recovered root
    tree.insert(&key(120), b"again")?;
    tree.close()?;
    let tree = open(&path)?;
    assert_eq!(tree.get(&key(120))?, (b"again".to_vec(), 101));
    Ok(())
}

#[test]
fn second_open_is_refused() -> Result<()> {
    let path = log_path("locked")?;
    let tree = open(&path)?;
    assert!(matches!(open_err(&path), Some(TreeError::Io(_))));
    tree.close()?;
    drop(tree);
    let _again = open(&path)?;
    Ok(())
}

fn open_err(path: &PathBuf) -> Option<TreeError> {
    TreeBuilder::from_default().open(path).err()
}

#[test]
fn history_of_a_key() -> Result<()> {
    let path = log_path("history")?;
    let ts3 = {
        let tree = TreeBuilder::from_default()
            .max_node_entries(4)
            .keep_history(true)
            .sync_on_flush(false)
            .open(&path)?;
        tree.insert(b"k", b"v1")?;
        for i in 0..40 {
            tree.insert(&key(i), b"filler")?;
        }
        tree.insert(b"k", b"v2")?;
        for i in 40..80 {
            tree.insert(&key(i), b"filler")?;
        }
        let ts3 = tree.insert(b"k", b"v3")?;

        let snap = tree.snapshot()?;
        let h = snap.history(b"k", 10)?;
        let values: Vec<&[u8]> = h.iter().map(|(v, _)| v.as_slice()).collect();
        let want: [&[u8]; 3] = [b"v3", b"v2", b"v1"];
        assert_eq!(values, want);
        assert_eq!(h[0].1, ts3);
        assert_eq!(h[2].1, 1);
        assert!(h.windows(2).all(|w| w[0].1 > w[1].1));
        assert_eq!(snap.history(b"k", 2)?.len(), 2);
        snap.close()?;
        tree.close()?;
        ts3
    };

    let tree = open(&path)?;
    let snap = tree.snapshot()?;
    assert_eq!(snap.history(b"k", 10)?, vec![(b"v3".to_vec(), ts3)]);
    snap.close()?;
    Ok(())
}

#[test]
fn childless_root_record_is_discarded() -> Result<()> {
    let path = log_path("childless")?;
    {
        let mut f = OpenOptions::new().create(true).write(true).open(&path)?;
        f.write_all(LOG_MAGIC)?;
        f.write_all(&LOG_VERSION.to_be_bytes())?;
        f.write_all(&0u32.to_be_bytes())?;
        // [tag][size 13][count 0][size mirror 13]
        f.write_all(&[ROOT_INNER_NODE_TYPE])?;
        f.write_all(&13u32.to_be_bytes())?;
        f.write_all(&0u32.to_be_bytes())?;
        f.write_all(&13u32.to_be_bytes())?;
    }

    let tree = open(&path)?;
    assert_eq!(tree.log_len(), LOG_HDR_SIZE as u64);
    assert_eq!(tree.ts()?, 0);
    assert!(matches!(tree.get(b"x"), Err(TreeError::KeyNotFound)));
    assert_eq!(tree.insert(b"x", b"y")?, 1);
    assert_eq!(tree.get(b"x")?, (b"y".to_vec(), 1));
    tree.close()?;
    Ok(())
}
