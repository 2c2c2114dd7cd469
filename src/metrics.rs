//! Lightweight global metrics.
//!
//! Thread-safe atomic counters for:
//! - Snapshots / Readers
//! - Serialization (nodes and bytes written)
//! - Node store (resolves, cache hits/misses)
//! - Commit log (flushes, recovered torn tails)

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Snapshots / Readers -----
static SNAPSHOTS_ACTIVE: AtomicU64 = AtomicU64::new(0);
static READERS_ACTIVE: AtomicU64 = AtomicU64::new(0);

// ----- Serialization -----
static NODES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static NODES_SKIPPED: AtomicU64 = AtomicU64::new(0);

// ----- Node store -----
static NODES_RESOLVED: AtomicU64 = AtomicU64::new(0);
static NODE_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static NODE_CACHE_MISSES: AtomicU64 = AtomicU64::new(0);

// ----- Commit log -----
static LOG_FLUSHES: AtomicU64 = AtomicU64::new(0);
static LOG_TORN_TAILS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub snapshots_active: u64,
    pub readers_active: u64,

    pub nodes_written: u64,
    pub bytes_written: u64,
    pub nodes_skipped: u64,

    pub nodes_resolved: u64,
    pub node_cache_hits: u64,
    pub node_cache_misses: u64,

    pub log_flushes: u64,
    pub log_torn_tails: u64,
}

impl MetricsSnapshot {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.node_cache_hits + self.node_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.node_cache_hits as f64 / total as f64
        }
    }
}

fn saturating_dec(c: &AtomicU64) {
    c.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)))
        .ok();
}

// ----- Recorders (Snapshots / Readers) -----
pub fn record_snapshot_begin() {
    SNAPSHOTS_ACTIVE.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_end() {
    saturating_dec(&SNAPSHOTS_ACTIVE);
}

pub fn record_reader_open() {
    READERS_ACTIVE.fetch_add(1, Ordering::Relaxed);
}

pub fn record_reader_close() {
    saturating_dec(&READERS_ACTIVE);
}

// ----- Recorders (Serialization) -----
pub fn record_node_written(bytes: usize) {
    NODES_WRITTEN.fetch_add(1, Ordering::Relaxed);
    BYTES_WRITTEN.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub fn record_node_skipped() {
    NODES_SKIPPED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Node store) -----
pub fn record_node_resolved() {
    NODES_RESOLVED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_cache_hit() {
    NODE_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_cache_miss() {
    NODE_CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Commit log) -----
pub fn record_log_flush() {
    LOG_FLUSHES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_log_torn_tail() {
    LOG_TORN_TAILS.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        snapshots_active: SNAPSHOTS_ACTIVE.load(Ordering::Relaxed),
        readers_active: READERS_ACTIVE.load(Ordering::Relaxed),

        nodes_written: NODES_WRITTEN.load(Ordering::Relaxed),
        bytes_written: BYTES_WRITTEN.load(Ordering::Relaxed),
        nodes_skipped: NODES_SKIPPED.load(Ordering::Relaxed),

        nodes_resolved: NODES_RESOLVED.load(Ordering::Relaxed),
        node_cache_hits: NODE_CACHE_HITS.load(Ordering::Relaxed),
        node_cache_misses: NODE_CACHE_MISSES.load(Ordering::Relaxed),

        log_flushes: LOG_FLUSHES.load(Ordering::Relaxed),
        log_torn_tails: LOG_TORN_TAILS.load(Ordering::Relaxed),
    }
}

/// Current counters rendered as a JSON object.
pub fn snapshot_json() -> String {
    serde_json::to_string(&snapshot()).unwrap_or_else(|_| "{}".to_string())
}

pub fn reset() {
    SNAPSHOTS_ACTIVE.store(0, Ordering::Relaxed);
    READERS_ACTIVE.store(0, Ordering::Relaxed);

    NODES_WRITTEN.store(0, Ordering::Relaxed);
    BYTES_WRITTEN.store(0, Ordering::Relaxed);
    NODES_SKIPPED.store(0, Ordering::Relaxed);

    NODES_RESOLVED.store(0, Ordering::Relaxed);
    NODE_CACHE_HITS.store(0, Ordering::Relaxed);
    NODE_CACHE_MISSES.store(0, Ordering::Relaxed);

    LOG_FLUSHES.store(0, Ordering::Relaxed);
    LOG_TORN_TAILS.store(0, Ordering::Relaxed);
}
