//! LRU cache of resolved nodes, keyed by log offset.
//!
//! Entries are chained through the map by offset (head is most recent). Lookups
//! and inserts are O(1); a capacity of 0 turns the cache off. Hit/miss accounting
//! belongs to the store.

use std::collections::HashMap;

use crate::node::Node;

pub(crate) struct NodeCache {
    cap: usize,
    map: HashMap<u64, Entry>,
    head: Option<u64>, // Most-recently used
    tail: Option<u64>, // Least-recently used
}

struct Entry {
    node: Node,
    prev: Option<u64>,
    next: Option<u64>,
}

impl NodeCache {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            cap,
            map: HashMap::with_capacity(cap.min(1 << 16).max(1)),
            head: None,
            tail: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Node cached at `offset`, promoted to MRU.
    pub(crate) fn get(&mut self, offset: u64) -> Option<Node> {
        if self.cap == 0 {
            return None;
        }
        let node = self.map.get(&offset)?.node.clone();
        self.promote(offset);
        Some(node)
    }

    /// Insert or refresh `offset`, evicting the LRU entry when full.
    pub(crate) fn put(&mut self, offset: u64, node: Node) {
        if self.cap == 0 {
            return;
        }
        if let Some(e) = self.map.get_mut(&offset) {
            e.node = node;
            self.promote(offset);
            return;
        }

        if self.map.len() >= self.cap {
            if let Some(victim) = self.tail {
                self.unlink(victim);
                self.map.remove(&victim);
            }
        }
        self.map.insert(
            offset,
            Entry {
                node,
                prev: None,
                next: None,
            },
        );
        self.push_front(offset);
    }

    // Make `b` follow `a`; None stands for the list ends (head/tail).
    fn link(&mut self, a: Option<u64>, b: Option<u64>) {
        match a.and_then(|a| self.map.get_mut(&a)) {
            Some(e) => e.next = b,
            None => self.head = b,
        }
        match b.and_then(|b| self.map.get_mut(&b)) {
            Some(e) => e.prev = a,
            None => self.tail = a,
        }
    }

    fn unlink(&mut self, offset: u64) {
        if let Some((prev, next)) = self.map.get(&offset).map(|e| (e.prev, e.next)) {
            self.link(prev, next);
        }
    }

    fn push_front(&mut self, offset: u64) {
        let old_head = self.head;
        self.link(None, Some(offset));
        self.link(Some(offset), old_head);
    }

    fn promote(&mut self, offset: u64) {
        if self.head != Some(offset) {
            self.unlink(offset);
            self.push_front(offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::leaf;

    #[test]
    fn evicts_least_recently_used() {
        let mut c = NodeCache::new(2);
        c.put(10, leaf(&["a"], 1));
        c.put(20, leaf(&["b"], 2));
        // touch 10 so that 20 becomes LRU
        assert!(c.get(10).is_some());
        c.put(30, leaf(&["c"], 3));

        assert_eq!(c.len(), 2);
        assert!(c.get(20).is_none());
        assert_eq!(c.get(10).map(|n| n.ts()), Some(1));
        assert_eq!(c.get(30).map(|n| n.ts()), Some(3));
    }

    #[test]
    fn put_refreshes_existing_entry() {
        let mut c = NodeCache::new(2);
        c.put(10, leaf(&["a"], 1));
        c.put(10, leaf(&["a"], 5));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(10).map(|n| n.ts()), Some(5));
    }

    fn order(c: &NodeCache) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = c.head;
        while let Some(off) = cur {
            out.push(off);
            cur = c.map[&off].next;
        }
        out
    }

    #[test]
    fn recency_order_is_kept_consistent() {
        let mut c = NodeCache::new(3);
        for off in [1, 2, 3] {
            c.put(off, leaf(&["a"], off));
        }
        assert_eq!(order(&c), [3, 2, 1]);
        assert!(c.get(2).is_some());
        assert_eq!(order(&c), [2, 3, 1]);
        assert!(c.get(1).is_some());
        assert_eq!(order(&c), [1, 2, 3]);
        assert!(c.get(1).is_some());
        assert_eq!(order(&c), [1, 2, 3]);
        c.put(4, leaf(&["a"], 4));
        assert_eq!(order(&c), [4, 1, 2]);
        assert_eq!(c.tail, Some(2));
        assert!(c.get(7).is_none());
        assert_eq!(order(&c), [4, 1, 2]);
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let mut c = NodeCache::new(0);
        c.put(10, leaf(&["a"], 1));
        assert_eq!(c.len(), 0);
        assert!(c.get(10).is_none());
    }
}
