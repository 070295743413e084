//! Deferred error log for construction batches.
//!
//! While a batch is open, expressions that fail link their error here
//! instead of reporting it. When the outermost batch ends the owner drains
//! the chain head-first and reports each entry once.
//!
//! The log stores keys only. The error payload stays with its owner, which
//! guarantees at most one entry per owner.
//!
//! Unlinking leaves a tombstone in the chain: the entry's sequence number no
//! longer matches the live one, and draining skips it. The chain is
//! compacted once tombstones outnumber live entries.
//!
//! ```text
//! log.begin_batch();
//! log.add_error(a);          // linked
//! log.add_error(a);          // already linked, still true
//! if log.end_batch() {
//!     while let Some(key) = log.pop_head() { report(key) }
//! }
//! ```

use std::hash::Hash;

use rustc_hash::FxHashMap;

/// Chain of owners whose errors are waiting for the current batch to end.
#[derive(Clone, Debug)]
pub struct DeferredErrorLog<K> {
    /// Nesting depth of open construction batches.
    in_progress: usize,
    /// Linked keys with their link sequence; the last element is the head.
    chain: Vec<(K, u64)>,
    /// Live key to the sequence of its current chain entry.
    linked: FxHashMap<K, u64>,
    next_seq: u64,
}

impl<K: Copy + Eq + Hash> DeferredErrorLog<K> {
    pub fn new() -> Self {
        DeferredErrorLog {
            in_progress: 0,
            chain: Vec::new(),
            linked: FxHashMap::default(),
            next_seq: 0,
        }
    }

    /// Open a (possibly nested) batch. Returns the new depth.
    pub fn begin_batch(&mut self) -> usize {
        self.in_progress += 1;
        self.in_progress
    }

    /// Close one batch level.
    ///
    /// Returns `true` when the outermost batch just ended and the chain
    /// should be drained with [`pop_head`](Self::pop_head).
    pub fn end_batch(&mut self) -> bool {
        debug_assert!(self.in_progress > 0, "end_batch without begin_batch");
        self.in_progress = self.in_progress.saturating_sub(1);
        self.in_progress == 0
    }

    /// Whether a batch is currently open.
    #[inline]
    pub fn in_batch(&self) -> bool {
        self.in_progress > 0
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.in_progress
    }

    /// Link `key` at the head of the chain.
    ///
    /// Returns `false` (and links nothing) when no batch is open, so the
    /// caller must report the error itself. Returns `true` when the key was
    /// linked now or was already linked.
    pub fn add_error(&mut self, key: K) -> bool {
        if self.in_progress == 0 {
            return false;
        }
        if !self.linked.contains_key(&key) {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.linked.insert(key, seq);
            self.chain.push((key, seq));
        }
        true
    }

    /// Unlink `key`. Safe to call when it is not linked.
    pub fn remove_error(&mut self, key: K) {
        if self.linked.remove(&key).is_none() {
            return;
        }
        if self.linked.is_empty() {
            self.chain.clear();
        } else if self.chain.len() > 2 * self.linked.len() {
            let linked = &self.linked;
            self.chain.retain(|(k, seq)| linked.get(k) == Some(seq));
        }
    }

    #[inline]
    pub fn is_linked(&self, key: K) -> bool {
        self.linked.contains_key(&key)
    }

    /// Unlink and return the head of the chain (most recently linked first).
    pub fn pop_head(&mut self) -> Option<K> {
        while let Some((key, seq)) = self.chain.pop() {
            if self.linked.get(&key) == Some(&seq) {
                self.linked.remove(&key);
                return Some(key);
            }
        }
        None
    }

    /// Number of linked entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.linked.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.linked.is_empty()
    }
}

impl<K: Copy + Eq + Hash> Default for DeferredErrorLog<K> {
    fn default() -> Self {
        Self::new()
    }
}
