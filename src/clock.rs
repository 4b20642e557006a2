// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

use crate::WriterKey;
use im::OrdMap;

/// A causal clock: for each writer key, the highest 1-based sequence length
/// of that writer's log observed so far. Entries never decrease along any
/// writer's own chain of nodes.
///
/// Every node carries one of these, so clones are frequent; the persistent
/// `im::OrdMap` makes a clone a pointer copy with structural sharing, and its
/// key-ordered iteration keeps everything downstream of a clock walk
/// deterministic across replicas.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Clock {
    seen: OrdMap<WriterKey, u64>,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            seen: OrdMap::new(),
        }
    }

    /// Observed length for `key`, zero if the writer is absent.
    pub fn get(&self, key: &WriterKey) -> u64 {
        self.seen.get(key).copied().unwrap_or(0)
    }

    pub fn has(&self, key: &WriterKey) -> bool {
        self.seen.contains_key(key)
    }

    /// Unconditional store, mirroring a writer stamping its own entry.
    pub fn set(&mut self, key: WriterKey, length: u64) {
        self.seen.insert(key, length);
    }

    /// Monotonic store: only ever raises the entry for `key`.
    pub fn observe(&mut self, key: WriterKey, length: u64) {
        if self.get(&key) < length {
            self.seen.insert(key, length);
        }
    }

    /// Pointwise maximum with `other`.
    pub fn merge(&mut self, other: &Clock) {
        for (key, &length) in other.iter() {
            self.observe(*key, length);
        }
    }

    /// Number of distinct writers represented.
    pub fn size(&self) -> usize {
        self.seen.len()
    }

    /// Sum of all entries: a node-count metric over everything observed.
    pub fn length(&self) -> u64 {
        self.seen.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Iterate `(key, length)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&WriterKey, &u64)> {
        self.seen.iter()
    }
}
