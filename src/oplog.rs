// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

use crate::RawHead;
use serde::{Deserialize, Serialize};

/// One record of a writer's durable append-only log, as the core consumes
/// it: the opaque payload (absent for acknowledgement entries), the causal
/// heads the producer observed when appending, and the atomic-batch
/// countdown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry<T> {
    pub value: Option<T>,
    pub heads: Vec<RawHead>,
    pub batch: u32,
}

/// The underlying per-writer append-only log abstraction.
///
/// Durability, replication transport and wire encoding all live behind this
/// trait; the core only ever asks four things of it. `get` answering `None`
/// for an in-range position means "not replicated here yet" and is the
/// suspend signal for cooperative materialization: callers retry later,
/// there is no blocking wait at this layer.
pub trait Oplog<T> {
    /// Number of entries present, as far as this replica knows.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the entry at 0-based `seq` is locally available.
    fn has(&self, seq: u64) -> bool;

    /// Random access by 0-based position; `None` if not yet available.
    fn get(&self, seq: u64) -> Option<RawEntry<T>>;

    /// Extend the log. Only ever invoked for the local participant's own
    /// log, via `Linearizer::flush`.
    fn append(&mut self, entries: Vec<RawEntry<T>>);
}

/// Trivial in-memory `Oplog`. The tests build whole clusters out of these;
/// embedding applications mostly bring their own storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryLog<T> {
    entries: Vec<RawEntry<T>>,
}

impl<T> MemoryLog<T> {
    pub fn new() -> Self {
        MemoryLog {
            entries: Vec::new(),
        }
    }
}

impl<T: Clone> Oplog<T> for MemoryLog<T> {
    fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    fn has(&self, seq: u64) -> bool {
        seq < self.entries.len() as u64
    }

    fn get(&self, seq: u64) -> Option<RawEntry<T>> {
        self.entries.get(seq as usize).cloned()
    }

    fn append(&mut self, entries: Vec<RawEntry<T>>) {
        self.entries.extend(entries);
    }
}
