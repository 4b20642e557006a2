// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

use crate::node::{Node, NodeId, WriterId};
use crate::oplog::{Oplog, RawEntry};
use crate::WriterKey;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Sliding window over one writer's not-yet-shifted nodes.
///
/// Positions are absolute 1-based sequence lengths; the buffer remembers how
/// many nodes have already been shifted out (`offset`) so lookups below the
/// window answer `None`, the caller-visible signature of a node that was
/// confirmed and released.
#[derive(Debug)]
pub(crate) struct NodeBuffer<T> {
    nodes: VecDeque<Node<T>>,
    offset: u64,
}

impl<T> NodeBuffer<T> {
    pub(crate) fn new(offset: u64) -> Self {
        NodeBuffer {
            nodes: VecDeque::new(),
            offset,
        }
    }

    /// Absolute materialized length: shifted prefix plus buffered window.
    pub(crate) fn length(&self) -> u64 {
        self.offset + self.nodes.len() as u64
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn push(&mut self, node: Node<T>) {
        debug_assert_eq!(node.id.length, self.length() + 1);
        self.nodes.push_back(node);
    }

    pub(crate) fn get(&self, length: u64) -> Option<&Node<T>> {
        if length <= self.offset || length > self.length() {
            return None;
        }
        self.nodes.get((length - self.offset - 1) as usize)
    }

    pub(crate) fn get_mut(&mut self, length: u64) -> Option<&mut Node<T>> {
        if length <= self.offset || length > self.length() {
            return None;
        }
        self.nodes.get_mut((length - self.offset - 1) as usize)
    }

    pub(crate) fn last(&self) -> Option<&Node<T>> {
        self.nodes.back()
    }

    pub(crate) fn shift(&mut self) -> Option<Node<T>> {
        let node = self.nodes.pop_front()?;
        self.offset += 1;
        Some(node)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.iter()
    }
}

/// One participant's log as the linearizer sees it: the durable `Oplog`
/// underneath, the window of materialized-but-unconfirmed nodes, and the
/// staging slots used while turning raw entries into linked DAG nodes.
///
/// Operations that only touch this writer's own buffer live here; anything
/// that has to resolve references across writers (`append`, `ensure_next`)
/// is a `Linearizer` method taking this writer's `WriterId`.
#[derive(Debug)]
pub struct Writer<T, L> {
    pub(crate) id: WriterId,
    pub(crate) key: WriterKey,
    pub(crate) log: L,
    pub(crate) nodes: NodeBuffer<T>,
    /// Fully resolved node awaiting `advance` into the buffer.
    pub(crate) next: Option<Node<T>>,
    /// Raw-materialized entries of the batch currently being resolved.
    pub(crate) next_cache: VecDeque<Node<T>>,
}

impl<T, L> Writer<T, L> {
    pub(crate) fn new(id: WriterId, key: WriterKey, log: L, indexed: u64) -> Self {
        Writer {
            id,
            key,
            log,
            nodes: NodeBuffer::new(indexed),
            next: None,
            next_cache: VecDeque::new(),
        }
    }

    pub fn id(&self) -> WriterId {
        self.id
    }

    pub fn key(&self) -> &WriterKey {
        &self.key
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    /// Absolute count of nodes materialized so far (shifted or buffered).
    pub fn length(&self) -> u64 {
        self.nodes.length()
    }

    /// Count of nodes already shifted out as confirmed.
    pub fn offset(&self) -> u64 {
        self.nodes.offset()
    }

    /// Latest materialized node, if any is still buffered.
    pub fn head(&self) -> Option<&Node<T>> {
        self.nodes.last()
    }

    /// O(1) lookup by absolute 1-based sequence length. `None` for
    /// already-shifted (yielded) and not-yet-materialized positions alike.
    pub fn get_cached(&self, length: u64) -> Option<&Node<T>> {
        self.nodes.get(length)
    }

    pub(crate) fn get_cached_mut(&mut self, length: u64) -> Option<&mut Node<T>> {
        self.nodes.get_mut(length)
    }

    /// Remove and return the oldest buffered node once it has been
    /// confirmed, advancing the shifted offset.
    pub fn shift(&mut self) -> Option<Node<T>> {
        let node = self.nodes.shift()?;
        debug_assert!(node.yielded, "shifting a node that was never confirmed");
        Some(node)
    }

    /// Move the staged `next` node into the buffer, handing back its handle
    /// for registration with `Linearizer::add_head`.
    pub fn advance(&mut self) -> Option<NodeId> {
        let node = self.next.take()?;
        let id = node.id;
        self.nodes.push(node);
        Some(id)
    }

    /// Total order over writers by identity key; the ultimate deterministic
    /// tie-break substrate.
    pub fn compare(&self, other: &Writer<T, L>) -> Ordering {
        self.key.compare(&other.key)
    }

    pub(crate) fn pending(&self) -> usize {
        self.nodes.iter().filter(|n| !n.yielded).count()
    }

    pub(crate) fn has_valued_pending(&self) -> bool {
        self.nodes.iter().any(|n| !n.yielded && n.value.is_some())
    }
}

impl<T: Clone, L: Oplog<T>> Writer<T, L> {
    /// Persist locally-produced nodes the underlying log has not seen yet.
    /// Buffered nodes must not be shifted before they are flushed.
    pub(crate) fn flush_to_log(&mut self) -> usize {
        let mut entries = Vec::new();
        let mut seq = self.log.len() + 1;
        while seq <= self.nodes.length() {
            match self.nodes.get(seq) {
                Some(node) => entries.push(RawEntry {
                    value: node.value.clone(),
                    heads: node.raw_heads.clone(),
                    batch: node.batch,
                }),
                None => break,
            }
            seq += 1;
        }
        let flushed = entries.len();
        if flushed > 0 {
            self.log.append(entries);
        }
        flushed
    }
}
