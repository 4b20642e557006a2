// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

use crate::error::Error;
use crate::node::{Node, NodeId, RawHead, WriterId};
use crate::oplog::Oplog;
use crate::writer::Writer;
use crate::{Clock, WriterKey};
use log::{debug, trace};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Result of one `update` round.
///
/// `indexed ++ tip` is the new view of everything not confirmed before this
/// round, `shared` is how much of the previously returned tip survived at
/// the front of that view, and `popped`/`pushed` describe the reorg: the
/// caller must undo the last `popped` speculative entries it applied, then
/// apply positions `shared..length` of the new view.
#[derive(Clone, Debug)]
pub struct Update {
    pub shared: usize,
    pub popped: usize,
    pub pushed: usize,
    pub length: usize,
    /// Newly majority-confirmed nodes, in final order. Permanent.
    pub indexed: Vec<NodeId>,
    /// Speculative order of everything still unconfirmed. Reorderable.
    pub tip: Vec<NodeId>,
}

impl Update {
    pub fn changed(&self) -> bool {
        self.popped > 0 || self.pushed > 0
    }

    /// Position `i` of the combined `indexed ++ tip` view.
    pub fn get(&self, i: usize) -> Option<NodeId> {
        if i < self.indexed.len() {
            Some(self.indexed[i])
        } else {
            self.tip.get(i - self.indexed.len()).copied()
        }
    }
}

/// The linearizer: ingests nodes from a set of per-participant append-only
/// logs, tracks which causal dependencies are satisfied, and merges the logs
/// into one deterministic sequence by recursive majority vote among a
/// designated set of indexer writers.
///
/// All state lives in per-writer node buffers addressed by `NodeId` handles;
/// the structure is purely in-memory and synchronous, with the sole suspend
/// point at the `Oplog` boundary (`ensure_next` returning `None`). The
/// surrounding driver is responsible for serializing calls; two overlapping
/// `update` passes are never meaningful.
pub struct Linearizer<T, L> {
    writers: Vec<Writer<T, L>>,
    ids: BTreeMap<WriterKey, WriterId>,
    pub(crate) indexers: Vec<WriterId>,
    heads: Vec<NodeId>,
    tails: Vec<NodeId>,
    tip: Vec<NodeId>,
    indexed_clock: Clock,
}

impl<T, L> Linearizer<T, L> {
    pub fn new() -> Self {
        Linearizer {
            writers: Vec::new(),
            ids: BTreeMap::new(),
            indexers: Vec::new(),
            heads: Vec::new(),
            tails: Vec::new(),
            tip: Vec::new(),
            indexed_clock: Clock::new(),
        }
    }

    /// Register a writer whose log starts empty or fully pending.
    pub fn add_writer(&mut self, key: WriterKey, log: L) -> Result<WriterId, Error> {
        self.add_writer_at(key, log, 0)
    }

    /// Register a writer whose first `indexed` entries were already
    /// confirmed in an earlier run; materialization resumes after them and
    /// raw heads pointing below the offset resolve as causally satisfied.
    pub fn add_writer_at(&mut self, key: WriterKey, log: L, indexed: u64) -> Result<WriterId, Error> {
        if self.ids.contains_key(&key) {
            return Err(Error::DuplicateWriter(key));
        }
        let id = WriterId(self.writers.len());
        self.writers.push(Writer::new(id, key, log, indexed));
        self.ids.insert(key, id);
        if indexed > 0 {
            self.indexed_clock.observe(key, indexed);
        }
        debug!("registered writer {:?} at offset {}", key, indexed);
        Ok(id)
    }

    /// Replace the set of writers whose heads count toward the majority.
    /// Takes effect atomically for every subsequent vote; already-indexed
    /// nodes are unaffected, speculative ordering is re-derived on the next
    /// `update`.
    pub fn set_indexers(&mut self, keys: &[WriterKey]) -> Result<(), Error> {
        let mut indexers = Vec::with_capacity(keys.len());
        for key in keys {
            match self.ids.get(key) {
                Some(&id) => indexers.push(id),
                None => return Err(Error::UnknownWriter(*key)),
            }
        }
        debug!("indexer set now {} writers", indexers.len());
        self.indexers = indexers;
        Ok(())
    }

    /// Votes required to confirm a node.
    pub fn majority(&self) -> usize {
        self.indexers.len() / 2 + 1
    }

    pub fn writer_id(&self, key: &WriterKey) -> Option<WriterId> {
        self.ids.get(key).copied()
    }

    pub fn writer(&self, id: WriterId) -> &Writer<T, L> {
        &self.writers[id.0]
    }

    pub fn writer_mut(&mut self, id: WriterId) -> &mut Writer<T, L> {
        &mut self.writers[id.0]
    }

    pub fn writers(&self) -> impl Iterator<Item = &Writer<T, L>> {
        self.writers.iter()
    }

    pub fn indexer_keys(&self) -> impl Iterator<Item = &WriterKey> {
        self.indexers.iter().map(move |id| self.key_of(*id))
    }

    /// Current DAG frontier: nodes not yet superseded by a tracked dependent.
    pub fn heads(&self) -> &[NodeId] {
        &self.heads
    }

    /// Nodes whose dependencies are all confirmed; the candidates for the
    /// next position in the merged order.
    pub fn tails(&self) -> &[NodeId] {
        &self.tails
    }

    /// Speculative ordering as of the last `update`.
    pub fn tip(&self) -> &[NodeId] {
        &self.tip
    }

    /// Count of speculative (unconfirmed) nodes as of the last `update`.
    pub fn size(&self) -> usize {
        self.tip.len()
    }

    /// Low-water mark of confirmed positions per writer.
    pub fn indexed_clock(&self) -> &Clock {
        &self.indexed_clock
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<T>> {
        self.writers.get(id.writer.0)?.get_cached(id.length)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.writers.get_mut(id.writer.0)?.get_cached_mut(id.length)
    }

    pub(crate) fn key_of(&self, id: WriterId) -> &WriterKey {
        &self.writers[id.0].key
    }

    pub(crate) fn head_id(&self, id: WriterId) -> Option<NodeId> {
        self.writers[id.0].head().map(|n| n.id())
    }

    /// Replica-stable order: writer key first, then position.
    pub(crate) fn node_order(&self, a: NodeId, b: NodeId) -> Ordering {
        self.key_of(a.writer)
            .compare(self.key_of(b.writer))
            .then(a.length.cmp(&b.length))
    }

    /// Append a value to `writer`'s log, linked to the current frontier.
    /// This is the only path by which the local participant extends the DAG;
    /// the new node still has to be registered with `add_head`.
    ///
    /// `batch` is the atomic-append countdown; plain appends pass `1`.
    pub fn append(&mut self, writer: WriterId, value: Option<T>, batch: u32) -> NodeId {
        let length = self.writers[writer.0].length() + 1;
        let id = NodeId::new(writer, length);

        let heads = self.heads.clone();
        let mut raw_heads = Vec::with_capacity(heads.len());
        let mut dependencies = Vec::with_capacity(heads.len());
        let mut clock = Clock::new();

        for head in heads {
            raw_heads.push(RawHead {
                key: *self.key_of(head.writer),
                length: head.length,
            });
            match self.node(head) {
                Some(dep) if !dep.is_yielded() => {
                    dependencies.push(head);
                    // union the dependency clock, skipping contributions
                    // already implied by the indexed low-water mark
                    for (key, &len) in dep.clock().iter() {
                        if clock.get(key) < len && self.indexed_clock.get(key) < len {
                            clock.set(*key, len);
                        }
                    }
                }
                // a yielded head stays in the durable causal record but
                // contributes no live edge
                _ => {}
            }
        }

        clock.set(*self.key_of(writer), length);

        let mut node = Node::new(id, value, raw_heads, batch);
        node.dependencies = dependencies;
        node.clock = clock;
        self.writers[writer.0].nodes.push(node);
        trace!("appended {:?}", id);
        id
    }

    /// Register a materialized node with the shared frontier: supersede any
    /// head its clock covers, prune dependencies that were confirmed in the
    /// meantime, wire up dependent back-edges, and promote the node to a
    /// tail if nothing unconfirmed remains beneath it.
    pub fn add_head(&mut self, id: NodeId) {
        debug_assert!(!self.heads.contains(&id), "node registered twice");
        let (clock, dependencies) = match self.node(id) {
            Some(node) => (node.clock().clone(), node.dependencies().to_vec()),
            None => return,
        };

        let mut i = 0;
        while i < self.heads.len() {
            let head = self.heads[i];
            let head_key = *self.key_of(head.writer);
            if clock.get(&head_key) >= head.length {
                self.heads.swap_remove(i);
            } else {
                i += 1;
            }
        }

        let mut kept = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            let live = matches!(self.node(dep), Some(d) if !d.is_yielded());
            if live {
                kept.push(dep);
                if let Some(d) = self.node_mut(dep) {
                    d.dependents.push(id);
                }
            }
        }
        let is_tail = kept.is_empty();
        if let Some(node) = self.node_mut(id) {
            node.dependencies = kept;
        }
        if is_tail {
            self.tails.push(id);
        }
        self.heads.push(id);
        trace!("head {:?}, {} tails", id, self.tails.len());
    }

    /// Confirm the current majority winner among the tails, if any.
    ///
    /// `None` either because no tail has reached `majority()` yet (the
    /// normal state while too few indexer heads are visible) or because
    /// there is nothing to confirm. Confirmed nodes are permanent.
    fn try_shift(&mut self) -> Option<NodeId> {
        if self.tails.is_empty() || self.indexers.is_empty() {
            return None;
        }
        let none_removed = Clock::new();
        let election = self.election(&self.tails, &none_removed);
        let winner = election.winner()?;
        if election.confirms[winner] < self.majority() {
            return None;
        }
        let id = election.candidates[winner];
        self.confirm(id);
        Some(id)
    }

    fn confirm(&mut self, id: NodeId) {
        if let Some(pos) = self.tails.iter().position(|t| *t == id) {
            self.tails.swap_remove(pos);
        }
        let key = *self.key_of(id.writer);
        self.indexed_clock.observe(key, id.length);

        let dependents = match self.node_mut(id) {
            Some(node) => {
                node.yielded = true;
                std::mem::take(&mut node.dependents)
            }
            None => Vec::new(),
        };
        for dep_id in dependents {
            let promoted = match self.node_mut(dep_id) {
                Some(dep) => {
                    if let Some(pos) = dep.dependencies.iter().position(|d| *d == id) {
                        dep.dependencies.swap_remove(pos);
                    }
                    dep.dependencies.is_empty() && !dep.yielded
                }
                None => false,
            };
            if promoted {
                self.tails.push(dep_id);
            }
        }
        debug!("indexed {:?}", id);
    }

    /// Order everything still outstanding by repeatedly taking the election
    /// winner among the tails, majority or not, draining through a removal
    /// overlay so real graph state is untouched.
    fn compute_tip(&self) -> Vec<NodeId> {
        let mut tails = self.tails.clone();
        let mut removed = Clock::new();
        let mut tip = Vec::new();

        while !tails.is_empty() {
            let election = self.election(&tails, &removed);
            let winner = match election.winner() {
                Some(winner) => winner,
                None => break,
            };
            let id = election.candidates[winner];
            if let Some(pos) = tails.iter().position(|t| *t == id) {
                tails.swap_remove(pos);
            }
            removed.observe(*self.key_of(id.writer), id.length);
            tip.push(id);

            let dependents = match self.node(id) {
                Some(node) => node.dependents().to_vec(),
                None => Vec::new(),
            };
            for dep in dependents {
                if tails.contains(&dep) || tip.contains(&dep) {
                    continue;
                }
                let ready = match self.node(dep) {
                    Some(d) if !d.is_yielded() => d
                        .dependencies()
                        .iter()
                        .all(|x| x.length <= removed.get(self.key_of(x.writer))),
                    _ => false,
                };
                if ready {
                    tails.push(dep);
                }
            }
        }
        tip
    }

    /// One synchronous merge round: drain every majority-confirmable tail
    /// into `indexed`, recompute the speculative tip, and report the diff
    /// against the previous tip.
    ///
    /// Recomputation from the same graph state always produces the same
    /// result, so an interrupted round can simply be rerun.
    pub fn update(&mut self) -> Update {
        let mut indexed = Vec::new();
        while let Some(id) = self.try_shift() {
            indexed.push(id);
        }
        let tip = self.compute_tip();

        let mut shared = 0;
        while shared < self.tip.len() {
            let fresh = if shared < indexed.len() {
                Some(indexed[shared])
            } else {
                tip.get(shared - indexed.len()).copied()
            };
            if fresh == Some(self.tip[shared]) {
                shared += 1;
            } else {
                break;
            }
        }

        let popped = self.tip.len() - shared;
        let length = indexed.len() + tip.len();
        let pushed = length - shared;
        if popped > 0 {
            debug!("reorg: popped {} pushed {}", popped, pushed);
        }
        self.tip = tip.clone();
        Update {
            shared,
            popped,
            pushed,
            length,
            indexed,
            tip,
        }
    }

    /// Whether `writer` (an indexer) should append a no-op acknowledgement:
    /// value-bearing nodes are pending and the writer's head does not yet
    /// causally cover the frontier, so a fresh head would advance
    /// confirmation. Pure-ack residue pending on its own never asks for
    /// more acks, letting an idle cluster quiesce.
    pub fn should_ack(&self, writer: WriterId) -> bool {
        if !self.indexers.contains(&writer) {
            return false;
        }
        if !self.writers.iter().any(|w| w.has_valued_pending()) {
            return false;
        }
        match self.head_id(writer) {
            None => true,
            Some(head) => {
                let clock = match self.node(head) {
                    Some(node) => node.clock().clone(),
                    None => return true,
                };
                self.heads
                    .iter()
                    .any(|h| clock.get(self.key_of(h.writer)) < h.length)
            }
        }
    }

    /// Count of buffered nodes not yet confirmed, across all writers.
    pub fn pending(&self) -> usize {
        self.writers.iter().map(|w| w.pending()).sum()
    }
}

impl<T, L: Oplog<T>> Linearizer<T, L> {
    /// Materialize `writer`'s next raw entry into a fully linked node,
    /// staging it for `advance`. Cooperative: answers `None` when the log
    /// has no further entry locally, when an atomic batch is only partially
    /// visible, or when a causal dependency is not yet resolvable; callers
    /// retry after more data arrives. Resolution progress is retained
    /// across retries.
    pub fn ensure_next(&mut self, writer: WriterId) -> Option<NodeId> {
        if let Some(node) = &self.writers[writer.0].next {
            return Some(node.id());
        }
        {
            let w = &self.writers[writer.0];
            if w.log.len() == 0 || w.length() >= w.log.len() {
                return None;
            }
        }

        // Pull raw entries until the cached batch ends at its terminal
        // `batch == 1` entry; interior entries must not surface alone.
        loop {
            let w = &mut self.writers[writer.0];
            if matches!(w.next_cache.back(), Some(last) if last.batch() == 1) {
                break;
            }
            let seq = w.length() + w.next_cache.len() as u64;
            let raw = match w.log.get(seq) {
                Some(raw) => raw,
                None => return None,
            };
            let id = NodeId::new(writer, seq + 1);
            w.next_cache
                .push_back(Node::new(id, raw.value, raw.heads, raw.batch));
        }

        let mut node = match self.writers[writer.0].next_cache.pop_front() {
            Some(node) => node,
            None => return None,
        };
        if self.resolve(&mut node) {
            node.clock.set(*self.key_of(writer), node.id.length);
            let id = node.id;
            self.writers[writer.0].next = Some(node);
            Some(id)
        } else {
            self.writers[writer.0].next_cache.push_front(node);
            None
        }
    }

    /// Resolve every raw head of `node` into a dependency handle. `false`
    /// means a referenced writer is unknown or has not materialized far
    /// enough yet; partially-resolved progress stays on the node.
    fn resolve(&self, node: &mut Node<T>) -> bool {
        while node.dependencies.len() < node.raw_heads.len() {
            let at = node.dependencies.len();
            let raw = node.raw_heads[at];
            let head_writer = match self.writer_id(&raw.key) {
                Some(writer) => writer,
                None => return false,
            };
            if self.writers[head_writer.0].length() < raw.length {
                return false;
            }
            match self.node(NodeId::new(head_writer, raw.length)) {
                None => {
                    // Already confirmed and shifted: the reference is
                    // causally satisfied, drop the edge.
                    node.raw_heads.swap_remove(at);
                }
                Some(dep) => {
                    node.dependencies.push(dep.id());
                    if !dep.is_yielded() {
                        for (key, &len) in dep.clock().iter() {
                            if node.clock.get(key) < len && self.indexed_clock.get(key) < len {
                                node.clock.set(*key, len);
                            }
                        }
                    }
                }
            }
        }
        true
    }

    /// Convenience passthrough to `Writer::advance`.
    pub fn advance(&mut self, writer: WriterId) -> Option<NodeId> {
        self.writers[writer.0].advance()
    }
}

impl<T: Clone, L: Oplog<T>> Linearizer<T, L> {
    /// Persist `writer`'s locally-produced nodes that its log has not seen
    /// yet; returns how many entries were appended.
    pub fn flush(&mut self, writer: WriterId) -> usize {
        self.writers[writer.0].flush_to_log()
    }
}

impl<T, L> Default for Linearizer<T, L> {
    fn default() -> Self {
        Self::new()
    }
}
