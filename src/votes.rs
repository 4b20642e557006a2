// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

use crate::linearizer::Linearizer;
use crate::node::NodeId;
use crate::Clock;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};

/// Outcome of one majority-vote evaluation over a set of candidate tails.
///
/// `candidates` is sorted by writer key (then length), so any "first slot
/// wins" scan below resolves ties toward the lower key, which is the deterministic
/// tie-break every replica must agree on.
pub(crate) struct Election {
    pub(crate) candidates: Vec<NodeId>,
    /// Per candidate: indexer heads whose vote resolved to it.
    pub(crate) confirms: Vec<usize>,
    /// Per candidate: accumulated sub-tally mass across the indexer heads.
    pub(crate) support: Vec<u64>,
}

impl Election {
    /// Winning slot by (confirms desc, support desc, writer key asc).
    /// `None` only when there are no candidates at all.
    pub(crate) fn winner(&self) -> Option<usize> {
        if self.candidates.is_empty() {
            return None;
        }
        let mut best = 0;
        for i in 1..self.candidates.len() {
            if (self.confirms[i], self.support[i]) > (self.confirms[best], self.support[best]) {
                best = i;
            }
        }
        Some(best)
    }
}

/// One in-flight frame of the explicit vote walk.
struct Frame {
    id: NodeId,
    children: Vec<NodeId>,
    next: usize,
    tally: Vec<u64>,
}

impl Frame {
    fn new(id: NodeId, children: Vec<NodeId>, slots: usize) -> Self {
        Frame {
            id,
            children,
            next: 0,
            tally: vec![0; slots],
        }
    }
}

/// Highest tally slot, first (lowest-key) slot on ties; `None` when the
/// tally is all zero and the node therefore expresses no preference.
fn best_slot(tally: &[u64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &count) in tally.iter().enumerate() {
        if count == 0 {
            continue;
        }
        match best {
            None => best = Some(i),
            Some(b) if count > tally[b] => best = Some(i),
            _ => {}
        }
    }
    best
}

impl<T, L> Linearizer<T, L> {
    /// Run one round of the majority vote: every indexer's current head is
    /// recursively attributed to the candidate tail its causal history
    /// supports, with per-node memoization shared across the heads.
    ///
    /// `removed` is an overlay of positions to treat as already yielded; the
    /// speculative tip computation drains nodes through it without touching
    /// real graph state.
    pub(crate) fn election(&self, tails: &[NodeId], removed: &Clock) -> Election {
        let candidates: Vec<NodeId> = tails
            .iter()
            .copied()
            .sorted_by(|a, b| self.node_order(*a, *b))
            .collect();
        let slots: HashMap<NodeId, usize> = candidates
            .iter()
            .enumerate()
            .map(|(slot, id)| (*id, slot))
            .collect();

        let mut confirms = vec![0usize; candidates.len()];
        let mut support = vec![0u64; candidates.len()];
        let mut memo: HashMap<NodeId, Option<usize>> = HashMap::new();

        for i in 0..self.indexers.len() {
            let head = match self.head_id(self.indexers[i]) {
                Some(head) => head,
                // An indexer with no materialized head casts no vote.
                None => continue,
            };
            let (tally, best) = self.cast_vote(head, &candidates, &slots, removed, &mut memo);
            if let Some(slot) = best {
                confirms[slot] += 1;
            }
            for (slot, count) in tally.iter().enumerate() {
                support[slot] += count;
            }
        }

        Election {
            candidates,
            confirms,
            support,
        }
    }

    /// Attribute one indexer head: a head that is itself a candidate votes
    /// for itself; otherwise its vote is the plurality of its clock-referenced
    /// predecessors' votes.
    fn cast_vote(
        &self,
        head: NodeId,
        candidates: &[NodeId],
        slots: &HashMap<NodeId, usize>,
        removed: &Clock,
        memo: &mut HashMap<NodeId, Option<usize>>,
    ) -> (Vec<u64>, Option<usize>) {
        let mut tally = vec![0u64; candidates.len()];
        if let Some(&slot) = slots.get(&head) {
            tally[slot] = 1;
            memo.insert(head, Some(slot));
            return (tally, Some(slot));
        }
        for child in self.vote_children(head, removed) {
            if let Some(slot) = self.vote_of(child, candidates, slots, removed, memo) {
                tally[slot] += 1;
            }
        }
        let best = best_slot(&tally);
        memo.insert(head, best);
        (tally, best)
    }

    /// Which candidate `start`'s causal history votes for.
    ///
    /// Explicit work-stack depth-first walk with a handle-keyed memo table,
    /// so the stack depth is bounded by live graph size rather than DAG
    /// depth, and shared ancestors are costed once per election.
    fn vote_of(
        &self,
        start: NodeId,
        candidates: &[NodeId],
        slots: &HashMap<NodeId, usize>,
        removed: &Clock,
        memo: &mut HashMap<NodeId, Option<usize>>,
    ) -> Option<usize> {
        if let Some(&known) = memo.get(&start) {
            return known;
        }
        if let Some(&slot) = slots.get(&start) {
            memo.insert(start, Some(slot));
            return Some(slot);
        }

        let mut stack = vec![Frame::new(
            start,
            self.vote_children(start, removed),
            candidates.len(),
        )];
        let mut on_stack: HashSet<NodeId> = HashSet::new();
        on_stack.insert(start);

        loop {
            let next_child = {
                let frame = match stack.last_mut() {
                    Some(frame) => frame,
                    None => return None,
                };
                if frame.next < frame.children.len() {
                    frame.next += 1;
                    Some(frame.children[frame.next - 1])
                } else {
                    None
                }
            };

            match next_child {
                Some(child) => {
                    if let Some(&known) = memo.get(&child) {
                        if let Some(slot) = known {
                            if let Some(frame) = stack.last_mut() {
                                frame.tally[slot] += 1;
                            }
                        }
                        continue;
                    }
                    if let Some(&slot) = slots.get(&child) {
                        memo.insert(child, Some(slot));
                        if let Some(frame) = stack.last_mut() {
                            frame.tally[slot] += 1;
                        }
                        continue;
                    }
                    // A well-formed graph only references strictly earlier
                    // nodes, so re-entering an in-flight frame cannot happen;
                    // skipping keeps the walk terminating regardless.
                    if !on_stack.insert(child) {
                        continue;
                    }
                    let children = self.vote_children(child, removed);
                    stack.push(Frame::new(child, children, candidates.len()));
                }
                None => {
                    let frame = match stack.pop() {
                        Some(frame) => frame,
                        None => return None,
                    };
                    on_stack.remove(&frame.id);
                    let best = best_slot(&frame.tally);
                    memo.insert(frame.id, best);
                    match stack.last_mut() {
                        Some(parent) => {
                            if let Some(slot) = best {
                                parent.tally[slot] += 1;
                            }
                        }
                        None => return best,
                    }
                }
            }
        }
    }

    /// The nodes one hop back in `id`'s causal view: for every clock entry,
    /// the referenced writer's node at that length (its predecessor for the
    /// node's own writer). Unknown writers, yielded nodes and positions
    /// covered by the `removed` overlay contribute nothing.
    fn vote_children(&self, id: NodeId, removed: &Clock) -> Vec<NodeId> {
        let node = match self.node(id) {
            Some(node) => node,
            None => return Vec::new(),
        };
        let mut children = Vec::new();
        for (key, &length) in node.clock().iter() {
            let writer = match self.writer_id(key) {
                Some(writer) => writer,
                // Fail closed: a vote lookup naming an untracked writer
                // resolves to nothing until the writer becomes known.
                None => continue,
            };
            let target = if writer == id.writer {
                length.saturating_sub(1)
            } else {
                length
            };
            if target == 0 || target <= removed.get(key) {
                continue;
            }
            match self.node(NodeId::new(writer, target)) {
                Some(child) if !child.is_yielded() => children.push(child.id()),
                _ => {}
            }
        }
        children
    }
}
