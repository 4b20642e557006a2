// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Clock, WriterKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense handle for a registered writer, valid within one `Linearizer`.
///
/// The handle is an arena index: it is cheap, `Copy`, and deliberately not
/// comparable across replicas (registration order differs). Anything that
/// must be replica-deterministic compares `WriterKey`s instead.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct WriterId(pub(crate) usize);

/// Stable handle for one DAG node: the producing writer plus the node's
/// 1-based position in that writer's log. Dependency and dependent edges are
/// stored as lists of these handles rather than owning references, which
/// keeps the (cyclic, back-referencing) object graph free of lifetime knots.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub writer: WriterId,
    pub length: u64,
}

impl NodeId {
    pub(crate) fn new(writer: WriterId, length: u64) -> Self {
        NodeId { writer, length }
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.writer, self.length)
    }
}

/// An unresolved causal dependency as recorded on the wire: "the node at
/// `length` in the log identified by `key`". Resolution turns these into
/// `dependencies` handles once the referenced writer is known locally and
/// has materialized that far.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RawHead {
    pub key: WriterKey,
    pub length: u64,
}

/// One vertex of the merge DAG.
///
/// Created either by the local participant appending a value or by
/// materializing a raw entry fetched from a remote writer's log; destroyed
/// when the node has been confirmed into the merged order and its writer
/// shifts it out of the pending buffer.
#[derive(Debug)]
pub struct Node<T> {
    pub(crate) id: NodeId,
    pub(crate) value: Option<T>,
    /// Run-length countdown for atomic multi-entry appends: `1` marks the
    /// value-bearing boundary, larger values are interior entries.
    pub(crate) batch: u32,
    pub(crate) raw_heads: Vec<RawHead>,
    pub(crate) dependencies: Vec<NodeId>,
    pub(crate) dependents: Vec<NodeId>,
    pub(crate) clock: Clock,
    /// Set once the node is confirmed into the indexed prefix. A yielded
    /// node no longer participates in dependency edges or vote tallies; it
    /// lingers in its writer's buffer only until the driver shifts it.
    pub(crate) yielded: bool,
}

impl<T> Node<T> {
    pub(crate) fn new(id: NodeId, value: Option<T>, raw_heads: Vec<RawHead>, batch: u32) -> Self {
        Node {
            id,
            value,
            batch,
            raw_heads,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            clock: Clock::new(),
            yielded: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// 1-based position within the producing writer's log.
    pub fn length(&self) -> u64 {
        self.id.length
    }

    /// Payload; `None` is a no-op acknowledgement entry.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn batch(&self) -> u32 {
        self.batch
    }

    pub fn raw_heads(&self) -> &[RawHead] {
        &self.raw_heads
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn is_yielded(&self) -> bool {
        self.yielded
    }

    /// Take the payload out, leaving `None`. Used by drivers applying a
    /// confirmed node without cloning the value.
    pub fn take_value(&mut self) -> Option<T> {
        self.value.take()
    }
}
