// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * This crate merges a set of independent single-writer append-only logs into
 * one deterministic total order, without a central sequencer. Each
 * participant ("writer") appends to its own log, stamping every entry with
 * references to the DAG frontier it observed; the `Linearizer` ingests those
 * entries from all writers, links them into a causal DAG, and linearizes the
 * DAG with a recursive majority vote among a designated subset of writers
 * (the "indexers").
 *
 * The merged sequence has two zones:
 *
 *   - the **indexed** prefix: nodes a majority of indexer heads agree on.
 *     Confirmed exactly once, never reordered: this is the durable log.
 *
 *   - the **tip**: a best-effort deterministic ordering of everything not
 *     yet confirmed. It may be invalidated wholesale as more data arrives;
 *     each [`Linearizer::update`] reports how much of the previous tip
 *     survived (`shared`), how many speculative entries to undo (`popped`)
 *     and how many to apply (`pushed`), so a driving application can apply
 *     tip effects optimistically and roll them back on reorg.
 *
 * Determinism is absolute: two replicas holding the same set of nodes and
 * the same indexer set compute identical `indexed` and `tip` sequences,
 * whatever order the nodes arrived in. Every tie anywhere in the vote breaks
 * on the raw-byte order of writer identity keys.
 *
 * The crate is synchronous and purely in-memory. Durable storage and
 * replication live behind the [`Oplog`] trait; the only suspend point is
 * [`Linearizer::ensure_next`] answering `None` when data has not replicated
 * yet, which callers treat as "poll again later". Liveness is explicitly
 * not promised: with too few indexers online the tip simply grows and
 * nothing confirms, which is the intended steady state under partial
 * participation, not an error.
 *
 * ## Name
 *
 * In weaving, the weft is the thread drawn through many parallel warp
 * threads, binding them into one fabric.
 */

mod clock;
mod error;
mod key;
mod linearizer;
mod node;
mod oplog;
mod votes;
mod writer;

pub use clock::Clock;
pub use error::Error;
pub use key::{WriterKey, KEY_BYTES};
pub use linearizer::{Linearizer, Update};
pub use node::{Node, NodeId, RawHead, WriterId};
pub use oplog::{MemoryLog, Oplog, RawEntry};
pub use writer::Writer;

#[cfg(test)]
mod tests;
