// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

use crate::*;
use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

type Val = String;

fn init() {
    let _ = pretty_env_logger::try_init();
}

fn wkey(n: u8) -> WriterKey {
    WriterKey::new([n; KEY_BYTES])
}

/// One applied entry, in replica-comparable form (handles are arena-local,
/// so cross-replica assertions go through key + position + payload).
#[derive(Clone, Debug, PartialEq, Eq)]
struct Applied {
    key: WriterKey,
    length: u64,
    value: Option<Val>,
}

/// A full participant: a linearizer over in-memory copies of every member's
/// log, plus the applied state a real application would keep: a permanent
/// `done` prefix and a speculative `spec` suffix maintained strictly through
/// the popped/pushed contract of each `Update`.
struct Replica {
    lin: Linearizer<Val, MemoryLog<Val>>,
    local: WriterKey,
    done: Vec<Applied>,
    spec: Vec<Applied>,
    indexed_seen: BTreeSet<(WriterKey, u64)>,
}

impl Replica {
    fn new(local: WriterKey, members: &[WriterKey], indexers: &[WriterKey]) -> Replica {
        assert!(members.contains(&local));
        let mut lin = Linearizer::new();
        for key in members {
            lin.add_writer(*key, MemoryLog::new()).unwrap();
        }
        lin.set_indexers(indexers).unwrap();
        Replica {
            lin,
            local,
            done: Vec::new(),
            spec: Vec::new(),
            indexed_seen: BTreeSet::new(),
        }
    }

    fn local_id(&self) -> WriterId {
        self.lin.writer_id(&self.local).unwrap()
    }

    fn append(&mut self, value: &str) {
        self.append_quiet(value);
        self.settle();
    }

    /// Append without running a merge round; used when the test wants all
    /// replicas to take their next `update` on identical data.
    fn append_quiet(&mut self, value: &str) {
        let w = self.local_id();
        let id = self.lin.append(w, Some(value.to_string()), 1);
        self.lin.add_head(id);
        self.lin.flush(w);
    }

    /// Append one atomic run of values with the batch countdown.
    fn append_batch(&mut self, values: &[&str]) {
        let w = self.local_id();
        let mut remaining = values.len() as u32;
        for value in values {
            let id = self.lin.append(w, Some(value.to_string()), remaining);
            self.lin.add_head(id);
            remaining -= 1;
        }
        self.lin.flush(w);
        self.settle();
    }

    /// Append a no-op head if the linearizer says it would help.
    fn ack(&mut self) {
        if self.ack_quiet() {
            self.settle();
        }
    }

    fn ack_quiet(&mut self) -> bool {
        let w = self.local_id();
        if !self.lin.should_ack(w) {
            return false;
        }
        let id = self.lin.append(w, None, 1);
        self.lin.add_head(id);
        self.lin.flush(w);
        true
    }

    /// Materialize everything materializable, then run one merge round and
    /// apply its result.
    fn settle(&mut self) -> Update {
        loop {
            let mut progress = false;
            let ids: Vec<WriterId> = self.lin.writers().map(|w| w.id()).collect();
            for w in ids {
                while self.lin.ensure_next(w).is_some() {
                    match self.lin.advance(w) {
                        Some(id) => {
                            self.lin.add_head(id);
                            progress = true;
                        }
                        None => break,
                    }
                }
            }
            if !progress {
                break;
            }
        }
        let u = self.lin.update();
        self.apply(&u);
        u
    }

    /// The application side of the reorg contract: undo `popped`, apply
    /// `shared..length`, promote the confirmed prefix and release buffers.
    fn apply(&mut self, u: &Update) {
        // nothing confirmed may ever be rolled back
        for popped in &self.spec[u.shared..] {
            assert!(
                !self.indexed_seen.contains(&(popped.key, popped.length)),
                "indexed node reported as popped: {:?}",
                popped
            );
        }
        self.spec.truncate(u.shared);
        for i in u.shared..u.length {
            let id = u.get(i).unwrap();
            self.spec.push(self.applied_of(id));
        }
        for id in &u.indexed {
            let first = self.spec.remove(0);
            assert_eq!(first.key, *self.lin.writer(id.writer).key());
            assert_eq!(first.length, id.length);
            self.indexed_seen.insert((first.key, first.length));
            self.done.push(first);
            let shifted = self
                .lin
                .writer_mut(id.writer)
                .shift()
                .expect("confirmed node still buffered");
            assert_eq!(shifted.length(), id.length);
        }
    }

    fn applied_of(&self, id: NodeId) -> Applied {
        let node = self.lin.node(id).expect("applied node buffered");
        Applied {
            key: *self.lin.writer(id.writer).key(),
            length: id.length,
            value: node.value().cloned(),
        }
    }

    /// Pull any log entries `other` has that this replica lacks, for every
    /// writer known here; unknown writers are skipped until registered.
    fn pull_from(&mut self, other: &Replica) {
        for w in other.lin.writers() {
            let mine = match self.lin.writer_id(w.key()) {
                Some(id) => id,
                None => continue,
            };
            let have = self.lin.writer(mine).log().len();
            let theirs = w.log().len();
            if theirs > have {
                let mut entries = Vec::with_capacity((theirs - have) as usize);
                for seq in have..theirs {
                    entries.push(w.log().get(seq).unwrap());
                }
                self.lin.writer_mut(mine).log_mut().append(entries);
            }
        }
    }

    fn sync_from(&mut self, other: &Replica) {
        self.pull_from(other);
        self.settle();
    }

    /// Applied state in merge order: confirmed prefix then speculation.
    fn view(&self) -> Vec<Applied> {
        self.done.iter().chain(self.spec.iter()).cloned().collect()
    }

    fn done_values(&self) -> Vec<Val> {
        self.done.iter().filter_map(|a| a.value.clone()).collect()
    }
}

fn sync_pair(replicas: &mut [Replica], i: usize, j: usize) {
    assert_ne!(i, j);
    let (lo, hi) = if i < j { (i, j) } else { (j, i) };
    let (left, right) = replicas.split_at_mut(hi);
    let a = &mut left[lo];
    let b = &mut right[0];
    a.sync_from(b);
    b.sync_from(a);
}

fn sync_all(replicas: &mut [Replica]) {
    for _ in 0..2 {
        for i in 0..replicas.len() {
            for j in (i + 1)..replicas.len() {
                sync_pair(replicas, i, j);
            }
        }
    }
}

/// Gossip until pending majorities land: the drivers' ack loop.
fn confirm(replicas: &mut [Replica]) {
    for _ in 0..4 {
        sync_all(replicas);
        for r in replicas.iter_mut() {
            r.ack();
        }
        sync_all(replicas);
    }
}

/// Full-knowledge exchange: everyone pulls everything, then everyone runs
/// one merge round over the identical union of logs.
fn barrier(replicas: &mut [Replica]) {
    for _ in 0..2 {
        for i in 0..replicas.len() {
            for j in 0..replicas.len() {
                if i == j {
                    continue;
                }
                let (lo, hi) = if i < j { (i, j) } else { (j, i) };
                let (left, right) = replicas.split_at_mut(hi);
                if i < j {
                    left[lo].pull_from(&right[0]);
                } else {
                    right[0].pull_from(&left[lo]);
                }
            }
        }
    }
    for r in replicas.iter_mut() {
        r.settle();
    }
}

/// Copy at most the first `upto` entries of `writer`'s log from one replica
/// to another, simulating partial replication.
fn copy_prefix(to: &mut Replica, from: &Replica, writer: WriterKey, upto: u64) {
    let src = from.lin.writer(from.lin.writer_id(&writer).unwrap());
    let dst = to.lin.writer_id(&writer).unwrap();
    let have = to.lin.writer(dst).log().len();
    let stop = upto.min(src.log().len());
    let mut entries = Vec::new();
    for seq in have..stop {
        entries.push(src.log().get(seq).unwrap());
    }
    to.lin.writer_mut(dst).log_mut().append(entries);
}

fn cluster(n: u8) -> (Vec<Replica>, Vec<WriterKey>) {
    let keys: Vec<WriterKey> = (0..n).map(|i| wkey(i + 1)).collect();
    let replicas = keys
        .iter()
        .map(|k| Replica::new(*k, &keys, &keys))
        .collect();
    (replicas, keys)
}

#[test]
fn three_writer_causal_chain_indexes_in_causal_order() {
    init();
    let (mut rs, keys) = cluster(3);

    rs[0].append("a1");
    sync_all(&mut rs);
    rs[1].append("b1");
    sync_all(&mut rs);
    rs[2].append("c1");
    sync_all(&mut rs);
    rs[1].append("b2");
    sync_all(&mut rs);
    rs[0].append("a2");
    confirm(&mut rs);

    let expected: Vec<Val> = vec!["a1", "b1", "c1", "b2", "a2"]
        .into_iter()
        .map(String::from)
        .collect();
    for r in &rs {
        assert_eq!(r.done_values(), expected);
    }
    let v0 = rs[0].view();
    for r in &rs[1..] {
        assert_eq!(r.view(), v0);
    }

    // each writer's confirmed low-water mark moved
    assert!(rs[0].lin.indexed_clock().get(&keys[0]) >= 2);
    assert!(rs[0].lin.indexed_clock().get(&keys[1]) >= 2);
    assert!(rs[0].lin.indexed_clock().get(&keys[2]) >= 1);

    // nothing valued is left pending, so nobody wants to ack again
    for r in &rs {
        assert!(!r.lin.should_ack(r.local_id()));
    }
}

#[test]
fn concurrent_appends_tie_break_on_lower_writer_key() {
    init();
    // the higher-keyed writer appends first; key order must still win
    let (mut rs, keys) = cluster(2);
    rs[1].append("b1");
    rs[0].append("a1");
    confirm(&mut rs);

    for r in &rs {
        assert_eq!(r.done_values(), vec!["a1".to_string(), "b1".to_string()]);
        assert_eq!(r.done[0].key, keys[0]);
    }
}

#[test]
fn two_of_three_indexers_make_progress() {
    init();
    let (mut rs, _) = cluster(3);

    rs[0].append("a1");
    rs[1].append("b1");

    // only the first two gossip; the third stays dark
    for _ in 0..3 {
        sync_pair(&mut rs, 0, 1);
        rs[0].ack();
        rs[1].ack();
        sync_pair(&mut rs, 0, 1);
    }

    let expected: Vec<Val> = vec!["a1".to_string(), "b1".to_string()];
    assert_eq!(rs[0].done_values(), expected);
    assert_eq!(rs[1].done_values(), expected);
    assert!(rs[2].done.is_empty());

    // the offline writer catching up converges to the same view
    confirm(&mut rs);
    let v0 = rs[0].view();
    assert_eq!(rs[2].view(), v0);
    assert_eq!(rs[2].done_values(), expected);
}

#[test]
fn majority_is_floor_half_plus_one() {
    init();
    let (mut rs, _) = cluster(4);
    assert_eq!(rs[0].lin.majority(), 3);

    rs[0].append("a1");

    // two of four heads agreeing is not a majority
    for _ in 0..3 {
        sync_pair(&mut rs, 0, 1);
        rs[0].ack();
        rs[1].ack();
        sync_pair(&mut rs, 0, 1);
    }
    for r in &rs {
        assert!(r.done.is_empty(), "confirmed without majority");
    }

    // a third head tips it over
    for _ in 0..3 {
        sync_pair(&mut rs, 0, 2);
        sync_pair(&mut rs, 1, 2);
        rs[0].ack();
        rs[1].ack();
        rs[2].ack();
        sync_pair(&mut rs, 0, 2);
        sync_pair(&mut rs, 1, 2);
        sync_pair(&mut rs, 0, 1);
    }
    assert_eq!(rs[0].done_values(), vec!["a1".to_string()]);
    assert_eq!(rs[1].done_values(), vec!["a1".to_string()]);
    assert_eq!(rs[2].done_values(), vec!["a1".to_string()]);
    assert!(rs[3].done.is_empty());
}

#[test]
fn linearization_is_ingest_order_independent() {
    init();
    let (mut rs, keys) = cluster(3);

    // build an unconfirmed tangle: concurrency, partial syncs, no acks
    rs[0].append("a1");
    rs[1].append("b1");
    sync_pair(&mut rs, 0, 1);
    rs[0].append("a2");
    rs[2].append("c1");
    sync_all(&mut rs);
    rs[1].append("b2");
    sync_all(&mut rs);

    // two fresh replicas ingest the same logs with writers registered in
    // different orders
    let mut fwd = Replica::new(keys[0], &keys, &keys);
    let rev_members: Vec<WriterKey> = keys.iter().rev().copied().collect();
    let mut rev = Replica::new(keys[0], &rev_members, &keys);
    fwd.sync_from(&rs[0]);
    rev.sync_from(&rs[0]);

    assert_eq!(fwd.view(), rev.view());
    assert_eq!(fwd.view(), rs[0].view());
    let v0 = rs[0].view();
    for r in &rs[1..] {
        assert_eq!(r.view(), v0);
    }
}

#[test]
fn indexer_set_change_reorgs_the_speculative_suffix() {
    init();
    let (mut rs, keys) = cluster(3);

    // b1 concurrent with the chain c1 <- c2; no acks, nothing confirms
    rs[1].append("b1");
    rs[2].append("c1");
    rs[2].append("c2");
    sync_all(&mut rs);

    let spec_of = |r: &Replica| -> Vec<(WriterKey, u64)> {
        r.spec.iter().map(|a| (a.key, a.length)).collect()
    };
    // with all three indexers, the b1/c1 tie goes to the lower key
    assert_eq!(
        spec_of(&rs[0]),
        vec![(keys[1], 1), (keys[2], 1), (keys[2], 2)]
    );
    assert!(rs[0].done.is_empty());

    // dropping the middle indexer flips the election to c's lineage
    rs[0].lin.set_indexers(&[keys[0], keys[2]]).unwrap();
    let u = rs[0].settle();
    assert_eq!(u.popped, 3);
    assert_eq!(u.pushed, 3);
    assert_eq!(u.shared, 0);
    assert_eq!(
        spec_of(&rs[0]),
        vec![(keys[2], 1), (keys[2], 2), (keys[1], 1)]
    );

    // a replica built from scratch over the same logs and the new indexer
    // set lands on exactly the same order
    let mut fresh = Replica::new(keys[0], &keys, &[keys[0], keys[2]]);
    fresh.sync_from(&rs[0]);
    assert_eq!(fresh.view(), rs[0].view());
}

#[test]
fn unknown_writer_reference_suspends_until_registered() {
    init();
    let (mut rs, keys) = cluster(2);
    rs[0].append("a1");
    sync_all(&mut rs);
    rs[1].append("b1");
    sync_all(&mut rs);
    rs[0].append("a2"); // raw heads name writer b

    // a replica that only knows writer a stalls at the reference to b
    let mut lone = Replica::new(keys[0], &keys[..1], &keys[..1]);
    lone.sync_from(&rs[0]);
    let a = lone.lin.writer_id(&keys[0]).unwrap();
    assert_eq!(lone.lin.writer(a).length(), 1, "a2 must stay unresolved");

    // registering the missing writer and re-syncing resolves it
    lone.lin.add_writer(keys[1], MemoryLog::new()).unwrap();
    lone.sync_from(&rs[0]);
    assert_eq!(lone.lin.writer(a).length(), 2);
}

#[test]
fn batch_materializes_only_when_fully_visible() {
    init();
    let keys = vec![wkey(1)];
    let mut writer = Replica::new(keys[0], &keys, &keys);
    writer.append_batch(&["x1", "x2", "x3"]);
    assert_eq!(
        writer.done_values(),
        vec!["x1".to_string(), "x2".to_string(), "x3".to_string()]
    );

    let mut reader = Replica::new(keys[0], &keys, &keys);
    copy_prefix(&mut reader, &writer, keys[0], 2);
    reader.settle();
    let a = reader.lin.writer_id(&keys[0]).unwrap();
    assert_eq!(
        reader.lin.writer(a).length(),
        0,
        "interior batch entries must not surface alone"
    );
    assert!(reader.view().is_empty());

    copy_prefix(&mut reader, &writer, keys[0], 3);
    reader.settle();
    assert_eq!(reader.lin.writer(a).length(), 3);
    assert_eq!(reader.done_values(), writer.done_values());
}

#[test]
fn randomized_interleavings_converge() {
    init();
    let (mut rs, _) = cluster(3);
    let mut rng = SmallRng::seed_from_u64(0x5eed_0f_0e77);
    let mut appended: Vec<Val> = Vec::new();
    let mut step = 0;

    // concurrency happens between barriers: several writers extend their
    // logs in parallel, then everyone exchanges and linearizes the same
    // union, round after round
    for _ in 0..25 {
        for i in 0..rs.len() {
            for _ in 0..rng.gen_range(0..3) {
                let value = format!("v{}", step);
                step += 1;
                rs[i].append_quiet(&value);
                appended.push(value);
            }
            if rng.gen_range(0..3) == 0 {
                rs[i].ack_quiet();
            }
        }
        barrier(&mut rs);
    }
    for _ in 0..4 {
        for r in rs.iter_mut() {
            r.ack_quiet();
        }
        barrier(&mut rs);
    }
    debug!(
        "randomized run: {} appends, {} confirmed",
        appended.len(),
        rs[0].done.len()
    );

    // all replicas agree on the whole applied view: the confirmed prefix
    // and the speculative suffix, across every reorg either went through
    assert!(!rs[0].done.is_empty());
    let v0 = rs[0].view();
    for r in &rs[1..] {
        assert_eq!(r.view(), v0);
    }

    // every appended value survives exactly once
    let mut seen: Vec<Val> = v0.iter().filter_map(|a| a.value.clone()).collect();
    let mut want = appended.clone();
    seen.sort();
    want.sort();
    assert_eq!(seen, want);
}

#[test]
fn restart_resumes_from_indexed_offset() {
    init();
    let (mut rs, keys) = cluster(2);
    rs[0].append("a1");
    rs[1].append("b1");
    confirm(&mut rs);
    assert_eq!(
        rs[0].done_values(),
        vec!["a1".to_string(), "b1".to_string()]
    );
    rs[0].append("a2");

    // a restarted replica seeds writers at the confirmed low-water marks
    // and only re-materializes the unconfirmed suffix
    let indexed_a = rs[0].lin.indexed_clock().get(&keys[0]);
    let indexed_b = rs[0].lin.indexed_clock().get(&keys[1]);
    let log_a = rs[0].lin.writer(rs[0].local_id()).log().clone();
    let b_id = rs[0].lin.writer_id(&keys[1]).unwrap();
    let log_b = rs[0].lin.writer(b_id).log().clone();

    let mut lin: Linearizer<Val, MemoryLog<Val>> = Linearizer::new();
    let wa = lin.add_writer_at(keys[0], log_a, indexed_a).unwrap();
    let wb = lin.add_writer_at(keys[1], log_b, indexed_b).unwrap();
    lin.set_indexers(&keys).unwrap();

    loop {
        let mut progress = false;
        for w in [wa, wb].iter().copied() {
            while lin.ensure_next(w).is_some() {
                match lin.advance(w) {
                    Some(id) => {
                        lin.add_head(id);
                        progress = true;
                    }
                    None => break,
                }
            }
        }
        if !progress {
            break;
        }
    }
    let u = lin.update();

    // the confirmed prefix is never re-emitted, and the fresh append shows
    // up in the unconfirmed view
    let positions: Vec<(WriterKey, u64)> = (0..u.length)
        .map(|i| {
            let id = u.get(i).unwrap();
            (*lin.writer(id.writer).key(), id.length)
        })
        .collect();
    assert!(positions.contains(&(keys[0], indexed_a + 1)));
    for (key, length) in &positions {
        let floor = if *key == keys[0] { indexed_a } else { indexed_b };
        assert!(*length > floor, "re-emitted an already confirmed position");
    }
    assert_eq!(lin.writer(wa).offset(), indexed_a);
}
