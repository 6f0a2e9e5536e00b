//! See `PriorityDedupQueue`.

use std::{
    collections::{
        BinaryHeap,
        HashMap,
        hash_map,
    },
    cmp::Ordering,
    hash::Hash,
};
use parking_lot::Mutex;


/// Thread-safe priority queue holding at most one live entry per key.
///
/// An entry is a key, a payload, and an `f32` priority where greater means more urgent.
/// Upserting a key that is already queued either replaces the queued entry or is discarded,
/// decided by an improvement predicate the caller supplies per call. Popping yields entries in
/// non-increasing priority order, ties going to the earlier-stored entry, and never blocks.
///
/// Priorities are expected to be finite.
///
/// Replaced and removed entries leave stale nodes in the internal heap which are skipped on pop;
/// the heap is rebuilt when stale nodes pile up, so `len` and pops only ever reflect live
/// entries.
pub struct PriorityDedupQueue<K, T> {
    state: Mutex<State<K, T>>,
}

struct State<K, T> {
    heap: BinaryHeap<HeapNode<K>>,
    entries: HashMap<K, Entry<T>>,
    next_seq: u64,
}

struct Entry<T> {
    // seq of the heap node currently representing this entry. nodes with any other seq for this
    // key are stale. also the tiebreaker: earlier-stored entries pop first among equal priorities
    seq: u64,
    priority: f32,
    item: T,
}

struct HeapNode<K> {
    priority: f32,
    seq: u64,
    key: K,
}

impl<K> HeapNode<K> {
    fn rank(&self) -> impl Ord {
        // max-heap: greater priority first, then smaller seq first
        (FiniteF32(self.priority), std::cmp::Reverse(self.seq))
    }
}

// f32 ordered by total_cmp so it can participate in Ord
struct FiniteF32(f32);

impl PartialEq for FiniteF32 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FiniteF32 {}

impl PartialOrd for FiniteF32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FiniteF32 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl<K> PartialEq for HeapNode<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K> Eq for HeapNode<K> {}

impl<K> PartialOrd for HeapNode<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for HeapNode<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl<K: Eq + Hash + Clone, T> PriorityDedupQueue<K, T> {
    /// Construct empty.
    pub fn new() -> Self {
        PriorityDedupQueue {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                entries: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Insert an entry, or offer it as a replacement if the key is already queued.
    ///
    /// `improves` is consulted only when the key is queued, with the existing and incoming
    /// `(priority, payload)` pairs; returning false discards the incoming entry without touching
    /// the queue. Returns whether the incoming entry was stored.
    pub fn upsert<F>(&self, key: K, priority: f32, item: T, improves: F) -> bool
    where
        F: FnOnce((f32, &T), (f32, &T)) -> bool,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let seq = state.next_seq;
        state.next_seq += 1;
        match state.entries.entry(key.clone()) {
            hash_map::Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if !improves((existing.priority, &existing.item), (priority, &item)) {
                    return false;
                }
                occupied.insert(Entry { seq, priority, item });
            }
            hash_map::Entry::Vacant(vacant) => {
                vacant.insert(Entry { seq, priority, item });
            }
        }
        state.heap.push(HeapNode { priority, seq, key });
        maybe_compact(state);
        true
    }

    /// Remove and return the most urgent live entry, or `None` if the queue is empty. Never
    /// blocks beyond the queue's own brief lock.
    pub fn pop_highest(&self) -> Option<(K, f32, T)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        while let Some(node) = state.heap.pop() {
            let live = state.entries.get(&node.key)
                .map(|entry| entry.seq == node.seq)
                .unwrap_or(false);
            if live {
                let entry = state.entries.remove(&node.key).unwrap();
                return Some((node.key, entry.priority, entry.item));
            }
        }
        None
    }

    /// Remove every live entry whose key matches.
    pub fn remove_where<F: FnMut(&K) -> bool>(&self, mut matches: F) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.entries.retain(|key, _| !matches(key));
        maybe_compact(state);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone, T> Default for PriorityDedupQueue<K, T> {
    fn default() -> Self {
        PriorityDedupQueue::new()
    }
}

// rebuild the heap without stale nodes once they outnumber live entries past slack
fn maybe_compact<K: Eq + Hash + Clone, T>(state: &mut State<K, T>) {
    if state.heap.len() > state.entries.len() * 2 + 64 {
        state.heap = state.entries.iter()
            .map(|(key, entry)| HeapNode {
                priority: entry.priority,
                seq: entry.seq,
                key: key.clone(),
            })
            .collect();
    }
}


#[cfg(test)]
fn improves_never(_: (f32, &&str), _: (f32, &&str)) -> bool {
    false
}

#[test]
fn at_most_one_entry_per_key() {
    let queue = PriorityDedupQueue::new();
    queue.upsert(7, 1.0, "a", improves_never);
    queue.upsert(7, 5.0, "b", improves_never);
    queue.upsert(7, -5.0, "c", improves_never);
    queue.upsert(8, 2.0, "d", improves_never);
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.pop_highest(), Some((8, 2.0, "d")));
    assert_eq!(queue.pop_highest(), Some((7, 1.0, "a")));
    assert_eq!(queue.pop_highest(), None);
}

#[test]
fn rejected_upsert_changes_nothing() {
    let queue = PriorityDedupQueue::new();
    queue.upsert(1, 3.0, "old", improves_never);
    let stored = queue.upsert(1, 9.0, "new", improves_never);
    assert!(!stored);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pop_highest(), Some((1, 3.0, "old")));
}

#[test]
fn accepted_upsert_replaces_at_new_rank() {
    let queue = PriorityDedupQueue::new();
    queue.upsert(1, 1.0, "low", improves_never);
    queue.upsert(2, 5.0, "mid", improves_never);
    let stored = queue.upsert(1, 9.0, "high", |(old, _), (new, _)| new > old);
    assert!(stored);
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.pop_highest(), Some((1, 9.0, "high")));
    assert_eq!(queue.pop_highest(), Some((2, 5.0, "mid")));
}

#[test]
fn pops_non_increasing() {
    let queue = PriorityDedupQueue::new();
    for (key, priority) in [(1, 0.5), (2, -3.0), (3, 8.0), (4, 0.0), (5, -0.25)] {
        queue.upsert(key, priority, "", improves_never);
    }
    let mut last = f32::INFINITY;
    while let Some((_, priority, _)) = queue.pop_highest() {
        assert!(priority <= last);
        last = priority;
    }
}

#[test]
fn equal_priorities_pop_in_store_order() {
    let queue = PriorityDedupQueue::new();
    queue.upsert("first", 1.0, (), |_, _| false);
    queue.upsert("second", 1.0, (), |_, _| false);
    queue.upsert("third", 1.0, (), |_, _| false);
    assert_eq!(queue.pop_highest(), Some(("first", 1.0, ())));
    assert_eq!(queue.pop_highest(), Some(("second", 1.0, ())));
    assert_eq!(queue.pop_highest(), Some(("third", 1.0, ())));
}

#[test]
fn remove_where_removes_only_matches() {
    let queue = PriorityDedupQueue::new();
    for key in 0..10 {
        queue.upsert(key, key as f32, (), |_, _| false);
    }
    queue.remove_where(|&key| key % 2 == 0);
    assert_eq!(queue.len(), 5);
    while let Some((key, _, ())) = queue.pop_highest() {
        assert_eq!(key % 2, 1);
    }
}

#[test]
fn survives_heavy_replacement() {
    let queue = PriorityDedupQueue::new();
    for round in 0..1000 {
        queue.upsert(0, round as f32, (), |(old, _), (new, _)| new > old);
    }
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pop_highest(), Some((0, 999.0, ())));
    assert_eq!(queue.pop_highest(), None);
}

#[test]
fn concurrent_pushes_pop_sorted() {
    let queue = PriorityDedupQueue::new();
    std::thread::scope(|scope| {
        for thread in 0..4 {
            let queue = &queue;
            scope.spawn(move || {
                for i in 0..250 {
                    let key = thread * 1000 + i;
                    queue.upsert(key, (key % 17) as f32, (), |_, _| false);
                }
            });
        }
    });
    assert_eq!(queue.len(), 1000);
    let mut last = f32::INFINITY;
    let mut popped = 0;
    while let Some((_, priority, ())) = queue.pop_highest() {
        assert!(priority <= last);
        last = priority;
        popped += 1;
    }
    assert_eq!(popped, 1000);
}
