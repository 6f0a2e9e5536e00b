//! Table of loaded chunks.

use std::collections::HashMap;
use slab::Slab;
use vek::*;


/// Table of loaded chunks, keyed by chunk coordinate.
///
/// Content lives in a slab, so a chunk keeps one stable slot for as long as it stays loaded and
/// space is reused as chunks come and go; the hash map resolves coordinates to slots.
pub struct ChunkTable<T> {
    slots: Slab<(Vec3<i64>, T)>,
    index: HashMap<Vec3<i64>, usize>,
}

impl<T> ChunkTable<T> {
    /// Construct empty.
    pub fn new() -> Self {
        ChunkTable {
            slots: Slab::new(),
            index: HashMap::new(),
        }
    }

    /// Whether the chunk at `cc` is loaded.
    pub fn contains(&self, cc: Vec3<i64>) -> bool {
        self.index.contains_key(&cc)
    }

    /// Get the content of the chunk at `cc`, if loaded.
    pub fn get(&self, cc: Vec3<i64>) -> Option<&T> {
        self.index.get(&cc).map(|&slot| &self.slots[slot].1)
    }

    /// Mutably get the content of the chunk at `cc`, if loaded.
    pub fn get_mut(&mut self, cc: Vec3<i64>) -> Option<&mut T> {
        let slot = *self.index.get(&cc)?;
        Some(&mut self.slots[slot].1)
    }

    /// Put content at `cc`, returning the previous content if it was loaded.
    pub fn insert(&mut self, cc: Vec3<i64>, val: T) -> Option<T> {
        if let Some(&slot) = self.index.get(&cc) {
            Some(std::mem::replace(&mut self.slots[slot].1, val))
        } else {
            let slot = self.slots.insert((cc, val));
            self.index.insert(cc, slot);
            None
        }
    }

    /// Unload the chunk at `cc`, returning its content if it was loaded.
    pub fn remove(&mut self, cc: Vec3<i64>) -> Option<T> {
        let slot = self.index.remove(&cc)?;
        Some(self.slots.remove(slot).1)
    }

    /// Number of loaded chunks.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no chunks are loaded.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterate over loaded chunks in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item=(Vec3<i64>, &T)> {
        self.slots.iter().map(|(_, &(cc, ref val))| (cc, val))
    }
}

impl<T> Default for ChunkTable<T> {
    fn default() -> Self {
        ChunkTable::new()
    }
}


#[test]
fn insert_get_remove() {
    let mut table = ChunkTable::new();
    let a = Vec3 { x: 0, y: 0, z: 0 };
    let b = Vec3 { x: -3, y: 1, z: 9 };
    assert_eq!(table.insert(a, "a"), None);
    assert_eq!(table.insert(b, "b"), None);
    assert_eq!(table.len(), 2);
    assert!(table.contains(a));
    assert_eq!(table.get(b), Some(&"b"));
    assert_eq!(table.remove(a), Some("a"));
    assert!(!table.contains(a));
    assert_eq!(table.get(a), None);
    assert_eq!(table.len(), 1);
    assert_eq!(table.remove(a), None);
}

#[test]
fn insert_replaces() {
    let mut table = ChunkTable::new();
    let cc = Vec3 { x: 5, y: -1, z: 2 };
    assert_eq!(table.insert(cc, 1), None);
    assert_eq!(table.insert(cc, 2), Some(1));
    assert_eq!(table.get(cc), Some(&2));
    assert_eq!(table.len(), 1);
}

#[test]
fn slots_are_reused() {
    let mut table = ChunkTable::new();
    for i in 0..10 {
        table.insert(Vec3 { x: i, y: 0, z: 0 }, i);
    }
    for i in 0..10 {
        table.remove(Vec3 { x: i, y: 0, z: 0 });
    }
    for i in 0..10 {
        table.insert(Vec3 { x: 0, y: i, z: 0 }, i);
    }
    assert_eq!(table.len(), 10);
    let mut ccs = table.iter().map(|(cc, _)| cc).collect::<Vec<_>>();
    ccs.sort_by_key(|cc| (cc.x, cc.y, cc.z));
    assert!(ccs.windows(2).all(|w| w[0] != w[1]));
}
