//! Binary heap with keyed access.
//!
//! A `HeapMap` keeps its values in heap order according to an injected
//! comparator and additionally indexes every entry by key. This allows
//! fetching, replacing, and removing arbitrary entries by key without
//! breaking the heap property.
//!
//! | Operation | Complexity |
//! |---|---|
//! | `get_by_key` / `get_by_index` | O(1) |
//! | `add_or_replace` | O(log n) |
//! | `pop` / `remove_by_key` | O(log n) |
//! | `peek` | O(1) |

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Comparator that establishes the heap order.
///
/// Returns `true` if `a` must be closer to the root than `b`.
pub type LessFn<V> = Box<dyn Fn(&V, &V) -> bool + Send + Sync>;

struct Entry<K, V> {
    key: K,
    value: V,
}

/// A min-heap (under the injected comparator) with an index from key to
/// heap slot.
///
/// Every key occupies exactly one slot. The order of `get_by_index` is the
/// internal heap order: stable between two mutations, otherwise unspecified.
pub struct HeapMap<K, V> {
    entries: Vec<Entry<K, V>>,
    slots: HashMap<K, usize>,
    less: LessFn<V>,
}

impl<K, V> HeapMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty heap ordered by `less`.
    pub fn new(less: impl Fn(&V, &V) -> bool + Send + Sync + 'static) -> Self {
        Self {
            entries: Vec::new(),
            slots: HashMap::new(),
            less: Box::new(less),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `value` under `key`, or replace the current value and
    /// restore the heap order from that slot.
    ///
    /// Returns the replaced value, if any.
    pub fn add_or_replace(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&slot) = self.slots.get(&key) {
            let previous = std::mem::replace(&mut self.entries[slot].value, value);
            self.fix(slot);
            return Some(previous);
        }

        let slot = self.entries.len();
        self.slots.insert(key.clone(), slot);
        self.entries.push(Entry { key, value });
        self.sift_up(slot);
        None
    }

    /// The root entry, without removing it.
    pub fn peek(&self) -> Option<(&K, &V)> {
        self.entries.first().map(|e| (&e.key, &e.value))
    }

    /// Remove and return the root entry.
    pub fn pop(&mut self) -> Option<(K, V)> {
        if self.entries.is_empty() {
            return None;
        }
        self.remove_at(0)
    }

    pub fn get_by_key<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots.get(key).map(|&slot| &self.entries[slot].value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots.contains_key(key)
    }

    /// Entry at position `index` of the internal heap array.
    pub fn get_by_index(&self, index: usize) -> Option<(&K, &V)> {
        self.entries.get(index).map(|e| (&e.key, &e.value))
    }

    /// Remove the entry stored under `key`.
    ///
    /// The entry is swapped with the last slot, truncated, and the moved
    /// entry is sifted into place. Removing the last slot is O(1).
    pub fn remove_by_key<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = *self.slots.get(key)?;
        self.remove_at(slot).map(|(_, value)| value)
    }

    /// Iterate over all entries in internal heap order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|e| (&e.key, &e.value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.slots.clear();
    }

    fn remove_at(&mut self, slot: usize) -> Option<(K, V)> {
        let last = self.entries.len().checked_sub(1)?;
        if slot != last {
            self.swap(slot, last);
        }

        let entry = self.entries.pop()?;
        self.slots.remove(&entry.key);

        if slot < self.entries.len() {
            self.fix(slot);
        }
        Some((entry.key, entry.value))
    }

    /// Restore the heap order after the value at `slot` changed.
    fn fix(&mut self, slot: usize) {
        if !self.sift_down(slot) {
            self.sift_up(slot);
        }
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if !self.less_at(slot, parent) {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
    }

    /// Returns `true` if the entry moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let len = self.entries.len();
        let mut slot = start;
        loop {
            let left = 2 * slot + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less_at(right, left) {
                right
            } else {
                left
            };
            if !self.less_at(child, slot) {
                break;
            }
            self.swap(slot, child);
            slot = child;
        }
        slot > start
    }

    fn less_at(&self, a: usize, b: usize) -> bool {
        (self.less)(&self.entries[a].value, &self.entries[b].value)
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        if let Some(slot) = self.slots.get_mut(&self.entries[a].key) {
            *slot = a;
        }
        if let Some(slot) = self.slots.get_mut(&self.entries[b].key) {
            *slot = b;
        }
    }
}

impl<K, V> fmt::Debug for HeapMap<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (&e.key, &e.value)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn min_heap() -> HeapMap<String, i64> {
        HeapMap::new(|a: &i64, b: &i64| a < b)
    }

    fn assert_slots_consistent(heap: &HeapMap<String, i64>) {
        assert_eq!(heap.slots.len(), heap.entries.len());
        for (slot, entry) in heap.entries.iter().enumerate() {
            assert_eq!(heap.slots[&entry.key], slot);
        }
    }

    #[test]
    fn pop_returns_minimum_first() {
        let mut heap = min_heap();
        for (key, value) in [("c", 30), ("a", 10), ("e", 50), ("b", 20), ("d", 40)] {
            heap.add_or_replace(key.to_string(), value);
        }

        let popped: Vec<i64> = std::iter::from_fn(|| heap.pop().map(|(_, v)| v)).collect();
        assert_eq!(popped, vec![10, 20, 30, 40, 50]);
        assert!(heap.is_empty());
    }

    #[test]
    fn peek_does_not_remove() {
        let mut heap = min_heap();
        heap.add_or_replace("x".into(), 5);
        heap.add_or_replace("y".into(), 1);

        assert_eq!(heap.peek(), Some((&"y".to_string(), &1)));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn replace_updates_in_place_and_resifts() {
        let mut heap = min_heap();
        heap.add_or_replace("a".into(), 1);
        heap.add_or_replace("b".into(), 2);
        heap.add_or_replace("c".into(), 3);

        // Move the root to the bottom.
        assert_eq!(heap.add_or_replace("a".into(), 100), Some(1));
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.peek().map(|(k, _)| k.as_str()), Some("b"));

        // Move a leaf to the top.
        heap.add_or_replace("c".into(), -1);
        assert_eq!(heap.peek().map(|(k, _)| k.as_str()), Some("c"));
        assert_slots_consistent(&heap);
    }

    #[test]
    fn remove_by_key_makes_key_unreachable() {
        let mut heap = min_heap();
        for i in 0..10 {
            heap.add_or_replace(format!("k{i}"), i);
        }

        assert_eq!(heap.remove_by_key("k4"), Some(4));
        assert_eq!(heap.get_by_key("k4"), None);
        assert!(!heap.contains_key("k4"));
        assert_eq!(heap.len(), 9);
        assert_eq!(heap.remove_by_key("k4"), None);
        assert_slots_consistent(&heap);
    }

    #[test]
    fn remove_last_slot() {
        let mut heap = min_heap();
        heap.add_or_replace("a".into(), 1);
        heap.add_or_replace("b".into(), 2);

        let last_key = heap.get_by_index(1).map(|(k, _)| k.clone()).unwrap();
        assert!(heap.remove_by_key(&last_key).is_some());
        assert_eq!(heap.len(), 1);
        assert_slots_consistent(&heap);
    }

    #[test]
    fn get_by_index_covers_every_key_once() {
        let mut heap = min_heap();
        for i in 0..20 {
            heap.add_or_replace(format!("k{i}"), 20 - i);
        }

        let mut seen: Vec<String> = (0..heap.len())
            .map(|i| heap.get_by_index(i).unwrap().0.clone())
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 20);
        assert!(heap.get_by_index(20).is_none());
    }

    #[test]
    fn random_operation_sequences_keep_heap_order() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut heap = min_heap();
        let mut model: HashMap<String, i64> = HashMap::new();

        for _ in 0..2000 {
            let key = format!("k{}", rng.gen_range(0..50));
            match rng.gen_range(0..4) {
                0 | 1 => {
                    let value = rng.gen_range(-1000..1000);
                    heap.add_or_replace(key.clone(), value);
                    model.insert(key, value);
                }
                2 => {
                    assert_eq!(heap.remove_by_key(&key), model.remove(&key));
                    assert_eq!(heap.get_by_key(&key), None);
                }
                _ => {
                    let expected_min = model.values().min().copied();
                    match heap.pop() {
                        Some((k, v)) => {
                            assert_eq!(Some(v), expected_min);
                            model.remove(&k);
                        }
                        None => assert!(model.is_empty()),
                    }
                }
            }
            assert_eq!(heap.len(), model.len());
        }
        assert_slots_consistent(&heap);
    }
}
