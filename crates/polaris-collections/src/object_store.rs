//! Concurrent object store with batch-scoped access.
//!
//! The store wraps a [`HeapMap`] ordered by key behind a read/write lock.
//! Callers acquire a [`StoreReader`] or [`StoreWriter`] once, issue any
//! number of calls, and release it by dropping the handle. Readers see
//! either the state before or after a writer's batch, never a partially
//! applied one.
//!
//! Positions returned by `get_by_index` stay valid only until the next
//! `set` of a new key or `remove`.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::heap_map::HeapMap;

struct Keyed<V> {
    key: String,
    value: V,
}

type Table<V> = HeapMap<String, Keyed<V>>;

/// A read/write-locked, key and index addressable store.
pub struct ConcurrentObjectStore<V> {
    table: RwLock<Table<V>>,
}

impl<V: 'static> ConcurrentObjectStore<V> {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HeapMap::new(|a: &Keyed<V>, b: &Keyed<V>| a.key < b.key)),
        }
    }

    /// Acquire a shared batch reader. Blocks while a writer holds the lock.
    pub fn read_lock(&self) -> StoreReader<'_, V> {
        StoreReader {
            guard: self.table.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Acquire the exclusive batch writer.
    pub fn write_lock(&self) -> StoreWriter<'_, V> {
        StoreWriter {
            guard: self.table.write().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl<V: 'static> Default for ConcurrentObjectStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared access to a [`ConcurrentObjectStore`]. The read lock is released
/// when this handle is dropped.
pub struct StoreReader<'a, V> {
    guard: RwLockReadGuard<'a, Table<V>>,
}

impl<V> StoreReader<'_, V> {
    pub fn get_by_key(&self, key: &str) -> Option<&V> {
        self.guard.get_by_key(key).map(|item| &item.value)
    }

    pub fn get_by_index(&self, index: usize) -> Option<(&str, &V)> {
        get_by_index(&self.guard, index)
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.guard.iter().map(|(k, item)| (k.as_str(), &item.value))
    }

    /// Release the lock explicitly.
    pub fn unlock(self) {}
}

/// Exclusive access to a [`ConcurrentObjectStore`]. The write lock is
/// released when this handle is dropped.
pub struct StoreWriter<'a, V> {
    guard: RwLockWriteGuard<'a, Table<V>>,
}

impl<V> StoreWriter<'_, V> {
    pub fn get_by_key(&self, key: &str) -> Option<&V> {
        self.guard.get_by_key(key).map(|item| &item.value)
    }

    pub fn get_by_index(&self, index: usize) -> Option<(&str, &V)> {
        get_by_index(&self.guard, index)
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    /// Insert or replace the value stored under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        self.guard
            .add_or_replace(key.clone(), Keyed { key, value })
            .map(|previous| previous.value)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.guard.remove_by_key(key).map(|item| item.value)
    }

    /// Release the lock explicitly.
    pub fn unlock(self) {}
}

fn get_by_index<V>(table: &Table<V>, index: usize) -> Option<(&str, &V)> {
    table
        .get_by_index(index)
        .map(|(_, item)| (item.key.as_str(), &item.value))
}
