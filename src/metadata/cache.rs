//! The one compute-once-publish primitive behind every shared cache.
//!
//! The same access pattern recurs for resolved tokens, custom attribute
//! ranges, per-method IR descriptors, vtables and interned generic
//! instantiations: check under a short shared lock, compute *outside* any
//! lock (the computation may recursively consult other caches), then
//! re-check and publish. Races are benign because every cached value is a
//! pure function of immutable inputs; the loser's value is discarded and
//! the winner's returned, so a key resolves to the same handle for the
//! process lifetime. Nothing is ever evicted.

use std::hash::Hash;
use std::sync::OnceLock;

use dashmap::DashMap;

/// An append-only, process-lifetime memo map.
///
/// `get_or_try_insert` implements the double-checked pattern; the sharded
/// lock is only held for the presence check and the publish, never across
/// the computation, so computations may recursively enter the same map (on
/// different keys) or other memo maps.
pub struct MemoMap<K: Eq + Hash, V: Clone> {
    entries: DashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> MemoMap<K, V> {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        MemoMap {
            entries: DashMap::new(),
        }
    }

    /// Look up `key` without computing.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Return the cached value for `key`, or compute, publish and return
    /// it.
    ///
    /// On a racing double-compute the first published value wins and the
    /// loser's result is dropped.
    ///
    /// # Errors
    /// Propagates the computation's error; nothing is published on
    /// failure, so a later call retries (callers cache only failures that
    /// abort the whole operation anyway).
    pub fn get_or_try_insert<F>(&self, key: K, compute: F) -> crate::Result<V>
    where
        F: FnOnce() -> crate::Result<V>,
    {
        if let Some(existing) = self.entries.get(&key) {
            return Ok(existing.value().clone());
        }

        let value = compute()?;

        // Re-check: another thread may have published while we computed.
        Ok(self.entries.entry(key).or_insert(value).value().clone())
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> Default for MemoMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazily published single value (per-entity variant of [`MemoMap`]).
///
/// Publication is release-ordered and idempotent: a racing second writer's
/// value is discarded, exactly as for map entries.
pub struct MemoSlot<V> {
    slot: OnceLock<V>,
}

impl<V> MemoSlot<V> {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        MemoSlot {
            slot: OnceLock::new(),
        }
    }

    /// The published value, if any.
    #[must_use]
    pub fn get(&self) -> Option<&V> {
        self.slot.get()
    }

    /// Return the published value, or compute and publish.
    ///
    /// # Errors
    /// Propagates the computation's error without publishing.
    pub fn get_or_try_init<F>(&self, compute: F) -> crate::Result<&V>
    where
        F: FnOnce() -> crate::Result<V>,
    {
        if let Some(existing) = self.slot.get() {
            return Ok(existing);
        }
        let value = compute()?;
        // Last-writer loses: if someone published first, drop ours.
        let _ = self.slot.set(value);
        Ok(self.slot.get().unwrap_or_else(|| unreachable!()))
    }

    /// Publish `value` if the slot is still empty; returns the winner.
    pub fn publish(&self, value: V) -> &V {
        let _ = self.slot.set(value);
        self.slot.get().unwrap_or_else(|| unreachable!())
    }
}

impl<V> Default for MemoSlot<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn computes_once_per_key() {
        let map: MemoMap<u32, u32> = MemoMap::new();
        let runs = AtomicU32::new(0);
        for _ in 0..3 {
            let value = map
                .get_or_try_insert(7, || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_computation_is_not_published() {
        let map: MemoMap<u32, u32> = MemoMap::new();
        assert!(map
            .get_or_try_insert(1, || Err(crate::Error::Error("nope".into())))
            .is_err());
        assert_eq!(map.get_or_try_insert(1, || Ok(5)).unwrap(), 5);
    }

    #[test]
    fn racing_writers_agree() {
        let map: Arc<MemoMap<u32, u32>> = Arc::new(MemoMap::new());
        let mut handles = Vec::new();
        for thread_id in 0..8u32 {
            let map = map.clone();
            handles.push(std::thread::spawn(move || {
                map.get_or_try_insert(0, || Ok(thread_id)).unwrap()
            }));
        }
        let results: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn slot_first_writer_wins() {
        let slot: MemoSlot<u32> = MemoSlot::new();
        assert_eq!(*slot.publish(1), 1);
        assert_eq!(*slot.publish(2), 1);
        assert_eq!(slot.get_or_try_init(|| Ok(3)).unwrap(), &1);
    }
}
