//! Ordered key→value map specialization of the stable container.

use std::collections::BTreeMap;

use girder_primitives::MutexGuard;
use girder_wire::Wire;

use crate::container::StableContainer;
use crate::error::StableError;

/// A `BTreeMap<K, V>` whose canonical state lives in a named shared segment.
pub struct StableMap<K, V> {
    inner: StableContainer<BTreeMap<K, V>>,
}

impl<K, V> StableMap<K, V>
where
    K: Wire + Ord + Clone,
    V: Wire + Clone,
{
    pub fn new(id: &str, capacity: usize) -> Result<Self, StableError> {
        Ok(Self {
            inner: StableContainer::new(id, capacity)?,
        })
    }

    /// Acquire the cross-process lock; recursive, so the single-op methods
    /// below still work while the guard is held.
    pub fn lock(&self) -> Result<MutexGuard<'_>, StableError> {
        self.inner.lock()
    }

    /// Insert or replace the value under `key`.
    pub fn insert(&self, key: K, value: V) -> Result<(), StableError> {
        self.inner.mutate(|map| {
            map.insert(key, value);
        })
    }

    /// Remove the entry under `key`, if any.
    pub fn erase(&self, key: &K) -> Result<(), StableError> {
        self.inner.mutate(|map| {
            map.remove(key);
        })
    }

    /// The value under `key`; `KeyMissing` when absent.
    pub fn at(&self, key: &K) -> Result<V, StableError> {
        self.inner
            .snapshot()?
            .get(key)
            .cloned()
            .ok_or(StableError::KeyMissing)
    }

    /// The value under `key`, or `default` when absent.
    pub fn at_or_default(&self, key: &K, default: V) -> Result<V, StableError> {
        Ok(self.inner.snapshot()?.get(key).cloned().unwrap_or(default))
    }

    /// Number of entries under `key` (0 or 1).
    pub fn count(&self, key: &K) -> Result<usize, StableError> {
        Ok(usize::from(self.inner.snapshot()?.contains_key(key)))
    }

    /// Apply `updater` to the existing value under `key` and return the
    /// post-update value; `KeyMissing` when absent. `updater` runs under the
    /// lock and must be side-effect-free except on its argument.
    pub fn update(&self, key: &K, updater: impl FnOnce(&mut V)) -> Result<V, StableError> {
        self.inner.mutate(|map| match map.get_mut(key) {
            Some(value) => {
                updater(value);
                Ok(value.clone())
            }
            None => Err(StableError::KeyMissing),
        })?
    }

    /// Apply `updater` to the existing value under `key`, or insert
    /// `default` without calling `updater`.
    pub fn update_or_insert(
        &self,
        key: K,
        updater: impl FnOnce(&mut V),
        default: V,
    ) -> Result<(), StableError> {
        self.inner.mutate(|map| match map.get_mut(&key) {
            Some(value) => updater(value),
            None => {
                map.insert(key, default);
            }
        })
    }

    pub fn clear(&self) -> Result<(), StableError> {
        self.inner.clear()
    }

    pub fn len(&self) -> Result<usize, StableError> {
        Ok(self.inner.snapshot()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StableError> {
        Ok(self.inner.snapshot()?.is_empty())
    }

    /// Snapshot under the lock, then iterate outside it. `f` returns `false`
    /// to stop early. Because iteration runs on a snapshot, `f` must not
    /// assume entries it sees still exist.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V) -> bool) -> Result<(), StableError> {
        let snapshot = self.inner.snapshot()?;
        for (key, value) in &snapshot {
            if !f(key, value) {
                break;
            }
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_id(tag: &str) -> String {
        format!("girder_map_{tag}_{}", std::process::id())
    }

    fn new_map(tag: &str) -> StableMap<u64, i64> {
        StableMap::new(&unique_id(tag), 4096).expect("create map")
    }

    #[test]
    fn insert_at_erase() {
        let map = new_map("basic");
        map.insert(1, 10).expect("insert");
        map.insert(2, 20).expect("insert");
        assert_eq!(map.at(&1).expect("at"), 10);
        assert_eq!(map.len().expect("len"), 2);

        map.insert(1, 11).expect("replace");
        assert_eq!(map.at(&1).expect("at"), 11);

        map.erase(&1).expect("erase");
        assert!(matches!(map.at(&1), Err(StableError::KeyMissing)));
        assert_eq!(map.count(&1).expect("count"), 0);
        assert_eq!(map.count(&2).expect("count"), 1);
    }

    #[test]
    fn at_or_default_falls_back() {
        let map = new_map("default");
        map.insert(5, 50).expect("insert");
        assert_eq!(map.at_or_default(&5, -1).expect("present"), 50);
        assert_eq!(map.at_or_default(&6, -1).expect("absent"), -1);
    }

    #[test]
    fn update_returns_post_update_value() {
        let map = new_map("update");
        map.insert(1, 1).expect("insert");
        let updated = map.update(&1, |v| *v += 41).expect("update");
        assert_eq!(updated, 42);
        assert_eq!(map.at(&1).expect("at"), 42);

        assert!(matches!(
            map.update(&9, |v| *v += 1),
            Err(StableError::KeyMissing)
        ));
    }

    #[test]
    fn update_or_insert_skips_updater_on_insert() {
        let map = new_map("upsert");
        map.update_or_insert(1, |v| *v += 100, 7).expect("insert path");
        assert_eq!(map.at(&1).expect("at"), 7, "updater must not run on insert");
        map.update_or_insert(1, |v| *v += 100, 7).expect("update path");
        assert_eq!(map.at(&1).expect("at"), 107);
    }

    #[test]
    fn for_each_stops_early() {
        let map = new_map("foreach");
        for i in 0..10 {
            map.insert(i, i as i64).expect("insert");
        }
        let mut seen = 0;
        map.for_each(|_, _| {
            seen += 1;
            seen < 3
        })
        .expect("for_each");
        assert_eq!(seen, 3);
    }

    #[test]
    fn recursive_lock_allows_composed_transactions() {
        let map = new_map("txn");
        let _guard = map.lock().expect("outer lock");
        map.insert(1, 1).expect("insert under outer lock");
        assert_eq!(map.at(&1).expect("at under outer lock"), 1);
    }
}
