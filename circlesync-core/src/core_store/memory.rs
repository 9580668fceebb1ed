use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use super::{DurableStore, StoreResult};
use crate::util::lock;

/// In-memory durable store, for tests and the simulator
#[derive(Debug)]
pub struct MemoryStore<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an entry
    pub fn seed(&self, key: K, value: V) {
        lock(&self.entries).insert(key, value);
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl<K, V> DurableStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn read(&self, key: &K) -> StoreResult<Option<V>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn write(&self, key: &K, value: &V) -> StoreResult<()> {
        lock(&self.entries).insert(key.clone(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &K) -> StoreResult<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        lock(&self.entries).clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic() {
        let store = MemoryStore::new();
        assert_eq!(store.read(&"a").unwrap(), None::<u32>);

        store.write(&"a", &1).unwrap();
        store.seed("b", 2);
        assert_eq!(store.read(&"a").unwrap(), Some(1));
        assert_eq!(store.len(), 2);

        store.delete(&"a").unwrap();
        assert_eq!(store.read(&"a").unwrap(), None);
        assert!(!store.is_empty());

        store.clear().unwrap();
        assert!(store.is_empty());
    }
}
