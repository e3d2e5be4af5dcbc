use std::collections::HashMap;
use tokio::sync::RwLock;

use super::codec::Snapshot;

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<String, String>,
    /// Bumped by every write; lets the persistence worker discard snapshots
    /// that reach it out of order.
    generation: u64,
}

/// In-memory string map guarded by a reader/writer lock.
///
/// Reads (`get`, `snapshot`, `keys_and_size`) share the lock; writes take it
/// exclusively. Critical sections only touch the map, never disk.
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store from a snapshot decoded at startup.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: RwLock::new(Inner { map: snapshot.into_entries(), generation: 0 }),
        }
    }

    /// Get value by key.
    pub async fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.map.get(key).cloned()
    }

    /// Insert or overwrite; returns the value that was replaced, if any.
    pub async fn set(&self, key: String, value: String) -> Option<String> {
        let mut inner = self.inner.write().await;
        inner.generation += 1;
        inner.map.insert(key, value)
    }

    /// Remove a key; returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.generation += 1;
        inner.map.remove(key).is_some()
    }

    /// Deep copy of the whole map, tagged with the current generation.
    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        Snapshot::new(inner.map.clone(), inner.generation)
    }

    /// Sorted keys plus the summed byte length of all values.
    pub async fn keys_and_size(&self) -> (Vec<String>, usize) {
        let (mut keys, size) = {
            let inner = self.inner.read().await;
            let keys: Vec<String> = inner.map.keys().cloned().collect();
            let size: usize = inner.map.values().map(String::len).sum();
            (keys, size)
        };
        keys.sort_unstable();
        (keys, size)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
