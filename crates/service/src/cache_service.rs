use std::{path::Path, sync::Arc, time::Duration};

use common::types::KeyListing;
use configs::CacheConfig;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::ServiceError;
use crate::observability::MUTATIONS_TOTAL;
use crate::persistence::{PersistenceQueue, PersistenceWorker};
use crate::storage::{codec, Store};

/// Validated entry point for every cache operation.
///
/// Mutations are applied to the [`Store`] and acknowledged immediately; a
/// full snapshot is handed to the persistence queue afterwards, so callers
/// never wait for disk.
#[derive(Clone)]
pub struct CacheService {
    store: Arc<Store>,
    queue: PersistenceQueue,
    enqueue_timeout: Duration,
}

impl CacheService {
    pub fn new(store: Arc<Store>, queue: PersistenceQueue, enqueue_timeout: Duration) -> Self {
        Self { store, queue, enqueue_timeout }
    }

    /// Load the persisted snapshot (absent file means empty), then start the
    /// persistence worker. Any other load failure is returned and must abort startup.
    pub async fn open(cfg: &CacheConfig) -> Result<(Self, JoinHandle<()>), ServiceError> {
        let path = Path::new(&cfg.file_path);
        common::env::ensure_parent_dir(path)
            .await
            .map_err(|e| ServiceError::StartupLoad(e.to_string()))?;

        let store = match codec::load_snapshot(path).await? {
            Some(snapshot) => {
                info!(path = %path.display(), entries = snapshot.len(), "loaded persisted cache");
                Store::from_snapshot(snapshot)
            }
            None => {
                info!(path = %path.display(), "no persisted cache; starting empty");
                Store::new()
            }
        };

        let (queue, receiver) = PersistenceQueue::channel(cfg.queue_capacity);
        let worker = PersistenceWorker::new(receiver, path).spawn();
        let service = Self::new(Arc::new(store), queue, Duration::from_millis(cfg.enqueue_timeout_ms));
        Ok((service, worker))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn get(&self, key: &str) -> Result<String, ServiceError> {
        if key.is_empty() {
            return Err(ServiceError::key_required());
        }
        self.store.get(key).await.ok_or_else(ServiceError::key_not_found)
    }

    /// Insert or overwrite. Overwrites are not reported back to the caller.
    pub async fn set(&self, key: String, value: String) -> Result<(), ServiceError> {
        if key.is_empty() {
            return Err(ServiceError::key_required());
        }
        debug!(%key, "SET");
        if self.store.set(key.clone(), value).await.is_some() {
            debug!(%key, "overwrote existing value");
        }
        MUTATIONS_TOTAL.inc();
        self.schedule_persist().await;
        Ok(())
    }

    /// Remove a key. Deleting an absent key still succeeds.
    pub async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        if key.is_empty() {
            return Err(ServiceError::key_required());
        }
        let existed = self.store.delete(key).await;
        debug!(%key, existed, "DELETE");
        MUTATIONS_TOTAL.inc();
        self.schedule_persist().await;
        Ok(())
    }

    pub async fn list_keys(&self) -> KeyListing {
        let (keys, size) = self.store.keys_and_size().await;
        KeyListing { keys, size }
    }

    // The mutation is already visible; the enqueue outcome never fails the request.
    async fn schedule_persist(&self) {
        let snapshot = self.store.snapshot().await;
        self.queue.enqueue(snapshot, self.enqueue_timeout).await;
    }
}
