//! Write-behind persistence.
//!
//! Request handlers push full snapshots onto a bounded queue; one background
//! worker drains it and rewrites the snapshot file. Disk I/O never happens on
//! the request path or under the store lock.
//!
//! When the queue stays full, the producer parks its snapshot in a single
//! latest-wins slot instead of discarding it. The worker picks the slot up
//! alongside the queue, so the file still ends at the newest state.

use std::{path::PathBuf, sync::{Arc, Mutex}, time::Duration};

use tokio::{sync::{mpsc, Notify}, task::JoinHandle};
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, error, info, warn};

use crate::observability::{PERSIST_DEFERRED_TOTAL, PERSIST_FAILURES_TOTAL, PERSIST_WRITES_TOTAL};
use crate::storage::{codec, Snapshot};

/// Newest snapshot that did not fit in the queue.
#[derive(Debug, Default)]
struct Overflow {
    slot: Mutex<Option<Snapshot>>,
    notify: Notify,
}

impl Overflow {
    // Keeps whichever snapshot has the higher generation.
    fn park(&self, snapshot: Snapshot) {
        {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().map_or(true, |held| snapshot.generation() > held.generation()) {
                *slot = Some(snapshot);
            }
        }
        self.notify.notify_one();
    }

    fn take(&self) -> Option<Snapshot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Producer side of the persistence queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct PersistenceQueue {
    tx: mpsc::Sender<Snapshot>,
    overflow: Arc<Overflow>,
}

/// Consumer side, owned by the single [`PersistenceWorker`].
#[derive(Debug)]
pub struct PersistenceReceiver {
    rx: mpsc::Receiver<Snapshot>,
    overflow: Arc<Overflow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The queue stayed full for the whole wait; the snapshot went to the
    /// overflow slot and will be written after the queued ones.
    Parked,
    /// The worker is gone.
    Closed,
}

impl PersistenceQueue {
    pub fn channel(capacity: usize) -> (Self, PersistenceReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let overflow = Arc::new(Overflow::default());
        (
            Self { tx, overflow: Arc::clone(&overflow) },
            PersistenceReceiver { rx, overflow },
        )
    }

    /// Wait up to `timeout` for room in the queue. The wait also ends if the
    /// calling request is cancelled, since the future is simply dropped.
    pub async fn enqueue(&self, snapshot: Snapshot, timeout: Duration) -> EnqueueOutcome {
        let generation = snapshot.generation();
        match self.tx.send_timeout(snapshot, timeout).await {
            Ok(()) => EnqueueOutcome::Queued,
            Err(SendTimeoutError::Timeout(snapshot)) => {
                PERSIST_DEFERRED_TOTAL.inc();
                warn!(generation, timeout_ms = timeout.as_millis() as u64, "persistence queue full; snapshot parked");
                self.overflow.park(snapshot);
                EnqueueOutcome::Parked
            }
            Err(SendTimeoutError::Closed(_)) => {
                error!(generation, "persistence worker stopped; snapshot not queued");
                EnqueueOutcome::Closed
            }
        }
    }
}

/// Drains the queue and rewrites the snapshot file, one write at a time.
#[derive(Debug)]
pub struct PersistenceWorker {
    receiver: PersistenceReceiver,
    path: PathBuf,
    last_written: Option<u64>,
}

impl PersistenceWorker {
    pub fn new(receiver: PersistenceReceiver, path: impl Into<PathBuf>) -> Self {
        Self { receiver, path: path.into(), last_written: None }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every [`PersistenceQueue`] handle is dropped.
    pub async fn run(mut self) {
        info!(path = %self.path.display(), "persistence worker started");
        loop {
            let first = tokio::select! {
                msg = self.receiver.rx.recv() => match msg {
                    Some(snapshot) => snapshot,
                    None => break,
                },
                _ = self.receiver.overflow.notify.notified() => match self.receiver.overflow.take() {
                    Some(snapshot) => snapshot,
                    None => continue,
                },
            };
            let snapshot = self.take_newest(first);
            self.persist(snapshot).await;
        }
        // every sender is gone, but a parked snapshot may still be the newest state
        if let Some(parked) = self.receiver.overflow.take() {
            self.persist(parked).await;
        }
        info!(path = %self.path.display(), "persistence queue closed; worker exiting");
    }

    // Everything already queued or parked is superseded by the newest full snapshot.
    fn take_newest(&mut self, mut newest: Snapshot) -> Snapshot {
        let mut skipped = 0usize;
        let parked = self.receiver.overflow.take();
        let queued = std::iter::from_fn(|| self.receiver.rx.try_recv().ok());
        for next in queued.chain(parked) {
            if next.generation() >= newest.generation() {
                newest = next;
            }
            skipped += 1;
        }
        if skipped > 0 {
            debug!(skipped, generation = newest.generation(), "coalesced pending snapshots");
        }
        newest
    }

    async fn persist(&mut self, snapshot: Snapshot) {
        let generation = snapshot.generation();
        if self.last_written.is_some_and(|g| generation <= g) {
            debug!(generation, "snapshot older than the last write; skipped");
            return;
        }
        match codec::write_snapshot(&self.path, &snapshot).await {
            Ok(bytes) => {
                self.last_written = Some(generation);
                PERSIST_WRITES_TOTAL.inc();
                debug!(generation, bytes, entries = snapshot.len(), "snapshot persisted");
            }
            Err(e) => {
                PERSIST_FAILURES_TOTAL.inc();
                error!(generation, error = %e, path = %self.path.display(), "snapshot write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snap(pairs: &[(&str, &str)], generation: u64) -> Snapshot {
        let entries: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Snapshot::new(entries, generation)
    }

    fn tmp_file() -> PathBuf {
        std::env::temp_dir().join(format!("kv_persist_{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn full_queue_parks_newest_snapshot_after_timeout() {
        let (queue, rx) = PersistenceQueue::channel(1);
        let first = queue.enqueue(snap(&[("a", "1")], 1), Duration::ZERO).await;
        let second = queue.enqueue(snap(&[("a", "2")], 2), Duration::from_millis(10)).await;
        let third = queue.enqueue(snap(&[("a", "3")], 3), Duration::from_millis(10)).await;
        assert_eq!(first, EnqueueOutcome::Queued);
        assert_eq!(second, EnqueueOutcome::Parked);
        assert_eq!(third, EnqueueOutcome::Parked);

        // only the newest parked snapshot is kept
        let parked = rx.overflow.take().expect("parked snapshot");
        assert_eq!(parked.generation(), 3);
    }

    #[tokio::test]
    async fn parked_snapshot_reaches_disk_after_queue_drains() -> Result<(), anyhow::Error> {
        let path = tmp_file();
        let (queue, rx) = PersistenceQueue::channel(1);
        queue.enqueue(snap(&[("a", "1")], 1), Duration::ZERO).await;
        queue.enqueue(snap(&[("a", "1"), ("b", "2")], 2), Duration::from_millis(20)).await;

        let handle = PersistenceWorker::new(rx, &path).spawn();
        drop(queue);
        handle.await?;

        let on_disk = codec::load_snapshot(&path).await?.expect("written");
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk.entries().get("b").map(String::as_str), Some("2"));
        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }

    #[tokio::test]
    async fn idle_worker_wakes_for_a_parked_snapshot() -> Result<(), anyhow::Error> {
        let path = tmp_file();
        let (queue, rx) = PersistenceQueue::channel(1);
        let handle = PersistenceWorker::new(rx, &path).spawn();

        // park directly while the queue is empty; nothing else will arrive
        queue.overflow.park(snap(&[("late", "v")], 5));
        for _ in 0..100 {
            if codec::load_snapshot(&path).await?.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let on_disk = codec::load_snapshot(&path).await?.expect("written without a queue message");
        assert_eq!(on_disk.entries().get("late").map(String::as_str), Some("v"));

        drop(queue);
        handle.await?;
        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }

    #[tokio::test]
    async fn closed_queue_reports_closed() {
        let (queue, rx) = PersistenceQueue::channel(4);
        drop(rx);
        let outcome = queue.enqueue(snap(&[], 1), Duration::from_millis(10)).await;
        assert_eq!(outcome, EnqueueOutcome::Closed);
    }

    #[tokio::test]
    async fn worker_writes_newest_snapshot_even_if_enqueued_out_of_order() -> Result<(), anyhow::Error> {
        let path = tmp_file();
        let (queue, rx) = PersistenceQueue::channel(8);
        queue.enqueue(snap(&[("a", "1")], 1), Duration::ZERO).await;
        queue.enqueue(snap(&[("a", "1"), ("b", "2")], 3), Duration::ZERO).await;
        queue.enqueue(snap(&[("a", "1")], 2), Duration::ZERO).await;
        drop(queue);

        PersistenceWorker::new(rx, &path).run().await;

        let on_disk = codec::load_snapshot(&path).await?.expect("written");
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk.entries().get("b").map(String::as_str), Some("2"));
        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }

    #[tokio::test]
    async fn write_failure_does_not_stop_the_worker() -> Result<(), anyhow::Error> {
        let dir = std::env::temp_dir().join(format!("kv_persist_dir_{}", uuid::Uuid::new_v4()));
        let path = dir.join("cache.json");
        let (queue, rx) = PersistenceQueue::channel(8);
        let handle = PersistenceWorker::new(rx, &path).spawn();

        // parent directory does not exist yet, so this write fails
        queue.enqueue(snap(&[("a", "1")], 1), Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        tokio::fs::create_dir_all(&dir).await?;
        queue.enqueue(snap(&[("a", "2")], 2), Duration::ZERO).await;
        drop(queue);
        handle.await?;

        let on_disk = codec::load_snapshot(&path).await?.expect("written");
        assert_eq!(on_disk.entries().get("a").map(String::as_str), Some("2"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
        Ok(())
    }
}
