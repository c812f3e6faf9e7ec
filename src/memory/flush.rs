//! Background flush pipeline
//!
//! Committers hand full-table snapshots to a single worker task over a bounded
//! channel. The worker is the only writer to the persistence backend while the
//! store is running.

use crate::error::MemoryError;
use crate::memory::persistence::{PersistenceBackend, PreferenceTable};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Full copy of the preference table taken under the store lock
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Commit counter at the time the copy was taken
    pub version: u64,
    pub table: PreferenceTable,
}

/// Drains snapshots and writes the newest one to storage
pub struct FlushWorker {
    backend: Arc<dyn PersistenceBackend>,
    receiver: mpsc::Receiver<Snapshot>,
    cancel: CancellationToken,
    interval: Duration,
    io_timeout: Duration,
    pending: Option<Snapshot>,
    /// Highest version received so far
    newest_version: u64,
    /// Highest version known to be on storage
    saved_version: u64,
}

impl FlushWorker {
    /// Start the worker on the current runtime.
    ///
    /// A zero `interval` writes every received snapshot immediately. Otherwise
    /// snapshots are coalesced and written once per interval.
    pub fn spawn(
        backend: Arc<dyn PersistenceBackend>,
        receiver: mpsc::Receiver<Snapshot>,
        cancel: CancellationToken,
        interval: Duration,
        io_timeout: Duration,
    ) -> JoinHandle<()> {
        let worker = Self {
            backend,
            receiver,
            cancel,
            interval,
            io_timeout,
            pending: None,
            newest_version: 0,
            saved_version: 0,
        };

        tokio::spawn(worker.run())
    }

    async fn run(mut self) {
        let mut ticker = if self.interval.is_zero() {
            None
        } else {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        };

        let interval_ms = self.interval.as_millis() as u64;
        debug!(interval_ms, "Flush worker started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                received = self.receiver.recv() => match received {
                    Some(snapshot) => {
                        self.accept(snapshot);
                        if ticker.is_none() {
                            self.flush_pending().await;
                        }
                    }
                    None => break,
                },

                _ = next_tick(&mut ticker) => self.flush_pending().await,
            }
        }

        // Final drain: nothing committed before the stop signal may be lost
        self.receiver.close();
        while let Ok(snapshot) = self.receiver.try_recv() {
            self.accept(snapshot);
        }
        self.flush_pending().await;

        info!(
            newest = self.newest_version,
            saved = self.saved_version,
            "Flush worker stopped"
        );
    }

    /// Keep `snapshot` unless storage or the pending slot already holds something as new.
    ///
    /// A snapshot whose version was seen before but never saved is accepted
    /// again, so a resend after a failed write still reaches storage.
    fn accept(&mut self, snapshot: Snapshot) {
        let pending_version = self.pending.as_ref().map_or(0, |p| p.version);
        if snapshot.version <= self.saved_version || snapshot.version <= pending_version {
            debug!(
                version = snapshot.version,
                saved = self.saved_version,
                pending = pending_version,
                "Skipping stale snapshot"
            );
            return;
        }
        self.newest_version = self.newest_version.max(snapshot.version);
        self.pending = Some(snapshot);
    }

    async fn flush_pending(&mut self) {
        let Some(snapshot) = self.pending.take() else {
            return;
        };

        let save = self.backend.save(&snapshot.table);
        let result = match tokio::time::timeout(self.io_timeout, save).await {
            Ok(result) => result,
            Err(_) => Err(MemoryError::Flush(format!(
                "save timed out after {:?}",
                self.io_timeout
            ))),
        };

        match result {
            Ok(()) => {
                self.saved_version = self.saved_version.max(snapshot.version);
                debug!(
                    version = snapshot.version,
                    users = snapshot.table.len(),
                    "Flushed preference table"
                );
            }
            // The next commit, or the shutdown resend, carries the whole table again
            Err(e) => error!(version = snapshot.version, error = %e, "Preference flush failed"),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::persistence::InMemoryBackend;
    use crate::Result;

    fn snapshot(version: u64, user: &str, value: &str) -> Snapshot {
        let mut table = PreferenceTable::new();
        table.insert(user.to_string(), value.to_string());
        Snapshot { version, table }
    }

    struct FailingBackend;

    #[async_trait::async_trait]
    impl PersistenceBackend for FailingBackend {
        async fn load(&self) -> Result<PreferenceTable> {
            Ok(PreferenceTable::new())
        }

        async fn save(&self, _table: &PreferenceTable) -> Result<()> {
            Err(MemoryError::Flush("disk on fire".to_string()))
        }
    }

    /// Fails the first `failures` saves, then stores into `inner`
    struct FlakyBackend {
        inner: InMemoryBackend,
        failures: std::sync::atomic::AtomicUsize,
    }

    impl FlakyBackend {
        fn failing_first(failures: usize) -> Self {
            Self {
                inner: InMemoryBackend::new(),
                failures: std::sync::atomic::AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait::async_trait]
    impl PersistenceBackend for FlakyBackend {
        async fn load(&self) -> Result<PreferenceTable> {
            self.inner.load().await
        }

        async fn save(&self, table: &PreferenceTable) -> Result<()> {
            use std::sync::atomic::Ordering;
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(MemoryError::Flush("transient write error".to_string()));
            }
            self.inner.save(table).await
        }
    }

    #[tokio::test]
    async fn test_immediate_mode_writes_each_snapshot() {
        let backend = InMemoryBackend::new();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = FlushWorker::spawn(
            Arc::new(backend.clone()),
            rx,
            cancel.clone(),
            Duration::ZERO,
            Duration::from_secs(1),
        );

        tx.send(snapshot(1, "u1", "fishing")).await.unwrap();
        tx.send(snapshot(2, "u1", "fishing，movies")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(backend.stored().await.get("u1").unwrap(), "fishing，movies");
        assert_eq!(backend.save_count().await, 2);
    }

    #[tokio::test]
    async fn test_cancel_drains_and_flushes_newest() {
        let backend = InMemoryBackend::new();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        // Queue everything before the worker starts so the drain path sees it
        tx.send(snapshot(3, "u1", "newest")).await.unwrap();
        tx.send(snapshot(1, "u1", "oldest")).await.unwrap();
        tx.send(snapshot(2, "u1", "middle")).await.unwrap();
        cancel.cancel();

        let handle = FlushWorker::spawn(
            Arc::new(backend.clone()),
            rx,
            cancel,
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        handle.await.unwrap();

        assert_eq!(backend.stored().await.get("u1").unwrap(), "newest");
        assert_eq!(backend.save_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_flush_does_not_stop_worker() {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = FlushWorker::spawn(
            Arc::new(FailingBackend),
            rx,
            cancel.clone(),
            Duration::ZERO,
            Duration::from_secs(1),
        );

        tx.send(snapshot(1, "u1", "a")).await.unwrap();
        tx.send(snapshot(2, "u1", "b")).await.unwrap();
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio_test::assert_ok!(handle.await);
    }

    #[tokio::test]
    async fn test_resent_snapshot_is_saved_after_failed_write() {
        let backend = Arc::new(FlakyBackend::failing_first(1));
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = FlushWorker::spawn(
            backend.clone(),
            rx,
            cancel.clone(),
            Duration::ZERO,
            Duration::from_secs(1),
        );

        tx.send(snapshot(1, "u1", "fishing")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.inner.stored().await.is_empty());

        // Same version again, as the store sends on shutdown
        tx.send(snapshot(1, "u1", "fishing")).await.unwrap();
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(backend.inner.stored().await.get("u1").unwrap(), "fishing");
        assert_eq!(backend.inner.save_count().await, 1);
    }

    #[tokio::test]
    async fn test_saved_version_is_not_written_twice() {
        let backend = InMemoryBackend::new();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = FlushWorker::spawn(
            Arc::new(backend.clone()),
            rx,
            cancel.clone(),
            Duration::ZERO,
            Duration::from_secs(1),
        );

        tx.send(snapshot(2, "u1", "new")).await.unwrap();
        tx.send(snapshot(2, "u1", "new")).await.unwrap();
        tx.send(snapshot(1, "u1", "old")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(backend.stored().await.get("u1").unwrap(), "new");
        assert_eq!(backend.save_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_mode_coalesces_bursts() {
        let backend = InMemoryBackend::new();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = FlushWorker::spawn(
            Arc::new(backend.clone()),
            rx,
            cancel.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );

        // Let the worker consume its immediate first tick
        tokio::task::yield_now().await;
        for version in 1..=5 {
            tx.send(snapshot(version, "u1", &format!("v{}", version))).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(backend.stored().await.get("u1").unwrap(), "v5");
        assert_eq!(backend.save_count().await, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
