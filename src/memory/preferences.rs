//! Long-term preference memory
//!
//! Holds a bounded, deduplicated keyword set per user. Every commit updates the
//! in-memory table under one lock, copies it, and hands the copy to the flush
//! worker after the lock is released. Callers never wait on disk I/O.

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::memory::flush::{FlushWorker, Snapshot};
use crate::memory::keywords::{
    is_empty_marker, merge_keywords, render_keywords, split_keywords, NO_DATA,
};
use crate::memory::persistence::{JsonFileBackend, PersistenceBackend, PreferenceTable};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct PreferenceState {
    table: PreferenceTable,
    /// Bumped on every commit, stamped on the snapshot handed to the worker
    version: u64,
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    stopped: bool,
    worker: Option<JoinHandle<()>>,
}

/// Per-user keyword store with asynchronous persistence
pub struct PreferenceStore {
    state: Mutex<PreferenceState>,
    backend: Arc<dyn PersistenceBackend>,
    sender: RwLock<Option<mpsc::Sender<Snapshot>>>,
    lifecycle: Mutex<Lifecycle>,
    cancel: CancellationToken,
    max_keywords: usize,
    flush_interval: Duration,
    channel_capacity: usize,
    io_timeout: Duration,
}

impl PreferenceStore {
    pub fn new(backend: Arc<dyn PersistenceBackend>, config: &MemoryConfig) -> Self {
        Self {
            state: Mutex::new(PreferenceState::default()),
            backend,
            sender: RwLock::new(None),
            lifecycle: Mutex::new(Lifecycle::default()),
            cancel: CancellationToken::new(),
            max_keywords: config.max_keywords.max(1),
            flush_interval: config.flush_interval,
            channel_capacity: config.channel_capacity.max(1),
            io_timeout: config.io_timeout,
        }
    }

    /// Store persisted to the JSON file named in `config`
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(Arc::new(JsonFileBackend::new(&config.data_path)), config)
    }

    pub fn max_keywords(&self) -> usize {
        self.max_keywords
    }

    /// Load the persisted table and start the flush worker.
    ///
    /// Calling it again is a no-op. A storage problem is returned as
    /// [`MemoryError::Init`], but the store still starts on an empty table and
    /// keeps accepting commits.
    pub async fn init(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.initialized {
            return Ok(());
        }
        if lifecycle.stopped {
            return Err(MemoryError::Init(
                "preference store has already been shut down".to_string(),
            ));
        }

        let loaded = match tokio::time::timeout(self.io_timeout, self.backend.load()).await {
            Ok(result) => result,
            Err(_) => Err(MemoryError::Init(format!(
                "loading preferences timed out after {:?}",
                self.io_timeout
            ))),
        };

        let outcome = {
            let mut state = self.state.lock().await;
            match loaded {
                Ok(mut table) => {
                    // Commits made before init win over what was on disk
                    table.extend(std::mem::take(&mut state.table));
                    state.table = table;
                    info!(users = state.table.len(), "Preference store loaded");
                    Ok(())
                }
                Err(e) => {
                    let e = if matches!(e, MemoryError::Init(_)) {
                        e
                    } else {
                        MemoryError::Init(e.to_string())
                    };
                    warn!(error = %e, "Preference store starting with an empty table");
                    Err(e)
                }
            }
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        lifecycle.worker = Some(FlushWorker::spawn(
            self.backend.clone(),
            rx,
            self.cancel.clone(),
            self.flush_interval,
            self.io_timeout,
        ));
        *self.sender.write().await = Some(tx);
        lifecycle.initialized = true;

        info!("Preference store initialized");
        outcome
    }

    /// Current keyword string for `user_id`, or [`NO_DATA`]
    pub async fn get(&self, user_id: &str) -> String {
        let state = self.state.lock().await;
        match state.table.get(user_id) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => NO_DATA.to_string(),
        }
    }

    /// Merge `new_keywords` into the user's set and queue the table for flushing.
    ///
    /// Returns the merged keyword string. Empty input and the "none" markers
    /// leave the store untouched and return the current value.
    pub async fn merge_and_commit(&self, user_id: &str, new_keywords: &str) -> String {
        if is_empty_marker(new_keywords) {
            return self.get(user_id).await;
        }

        let incoming = split_keywords(new_keywords);
        if incoming.is_empty() {
            return self.get(user_id).await;
        }

        let (rendered, snapshot) = {
            let mut state = self.state.lock().await;

            let existing = state
                .table
                .get(user_id)
                .map(|value| split_keywords(value))
                .unwrap_or_default();
            let merged = merge_keywords(&existing, &incoming, self.max_keywords);
            let rendered = render_keywords(&merged);

            state.table.insert(user_id.to_string(), rendered.clone());
            state.version += 1;

            debug!(
                user_id = %user_id,
                keyword_count = merged.len(),
                version = state.version,
                "Committed preferences"
            );

            let snapshot = Snapshot {
                version: state.version,
                table: state.table.clone(),
            };
            (rendered, snapshot)
        };

        self.enqueue(snapshot).await;
        rendered
    }

    /// Copy of the whole in-memory table
    pub async fn snapshot(&self) -> PreferenceTable {
        self.state.lock().await.table.clone()
    }

    /// Stop the flush worker after one final flush and wait for it.
    ///
    /// Everything committed before this call is on storage when it returns.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.stopped {
            return;
        }
        lifecycle.stopped = true;

        if lifecycle.initialized {
            let last = {
                let state = self.state.lock().await;
                Snapshot {
                    version: state.version,
                    table: state.table.clone(),
                }
            };
            self.enqueue(last).await;
        }

        self.sender.write().await.take();
        self.cancel.cancel();

        if let Some(worker) = lifecycle.worker.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "Flush worker terminated abnormally");
            }
        }

        info!("Preference store shut down");
    }

    async fn enqueue(&self, snapshot: Snapshot) {
        let sender = self.sender.read().await.clone();
        match sender {
            Some(tx) => {
                if tx.send(snapshot).await.is_err() {
                    warn!("Flush channel closed, snapshot kept in memory only");
                }
            }
            None => debug!(
                version = snapshot.version,
                "Flush worker not running, snapshot kept in memory only"
            ),
        }
    }
}

impl Drop for PreferenceStore {
    fn drop(&mut self) {
        // Lets a still-running worker do its final flush and exit
        self.cancel.cancel();
    }
}
