//! Durable storage for the preference table
//!
//! The table is small and always written whole, so the file backend rewrites
//! one JSON document per save.

use crate::error::MemoryError;
use crate::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// user_id → rendered preference string
pub type PreferenceTable = BTreeMap<String, String>;

const WRITE_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Trait for preference table persistence
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Read the whole table. Missing or unparseable data loads as empty.
    async fn load(&self) -> Result<PreferenceTable>;

    /// Replace the stored table with `table`
    async fn save(&self, table: &PreferenceTable) -> Result<()>;
}

/// JSON file on local disk
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    MemoryError::Init(format!(
                        "failed to create data directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    /// Write to a sibling temp file, then rename over the target
    async fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        let tmp = self.temp_path();

        let result = match tokio::fs::write(&tmp, bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            // Best effort; the temp file may never have been created
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for JsonFileBackend {
    async fn load(&self) -> Result<PreferenceTable> {
        self.ensure_parent_dir().await?;

        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No preference file yet, creating an empty one");
                self.save(&PreferenceTable::new()).await?;
                return Ok(PreferenceTable::new());
            }
            Err(e) => {
                return Err(MemoryError::Init(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(PreferenceTable::new());
        }

        match serde_json::from_slice::<PreferenceTable>(&raw) {
            Ok(table) => {
                debug!(path = %self.path.display(), users = table.len(), "Loaded preference table");
                Ok(table)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Preference file is not valid, starting from an empty table"
                );
                Ok(PreferenceTable::new())
            }
        }
    }

    async fn save(&self, table: &PreferenceTable) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(table)?;

        let mut last_error = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.write_atomic(&bytes).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(attempt, error = %e, "Preference file write failed");
                    last_error = Some(e);
                    if attempt < WRITE_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(MemoryError::Flush(format!(
            "writing {} failed after {} attempts: {}",
            self.path.display(),
            WRITE_ATTEMPTS,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

/// In-memory backend for development and tests
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    table: Arc<RwLock<PreferenceTable>>,
    saves: Arc<RwLock<usize>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: PreferenceTable) -> Self {
        Self {
            table: Arc::new(RwLock::new(table)),
            saves: Arc::new(RwLock::new(0)),
        }
    }

    /// Table as of the last save
    pub async fn stored(&self) -> PreferenceTable {
        self.table.read().await.clone()
    }

    /// Number of completed saves
    pub async fn save_count(&self) -> usize {
        *self.saves.read().await
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn load(&self) -> Result<PreferenceTable> {
        Ok(self.table.read().await.clone())
    }

    async fn save(&self, table: &PreferenceTable) -> Result<()> {
        *self.table.write().await = table.clone();
        *self.saves.write().await += 1;
        Ok(())
    }
}
