//! Agent Memory System
//!
//! Short-term turn history and long-term preference keywords, bundled into a
//! single service object that request handlers share.

pub mod flush;
pub mod keywords;
pub mod persistence;
pub mod preferences;
pub mod recency;

pub use flush::{FlushWorker, Snapshot};
pub use keywords::{KEYWORD_SEPARATOR, NO_DATA};
pub use persistence::{InMemoryBackend, JsonFileBackend, PersistenceBackend, PreferenceTable};
pub use preferences::PreferenceStore;
pub use recency::{RecencyStore, Turn};

use crate::config::MemoryConfig;
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// What a request handler needs before calling the language model
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContext {
    /// Rendered recent turns, or [`NO_DATA`]
    pub history: String,
    /// Rendered preference keywords, or [`NO_DATA`]
    pub preferences: String,
}

/// Both memory stores, constructed once at startup and shared by handle
pub struct AgentMemory {
    recency: RecencyStore,
    preferences: PreferenceStore,
}

impl AgentMemory {
    pub fn new(recency: RecencyStore, preferences: PreferenceStore) -> Self {
        Self {
            recency,
            preferences,
        }
    }

    /// Stores sized by `config`, persisted to its JSON file
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(
            RecencyStore::with_capacity(config.max_turns),
            PreferenceStore::from_config(config),
        )
    }

    /// Same as [`AgentMemory::from_config`] but persisting through `backend`
    pub fn with_backend(config: &MemoryConfig, backend: Arc<dyn PersistenceBackend>) -> Self {
        Self::new(
            RecencyStore::with_capacity(config.max_turns),
            PreferenceStore::new(backend, config),
        )
    }

    pub async fn init(&self) -> Result<()> {
        self.preferences.init().await
    }

    pub fn recency(&self) -> &RecencyStore {
        &self.recency
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// Read both stores for one user
    pub async fn build_context(&self, user_id: &str) -> MemoryContext {
        MemoryContext {
            history: self.recency.render_context(user_id).await,
            preferences: self.preferences.get(user_id).await,
        }
    }

    /// Record a finished exchange and merge the keywords extracted from it.
    ///
    /// Returns the user's merged preference string.
    pub async fn record_exchange(&self, turn: Turn, keywords: &str) -> String {
        let user_id = turn.user_id.clone();
        self.recency.append_turn(turn).await;
        self.preferences.merge_and_commit(&user_id, keywords).await
    }

    /// Final flush of the preference table; waits until it is on storage
    pub async fn shutdown(&self) {
        self.preferences.shutdown().await;
        info!("Agent memory shut down");
    }
}
