//! Environment-driven configuration for the memory subsystem

use crate::error::MemoryError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATA_PATH: &str = "./data/long_term_memory.json";
pub const DEFAULT_MAX_TURNS: usize = 10;
pub const DEFAULT_MAX_KEYWORDS: usize = 50;

/// Tunables for both stores and the flush pipeline
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Location of the persisted preference table
    pub data_path: PathBuf,
    /// Turns kept per user in the recency store
    pub max_turns: usize,
    /// Keywords kept per user in the preference store
    pub max_keywords: usize,
    /// Batching window of the flush worker. Zero flushes on every commit.
    pub flush_interval: Duration,
    /// Snapshots that may wait in the flush channel before committers wait
    pub channel_capacity: usize,
    /// Upper bound on a single load or save
    pub io_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            max_turns: DEFAULT_MAX_TURNS,
            max_keywords: DEFAULT_MAX_KEYWORDS,
            flush_interval: Duration::from_millis(1000),
            channel_capacity: 100,
            io_timeout: Duration::from_millis(5000),
        }
    }
}

impl MemoryConfig {
    /// Build a config from `MEMORY_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let data_path = env::var("MEMORY_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_path);

        let config = Self {
            data_path,
            max_turns: read_var("MEMORY_MAX_TURNS", defaults.max_turns)?,
            max_keywords: read_var("MEMORY_MAX_KEYWORDS", defaults.max_keywords)?,
            flush_interval: Duration::from_millis(read_var(
                "MEMORY_FLUSH_INTERVAL_MS",
                defaults.flush_interval.as_millis() as u64,
            )?),
            channel_capacity: read_var("MEMORY_CHANNEL_CAPACITY", defaults.channel_capacity)?,
            io_timeout: Duration::from_millis(read_var(
                "MEMORY_IO_TIMEOUT_MS",
                defaults.io_timeout.as_millis() as u64,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(MemoryError::Config("max_turns must be at least 1".to_string()));
        }
        if self.max_keywords == 0 {
            return Err(MemoryError::Config("max_keywords must be at least 1".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(MemoryError::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            MemoryError::Config(format!("{} has an invalid value: {:?}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}
