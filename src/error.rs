//! Error types for the companion memory subsystem

use thiserror::Error;

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Error, Debug)]
pub enum MemoryError {

    // =============================
    // Lifecycle Errors
    // =============================

    /// Storage was not usable at startup. The store keeps running on an empty table.
    #[error("Init error: {0}")]
    Init(String),

    /// A single snapshot write failed. Never surfaced to callers of the stores.
    #[error("Flush error: {0}")]
    Flush(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
