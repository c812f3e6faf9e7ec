//! Companion Memory
//!
//! Memory subsystem for a conversational agent:
//! - Short-term: the last few turns per user, in memory only
//! - Long-term: a bounded, deduplicated keyword set per user
//! - Long-term state is flushed to disk by a background worker, off the request path
//!
//! REQUEST FLOW:
//! BUILD CONTEXT → (LLM call, elsewhere) → RECORD TURN → MERGE KEYWORDS → ASYNC FLUSH

pub mod config;
pub mod error;
pub mod memory;

pub use error::Result;

// Re-export common types
pub use config::MemoryConfig;
pub use error::MemoryError;
pub use memory::{AgentMemory, MemoryContext, PreferenceStore, RecencyStore, Turn, NO_DATA};
