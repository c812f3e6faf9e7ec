//! Short-term conversation memory
//!
//! Keeps the most recent turns for every user, in arrival order, in memory only.

use crate::config::DEFAULT_MAX_TURNS;
use crate::memory::keywords::NO_DATA;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// One user input and the agent's reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub user_id: String,
    pub session_id: String,
    pub input_text: String,
    pub reply_text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        input_text: impl Into<String>,
        reply_text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            input_text: input_text.into(),
            reply_text: reply_text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded turn history for one user
#[derive(Debug, Clone, Default)]
struct RecencyEntry {
    turns: VecDeque<Turn>,
}

impl RecencyEntry {
    fn push(&mut self, turn: Turn, max_turns: usize) {
        self.turns.push_back(turn);
        while self.turns.len() > max_turns {
            self.turns.pop_front();
        }
    }

    fn render(&self) -> String {
        self.turns
            .iter()
            .enumerate()
            .map(|(i, turn)| {
                if turn.reply_text.is_empty() {
                    format!("Turn {} user input: {}", i + 1, turn.input_text)
                } else {
                    format!(
                        "Turn {} user input: {}; agent reply: {}",
                        i + 1,
                        turn.input_text,
                        turn.reply_text
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Per-user recency store guarded by a single lock
pub struct RecencyStore {
    entries: RwLock<HashMap<String, RecencyEntry>>,
    max_turns: usize,
}

impl RecencyStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_TURNS)
    }

    /// Store holding at most `max_turns` turns per user
    pub fn with_capacity(max_turns: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Append a turn, evicting the oldest ones beyond the capacity
    pub async fn append_turn(&self, turn: Turn) {
        let mut entries = self.entries.write().await;
        entries
            .entry(turn.user_id.clone())
            .or_default()
            .push(turn, self.max_turns);
    }

    /// Numbered, oldest-first summary of the user's turns, or [`NO_DATA`]
    pub async fn render_context(&self, user_id: &str) -> String {
        let entries = self.entries.read().await;
        match entries.get(user_id) {
            Some(entry) if !entry.turns.is_empty() => entry.render(),
            _ => NO_DATA.to_string(),
        }
    }

    /// Copy of the user's turns, oldest first
    pub async fn turns(&self, user_id: &str) -> Vec<Turn> {
        let entries = self.entries.read().await;
        entries
            .get(user_id)
            .map(|entry| entry.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn turn_count(&self, user_id: &str) -> usize {
        let entries = self.entries.read().await;
        entries.get(user_id).map_or(0, |entry| entry.turns.len())
    }

    /// Forget everything held for a user
    pub async fn clear(&self, user_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(user_id);
    }
}

impl Default for RecencyStore {
    fn default() -> Self {
        Self::new()
    }
}
