//! Monotonic id generation.
//!
//! Each generator owns its own counter. Session ids key persisted snapshots,
//! so engines share [`shared_sessions`] unless they are handed a generator
//! of their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::starting_at(prefix, 1)
    }

    /// Resume numbering after ids that already exist.
    pub fn starting_at(prefix: impl Into<String>, first: u64) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(first),
        }
    }

    /// Generator for agenda items (`item-N`).
    pub fn items() -> Self {
        Self::new("item")
    }

    /// Generator for sessions (`session-N`).
    pub fn sessions() -> Self {
        Self::new("session")
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// The process-wide session id generator.
pub fn shared_sessions() -> Arc<IdGenerator> {
    static SESSIONS: OnceLock<Arc<IdGenerator>> = OnceLock::new();
    SESSIONS
        .get_or_init(|| Arc::new(IdGenerator::sessions()))
        .clone()
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::items()
    }
}
