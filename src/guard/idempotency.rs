//! Short-window deduplication of mutating tool calls.
//!
//! A model that retries a `send_email` call with identical arguments must not
//! send the email twice. Each mutating call is fingerprinted and recorded; a
//! second identical call within the window is refused.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::call_fingerprint;

/// Default dedup window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// In-memory store of recently executed mutating calls, shared by all workers.
pub struct MutationDeduper {
    entries: Mutex<HashMap<String, Instant>>,
    window: Duration,
    max_entries: usize,
}

impl Default for MutationDeduper {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl MutationDeduper {
    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(window: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            max_entries: max_entries.max(1),
        }
    }

    /// Dedup key for a call: scoped by workspace so two workspaces sending
    /// the same message do not block each other.
    pub fn key(workspace_id: &str, tool: &str, params: &Value) -> String {
        format!("{}:{}", workspace_id, call_fingerprint(tool, params))
    }

    /// Returns true if the key is new (execute the call) and records it.
    /// Returns false if the same key was recorded within the window.
    pub fn check_and_record(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        if let Some(&recorded_at) = entries.get(key) {
            if now.duration_since(recorded_at) < self.window {
                return false;
            }
        }

        entries.retain(|_, recorded_at| now.duration_since(*recorded_at) < self.window);

        if entries.len() >= self.max_entries {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, t)| **t)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(key.to_string(), now);
        true
    }

    /// Drop a record so a failed call can be retried.
    pub fn forget(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
