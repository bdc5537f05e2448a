//! Durable step memoization records.
//!
//! Each (run id, step name) pair maps to at most one record. The engine
//! consults the store before executing a step and writes the outcome back
//! after the step reaches a terminal state; a resumed run returns cached
//! results instead of re-running side effects.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Terminal status of a memoized step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// The step completed and its result is cached.
    Completed,
    /// The step failed terminally (fatal or exhausted retries).
    Failed,
}

/// Durable record of one step's terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Terminal status.
    pub status: StepStatus,
    /// JSON result for completed steps, last error message otherwise.
    pub result: serde_json::Value,
    /// Attempts consumed, including the first.
    pub attempts: usize,
}

impl StepRecord {
    /// Creates a completed record.
    #[must_use]
    pub const fn completed(result: serde_json::Value, attempts: usize) -> Self {
        Self {
            status: StepStatus::Completed,
            result,
            attempts,
        }
    }

    /// Creates a failed record carrying the last error message.
    #[must_use]
    pub fn failed(message: impl Into<String>, attempts: usize) -> Self {
        Self {
            status: StepStatus::Failed,
            result: serde_json::Value::String(message.into()),
            attempts,
        }
    }
}

/// Builds the storage key for a (run id, step name) pair.
///
/// Step names embed page ids and stay well under key-length limits, but the
/// key is hashed anyway so any durable backend can store it verbatim.
#[must_use]
pub fn memo_key(run_id: &str, step_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(b":");
    hasher.update(step_name.as_bytes());
    let digest = hasher.finalize();
    format!("step:{}", hex::encode(&digest[..16]))
}

/// Durable storage backend for step records.
///
/// Implementations must make `put` visible to any subsequent `get` for the
/// same key; the engine relies on that for crash-resume semantics.
#[async_trait]
pub trait MemoStore: Send + Sync {
    /// Gets the record for a key, if one exists.
    async fn get(&self, key: &str) -> Option<StepRecord>;

    /// Writes the record for a key, replacing any previous record.
    async fn put(&self, key: &str, record: StepRecord);

    /// Removes all records. Used by tests and run re-triggers.
    async fn clear(&self);
}

/// In-memory memo store.
///
/// The production deployment substitutes a persistent backend; the trait is
/// the durability seam.
#[derive(Debug, Default)]
pub struct InMemoryMemoStore {
    records: Arc<Mutex<HashMap<String, StepRecord>>>,
}

impl InMemoryMemoStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl MemoStore for InMemoryMemoStore {
    async fn get(&self, key: &str) -> Option<StepRecord> {
        self.records.lock().get(key).cloned()
    }

    async fn put(&self, key: &str, record: StepRecord) {
        self.records.lock().insert(key.to_string(), record);
    }

    async fn clear(&self) {
        self.records.lock().clear();
    }
}
