//! Best-effort domain event emission.
//!
//! Events are telemetry, not a durability mechanism: downstream projections
//! read them, but the pipeline never depends on a commit succeeding. The
//! [`EventEmitter`] is the one place that swallows commit failures, so step
//! bodies stay free of ad hoc error handling around telemetry.

use crate::errors::EventLogError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A domain event committed to the external event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Event name, e.g. `pageImageGenerated`.
    pub name: String,
    /// ISO 8601 timestamp of emission.
    pub timestamp: String,
    /// The plan this event belongs to.
    pub plan_id: String,
    /// Event payload.
    pub payload: serde_json::Value,
}

impl DomainEvent {
    /// Creates an event for the given plan.
    #[must_use]
    pub fn new(name: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string(),
            plan_id: plan_id.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Append-only commit interface of the external event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Commits one event.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] when the append fails; the emitter logs
    /// and drops it.
    async fn commit(&self, event: DomainEvent) -> Result<(), EventLogError>;
}

/// Non-propagating wrapper around an [`EventLog`].
#[derive(Clone)]
pub struct EventEmitter {
    log: std::sync::Arc<dyn EventLog>,
}

impl EventEmitter {
    /// Creates an emitter over the given log.
    #[must_use]
    pub fn new(log: std::sync::Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    /// Emits one event, swallowing commit failures.
    pub async fn emit(&self, event: DomainEvent) {
        let name = event.name.clone();
        let plan_id = event.plan_id.clone();
        if let Err(err) = self.log.commit(event).await {
            warn!(event = %name, plan_id = %plan_id, error = %err, "event commit failed, dropping");
        }
    }

    /// Emits a named event with a payload.
    pub async fn emit_named(&self, name: &str, plan_id: &str, payload: serde_json::Value) {
        self.emit(DomainEvent::new(name, plan_id).with_payload(payload))
            .await;
    }

    /// Emits a progress event for the plan.
    pub async fn progress(&self, plan_id: &str, percent: u8) {
        self.emit_named(
            "processingProgress",
            plan_id,
            serde_json::json!({ "percent": percent.min(100) }),
        )
        .await;
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

/// An event log that writes events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventLog;

#[async_trait]
impl EventLog for LoggingEventLog {
    async fn commit(&self, event: DomainEvent) -> Result<(), EventLogError> {
        info!(
            event = %event.name,
            plan_id = %event.plan_id,
            payload = %event.payload,
            "domain event"
        );
        Ok(())
    }
}

/// A collecting event log for tests.
#[derive(Debug, Default)]
pub struct CollectingEventLog {
    events: parking_lot::RwLock<Vec<DomainEvent>>,
    fail_all: parking_lot::RwLock<bool>,
}

impl CollectingEventLog {
    /// Creates a new collecting log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    /// Returns the names of all collected events, in commit order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Returns events with the given name.
    #[must_use]
    pub fn events_named(&self, name: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Makes every subsequent commit fail.
    pub fn fail_commits(&self) {
        *self.fail_all.write() = true;
    }
}

#[async_trait]
impl EventLog for CollectingEventLog {
    async fn commit(&self, event: DomainEvent) -> Result<(), EventLogError> {
        if *self.fail_all.read() {
            return Err(EventLogError("log unavailable".to_string()));
        }
        self.events.write().push(event);
        Ok(())
    }
}
