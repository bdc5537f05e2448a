//! Test doubles and fixtures.
//!
//! The scripted backend stands in for the rendering/vision service; the
//! fixture builds a fully in-memory [`PipelineDeps`] so end-to-end runs
//! need no network or storage.

use crate::coordinator::FanInCoordinator;
use crate::engine::StepEngine;
use crate::errors::GatewayError;
use crate::events::{CollectingEventLog, EventEmitter};
use crate::gateway::{ProcessingBackend, ProcessingGateway, ServiceRequest, ServiceResponse};
use crate::pipeline::{PipelineConfig, PipelineDeps, PlanInput};
use crate::store::{ArtifactStore, InMemoryBlobStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Scripted response for one operation.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    /// JSON body returned for the operation.
    pub body: serde_json::Value,
    /// Binary payload returned for the operation.
    pub payload: Option<Vec<u8>>,
}

impl ScriptedResponse {
    /// A JSON-only response.
    #[must_use]
    pub const fn json(body: serde_json::Value) -> Self {
        Self {
            body,
            payload: None,
        }
    }

    /// A binary response with lifted metadata fields.
    #[must_use]
    pub const fn binary(body: serde_json::Value, payload: Vec<u8>) -> Self {
        Self {
            body,
            payload: Some(payload),
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    responses: HashMap<String, VecDeque<ScriptedResponse>>,
    fail_first: HashMap<String, usize>,
    calls: Vec<ServiceRequest>,
}

/// A [`ProcessingBackend`] with per-operation scripted responses, failure
/// injection, and a call log.
///
/// Scripting an operation once makes its response sticky; scripting it
/// repeatedly queues responses consumed call by call, with the last one
/// sticky.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    state: Mutex<ScriptState>,
}

impl ScriptedBackend {
    /// Creates an empty scripted backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a response for an operation, queued after earlier ones.
    pub fn script(&self, operation: &str, response: ScriptedResponse) {
        self.state
            .lock()
            .responses
            .entry(operation.to_string())
            .or_default()
            .push_back(response);
    }

    /// Drops every scripted response for an operation.
    pub fn clear(&self, operation: &str) {
        self.state.lock().responses.remove(operation);
    }

    /// Makes the first `count` calls of an operation fail with status 503.
    pub fn fail_first(&self, operation: &str, count: usize) {
        self.state
            .lock()
            .fail_first
            .insert(operation.to_string(), count);
    }

    /// Returns how many calls were made for an operation.
    #[must_use]
    pub fn calls_for(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|request| request.operation == operation)
            .count()
    }

    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceRequest> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl ProcessingBackend for ScriptedBackend {
    async fn call(&self, request: ServiceRequest) -> Result<ServiceResponse, GatewayError> {
        let mut state = self.state.lock();
        let operation = request.operation.clone();
        state.calls.push(request);

        if let Some(remaining) = state.fail_first.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(GatewayError::Status {
                    operation,
                    status: 503,
                });
            }
        }

        match state.responses.get_mut(&operation) {
            Some(queue) if !queue.is_empty() => {
                let scripted = if queue.len() > 1 {
                    queue.pop_front().unwrap_or_else(|| unreachable!())
                } else {
                    queue[0].clone()
                };
                Ok(ServiceResponse {
                    status: 200,
                    body: scripted.body,
                    payload: scripted.payload,
                })
            }
            _ => Err(GatewayError::Status {
                operation,
                status: 404,
            }),
        }
    }
}

/// Everything an in-memory pipeline test needs to reach into.
pub struct TestHarness {
    /// The assembled dependency bundle.
    pub deps: PipelineDeps,
    /// The scripted service backend.
    pub backend: Arc<ScriptedBackend>,
    /// The in-memory blob store.
    pub blobs: Arc<InMemoryBlobStore>,
    /// The collecting event log.
    pub events: Arc<CollectingEventLog>,
    /// The fan-in coordinator.
    pub coordinator: Arc<FanInCoordinator>,
}

impl TestHarness {
    /// Builds a harness with fast retry delays.
    #[must_use]
    pub fn new() -> Self {
        let backend = Arc::new(ScriptedBackend::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let events = Arc::new(CollectingEventLog::new());
        let coordinator = Arc::new(FanInCoordinator::new());

        let mut config = PipelineConfig::default();
        config.mandatory_retry = config.mandatory_retry.with_base_delay_ms(1);
        config.detection_retry = config.detection_retry.with_base_delay_ms(1);

        let deps = PipelineDeps {
            engine: StepEngine::in_memory(),
            gateway: ProcessingGateway::with_backend(backend.clone()),
            store: ArtifactStore::new(blobs.clone()),
            events: EventEmitter::new(events.clone()),
            coordinator: coordinator.clone(),
            config,
        };

        Self {
            deps,
            backend,
            blobs,
            events,
            coordinator,
        }
    }

    /// A plan input with fixed ids.
    #[must_use]
    pub fn plan_input(plan_id: &str) -> PlanInput {
        PlanInput {
            plan_id: plan_id.to_string(),
            project_id: Uuid::nil(),
            org_id: Uuid::nil(),
            display_name: "Test Plan".to_string(),
            page_count: None,
        }
    }

    /// Uploads a source document for the plan.
    pub async fn upload_source(&self, input: &PlanInput, bytes: Vec<u8>) {
        use crate::store::BlobStore;
        self.blobs
            .put(&input.scope().source_key(), bytes, "application/pdf")
            .await
            .unwrap_or_else(|_| unreachable!("in-memory put cannot fail"));
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
