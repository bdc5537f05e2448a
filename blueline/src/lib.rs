//! # Blueline
//!
//! A durable, resumable processing pipeline for multi-page plan documents.
//!
//! Blueline turns an uploaded plan into per-sheet derived artifacts and
//! tracks completion with a fan-in coordinator:
//!
//! - **Durable step execution**: every step is memoized by (run id, step
//!   name) so a crashed run resumes from its last completed step
//! - **Per-step retry, backoff, and timeout**: mandatory stages retry then
//!   abort, detection stages retry then skip
//! - **Fan-in lifecycle tracking**: per-sheet completion signals fold into
//!   one coarse phase per plan, with a join barrier over the two detection
//!   branches
//! - **Best-effort telemetry**: domain events are emitted at every
//!   milestone and never affect control flow
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use blueline::prelude::*;
//!
//! let deps = PipelineDeps {
//!     engine: StepEngine::in_memory(),
//!     gateway: ProcessingGateway::new(&ServiceRouting::Remote {
//!         base_url: "https://processing.example.com".into(),
//!     }),
//!     store: ArtifactStore::new(blobs),
//!     events: EventEmitter::new(log),
//!     coordinator: coordinator.clone(),
//!     config: PipelineConfig::default(),
//! };
//!
//! let summary = process_plan(&deps, &input).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod pipeline;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coordinator::{FanInCoordinator, PlanProgress, ProcessingPhase};
    pub use crate::engine::{
        BackoffShape, InMemoryMemoStore, MemoStore, RetryPolicy, StepEngine, StepSpec,
    };
    pub use crate::errors::{
        EngineError, EventLogError, GatewayError, PipelineError, StepError, StoreError,
    };
    pub use crate::events::{CollectingEventLog, DomainEvent, EventEmitter, EventLog, LoggingEventLog};
    pub use crate::gateway::{
        HttpBackend, ProcessingBackend, ProcessingGateway, ServiceRequest, ServiceResponse,
        ServiceRouting,
    };
    pub use crate::pipeline::{
        process_plan, PipelineConfig, PipelineDeps, PlanInput, RunSummary, SheetDescriptor,
        SheetMetadata,
    };
    pub use crate::store::{ArtifactStore, BlobStore, InMemoryBlobStore, PlanScope};
}
