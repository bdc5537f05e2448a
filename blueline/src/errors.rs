//! Error types for the blueline pipeline.
//!
//! The taxonomy follows the run semantics: step work functions raise
//! [`StepError`], the engine converts exhausted retries and fatal signals
//! into [`EngineError`], and the run surfaces [`PipelineError`]. Collaborator
//! adapters (gateway, store, event log) have their own error types that are
//! mapped into [`StepError`] at the call sites that know which failures are
//! fatal for them.

use thiserror::Error;

/// A failure raised by a step's work function.
///
/// The engine treats the two variants differently: `Retryable` consumes
/// retry budget per the step's policy, `Fatal` aborts the run immediately.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// A transient failure; the engine retries per the step's policy.
    #[error("retryable step failure: {0}")]
    Retryable(String),

    /// A non-recoverable failure; bypasses retry budget and aborts the run.
    #[error("fatal step failure: {0}")]
    Fatal(String),
}

impl StepError {
    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    /// Creates a fatal failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true if the failure is fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// A terminal step outcome reported by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The step raised a fatal error; the run must abort.
    #[error("step '{step}' failed fatally: {message}")]
    Fatal {
        /// The step name.
        step: String,
        /// The underlying error message.
        message: String,
    },

    /// The step exhausted its retry budget.
    #[error("step '{step}' exhausted {attempts} attempts: {message}")]
    RetriesExhausted {
        /// The step name.
        step: String,
        /// Attempts consumed, including the first.
        attempts: usize,
        /// The last attempt's error message.
        message: String,
    },

    /// A memoized result could not be encoded or decoded.
    #[error("memo record for step '{step}' is invalid: {source}")]
    Memo {
        /// The step name.
        step: String,
        /// The serde failure.
        #[source]
        source: serde_json::Error,
    },
}

impl EngineError {
    /// Returns the name of the step that failed.
    #[must_use]
    pub fn step(&self) -> &str {
        match self {
            Self::Fatal { step, .. }
            | Self::RetriesExhausted { step, .. }
            | Self::Memo { step, .. } => step,
        }
    }
}

/// A failure while calling the external rendering/vision service.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The service answered with a non-2xx status.
    #[error("service returned status {status} for '{operation}'")]
    Status {
        /// The operation that was called.
        operation: String,
        /// The HTTP-like status code.
        status: u16,
    },

    /// The service could not be reached.
    #[error("connection to processing service failed: {0}")]
    Connect(String),

    /// The response body could not be decoded.
    #[error("invalid response body for '{operation}': {message}")]
    Decode {
        /// The operation that was called.
        operation: String,
        /// The decode failure.
        message: String,
    },
}

impl From<GatewayError> for StepError {
    fn from(err: GatewayError) -> Self {
        Self::Retryable(err.to_string())
    }
}

/// A failure in the object-storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested blob does not exist.
    #[error("artifact not found: {key}")]
    NotFound {
        /// The storage key that was requested.
        key: String,
    },

    /// The backing store failed.
    #[error("object storage failure: {0}")]
    Backend(String),
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        // A blob that a stage requires but cannot find will never appear by
        // retrying; everything else is transient.
        match err {
            StoreError::NotFound { .. } => Self::Fatal(err.to_string()),
            StoreError::Backend(_) => Self::Retryable(err.to_string()),
        }
    }
}

/// A failure while committing a domain event.
///
/// Never propagated past [`crate::events::EventEmitter`]; telemetry is
/// best-effort.
#[derive(Debug, Error)]
#[error("event commit failed: {0}")]
pub struct EventLogError(pub String);

/// Terminal failure of a whole pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A mandatory step failed terminally.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
