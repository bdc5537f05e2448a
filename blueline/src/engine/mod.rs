//! Durable step execution engine.
//!
//! The engine executes named steps strictly in the order the caller drives
//! them. Each step is memoized by (run id, step name): a completed step's
//! result is computed at most once and returned from the memo store on any
//! later invocation, which is what lets a crashed run resume from its last
//! completed step. Each attempt is bounded by the step's timeout, retried
//! per the step's policy, and a fatal failure aborts without consuming
//! retry budget.
//!
//! Side effects inside a work function are not made idempotent by the
//! engine; step authors rely on deterministic storage keys and
//! order-insensitive signals so an at-least-once re-run is harmless.

mod memo;
mod retry;

pub use memo::{memo_key, InMemoryMemoStore, MemoStore, StepRecord, StepStatus};
pub use retry::{BackoffShape, RetryPolicy};

use crate::errors::{EngineError, StepError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Specification of a single step: name, retry policy, and attempt timeout.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Unique name within the run; the memoization key component.
    pub name: String,
    /// Retry policy applied to retryable failures.
    pub retry: RetryPolicy,
    /// Upper bound on one attempt, including all sub-calls.
    pub timeout: Duration,
}

impl StepSpec {
    /// Creates a step spec with the default policy and a 60s timeout.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Executes memoized, retried, timeout-bounded steps against a durable
/// record store.
#[derive(Clone)]
pub struct StepEngine {
    memo: Arc<dyn MemoStore>,
}

impl StepEngine {
    /// Creates an engine over the given memo store.
    #[must_use]
    pub fn new(memo: Arc<dyn MemoStore>) -> Self {
        Self { memo }
    }

    /// Creates an engine over a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryMemoStore::new()))
    }

    /// Runs one step to a terminal outcome.
    ///
    /// If a completed record already exists for (run id, step name), the
    /// cached result is returned and `work` is never invoked. A prior
    /// failed record does not short-circuit: a re-triggered run gets a
    /// fresh retry budget for the step that sank it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Fatal`] when the work function raises a fatal
    /// failure, [`EngineError::RetriesExhausted`] when the retry budget is
    /// consumed, and [`EngineError::Memo`] when a result cannot be encoded
    /// or a cached one cannot be decoded.
    pub async fn run_step<T, F, Fut>(
        &self,
        run_id: &str,
        spec: &StepSpec,
        mut work: F,
    ) -> Result<T, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let key = memo_key(run_id, &spec.name);

        if let Some(record) = self.memo.get(&key).await {
            if record.status == StepStatus::Completed {
                debug!(run_id, step = %spec.name, "returning memoized step result");
                return serde_json::from_value(record.result).map_err(|source| {
                    EngineError::Memo {
                        step: spec.name.clone(),
                        source,
                    }
                });
            }
        }

        let mut attempts = 0usize;
        loop {
            attempts += 1;
            let outcome = match tokio::time::timeout(spec.timeout, work()).await {
                Ok(result) => result,
                Err(_) => Err(StepError::retryable(format!(
                    "attempt timed out after {}ms",
                    spec.timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    let json =
                        serde_json::to_value(&value).map_err(|source| EngineError::Memo {
                            step: spec.name.clone(),
                            source,
                        })?;
                    self.memo
                        .put(&key, StepRecord::completed(json, attempts))
                        .await;
                    debug!(run_id, step = %spec.name, attempts, "step completed");
                    return Ok(value);
                }
                Err(StepError::Fatal(message)) => {
                    self.memo
                        .put(&key, StepRecord::failed(&message, attempts))
                        .await;
                    warn!(run_id, step = %spec.name, error = %message, "step failed fatally");
                    return Err(EngineError::Fatal {
                        step: spec.name.clone(),
                        message,
                    });
                }
                Err(StepError::Retryable(message)) => {
                    if spec.retry.allows_retry(attempts) {
                        let delay = spec.retry.delay_for(attempts);
                        debug!(
                            run_id,
                            step = %spec.name,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "retrying step after failure"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        self.memo
                            .put(&key, StepRecord::failed(&message, attempts))
                            .await;
                        warn!(
                            run_id,
                            step = %spec.name,
                            attempts,
                            error = %message,
                            "step exhausted retry budget"
                        );
                        return Err(EngineError::RetriesExhausted {
                            step: spec.name.clone(),
                            attempts,
                            message,
                        });
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for StepEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_spec(name: &str) -> StepSpec {
        StepSpec::new(name)
            .with_retry(RetryPolicy::new().with_attempt_limit(3).with_base_delay_ms(1))
            .with_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_step_runs_once_and_memoizes() {
        let engine = StepEngine::in_memory();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result: u32 = engine
                .run_step("run-1", &fast_spec("compute"), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(42u32) }
                })
                .await
                .unwrap();
            assert_eq!(result, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memoization_is_scoped_to_run_id() {
        let engine = StepEngine::in_memory();
        let calls = AtomicUsize::new(0);

        for run in ["run-a", "run-b"] {
            let _: u32 = engine
                .run_step(run, &fast_spec("compute"), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(7u32) }
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried_to_success() {
        let engine = StepEngine::in_memory();
        let calls = AtomicUsize::new(0);

        let result: String = engine
            .run_step("run-1", &fast_spec("flaky"), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StepError::retryable("transient"))
                    } else {
                        Ok("done".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_terminal() {
        let engine = StepEngine::in_memory();
        let calls = AtomicUsize::new(0);

        let result: Result<u32, _> = engine
            .run_step("run-1", &fast_spec("always-fails"), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StepError::retryable("still broken")) }
            })
            .await;

        assert!(matches!(
            result,
            Err(EngineError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_bypasses_retry_budget() {
        let engine = StepEngine::in_memory();
        let calls = AtomicUsize::new(0);

        let result: Result<u32, _> = engine
            .run_step("run-1", &fast_spec("doomed"), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StepError::fatal("source not found")) }
            })
            .await;

        assert!(matches!(result, Err(EngineError::Fatal { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable_attempt() {
        let engine = StepEngine::in_memory();
        let calls = AtomicUsize::new(0);
        let spec = StepSpec::new("slow")
            .with_retry(RetryPolicy::new().with_attempt_limit(2).with_base_delay_ms(1))
            .with_timeout(Duration::from_millis(10));

        let result: Result<u32, _> = engine
            .run_step("run-1", &spec, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(1u32)
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(EngineError::RetriesExhausted { attempts: 2, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_record_does_not_short_circuit_rerun() {
        let engine = StepEngine::in_memory();
        let calls = AtomicUsize::new(0);
        let spec = fast_spec("recovers-on-rerun");

        let first: Result<u32, _> = engine
            .run_step("run-1", &spec, || async {
                Err(StepError::fatal("storage offline"))
            })
            .await;
        assert!(first.is_err());

        let second: u32 = engine
            .run_step("run-1", &spec, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(9u32) }
            })
            .await
            .unwrap();

        assert_eq!(second, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
