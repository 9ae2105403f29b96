//! Layer 5 (extension) — sample execution against synthetic data.
//!
//! Static checks cannot see runtime faults: type mismatches, division by
//! zero, cartesian blowups. This stage hands the *wrapped* query to an
//! external sandbox behind the [`SampleExecutor`] trait and classifies what
//! comes back. The sandbox itself (synthetic data, engine choice, resource
//! limits) is the collaborator's concern; only the interface lives here.
//!
//! The stage is installed only when an executor is provided, and runs after
//! the wrapper so the executed text is exactly what production would run.
//! An empty result is not an error — synthetic data is sparse by nature.

use crate::errors::Rejection;
use crate::stages::{Stage, ValidationContext};
use crate::types::Layer;

/// What a sample run produced.
#[derive(Debug, Clone)]
pub struct SampleExecution {
    /// Number of result rows.
    pub row_count: usize,
    /// Result column names, in order.
    pub column_names: Vec<String>,
    /// Wall-clock execution time in milliseconds.
    pub elapsed_ms: f64,
}

/// Why a sample run failed.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    /// Failure classification (e.g. `"OperationalError"`).
    pub kind: String,
    /// Engine-provided detail.
    pub message: String,
}

/// The sample-execution sandbox collaborator.
pub trait SampleExecutor: Send + Sync {
    /// Run `sql` against the synthetic dataset. The timeout is advisory;
    /// executors that cannot enforce it may overrun.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionFailure`] when the engine rejects or aborts the
    /// query.
    fn execute(&self, sql: &str, timeout_ms: u64) -> Result<SampleExecution, ExecutionFailure>;
}

/// The sample execution stage.
pub struct SampleExecutionCheck {
    executor: Box<dyn SampleExecutor>,
}

impl SampleExecutionCheck {
    /// Wrap an executor as a pipeline stage.
    #[must_use]
    pub fn new(executor: Box<dyn SampleExecutor>) -> Self {
        Self { executor }
    }
}

impl Stage for SampleExecutionCheck {
    fn name(&self) -> &'static str {
        "sample_execution"
    }

    fn layer(&self) -> Layer {
        Layer::SampleExecution
    }

    fn check(&self, ctx: &mut ValidationContext<'_>) -> Result<(), Rejection> {
        let Some(wrapped) = ctx.wrapped_query.as_deref() else {
            return Ok(());
        };

        let outcome = self
            .executor
            .execute(wrapped, ctx.config.sample_timeout_ms)
            .map_err(|failure| Rejection::ExecutionFailed {
                kind: failure.kind,
                message: failure.message,
            })?;

        if outcome.row_count > ctx.config.max_sample_rows {
            return Err(Rejection::ResultSetTooLarge {
                rows: outcome.row_count,
                max: ctx.config.max_sample_rows,
            });
        }

        if outcome.elapsed_ms > ctx.config.sample_timeout_ms as f64 {
            log::warn!(
                "request {}: sample execution took {:.1}ms (advisory limit {}ms)",
                ctx.request_id,
                outcome.elapsed_ms,
                ctx.config.sample_timeout_ms
            );
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::policy::PolicyRuleTable;

    struct FixedExecutor(Result<SampleExecution, ExecutionFailure>);

    impl SampleExecutor for FixedExecutor {
        fn execute(
            &self,
            _sql: &str,
            _timeout_ms: u64,
        ) -> Result<SampleExecution, ExecutionFailure> {
            self.0.clone()
        }
    }

    fn run(executor: FixedExecutor, wrapped: Option<&str>) -> Result<(), Rejection> {
        let config = GuardConfig::default();
        let policy = PolicyRuleTable::builtin();
        let mut ctx = ValidationContext::new("SELECT 1", "req-test", &config, &policy, None);
        ctx.wrapped_query = wrapped.map(str::to_owned);
        SampleExecutionCheck::new(Box::new(executor)).check(&mut ctx)
    }

    fn ok_execution(rows: usize) -> SampleExecution {
        SampleExecution {
            row_count: rows,
            column_names: vec!["gender_concept_id".to_owned(), "Count_Patients".to_owned()],
            elapsed_ms: 12.0,
        }
    }

    #[test]
    fn successful_run_passes() {
        let executor = FixedExecutor(Ok(ok_execution(42)));
        assert!(run(executor, Some("WITH guarded_query AS (SELECT 1) SELECT 1")).is_ok());
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let executor = FixedExecutor(Ok(ok_execution(0)));
        assert!(run(executor, Some("WITH guarded_query AS (SELECT 1) SELECT 1")).is_ok());
    }

    #[test]
    fn engine_failure_maps_to_execution_failed() {
        let executor = FixedExecutor(Err(ExecutionFailure {
            kind: "OperationalError".to_owned(),
            message: "no such column: imaginary".to_owned(),
        }));
        match run(executor, Some("SELECT imaginary")).unwrap_err() {
            Rejection::ExecutionFailed { kind, message } => {
                assert_eq!(kind, "OperationalError");
                assert!(message.contains("imaginary"));
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    #[test]
    fn oversized_result_is_rejected() {
        let executor = FixedExecutor(Ok(ok_execution(10_001)));
        match run(executor, Some("SELECT 1")).unwrap_err() {
            Rejection::ResultSetTooLarge { rows, max } => {
                assert_eq!(rows, 10_001);
                assert_eq!(max, 10_000);
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    #[test]
    fn without_wrapped_query_the_stage_is_inert() {
        let executor = FixedExecutor(Err(ExecutionFailure {
            kind: "never".to_owned(),
            message: "called".to_owned(),
        }));
        assert!(run(executor, None).is_ok());
    }
}
