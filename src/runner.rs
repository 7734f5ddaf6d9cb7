//! Suite execution: cases run in order and share one variable scope.

use crate::executor::{CaseExecutor, DefaultCaseExecutor};
use crate::model::*;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Environments chosen by the caller for particular case ids.
pub type EnvironmentOverrides = HashMap<u64, Environment>;

/// Runs suites with a single-case executor.
#[derive(Debug)]
pub struct SuiteRunner<E = DefaultCaseExecutor> {
    executor: E,
}

impl<E: CaseExecutor> SuiteRunner<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Pick the environment for one suite entry: the environment pinned
    /// on the entry, then the caller's override for the case id, then
    /// the suite default.
    pub fn resolve_environment<'a>(
        suite_case: &'a SuiteCase,
        default_environment: &'a Environment,
        overrides: &'a EnvironmentOverrides,
    ) -> &'a Environment {
        if let Some(pinned) = &suite_case.environment {
            return pinned;
        }
        suite_case
            .case
            .id
            .and_then(|id| overrides.get(&id))
            .unwrap_or(default_environment)
    }

    /// Run every case of `suite` in order.
    ///
    /// Values extracted by a case are visible to every later case, with
    /// later extractions overwriting earlier ones. A failing or erroring
    /// case never stops the suite.
    #[instrument(skip_all, fields(suite = %suite.name))]
    pub async fn execute_suite(
        &self,
        suite: &TestSuite,
        default_environment: &Environment,
        overrides: &EnvironmentOverrides,
    ) -> SuiteRunResult {
        let started_at = Utc::now();
        let start_time = Instant::now();
        let cases = suite.ordered_cases();
        let mut extracted_variables = VariableScope::new();
        let mut results = Vec::with_capacity(cases.len());

        info!(
            "Executing test suite: {} with {} test cases",
            suite.name,
            cases.len()
        );

        for (idx, suite_case) in cases.iter().enumerate() {
            let case = &suite_case.case;
            let environment = Self::resolve_environment(
                suite_case,
                default_environment,
                overrides,
            );

            info!(
                "Running case {}/{}: {} with environment: {}",
                idx + 1,
                cases.len(),
                case.label(),
                environment.label()
            );
            debug!("Using variables: {:?}", extracted_variables);

            let result = self
                .executor
                .execute_case(case, environment, &extracted_variables)
                .await;

            if !result.extracted_params.is_empty() {
                extracted_variables.extend(
                    result
                        .extracted_params
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                debug!(
                    "Updated variables after test case: {:?}",
                    extracted_variables
                );
            }

            info!(
                "Test case {} execution result: {}",
                case.label(),
                result.status
            );

            results.push(CaseRunResult {
                case_id: case.id,
                case_name: case.name.clone(),
                environment_id: environment.id,
                result,
            });
        }

        let summary = RunSummary::from_results(results.iter().map(|r| &r.result));
        info!(
            "Test suite execution completed. Total: {}, Passed: {}, Failed: {}, Errors: {}",
            summary.total, summary.passed, summary.failed, summary.errored
        );

        SuiteRunResult {
            suite_name: suite.name.clone(),
            started_at,
            duration_ms: start_time.elapsed().as_millis() as u64,
            summary,
            results,
        }
    }
}

/// Run a suite on a background task.
///
/// A panic inside the engine is not caught here; awaiting the handle
/// reports it as a join error.
pub fn spawn_suite<E>(
    runner: Arc<SuiteRunner<E>>,
    suite: TestSuite,
    default_environment: Environment,
    overrides: EnvironmentOverrides,
) -> JoinHandle<SuiteRunResult>
where
    E: CaseExecutor + 'static,
{
    tokio::spawn(async move {
        runner
            .execute_suite(&suite, &default_environment, &overrides)
            .await
    })
}

/// Run a single case on a background task with an empty caller scope.
pub fn spawn_case<E>(
    executor: Arc<E>,
    case: TestCase,
    environment: Environment,
) -> JoinHandle<ExecutionResult>
where
    E: CaseExecutor + ?Sized + 'static,
{
    tokio::spawn(async move {
        executor
            .execute_case(&case, &environment, &VariableScope::new())
            .await
    })
}
