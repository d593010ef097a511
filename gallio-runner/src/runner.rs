// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`].

mod context;
mod executor;

pub use crate::errors::TestError;
pub use context::TestContext;

use crate::{
    assertions::{AssertionFailure, AssertionFailureBehavior},
    config::{GallioProfile, ReapConfig},
    errors::{FatalRunnerError, TestRunnerBuildError, TestRunnerExecuteError},
    model::{TestModel, TestOutcome, TestPlan, TestStep},
    reporter::{CancelReason, TestEvent},
    sandbox::SandboxHandle,
    signal::{SignalHandler, SignalHandlerKind},
    test_log::TestLog,
};
use executor::Executor;
use gallio_filtering::FilterSet;
use gallio_metadata::{StepRunSummary, TestStatus};
use std::{
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::warn;

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    no_capture: bool,
    fail_fast: Option<bool>,
    test_timeout: Option<Option<Duration>>,
    assertion_failure_behavior: Option<AssertionFailureBehavior>,
}

impl TestRunnerBuilder {
    /// Sets no-capture mode.
    ///
    /// In this mode, the output of process-backed tests is passed through rather than kept in the
    /// test log.
    pub fn set_no_capture(&mut self, no_capture: bool) -> &mut Self {
        self.no_capture = no_capture;
        self
    }

    /// Sets fail-fast mode, overriding the profile.
    pub fn set_fail_fast(&mut self, fail_fast: bool) -> &mut Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    /// Sets the per-test-case timeout, overriding the profile. `None` disables the timeout.
    pub fn set_test_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.test_timeout = Some(timeout);
        self
    }

    /// Sets the behavior of the outermost assertion scope, overriding the profile.
    pub fn set_assertion_failure_behavior(
        &mut self,
        behavior: AssertionFailureBehavior,
    ) -> &mut Self {
        self.assertion_failure_behavior = Some(behavior);
        self
    }

    /// Creates a new test runner for the tests in `model` selected by `filter`.
    pub fn build<'a>(
        self,
        model: &'a TestModel,
        filter: &FilterSet,
        profile: &GallioProfile<'_>,
        handler_kind: SignalHandlerKind,
    ) -> Result<TestRunner<'a>, TestRunnerBuildError> {
        let plan = TestPlan::build(model, filter)?;

        let settings = RunSettings {
            profile_name: profile.name().to_owned(),
            no_capture: self.no_capture,
            fail_fast: self.fail_fast.unwrap_or_else(|| profile.fail_fast()),
            test_timeout: self.test_timeout.unwrap_or_else(|| profile.test_timeout()),
            assertion_failure_behavior: self
                .assertion_failure_behavior
                .unwrap_or_else(|| profile.assertion_failure_behavior()),
            capture_process_output: profile.capture_process_output(),
            leak_timeout: profile.leak_timeout(),
            reap: profile.reap(),
        };

        let cancel_state = Arc::new(CancelState::default());
        let signal_state = cancel_state.clone();
        let signal_handler = handler_kind.build(move |event| {
            warn!("received {event} signal, canceling run");
            signal_state.cancel(CancelReason::Signal);
        })?;

        Ok(TestRunner {
            model,
            plan,
            settings: Arc::new(settings),
            cancel_state,
            _signal_handler: signal_handler,
        })
    }
}

/// Settings shared by every test in a run.
#[derive(Clone, Debug)]
pub(crate) struct RunSettings {
    pub(crate) profile_name: String,
    pub(crate) no_capture: bool,
    pub(crate) fail_fast: bool,
    pub(crate) test_timeout: Option<Duration>,
    pub(crate) assertion_failure_behavior: AssertionFailureBehavior,
    pub(crate) capture_process_output: bool,
    pub(crate) leak_timeout: Duration,
    pub(crate) reap: ReapConfig,
}

/// Context for running tests.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner<'a> {
    model: &'a TestModel,
    plan: TestPlan,
    settings: Arc<RunSettings>,
    cancel_state: Arc<CancelState>,
    _signal_handler: SignalHandler,
}

impl<'a> TestRunner<'a> {
    /// The tests that will run.
    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    /// Executes the tests, passing each [`TestEvent`] to `callback`.
    ///
    /// Returns the statistics for the run, or an error if the run couldn't continue.
    pub fn execute<F>(self, mut callback: F) -> Result<RunStats, FatalRunnerError>
    where
        F: FnMut(TestEvent<'_>),
    {
        let result = self.try_execute::<Infallible, _>(|event| {
            callback(event);
            Ok(())
        });
        match result {
            Ok(stats) => Ok(stats),
            Err(TestRunnerExecuteError::Report(never)) => match never {},
            Err(TestRunnerExecuteError::Fatal(error)) => Err(error),
        }
    }

    /// Executes the tests, passing each [`TestEvent`] to `callback`.
    ///
    /// If the callback returns an error, the run is canceled and the first error is returned once
    /// the tests that are running have finished.
    pub fn try_execute<E, F>(self, callback: F) -> Result<RunStats, TestRunnerExecuteError<E>>
    where
        F: FnMut(TestEvent<'_>) -> Result<(), E>,
    {
        let executor = Executor::new(
            self.model,
            &self.plan,
            &self.settings,
            &self.cancel_state,
            callback,
        );
        executor.run()
    }
}

/// The result of a finished [`TestStep`].
#[derive(Clone, Debug)]
pub struct StepResult {
    /// The outcome of the step.
    pub outcome: TestOutcome,

    /// How long the step took.
    pub duration: Duration,

    /// The number of assertions the step evaluated.
    pub assertion_count: u64,

    /// Assertion failures recorded by the step.
    pub failures: Vec<AssertionFailure>,

    /// Everything the step wrote to its log.
    pub log: TestLog,
}

impl StepResult {
    /// Creates a result for a step that didn't run.
    pub fn not_run(outcome: TestOutcome, log: TestLog) -> Self {
        Self {
            outcome,
            duration: Duration::ZERO,
            assertion_count: 0,
            failures: Vec::new(),
            log,
        }
    }

    /// Converts this result to its serializable form.
    pub fn to_summary(&self, step: &TestStep) -> StepRunSummary {
        let mut summary = StepRunSummary::new(
            step.test_id().as_str(),
            step.id().to_string(),
            step.full_name(),
            self.outcome.to_summary(),
            self.duration.as_secs_f64(),
            self.assertion_count,
        );
        summary.failures = self.failures.iter().map(ToString::to_string).collect();
        summary
    }
}

/// Statistics for a test run.
///
/// Only primary steps of test cases are counted, except for assertions, which are counted for
/// every step.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of test cases that were expected to run at the beginning.
    pub initial_run_count: usize,

    /// The number of test cases that finished, including those that were skipped or canceled.
    pub finished_count: usize,

    /// The number of test cases that passed.
    pub passed: usize,

    /// The number of test cases that failed.
    pub failed: usize,

    /// The number of test cases that were skipped.
    pub skipped: usize,

    /// The number of test cases that were inconclusive. Includes `canceled`.
    pub inconclusive: usize,

    /// The number of test cases that were canceled.
    pub canceled: usize,

    /// The number of assertions evaluated.
    pub assertion_count: u64,
}

impl RunStats {
    /// Returns true if this run is considered a success.
    ///
    /// A run is a failure if any test case failed or was canceled.
    pub fn is_success(&self) -> bool {
        !self.any_failed() && self.canceled == 0
    }

    /// Returns true if any test case failed.
    #[inline]
    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }

    pub(crate) fn on_step_finished(&mut self, step: &TestStep, result: &StepResult) {
        self.assertion_count += result.assertion_count;
        if !step.is_primary() || !step.is_test_case() {
            return;
        }

        self.finished_count += 1;
        match result.outcome.status() {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Inconclusive => {
                self.inconclusive += 1;
                if result.outcome == TestOutcome::canceled() {
                    self.canceled += 1;
                }
            }
        }
    }
}

/// Cancellation shared between the runner and the signal handler.
#[derive(Debug, Default)]
pub(crate) struct CancelState {
    inner: Mutex<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    reason: Option<CancelReason>,
    current: Option<SandboxHandle>,
}

impl CancelState {
    /// Records `reason`, keeping the most severe reason seen so far, and aborts the test that's
    /// currently running unless the reason is a test failure.
    pub(crate) fn cancel(&self, reason: CancelReason) {
        let current = {
            let mut inner = crate::helpers::lock(&self.inner);
            inner.reason = inner.reason.max(Some(reason));
            inner.current.clone()
        };
        if reason != CancelReason::TestFailure
            && let Some(current) = current
        {
            current.abort(
                TestOutcome::canceled(),
                Some(format!("The test run was canceled due to {reason}.")),
            );
        }
    }

    pub(crate) fn reason(&self) -> Option<CancelReason> {
        crate::helpers::lock(&self.inner).reason
    }

    /// Sets the sandbox aborted by [`cancel`](Self::cancel). If the run has already been canceled,
    /// the sandbox is aborted right away.
    pub(crate) fn set_current(&self, sandbox: Option<SandboxHandle>) {
        let reason = {
            let mut inner = crate::helpers::lock(&self.inner);
            inner.current = sandbox.clone();
            inner.reason
        };
        if let (Some(reason), Some(sandbox)) = (reason, sandbox)
            && reason != CancelReason::TestFailure
        {
            sandbox.abort(
                TestOutcome::canceled(),
                Some(format!("The test run was canceled due to {reason}.")),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::Test, sandbox::Sandbox};

    fn primary_case_step() -> TestStep {
        let mut model = TestModel::new();
        let case = model
            .add_test(model.root(), Test::new("Case", "test").with_test_case(true))
            .unwrap();
        let root = TestStep::primary(&model[model.root()], model.root(), None);
        TestStep::primary(&model[case], case, Some(&root))
    }

    #[test]
    fn run_stats_counts_test_cases() {
        let step = primary_case_step();
        let nested = TestStep::child(&step, "row", true);
        let mut stats = RunStats {
            initial_run_count: 3,
            ..RunStats::default()
        };

        let mut finish = |step: &TestStep, outcome: TestOutcome, assertions: u64| {
            let mut result = StepResult::not_run(outcome, TestLog::new());
            result.assertion_count = assertions;
            stats.on_step_finished(step, &result);
        };
        finish(&step, TestOutcome::passed(), 2);
        finish(&nested, TestOutcome::failed(), 1);
        finish(&step, TestOutcome::canceled(), 0);
        finish(&step, TestOutcome::ignored(), 0);

        assert_eq!(
            stats,
            RunStats {
                initial_run_count: 3,
                finished_count: 3,
                passed: 1,
                failed: 0,
                skipped: 1,
                inconclusive: 1,
                canceled: 1,
                assertion_count: 3,
            }
        );
        assert!(!stats.any_failed());
        assert!(!stats.is_success());
    }

    #[test]
    fn cancel_keeps_most_severe_reason() {
        let state = CancelState::default();
        assert_eq!(state.reason(), None);
        state.cancel(CancelReason::Signal);
        state.cancel(CancelReason::TestFailure);
        assert_eq!(state.reason(), Some(CancelReason::Signal));
    }

    #[test]
    fn cancel_aborts_current_sandbox() {
        let state = CancelState::default();
        let sandbox = Sandbox::new();
        state.set_current(Some(sandbox.handle()));

        state.cancel(CancelReason::TestFailure);
        assert!(!sandbox.was_aborted());

        state.cancel(CancelReason::Signal);
        assert_eq!(sandbox.abort_outcome(), Some(TestOutcome::canceled()));
        assert_eq!(
            sandbox.abort_message().as_deref(),
            Some("The test run was canceled due to signal.")
        );

        let next = Sandbox::new();
        state.set_current(Some(next.handle()));
        assert!(next.was_aborted());
    }
}
