// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Walks a [`TestPlan`] and runs every test in it.

use super::{
    CancelState, RunSettings, RunStats, StepResult,
    context::{StepMessage, TestContext},
};
use crate::{
    assertions::AssertionContext,
    concurrency::{
        LineHandler, ProcessTask, Task, TaskContainer, TaskEvent, TaskEventKind, TaskFailure,
        TaskValue, ThreadTask,
    },
    errors::{FatalRunnerError, TestRunnerExecuteError},
    helpers::plural,
    model::{
        CommandSpec, PlanNode, Test, TestBody, TestIndex, TestModel, TestOutcome, TestPlan,
        TestStep, keys,
    },
    reporter::{CancelReason, TestEvent, TestEventKind},
    sandbox::Sandbox,
    test_log::{LogStream, TestLog},
};
use gallio_metadata::TestStatus;
use itertools::Itertools;
use std::{
    collections::HashMap,
    convert::Infallible,
    io::Write,
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError},
    },
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Why a test didn't run.
struct Skip {
    outcome: TestOutcome,
    message: String,
}

pub(super) struct Executor<'a, F, E> {
    model: &'a TestModel,
    plan: &'a TestPlan,
    settings: &'a Arc<RunSettings>,
    cancel_state: &'a CancelState,
    callback: F,
    stopwatch: Instant,
    stats: RunStats,
    outcomes: HashMap<TestIndex, TestOutcome>,
    cancel_reported: Option<CancelReason>,
    report_error: Option<E>,
}

impl<'a, F, E> Executor<'a, F, E>
where
    F: FnMut(TestEvent<'_>) -> Result<(), E>,
{
    pub(super) fn new(
        model: &'a TestModel,
        plan: &'a TestPlan,
        settings: &'a Arc<RunSettings>,
        cancel_state: &'a CancelState,
        callback: F,
    ) -> Self {
        Self {
            model,
            plan,
            settings,
            cancel_state,
            callback,
            stopwatch: Instant::now(),
            stats: RunStats::default(),
            outcomes: HashMap::new(),
            cancel_reported: None,
            report_error: None,
        }
    }

    pub(super) fn run(mut self) -> Result<RunStats, TestRunnerExecuteError<E>> {
        let plan = self.plan;
        let settings = self.settings;
        self.stats.initial_run_count = plan.test_case_count();
        self.emit(TestEventKind::RunStarted {
            test_case_count: plan.test_case_count(),
            profile_name: &settings.profile_name,
        });

        if let Some(root) = plan.root() {
            self.run_node(root, None)?;
        }

        let run_stats = self.stats;
        self.emit(TestEventKind::RunFinished { run_stats });
        match self.report_error {
            Some(error) => Err(TestRunnerExecuteError::Report(error)),
            None => Ok(run_stats),
        }
    }

    fn emit(&mut self, kind: TestEventKind<'_>) {
        if self.report_error.is_some() {
            return;
        }
        let event = TestEvent {
            elapsed: self.stopwatch.elapsed(),
            kind,
        };
        if let Err(error) = (self.callback)(event) {
            self.report_error = Some(error);
            self.cancel_state.cancel(CancelReason::ReportError);
        }
    }

    /// Returns the cancel reason, reporting it the first time it's seen.
    fn check_cancel(&mut self) -> Option<CancelReason> {
        let reason = self.cancel_state.reason()?;
        if self.cancel_reported.is_none_or(|reported| reported < reason) {
            self.cancel_reported = Some(reason);
            self.emit(TestEventKind::RunBeginCancel { reason });
        }
        Some(reason)
    }

    fn run_node(
        &mut self,
        node: &'a PlanNode,
        parent: Option<&TestStep>,
    ) -> Result<TestOutcome, FatalRunnerError> {
        if let Some(skip) = self.skip_reason(node) {
            return Ok(self.skip_subtree(node, parent, &skip));
        }

        let model = self.model;
        let test = &model[node.test];
        let step = TestStep::primary(test, node.test, parent);
        self.emit(TestEventKind::StepStarted { step: &step });

        let start = Instant::now();
        let mut result = match test.body() {
            Some(body) => self.run_body(test, &step, body)?,
            None => StepResult::not_run(TestOutcome::passed(), TestLog::new()),
        };

        if !test.is_test_case() {
            if result.outcome.is_passed() {
                let mut combined = result.outcome.clone();
                for child in &node.children {
                    let outcome = self.run_node(child, Some(&step))?;
                    combined = combined.combine_with(&outcome.generalize());
                }
                result.outcome = combined;
            } else {
                let skip = Skip {
                    outcome: TestOutcome::skipped(),
                    message: format!("Skipped because `{}` did not pass.", test.name()),
                };
                for child in &node.children {
                    self.skip_subtree(child, Some(&step), &skip);
                }
            }
        }
        result.duration = start.elapsed();

        let outcome = result.outcome.clone();
        self.finish_step(node.test, &step, result);
        if test.is_test_case() && outcome.status() == TestStatus::Failed && self.settings.fail_fast
        {
            self.cancel_state.cancel(CancelReason::TestFailure);
        }
        Ok(outcome)
    }

    fn finish_step(&mut self, index: TestIndex, step: &TestStep, result: StepResult) {
        self.stats.on_step_finished(step, &result);
        self.outcomes.insert(index, result.outcome.clone());
        self.emit(TestEventKind::StepFinished {
            step,
            result: &result,
        });
    }

    fn skip_reason(&mut self, node: &PlanNode) -> Option<Skip> {
        if let Some(reason) = self.check_cancel() {
            return Some(Skip {
                outcome: TestOutcome::canceled(),
                message: format!("The test run was canceled due to {reason}."),
            });
        }

        let model = self.model;
        let test = &model[node.test];
        let metadata = test.metadata();
        if let Some(reason) = metadata.get_value(keys::IGNORE_REASON) {
            return Some(Skip {
                outcome: TestOutcome::ignored(),
                message: with_reason("The test was ignored", reason),
            });
        }
        if let Some(reason) = metadata.get_value(keys::PENDING_REASON) {
            return Some(Skip {
                outcome: TestOutcome::pending(),
                message: with_reason("The test is pending", reason),
            });
        }
        if !node.explicit
            && let Some(reason) = metadata.get_value(keys::EXPLICIT_REASON)
        {
            return Some(Skip {
                outcome: TestOutcome::explicit(),
                message: with_reason("The test only runs when selected explicitly", reason),
            });
        }

        let unsatisfied = test.dependencies().iter().any(|&dep| {
            self.plan.contains(dep)
                && !self.outcomes.get(&dep).is_some_and(TestOutcome::is_passed)
        });
        unsatisfied.then(|| Skip {
            outcome: TestOutcome::skipped(),
            message: "Skipped due to an unsatisfied test dependency.".to_owned(),
        })
    }

    /// Reports `node` and everything below it as not run.
    fn skip_subtree(
        &mut self,
        node: &PlanNode,
        parent: Option<&TestStep>,
        skip: &Skip,
    ) -> TestOutcome {
        let model = self.model;
        let test = &model[node.test];
        let step = TestStep::primary(test, node.test, parent);
        self.emit(TestEventKind::StepStarted { step: &step });
        for child in &node.children {
            self.skip_subtree(child, Some(&step), skip);
        }

        let log = TestLog::new();
        log.write(LogStream::Warnings, skip.message.clone());
        self.finish_step(node.test, &step, StepResult::not_run(skip.outcome.clone(), log));
        skip.outcome.clone()
    }

    fn run_body(
        &mut self,
        test: &Test,
        step: &TestStep,
        body: &TestBody,
    ) -> Result<StepResult, FatalRunnerError> {
        let timeout = test.timeout().or(self.settings.test_timeout);
        match body {
            TestBody::Function(function) => {
                let function = Arc::clone(&function.0);
                self.run_function(test, step, timeout, move |context| function(context))
            }
            TestBody::Command(command) => Ok(self.run_command(test, command, timeout)),
        }
    }

    fn run_function<B>(
        &mut self,
        test: &Test,
        step: &TestStep,
        timeout: Option<Duration>,
        body: B,
    ) -> Result<StepResult, FatalRunnerError>
    where
        B: FnOnce(&TestContext) -> Result<(), crate::errors::TestError> + Send + 'static,
    {
        let sandbox = Sandbox::new();
        let tasks = TaskContainer::new();
        let (sender, receiver) = mpsc::channel();
        let context = TestContext::new(
            step.clone(),
            sandbox.handle(),
            tasks.clone(),
            Arc::clone(self.settings),
            sender.clone(),
        );
        let log = context.log().clone();
        let assertions = Arc::clone(context.assertions());

        let handle = sandbox.handle();
        let task = Arc::new(ThreadTask::new(thread_name(test), move || {
            let outcome = {
                let _guard = AssertionContext::enter(Arc::clone(context.assertions()));
                handle.use_timeout(timeout, || {
                    handle.run(context.log(), "executing the test", || body(&context))
                })
            };
            let outcome = outcome.combine_with(&context.children_outcome());
            context.send(StepMessage::Done(outcome));
            Ok::<(), Infallible>(())
        }));
        task.on(
            TaskEventKind::Terminated,
            Arc::new(move |event: &TaskEvent| {
                if let Some(Err(failure)) = &event.result {
                    _ = sender.send(StepMessage::Terminated(failure.clone()));
                }
            }),
        );

        let start = Instant::now();
        self.cancel_state.set_current(Some(sandbox.handle()));
        task.start();
        if let Some(Err(TaskFailure::Spawn(error))) = task.result() {
            self.cancel_state.set_current(None);
            return Err(FatalRunnerError::SpawnThread {
                test: test.full_name().to_owned(),
                error: std::io::Error::new(error.kind(), error.to_string()),
            });
        }

        // The thread may ignore an abort, so wait a little past the timeout at most.
        let deadline = timeout.map(|timeout| start + timeout + self.settings.reap.join_after_abort);
        let outcome = loop {
            let message = match deadline {
                Some(deadline) => {
                    receiver.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                }
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match message {
                Ok(StepMessage::Started(nested)) => {
                    self.emit(TestEventKind::StepStarted { step: &nested });
                }
                Ok(StepMessage::Finished(nested, result)) => {
                    self.stats.on_step_finished(&nested, &result);
                    self.emit(TestEventKind::StepFinished {
                        step: &nested,
                        result: &result,
                    });
                }
                Ok(StepMessage::Done(outcome)) => break outcome,
                Ok(StepMessage::Terminated(failure)) => {
                    log.write(
                        LogStream::Failures,
                        format!("The test thread terminated unexpectedly: {failure}"),
                    );
                    break TestOutcome::error();
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "test `{}` did not stop after being aborted, abandoning its thread",
                        test.full_name()
                    );
                    if let Some(message) = sandbox.abort_message() {
                        log.write(LogStream::Warnings, message);
                    }
                    log.write(
                        LogStream::Warnings,
                        "The test did not stop after being aborted.",
                    );
                    break sandbox.abort_outcome().unwrap_or_else(TestOutcome::timeout);
                }
                Err(RecvTimeoutError::Disconnected) => break TestOutcome::error(),
            }
        };
        self.cancel_state.set_current(None);
        self.reap(test, &tasks, &log);

        Ok(StepResult {
            outcome,
            duration: start.elapsed(),
            assertion_count: assertions.assert_count(),
            failures: assertions.pending_failures(),
            log,
        })
    }

    fn run_command(
        &mut self,
        test: &Test,
        command: &CommandSpec,
        timeout: Option<Duration>,
    ) -> StepResult {
        let sandbox = Sandbox::new();
        let log = TestLog::new();

        let mut builder = ProcessTask::builder(&command.program)
            .name(thread_name(test))
            .args(&command.args)
            .capture_output(false)
            .leak_timeout(self.settings.leak_timeout);
        if let Some(cwd) = &command.cwd {
            builder = builder.current_dir(cwd);
        }
        for (key, value) in &command.env {
            builder = builder.env(key, value);
        }
        if self.settings.no_capture {
            let stdout: LineHandler = Arc::new(|line: &str| {
                _ = writeln!(std::io::stdout().lock(), "{line}");
            });
            let stderr: LineHandler = Arc::new(|line: &str| {
                _ = writeln!(std::io::stderr().lock(), "{line}");
            });
            builder = builder.on_stdout_line(stdout).on_stderr_line(stderr);
        } else if self.settings.capture_process_output {
            let stdout_log = log.clone();
            let stderr_log = log.clone();
            builder = builder
                .on_stdout_line(Arc::new(move |line: &str| {
                    stdout_log.write(LogStream::ConsoleOutput, line)
                }))
                .on_stderr_line(Arc::new(move |line: &str| {
                    stderr_log.write(LogStream::ConsoleError, line)
                }));
        }

        let task = Arc::new(builder.build());
        let abort_task = Arc::clone(&task);
        sandbox.on_aborted(Arc::new(move |_: &TestOutcome, _: Option<&str>| {
            abort_task.abort()
        }));

        let start = Instant::now();
        self.cancel_state.set_current(Some(sandbox.handle()));
        task.start();
        sandbox.use_timeout(timeout, || task.join(None));
        self.cancel_state.set_current(None);

        let outcome = if let Some(outcome) = sandbox.abort_outcome() {
            if let Some(message) = sandbox.abort_message() {
                log.write(LogStream::Warnings, message);
            }
            outcome
        } else {
            match task.result() {
                Some(Ok(TaskValue::Exited(info))) if info.is_success() => TestOutcome::passed(),
                Some(Ok(TaskValue::Exited(info))) => {
                    log.write(LogStream::Failures, format!("The process exited with {info}."));
                    TestOutcome::failed()
                }
                Some(Ok(TaskValue::Unit)) => TestOutcome::passed(),
                Some(Err(TaskFailure::Spawn(error))) => {
                    warn!(
                        "failed to start `{}` for test `{}`: {error}",
                        command.program,
                        test.full_name()
                    );
                    log.write(
                        LogStream::Failures,
                        format!("Failed to start `{}`: {error}", command.program),
                    );
                    TestOutcome::error()
                }
                Some(Err(failure)) => {
                    log.write(LogStream::Failures, format!("The process task failed: {failure}"));
                    TestOutcome::error()
                }
                None => TestOutcome::error(),
            }
        };

        StepResult {
            duration: start.elapsed(),
            ..StepResult::not_run(outcome, log)
        }
    }

    /// Waits for the tasks a test started, then aborts the ones that are left.
    fn reap(&self, test: &Test, tasks: &TaskContainer, log: &TestLog) {
        let reap = self.settings.reap;
        if tasks.join_all(Some(reap.join_before_abort)) {
            return;
        }

        let count = tasks.active_tasks().len();
        debug!(
            "test `{}` left {count} {} running, aborting",
            test.full_name(),
            plural::tasks_str(count)
        );
        tasks.abort_all();
        if tasks.join_all(Some(reap.join_after_abort)) {
            return;
        }

        let names = tasks.active_tasks().iter().map(|task| task.name().to_owned()).join(", ");
        warn!(
            "test `{}` left tasks running after they were aborted: {names}",
            test.full_name()
        );
        log.write(
            LogStream::Warnings,
            format!("Some tasks did not stop after being aborted: {names}."),
        );
    }
}

fn with_reason(prefix: &str, reason: &str) -> String {
    if reason.is_empty() {
        format!("{prefix}.")
    } else {
        format!("{prefix}: {reason}")
    }
}

fn thread_name(test: &Test) -> String {
    format!("gallio-test {}", test.full_name())
}
