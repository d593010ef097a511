// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RunSettings, StepResult, TestError};
use crate::{
    assertions::AssertionContext,
    concurrency::{self, Interrupted, TaskContainer, TaskFailure},
    helpers::lock,
    model::{TestOutcome, TestStep},
    sandbox::SandboxHandle,
    test_log::{LogStream, TestLog},
};
use std::{
    fmt,
    sync::{Arc, Mutex, mpsc},
    time::Instant,
};

/// Messages sent from a test thread to the thread driving the run.
#[derive(Debug)]
pub(super) enum StepMessage {
    Started(TestStep),
    Finished(TestStep, StepResult),
    Done(TestOutcome),
    Terminated(TaskFailure),
}

/// Everything a running test step can use: its assertion context, its log, the tasks it started
/// and the sandbox it runs in.
pub struct TestContext {
    step: TestStep,
    assertions: Arc<AssertionContext>,
    tasks: TaskContainer,
    sandbox: SandboxHandle,
    log: TestLog,
    settings: Arc<RunSettings>,
    messages: mpsc::Sender<StepMessage>,
    child_outcome: Mutex<TestOutcome>,
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("step", &self.step)
            .field("assertions", &self.assertions)
            .finish_non_exhaustive()
    }
}

impl TestContext {
    pub(super) fn new(
        step: TestStep,
        sandbox: SandboxHandle,
        tasks: TaskContainer,
        settings: Arc<RunSettings>,
        messages: mpsc::Sender<StepMessage>,
    ) -> Self {
        let log = TestLog::new();
        let assertions = Arc::new(
            AssertionContext::with_log(Arc::new(log.clone()))
                .with_root_behavior(settings.assertion_failure_behavior),
        );
        Self {
            step,
            assertions,
            tasks,
            sandbox,
            log,
            settings,
            messages,
            child_outcome: Mutex::new(TestOutcome::passed()),
        }
    }

    /// The step being run.
    pub fn step(&self) -> &TestStep {
        &self.step
    }

    /// The assertion context of the step. It's also the current context on the test thread.
    pub fn assertions(&self) -> &Arc<AssertionContext> {
        &self.assertions
    }

    /// Tasks started through this container are joined, then aborted, when the test finishes.
    pub fn tasks(&self) -> &TaskContainer {
        &self.tasks
    }

    /// The sandbox the step runs in.
    pub fn sandbox(&self) -> &SandboxHandle {
        &self.sandbox
    }

    /// The log of the step.
    pub fn log(&self) -> &TestLog {
        &self.log
    }

    /// Writes a line to the default log stream.
    pub fn write_line(&self, text: impl Into<String>) {
        self.log.write(LogStream::Default, text);
    }

    /// An abort point. See [`concurrency::checkpoint`].
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        concurrency::checkpoint()
    }

    /// Runs `action` as a nested step named `name`, and returns its outcome.
    ///
    /// The nested step gets its own log, assertion context and sandbox, and is reported as its
    /// own step. If it doesn't pass, neither does the enclosing step.
    pub fn run_step<F>(&self, name: impl Into<String>, action: F) -> TestOutcome
    where
        F: FnOnce(&TestContext) -> Result<(), TestError>,
    {
        let step = TestStep::child(&self.step, name, true);
        let sandbox = self.sandbox.create_child();
        let child = TestContext::new(
            step.clone(),
            sandbox.handle(),
            self.tasks.clone(),
            self.settings.clone(),
            self.messages.clone(),
        );
        _ = self.messages.send(StepMessage::Started(step.clone()));

        let start = Instant::now();
        let outcome = {
            let _guard = AssertionContext::enter(child.assertions.clone());
            sandbox.run(&child.log, "executing the step", || action(&child))
        };
        let outcome = outcome.combine_with(&child.children_outcome());

        let result = StepResult {
            outcome: outcome.clone(),
            duration: start.elapsed(),
            assertion_count: child.assertions.assert_count(),
            failures: child.assertions.pending_failures(),
            log: child.log.clone(),
        };
        _ = self.messages.send(StepMessage::Finished(step, result));

        let mut child_outcome = lock(&self.child_outcome);
        *child_outcome = child_outcome.combine_with(&outcome.generalize());
        outcome
    }

    pub(super) fn send(&self, message: StepMessage) {
        _ = self.messages.send(message);
    }

    /// The combined outcome of the nested steps run so far.
    pub(super) fn children_outcome(&self) -> TestOutcome {
        lock(&self.child_outcome).clone()
    }
}
