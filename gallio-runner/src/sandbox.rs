// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Abort domains for running test code.
//!
//! A [`Sandbox`] runs actions that can all be aborted at once, with an outcome and a message.
//! Aborting a sandbox also aborts its children.

use crate::{
    assertions::ExceptionData,
    concurrency::{ThreadAbortScope, is_thread_abort},
    errors::TestError,
    helpers::lock,
    model::TestOutcome,
    test_log::{LogStream, TestLog},
};
use std::{
    fmt,
    ops::Deref,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::Duration,
};
use tracing::{debug, warn};

/// A handler invoked when a sandbox is aborted, with the abort outcome and message.
pub type SandboxAbortedHandler = Arc<dyn Fn(&TestOutcome, Option<&str>) + Send + Sync>;

#[derive(Clone, Debug)]
struct AbortInfo {
    outcome: TestOutcome,
    message: Option<String>,
}

#[derive(Default)]
struct SandboxState {
    abort: Option<AbortInfo>,
    scopes: Vec<ThreadAbortScope>,
    children: Vec<Weak<SandboxInner>>,
    handlers: Vec<SandboxAbortedHandler>,
}

#[derive(Default)]
struct SandboxInner {
    state: Mutex<SandboxState>,
    abort_logged: AtomicBool,
}

/// A shared handle to a [`Sandbox`], usable from any thread.
///
/// Unlike the sandbox itself, dropping a handle doesn't abort anything.
#[derive(Clone)]
pub struct SandboxHandle {
    inner: Arc<SandboxInner>,
}

impl fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("abort", &lock(&self.inner.state).abort)
            .finish_non_exhaustive()
    }
}

impl SandboxHandle {
    /// Aborts the sandbox and its children: every action running in them unwinds at its next
    /// abort point and finishes with `outcome`.
    ///
    /// Only the first abort has any effect. Returns true if this call aborted the sandbox.
    pub fn abort(&self, outcome: TestOutcome, message: Option<String>) -> bool {
        let (scopes, children, handlers) = {
            let mut state = lock(&self.inner.state);
            if state.abort.is_some() {
                return false;
            }
            state.abort = Some(AbortInfo {
                outcome: outcome.clone(),
                message: message.clone(),
            });
            (
                state.scopes.clone(),
                std::mem::take(&mut state.children),
                state.handlers.clone(),
            )
        };
        debug!(%outcome, ?message, "aborting sandbox");

        for scope in &scopes {
            scope.abort();
        }
        for child in children.iter().filter_map(Weak::upgrade) {
            SandboxHandle { inner: child }.abort(outcome.clone(), message.clone());
        }
        for handler in &handlers {
            handler(&outcome, message.as_deref());
        }
        true
    }

    /// Returns true if the sandbox has been aborted.
    pub fn was_aborted(&self) -> bool {
        lock(&self.inner.state).abort.is_some()
    }

    /// The outcome the sandbox was aborted with.
    pub fn abort_outcome(&self) -> Option<TestOutcome> {
        lock(&self.inner.state)
            .abort
            .as_ref()
            .map(|abort| abort.outcome.clone())
    }

    /// The message the sandbox was aborted with.
    pub fn abort_message(&self) -> Option<String> {
        lock(&self.inner.state)
            .abort
            .as_ref()
            .and_then(|abort| abort.message.clone())
    }

    /// Adds a handler invoked when the sandbox is aborted. If it has already been aborted, the
    /// handler is invoked immediately.
    pub fn on_aborted(&self, handler: SandboxAbortedHandler) {
        let abort = {
            let mut state = lock(&self.inner.state);
            match &state.abort {
                Some(abort) => abort.clone(),
                None => {
                    state.handlers.push(handler);
                    return;
                }
            }
        };
        handler(&abort.outcome, abort.message.as_deref());
    }

    /// Creates a child sandbox, aborted whenever this one is.
    pub fn create_child(&self) -> Sandbox {
        let child = Sandbox::new();
        let abort = {
            let mut state = lock(&self.inner.state);
            match &state.abort {
                Some(abort) => Some(abort.clone()),
                None => {
                    state.children.retain(|child| child.strong_count() > 0);
                    state.children.push(Arc::downgrade(&child.handle.inner));
                    None
                }
            }
        };
        if let Some(abort) = abort {
            child.abort(abort.outcome, abort.message);
        }
        child
    }

    /// Runs `action` in the sandbox and returns its outcome.
    ///
    /// The outcome is the abort outcome if the sandbox was aborted before or during the action,
    /// `passed` if the action succeeded, and otherwise the outcome carried by the action's error,
    /// defaulting to `failed`. Errors and panics are written to `log`, except for assertion
    /// failures that have already been logged.
    pub fn run<F>(&self, log: &TestLog, description: &str, action: F) -> TestOutcome
    where
        F: FnOnce() -> Result<(), TestError>,
    {
        let scope = ThreadAbortScope::new();
        {
            let mut state = lock(&self.inner.state);
            if state.abort.is_some() {
                scope.abort();
            }
            state.scopes.push(scope.clone());
        }

        let mut returned = None;
        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            scope.run(|| returned = Some(action()))
        }));

        lock(&self.inner.state)
            .scopes
            .retain(|s| s.token() != scope.token());

        match run {
            Ok(Ok(Some(_abort))) => self.aborted_outcome(log),
            Ok(Ok(None)) => match returned {
                Some(Ok(())) => TestOutcome::passed(),
                Some(Err(error)) => error_outcome(log, description, &error),
                None => self.aborted_outcome(log),
            },
            Ok(Err(error)) => error_outcome(log, description, &TestError::from(error)),
            Err(payload) if is_thread_abort(&*payload) => panic::resume_unwind(payload),
            Err(payload) => {
                let exception = ExceptionData::from_panic(&*payload);
                log.write(
                    LogStream::Failures,
                    format!("A panic occurred while {description}.\n{exception}"),
                );
                TestOutcome::failed()
            }
        }
    }

    fn aborted_outcome(&self, log: &TestLog) -> TestOutcome {
        let abort = lock(&self.inner.state).abort.clone();
        let Some(abort) = abort else {
            return TestOutcome::error();
        };
        if let Some(message) = &abort.message
            && !self.inner.abort_logged.swap(true, Ordering::SeqCst)
        {
            log.write(LogStream::Warnings, message.clone());
        }
        abort.outcome
    }

    /// Runs `action`, aborting the sandbox with the `timeout` outcome if it takes longer than
    /// `timeout`.
    pub fn use_timeout<R>(&self, timeout: Option<Duration>, action: impl FnOnce() -> R) -> R {
        let Some(timeout) = timeout else {
            return action();
        };

        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let handle = self.clone();
        let timer = thread::Builder::new()
            .name("gallio-timeout".to_owned())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
                    handle.abort(
                        TestOutcome::timeout(),
                        Some(format!(
                            "The test timed out after {} seconds.",
                            timeout.as_secs_f64()
                        )),
                    );
                }
            });
        let timer = match timer {
            Ok(timer) => Some(timer),
            Err(error) => {
                warn!("failed to start timeout thread, running without a timeout: {error}");
                None
            }
        };

        let result = action();
        drop(cancel_tx);
        if let Some(timer) = timer {
            let _ = timer.join();
        }
        result
    }
}

fn error_outcome(log: &TestLog, description: &str, error: &TestError) -> TestOutcome {
    match error.as_assertion_failure() {
        Some(failure) if failure.is_silent() => {}
        Some(failure) => log.write(LogStream::Failures, failure.failure().to_string()),
        None => {
            let exception = ExceptionData::from_error(error.as_error());
            log.write(
                LogStream::Failures,
                format!("An error occurred while {description}.\n{exception}"),
            );
        }
    }
    error.outcome().cloned().unwrap_or_else(TestOutcome::failed)
}

/// An abort domain. Dropping the sandbox aborts it with the `error` outcome.
///
/// Most operations are available through [`SandboxHandle`], which the sandbox dereferences to.
pub struct Sandbox {
    handle: SandboxHandle,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sandbox").field(&self.handle).finish()
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox {
    /// Creates a sandbox.
    pub fn new() -> Self {
        Self {
            handle: SandboxHandle {
                inner: Arc::new(SandboxInner::default()),
            },
        }
    }

    /// Returns a handle to this sandbox.
    pub fn handle(&self) -> SandboxHandle {
        self.handle.clone()
    }
}

impl Deref for Sandbox {
    type Target = SandboxHandle;

    fn deref(&self) -> &SandboxHandle {
        &self.handle
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.handle.abort(
            TestOutcome::error(),
            Some("The sandbox was disposed.".to_owned()),
        );
    }
}
