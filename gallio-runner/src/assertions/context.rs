// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{AssertionFailure, AssertionFailureBuilder, AssertionFailureError, ExceptionData};
use crate::{
    concurrency::is_thread_abort,
    errors::{ConcurrentCaptureError, TestError},
    helpers::lock,
};
use bitflags::bitflags;
use std::{
    cell::RefCell,
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::error;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<Arc<AssertionContext>>> = const { RefCell::new(None) };
}

bitflags! {
    /// What happens when an assertion fails.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct AssertionFailureBehavior: u8 {
        /// Log the failure.
        const LOG = 1 << 0;
        /// Stop the current action by returning an error.
        const THROW = 1 << 1;
        /// Don't save the failure in the current scope.
        const DISCARD = 1 << 2;

        /// Log the failure and stop. The default.
        const LOG_AND_THROW = Self::LOG.bits() | Self::THROW.bits();
        /// Log the failure and keep going, so a test can report several failures.
        const CAPTURE_AND_CONTINUE = Self::LOG.bits();
    }
}

impl AssertionFailureBehavior {
    /// The names accepted by [`FromStr`].
    pub fn variants() -> &'static [&'static str] {
        &["log-and-throw", "capture-and-continue", "throw", "log", "discard"]
    }

    /// The name of the behavior as accepted by [`FromStr`], if it has one.
    pub fn name(self) -> Option<&'static str> {
        // CAPTURE_AND_CONTINUE and LOG have the same bits.
        if self == Self::LOG_AND_THROW {
            Some("log-and-throw")
        } else if self == Self::LOG {
            Some("log")
        } else if self == Self::THROW {
            Some("throw")
        } else if self == Self::DISCARD {
            Some("discard")
        } else {
            None
        }
    }
}

impl FromStr for AssertionFailureBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log-and-throw" => Ok(Self::LOG_AND_THROW),
            "capture-and-continue" => Ok(Self::CAPTURE_AND_CONTINUE),
            "throw" => Ok(Self::THROW),
            "log" => Ok(Self::LOG),
            "discard" => Ok(Self::DISCARD),
            other => Err(format!(
                "unrecognized assertion failure behavior `{other}` (known values: {})",
                Self::variants().join(", ")
            )),
        }
    }
}

/// Where an [`AssertionContext`] logs failures.
pub trait FailureLog: Send + Sync {
    /// Logs a failure.
    fn log_failure(&self, failure: &AssertionFailure);
}

/// Logs failures through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingFailureLog;

impl FailureLog for TracingFailureLog {
    fn log_failure(&self, failure: &AssertionFailure) {
        error!(target: "gallio::assertions", "{failure}");
    }
}

#[derive(Debug)]
struct Scope {
    behavior: AssertionFailureBehavior,
    saved: Mutex<Vec<AssertionFailure>>,
}

impl Scope {
    fn new(behavior: AssertionFailureBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            saved: Mutex::new(Vec::new()),
        })
    }

    fn saved(&self) -> Vec<AssertionFailure> {
        lock(&self.saved).clone()
    }
}

/// Tracks assertion failures for a test.
///
/// A context holds a stack of scopes, each with its own [`AssertionFailureBehavior`]. The
/// outermost scope logs failures and stops the test. Inner scopes, pushed by
/// [`capture_failures`](Self::capture_failures), can collect failures instead.
pub struct AssertionContext {
    current: Mutex<Arc<Scope>>,
    log: Arc<dyn FailureLog>,
    assert_count: AtomicU64,
}

impl fmt::Debug for AssertionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionContext")
            .field("behavior", &self.behavior())
            .field("assert_count", &self.assert_count())
            .finish_non_exhaustive()
    }
}

impl Default for AssertionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AssertionContext {
    /// Creates a context that logs failures through `tracing`.
    pub fn new() -> Self {
        Self::with_log(Arc::new(TracingFailureLog))
    }

    /// Creates a context that logs failures to `log`.
    pub fn with_log(log: Arc<dyn FailureLog>) -> Self {
        Self {
            current: Mutex::new(Scope::new(AssertionFailureBehavior::LOG_AND_THROW)),
            log,
            assert_count: AtomicU64::new(0),
        }
    }

    /// Replaces the behavior of the outermost scope, which is
    /// [`LOG_AND_THROW`](AssertionFailureBehavior::LOG_AND_THROW) by default.
    pub fn with_root_behavior(self, behavior: AssertionFailureBehavior) -> Self {
        *lock(&self.current) = Scope::new(behavior);
        self
    }

    /// The context of the test running on this thread, if any.
    pub fn current() -> Option<Arc<Self>> {
        CURRENT_CONTEXT.with_borrow(|current| current.clone())
    }

    /// Makes `context` the current context on this thread until the returned guard is dropped.
    pub fn enter(context: Arc<Self>) -> CurrentContextGuard {
        CurrentContextGuard {
            previous: CURRENT_CONTEXT.replace(Some(context)),
            _not_send: PhantomData,
        }
    }

    fn current_scope(&self) -> Arc<Scope> {
        lock(&self.current).clone()
    }

    /// The behavior of the current scope.
    pub fn behavior(&self) -> AssertionFailureBehavior {
        self.current_scope().behavior
    }

    /// The number of assertions evaluated so far.
    pub fn assert_count(&self) -> u64 {
        self.assert_count.load(Ordering::Relaxed)
    }

    /// Records that an assertion was evaluated.
    pub fn increment_assert_count(&self) {
        self.assert_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Submits a failure to the current scope.
    ///
    /// Returns a silent [`AssertionFailureError`] if the scope's behavior includes
    /// [`THROW`](AssertionFailureBehavior::THROW).
    pub fn submit_failure(&self, failure: AssertionFailure) -> Result<(), AssertionFailureError> {
        self.submit(&self.current_scope(), failure, false)
    }

    fn submit(
        &self,
        scope: &Scope,
        failure: AssertionFailure,
        no_throw: bool,
    ) -> Result<(), AssertionFailureError> {
        if !scope.behavior.contains(AssertionFailureBehavior::DISCARD) {
            lock(&scope.saved).push(failure.clone());
        }
        if scope.behavior.contains(AssertionFailureBehavior::LOG) {
            self.log.log_failure(&failure);
        }
        if !no_throw && scope.behavior.contains(AssertionFailureBehavior::THROW) {
            return Err(AssertionFailureError::new(failure, true));
        }
        Ok(())
    }

    /// Runs `action` in a new scope with the given behavior, returning the failures saved in that
    /// scope.
    ///
    /// An assertion failure error returned by `action` ends the action; it's submitted to the
    /// scope unless it's silent. Any other error is recorded as a failure if `capture_errors` is
    /// set, and returned otherwise. Panics are treated the same way, except that thread aborts
    /// always resume unwinding.
    ///
    /// The previous scope is restored on every exit path. Capturing failures concurrently in the
    /// same context, from several threads, returns a [`ConcurrentCaptureError`].
    pub fn capture_failures<F>(
        &self,
        behavior: AssertionFailureBehavior,
        capture_errors: bool,
        action: F,
    ) -> Result<Vec<AssertionFailure>, TestError>
    where
        F: FnOnce() -> Result<(), TestError>,
    {
        let scope = Scope::new(behavior);
        let previous = std::mem::replace(&mut *lock(&self.current), scope.clone());

        let result = panic::catch_unwind(AssertUnwindSafe(action));

        let restored = {
            let mut current = lock(&self.current);
            if Arc::ptr_eq(&current, &scope) {
                *current = previous;
                true
            } else {
                false
            }
        };

        let outcome = match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => match err.as_assertion_failure() {
                Some(failure) if failure.is_silent() => Ok(()),
                Some(failure) => self
                    .submit(&scope, failure.failure().clone(), true)
                    .map_err(TestError::from),
                None if capture_errors => self
                    .submit(&scope, error_failure(ExceptionData::from_error(err.as_error())), true)
                    .map_err(TestError::from),
                None => Err(err),
            },
            Err(payload) if is_thread_abort(&*payload) => panic::resume_unwind(payload),
            Err(payload) if capture_errors => self
                .submit(&scope, error_failure(ExceptionData::from_panic(&*payload)), true)
                .map_err(TestError::from),
            Err(payload) => panic::resume_unwind(payload),
        };

        if !restored {
            return Err(ConcurrentCaptureError.into());
        }
        outcome.map(|()| scope.saved())
    }

    /// The failures saved in the current scope so far.
    pub fn pending_failures(&self) -> Vec<AssertionFailure> {
        self.current_scope().saved()
    }
}

/// Restores the previous current context when dropped. See [`AssertionContext::enter`].
#[must_use]
#[derive(Debug)]
pub struct CurrentContextGuard {
    previous: Option<Arc<AssertionContext>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CurrentContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.set(self.previous.take());
    }
}

fn error_failure(exception: ExceptionData) -> AssertionFailure {
    AssertionFailureBuilder::new("An exception occurred.")
        .exception(exception)
        .capture_stack_trace(false)
        .build()
}
