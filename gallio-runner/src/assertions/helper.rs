// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building blocks for writing assertions.
//!
//! These functions report failures to the [`AssertionContext`] of the test running on the
//! current thread. Outside of a test, failures are returned as non-silent errors.

use super::{
    AssertionContext, AssertionFailure, AssertionFailureBehavior, AssertionFailureBuilder,
    AssertionFailureError, ExceptionData,
};
use crate::{concurrency::is_thread_abort, errors::TestError};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// Evaluates an assertion and reports the failure it returns, if any.
///
/// A panic while evaluating the assertion is reported as a failure too.
pub fn verify<F>(assertion: F) -> Result<(), AssertionFailureError>
where
    F: FnOnce() -> Option<AssertionFailure>,
{
    let context = AssertionContext::current();
    if let Some(context) = &context {
        context.increment_assert_count();
    }

    let failure = match panic::catch_unwind(AssertUnwindSafe(assertion)) {
        Ok(failure) => failure,
        Err(payload) if is_thread_abort(&*payload) => panic::resume_unwind(payload),
        Err(payload) => Some(
            AssertionFailureBuilder::new("An exception occurred while verifying an assertion.")
                .exception(ExceptionData::from_panic(&*payload))
                .build(),
        ),
    };
    match failure {
        Some(failure) => submit(context.as_deref(), failure),
        None => Ok(()),
    }
}

/// Reports a failure.
pub fn fail(failure: AssertionFailure) -> Result<(), AssertionFailureError> {
    submit(AssertionContext::current().as_deref(), failure)
}

fn submit(
    context: Option<&AssertionContext>,
    failure: AssertionFailure,
) -> Result<(), AssertionFailureError> {
    match context {
        Some(context) => context.submit_failure(failure),
        None => Err(AssertionFailureError::new(failure, false)),
    }
}

/// Runs `action` with the given failure behavior and returns the failures it reported.
pub fn eval<F>(
    behavior: AssertionFailureBehavior,
    action: F,
) -> Result<Vec<AssertionFailure>, TestError>
where
    F: FnOnce() -> Result<(), TestError>,
{
    match AssertionContext::current() {
        Some(context) => context.capture_failures(behavior, false, action),
        None => {
            let context = Arc::new(AssertionContext::new());
            let _guard = AssertionContext::enter(context.clone());
            context.capture_failures(behavior, false, action)
        }
    }
}

/// Runs `action`, replacing the failures it reports with a single failure built by
/// `explanation`.
///
/// `action` stops at its first failure.
pub fn explain<F, X>(action: F, explanation: X) -> Result<(), TestError>
where
    F: FnOnce() -> Result<(), TestError>,
    X: FnOnce(Vec<AssertionFailure>) -> AssertionFailure,
{
    let failures = eval(AssertionFailureBehavior::THROW, action)?;
    if failures.is_empty() {
        return Ok(());
    }
    fail(explanation(failures))?;
    Ok(())
}

/// Verifies that two values are equal.
pub fn are_equal<T>(expected: &T, actual: &T, message: Option<&str>) -> Result<(), AssertionFailureError>
where
    T: PartialEq + fmt::Debug + ?Sized,
{
    verify(|| {
        (expected != actual).then(|| {
            AssertionFailureBuilder::new("Expected values to be equal.")
                .message(message.unwrap_or_default())
                .expected_and_actual_values(&expected, &actual)
                .build()
        })
    })
}

/// Verifies that a condition holds.
pub fn is_true(condition: bool, message: Option<&str>) -> Result<(), AssertionFailureError> {
    verify(|| {
        (!condition).then(|| {
            AssertionFailureBuilder::new("Expected value to be true.")
                .message(message.unwrap_or_default())
                .actual_value(&condition)
                .build()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_context<R>(f: impl FnOnce(&AssertionContext) -> R) -> R {
        let context = Arc::new(AssertionContext::new());
        let _guard = AssertionContext::enter(context.clone());
        f(&context)
    }

    #[test]
    fn without_context_failures_are_errors() {
        let err = are_equal(&1, &2, None).unwrap_err();
        assert!(!err.is_silent());
        assert_eq!(err.failure().description(), "Expected values to be equal.");
        assert!(is_true(true, None).is_ok());
    }

    #[test]
    fn with_context_failures_are_submitted() {
        in_context(|context| {
            let err = is_true(false, Some("must hold")).unwrap_err();
            assert!(err.is_silent());
            assert_eq!(context.pending_failures()[0].message(), Some("must hold"));
            assert!(are_equal("a", "a", None).is_ok());
            assert_eq!(context.assert_count(), 2);
        });
    }

    #[test]
    fn verify_reports_panics() {
        in_context(|context| {
            let result = verify(|| panic!("broken assertion"));
            assert!(result.is_err());
            let failure = &context.pending_failures()[0];
            assert_eq!(
                failure.description(),
                "An exception occurred while verifying an assertion."
            );
            assert_eq!(failure.exceptions()[0].message(), "broken assertion");
        });
    }

    #[test]
    fn eval_collects_failures() {
        let failures = eval(AssertionFailureBehavior::CAPTURE_AND_CONTINUE, || {
            is_true(false, Some("first"))?;
            is_true(false, Some("second"))?;
            Ok(())
        })
        .unwrap();
        let messages: Vec<_> = failures.iter().map(|f| f.message()).collect();
        assert_eq!(messages, [Some("first"), Some("second")]);
    }

    #[test]
    fn explain_wraps_failures() {
        in_context(|context| {
            let result = explain(
                || {
                    are_equal(&1, &2, None)?;
                    unreachable!("stops at the first failure");
                },
                |failures| {
                    let mut builder = AssertionFailureBuilder::new("Totals differ.");
                    for failure in failures {
                        builder = builder.inner_failure(failure);
                    }
                    builder.build()
                },
            );
            assert!(result.is_err());
            let pending = context.pending_failures();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].description(), "Totals differ.");
            assert_eq!(pending[0].inner_failures().len(), 1);
        });
    }
}
