// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::helpers::{indent, panic_message, truncate_chars};
use std::{
    any::Any,
    backtrace::{Backtrace, BacktraceStatus},
    error::Error,
    fmt,
};
use swrite::{SWrite, swriteln};
use thiserror::Error;

/// Labels are padded to the longest label, up to this many characters.
const MAX_PADDING: usize = 16;

/// Labels longer than this are truncated.
const MAX_LABEL_LENGTH: usize = 100;

/// Formatted values longer than this are truncated.
const MAX_FORMATTED_VALUE_LENGTH: usize = 2000;

/// A labeled value attached to an [`AssertionFailure`], such as `Expected Value`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LabeledValue {
    label: String,
    value: String,
}

impl LabeledValue {
    /// The label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The formatted value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A description of an error or panic that occurred while evaluating an assertion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExceptionData {
    kind: String,
    message: String,
    stack_trace: Option<String>,
    inner: Option<Box<ExceptionData>>,
}

impl ExceptionData {
    /// Creates new exception data.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack_trace: None,
            inner: None,
        }
    }

    /// Captures an error along with its chain of sources.
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        Self {
            kind: "error".to_owned(),
            message: error.to_string(),
            stack_trace: None,
            inner: error.source().map(|source| Box::new(Self::from_error(source))),
        }
    }

    /// Captures a panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::new("panic", panic_message(payload))
    }

    /// Attaches a stack trace.
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// The kind of exception, such as `error` or `panic`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The stack trace, if one was captured.
    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// The exception that caused this one.
    pub fn inner(&self) -> Option<&ExceptionData> {
        self.inner.as_deref()
    }
}

impl fmt::Display for ExceptionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(trace) = &self.stack_trace {
            write!(f, "\n{}", indent(trace, "  "))?;
        }
        let mut inner = self.inner.as_deref();
        while let Some(exception) = inner {
            write!(f, "\n  caused by: {}: {}", exception.kind, exception.message)?;
            inner = exception.inner.as_deref();
        }
        Ok(())
    }
}

/// An immutable record of a failed assertion.
///
/// Built with an [`AssertionFailureBuilder`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssertionFailure {
    description: String,
    message: Option<String>,
    stack_trace: Option<String>,
    labeled_values: Vec<LabeledValue>,
    exceptions: Vec<ExceptionData>,
    inner_failures: Vec<AssertionFailure>,
}

impl AssertionFailure {
    /// A short description of what failed, for example `Expected values to be equal.`.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// A user-supplied message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The stack trace where the failure occurred.
    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// Labeled values, in the order they were added.
    pub fn labeled_values(&self) -> &[LabeledValue] {
        &self.labeled_values
    }

    /// Errors and panics that were caught.
    pub fn exceptions(&self) -> &[ExceptionData] {
        &self.exceptions
    }

    /// Failures nested inside this one.
    pub fn inner_failures(&self) -> &[AssertionFailure] {
        &self.inner_failures
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        swriteln!(out, "{}", self.description);
        if let Some(message) = &self.message {
            swriteln!(out, "{message}");
        }

        if !self.labeled_values.is_empty() {
            let padding = self
                .labeled_values
                .iter()
                .map(|value| value.label.chars().count())
                .max()
                .unwrap_or(0)
                .min(MAX_PADDING);
            out.push('\n');
            for value in &self.labeled_values {
                swriteln!(out, "{:<padding$} : {}", value.label, value.value);
            }
        }

        for exception in &self.exceptions {
            swriteln!(out, "\n{exception}");
        }

        if let Some(trace) = &self.stack_trace {
            swriteln!(out, "\n{trace}");
        }

        for inner in &self.inner_failures {
            swriteln!(out, "\n{}", indent(&inner.to_string(), "  "));
        }

        f.write_str(out.trim_end())
    }
}

/// A fluent builder for [`AssertionFailure`]s.
#[derive(Clone, Debug)]
pub struct AssertionFailureBuilder {
    description: String,
    message: Option<String>,
    stack_trace: Option<String>,
    capture_stack_trace: bool,
    labeled_values: Vec<LabeledValue>,
    exceptions: Vec<ExceptionData>,
    inner_failures: Vec<AssertionFailure>,
}

impl AssertionFailureBuilder {
    /// Label used for the expected value.
    pub const EXPECTED_VALUE: &'static str = "Expected Value";

    /// Label used for the actual value.
    pub const ACTUAL_VALUE: &'static str = "Actual Value";

    /// Label used when the expected and actual values look the same.
    pub const EXPECTED_AND_ACTUAL_VALUE: &'static str = "Expected & Actual Value";

    /// Label used for remarks.
    pub const REMARK: &'static str = "Remark";

    /// Creates a builder for a failure with the given description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            message: None,
            stack_trace: None,
            capture_stack_trace: true,
            labeled_values: Vec::new(),
            exceptions: Vec::new(),
            inner_failures: Vec::new(),
        }
    }

    /// Sets the user-supplied message. An empty message clears it.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.message = (!message.is_empty()).then_some(message);
        self
    }

    /// Sets the stack trace explicitly.
    pub fn stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Controls whether a stack trace is captured by [`build`](Self::build) when none was set.
    ///
    /// Capturing follows the `RUST_BACKTRACE` and `RUST_LIB_BACKTRACE` environment variables.
    pub fn capture_stack_trace(mut self, capture: bool) -> Self {
        self.capture_stack_trace = capture;
        self
    }

    /// Adds a labeled value. If a value with the same label exists, it's replaced.
    ///
    /// # Panics
    ///
    /// Panics if `label` is empty.
    pub fn labeled_value(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        let label = label.into();
        assert!(!label.is_empty(), "label must not be empty");
        let label = truncate_chars(&label, MAX_LABEL_LENGTH).into_owned();
        let value = truncate_chars(&value.into(), MAX_FORMATTED_VALUE_LENGTH).into_owned();

        self.labeled_values.retain(|existing| existing.label != label);
        self.labeled_values.push(LabeledValue { label, value });
        self
    }

    /// Adds a value formatted with its `Debug` representation.
    pub fn debug_value(self, label: impl Into<String>, value: &dyn fmt::Debug) -> Self {
        self.labeled_value(label, format!("{value:?}"))
    }

    /// Adds the expected value.
    pub fn expected_value(self, expected: &dyn fmt::Debug) -> Self {
        self.debug_value(Self::EXPECTED_VALUE, expected)
    }

    /// Adds the actual value.
    pub fn actual_value(self, actual: &dyn fmt::Debug) -> Self {
        self.debug_value(Self::ACTUAL_VALUE, actual)
    }

    /// Adds the expected and actual values.
    ///
    /// If the two look the same once formatted, a single `Expected & Actual Value` is recorded
    /// along with a remark pointing out that they're distinct.
    pub fn expected_and_actual_values(
        self,
        expected: &dyn fmt::Debug,
        actual: &dyn fmt::Debug,
    ) -> Self {
        let expected = format!("{expected:?}");
        let actual = format!("{actual:?}");
        if expected == actual {
            self.labeled_value(Self::EXPECTED_AND_ACTUAL_VALUE, expected)
                .labeled_value(
                    Self::REMARK,
                    "The expected and actual values look the same when formatted but are distinct.",
                )
        } else {
            self.labeled_value(Self::EXPECTED_VALUE, expected)
                .labeled_value(Self::ACTUAL_VALUE, actual)
        }
    }

    /// Adds an exception.
    pub fn exception(mut self, exception: ExceptionData) -> Self {
        self.exceptions.push(exception);
        self
    }

    /// Adds a nested failure.
    pub fn inner_failure(mut self, failure: AssertionFailure) -> Self {
        self.inner_failures.push(failure);
        self
    }

    /// Builds the failure.
    pub fn build(self) -> AssertionFailure {
        let stack_trace = self.stack_trace.or_else(|| {
            if !self.capture_stack_trace {
                return None;
            }
            let backtrace = Backtrace::capture();
            (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string())
        });

        AssertionFailure {
            description: self.description,
            message: self.message,
            stack_trace,
            labeled_values: self.labeled_values,
            exceptions: self.exceptions,
            inner_failures: self.inner_failures,
        }
    }
}

/// The error returned when an assertion fails and the current behavior says to stop.
///
/// A *silent* error refers to a failure that has already been recorded by an
/// [`AssertionContext`](super::AssertionContext), so catching it should not record it again.
#[derive(Clone, Debug, Error)]
#[error("assertion failed: {}", .failure.description())]
pub struct AssertionFailureError {
    failure: AssertionFailure,
    silent: bool,
}

impl AssertionFailureError {
    /// Creates a new error.
    pub fn new(failure: AssertionFailure, silent: bool) -> Self {
        Self { failure, silent }
    }

    /// The failure.
    pub fn failure(&self) -> &AssertionFailure {
        &self.failure
    }

    /// Consumes the error, returning the failure.
    pub fn into_failure(self) -> AssertionFailure {
        self.failure
    }

    /// True if the failure has already been recorded.
    pub fn is_silent(&self) -> bool {
        self.silent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_strategy::proptest;

    fn builder(description: &str) -> AssertionFailureBuilder {
        AssertionFailureBuilder::new(description).capture_stack_trace(false)
    }

    #[test]
    fn display_pads_labels() {
        let failure = builder("Expected values to be equal.")
            .message("checking sums")
            .expected_and_actual_values(&3, &4)
            .labeled_value("x", "1")
            .build();

        assert_eq!(
            failure.to_string(),
            indoc! {"
                Expected values to be equal.
                checking sums

                Expected Value : 3
                Actual Value   : 4
                x              : 1"
            }
        );
    }

    #[test]
    fn same_formatting_adds_remark() {
        let failure = builder("Expected values to be distinct.")
            .expected_and_actual_values(&"a", &"a")
            .build();
        let labels: Vec<_> = failure
            .labeled_values()
            .iter()
            .map(LabeledValue::label)
            .collect();
        assert_eq!(labels, ["Expected & Actual Value", "Remark"]);
        assert_eq!(failure.labeled_values()[0].value(), "\"a\"");
    }

    #[test]
    fn relabeling_replaces() {
        let failure = builder("d")
            .labeled_value("a", "1")
            .labeled_value("b", "2")
            .labeled_value("a", "3")
            .build();
        let values: Vec<_> = failure
            .labeled_values()
            .iter()
            .map(|v| (v.label(), v.value()))
            .collect();
        assert_eq!(values, [("b", "2"), ("a", "3")]);
    }

    #[test]
    fn long_values_are_truncated() {
        let failure = builder("d")
            .labeled_value("l".repeat(150), "v".repeat(2500))
            .build();
        let value = &failure.labeled_values()[0];
        assert_eq!(value.label().len(), MAX_LABEL_LENGTH + 3);
        assert_eq!(value.value().len(), MAX_FORMATTED_VALUE_LENGTH + 3);
        assert!(value.value().ends_with("..."));
    }

    #[test]
    #[should_panic = "label must not be empty"]
    fn empty_label_panics() {
        let _ = builder("d").labeled_value("", "v");
    }

    #[test]
    fn inner_failures_and_exceptions() {
        let inner = builder("inner").message("nested").build();
        let failure = builder("outer")
            .exception(ExceptionData::new("panic", "boom").with_stack_trace("at here"))
            .inner_failure(inner)
            .stack_trace("at test.rs:10")
            .build();

        assert_eq!(
            failure.to_string(),
            indoc! {"
                outer

                panic: boom
                  at here

                at test.rs:10

                  inner
                  nested"
            }
        );
    }

    #[test]
    fn error_chain() {
        #[derive(Debug, Error)]
        #[error("failed to load project")]
        struct LoadError(#[source] std::io::Error);

        let err = LoadError(std::io::Error::other("disk on fire"));
        let data = ExceptionData::from_error(&err);
        assert_eq!(data.message(), "failed to load project");
        assert_eq!(data.inner().map(ExceptionData::message), Some("disk on fire"));
        assert_eq!(
            data.to_string(),
            "error: failed to load project\n  caused by: error: disk on fire"
        );
    }

    #[proptest(cases = 32)]
    fn silent_flag_roundtrips(silent: bool, #[strategy("[a-z ]{1,20}")] description: String) {
        let error = AssertionFailureError::new(builder(&description).build(), silent);
        assert_eq!(error.is_silent(), silent);
        assert_eq!(error.failure().description(), description);
    }
}
