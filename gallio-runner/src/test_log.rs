// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The log kept for each test step.

use crate::{
    assertions::{AssertionFailure, FailureLog},
    helpers::lock,
};
use serde::Serialize;
use std::{
    fmt,
    sync::{Arc, Mutex},
};

/// A named stream within a [`TestLog`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogStream {
    /// General messages written by the test.
    Default,
    /// Assertion failures and errors.
    Failures,
    /// Warnings.
    Warnings,
    /// Standard output of processes run by the test.
    ConsoleOutput,
    /// Standard error of processes run by the test.
    ConsoleError,
}

impl LogStream {
    /// The stream's name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Failures => "failures",
            Self::Warnings => "warnings",
            Self::ConsoleOutput => "console-output",
            Self::ConsoleError => "console-error",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of text written to a [`TestLog`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LogEntry {
    /// The stream written to.
    pub stream: LogStream,
    /// The text, without a trailing newline.
    pub text: String,
}

/// The log for a test step.
///
/// Cloning a log produces another handle to the same entries.
#[derive(Clone, Debug, Default)]
pub struct TestLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl TestLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `text` to `stream`.
    pub fn write(&self, stream: LogStream, text: impl Into<String>) {
        let text = text.into();
        let text = text.strip_suffix('\n').map(str::to_owned).unwrap_or(text);
        lock(&self.entries).push(LogEntry { stream, text });
    }

    /// All entries, in the order they were written.
    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.entries).clone()
    }

    /// The text written to `stream`, one entry per line.
    pub fn stream_text(&self, stream: LogStream) -> String {
        let entries = lock(&self.entries);
        let mut text = String::new();
        for entry in entries.iter().filter(|entry| entry.stream == stream) {
            text.push_str(&entry.text);
            text.push('\n');
        }
        text
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl FailureLog for TestLog {
    fn log_failure(&self, failure: &AssertionFailure) {
        self.write(LogStream::Failures, failure.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::AssertionFailureBuilder;

    #[test]
    fn streams_are_separate() {
        let log = TestLog::new();
        log.write(LogStream::Default, "starting\n");
        log.write(LogStream::ConsoleOutput, "hello");
        log.write(LogStream::Default, "done");
        assert_eq!(log.stream_text(LogStream::Default), "starting\ndone\n");
        assert_eq!(log.stream_text(LogStream::ConsoleOutput), "hello\n");
        assert_eq!(log.stream_text(LogStream::Warnings), "");
        assert_eq!(log.entries().len(), 3);
    }

    #[test]
    fn failures_are_formatted() {
        let log = TestLog::new();
        let failure = AssertionFailureBuilder::new("Expected true.")
            .capture_stack_trace(false)
            .build();
        log.log_failure(&failure);
        assert_eq!(log.stream_text(LogStream::Failures), "Expected true.\n");
    }
}
