// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    model::TestStep,
    runner::{RunStats, StepResult},
};
use std::{fmt, time::Duration};

/// A test event.
///
/// Events are produced by a [`TestRunner`](crate::runner::TestRunner) and consumed by a
/// [`TestReporter`](crate::reporter::TestReporter).
#[derive(Clone, Debug)]
pub struct TestEvent<'a> {
    /// The amount of time elapsed since the start of the test run.
    pub elapsed: Duration,

    /// The kind of test event this is.
    pub kind: TestEventKind<'a>,
}

/// The kind of test event this is.
///
/// Forms part of [`TestEvent`].
#[derive(Clone, Debug)]
pub enum TestEventKind<'a> {
    /// The test run started.
    RunStarted {
        /// The number of test cases that will be run.
        test_case_count: usize,

        /// The gallio profile chosen for this run.
        profile_name: &'a str,
    },

    /// A test step started.
    StepStarted {
        /// The step that started.
        step: &'a TestStep,
    },

    /// A test step finished.
    StepFinished {
        /// The step that finished.
        step: &'a TestStep,

        /// The result of the step.
        result: &'a StepResult,
    },

    /// A cancellation notice was received.
    RunBeginCancel {
        /// The reason this run was canceled.
        reason: CancelReason,
    },

    /// The test run finished.
    RunFinished {
        /// Statistics for the run.
        run_stats: RunStats,
    },
}

/// Why a test run is being canceled. Later variants are more severe.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum CancelReason {
    /// A test failed and fail-fast is enabled.
    TestFailure,

    /// The event callback returned an error.
    ReportError,

    /// SIGINT, SIGTERM or SIGHUP arrived.
    Signal,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TestFailure => "test failure",
            Self::ReportError => "reporting error",
            Self::Signal => "signal",
        })
    }
}
