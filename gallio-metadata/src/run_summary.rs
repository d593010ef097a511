// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// The status of a finished test step.
///
/// Variants are ordered by severity: when two statuses are combined, the greater one wins.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "proptest1", derive(test_strategy::Arbitrary))]
pub enum TestStatus {
    /// The test passed.
    Passed,

    /// The test did not run.
    Skipped,

    /// The test neither passed nor failed.
    Inconclusive,

    /// The test failed.
    Failed,
}

impl TestStatus {
    /// All statuses, from least to most severe.
    pub const ALL: [TestStatus; 4] = [
        TestStatus::Passed,
        TestStatus::Skipped,
        TestStatus::Inconclusive,
        TestStatus::Failed,
    ];

    /// Returns the lowercase string form of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Skipped => "skipped",
            TestStatus::Inconclusive => "inconclusive",
            TestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serialized test outcome: a status plus an optional category such as `timeout`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutcomeSummary {
    /// The status.
    pub status: TestStatus,

    /// The category, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<SmolStr>,
}

/// Information about a single finished test step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct StepRunSummary {
    /// The id of the test this step belongs to.
    pub test_id: SmolStr,

    /// The id of the step.
    pub step_id: SmolStr,

    /// The full name of the step.
    pub full_name: String,

    /// The outcome of the step.
    pub outcome: OutcomeSummary,

    /// How long the step took, in seconds.
    pub duration_secs: f64,

    /// The number of assertions evaluated by the step.
    pub assertion_count: u64,

    /// Formatted assertion failures recorded by the step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl StepRunSummary {
    /// Creates a new step summary with no failures.
    pub fn new(
        test_id: impl Into<SmolStr>,
        step_id: impl Into<SmolStr>,
        full_name: impl Into<String>,
        outcome: OutcomeSummary,
        duration_secs: f64,
        assertion_count: u64,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            step_id: step_id.into(),
            full_name: full_name.into(),
            outcome,
            duration_secs,
            assertion_count,
            failures: Vec::new(),
        }
    }
}

/// Statistics for a completed run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct RunSummary {
    /// The number of test cases that passed.
    pub passed: usize,

    /// The number of test cases that failed.
    pub failed: usize,

    /// The number of test cases that were skipped.
    pub skipped: usize,

    /// The number of test cases that were inconclusive.
    pub inconclusive: usize,

    /// The total number of assertions evaluated.
    pub assertion_count: u64,

    /// The wall-clock duration of the run, in seconds.
    pub duration_secs: f64,

    /// Per-step results, in the order in which they finished.
    #[serde(default)]
    pub steps: Vec<StepRunSummary>,
}

impl RunSummary {
    /// Parse JSON output from `gallio run --message-format json`.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }

    /// Records a finished test case step.
    pub fn add_test_case(&mut self, step: StepRunSummary) {
        match step.outcome.status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Inconclusive => self.inconclusive += 1,
        }
        self.assertion_count += step.assertion_count;
        self.steps.push(step);
    }

    /// The number of test cases that finished, whatever their status.
    pub fn run_count(&self) -> usize {
        self.passed + self.failed + self.skipped + self.inconclusive
    }

    /// Returns true if no test case failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}
