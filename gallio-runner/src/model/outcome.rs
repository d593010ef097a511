// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use gallio_metadata::{OutcomeSummary, TestStatus};
use smol_str::SmolStr;
use std::fmt;

/// The outcome of a test step: a status plus an optional category that refines it.
///
/// For example, a test that ran out of time has status [`TestStatus::Failed`] and category
/// `timeout`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TestOutcome {
    status: TestStatus,
    category: Option<SmolStr>,
}

impl TestOutcome {
    /// Creates an outcome with a status and no category.
    pub fn new(status: TestStatus) -> Self {
        Self {
            status,
            category: None,
        }
    }

    /// Creates an outcome with a status and a category.
    pub fn with_category(status: TestStatus, category: impl Into<SmolStr>) -> Self {
        Self {
            status,
            category: Some(category.into()),
        }
    }

    /// The test passed.
    pub fn passed() -> Self {
        Self::new(TestStatus::Passed)
    }

    /// The test failed.
    pub fn failed() -> Self {
        Self::new(TestStatus::Failed)
    }

    /// The test failed because of an unexpected error.
    pub fn error() -> Self {
        Self::with_category(TestStatus::Failed, "error")
    }

    /// The test failed because it ran out of time.
    pub fn timeout() -> Self {
        Self::with_category(TestStatus::Failed, "timeout")
    }

    /// The test did not produce a conclusive result.
    pub fn inconclusive() -> Self {
        Self::new(TestStatus::Inconclusive)
    }

    /// The test was canceled before it could finish.
    pub fn canceled() -> Self {
        Self::with_category(TestStatus::Inconclusive, "canceled")
    }

    /// The test was skipped.
    pub fn skipped() -> Self {
        Self::new(TestStatus::Skipped)
    }

    /// The test was skipped because it's ignored.
    pub fn ignored() -> Self {
        Self::with_category(TestStatus::Skipped, "ignored")
    }

    /// The test was skipped because it's pending.
    pub fn pending() -> Self {
        Self::with_category(TestStatus::Skipped, "pending")
    }

    /// The test was skipped because it only runs when selected explicitly.
    pub fn explicit() -> Self {
        Self::with_category(TestStatus::Skipped, "explicit")
    }

    /// Returns the status.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Returns the category, if any.
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Returns the category if there is one, otherwise the name of the status.
    pub fn display_name(&self) -> &str {
        self.category().unwrap_or_else(|| self.status.as_str())
    }

    /// Returns true if the status is `passed`.
    pub fn is_passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    /// Returns an outcome with the same status and no category.
    pub fn generalize(&self) -> Self {
        Self::new(self.status)
    }

    /// Combines this outcome with another, keeping the more severe one.
    ///
    /// Severity follows [`TestStatus`] ordering. If both statuses are equal, an outcome with a
    /// category wins over one without.
    pub fn combine_with(&self, other: &TestOutcome) -> TestOutcome {
        if other.status > self.status
            || (other.status == self.status && self.category.is_none() && other.category.is_some())
        {
            other.clone()
        } else {
            self.clone()
        }
    }

    /// Converts this outcome to its serializable form.
    pub fn to_summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            status: self.status,
            category: self.category.clone(),
        }
    }
}

impl Default for TestOutcome {
    fn default() -> Self {
        Self::passed()
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.category {
            Some(category) => write!(f, "{} ({category})", self.status),
            None => write!(f, "{}", self.status),
        }
    }
}
