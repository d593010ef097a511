// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by gallio.

use crate::{assertions::AssertionFailureError, model::TestOutcome};
use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use std::{error::Error, fmt};
use thiserror::Error;

/// An error that occurred while changing the structure of a
/// [`TestModel`](crate::model::TestModel).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum TestModelError {
    /// The child already has a parent.
    #[error("test `{child}` already has a parent")]
    AlreadyHasParent {
        /// The full name of the child.
        child: String,
    },

    /// The test being removed isn't a child of the given parent.
    #[error("test `{child}` is not a child of `{parent}`")]
    NotAChild {
        /// The full name of the parent.
        parent: String,

        /// The full name of the child.
        child: String,
    },

    /// Adding the child would make a test its own ancestor.
    #[error("cannot add `{child}` under `{parent}`: `{child}` is an ancestor of `{parent}`")]
    WouldCreateCycle {
        /// The full name of the parent.
        parent: String,

        /// The full name of the child.
        child: String,
    },
}

/// An error that occurred while building a [`TestPlan`](crate::model::TestPlan).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum TestPlanError {
    /// Tests depend on each other in a cycle.
    #[error("tests have cyclic dependencies: {}", .tests.join(", "))]
    DependencyCycle {
        /// The full names of the tests in the cycle, sorted.
        tests: Vec<String>,
    },

    /// A test depends on one of its own ancestors, which can't finish before the test does.
    #[error("test `{test}` depends on its ancestor `{dependency}`")]
    DependsOnAncestor {
        /// The full name of the test.
        test: String,

        /// The full name of the dependency.
        dependency: String,
    },
}

/// An error returned when failures are captured concurrently in the same
/// [`AssertionContext`](crate::assertions::AssertionContext).
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("capturing assertion failures concurrently in the same context is not supported")]
#[non_exhaustive]
pub struct ConcurrentCaptureError;

/// An error returned by [`ThreadAbortScope::run`](crate::concurrency::ThreadAbortScope::run).
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum AbortScopeError {
    /// The scope is already running an action.
    #[error("the thread abort scope is already running an action")]
    AlreadyRunning,
}

/// An error returned by a test body.
///
/// Any error type converts into a `TestError` with `?`. An error can also carry the outcome the
/// test should finish with, for example to mark a test as inconclusive.
pub struct TestError {
    error: Box<dyn Error + Send + Sync + 'static>,
    outcome: Option<TestOutcome>,
}

impl TestError {
    /// Creates an error from a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::from(MessageError(message.to_string()))
    }

    /// Creates an error that finishes the test with `outcome`.
    pub fn with_outcome(outcome: TestOutcome, message: impl fmt::Display) -> Self {
        Self {
            error: Box::new(MessageError(message.to_string())),
            outcome: Some(outcome),
        }
    }

    /// The outcome this error finishes the test with, if it carries one.
    pub fn outcome(&self) -> Option<&TestOutcome> {
        self.outcome.as_ref()
    }

    /// Returns the assertion failure this error wraps, if any.
    pub fn as_assertion_failure(&self) -> Option<&AssertionFailureError> {
        self.error.downcast_ref()
    }

    /// Returns true if the wrapped error is of type `E`.
    pub fn is<E: Error + 'static>(&self) -> bool {
        self.error.is::<E>()
    }

    /// Returns the wrapped error.
    pub fn as_error(&self) -> &(dyn Error + Send + Sync + 'static) {
        &*self.error
    }
}

impl<E> From<E> for TestError
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self {
            error: Box::new(error),
            outcome: None,
        }
    }
}

impl fmt::Debug for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestError")
            .field("error", &self.error)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse gallio config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// The config file that failed to parse.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }
}

/// An error which indicates that a profile was requested but not known to gallio.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurred while loading a test project.
#[derive(Debug, Error)]
#[error("failed to load test project at `{path}`")]
#[non_exhaustive]
pub struct ProjectLoadError {
    path: Utf8PathBuf,
    #[source]
    kind: ProjectLoadErrorKind,
}

impl ProjectLoadError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, kind: ProjectLoadErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// The path to the project file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// The kind of error.
    pub fn kind(&self) -> &ProjectLoadErrorKind {
        &self.kind
    }
}

/// The kind of [`ProjectLoadError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProjectLoadErrorKind {
    /// The project file couldn't be read.
    #[error("error reading project file")]
    Read(#[source] std::io::Error),

    /// The project file isn't valid TOML, or doesn't match the expected schema.
    #[error("error parsing project file")]
    Parse(#[source] toml::de::Error),

    /// A test has an empty command.
    #[error("test `{test}` has an empty command")]
    EmptyCommand {
        /// The full name of the test.
        test: String,
    },

    /// A test depends on a test that doesn't exist.
    #[error("test `{test}` depends on unknown test `{dependency}`")]
    UnknownDependency {
        /// The full name of the test.
        test: String,

        /// The full name of the missing dependency.
        dependency: String,
    },

    /// Building the test model failed.
    #[error("error building test model")]
    Model(#[source] TestModelError),
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// An error that occurred while building a
/// [`TestRunner`](crate::runner::TestRunner).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// Building the test plan failed.
    #[error("error building test plan")]
    Plan(#[from] TestPlanError),

    /// Setting up the signal handler failed.
    #[error("error setting up signals")]
    SignalHandlerSetupError(#[from] SignalHandlerSetupError),
}

/// An unrecoverable error that stopped a test run, as opposed to a test failing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FatalRunnerError {
    /// A thread to run a test couldn't be created.
    #[error("failed to spawn a thread for test `{test}`")]
    SpawnThread {
        /// The full name of the test.
        test: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error returned by [`TestRunner::try_execute`](crate::runner::TestRunner::try_execute).
#[derive(Debug, Error)]
pub enum TestRunnerExecuteError<E> {
    /// The event callback returned an error. The run was canceled.
    #[error("error reporting test events")]
    Report(#[source] E),

    /// The run stopped because of an unrecoverable error.
    #[error(transparent)]
    Fatal(#[from] FatalRunnerError),
}

/// An error that occurred while writing reporter output.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteEventError {
    /// An error occurred while writing to the output.
    #[error("error writing to output")]
    Io(#[source] std::io::Error),

    /// An error occurred while serializing a summary.
    #[error("error serializing summary")]
    Json(#[source] serde_json::Error),
}

/// An error that occurs while writing a test list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteTestListError {
    /// An error occurred while writing the list to the output.
    #[error("error writing to output")]
    Io(#[source] std::io::Error),

    /// An error occurred while serializing JSON.
    #[error("error serializing to JSON")]
    Json(#[source] serde_json::Error),
}
