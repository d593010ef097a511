// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING, StderrStyles};
use gallio_filtering::errors::FilterParseErrors;
use gallio_metadata::GallioExitCode;
use gallio_runner::errors::*;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::{error, info};

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholder messages: errors are meant to be printed with
// display_to_stderr, which colorizes them.

/// An expected failure of a gallio invocation.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("project load error")]
    ProjectLoadError {
        #[from]
        err: ProjectLoadError,
    },
    #[error("filter parse error")]
    FilterParseError {
        #[from]
        err: FilterParseErrors,
    },
    #[error("test plan error")]
    TestPlanError {
        #[from]
        err: TestPlanError,
    },
    #[error("test runner build error")]
    TestRunnerBuildError {
        #[from]
        err: TestRunnerBuildError,
    },
    #[error("fatal runner error")]
    FatalRunnerError {
        #[from]
        err: FatalRunnerError,
    },
    #[error("write test list error")]
    WriteTestListError {
        #[from]
        err: WriteTestListError,
    },
    #[error("write event error")]
    WriteEventError {
        #[from]
        err: WriteEventError,
    },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("no tests to run")]
    NoTestsRun,
    #[error("test run failed")]
    TestRunFailed,
}

impl ExpectedError {
    pub(crate) fn write_output(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    pub(crate) fn current_dir_invalid_utf8(path: std::path::PathBuf) -> Self {
        Self::CurrentDirInvalidUtf8 { path }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::TestRunnerBuildError { .. }
            | Self::FatalRunnerError { .. } => GallioExitCode::SETUP_ERROR,
            Self::ProjectLoadError { .. } => GallioExitCode::PROJECT_LOAD_FAILED,
            Self::FilterParseError { .. } => GallioExitCode::INVALID_FILTER,
            Self::TestPlanError { .. } => GallioExitCode::TEST_PLAN_FAILED,
            Self::WriteTestListError { .. }
            | Self::WriteEventError { .. }
            | Self::WriteOutputError { .. } => GallioExitCode::WRITE_OUTPUT_ERROR,
            Self::NoTestsRun => GallioExitCode::NO_TESTS_RUN,
            Self::TestRunFailed => GallioExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse gallio config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                err.source()
            }
            Self::ProjectLoadError { err } => {
                error!(
                    "failed to load test project at `{}`",
                    err.path().style(styles.bold)
                );
                err.source()
            }
            Self::FilterParseError { err } => {
                for single_error in &err.errors {
                    let report = miette::Report::new(single_error.clone())
                        .with_source_code(err.input.clone());
                    error!(target: NO_HEADING, "{report:?}");
                }

                error!(
                    "failed to parse filter `{}`",
                    err.input.style(styles.bold)
                );
                None
            }
            Self::TestPlanError { err } => {
                error!("{err}");
                None
            }
            Self::TestRunnerBuildError { err } => {
                error!("failed to build test runner");
                Some(err as &dyn Error)
            }
            Self::FatalRunnerError { err } => {
                error!("test run stopped unexpectedly");
                Some(err as &dyn Error)
            }
            Self::WriteTestListError { err } => {
                error!("failed to write test list to output");
                Some(err as &dyn Error)
            }
            Self::WriteEventError { err } => {
                error!("failed to write event to output");
                Some(err as &dyn Error)
            }
            Self::WriteOutputError { err } => {
                error!("failed to write to output");
                Some(err as &dyn Error)
            }
            Self::NoTestsRun => {
                error!("no tests to run");
                info!(
                    target: NO_HEADING,
                    "{}",
                    "(check the filter, or the `default-filter` in the test project)"
                        .style(styles.warning_text)
                );
                None
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
