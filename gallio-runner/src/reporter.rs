// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints out and aggregates test execution statuses.
//!
//! The main structure in this module is [`TestReporter`].

mod displayer;
mod events;

pub use events::*;

use crate::errors::WriteEventError;
use displayer::{DisplayReporter, Styles};
use gallio_metadata::RunSummary;
use std::io::{self, Write};

/// Standard error destination for the reporter.
///
/// This is usually a terminal, but can be an in-memory buffer for tests.
pub enum ReporterStderr<'a> {
    /// Produce output on the (possibly piped) terminal.
    Terminal,

    /// Write output to a buffer.
    Buffer(&'a mut Vec<u8>),
}

/// Test reporter builder.
#[derive(Debug, Default)]
pub struct ReporterBuilder {
    should_colorize: bool,
    verbose: bool,
}

impl ReporterBuilder {
    /// Set to true if the reporter should colorize output.
    pub fn set_colorize(&mut self, should_colorize: bool) -> &mut Self {
        self.should_colorize = should_colorize;
        self
    }

    /// Sets verbose output: passing steps and steps that aren't test cases are printed along with
    /// their logs.
    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    /// Creates a new test reporter.
    pub fn build<'a>(&self, output: ReporterStderr<'a>) -> TestReporter<'a> {
        let mut styles = Styles::default();
        if self.should_colorize {
            styles.colorize();
        }
        TestReporter {
            display_reporter: DisplayReporter::new(styles, self.verbose),
            output,
            summary: RunSummary::default(),
        }
    }
}

/// Functionality to report test results to stderr, and to aggregate them into a
/// [`RunSummary`].
pub struct TestReporter<'a> {
    display_reporter: DisplayReporter,
    output: ReporterStderr<'a>,
    summary: RunSummary,
}

impl TestReporter<'_> {
    /// Report a test event.
    pub fn report_event(&mut self, event: TestEvent<'_>) -> Result<(), WriteEventError> {
        match &event.kind {
            TestEventKind::StepFinished { step, result }
                if step.is_primary() && step.is_test_case() =>
            {
                self.summary.add_test_case(result.to_summary(step));
            }
            TestEventKind::RunFinished { .. } => {
                self.summary.duration_secs = event.elapsed.as_secs_f64();
            }
            _ => {}
        }

        match &mut self.output {
            ReporterStderr::Terminal => {
                let mut writer = io::stderr().lock();
                self.display_reporter.write_event(&event, &mut writer)
            }
            ReporterStderr::Buffer(buf) => self.display_reporter.write_event(&event, &mut **buf),
        }
        .map_err(WriteEventError::Io)
    }

    /// The results aggregated so far.
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Writes the aggregated results as JSON.
    pub fn write_summary_json(&self, mut writer: impl Write) -> Result<(), WriteEventError> {
        serde_json::to_writer_pretty(&mut writer, &self.summary).map_err(WriteEventError::Json)?;
        writeln!(writer).map_err(WriteEventError::Io)
    }
}
