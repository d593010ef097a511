// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{TestEvent, TestEventKind};
use crate::{
    helpers::{
        indent,
        plural::{assertions_str, tests_str},
    },
    model::TestStep,
    runner::{RunStats, StepResult},
    test_log::LogStream,
};
use gallio_metadata::TestStatus;
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};

/// Log streams printed under a step, in order.
const PRINTED_STREAMS: [LogStream; 5] = [
    LogStream::Failures,
    LogStream::Warnings,
    LogStream::Default,
    LogStream::ConsoleOutput,
    LogStream::ConsoleError,
];

pub(super) struct DisplayReporter {
    styles: Styles,
    verbose: bool,
}

impl DisplayReporter {
    pub(super) fn new(styles: Styles, verbose: bool) -> Self {
        Self { styles, verbose }
    }

    pub(super) fn write_event(
        &self,
        event: &TestEvent<'_>,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        match &event.kind {
            TestEventKind::RunStarted {
                test_case_count,
                profile_name,
            } => {
                write!(writer, "{:>12} ", "Starting".style(self.styles.pass))?;
                writeln!(
                    writer,
                    "{} {} (profile: {})",
                    test_case_count.style(self.styles.count),
                    tests_str(*test_case_count),
                    profile_name.style(self.styles.count),
                )?;
            }
            TestEventKind::StepStarted { .. } => {}
            TestEventKind::StepFinished { step, result } => {
                if self.should_display(step, result) {
                    self.write_step_line(step, result, writer)?;
                    let quiet = matches!(
                        result.outcome.status(),
                        TestStatus::Passed | TestStatus::Skipped
                    );
                    if self.verbose || !quiet {
                        self.write_step_log(step, result, writer)?;
                    }
                }
            }
            TestEventKind::RunBeginCancel { reason } => {
                write!(writer, "{:>12} ", "Canceling".style(self.styles.fail))?;
                writeln!(writer, "due to {}", reason.style(self.styles.fail))?;
            }
            TestEventKind::RunFinished { run_stats } => {
                writeln!(writer, "{}", "-".repeat(12))?;
                let summary_style = if run_stats.initial_run_count == 0 {
                    self.styles.skip
                } else if run_stats.is_success() {
                    self.styles.pass
                } else {
                    self.styles.fail
                };
                write!(
                    writer,
                    "{:>12} [{:>8.3}s] ",
                    "Summary".style(summary_style),
                    event.elapsed.as_secs_f64(),
                )?;
                self.write_summary_str(run_stats, writer)?;
                writeln!(writer)?;
            }
        }
        Ok(())
    }

    fn should_display(&self, step: &TestStep, result: &StepResult) -> bool {
        if self.verbose || step.is_test_case() {
            return true;
        }
        // Containers and nested steps only show up when they have something to say.
        !result.outcome.is_passed() && !result.log.stream_text(LogStream::Failures).is_empty()
    }

    fn write_step_line(
        &self,
        step: &TestStep,
        result: &StepResult,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let (label, style) = match result.outcome.status() {
            TestStatus::Passed => ("PASS", self.styles.pass),
            TestStatus::Failed => ("FAIL", self.styles.fail),
            TestStatus::Skipped => ("SKIP", self.styles.skip),
            TestStatus::Inconclusive => ("INCONCLUSIVE", self.styles.inconclusive),
        };
        write!(
            writer,
            "{:>12} [{:>8.3}s] {}",
            label.style(style),
            result.duration.as_secs_f64(),
            step.full_name().style(self.styles.name),
        )?;
        if let Some(category) = result.outcome.category() {
            write!(writer, " ({})", category.style(style))?;
        }
        if result.assertion_count > 0 && self.verbose {
            write!(
                writer,
                " {} {}",
                result.assertion_count.style(self.styles.count),
                assertions_str(result.assertion_count),
            )?;
        }
        writeln!(writer)
    }

    fn write_step_log(
        &self,
        step: &TestStep,
        result: &StepResult,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        for stream in PRINTED_STREAMS {
            let text = result.log.stream_text(stream);
            if text.is_empty() {
                continue;
            }
            let header = format!(
                "--- {}: {} ---",
                stream.as_str().to_uppercase(),
                step.full_name()
            );
            writeln!(writer, "\n{}", header.style(self.styles.output))?;
            writeln!(writer, "{}", indent(&text, "  "))?;
            writeln!(writer)?;
        }
        Ok(())
    }

    fn write_summary_str(&self, run_stats: &RunStats, writer: &mut dyn Write) -> io::Result<()> {
        let RunStats {
            initial_run_count,
            finished_count,
            passed,
            failed,
            skipped,
            inconclusive,
            canceled,
            assertion_count,
        } = *run_stats;

        write!(
            writer,
            "{} {} run: ",
            finished_count.style(self.styles.count),
            tests_str(finished_count),
        )?;
        if finished_count != initial_run_count {
            write!(
                writer,
                "(of {} expected) ",
                initial_run_count.style(self.styles.count)
            )?;
        }
        write!(
            writer,
            "{} {}, {} {}, {} {}, {} {}",
            passed.style(self.styles.count),
            "passed".style(self.styles.pass),
            failed.style(self.styles.count),
            "failed".style(self.styles.fail),
            skipped.style(self.styles.count),
            "skipped".style(self.styles.skip),
            inconclusive.style(self.styles.count),
            "inconclusive".style(self.styles.inconclusive),
        )?;
        if canceled > 0 {
            write!(
                writer,
                " ({} {})",
                canceled.style(self.styles.count),
                "canceled".style(self.styles.fail),
            )?;
        }
        write!(
            writer,
            "; {} {}",
            assertion_count.style(self.styles.count),
            assertions_str(assertion_count),
        )
    }
}

#[derive(Debug, Default)]
pub(super) struct Styles {
    count: Style,
    name: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    inconclusive: Style,
    output: Style,
}

impl Styles {
    pub(super) fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.name = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.inconclusive = Style::new().magenta().bold();
        self.output = Style::new().magenta();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Test, TestModel, TestOutcome},
        reporter::CancelReason,
        test_log::TestLog,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn render(reporter: &DisplayReporter, kind: TestEventKind<'_>, elapsed: Duration) -> String {
        let mut buf = Vec::new();
        reporter
            .write_event(&TestEvent { elapsed, kind }, &mut buf)
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn case_step() -> TestStep {
        let mut model = TestModel::new();
        let group = model
            .add_test(model.root(), Test::new("Group", "group"))
            .unwrap();
        let case = model
            .add_test(group, Test::new("Case", "test").with_test_case(true))
            .unwrap();
        let root = TestStep::primary(&model[model.root()], model.root(), None);
        let group = TestStep::primary(&model[group], group, Some(&root));
        TestStep::primary(&model[case], case, Some(&group))
    }

    fn plain() -> DisplayReporter {
        DisplayReporter::new(Styles::default(), false)
    }

    #[test]
    fn run_started_line() {
        let out = render(
            &plain(),
            TestEventKind::RunStarted {
                test_case_count: 3,
                profile_name: "ci",
            },
            Duration::ZERO,
        );
        assert_eq!(out, "    Starting 3 tests (profile: ci)\n");
    }

    #[test]
    fn passing_step_line() {
        let step = case_step();
        let mut result = StepResult::not_run(TestOutcome::passed(), TestLog::new());
        result.duration = Duration::from_millis(1250);
        result.log.write(LogStream::Default, "hidden unless verbose");
        let out = render(
            &plain(),
            TestEventKind::StepFinished {
                step: &step,
                result: &result,
            },
            Duration::ZERO,
        );
        assert_eq!(out, "        PASS [   1.250s] Group/Case\n");
    }

    #[test]
    fn failing_step_prints_log() {
        let step = case_step();
        let result = StepResult::not_run(TestOutcome::timeout(), TestLog::new());
        result.log.write(LogStream::Failures, "Expected 1, got 2.");
        result.log.write(LogStream::ConsoleOutput, "hello");
        let out = render(
            &plain(),
            TestEventKind::StepFinished {
                step: &step,
                result: &result,
            },
            Duration::ZERO,
        );
        assert_eq!(
            out,
            indoc! {"
                        FAIL [   0.000s] Group/Case (timeout)

                --- FAILURES: Group/Case ---
                  Expected 1, got 2.


                --- CONSOLE-OUTPUT: Group/Case ---
                  hello

            "}
        );
    }

    #[test]
    fn passing_container_is_quiet() {
        let model = TestModel::new();
        let root = TestStep::primary(&model[model.root()], model.root(), None);
        let result = StepResult::not_run(TestOutcome::passed(), TestLog::new());
        let out = render(
            &plain(),
            TestEventKind::StepFinished {
                step: &root,
                result: &result,
            },
            Duration::ZERO,
        );
        assert_eq!(out, "");
    }

    #[test]
    fn cancel_and_summary_lines() {
        let out = render(
            &plain(),
            TestEventKind::RunBeginCancel {
                reason: CancelReason::Signal,
            },
            Duration::ZERO,
        );
        assert_eq!(out, "   Canceling due to signal\n");

        let run_stats = RunStats {
            initial_run_count: 4,
            finished_count: 4,
            passed: 2,
            failed: 1,
            skipped: 1,
            inconclusive: 0,
            canceled: 0,
            assertion_count: 7,
        };
        let out = render(
            &plain(),
            TestEventKind::RunFinished { run_stats },
            Duration::from_millis(2500),
        );
        assert_eq!(
            out,
            indoc! {"
                ------------
                     Summary [   2.500s] 4 tests run: 2 passed, 1 failed, 1 skipped, 0 inconclusive; 7 assertions
            "}
        );
    }

    #[test]
    fn summary_notes_canceled_tests() {
        let run_stats = RunStats {
            initial_run_count: 3,
            finished_count: 1,
            passed: 0,
            failed: 0,
            skipped: 0,
            inconclusive: 1,
            canceled: 1,
            assertion_count: 1,
        };
        let out = render(
            &plain(),
            TestEventKind::RunFinished { run_stats },
            Duration::ZERO,
        );
        assert!(
            out.ends_with(
                "1 test run: (of 3 expected) 0 passed, 0 failed, 0 skipped, 1 inconclusive (1 canceled); 1 assertion\n"
            ),
            "unexpected output: {out}"
        );
    }
}
