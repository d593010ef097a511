// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use gallio_filtering::FilterSet;
use gallio_metadata::TestStatus;
use gallio_runner::{
    assertions::helper::{are_equal, is_true},
    concurrency,
    config::GallioConfig,
    model::{Test, TestBody, TestModel, TestOutcome, keys, kinds},
    reporter::{ReporterBuilder, ReporterStderr},
    runner::{TestError, TestRunnerBuilder},
    signal::SignalHandlerKind,
    test_log::LogStream,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn case(name: &str, body: TestBody) -> Test {
    Test::new(name, kinds::TEST)
        .with_test_case(true)
        .with_body(body)
}

fn passing(name: &str) -> Test {
    case(
        name,
        TestBody::from_fn(|ctx| {
            ctx.write_line("hello from the test");
            are_equal(&2, &(1 + 1), None)?;
            Ok(())
        }),
    )
}

fn failing(name: &str) -> Test {
    case(
        name,
        TestBody::from_fn(|_| {
            is_true(false, Some("should fail"))?;
            Ok(())
        }),
    )
}

#[test]
fn outcomes_of_function_bodies() -> Result<()> {
    let mut model = TestModel::new();
    let suite = model.add_test(model.root(), Test::new("Suite", kinds::FIXTURE))?;
    model.add_test(suite, passing("Passes"))?;
    model.add_test(suite, failing("Fails"))?;
    model.add_test(
        suite,
        case("Errors", TestBody::from_fn(|_| Err(TestError::msg("boom")))),
    )?;
    model.add_test(
        suite,
        case(
            "Panics",
            TestBody::from_fn(|_| panic!("unexpected state")),
        ),
    )?;
    model.add_test(
        suite,
        case(
            "Inconclusive",
            TestBody::from_fn(|_| {
                Err(TestError::with_outcome(
                    TestOutcome::inconclusive(),
                    "database unavailable",
                ))
            }),
        ),
    )?;
    model.add_test(
        suite,
        passing("Ignored").with_metadata(keys::IGNORE_REASON, "flaky"),
    )?;

    let record = run(&model, TestRunnerBuilder::default())?;

    assert_eq!(record.stats.initial_run_count, 6);
    assert_eq!(record.stats.finished_count, 6);
    assert_eq!(record.stats.passed, 1);
    assert_eq!(record.stats.failed, 3);
    assert_eq!(record.stats.inconclusive, 1);
    assert_eq!(record.stats.skipped, 1);
    assert!(!record.stats.is_success());

    let passes = record.step("Suite/Passes");
    assert_eq!(passes.outcome, TestOutcome::passed());
    assert_eq!(
        passes.log.stream_text(LogStream::Default),
        "hello from the test\n"
    );

    let fails = record.step("Suite/Fails");
    assert_eq!(fails.outcome.status(), TestStatus::Failed);
    assert!(
        fails
            .log
            .stream_text(LogStream::Failures)
            .contains("should fail")
    );

    let errors = record.step("Suite/Errors");
    assert_eq!(errors.outcome.status(), TestStatus::Failed);
    assert!(errors.log.stream_text(LogStream::Failures).contains("boom"));

    let panics = record.step("Suite/Panics");
    assert_eq!(panics.outcome.status(), TestStatus::Failed);
    assert!(
        panics
            .log
            .stream_text(LogStream::Failures)
            .contains("unexpected state")
    );

    assert_eq!(
        record.step("Suite/Inconclusive").outcome,
        TestOutcome::inconclusive()
    );

    let ignored = record.step("Suite/Ignored");
    assert_eq!(ignored.outcome, TestOutcome::ignored());
    assert!(
        ignored
            .log
            .stream_text(LogStream::Warnings)
            .contains("flaky")
    );

    // The fixture doesn't pass because some of its children failed.
    assert_eq!(record.step("Suite").outcome.status(), TestStatus::Failed);
    Ok(())
}

#[test]
fn unsatisfied_dependency_skips_dependents() -> Result<()> {
    let mut model = TestModel::new();
    let setup = model.add_test(model.root(), failing("Setup"))?;
    let dependent = model.add_test(model.root(), passing("UsesSetup"))?;
    model.add_dependency(dependent, setup);
    model.add_test(model.root(), passing("Independent"))?;

    let record = run(&model, TestRunnerBuilder::default())?;

    assert_eq!(record.step("Setup").outcome.status(), TestStatus::Failed);
    let skipped = record.step("UsesSetup");
    assert_eq!(skipped.outcome, TestOutcome::skipped());
    assert_eq!(
        skipped.log.stream_text(LogStream::Warnings),
        "Skipped due to an unsatisfied test dependency.\n"
    );
    assert_eq!(record.step("Independent").outcome, TestOutcome::passed());
    assert_eq!(
        (
            record.stats.passed,
            record.stats.failed,
            record.stats.skipped
        ),
        (1, 1, 1)
    );
    Ok(())
}

#[test]
fn dependencies_outside_the_plan_are_ignored() -> Result<()> {
    let mut model = TestModel::new();
    let setup = model.add_test(model.root(), failing("Setup"))?;
    let dependent = model.add_test(model.root(), passing("UsesSetup"))?;
    model.add_dependency(dependent, setup);

    let filter = FilterSet::parse("Name: UsesSetup")?;
    let record = run_filtered(&model, &filter, TestRunnerBuilder::default())?;
    assert_eq!(record.step("UsesSetup").outcome, TestOutcome::passed());
    assert!(!record.started.iter().any(|name| name == "Setup"));
    Ok(())
}

#[test]
fn fail_fast_cancels_remaining_tests() -> Result<()> {
    let mut model = TestModel::new();
    model.add_test(model.root(), failing("First"))?;
    model.add_test(model.root(), passing("Second"))?;
    model.add_test(model.root(), passing("Third"))?;

    let mut builder = TestRunnerBuilder::default();
    builder.set_fail_fast(true);
    let record = run(&model, builder)?;

    assert_eq!(record.cancels, [gallio_runner::reporter::CancelReason::TestFailure]);
    assert_eq!(record.step("Second").outcome, TestOutcome::canceled());
    assert_eq!(record.step("Third").outcome, TestOutcome::canceled());
    assert_eq!(record.stats.failed, 1);
    assert_eq!(record.stats.canceled, 2);
    assert_eq!(record.stats.finished_count, 3);
    Ok(())
}

#[test]
fn timeout_aborts_a_sleeping_test() -> Result<()> {
    let mut model = TestModel::new();
    model.add_test(
        model.root(),
        case(
            "Sleeps",
            TestBody::from_fn(|_| {
                concurrency::abort::sleep(Duration::from_secs(60))?;
                Ok(())
            }),
        )
        .with_timeout(Duration::from_millis(100)),
    )?;

    let record = run(&model, TestRunnerBuilder::default())?;
    let sleeps = record.step("Sleeps");
    assert_eq!(sleeps.outcome, TestOutcome::timeout());
    assert_eq!(sleeps.outcome.category(), Some("timeout"));
    assert!(
        sleeps
            .log
            .stream_text(LogStream::Warnings)
            .contains("timed out")
    );
    assert_eq!(record.stats.failed, 1);
    Ok(())
}

#[test]
fn nested_steps_fold_into_their_parent() -> Result<()> {
    let mut model = TestModel::new();
    model.add_test(
        model.root(),
        case(
            "Rows",
            TestBody::from_fn(|ctx| {
                ctx.run_step("row 1", |_| Ok(()));
                ctx.run_step("row 2", |_| Err(TestError::msg("bad row")));
                Ok(())
            }),
        ),
    )?;

    let record = run(&model, TestRunnerBuilder::default())?;
    let nested: Vec<_> = record
        .finished
        .iter()
        .filter(|step| !step.is_primary)
        .map(|step| step.outcome.status())
        .collect();
    assert_eq!(nested, [TestStatus::Passed, TestStatus::Failed]);
    assert_eq!(record.step("Rows").outcome.status(), TestStatus::Failed);
    // Nested steps aren't test cases.
    assert_eq!(record.stats.finished_count, 1);
    Ok(())
}

#[test]
fn failing_container_skips_its_children() -> Result<()> {
    let mut model = TestModel::new();
    let fixture = model.add_test(
        model.root(),
        Test::new("Fixture", kinds::FIXTURE)
            .with_body(TestBody::from_fn(|_| Err(TestError::msg("setup failed")))),
    )?;
    model.add_test(fixture, passing("Child"))?;

    let record = run(&model, TestRunnerBuilder::default())?;
    assert_eq!(record.step("Fixture").outcome.status(), TestStatus::Failed);
    assert_eq!(record.step("Fixture/Child").outcome, TestOutcome::skipped());
    assert_eq!(record.stats.skipped, 1);
    Ok(())
}

#[test]
fn reporter_displays_a_run() -> Result<()> {
    let mut model = TestModel::new();
    model.add_test(model.root(), passing("Passes"))?;
    model.add_test(model.root(), failing("Fails"))?;

    let config = GallioConfig::default_config("/fake/workspace")?;
    let profile = config.profile(GallioConfig::DEFAULT_PROFILE)?;
    let runner = TestRunnerBuilder::default().build(
        &model,
        &FilterSet::empty(),
        &profile,
        SignalHandlerKind::Noop,
    )?;

    let mut buf = Vec::new();
    let mut reporter = ReporterBuilder::default().build(ReporterStderr::Buffer(&mut buf));
    let stats = runner.try_execute(|event| reporter.report_event(event))?;
    let summary = reporter.summary().clone();
    drop(reporter);

    assert_eq!(stats.passed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(summary.run_count(), 2);
    assert_eq!((summary.passed, summary.failed), (1, 1));

    let output = String::from_utf8(buf)?;
    assert!(output.contains("Starting"), "output: {output}");
    assert!(output.contains("PASS"), "output: {output}");
    assert!(output.contains("FAIL"), "output: {output}");
    assert!(output.contains("--- FAILURES: Fails ---"), "output: {output}");
    assert!(
        output.contains("2 tests run: 1 passed, 1 failed"),
        "output: {output}"
    );
    Ok(())
}
