// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use gallio_filtering::FilterSet;
use gallio_metadata::TestStatus;
use gallio_runner::{
    model::TestOutcome, project::TestProject, runner::TestRunnerBuilder, test_log::LogStream,
};
use indoc::indoc;
use pretty_assertions::assert_eq;

const PROJECT: &str = indoc! {r#"
    default-filter = "exclude Category: slow"

    [[group]]
    name = "Shell"

    [[group.test]]
    name = "echo"
    command = ["sh", "-c", "echo out; echo err >&2"]

    [[group.test]]
    name = "exit"
    command = ["sh", "-c", "exit 3"]

    [[group.test]]
    name = "env"
    command = ["sh", "-c", "test \"$GREETING\" = hello && test -f marker"]
    env = { GREETING = "hello" }

    [[group.test]]
    name = "after-exit"
    command = ["true"]
    depends-on = ["Shell/exit"]

    [[group.test]]
    name = "hangs"
    command = ["sleep", "60"]
    timeout = "200ms"

    [[group.test]]
    name = "slow"
    command = ["sleep", "60"]
    metadata = { Category = "slow" }
"#};

fn load_project() -> Result<(Utf8TempDir, TestProject)> {
    let dir = camino_tempfile::tempdir()?;
    let path = dir.path().join(TestProject::DEFAULT_FILE_NAME);
    std::fs::write(&path, PROJECT)?;
    std::fs::write(dir.path().join("marker"), "")?;
    let project = TestProject::load(&path)?;
    Ok((dir, project))
}

#[test]
fn runs_project_commands() -> Result<()> {
    let (_dir, project) = load_project()?;
    let filter = FilterSet::parse(project.default_filter().unwrap_or_default())?;
    let record = run_filtered(project.model(), &filter, TestRunnerBuilder::default())?;

    assert!(!record.started.iter().any(|name| name == "Shell/slow"));

    let echo = record.step("Shell/echo");
    assert_eq!(echo.outcome, TestOutcome::passed());
    assert_eq!(echo.log.stream_text(LogStream::ConsoleOutput), "out\n");
    assert_eq!(echo.log.stream_text(LogStream::ConsoleError), "err\n");

    let exit = record.step("Shell/exit");
    assert_eq!(exit.outcome, TestOutcome::failed());
    assert_eq!(
        exit.log.stream_text(LogStream::Failures),
        "The process exited with exit code 3.\n"
    );

    assert_eq!(record.step("Shell/env").outcome, TestOutcome::passed());
    assert_eq!(
        record.step("Shell/after-exit").outcome,
        TestOutcome::skipped()
    );

    let hangs = record.step("Shell/hangs");
    assert_eq!(hangs.outcome, TestOutcome::timeout());
    assert_eq!(hangs.outcome.status(), TestStatus::Failed);

    assert_eq!(record.stats.initial_run_count, 5);
    assert_eq!(
        (
            record.stats.passed,
            record.stats.failed,
            record.stats.skipped
        ),
        (2, 2, 1)
    );
    Ok(())
}
