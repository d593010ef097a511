// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use color_eyre::eyre::Result;
use gallio_filtering::FilterSet;
use gallio_runner::{
    config::GallioConfig,
    model::{TestModel, TestOutcome},
    reporter::{CancelReason, TestEvent, TestEventKind},
    runner::{RunStats, TestRunnerBuilder},
    signal::SignalHandlerKind,
    test_log::TestLog,
};

/// A finished step, as seen by the event callback.
#[derive(Clone, Debug)]
pub(crate) struct FinishedStep {
    pub(crate) full_name: String,
    pub(crate) is_primary: bool,
    pub(crate) outcome: TestOutcome,
    pub(crate) log: TestLog,
}

#[derive(Debug, Default)]
pub(crate) struct RunRecord {
    pub(crate) stats: RunStats,
    pub(crate) started: Vec<String>,
    pub(crate) finished: Vec<FinishedStep>,
    pub(crate) cancels: Vec<CancelReason>,
}

impl RunRecord {
    pub(crate) fn step(&self, full_name: &str) -> &FinishedStep {
        self.finished
            .iter()
            .find(|step| step.is_primary && step.full_name == full_name)
            .unwrap_or_else(|| panic!("step `{full_name}` finished"))
    }
}

pub(crate) fn record_event(record: &mut RunRecord, event: TestEvent<'_>) {
    match event.kind {
        TestEventKind::StepStarted { step } => record.started.push(step.full_name().to_owned()),
        TestEventKind::StepFinished { step, result } => record.finished.push(FinishedStep {
            full_name: step.full_name().to_owned(),
            is_primary: step.is_primary(),
            outcome: result.outcome.clone(),
            log: result.log.clone(),
        }),
        TestEventKind::RunBeginCancel { reason } => record.cancels.push(reason),
        TestEventKind::RunStarted { .. } | TestEventKind::RunFinished { .. } => {}
    }
}

/// Runs every test in `model` with the default profile.
pub(crate) fn run(model: &TestModel, builder: TestRunnerBuilder) -> Result<RunRecord> {
    run_filtered(model, &FilterSet::empty(), builder)
}

pub(crate) fn run_filtered(
    model: &TestModel,
    filter: &FilterSet,
    builder: TestRunnerBuilder,
) -> Result<RunRecord> {
    let config = GallioConfig::default_config("/fake/workspace")?;
    let profile = config.profile(GallioConfig::DEFAULT_PROFILE)?;
    let runner = builder.build(model, filter, &profile, SignalHandlerKind::Noop)?;

    let mut record = RunRecord::default();
    let stats = runner.execute(|event| record_event(&mut record, event))?;
    record.stats = stats;
    Ok(record)
}
