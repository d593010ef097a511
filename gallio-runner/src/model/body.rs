// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::runner::{TestContext, TestError};
use camino::Utf8PathBuf;
use debug_ignore::DebugIgnore;
use std::{collections::BTreeMap, sync::Arc};

type TestFn = dyn Fn(&TestContext) -> Result<(), TestError> + Send + Sync;

/// What a test case does when it runs.
#[derive(Clone, Debug)]
pub enum TestBody {
    /// Runs a function on a test thread.
    Function(DebugIgnore<Arc<TestFn>>),

    /// Runs an external command. Exit code 0 means the test passed.
    Command(CommandSpec),
}

impl TestBody {
    /// Creates a body from a function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&TestContext) -> Result<(), TestError> + Send + Sync + 'static,
    {
        Self::Function(DebugIgnore(Arc::new(f)))
    }
}

/// An external command run as a test body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    /// The program to run.
    pub program: String,

    /// Arguments to the program.
    pub args: Vec<String>,

    /// The working directory. Defaults to the current directory.
    pub cwd: Option<Utf8PathBuf>,

    /// Environment variables to set.
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Creates a new command spec from an argv list. Returns `None` if `argv` is empty.
    pub fn from_argv(argv: impl IntoIterator<Item = impl Into<String>>) -> Option<Self> {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
            cwd: None,
            env: BTreeMap::new(),
        })
    }
}
