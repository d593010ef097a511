// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::CommandError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{collections::BTreeMap, io, path::PathBuf, process::Command};

/// Command builder for `gallio list`.
#[derive(Clone, Debug, Default)]
pub struct ListCommand {
    gallio_path: Option<Box<Utf8Path>>,
    current_dir: Option<Box<Utf8Path>>,
    args: Vec<Box<str>>,
}

impl ListCommand {
    /// Creates a new `ListCommand`.
    ///
    /// This command runs `gallio list`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Path to the `gallio` executable. If not specified, the `GALLIO` environment variable is
    /// consulted, then `gallio` is looked up on the `PATH`.
    pub fn gallio_path(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.gallio_path = Some(path.into().into_boxed_path());
        self
    }

    /// Sets the current directory of the `gallio list` process.
    ///
    /// By default, the current directory of the current process is used.
    pub fn current_dir(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.current_dir = Some(path.into().into_boxed_path());
        self
    }

    /// Adds an argument to the end of `gallio list`.
    pub fn add_arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into().into_boxed_str());
        self
    }

    /// Adds several arguments to the end of `gallio list`.
    pub fn add_args(&mut self, args: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        for arg in args {
            self.add_arg(arg.into());
        }
        self
    }

    /// Builds a command for `gallio list`. This is the initial command that is used to run
    /// `gallio list`, and can be spawned or inspected.
    pub fn command(&self) -> Command {
        let gallio_path: PathBuf = match &self.gallio_path {
            Some(path) => path.as_std_path().to_owned(),
            None => std::env::var_os("GALLIO")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("gallio")),
        };

        let mut command = Command::new(gallio_path);
        if let Some(path) = &self.current_dir {
            command.current_dir(path.as_std_path());
        }

        command.args(["list", "--message-format", "json"]);
        command.args(self.args.iter().map(|s| s.as_ref()));
        command
    }

    /// Executes `gallio list` and parses the output into a [`TestListSummary`].
    pub fn exec(&self) -> Result<TestListSummary, CommandError> {
        let mut command = self.command();
        let output = command.output().map_err(CommandError::Exec)?;

        if !output.status.success() {
            // The process exited with a non-zero code.
            let exit_code = output.status.code();
            let stderr = output.stderr;
            return Err(CommandError::CommandFailed { exit_code, stderr });
        }

        let json = String::from_utf8(output.stdout).map_err(|err| {
            CommandError::Exec(io::Error::new(io::ErrorKind::InvalidData, err))
        })?;
        TestListSummary::parse_json(json).map_err(CommandError::Json)
    }
}

/// Root element of the JSON produced by `gallio list --message-format json`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct TestListSummary {
    /// The number of test cases in the list.
    pub test_count: usize,

    /// The top-level tests in the tree. The root test itself is not included.
    pub roots: Vec<TestSummary>,
}

impl TestListSummary {
    /// Creates a new summary from the given roots, counting test cases.
    pub fn new(roots: Vec<TestSummary>) -> Self {
        let test_count = roots
            .iter()
            .flat_map(|root| root.iter())
            .filter(|test| test.is_test_case)
            .count();
        Self { test_count, roots }
    }

    /// Parse JSON output from `gallio list --message-format json`.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }

    /// Iterates over every test in the tree in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &TestSummary> + '_ {
        self.roots.iter().flat_map(|root| root.iter())
    }

    /// Looks up a test by its full name.
    pub fn find_by_full_name(&self, full_name: &str) -> Option<&TestSummary> {
        self.iter().find(|test| test.full_name == full_name)
    }
}

/// A single test or test container in the list output.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct TestSummary {
    /// The stable identifier of the test, as 16 lowercase hex digits.
    pub id: SmolStr,

    /// The name of the test.
    pub name: String,

    /// The slash-separated full name of the test.
    pub full_name: String,

    /// The kind of test, for example `group` or `test`.
    pub kind: SmolStr,

    /// True if this test is a test case rather than a container.
    pub is_test_case: bool,

    /// Full names of the tests this test depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Metadata associated with the test.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Vec<String>>,

    /// Child tests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestSummary>,
}

impl TestSummary {
    /// Creates a new summary with no dependencies, metadata or children.
    pub fn new(
        id: impl Into<SmolStr>,
        name: impl Into<String>,
        full_name: impl Into<String>,
        kind: impl Into<SmolStr>,
        is_test_case: bool,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            full_name: full_name.into(),
            kind: kind.into(),
            is_test_case,
            ..Default::default()
        }
    }

    /// Iterates over this test and all its descendants in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &TestSummary> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }
}
