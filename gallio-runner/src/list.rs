// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Listing the tests a filter selects, without running them.

use crate::{
    errors::{TestPlanError, WriteTestListError},
    helpers::plural,
    model::{PlanNode, Test, TestModel, TestPlan},
};
use gallio_filtering::FilterSet;
use gallio_metadata::{TestListSummary, TestSummary};
use owo_colors::{OwoColorize, Style};
use serde::Serialize;
use std::io::{self, Write};

/// Output formats for test lists.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum OutputFormat {
    /// A human-readable output format.
    Human {
        /// Whether to produce verbose output.
        verbose: bool,
    },

    /// Machine-readable output format.
    Serializable(SerializableFormat),
}

/// A serialized, machine-readable output format.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SerializableFormat {
    /// JSON with no whitespace.
    Json,
    /// JSON, prettified.
    JsonPretty,
}

impl SerializableFormat {
    /// Write this data in the given format to the writer.
    pub fn to_writer(
        self,
        value: &impl Serialize,
        writer: impl io::Write,
    ) -> serde_json::Result<()> {
        match self {
            SerializableFormat::Json => serde_json::to_writer(writer, value),
            SerializableFormat::JsonPretty => serde_json::to_writer_pretty(writer, value),
        }
    }
}

/// The tests in a model selected by a filter, in execution order.
#[derive(Debug)]
pub struct TestList<'a> {
    model: &'a TestModel,
    plan: TestPlan,
}

impl<'a> TestList<'a> {
    /// Selects the tests in `model` that `filter` matches.
    pub fn new(model: &'a TestModel, filter: &FilterSet) -> Result<Self, TestPlanError> {
        let plan = TestPlan::build(model, filter)?;
        Ok(Self::from_plan(model, plan))
    }

    /// Lists the tests in an existing plan.
    pub fn from_plan(model: &'a TestModel, plan: TestPlan) -> Self {
        Self { model, plan }
    }

    /// The plan the list is built from.
    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    /// The number of selected test cases.
    pub fn test_count(&self) -> usize {
        self.plan.test_case_count()
    }

    /// Iterates over the selected test cases in execution order.
    pub fn iter_test_cases(&self) -> impl Iterator<Item = &'a Test> + '_ {
        let model = self.model;
        self.plan
            .iter()
            .map(move |node| &model[node.test])
            .filter(|test| test.is_test_case())
    }

    /// Converts the list to its machine-readable form.
    pub fn to_summary(&self) -> TestListSummary {
        let roots = self
            .plan
            .root()
            .map(|root| root.children.iter().map(|node| self.summarize(node)).collect())
            .unwrap_or_default();
        TestListSummary::new(roots)
    }

    /// Outputs this list to the given writer.
    pub fn write(
        &self,
        output_format: OutputFormat,
        writer: impl Write,
        colorize: bool,
    ) -> Result<(), WriteTestListError> {
        match output_format {
            OutputFormat::Human { verbose } => self
                .write_human(writer, verbose, colorize)
                .map_err(WriteTestListError::Io),
            OutputFormat::Serializable(format) => format
                .to_writer(&self.to_summary(), writer)
                .map_err(WriteTestListError::Json),
        }
    }

    /// Outputs this list as a string with the given format.
    pub fn to_string(&self, output_format: OutputFormat) -> Result<String, WriteTestListError> {
        let mut buf = Vec::with_capacity(1024);
        self.write(output_format, &mut buf, false)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn summarize(&self, node: &PlanNode) -> TestSummary {
        let test = &self.model[node.test];
        let mut summary = TestSummary::new(
            test.id().as_str(),
            test.name(),
            test.full_name(),
            test.kind(),
            test.is_test_case(),
        );
        summary.dependencies = test
            .dependencies()
            .iter()
            .map(|&dep| self.model[dep].full_name().to_owned())
            .collect();
        summary.metadata = test.metadata().to_summary();
        summary.children = node
            .children
            .iter()
            .map(|child| self.summarize(child))
            .collect();
        summary
    }

    fn write_human(&self, mut writer: impl Write, verbose: bool, colorize: bool) -> io::Result<()> {
        let mut styles = Styles::default();
        if colorize {
            styles.colorize();
        }

        let Some(root) = self.plan.root().filter(|root| !root.children.is_empty()) else {
            return writeln!(writer, "(no tests)");
        };

        if verbose {
            for child in &root.children {
                self.write_node(child, 0, &styles, &mut writer)?;
            }
            let count = self.test_count();
            writeln!(
                writer,
                "{} {} selected",
                count.style(styles.count),
                plural::tests_str(count),
            )?;
        } else {
            for test in self.iter_test_cases() {
                write_full_name(test.full_name(), &styles, &mut writer)?;
                writeln!(writer)?;
            }
        }
        Ok(())
    }

    fn write_node(
        &self,
        node: &PlanNode,
        depth: usize,
        styles: &Styles,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let test = &self.model[node.test];
        let indent = "  ".repeat(depth);
        let name_style = if test.is_test_case() {
            styles.test_name
        } else {
            styles.container
        };
        writeln!(
            writer,
            "{indent}{} {}",
            test.name().style(name_style),
            format!("({})", test.kind()).style(styles.field),
        )?;

        for (key, values) in test.metadata().iter() {
            writeln!(
                writer,
                "{indent}    {} {}",
                format!("{key}:").style(styles.field),
                values.join(", "),
            )?;
        }
        if !test.dependencies().is_empty() {
            let names: Vec<_> = test
                .dependencies()
                .iter()
                .map(|&dep| self.model[dep].full_name())
                .collect();
            writeln!(
                writer,
                "{indent}    {} {}",
                "depends on:".style(styles.field),
                names.join(", "),
            )?;
        }

        for child in &node.children {
            self.write_node(child, depth + 1, styles, writer)?;
        }
        Ok(())
    }
}

fn write_full_name(full_name: &str, styles: &Styles, writer: &mut dyn Write) -> io::Result<()> {
    match full_name.rsplit_once('/') {
        Some((prefix, name)) => write!(
            writer,
            "{}{}",
            format!("{prefix}/").style(styles.container),
            name.style(styles.test_name),
        ),
        None => write!(writer, "{}", full_name.style(styles.test_name)),
    }
}

#[derive(Clone, Debug, Default)]
struct Styles {
    count: Style,
    container: Style,
    test_name: Style,
    field: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.container = Style::new().cyan();
        self.test_name = Style::new().blue().bold();
        self.field = Style::new().yellow().bold();
    }
}
