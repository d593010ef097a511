// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test projects: TOML files describing a tree of tests that run external commands.
//!
//! ```toml
//! default-filter = "exclude Category: slow"
//!
//! [[group]]
//! name = "Smoke"
//! metadata = { Category = "fast" }
//!
//! [[group.test]]
//! name = "version"
//! command = ["my-tool", "--version"]
//!
//! [[group.test]]
//! name = "config"
//! command = ["my-tool", "check-config"]
//! env = { MY_TOOL_LOG = "debug" }
//! depends-on = ["Smoke/version"]
//! timeout = "30s"
//! ```
//!
//! Groups may contain further `[[group.group]]` tables. Working directories are relative to the
//! directory containing the project file, which is also the default.

use crate::{
    errors::{ProjectLoadError, ProjectLoadErrorKind},
    model::{CommandSpec, Test, TestBody, TestIndex, TestModel, kinds},
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{collections::BTreeMap, time::Duration};
use tracing::warn;

/// A loaded test project.
#[derive(Clone, Debug)]
pub struct TestProject {
    path: Utf8PathBuf,
    model: TestModel,
    default_filter: Option<String>,
}

impl TestProject {
    /// The file name looked up when no project is given on the command line.
    pub const DEFAULT_FILE_NAME: &'static str = "gallio-project.toml";

    /// Reads and loads a project file.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ProjectLoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|error| ProjectLoadError::new(path, ProjectLoadErrorKind::Read(error)))?;
        Self::from_toml(path, &contents)
    }

    /// Loads a project from TOML contents. `path` is used to resolve working directories and in
    /// error messages.
    pub fn from_toml(path: impl AsRef<Utf8Path>, contents: &str) -> Result<Self, ProjectLoadError> {
        let path = path.as_ref();
        let error = |kind| ProjectLoadError::new(path, kind);

        let deserializer = toml::de::Deserializer::parse(contents)
            .map_err(|e| error(ProjectLoadErrorKind::Parse(e)))?;
        let mut unknown = Vec::new();
        let file: ProjectFile = serde_ignored::deserialize(deserializer, |key| {
            unknown.push(key.to_string());
        })
        .map_err(|e| error(ProjectLoadErrorKind::Parse(e)))?;
        for key in unknown {
            warn!("ignoring unknown key `{key}` in test project `{path}`");
        }

        let base_dir = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_owned(),
            _ => Utf8PathBuf::from("."),
        };
        let mut builder = ModelBuilder {
            model: TestModel::new(),
            base_dir,
            dependencies: Vec::new(),
        };
        let root = builder.model.root();
        builder.add_entries(root, &file.groups, &file.tests).map_err(error)?;
        builder.resolve_dependencies().map_err(error)?;

        Ok(Self {
            path: path.to_owned(),
            model: builder.model,
            default_filter: file.default_filter,
        })
    }

    /// The path the project was loaded from.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// The tests in the project.
    pub fn model(&self) -> &TestModel {
        &self.model
    }

    /// Consumes the project, returning its tests.
    pub fn into_model(self) -> TestModel {
        self.model
    }

    /// The filter expression used when none is given on the command line.
    pub fn default_filter(&self) -> Option<&str> {
        self.default_filter.as_deref()
    }
}

struct ModelBuilder {
    model: TestModel,
    base_dir: Utf8PathBuf,
    // (test, full names of its dependencies)
    dependencies: Vec<(TestIndex, Vec<String>)>,
}

impl ModelBuilder {
    fn add_entries(
        &mut self,
        parent: TestIndex,
        groups: &[GroupDef],
        tests: &[TestDef],
    ) -> Result<(), ProjectLoadErrorKind> {
        for group in groups {
            let mut test = Test::new(&group.name, group.kind.as_deref().unwrap_or(kinds::GROUP));
            if let Some(order) = group.order {
                test = test.with_order(order);
            }
            add_metadata(&mut test, &group.metadata);
            let index = self
                .model
                .add_test(parent, test)
                .map_err(ProjectLoadErrorKind::Model)?;
            self.record_dependencies(index, &group.depends_on);
            self.add_entries(index, &group.groups, &group.tests)?;
        }

        for def in tests {
            let full_name = child_full_name(&self.model[parent], &def.name);
            let mut command = CommandSpec::from_argv(&def.command).ok_or_else(|| {
                ProjectLoadErrorKind::EmptyCommand {
                    test: full_name.clone(),
                }
            })?;
            command.cwd = Some(match &def.cwd {
                Some(cwd) => self.base_dir.join(cwd),
                None => self.base_dir.clone(),
            });
            command.env = def.env.clone();

            let mut test = Test::new(&def.name, def.kind.as_deref().unwrap_or(kinds::TEST))
                .with_test_case(true)
                .with_body(TestBody::Command(command));
            if let Some(timeout) = def.timeout {
                test = test.with_timeout(timeout);
            }
            if let Some(order) = def.order {
                test = test.with_order(order);
            }
            add_metadata(&mut test, &def.metadata);
            let index = self
                .model
                .add_test(parent, test)
                .map_err(ProjectLoadErrorKind::Model)?;
            self.record_dependencies(index, &def.depends_on);
        }
        Ok(())
    }

    fn record_dependencies(&mut self, index: TestIndex, depends_on: &[String]) {
        if !depends_on.is_empty() {
            self.dependencies.push((index, depends_on.to_vec()));
        }
    }

    fn resolve_dependencies(&mut self) -> Result<(), ProjectLoadErrorKind> {
        for (index, names) in std::mem::take(&mut self.dependencies) {
            for name in names {
                let dependency = self.model.find_by_full_name(&name).ok_or_else(|| {
                    ProjectLoadErrorKind::UnknownDependency {
                        test: self.model[index].full_name().to_owned(),
                        dependency: name.clone(),
                    }
                })?;
                self.model.add_dependency(index, dependency);
            }
        }
        Ok(())
    }
}

fn child_full_name(parent: &Test, name: &str) -> String {
    if parent.full_name().is_empty() {
        name.to_owned()
    } else {
        format!("{}/{name}", parent.full_name())
    }
}

fn add_metadata(test: &mut Test, metadata: &BTreeMap<String, MetadataValues>) {
    for (key, values) in metadata {
        match values {
            MetadataValues::One(value) => test.metadata_mut().add(key.as_str(), value.as_str()),
            MetadataValues::Many(values) => {
                for value in values {
                    test.metadata_mut().add(key.as_str(), value.as_str());
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProjectFile {
    #[serde(default)]
    default_filter: Option<String>,
    #[serde(default, rename = "group")]
    groups: Vec<GroupDef>,
    #[serde(default, rename = "test")]
    tests: Vec<TestDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct GroupDef {
    name: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    order: Option<i32>,
    #[serde(default)]
    metadata: BTreeMap<String, MetadataValues>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default, rename = "group")]
    groups: Vec<GroupDef>,
    #[serde(default, rename = "test")]
    tests: Vec<TestDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TestDef {
    name: String,
    command: Vec<String>,
    #[serde(default)]
    cwd: Option<Utf8PathBuf>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    order: Option<i32>,
    #[serde(default)]
    metadata: BTreeMap<String, MetadataValues>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetadataValues {
    One(String),
    Many(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::keys;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const PROJECT: &str = indoc! {r#"
        default-filter = "exclude Category: slow"

        [[group]]
        name = "Smoke"
        metadata = { Category = "fast", Owner = ["ana", "kim"] }

        [[group.test]]
        name = "version"
        command = ["tool", "--version"]

        [[group.test]]
        name = "config"
        command = ["tool", "check"]
        cwd = "fixtures"
        env = { TOOL_LOG = "debug" }
        depends-on = ["Smoke/version"]
        timeout = "30s"

        [[group.group]]
        name = "Nested"
        kind = "suite"

        [[group.group.test]]
        name = "deep"
        command = ["true"]
        metadata = { IgnoreReason = "flaky" }

        [[test]]
        name = "top"
        command = ["false"]
        order = -1
    "#};

    #[test]
    fn load_project() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join(TestProject::DEFAULT_FILE_NAME);
        std::fs::write(&path, PROJECT).unwrap();

        let project = TestProject::load(&path).unwrap();
        assert_eq!(project.path(), path.as_path());
        assert_eq!(project.default_filter(), Some("exclude Category: slow"));

        let model = project.model();
        let smoke = model.find_by_full_name("Smoke").unwrap();
        assert_eq!(model[smoke].kind(), kinds::GROUP);
        assert_eq!(model[smoke].metadata().get_all("Owner"), ["ana", "kim"]);
        assert_eq!(model[smoke].metadata().get_value(keys::CATEGORY), Some("fast"));

        let version = model.find_by_full_name("Smoke/version").unwrap();
        let config = model.find_by_full_name("Smoke/config").unwrap();
        assert!(model[config].is_test_case());
        assert_eq!(model[config].dependencies(), [version]);
        assert_eq!(model[config].timeout(), Some(Duration::from_secs(30)));
        let Some(TestBody::Command(command)) = model[config].body() else {
            panic!("expected a command body");
        };
        assert_eq!(command.program, "tool");
        assert_eq!(command.args, ["check"]);
        assert_eq!(command.cwd.as_deref(), Some(dir.path().join("fixtures").as_path()));
        assert_eq!(command.env.get("TOOL_LOG").map(String::as_str), Some("debug"));

        let Some(TestBody::Command(command)) = model[version].body() else {
            panic!("expected a command body");
        };
        assert_eq!(command.cwd.as_deref(), Some(dir.path()));

        let deep = model.find_by_full_name("Smoke/Nested/deep").unwrap();
        assert_eq!(model[deep].metadata().get_value(keys::IGNORE_REASON), Some("flaky"));
        let nested = model.find_by_full_name("Smoke/Nested").unwrap();
        assert_eq!(model[nested].kind(), "suite");

        let top = model.find_by_full_name("top").unwrap();
        assert_eq!(model[top].order(), -1);
        assert_eq!(model.test_case_count(), 4);
    }

    #[test]
    fn missing_file() {
        let dir = Utf8TempDir::new().unwrap();
        let err = TestProject::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err.kind(), ProjectLoadErrorKind::Read(_)));
    }

    #[test]
    fn empty_command() {
        let input = indoc! {r#"
            [[group]]
            name = "G"

            [[group.test]]
            name = "t"
            command = []
        "#};
        let err = TestProject::from_toml("p.toml", input).unwrap_err();
        assert_eq!(err.kind().to_string(), "test `G/t` has an empty command");
    }

    #[test]
    fn unknown_dependency() {
        let input = indoc! {r#"
            [[test]]
            name = "a"
            command = ["true"]
            depends-on = ["b"]
        "#};
        let err = TestProject::from_toml("p.toml", input).unwrap_err();
        assert_eq!(
            err.kind().to_string(),
            "test `a` depends on unknown test `b`"
        );
        assert_eq!(err.path().as_str(), "p.toml");
    }

    #[test]
    fn invalid_toml() {
        let err = TestProject::from_toml("p.toml", "[[test]]\nname = 1\n").unwrap_err();
        assert!(matches!(err.kind(), ProjectLoadErrorKind::Parse(_)));
        assert_eq!(err.to_string(), "failed to load test project at `p.toml`");
    }
}
