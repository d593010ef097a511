// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line parsing and command routing.

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, OutputWriter, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gallio_filtering::FilterSet;
use gallio_metadata::TestStatus;
use gallio_runner::{
    config::{GallioConfig, GallioProfile},
    list::{OutputFormat, SerializableFormat, TestList},
    project::TestProject,
    reporter::{ReporterBuilder, TestEventKind},
    errors::TestRunnerExecuteError,
    runner::TestRunnerBuilder,
    signal::SignalHandlerKind,
    tree::{
        CheckState, FilteredTreeModel, SortOrder, SortedTreeModel, TestStatusFilteredTreeModel,
        TestTreeModel, TestTreeNode, TreeGrouping, TreeModel, TreePath,
    },
};
use itertools::Itertools;
use owo_colors::{OwoColorize, Style};
use std::{collections::BTreeSet, io::Write, rc::Rc, time::Duration};
use tracing::{debug, info};

/// A test runner for test projects: trees of tests with metadata, dependencies and timeouts.
#[derive(Debug, Parser)]
#[command(
    name = "gallio",
    version,
    styles = clap_styles::style(),
    max_term_width = 100
)]
pub struct GallioApp {
    /// Path to the test project file [default: gallio-project.toml in the current directory]
    #[arg(long, global = true, value_name = "PATH", env = "GALLIO_PROJECT")]
    project: Option<Utf8PathBuf>,

    /// Config file [default: .config/gallio.toml next to the test project]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl GallioApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let base = BaseApp::new(self.project, self.config_file)?;
        match self.command {
            Command::List(opts) => base.exec_list(opts, output, output_writer),
            Command::Run(opts) => base.exec_run(opts, output, output_writer),
            Command::Tree(opts) => base.exec_tree(opts, output, output_writer),
            Command::ShowConfig(opts) => base.exec_show_config(opts, output, output_writer),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tests selected by a filter, in execution order
    List(ListOpts),

    /// Run the tests selected by a filter
    Run(RunOpts),

    /// Show the tests of the project as a tree
    Tree(TreeOpts),

    /// Show the settings of a profile
    ShowConfig(ShowConfigOpts),
}

#[derive(Debug, Args)]
struct FilterOpts {
    /// Filter expression [default: the project's default-filter]
    #[arg(long, short = 'E', value_name = "EXPR")]
    filter: Option<String>,
}

impl FilterOpts {
    fn build(&self, project: &TestProject) -> Result<FilterSet> {
        let input = match (&self.filter, project.default_filter()) {
            (Some(filter), _) => filter.as_str(),
            (None, Some(default_filter)) => {
                debug!("using default filter `{default_filter}`");
                default_filter
            }
            (None, None) => "",
        };
        Ok(FilterSet::parse(input)?)
    }
}

#[derive(Debug, Args)]
struct ProfileOpts {
    /// Config profile to use [default: the config's default-profile]
    #[arg(long, short = 'P', env = "GALLIO_PROFILE")]
    profile: Option<String>,
}

#[derive(Debug, Args)]
struct ListOpts {
    #[clap(flatten)]
    filter: FilterOpts,

    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FMT")]
    message_format: ListFormatOpt,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ListFormatOpt {
    /// A human-readable output format.
    #[default]
    Human,
    /// JSON with no whitespace.
    Json,
    /// JSON, prettified.
    JsonPretty,
}

impl ListFormatOpt {
    fn to_output_format(self, verbose: bool) -> OutputFormat {
        match self {
            Self::Human => OutputFormat::Human { verbose },
            Self::Json => OutputFormat::Serializable(SerializableFormat::Json),
            Self::JsonPretty => OutputFormat::Serializable(SerializableFormat::JsonPretty),
        }
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[clap(flatten)]
    filter: FilterOpts,

    #[clap(flatten)]
    profile: ProfileOpts,

    #[clap(flatten)]
    runner: RunnerOpts,

    /// Also write a JSON summary of the run to stdout
    #[arg(long, value_enum, default_value_t, value_name = "FMT")]
    message_format: RunFormatOpt,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum RunFormatOpt {
    /// Only report to stderr.
    #[default]
    Human,
    /// Report to stderr, and write the run summary as JSON to stdout.
    Json,
}

#[derive(Debug, Default, Args)]
struct RunnerOpts {
    /// Cancel the run after the first failure
    #[arg(long, overrides_with = "no_fail_fast")]
    fail_fast: bool,

    /// Run all tests regardless of failure
    #[arg(long, overrides_with = "fail_fast")]
    no_fail_fast: bool,

    /// Pass the output of process-backed tests through instead of capturing it
    #[arg(long)]
    no_capture: bool,

    /// Per-test-case timeout, overriding the profile ("0s" disables it)
    #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
    test_timeout: Option<Duration>,
}

impl RunnerOpts {
    fn to_builder(&self) -> TestRunnerBuilder {
        let mut builder = TestRunnerBuilder::default();
        builder.set_no_capture(self.no_capture);
        if self.fail_fast {
            builder.set_fail_fast(true);
        } else if self.no_fail_fast {
            builder.set_fail_fast(false);
        }
        if let Some(timeout) = self.test_timeout {
            builder.set_test_timeout((!timeout.is_zero()).then_some(timeout));
        }
        builder
    }
}

#[derive(Debug, Args)]
struct TreeOpts {
    #[clap(flatten)]
    filter: FilterOpts,

    #[clap(flatten)]
    profile: ProfileOpts,

    /// How siblings are ordered [default: the profile's tree.sort]
    #[arg(long, value_enum)]
    sort: Option<SortOpt>,

    /// Hide leaves with these statuses [default: the profile's tree.hide]
    #[arg(long, value_enum, value_delimiter = ',')]
    hide: Option<Vec<StatusOpt>>,

    /// Group tests by `namespace`, or by the values of a metadata key
    #[arg(long, default_value = "namespace", value_name = "KEY")]
    group_by: TreeGrouping,

    /// Run the selected tests first, and show their statuses
    #[arg(long)]
    run: bool,

    #[clap(flatten)]
    runner: RunnerOpts,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SortOpt {
    Asc,
    Desc,
    None,
}

impl From<SortOpt> for SortOrder {
    fn from(opt: SortOpt) -> Self {
        match opt {
            SortOpt::Asc => SortOrder::Ascending,
            SortOpt::Desc => SortOrder::Descending,
            SortOpt::None => SortOrder::None,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StatusOpt {
    Passed,
    Failed,
    Skipped,
    Inconclusive,
}

impl From<StatusOpt> for TestStatus {
    fn from(opt: StatusOpt) -> Self {
        match opt {
            StatusOpt::Passed => TestStatus::Passed,
            StatusOpt::Failed => TestStatus::Failed,
            StatusOpt::Skipped => TestStatus::Skipped,
            StatusOpt::Inconclusive => TestStatus::Inconclusive,
        }
    }
}

#[derive(Debug, Args)]
struct ShowConfigOpts {
    #[clap(flatten)]
    profile: ProfileOpts,
}

/// State shared by every command: the loaded project and config.
struct BaseApp {
    project: TestProject,
    config: GallioConfig,
}

impl BaseApp {
    fn new(project_path: Option<Utf8PathBuf>, config_file: Option<Utf8PathBuf>) -> Result<Self> {
        let current_dir = current_dir()?;
        let project_path = match project_path {
            Some(path) => current_dir.join(path),
            None => current_dir.join(TestProject::DEFAULT_FILE_NAME),
        };
        let project = TestProject::load(&project_path)?;

        let workspace_root = project_path
            .parent()
            .map_or_else(|| current_dir.clone(), Utf8Path::to_path_buf);
        let config_file = config_file.map(|path| current_dir.join(path));
        let config = GallioConfig::from_sources(workspace_root, config_file.as_deref())?;

        Ok(Self { project, config })
    }

    fn profile(&self, opts: &ProfileOpts) -> Result<GallioProfile<'_>> {
        let name = opts
            .profile
            .as_deref()
            .unwrap_or_else(|| self.config.default_profile_name());
        Ok(self.config.profile(name)?)
    }

    fn exec_list(
        &self,
        opts: ListOpts,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let filter = opts.filter.build(&self.project)?;
        let list = TestList::new(self.project.model(), &filter)?;

        let mut writer = output_writer.stdout_writer();
        list.write(
            opts.message_format.to_output_format(output.verbose),
            &mut writer,
            output.colorize_stdout(),
        )?;
        writer.flush().map_err(ExpectedError::write_output)?;
        Ok(0)
    }

    fn exec_run(
        &self,
        opts: RunOpts,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let filter = opts.filter.build(&self.project)?;
        let profile = self.profile(&opts.profile)?;
        let runner = opts.runner.to_builder().build(
            self.project.model(),
            &filter,
            &profile,
            SignalHandlerKind::Standard,
        )?;

        let mut summary_json = Vec::new();
        let stats = {
            let mut reporter = ReporterBuilder::default()
                .set_colorize(output.colorize_stderr())
                .set_verbose(output.verbose)
                .build(output_writer.reporter_output());
            let stats = runner
                .try_execute(|event| reporter.report_event(event))
                .map_err(execute_error)?;
            if matches!(opts.message_format, RunFormatOpt::Json) {
                reporter.write_summary_json(&mut summary_json)?;
            }
            stats
        };

        if !summary_json.is_empty() {
            let mut writer = output_writer.stdout_writer();
            writer
                .write_all(&summary_json)
                .and_then(|()| writer.flush())
                .map_err(ExpectedError::write_output)?;
        }

        if stats.initial_run_count == 0 {
            Err(ExpectedError::NoTestsRun)
        } else if !stats.is_success() {
            Err(ExpectedError::TestRunFailed)
        } else {
            Ok(0)
        }
    }

    fn exec_tree(
        &self,
        opts: TreeOpts,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let filter = opts.filter.build(&self.project)?;
        let profile = self.profile(&opts.profile)?;

        let tree = Rc::new(TestTreeModel::from_model(
            self.project.model(),
            &opts.group_by,
        ));
        tree.check_matching(&filter);

        if opts.run {
            let runner = opts.runner.to_builder().build(
                self.project.model(),
                &filter,
                &profile,
                SignalHandlerKind::Standard,
            )?;
            let mut reporter = ReporterBuilder::default()
                .set_colorize(output.colorize_stderr())
                .set_verbose(output.verbose)
                .build(output_writer.reporter_output());
            runner
                .try_execute(|event| {
                    if let TestEventKind::StepFinished { step, result } = &event.kind {
                        tree.apply_step_run(step, result);
                    }
                    reporter.report_event(event)
                })
                .map_err(execute_error)?;
        }

        let hidden: BTreeSet<TestStatus> = match &opts.hide {
            Some(hide) => hide.iter().map(|&status| status.into()).collect(),
            None => profile.tree_hide().clone(),
        };
        let sort = opts.sort.map_or_else(|| profile.tree_sort(), SortOrder::from);

        let mut view: Rc<dyn TreeModel> =
            Rc::new(TestStatusFilteredTreeModel::with_hidden(tree.clone(), hidden));
        view = Rc::new(SortedTreeModel::new(view, sort));
        if !filter.is_empty() {
            view = Rc::new(FilteredTreeModel::from_filter_set(view, filter));
        }

        let styles = TreeStyles::new(output.colorize_stdout());
        let mut lines = Vec::new();
        view.visit(&mut |path: &TreePath, node: &TestTreeNode| {
            // The root node stands for the whole project and isn't shown.
            if path.depth() > 1 {
                lines.push(tree_line(path, node, opts.run, &styles));
            }
        });

        let mut writer = output_writer.stdout_writer();
        let mut write = || -> std::io::Result<()> {
            if lines.is_empty() {
                writeln!(writer, "(no tests)")?;
            }
            for line in &lines {
                writeln!(writer, "{line}")?;
            }
            if opts.run {
                let counts = tree.counts();
                writeln!(
                    writer,
                    "{} passed, {} failed, {} skipped, {} inconclusive",
                    counts.passed.style(styles.pass),
                    counts.failed.style(styles.fail),
                    counts.skipped.style(styles.skip),
                    counts.inconclusive.style(styles.skip),
                )?;
            } else {
                let count = tree.test_count();
                writeln!(
                    writer,
                    "{} {} checked",
                    count.style(styles.count),
                    if count == 1 { "test" } else { "tests" },
                )?;
            }
            writer.flush()
        };
        write().map_err(ExpectedError::write_output)?;
        Ok(0)
    }

    fn exec_show_config(
        &self,
        opts: ShowConfigOpts,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let profile = self.profile(&opts.profile)?;
        let bold = if output.colorize_stdout() {
            Style::new().bold()
        } else {
            Style::new()
        };

        let timeout = match profile.test_timeout() {
            Some(timeout) => humantime::format_duration(timeout).to_string(),
            None => "none".to_owned(),
        };
        let behavior = profile.assertion_failure_behavior();
        let reap = profile.reap();
        let hide = profile.tree_hide().iter().map(|status| status.as_str()).join(", ");
        let profiles = self
            .config
            .all_profiles()
            .sorted()
            .map(|name| {
                if name == self.config.default_profile_name() {
                    format!("{name} (default)")
                } else {
                    name.to_owned()
                }
            })
            .join(", ");

        let mut writer = output_writer.stdout_writer();
        let mut write = || -> std::io::Result<()> {
            writeln!(writer, "profile: {}", profile.name().style(bold))?;
            writeln!(writer, "  test-timeout: {timeout}")?;
            writeln!(writer, "  fail-fast: {}", profile.fail_fast())?;
            writeln!(
                writer,
                "  assertion-failure-behavior: {}",
                behavior.name().unwrap_or("custom")
            )?;
            writeln!(
                writer,
                "  capture-process-output: {}",
                profile.capture_process_output()
            )?;
            writeln!(
                writer,
                "  leak-timeout: {}",
                humantime::format_duration(profile.leak_timeout())
            )?;
            writeln!(
                writer,
                "  reap: join-before-abort {}, join-after-abort {}",
                humantime::format_duration(reap.join_before_abort),
                humantime::format_duration(reap.join_after_abort),
            )?;
            writeln!(writer, "  tree.sort: {}", profile.tree_sort())?;
            writeln!(writer, "  tree.hide: [{hide}]")?;
            writeln!(writer, "available profiles: {profiles}")?;
            writer.flush()
        };
        write().map_err(ExpectedError::write_output)?;

        let model = self.project.model();
        let test_case_count = model
            .pre_order(model.root())
            .into_iter()
            .filter(|&index| model[index].is_test_case())
            .count();
        info!(
            "{test_case_count} test cases in {}",
            self.project.path()
        );
        Ok(0)
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
    Utf8PathBuf::try_from(dir)
        .map_err(|err| ExpectedError::current_dir_invalid_utf8(err.into_path_buf()))
}

fn execute_error<E: Into<ExpectedError>>(error: TestRunnerExecuteError<E>) -> ExpectedError {
    match error {
        TestRunnerExecuteError::Report(error) => error.into(),
        TestRunnerExecuteError::Fatal(error) => error.into(),
    }
}

#[derive(Debug, Default)]
struct TreeStyles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    container: Style,
}

impl TreeStyles {
    fn new(colorize: bool) -> Self {
        let mut styles = Self::default();
        if colorize {
            styles.count = Style::new().bold();
            styles.pass = Style::new().green().bold();
            styles.fail = Style::new().red().bold();
            styles.skip = Style::new().yellow().bold();
            styles.container = Style::new().bold();
        }
        styles
    }
}

fn tree_line(path: &TreePath, node: &TestTreeNode, show_status: bool, styles: &TreeStyles) -> String {
    let indent = "  ".repeat(path.depth() - 2);
    let check = match node.check_state() {
        CheckState::Checked => "[x]",
        CheckState::Unchecked => "[ ]",
        CheckState::Indeterminate => "[~]",
    };

    if !node.is_test() {
        return format!("{indent}{check} {}", node.text().style(styles.container));
    }
    if !show_status {
        return format!("{indent}{check} {}", node.text());
    }

    let status = node.status();
    let style = match status {
        TestStatus::Passed => styles.pass,
        TestStatus::Failed => styles.fail,
        TestStatus::Skipped | TestStatus::Inconclusive => styles.skip,
    };
    format!(
        "{indent}{check} {} ({})",
        node.text(),
        status.as_str().style(style)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Color;
    use camino_tempfile::Utf8TempDir;
    use gallio_metadata::GallioExitCode;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const PROJECT: &str = indoc! {r#"
        [[group]]
        name = "Math"

        [[group.test]]
        name = "add"
        command = ["true"]
        metadata = { Category = "fast" }

        [[group.test]]
        name = "divide"
        command = ["false"]
        metadata = { Category = "slow" }

        [[test]]
        name = "standalone"
        command = ["true"]
        metadata = { Category = "fast" }
    "#};

    const CONFIG: &str = indoc! {r#"
        [profile.ci]
        fail-fast = true
        test-timeout = "30s"

        [profile.ci.tree]
        sort = "desc"
        hide = ["passed"]
    "#};

    fn project_dir() -> Utf8TempDir {
        let dir = camino_tempfile::tempdir().expect("created temp dir");
        std::fs::write(dir.path().join(TestProject::DEFAULT_FILE_NAME), PROJECT)
            .expect("wrote project");
        std::fs::create_dir_all(dir.path().join(".config")).expect("created .config");
        std::fs::write(dir.path().join(GallioConfig::CONFIG_PATH), CONFIG).expect("wrote config");
        dir
    }

    struct Output {
        result: Result<i32>,
        stdout: String,
        stderr: String,
    }

    impl Output {
        fn exit_code(&self) -> i32 {
            match &self.result {
                Ok(code) => *code,
                Err(error) => error.process_exit_code(),
            }
        }
    }

    fn exec(dir: &Utf8TempDir, args: &[&str]) -> Output {
        let project = dir.path().join(TestProject::DEFAULT_FILE_NAME);
        let mut argv = vec!["gallio", "--project", project.as_str()];
        argv.extend_from_slice(args);
        let app = GallioApp::try_parse_from(argv).expect("arguments parsed");

        let output = OutputContext {
            verbose: false,
            color: Color::Never,
        };
        let mut writer = OutputWriter::Test {
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        let result = app.exec(output, &mut writer);
        let OutputWriter::Test { stdout, stderr } = writer else {
            unreachable!("test writer");
        };
        Output {
            result,
            stdout: String::from_utf8(stdout).expect("stdout is UTF-8"),
            stderr: String::from_utf8(stderr).expect("stderr is UTF-8"),
        }
    }

    #[test]
    fn list_human() {
        let dir = project_dir();
        let output = exec(&dir, &["list", "-E", "Category: fast"]);
        assert_eq!(output.exit_code(), 0);
        assert_eq!(output.stdout, "Math/add\nstandalone\n");
    }

    #[test]
    fn list_json() {
        let dir = project_dir();
        let output = exec(&dir, &["list", "--message-format", "json"]);
        assert_eq!(output.exit_code(), 0);
        assert!(output.stdout.starts_with('{'), "stdout: {}", output.stdout);
        assert!(output.stdout.contains("Math/divide"), "stdout: {}", output.stdout);
    }

    #[test]
    fn invalid_filter() {
        let dir = project_dir();
        let output = exec(&dir, &["list", "-E", "(Name: add"]);
        assert_eq!(output.exit_code(), GallioExitCode::INVALID_FILTER);
    }

    #[test]
    fn missing_project() {
        let dir = camino_tempfile::tempdir().expect("created temp dir");
        let output = exec(&dir, &["list"]);
        assert_eq!(output.exit_code(), GallioExitCode::PROJECT_LOAD_FAILED);
    }

    #[test]
    fn unknown_profile() {
        let dir = project_dir();
        let output = exec(&dir, &["show-config", "--profile", "nightly"]);
        assert_eq!(output.exit_code(), GallioExitCode::SETUP_ERROR);
    }

    #[test]
    fn show_config() {
        let dir = project_dir();
        let output = exec(&dir, &["show-config", "--profile", "ci"]);
        assert_eq!(output.exit_code(), 0);
        assert_eq!(
            output.stdout,
            indoc! {"
                profile: ci
                  test-timeout: 30s
                  fail-fast: true
                  assertion-failure-behavior: log-and-throw
                  capture-process-output: true
                  leak-timeout: 100ms
                  reap: join-before-abort 3s, join-after-abort 2s
                  tree.sort: desc
                  tree.hide: [passed]
                available profiles: ci, default (default)
            "}
        );
    }

    #[test]
    fn tree_without_run() {
        let dir = project_dir();
        let output = exec(&dir, &["tree", "-E", "Name: add"]);
        assert_eq!(output.exit_code(), 0);
        assert_eq!(
            output.stdout,
            indoc! {"
                [~] Math
                  [x] add
                1 test checked
            "}
        );
    }

    #[cfg(unix)]
    #[test]
    fn run_passing_tests() {
        let dir = project_dir();
        let output = exec(&dir, &["run", "-E", "Category: fast"]);
        assert_eq!(output.exit_code(), 0);
        assert!(output.stdout.is_empty());
        assert!(output.stderr.contains("PASS"), "stderr: {}", output.stderr);
    }

    #[cfg(unix)]
    #[test]
    fn run_failing_tests() {
        let dir = project_dir();
        let output = exec(&dir, &["run", "--message-format", "json"]);
        assert_eq!(output.exit_code(), GallioExitCode::TEST_RUN_FAILED);
        assert!(output.stdout.contains("\"failed\": 1"), "stdout: {}", output.stdout);
    }

    #[test]
    fn run_nothing() {
        let dir = project_dir();
        let output = exec(&dir, &["run", "-E", "Name: nonexistent"]);
        assert_eq!(output.exit_code(), GallioExitCode::NO_TESTS_RUN);
    }

    #[cfg(unix)]
    #[test]
    fn tree_with_run() {
        let dir = project_dir();
        let output = exec(
            &dir,
            &["tree", "--run", "--profile", "ci", "--no-fail-fast", "--hide", "skipped"],
        );
        assert_eq!(output.exit_code(), 0);
        // The ci profile sorts descending and hides passed leaves; --hide overrides that.
        assert_eq!(
            output.stdout,
            indoc! {"
                [x] standalone (passed)
                [x] Math
                  [x] divide (failed)
                  [x] add (passed)
                2 passed, 1 failed, 0 skipped, 0 inconclusive
            "}
        );
    }
}
