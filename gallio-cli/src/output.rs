// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{Args, ValueEnum};
use gallio_runner::reporter::ReporterStderr;
use miette::{GraphicalTheme, MietteHandlerOpts, ThemeStyles};
use owo_colors::{OwoColorize, Style, style};
use std::{
    fmt,
    io::{self, BufWriter, Write},
    sync::Once,
};
use tracing::{Event, Level, Subscriber, level_filters::LevelFilter};
use tracing_subscriber::{
    Layer,
    filter::Targets,
    fmt::{FmtContext, FormatEvent, FormatFields, format},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Log target for messages printed without a level prefix.
pub(crate) const NO_HEADING: &str = "gallio::no_heading";

/// Environment variable holding the log filter, in `tracing_subscriber::filter::Targets` syntax.
const LOG_ENV: &str = "GALLIO_LOG";

pub(crate) mod clap_styles {
    use clap::builder::{
        Styles,
        styling::{AnsiColor, Effects},
    };

    pub(crate) const fn style() -> Styles {
        let heading = AnsiColor::Green.on_default().effects(Effects::BOLD);
        let literal = AnsiColor::Cyan.on_default().effects(Effects::BOLD);
        Styles::styled()
            .header(heading)
            .usage(heading)
            .literal(literal)
            .placeholder(AnsiColor::Cyan.on_default())
            .error(AnsiColor::Red.on_default().effects(Effects::BOLD))
            .valid(literal)
            .invalid(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    }
}

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true, env = "GALLIO_VERBOSE")]
    verbose: bool,

    /// When to use colors: auto, always or never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "GALLIO_COLOR"
    )]
    color: Color,
}

impl OutputOpts {
    /// Sets up logging and error reporting, and returns the resolved output settings.
    pub(crate) fn init(self) -> OutputContext {
        let context = OutputContext {
            verbose: self.verbose,
            color: self.color,
        };
        let colorize = context.colorize_stderr();

        static INIT: Once = Once::new();
        INIT.call_once(|| {
            init_logger(colorize);
            install_miette_hook(colorize);
        });

        context
    }
}

/// Output settings resolved from the command line.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) verbose: bool,
    pub(crate) color: Color,
}

impl OutputContext {
    /// Styles for errors printed to stderr.
    pub fn stderr_styles(&self) -> StderrStyles {
        if self.colorize_stderr() {
            StderrStyles {
                bold: style().bold(),
                warning_text: style().yellow(),
            }
        } else {
            StderrStyles::default()
        }
    }

    pub(crate) fn colorize_stdout(&self) -> bool {
        self.color.should_colorize(supports_color::Stream::Stdout)
    }

    pub(crate) fn colorize_stderr(&self) -> bool {
        self.color.should_colorize(supports_color::Stream::Stderr)
    }
}

/// When to produce colored output.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
#[must_use]
pub enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

impl Color {
    fn should_colorize(self, stream: supports_color::Stream) -> bool {
        match self {
            Self::Auto => supports_color::on_cached(stream).is_some(),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

fn init_logger(colorize: bool) {
    let value = std::env::var(LOG_ENV).unwrap_or_default();
    let default_targets = || Targets::new().with_default(LevelFilter::INFO);
    let (targets, invalid) = match value.parse::<Targets>() {
        _ if value.is_empty() => (default_targets(), None),
        Ok(targets) => (targets, None),
        Err(error) => (default_targets(), Some(error)),
    };

    let layer = tracing_subscriber::fmt::layer()
        .event_format(LevelPrefixFormatter { colorize })
        .with_writer(io::stderr)
        .with_filter(targets);

    // In tests, a subscriber may already be installed.
    let _ = tracing_subscriber::registry().with(layer).try_init();

    if let Some(error) = invalid {
        tracing::warn!("ignoring invalid {LOG_ENV} value `{value}`: {error}");
    }
}

fn install_miette_hook(colorize: bool) {
    let _ = miette::set_hook(Box::new(move |_| {
        let mut theme = if supports_unicode::on(supports_unicode::Stream::Stderr) {
            GraphicalTheme::unicode()
        } else {
            GraphicalTheme::ascii()
        };
        theme.characters.error = "error:".into();
        theme.styles = if colorize {
            ThemeStyles {
                error: style().red().bold(),
                warning: style().yellow().bold(),
                advice: style().bright_cyan().bold(),
                help: style().cyan(),
                link: style().cyan().underline().bold(),
                linum: style().dimmed(),
                highlights: vec![style().red(), style().yellow(), style().bright_cyan()],
            }
        } else {
            ThemeStyles::none()
        };
        Box::new(MietteHandlerOpts::new().graphical_theme(theme).build())
    }));
}

/// Formats events as `level: message`, or just `message` for the [`NO_HEADING`] target.
struct LevelPrefixFormatter {
    colorize: bool,
}

impl LevelPrefixFormatter {
    fn level_prefix(&self, level: Level) -> (&'static str, Style) {
        let (label, colored) = match level {
            Level::ERROR => ("error", style().red().bold()),
            Level::WARN => ("warning", style().yellow().bold()),
            Level::INFO => ("info", style().bold()),
            Level::DEBUG => ("debug", style().bold()),
            Level::TRACE => ("trace", style().dimmed()),
        };
        (label, if self.colorize { colored } else { Style::new() })
    }
}

impl<S, N> FormatEvent<S, N> for LevelPrefixFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        if metadata.target() != NO_HEADING {
            let (label, style) = self.level_prefix(*metadata.level());
            write!(writer, "{}: ", label.style(style))?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Styles for messages printed to stderr.
#[derive(Debug, Default)]
pub struct StderrStyles {
    pub(crate) bold: Style,
    pub(crate) warning_text: Style,
}

/// Where command output goes.
///
/// The `Test` variant, available in unit tests, captures stdout and stderr into buffers.
#[derive(Default)]
pub enum OutputWriter {
    /// Write to the process's stdout and stderr.
    #[default]
    Normal,
    /// Capture output.
    #[cfg(test)]
    Test {
        /// Captured stdout.
        stdout: Vec<u8>,
        /// Captured stderr.
        stderr: Vec<u8>,
    },
}

impl OutputWriter {
    pub(crate) fn stdout_writer(&mut self) -> Box<dyn Write + '_> {
        match self {
            Self::Normal => Box::new(BufWriter::new(io::stdout())),
            #[cfg(test)]
            Self::Test { stdout, .. } => Box::new(stdout),
        }
    }

    pub(crate) fn reporter_output(&mut self) -> ReporterStderr<'_> {
        match self {
            Self::Normal => ReporterStderr::Terminal,
            #[cfg(test)]
            Self::Test { stderr, .. } => ReporterStderr::Buffer(stderr),
        }
    }
}
