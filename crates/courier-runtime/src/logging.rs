//! Logging setup built on `tracing-subscriber`.
//!
//! Every handled message runs inside a `handle_command` or `handle_event`
//! span. [`SpanEvents`] decides whether the opening and closing of those spans
//! is logged, and [`LoggingBuilder::dispatch_level`] sets the level of the
//! Courier crates apart from the rest of the application.
//!
//! [`CqrsEngineBuilder::from_config`](crate::CqrsEngineBuilder::from_config)
//! installs logging from the `[logging]` section:
//!
//! ```toml
//! [logging]
//! level = "warn"
//! dispatch_level = "debug"
//! span_events = { new = true, close = true }
//! ```
//!
//! Or explicitly:
//!
//! ```rust,ignore
//! LoggingBuilder::new()
//!     .dispatch_level(tracing::Level::DEBUG)
//!     .span_events(SpanEvents::DISPATCH)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

/// Crates whose level [`LoggingBuilder::dispatch_level`] sets.
pub const COURIER_TARGETS: [&str; 4] = [
    "courier_core",
    "courier_framework",
    "courier_runtime",
    "courier_transport",
];

const DEFAULT_LOG_FILE: &str = "courier.log";

/// Span lifecycle events to log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// One line when a message is picked up and one, with its busy and
    /// idle time, when it is acknowledged.
    pub const DISPATCH: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    /// Every enter and exit as well, including each poll of a handler.
    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .fold(FmtSpan::NONE, |span, (_, flag)| span | flag)
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self {
            new: config.new,
            enter: config.enter,
            exit: config.exit,
            close: config.close,
        }
    }
}

/// Installs logging from `config`.
///
/// Returns `false`, leaving the existing subscriber in place, if one is
/// already installed.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    LoggingBuilder::from_config(config).try_init().is_ok()
}

/// Builds and installs the global subscriber.
#[derive(Debug)]
pub struct LoggingBuilder {
    level: tracing::Level,
    dispatch_level: Option<tracing::Level>,
    directives: Vec<String>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    file_path: Option<PathBuf>,
    with_target: bool,
    with_thread_ids: bool,
    with_location: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    /// Compact lines on stdout at `info`, no span events.
    pub fn new() -> Self {
        Self {
            level: tracing::Level::INFO,
            dispatch_level: None,
            directives: Vec::new(),
            span_events: SpanEvents::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            with_target: true,
            with_thread_ids: false,
            with_location: false,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new()
            .with_level(config.level.to_tracing_level())
            .span_events(SpanEvents::from(&config.span_events))
            .format(config.format)
            .output(config.output)
            .with_thread_ids(config.thread_ids)
            .with_location(config.file_location);
        builder.dispatch_level = config.dispatch_level.map(|level| level.to_tracing_level());
        builder.file_path.clone_from(&config.file_path);

        // Sorted so later, more specific entries are stable across runs.
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort();
        for (target, level) in filters {
            builder = builder.directive(&format!("{target}={}", level.to_lowercase()));
        }
        builder
    }

    /// Level for everything without a more specific directive.
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// Level for the Courier crates only.
    pub fn dispatch_level(mut self, level: tracing::Level) -> Self {
        self.dispatch_level = Some(level);
        self
    }

    /// Adds a filter directive such as `courier_transport=trace`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Log file used with [`LogOutput::File`].
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    /// Include source file and line.
    pub fn with_location(mut self, enabled: bool) -> Self {
        self.with_location = enabled;
        self
    }

    /// Installs the subscriber, ignoring an already installed one.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.filter();
        let layer = self.layer();
        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
    }

    /// Directives in the order they are applied on top of the base level.
    fn all_directives(&self) -> Vec<String> {
        let dispatch = self.dispatch_level.into_iter().flat_map(|level| {
            let level = level.as_str().to_lowercase();
            COURIER_TARGETS
                .iter()
                .map(move |target| format!("{target}={level}"))
        });
        dispatch.chain(self.directives.iter().cloned()).collect()
    }

    fn filter(&self) -> EnvFilter {
        // RUST_LOG replaces the configured base level.
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()));

        for directive in self.all_directives() {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("Ignoring log directive '{directive}': {err}"),
            }
        }
        filter
    }

    fn writer(&self) -> BoxMakeWriter {
        match (self.output, &self.file_path) {
            (LogOutput::Stdout, _) => BoxMakeWriter::new(std::io::stdout),
            (LogOutput::Stderr, _) => BoxMakeWriter::new(std::io::stderr),
            (LogOutput::File, Some(path)) => BoxMakeWriter::new(tracing_appender::rolling::never(
                path.parent().unwrap_or_else(|| Path::new(".")),
                path.file_name()
                    .unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE)),
            )),
            (LogOutput::File, None) => {
                warn!("Log file output without a file path, writing to stdout");
                BoxMakeWriter::new(std::io::stdout)
            }
        }
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer()
            .with_writer(self.writer())
            .with_span_events(self.span_events.to_fmt_span())
            .with_target(self.with_target)
            .with_thread_ids(self.with_thread_ids)
            .with_file(self.with_location)
            .with_line_number(self.with_location);

        match self.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Full => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn dispatch_preset_logs_open_and_close() {
        assert_eq!(SpanEvents::NONE.to_fmt_span(), FmtSpan::NONE);
        assert_eq!(
            SpanEvents::DISPATCH.to_fmt_span(),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
        assert_eq!(SpanEvents::FULL.to_fmt_span(), FmtSpan::FULL);
    }

    #[test]
    fn dispatch_level_covers_every_courier_crate() {
        let builder = LoggingBuilder::new()
            .dispatch_level(tracing::Level::DEBUG)
            .directive("courier_transport=trace");

        assert_eq!(
            builder.all_directives(),
            vec![
                "courier_core=debug",
                "courier_framework=debug",
                "courier_runtime=debug",
                "courier_transport=debug",
                "courier_transport=trace",
            ]
        );
    }

    #[test]
    fn builder_reads_the_logging_section() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            dispatch_level: Some(LogLevel::Info),
            file_location: true,
            ..Default::default()
        };
        config
            .filters
            .insert("orders".to_string(), "DEBUG".to_string());
        config.span_events.close = true;

        let builder = LoggingBuilder::from_config(&config);

        assert_eq!(builder.level, tracing::Level::WARN);
        assert_eq!(builder.span_events.to_fmt_span(), FmtSpan::CLOSE);
        assert!(builder.with_location);
        assert_eq!(builder.all_directives().len(), COURIER_TARGETS.len() + 1);
        assert_eq!(builder.all_directives().last().map(String::as_str), Some("orders=debug"));
    }
}
