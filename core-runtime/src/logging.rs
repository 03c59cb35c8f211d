//! # Importer Logging
//!
//! Installs the global `tracing` subscriber for an importer process.
//!
//! Every workspace crate logs through `tracing`; the pipeline opens one span
//! per phase (`#[instrument]` on the phase functions), so events carry the
//! phase they were emitted in. [`init_logging`] wires three things:
//!
//! - an [`EnvFilter`]: `config.filter` if set, else `PANELSYNC_LOG`, else the
//!   workspace crates at `config.level` with `sqlx` held at `warn`
//! - a `fmt` layer in the configured [`LogFormat`]
//! - a [`LoggerSinkLayer`] mirroring events into a host [`LoggerSink`]
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default().with_format(LogFormat::Compact))?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::logging::{LogEntry, LogLevel, LoggerSink};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Environment variable read when no explicit filter is configured
pub const LOG_ENV: &str = "PANELSYNC_LOG";

const WORKSPACE_TARGETS: &[&str] = &[
    "panelsync",
    "core_runtime",
    "core_library",
    "core_metadata",
    "core_sync",
    "bridge_desktop",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event, fields flattened
    Json,
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for workspace crates when no filter is given
    pub level: LogLevel,
    /// `EnvFilter` directives, e.g. `core_sync=trace,sqlx=info`
    pub filter: Option<String>,
    pub sink: Option<Arc<dyn LoggerSink>>,
    /// Log a line with timing when each phase span closes
    pub phase_timings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            sink: None,
            phase_timings: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("sink", &self.sink.is_some())
            .field("phase_timings", &self.phase_timings)
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_phase_timings(mut self, enabled: bool) -> Self {
        self.phase_timings = enabled;
        self
    }

    /// Directives used when neither `filter` nor `PANELSYNC_LOG` is set
    pub fn default_directives(&self) -> String {
        let level = self.level.as_str();
        WORKSPACE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level))
            .chain(std::iter::once("sqlx=warn".to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match (&config.filter, std::env::var(LOG_ENV)) {
        (Some(filter), _) => filter.clone(),
        (None, Ok(from_env)) if !from_env.trim().is_empty() => from_env,
        _ => config.default_directives(),
    };
    EnvFilter::try_new(&directives)
        .map_err(|err| Error::Config(format!("Invalid log filter {:?}: {}", directives, err)))
}

/// Install the global subscriber
///
/// Returns `Ok(false)` without changing anything when the process already
/// has a global subscriber, so a host that sets up its own keeps it.
///
/// # Errors
///
/// Returns [`Error::Config`] if the filter directives do not parse.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = build_filter(config)?;
    let spans = if config.phase_timings {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let output = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(spans)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_span_events(spans)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(spans)
            .boxed(),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .with(LoggerSinkLayer::new(config.sink.clone()))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(format = ?config.format, "Logging initialized");
    }
    Ok(installed)
}

/// Mirrors events into a [`LoggerSink`]
pub struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    pub fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = &self.sink else {
            return;
        };
        let metadata = event.metadata();
        let level = log_level(metadata.level());
        if level < sink.min_level() {
            return;
        }

        let mut entry = LogEntry::new(level, metadata.target(), "");
        event.record(&mut EntryVisitor(&mut entry));
        if entry.message.is_empty() {
            entry.message = metadata.name().to_string();
        }
        entry.span = ctx.event_span(event).map(|span| span.name().to_string());

        let sink = Arc::clone(sink);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = sink.log(entry).await {
                        eprintln!("log sink failed: {}", err);
                    }
                });
            }
            Err(_) => {
                if let Err(err) = futures::executor::block_on(sink.log(entry)) {
                    eprintln!("log sink failed: {}", err);
                }
            }
        }
    }
}

struct EntryVisitor<'a>(&'a mut LogEntry);

impl EntryVisitor<'_> {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.0.message = value;
        } else {
            self.0.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EntryVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

fn log_level(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        entries: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl LoggerSink for CollectingSink {
        async fn log(&self, entry: LogEntry) -> bridge_traits::error::Result<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    #[test]
    fn test_default_directives_cover_workspace() {
        let directives = LoggingConfig::default()
            .with_level(LogLevel::Debug)
            .default_directives();
        assert!(directives.contains("core_sync=debug"));
        assert!(directives.contains("panelsync=debug"));
        assert!(directives.ends_with("sqlx=warn"));
    }

    #[test]
    fn test_explicit_filter_wins() {
        let config = LoggingConfig::default().with_filter("core_sync::writer=trace");
        let filter = build_filter(&config).unwrap();
        assert_eq!(filter.to_string(), "core_sync::writer=trace");
    }

    #[test]
    fn test_bad_filter_is_config_error() {
        let config = LoggingConfig::default().with_filter("core_sync=[");
        assert!(matches!(build_filter(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_sink_gets_message_fields_and_phase() {
        let sink = Arc::new(CollectingSink::default());
        let subscriber =
            tracing_subscriber::registry().with(LoggerSinkLayer::new(Some(sink.clone())));
        let _guard = tracing::subscriber::set_default(subscriber);

        let phase = tracing::info_span!("write_comics");
        phase.in_scope(|| {
            tracing::warn!(target: "core_sync::orchestrator", path = "/lib/a.cbz", "Comic skipped");
            tracing::debug!("below the sink level");
        });

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert_eq!(entries[0].target, "core_sync::orchestrator");
        assert_eq!(entries[0].message, "Comic skipped");
        assert_eq!(entries[0].field("path"), Some("/lib/a.cbz"));
        assert_eq!(entries[0].span.as_deref(), Some("write_comics"));
    }
}
