//! Log output for hosts embedding the scheduler.
//!
//! The scheduler only emits `tracing` events under the `spool_core` target.
//! [`init_logging`] installs a global subscriber that keeps the host's own
//! output at `level` while the scheduler logs at `scheduler_level`. Hosts that
//! already run a subscriber can take [`fmt_layer`] and [`build_filter`] and
//! compose them into their own registry instead.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Target prefix of every event the scheduler emits.
pub const SCHEDULER_TARGET: &str = "spool_core";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for everything outside the scheduler
    pub level: String,
    /// Level for `spool_core::*`
    pub scheduler_level: String,
    /// Extra `target = level` directives, applied last
    pub directives: BTreeMap<String, String>,
    pub format: LogFormat,
    /// How much of each `job_attempt` span is logged
    pub attempt_spans: AttemptSpans,
    /// Include file and line of the call site
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            scheduler_level: "info".to_string(),
            directives: BTreeMap::new(),
            format: LogFormat::default(),
            attempt_spans: AttemptSpans::default(),
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Verbose settings for local debugging of job execution.
    pub fn debug() -> Self {
        Self {
            scheduler_level: "debug".to_string(),
            format: LogFormat::Pretty,
            attempt_spans: AttemptSpans::Lifecycle,
            include_location: true,
            ..Self::default()
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

/// Span events logged for the `job_attempt` span wrapped around every attempt.
///
/// Attempt spans are opened at `debug`, so nothing is logged for them unless
/// `scheduler_level` admits debug output.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptSpans {
    Off,
    /// One line per finished attempt with its busy and idle time
    #[default]
    Close,
    /// A line when the attempt starts and another when it finishes
    Lifecycle,
}

impl AttemptSpans {
    fn fmt_span(self) -> FmtSpan {
        match self {
            Self::Off => FmtSpan::NONE,
            Self::Close => FmtSpan::CLOSE,
            Self::Lifecycle => FmtSpan::NEW | FmtSpan::CLOSE,
        }
    }
}

/// Build the level filter: the host level, the scheduler level, then each
/// extra directive in target order.
pub fn build_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)?
        .add_directive(format!("{}={}", SCHEDULER_TARGET, config.scheduler_level).parse()?);
    for (target, level) in &config.directives {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }
    Ok(filter)
}

/// The formatting layer for `config`, boxed so every format shares one type.
pub fn fmt_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let layer = fmt::layer()
        .with_span_events(config.attempt_spans.fmt_span())
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// A subscriber built from `config`, not yet installed.
pub fn subscriber(
    config: &LoggingConfig,
) -> anyhow::Result<impl Subscriber + Send + Sync + 'static> {
    let filter = build_filter(config)?;
    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(config)))
}

/// Install the subscriber for `config` as the global default.
///
/// # Errors
///
/// Returns an error if a level directive does not parse or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    subscriber(config)?.try_init()?;
    tracing::debug!(
        level = %config.level,
        scheduler_level = %config.scheduler_level,
        format = ?config.format,
        "Logging initialized"
    );
    Ok(())
}
