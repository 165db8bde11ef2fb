//! Telemetry helpers.
//!
//! - **Logging**: JSON, pretty or compact output through `tracing-subscriber`, with
//!   separate levels for the scheduler and the host
//!
//! Metrics are recorded through the `metrics` facade under the `spool_` prefix;
//! the host installs whichever recorder it exports with.
//!
//! # Example
//!
//! ```rust,no_run
//! use spool_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{
    build_filter, fmt_layer, init_logging, subscriber, AttemptSpans, LogFormat, LoggingConfig,
    SCHEDULER_TARGET,
};
