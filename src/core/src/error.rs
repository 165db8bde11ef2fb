//! Error handling for Spool Core.
//!
//! This module provides:
//! - A crate-level error type with machine-readable codes
//! - Severity classification used for logging
//! - Structured context for diagnostics
//! - Metrics integration for error tracking
//!
//! Errors raised by an individual job never surface here; they are reported
//! through [`crate::jobs::JobFailure`] on the job's own handle.
//!
//! # Usage
//!
//! ```rust,ignore
//! use spool_core::error::{SchedulerError, Result};
//!
//! fn check(concurrency: usize) -> Result<()> {
//!     if concurrency == 0 {
//!         return Err(SchedulerError::invalid_configuration("concurrency must be > 0"));
//!     }
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Configuration Errors (1000-1099)
    InvalidConfiguration,
    ConfigurationError,

    // Runtime Errors (2000-2099)
    RuntimeUnavailable,
    SchedulerClosed,

    // Serialization Errors (3000-3099)
    SerializationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidConfiguration => 1000,
            Self::ConfigurationError => 1001,
            Self::RuntimeUnavailable => 2000,
            Self::SchedulerClosed => 2001,
            Self::SerializationError => 3000,
            Self::InternalError => 9000,
        }
    }

    /// Get the error category.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration | Self::ConfigurationError => "configuration",
            Self::RuntimeUnavailable | Self::SchedulerClosed => "runtime",
            Self::SerializationError => "serialization",
            Self::InternalError => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller mistakes (bad configuration values)
    Low,
    /// Operational issues (engine already stopped)
    Medium,
    /// Environment problems (no runtime, unreadable config source)
    High,
    /// Bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidConfiguration => Self::Low,
            ErrorCode::SchedulerClosed => Self::Medium,
            ErrorCode::ConfigurationError
            | ErrorCode::RuntimeUnavailable
            | ErrorCode::SerializationError => Self::High,
            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Spool Core.
#[derive(Error, Debug)]
pub struct SchedulerError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Human-readable error message
    message: Cow<'static, str>,

    /// Additional context key-value pairs
    context: HashMap<String, serde_json::Value>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl SchedulerError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            context: HashMap::new(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Create an error for a configuration source that could not be read.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    /// Create an error for a scheduler built outside a tokio runtime.
    pub fn runtime_unavailable() -> Self {
        Self::new(
            ErrorCode::RuntimeUnavailable,
            "Scheduler must be created from within a tokio runtime",
        )
    }

    /// Create an error for a request sent to a stopped scheduler.
    pub fn closed() -> Self {
        Self::new(ErrorCode::SchedulerClosed, "Scheduler is no longer running")
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the structured context.
    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    context = ?self.context,
                    source = ?self.source,
                    "Scheduler error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Scheduler error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Scheduler error"
                );
            }
        }
    }

    /// Record error metrics.
    fn record_metrics(&self) {
        counter!(
            "spool_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<config::ConfigError> for SchedulerError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(format!("Failed to load configuration: {}", err))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::SerializationError, err.to_string()).with_source(err)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
