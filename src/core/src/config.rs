//! Configuration management.

use serde::Deserialize;

use crate::error::{Result, SchedulerError};

/// Scheduler configuration.
///
/// Every field except `concurrency` has a default, so a minimal source only
/// needs to name the concurrency cap.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of attempts running at the same time
    pub concurrency: usize,

    /// Maximum attempts per job, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single backoff delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

// Default value functions
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 100 }
fn default_max_delay_ms() -> u64 { 700 }

impl SchedulerConfig {
    /// Create a configuration with the given concurrency and default retry settings.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff base delay.
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Check every field, returning the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(SchedulerError::invalid_configuration(
                "concurrency must be greater than zero",
            )
            .with_context("concurrency", self.concurrency));
        }
        if self.max_attempts == 0 {
            return Err(SchedulerError::invalid_configuration(
                "max_attempts must be at least 1",
            )
            .with_context("max_attempts", self.max_attempts));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(SchedulerError::invalid_configuration(
                "max_delay_ms must not be smaller than base_delay_ms",
            )
            .with_context("base_delay_ms", self.base_delay_ms)
            .with_context("max_delay_ms", self.max_delay_ms));
        }
        Ok(())
    }

    /// Load configuration from `SPOOL__*` environment variables.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SPOOL").separator("__"))
            .build()?;

        let cfg: SchedulerConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SPOOL").separator("__"))
            .build()?;

        let cfg: SchedulerConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }
}
