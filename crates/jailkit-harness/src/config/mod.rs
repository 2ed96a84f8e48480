//! Harness configuration.
//!
//! Values start from serde defaults and can be overlaid from `JAILKIT_*`
//! variables read through an injected [`Environment`]. A sandbox built
//! without an explicit configuration reads them from the process
//! environment.

mod defaults;
mod logging;

use std::str::FromStr;

use jailkit_env::Environment;
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

pub use defaults::{
    DEFAULT_LOG_FILTER, default_log_filter_string, default_log_format, default_pipe_capacity,
    default_user_string,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Variable overriding the log filter expression.
pub const LOG_FILTER_VAR: &str = "JAILKIT_LOG";
/// Variable overriding the log format.
pub const LOG_FORMAT_VAR: &str = "JAILKIT_LOG_FORMAT";
/// Variable overriding the default sandbox user.
pub const USER_VAR: &str = "JAILKIT_USER";
/// Variable overriding the pipe capacity.
pub const PIPE_CAPACITY_VAR: &str = "JAILKIT_PIPE_CAPACITY";

/// Settings shared by the sandbox fixture and telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HarnessConfig {
    #[serde(default = "default_log_filter_string")]
    log_filter: String,
    #[serde(default = "default_log_format")]
    log_format: LogFormat,
    #[serde(default = "default_user_string")]
    default_user: String,
    #[serde(default = "default_pipe_capacity")]
    pipe_capacity: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            default_user: default_user_string(),
            pipe_capacity: default_pipe_capacity(),
        }
    }
}

impl HarnessConfig {
    /// Builds a configuration from defaults overlaid with `JAILKIT_*`
    /// variables found in `env`. Empty variables are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidConfig`] when the log format is unknown
    /// or the pipe capacity is not a positive integer.
    pub fn from_environment<E: Environment + ?Sized>(env: &E) -> Result<Self, HarnessError> {
        let mut config = Self::default();
        if let Some(filter) = non_empty(env, LOG_FILTER_VAR) {
            config.log_filter = filter;
        }
        if let Some(format) = non_empty(env, LOG_FORMAT_VAR) {
            config.log_format = LogFormat::from_str(&format)
                .map_err(|error| invalid(LOG_FORMAT_VAR, format, &error))?;
        }
        if let Some(user) = non_empty(env, USER_VAR) {
            config.default_user = user;
        }
        if let Some(capacity) = non_empty(env, PIPE_CAPACITY_VAR) {
            config.pipe_capacity = parse_capacity(capacity)?;
        }
        Ok(config)
    }

    /// Replaces the log filter expression.
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Replaces the log format.
    #[must_use]
    pub const fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// User name given to sandbox environments.
    #[must_use]
    pub fn default_user(&self) -> &str {
        &self.default_user
    }

    /// Chunks a pipe buffers before the writer blocks.
    #[must_use]
    pub const fn pipe_capacity(&self) -> usize {
        self.pipe_capacity
    }
}

fn non_empty<E: Environment + ?Sized>(env: &E, key: &str) -> Option<String> {
    env.get(key).filter(|value| !value.is_empty())
}

fn parse_capacity(raw: String) -> Result<usize, HarnessError> {
    let parsed = raw.trim().parse::<usize>();
    match parsed {
        Ok(0) => Err(invalid(PIPE_CAPACITY_VAR, raw, &"capacity must be positive")),
        Ok(capacity) => Ok(capacity),
        Err(error) => Err(invalid(PIPE_CAPACITY_VAR, raw, &error)),
    }
}

fn invalid(key: &'static str, value: String, reason: &dyn std::fmt::Display) -> HarnessError {
    HarnessError::InvalidConfig {
        key,
        value,
        reason: reason.to_string(),
    }
}
