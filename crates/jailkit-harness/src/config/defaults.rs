use jailkit_env::DEFAULT_USER;

use crate::config::logging::LogFormat;
use crate::pipe::DEFAULT_PIPE_CAPACITY;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Owned log filter value for serde defaults.
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default log output format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Owned default user name for serde defaults.
#[must_use]
pub fn default_user_string() -> String {
    DEFAULT_USER.to_owned()
}

/// Default number of chunks buffered by a pipe.
#[must_use]
pub const fn default_pipe_capacity() -> usize {
    DEFAULT_PIPE_CAPACITY
}
