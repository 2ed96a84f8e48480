use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Layout of the formatted events written to the libtest output.
///
/// Parsed from `JAILKIT_LOG_FORMAT` without regard to case.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Flattened JSON objects, convenient for grepping captured test output.
    Json,
    /// Terse text lines carrying target, level and thread name.
    #[default]
    Compact,
}

/// Raised when `JAILKIT_LOG_FORMAT` names no known layout.
pub type LogFormatParseError = strum::ParseError;
