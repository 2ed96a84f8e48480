//! Errors raised by stages, pipelines and the sandbox fixture.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use jailkit_env::EnvError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

/// Error returned by a stage runner. Runners may fail with any error type.
pub type StageError = Box<dyn StdError + Send + Sync + 'static>;

/// A runner failure attributed to the stage that produced it.
#[derive(Debug)]
pub struct StageFailure {
    /// Name of the failing stage.
    pub stage: String,
    /// Error the stage reported.
    pub error: StageError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

/// Errors raised by the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A pipeline was run without any stages.
    #[error("pipeline has no stages")]
    EmptyPipeline,

    /// A stage's input was wired more than once.
    #[error("stage {stage} already has an input source")]
    StdinConfigured {
        /// Name of the stage.
        stage: String,
    },

    /// A stage runner panicked.
    #[error("stage {stage} panicked: {message}")]
    StagePanicked {
        /// Name of the stage.
        stage: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// A runner stopped early because its context was cancelled.
    #[error("stage {stage} was cancelled")]
    Cancelled {
        /// Name of the stage.
        stage: String,
    },

    /// A stage thread could not be started.
    #[error("failed to start stage {stage}: {source}")]
    Spawn {
        /// Name of the stage.
        stage: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// One or more stages failed; failures are listed in launch order.
    #[error("{}", join_failures(.failures))]
    Aggregate {
        /// Individual stage failures.
        failures: Vec<StageFailure>,
    },

    /// Preparing the sandbox on disk failed.
    #[error("failed to {operation} {path}: {source}")]
    Io {
        /// Operation being attempted.
        operation: &'static str,
        /// Host path involved.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Installing the tracing subscriber failed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// An environment operation failed.
    #[error(transparent)]
    Env(#[from] EnvError),

    /// A configuration value could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidConfig {
        /// Variable the value was read from.
        key: &'static str,
        /// Rejected value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl HarnessError {
    /// Returns the stage failures carried by an aggregate error.
    #[must_use]
    pub fn failures(&self) -> &[StageFailure] {
        if let Self::Aggregate { failures } = self {
            failures
        } else {
            &[]
        }
    }
}

pub(crate) fn io(operation: &'static str, path: &Utf8Path, source: io::Error) -> HarnessError {
    HarnessError::Io {
        operation,
        path: path.to_path_buf(),
        source: Arc::new(source),
    }
}

fn join_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
