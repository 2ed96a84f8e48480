//! Errors raised by environments and the filesystem capability.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while querying or mutating an environment.
#[derive(Debug, Clone, Error)]
pub enum EnvError {
    /// A value such as the home directory was requested before being set.
    #[error("{what} is not available")]
    NotAvailable {
        /// Human readable name of the missing value.
        what: &'static str,
    },

    /// A platform-mandated variable is absent.
    #[error("required environment variable {key} is not set")]
    MissingVariable {
        /// Name of the missing variable.
        key: String,
    },

    /// A path would resolve outside the jail and the caller chose to refuse
    /// it.
    #[error("path {path} escapes the jail {jail}")]
    EscapeAttempt {
        /// Path as supplied by the caller.
        path: Utf8PathBuf,
        /// Jail the path attempted to leave.
        jail: Utf8PathBuf,
    },

    /// A variable name was empty or contained `=` or NUL.
    #[error("invalid environment variable name {key:?}")]
    InvalidKey {
        /// Rejected name.
        key: String,
    },

    /// A host path could not be represented as UTF-8.
    #[error("host path {} is not valid UTF-8", .path.display())]
    NonUtf8Path {
        /// Offending host path.
        path: PathBuf,
    },

    /// An underlying filesystem operation failed.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        /// Operation that failed, for example `read_file`.
        operation: &'static str,
        /// Host path the operation targeted.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl EnvError {
    pub(crate) fn io(operation: &'static str, path: impl Into<Utf8PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn escape(path: impl Into<Utf8PathBuf>, jail: impl Into<Utf8PathBuf>) -> Self {
        Self::EscapeAttempt {
            path: path.into(),
            jail: jail.into(),
        }
    }

    /// Returns the underlying I/O error kind when this is an I/O failure.
    #[must_use]
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

pub(crate) fn utf8_path(path: PathBuf) -> Result<Utf8PathBuf, EnvError> {
    Utf8PathBuf::from_path_buf(path).map_err(|rejected| EnvError::NonUtf8Path { path: rejected })
}
