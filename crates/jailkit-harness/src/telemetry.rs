//! Tracing output for harness runs.
//!
//! Formatted events are written through the libtest writer, so they only
//! surface for failing tests. [`initialise`] installs that output as the
//! process-wide subscriber. Sandboxes additionally build a scoped dispatcher
//! that feeds a [`LogCapture`] alongside the same formatted output.

use once_cell::sync::OnceCell;
use tracing::Dispatch;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{HarnessConfig, LogFormat};
use crate::logs::LogCapture;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Proof that the process-wide subscriber is in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Failures while wiring tracing output.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Something else claimed the global subscriber first.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the harness subscriber for the whole process.
///
/// Only the first call does any work; later calls return a handle straight
/// away, whatever configuration they pass.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when the configured filter does not
/// parse and [`TelemetryError::Subscriber`] when another global subscriber
/// is already installed.
pub fn initialise(config: &HarnessConfig) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| {
            let subscriber = Registry::default().with(filtered_output(config)?);
            tracing::subscriber::set_global_default(subscriber)
                .map_err(TelemetryError::Subscriber)
        })
        .map(|_| TelemetryHandle)
}

/// Builds a dispatcher that records every event into `capture` and writes
/// events passing the configured filter to the test output.
pub(crate) fn capturing_dispatch(
    config: &HarnessConfig,
    capture: LogCapture,
) -> Result<Dispatch, TelemetryError> {
    let subscriber = Registry::default()
        .with(filtered_output(config)?)
        .with(capture);
    Ok(Dispatch::new(subscriber))
}

fn filtered_output(
    config: &HarnessConfig,
) -> Result<impl Layer<Registry> + Send + Sync + 'static, TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let output = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_ansi(false)
        .with_test_writer()
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let formatted: Box<dyn Layer<Registry> + Send + Sync> = match config.log_format() {
        LogFormat::Json => output.json().flatten_event(true).boxed(),
        LogFormat::Compact => output.compact().boxed(),
    };
    Ok(formatted.with_filter(filter))
}
