//! Concurrent stage and pipeline harness for command-line programs under
//! test.
//!
//! A [`ProcessStage`] wraps a runner, a function that reads a [`Stream`]'s
//! input and writes its output, and reports an exit code plus an optional
//! error. A [`Pipeline`] chains stages through bounded in-memory pipes, runs
//! each on its own thread and joins their failures into one result. The
//! [`Sandbox`] fixture supplies a temporary jail, a
//! [`jailkit_env::VirtualEnvironment`], a test clock and a hasher, and runs
//! stages against a fresh copy of its environment each time.
//!
//! ```rust
//! use std::io::{BufRead, BufReader, Write};
//! use std::time::Duration;
//!
//! use jailkit_harness::{Outcome, Pipeline, ProcessStage, Sandbox};
//!
//! # fn main() -> Result<(), jailkit_harness::HarnessError> {
//! let sandbox = Sandbox::new()?;
//! let producer = ProcessStage::producer("producer", ["alpha", "beta"], Duration::ZERO);
//! let consumer = ProcessStage::new("consumer", |_, stream| {
//!     for line in BufReader::new(&mut stream.stdin).lines() {
//!         let Ok(text) = line else { return Outcome::exit(1) };
//!         if writeln!(stream.stdout, "C:{}", text.to_uppercase()).is_err() {
//!             return Outcome::exit(1);
//!         }
//!     }
//!     Outcome::ok()
//! });
//!
//! let result = sandbox.run_pipeline(Pipeline::new().stage(producer).stage(consumer));
//! assert_eq!(result.exit_code, 0);
//! assert_eq!(result.stdout_text(), "C:ALPHA\nC:BETA\n");
//! # Ok(()) }
//! ```

mod clock;
pub mod config;
mod context;
mod error;
mod hasher;
mod logs;
mod pipe;
mod pipeline;
mod sandbox;
mod stage;
mod stream;
pub mod telemetry;

pub use clock::{Clock, DEFAULT_TEST_TIME, SystemClock, TestClock};
pub use config::{HarnessConfig, LogFormat};
pub use context::{RunContext, SharedEnvironment};
pub use error::{HarnessError, StageError, StageFailure};
pub use hasher::{ContentHasher, Sha256Hasher};
pub use logs::{LogCapture, LogRecord};
pub use pipe::{DEFAULT_PIPE_CAPACITY, PipeReader, PipeWriter, pipe};
pub use pipeline::{Pipeline, PipelineResult, StageSummary};
pub use sandbox::{DEFAULT_DIR_MODE, Sandbox, SandboxOptions};
pub use stage::{Outcome, ProcessResult, ProcessStage, Runner, RunningStage, StageState};
pub use stream::{SharedBuffer, Stream};

#[cfg(test)]
mod tests;
