//! A single runner together with its I/O wiring.
//!
//! A stage moves through a small state machine: it is built
//! ([`StageState::Configured`]), optionally connected to pipes or capture
//! buffers ([`StageState::Wired`]), then consumed by [`ProcessStage::run`] or
//! [`ProcessStage::spawn`]. Spawned stages report [`StageState::Running`]
//! until their result arrives over a channel.
//!
//! When several output destinations are requested for the same stream, an
//! explicit sink wins over a capture buffer, which wins over a pipe. A stream
//! with none of these is captured into a buffer owned by the result. A
//! pipeline routes its final stage into the pipeline's buffers, replacing any
//! pipe or capture buffer but leaving an explicit sink in place.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{Dispatch, debug, dispatcher, warn};

use crate::context::RunContext;
use crate::error::{HarnessError, StageError, panic_message};
use crate::pipe::{DEFAULT_PIPE_CAPACITY, PipeReader, PipeWriter, pipe};
use crate::stream::{SharedBuffer, Stream};

const STAGE_TARGET: &str = "jailkit_harness::stage";

/// Exit code and optional error returned by a runner.
#[derive(Debug)]
pub struct Outcome {
    /// Process-style exit code.
    pub exit_code: i32,
    /// Failure reported by the runner.
    pub error: Option<StageError>,
}

impl Outcome {
    /// Successful completion with exit code 0.
    #[must_use]
    pub const fn ok() -> Self {
        Self::exit(0)
    }

    /// Completion with `exit_code` and no error.
    #[must_use]
    pub const fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            error: None,
        }
    }

    /// Failure with `exit_code` and `error`.
    #[must_use]
    pub fn fail(exit_code: i32, error: impl Into<StageError>) -> Self {
        Self {
            exit_code,
            error: Some(error.into()),
        }
    }
}

/// Function executed by a stage.
pub type Runner = Box<dyn FnOnce(&RunContext, &mut Stream) -> Outcome + Send>;

/// Lifecycle position of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Built with default streams.
    Configured,
    /// At least one stream has been connected.
    Wired,
    /// Executing on its own thread.
    Running,
    /// Finished; the result is available.
    Finished,
}

enum Output {
    Default,
    Pipe {
        writer: PipeWriter,
        reader: PipeReader,
    },
    Capture(SharedBuffer),
    Sink(Box<dyn Write + Send>),
}

impl Output {
    const fn rank(&self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Pipe { .. } => 1,
            Self::Capture(_) => 2,
            Self::Sink(_) => 3,
        }
    }

    fn pipe_reader(&mut self, capacity: usize) -> PipeReader {
        if let Self::Pipe { reader, .. } = self {
            return reader.clone();
        }
        let (writer, reader) = pipe(capacity);
        if self.rank() < 1 {
            *self = Self::Pipe {
                writer,
                reader: reader.clone(),
            };
        }
        // Output already goes elsewhere; the dropped writer leaves the
        // reader at end-of-input.
        reader
    }

    fn capture(&mut self, buffer: SharedBuffer) -> SharedBuffer {
        if let Self::Capture(existing) = self {
            return existing.clone();
        }
        if self.rank() < 2 {
            *self = Self::Capture(buffer.clone());
        }
        buffer
    }

    fn redirect(&mut self, buffer: &SharedBuffer) {
        if !matches!(self, Self::Sink(_)) {
            *self = Self::Capture(buffer.clone());
        }
    }

    fn into_sink(self) -> (Box<dyn Write + Send>, Option<SharedBuffer>) {
        match self {
            Self::Default => {
                let buffer = SharedBuffer::new();
                (Box::new(buffer.clone()), Some(buffer))
            }
            Self::Capture(buffer) => (Box::new(buffer.clone()), Some(buffer)),
            Self::Pipe { writer, .. } => (Box::new(writer), None),
            Self::Sink(sink) => (sink, None),
        }
    }
}

/// One runner plus the pipes and buffers connecting it to its neighbours.
pub struct ProcessStage {
    name: String,
    runner: Runner,
    tty: bool,
    capacity: usize,
    stdin: Option<Box<dyn Read + Send>>,
    stdout: Output,
    stderr: Output,
}

impl fmt::Debug for ProcessStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessStage")
            .field("name", &self.name)
            .field("tty", &self.tty)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ProcessStage {
    /// Wraps `runner` in a stage called `name`.
    #[must_use]
    pub fn new<F>(name: impl Into<String>, runner: F) -> Self
    where
        F: FnOnce(&RunContext, &mut Stream) -> Outcome + Send + 'static,
    {
        Self {
            name: name.into(),
            runner: Box::new(runner),
            tty: false,
            capacity: DEFAULT_PIPE_CAPACITY,
            stdin: None,
            stdout: Output::Default,
            stderr: Output::Default,
        }
    }

    /// Builds a stage that writes each of `lines` to stdout followed by a
    /// newline, pausing for `interval` after every line.
    ///
    /// The producer stops early with [`HarnessError::Cancelled`] once its
    /// context is cancelled.
    #[must_use]
    pub fn producer<I, S>(name: impl Into<String>, lines: I, interval: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stage = name.into();
        let emitted: Vec<String> = lines.into_iter().map(Into::into).collect();
        let label = stage.clone();
        Self::new(stage, move |ctx, stream| {
            for line in emitted {
                if ctx.is_cancelled() {
                    return Outcome::fail(1, HarnessError::Cancelled { stage: label });
                }
                if let Err(error) = writeln!(stream.stdout, "{line}") {
                    return Outcome::fail(1, error);
                }
                if !interval.is_zero() {
                    thread::sleep(interval);
                }
            }
            Outcome::ok()
        })
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marks stdout as an interactive terminal.
    #[must_use]
    pub const fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Sets how many chunks pipes created by this stage buffer before the
    /// writer blocks.
    #[must_use]
    pub const fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Returns a reader fed by this stage's stdout.
    ///
    /// The pipe is created on first request and later requests return a
    /// handle to the same pipe.
    pub fn stdout_pipe(&mut self) -> PipeReader {
        debug!(target: STAGE_TARGET, stage = %self.name, "stdout pipe requested");
        self.stdout.pipe_reader(self.capacity)
    }

    /// Returns a reader fed by this stage's stderr.
    pub fn stderr_pipe(&mut self) -> PipeReader {
        self.stderr.pipe_reader(self.capacity)
    }

    /// Supplies the stage's input.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::StdinConfigured`] when input was already set.
    pub fn set_stdin(&mut self, input: impl Read + Send + 'static) -> Result<(), HarnessError> {
        if self.stdin.is_some() {
            return Err(HarnessError::StdinConfigured {
                stage: self.name.clone(),
            });
        }
        self.stdin = Some(Box::new(input));
        Ok(())
    }

    /// Connects the stage's input to a new pipe and returns its writing end.
    ///
    /// Dropping or closing the writer signals end-of-input to the runner.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::StdinConfigured`] when input was already set.
    pub fn stdin_writer(&mut self) -> Result<PipeWriter, HarnessError> {
        let (writer, reader) = pipe(self.capacity);
        self.set_stdin(reader)?;
        Ok(writer)
    }

    /// Captures stdout into a buffer and returns it.
    pub fn capture_stdout(&mut self) -> SharedBuffer {
        self.stdout.capture(SharedBuffer::new())
    }

    /// Captures stderr into a buffer and returns it.
    pub fn capture_stderr(&mut self) -> SharedBuffer {
        self.stderr.capture(SharedBuffer::new())
    }

    /// Sends stdout to `sink`, replacing any pipe or capture buffer.
    pub fn set_stdout(&mut self, sink: impl Write + Send + 'static) {
        self.stdout = Output::Sink(Box::new(sink));
    }

    /// Sends stderr to `sink`, replacing any pipe or capture buffer.
    pub fn set_stderr(&mut self, sink: impl Write + Send + 'static) {
        self.stderr = Output::Sink(Box::new(sink));
    }

    pub(crate) fn capture_into(&mut self, stdout: &SharedBuffer, stderr: &SharedBuffer) {
        self.stdout.redirect(stdout);
        self.stderr.redirect(stderr);
    }

    /// Reports whether the stage still has its default wiring.
    #[must_use]
    pub fn state(&self) -> StageState {
        let untouched = self.stdin.is_none()
            && matches!(self.stdout, Output::Default)
            && matches!(self.stderr, Output::Default);
        if untouched {
            StageState::Configured
        } else {
            StageState::Wired
        }
    }

    /// Runs the stage on the calling thread.
    ///
    /// Pipe writers owned by the stage are closed when the runner returns,
    /// whatever its outcome, so downstream readers always reach
    /// end-of-input.
    #[must_use]
    pub fn run(self, ctx: &RunContext) -> ProcessResult {
        let Self {
            name,
            runner,
            tty,
            stdin,
            stdout,
            stderr,
            ..
        } = self;
        let is_piped = stdin.is_some();
        let (stdout_sink, stdout_buffer) = stdout.into_sink();
        let (stderr_sink, stderr_buffer) = stderr.into_sink();
        let mut stream = Stream {
            stdin: stdin.unwrap_or_else(empty_input),
            stdout: stdout_sink,
            stderr: stderr_sink,
            is_piped,
            is_tty: tty,
        };

        debug!(target: STAGE_TARGET, stage = %name, piped = is_piped, "stage started");
        let outcome = runner(ctx, &mut stream);
        if let Err(error) = stream.stdout.flush() {
            warn!(target: STAGE_TARGET, stage = %name, %error, "failed to flush stdout");
        }
        drop(stream);

        let exit_code = match (&outcome.error, outcome.exit_code) {
            (Some(_), 0) => 1,
            (_, code) => code,
        };
        debug!(
            target: STAGE_TARGET,
            stage = %name,
            exit_code,
            failed = outcome.error.is_some(),
            "stage finished"
        );
        ProcessResult {
            name,
            exit_code,
            error: outcome.error,
            stdout: stdout_buffer.map(|buffer| buffer.contents()).unwrap_or_default(),
            stderr: stderr_buffer.map(|buffer| buffer.contents()).unwrap_or_default(),
        }
    }

    /// Runs the stage on a new thread.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Spawn`] when the thread cannot be created.
    pub fn spawn(self, ctx: &RunContext) -> Result<RunningStage, HarnessError> {
        let name = self.name.clone();
        let context = ctx.clone();
        let (sender, receiver) = mpsc::channel();
        let dispatch = dispatcher::get_default(Dispatch::clone);
        let handle = thread::Builder::new()
            .name(format!("stage-{name}"))
            .spawn(move || {
                let result = dispatcher::with_default(&dispatch, || self.run(&context));
                if sender.send(result).is_err() {
                    debug!(target: STAGE_TARGET, "stage result dropped unread");
                }
            })
            .map_err(|source| HarnessError::Spawn {
                stage: name.clone(),
                source: Arc::new(source),
            })?;
        Ok(RunningStage {
            name,
            receiver,
            handle: Some(handle),
            result: None,
        })
    }
}

fn empty_input() -> Box<dyn Read + Send> {
    Box::new(io::empty())
}

/// Handle to a stage executing on its own thread.
#[derive(Debug)]
pub struct RunningStage {
    name: String,
    receiver: Receiver<ProcessResult>,
    handle: Option<JoinHandle<()>>,
    result: Option<ProcessResult>,
}

impl RunningStage {
    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until the stage finishes.
    #[must_use]
    pub fn wait(mut self) -> ProcessResult {
        if let Some(result) = self.result.take() {
            return result;
        }
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => self.abandoned(),
        }
    }

    /// Waits up to `timeout` for the stage to finish.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<&ProcessResult> {
        if self.result.is_none() {
            self.result = match self.receiver.recv_timeout(timeout) {
                Ok(result) => Some(result),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(self.abandoned()),
            };
        }
        self.result.as_ref()
    }

    /// Returns the result if the stage has already finished.
    pub fn try_result(&mut self) -> Option<&ProcessResult> {
        if self.result.is_none() {
            self.result = match self.receiver.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(self.abandoned()),
            };
        }
        self.result.as_ref()
    }

    /// Reports whether the stage is still running.
    pub fn state(&mut self) -> StageState {
        if self.try_result().is_some() {
            StageState::Finished
        } else {
            StageState::Running
        }
    }

    fn abandoned(&mut self) -> ProcessResult {
        let message = self
            .handle
            .take()
            .and_then(|handle| handle.join().err())
            .map_or_else(
                || "stage exited without reporting a result".to_owned(),
                |payload| panic_message(payload.as_ref()),
            );
        warn!(target: STAGE_TARGET, stage = %self.name, %message, "stage panicked");
        ProcessResult::panicked(self.name.clone(), message)
    }
}

/// Outcome of running one stage.
#[derive(Debug)]
pub struct ProcessResult {
    /// Stage name.
    pub name: String,
    /// Exit code; never 0 when `error` is set.
    pub exit_code: i32,
    /// Error reported by the runner.
    pub error: Option<StageError>,
    /// Captured stdout; empty when stdout went to a pipe or sink.
    pub stdout: Vec<u8>,
    /// Captured stderr; empty when stderr went to a pipe or sink.
    pub stderr: Vec<u8>,
}

impl ProcessResult {
    pub(crate) fn panicked(name: String, message: String) -> Self {
        let stage = name.clone();
        Self::harness_failure(name, HarnessError::StagePanicked { stage, message })
    }

    pub(crate) fn harness_failure(name: String, error: HarnessError) -> Self {
        Self {
            name,
            exit_code: 1,
            error: Some(Box::new(error)),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Reports whether the stage exited with 0 and no error.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    /// Captured stdout as text.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Captured stderr as text.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
