//! Standard I/O handed to a stage runner.

use std::fmt;
use std::io::{self, IsTerminal, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Input, output and error streams for one stage invocation.
pub struct Stream {
    /// Bytes the runner consumes.
    pub stdin: Box<dyn Read + Send>,
    /// Sink for regular output.
    pub stdout: Box<dyn Write + Send>,
    /// Sink for diagnostics.
    pub stderr: Box<dyn Write + Send>,
    /// Whether `stdin` was supplied explicitly rather than defaulted to empty.
    pub is_piped: bool,
    /// Whether `stdout` should be treated as an interactive terminal.
    pub is_tty: bool,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("is_piped", &self.is_piped)
            .field("is_tty", &self.is_tty)
            .finish_non_exhaustive()
    }
}

impl Stream {
    /// Builds a stream with empty input that discards everything written.
    #[must_use]
    pub fn null() -> Self {
        Self {
            stdin: Box::new(io::empty()),
            stdout: Box::new(io::sink()),
            stderr: Box::new(io::sink()),
            is_piped: false,
            is_tty: false,
        }
    }

    /// Builds a stream over the process's own standard handles.
    ///
    /// Input counts as piped when stdin is not a terminal; `is_tty` reports
    /// whether stdout is one.
    #[must_use]
    pub fn process() -> Self {
        Self::from_handles(io::stdin(), io::stdout(), io::stderr())
    }

    pub(crate) fn from_handles<I, O, E>(stdin: I, stdout: O, stderr: E) -> Self
    where
        I: Read + IsTerminal + Send + 'static,
        O: Write + IsTerminal + Send + 'static,
        E: Write + Send + 'static,
    {
        let is_piped = !stdin.is_terminal();
        let is_tty = stdout.is_terminal();
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            is_piped,
            is_tty,
        }
    }
}

/// Growable byte buffer shared between a writer and later readers.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the contents decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Reports whether two handles share storage.
    #[must_use]
    pub fn same_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
