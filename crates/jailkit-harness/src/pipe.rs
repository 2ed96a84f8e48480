//! Bounded in-memory pipes connecting stages.
//!
//! Written chunks travel over a bounded channel, so a writer blocks once
//! `capacity` chunks are waiting and resumes as the reader drains them. The
//! reader observes end-of-input once every writer handle has been dropped.

use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex, PoisonError};

/// Default number of chunks a pipe buffers before blocking the writer.
pub const DEFAULT_PIPE_CAPACITY: usize = 16;

/// Creates a connected writer and reader pair.
#[must_use]
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (sender, receiver) = sync_channel(capacity.max(1));
    let reader = PipeReader {
        state: Arc::new(Mutex::new(ReaderState {
            receiver,
            pending: Vec::new(),
            offset: 0,
        })),
    };
    (PipeWriter { sender }, reader)
}

/// Writing end of a pipe. Dropping it signals end-of-input.
#[derive(Debug)]
pub struct PipeWriter {
    sender: SyncSender<Vec<u8>>,
}

impl PipeWriter {
    /// Closes the pipe, signalling end-of-input to the reader.
    pub fn close(self) {
        drop(self);
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.sender
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reading end of a pipe.
///
/// Clones share one underlying stream, so handing the same reader out twice
/// never duplicates data.
#[derive(Debug, Clone)]
pub struct PipeReader {
    state: Arc<Mutex<ReaderState>>,
}

#[derive(Debug)]
struct ReaderState {
    receiver: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl PipeReader {
    /// Reports whether two handles read from the same pipe.
    #[must_use]
    pub fn same_pipe(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.offset >= state.pending.len() {
            match state.receiver.recv() {
                Ok(chunk) => {
                    state.pending = chunk;
                    state.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let available = state.pending.get(state.offset..).unwrap_or_default();
        let count = available.len().min(buf.len());
        let (target, _) = buf.split_at_mut(count);
        let (source, _) = available.split_at(count);
        target.copy_from_slice(source);
        state.offset += count;
        Ok(count)
    }
}
