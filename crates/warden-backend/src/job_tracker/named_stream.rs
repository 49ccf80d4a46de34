//! Per-job output buffering and fan-out.

use std::sync::{Mutex, PoisonError, RwLock};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use warden_common::types::{JobStream, StreamName};

/// The live subscribers of one job, shared by its stdout and stderr.
///
/// Each subscriber has its own queue, so every one of them sees every chunk.
#[derive(Debug, Default)]
pub struct Fanout {
    state: Mutex<FanoutState>,
}

#[derive(Debug, Default)]
struct FanoutState {
    subscribers: Vec<mpsc::UnboundedSender<JobStream>>,
    closed: bool,
}

impl Fanout {
    /// Registers a new live subscriber.
    ///
    /// Returns `None` once the fan-out has been closed.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<JobStream>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        Some(rx)
    }

    /// Sends `chunk` to every subscriber, dropping those that went away.
    pub fn broadcast(&self, chunk: &JobStream) {
        self.lock()
            .subscribers
            .retain(|sub| sub.send(chunk.clone()).is_ok());
    }

    /// Sends `last` to every subscriber and closes their channels.
    pub fn close(&self, last: &JobStream) {
        let mut state = self.lock();
        for sub in state.subscribers.drain(..) {
            let _ = sub.send(last.clone());
        }
        state.closed = true;
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FanoutState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One of a job's output streams: retains what was written (unless
/// discarding) and forwards every chunk to the job's live subscribers.
#[derive(Debug)]
pub struct NamedStream {
    name: StreamName,
    discard: bool,
    buffer: RwLock<BytesMut>,
}

impl NamedStream {
    /// Creates an empty stream.
    #[must_use]
    pub fn new(name: StreamName, discard: bool) -> Self {
        Self {
            name,
            discard,
            buffer: RwLock::new(BytesMut::new()),
        }
    }

    /// Appends `data` to the buffer and forwards it to `fanout`.
    ///
    /// The buffer lock is held across both so that concurrent readers of
    /// [`bytes`](Self::bytes) never see a chunk subscribers have not.
    pub fn write(&self, data: Bytes, fanout: &Fanout) {
        let mut buffer = self.buffer.write().unwrap_or_else(PoisonError::into_inner);
        if !self.discard {
            buffer.extend_from_slice(&data);
        }
        fanout.broadcast(&JobStream::Output {
            name: self.name,
            data,
        });
    }

    /// Returns a copy of everything retained so far.
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        let buffer = self.buffer.read().unwrap_or_else(PoisonError::into_inner);
        Bytes::copy_from_slice(&buffer)
    }
}
