use std::fmt;

use thiserror::Error;

pub(crate) const SEND_ON_CLOSED: &str = "send on closed channel";
pub(crate) const CLOSE_OF_CLOSED: &str = "close of closed channel";

/// Returned by `try_send` when nobody is waiting and the buffer is full.
/// Carries the value back to the caller.
#[derive(Error, PartialEq, Eq, Clone, Copy)]
#[error("channel is full")]
pub struct TrySendError<T>(pub T);

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrySendError(..)")
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum TryRecvError {
    #[error("channel is empty")]
    Empty,
    #[error("channel is closed")]
    Closed,
}

/// How a dispatched worker failed. The worker still reports through the
/// results channel.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum WorkerError {
    #[error("worker {worker} panicked: {message}")]
    Panicked { worker: usize, message: String },
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DispatchError {
    #[error("cannot dispatch to zero workers")]
    NoWorkers,
    #[error("partition produced {got} segments, expected {expected}")]
    SegmentCount { expected: usize, got: usize },
    #[error("segment {index} starts at {start}, expected {expected}")]
    NotContiguous {
        index: usize,
        start: usize,
        expected: usize,
    },
    #[error("segments cover {covered} of {len} items")]
    Incomplete { covered: usize, len: usize },
    #[error("results channel closed after {received} of {expected} partial results")]
    ResultsClosed { received: usize, expected: usize },
}
