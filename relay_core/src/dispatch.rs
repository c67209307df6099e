//! Fan-out/fan-in over contiguous segments of an input.
//!
//! [`dispatch`] splits the input, starts one worker per segment and has
//! every worker report exactly once on a shared results channel, even when
//! it panics. [`gather`] then collects exactly as many reports as were
//! dispatched.

use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::channel::Channel;
use crate::error::{DispatchError, WorkerError};

/// One worker's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partial<R> {
    pub worker: usize,
    pub segment: Range<usize>,
    pub outcome: Result<R, WorkerError>,
}

/// Splits `len` items into `n` contiguous ranges whose sizes differ by at
/// most one, the larger ones first.
pub fn contiguous(len: usize, n: usize) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    let (base, extra) = (len / n, len % n);
    let mut start = 0;
    (0..n)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

fn validate(len: usize, n: usize, segments: &[Range<usize>]) -> Result<(), DispatchError> {
    if segments.len() != n {
        return Err(DispatchError::SegmentCount {
            expected: n,
            got: segments.len(),
        });
    }

    let mut expected = 0;
    for (index, segment) in segments.iter().enumerate() {
        if segment.start != expected || segment.end < segment.start {
            return Err(DispatchError::NotContiguous {
                index,
                start: segment.start,
                expected,
            });
        }
        expected = segment.end;
    }

    if expected != len {
        return Err(DispatchError::Incomplete { covered: expected, len });
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Partitions `input` with `partition(len, workers)` and runs `worker` on
/// every segment in its own blocking task. Each task sends one [`Partial`]
/// on `results`; the caller must receive exactly `workers` of them.
///
/// Must be called from within a tokio runtime.
pub fn dispatch<I, R, P, W>(
    workers: usize,
    mut input: Vec<I>,
    partition: P,
    worker: W,
    results: &Channel<Partial<R>>,
) -> Result<(), DispatchError>
where
    I: Send + 'static,
    R: Send + 'static,
    P: FnOnce(usize, usize) -> Vec<Range<usize>>,
    W: Fn(&[I]) -> R + Send + Sync + 'static,
{
    if workers == 0 {
        return Err(DispatchError::NoWorkers);
    }

    let segments = partition(input.len(), workers);
    validate(input.len(), workers, &segments)?;
    debug!(workers, items = input.len(), "dispatching");

    let worker = Arc::new(worker);
    // Back to front so every split_off leaves exactly the earlier segments
    for (index, segment) in segments.into_iter().enumerate().rev() {
        let items = input.split_off(segment.start);
        let worker = worker.clone();
        let results = results.clone();

        tokio::task::spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker(&items))).map_err(
                |payload| WorkerError::Panicked {
                    worker: index,
                    message: panic_message(payload.as_ref()),
                },
            );
            trace!(worker = index, ok = outcome.is_ok(), "worker reporting");
            results.blocking_send(Partial {
                worker: index,
                segment,
                outcome,
            });
        });
    }
    Ok(())
}

/// Receives exactly `n` partial results.
pub async fn gather<R: Send>(
    n: usize,
    results: &Channel<Partial<R>>,
) -> Result<Vec<Partial<R>>, DispatchError> {
    let mut partials = Vec::with_capacity(n);
    while partials.len() < n {
        match results.recv().await {
            Some(partial) => partials.push(partial),
            None => {
                return Err(DispatchError::ResultsClosed {
                    received: partials.len(),
                    expected: n,
                })
            }
        }
    }
    Ok(partials)
}
