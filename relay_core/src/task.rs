use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tracing::{trace, trace_span, Instrument};

pub type TaskId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Spawns `future` on the current runtime inside a `task` span tagged with
/// a fresh id and `name`. Nothing keeps track of the task afterwards; its
/// results are expected to travel through channels.
///
/// # Panics
///
/// Panics when called outside a tokio runtime.
pub fn go<F>(name: &'static str, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let id: TaskId = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let span = trace_span!("task", id, name);

    tokio::spawn(
        async move {
            trace!("started");
            let output = future.await;
            trace!("finished");
            output
        }
        .instrument(span),
    )
}
