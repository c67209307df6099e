// One-shot wakeup shared by every queue entry a blocked operation leaves
// behind. Whoever claims it first owns the right to complete the operation.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

const UNCLAIMED: usize = usize::MAX;

/// Claimed by the owner itself when it gives up waiting.
pub(crate) const WITHDRAWN: usize = usize::MAX - 1;

#[derive(Debug)]
pub(crate) struct Signal {
    // Index of the case that won, or UNCLAIMED
    claimed: AtomicUsize,
    // Set once the winner has filled the slot
    done: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl Signal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            claimed: AtomicUsize::new(UNCLAIMED),
            done: AtomicBool::new(false),
            waker: Mutex::new(None),
        })
    }

    /// Only one caller ever gets `true`.
    pub fn claim(&self, case: usize) -> bool {
        self.claimed
            .compare_exchange(UNCLAIMED, case, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire) != UNCLAIMED
    }

    /// Publishes the claimed case and wakes the owner. Must follow a
    /// successful `claim` and any slot write that goes with it.
    pub fn finish(&self) {
        self.done.store(true, Ordering::Release);
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }

    pub fn completed(&self) -> Option<usize> {
        if self.done.load(Ordering::Acquire) {
            Some(self.claimed.load(Ordering::Acquire))
        } else {
            None
        }
    }

    pub fn fired(self: &Arc<Self>) -> Fired {
        Fired {
            signal: self.clone(),
        }
    }
}

/// Resolves to the index of the case that completed the operation.
pub(crate) struct Fired {
    signal: Arc<Signal>,
}

impl Future for Fired {
    type Output = usize;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
        if let Some(case) = self.signal.completed() {
            return Poll::Ready(case);
        }

        let mut waker = self.signal.waker.lock();

        // Double-check under lock
        if let Some(case) = self.signal.completed() {
            return Poll::Ready(case);
        }

        *waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive() {
        let signal = Signal::new();
        assert!(!signal.is_claimed());
        assert!(signal.claim(2));
        assert!(!signal.claim(0));
        assert!(!signal.claim(WITHDRAWN));
        assert!(signal.is_claimed());

        // Not complete until the winner finishes
        assert_eq!(signal.completed(), None);
        signal.finish();
        assert_eq!(signal.completed(), Some(2));
    }

    #[tokio::test]
    async fn test_fired_wakes_across_tasks() {
        let signal = Signal::new();
        let remote = signal.clone();

        let finisher = tokio::spawn(async move {
            tokio::task::yield_now().await;
            assert!(remote.claim(1));
            remote.finish();
        });

        assert_eq!(signal.fired().await, 1);
        finisher.await.unwrap();
    }
}
