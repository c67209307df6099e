use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, Stream};
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{TryRecvError, TrySendError, CLOSE_OF_CLOSED, SEND_ON_CLOSED};
use crate::select::Select;
use crate::signal::Signal;

/// A blocked operation's place in a wait queue. Senders park with the value
/// in `slot`; receivers park with an empty `slot` for the value to land in.
pub(crate) struct Waiter<T> {
    pub signal: Arc<Signal>,
    pub case: usize,
    pub slot: Arc<Mutex<Option<T>>>,
}

impl<T> Waiter<T> {
    fn claim(&self) -> bool {
        self.signal.claim(self.case)
    }

    fn belongs_to(&self, signal: &Arc<Signal>) -> bool {
        Arc::ptr_eq(&self.signal, signal)
    }

    fn is_live_peer_of(&self, signal: &Arc<Signal>) -> bool {
        !self.signal.is_claimed() && !self.belongs_to(signal)
    }
}

pub(crate) struct State<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    senders: VecDeque<Waiter<T>>,
    receivers: VecDeque<Waiter<T>>,
    closed: bool,
}

// Pops entries until one can be claimed. Entries whose owner already
// completed through another case are discarded on the way.
fn claim_next<T>(queue: &mut VecDeque<Waiter<T>>) -> Option<Waiter<T>> {
    while let Some(waiter) = queue.pop_front() {
        if waiter.claim() {
            return Some(waiter);
        }
    }
    None
}

impl<T> State<T> {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            senders: VecDeque::new(),
            receivers: VecDeque::new(),
            closed: false,
        }
    }

    pub fn try_send(&mut self, value: T) -> Result<(), T> {
        if self.closed {
            panic!("{}", SEND_ON_CLOSED);
        }

        // Direct handoff; the buffer is necessarily empty while receivers wait
        if let Some(receiver) = claim_next(&mut self.receivers) {
            *receiver.slot.lock() = Some(value);
            receiver.signal.finish();
            return Ok(());
        }

        if self.buffer.len() < self.capacity {
            self.buffer.push_back(value);
            return Ok(());
        }

        Err(value)
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if let Some(value) = self.buffer.pop_front() {
            self.refill();
            return Ok(value);
        }

        while let Some(sender) = claim_next(&mut self.senders) {
            let value = sender.slot.lock().take();
            sender.signal.finish();
            if let Some(value) = value {
                return Ok(value);
            }
        }

        if self.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    // A buffer slot just opened: the longest-waiting sender moves in.
    fn refill(&mut self) {
        if self.buffer.len() >= self.capacity {
            return;
        }
        while let Some(sender) = claim_next(&mut self.senders) {
            let value = sender.slot.lock().take();
            sender.signal.finish();
            if let Some(value) = value {
                self.buffer.push_back(value);
                return;
            }
        }
    }

    /// Puts back a value taken by a receiver that went away before seeing
    /// it. A waiting receiver gets it first; otherwise it goes to the head
    /// of the buffer, which may then hold one value over capacity.
    pub fn restore(&mut self, value: T) {
        if let Some(receiver) = claim_next(&mut self.receivers) {
            *receiver.slot.lock() = Some(value);
            receiver.signal.finish();
        } else {
            self.buffer.push_front(value);
        }
    }

    /// A closed channel counts as ready: committing then panics.
    pub fn can_send(&self, me: &Arc<Signal>) -> bool {
        self.closed
            || self.buffer.len() < self.capacity
            || self.receivers.iter().any(|w| w.is_live_peer_of(me))
    }

    pub fn can_recv(&self, me: &Arc<Signal>) -> bool {
        !self.buffer.is_empty() || self.closed || self.senders.iter().any(|w| w.is_live_peer_of(me))
    }

    pub fn park_sender(&mut self, waiter: Waiter<T>) {
        self.senders.push_back(waiter);
    }

    pub fn park_receiver(&mut self, waiter: Waiter<T>) {
        self.receivers.push_back(waiter);
    }

    pub fn withdraw(&mut self, signal: &Arc<Signal>) {
        self.senders.retain(|w| !w.belongs_to(signal));
        self.receivers.retain(|w| !w.belongs_to(signal));
    }

    // Returns how many blocked receivers and senders were woken.
    fn close(&mut self) -> (usize, usize) {
        if self.closed {
            panic!("{}", CLOSE_OF_CLOSED);
        }
        self.closed = true;

        // Receivers find their slot empty; senders find their value still
        // there and treat it as a send on a closed channel.
        let mut woken = (0, 0);
        for receiver in self.receivers.drain(..) {
            if receiver.claim() {
                receiver.signal.finish();
                woken.0 += 1;
            }
        }
        for sender in self.senders.drain(..) {
            if sender.claim() {
                sender.signal.finish();
                woken.1 += 1;
            }
        }
        woken
    }
}

/// A typed FIFO conduit between tasks.
///
/// A capacity of zero makes every send a rendezvous with a receiver; a
/// positive capacity lets up to that many values wait in the buffer.
/// Cloning a `Channel` yields another handle to the same channel.
///
/// Closing is the sender's job and happens once. Sending on a closed
/// channel or closing it twice panics. Receiving from a closed channel
/// drains what is buffered and then reports `None`.
pub struct Channel<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Channel")
            .field("len", &state.buffer.len())
            .field("cap", &state.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> Channel<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(capacity))),
        }
    }

    pub fn unbuffered() -> Self {
        Self::new(0)
    }

    /// Number of values waiting in the buffer.
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cap(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Marks the channel closed and wakes everyone blocked on it.
    ///
    /// # Panics
    ///
    /// Panics if the channel is already closed.
    pub fn close(&self) {
        let (receivers, senders) = self.state.lock().close();
        debug!(receivers, senders, "channel closed");
    }

    /// Sends without waiting.
    ///
    /// # Panics
    ///
    /// Panics if the channel is closed.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.state.lock().try_send(value).map_err(TrySendError)
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.state.lock().try_recv()
    }

    /// Sends without waiting, checking for close under the same lock.
    /// Returns `None` if the channel is closed, otherwise whether the value
    /// went through.
    pub(crate) fn offer(&self, value: T) -> Option<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        Some(state.try_send(value).is_ok())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock()
    }
}

impl<T: Send> Channel<T> {
    /// Waits until the value is buffered or taken by a receiver.
    ///
    /// # Panics
    ///
    /// Panics if the channel is closed, or gets closed while waiting.
    pub async fn send(&self, value: T) {
        Select::new().send(self, value, || ()).wait().await
    }

    /// Waits for the next value. `None` once the channel is closed and
    /// drained.
    ///
    /// Cancel safe: if the future is dropped after a sender handed it a
    /// value, the value goes back to the head of the channel.
    pub async fn recv(&self) -> Option<T> {
        Select::new().recv(self, |value| value).wait().await
    }

    /// Like [`recv`](Self::recv), but reports a closed channel as the
    /// default value paired with `false`.
    pub async fn recv_or_default(&self) -> (T, bool)
    where
        T: Default,
    {
        match self.recv().await {
            Some(value) => (value, true),
            None => (T::default(), false),
        }
    }

    /// Blocks the current thread. Not for use on a runtime worker thread.
    pub fn blocking_send(&self, value: T) {
        futures::executor::block_on(self.send(value))
    }

    /// Blocks the current thread. Not for use on a runtime worker thread.
    pub fn blocking_recv(&self) -> Option<T> {
        futures::executor::block_on(self.recv())
    }

    /// Values until the channel is closed and drained. A channel that is
    /// never closed never ends the stream. Dropping the stream mid-receive
    /// loses nothing, as with [`recv`](Self::recv).
    pub fn drain(&self) -> impl Stream<Item = T> + Send + 'static
    where
        T: 'static,
    {
        stream::unfold(self.clone(), |channel| async move {
            let value = channel.recv().await?;
            Some((value, channel))
        })
    }

    /// Thread-blocking counterpart of [`drain`](Self::drain).
    pub fn blocking_iter(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.blocking_recv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};
    use std::time::Duration;
    use tokio::time::timeout;

    const BRIEF: Duration = Duration::from_millis(50);

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fifo_for_each_capacity() {
        for capacity in [0, 1, 3, 64] {
            let channel = Channel::new(capacity);
            let producer = channel.clone();
            let sender = tokio::spawn(async move {
                for i in 0..200u32 {
                    producer.send(i).await;
                }
                producer.close();
            });

            let received: Vec<u32> = channel.drain().collect().await;
            sender.await.unwrap();
            assert_eq!(received, (0..200).collect::<Vec<_>>(), "capacity {}", capacity);
        }
    }

    #[tokio::test]
    async fn test_buffered_send_blocks_only_when_full() {
        let channel = Channel::new(3);
        for i in 0..3 {
            timeout(BRIEF, channel.send(i))
                .await
                .expect("send within capacity must not block");
        }
        assert_eq!(channel.len(), 3);
        assert_eq!(channel.cap(), 3);

        // The fourth send waits for room
        assert!(timeout(BRIEF, channel.send(3)).await.is_err());

        let producer = channel.clone();
        let blocked = tokio::spawn(async move { producer.send(3).await });
        tokio::task::yield_now().await;
        assert_eq!(channel.recv().await, Some(0));
        timeout(BRIEF, blocked).await.unwrap().unwrap();

        let rest: Vec<i32> = std::iter::from_fn(|| channel.try_recv().ok()).collect();
        assert_eq!(rest, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unbuffered_send_waits_for_receiver() {
        let channel = Channel::unbuffered();
        assert!(timeout(BRIEF, channel.send("lonely")).await.is_err());
        assert!(channel.is_empty());

        let producer = channel.clone();
        let sender = tokio::spawn(async move { producer.send("paired").await });
        assert_eq!(channel.recv().await, Some("paired"));
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_preserves_buffer_then_reports_closed() {
        let channel = Channel::new(2);
        channel.send("first").await;
        channel.send("second").await;
        channel.close();

        assert!(channel.is_closed());
        assert_eq!(channel.recv().await, Some("first"));
        assert_eq!(channel.recv().await, Some("second"));
        for _ in 0..3 {
            assert_eq!(channel.recv().await, None);
        }
        assert_eq!(channel.try_recv(), Err(TryRecvError::Closed));
    }

    #[tokio::test]
    async fn test_recv_or_default_reports_zero_value() {
        let channel = Channel::<i32>::new(1);
        channel.send(7).await;
        channel.close();
        assert_eq!(channel.recv_or_default().await, (7, true));
        assert_eq!(channel.recv_or_default().await, (0, false));
    }

    #[test]
    #[should_panic(expected = "close of closed channel")]
    fn test_double_close_panics() {
        let channel = Channel::<u8>::new(1);
        channel.close();
        channel.close();
    }

    #[tokio::test]
    #[should_panic(expected = "send on closed channel")]
    async fn test_send_after_close_panics() {
        let channel = Channel::new(4);
        channel.close();
        channel.send(1).await;
    }

    #[test]
    #[should_panic(expected = "send on closed channel")]
    fn test_try_send_after_close_panics() {
        let channel = Channel::new(4);
        channel.close();
        let _ = channel.try_send(1);
    }

    #[test]
    fn test_try_ops() {
        let channel = Channel::new(1);
        assert_eq!(channel.try_recv(), Err(TryRecvError::Empty));
        assert!(channel.try_send('a').is_ok());
        assert_eq!(channel.try_send('b').unwrap_err().into_inner(), 'b');
        assert_eq!(channel.try_recv(), Ok('a'));

        let unbuffered = Channel::unbuffered();
        assert!(unbuffered.try_send(1).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_wakes_blocked_receivers() {
        let channel = Channel::<u32>::unbuffered();
        let waiting: Vec<_> = (0..4)
            .map(|_| {
                let channel = channel.clone();
                tokio::spawn(async move { channel.recv().await })
            })
            .collect();

        tokio::time::sleep(BRIEF).await;
        channel.close();

        for receiver in waiting {
            let received = timeout(Duration::from_secs(1), receiver).await.unwrap().unwrap();
            assert_eq!(received, None);
        }
    }

    #[tokio::test]
    async fn test_close_fails_blocked_sender() {
        let channel = Channel::unbuffered();
        let producer = channel.clone();
        let sender = tokio::spawn(async move { producer.send(5u8).await });

        tokio::time::sleep(BRIEF).await;
        channel.close();

        let err = sender.await.unwrap_err();
        assert!(err.is_panic());
        // The stranded value is never delivered
        assert_eq!(channel.recv().await, None);
    }

    #[tokio::test]
    async fn test_blocked_sender_refills_buffer_in_order() {
        let channel = Channel::new(1);
        channel.send(1).await;

        let producer = channel.clone();
        let sender = tokio::spawn(async move { producer.send(2).await });
        tokio::task::yield_now().await;

        assert_eq!(channel.recv().await, Some(1));
        sender.await.unwrap();
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.recv().await, Some(2));
    }

    #[test]
    fn test_blocking_iter_across_threads() {
        let channel = Channel::new(8);
        let producer = channel.clone();
        let handle = std::thread::spawn(move || {
            for word in ["hello", "world"] {
                producer.blocking_send(word.to_string());
            }
            producer.close();
        });

        let words: Vec<String> = channel.blocking_iter().collect();
        handle.join().unwrap();
        assert_eq!(words, vec!["hello", "world"]);
    }

    #[test]
    fn test_clones_share_the_channel() {
        let a = Channel::<()>::new(2);
        let b = a.clone();

        b.try_send(()).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(format!("{:?}", a), "Channel { len: 1, cap: 2, closed: false }");
    }

    #[tokio::test]
    async fn test_cancelled_recv_gives_value_back() {
        let channel = Channel::unbuffered();
        let mut receiving = Box::pin(channel.recv());
        assert!((&mut receiving).now_or_never().is_none());

        channel.try_send(7).unwrap();
        drop(receiving);
        assert_eq!(channel.try_recv(), Ok(7));
        assert_eq!(channel.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_cancelled_recv_hands_value_to_next_receiver() {
        let channel = Channel::unbuffered();
        let mut first = Box::pin(channel.recv());
        let mut second = Box::pin(channel.recv());
        assert!((&mut first).now_or_never().is_none());
        assert!((&mut second).now_or_never().is_none());

        channel.try_send("only").unwrap();
        drop(first);
        assert_eq!(second.now_or_never(), Some(Some("only")));
    }

    #[tokio::test]
    async fn test_restored_value_keeps_unbuffered_capacity() {
        let channel = Channel::unbuffered();
        let mut receiving = Box::pin(channel.recv());
        assert!((&mut receiving).now_or_never().is_none());
        channel.try_send(7).unwrap();
        drop(receiving);

        let mut sending = Box::pin(channel.send(8));
        assert!((&mut sending).now_or_never().is_none());

        assert_eq!(channel.try_recv(), Ok(7));
        assert_eq!(channel.len(), 0);
        assert_eq!(channel.try_recv(), Ok(8));
        assert_eq!(sending.now_or_never(), Some(()));
    }
}
