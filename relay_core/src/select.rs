//! Waiting on several channel operations at once.
//!
//! A [`Select`] collects send and receive cases, each with a continuation
//! that turns its outcome into a common output type. [`Select::wait`]
//! commits exactly one case. When several are ready at the same moment the
//! winner is picked uniformly at random, so no channel can starve another
//! by being declared first.
//!
//! ```no_run
//! use relay_core::{Channel, Select};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let numbers = Channel::<u64>::unbuffered();
//! let quit = Channel::<()>::unbuffered();
//!
//! enum Event { Sent, Quit, Slow }
//!
//! let event = Select::new()
//!     .send(&numbers, 42, || Event::Sent)
//!     .recv(&quit, |_| Event::Quit)
//!     .timeout(Duration::from_millis(100), || Event::Slow)
//!     .wait()
//!     .await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::trace;

use crate::channel::{Channel, Waiter};
use crate::error::{TryRecvError, SEND_ON_CLOSED};
use crate::signal::{Signal, WITHDRAWN};
use crate::timer::Timer;

/// One pending operation inside a select.
pub(crate) trait Case<O>: Send {
    /// Runs the operation if the channel can proceed right now.
    fn try_commit(&mut self) -> Option<O>;

    /// Parks a waiter on the channel. Returns `false`, without parking, if
    /// the channel became ready in the meantime.
    fn register(&mut self, signal: &Arc<Signal>, index: usize) -> bool;

    fn withdraw(&mut self, signal: &Arc<Signal>);

    /// Finishes the operation after a peer committed it through the signal.
    fn complete(&mut self) -> O;

    /// Undoes a commit the select will never complete.
    fn restore(&mut self) {}
}

struct SendCase<T, F> {
    channel: Channel<T>,
    slot: Arc<Mutex<Option<T>>>,
    then: Option<F>,
}

impl<T, O, F> SendCase<T, F>
where
    F: FnOnce() -> O,
{
    fn finish(&mut self) -> O {
        match self.then.take() {
            Some(then) => then(),
            None => unreachable!("select case completed twice"),
        }
    }
}

impl<T, O, F> Case<O> for SendCase<T, F>
where
    T: Send,
    F: FnOnce() -> O + Send,
{
    fn try_commit(&mut self) -> Option<O> {
        let value = self.slot.lock().take()?;
        let result = self.channel.lock().try_send(value);
        match result {
            Ok(()) => Some(self.finish()),
            Err(value) => {
                *self.slot.lock() = Some(value);
                None
            }
        }
    }

    fn register(&mut self, signal: &Arc<Signal>, index: usize) -> bool {
        let mut state = self.channel.lock();
        if state.can_send(signal) {
            return false;
        }
        state.park_sender(Waiter {
            signal: signal.clone(),
            case: index,
            slot: self.slot.clone(),
        });
        true
    }

    fn withdraw(&mut self, signal: &Arc<Signal>) {
        self.channel.lock().withdraw(signal);
    }

    fn complete(&mut self) -> O {
        // A receiver empties the slot; close leaves the value behind
        if self.slot.lock().take().is_some() {
            panic!("{}", SEND_ON_CLOSED);
        }
        self.finish()
    }
}

struct RecvCase<T, F> {
    channel: Channel<T>,
    slot: Arc<Mutex<Option<T>>>,
    then: Option<F>,
}

impl<T, O, F> RecvCase<T, F>
where
    F: FnOnce(Option<T>) -> O,
{
    fn new(channel: &Channel<T>, then: F) -> Self {
        Self {
            channel: channel.clone(),
            slot: Arc::new(Mutex::new(None)),
            then: Some(then),
        }
    }

    fn finish(&mut self, value: Option<T>) -> O {
        match self.then.take() {
            Some(then) => then(value),
            None => unreachable!("select case completed twice"),
        }
    }
}

impl<T, O, F> Case<O> for RecvCase<T, F>
where
    T: Send,
    F: FnOnce(Option<T>) -> O + Send,
{
    fn try_commit(&mut self) -> Option<O> {
        let received = self.channel.lock().try_recv();
        match received {
            Ok(value) => Some(self.finish(Some(value))),
            Err(TryRecvError::Closed) => Some(self.finish(None)),
            Err(TryRecvError::Empty) => None,
        }
    }

    fn register(&mut self, signal: &Arc<Signal>, index: usize) -> bool {
        let mut state = self.channel.lock();
        if state.can_recv(signal) {
            return false;
        }
        state.park_receiver(Waiter {
            signal: signal.clone(),
            case: index,
            slot: self.slot.clone(),
        });
        true
    }

    fn withdraw(&mut self, signal: &Arc<Signal>) {
        self.channel.lock().withdraw(signal);
    }

    fn complete(&mut self) -> O {
        // Empty slot means the channel was closed
        let value = self.slot.lock().take();
        self.finish(value)
    }

    fn restore(&mut self) {
        let value = self.slot.lock().take();
        if let Some(value) = value {
            trace!("receive cancelled after handoff, value returned");
            self.channel.lock().restore(value);
        }
    }
}

type Continuation<'a, O> = Box<dyn FnOnce() -> O + Send + 'a>;

/// A set of channel operations of which exactly one will run.
pub struct Select<'a, O> {
    cases: Vec<Box<dyn Case<O> + 'a>>,
    otherwise: Option<Continuation<'a, O>>,
    timeout: Option<(Duration, Continuation<'a, O>)>,
}

impl<'a, O: 'a> Default for Select<'a, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, O: 'a> Select<'a, O> {
    pub fn new() -> Self {
        Self {
            cases: Vec::new(),
            otherwise: None,
            timeout: None,
        }
    }

    /// Adds a case that sends `value` on `channel`, then runs `then`.
    ///
    /// If this case is not chosen, `value` is dropped.
    pub fn send<T, F>(mut self, channel: &Channel<T>, value: T, then: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce() -> O + Send + 'a,
    {
        self.cases.push(Box::new(SendCase {
            channel: channel.clone(),
            slot: Arc::new(Mutex::new(Some(value))),
            then: Some(then),
        }));
        self
    }

    /// Adds a case that receives from `channel` and hands the result to
    /// `then`, `None` meaning the channel is closed and drained.
    pub fn recv<T, F>(mut self, channel: &Channel<T>, then: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce(Option<T>) -> O + Send + 'a,
    {
        self.cases.push(Box::new(RecvCase::new(channel, then)));
        self
    }

    /// Runs `then` instead of blocking when no case is ready.
    pub fn otherwise<F>(mut self, then: F) -> Self
    where
        F: FnOnce() -> O + Send + 'a,
    {
        self.otherwise = Some(Box::new(then));
        self
    }

    /// Gives up after `after` and runs `then`. The timer behaves like one
    /// more receive case, so it competes fairly with the others.
    pub fn timeout<F>(mut self, after: Duration, then: F) -> Self
    where
        F: FnOnce() -> O + Send + 'a,
    {
        self.timeout = Some((after, Box::new(then)));
        self
    }

    /// Commits one case and returns its continuation's output.
    ///
    /// A select with no cases, no fallback and no timeout never returns.
    /// Dropping the future before it resolves withdraws every pending
    /// registration. A value a sender already handed to it goes back to the
    /// head of its channel; a value it was sending may still have been
    /// delivered.
    pub async fn wait(mut self) -> O {
        let _timer = match self.timeout.take() {
            Some((after, then)) => {
                let timer = Timer::new(after);
                self.cases
                    .push(Box::new(RecvCase::new(timer.channel(), move |_| then())));
                Some(timer)
            }
            None => None,
        };

        if self.cases.is_empty() && self.otherwise.is_none() {
            return std::future::pending().await;
        }

        loop {
            let order = shuffled(self.cases.len());
            for &index in &order {
                if let Some(output) = self.cases[index].try_commit() {
                    return output;
                }
            }

            if let Some(otherwise) = self.otherwise.take() {
                return otherwise();
            }

            let signal = Signal::new();
            let mut parked = Parked {
                cases: &mut self.cases,
                signal: signal.clone(),
                registered: true,
            };

            // Something became ready while parking: start over
            if !parked.register(&order) && parked.withdraw() {
                trace!("select raced with a peer, retrying");
                continue;
            }

            trace!(cases = order.len(), "select parked");
            let index = signal.fired().await;
            return parked.complete(index);
        }
    }
}

fn shuffled(len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(&mut rand::thread_rng());
    order
}

// Registrations of one blocked select across all its channels.
struct Parked<'s, 'a, O> {
    cases: &'s mut Vec<Box<dyn Case<O> + 'a>>,
    signal: Arc<Signal>,
    registered: bool,
}

impl<O> Parked<'_, '_, O> {
    fn register(&mut self, order: &[usize]) -> bool {
        for &index in order {
            if !self.cases[index].register(&self.signal, index) {
                return false;
            }
        }
        true
    }

    /// Returns `true` if nobody had committed a case yet. Otherwise the
    /// committed case still has to be completed.
    fn withdraw(&mut self) -> bool {
        let cancelled = self.signal.claim(WITHDRAWN);
        self.remove_all();
        cancelled
    }

    fn remove_all(&mut self) {
        if self.registered {
            for case in self.cases.iter_mut() {
                case.withdraw(&self.signal);
            }
            self.registered = false;
        }
    }

    fn complete(mut self, index: usize) -> O {
        self.remove_all();
        self.cases[index].complete()
    }
}

impl<O> Drop for Parked<'_, '_, O> {
    fn drop(&mut self) {
        if self.registered {
            self.withdraw();
        }
        // Only a receive that a peer committed still holds a value here
        for case in self.cases.iter_mut() {
            case.restore();
        }
    }
}
