use serde::Serialize;
use tracing::debug;

use crate::channel::Channel;
use crate::select::Select;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProducerState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerReport {
    /// Values produced by the generator, including one that may have been
    /// pending when quit arrived.
    pub generated: u64,
    /// Values a consumer actually received.
    pub delivered: u64,
}

/// A generator loop that can be stopped from outside.
///
/// Every step offers the next value on the data channel and listens on the
/// quit channel at the same time. Quit, or a closed quit channel, moves the
/// producer to `Stopped`.
pub struct Producer<G> {
    generate: G,
    state: ProducerState,
    report: ProducerReport,
}

impl<G> Producer<G> {
    pub fn new(generate: G) -> Self {
        Self {
            generate,
            state: ProducerState::Running,
            report: ProducerReport::default(),
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// Runs until quit fires. Never returns if nobody signals quit.
    pub async fn run<T, Q>(&mut self, data: &Channel<T>, quit: &Channel<Q>) -> ProducerReport
    where
        G: FnMut() -> T,
        T: Send,
        Q: Send,
    {
        enum Step {
            Sent,
            Quit,
        }

        while self.state == ProducerState::Running {
            let value = (self.generate)();
            self.report.generated += 1;

            let step = Select::new()
                .send(data, value, || Step::Sent)
                .recv(quit, |_| Step::Quit)
                .wait()
                .await;

            match step {
                Step::Sent => self.report.delivered += 1,
                Step::Quit => {
                    self.state = ProducerState::Stopped;
                    debug!(
                        generated = self.report.generated,
                        delivered = self.report.delivered,
                        "producer stopped"
                    );
                }
            }
        }
        self.report
    }
}

/// Receives `count` values from `data`, then sends `sentinel` on `quit`.
///
/// If `data` closes first the values so far are returned and no quit
/// signal is sent, since nobody is left to hear it.
pub async fn consume<T, Q>(
    count: usize,
    data: &Channel<T>,
    quit: &Channel<Q>,
    sentinel: Q,
) -> Vec<T>
where
    T: Send,
    Q: Send,
{
    let mut received = Vec::with_capacity(count);
    while received.len() < count {
        match data.recv().await {
            Some(value) => received.push(value),
            None => return received,
        }
    }
    quit.send(sentinel).await;
    received
}

/// 0, 1, 1, 2, 3, 5, ... wrapping on overflow.
pub fn fibonacci() -> impl FnMut() -> u64 + Send {
    let (mut x, mut y) = (0u64, 1u64);
    move || {
        let current = x;
        (x, y) = (y, x.wrapping_add(y));
        current
    }
}
