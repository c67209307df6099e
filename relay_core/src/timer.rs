// Time as a channel: one-shot and periodic event sources that plug into
// Select like any other receive case.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

use crate::channel::Channel;

fn spawn_after(duration: Duration) -> (Channel<Instant>, JoinHandle<()>) {
    let channel = Channel::new(1);
    let sender = channel.clone();
    let task = tokio::spawn(async move {
        time::sleep(duration).await;
        if sender.offer(Instant::now()).is_none() {
            trace!("timer fired on a closed channel");
        }
    });
    (channel, task)
}

/// A channel that receives the current instant once `duration` has passed.
/// The sending task runs to completion even if nobody reads.
pub fn after(duration: Duration) -> Channel<Instant> {
    spawn_after(duration).0
}

/// One-shot timer whose task is cancelled when the timer is dropped.
#[derive(Debug)]
pub struct Timer {
    channel: Channel<Instant>,
    task: JoinHandle<()>,
}

impl Timer {
    pub fn new(duration: Duration) -> Self {
        let (channel, task) = spawn_after(duration);
        Self { channel, task }
    }

    pub fn channel(&self) -> &Channel<Instant> {
        &self.channel
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Delivers the current instant every `period`.
///
/// The channel holds one tick. Ticks that arrive while it is still unread
/// are dropped, so a slow reader sees gaps instead of a backlog.
#[derive(Debug)]
pub struct Ticker {
    channel: Channel<Instant>,
    task: JoinHandle<()>,
}

impl Ticker {
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn new(period: Duration) -> Self {
        assert!(!period.is_zero(), "ticker period must be non-zero");

        let channel = Channel::new(1);
        let sender = channel.clone();
        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let at = interval.tick().await;
                match sender.offer(at) {
                    Some(true) => {}
                    Some(false) => trace!("tick dropped, reader is behind"),
                    None => break,
                }
            }
        });
        Self { channel, task }
    }

    pub fn channel(&self) -> &Channel<Instant> {
        &self.channel
    }

    /// No ticks are delivered after this returns. A tick already buffered
    /// stays readable.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TryRecvError;
    use futures::FutureExt;

    #[tokio::test(start_paused = true)]
    async fn test_after_fires_once() {
        let start = Instant::now();
        let fired = after(Duration::from_millis(500));
        let at = fired.recv().await.unwrap();
        assert!(at - start >= Duration::from_millis(500));

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let timer = Timer::new(Duration::from_millis(100));
        let channel = timer.channel().clone();
        drop(timer);

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(channel.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_ticks_until_stopped() {
        let start = Instant::now();
        let ticker = Ticker::new(Duration::from_millis(100));

        let mut ticks = Vec::new();
        for _ in 0..3 {
            ticks.push(ticker.channel().recv().await.unwrap());
        }
        assert!(ticks[0] - start >= Duration::from_millis(100));
        for pair in ticks.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(100));
        }

        ticker.stop();
        let _ = ticker.channel().try_recv();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticker.channel().try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reader_sees_one_buffered_tick() {
        let ticker = Ticker::new(Duration::from_millis(10));
        time::sleep(Duration::from_millis(105)).await;
        assert_eq!(ticker.channel().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_quietly_when_reader_closes() {
        let mut ticker = Ticker::new(Duration::from_millis(10));
        ticker.channel().close();
        time::sleep(Duration::from_millis(100)).await;

        let outcome = (&mut ticker.task).now_or_never();
        assert!(matches!(outcome, Some(Ok(()))), "{:?}", outcome);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_quietly_on_closed_channel() {
        let mut timer = Timer::new(Duration::from_millis(10));
        timer.channel().close();
        time::sleep(Duration::from_millis(100)).await;

        let outcome = (&mut timer.task).now_or_never();
        assert!(matches!(outcome, Some(Ok(()))), "{:?}", outcome);
    }

    #[tokio::test]
    #[should_panic(expected = "ticker period must be non-zero")]
    async fn test_zero_period_panics() {
        Ticker::new(Duration::ZERO);
    }
}
