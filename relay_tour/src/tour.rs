use std::fmt::{self, Display};
use std::time::Duration;

use futures::StreamExt;
use relay_core::{
    consume, contiguous, dispatch, fibonacci, gather, go, Channel, Producer, ProducerReport,
    Select, Ticker,
};
use serde::Serialize;
use tokio::time::sleep;
use tracing::info;

pub const PRIMES: [i64; 6] = [2, 3, 5, 7, 11, 13];

pub const SUM_WORKERS: usize = 2;
pub const RACE_FIRST_MS: u64 = 3_000;
pub const RACE_SECOND_MS: u64 = 9_000;
pub const TICK_MS: u64 = 100;
pub const BOOM_MS: u64 = 500;
pub const IDLE_MS: u64 = 50;
pub const FIBONACCI_COUNT: usize = 10;
pub const GREET_ROUNDS: usize = 5;
pub const GREET_PAUSE_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    Sum { workers: usize },
    Closed,
    Drain,
    Race { first: Duration, second: Duration },
    Timers { tick: Duration, boom: Duration, idle: Duration },
    Fibonacci { count: usize },
    Greet { rounds: usize, pause: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialSum {
    pub worker: usize,
    pub segment: Vec<i64>,
    pub sum: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scenario", rename_all = "snake_case")]
pub enum Report {
    Sum { partials: Vec<PartialSum>, total: i64 },
    Closed { value: i64, ok: bool },
    Drain { queue: Vec<String>, buffered: Vec<u32> },
    Race { winner: String },
    Timers { ticks: u32, idles: u32 },
    Fibonacci { received: Vec<u64>, producer: ProducerReport },
    Greet { lines: Vec<String> },
}

impl Scenario {
    /// Every scenario in walkthrough order with its default settings.
    pub fn all() -> Vec<Scenario> {
        vec![
            Scenario::Sum { workers: SUM_WORKERS },
            Scenario::Closed,
            Scenario::Drain,
            Scenario::Race {
                first: Duration::from_millis(RACE_FIRST_MS),
                second: Duration::from_millis(RACE_SECOND_MS),
            },
            Scenario::Timers {
                tick: Duration::from_millis(TICK_MS),
                boom: Duration::from_millis(BOOM_MS),
                idle: Duration::from_millis(IDLE_MS),
            },
            Scenario::Fibonacci { count: FIBONACCI_COUNT },
            Scenario::Greet {
                rounds: GREET_ROUNDS,
                pause: Duration::from_millis(GREET_PAUSE_MS),
            },
        ]
    }

    pub async fn run(self) -> anyhow::Result<Report> {
        match self {
            Scenario::Sum { workers } => sum(workers).await,
            Scenario::Closed => Ok(closed().await),
            Scenario::Drain => Ok(drain().await),
            Scenario::Race { first, second } => race(first, second).await,
            Scenario::Timers { tick, boom, idle } => Ok(timers(tick, boom, idle).await),
            Scenario::Fibonacci { count } => fibonacci_until_quit(count).await,
            Scenario::Greet { rounds, pause } => greet(rounds, pause).await,
        }
    }
}

async fn sum(workers: usize) -> anyhow::Result<Report> {
    let results = Channel::unbuffered();
    dispatch(
        workers,
        PRIMES.to_vec(),
        contiguous,
        |segment: &[i64]| {
            info!(?segment, "summing segment");
            segment.iter().sum::<i64>()
        },
        &results,
    )?;

    info!("waiting for partial sums");
    let mut partials = Vec::with_capacity(workers);
    for partial in gather(workers, &results).await? {
        partials.push(PartialSum {
            worker: partial.worker,
            segment: PRIMES[partial.segment].to_vec(),
            sum: partial.outcome?,
        });
    }
    info!("partial sums received");
    results.close();

    partials.sort_by_key(|p| p.worker);
    let total = partials.iter().map(|p| p.sum).sum();
    Ok(Report::Sum { partials, total })
}

async fn closed() -> Report {
    let channel = Channel::<i64>::unbuffered();
    channel.close();

    let (value, ok) = channel.recv_or_default().await;
    if !ok {
        info!("channel has been closed already");
    }
    Report::Closed { value, ok }
}

async fn drain() -> Report {
    let queue = Channel::new(2);
    queue.send("first".to_string()).await;
    queue.send("second".to_string()).await;
    queue.close();
    let queue: Vec<String> = queue.drain().collect().await;

    let buffered = Channel::new(100);
    for s in 0..50 {
        buffered.send(s).await;
    }
    info!(len = buffered.len(), cap = buffered.cap(), "buffered channel filled");
    buffered.close();
    let buffered: Vec<u32> = buffered.drain().collect().await;

    Report::Drain { queue, buffered }
}

async fn race(first: Duration, second: Duration) -> anyhow::Result<Report> {
    let portal1 = Channel::unbuffered();
    let portal2 = Channel::unbuffered();

    for (portal, delay, greeting) in [
        (portal1.clone(), first, "Welcome to channel 1"),
        (portal2.clone(), second, "Welcome to channel 2"),
    ] {
        go("portal", async move {
            sleep(delay).await;
            portal.send(greeting.to_string()).await;
        });
    }

    let winner = Select::new()
        .recv(&portal1, |greeting| greeting)
        .recv(&portal2, |greeting| greeting)
        .wait()
        .await
        .ok_or_else(|| anyhow::anyhow!("portal closed without a greeting"))?;
    info!("{}", winner);
    Ok(Report::Race { winner })
}

async fn timers(tick: Duration, boom: Duration, idle: Duration) -> Report {
    enum Beat {
        Tick,
        Boom,
        Idle,
    }

    let ticker = Ticker::new(tick);
    let boom = relay_core::after(boom);
    let (mut ticks, mut idles) = (0, 0);

    // The fallback branch makes this a polling loop; it sleeps to keep the
    // spin rate down.
    loop {
        let beat = Select::new()
            .recv(ticker.channel(), |_| Beat::Tick)
            .recv(&boom, |_| Beat::Boom)
            .otherwise(|| Beat::Idle)
            .wait()
            .await;
        match beat {
            Beat::Tick => {
                info!("tick.");
                ticks += 1;
            }
            Beat::Boom => {
                info!("BOOM!");
                break;
            }
            Beat::Idle => {
                info!("def .");
                idles += 1;
                sleep(idle).await;
            }
        }
    }
    Report::Timers { ticks, idles }
}

async fn fibonacci_until_quit(count: usize) -> anyhow::Result<Report> {
    let numbers = Channel::unbuffered();
    let flag = Channel::unbuffered();

    let printer = {
        let (numbers, flag) = (numbers.clone(), flag.clone());
        go("print-fibonacci", async move {
            let received = consume(count, &numbers, &flag, 0u8).await;
            for value in &received {
                info!("{}", value);
            }
            received
        })
    };

    let mut producer = Producer::new(fibonacci());
    let report = producer.run(&numbers, &flag).await;
    info!("quit");

    let received = printer.await?;
    Ok(Report::Fibonacci {
        received,
        producer: report,
    })
}

async fn say(word: &'static str, rounds: usize, pause: Duration, lines: Channel<String>) {
    for _ in 0..rounds {
        sleep(pause).await;
        info!("{}", word);
        lines.send(word.to_string()).await;
    }
}

async fn greet(rounds: usize, pause: Duration) -> anyhow::Result<Report> {
    let lines = Channel::new(rounds * 2);

    let world = go("say", say("world", rounds, pause, lines.clone()));
    say("hello", rounds, pause, lines.clone()).await;
    world.await?;

    lines.close();
    let lines: Vec<String> = lines.drain().collect().await;
    Ok(Report::Greet { lines })
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Sum { partials, total } => {
                for partial in partials {
                    writeln!(
                        f,
                        "Partial Sum{}: {} {:?}",
                        partial.worker + 1,
                        partial.sum,
                        partial.segment
                    )?;
                }
                write!(f, "Total: {}", total)
            }
            Report::Closed { value, ok } => {
                if *ok {
                    write!(f, "Channel open, received {}", value)
                } else {
                    write!(f, "Channel closed, received zero value {}", value)
                }
            }
            Report::Drain { queue, buffered } => {
                writeln!(f, "{}", queue.join(" "))?;
                let buffered: Vec<String> = buffered.iter().map(u32::to_string).collect();
                write!(f, "{}", buffered.join(" "))
            }
            Report::Race { winner } => write!(f, "{}", winner),
            Report::Timers { ticks, idles } => {
                write!(f, "{} ticks and {} idle rounds before the boom", ticks, idles)
            }
            Report::Fibonacci { received, producer } => {
                let values: Vec<String> = received.iter().map(u64::to_string).collect();
                writeln!(f, "{}", values.join(" "))?;
                write!(
                    f,
                    "producer generated {} and delivered {}",
                    producer.generated, producer.delivered
                )
            }
            Report::Greet { lines } => write!(f, "{}", lines.join("\n")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sum_of_primes() {
        let report = Scenario::Sum { workers: 2 }.run().await.unwrap();
        let Report::Sum { partials, total } = report else {
            panic!("wrong report");
        };
        assert_eq!(total, 41);
        assert_eq!(partials[0].segment, vec![2, 3, 5]);
        assert_eq!(partials[0].sum, 10);
        assert_eq!(partials[1].sum, 31);
    }

    #[tokio::test]
    async fn test_zero_workers_is_an_error() {
        assert!(Scenario::Sum { workers: 0 }.run().await.is_err());
    }

    #[tokio::test]
    async fn test_closed_and_drain() {
        assert_eq!(
            Scenario::Closed.run().await.unwrap(),
            Report::Closed { value: 0, ok: false }
        );

        let Report::Drain { queue, buffered } = Scenario::Drain.run().await.unwrap() else {
            panic!("wrong report");
        };
        assert_eq!(queue, vec!["first", "second"]);
        assert_eq!(buffered, (0..50).collect::<Vec<u32>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_and_timers_with_default_settings() {
        let race = Scenario::Race {
            first: Duration::from_millis(RACE_FIRST_MS),
            second: Duration::from_millis(RACE_SECOND_MS),
        };
        assert_eq!(
            race.run().await.unwrap(),
            Report::Race {
                winner: "Welcome to channel 1".to_string()
            }
        );

        let timers = Scenario::Timers {
            tick: Duration::from_millis(TICK_MS),
            boom: Duration::from_millis(BOOM_MS),
            idle: Duration::from_millis(IDLE_MS),
        };
        let Report::Timers { ticks, idles } = timers.run().await.unwrap() else {
            panic!("wrong report");
        };
        assert!((4..=5).contains(&ticks), "{} ticks", ticks);
        assert!(idles > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fibonacci_report() {
        let Report::Fibonacci { received, producer } =
            Scenario::Fibonacci { count: 10 }.run().await.unwrap()
        else {
            panic!("wrong report");
        };
        assert_eq!(received, vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
        assert_eq!(producer.delivered, 10);
        assert!(producer.generated <= 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_greet_interleaves_both_words() {
        let Report::Greet { lines } = Scenario::Greet {
            rounds: 3,
            pause: Duration::from_millis(100),
        }
        .run()
        .await
        .unwrap() else {
            panic!("wrong report");
        };
        assert_eq!(lines.len(), 6);
        assert_eq!(lines.iter().filter(|l| *l == "hello").count(), 3);
        assert_eq!(lines.iter().filter(|l| *l == "world").count(), 3);
    }

    #[test]
    fn test_report_serializes_with_scenario_tag() {
        let json = serde_json::to_string(&Report::Race {
            winner: "Welcome to channel 1".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"scenario":"race","winner":"Welcome to channel 1"}"#
        );
    }

    #[test]
    fn test_all_runs_every_scenario_once() {
        let all = Scenario::all();
        assert_eq!(all.len(), 7);
        assert_eq!(all[0], Scenario::Sum { workers: SUM_WORKERS });
    }
}
