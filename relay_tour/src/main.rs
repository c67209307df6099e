mod tour;

use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use tour::Scenario;
use tracing::Level;

/// Relay walkthrough options
#[derive(Parser)]
#[command(version, about = "Walk through channel, select and dispatch patterns")]
struct Opts {
    /// Print each report as a line of JSON
    #[arg(long)]
    json: bool,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sum the primes 2..13 with one worker per segment
    Sum {
        #[arg(short, long, default_value_t = tour::SUM_WORKERS)]
        workers: usize,
    },
    /// Receive from a channel that is already closed
    Closed,
    /// Range over closed buffered channels
    Drain,
    /// Select between two portals that answer after different delays
    Race {
        #[arg(long, default_value_t = tour::RACE_FIRST_MS)]
        first_ms: u64,
        #[arg(long, default_value_t = tour::RACE_SECOND_MS)]
        second_ms: u64,
    },
    /// Tick until the boom, idling in between
    Timers {
        #[arg(long, default_value_t = tour::TICK_MS)]
        tick_ms: u64,
        #[arg(long, default_value_t = tour::BOOM_MS)]
        boom_ms: u64,
        #[arg(long, default_value_t = tour::IDLE_MS)]
        idle_ms: u64,
    },
    /// Print fibonacci numbers until the printer says quit
    Fibonacci {
        #[arg(short, long, default_value_t = tour::FIBONACCI_COUNT)]
        count: usize,
    },
    /// Two tasks greeting in turns
    Greet {
        #[arg(short, long, default_value_t = tour::GREET_ROUNDS)]
        rounds: usize,
        #[arg(long, default_value_t = tour::GREET_PAUSE_MS)]
        pause_ms: u64,
    },
    /// Every scenario in order
    All,
}

impl Command {
    fn scenarios(self) -> Vec<Scenario> {
        let scenario = match self {
            Command::Sum { workers } => Scenario::Sum { workers },
            Command::Closed => Scenario::Closed,
            Command::Drain => Scenario::Drain,
            Command::Race { first_ms, second_ms } => Scenario::Race {
                first: Duration::from_millis(first_ms),
                second: Duration::from_millis(second_ms),
            },
            Command::Timers {
                tick_ms,
                boom_ms,
                idle_ms,
            } => Scenario::Timers {
                tick: Duration::from_millis(tick_ms),
                boom: Duration::from_millis(boom_ms),
                idle: Duration::from_millis(idle_ms),
            },
            Command::Fibonacci { count } => Scenario::Fibonacci { count },
            Command::Greet { rounds, pause_ms } => Scenario::Greet {
                rounds,
                pause: Duration::from_millis(pause_ms),
            },
            Command::All => return Scenario::all(),
        };
        vec![scenario]
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_logging(opts.verbose);

    for scenario in opts.command.scenarios() {
        let report = scenario.run().await?;
        if opts.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            println!("{}", report);
        }
    }

    Ok(())
}
