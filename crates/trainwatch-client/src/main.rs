//! trainwatch: command-line client for the trainwatch training server

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::debug;
use trainwatch_client::{
    ChannelOptions, MetricOutput, RetryPolicy, RetryingClient, WatchOptions, watch,
};
use trainwatch_common::defaults::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_ENDPOINT, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use trainwatch_common::proto::non_empty;
use trainwatch_common::{RunPhase, StartStatus};

#[derive(Parser, Debug)]
#[command(name = "trainwatch")]
#[command(about = "Control a training run and watch its metrics")]
#[command(version)]
struct Args {
    /// Server endpoint
    #[arg(long, env = "TRAINWATCH_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Attempts per control call, including the first
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Wait before the first retry; doubles on each further retry
    #[arg(long, default_value_t = DEFAULT_BASE_DELAY_MS)]
    base_delay_ms: u64,

    /// Randomize retry waits
    #[arg(long)]
    jitter: bool,

    /// Per-request timeout for control calls
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the server's run state
    Status,

    /// Start a training run
    Start {
        /// Epochs to train (0 selects the server default)
        #[arg(short, long, default_value_t = 0)]
        epochs: i32,

        /// Confirm the start request
        #[arg(short, long)]
        yes: bool,
    },

    /// Stream metrics, optionally starting a run first
    Watch {
        /// Epochs to train when starting (0 selects the server default)
        #[arg(short, long, default_value_t = 0)]
        epochs: i32,

        /// Start a run before watching
        #[arg(long)]
        start: bool,

        /// Confirm the start request
        #[arg(short, long)]
        yes: bool,

        /// Stop after this many events
        #[arg(long)]
        max_events: Option<u64>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let policy = RetryPolicy {
        max_retries: args.max_retries.max(1),
        base_delay: Duration::from_millis(args.base_delay_ms),
        jitter: args.jitter,
        ..RetryPolicy::default()
    };
    let request_timeout = Duration::from_secs(args.timeout_secs);
    debug!(endpoint = %args.endpoint, ?policy, ?request_timeout, "Client configured");

    // One channel without a channel-level deadline serves the metric stream;
    // control calls carry their own per-request deadline.
    let client =
        RetryingClient::connect(&args.endpoint, ChannelOptions::for_streaming(), policy)?
            .with_request_timeout(request_timeout);

    match args.command {
        Command::Status => {
            let status = client
                .status()
                .await
                .map_err(|e| anyhow!("Status failed: {}", e.message()))?;

            println!("state:    {}", status.state);
            println!("message:  {}", status.message);
            if RunPhase::parse(&status.state) == Some(RunPhase::Training) {
                println!(
                    "epoch:    {} of {}",
                    status.current_epoch + 1,
                    status.epochs_requested
                );
            }
            if let Some(outcome) = non_empty(status.last_outcome) {
                println!("last run: {}", outcome);
            }
            println!("watchers: {}", status.subscribers);
        }
        Command::Start { epochs, yes } => {
            let reply = client
                .start(epochs, yes)
                .await
                .map_err(|e| anyhow!("Start failed: {}", e.message()))?;

            println!("{}: {}", reply.status, reply.message);
            match StartStatus::parse(&reply.status) {
                Some(status) if status.is_running() => {}
                Some(_) => bail!("Run not started; pass --yes to confirm"),
                None => bail!("Unexpected start status '{}'", reply.status),
            }
        }
        Command::Watch {
            epochs,
            start,
            yes,
            max_events,
            json,
        } => {
            let options = WatchOptions {
                start,
                epochs,
                confirmed: yes,
                max_events,
                output: MetricOutput::Stdout { json },
            };
            let summary = watch(&client, options).await?;
            eprintln!("{} events received", summary.events);
        }
    }

    Ok(())
}
