//! Binary entry point for tally.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// CLI output goes to stdout and stderr
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tally::bench::{BenchConfig, RetryPolicy, Strategy};
use tally::cli::{self, OutputFormat, StrategySelection};
use tally::config::TallyConfig;
use tally::http::LoadConfig;
use tally::observability::{self, InitOptions, ObservabilityConfig};

/// Tally - a concurrent counter and concurrency-control benchmark.
#[derive(Parser)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Increment the counter.
    Inc {
        /// Number of increments.
        #[arg(short = 'n', long, default_value = "1")]
        times: u64,
    },

    /// Print the current value.
    Get,

    /// Reset counter and version (sqlite, postgres).
    Reset,

    /// Concurrent in-process increments with a consistency check.
    Stress {
        /// Concurrent workers.
        #[arg(short, long, default_value = "10")]
        workers: usize,

        /// Increments per worker.
        #[arg(short, long, default_value = "1000")]
        increments: usize,

        /// Output format: text or json.
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Concurrency-control benchmark.
    Bench {
        /// Strategy name, or `all`.
        #[arg(short, long, default_value = "all")]
        strategy: StrategySelection,

        /// Concurrent workers (default from config).
        #[arg(short, long)]
        workers: Option<usize>,

        /// Transactions per worker (default from config).
        #[arg(short, long)]
        transactions: Option<usize>,

        /// Sleep between serializable retries, in milliseconds.
        #[arg(long)]
        backoff_ms: Option<u64>,

        /// Attempts per transaction before a retrying strategy gives up.
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Output format: text or json.
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show configuration.
    Config {
        /// Print the effective configuration.
        #[arg(long)]
        show: bool,
    },

    /// Serve the counter over HTTP.
    Serve {
        /// Bind address (default from config).
        #[arg(long)]
        host: Option<String>,

        /// Bind port (default from config).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Drive a running counter server.
    Load {
        /// Server base URL (default from config).
        #[arg(short, long)]
        url: Option<String>,

        /// Concurrency level; repeat for several rounds.
        #[arg(long)]
        clients: Vec<usize>,

        /// Requests per client per round.
        #[arg(short, long)]
        requests: Option<usize>,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match TallyConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let options = InitOptions {
        verbose: cli.verbose,
        metrics_expose: matches!(cli.command, Commands::Serve { .. }),
    };
    let _observability = match ObservabilityConfig::from_config(&config, options)
        .and_then(observability::init)
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: &TallyConfig) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let result = match command {
        Commands::Inc { times } => cli::cmd_inc(config, times, &mut out),

        Commands::Get => cli::cmd_get(config, &mut out),

        Commands::Reset => cli::cmd_reset(config, &mut out),

        Commands::Stress {
            workers,
            increments,
            format,
        } => cli::cmd_stress(
            config,
            workers,
            increments,
            OutputFormat::parse(&format),
            &mut out,
        ),

        Commands::Bench {
            strategy,
            workers,
            transactions,
            backoff_ms,
            max_attempts,
            format,
        } => {
            let settings = &config.bench;
            let run = BenchConfig::new(
                Strategy::InPlace,
                workers.unwrap_or(settings.workers),
                transactions.unwrap_or(settings.transactions_per_worker),
            )?
            .with_retry(RetryPolicy {
                backoff: Duration::from_millis(backoff_ms.unwrap_or(settings.backoff_ms)),
                max_attempts: max_attempts.unwrap_or(settings.max_attempts),
            });
            cli::cmd_bench(config, strategy, run, OutputFormat::parse(&format), &mut out)
        },

        Commands::Config { show } => cli::cmd_config(config, show, &mut out),

        Commands::Serve { host, port } => cli::cmd_serve(
            config,
            host.as_deref().unwrap_or(&config.server.host),
            port.unwrap_or(config.server.port),
        ),

        Commands::Load {
            url,
            clients,
            requests,
        } => {
            let mut load = LoadConfig::from_settings(&config.client);
            if let Some(url) = url {
                load.url = url;
            }
            if !clients.is_empty() {
                load.clients = clients;
            }
            if let Some(requests) = requests {
                load.requests_per_client = requests;
            }
            cli::cmd_load(&load, &mut out)
        },
    };

    out.flush()?;
    result
}
