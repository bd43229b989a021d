//! Calcwire load generator.
//!
//! # Usage
//!
//! ```bash
//! # 100 sessions over the default worker pool, 8 operands each, random chunks of up to 10 bytes
//! calcwire-client --server 127.0.0.1:5555 --operands 8 --connections 100
//!
//! # Every request split into exactly 4 writes, reproducible run
//! calcwire-client --operands 5 --connections 10 --fragments 4 --seed 42
//! ```

use std::{net::ToSocketAddrs, process::ExitCode, time::Duration};

use calcwire_client::{
    BatchConfig, ClientConfig, ClientError, DEFAULT_MAX_CHUNK, DEFAULT_WORKERS, Fragmentation,
    Outcome, run_batch,
};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Calcwire load generator
#[derive(Parser, Debug)]
#[command(name = "calcwire-client")]
#[command(about = "Sends random fragmented expressions to a calcwire server")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    server: String,

    /// Operands per expression
    #[arg(short = 'n', long, default_value = "5")]
    operands: usize,

    /// Connections, one request each
    #[arg(short, long, default_value = "1")]
    connections: usize,

    /// Worker threads; at most this many connections are open at once
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Split every request into exactly this many writes
    #[arg(long, conflicts_with = "max_chunk")]
    fragments: Option<usize>,

    /// Split requests into random writes of at most this many bytes
    #[arg(long)]
    max_chunk: Option<usize>,

    /// Seed for expressions and fragment boundaries (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Put spaces around operators
    #[arg(long)]
    spaced: bool,

    /// Pause between fragment writes, in milliseconds
    #[arg(long)]
    fragment_delay_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let address = args
        .server
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ClientError::Config(format!("{} resolved to nothing", args.server)))?;

    let fragmentation = match (args.fragments, args.max_chunk) {
        (Some(count), _) => Fragmentation::Count(count),
        (None, Some(max)) => Fragmentation::MaxChunk(max),
        (None, None) => Fragmentation::MaxChunk(DEFAULT_MAX_CHUNK),
    };
    let seed = args.seed.unwrap_or_else(rand::random);

    tracing::info!(
        server = %address,
        operands = args.operands,
        connections = args.connections,
        workers = args.workers,
        ?fragmentation,
        seed,
        "starting batch"
    );

    let config = BatchConfig {
        connections: args.connections,
        workers: args.workers,
        operands: args.operands,
        fragmentation,
        seed,
        spaced: args.spaced,
        client: ClientConfig {
            fragment_delay: args.fragment_delay_ms.map(Duration::from_millis),
            ..ClientConfig::default()
        },
    };

    let report = run_batch(address, &config);

    for session in &report.sessions {
        match &session.outcome {
            Outcome::Match => {
                tracing::info!(
                    expression = %session.expression,
                    fragments = session.fragments,
                    "ok"
                );
            },
            Outcome::Mismatch { expected, reply } => {
                tracing::error!(
                    expression = %session.expression,
                    ?expected,
                    ?reply,
                    "mismatch"
                );
            },
            Outcome::Failed(e) => {
                tracing::error!(expression = %session.expression, "failed: {}", e);
            },
        }
    }

    tracing::info!(
        matched = report.matched(),
        mismatched = report.mismatched(),
        failed = report.failed(),
        "summary"
    );

    Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
