//! Calcwire server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! calcwire-server
//!
//! # Custom address, capped request size, verbose logs
//! calcwire-server --bind 127.0.0.1:9000 --max-request-bytes 65536 --log-level debug
//! ```

use calcwire_core::SessionConfig;
use calcwire_server::{DEFAULT_EVENT_CAPACITY, DriverConfig, Server, ServerRuntimeConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Calcwire arithmetic server
#[derive(Parser, Debug)]
#[command(name = "calcwire-server")]
#[command(about = "Evaluates arithmetic expressions sent over TCP")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:5555")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Reject requests larger than this many bytes with ERROR
    #[arg(long)]
    max_request_bytes: Option<usize>,

    /// Readiness events collected per wait
    #[arg(long, default_value_t = DEFAULT_EVENT_CAPACITY)]
    event_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Calcwire server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        event_capacity: args.event_capacity,
        driver: DriverConfig {
            max_connections: args.max_connections,
            session: SessionConfig {
                max_request_bytes: args.max_request_bytes,
                ..Default::default()
            },
        },
    };

    let server = Server::bind(config)?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run()?;

    Ok(())
}
