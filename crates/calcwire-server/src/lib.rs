//! Calcwire arithmetic server.
//!
//! Non-blocking TCP server that collects an arithmetic expression per
//! connection until the peer half-closes, evaluates it and replies with the
//! result (or `ERROR`) before closing.
//!
//! # Architecture
//!
//! This crate wraps [`calcwire_core`]'s action-based sessions with real I/O.
//! A single thread runs an [`EventLoop`] over a [`Multiplexer`]: readiness
//! reports are routed to sessions through the [`ConnectionRegistry`], and the
//! actions the sessions return are executed against the multiplexer.
//!
//! # Components
//!
//! - [`Server`]: binds the listener and runs the event loop
//! - [`EventLoop`]: accept, dispatch, interest switching and teardown
//! - [`MioMultiplexer`]: readiness notification via `mio`
//! - [`ConnectionRegistry`]: token to connection map
//! - [`ShutdownHandle`]: stops a running server from another thread

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
pub mod multiplexer;
mod registry;
mod shutdown;

use std::net::{SocketAddr, ToSocketAddrs};

pub use driver::{EventLoop, ServerConfig as DriverConfig};
pub use error::ServerError;
use mio::net::TcpListener;
pub use multiplexer::{DEFAULT_EVENT_CAPACITY, Interest, MioMultiplexer, Multiplexer, Readiness};
pub use registry::{Connection, ConnectionRegistry};
pub use shutdown::ShutdownHandle;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:5555")
    pub bind_address: String,
    /// Readiness reports collected per wait
    pub event_capacity: usize,
    /// Event loop configuration (limits, session settings)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5555".to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            driver: DriverConfig::default(),
        }
    }
}

/// Production calcwire server.
///
/// Owns a bound listener and the event loop serving it.
pub struct Server {
    event_loop: EventLoop<MioMultiplexer>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Create and bind a new server.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the address does not resolve or a limit is
    ///   zero
    /// - `ServerError::Bind` if no resolved address can be bound
    /// - `ServerError::Io` if the multiplexer cannot be created
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        if config.driver.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be at least 1".into()));
        }
        if config.driver.session.read_chunk_size == 0 {
            return Err(ServerError::Config("read_chunk_size must be at least 1".into()));
        }

        let addresses: Vec<SocketAddr> = config
            .bind_address
            .to_socket_addrs()
            .map_err(|e| {
                ServerError::Config(format!("invalid bind address {}: {e}", config.bind_address))
            })?
            .collect();

        let listener = bind_first(&config.bind_address, &addresses)?;
        let poll = MioMultiplexer::new(config.event_capacity)?;
        let waker = poll.waker(multiplexer::WAKER)?;

        let event_loop = EventLoop::new(listener, poll, config.driver)?;
        let shutdown = ShutdownHandle::new(event_loop.shutdown_flag(), waker);

        Ok(Self { event_loop, shutdown })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.event_loop.local_addr()?)
    }

    /// Handle for stopping the server from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run the server, accepting connections and answering requests.
    ///
    /// Blocks the calling thread until [`ShutdownHandle::shutdown`] is called
    /// or the multiplexer fails.
    pub fn run(mut self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.local_addr()?);
        self.event_loop.run()
    }
}

/// Bind the first address that accepts a listener.
fn bind_first(requested: &str, addresses: &[SocketAddr]) -> Result<TcpListener, ServerError> {
    let mut last_error = None;

    for address in addresses {
        match TcpListener::bind(*address) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::debug!(%address, "bind failed: {}", e);
                last_error = Some(e);
            },
        }
    }

    match last_error {
        Some(source) => Err(ServerError::Bind { address: requested.to_string(), source }),
        None => Err(ServerError::Config(format!("bind address {requested} resolved to nothing"))),
    }
}
