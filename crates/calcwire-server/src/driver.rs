//! Event loop.
//!
//! Single-threaded readiness loop tying the listener, the connection registry
//! and the per-connection session state machines together. The loop waits on
//! the multiplexer, accepts new connections, forwards readiness to sessions and
//! executes the [`SessionAction`]s they return.

use std::{
    io, mem,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use calcwire_core::{CloseReason, Phase, Session, SessionAction, SessionConfig};
use mio::{
    Token,
    net::{TcpListener, TcpStream},
};

use crate::{
    error::ServerError,
    multiplexer::{Interest, LISTENER, Multiplexer, Readiness, WAKER},
    registry::{Connection, ConnectionRegistry},
};

/// Event loop configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections. Connections accepted beyond this are
    /// closed immediately.
    pub max_connections: usize,
    /// Configuration handed to every new session
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { max_connections: 10_000, session: SessionConfig::default() }
    }
}

/// Readiness-driven server loop over a [`Multiplexer`].
pub struct EventLoop<M: Multiplexer> {
    listener: TcpListener,
    multiplexer: M,
    registry: ConnectionRegistry<TcpStream>,
    config: ServerConfig,
    /// Reused between turns
    ready: Vec<Readiness>,
    shutdown: Arc<AtomicBool>,
    accepted: u64,
    rejected: u64,
}

impl<M: Multiplexer> EventLoop<M> {
    /// Create an event loop serving `listener`.
    ///
    /// # Errors
    ///
    /// - `ServerError::Io` if the listener cannot be registered
    pub fn new(
        mut listener: TcpListener,
        mut multiplexer: M,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        multiplexer.register(&mut listener, LISTENER, Interest::Read)?;

        Ok(Self {
            listener,
            multiplexer,
            registry: ConnectionRegistry::new(),
            config,
            ready: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            accepted: 0,
            rejected: 0,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Live connections.
    pub fn registry(&self) -> &ConnectionRegistry<TcpStream> {
        &self.registry
    }

    /// Underlying multiplexer.
    pub fn multiplexer(&self) -> &M {
        &self.multiplexer
    }

    /// Flag checked before every wait; setting it stops [`run`](Self::run).
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Connections admitted since start.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Connections refused by the connection limit since start.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Run until the shutdown flag is set.
    ///
    /// # Errors
    ///
    /// - `ServerError::Io` if the multiplexer fails
    pub fn run(&mut self) -> Result<(), ServerError> {
        while !self.shutdown.load(Ordering::Acquire) {
            self.turn(None)?;
        }

        let dropped = self.drop_open_connections();
        tracing::info!(
            dropped,
            accepted = self.accepted,
            rejected = self.rejected,
            "event loop stopped"
        );
        Ok(())
    }

    /// Wait once and dispatch every readiness report of the cycle.
    ///
    /// Returns the number of reports handled. `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// - `ServerError::Io` if the multiplexer fails
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        let mut ready = mem::take(&mut self.ready);
        self.multiplexer.wait(&mut ready, timeout)?;

        for readiness in &ready {
            self.dispatch(*readiness);
        }

        let handled = ready.len();
        self.ready = ready;
        Ok(handled)
    }

    fn dispatch(&mut self, readiness: Readiness) {
        match readiness.token {
            LISTENER => self.accept_connections(),
            WAKER => tracing::trace!("event loop woken"),
            _ => self.dispatch_session(readiness),
        }
    }

    /// Accept until the listener would block.
    fn accept_connections(&mut self) {
        let listener = &self.listener;
        for (stream, peer) in drain_accepts(|| listener.accept()) {
            self.admit(stream, peer);
        }
    }

    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        if self.registry.session_count() >= self.config.max_connections {
            self.rejected += 1;
            tracing::warn!(
                %peer,
                limit = self.config.max_connections,
                "connection limit reached, closing new connection"
            );
            return;
        }

        let token = self.registry.next_token();
        if let Err(e) = self.multiplexer.register(&mut stream, token, Interest::Read) {
            tracing::warn!(%peer, "failed to register connection: {}", e);
            return;
        }

        let session = Session::new(self.config.session.clone());
        let connection = Connection { stream, peer: Some(peer), session };
        if !self.registry.register_session(token, connection) {
            tracing::error!(?token, %peer, "token already in use, dropping connection");
            return;
        }

        self.accepted += 1;
        tracing::debug!(?token, %peer, "connection accepted");
    }

    fn dispatch_session(&mut self, readiness: Readiness) {
        let token = readiness.token;
        let Some(connection) = self.registry.session_mut(token) else {
            tracing::trace!(?token, "readiness for unknown connection");
            return;
        };

        let result = if readiness.error {
            if let Ok(Some(e)) = connection.stream.take_error() {
                tracing::debug!(?token, "socket error: {}", e);
            }
            Ok(connection.session.abort(CloseReason::TransportError))
        } else {
            match connection.session.phase() {
                Phase::Receiving if readiness.readable || readiness.read_closed => {
                    connection.session.on_readable(&mut connection.stream)
                },
                Phase::Responding if readiness.writable || readiness.write_closed => {
                    connection.session.on_writable(&mut connection.stream)
                },
                _ => Ok(Vec::new()),
            }
        };

        match result {
            Ok(actions) => self.execute_actions(token, actions),
            Err(e) => tracing::debug!(?token, "session error: {}", e),
        }
    }

    fn execute_actions(&mut self, token: Token, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::AwaitWritable => {
                    let Some(connection) = self.registry.session_mut(token) else {
                        continue;
                    };
                    let result =
                        self.multiplexer.reregister(&mut connection.stream, token, Interest::Write);

                    if let Err(e) = result {
                        tracing::warn!(?token, "failed to switch to write interest: {}", e);
                        self.close(token, CloseReason::TransportError);
                    }
                },
                SessionAction::Close { reason } => self.close(token, reason),
            }
        }
    }

    /// Deregister and drop every connection still open, without replies.
    ///
    /// Returns how many were dropped.
    fn drop_open_connections(&mut self) -> usize {
        let open: Vec<Token> = self.registry.tokens().collect();

        for &token in &open {
            let Some(mut connection) = self.registry.unregister_session(token) else {
                continue;
            };
            if let Err(e) = self.multiplexer.deregister(&mut connection.stream) {
                tracing::debug!(?token, "deregister failed: {}", e);
            }
            tracing::debug!(
                ?token,
                peer = ?connection.peer,
                phase = ?connection.session.phase(),
                "dropping open connection at shutdown"
            );
        }

        open.len()
    }

    /// Deregister and drop a connection, forgetting its session.
    fn close(&mut self, token: Token, reason: CloseReason) {
        let Some(mut connection) = self.registry.unregister_session(token) else {
            return;
        };

        if let Err(e) = self.multiplexer.deregister(&mut connection.stream) {
            tracing::debug!(?token, "deregister failed: {}", e);
        }

        match reason {
            CloseReason::Completed | CloseReason::EmptyRequest => {
                tracing::debug!(?token, peer = ?connection.peer, ?reason, "connection closed");
            },
            CloseReason::WriteFailed | CloseReason::TransportError => {
                tracing::warn!(?token, peer = ?connection.peer, ?reason, "connection dropped");
            },
        }
    }
}

/// Call `accept` until it would block, collecting accepted connections.
///
/// Readiness is edge-triggered, so the drain must not stop early on an error
/// that concerns only one pending connection. Any other error (descriptor or
/// memory exhaustion) ends the drain; retrying it would spin.
fn drain_accepts<T, F>(mut accept: F) -> Vec<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut accepted = Vec::new();

    loop {
        match accept() {
            Ok(connection) => accepted.push(connection),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if is_per_connection_error(&e) => {
                tracing::warn!("Accept failed for one connection: {}", e);
            },
            Err(e) => {
                tracing::error!("Accept error: {}", e);
                break;
            },
        }
    }

    accepted
}

/// Accept errors that affect only the connection being accepted.
fn is_per_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::TimedOut
    )
}
