//! Connection registry.
//!
//! Maps multiplexer tokens to live connections. Owned by the event loop and
//! only touched from its thread. The registry is the sole owner of every
//! [`Session`]: a session is inserted when its connection is accepted and
//! dropped, together with its stream, when it is unregistered.

use std::{collections::HashMap, net::SocketAddr};

use calcwire_core::Session;
use mio::Token;

/// First token handed out to sessions; lower tokens are reserved for the
/// listener and the waker.
pub const FIRST_SESSION_TOKEN: usize = 2;

/// A live connection: transport handle plus its session state.
#[derive(Debug)]
pub struct Connection<S> {
    /// Transport handle
    pub stream: S,
    /// Remote address, if known
    pub peer: Option<SocketAddr>,
    /// Session state machine
    pub session: Session,
}

/// Registry of live connections keyed by token.
///
/// Never holds two sessions for the same token: registering a token that is
/// already present is refused.
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    /// Token → connection
    connections: HashMap<Token, Connection<S>>,
    /// Next candidate token for [`next_token`](Self::next_token)
    next_token: usize,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ConnectionRegistry<S> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self { connections: HashMap::new(), next_token: FIRST_SESSION_TOKEN }
    }

    /// Allocate a token not used by any live connection.
    ///
    /// Tokens increase monotonically and wrap back to
    /// [`FIRST_SESSION_TOKEN`], skipping tokens still in use.
    pub fn next_token(&mut self) -> Token {
        loop {
            let token = Token(self.next_token);

            self.next_token = match self.next_token.checked_add(1) {
                Some(next) if next < usize::MAX => next,
                _ => FIRST_SESSION_TOKEN,
            };

            if !self.has_session(token) {
                return token;
            }
        }
    }

    /// Register a connection under `token`.
    ///
    /// Returns `false` (and drops nothing already registered) if the token is
    /// reserved or already in use. The rejected connection is dropped.
    pub fn register_session(&mut self, token: Token, connection: Connection<S>) -> bool {
        if token.0 < FIRST_SESSION_TOKEN || self.has_session(token) {
            return false;
        }

        self.connections.insert(token, connection);
        true
    }

    /// Remove a connection, handing it back to the caller.
    pub fn unregister_session(&mut self, token: Token) -> Option<Connection<S>> {
        self.connections.remove(&token)
    }

    /// Connection for `token`. `None` if not registered.
    #[cfg(test)]
    pub(crate) fn session(&self, token: Token) -> Option<&Connection<S>> {
        self.connections.get(&token)
    }

    /// Mutable connection for `token`. `None` if not registered.
    pub fn session_mut(&mut self, token: Token) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&token)
    }

    /// Check if a token is registered.
    pub fn has_session(&self, token: Token) -> bool {
        self.connections.contains_key(&token)
    }

    /// Total number of live connections.
    pub fn session_count(&self) -> usize {
        self.connections.len()
    }

    /// Tokens of all live connections, in no particular order.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.connections.keys().copied()
    }
}
