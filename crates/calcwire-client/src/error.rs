//! Client error types.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors from a single client session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connect failed.
    #[error("connection to {address} failed: {source}")]
    Connect {
        /// Server address
        address: SocketAddr,
        /// Underlying OS error
        source: io::Error,
    },

    /// Writing a fragment or half-closing failed.
    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    /// Reading the reply failed.
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    /// The server replied with something that is neither a number nor
    /// `ERROR`.
    #[error("unexpected reply: {0:?}")]
    InvalidReply(String),

    /// Client configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No batch worker thread could be started.
    #[error("could not spawn session worker: {0}")]
    Spawn(#[source] io::Error),

    /// A batch worker thread panicked.
    #[error("session worker panicked")]
    WorkerPanicked,
}
