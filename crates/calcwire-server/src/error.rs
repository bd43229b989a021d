//! Server error types.

use std::{fmt, io};

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unresolvable bind address, zero capacity, etc.).
    ///
    /// Fatal: prevents server startup.
    Config(String),

    /// Listening socket could not be bound.
    Bind {
        /// Address that was requested
        address: String,
        /// Underlying OS error
        source: io::Error,
    },

    /// Multiplexer or listener failure.
    ///
    /// Fatal for the event loop. Per-connection I/O failures never surface
    /// here; they only close the affected connection.
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Bind { address, source } => write!(f, "failed to bind {address}: {source}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(_) => None,
            Self::Bind { source, .. } => Some(source),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn display_messages() {
        let err = ServerError::Config("no address".into());
        assert_eq!(err.to_string(), "configuration error: no address");

        let err = ServerError::Bind {
            address: "127.0.0.1:1".into(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:1: in use");
    }

    #[test]
    fn io_error_converts_and_keeps_source() {
        let err: ServerError = io::Error::new(io::ErrorKind::Other, "poll broke").into();

        assert!(matches!(err, ServerError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: poll broke");
        assert!(err.source().is_some());
        assert!(ServerError::Config(String::new()).source().is_none());
    }
}
