//! Blocking TCP client for one request per connection.

use std::{
    io::{Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    thread,
    time::Duration,
};

use calcwire_core::ERROR_SENTINEL;

use crate::error::ClientError;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Pause between consecutive fragment writes
    pub fragment_delay: Option<Duration>,
    /// Connect, read and write timeout. `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { fragment_delay: None, io_timeout: Some(Duration::from_secs(10)) }
    }
}

/// Server reply to a single request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    /// Evaluation result
    Value(f64),
    /// The server answered `ERROR`
    Error,
    /// The server closed without answering
    Empty,
}

impl Reply {
    /// Decode the bytes read until the server closed the connection.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidReply` if the bytes are neither a decimal
    ///   number nor `ERROR`
    pub fn parse(bytes: &[u8]) -> Result<Self, ClientError> {
        if bytes.is_empty() {
            return Ok(Self::Empty);
        }
        if bytes == ERROR_SENTINEL {
            return Ok(Self::Error);
        }

        std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| text.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .map(Self::Value)
            .ok_or_else(|| ClientError::InvalidReply(String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Numeric value, if the server answered with one.
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(value) => Some(*value),
            Self::Error | Self::Empty => None,
        }
    }
}

/// Blocking client bound to one server address.
///
/// Every [`send`](Self::send) opens a fresh connection.
#[derive(Debug, Clone)]
pub struct Client {
    address: SocketAddr,
    config: ClientConfig,
}

impl Client {
    /// Create a client for `address`.
    pub fn new(address: SocketAddr, config: ClientConfig) -> Self {
        Self { address, config }
    }

    /// Server address
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Send one request as the given fragments and wait for the reply.
    ///
    /// Each fragment is a separate write with Nagle disabled. After the last
    /// fragment the write side is shut down and the reply is read until the
    /// server closes.
    pub fn send<I, F>(&self, fragments: I) -> Result<Reply, ClientError>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let mut stream = self.connect()?;

        for (i, fragment) in fragments.into_iter().enumerate() {
            if let Some(delay) = self.config.fragment_delay.filter(|_| i > 0) {
                thread::sleep(delay);
            }

            let fragment = fragment.as_ref();
            stream.write_all(fragment).map_err(ClientError::Send)?;
            tracing::trace!(index = i, bytes = fragment.len(), "fragment sent");
        }

        stream.shutdown(Shutdown::Write).map_err(ClientError::Send)?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).map_err(ClientError::Receive)?;
        tracing::trace!(bytes = reply.len(), "reply received");

        Reply::parse(&reply)
    }

    /// Send `expression` in a single write.
    pub fn evaluate(&self, expression: &str) -> Result<Reply, ClientError> {
        self.send([expression])
    }

    fn connect(&self) -> Result<TcpStream, ClientError> {
        let connect_error = |source| ClientError::Connect { address: self.address, source };

        let stream = match self.config.io_timeout {
            Some(timeout) => TcpStream::connect_timeout(&self.address, timeout),
            None => TcpStream::connect(self.address),
        }
        .map_err(connect_error)?;

        stream.set_nodelay(true).map_err(connect_error)?;
        stream.set_read_timeout(self.config.io_timeout).map_err(connect_error)?;
        stream.set_write_timeout(self.config.io_timeout).map_err(connect_error)?;

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    /// Accept one connection, record everything it sends, answer `reply`.
    fn one_shot_server(reply: &'static [u8]) -> (SocketAddr, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).unwrap();
            stream.write_all(reply).unwrap();
            request
        });

        (address, handle)
    }

    #[test]
    fn parse_replies() {
        assert_eq!(Reply::parse(b"").unwrap(), Reply::Empty);
        assert_eq!(Reply::parse(b"ERROR").unwrap(), Reply::Error);
        assert_eq!(Reply::parse(b"14").unwrap(), Reply::Value(14.0));
        assert_eq!(Reply::parse(b"0.5").unwrap(), Reply::Value(0.5));
        assert_eq!(Reply::parse(b"-3").unwrap(), Reply::Value(-3.0));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(Reply::parse(b"error"), Err(ClientError::InvalidReply(_))));
        assert!(matches!(Reply::parse(b"14\n"), Err(ClientError::InvalidReply(_))));
        assert!(matches!(Reply::parse(b"inf"), Err(ClientError::InvalidReply(_))));
        assert!(matches!(Reply::parse(&[0xff, 0xfe]), Err(ClientError::InvalidReply(_))));
    }

    #[test]
    fn reply_value() {
        assert_eq!(Reply::Value(2.5).value(), Some(2.5));
        assert_eq!(Reply::Error.value(), None);
        assert_eq!(Reply::Empty.value(), None);
    }

    #[test]
    fn send_writes_fragments_then_reads_reply() {
        let (address, server) = one_shot_server(b"15");
        let config = ClientConfig {
            fragment_delay: Some(Duration::from_millis(5)),
            ..ClientConfig::default()
        };
        let client = Client::new(address, config);

        let reply = client.send(["1", "0", "+", "5"]).unwrap();

        assert_eq!(reply, Reply::Value(15.0));
        assert_eq!(server.join().unwrap(), b"10+5");
    }

    #[test]
    fn send_with_no_fragments_only_half_closes() {
        let (address, server) = one_shot_server(b"");
        let client = Client::new(address, ClientConfig::default());

        assert_eq!(client.send(Vec::<Vec<u8>>::new()).unwrap(), Reply::Empty);
        assert!(server.join().unwrap().is_empty());
    }

    #[test]
    fn connect_failure_is_reported() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let client = Client::new(address, ClientConfig::default());

        assert!(matches!(client.evaluate("1+1"), Err(ClientError::Connect { .. })));
    }
}
