//! Per-connection session state machine.
//!
//! One [`Session`] per accepted connection. The session reads the request
//! until the peer half-closes, evaluates it exactly once, and drains the
//! response. It never touches the multiplexer itself: readiness callbacks take
//! the transport as a plain `Read`/`Write` handle and return
//! [`SessionAction`]s for the event loop to execute. That keeps the state
//! machine testable against scripted transports.
//!
//! # State Machine
//!
//! ```text
//! ┌───────────┐  half-close   ┌────────────┐   drained    ┌─────────┐
//! │ Receiving │──────────────>│ Responding │─────────────>│ Closing │
//! └───────────┘               └────────────┘              └─────────┘
//!       │                            │                         ^
//!       │ half-close, nothing read   │ write error             │
//!       └────────────────────────────┴─────────────────────────┘
//! ```
//!
//! Phases only move forward. `inbound` is mutated only while `Receiving`;
//! `outbound` is produced once, on entering `Responding`.

use std::io::{self, Read, Write};

use bytes::{Bytes, BytesMut};

use crate::{error::SessionError, eval::evaluate_bytes};

/// Response written when evaluation fails for any reason.
pub const ERROR_SENTINEL: &[u8] = b"ERROR";

/// Default size of a single transport read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Accumulating request bytes until the peer half-closes
    Receiving,
    /// Draining the response
    Responding,
    /// Terminal; the connection must be released
    Closing,
}

/// Why a session reached [`Phase::Closing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Response fully written
    Completed,
    /// Peer half-closed without sending anything; no response is written
    EmptyRequest,
    /// Transport rejected a write before the response was drained
    WriteFailed,
    /// Multiplexer reported an error condition on the handle
    TransportError,
}

/// Actions returned by the session state machine.
///
/// The event loop executes these:
/// - `AwaitWritable`: swap the handle's interest from read to write
/// - `Close`: deregister the handle, drop the connection, forget the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Response is ready; wait for the transport to become writable
    AwaitWritable,

    /// Release the connection
    Close {
        /// Reason for closing
        reason: CloseReason,
    },
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bytes requested from the transport per read call
    pub read_chunk_size: usize,
    /// Request size cap. `None` keeps the buffer unbounded. A request over
    /// the cap is drained and dropped until the peer half-closes, then
    /// answered with [`ERROR_SENTINEL`].
    pub max_request_bytes: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { read_chunk_size: DEFAULT_READ_CHUNK_SIZE, max_request_bytes: None }
    }
}

/// Connection session
///
/// Owns the request and response buffers for a single connection. Exclusively
/// owned by the connection registry for its whole lifetime.
#[derive(Debug)]
pub struct Session {
    /// Current phase
    phase: Phase,
    /// Configuration
    config: SessionConfig,
    /// Request bytes received so far
    inbound: BytesMut,
    /// Serialized response, produced once
    outbound: Bytes,
    /// Bytes of `outbound` already written
    outbound_offset: usize,
    /// Number of evaluator invocations (at most one)
    evaluations: u32,
    /// Request went over the size cap; remaining input is dropped
    oversized: bool,
}

impl Session {
    /// Create a new session in [`Phase::Receiving`].
    pub fn new(config: SessionConfig) -> Self {
        Self {
            phase: Phase::Receiving,
            config,
            inbound: BytesMut::new(),
            outbound: Bytes::new(),
            outbound_offset: 0,
            evaluations: 0,
            oversized: false,
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Request bytes accumulated so far.
    #[must_use]
    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    /// Serialized response. Empty until the session is responding.
    #[must_use]
    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    /// Number of response bytes already written.
    #[must_use]
    pub fn outbound_offset(&self) -> usize {
        self.outbound_offset
    }

    /// Number of times the evaluator ran for this session.
    #[must_use]
    pub fn evaluations(&self) -> u32 {
        self.evaluations
    }

    /// Handle read readiness.
    ///
    /// Drains the transport until it would block or reports end of input.
    /// End of input moves the session to `Responding` (or straight to
    /// `Closing` if nothing was received). Once the request goes over the size
    /// cap, further input is read and dropped until end of input, which is
    /// then answered with `ERROR` without evaluating. A hard read error is treated as end
    /// of input with a poisoned request, so the peer gets `ERROR` if anything
    /// can still be written.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidPhase` if not in `Receiving`
    pub fn on_readable<R>(&mut self, io: &mut R) -> Result<Vec<SessionAction>, SessionError>
    where
        R: Read + ?Sized,
    {
        if self.phase != Phase::Receiving {
            return Err(SessionError::InvalidPhase { phase: self.phase, operation: "read" });
        }

        let mut chunk = vec![0u8; self.config.read_chunk_size.max(1)];

        loop {
            match io.read(&mut chunk) {
                Ok(0) => return Ok(self.finish_request()),
                Ok(n) if self.oversized => {
                    tracing::trace!(bytes = n, "discarding oversized request bytes");
                },
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    tracing::trace!(bytes = n, total = self.inbound.len(), "request bytes read");

                    if self.config.max_request_bytes.is_some_and(|max| self.inbound.len() > max) {
                        tracing::debug!(total = self.inbound.len(), "request exceeds size cap");
                        // Unread input at close would reset the connection
                        // and lose the reply, so keep draining.
                        self.oversized = true;
                        self.inbound = BytesMut::new();
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    tracing::debug!("read failed: {}", e);
                    if self.inbound.is_empty() && !self.oversized {
                        return Ok(self.close(CloseReason::EmptyRequest));
                    }
                    return Ok(self.respond(ERROR_SENTINEL));
                },
            }
        }
    }

    /// Handle write readiness.
    ///
    /// Writes as much of the remaining response as the transport accepts.
    /// Once drained the session closes; a would-block leaves it responding.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidPhase` if not in `Responding`
    pub fn on_writable<W>(&mut self, io: &mut W) -> Result<Vec<SessionAction>, SessionError>
    where
        W: Write + ?Sized,
    {
        if self.phase != Phase::Responding {
            return Err(SessionError::InvalidPhase { phase: self.phase, operation: "write" });
        }

        while self.outbound_offset < self.outbound.len() {
            match io.write(&self.outbound[self.outbound_offset..]) {
                Ok(0) => {
                    tracing::debug!("transport accepted zero bytes");
                    return Ok(self.close(CloseReason::WriteFailed));
                },
                Ok(n) => {
                    self.outbound_offset += n;
                    tracing::trace!(
                        bytes = n,
                        remaining = self.outbound.len() - self.outbound_offset,
                        "response bytes written"
                    );
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    tracing::debug!("write failed: {}", e);
                    return Ok(self.close(CloseReason::WriteFailed));
                },
            }
        }

        Ok(self.close(CloseReason::Completed))
    }

    /// Abandon the session after a transport-level failure.
    ///
    /// Returns no action if the session is already closing.
    pub fn abort(&mut self, reason: CloseReason) -> Vec<SessionAction> {
        if self.phase == Phase::Closing {
            return Vec::new();
        }
        self.close(reason)
    }

    /// Peer half-closed: evaluate, or close if there is nothing to evaluate.
    fn finish_request(&mut self) -> Vec<SessionAction> {
        if self.oversized {
            return self.respond(ERROR_SENTINEL);
        }

        if self.inbound.is_empty() {
            return self.close(CloseReason::EmptyRequest);
        }

        self.evaluations += 1;
        let response = render_response(&self.inbound);
        self.respond(&response)
    }

    fn respond(&mut self, response: &[u8]) -> Vec<SessionAction> {
        debug_assert_eq!(self.phase, Phase::Receiving);

        self.outbound = Bytes::copy_from_slice(response);
        self.outbound_offset = 0;
        self.phase = Phase::Responding;

        vec![SessionAction::AwaitWritable]
    }

    fn close(&mut self, reason: CloseReason) -> Vec<SessionAction> {
        self.phase = Phase::Closing;
        vec![SessionAction::Close { reason }]
    }
}

/// Evaluate a request and serialize the wire response.
///
/// Success is the shortest decimal text that round-trips the value. Any
/// evaluation error, or a result that is not finite, becomes
/// [`ERROR_SENTINEL`].
pub fn render_response(request: &[u8]) -> Vec<u8> {
    match evaluate_bytes(request) {
        Ok(value) if value.is_finite() => {
            // Normalize -0 so the wire never carries a signed zero.
            let value = if value == 0.0 { 0.0 } else { value };
            value.to_string().into_bytes()
        },
        Ok(value) => {
            tracing::debug!(%value, "non-finite result");
            ERROR_SENTINEL.to_vec()
        },
        Err(e) => {
            tracing::debug!("evaluation failed: {}", e);
            ERROR_SENTINEL.to_vec()
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Scripted transport: each read/write consumes the next step.
    #[derive(Default)]
    struct ScriptedIo {
        reads: VecDeque<io::Result<Vec<u8>>>,
        writes: VecDeque<io::Result<usize>>,
        written: Vec<u8>,
    }

    impl ScriptedIo {
        fn reading(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self { reads: steps.into(), ..Self::default() }
        }

        fn writing(steps: Vec<io::Result<usize>>) -> Self {
            Self { writes: steps.into(), ..Self::default() }
        }
    }

    impl Read for ScriptedIo {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    assert!(bytes.len() <= buf.len());
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                },
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for ScriptedIo {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.writes.pop_front() {
                Some(Ok(limit)) => {
                    let n = limit.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                },
                Some(Err(e)) => Err(e),
                None => {
                    self.written.extend_from_slice(buf);
                    Ok(buf.len())
                },
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn would_block<T>() -> io::Result<T> {
        Err(io::ErrorKind::WouldBlock.into())
    }

    fn responding_session(request: &[u8]) -> Session {
        let mut session = Session::new(SessionConfig::default());
        let mut io = ScriptedIo::reading(vec![Ok(request.to_vec()), Ok(Vec::new())]);
        let actions = session.on_readable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::AwaitWritable]);
        session
    }

    #[test]
    fn session_lifecycle() {
        let mut session = Session::new(SessionConfig::default());
        assert_eq!(session.phase(), Phase::Receiving);

        let mut io = ScriptedIo::reading(vec![Ok(b"2+3*4".to_vec()), Ok(Vec::new())]);
        let actions = session.on_readable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::AwaitWritable]);
        assert_eq!(session.phase(), Phase::Responding);
        assert_eq!(session.outbound(), b"14");
        assert_eq!(session.outbound_offset(), 0);

        let mut io = ScriptedIo::default();
        let actions = session.on_writable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::Close { reason: CloseReason::Completed }]);
        assert_eq!(session.phase(), Phase::Closing);
        assert_eq!(io.written, b"14");
        assert_eq!(session.evaluations(), 1);
    }

    #[test]
    fn would_block_keeps_receiving() {
        let mut session = Session::new(SessionConfig::default());

        let mut io = ScriptedIo::reading(vec![Ok(b"1".to_vec()), Ok(b"0".to_vec())]);
        assert!(session.on_readable(&mut io).unwrap().is_empty());
        assert_eq!(session.phase(), Phase::Receiving);
        assert_eq!(session.inbound(), b"10");

        let mut io = ScriptedIo::reading(vec![Ok(b"+".to_vec()), would_block()]);
        assert!(session.on_readable(&mut io).unwrap().is_empty());

        let mut io = ScriptedIo::reading(vec![Ok(b"5".to_vec()), Ok(Vec::new())]);
        assert_eq!(session.on_readable(&mut io).unwrap(), vec![SessionAction::AwaitWritable]);
        assert_eq!(session.inbound(), b"10+5");
        assert_eq!(session.outbound(), b"15");
    }

    #[test]
    fn empty_request_closes_without_response() {
        let mut session = Session::new(SessionConfig::default());
        let mut io = ScriptedIo::reading(vec![Ok(Vec::new())]);

        let actions = session.on_readable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::Close { reason: CloseReason::EmptyRequest }]);
        assert_eq!(session.phase(), Phase::Closing);
        assert!(session.outbound().is_empty());
        assert_eq!(session.evaluations(), 0);
    }

    #[test]
    fn evaluation_errors_become_sentinel() {
        for request in [&b"10/0"[..], b"3+(4*5", b"-1", b"2 3", b"\xff"] {
            let session = responding_session(request);
            assert_eq!(session.outbound(), ERROR_SENTINEL, "request {request:?}");
        }
    }

    #[test]
    fn decimal_results() {
        assert_eq!(responding_session(b"5/2").outbound(), b"2.5");
        assert_eq!(responding_session(b"1/3").outbound(), (1.0f64 / 3.0).to_string().as_bytes());
        assert_eq!(responding_session(b"(0-1)*0").outbound(), b"0");
    }

    #[test]
    fn non_finite_result_becomes_sentinel() {
        let huge = format!("{}*{}", "9".repeat(200), "9".repeat(200));
        assert_eq!(responding_session(huge.as_bytes()).outbound(), ERROR_SENTINEL);
    }

    #[test]
    fn interrupted_read_is_retried() {
        let mut session = Session::new(SessionConfig::default());
        let mut io = ScriptedIo::reading(vec![
            Ok(b"7".to_vec()),
            Err(io::ErrorKind::Interrupted.into()),
            Ok(b"*6".to_vec()),
            Ok(Vec::new()),
        ]);

        session.on_readable(&mut io).unwrap();
        assert_eq!(session.outbound(), b"42");
    }

    #[test]
    fn read_error_after_data_forces_error_response() {
        let mut session = Session::new(SessionConfig::default());
        let mut io = ScriptedIo::reading(vec![
            Ok(b"1+".to_vec()),
            Err(io::ErrorKind::ConnectionReset.into()),
        ]);

        let actions = session.on_readable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::AwaitWritable]);
        assert_eq!(session.outbound(), ERROR_SENTINEL);
        assert_eq!(session.evaluations(), 0);
    }

    #[test]
    fn read_error_before_data_closes() {
        let mut session = Session::new(SessionConfig::default());
        let mut io = ScriptedIo::reading(vec![Err(io::ErrorKind::ConnectionReset.into())]);

        let actions = session.on_readable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::Close { reason: CloseReason::EmptyRequest }]);
    }

    #[test]
    fn partial_writes_resume_on_next_event() {
        let mut session = responding_session(b"123456*10");
        assert_eq!(session.outbound(), b"1234560");

        let mut io = ScriptedIo::writing(vec![Ok(3), would_block()]);
        assert!(session.on_writable(&mut io).unwrap().is_empty());
        assert_eq!(session.phase(), Phase::Responding);
        assert_eq!(session.outbound_offset(), 3);

        let mut io2 = ScriptedIo::writing(vec![Ok(2), Err(io::ErrorKind::Interrupted.into())]);
        let actions = session.on_writable(&mut io2).unwrap();
        assert_eq!(actions, vec![SessionAction::Close { reason: CloseReason::Completed }]);

        let mut all = io.written;
        all.extend_from_slice(&io2.written);
        assert_eq!(all, b"1234560");
        assert_eq!(session.outbound_offset(), session.outbound().len());
    }

    #[test]
    fn write_error_closes() {
        let mut session = responding_session(b"1+1");
        let mut io = ScriptedIo::writing(vec![Err(io::ErrorKind::BrokenPipe.into())]);

        let actions = session.on_writable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::Close { reason: CloseReason::WriteFailed }]);
        assert_eq!(session.phase(), Phase::Closing);
    }

    #[test]
    fn zero_length_write_closes() {
        let mut session = responding_session(b"1+1");
        let mut io = ScriptedIo::writing(vec![Ok(0)]);

        let actions = session.on_writable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::Close { reason: CloseReason::WriteFailed }]);
    }

    #[test]
    fn phases_never_go_backwards() {
        let mut session = responding_session(b"1");

        let mut io = ScriptedIo::reading(vec![Ok(b"2".to_vec()), Ok(Vec::new())]);
        assert!(matches!(
            session.on_readable(&mut io),
            Err(SessionError::InvalidPhase { phase: Phase::Responding, .. })
        ));
        assert_eq!(session.inbound(), b"1");

        session.on_writable(&mut ScriptedIo::default()).unwrap();
        assert_eq!(session.phase(), Phase::Closing);

        assert!(session.on_readable(&mut ScriptedIo::default()).is_err());
        assert!(session.on_writable(&mut ScriptedIo::default()).is_err());
        assert_eq!(session.evaluations(), 1);
    }

    #[test]
    fn write_before_response_is_rejected() {
        let mut session = Session::new(SessionConfig::default());
        assert!(matches!(
            session.on_writable(&mut ScriptedIo::default()),
            Err(SessionError::InvalidPhase { phase: Phase::Receiving, .. })
        ));
    }

    #[test]
    fn abort_is_idempotent() {
        let mut session = Session::new(SessionConfig::default());

        let actions = session.abort(CloseReason::TransportError);
        assert_eq!(actions, vec![SessionAction::Close { reason: CloseReason::TransportError }]);
        assert!(session.abort(CloseReason::TransportError).is_empty());
    }

    #[test]
    fn request_cap_answers_error() {
        let config = SessionConfig { read_chunk_size: 4, max_request_bytes: Some(6) };
        let mut session = Session::new(config);
        let mut io = ScriptedIo::reading(vec![
            Ok(b"1+1+".to_vec()),
            Ok(b"1+1+".to_vec()),
            Ok(Vec::new()),
        ]);

        let actions = session.on_readable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::AwaitWritable]);
        assert_eq!(session.outbound(), ERROR_SENTINEL);
        assert_eq!(session.evaluations(), 0);
    }

    #[test]
    fn oversized_request_is_drained_until_half_close() {
        let config = SessionConfig { read_chunk_size: 4, max_request_bytes: Some(6) };
        let mut session = Session::new(config);

        // Over the cap, but the peer is still sending.
        let mut io = ScriptedIo::reading(vec![Ok(b"1+1+".to_vec()), Ok(b"1+1+".to_vec())]);
        assert!(session.on_readable(&mut io).unwrap().is_empty());
        assert_eq!(session.phase(), Phase::Receiving);
        assert!(session.inbound().is_empty());

        // Later readiness keeps dropping input without buffering it.
        let mut io = ScriptedIo::reading(vec![Ok(b"2*2*".to_vec()), Ok(b"3)".to_vec())]);
        assert!(session.on_readable(&mut io).unwrap().is_empty());
        assert!(session.inbound().is_empty());

        let mut io = ScriptedIo::reading(vec![Ok(b"9".to_vec()), Ok(Vec::new())]);
        let actions = session.on_readable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::AwaitWritable]);
        assert_eq!(session.outbound(), ERROR_SENTINEL);
        assert_eq!(session.evaluations(), 0);
    }

    #[test]
    fn read_error_while_draining_oversized_request_answers_error() {
        let config = SessionConfig { read_chunk_size: 4, max_request_bytes: Some(2) };
        let mut session = Session::new(config);
        let mut io = ScriptedIo::reading(vec![
            Ok(b"1+1+".to_vec()),
            Err(io::ErrorKind::ConnectionReset.into()),
        ]);

        let actions = session.on_readable(&mut io).unwrap();
        assert_eq!(actions, vec![SessionAction::AwaitWritable]);
        assert_eq!(session.outbound(), ERROR_SENTINEL);
    }

    #[test]
    fn small_read_chunks_reassemble() {
        let config = SessionConfig { read_chunk_size: 1, max_request_bytes: None };
        let mut session = Session::new(config);
        let steps = b"(2+3)*4".iter().map(|b| Ok(vec![*b])).chain([Ok(Vec::new())]).collect();
        let mut io = ScriptedIo::reading(steps);

        session.on_readable(&mut io).unwrap();
        assert_eq!(session.outbound(), b"20");
    }
}
