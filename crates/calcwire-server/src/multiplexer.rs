//! Readiness multiplexer abstraction.
//!
//! The event loop only needs register/reregister/deregister/wait over a set
//! of handles, plus a waker to interrupt a blocked wait. [`MioMultiplexer`]
//! provides that over `mio::Poll` (epoll on Linux, kqueue on BSD/macOS).
//!
//! Readiness is edge-triggered: after an event the owner must drain the handle
//! until it would block, or it will not be reported again.

use std::{io, time::Duration};

use mio::{Events, Poll, Token, Waker, event::Source};

/// Token reserved for the listening socket.
pub const LISTENER: Token = Token(0);

/// Token reserved for the shutdown waker.
pub const WAKER: Token = Token(1);

/// Default number of events collected per wait.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Readiness a handle is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Wake when the handle has bytes (or end of input) to read
    Read,
    /// Wake when the handle can accept more bytes
    Write,
}

impl From<Interest> for mio::Interest {
    fn from(interest: Interest) -> Self {
        match interest {
            Interest::Read => mio::Interest::READABLE,
            Interest::Write => mio::Interest::WRITABLE,
        }
    }
}

/// One readiness report from [`Multiplexer::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Handle the report is for
    pub token: Token,
    /// Handle is readable
    pub readable: bool,
    /// Handle is writable
    pub writable: bool,
    /// Peer finished sending (half-close or full close)
    pub read_closed: bool,
    /// Peer stopped accepting writes
    pub write_closed: bool,
    /// Handle is in an error state
    pub error: bool,
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// Readiness notification capability required by the event loop.
///
/// Handles are identified by the [`Token`] given at registration; a token
/// must not be registered twice at the same time.
pub trait Multiplexer {
    /// Start watching `source` for `interest`, reporting it as `token`.
    fn register(
        &mut self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()>;

    /// Replace the interest of an already registered `source`.
    fn reregister(
        &mut self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()>;

    /// Stop watching `source`.
    fn deregister(&mut self, source: &mut dyn Source) -> io::Result<()>;

    /// Block until at least one handle is ready or `timeout` elapses.
    ///
    /// Clears `ready` and fills it with this cycle's reports, in the order the
    /// OS delivered them. `None` waits indefinitely. A signal interrupting the
    /// wait yields an empty cycle, not an error.
    fn wait(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()>;

    /// Create a waker that makes a blocked [`wait`](Self::wait) return with a
    /// report for `token`. At most one waker may exist per multiplexer.
    fn waker(&self, token: Token) -> io::Result<Waker>;
}

/// [`Multiplexer`] backed by `mio::Poll`.
pub struct MioMultiplexer {
    poll: Poll,
    events: Events,
}

impl MioMultiplexer {
    /// Create a poll instance collecting up to `capacity` events per wait.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self { poll: Poll::new()?, events: Events::with_capacity(capacity.max(1)) })
    }
}

impl Multiplexer for MioMultiplexer {
    fn register(
        &mut self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest.into())
    }

    fn reregister(
        &mut self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest.into())
    }

    fn deregister(&mut self, source: &mut dyn Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    fn wait(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        ready.clear();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        ready.extend(self.events.iter().map(Readiness::from));
        Ok(())
    }

    fn waker(&self, token: Token) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), token)
    }
}
