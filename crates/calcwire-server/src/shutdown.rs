//! Cross-thread shutdown signal for the event loop.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use mio::Waker;

/// Handle that stops a running [`Server`](crate::Server) from another thread.
///
/// Cloneable; every clone controls the same server.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub(crate) fn new(flag: Arc<AtomicBool>, waker: Waker) -> Self {
        Self { flag, waker: Arc::new(waker) }
    }

    /// Ask the event loop to stop, waking it if it is blocked.
    ///
    /// The loop finishes its current cycle and returns from `run`. Open
    /// connections are dropped without a response.
    pub fn shutdown(&self) -> io::Result<()> {
        self.flag.store(true, Ordering::Release);
        self.waker.wake()
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle").field("requested", &self.is_shutdown()).finish()
    }
}
