//! Readiness poller.
//!
//! Wraps `mio::Poll` (epoll on Linux, kqueue on macOS) behind a single
//! `poll(timeout)` call that returns which registered sockets are readable
//! or writable. Callers never see which primitive backs it.

use crate::signal::Shutdown;
use mio::{Events, Poll, Token, Waker};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Reserved for the shutdown waker; slab keys never reach it.
const WAKER_TOKEN: Token = Token(usize::MAX);

/// One ready socket from a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

/// Blocks until registered sockets are ready.
pub struct Poller {
    poll: Poll,
    events: Events,
    shutdown: Shutdown,
}

impl Poller {
    /// Create a poller returning at most `capacity` events per call.
    pub fn new(capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(capacity.max(1)),
            shutdown: Shutdown::new(waker),
        })
    }

    /// A handle to the backend registry, for building a `Registry`.
    pub fn registry(&self) -> io::Result<mio::Registry> {
        self.poll.registry().try_clone()
    }

    /// Shutdown handle that interrupts a blocking `poll`.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait for readiness.
    ///
    /// Blocks for at most `timeout` (forever if `None`). Returns an empty
    /// list on timeout, on an interrupted wait, or when woken for shutdown.
    /// Error and hang-up conditions are reported as readable so the next
    /// read observes them.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Ready>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        Ok(self
            .events
            .iter()
            .filter(|event| event.token() != WAKER_TOKEN)
            .map(|event| Ready {
                token: event.token(),
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable() || event.is_write_closed(),
            })
            .collect())
    }
}
