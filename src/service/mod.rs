//! Connection servicing.
//!
//! Turns readiness on a connected socket into reads and writes:
//! - `echo`: server role, every byte received is queued back unchanged
//! - `client`: client role, sends a fixed message set and counts the reply
//!
//! Readiness from mio is edge-triggered, so one dispatch reads chunk by
//! chunk until the socket would block, and writes until the outbound buffer
//! empties or the socket would block. "Would block" is never an error.

pub mod client;
pub mod echo;

use crate::runtime::{CloseReason, Connection, Entry, Ready, Registry, RegistryError, Role};
use bytes::Buf;
use mio::{Interest, Token};
use std::io::{self, Read, Write};
use tracing::{debug, trace};

/// Result of servicing one readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep the connection registered.
    Open,
    /// The connection is `Closing` and must be deregistered.
    Close,
}

/// Result of a single non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Data(usize),
    PeerClosed,
    WouldBlock,
}

/// Result of draining the outbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flush {
    Drained,
    Blocked,
}

/// Read at most `scratch.len()` bytes.
pub(crate) fn read_chunk<R: Read>(stream: &mut R, scratch: &mut [u8]) -> io::Result<ReadOutcome> {
    loop {
        match stream.read(scratch) {
            Ok(0) => return Ok(ReadOutcome::PeerClosed),
            Ok(n) => return Ok(ReadOutcome::Data(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Write queued outbound bytes until the buffer is empty or the socket
/// would block. Each accepted count is trimmed from the front of the
/// buffer exactly. An empty buffer performs no write at all.
pub(crate) fn flush<W: Write>(conn: &mut Connection, stream: &mut W) -> io::Result<Flush> {
    while !conn.outbound.is_empty() {
        match stream.write(&conn.outbound) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => {
                conn.outbound.advance(n);
                conn.record_sent(n);
                trace!(conn_id = conn.id(), bytes = n, "Wrote");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Blocked),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Flush::Drained)
}

/// Service one readiness notification on `conn`.
///
/// Reads are handled before writes. A connection that leaves `Active`
/// during the read half never sees the write half.
pub fn service<S: Read + Write>(
    conn: &mut Connection,
    stream: &mut S,
    ready: &Ready,
    scratch: &mut [u8],
) -> io::Result<Outcome> {
    if !conn.is_active() {
        return Ok(Outcome::Close);
    }

    let server = matches!(conn.role(), Role::Server);

    if ready.readable {
        let outcome = if server {
            echo::on_readable(conn, stream, scratch)?
        } else {
            client::on_readable(conn, stream, scratch)?
        };
        if outcome == Outcome::Close {
            return Ok(outcome);
        }
    }

    if ready.writable {
        return if server {
            echo::on_writable(conn, stream)
        } else {
            client::on_writable(conn, stream)
        };
    }

    Ok(Outcome::Open)
}

/// Dispatch readiness for a connected socket in `registry`.
///
/// I/O errors close only the affected connection. Returns the connection
/// state if this dispatch closed it.
pub fn dispatch(
    registry: &mut Registry,
    ready: &Ready,
    scratch: &mut [u8],
) -> Result<Option<Connection>, RegistryError> {
    let (outcome, wants_write, interest) = match registry.get_mut(ready.token) {
        Some(Entry::Stream {
            stream,
            interest,
            conn,
        }) => {
            let outcome = match service(conn, stream, ready, scratch) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(conn_id = conn.id(), error = %e, "Connection error");
                    conn.begin_close(CloseReason::Error);
                    Outcome::Close
                }
            };
            (outcome, conn.wants_write(), *interest)
        }
        // Listener readiness belongs to the acceptor.
        Some(Entry::Listener(_)) => return Ok(None),
        // Closed earlier in this batch.
        None => return Ok(None),
    };

    match outcome {
        Outcome::Close => close(registry, ready.token),
        Outcome::Open => {
            if !wants_write && interest.is_writable() {
                registry.update_interest(ready.token, Interest::READABLE)?;
            }
            Ok(None)
        }
    }
}

/// Deregister a connection and close its socket.
fn close(registry: &mut Registry, token: Token) -> Result<Option<Connection>, RegistryError> {
    match registry.unregister(token)? {
        Entry::Stream { stream, mut conn, .. } => {
            drop(stream);
            conn.finish_close();
            debug!(
                conn_id = conn.id(),
                peer = %conn.peer_addr(),
                reason = ?conn.close_reason(),
                sent = conn.bytes_sent(),
                received = conn.bytes_received(),
                "Closing connection"
            );
            Ok(Some(conn))
        }
        Entry::Listener(_) => Ok(None),
    }
}
