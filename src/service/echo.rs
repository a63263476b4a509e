//! Server role: echo every byte back, in order, on the same connection.
//!
//! ```text
//! Active --(zero-byte read)--> Closing --(deregistered)--> Closed
//! ```
//!
//! Bytes are appended to the outbound buffer untransformed. A zero-byte read
//! tears the connection down at once, even if outbound bytes are still
//! queued. Write readiness with nothing queued is the normal idle state.

use super::{flush, read_chunk, Outcome, ReadOutcome};
use crate::runtime::{CloseReason, Connection};
use std::io::{self, Read, Write};
use tracing::{debug, trace};

/// Drain readable bytes into the outbound buffer, flushing after each chunk.
pub fn on_readable<S: Read + Write>(
    conn: &mut Connection,
    stream: &mut S,
    scratch: &mut [u8],
) -> io::Result<Outcome> {
    loop {
        match read_chunk(stream, scratch)? {
            ReadOutcome::Data(n) => {
                conn.record_received(&scratch[..n]);
                let chunk = conn.inbound.split();
                conn.outbound.extend_from_slice(&chunk);
                trace!(conn_id = conn.id(), bytes = n, "Echoing");
                flush(conn, stream)?;
            }
            ReadOutcome::PeerClosed => {
                debug!(
                    conn_id = conn.id(),
                    peer = %conn.peer_addr(),
                    unsent = conn.outbound().len(),
                    "Peer closed"
                );
                conn.begin_close(CloseReason::PeerClosed);
                return Ok(Outcome::Close);
            }
            ReadOutcome::WouldBlock => return Ok(Outcome::Open),
        }
    }
}

/// Write whatever is queued. Nothing queued is a no-op.
pub fn on_writable<W: Write>(conn: &mut Connection, stream: &mut W) -> io::Result<Outcome> {
    flush(conn, stream)?;
    Ok(Outcome::Open)
}
