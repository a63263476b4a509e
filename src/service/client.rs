//! Client role: send a fixed set of messages, then wait for as many bytes
//! back as were sent.
//!
//! Messages go out one at a time through the outbound buffer, which acts as
//! the in-flight slot: the next message is only dequeued once the previous
//! one has been fully accepted by the socket. The connection completes when
//! the received byte count reaches `msg_total` or the peer closes. Only the
//! length is checked, never the content.

use super::{flush, read_chunk, Flush, Outcome, ReadOutcome};
use crate::runtime::{CloseReason, Connection, Role};
use std::io::{self, Read, Write};
use tracing::{debug, trace};

fn nothing_to_exchange(conn: &Connection) -> bool {
    conn.msg_total() == Some(0)
}

fn complete(conn: &mut Connection, reason: CloseReason) -> Outcome {
    debug!(
        conn_id = conn.id(),
        received = conn.bytes_received(),
        msg_total = ?conn.msg_total(),
        "Connection complete"
    );
    conn.begin_close(reason);
    Outcome::Close
}

/// Count received bytes and check for completion.
pub fn on_readable<R: Read>(
    conn: &mut Connection,
    stream: &mut R,
    scratch: &mut [u8],
) -> io::Result<Outcome> {
    if nothing_to_exchange(conn) {
        return Ok(complete(conn, CloseReason::Completed));
    }

    loop {
        match read_chunk(stream, scratch)? {
            ReadOutcome::Data(n) => {
                // Only the length matters; the bytes themselves are dropped.
                conn.count_received(n);
                trace!(
                    conn_id = conn.id(),
                    data = ?String::from_utf8_lossy(&scratch[..n]),
                    "Received"
                );
                if Some(conn.bytes_received()) == conn.msg_total() {
                    return Ok(complete(conn, CloseReason::Completed));
                }
            }
            ReadOutcome::PeerClosed => return Ok(complete(conn, CloseReason::PeerClosed)),
            ReadOutcome::WouldBlock => return Ok(Outcome::Open),
        }
    }
}

/// Move the next message into the in-flight slot when it is empty, and
/// write until the slot or the socket runs dry.
pub fn on_writable<W: Write>(conn: &mut Connection, stream: &mut W) -> io::Result<Outcome> {
    if nothing_to_exchange(conn) {
        return Ok(complete(conn, CloseReason::Completed));
    }

    loop {
        if conn.outbound.is_empty() {
            let next = match conn.role_mut() {
                Role::Client(progress) => progress.next_message(),
                Role::Server => None,
            };
            match next {
                Some(message) => {
                    trace!(
                        conn_id = conn.id(),
                        data = ?String::from_utf8_lossy(&message),
                        "Sending"
                    );
                    conn.outbound.extend_from_slice(&message);
                }
                None => return Ok(Outcome::Open),
            }
        }

        if flush(conn, stream)? == Flush::Blocked {
            return Ok(Outcome::Open);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::MockStream;
    use super::*;
    use crate::runtime::ConnState;
    use bytes::Bytes;

    fn conn(messages: &[&str]) -> Connection {
        Connection::client(
            1,
            "127.0.0.1:65432".parse().unwrap(),
            messages.iter().map(|m| Bytes::copy_from_slice(m.as_bytes())),
        )
    }

    #[test]
    fn test_sends_messages_in_order() {
        let mut conn = conn(&["first.", "second."]);
        let mut stream = MockStream::new().then_accept(usize::MAX).then_accept(usize::MAX);

        assert_eq!(on_writable(&mut conn, &mut stream).unwrap(), Outcome::Open);
        assert_eq!(stream.written, b"first.second.");
        assert_eq!(conn.bytes_sent(), 13);
        assert!(!conn.wants_write());
    }

    #[test]
    fn test_partial_message_stays_in_flight() {
        let mut conn = conn(&["abcdef", "ghi"]);
        let mut stream = MockStream::new().then_accept(4);

        on_writable(&mut conn, &mut stream).unwrap();
        assert_eq!(conn.outbound(), b"ef");
        match conn.role() {
            Role::Client(progress) => assert_eq!(progress.pending(), 1),
            Role::Server => unreachable!(),
        }

        // The rest of the first message goes out before the second starts.
        stream.write_caps.push_back(1);
        on_writable(&mut conn, &mut stream).unwrap();
        assert_eq!(conn.outbound(), b"f");
        assert_eq!(stream.written, b"abcde");
        assert!(conn.wants_write());
    }

    #[test]
    fn test_completes_when_all_bytes_received() {
        let mut conn = conn(&["Message 1 from client.", "Message 2 from client."]);
        let mut stream = MockStream::new()
            .then_read(b"Message 1 from client.Mess")
            .then_read(b"age 2 from client.");
        let mut scratch = [0u8; 1024];

        assert_eq!(on_readable(&mut conn, &mut stream, &mut scratch).unwrap(), Outcome::Close);
        assert_eq!(conn.bytes_received(), 44);
        assert_eq!(conn.close_reason(), Some(CloseReason::Completed));
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn test_partial_reply_stays_open() {
        let mut conn = conn(&["0123456789"]);
        let mut stream = MockStream::new().then_read(b"0123");
        let mut scratch = [0u8; 1024];

        assert_eq!(on_readable(&mut conn, &mut stream, &mut scratch).unwrap(), Outcome::Open);
        assert_eq!(conn.bytes_received(), 4);
        assert!(conn.is_active());
    }

    #[test]
    fn test_length_only_completion() {
        let mut conn = conn(&["abc"]);
        let mut stream = MockStream::new().then_read(b"xyz");
        let mut scratch = [0u8; 1024];

        // Content differs, length matches: still complete.
        assert_eq!(on_readable(&mut conn, &mut stream, &mut scratch).unwrap(), Outcome::Close);
        assert_eq!(conn.close_reason(), Some(CloseReason::Completed));
    }

    #[test]
    fn test_peer_close_completes() {
        let mut conn = conn(&["abc"]);
        let mut stream = MockStream::new().then_read(b"a").then_eof();
        let mut scratch = [0u8; 1024];

        assert_eq!(on_readable(&mut conn, &mut stream, &mut scratch).unwrap(), Outcome::Close);
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));
        assert_eq!(conn.bytes_received(), 1);
    }

    #[test]
    fn test_received_bytes_are_not_retained() {
        let mut conn = conn(&["abc"]);
        let chunk = [b'z'; 1000];
        let mut stream = MockStream::new();
        for _ in 0..1000 {
            stream = stream.then_read(&chunk);
        }
        let mut scratch = [0u8; 1024];

        // Far more than msg_total and no close: the connection stays open,
        // but nothing accumulates.
        assert_eq!(on_readable(&mut conn, &mut stream, &mut scratch).unwrap(), Outcome::Open);
        assert_eq!(conn.bytes_received(), 1_000_000);
        assert!(conn.inbound().is_empty());
        assert!(conn.is_active());
    }

    #[test]
    fn test_no_messages_completes_immediately() {
        let mut conn = conn(&[]);
        let mut stream = MockStream::new();

        assert_eq!(on_writable(&mut conn, &mut stream).unwrap(), Outcome::Close);
        assert_eq!(stream.write_calls, 0);
        assert_eq!(conn.close_reason(), Some(CloseReason::Completed));
    }
}
