//! Accept path for the listening socket.

use crate::runtime::connection::Connection;
use crate::runtime::registry::{Entry, Registry};
use mio::{Interest, Token};
use std::io;
use tracing::{debug, error};

/// Services readiness on the listening socket.
pub struct Acceptor {
    token: Token,
    next_id: u64,
}

impl Acceptor {
    /// Create an acceptor for the listener registered under `token`.
    pub fn new(token: Token) -> Self {
        Self { token, next_id: 1 }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Accept every pending connection and register each one for read and
    /// write interest. Returns how many were accepted; a spurious wakeup
    /// accepts none.
    pub fn on_acceptable(&mut self, registry: &mut Registry) -> io::Result<usize> {
        let mut accepted = 0;

        loop {
            let listener = match registry.get(self.token) {
                Some(Entry::Listener(listener)) => listener,
                _ => return Err(io::Error::new(io::ErrorKind::NotFound, "listener not registered")),
            };

            // mio hands back streams already in non-blocking mode.
            let (stream, peer_addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "Pending connection dropped before accept");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            };

            let id = self.next_id;
            self.next_id += 1;

            let conn = Connection::server(id, peer_addr);
            registry.register(stream, Interest::READABLE | Interest::WRITABLE, conn)?;
            accepted += 1;

            debug!(conn_id = id, peer = %peer_addr, "Accepted connection");
        }

        Ok(accepted)
    }
}

/// Accept failures that only affect the one pending connection. Anything
/// else (descriptor or buffer exhaustion) ends this drain.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpListener;
    use mio::Poll;
    use std::thread;
    use std::time::{Duration, Instant};

    fn setup() -> (Poll, Registry, Acceptor, std::net::SocketAddr) {
        let poll = Poll::new().unwrap();
        let mut registry = Registry::new(poll.registry().try_clone().unwrap());
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let token = registry.register_listener(listener).unwrap();
        (poll, registry, Acceptor::new(token), addr)
    }

    #[test]
    fn test_spurious_wakeup_is_noop() {
        let (_poll, mut registry, mut acceptor, _addr) = setup();

        assert_eq!(acceptor.on_acceptable(&mut registry).unwrap(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        // EMFILE / ENFILE
        assert!(!is_transient(&io::Error::from_raw_os_error(24)));
        assert!(!is_transient(&io::Error::from_raw_os_error(23)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::OutOfMemory)));
    }

    #[test]
    fn test_accepts_pending_connections() {
        let (_poll, mut registry, mut acceptor, addr) = setup();

        let _a = std::net::TcpStream::connect(addr).unwrap();
        let _b = std::net::TcpStream::connect(addr).unwrap();

        // The handshake completes in the kernel; give the backlog a moment.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut accepted = 0;
        while accepted < 2 && Instant::now() < deadline {
            accepted += acceptor.on_acceptable(&mut registry).unwrap();
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(accepted, 2);
        assert_eq!(registry.len(), 3);

        let mut ids: Vec<u64> = (0..registry.len())
            .filter_map(|key| registry.get(Token(key)))
            .filter_map(|entry| entry.connection())
            .map(|conn| conn.id())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        for key in 0..registry.len() {
            if let Some(entry) = registry.get(Token(key)) {
                if entry.connection().is_some() {
                    assert_eq!(entry.interest(), Interest::READABLE | Interest::WRITABLE);
                }
            }
        }
    }
}
