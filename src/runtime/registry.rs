//! Registry of monitored sockets.
//!
//! Maps a `Token` to the socket, its requested interest, and (for client
//! sockets) the connection state. Uses slab allocation for O(1) insert,
//! lookup and remove, and keeps the readiness backend in sync on every
//! mutation. The registry never closes a socket on its own: `unregister`
//! hands the entry back and dropping it closes the socket.

use crate::runtime::connection::Connection;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use slab::Slab;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use tracing::debug;

/// A registered socket.
#[derive(Debug)]
pub enum Entry {
    /// The listening socket. Always read-interest only, never carries state.
    Listener(TcpListener),
    /// A connected socket with its state.
    Stream {
        stream: TcpStream,
        interest: Interest,
        conn: Connection,
    },
}

impl Entry {
    /// Interest currently requested for this entry.
    pub fn interest(&self) -> Interest {
        match self {
            Entry::Listener(_) => Interest::READABLE,
            Entry::Stream { interest, .. } => *interest,
        }
    }

    /// Connection state, if this is a connected socket.
    pub fn connection(&self) -> Option<&Connection> {
        match self {
            Entry::Listener(_) => None,
            Entry::Stream { conn, .. } => Some(conn),
        }
    }

    fn source(&mut self) -> &mut dyn mio::event::Source {
        match self {
            Entry::Listener(listener) => listener,
            Entry::Stream { stream, .. } => stream,
        }
    }
}

impl AsRawFd for Entry {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Entry::Listener(listener) => listener.as_raw_fd(),
            Entry::Stream { stream, .. } => stream.as_raw_fd(),
        }
    }
}

/// Registry errors. The first two indicate a caller bug.
#[derive(Debug)]
pub enum RegistryError {
    /// The socket is already registered under `existing`. The rejected
    /// entry is handed back untouched.
    DuplicateRegistration { existing: Token, rejected: Box<Entry> },
    /// No entry under this token.
    NotRegistered(Token),
    /// The readiness backend refused the operation.
    Io(io::Error),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateRegistration { existing, .. } => {
                write!(f, "socket already registered as token {}", existing.0)
            }
            RegistryError::NotRegistered(token) => {
                write!(f, "token {} is not registered", token.0)
            }
            RegistryError::Io(e) => write!(f, "readiness backend error: {e}"),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistryError> for io::Error {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Registry of monitored sockets, owned by a single driver loop.
pub struct Registry {
    selector: mio::Registry,
    entries: Slab<Entry>,
    by_fd: HashMap<RawFd, usize>,
}

impl Registry {
    /// Create an empty registry backed by `selector`.
    pub fn new(selector: mio::Registry) -> Self {
        Self {
            selector,
            entries: Slab::new(),
            by_fd: HashMap::new(),
        }
    }

    /// Register the listening socket for read interest.
    pub fn register_listener(&mut self, listener: TcpListener) -> Result<Token, RegistryError> {
        self.insert(Entry::Listener(listener))
    }

    /// Register a connected socket with `interest` and its state.
    pub fn register(
        &mut self,
        stream: TcpStream,
        interest: Interest,
        conn: Connection,
    ) -> Result<Token, RegistryError> {
        self.insert(Entry::Stream {
            stream,
            interest,
            conn,
        })
    }

    fn insert(&mut self, mut entry: Entry) -> Result<Token, RegistryError> {
        let fd = entry.as_raw_fd();
        if let Some(&key) = self.by_fd.get(&fd) {
            return Err(RegistryError::DuplicateRegistration {
                existing: Token(key),
                rejected: Box::new(entry),
            });
        }

        let slot = self.entries.vacant_entry();
        let token = Token(slot.key());
        let interest = entry.interest();
        self.selector
            .register(entry.source(), token, interest)
            .map_err(RegistryError::Io)?;

        slot.insert(entry);
        self.by_fd.insert(fd, token.0);
        Ok(token)
    }

    /// Remove an entry and hand it back. The caller closes the socket by
    /// dropping it.
    pub fn unregister(&mut self, token: Token) -> Result<Entry, RegistryError> {
        let mut entry = self
            .entries
            .try_remove(token.0)
            .ok_or(RegistryError::NotRegistered(token))?;
        self.by_fd.remove(&entry.as_raw_fd());

        if let Err(e) = self.selector.deregister(entry.source()) {
            debug!(token = token.0, error = %e, "Deregister failed");
        }
        Ok(entry)
    }

    /// Change the interest of a connected socket without touching its state.
    pub fn update_interest(&mut self, token: Token, interest: Interest) -> Result<(), RegistryError> {
        match self.entries.get_mut(token.0) {
            Some(Entry::Stream {
                stream,
                interest: current,
                ..
            }) => {
                if *current != interest {
                    self.selector
                        .reregister(stream, token, interest)
                        .map_err(RegistryError::Io)?;
                    *current = interest;
                }
                Ok(())
            }
            // The listener's interest is fixed.
            Some(Entry::Listener(_)) => Ok(()),
            None => Err(RegistryError::NotRegistered(token)),
        }
    }

    /// Get an immutable reference to an entry.
    pub fn get(&self, token: Token) -> Option<&Entry> {
        self.entries.get(token.0)
    }

    /// Get a mutable reference to an entry.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut Entry> {
        self.entries.get_mut(token.0)
    }

    /// Check if a token is registered.
    pub fn contains(&self, token: Token) -> bool {
        self.entries.contains(token.0)
    }

    /// Number of registered sockets, listener included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no socket remains registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deregister and close every entry. Returns the connection states that
    /// were still registered, marked closed.
    pub fn close_all(&mut self) -> Vec<Connection> {
        let tokens: Vec<Token> = self.entries.iter().map(|(key, _)| Token(key)).collect();
        let mut closed = Vec::new();

        for token in tokens {
            if let Ok(entry) = self.unregister(token) {
                if let Entry::Stream { mut conn, .. } = entry {
                    conn.finish_close();
                    debug!(conn_id = conn.id(), peer = %conn.peer_addr(), "Connection closed at shutdown");
                    closed.push(conn);
                }
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;
    use std::os::fd::{FromRawFd, IntoRawFd};

    fn connected_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    fn conn(stream: &TcpStream) -> Connection {
        Connection::server(1, stream.peer_addr().unwrap())
    }

    #[test]
    fn test_register_and_unregister() {
        let poll = Poll::new().unwrap();
        let mut registry = Registry::new(poll.registry().try_clone().unwrap());
        assert!(registry.is_empty());

        let (stream, _peer) = connected_pair();
        let state = conn(&stream);
        let token = registry
            .register(stream, Interest::READABLE | Interest::WRITABLE, state)
            .unwrap();

        assert!(registry.contains(token));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(token).unwrap().connection().unwrap().id(), 1);

        let entry = registry.unregister(token).unwrap();
        assert!(matches!(entry, Entry::Stream { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration() {
        let poll = Poll::new().unwrap();
        let mut registry = Registry::new(poll.registry().try_clone().unwrap());

        let (stream, _peer) = connected_pair();
        let fd = stream.as_raw_fd();
        let state = conn(&stream);
        let token = registry.register(stream, Interest::READABLE, state).unwrap();

        // Same descriptor wrapped a second time.
        let alias = unsafe { TcpStream::from_raw_fd(fd) };
        let alias_state = Connection::server(2, "127.0.0.1:1".parse().unwrap());
        match registry.register(alias, Interest::READABLE, alias_state) {
            Err(RegistryError::DuplicateRegistration { existing, rejected }) => {
                assert_eq!(existing, token);
                // Release the alias without closing the registered descriptor.
                if let Entry::Stream { stream, .. } = *rejected {
                    let _ = stream.into_raw_fd();
                }
            }
            other => panic!("unexpected: {:?}", other.map(|t| t.0)),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_missing() {
        let poll = Poll::new().unwrap();
        let mut registry = Registry::new(poll.registry().try_clone().unwrap());

        assert!(matches!(
            registry.unregister(Token(7)),
            Err(RegistryError::NotRegistered(Token(7)))
        ));
        assert!(matches!(
            registry.update_interest(Token(7), Interest::READABLE),
            Err(RegistryError::NotRegistered(Token(7)))
        ));
    }

    #[test]
    fn test_update_interest_keeps_state() {
        let poll = Poll::new().unwrap();
        let mut registry = Registry::new(poll.registry().try_clone().unwrap());

        let (stream, _peer) = connected_pair();
        let mut state = conn(&stream);
        state.record_received(b"abc");
        let token = registry
            .register(stream, Interest::READABLE | Interest::WRITABLE, state)
            .unwrap();

        registry.update_interest(token, Interest::READABLE).unwrap();

        let entry = registry.get(token).unwrap();
        assert_eq!(entry.interest(), Interest::READABLE);
        assert_eq!(entry.connection().unwrap().bytes_received(), 3);
    }

    #[test]
    fn test_listener_has_no_state() {
        let poll = Poll::new().unwrap();
        let mut registry = Registry::new(poll.registry().try_clone().unwrap());

        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let token = registry.register_listener(listener).unwrap();

        let entry = registry.get(token).unwrap();
        assert_eq!(entry.interest(), Interest::READABLE);
        assert!(entry.connection().is_none());
    }

    #[test]
    fn test_close_all() {
        let poll = Poll::new().unwrap();
        let mut registry = Registry::new(poll.registry().try_clone().unwrap());

        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        registry.register_listener(listener).unwrap();

        let (stream, _peer) = connected_pair();
        let state = conn(&stream);
        registry.register(stream, Interest::READABLE, state).unwrap();

        let closed = registry.close_all();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].state(), crate::runtime::ConnState::Closed);
        assert!(registry.is_empty());
    }
}
