//! Per-connection state for the reactor.
//!
//! Each connection tracks its lifecycle state, its inbound and outbound
//! buffers, byte counters, and role-specific progress (server echo or
//! client message queue).

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::SocketAddr;

/// Lifecycle of a connection.
///
/// `Active -> Closing -> Closed`. Only `Active` connections are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Registered and serviced on readiness.
    Active,
    /// Teardown decided; waiting to be deregistered.
    Closing,
    /// Deregistered and its socket released.
    Closed,
}

/// Why a connection left the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A read returned zero bytes.
    PeerClosed,
    /// The client role received every byte it sent.
    Completed,
    /// A socket-level error ended the connection.
    Error,
    /// The driver loop shut down while the connection was still open.
    Shutdown,
}

/// Client-role progress: the messages still to send and the total expected back.
#[derive(Debug)]
pub struct ClientProgress {
    pending: VecDeque<Bytes>,
    msg_total: usize,
}

impl ClientProgress {
    /// Queue `messages` in order. `msg_total` is fixed here.
    pub fn new(messages: impl IntoIterator<Item = Bytes>) -> Self {
        let pending: VecDeque<Bytes> = messages.into_iter().collect();
        let msg_total = pending.iter().map(Bytes::len).sum();
        Self { pending, msg_total }
    }

    /// Sum of the lengths of every message queued at creation.
    pub fn msg_total(&self) -> usize {
        self.msg_total
    }

    /// Messages not yet started.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn next_message(&mut self) -> Option<Bytes> {
        self.pending.pop_front()
    }
}

/// Which side of the protocol a connection plays.
#[derive(Debug)]
pub enum Role {
    /// Echo every byte back.
    Server,
    /// Send a fixed set of messages and wait for as many bytes back.
    Client(ClientProgress),
}

/// A single TCP connection's state. The socket itself lives in the registry.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    peer_addr: SocketAddr,
    state: ConnState,
    close_reason: Option<CloseReason>,
    pub(crate) inbound: BytesMut,
    pub(crate) outbound: BytesMut,
    bytes_sent: usize,
    bytes_received: usize,
    role: Role,
}

impl Connection {
    /// Create an accepted server-role connection.
    pub fn server(id: u64, peer_addr: SocketAddr) -> Self {
        Self::new(id, peer_addr, Role::Server)
    }

    /// Create an outbound client-role connection carrying `messages`.
    pub fn client(id: u64, peer_addr: SocketAddr, messages: impl IntoIterator<Item = Bytes>) -> Self {
        Self::new(id, peer_addr, Role::Client(ClientProgress::new(messages)))
    }

    fn new(id: u64, peer_addr: SocketAddr, role: Role) -> Self {
        Self {
            id,
            peer_addr,
            state: ConnState::Active,
            close_reason: None,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            bytes_sent: 0,
            bytes_received: 0,
            role,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnState::Active
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub(crate) fn role_mut(&mut self) -> &mut Role {
        &mut self.role
    }

    /// Bytes received but not yet consumed.
    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    /// Bytes queued but not yet accepted by the socket.
    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    /// `msg_total` for the client role, `None` for the server role.
    pub fn msg_total(&self) -> Option<usize> {
        match &self.role {
            Role::Client(progress) => Some(progress.msg_total()),
            Role::Server => None,
        }
    }

    /// Whether there is anything left to write on this connection.
    ///
    /// The server role always wants write readiness; the client role only
    /// until its last message has been handed to the socket.
    pub fn wants_write(&self) -> bool {
        match &self.role {
            Role::Server => true,
            Role::Client(progress) => !self.outbound.is_empty() || progress.pending() > 0,
        }
    }

    /// Buffer received bytes for the application and count them.
    pub(crate) fn record_received(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
        self.count_received(data.len());
    }

    /// Count received bytes without buffering them.
    pub(crate) fn count_received(&mut self, n: usize) {
        self.bytes_received += n;
    }

    pub(crate) fn record_sent(&mut self, n: usize) {
        self.bytes_sent += n;
    }

    /// Mark the connection for teardown. Only the first reason sticks.
    pub fn begin_close(&mut self, reason: CloseReason) {
        if self.state == ConnState::Active {
            self.state = ConnState::Closing;
            self.close_reason = Some(reason);
        }
    }

    /// Mark the connection as fully released.
    pub fn finish_close(&mut self) {
        if self.close_reason.is_none() {
            self.close_reason = Some(CloseReason::Shutdown);
        }
        self.state = ConnState::Closed;
    }
}
