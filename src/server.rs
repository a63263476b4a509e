//! Echo server driver loop.
//!
//! Polls without a timeout, hands listener readiness to the acceptor and
//! everything else to the connection servicer. Runs until shutdown is
//! requested, then closes every registered socket.

use crate::config::ServerConfig;
use crate::runtime::{Acceptor, Poller, Registry};
use crate::service;
use crate::signal::Shutdown;
use mio::net::TcpListener;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info};

/// Single-threaded echo server.
pub struct EchoServer {
    poller: Poller,
    registry: Registry,
    acceptor: Acceptor,
    scratch: Vec<u8>,
    local_addr: SocketAddr,
}

impl EchoServer {
    /// Bind the listening socket and register it for read interest.
    pub fn bind(config: &ServerConfig) -> io::Result<Self> {
        let poller = Poller::new(config.event_capacity)?;
        let mut registry = Registry::new(poller.registry()?);

        let listener = TcpListener::from_std(create_listener(config.addr, config.backlog)?);
        let local_addr = listener.local_addr()?;
        let token = registry.register_listener(listener)?;

        Ok(Self {
            poller,
            registry,
            acceptor: Acceptor::new(token),
            scratch: vec![0u8; config.chunk_size],
            local_addr,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that stops `run` at its next poll boundary.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.poller.shutdown_handle()
    }

    /// Serve until shutdown is requested.
    pub fn run(mut self) -> io::Result<()> {
        info!(addr = %self.local_addr, "Listening");

        let shutdown = self.poller.shutdown_handle();
        let result = self.serve(&shutdown);

        if shutdown.is_triggered() {
            info!("Caught interrupt, exiting");
        }
        let closed = self.registry.close_all();
        info!(connections = closed.len(), "Closed remaining connections");

        result
    }

    fn serve(&mut self, shutdown: &Shutdown) -> io::Result<()> {
        while !shutdown.is_triggered() {
            for ready in self.poller.poll(None)? {
                if ready.token == self.acceptor.token() {
                    self.acceptor.on_acceptable(&mut self.registry)?;
                } else if let Some(conn) =
                    service::dispatch(&mut self.registry, &ready, &mut self.scratch)?
                {
                    debug!(conn_id = conn.id(), "Connection released");
                }
            }
        }
        Ok(())
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
