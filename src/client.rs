//! Multi-connection client driver loop.
//!
//! Opens every connection up front in non-blocking mode and registers each
//! for read and write interest; connect completion shows up as the first
//! write readiness. Polls with a finite timeout so the empty-registry exit
//! condition is re-checked even when nothing happens.

use crate::config::ClientConfig;
use crate::runtime::{CloseReason, Connection, Poller, Registry};
use crate::service;
use crate::signal::Shutdown;
use bytes::Bytes;
use mio::net::TcpStream;
use mio::Interest;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

/// Summary of one finished connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub id: u64,
    pub peer_addr: SocketAddr,
    pub msg_total: usize,
    pub recv_total: usize,
    pub reason: Option<CloseReason>,
}

impl From<&Connection> for ConnectionReport {
    fn from(conn: &Connection) -> Self {
        Self {
            id: conn.id(),
            peer_addr: conn.peer_addr(),
            msg_total: conn.msg_total().unwrap_or(0),
            recv_total: conn.bytes_received(),
            reason: conn.close_reason(),
        }
    }
}

/// What the client loop observed.
#[derive(Debug, Default)]
pub struct ClientReport {
    /// Connections that were registered, in the order they finished.
    pub finished: Vec<ConnectionReport>,
    /// Connection attempts that failed before registration.
    pub failed: usize,
}

impl ClientReport {
    /// Connections that received every byte they sent.
    pub fn completed(&self) -> usize {
        self.finished
            .iter()
            .filter(|r| r.reason == Some(CloseReason::Completed))
            .count()
    }
}

/// Single-threaded multi-connection client.
pub struct EchoClient {
    poller: Poller,
    registry: Registry,
    scratch: Vec<u8>,
    addr: SocketAddr,
    num_connections: usize,
    messages: Vec<Bytes>,
    poll_timeout: Duration,
}

impl EchoClient {
    pub fn new(config: &ClientConfig) -> io::Result<Self> {
        let poller = Poller::new(config.event_capacity)?;
        let registry = Registry::new(poller.registry()?);

        Ok(Self {
            poller,
            registry,
            scratch: vec![0u8; config.chunk_size],
            addr: config.addr,
            num_connections: config.num_connections,
            messages: config.messages.iter().cloned().map(Bytes::from).collect(),
            poll_timeout: config.poll_timeout,
        })
    }

    /// Handle that stops `run` at its next poll boundary.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.poller.shutdown_handle()
    }

    /// Open every connection, then service them until none remain.
    pub fn run(mut self) -> io::Result<ClientReport> {
        let mut report = ClientReport::default();
        self.start_connections(&mut report)?;

        let shutdown = self.poller.shutdown_handle();
        let result = self.drive(&shutdown, &mut report);

        if shutdown.is_triggered() {
            info!("Caught interrupt, exiting");
        }
        for conn in self.registry.close_all() {
            report.finished.push(ConnectionReport::from(&conn));
        }

        info!(
            completed = report.completed(),
            finished = report.finished.len(),
            failed = report.failed,
            "Client finished"
        );
        result.map(|()| report)
    }

    fn start_connections(&mut self, report: &mut ClientReport) -> io::Result<()> {
        for id in 1..=self.num_connections as u64 {
            info!(conn_id = id, addr = %self.addr, "Starting connection");

            // mio connects in non-blocking mode; completion is signalled by
            // the first write readiness.
            let stream = match TcpStream::connect(self.addr) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(conn_id = id, error = %e, "Connection attempt failed");
                    report.failed += 1;
                    continue;
                }
            };

            let conn = Connection::client(id, self.addr, self.messages.iter().cloned());
            self.registry
                .register(stream, Interest::READABLE | Interest::WRITABLE, conn)?;
        }
        Ok(())
    }

    fn drive(&mut self, shutdown: &Shutdown, report: &mut ClientReport) -> io::Result<()> {
        while !self.registry.is_empty() && !shutdown.is_triggered() {
            for ready in self.poller.poll(Some(self.poll_timeout))? {
                if let Some(conn) = service::dispatch(&mut self.registry, &ready, &mut self.scratch)? {
                    report.finished.push(ConnectionReport::from(&conn));
                }
            }
        }
        Ok(())
    }
}
