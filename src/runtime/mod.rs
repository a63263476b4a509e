//! Single-threaded readiness reactor.
//!
//! - `Poller`: waits for readiness across every registered socket
//! - `Registry`: token -> socket, interest and connection state
//! - `Acceptor`: turns listener readiness into registered connections
//! - `Connection`: per-connection buffers, counters and lifecycle state

mod acceptor;
mod connection;
mod poller;
mod registry;

pub use acceptor::Acceptor;
pub use connection::{ClientProgress, CloseReason, ConnState, Connection, Role};
pub use poller::{Poller, Ready};
pub use registry::{Entry, Registry, RegistryError};
