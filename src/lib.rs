//! multiconn: a single-threaded, readiness-driven TCP multiplexer.
//!
//! One thread services many connections through a single poll loop:
//! - Echo server: accepts connections and echoes every byte back
//! - Client: opens N connections, sends a fixed message set on each, and
//!   waits for the same number of bytes back
//!
//! Features:
//! - mio readiness backend (epoll on Linux, kqueue on macOS)
//! - Partial reads and writes buffered per connection
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

pub mod client;
pub mod config;
pub mod runtime;
pub mod server;
pub mod service;
pub mod signal;

use tracing_subscriber::EnvFilter;

/// Initialize logging. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
