//! Echo server entry point: `multiconn-server <host> <port>`.

use multiconn::config::ServerConfig;
use multiconn::server::EchoServer;
use multiconn::signal::install_signal_handler;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load()?;
    multiconn::init_logging(&config.log_level);

    info!(
        addr = %config.addr,
        chunk_size = config.chunk_size,
        "Starting multiconn server"
    );

    let server = EchoServer::bind(&config)?;
    install_signal_handler(server.shutdown_handle())?;
    server.run()?;
    Ok(())
}
