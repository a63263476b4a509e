//! Client entry point: `multiconn-client <host> <port> <num_connections>`.

use multiconn::client::EchoClient;
use multiconn::config::ClientConfig;
use multiconn::signal::install_signal_handler;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load()?;
    multiconn::init_logging(&config.log_level);

    info!(
        addr = %config.addr,
        connections = config.num_connections,
        messages = config.messages.len(),
        "Starting multiconn client"
    );

    let client = EchoClient::new(&config)?;
    install_signal_handler(client.shutdown_handle())?;
    let report = client.run()?;

    for conn in &report.finished {
        info!(
            conn_id = conn.id,
            sent = conn.msg_total,
            received = conn.recv_total,
            reason = ?conn.reason,
            "Connection summary"
        );
    }
    Ok(())
}
