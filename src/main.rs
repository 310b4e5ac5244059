//! hello-endpoint: a sequential fixed-response TCP server
//!
//! Listens on one port, accepts one connection at a time, reads whatever
//! arrives and answers with the same `200 OK` / `Hello, World!` response
//! before closing the connection.
//!
//! Features:
//! - Scoped listening socket with a strict create/bind/listen/accept lifecycle
//! - Reference-counted platform networking setup
//! - Single-attempt or complete read/write exchanges
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod protocols;
mod runtime;
mod server;

use config::Config;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        buffer_size = config.buffer_size,
        exchange = ?config.exchange,
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        header_grace = ?config.header_grace,
        "Starting hello-endpoint server"
    );

    let server = Server::new(config);
    if let Err(e) = server.run() {
        error!(error = %e, "Server setup failed");
        return Err(e.into());
    }

    Ok(())
}
