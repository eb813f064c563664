//! IPC server
//!
//! Binds the server socket, accepts module connections and answers each
//! request with an ACK or an ERROR.

mod handler;
mod listener;

pub use handler::{
    inspect_payload, report_latency, REPLY_CHECKSUM_ERROR, REPLY_OK, REPLY_SIGNATURE_ERROR,
};
pub use listener::{Server, ServerOptions, ServerState};

use std::sync::Arc;

use crate::common::config::Config;
use crate::common::Result;

/// Build a server from configuration
pub fn from_config(config: &Config) -> Result<Server> {
    let registry = Arc::new(config.registry()?);
    tracing::info!("Registered {} modules", registry.len());

    let server = Server::new(&config.server.name, registry, config.session()?)
        .with_options(config.server_options());
    Ok(match &config.server.socket_path {
        Some(path) => server.with_socket_path(path),
        None => server,
    })
}

/// Run the server until SIGINT or SIGTERM
pub async fn run(config: &Config) -> Result<()> {
    let server = from_config(config)?;
    server.init_socket()?;
    server.listen().await
}
