//! CLI command handling
//!
//! Runs the server or sends a single request and prints the outcome.

use std::path::Path;
use std::sync::Arc;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{logging, Error, Result};
use crate::ipc::protocol::{Datatype, MessageType};
use crate::ipc::Client;
use crate::server;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Serve { config } => {
            let log = logging::init_server();
            if let Some(path) = log.path() {
                tracing::info!("Logging to {}", path.display());
            }
            let config = load_config(config.as_deref())?;
            server::run(&config).await
        }

        Commands::Send {
            payload,
            module,
            server,
            datatype,
            config,
        } => {
            logging::init_cli();
            let config = load_config(config.as_deref())?;
            let datatype = Datatype::from(datatype);
            if datatype == Datatype::Int {
                payload.trim().parse::<i64>().map_err(|e| {
                    Error::PayloadEncoding(format!("'{}' is not an integer: {}", payload, e))
                })?;
            }

            let server_name = server.as_deref().unwrap_or(&config.server.name);
            let mut client = Client::new(
                &module,
                server_name,
                Arc::new(config.registry()?),
                config.session()?,
            )
            .with_retry_policy(config.retry_policy())
            .with_timeout(config.response_timeout());
            if server.is_none() {
                if let Some(path) = &config.server.socket_path {
                    client = client.with_socket_path(path);
                }
            }

            let request = client.build_request(payload, MessageType::DATA, datatype)?;
            client.connect().await?;
            let response = client.send(&request).await?;
            client.close();

            let status = if response.success() { "OK" } else { "FAILED" };
            println!(
                "{} ({}): {}",
                status,
                response.request().header().message_type,
                response.message()
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}
