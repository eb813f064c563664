//! CLI command definitions

use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::ipc::protocol::Datatype;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the IPC server until SIGINT or SIGTERM
    Serve {
        /// Configuration file (default: the user config file)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Send one request to a running server and print the outcome
    Send {
        /// Payload to send
        payload: String,

        /// Registered module to send as
        #[arg(long, short)]
        module: String,

        /// Server name (default: the configured server name)
        #[arg(long, short)]
        server: Option<String>,

        /// How the payload is interpreted
        #[arg(long, short = 't', value_enum, default_value_t = PayloadKind::Text)]
        datatype: PayloadKind,

        /// Configuration file (default: the user config file)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Payload datatypes selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PayloadKind {
    Text,
    Int,
    Json,
    Yaml,
    Bin,
}

impl From<PayloadKind> for Datatype {
    fn from(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::Text => Datatype::Text,
            PayloadKind::Int => Datatype::Int,
            PayloadKind::Json => Datatype::Json,
            PayloadKind::Yaml => Datatype::Yaml,
            PayloadKind::Bin => Datatype::Bin,
        }
    }
}
