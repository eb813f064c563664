//! Error types for modlink
//!
//! Variants follow the IPC error taxonomy: connection and decode failures end
//! a connection or retry sequence, integrity and payload encoding failures are
//! reported and recovered from.

use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::ipc::protocol::Identifier;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for modlink
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("Failed to connect to {path}: {source}")]
    ConnectionFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Socket {path} not available after {attempts} attempt(s). Is the server running?")]
    SocketUnavailable { path: String, attempts: u32 },

    #[error("Client is not connected. Call connect() first")]
    NotConnected,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Failed to initialize socket {path}: {source}")]
    SocketInit {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cannot {action} while client is {state}")]
    InvalidState { action: String, state: String },

    // === Envelope Errors ===
    #[error("Malformed envelope: {0}")]
    Decode(String),

    #[error("Checksum mismatch: envelope carries {expected:#010x}, payload hashes to {actual:#010x}")]
    Integrity { expected: u32, actual: u32 },

    #[error("Payload encoding error: {0}")]
    PayloadEncoding(String),

    // === Registry Errors ===
    #[error("Module '{0}' is not registered")]
    ModuleNotFound(String),

    #[error("No module registered with identifier {0}")]
    IdentifierNotFound(Identifier),

    #[error("Invalid identifier '{0}': identifiers must be at least 4 bytes")]
    InvalidIdentifier(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a connection failed error for a socket path
    pub fn connection_failed(path: &Path, source: io::Error) -> Self {
        Self::ConnectionFailed {
            path: path.display().to_string(),
            source,
        }
    }

    /// Create a socket init error for a socket path
    pub fn socket_init(path: &Path, source: io::Error) -> Self {
        Self::SocketInit {
            path: path.display().to_string(),
            source,
        }
    }

    /// Create a socket unavailable error
    pub fn socket_unavailable(path: &Path, attempts: u32) -> Self {
        Self::SocketUnavailable {
            path: path.display().to_string(),
            attempts,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a file read error
    pub fn file_read(path: &Path, error: io::Error) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Whether this error leaves the connection it occurred on unusable
    ///
    /// Integrity and payload encoding failures are answered or logged and the
    /// connection keeps serving requests.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Error::Decode(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionClosed
                | Error::Timeout(_)
                | Error::Io(_)
        )
    }
}
