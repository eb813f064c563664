//! modlink - checksummed message exchange between modules
//!
//! Modules send framed envelopes over a UNIX domain socket to a server, which
//! verifies each envelope's CRC-32 and answers with an ACK or an ERROR.

pub mod cli;
pub mod commands;
pub mod common;
pub mod ipc;
pub mod server;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use ipc::{Client, Registry, Request, Response, Session};
pub use server::{Server, ServerOptions, ServerState};
