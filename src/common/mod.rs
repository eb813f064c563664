//! Common utilities shared by the client, the server and the CLI

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
