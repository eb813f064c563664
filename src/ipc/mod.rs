//! Module IPC: envelope, framing, registry and client
//!
//! Modules exchange checksummed envelopes over a UNIX domain socket via the
//! interprocess crate.

pub mod client;
pub mod codec;
pub mod payload;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod transport;

pub use client::{Client, ClientState};
pub use payload::{Metadata, Payload};
pub use protocol::{Datatype, Header, Identifier, Message, MessageType, Request, Response};
pub use registry::{Registry, Session};
pub use retry::RetryPolicy;
