//! Per-connection request loop
//!
//! Decodes requests, verifies their checksum, narrates their payload and
//! answers with ACK or ERROR.

use std::sync::Arc;
use std::time::Duration;

use crate::common::{clock, Result};
use crate::ipc::codec;
use crate::ipc::payload::Payload;
use crate::ipc::protocol::{Datatype, Header, Message, MessageType, Request};
use crate::ipc::registry::{Registry, Session};
use crate::ipc::transport::Stream;

use super::listener::ServerOptions;

/// Reply payload for an intact request
pub const REPLY_OK: &[u8] = b"OK";
/// Reply payload for a checksum mismatch
pub const REPLY_CHECKSUM_ERROR: &[u8] = b"CHKSUM ERROR";
/// Reply payload for a signature mismatch in strict mode
pub const REPLY_SIGNATURE_ERROR: &[u8] = b"SIGNATURE ERROR";

/// Read-only state shared by every connection task
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) registry: Arc<Registry>,
    pub(crate) session: Session,
    pub(crate) options: ServerOptions,
}

impl ConnectionContext {
    pub(crate) fn new(registry: Arc<Registry>, session: Session, options: ServerOptions) -> Self {
        Self {
            registry,
            session,
            options,
        }
    }

    /// Decide the reply to one request
    ///
    /// `Ok(None)` for no-op envelopes. Fails when the sender is not a
    /// registered module; the caller then sends nothing.
    pub(crate) fn process(&self, request: &Request) -> Result<Option<Request>> {
        tracing::debug!("Received:\n{}", request);

        if request.is_noop() {
            tracing::warn!("Checksum is 0, skipping response");
            return Ok(None);
        }

        let signature_ok = self.check_signature(request);
        let verdict = request.verify();
        if verdict.is_ok() {
            inspect_payload(request.message());
        }

        let module = self.registry.resolve(&request.header().identifier)?;

        let (message_type, body) = if !signature_ok && self.options.strict_signature {
            (MessageType::ERROR, REPLY_SIGNATURE_ERROR)
        } else {
            match verdict {
                Ok(()) => (MessageType::ACK, REPLY_OK),
                Err(e) => {
                    tracing::warn!(module, "{}", e);
                    (MessageType::ERROR, REPLY_CHECKSUM_ERROR)
                }
            }
        };

        self.build_response(module, message_type, body).map(Some)
    }

    /// Whether the message signature names this server's session
    fn check_signature(&self, request: &Request) -> bool {
        let expected = self.session.session_id();
        if request.message_signature() == expected.as_bytes() {
            return true;
        }
        tracing::warn!(
            "Message signature '{}' does not match session id {}",
            String::from_utf8_lossy(request.message_signature()),
            expected
        );
        false
    }

    pub(crate) fn build_response(
        &self,
        module: &str,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<Request> {
        let identifier = self.registry.lookup(module)?;
        Ok(Request::new(
            self.session.session_id().as_bytes().to_vec(),
            Header {
                identifier,
                message_type,
            },
            Message::new(Datatype::Text, payload.to_vec()),
        ))
    }
}

/// Handle one accepted connection until EOF, a decode error or idle timeout
pub(crate) async fn handle_connection(stream: Stream, ctx: ConnectionContext, conn: u64) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    tracing::debug!(conn, "Handling connection");

    loop {
        let read = tokio::time::timeout(ctx.options.read_timeout, codec::read_request(&mut reader)).await;
        let request = match read {
            Ok(Ok(Some(request))) => request,
            Ok(Ok(None)) => {
                tracing::debug!(conn, "Connection closed by client");
                break;
            }
            Ok(Err(e)) => {
                tracing::error!(conn, "Error decoding request: {}", e);
                break;
            }
            Err(_) => {
                tracing::debug!(conn, "Client idle for {:?}, closing", ctx.options.read_timeout);
                break;
            }
        };

        let response = match ctx.process(&request) {
            Ok(Some(response)) => response,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(conn, "Cannot respond: {}", e);
                continue;
            }
        };

        let write = tokio::time::timeout(
            ctx.options.write_timeout,
            codec::write_request(&mut writer, &response),
        )
        .await;
        match write {
            Ok(Ok(())) => {
                tracing::info!(conn, "Response sent: {}", response.header().message_type);
                report_latency(request.timestamp());
            }
            Ok(Err(e)) => {
                tracing::error!(conn, "Failed to send response: {}", e);
                break;
            }
            Err(_) => {
                tracing::error!(conn, "Response write timed out after {:?}", ctx.options.write_timeout);
                break;
            }
        }
    }
}

/// Classify a verified payload and narrate any metadata it carries
///
/// Purely diagnostic; never fails.
pub fn inspect_payload(message: &Message) -> Payload {
    let payload = Payload::decode(message);
    match &payload {
        Payload::Text(text) => tracing::debug!("Data is string: {}", text),
        Payload::Int(n) => tracing::debug!("Data is integer: {}", n),
        Payload::Structured(data) => {
            tracing::debug!("Data is {} / generic data ({} keys)", message.datatype, data.len());
            if let Some(meta) = payload.metadata() {
                tracing::info!("{}", meta);
                if let Some(info) = &meta.destination.info {
                    tracing::info!("Additional info: {}", info);
                }
            }
        }
        Payload::Opaque(bytes) => {
            tracing::debug!("Data is opaque {} ({} bytes)", message.datatype, bytes.len())
        }
    }
    payload
}

/// Log the time elapsed since a request was created
pub fn report_latency(timestamp: i64) -> Duration {
    let elapsed = clock::elapsed_since(timestamp);
    tracing::info!(
        latency_ns = elapsed.as_nanos() as u64,
        "Response time: {:.3} ms ({:.1} µs, {:.6} s)",
        elapsed.as_secs_f64() * 1e3,
        elapsed.as_secs_f64() * 1e6,
        elapsed.as_secs_f64()
    );
    elapsed
}
