//! Module-side IPC client
//!
//! A client belongs to one registered module and talks to one server. It
//! writes one request and reads one response at a time; there is no
//! pipelining.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::common::{paths, Error, Result};

use super::codec;
use super::payload;
use super::protocol::{Datatype, Header, Message, MessageType, Request, Response};
use super::registry::{Registry, Session};
use super::retry::{self, RetryPolicy};
use super::transport::{self, Stream};

/// Default bound on writes and on waiting for a response
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Observable connection state of a [`Client`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Idle,
    AwaitingResponse,
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Unconnected => "unconnected",
            ClientState::Idle => "idle",
            ClientState::AwaitingResponse => "awaiting a response",
            ClientState::Closed => "closed",
        };
        f.write_str(s)
    }
}

enum Connection {
    Unconnected,
    Connected { stream: Stream, awaiting: bool },
    Closed,
}

/// Client for one module talking to an IPC server
pub struct Client {
    /// Module name, looked up in the registry for the header identifier
    name: String,
    socket: PathBuf,
    registry: Arc<Registry>,
    session: Session,
    retry: RetryPolicy,
    timeout: Duration,
    connection: Connection,
}

impl Client {
    /// Create a client for module `name` talking to server `server_name`
    ///
    /// The socket path defaults to [`paths::socket_path`] of the server name.
    pub fn new(name: &str, server_name: &str, registry: Arc<Registry>, session: Session) -> Self {
        Self {
            name: name.to_string(),
            socket: paths::socket_path(server_name),
            registry,
            session,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            connection: Connection::Unconnected,
        }
    }

    /// Use an explicit socket path instead of the derived one
    pub fn with_socket_path(mut self, socket: impl Into<PathBuf>) -> Self {
        self.socket = paths::clean(&socket.into());
        self
    }

    /// Policy for waiting on a missing socket in [`Client::connect`]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound on each write and each wait for a response
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    pub fn state(&self) -> ClientState {
        match &self.connection {
            Connection::Unconnected => ClientState::Unconnected,
            Connection::Connected { awaiting: false, .. } => ClientState::Idle,
            Connection::Connected { awaiting: true, .. } => ClientState::AwaitingResponse,
            Connection::Closed => ClientState::Closed,
        }
    }

    /// Connect to the server, waiting for its socket per the retry policy
    pub async fn connect(&mut self) -> Result<()> {
        if matches!(self.connection, Connection::Connected { .. }) {
            return Ok(());
        }

        self.wait_for_socket().await?;
        let stream = self.dial().await?;
        self.connection = Connection::Connected {
            stream,
            awaiting: false,
        };

        tracing::info!(module = %self.name, "Connected to {}", self.socket.display());
        Ok(())
    }

    async fn wait_for_socket(&self) -> Result<()> {
        let max_attempts = self.retry.max_attempts();
        for attempt in 1..=max_attempts {
            if transport::socket_exists(&self.socket) {
                return Ok(());
            }
            if attempt == max_attempts {
                break;
            }
            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                "Socket {} not found (attempt {}/{}), retrying in {:?}",
                self.socket.display(),
                attempt,
                max_attempts,
                delay
            );
            retry::countdown(delay).await;
        }

        tracing::error!(
            "Socket {} still missing after {} attempt(s)",
            self.socket.display(),
            max_attempts
        );
        Err(Error::socket_unavailable(&self.socket, max_attempts))
    }

    async fn dial(&self) -> Result<Stream> {
        transport::connect(&self.socket).await.map_err(|e| {
            tracing::error!("Dial {} failed: {}", self.socket.display(), e);
            Error::connection_failed(&self.socket, e)
        })
    }

    /// Single immediate reconnect used by the send path
    async fn reconnect_once(&mut self) -> Result<()> {
        if !transport::socket_exists(&self.socket) {
            tracing::error!("Cannot reconnect: {} does not exist", self.socket.display());
            return Err(Error::NotConnected);
        }
        match self.dial().await {
            Ok(stream) => {
                self.connection = Connection::Connected {
                    stream,
                    awaiting: false,
                };
                tracing::info!(module = %self.name, "Reconnected to {}", self.socket.display());
                Ok(())
            }
            Err(_) => Err(Error::NotConnected),
        }
    }

    /// Build a request from raw payload bytes
    ///
    /// The header carries this module's identifier from the registry and the
    /// message signature carries the session id.
    pub fn build_request(
        &self,
        payload: impl Into<Vec<u8>>,
        message_type: MessageType,
        datatype: Datatype,
    ) -> Result<Request> {
        let identifier = self.registry.lookup(&self.name)?;
        let request = Request::new(
            self.session.session_id().as_bytes().to_vec(),
            Header {
                identifier,
                message_type,
            },
            Message::new(datatype, payload.into()),
        );
        tracing::debug!("Created request with checksum {:#010x}", request.checksum32());
        Ok(request)
    }

    /// Build a request from a serializable value encoded per `datatype`
    pub fn build_value_request<T: Serialize + ?Sized>(
        &self,
        value: &T,
        message_type: MessageType,
        datatype: Datatype,
    ) -> Result<Request> {
        let data = payload::encode_value(value, datatype).map_err(|e| {
            tracing::error!("Cannot encode {} payload: {}", datatype, e);
            e
        })?;
        self.build_request(data, message_type, datatype)
    }

    /// Send a request and read its response
    pub async fn send(&mut self, request: &Request) -> Result<Response> {
        self.send_with(request, report_response).await
    }

    /// Send a request and hand the response to `on_response`
    pub async fn send_with<T>(
        &mut self,
        request: &Request,
        on_response: impl FnOnce(Response) -> T,
    ) -> Result<T> {
        if request.is_noop() {
            return Err(Error::invalid_state(
                "await a reply to a no-op envelope (use notify)",
                &self.state().to_string(),
            ));
        }
        self.write(request, true).await?;
        let response = self.await_response().await?;
        Ok(on_response(response))
    }

    /// Send an envelope that gets no reply, such as a no-op marker
    pub async fn notify(&mut self, request: &Request) -> Result<()> {
        self.write(request, false).await
    }

    async fn write(&mut self, request: &Request, expect_reply: bool) -> Result<()> {
        match self.state() {
            ClientState::Closed => return Err(Error::NotConnected),
            ClientState::Unconnected => {
                tracing::warn!(module = %self.name, "Client not connected, trying to reconnect once");
                self.reconnect_once().await?;
            }
            state @ ClientState::AwaitingResponse => {
                return Err(Error::invalid_state("send", &state.to_string()));
            }
            ClientState::Idle => {}
        }

        match self.write_once(request).await {
            Ok(()) => {}
            Err(Error::Io(e)) if is_broken(&e) => {
                tracing::warn!("Connection broken ({}), reconnecting once", e);
                self.connection = Connection::Unconnected;
                self.reconnect_once().await?;
                self.write_once(request).await?;
            }
            Err(e) => {
                tracing::error!("Failed to send request: {}", e);
                if e.is_fatal_to_connection() {
                    self.connection = Connection::Unconnected;
                }
                return Err(e);
            }
        }

        tracing::debug!(module = %self.name, "Sent {}", request.message().datatype);
        if let Connection::Connected { awaiting, .. } = &mut self.connection {
            *awaiting = expect_reply;
        }
        Ok(())
    }

    async fn write_once(&mut self, request: &Request) -> Result<()> {
        let timeout = self.timeout;
        let stream = self.stream_mut()?;
        let outcome = tokio::time::timeout(timeout, codec::write_request(stream, request)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                self.connection = Connection::Unconnected;
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Read exactly one envelope, bounded by the client timeout
    ///
    /// On timeout or a malformed envelope the connection is dropped, since
    /// a late reply would desynchronise request and response.
    pub async fn await_response(&mut self) -> Result<Response> {
        let timeout = self.timeout;
        let stream = self.stream_mut()?;
        let outcome = tokio::time::timeout(timeout, codec::read_request(stream)).await;
        match outcome {
            Ok(result) => self.finish_read(result),
            Err(_) => {
                tracing::error!("No response within {:?}", timeout);
                self.connection = Connection::Unconnected;
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Block until the server sends one envelope, without a timeout
    pub async fn listen(&mut self) -> Result<Response> {
        let stream = self.stream_mut()?;
        let result = codec::read_request(stream).await;
        self.finish_read(result)
    }

    fn finish_read(&mut self, result: Result<Option<Request>>) -> Result<Response> {
        match result {
            Ok(Some(envelope)) => {
                if let Connection::Connected { awaiting, .. } = &mut self.connection {
                    *awaiting = false;
                }
                Ok(Response::from_request(envelope))
            }
            Ok(None) => {
                tracing::warn!("Server closed the connection");
                self.connection = Connection::Unconnected;
                Err(Error::ConnectionClosed)
            }
            Err(e) => {
                tracing::error!("Error reading response: {}", e);
                self.connection = Connection::Unconnected;
                Err(e)
            }
        }
    }

    fn stream_mut(&mut self) -> Result<&mut Stream> {
        match &mut self.connection {
            Connection::Connected { stream, .. } => Ok(stream),
            _ => Err(Error::NotConnected),
        }
    }

    /// Release the connection; later sends fail with `NotConnected`
    pub fn close(&mut self) {
        if matches!(self.connection, Connection::Connected { .. }) {
            tracing::debug!(module = %self.name, "Closing connection");
        }
        self.connection = Connection::Closed;
    }
}

/// Default response reader: log the outcome and pass the response on
fn report_response(response: Response) -> Response {
    if response.success() {
        tracing::info!(
            "Received {} from server: {}",
            response.request().header().message_type,
            response.message()
        );
    } else {
        tracing::error!(
            "Request failed ({}): {}",
            response.request().header().message_type,
            response.message()
        );
    }
    response
}

fn is_broken(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(socket: &Path) -> Client {
        let mut registry = Registry::new();
        registry.register("ui", b"UI01").unwrap();
        let session = Session::for_server(b"SRV1").unwrap();
        Client::new("ui", "unused", Arc::new(registry), session)
            .with_socket_path(socket)
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(10)))
    }

    #[test]
    fn test_default_socket_path_from_server_name() {
        let c = Client::new("ui", "connector", Arc::new(Registry::new()), Session::for_server(b"SRV1").unwrap());
        assert_eq!(c.socket_path(), paths::socket_path("connector"));
        assert_eq!(c.state(), ClientState::Unconnected);
    }

    #[test]
    fn test_build_request_uses_registry_and_session() {
        let c = client(Path::new("/nonexistent/x.sock"));
        let request = c
            .build_request("ping", MessageType::DATA, Datatype::Text)
            .unwrap();
        assert_eq!(request.header().identifier.as_bytes(), b"UI01");
        assert_eq!(request.message_signature(), b"SRV1");
        assert_eq!(request.checksum32(), codec::checksum(b"ping"));
        assert_eq!(request.message().string_data, "ping");
    }

    #[test]
    fn test_build_request_unregistered_module() {
        let c = Client::new("ghost", "srv", Arc::new(Registry::new()), Session::for_server(b"SRV1").unwrap());
        assert!(matches!(
            c.build_request("x", MessageType::DATA, Datatype::Text),
            Err(Error::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_build_value_request() {
        let c = client(Path::new("/nonexistent/x.sock"));
        let request = c
            .build_value_request(&serde_json::json!({"n": 1}), MessageType::DATA, Datatype::Yaml)
            .unwrap();
        assert_eq!(request.message().data, b"n: 1\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_missing_socket_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = client(&dir.path().join("missing.sock"));
        match c.connect().await {
            Err(Error::SocketUnavailable { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("Expected SocketUnavailable, got {:?}", other.err()),
        }
        assert_eq!(c.state(), ClientState::Unconnected);
    }

    #[tokio::test]
    async fn test_send_without_server_is_not_connected() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = client(&dir.path().join("missing.sock"));
        let request = c.build_request("ping", MessageType::DATA, Datatype::Text).unwrap();
        assert!(matches!(c.send(&request).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_after_close_is_not_connected() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = client(&dir.path().join("missing.sock"));
        c.close();
        assert_eq!(c.state(), ClientState::Closed);
        let request = c.build_request("ping", MessageType::DATA, Datatype::Text).unwrap();
        assert!(matches!(c.send(&request).await, Err(Error::NotConnected)));
    }
}
