//! IPC server - socket lifecycle and accept loop

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::tokio::prelude::*;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::common::{paths, Error, Result};
use crate::ipc::protocol::{MessageType, Request};
use crate::ipc::registry::{Registry, Session};
use crate::ipc::transport;

use super::handler::{self, ConnectionContext};

/// Lifecycle of a [`Server`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    SocketBound,
    Listening,
    ShuttingDown,
}

/// Per-connection limits and policies
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// How long a connection may stay silent before it is closed
    pub read_timeout: Duration,
    /// Bound on writing one response
    pub write_timeout: Duration,
    /// Answer requests whose message signature differs from the session id
    /// with an ERROR instead of only logging the mismatch
    pub strict_signature: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(10),
            strict_signature: false,
        }
    }
}

/// IPC server accepting module connections on a UNIX domain socket
pub struct Server {
    name: String,
    socket: PathBuf,
    context: ConnectionContext,
    state: watch::Sender<ServerState>,
}

impl Server {
    /// Create a server; its socket defaults to [`paths::socket_path`] of `name`
    pub fn new(name: &str, registry: Arc<Registry>, session: Session) -> Self {
        let socket = paths::socket_path(name);
        tracing::info!("IPC server path: {}", socket.display());

        let (state, _) = watch::channel(ServerState::Created);
        Self {
            name: name.to_string(),
            socket,
            context: ConnectionContext::new(registry, session, ServerOptions::default()),
            state,
        }
    }

    /// Bind at an explicit socket path instead of the derived one
    pub fn with_socket_path(mut self, socket: impl Into<PathBuf>) -> Self {
        self.socket = paths::clean(&socket.into());
        self
    }

    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.context.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    pub fn session(&self) -> Session {
        self.context.session
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions, e.g. to wait until the server listens
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ServerState) {
        tracing::debug!("Server {} -> {:?}", self.name, state);
        self.state.send_replace(state);
    }

    /// Prepare the socket path: create its directory and remove any stale
    /// socket left by an instance that exited uncleanly
    pub fn init_socket(&self) -> Result<()> {
        paths::ensure_socket_dir(&self.socket)
            .and_then(|_| paths::remove_socket(&self.socket))
            .map_err(|e| {
                tracing::error!("Failed to prepare socket {}: {}", self.socket.display(), e);
                Error::socket_init(&self.socket, e)
            })
    }

    /// Serve until SIGINT or SIGTERM
    pub async fn listen(&self) -> Result<()> {
        self.listen_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` completes
    ///
    /// Every accepted connection runs in its own task. On shutdown, open
    /// connections are aborted and the socket file is removed.
    pub async fn listen_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = transport::create_listener(&self.socket).map_err(|e| {
            tracing::error!("Failed to bind {}: {}", self.socket.display(), e);
            Error::socket_init(&self.socket, e)
        })?;
        self.set_state(ServerState::SocketBound);

        tracing::info!("IPC server {} listening on {}", self.name, self.socket.display());
        self.set_state(ServerState::Listening);

        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();
        let mut next_id: u64 = 0;
        let mut accept_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, closing {}", self.name);
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok(stream) => {
                            accept_failures = 0;
                            next_id += 1;
                            tracing::info!(conn = next_id, "New connection on {}", self.socket.display());
                            connections.spawn(handler::handle_connection(
                                stream,
                                self.context.clone(),
                                next_id,
                            ));
                        }
                        Err(e) => {
                            accept_failures = accept_failures.saturating_add(1);
                            let pause = accept_backoff(accept_failures);
                            tracing::error!("Accept error: {} (pausing {:?})", e, pause);
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        self.set_state(ServerState::ShuttingDown);
        connections.shutdown().await;
        drop(listener);

        paths::remove_socket(&self.socket)?;
        tracing::info!("IPC server {} cleanup complete", self.name);
        Ok(())
    }

    /// Build a reply addressed to a registered module
    ///
    /// Fails with `ModuleNotFound` for unknown names; no identifier is made up.
    pub fn build_response(
        &self,
        module: &str,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<Request> {
        self.context.build_response(module, message_type, payload)
    }
}

/// Pause after `failures` consecutive accept errors, e.g. on fd exhaustion
fn accept_backoff(failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(5);
    (Duration::from_millis(50) * factor).min(Duration::from_secs(1))
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down gracefully");
                }
            }
        }
        Err(e) => {
            tracing::warn!("Cannot install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot wait for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(socket: &Path) -> Server {
        let mut registry = Registry::new();
        registry.register("ui", b"UI01").unwrap();
        Server::new("unit", Arc::new(registry), Session::for_server(b"SRV1").unwrap())
            .with_socket_path(socket)
    }

    #[test]
    fn test_new_server_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let s = server(&dir.path().join("unit.sock"));
        assert_eq!(s.state(), ServerState::Created);
        assert_eq!(s.session().server_identifier().as_bytes(), b"SRV1");
    }

    #[test]
    fn test_init_socket_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("nested").join("unit.sock");
        let s = server(&sock);

        s.init_socket().unwrap();
        std::fs::write(&sock, b"stale").unwrap();
        s.init_socket().unwrap();
        assert!(!sock.exists());
        assert!(sock.parent().unwrap().is_dir());
    }

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(50));
        assert_eq!(accept_backoff(2), Duration::from_millis(100));
        assert_eq!(accept_backoff(5), Duration::from_millis(800));
        assert_eq!(accept_backoff(6), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_build_response_unknown_module() {
        let dir = tempfile::tempdir().unwrap();
        let s = server(&dir.path().join("unit.sock"));
        assert!(matches!(
            s.build_response("ghost", MessageType::ACK, b"OK"),
            Err(Error::ModuleNotFound(_))
        ));
        let reply = s.build_response("ui", MessageType::ACK, b"OK").unwrap();
        assert_eq!(reply.header().identifier.as_bytes(), b"UI01");
    }

    #[tokio::test]
    async fn test_listen_until_shutdown_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("unit.sock");
        let s = server(&sock);
        let mut states = s.subscribe();
        s.init_socket().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = stop_rx.await;
        };
        let serve = s.listen_until(shutdown);
        let control = async {
            states
                .wait_for(|state| *state == ServerState::Listening)
                .await
                .unwrap();
            assert!(sock.exists());
            stop_tx.send(()).unwrap();
        };

        let (served, ()) = tokio::join!(serve, control);
        served.unwrap();
        assert_eq!(s.state(), ServerState::ShuttingDown);
        assert!(!sock.exists());
    }
}
