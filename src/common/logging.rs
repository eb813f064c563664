//! Logging and tracing configuration
//!
//! The CLI logs compactly to stderr. The server additionally writes a
//! detailed log file since it usually runs unattended.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

use super::paths;

const SERVER_LOG: &str = "server.log";

/// Keeps the server log writer alive; drop it only at exit
pub struct ServerLog {
    path: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl ServerLog {
    /// Log file in use, if file logging could be set up
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn stderr_layer<S>() -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
}

/// Initialize tracing for client commands (stderr logging)
///
/// Controlled by `RUST_LOG`; default is INFO for this crate, WARN elsewhere.
pub fn init_cli() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modlink=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer())
        .init();
}

/// Initialize tracing for the server (file + stderr logging)
///
/// The file lands in [`paths::log_dir`]. Falls back to stderr only when the
/// directory cannot be created.
pub fn init_server() -> ServerLog {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modlink=debug,info"));

    if let Some(log_dir) = paths::log_dir() {
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::never(&log_dir, SERVER_LOG);
                let (writer, guard) = tracing_appender::non_blocking(appender);

                let file_layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true);

                tracing_subscriber::registry()
                    .with(filter)
                    .with(file_layer)
                    .with(stderr_layer())
                    .init();

                return ServerLog {
                    path: Some(log_dir.join(SERVER_LOG)),
                    _guard: Some(guard),
                };
            }
            Err(e) => eprintln!("Warning: Could not create log directory: {}", e),
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer())
        .init();

    ServerLog {
        path: None,
        _guard: None,
    }
}
