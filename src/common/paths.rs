//! Socket, configuration and log paths
//!
//! Sockets live at `{temp dir}/{name}/{name}.sock`. Configuration and logs use
//! platform-appropriate locations from the directories crate.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Application name used for config and log directories
const APP_NAME: &str = "modlink";

/// Get the default socket path for a server name
///
/// Pure and deterministic: the same name always yields the same, already
/// cleaned path, e.g. `/tmp/alpha/alpha.sock`.
pub fn socket_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    clean(&dir.join(format!("{}.sock", name)))
}

/// Lexically clean a path
///
/// Drops redundant separators and `.` components and resolves `..` against
/// preceding normal components without touching the filesystem.
pub fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                Some(Component::RootDir) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// Ensure the socket's parent directory exists
///
/// Newly created directories get mode 0700 (owner only).
pub fn ensure_socket_dir(socket: &Path) -> io::Result<PathBuf> {
    let dir = socket
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid socket path"))?;

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(dir.to_path_buf())
}

/// Remove the socket file if it exists
///
/// Idempotent: a missing file is not an error.
pub fn remove_socket(socket: &Path) -> io::Result<()> {
    match std::fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/modlink/`
/// - macOS: `~/Library/Application Support/modlink/`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}
