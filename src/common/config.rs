//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ipc::registry::{Registry, Session};
use crate::ipc::retry::RetryPolicy;
use crate::server::ServerOptions;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Module name -> identifier
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

/// Server settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Server name, also the default socket name
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Server identifier (truncated to 4 bytes)
    #[serde(default = "default_identifier")]
    pub identifier: String,

    /// Active session id; defaults to the server identifier
    #[serde(default)]
    pub session_id: Option<String>,

    /// Explicit socket path instead of `{tmp}/{name}/{name}.sock`
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// File of `name identifier` lines merged into the registry
    #[serde(default)]
    pub modules_file: Option<PathBuf>,

    /// Close connections idle for this long
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Bound on writing one response
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Reject requests whose signature is not the session id
    #[serde(default)]
    pub strict_signature: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            identifier: default_identifier(),
            session_id: None,
            socket_path: None,
            modules_file: None,
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            strict_signature: false,
        }
    }
}

fn default_server_name() -> String {
    "modlink".to_string()
}
fn default_identifier() -> String {
    "MDLK".to_string()
}
fn default_read_timeout() -> u64 {
    300
}
fn default_write_timeout() -> u64 {
    10
}

/// Client settings
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// How many times to check for the server socket
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Delay between socket checks
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Bound on each write and each wait for a response
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

fn default_connect_attempts() -> u32 {
    5
}
fn default_retry_delay() -> u64 {
    5000
}
fn default_response_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        if config.server.name.trim().is_empty() {
            return Err(Error::Config("server.name must not be empty".to_string()));
        }
        if config.client.connect_attempts == 0 {
            return Err(Error::Config(
                "client.connect_attempts must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    /// Build the module registry from `[modules]` and `modules_file`
    pub fn registry(&self) -> Result<Registry> {
        let mut registry = Registry::new();
        let mut names: Vec<_> = self.modules.keys().collect();
        names.sort();
        for name in names {
            registry.register(name, self.modules[name].as_bytes())?;
        }
        if let Some(file) = &self.server.modules_file {
            registry.load_modules(file)?;
        }
        Ok(registry)
    }

    /// Session identity of the configured server
    pub fn session(&self) -> Result<Session> {
        let session_id = self
            .server
            .session_id
            .as_deref()
            .unwrap_or(&self.server.identifier);
        Session::new(session_id.as_bytes(), self.server.identifier.as_bytes())
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            read_timeout: Duration::from_secs(self.server.read_timeout_secs),
            write_timeout: Duration::from_secs(self.server.write_timeout_secs),
            strict_signature: self.server.strict_signature,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.client.connect_attempts,
            Duration::from_millis(self.client.retry_delay_ms),
        )
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.client.response_timeout_secs)
    }
}
