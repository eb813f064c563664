//! Module identifier registry and session identity
//!
//! The registry is filled at startup (config, module files, explicit
//! registration) and shared read-only afterwards, typically as
//! `Arc<Registry>`.

use std::collections::HashMap;
use std::path::Path;

use crate::common::{Error, Result};

use super::protocol::Identifier;

/// Maps module names to their 4-byte identifiers
#[derive(Debug, Clone, Default)]
pub struct Registry {
    modules: HashMap<String, Identifier>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, keeping only the first 4 bytes of its identifier
    pub fn register(&mut self, name: &str, id: &[u8]) -> Result<Identifier> {
        let identifier = truncated(id, name)?;
        if let Some(previous) = self.modules.insert(name.to_string(), identifier) {
            if previous != identifier {
                tracing::warn!(
                    module = name,
                    "Replacing identifier {} with {}",
                    previous,
                    identifier
                );
            }
        }
        tracing::debug!(module = name, identifier = %identifier, "Registered module");
        Ok(identifier)
    }

    /// Look up the identifier of a module
    ///
    /// Unknown names are an error; identifiers are never synthesized.
    pub fn lookup(&self, name: &str) -> Result<Identifier> {
        self.modules
            .get(name)
            .copied()
            .ok_or_else(|| Error::ModuleNotFound(name.to_string()))
    }

    /// Find the module name registered for an identifier
    ///
    /// When several names share an identifier the lexicographically smallest
    /// one is returned, so resolution is stable.
    pub fn resolve(&self, identifier: &Identifier) -> Result<&str> {
        self.modules
            .iter()
            .filter(|(_, id)| *id == identifier)
            .map(|(name, _)| name.as_str())
            .min()
            .ok_or(Error::IdentifierNotFound(*identifier))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Register modules from `name identifier` lines
    ///
    /// Blank lines and lines starting with `#`, `/`, `*` or whitespace are
    /// skipped. Lines without an identifier, or with an invalid one, are
    /// reported and skipped. Returns the number of modules registered.
    pub fn parse_modules(&mut self, text: &str) -> usize {
        let mut loaded = 0;
        for (lineno, line) in text.lines().enumerate() {
            let Some(first) = line.chars().next() else {
                continue;
            };
            if matches!(first, '#' | '/' | '*') || first.is_whitespace() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(name), Some(id)) = (parts.next(), parts.next()) else {
                tracing::warn!(line = lineno + 1, "Skipping module line without identifier: {}", line);
                continue;
            };

            match self.register(name, id.as_bytes()) {
                Ok(_) => {
                    tracing::info!("Loaded module: {}", name);
                    loaded += 1;
                }
                Err(e) => tracing::warn!(line = lineno + 1, "Skipping module {}: {}", name, e),
            }
        }
        loaded
    }

    /// Register modules from a `name identifier` file
    pub fn load_modules(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!("Cannot load modules from {}: {}", path.display(), e);
            Error::file_read(path, e)
        })?;
        let loaded = self.parse_modules(&content);
        tracing::info!("Loaded {} module(s) from {}", loaded, path.display());
        Ok(loaded)
    }
}

/// Identity of one server session
///
/// Built once and handed to clients and servers by value; there is no way
/// to change it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    session_id: Identifier,
    server_identifier: Identifier,
}

impl Session {
    /// Create a session, truncating both ids to 4 bytes
    pub fn new(session_id: &[u8], server_identifier: &[u8]) -> Result<Self> {
        Ok(Self {
            session_id: truncated(session_id, "session id")?,
            server_identifier: truncated(server_identifier, "server identifier")?,
        })
    }

    /// Session whose id doubles as the server identifier
    pub fn for_server(identifier: &[u8]) -> Result<Self> {
        Self::new(identifier, identifier)
    }

    /// Active session id, sent as the message signature
    pub fn session_id(&self) -> Identifier {
        self.session_id
    }

    pub fn server_identifier(&self) -> Identifier {
        self.server_identifier
    }
}

fn truncated(id: &[u8], what: &str) -> Result<Identifier> {
    let (identifier, was_truncated) = Identifier::truncating(id)?;
    if was_truncated {
        tracing::warn!(
            "Identifier for {} is {} bytes, truncating to {}",
            what,
            id.len(),
            identifier
        );
    }
    Ok(identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Log sink shared between a test and its subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, logs.text())
    }

    #[test]
    fn test_truncation_is_logged() {
        let (id, logs) = with_captured_logs(|| {
            let mut registry = Registry::new();
            registry.register("connector", b"connector").unwrap()
        });
        assert_eq!(id.as_bytes(), b"conn");
        assert!(logs.contains("WARN"));
        assert!(logs.contains("Identifier for connector is 9 bytes, truncating to conn"));

        let (_, logs) = with_captured_logs(|| {
            let mut registry = Registry::new();
            registry.register("logs", b"LOGS").unwrap()
        });
        assert!(!logs.contains("truncating"));
    }

    #[test]
    fn test_register_truncates() {
        let mut registry = Registry::new();
        let id = registry.register("connector", b"connector").unwrap();
        assert_eq!(id.as_bytes(), b"conn");
        assert_eq!(registry.lookup("connector").unwrap().as_bytes(), b"conn");
    }

    #[test]
    fn test_register_exact_width_unchanged() {
        let mut registry = Registry::new();
        registry.register("logs", b"LOGS").unwrap();
        assert_eq!(registry.lookup("logs").unwrap(), Identifier::new(*b"LOGS"));
    }

    #[test]
    fn test_register_short_identifier_rejected() {
        let mut registry = Registry::new();
        assert!(registry.register("tiny", b"ab").is_err());
        assert!(!registry.contains("tiny"));
    }

    #[test]
    fn test_lookup_unknown_is_not_found() {
        let registry = Registry::new();
        match registry.lookup("ghost") {
            Err(Error::ModuleNotFound(name)) => assert_eq!(name, "ghost"),
            other => panic!("Expected ModuleNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve() {
        let mut registry = Registry::new();
        registry.register("waf", b"WAF0").unwrap();
        registry.register("logs", b"LOGS").unwrap();
        assert_eq!(registry.resolve(&Identifier::new(*b"LOGS")).unwrap(), "logs");
        assert!(matches!(
            registry.resolve(&Identifier::new(*b"NONE")),
            Err(Error::IdentifierNotFound(_))
        ));
    }

    #[test]
    fn test_parse_modules_skips_comments() {
        let text = "\
# module table
waf WAF0
  indented skipped
// also skipped
* skipped
logs\tLOGS

broken
short ab
";
        let mut registry = Registry::new();
        assert_eq!(registry.parse_modules(text), 2);
        assert_eq!(registry.lookup("waf").unwrap().as_bytes(), b"WAF0");
        assert_eq!(registry.lookup("logs").unwrap().as_bytes(), b"LOGS");
        assert!(!registry.contains("broken"));
        assert!(!registry.contains("short"));
    }

    #[test]
    fn test_load_modules_missing_file() {
        let mut registry = Registry::new();
        let err = registry
            .load_modules(Path::new("/definitely/not/here.modules"))
            .unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_load_modules_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.txt");
        std::fs::write(&path, "ui UI01\n").unwrap();

        let mut registry = Registry::new();
        assert_eq!(registry.load_modules(&path).unwrap(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_session_truncates() {
        let session = Session::new(b"connector", b"SRV1extra").unwrap();
        assert_eq!(session.session_id().as_bytes(), b"conn");
        assert_eq!(session.server_identifier().as_bytes(), b"SRV1");
        assert!(Session::for_server(b"x").is_err());
    }
}
