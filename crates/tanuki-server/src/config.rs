//! Honeypot configuration.
//!
//! Loaded once at startup from an optional TOML file, then overridden by CLI
//! flags. Every field has a default, so an empty file is a valid config:
//!
//! ```toml
//! [server]
//! port = 2222
//! max_sessions = 32
//!
//! [session]
//! hostname = "db-prod-03"
//! idle_timeout_secs = 300
//!
//! [context]
//! max_entries = 12
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Errors raised while loading or validating configuration. All are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HoneypotConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub context: ContextConfig,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_sessions: usize,
    pub banner: String,
    pub busy_message: String,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            banner: DEFAULT_BANNER.to_string(),
            busy_message: DEFAULT_BUSY_MESSAGE.to_string(),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE.as_secs(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Per-session limits and illusion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub hostname: String,
    /// Starting directory. Derived from the username when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<String>,
    pub idle_timeout_secs: u64,
    pub max_commands: u32,
    pub failure_threshold: u32,
    pub backend_timeout_secs: u64,
    pub max_line_bytes: usize,
    pub transcript_capacity: usize,
    pub motd: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            home_dir: None,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            max_commands: DEFAULT_MAX_COMMANDS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            backend_timeout_secs: DEFAULT_BACKEND_TIMEOUT.as_secs(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            transcript_capacity: DEFAULT_TRANSCRIPT_CAPACITY,
            motd: DEFAULT_MOTD.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Deadline for one backend call: never longer than the idle timeout.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs).min(self.idle_timeout())
    }
}

/// How much history goes to the backend per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    pub max_entries: usize,
    pub max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CONTEXT_MAX_ENTRIES,
            max_chars: DEFAULT_CONTEXT_MAX_CHARS,
        }
    }
}

impl HoneypotConfig {
    /// Default config file location (`$XDG_CONFIG_HOME/tanuki/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tanuki").join("config.toml"))
    }

    /// Load from an explicit path, or from [`Self::default_path`] if that
    /// file exists, or fall back to defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values that would make the engine misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.server.max_sessions == 0 {
            return invalid("server.max_sessions must be at least 1");
        }
        if self.server.banner.trim().is_empty() {
            return invalid("server.banner must not be empty");
        }
        if self.server.banner.contains(['\r', '\n']) {
            return invalid("server.banner must be a single line");
        }
        if self.session.hostname.trim().is_empty() {
            return invalid("session.hostname must not be empty");
        }
        if let Some(home) = &self.session.home_dir {
            if !home.starts_with('/') {
                return invalid("session.home_dir must be an absolute path");
            }
        }
        if self.session.idle_timeout_secs == 0 {
            return invalid("session.idle_timeout_secs must be non-zero");
        }
        if self.session.backend_timeout_secs == 0 {
            return invalid("session.backend_timeout_secs must be non-zero");
        }
        if self.session.max_commands == 0 {
            return invalid("session.max_commands must be at least 1");
        }
        if self.session.failure_threshold == 0 {
            return invalid("session.failure_threshold must be at least 1");
        }
        if self.session.max_line_bytes == 0 {
            return invalid("session.max_line_bytes must be non-zero");
        }
        if self.session.transcript_capacity < 2 {
            return invalid("session.transcript_capacity must hold at least one exchange");
        }
        if self.context.max_entries == 0 {
            return invalid("context.max_entries must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HoneypotConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 2222);
        assert_eq!(config.session.failure_threshold, 3);
        assert_eq!(config.session.idle_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: HoneypotConfig = toml::from_str(
            r#"
            [server]
            port = 22
            max_sessions = 2

            [session]
            hostname = "db-prod-03"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 22);
        assert_eq!(config.server.max_sessions, 2);
        assert_eq!(config.server.banner, DEFAULT_BANNER);
        assert_eq!(config.session.hostname, "db-prod-03");
        assert_eq!(config.context, ContextConfig::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<HoneypotConfig, _> = toml::from_str("[server]\nprot = 22\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = HoneypotConfig::default();
        config.session.failure_threshold = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = HoneypotConfig::default();
        config.server.banner = "SSH-2.0-x\r\nextra".into();
        assert!(config.validate().is_err());

        let mut config = HoneypotConfig::default();
        config.session.home_dir = Some("home/admin".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_timeout_capped_by_idle() {
        let mut session = SessionConfig::default();
        session.idle_timeout_secs = 10;
        session.backend_timeout_secs = 60;
        assert_eq!(session.backend_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_bind_address_ipv6() {
        let mut server = ServerConfig::default();
        server.host = "::".into();
        server.port = 2200;
        assert_eq!(server.bind_address(), "[::]:2200");
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = HoneypotConfig::load(Some(Path::new("/nonexistent/tanuki.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[context]\nmax_entries = 4\nmax_chars = 100\n").unwrap();

        let config = HoneypotConfig::load(Some(&path)).unwrap();
        assert_eq!(config.context.max_entries, 4);
        assert_eq!(config.context.max_chars, 100);
    }
}
