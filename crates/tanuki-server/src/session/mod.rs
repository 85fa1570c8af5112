//! Per-connection session engine.
//!
//! A session owns one connection from accept to close. Nothing in here is
//! shared between sessions: each [`runner`] task owns its [`Session`] state
//! outright, so there is no locking below this module.

pub mod cwd;
pub mod line;
pub mod runner;
pub mod state;
pub mod transcript;

use std::fmt;
use std::net::SocketAddr;

pub use cwd::FakeCwd;
pub use line::LineReader;
pub use runner::{Mode, SessionContext, SessionReport, TerminationReason, run};
pub use state::{FakeIdentity, Session};
pub use transcript::{Direction, Transcript, TranscriptEntry};

/// A session identifier (UUIDv7, time-ordered).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.short())
    }
}

/// Where a session's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// An accepted TCP connection.
    Remote(SocketAddr),
    /// The operator's own terminal (local interactive mode).
    Local,
}

impl Peer {
    /// Address shown in the `Last login:` line.
    pub fn ip_string(&self) -> String {
        match self {
            Self::Remote(addr) => addr.ip().to_string(),
            Self::Local => "127.0.0.1".to_string(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(addr) => write!(f, "{addr}"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_ordered() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert!(a < b);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_peer_display() {
        let peer = Peer::Remote("203.0.113.7:51234".parse().unwrap());
        assert_eq!(peer.to_string(), "203.0.113.7:51234");
        assert_eq!(peer.ip_string(), "203.0.113.7");
        assert_eq!(Peer::Local.to_string(), "local");
    }
}
