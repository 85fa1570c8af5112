//! Mutable state of one session.

use crate::config::SessionConfig;
use crate::interpreter::{BackendStatus, StateDelta};

use super::cwd::FakeCwd;
use super::transcript::{Direction, Transcript, TranscriptEntry};

/// Longest username kept from the login prompt.
const MAX_USERNAME_CHARS: usize = 32;

/// Credentials the client typed, plus where that puts them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeIdentity {
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub home: String,
}

impl FakeIdentity {
    /// Accept whatever was typed. An empty username becomes `root`.
    pub fn new(username: &str, password: &str, config: &SessionConfig) -> Self {
        let username = sanitize_username(username);
        let home = match &config.home_dir {
            Some(home) => home.clone(),
            None if username == "root" => "/root".to_string(),
            None => format!("/home/{username}"),
        };
        Self {
            username,
            password: password.to_string(),
            hostname: config.hostname.clone(),
            home,
        }
    }

    pub fn is_root(&self) -> bool {
        self.username == "root"
    }
}

fn sanitize_username(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() && !c.is_whitespace() && *c != '/')
        .take(MAX_USERNAME_CHARS)
        .collect();
    if cleaned.is_empty() {
        "root".to_string()
    } else {
        cleaned
    }
}

/// Everything the engine knows about one connection once it reaches the shell.
#[derive(Debug)]
pub struct Session {
    identity: FakeIdentity,
    created_at: u64,
    last_activity: u64,
    transcript: Transcript,
    cwd: FakeCwd,
    commands: u32,
    consecutive_failures: u32,
}

impl Session {
    pub fn new(identity: FakeIdentity, transcript_capacity: usize, now: u64) -> Self {
        let cwd = FakeCwd::new(identity.home.clone());
        Self {
            identity,
            created_at: now,
            last_activity: now,
            transcript: Transcript::new(transcript_capacity),
            cwd,
            commands: 0,
            consecutive_failures: 0,
        }
    }

    pub fn identity(&self) -> &FakeIdentity {
        &self.identity
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn cwd(&self) -> &FakeCwd {
        &self.cwd
    }

    /// Lines read in the shell so far, empty ones included.
    pub fn commands(&self) -> u32 {
        self.commands
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Count a received line and return the new total.
    pub fn count_line(&mut self, at: u64) -> u32 {
        self.last_activity = at;
        self.commands = self.commands.saturating_add(1);
        self.commands
    }

    /// Append to the transcript and emit the entry to the event log.
    pub fn record(&mut self, direction: Direction, text: &str, at: u64) -> &TranscriptEntry {
        let entry = self.transcript.push(direction, text, at);
        tracing::info!(
            seq = entry.seq,
            direction = %entry.direction,
            text = %entry.text,
            at_millis = entry.at_millis,
            "transcript"
        );
        entry
    }

    /// Fold an interpreter result into the session.
    pub fn apply(&mut self, delta: &StateDelta) {
        for target in &delta.cd_targets {
            self.cwd.change_dir(target.as_deref());
        }
        match &delta.backend {
            Some(BackendStatus::Success) => self.consecutive_failures = 0,
            Some(BackendStatus::Failure(_)) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
            None => {}
        }
    }

    /// `user@host:cwd$ `, with `#` for root.
    pub fn prompt(&self) -> String {
        let sigil = if self.identity.is_root() { '#' } else { '$' };
        format!(
            "{}@{}:{}{sigil} ",
            self.identity.username,
            self.identity.hostname,
            self.cwd.display()
        )
    }
}
