//! Server configuration constants.
//!
//! Defaults for every tunable in [`crate::config`]. Centralized so the
//! config file, the CLI help and the tests agree.

use std::time::Duration;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 2222;

/// Default bind address (all interfaces; this is a trap, not a service).
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Identification line sent on accept, without the trailing CRLF.
pub const DEFAULT_BANNER: &str = "SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1";

/// Line sent after the banner when the server is at capacity.
pub const DEFAULT_BUSY_MESSAGE: &str = "Exceeded MaxStartups";

/// Concurrent session cap.
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// How long shutdown waits for sessions to close.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Fake hostname shown in prompts.
pub const DEFAULT_HOSTNAME: &str = "ubuntu";

/// Input silence that ends a session.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Lines accepted in the shell before the session is closed.
pub const DEFAULT_MAX_COMMANDS: u32 = 500;

/// Consecutive backend failures that end a session.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Upper bound on a single backend call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest accepted input line; the rest is cut.
pub const DEFAULT_MAX_LINE_BYTES: usize = 4096;

/// Transcript entries kept in memory per session.
pub const DEFAULT_TRANSCRIPT_CAPACITY: usize = 256;

/// Transcript entries sent to the backend per request.
pub const DEFAULT_CONTEXT_MAX_ENTRIES: usize = 20;

/// Characters of history sent to the backend per request.
pub const DEFAULT_CONTEXT_MAX_CHARS: usize = 8000;

/// Login greeting, shown before the `Last login:` line.
pub const DEFAULT_MOTD: &str = "\
Welcome to Ubuntu 22.04.1 LTS (GNU/Linux 5.15.0-58-generic x86_64)\n\n \
* Documentation:  https://help.ubuntu.com\n \
* Management:     https://landscape.canonical.com\n \
* Support:        https://ubuntu.com/advantage\n";
