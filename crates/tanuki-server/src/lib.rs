//! Tanuki server library
//!
//! A low-interaction honeypot that pretends to be a Linux shell. Clients get
//! an SSH-looking banner, a login prompt that accepts anything, and a prompt
//! whose every answer is generated by an AI backend from the session's own
//! history.

pub mod config;
pub mod constants;
pub mod interpreter;
pub mod listener;
pub mod session;

pub use config::{ConfigError, ContextConfig, HoneypotConfig, ServerConfig, SessionConfig};
pub use interpreter::{CommandInterpreter, Interpretation, Outcome, StateDelta};
pub use listener::{Listener, ServerError, SessionCounter, SessionSlot};
pub use session::{Mode, Peer, SessionContext, SessionId, SessionReport, TerminationReason};
