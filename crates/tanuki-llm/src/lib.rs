//! AI backend abstraction for tanuki sessions.
//!
//! The session engine never talks to a model directly. It builds a
//! [`GenerateRequest`] from the bounded part of a session transcript and hands
//! it to whatever [`AiBackend`] was selected at startup. All backends look the
//! same from the outside: text on success, [`LlmError`] on failure.

mod config;
mod http;
mod ollama;
mod openai;
mod process;

pub use config::{
    ConfigError, LlamaConfig, McpConfig, OpenAiConfig, ProviderConfig, ProviderKind,
};
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use process::ProcessBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A command typed by the remote client.
    User,
    /// Output previously shown for a command.
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message.
    pub role: Role,
    /// Message content.
    pub content: String,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One generation request: instruction, windowed history, newest command.
///
/// Ephemeral. Built per command and dropped once the backend answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Instruction steering the model toward raw shell output.
    pub system: String,
    /// Earlier commands and outputs, oldest first.
    pub history: Vec<Message>,
    /// The command to answer, verbatim.
    pub command: String,
}

impl GenerateRequest {
    /// Create a request with no history.
    pub fn new(system: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            history: Vec::new(),
            command: command.into(),
        }
    }

    /// Attach windowed history.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Render the whole request as a single prompt string.
    ///
    /// Used by backends that accept one prompt rather than a message list.
    /// History is shown as a terminal transcript so the model sees what the
    /// client has already seen.
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::with_capacity(self.system.len() + self.command.len() + 64);
        prompt.push_str(&self.system);
        prompt.push_str("\n\n");

        if !self.history.is_empty() {
            prompt.push_str("Terminal session so far:\n");
            for message in &self.history {
                match message.role {
                    Role::User => {
                        prompt.push_str("$ ");
                        prompt.push_str(&message.content);
                    }
                    Role::Assistant => prompt.push_str(&message.content),
                }
                if !message.content.ends_with('\n') {
                    prompt.push('\n');
                }
            }
            prompt.push('\n');
        }

        prompt.push_str("Respond with exactly what the terminal shows after running: ");
        prompt.push_str(&self.command);
        prompt
    }

    /// Render history plus the command as chat messages.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = self.history.clone();
        messages.push(Message::user(self.command.clone()));
        messages
    }
}

/// Error type for backend operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Backend not configured, not running, or unreachable.
    #[error("backend not available: {0}")]
    Unavailable(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthError(String),

    /// Rate limited.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Request rejected by the backend.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Non-success response not covered above.
    #[error("api error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// Transport failure.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Response arrived but could not be understood.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Response carried no generated text at all.
    #[error("empty response from {0}")]
    EmptyResponse(String),

    /// Backend did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type for backend operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// The text-generation capability consumed by sessions.
///
/// Implementations are shared across every session, so they must be
/// `Send + Sync` and must not assume requests arrive one at a time.
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Provider name (e.g., "llama", "openai", "mcp").
    fn name(&self) -> &str;

    /// Model identifier used for requests, for logging.
    fn model(&self) -> &str;

    /// Generate simulated terminal output for a request.
    async fn generate(&self, request: &GenerateRequest) -> LlmResult<String>;
}

/// Build the backend selected by a provider configuration.
///
/// This is the only place that knows about concrete backends. Process
/// backends spawn their child here, so call it once at startup.
pub fn create_backend(config: &ProviderConfig) -> LlmResult<Arc<dyn AiBackend>> {
    let backend: Arc<dyn AiBackend> = match config {
        ProviderConfig::Llama(cfg) => Arc::new(OllamaBackend::new(cfg.clone())?),
        ProviderConfig::OpenAi(cfg) => Arc::new(OpenAiBackend::new(cfg.clone())?),
        ProviderConfig::Mcp(cfg) => Arc::new(ProcessBackend::spawn(cfg.clone())?),
    };
    tracing::info!(
        provider = backend.name(),
        model = backend.model(),
        "AI backend ready"
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let user = Message::user("ls -la");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content, "ls -la");

        let assistant = Message::assistant("total 0");
        assert_eq!(assistant.role, Role::Assistant);
    }

    #[test]
    fn test_render_prompt_without_history() {
        let request = GenerateRequest::new("Pretend to be bash.", "uname -a");
        let prompt = request.render_prompt();

        assert!(prompt.starts_with("Pretend to be bash."));
        assert!(!prompt.contains("Terminal session so far"));
        assert!(prompt.ends_with("uname -a"));
    }

    #[test]
    fn test_render_prompt_shows_history_as_transcript() {
        let request = GenerateRequest::new("sys", "cat notes.txt").with_history(vec![
            Message::user("ls"),
            Message::assistant("notes.txt\n"),
        ]);
        let prompt = request.render_prompt();

        let history_at = prompt.find("$ ls\nnotes.txt\n").expect("history rendered");
        let command_at = prompt.rfind("cat notes.txt").unwrap();
        assert!(history_at < command_at);
    }

    #[test]
    fn test_to_messages_appends_command_last() {
        let request = GenerateRequest::new("sys", "whoami")
            .with_history(vec![Message::user("id"), Message::assistant("uid=0(root)")]);
        let messages = request.to_messages();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], Message::user("whoami"));
    }

    #[test]
    fn test_error_display() {
        let err = LlmError::ApiError {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "api error (502): bad gateway");
    }
}
