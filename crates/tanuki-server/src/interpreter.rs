//! Turns one command line into terminal output.
//!
//! A few commands are answered locally (`exit`, `logout`, `quit`, `pwd`).
//! Everything else goes to the AI backend with a bounded window of the
//! session's history. Backend failures never reach the client as errors:
//! they produce a plausible `command not found` instead.
//!
//! [`CommandInterpreter::interpret`] does not mutate the session. It returns a
//! [`StateDelta`] that the session loop applies once the output is written.

use std::sync::Arc;
use std::time::Duration;

use tanuki_llm::{AiBackend, GenerateRequest, LlmError, Message};

use crate::config::ContextConfig;
use crate::session::{Direction, Session, Transcript};

/// What the client should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Empty input: no output, no transcript entry.
    Silent,
    /// Text to send, then prompt again.
    Output(String),
    /// Text to send, then close the session.
    Exit(String),
}

/// Whether the backend was consulted, and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Success,
    /// The error, rendered for the event log.
    Failure(String),
}

/// Changes to session state implied by a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    /// `cd` targets in the order they appeared. `None` is a bare `cd`.
    pub cd_targets: Vec<Option<String>>,
    /// `None` when the command was handled locally.
    pub backend: Option<BackendStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub outcome: Outcome,
    pub delta: StateDelta,
}

impl Interpretation {
    fn local(outcome: Outcome) -> Self {
        Self {
            outcome,
            delta: StateDelta::default(),
        }
    }
}

/// Maps command lines to output using an AI backend.
pub struct CommandInterpreter {
    backend: Arc<dyn AiBackend>,
    context: ContextConfig,
    backend_timeout: Duration,
}

impl CommandInterpreter {
    pub fn new(
        backend: Arc<dyn AiBackend>,
        context: ContextConfig,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            context,
            backend_timeout,
        }
    }

    /// Produce output for `line` given the session so far.
    pub async fn interpret(&self, line: &str, session: &Session) -> Interpretation {
        let command = line.trim();
        if command.is_empty() {
            return Interpretation::local(Outcome::Silent);
        }

        match command.to_ascii_lowercase().as_str() {
            "exit" | "logout" | "quit" => {
                return Interpretation::local(Outcome::Exit("logout".to_string()));
            }
            "pwd" => {
                let cwd = session.cwd().current().to_string();
                return Interpretation::local(Outcome::Output(cwd));
            }
            _ => {}
        }

        let request = self.build_request(command, session);
        let started = std::time::Instant::now();
        let call = self.backend.generate(&request);
        let result = match tokio::time::timeout(self.backend_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.backend_timeout)),
        };

        match result {
            Ok(text) => {
                tracing::debug!(
                    backend = self.backend.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    chars = text.len(),
                    "backend replied"
                );
                Interpretation {
                    outcome: Outcome::Output(clean_output(&text)),
                    delta: StateDelta {
                        cd_targets: cd_targets(command),
                        backend: Some(BackendStatus::Success),
                    },
                }
            }
            Err(e) => {
                tracing::debug!(
                    backend = self.backend.name(),
                    model = self.backend.model(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "backend call failed, using fallback"
                );
                Interpretation {
                    outcome: Outcome::Output(fallback_output(command)),
                    delta: StateDelta {
                        cd_targets: Vec::new(),
                        backend: Some(BackendStatus::Failure(e.to_string())),
                    },
                }
            }
        }
    }

    /// The request sent for `command`: system prompt, history window, command.
    pub fn build_request(&self, command: &str, session: &Session) -> GenerateRequest {
        GenerateRequest::new(system_prompt(session), command)
            .with_history(context_window(session.transcript(), self.context))
    }
}

/// Instructions that make the backend play the shell for this session.
pub fn system_prompt(session: &Session) -> String {
    let identity = session.identity();
    format!(
        "You are simulating an interactive bash login shell on Ubuntu 22.04 LTS. \
         The hostname is {host}, the logged-in user is {user} (home directory {home}), \
         and the current working directory is {cwd}. \
         Reply with exactly the text the terminal would print for the command and nothing else: \
         no explanations, no markdown, no code fences, no prompt line. \
         If the command prints nothing, reply with an empty message. \
         Stay consistent with the earlier commands and outputs in this session.",
        host = identity.hostname,
        user = identity.username,
        home = identity.home,
        cwd = session.cwd().current(),
    )
}

/// The most recent transcript entries that fit the budget, oldest first.
///
/// Walks backwards from the newest entry and stops at whichever limit is hit
/// first, so the oldest entries are the ones dropped. A leading output whose
/// command fell outside the window is dropped as well.
pub fn context_window(transcript: &Transcript, budget: ContextConfig) -> Vec<Message> {
    if transcript.is_empty() {
        return Vec::new();
    }
    let mut picked = Vec::with_capacity(transcript.len().min(budget.max_entries));
    let mut chars = 0usize;

    for entry in transcript.iter().rev() {
        if picked.len() >= budget.max_entries {
            break;
        }
        let len = entry.text.chars().count();
        if chars + len > budget.max_chars {
            break;
        }
        chars += len;
        picked.push(entry);
    }

    while picked.last().is_some_and(|e| e.direction == Direction::Out) {
        picked.pop();
    }

    picked
        .into_iter()
        .rev()
        .map(|entry| match entry.direction {
            Direction::In => Message::user(entry.text.clone()),
            Direction::Out => Message::assistant(entry.text.clone()),
        })
        .collect()
}

/// Strip what chat models add around terminal text.
fn clean_output(text: &str) -> String {
    let mut body = text.trim_end();

    let trimmed = body.trim_start();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the fence line (it may carry a language tag) and the closer.
        body = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
        body = body.trim_end();
        if let Some(inner) = body.strip_suffix("```") {
            body = inner.trim_end();
        }
    }

    body.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// What bash prints for a program it cannot find.
fn fallback_output(command: &str) -> String {
    let program = command.split_whitespace().next().unwrap_or(command);
    format!("-bash: {program}: command not found")
}

/// `cd` targets in a compound command, left to right.
///
/// Splits on `;`, `&&` and `||`. Quotes around the target are removed and
/// option flags (`-P`, `-L`, `--`) are skipped; `-` alone is kept.
fn cd_targets(command: &str) -> Vec<Option<String>> {
    command
        .split(';')
        .flat_map(|part| part.split("&&"))
        .flat_map(|part| part.split("||"))
        .filter_map(|segment| {
            let mut words = segment.split_whitespace();
            if words.next() != Some("cd") {
                return None;
            }
            let target = words
                .find(|w| *w == "-" || !w.starts_with('-'))
                .map(|w| w.trim_matches(|c| c == '"' || c == '\'').to_string());
            Some(target)
        })
        .collect()
}
