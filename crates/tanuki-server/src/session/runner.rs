//! The per-connection state machine.
//!
//! ```text
//! Network: login as: -> password: -> welcome -> shell loop -> close
//! Local:                                        shell loop -> close
//! ```
//!
//! Every read is bounded by the idle timeout and every await races the
//! shutdown token. The loop ends with exactly one [`TerminationReason`], which
//! is logged with the session's counters before the connection is closed.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tanuki_llm::AiBackend;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::HoneypotConfig;
use crate::interpreter::{BackendStatus, CommandInterpreter, Outcome};

use super::line::{LineReader, to_wire};
use super::state::{FakeIdentity, Session};
use super::transcript::Direction;
use super::{Peer, SessionId, now_millis};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Client typed `exit`, `logout` or `quit`.
    Exit,
    IdleTimeout,
    MaxCommands,
    /// End of stream or a failed write.
    Disconnected,
    ReadError,
    /// Too many backend failures in a row.
    BackendFailures,
    /// Server shutdown.
    Shutdown,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::IdleTimeout => "idle timeout",
            Self::MaxCommands => "max commands",
            Self::Disconnected => "disconnected",
            Self::ReadError => "read error",
            Self::BackendFailures => "backend failures",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the connection was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// TCP client: login prompts, welcome text, CRLF output.
    Network,
    /// Operator terminal: straight to the prompt as `username`.
    Local { username: String },
}

/// Shared handles a session needs.
#[derive(Clone)]
pub struct SessionContext {
    pub backend: Arc<dyn AiBackend>,
    pub config: Arc<HoneypotConfig>,
    pub cancel: CancellationToken,
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: SessionId,
    pub reason: TerminationReason,
    /// `None` if the client never got past the login prompts.
    pub username: Option<String>,
    pub commands: u32,
    /// Transcript entries appended over the session's life.
    pub entries: u64,
}

/// Err means the session is over.
type Flow<T> = Result<T, TerminationReason>;

/// Run one session to completion over the given byte streams.
pub async fn run<R, W>(
    reader: R,
    writer: W,
    peer: Peer,
    mode: Mode,
    ctx: SessionContext,
) -> SessionReport
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let id = SessionId::new();
    let span = tracing::info_span!("session", session = %id, %peer);
    SessionLoop::new(id, peer, mode, reader, writer, ctx)
        .run()
        .instrument(span)
        .await
}

struct SessionLoop<R, W> {
    id: SessionId,
    peer: Peer,
    mode: Mode,
    reader: LineReader<R>,
    writer: W,
    crlf: bool,
    interpreter: CommandInterpreter,
    config: Arc<HoneypotConfig>,
    cancel: CancellationToken,
}

impl<R, W> SessionLoop<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn new(
        id: SessionId,
        peer: Peer,
        mode: Mode,
        reader: R,
        writer: W,
        ctx: SessionContext,
    ) -> Self {
        let session_config = &ctx.config.session;
        let interpreter = CommandInterpreter::new(
            ctx.backend,
            ctx.config.context,
            session_config.backend_timeout(),
        );
        Self {
            id,
            peer,
            crlf: mode == Mode::Network,
            mode,
            reader: LineReader::new(reader, session_config.max_line_bytes),
            writer,
            interpreter,
            config: ctx.config.clone(),
            cancel: ctx.cancel,
        }
    }

    async fn run(mut self) -> SessionReport {
        let started = Instant::now();
        tracing::info!(
            mode = if self.crlf { "network" } else { "local" },
            "connection opened"
        );

        let mut slot = None;
        let reason = self.drive(&mut slot).await;

        if reason == TerminationReason::IdleTimeout && slot.is_some() {
            let _ = self.send("\ntimed out waiting for input: auto-logout\n").await;
        }
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(error = %e, "shutdown after close failed");
        }

        let (username, commands, entries) = match &slot {
            Some(session) => (
                Some(session.identity().username.clone()),
                session.commands(),
                session.transcript().total(),
            ),
            None => (None, 0, 0),
        };

        tracing::info!(
            reason = %reason,
            commands,
            entries,
            duration_ms = started.elapsed().as_millis() as u64,
            "session closed"
        );

        SessionReport {
            id: self.id,
            reason,
            username,
            commands,
            entries,
        }
    }

    async fn drive(&mut self, slot: &mut Option<Session>) -> TerminationReason {
        let identity = match self.login().await {
            Ok(identity) => identity,
            Err(reason) => return reason,
        };

        let session = slot.insert(Session::new(
            identity,
            self.config.session.transcript_capacity,
            now_millis(),
        ));

        if let Err(reason) = self.welcome().await {
            return reason;
        }

        loop {
            if let Err(reason) = self.step(session).await {
                return reason;
            }
        }
    }

    /// Collect credentials. Every pair is accepted.
    async fn login(&mut self) -> Flow<FakeIdentity> {
        if let Mode::Local { username } = &self.mode {
            let identity = FakeIdentity::new(username, "", &self.config.session);
            tracing::info!(username = %identity.username, "local session");
            return Ok(identity);
        }

        self.send("login as: ").await?;
        let mut typed = self.next_line().await?;
        if typed.starts_with("SSH-") {
            // A real SSH client: its identification line, then binary key
            // exchange that nothing here answers.
            tracing::info!(client_version = %typed, "ssh client identification");
            typed = self.next_line().await?;
        }

        let mut identity = FakeIdentity::new(&typed, "", &self.config.session);
        let prompt = format!("{}@{}'s password: ", identity.username, identity.hostname);
        self.send(&prompt).await?;
        identity.password = self.next_line().await?;

        tracing::info!(
            username = %typed,
            password = %identity.password,
            "credentials attempted"
        );
        Ok(identity)
    }

    /// MOTD and a `Last login:` line a few hours to days in the past.
    async fn welcome(&mut self) -> Flow<()> {
        if self.mode != Mode::Network {
            return Ok(());
        }

        let minutes_ago = rand::thread_rng().gen_range(30..=72 * 60);
        let last = chrono::Local::now() - chrono::Duration::minutes(minutes_ago);

        let mut text = String::new();
        let motd = self.config.session.motd.trim_end();
        if !motd.is_empty() {
            text.push_str(motd);
            text.push_str("\n\n");
        }
        text.push_str(&format!(
            "Last login: {} from {}\n",
            last.format("%a %b %e %H:%M:%S %Y"),
            self.peer.ip_string()
        ));
        self.send(&text).await
    }

    /// One prompt, one line, one response.
    async fn step(&mut self, session: &mut Session) -> Flow<()> {
        self.send(&session.prompt()).await?;
        let line = self.next_line().await?;
        let received = now_millis();

        let limit = self.config.session.max_commands;
        if session.count_line(received) > limit {
            tracing::info!(limit, "command limit reached");
            return Err(TerminationReason::MaxCommands);
        }

        let interpreted = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.interpreter.interpret(&line, session) => Some(result),
        };
        let Some(interpretation) = interpreted else {
            session.record(Direction::In, &line, received);
            return Err(TerminationReason::Shutdown);
        };

        let (text, exit) = match &interpretation.outcome {
            Outcome::Silent => return Ok(()),
            Outcome::Output(text) => (text.as_str(), false),
            Outcome::Exit(text) => (text.as_str(), true),
        };

        session.record(Direction::In, &line, received);
        session.apply(&interpretation.delta);
        session.record(Direction::Out, text, now_millis());

        if !text.is_empty() {
            self.send(&format!("{text}\n")).await?;
        }
        if exit {
            return Err(TerminationReason::Exit);
        }

        if let Some(BackendStatus::Failure(error)) = &interpretation.delta.backend {
            let consecutive = session.consecutive_failures();
            tracing::warn!(error = %error, consecutive, "backend failure");
            if consecutive >= self.config.session.failure_threshold {
                return Err(TerminationReason::BackendFailures);
            }
        }
        Ok(())
    }

    async fn next_line(&mut self) -> Flow<String> {
        let idle = self.config.session.idle_timeout();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TerminationReason::Shutdown),
            read = tokio::time::timeout(idle, self.reader.read_line()) => match read {
                Err(_) => Err(TerminationReason::IdleTimeout),
                Ok(Ok(Some(line))) => Ok(line),
                Ok(Ok(None)) => Err(TerminationReason::Disconnected),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    Err(TerminationReason::Disconnected)
                }
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "read failed");
                    Err(TerminationReason::ReadError)
                }
            },
        }
    }

    /// Write and flush. A client that stops reading is treated as idle.
    async fn send(&mut self, text: &str) -> Flow<()> {
        let idle = self.config.session.idle_timeout();
        let wire = to_wire(text, self.crlf);
        let writer = &mut self.writer;
        let write = async {
            writer.write_all(wire.as_bytes()).await?;
            writer.flush().await
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TerminationReason::Shutdown),
            result = tokio::time::timeout(idle, write) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "write failed");
                    Err(TerminationReason::Disconnected)
                }
                Err(_) => Err(TerminationReason::IdleTimeout),
            },
        }
    }
}
