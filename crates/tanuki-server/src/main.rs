//! Tanuki honeypot binary.
//!
//! ## Usage
//!
//! ```bash
//! # Try the fake shell locally against a llama server on localhost
//! tanuki
//!
//! # Serve TCP clients on port 2222 with OpenAI, events to a JSON-lines file
//! OPENAI_API_KEY=sk-... tanuki --tcp --provider openai --log-file events.jsonl
//!
//! # Everything from a config file, port overridden
//! tanuki --tcp --config ~/honeypot.toml --port 22
//! ```
//!
//! Provider settings come from the environment:
//!
//! | Provider | Variables |
//! |----------|-----------|
//! | llama    | `LLAMA_ENDPOINT`, `LLAMA_MODEL` |
//! | openai   | `OPENAI_API_KEY` (required), `OPENAI_MODEL`, `OPENAI_BASE_URL` |
//! | mcp      | `MCP_SERVER_PATH` (required), `MCP_SERVER_ARGS`, `MCP_TIMEOUT` |
//!
//! A `.env` file in the working directory is read first; variables already
//! set in the environment win.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use tanuki_llm::{ProviderConfig, ProviderKind, create_backend};
use tanuki_server::{HoneypotConfig, Listener, Mode, Peer, SessionContext, session};
use tanuki_telemetry::LogOptions;

/// AI-backed fake shell honeypot.
#[derive(Parser, Debug)]
#[command(name = "tanuki", version)]
#[command(about = "Fake Linux shell whose output is generated by an AI backend")]
struct Args {
    /// Listen for TCP clients instead of running one local session
    #[arg(long)]
    tcp: bool,

    /// Bind address for --tcp
    #[arg(long)]
    host: Option<String>,

    /// Listen port for --tcp
    #[arg(long)]
    port: Option<u16>,

    /// AI backend: llama, openai or mcp (default: $AI_PROVIDER, then llama)
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Llama server URL (implies --provider llama)
    #[arg(long)]
    endpoint: Option<String>,

    /// Config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Concurrent session cap
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Seconds of input silence before a session is closed
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Append session events as JSON lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let dotenv = ignore_missing(dotenvy::dotenv());

    // Local mode shares the terminal with the fake shell: keep stderr quiet.
    let mut options = LogOptions {
        default_filter: if args.tcp { "info" } else { "warn" }.to_string(),
        ..LogOptions::default()
    };
    if let Some(path) = &args.log_file {
        options = options.with_event_log(expand(path));
    }
    let _log_guard = match tanuki_telemetry::init(&options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("tanuki: {e}");
            return ExitCode::FAILURE;
        }
    };

    match dotenv {
        Ok(Some(path)) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "reading .env failed");
            eprintln!("tanuki: reading .env: {e}");
            return ExitCode::FAILURE;
        }
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("tanuki: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = args.config.as_deref().map(expand);
    let mut config =
        HoneypotConfig::load(config_path.as_deref()).context("loading configuration")?;
    apply_overrides(&mut config, &args);
    config.validate().context("checking command-line overrides")?;
    let config = Arc::new(config);

    let provider = ProviderConfig::from_env(args.provider, args.endpoint.as_deref())
        .context("configuring AI backend")?;
    let backend = create_backend(&provider).context("starting AI backend")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    if args.tcp {
        let listener = Listener::bind(config, backend).await?;
        listener.run(shutdown).await?;
    } else {
        let ctx = SessionContext {
            backend,
            config,
            cancel: shutdown,
        };
        let mode = Mode::Local {
            username: whoami::username(),
        };
        let stdin = spawn_reader(std::io::stdin()).context("starting stdin reader")?;
        let stdout = tokio::io::stdout();
        let report = session::run(stdin, stdout, Peer::Local, mode, ctx).await;
        tracing::debug!(reason = %report.reason, "local session ended");
    }
    Ok(())
}

fn apply_overrides(config: &mut HoneypotConfig, args: &Args) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(max) = args.max_sessions {
        config.server.max_sessions = max;
    }
    if let Some(secs) = args.idle_timeout {
        config.session.idle_timeout_secs = secs;
    }
}

/// Pump a blocking reader into an async pipe from a detached thread.
///
/// `tokio::io::stdin` parks its read on the blocking pool, where it holds up
/// runtime shutdown until another line arrives. This thread is never joined.
fn spawn_reader<R>(mut source: R) -> std::io::Result<DuplexStream>
where
    R: std::io::Read + Send + 'static,
{
    let (pipe, mut sink) = tokio::io::duplex(8 * 1024);
    let handle = tokio::runtime::Handle::current();
    std::thread::Builder::new()
        .name("tanuki-stdin".into())
        .spawn(move || {
            let mut buf = [0u8; 1024];
            loop {
                let n = match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::debug!(error = %e, "stdin read failed");
                        break;
                    }
                };
                if handle.block_on(sink.write_all(&buf[..n])).is_err() {
                    break;
                }
            }
        })?;
    Ok(pipe)
}

/// A missing `.env` is the common case, not an error.
fn ignore_missing<T>(result: Result<T, dotenvy::Error>) -> Result<Option<T>, dotenvy::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn expand(path: &std::path::Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown requested");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "tanuki",
            "--tcp",
            "--port",
            "2200",
            "--provider",
            "openai",
            "--max-sessions",
            "4",
            "--idle-timeout",
            "30",
        ])
        .unwrap();
        assert!(args.tcp);
        assert_eq!(args.provider, Some(ProviderKind::OpenAi));

        let mut config = HoneypotConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.server.port, 2200);
        assert_eq!(config.server.max_sessions, 4);
        assert_eq!(config.session.idle_timeout_secs, 30);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(Args::try_parse_from(["tanuki", "--provider", "gemini"]).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reader_thread_forwards_until_eof() {
        use tokio::io::AsyncReadExt;

        let mut pipe = spawn_reader(std::io::Cursor::new(b"ls -la\nexit\n".to_vec())).unwrap();
        let mut out = String::new();
        pipe.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "ls -la\nexit\n");
    }

    /// Never yields a byte, like a terminal nobody is typing into.
    struct Silent(std::sync::mpsc::Receiver<()>);

    impl std::io::Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_pending_read_does_not_block_runtime_shutdown() {
        let (keep_open, rx) = std::sync::mpsc::channel::<()>();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            runtime.block_on(async {
                let _pipe = spawn_reader(Silent(rx)).unwrap();
            });
            drop(runtime);
            let _ = done_tx.send(());
        });

        done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("runtime shutdown waited on the pending read");
        drop(keep_open);
    }

    #[test]
    fn test_env_file_optional() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ignore_missing(dotenvy::from_path(dir.path().join(".env"))).unwrap();
        assert!(missing.is_none());

        let broken = dir.path().join("broken.env");
        std::fs::write(&broken, "OPENAI_API_KEY=\"unterminated\n").unwrap();
        assert!(ignore_missing(dotenvy::from_path(&broken)).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
