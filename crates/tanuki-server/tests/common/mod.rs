//! Shared fixtures for session and listener tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tanuki_llm::{AiBackend, GenerateRequest, LlmError, LlmResult};
use tanuki_server::{HoneypotConfig, Mode, Peer, SessionContext, SessionReport, session};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One scripted backend answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail,
    /// Never answers.
    Hang,
}

/// Backend that plays back a script, then repeats a fallback reply.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answers every command with `text`.
    pub fn replying(text: &str) -> Arc<Self> {
        Self::new([], Reply::Text(text.to_string()))
    }

    pub fn failing() -> Arc<Self> {
        Self::new([], Reply::Fail)
    }

    pub fn hanging() -> Arc<Self> {
        Self::new([], Reply::Hang)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "script-v1"
    }

    async fn generate(&self, request: &GenerateRequest) -> LlmResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail => Err(LlmError::Unavailable("scripted failure".into())),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Client end of an in-memory session.
pub struct Client {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    pub async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
    }

    /// Read until `needle` has been seen; returns everything read.
    pub async fn read_until(&mut self, needle: &str) -> String {
        read_until(&mut self.reader, needle).await
    }

    /// Read until the session closes its side.
    pub async fn read_to_end(&mut self) -> String {
        let mut out = String::new();
        self.reader.read_to_string(&mut out).await.unwrap();
        out
    }
}

/// Start a network-mode session over an in-memory pipe.
pub fn spawn_session(
    config: HoneypotConfig,
    backend: Arc<dyn AiBackend>,
    cancel: CancellationToken,
) -> (Client, JoinHandle<SessionReport>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let (reader, writer) = tokio::io::split(client);

    let ctx = SessionContext {
        backend,
        config: Arc::new(config),
        cancel,
    };
    let peer = Peer::Remote("192.0.2.10:55022".parse().unwrap());
    let handle = tokio::spawn(session::run(
        server_read,
        server_write,
        peer,
        Mode::Network,
        ctx,
    ));
    (Client { reader, writer }, handle)
}

/// Feed `input` in one go and collect the whole conversation.
pub async fn run_script(
    config: HoneypotConfig,
    backend: Arc<dyn AiBackend>,
    input: &str,
) -> (SessionReport, String) {
    let (mut client, handle) = spawn_session(config, backend, CancellationToken::new());
    client.send(input).await;
    let out = client.read_to_end().await;
    (handle.await.unwrap(), out)
}

/// Read from any stream until `needle` shows up, failing after five seconds.
pub async fn read_until<R: AsyncRead + Unpin>(reader: &mut R, needle: &str) -> String {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok::<bool, io::Error>(false);
            }
            seen.extend_from_slice(&buf[..n]);
            if String::from_utf8_lossy(&seen).contains(needle) {
                return Ok(true);
            }
        }
    })
    .await;

    let text = String::from_utf8_lossy(&seen).into_owned();
    match found {
        Ok(Ok(true)) => text,
        other => panic!("never saw {needle:?} (result {other:?}); got {text:?}"),
    }
}

/// Log lines captured from the fmt subscriber.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Install as the thread's default subscriber. Works with the
    /// current-thread test runtime, where spawned tasks share the thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let capture = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || capture.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Login lines accepted by every test session.
pub const LOGIN: &str = "root\r\ntoor\r\n";
