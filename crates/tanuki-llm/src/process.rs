//! Process-protocol backend: a long-lived child speaking line-delimited JSON-RPC.
//!
//! Each request is one line on the child's stdin:
//!
//! ```json
//! {"jsonrpc":"2.0","id":7,"method":"generate","params":{"prompt":"..."}}
//! ```
//!
//! and the child answers with one line carrying either `result.content` or an
//! `error` member. The pipes are shared by every session, so requests are
//! serialized behind an async mutex. A caller may be dropped mid-request (its
//! own timeout, or server shutdown), so a reply is only ever taken as the
//! answer to the request whose id it carries.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::McpConfig;
use crate::{AiBackend, GenerateRequest, LlmError, LlmResult};

/// Backend that forwards prompts to a child process.
pub struct ProcessBackend {
    config: McpConfig,
    io: Mutex<ProcessIo>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ProcessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBackend")
            .field("config", &self.config)
            .finish()
    }
}

struct ProcessIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Set while a request line is being written. Still set on entry means the
    /// previous writer was dropped part way and the child holds a torn line.
    torn_write: bool,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: GenerateParams<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateParams<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl ProcessBackend {
    /// Spawn the configured child. Must be called from within a tokio runtime.
    pub fn spawn(config: McpConfig) -> LlmResult<Self> {
        if config.server_path.trim().is_empty() {
            return Err(LlmError::Unavailable("process backend path is empty".into()));
        }

        let mut child = Command::new(&config.server_path)
            .args(&config.server_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LlmError::Unavailable(format!("failed to start {}: {e}", config.server_path))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LlmError::Unavailable("child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LlmError::Unavailable("child stdout not captured".into()))?;

        tracing::info!(
            path = %config.server_path,
            args = ?config.server_args,
            pid = child.id(),
            "process backend started"
        );

        Ok(Self {
            config,
            io: Mutex::new(ProcessIo {
                child,
                stdin,
                stdout: BufReader::new(stdout),
                torn_write: false,
            }),
            next_id: AtomicU64::new(1),
        })
    }
}

impl ProcessIo {
    async fn roundtrip(&mut self, id: u64, line: &str) -> LlmResult<String> {
        if self.torn_write {
            // Terminate the partial line; the child answers it with a parse
            // error or not at all, and neither carries our id.
            tracing::debug!("closing torn request line");
            self.write(b"\n").await?;
        }
        self.torn_write = true;
        self.write(line.as_bytes()).await?;
        self.torn_write = false;

        loop {
            let mut reply = String::new();
            let n = self
                .stdout
                .read_line(&mut reply)
                .await
                .map_err(|e| LlmError::NetworkError(format!("read from process failed: {e}")))?;
            if n == 0 {
                return Err(LlmError::Unavailable("process closed its output".into()));
            }
            if reply.trim().is_empty() {
                continue;
            }

            let response: RpcResponse = serde_json::from_str(reply.trim())
                .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

            let reply_id = response.id.as_ref().and_then(Value::as_u64);
            if reply_id != Some(id) {
                tracing::debug!(?reply_id, expected = id, "discarding unmatched process reply");
                continue;
            }

            return extract_content(response);
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> LlmResult<()> {
        self.stdin
            .write_all(bytes)
            .await
            .map_err(|e| LlmError::Unavailable(format!("write to process failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| LlmError::Unavailable(format!("flush to process failed: {e}")))
    }
}

fn extract_content(response: RpcResponse) -> LlmResult<String> {
    if let Some(error) = response.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(LlmError::ApiError {
            status: 0,
            message,
        });
    }

    response
        .result
        .as_ref()
        .and_then(|result| result.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::EmptyResponse("mcp".to_string()))
}

#[async_trait]
impl AiBackend for ProcessBackend {
    fn name(&self) -> &str {
        "mcp"
    }

    fn model(&self) -> &str {
        &self.config.server_path
    }

    async fn generate(&self, request: &GenerateRequest) -> LlmResult<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let prompt = request.render_prompt();
        let mut line = serde_json::to_string(&RpcRequest {
            jsonrpc: "2.0",
            id,
            method: "generate",
            params: GenerateParams { prompt: &prompt },
        })
        .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        line.push('\n');

        let mut io = self.io.lock().await;
        if let Ok(Some(status)) = io.child.try_wait() {
            return Err(LlmError::Unavailable(format!("process exited ({status})")));
        }

        tokio::time::timeout(self.config.timeout, io.roundtrip(id, &line))
            .await
            .map_err(|_| LlmError::Timeout(self.config.timeout))?
    }
}
