//! TCP accept loop.
//!
//! Each accepted connection gets its own task on a [`TaskTracker`]. Admission
//! is a plain counter: a connection over the limit gets the banner and the
//! busy line, then is closed without ever reaching the session engine.
//!
//! Cancelling the shutdown token stops accepting, cancels every session, and
//! waits up to the configured grace period for them to close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tanuki_llm::AiBackend;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::HoneypotConfig;
use crate::session::{self, Mode, Peer, SessionContext};

/// How long a rejected client gets to receive the busy line.
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a failed accept (usually fd exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that stop the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("listener I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Active session count with a hard ceiling.
#[derive(Debug)]
pub struct SessionCounter {
    active: AtomicUsize,
    max: usize,
}

impl SessionCounter {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            max,
        })
    }

    /// Claim a slot if one is free. The slot is released on drop.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SessionSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| SessionSlot {
                counter: Arc::clone(self),
            })
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// One admitted session.
#[derive(Debug)]
pub struct SessionSlot {
    counter: Arc<SessionCounter>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.counter.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A bound honeypot listener.
pub struct Listener {
    listener: TcpListener,
    config: Arc<HoneypotConfig>,
    backend: Arc<dyn AiBackend>,
    counter: Arc<SessionCounter>,
    tracker: TaskTracker,
}

impl Listener {
    /// Bind the configured address. Port 0 picks a free port.
    pub async fn bind(
        config: Arc<HoneypotConfig>,
        backend: Arc<dyn AiBackend>,
    ) -> Result<Self, ServerError> {
        let addr = config.server.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            counter: SessionCounter::new(config.server.max_sessions),
            config,
            backend,
            tracker: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn counter(&self) -> Arc<SessionCounter> {
        Arc::clone(&self.counter)
    }

    /// Accept until `shutdown` is cancelled, then drain sessions.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let local = self.local_addr()?;
        tracing::info!(
            addr = %local,
            max_sessions = self.counter.max(),
            backend = self.backend.name(),
            model = self.backend.model(),
            "listening"
        );

        loop {
            let (stream, addr) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let Some(slot) = self.counter.try_acquire() else {
                tracing::info!(
                    peer = %addr,
                    active = self.counter.active(),
                    "connection rejected"
                );
                let banner = self.config.server.banner.clone();
                let busy = self.config.server.busy_message.clone();
                self.tracker.spawn(reject(stream, banner, busy));
                continue;
            };

            let ctx = SessionContext {
                backend: Arc::clone(&self.backend),
                config: Arc::clone(&self.config),
                cancel: shutdown.child_token(),
            };
            self.tracker.spawn(serve(stream, addr, slot, ctx));
        }

        self.tracker.close();
        let active = self.counter.active();
        tracing::info!(active, "shutting down");

        let grace = self.config.server.shutdown_grace();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.counter.active(),
                grace_secs = grace.as_secs(),
                "sessions still open after grace period"
            );
        }
        Ok(())
    }
}

/// Banner, then hand off to the session engine. Holds `slot` until done.
async fn serve(
    mut stream: TcpStream,
    addr: SocketAddr,
    slot: SessionSlot,
    ctx: SessionContext,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %addr, error = %e, "set_nodelay failed");
    }

    let banner = format!("{}\r\n", ctx.config.server.banner);
    if let Err(e) = stream.write_all(banner.as_bytes()).await {
        tracing::debug!(peer = %addr, error = %e, "banner write failed");
        return;
    }

    let (reader, writer) = stream.into_split();
    session::run(reader, writer, Peer::Remote(addr), Mode::Network, ctx).await;
    drop(slot);
}

async fn reject(mut stream: TcpStream, banner: String, busy: String) {
    let text = format!("{banner}\r\n{busy}\r\n");
    let write = async {
        stream.write_all(text.as_bytes()).await?;
        stream.shutdown().await
    };
    match tokio::time::timeout(REJECT_WRITE_TIMEOUT, write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "busy write failed"),
        Err(_) => tracing::debug!("busy write timed out"),
    }
}
