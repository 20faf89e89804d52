//! Status protocol and the reporter that delivers it.
//!
//! Messages are encoded as `{label},{kind},{count}` for an external
//! aggregator. The reporter is a single-writer actor: callers hand messages
//! to a bounded channel and one task owns the sink connection, so callers
//! never observe sink errors.

use crate::{config, error::SinkError, item::OutcomeKind, item::OUTCOME_UNIT};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusMessage {
    Total { label: String, count: usize },
    Outcome { label: String, kind: OutcomeKind },
    Finished { label: String },
}

impl StatusMessage {
    /// Wire form without any framing.
    pub fn encode(&self) -> String {
        match self {
            StatusMessage::Total { label, count } => format!("{label},total,{count}"),
            StatusMessage::Outcome { label, kind } => {
                format!("{label},{},{OUTCOME_UNIT}", kind.wire_kind())
            }
            StatusMessage::Finished { label } => format!("{label},finished,{OUTCOME_UNIT}"),
        }
    }
}

/// Destination for encoded status lines.
#[async_trait]
pub trait StatusSink: Send {
    async fn send(&mut self, line: &str) -> Result<(), SinkError>;

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// TCP sink; reconnects lazily after a failed write.
///
/// A write that fails after part of the frame was sent is reported as
/// `SinkError::PartialWrite` and the line is dropped rather than resent.
pub struct TcpSink {
    addr: String,
    connect_timeout: Duration,
    terminator: String,
    stream: Option<TcpStream>,
}

impl TcpSink {
    /// Connects eagerly so an unreachable aggregator fails the run before any
    /// item work starts.
    pub async fn connect(cfg: &config::Status) -> Result<Self> {
        let mut sink = Self {
            addr: format!("{}:{}", cfg.host, cfg.port),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_seconds.max(1)),
            terminator: cfg.terminator.clone(),
            stream: None,
        };
        let addr = sink.addr.clone();
        sink.ensure_connected()
            .await
            .map(|_| ())
            .with_context(|| format!("connecting to status sink {addr}"))?;
        info!("status sink connected addr={addr}");
        Ok(sink)
    }

    async fn ensure_connected(&mut self) -> Result<&mut TcpStream, SinkError> {
        if self.stream.is_none() {
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| SinkError::Unavailable(format!("connect timeout: {}", self.addr)))?
                .map_err(|e| SinkError::Unavailable(format!("{}: {e}", self.addr)))?;
            stream.set_nodelay(true).ok();
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| SinkError::Unavailable(self.addr.clone()))
    }
}

#[async_trait]
impl StatusSink for TcpSink {
    async fn send(&mut self, line: &str) -> Result<(), SinkError> {
        let mut frame = Vec::with_capacity(line.len() + self.terminator.len());
        frame.extend_from_slice(line.as_bytes());
        frame.extend_from_slice(self.terminator.as_bytes());

        let stream = self.ensure_connected().await?;
        let mut written = 0;
        while written < frame.len() {
            let res = match stream.write(&frame[written..]).await {
                Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero)),
                res => res,
            };
            match res {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    self.stream = None;
                    return Err(if written == 0 {
                        source.into()
                    } else {
                        SinkError::PartialWrite {
                            written,
                            len: frame.len(),
                            source,
                        }
                    });
                }
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush().await?;
            stream.shutdown().await.ok();
        }
        Ok(())
    }
}

/// Used when `status.enabled = false`: messages only go to the log.
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn send(&mut self, line: &str) -> Result<(), SinkError> {
        info!(target: "pixel_ingest::status", "{line}");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &config::Status) -> Self {
        Self {
            max_retries: cfg.max_retries,
            delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Cloneable handle for submitting status messages.
#[derive(Clone)]
pub struct StatusReporter {
    tx: mpsc::Sender<StatusMessage>,
}

/// Owns the actor task; join it after every `StatusReporter` clone is dropped.
pub struct ReporterTask {
    handle: JoinHandle<ReporterStats>,
}

impl StatusReporter {
    pub fn spawn<S>(sink: S, buffer: usize, retry: RetryPolicy) -> (Self, ReporterTask)
    where
        S: StatusSink + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(run_sink(sink, rx, retry));
        (Self { tx }, ReporterTask { handle })
    }

    /// Queues `msg`; waits only while the buffer is full. Never fails the caller.
    pub async fn report(&self, msg: StatusMessage) {
        if let Err(e) = self.tx.send(msg).await {
            warn!("status reporter closed; dropping {}", e.0.encode());
        }
    }
}

impl ReporterTask {
    pub async fn join(self) -> ReporterStats {
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("status reporter task failed: {e}");
                ReporterStats::default()
            }
        }
    }
}

async fn run_sink<S: StatusSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<StatusMessage>,
    retry: RetryPolicy,
) -> ReporterStats {
    let mut stats = ReporterStats::default();
    while let Some(msg) = rx.recv().await {
        let line = msg.encode();
        if deliver(&mut sink, &line, retry).await {
            stats.delivered += 1;
        } else {
            stats.dropped += 1;
        }
    }
    if let Err(e) = sink.flush().await {
        warn!("status sink flush failed: {e}");
    }
    debug!(
        "status reporter done delivered={} dropped={}",
        stats.delivered, stats.dropped
    );
    stats
}

async fn deliver<S: StatusSink>(sink: &mut S, line: &str, retry: RetryPolicy) -> bool {
    let mut attempt = 0u32;
    loop {
        match sink.send(line).await {
            Ok(()) => return true,
            Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                attempt += 1;
                debug!("status send failed (attempt {attempt}): {e}");
                tokio::time::sleep(retry.delay).await;
            }
            Err(e) => {
                warn!("dropping status message {line:?} after {attempt} retries: {e}");
                return false;
            }
        }
    }
}
