//! Frame-level transports.
//!
//! A transport carries one logical message per frame (a single line of
//! JSON) and preserves message boundaries: writes are serialized under a
//! lock so concurrent senders cannot interleave partial frames. The
//! session layer owns correlation; the transport only moves frames.
//!
//! Two implementations:
//! - **Stdio**: spawn a child process, frames over its stdin/stdout. The
//!   transport owns the child's lifetime and guarantees termination even
//!   if the caller errors out before teardown.
//! - **Duplex**: in-memory pipe, used by tests and in-process wiring.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use tw_domain::config::McpServerConfig;

/// Trait for frame transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame. The trailing newline is appended by the transport.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Receive the next frame, suspending until one arrives.
    ///
    /// Fails with [`TransportError::Closed`] on EOF (peer exit or channel
    /// close); once closed, all further calls fail.
    async fn receive(&self) -> Result<String, TransportError>;

    /// Check if the transport is still alive.
    fn is_alive(&self) -> bool;

    /// Shut down the transport gracefully.
    async fn shutdown(&self);
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum number of non-JSON lines to skip before declaring the server broken.
const MAX_SKIP_LINES: usize = 1000;

/// Stdio transport: communicates with a child process over stdin/stdout.
///
/// Each frame is a single newline-delimited line. Lines on stdout that do
/// not look like JSON (a misconfigured server logging to stdout) are
/// skipped up to [`MAX_SKIP_LINES`].
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawn a child process from the given server config.
    pub fn spawn(config: &McpServerConfig) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(TransportError::Io)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            )))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            )))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            alive: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(frame.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let bytes_read = stdout.read_line(&mut line).await?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Closed);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            // Skip lines that don't look like JSON (e.g. stray logging).
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "server produced too many non-JSON lines on stdout",
                )));
            }
            tracing::debug!(line = %trimmed, "skipping non-JSON line from server stdout");
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        // Close stdin to signal the process to exit.
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing server stdin");
            }
        }
        // Give the process a moment to exit gracefully.
        let timeout = tokio::time::timeout(
            tokio::time::Duration::from_secs(5),
            child.wait(),
        )
        .await;
        match timeout {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "tool server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for tool server process");
            }
            Err(_) => {
                tracing::warn!("tool server process did not exit within timeout, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill tool server process");
                }
            }
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Backstop for callers that error out before shutdown; the spawned
        // Command also carries kill_on_drop.
        if let Ok(mut child) = self.child.try_lock() {
            if let Err(e) = child.start_kill() {
                if e.kind() != std::io::ErrorKind::InvalidInput {
                    tracing::debug!(error = %e, "failed to kill tool server on drop");
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Duplex transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory transport over a [`DuplexStream`].
///
/// Used by tests and for wiring a client session to an in-process server.
pub struct DuplexTransport {
    reader: Mutex<BufReader<ReadHalf<DuplexStream>>>,
    writer: Mutex<WriteHalf<DuplexStream>>,
    alive: AtomicBool,
}

impl DuplexTransport {
    /// Wrap one end of a duplex pipe.
    pub fn new(stream: DuplexStream) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(BufReader::new(read)),
            writer: Mutex::new(write),
            alive: AtomicBool::new(true),
        }
    }

    /// Create a connected pair of transports.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Self::new(a), Self::new(b))
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut reader = self.reader.lock().await;
        loop {
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Closed);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "error shutting down duplex transport");
        }
    }
}
