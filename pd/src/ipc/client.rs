//! IPC client for communicating with the daemon
//!
//! Provides a simple interface for the `pd` CLI to send requests to the
//! daemon via Unix Domain Socket.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::get_socket_path;
use super::messages::{PowerReply, PowerRequest};
use crate::domain::{ActivityState, EventSnapshot};

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum message size
const MAX_MESSAGE_SIZE: usize = 4096;

/// Client for communicating with the daemon via IPC
#[derive(Debug, Clone)]
pub struct PowerClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for PowerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client with a custom socket path (for testing)
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Submit a state transition request; returns the assigned event id
    pub async fn submit(&self, state: ActivityState, machine: &str) -> Result<u64> {
        debug!(%state, %machine, "PowerClient: submitting transition");
        let msg = PowerRequest::Transition {
            state,
            machine: machine.to_string(),
        };
        match self.send_request(msg).await? {
            PowerReply::Submitted { id } => Ok(id),
            PowerReply::Ignored { reason } => Err(eyre::eyre!("Request ignored: {}", reason)),
            PowerReply::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected reply")),
        }
    }

    /// Forward a raw text payload for phrase matching
    ///
    /// Returns the event id when a trigger phrase matched, `None` when the
    /// daemon ignored the text.
    pub async fn submit_text(&self, body: &str) -> Result<Option<u64>> {
        debug!(%body, "PowerClient: forwarding text payload");
        let msg = PowerRequest::Text { body: body.to_string() };
        match self.send_request(msg).await? {
            PowerReply::Submitted { id } => Ok(Some(id)),
            PowerReply::Ignored { .. } => Ok(None),
            PowerReply::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected reply")),
        }
    }

    /// Forward a raw bus frame for rule matching
    pub async fn submit_frame(&self, frame_id: u32, data: &[u8]) -> Result<Option<u64>> {
        debug!(frame_id, "PowerClient: forwarding bus frame");
        let msg = PowerRequest::BusFrame {
            id: frame_id,
            data: data.to_vec(),
        };
        match self.send_request(msg).await? {
            PowerReply::Submitted { id } => Ok(Some(id)),
            PowerReply::Ignored { .. } => Ok(None),
            PowerReply::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected reply")),
        }
    }

    /// Fetch the current arbitration queue
    pub async fn queue(&self) -> Result<Vec<EventSnapshot>> {
        debug!("PowerClient: fetching queue");
        match self.send_request(PowerRequest::Queue).await? {
            PowerReply::Queue { events } => Ok(events),
            PowerReply::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected reply")),
        }
    }

    /// Check if daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("PowerClient: pinging daemon");
        match self.send_request(PowerRequest::Ping).await? {
            PowerReply::Pong { version } => Ok(version),
            PowerReply::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected reply")),
        }
    }

    /// Request daemon to shutdown gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("PowerClient: requesting daemon shutdown");
        match self.send_request(PowerRequest::Shutdown).await? {
            PowerReply::Ok => Ok(()),
            PowerReply::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected reply")),
        }
    }

    /// Send a request to the daemon and wait for the reply
    async fn send_request(&self, msg: PowerRequest) -> Result<PowerReply> {
        debug!(?self.socket_path, ?msg, "PowerClient: sending request");

        // Connect with timeout
        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon socket")?;

        self.send_on_stream(stream, msg).await
    }

    /// Send request on an existing stream (extracted for testing)
    async fn send_on_stream(&self, mut stream: UnixStream, msg: PowerRequest) -> Result<PowerReply> {
        // Serialize request
        let msg_json = serde_json::to_string(&msg).context("Failed to serialize request")?;

        // Validate message size
        if msg_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Request too large: {} bytes", msg_json.len()));
        }

        // Send request with newline
        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write request")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        // Read reply with size limit
        let mut reader = BufReader::new(&mut stream);
        let mut reply_line = String::new();

        tokio::time::timeout(self.timeout, async {
            let bytes_read = reader
                .read_line(&mut reply_line)
                .await
                .context("Failed to read reply")?;

            if bytes_read > MAX_MESSAGE_SIZE {
                return Err(eyre::eyre!("Reply too large: {} bytes", bytes_read));
            }

            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        // Parse reply
        let reply: PowerReply = serde_json::from_str(reply_line.trim()).context("Failed to parse daemon reply")?;

        debug!(?reply, "PowerClient: received reply");
        Ok(reply)
    }
}
