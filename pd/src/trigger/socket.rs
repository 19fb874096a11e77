//! Socket trigger source and daemon-side IPC listener
//!
//! One Unix Domain Socket carries everything that reaches the daemon from
//! outside: direct transition requests, raw bus frames, text bodies, and
//! control commands (queue inspection, ping, shutdown). Direct transitions
//! become socket-triggered events; bus and text payloads are decoded by
//! their respective triggers.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::{BusTrigger, TextTrigger};
use crate::domain::{Event, TriggerType};
use crate::engine::Engine;
use crate::ipc::get_socket_path;
use crate::ipc::messages::{PowerReply, PowerRequest};

/// Maximum message size
const MAX_MESSAGE_SIZE: usize = 4096;

/// Create and bind a Unix Domain Socket listener for the daemon
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener() -> Result<(UnixListener, PathBuf)> {
    let socket_path = get_socket_path();
    create_listener_at(&socket_path)
}

/// Create a listener at a specific path (for testing)
pub fn create_listener_at(socket_path: &PathBuf) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener: creating IPC socket");

    // Ensure parent directory exists
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    // Clean up stale socket if exists
    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    // Bind the socket
    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    debug!(?socket_path, "create_listener: socket bound successfully");

    Ok((listener, socket_path.clone()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &PathBuf) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one request from the stream
pub async fn read_request(stream: &mut UnixStream) -> Result<PowerRequest> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    // Read with size limit
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC request")?;

    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Request too large: {} bytes", bytes_read));
    }

    if line.is_empty() {
        return Err(eyre::eyre!("Empty request received"));
    }

    let msg: PowerRequest = serde_json::from_str(line.trim()).context("Failed to parse IPC request")?;
    debug!(?msg, "read_request: parsed request");

    Ok(msg)
}

/// Send a reply on the stream
pub async fn send_reply(stream: &mut UnixStream, reply: PowerReply) -> Result<()> {
    let reply_json = serde_json::to_string(&reply).context("Failed to serialize reply")?;
    stream
        .write_all(reply_json.as_bytes())
        .await
        .context("Failed to write reply")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush reply")?;
    debug!(?reply, "send_reply: sent reply");
    Ok(())
}

/// Accept loop serving the daemon socket
pub struct SocketServer {
    engine: Arc<Engine>,
    bus: BusTrigger,
    text: TextTrigger,
}

impl SocketServer {
    pub fn new(engine: Arc<Engine>, bus: BusTrigger, text: TextTrigger) -> Self {
        Self { engine, bus, text }
    }

    /// Serve connections until a shutdown request arrives
    pub async fn run(&self, listener: UnixListener) -> Result<()> {
        info!("SocketServer: serving requests");
        loop {
            let (mut stream, _) = listener.accept().await.context("Failed to accept IPC connection")?;

            let request = match read_request(&mut stream).await {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "SocketServer: dropping malformed connection");
                    continue;
                }
            };

            let (reply, stop) = self.handle_request(request);
            if let Err(e) = send_reply(&mut stream, reply).await {
                warn!(error = %e, "SocketServer: failed to send reply");
            }
            if stop {
                info!("SocketServer: shutdown requested");
                return Ok(());
            }
        }
    }

    /// Map one request to its reply; the bool asks the accept loop to stop
    fn handle_request(&self, request: PowerRequest) -> (PowerReply, bool) {
        match request {
            PowerRequest::Transition { state, machine } => {
                let id = self.engine.submit(Event::new(TriggerType::Socket, state, &machine));
                (PowerReply::Submitted { id }, false)
            }
            PowerRequest::Text { body } => match self.text.handle_text(&body) {
                Some(id) => (PowerReply::Submitted { id }, false),
                None => (
                    PowerReply::Ignored {
                        reason: "text matches no trigger phrase".to_string(),
                    },
                    false,
                ),
            },
            PowerRequest::BusFrame { id, data } => match self.bus.handle_frame(id, &data) {
                Some(id) => (PowerReply::Submitted { id }, false),
                None => (
                    PowerReply::Ignored {
                        reason: "frame matches no trigger rule".to_string(),
                    },
                    false,
                ),
            },
            PowerRequest::Queue => (
                PowerReply::Queue {
                    events: self.engine.queue_snapshot(),
                },
                false,
            ),
            PowerRequest::Ping => (
                PowerReply::Pong {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                false,
            ),
            PowerRequest::Shutdown => (PowerReply::Ok, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActivityState;
    use crate::engine::WakeHold;
    use crate::ipc::PowerClient;
    use crate::service::{ActivityStateService, ServiceAvailability, ServiceError, TransitionCallback};
    use crate::trigger::bus::BusRule;
    use crate::trigger::text::TextRule;
    use tempfile::TempDir;

    struct StubService;

    impl ActivityStateService for StubService {
        fn availability(&self) -> ServiceAvailability {
            ServiceAvailability::Available
        }

        fn machine_names(&self) -> Result<Vec<String>, ServiceError> {
            Ok(vec!["ecu1".to_string(), "ecu2".to_string()])
        }

        fn request_transition(&self, _state: ActivityState, _machine: &str, _done: TransitionCallback) {}
    }

    struct NoopHold;

    impl WakeHold for NoopHold {
        fn acquire(&self) {}
        fn release(&self) {}
    }

    fn server() -> (Arc<Engine>, SocketServer) {
        let engine = Engine::new(Arc::new(StubService), Arc::new(NoopHold));
        let bus = BusTrigger::new(
            engine.clone(),
            vec![BusRule {
                frame_id: 0x100,
                state: ActivityState::Suspend,
            }],
        )
        .unwrap();
        let text = TextTrigger::new(
            engine.clone(),
            vec![TextRule {
                phrase: "SUSPEND".to_string(),
                state: ActivityState::Suspend,
            }],
        )
        .unwrap();
        (engine.clone(), SocketServer::new(engine, bus, text))
    }

    #[tokio::test]
    async fn test_create_listener_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("subdir").join("daemon.sock");

        let result = create_listener_at(&socket_path);
        assert!(result.is_ok());

        let (_, path) = result.unwrap();
        assert_eq!(path, socket_path);
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_create_listener_removes_stale_socket() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("daemon.sock");

        // Create a stale file
        std::fs::write(&socket_path, "stale").unwrap();

        let result = create_listener_at(&socket_path);
        assert!(result.is_ok());
    }

    #[test]
    fn test_cleanup_socket_removes_file() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("daemon.sock");

        std::fs::write(&socket_path, "test").unwrap();
        assert!(socket_path.exists());

        cleanup_socket(&socket_path);
        assert!(!socket_path.exists());
    }

    #[test]
    fn test_cleanup_socket_handles_missing_file() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("nonexistent.sock");

        // Should not panic
        cleanup_socket(&socket_path);
    }

    #[test]
    fn test_transition_request_submits_socket_event() {
        let (engine, server) = server();
        let (reply, stop) = server.handle_request(PowerRequest::Transition {
            state: ActivityState::Suspend,
            machine: "ecu1".to_string(),
        });

        assert!(!stop);
        assert!(matches!(reply, PowerReply::Submitted { .. }));
        assert_eq!(engine.queue_snapshot()[0].trigger, TriggerType::Socket);
    }

    #[test]
    fn test_unmatched_payloads_are_ignored() {
        let (_, server) = server();

        let (reply, _) = server.handle_request(PowerRequest::Text {
            body: "REBOOT".to_string(),
        });
        assert!(matches!(reply, PowerReply::Ignored { .. }));

        let (reply, _) = server.handle_request(PowerRequest::BusFrame {
            id: 0x999,
            data: vec![],
        });
        assert!(matches!(reply, PowerReply::Ignored { .. }));
    }

    #[test]
    fn test_shutdown_request_stops_the_loop() {
        let (_, server) = server();
        let (reply, stop) = server.handle_request(PowerRequest::Shutdown);
        assert_eq!(reply, PowerReply::Ok);
        assert!(stop);
    }

    #[tokio::test]
    async fn test_end_to_end_submit_queue_shutdown() {
        use std::time::Duration;

        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");

        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (_, server) = server();
        let serving = tokio::spawn(async move { server.run(listener).await });

        // Give the listener time to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = PowerClient::with_socket_path(socket_path);

        let version = client.ping().await.unwrap();
        assert_eq!(version, env!("CARGO_PKG_VERSION"));

        let id = client.submit(ActivityState::Suspend, "ecu1").await.unwrap();
        let queue = client.queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, id);

        client.shutdown().await.unwrap();
        serving.await.unwrap().unwrap();
    }
}
