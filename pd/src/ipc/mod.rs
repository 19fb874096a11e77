//! Inter-Process Communication for the power daemon
//!
//! This module provides Unix Domain Socket-based IPC between the `pd` CLI
//! (and external trigger sources) and the daemon. Requests carry state
//! transitions, raw trigger payloads, and queue inspection commands as
//! JSON-over-newline messages.

use std::path::PathBuf;

pub mod client;
pub mod messages;

pub use client::PowerClient;
pub use messages::{PowerReply, PowerRequest};

/// Get the socket path for daemon IPC
///
/// Uses the same base directory as the PID file.
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("powerdaemon")
        .join("daemon.sock")
}
