//! IPC message types for daemon communication
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

use crate::domain::{ActivityState, EventSnapshot};

/// Requests from CLI or external trigger sources to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PowerRequest {
    /// Request a state transition for a machine
    Transition { state: ActivityState, machine: String },

    /// Raw text trigger payload, matched against configured phrases
    Text { body: String },

    /// Raw bus frame: extended frame identifier plus payload bytes
    BusFrame { id: u32, data: Vec<u8> },

    /// Request a snapshot of the arbitration queue
    Queue,

    /// Ping to check if daemon is alive
    Ping,

    /// Request daemon to stop gracefully
    Shutdown,
}

/// Responses from the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PowerReply {
    /// An event was accepted into arbitration
    Submitted { id: u64 },

    /// The payload did not match any trigger rule
    Ignored { reason: String },

    /// Current arbitration queue contents
    Queue { events: Vec<EventSnapshot> },

    /// Pong response to ping
    Pong { version: String },

    /// Acknowledgment
    Ok,

    /// Error response
    Error { message: String },
}
