//! Activity states, trigger channels, and the event lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// High-level power mode requested for a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityState {
    /// Bring the unit (back) to full operation
    Resume,
    /// Suspend to RAM
    Suspend,
    /// Power down
    Shutdown,
    /// Not a valid target; requests carrying it are rejected
    Unknown,
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityState::Resume => "resume",
            ActivityState::Suspend => "suspend",
            ActivityState::Shutdown => "shutdown",
            ActivityState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Error for unparseable activity state names
#[derive(Debug, Error)]
#[error("unknown activity state '{0}' (expected resume, suspend, or shutdown)")]
pub struct ParseStateError(String);

impl FromStr for ActivityState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resume" => Ok(ActivityState::Resume),
            "suspend" => Ok(ActivityState::Suspend),
            "shutdown" => Ok(ActivityState::Shutdown),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// Which stimulus channel produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    /// Vehicle bus frame
    Bus,
    /// Short text command
    Text,
    /// Local socket command
    Socket,
    /// Internal or unattributed (e.g. the boot-time resume)
    Unknown,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerType::Bus => "bus",
            TriggerType::Text => "text",
            TriggerType::Socket => "socket",
            TriggerType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle of an event, linear with rejection branch points
///
/// Only the arbitration engine moves an event along this lifecycle. Every
/// terminal value is final; the engine never mutates an event again after
/// reaching one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    /// Constructed, not yet handed to the engine
    Initialized,
    /// Accepted and waiting in the queue
    InQueue,
    /// Transition command issued, awaiting acknowledgments
    InProgress,
    /// Transition completed, all required clients acknowledged
    Succeeded,
    /// Backend unavailable, command failed, or a client nacked
    Failed,
    /// One or more clients did not acknowledge in time
    FailedTimeout,
    /// Machine name not known to the activity state service
    RejectedInvalidMachine,
    /// Target state is not a valid transition target
    RejectedInvalidTransition,
    /// Superseded by a later, divergent request
    RejectedOverridden,
}

impl EventStatus {
    /// Whether this status ends the event's lifecycle
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            EventStatus::Initialized | EventStatus::InQueue | EventStatus::InProgress
        )
    }

    /// Whether this is one of the rejection terminals
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            EventStatus::RejectedInvalidMachine
                | EventStatus::RejectedInvalidTransition
                | EventStatus::RejectedOverridden
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventStatus::Initialized => "initialized",
            EventStatus::InQueue => "in-queue",
            EventStatus::InProgress => "in-progress",
            EventStatus::Succeeded => "succeeded",
            EventStatus::Failed => "failed",
            EventStatus::FailedTimeout => "failed-timeout",
            EventStatus::RejectedInvalidMachine => "rejected-invalid-machine",
            EventStatus::RejectedInvalidTransition => "rejected-invalid-transition",
            EventStatus::RejectedOverridden => "rejected-overridden",
        };
        write!(f, "{}", s)
    }
}
