//! The Event: one request to move a machine into a target activity state

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{ActivityState, EventStatus, TriggerType};

/// Wildcard machine name meaning "all control domains"
pub const ALL_MACHINES: &str = "ALL";

/// Process-wide event id counter
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// One state-change request
///
/// Identity (`id`, `trigger`, `target`, `machine`, `created_at`) is fixed at
/// construction; only the `status` field moves, and only the arbitration
/// engine moves it.
#[derive(Debug)]
pub struct Event {
    id: u64,
    trigger: TriggerType,
    target: ActivityState,
    machine: String,
    created_at: DateTime<Utc>,
    status: EventStatus,
}

impl Event {
    /// Create a new event with a fresh process-unique id
    pub fn new(trigger: TriggerType, target: ActivityState, machine: impl Into<String>) -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            trigger,
            target,
            machine: machine.into(),
            created_at: Utc::now(),
            status: EventStatus::Initialized,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn trigger(&self) -> TriggerType {
        self.trigger
    }

    pub fn target(&self) -> ActivityState {
        self.target
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    /// Whether this event targets every control domain
    pub fn targets_all_machines(&self) -> bool {
        self.machine == ALL_MACHINES
    }

    /// Advance the lifecycle field. Engine-internal; terminal values are final.
    pub(crate) fn set_status(&mut self, status: EventStatus) {
        debug_assert!(!self.status.is_terminal(), "status mutated after terminal");
        self.status = status;
    }

    /// Read-only copy for diagnostics and wire replies
    pub fn snapshot(&self) -> EventSnapshot {
        EventSnapshot {
            id: self.id,
            trigger: self.trigger,
            target: self.target,
            machine: self.machine.clone(),
            created_at: self.created_at,
            status: self.status,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event {} [{}] {} -> {} ({})",
            self.id, self.trigger, self.machine, self.target, self.status
        )
    }
}

/// Serializable view of an event for queue dumps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub id: u64,
    pub trigger: TriggerType,
    pub target: ActivityState,
    pub machine: String,
    #[serde(rename = "created-at")]
    pub created_at: DateTime<Utc>,
    pub status: EventStatus,
}
