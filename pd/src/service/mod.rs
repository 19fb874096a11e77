//! Activity State Service boundary
//!
//! The service is the mechanism that actually performs a power-state
//! transition across the distributed system and collects per-client
//! acknowledgments. The daemon only ever sees it through the
//! [`ActivityStateService`] trait plus two out-of-band observer channels:
//! acknowledgment aggregation ([`AckObserver`]) and availability changes
//! ([`AvailabilityObserver`]).

use std::fmt;

use thiserror::Error;

use crate::domain::ActivityState;

pub mod sim;

pub use sim::{SimService, SimServiceConfig};

/// Whether the backing service can accept transition commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAvailability {
    Available,
    Unavailable,
}

impl fmt::Display for ServiceAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAvailability::Available => write!(f, "available"),
            ServiceAvailability::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Errors reported by the activity state service
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("activity state service unavailable")]
    Unavailable,

    #[error("transition command rejected: {0}")]
    Rejected(String),

    #[error("machine registry query failed: {0}")]
    Registry(String),
}

/// Completion callback for a transition command
///
/// Invoked exactly once with the command initiation outcome. May arrive on
/// any thread; implementors of the engine side must take their own lock.
pub type TransitionCallback = Box<dyn FnOnce(Result<(), ServiceError>) + Send + 'static>;

/// Interface to the external transition mechanism
///
/// `availability` and `machine_names` are read-only queries;
/// `request_transition` issues the command and reports initiation through
/// the callback. Acknowledgment aggregation for non-resume transitions is
/// delivered out-of-band to registered [`AckObserver`]s.
pub trait ActivityStateService: Send + Sync {
    fn availability(&self) -> ServiceAvailability;

    fn machine_names(&self) -> Result<Vec<String>, ServiceError>;

    fn request_transition(&self, state: ActivityState, machine: &str, done: TransitionCallback);
}

/// Aggregated acknowledgment outcome for one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// All required clients acknowledged
    Acked,
    /// One or more clients responded negatively
    Nacked,
    /// One or more clients did not answer within the deadline
    TimedOut,
}

/// A dependent client, identified by name and hosting machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
    pub machine: String,
}

/// Out-of-band acknowledgment-aggregation report
#[derive(Debug, Clone)]
pub struct AckReport {
    pub status: AckStatus,
    pub machine: String,
    pub unresponsive: Vec<ClientInfo>,
    pub nacked: Vec<ClientInfo>,
}

impl AckReport {
    /// A fully-acknowledged report for `machine`
    pub fn acked(machine: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Acked,
            machine: machine.into(),
            unresponsive: Vec::new(),
            nacked: Vec::new(),
        }
    }
}

/// Observer for acknowledgment-aggregation reports
pub trait AckObserver: Send + Sync {
    fn on_ack_report(&self, report: AckReport);
}

/// Observer for service availability changes
pub trait AvailabilityObserver: Send + Sync {
    fn on_availability_changed(&self, availability: ServiceAvailability);
}
