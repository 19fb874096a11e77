//! PowerDaemon - TCU power-state arbitration daemon
//!
//! PowerDaemon serializes concurrent power-state change requests for a
//! vehicle telematics unit into a single in-flight transition. Requests
//! arrive from independent trigger sources (bus frames, short text
//! commands, the local socket), enter one arbitration queue, and later
//! requests for a divergent state override earlier ones that have not yet
//! started. A kernel wake lock is held from the first queued event until
//! the queue drains so the unit cannot sleep mid-arbitration.
//!
//! # Modules
//!
//! - [`domain`] - Events, activity states, and event lifecycle statuses
//! - [`engine`] - The arbitration queue, override algorithm, and wake hold
//! - [`service`] - Activity state service boundary and simulated backend
//! - [`trigger`] - Bus, text, and socket trigger sources
//! - [`ipc`] - JSON-over-newline socket protocol and client
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod engine;
pub mod ipc;
pub mod outcome_log;
pub mod service;
pub mod trigger;

// Re-export commonly used types
pub use config::Config;
pub use domain::{ALL_MACHINES, ActivityState, Event, EventSnapshot, EventStatus, TriggerType};
pub use engine::{Engine, EventListener, Subscription, SysfsWakeLock, WakeHold};
pub use ipc::{PowerClient, PowerReply, PowerRequest};
pub use service::{
    AckObserver, AckReport, AckStatus, ActivityStateService, AvailabilityObserver, ServiceAvailability, ServiceError,
    SimService, SimServiceConfig,
};
pub use trigger::{BusTrigger, SocketServer, TextTrigger};
