//! Domain types for power-state arbitration
//!
//! The vocabulary of the daemon: activity states, trigger channels, and the
//! Event that every trigger source hands to the arbitration engine.

mod event;
mod state;

pub use event::{ALL_MACHINES, Event, EventSnapshot};
pub use state::{ActivityState, EventStatus, ParseStateError, TriggerType};
