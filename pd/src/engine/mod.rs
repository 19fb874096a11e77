//! Arbitration engine
//!
//! The single serialization point for activity-state change requests: owns
//! the event queue, the override algorithm, the wake-hold bracket, and the
//! listener registry.

mod core;
mod listeners;
mod wakelock;

pub use self::core::Engine;
pub use listeners::{EventListener, ListenerRegistry, Subscription};
pub use wakelock::{DEFAULT_LOCK_PATH, DEFAULT_TAG, DEFAULT_UNLOCK_PATH, SysfsWakeLock, WakeHold};
