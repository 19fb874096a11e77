//! Event outcome logging
//!
//! A wildcard listener that writes one log line per arbitration outcome,
//! giving the daemon log a complete audit trail of every event.

use tracing::{info, warn};

use crate::domain::{Event, EventStatus};
use crate::engine::EventListener;

/// Logs every rejection and completion the engine reports
#[derive(Debug, Default)]
pub struct OutcomeLogger;

impl EventListener for OutcomeLogger {
    fn on_event_rejected(&self, event: &Event, reason: EventStatus) {
        warn!(%event, %reason, "event rejected");
    }

    fn on_event_processed(&self, event: &Event, success: bool) {
        if success {
            info!(%event, "event processed");
        } else {
            warn!(%event, "event failed");
        }
    }
}
