//! Bus frame trigger source
//!
//! Maps configured frame identifiers to target states. The frame payload
//! names the machine the transition applies to; an empty payload targets
//! all machines.

use std::sync::Arc;

use eyre::{Result, bail};
use tracing::{debug, warn};

use crate::domain::{ALL_MACHINES, ActivityState, Event, TriggerType};
use crate::engine::Engine;

/// Mask that drops the extended-frame flag bit so base and extended
/// identifiers with the same value match the same rule
const FRAME_ID_MASK: u32 = 0x7FFF_FFFF;

/// One frame-id-to-state rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusRule {
    pub frame_id: u32,
    pub state: ActivityState,
}

/// Decodes bus frames into arbitration events
pub struct BusTrigger {
    engine: Arc<Engine>,
    rules: Vec<BusRule>,
}

impl BusTrigger {
    /// Build a trigger from configured rules
    ///
    /// Rejects two rules sharing a frame identifier, which would make the
    /// trigger ambiguous.
    pub fn new(engine: Arc<Engine>, rules: Vec<BusRule>) -> Result<Self> {
        for (i, rule) in rules.iter().enumerate() {
            if rule.state == ActivityState::Unknown {
                bail!("bus rule for frame {:#x} has no target state", rule.frame_id);
            }
            if rules[..i]
                .iter()
                .any(|earlier| earlier.frame_id & FRAME_ID_MASK == rule.frame_id & FRAME_ID_MASK)
            {
                bail!("frame id {:#x} is mapped to multiple states", rule.frame_id);
            }
        }
        Ok(Self { engine, rules })
    }

    /// Decode one frame and submit the resulting event
    ///
    /// Returns the event id when a rule matched, `None` for frames this
    /// trigger is not configured for.
    pub fn handle_frame(&self, frame_id: u32, data: &[u8]) -> Option<u64> {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.frame_id & FRAME_ID_MASK == frame_id & FRAME_ID_MASK)?;

        let machine = match std::str::from_utf8(data) {
            Ok(text) => {
                let text = text.trim_end_matches('\0').trim();
                if text.is_empty() { ALL_MACHINES } else { text }
            }
            Err(_) => {
                warn!(frame_id, "BusTrigger: non-UTF-8 payload, targeting all machines");
                ALL_MACHINES
            }
        };

        debug!(frame_id, state = %rule.state, %machine, "BusTrigger: frame matched");
        Some(self.engine.submit(Event::new(TriggerType::Bus, rule.state, machine)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WakeHold;
    use crate::service::{ActivityStateService, ServiceAvailability, ServiceError, TransitionCallback};

    /// Accepts every command and never completes it; fine for tests that
    /// only inspect the queue
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

    fn engine() -> Arc<Engine> {
        Engine::new(Arc::new(StubService), Arc::new(NoopHold))
    }

    fn rules() -> Vec<BusRule> {
        vec![
            BusRule {
                frame_id: 0x100,
                state: ActivityState::Suspend,
            },
            BusRule {
                frame_id: 0x101,
                state: ActivityState::Resume,
            },
        ]
    }

    #[test]
    fn test_matched_frame_submits_event() {
        let engine = engine();
        let trigger = BusTrigger::new(engine.clone(), rules()).unwrap();

        let id = trigger.handle_frame(0x100, b"ecu1");
        assert!(id.is_some());

        let queue = engine.queue_snapshot();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].target, ActivityState::Suspend);
        assert_eq!(queue[0].machine, "ecu1");
        assert_eq!(queue[0].trigger, TriggerType::Bus);
    }

    #[test]
    fn test_empty_payload_targets_all_machines() {
        let engine = engine();
        let trigger = BusTrigger::new(engine.clone(), rules()).unwrap();

        trigger.handle_frame(0x101, b"").unwrap();
        assert_eq!(engine.queue_snapshot()[0].machine, ALL_MACHINES);
    }

    #[test]
    fn test_extended_flag_bit_is_ignored() {
        let engine = engine();
        let trigger = BusTrigger::new(engine.clone(), rules()).unwrap();

        assert!(trigger.handle_frame(0x8000_0100, b"ecu1").is_some());
    }

    #[test]
    fn test_unconfigured_frame_is_ignored() {
        let engine = engine();
        let trigger = BusTrigger::new(engine.clone(), rules()).unwrap();

        assert!(trigger.handle_frame(0x999, b"ecu1").is_none());
        assert!(engine.queue_snapshot().is_empty());
    }

    #[test]
    fn test_duplicate_frame_id_rejected() {
        let engine = engine();
        let duplicated = vec![
            BusRule {
                frame_id: 0x100,
                state: ActivityState::Suspend,
            },
            BusRule {
                frame_id: 0x8000_0100,
                state: ActivityState::Shutdown,
            },
        ];
        assert!(BusTrigger::new(engine, duplicated).is_err());
    }
}
