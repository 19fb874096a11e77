//! Event queue and override algorithm
//!
//! All queue mutation happens under one mutex: `submit` either rejects
//! synchronously or enqueues and returns, and the transition command and
//! listener notifications are issued after the lock is dropped so a callback
//! can re-enter the engine. The wake-hold write is the one call made while
//! holding the lock; it never re-enters, and keeping it under the lock ties
//! acquire/release to the empty/non-empty transitions in queue order.
//! The service's completion callback and the acknowledgment report re-enter
//! through the same lock, so at most one push/advance runs at a time.
//!
//! Ordering guarantees: FIFO among non-conflicting intents, the head of the
//! queue is the sole in-flight transition, and override never touches the
//! head.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use super::listeners::{EventListener, ListenerRegistry, Subscription};
use super::wakelock::WakeHold;
use crate::domain::{ActivityState, Event, EventSnapshot, EventStatus, TriggerType};
use crate::service::{
    AckObserver, AckReport, AckStatus, ActivityStateService, AvailabilityObserver, ServiceAvailability, ServiceError,
};

/// Queue state guarded by the engine lock
#[derive(Default)]
struct EngineState {
    queue: VecDeque<Event>,
    hold_held: bool,
}

impl EngineState {
    fn log_queue(&self) {
        for event in &self.queue {
            debug!(%event, "Engine: queued");
        }
    }
}

/// Deferred listener notification, emitted after the engine lock is dropped
/// so a callback can safely re-enter the engine
enum Notice {
    Rejected(Event, EventStatus),
    Processed(Event, bool),
}

/// The activity-state arbitration engine
///
/// Constructed once at daemon start and passed by `Arc` to every trigger
/// source. Trigger sources hand it events via [`Engine::submit`]; outcomes
/// come back through registered [`EventListener`]s, never as return values.
pub struct Engine {
    service: Arc<dyn ActivityStateService>,
    wake_hold: Arc<dyn WakeHold>,
    listeners: ListenerRegistry,
    state: Mutex<EngineState>,
    self_ref: Weak<Engine>,
}

impl Engine {
    pub fn new(service: Arc<dyn ActivityStateService>, wake_hold: Arc<dyn WakeHold>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            service,
            wake_hold,
            listeners: ListenerRegistry::new(),
            state: Mutex::new(EngineState::default()),
            self_ref: weak.clone(),
        })
    }

    /// Register a listener for one trigger type, or for every event when
    /// `trigger` is `None`
    pub fn register_listener(&self, listener: Arc<dyn EventListener>, trigger: Option<TriggerType>) -> Subscription {
        self.listeners.register(listener, trigger)
    }

    /// Submit a state-change request
    ///
    /// Returns the event id immediately; the outcome is reported later via
    /// listener callbacks. A request is rejected synchronously when its
    /// target state or machine name is invalid, or when the backend is down
    /// and nothing is queued.
    pub fn submit(&self, mut event: Event) -> u64 {
        let id = event.id();
        debug!(%event, "Engine: submit");

        let mut notices: Vec<Notice> = Vec::new();
        let mut dispatch: Option<(ActivityState, String)> = None;
        {
            let mut st = self.lock_state();
            st.log_queue();

            if let Some(reason) = self.validate(&event) {
                event.set_status(reason);
                notices.push(Notice::Rejected(event, reason));
            } else if let Some(in_progress) = st.queue.front().map(Event::target) {
                // Last divergent intent wins, but never disturb what is
                // already executing: drop queued events whose target differs
                // from both the new request and the in-flight one. The head
                // always matches `in_progress`, so it is never removed.
                let new_state = event.target();
                let mut idx = 0;
                while idx < st.queue.len() {
                    let queued = st.queue[idx].target();
                    if queued != new_state && queued != in_progress {
                        if let Some(mut overridden) = st.queue.remove(idx) {
                            warn!(event = %overridden, "Engine: event overridden");
                            overridden.set_status(EventStatus::RejectedOverridden);
                            notices.push(Notice::Rejected(overridden, EventStatus::RejectedOverridden));
                        }
                    } else {
                        idx += 1;
                    }
                }
                event.set_status(EventStatus::InQueue);
                st.queue.push_back(event);
            } else if self.service.availability() != ServiceAvailability::Available {
                warn!("Engine: activity state service down, rejecting");
                event.set_status(EventStatus::Failed);
                notices.push(Notice::Rejected(event, EventStatus::Failed));
            } else {
                // Queue goes empty -> non-empty: assert the wake hold so the
                // unit cannot auto-suspend while the event is processed. The
                // sysfs write stays under the lock so it cannot interleave
                // with a concurrent drain's release.
                st.hold_held = true;
                self.wake_hold.acquire();
                event.set_status(EventStatus::InQueue);
                dispatch = Some((event.target(), event.machine().to_string()));
                st.queue.push_back(event);
            }
        }

        self.emit(notices);
        if let Some((state, machine)) = dispatch {
            self.dispatch(state, machine);
        }
        id
    }

    /// Synchronous validation, run before any queue mutation
    fn validate(&self, event: &Event) -> Option<EventStatus> {
        if event.target() == ActivityState::Unknown {
            warn!(%event, "Engine: invalid target state");
            return Some(EventStatus::RejectedInvalidTransition);
        }
        match self.service.machine_names() {
            Ok(names) => {
                if !event.targets_all_machines() && !names.iter().any(|n| n == event.machine()) {
                    warn!(machine = %event.machine(), "Engine: unknown machine name");
                    return Some(EventStatus::RejectedInvalidMachine);
                }
            }
            Err(e) => {
                // Matches the reference behavior: a failed registry query is
                // logged and the event is accepted unchecked
                warn!(error = %e, "Engine: unable to query machine names");
            }
        }
        None
    }

    /// Completion callback for the in-flight transition command
    ///
    /// Arrives on an arbitrary thread; takes the engine lock internally.
    pub fn handle_transition_result(&self, result: Result<(), ServiceError>) {
        match result {
            Err(e) => {
                warn!(error = %e, "Engine: transition command failed");
                self.complete_head(EventStatus::Failed);
            }
            Ok(()) => {
                debug!("Engine: transition command initiated");
                let resume_completed = {
                    let mut st = self.lock_state();
                    match st.queue.front_mut() {
                        // No acknowledgment is expected for a resume
                        Some(head) if head.target() == ActivityState::Resume => true,
                        Some(head) => {
                            head.set_status(EventStatus::InProgress);
                            false
                        }
                        None => {
                            warn!("Engine: command completion with empty queue");
                            false
                        }
                    }
                };
                if resume_completed {
                    self.complete_head(EventStatus::Succeeded);
                }
            }
        }
    }

    /// Advance the queue after the head reached a terminal outcome
    ///
    /// If the tail's intent diverged from what was just executed, the head is
    /// reported overridden instead of with its true outcome. Consecutive
    /// head events sharing the executed state collapse into the same
    /// outcome; one physical transition serves them all. Then the next head
    /// is dispatched, or the wake hold released when the queue drained.
    fn complete_head(&self, status: EventStatus) {
        debug!(%status, "Engine: head completed");

        let mut notices: Vec<Notice> = Vec::new();
        let mut dispatch: Option<(ActivityState, String)> = None;
        {
            let mut st = self.lock_state();
            st.log_queue();

            let Some(processed_state) = st.queue.front().map(Event::target) else {
                warn!("Engine: completion with empty queue");
                return;
            };

            // Note: this inspects only the current tail, as the reference
            // implementation does; submit's override scan keeps the queue to
            // at most two intent groups, so one check suffices.
            let tail_diverged = st.queue.back().is_some_and(|tail| tail.target() != processed_state);
            let (final_status, success) = if tail_diverged {
                warn!("Engine: completed head conflicts with latest intent");
                (EventStatus::RejectedOverridden, false)
            } else {
                (status, status == EventStatus::Succeeded)
            };

            // Duplicate collapse: every event at the front sharing the
            // executed state gets the same outcome
            while let Some(mut event) = st.queue.pop_front() {
                if event.target() != processed_state {
                    st.queue.push_front(event);
                    break;
                }
                debug!(id = event.id(), %final_status, "Engine: removing completed event");
                event.set_status(final_status);
                notices.push(Notice::Processed(event, success));
            }

            if let Some(next) = st.queue.front() {
                debug!(%next, "Engine: executing next event");
                dispatch = Some((next.target(), next.machine().to_string()));
            } else if st.hold_held {
                // Queue drained: release the wake hold exactly once, under
                // the lock so a racing submit's acquire must come after it
                st.hold_held = false;
                self.wake_hold.release();
            }
        }

        self.emit(notices);
        if let Some((state, machine)) = dispatch {
            self.dispatch(state, machine);
        }
    }

    /// Issue the transition command for the current head
    ///
    /// Called without the engine lock held, so a service that completes the
    /// callback synchronously re-enters cleanly.
    fn dispatch(&self, state: ActivityState, machine: String) {
        debug!(%state, %machine, "Engine: issuing transition command");
        let weak = self.self_ref.clone();
        self.service.request_transition(
            state,
            &machine,
            Box::new(move |result| {
                if let Some(engine) = weak.upgrade() {
                    engine.handle_transition_result(result);
                }
            }),
        );
    }

    fn emit(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Rejected(event, reason) => {
                    debug!(%event, %reason, "Engine: notifying rejected");
                    self.listeners.notify_rejected(&event, reason);
                }
                Notice::Processed(event, success) => {
                    debug!(%event, success, "Engine: notifying processed");
                    self.listeners.notify_processed(&event, success);
                }
            }
        }
    }

    /// Read-only dump of the current queue contents
    pub fn queue_snapshot(&self) -> Vec<EventSnapshot> {
        self.lock_state().queue.iter().map(Event::snapshot).collect()
    }

    /// Drop all queued events and release the wake hold if still asserted
    pub fn shutdown(&self) {
        info!("Engine: shutting down");
        let mut st = self.lock_state();
        st.queue.clear();
        if std::mem::take(&mut st.hold_held) {
            self.wake_hold.release();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        // Keep making progress even if a listener panicked under the lock
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let release = self
            .state
            .get_mut()
            .map(|st| std::mem::take(&mut st.hold_held))
            .unwrap_or(false);
        if release {
            self.wake_hold.release();
        }
    }
}

impl AckObserver for Engine {
    /// Out-of-band acknowledgment aggregation for the in-flight transition
    fn on_ack_report(&self, report: AckReport) {
        let status = match report.status {
            AckStatus::Acked => {
                debug!(machine = %report.machine, "Engine: clients acknowledged the state transition");
                EventStatus::Succeeded
            }
            AckStatus::Nacked => {
                warn!(machine = %report.machine, "Engine: clients rejected the state transition");
                EventStatus::Failed
            }
            AckStatus::TimedOut => {
                warn!(machine = %report.machine, "Engine: timed out waiting for acknowledgments");
                EventStatus::FailedTimeout
            }
        };

        for client in &report.unresponsive {
            warn!(client = %client.name, machine = %client.machine, "Engine: unresponsive client");
        }
        for client in &report.nacked {
            warn!(client = %client.name, machine = %client.machine, "Engine: client responded with nack");
        }

        self.complete_head(status);
    }
}

impl AvailabilityObserver for Engine {
    fn on_availability_changed(&self, availability: ServiceAvailability) {
        // The empty-queue check in submit reads the live value; this
        // notification is informational
        info!(%availability, "Engine: service availability changed");
    }
}

#[cfg(test)]
mod tests {
    use super::super::wakelock::CountingWakeHold;
    use super::*;
    use crate::domain::ALL_MACHINES;
    use crate::service::{ClientInfo, TransitionCallback};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Service double that parks transition callbacks until the test fires
    /// them, giving full control over completion order
    struct MockService {
        machines: Vec<String>,
        available: AtomicBool,
        fail_name_query: AtomicBool,
        pending: Mutex<VecDeque<(ActivityState, String, TransitionCallback)>>,
        requests: AtomicUsize,
    }

    impl MockService {
        fn new(machines: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                machines: machines.iter().map(|s| s.to_string()).collect(),
                available: AtomicBool::new(true),
                fail_name_query: AtomicBool::new(false),
                pending: Mutex::new(VecDeque::new()),
                requests: AtomicUsize::new(0),
            })
        }

        fn complete_next(&self, result: Result<(), ServiceError>) {
            let (_, _, done) = self
                .pending
                .lock()
                .unwrap()
                .pop_front()
                .expect("no pending transition command");
            done(result);
        }

        fn pending_count(&self) -> usize {
            self.pending.lock().unwrap().len()
        }

        fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    impl ActivityStateService for MockService {
        fn availability(&self) -> ServiceAvailability {
            if self.available.load(Ordering::SeqCst) {
                ServiceAvailability::Available
            } else {
                ServiceAvailability::Unavailable
            }
        }

        fn machine_names(&self) -> Result<Vec<String>, ServiceError> {
            if self.fail_name_query.load(Ordering::SeqCst) {
                Err(ServiceError::Registry("scripted failure".to_string()))
            } else {
                Ok(self.machines.clone())
            }
        }

        fn request_transition(&self, state: ActivityState, machine: &str, done: TransitionCallback) {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.pending
                .lock()
                .unwrap()
                .push_back((state, machine.to_string(), done));
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Seen {
        Rejected { id: u64, reason: EventStatus },
        Processed { id: u64, status: EventStatus, success: bool },
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Seen>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl EventListener for Recorder {
        fn on_event_rejected(&self, event: &Event, reason: EventStatus) {
            self.seen.lock().unwrap().push(Seen::Rejected {
                id: event.id(),
                reason,
            });
        }

        fn on_event_processed(&self, event: &Event, success: bool) {
            self.seen.lock().unwrap().push(Seen::Processed {
                id: event.id(),
                status: event.status(),
                success,
            });
        }
    }

    struct Harness {
        engine: Arc<Engine>,
        service: Arc<MockService>,
        hold: Arc<CountingWakeHold>,
        recorder: Arc<Recorder>,
        _sub: Subscription,
    }

    fn harness() -> Harness {
        let service = MockService::new(&["ecu1", "ecu2"]);
        let hold = Arc::new(CountingWakeHold::new());
        let engine = Engine::new(service.clone(), hold.clone());
        let recorder = Arc::new(Recorder::default());
        let sub = engine.register_listener(recorder.clone(), None);
        Harness {
            engine,
            service,
            hold,
            recorder,
            _sub: sub,
        }
    }

    fn suspend(machine: &str) -> Event {
        Event::new(TriggerType::Socket, ActivityState::Suspend, machine)
    }

    fn resume(machine: &str) -> Event {
        Event::new(TriggerType::Socket, ActivityState::Resume, machine)
    }

    #[test]
    fn test_invalid_machine_rejected_synchronously() {
        let h = harness();

        let id = h.engine.submit(suspend("ghost"));

        assert_eq!(
            h.recorder.seen(),
            vec![Seen::Rejected {
                id,
                reason: EventStatus::RejectedInvalidMachine
            }]
        );
        assert!(h.engine.queue_snapshot().is_empty());
        assert_eq!(h.service.request_count(), 0);
        assert_eq!(h.hold.acquired(), 0);
    }

    #[test]
    fn test_unknown_target_state_rejected() {
        let h = harness();

        let id = h.engine.submit(Event::new(TriggerType::Text, ActivityState::Unknown, "ecu1"));

        assert_eq!(
            h.recorder.seen(),
            vec![Seen::Rejected {
                id,
                reason: EventStatus::RejectedInvalidTransition
            }]
        );
        assert!(h.engine.queue_snapshot().is_empty());
    }

    #[test]
    fn test_failed_machine_query_accepts_event() {
        // Reference behavior: if the registry query fails the event goes
        // through without the name check
        let h = harness();
        h.service.fail_name_query.store(true, Ordering::SeqCst);

        h.engine.submit(suspend("ghost"));

        assert_eq!(h.engine.queue_snapshot().len(), 1);
        assert_eq!(h.service.request_count(), 1);
    }

    #[test]
    fn test_backend_unavailable_rejects_without_queue_mutation() {
        let h = harness();
        h.service.available.store(false, Ordering::SeqCst);

        let a = h.engine.submit(suspend("ecu1"));
        let b = h.engine.submit(suspend("ecu1"));

        assert_eq!(
            h.recorder.seen(),
            vec![
                Seen::Rejected {
                    id: a,
                    reason: EventStatus::Failed
                },
                Seen::Rejected {
                    id: b,
                    reason: EventStatus::Failed
                },
            ]
        );
        assert!(h.engine.queue_snapshot().is_empty());
        assert_eq!(h.hold.acquired(), 0);
        assert_eq!(h.service.request_count(), 0);
    }

    #[test]
    fn test_first_event_dispatches_and_holds_wake() {
        let h = harness();

        h.engine.submit(suspend("ecu1"));

        assert_eq!(h.service.request_count(), 1);
        assert_eq!(h.hold.acquired(), 1);
        assert_eq!(h.hold.released(), 0);

        let snap = h.engine.queue_snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].status, EventStatus::InQueue);
    }

    #[test]
    fn test_head_marked_in_progress_after_command_initiated() {
        let h = harness();

        h.engine.submit(suspend("ecu1"));
        h.service.complete_next(Ok(()));

        let snap = h.engine.queue_snapshot();
        assert_eq!(snap[0].status, EventStatus::InProgress);
        // Non-resume completion waits for the ack report
        assert!(h.recorder.seen().is_empty());
    }

    #[test]
    fn test_single_in_flight_head_only() {
        let h = harness();

        h.engine.submit(suspend("ecu1"));
        h.engine.submit(suspend("ecu2"));
        h.engine.submit(suspend(ALL_MACHINES));
        h.service.complete_next(Ok(()));

        // One physical command despite three queued intents
        assert_eq!(h.service.request_count(), 1);

        let snap = h.engine.queue_snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].status, EventStatus::InProgress);
        assert_eq!(snap[1].status, EventStatus::InQueue);
        assert_eq!(snap[2].status, EventStatus::InQueue);
    }

    #[test]
    fn test_override_spares_in_flight_head() {
        let h = harness();

        let a = h.engine.submit(suspend("ecu1"));
        let b = h.engine.submit(resume("ecu1"));
        let c = h.engine.submit(Event::new(TriggerType::Socket, ActivityState::Shutdown, "ecu1"));

        // B diverges from both the in-flight state and the new intent, so it
        // is overridden; A (in flight) is untouched and C queues behind it
        assert_eq!(
            h.recorder.seen(),
            vec![Seen::Rejected {
                id: b,
                reason: EventStatus::RejectedOverridden
            }]
        );
        let snap = h.engine.queue_snapshot();
        assert_eq!(snap.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(h.service.request_count(), 1);
    }

    #[test]
    fn test_queued_event_matching_in_flight_state_survives_override_scan() {
        let h = harness();

        let a = h.engine.submit(suspend("ecu1"));
        let b = h.engine.submit(suspend("ecu2"));
        let c = h.engine.submit(resume("ecu1"));

        // B shares the in-flight state, so the scan spares it; it is only
        // reported overridden later, when A completes against the divergent
        // tail (see test_divergent_tail_overrides_completed_head_group)
        assert!(h.recorder.seen().is_empty());
        let snap = h.engine.queue_snapshot();
        assert_eq!(snap.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, b, c]);
    }

    #[test]
    fn test_duplicate_collapse_on_success() {
        let h = harness();

        let a = h.engine.submit(suspend("ecu1"));
        let b = h.engine.submit(suspend("ecu1"));
        let c = h.engine.submit(suspend("ecu1"));
        h.service.complete_next(Ok(()));
        h.engine.on_ack_report(AckReport::acked("ecu1"));

        // All three resolve from one transition; no second command issued
        assert_eq!(
            h.recorder.seen(),
            vec![
                Seen::Processed {
                    id: a,
                    status: EventStatus::Succeeded,
                    success: true
                },
                Seen::Processed {
                    id: b,
                    status: EventStatus::Succeeded,
                    success: true
                },
                Seen::Processed {
                    id: c,
                    status: EventStatus::Succeeded,
                    success: true
                },
            ]
        );
        assert!(h.engine.queue_snapshot().is_empty());
        assert_eq!(h.service.request_count(), 1);
        assert_eq!(h.hold.acquired(), 1);
        assert_eq!(h.hold.released(), 1);
    }

    #[test]
    fn test_resume_succeeds_without_ack() {
        let h = harness();

        let id = h.engine.submit(resume(ALL_MACHINES));
        h.service.complete_next(Ok(()));

        assert_eq!(
            h.recorder.seen(),
            vec![Seen::Processed {
                id,
                status: EventStatus::Succeeded,
                success: true
            }]
        );
        assert!(h.engine.queue_snapshot().is_empty());
        assert_eq!(h.hold.released(), 1);
    }

    #[test]
    fn test_command_failure_advances_to_divergent_tail() {
        let h = harness();

        let a = h.engine.submit(suspend("ecu1"));
        let b = h.engine.submit(resume("ecu1"));
        h.service.complete_next(Err(ServiceError::Rejected("bus error".to_string())));

        // The tail diverged from A while it was failing, so A is reported
        // overridden rather than failed, and B dispatches next
        assert_eq!(
            h.recorder.seen(),
            vec![Seen::Processed {
                id: a,
                status: EventStatus::RejectedOverridden,
                success: false
            }]
        );
        assert_eq!(h.service.request_count(), 2);
        assert_eq!(h.engine.queue_snapshot()[0].id, b);
    }

    #[test]
    fn test_command_failure_with_matching_tail_reports_failed() {
        let h = harness();

        let a = h.engine.submit(suspend("ecu1"));
        h.service.complete_next(Err(ServiceError::Rejected("bus error".to_string())));

        assert_eq!(
            h.recorder.seen(),
            vec![Seen::Processed {
                id: a,
                status: EventStatus::Failed,
                success: false
            }]
        );
        assert!(h.engine.queue_snapshot().is_empty());
        assert_eq!(h.hold.released(), 1);
    }

    #[test]
    fn test_ack_nack_maps_to_failed() {
        let h = harness();

        let id = h.engine.submit(suspend("ecu1"));
        h.service.complete_next(Ok(()));
        h.engine.on_ack_report(AckReport {
            status: AckStatus::Nacked,
            machine: "ecu1".to_string(),
            unresponsive: Vec::new(),
            nacked: vec![ClientInfo {
                name: "navd".to_string(),
                machine: "ecu1".to_string(),
            }],
        });

        assert_eq!(
            h.recorder.seen(),
            vec![Seen::Processed {
                id,
                status: EventStatus::Failed,
                success: false
            }]
        );
    }

    #[test]
    fn test_ack_timeout_maps_to_failed_timeout() {
        let h = harness();

        let id = h.engine.submit(suspend("ecu1"));
        h.service.complete_next(Ok(()));
        h.engine.on_ack_report(AckReport {
            status: AckStatus::TimedOut,
            machine: "ecu1".to_string(),
            unresponsive: vec![ClientInfo {
                name: "teld".to_string(),
                machine: "ecu1".to_string(),
            }],
            nacked: Vec::new(),
        });

        assert_eq!(
            h.recorder.seen(),
            vec![Seen::Processed {
                id,
                status: EventStatus::FailedTimeout,
                success: false
            }]
        );
        assert!(h.engine.queue_snapshot().is_empty());
    }

    #[test]
    fn test_divergent_tail_overrides_completed_head_group() {
        // Documented quirk: advance inspects only the current tail. The
        // override scan in submit keeps the queue to two intent groups, so
        // the one check is sufficient in practice; this test pins the
        // behavior for the [A(S), B(S), C(T)] shape.
        let h = harness();

        let a = h.engine.submit(suspend("ecu1"));
        let b = h.engine.submit(suspend("ecu1"));
        let c = h.engine.submit(resume("ecu1"));
        h.service.complete_next(Ok(()));
        h.engine.on_ack_report(AckReport::acked("ecu1"));

        // A and B collapse to overridden because the tail diverged; C runs
        assert_eq!(
            h.recorder.seen(),
            vec![
                Seen::Processed {
                    id: a,
                    status: EventStatus::RejectedOverridden,
                    success: false
                },
                Seen::Processed {
                    id: b,
                    status: EventStatus::RejectedOverridden,
                    success: false
                },
            ]
        );
        assert_eq!(h.engine.queue_snapshot()[0].id, c);
        assert_eq!(h.service.request_count(), 2);
        // Queue never drained, so the hold is still asserted
        assert_eq!(h.hold.acquired(), 1);
        assert_eq!(h.hold.released(), 0);
    }

    #[test]
    fn test_wake_hold_paired_over_multiple_cycles() {
        let h = harness();

        for _ in 0..3 {
            h.engine.submit(resume(ALL_MACHINES));
            h.service.complete_next(Ok(()));
        }

        assert_eq!(h.hold.acquired(), 3);
        assert_eq!(h.hold.released(), 3);
    }

    #[test]
    fn test_drain_release_ordered_before_racing_acquire() {
        use std::sync::Condvar;
        use std::thread;
        use std::time::Duration;

        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum HoldCall {
            Acquire,
            Release,
        }

        /// Wake hold whose release blocks until the test opens the gate,
        /// widening the drain window a concurrent submit could slip into
        struct GatedHold {
            calls: Mutex<Vec<HoldCall>>,
            in_release: AtomicBool,
            gate: Mutex<bool>,
            opened: Condvar,
        }

        impl GatedHold {
            fn new() -> Self {
                Self {
                    calls: Mutex::new(Vec::new()),
                    in_release: AtomicBool::new(false),
                    gate: Mutex::new(false),
                    opened: Condvar::new(),
                }
            }

            fn open(&self) {
                *self.gate.lock().unwrap() = true;
                self.opened.notify_all();
            }
        }

        impl WakeHold for GatedHold {
            fn acquire(&self) {
                self.calls.lock().unwrap().push(HoldCall::Acquire);
            }

            fn release(&self) {
                self.in_release.store(true, Ordering::SeqCst);
                let mut open = self.gate.lock().unwrap();
                while !*open {
                    open = self.opened.wait(open).unwrap();
                }
                drop(open);
                self.calls.lock().unwrap().push(HoldCall::Release);
            }
        }

        let service = MockService::new(&["ecu1", "ecu2"]);
        let hold = Arc::new(GatedHold::new());
        let engine = Engine::new(service.clone(), hold.clone());

        engine.submit(resume(ALL_MACHINES));

        // Drain stalls inside release() with the engine lock held
        let drain = {
            let service = service.clone();
            thread::spawn(move || service.complete_next(Ok(())))
        };
        while !hold.in_release.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }

        // This submit must wait for the drain; its acquire may not overtake
        // the pending release
        let racer = {
            let engine = engine.clone();
            thread::spawn(move || {
                engine.submit(suspend("ecu1"));
            })
        };
        thread::sleep(Duration::from_millis(50));
        hold.open();
        drain.join().unwrap();
        racer.join().unwrap();

        assert_eq!(
            hold.calls.lock().unwrap().clone(),
            vec![HoldCall::Acquire, HoldCall::Release, HoldCall::Acquire]
        );
        assert_eq!(engine.queue_snapshot().len(), 1);
        assert_eq!(service.request_count(), 2);
    }

    #[test]
    fn test_listener_fan_out_by_trigger_type() {
        let h = harness();
        let bus_only = Arc::new(Recorder::default());
        let _bus_sub = h.engine.register_listener(bus_only.clone(), Some(TriggerType::Bus));

        let socket_id = h.engine.submit(Event::new(TriggerType::Socket, ActivityState::Suspend, "ghost"));
        let bus_id = h.engine.submit(Event::new(TriggerType::Bus, ActivityState::Suspend, "ghost"));

        // The typed listener saw only the bus event; the wildcard saw both
        assert_eq!(
            bus_only.seen(),
            vec![Seen::Rejected {
                id: bus_id,
                reason: EventStatus::RejectedInvalidMachine
            }]
        );
        assert_eq!(h.recorder.seen().len(), 2);
        assert_eq!(
            h.recorder.seen()[0],
            Seen::Rejected {
                id: socket_id,
                reason: EventStatus::RejectedInvalidMachine
            }
        );
    }

    #[test]
    fn test_ack_report_with_empty_queue_is_ignored() {
        let h = harness();

        h.engine.on_ack_report(AckReport::acked("ecu1"));

        assert!(h.recorder.seen().is_empty());
        assert!(h.engine.queue_snapshot().is_empty());
    }

    #[test]
    fn test_shutdown_releases_hold_and_clears_queue() {
        let h = harness();

        h.engine.submit(suspend("ecu1"));
        h.engine.submit(suspend("ecu2"));
        h.engine.shutdown();

        assert!(h.engine.queue_snapshot().is_empty());
        assert_eq!(h.hold.acquired(), 1);
        assert_eq!(h.hold.released(), 1);
    }

    #[test]
    fn test_queue_resumes_after_backend_recovery() {
        let h = harness();
        h.service.available.store(false, Ordering::SeqCst);
        h.engine.submit(suspend("ecu1"));
        assert_eq!(h.service.request_count(), 0);

        h.service.available.store(true, Ordering::SeqCst);
        let id = h.engine.submit(suspend("ecu1"));
        h.service.complete_next(Ok(()));
        h.engine.on_ack_report(AckReport::acked("ecu1"));

        assert!(h.recorder.seen().contains(&Seen::Processed {
            id,
            status: EventStatus::Succeeded,
            success: true
        }));
    }
}
