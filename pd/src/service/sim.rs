//! Simulated Activity State Service
//!
//! Stands in for the real distributed transition mechanism so the daemon
//! runs standalone: transition commands complete after a configurable delay,
//! and non-resume transitions are followed by an acknowledgment-aggregation
//! report to every registered observer. Tests can script deviations
//! (nacks, timeouts, command failures) and flip availability.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use super::{
    AckObserver, AckReport, AckStatus, ActivityStateService, AvailabilityObserver, ClientInfo, ServiceAvailability,
    ServiceError, TransitionCallback,
};
use crate::domain::ActivityState;

/// Tuning for the simulated backend
#[derive(Debug, Clone)]
pub struct SimServiceConfig {
    /// Known machine names
    pub machines: Vec<String>,
    /// Delay before a transition command reports initiation
    pub command_delay: Duration,
    /// Delay between command initiation and the ack report
    pub ack_delay: Duration,
}

impl Default for SimServiceConfig {
    fn default() -> Self {
        Self {
            machines: vec!["ecu1".to_string(), "ecu2".to_string()],
            command_delay: Duration::from_millis(20),
            ack_delay: Duration::from_millis(50),
        }
    }
}

/// Scripted outcome for the next transition request
#[derive(Debug, Clone)]
pub enum SimOutcome {
    /// All clients acknowledge (the default)
    Ack,
    /// Listed clients respond negatively
    Nack(Vec<ClientInfo>),
    /// Listed clients never answer
    Timeout(Vec<ClientInfo>),
    /// The command itself fails to initiate
    CommandFailure(String),
}

/// In-process simulated backend; requires a tokio runtime
pub struct SimService {
    config: SimServiceConfig,
    available: AtomicBool,
    script: Mutex<VecDeque<SimOutcome>>,
    ack_observers: Arc<Mutex<Vec<Arc<dyn AckObserver>>>>,
    availability_observers: Mutex<Vec<Arc<dyn AvailabilityObserver>>>,
}

impl SimService {
    pub fn new(config: SimServiceConfig) -> Self {
        info!(machines = ?config.machines, "SimService: starting simulated activity state service");
        Self {
            config,
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            ack_observers: Arc::new(Mutex::new(Vec::new())),
            availability_observers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to acknowledgment-aggregation reports
    pub fn register_ack_observer(&self, observer: Arc<dyn AckObserver>) {
        lock(&self.ack_observers).push(observer);
    }

    /// Subscribe to availability changes
    pub fn register_availability_observer(&self, observer: Arc<dyn AvailabilityObserver>) {
        lock(&self.availability_observers).push(observer);
    }

    /// Flip availability and notify observers
    pub fn set_availability(&self, availability: ServiceAvailability) {
        info!(%availability, "SimService: availability changed");
        self.available
            .store(availability == ServiceAvailability::Available, Ordering::SeqCst);
        for observer in lock(&self.availability_observers).iter() {
            observer.on_availability_changed(availability);
        }
    }

    /// Script the outcome of the next transition request
    pub fn script_next(&self, outcome: SimOutcome) {
        lock(&self.script).push_back(outcome);
    }

    /// Wait until the service reports available, up to `timeout`
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.availability() == ServiceAvailability::Available {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        self.availability() == ServiceAvailability::Available
    }
}

impl ActivityStateService for SimService {
    fn availability(&self) -> ServiceAvailability {
        if self.available.load(Ordering::SeqCst) {
            ServiceAvailability::Available
        } else {
            ServiceAvailability::Unavailable
        }
    }

    fn machine_names(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.config.machines.clone())
    }

    fn request_transition(&self, state: ActivityState, machine: &str, done: TransitionCallback) {
        if self.availability() != ServiceAvailability::Available {
            done(Err(ServiceError::Unavailable));
            return;
        }

        let outcome = lock(&self.script).pop_front().unwrap_or(SimOutcome::Ack);
        debug!(%state, %machine, ?outcome, "SimService: transition requested");

        let machine = machine.to_string();
        let command_delay = self.config.command_delay;
        let ack_delay = self.config.ack_delay;
        let observers = self.ack_observers.clone();

        tokio::spawn(async move {
            sleep(command_delay).await;

            if let SimOutcome::CommandFailure(message) = outcome {
                done(Err(ServiceError::Rejected(message)));
                return;
            }
            done(Ok(()));

            // Acknowledgment aggregation only happens for non-resume
            // transitions; resume completes on command initiation alone
            if state == ActivityState::Resume {
                return;
            }
            sleep(ack_delay).await;

            let report = match outcome {
                SimOutcome::Ack | SimOutcome::CommandFailure(_) => AckReport::acked(&machine),
                SimOutcome::Nack(nacked) => AckReport {
                    status: AckStatus::Nacked,
                    machine: machine.clone(),
                    unresponsive: Vec::new(),
                    nacked,
                },
                SimOutcome::Timeout(unresponsive) => AckReport {
                    status: AckStatus::TimedOut,
                    machine: machine.clone(),
                    unresponsive,
                    nacked: Vec::new(),
                },
            };
            debug!(machine = %report.machine, status = ?report.status, "SimService: ack report");
            for observer in lock(&observers).iter() {
                observer.on_ack_report(report.clone());
            }
        });
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
