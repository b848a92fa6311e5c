//! Callback registration with the host scheduler.
//!
//! The simulator's callback table is process-global. The bridge never
//! reaches into it directly: a [`Scheduler`] capability is injected when the
//! [`CallbackRegistrar`] is built, and tests swap in [`RecordingScheduler`].

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::ConfigurationError;

/// Condition under which the host invokes an entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Fires once when simulation starts.
    StartOfSimulation,
    /// Fires once when simulation ends.
    EndOfSimulation,
    /// Fires each time the design calls the named system task.
    SystemTask(String),
    /// Fires once after the given number of ticks.
    AfterDelay(u64),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartOfSimulation => write!(f, "start-of-simulation"),
            Self::EndOfSimulation => write!(f, "end-of-simulation"),
            Self::SystemTask(name) => write!(f, "system task {name}"),
            Self::AfterDelay(ticks) => write!(f, "delay of {ticks} ticks"),
        }
    }
}

/// Bridge entry points the host can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Connect and run the first dispatch cycle.
    Startup,
    /// Release the connection.
    Shutdown,
    /// Run one more dispatch cycle.
    Service,
    /// Answer an outstanding advance once its delay has elapsed, then run
    /// a dispatch cycle.
    Resume,
}

/// A trigger bound to an entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackRegistration {
    /// When the host calls back.
    pub trigger: Trigger,
    /// What it calls.
    pub entry: EntryPoint,
}

/// Host capability for registering callbacks.
pub trait Scheduler: Send {
    /// Hands a registration to the host. The host owns it afterwards.
    ///
    /// # Errors
    /// `ConfigurationError::RegistrationRejected` if the host refused it.
    fn register(&mut self, registration: &CallbackRegistration) -> Result<(), ConfigurationError>;
}

/// Owns the bridge's registrations for the run.
pub struct CallbackRegistrar {
    scheduler: Box<dyn Scheduler>,
    registrations: Vec<CallbackRegistration>,
}

impl fmt::Debug for CallbackRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistrar")
            .field("registrations", &self.registrations)
            .finish_non_exhaustive()
    }
}

impl CallbackRegistrar {
    /// Creates a registrar over the given scheduler.
    #[must_use]
    pub fn new(scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            registrations: Vec::new(),
        }
    }

    /// Binds `entry` to `trigger`.
    ///
    /// Registrations are never revoked. Registering the same trigger twice
    /// is the caller's mistake and is passed through to the host as is.
    ///
    /// # Errors
    /// Propagates a host rejection.
    pub fn register(&mut self, trigger: Trigger, entry: EntryPoint) -> Result<(), ConfigurationError> {
        let registration = CallbackRegistration { trigger, entry };
        if let Err(err) = self.scheduler.register(&registration) {
            warn!(trigger = %registration.trigger, error = %err, "callback registration rejected");
            return Err(err);
        }
        debug!(trigger = %registration.trigger, entry = ?registration.entry, "callback registered");
        // One-shot delays are not kept; the ledger would grow with every advance.
        if !matches!(registration.trigger, Trigger::AfterDelay(_)) {
            self.registrations.push(registration);
        }
        Ok(())
    }

    /// Permanent registrations so far, in order.
    #[must_use]
    pub fn registrations(&self) -> &[CallbackRegistration] {
        &self.registrations
    }
}

/// Scheduler that records registrations instead of talking to a simulator.
///
/// Clones share the same log, so a test can keep one clone and hand the
/// other to the bridge.
#[derive(Debug, Clone, Default)]
pub struct RecordingScheduler {
    log: Arc<Mutex<Vec<CallbackRegistration>>>,
    reject: Arc<Mutex<Vec<Trigger>>>,
}

impl RecordingScheduler {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes future registrations for `trigger` fail.
    pub fn reject(&self, trigger: Trigger) {
        if let Ok(mut reject) = self.reject.lock() {
            reject.push(trigger);
        }
    }

    /// Snapshot of everything registered.
    #[must_use]
    pub fn registrations(&self) -> Vec<CallbackRegistration> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Removes and returns pending one-shot delay registrations.
    #[must_use]
    pub fn take_delays(&self) -> Vec<(u64, EntryPoint)> {
        let Ok(mut log) = self.log.lock() else {
            return Vec::new();
        };
        let mut delays = Vec::new();
        log.retain(|reg| match reg.trigger {
            Trigger::AfterDelay(ticks) => {
                delays.push((ticks, reg.entry));
                false
            }
            _ => true,
        });
        delays
    }
}

impl Scheduler for RecordingScheduler {
    fn register(&mut self, registration: &CallbackRegistration) -> Result<(), ConfigurationError> {
        let rejected = self
            .reject
            .lock()
            .map(|r| r.contains(&registration.trigger))
            .unwrap_or(false);
        if rejected {
            return Err(ConfigurationError::RegistrationRejected {
                trigger: registration.trigger.to_string(),
            });
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(registration.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrations_reach_scheduler_in_order() {
        let recorder = RecordingScheduler::new();
        let mut registrar = CallbackRegistrar::new(Box::new(recorder.clone()));

        registrar.register(Trigger::StartOfSimulation, EntryPoint::Startup).unwrap();
        registrar.register(Trigger::EndOfSimulation, EntryPoint::Shutdown).unwrap();

        let seen = recorder.registrations();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].trigger, Trigger::StartOfSimulation);
        assert_eq!(seen[1].entry, EntryPoint::Shutdown);
        assert_eq!(registrar.registrations(), seen.as_slice());
    }

    #[test]
    fn test_rejection_is_reported_and_not_recorded() {
        let recorder = RecordingScheduler::new();
        recorder.reject(Trigger::SystemTask("$svc".to_string()));
        let mut registrar = CallbackRegistrar::new(Box::new(recorder.clone()));

        let err = registrar
            .register(Trigger::SystemTask("$svc".to_string()), EntryPoint::Service)
            .unwrap_err();
        assert!(err.to_string().contains("$svc"));
        assert!(registrar.registrations().is_empty());
        assert!(recorder.registrations().is_empty());
    }

    #[test]
    fn test_take_delays_leaves_permanent_registrations() {
        let recorder = RecordingScheduler::new();
        let mut registrar = CallbackRegistrar::new(Box::new(recorder.clone()));
        registrar.register(Trigger::EndOfSimulation, EntryPoint::Shutdown).unwrap();
        registrar.register(Trigger::AfterDelay(25), EntryPoint::Resume).unwrap();

        assert_eq!(registrar.registrations().len(), 1);
        assert_eq!(recorder.take_delays(), vec![(25, EntryPoint::Resume)]);
        assert!(recorder.take_delays().is_empty());
        assert_eq!(recorder.registrations().len(), 1);
    }
}
