//! In-memory simulation host.
//!
//! A reference implementation of [`SimInterface`] holding a flat table of
//! named signals. It is intended for tests and for exercising a controller
//! without a simulator.

use std::collections::HashMap;

use crate::args::InvocationArgs;
use crate::error::ApplyError;
use crate::protocol::SignalValue;

use super::{ObjectRef, SimInterface, SimTime, WriteMode};

#[derive(Debug, Clone)]
struct Signal {
    path: String,
    driven: SignalValue,
    forced: Option<SignalValue>,
}

impl Signal {
    fn current(&self) -> &SignalValue {
        self.forced.as_ref().unwrap_or(&self.driven)
    }
}

/// In-memory simulator.
#[derive(Debug, Default)]
pub struct MemorySim {
    args: InvocationArgs,
    signals: Vec<Signal>,
    by_path: HashMap<String, usize>,
    time: SimTime,
    output: Vec<String>,
    finished: bool,
}

impl MemorySim {
    /// Creates a simulator launched with `args`.
    #[must_use]
    pub fn new(args: InvocationArgs) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    /// Adds (or resets) a signal.
    #[must_use]
    pub fn with_signal(mut self, path: &str, value: SignalValue) -> Self {
        self.set_signal(path, value);
        self
    }

    /// Adds (or resets) a signal in place.
    pub fn set_signal(&mut self, path: &str, value: SignalValue) {
        match self.by_path.get(path) {
            Some(&idx) => {
                self.signals[idx].driven = value;
                self.signals[idx].forced = None;
            }
            None => {
                self.by_path.insert(path.to_string(), self.signals.len());
                self.signals.push(Signal {
                    path: path.to_string(),
                    driven: value,
                    forced: None,
                });
            }
        }
    }

    /// Current value of a signal, honoring forces.
    #[must_use]
    pub fn value(&self, path: &str) -> Option<&SignalValue> {
        self.by_path.get(path).map(|&idx| self.signals[idx].current())
    }

    /// Returns true if the signal is currently forced.
    #[must_use]
    pub fn is_forced(&self, path: &str) -> bool {
        self.by_path
            .get(path)
            .is_some_and(|&idx| self.signals[idx].forced.is_some())
    }

    /// Moves simulation time forward.
    pub fn advance(&mut self, ticks: u64) {
        self.time = self.time.after(ticks);
    }

    /// Lines printed through [`SimInterface::print`].
    #[must_use]
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Returns true once [`SimInterface::finish`] was called.
    #[must_use]
    pub const fn finished(&self) -> bool {
        self.finished
    }

    fn signal_mut(&mut self, obj: ObjectRef, path: &str) -> Result<&mut Signal, ApplyError> {
        self.signals
            .get_mut(obj.0)
            .filter(|s| s.path == path)
            .ok_or_else(|| ApplyError::UnknownObject {
                path: path.to_string(),
            })
    }
}

impl SimInterface for MemorySim {
    fn invocation_args(&self) -> InvocationArgs {
        self.args.clone()
    }

    fn lookup(&mut self, path: &str) -> Result<ObjectRef, ApplyError> {
        self.by_path
            .get(path)
            .copied()
            .map(ObjectRef)
            .ok_or_else(|| ApplyError::UnknownObject {
                path: path.to_string(),
            })
    }

    fn read(&mut self, obj: ObjectRef, path: &str) -> Result<SignalValue, ApplyError> {
        Ok(self.signal_mut(obj, path)?.current().clone())
    }

    fn write(&mut self, obj: ObjectRef, path: &str, value: &SignalValue, mode: WriteMode) -> Result<(), ApplyError> {
        let signal = self.signal_mut(obj, path)?;
        match mode {
            // A deposit on a forced signal is masked until release.
            WriteMode::Deposit => signal.driven = value.clone(),
            WriteMode::Force => signal.forced = Some(value.clone()),
        }
        Ok(())
    }

    fn release(&mut self, obj: ObjectRef, path: &str) -> Result<SignalValue, ApplyError> {
        let signal = self.signal_mut(obj, path)?;
        signal.forced = None;
        Ok(signal.driven.clone())
    }

    fn time(&self) -> SimTime {
        self.time
    }

    fn print(&mut self, line: &str) {
        self.output.push(line.to_string());
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}
