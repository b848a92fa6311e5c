//! Simulation-interface capability.
//!
//! The bridge never talks to the simulator directly. Everything it needs
//! from the host (object lookup, value access, time, console output) goes
//! through [`SimInterface`], so the dispatcher runs the same against a real
//! procedural interface or the in-memory [`MemorySim`].

mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::args::InvocationArgs;
use crate::error::ApplyError;
use crate::protocol::SignalValue;

pub use memory::MemorySim;

/// Simulation time in host ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(pub u64);

impl SimTime {
    /// Returns the time `ticks` later, saturating.
    #[must_use]
    pub const fn after(self, ticks: u64) -> Self {
        Self(self.0.saturating_add(ticks))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a simulation object, valid for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub usize);

/// How a value is applied to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Deposit immediately; the design may overwrite it.
    Deposit,
    /// Hold the value until released.
    Force,
}

/// Capability the host simulator provides to the bridge.
///
/// Calls are synchronous and run on the simulator's own thread, so
/// implementations need no internal locking.
pub trait SimInterface {
    /// The simulator's invocation vector.
    fn invocation_args(&self) -> InvocationArgs;

    /// Resolves a hierarchical name to an object.
    ///
    /// # Errors
    /// `ApplyError::UnknownObject` if nothing has that name.
    fn lookup(&mut self, path: &str) -> Result<ObjectRef, ApplyError>;

    /// Reads the current value of an object.
    ///
    /// # Errors
    /// `ApplyError::UnknownObject` for a stale handle, `Rejected` if the
    /// object has no readable value.
    fn read(&mut self, obj: ObjectRef, path: &str) -> Result<SignalValue, ApplyError>;

    /// Writes a value to an object.
    ///
    /// # Errors
    /// `ApplyError::InvalidValue` if the value does not fit the object,
    /// `UnknownObject` for a stale handle, `Rejected` if the simulator
    /// refuses the write.
    fn write(&mut self, obj: ObjectRef, path: &str, value: &SignalValue, mode: WriteMode) -> Result<(), ApplyError>;

    /// Releases a force and returns the value the object settles to.
    ///
    /// # Errors
    /// `ApplyError::UnknownObject` for a stale handle, `Rejected` if the
    /// simulator refuses the release.
    fn release(&mut self, obj: ObjectRef, path: &str) -> Result<SignalValue, ApplyError>;

    /// Current simulation time.
    fn time(&self) -> SimTime;

    /// Prints one line on the simulator's standard output.
    fn print(&mut self, line: &str);

    /// Asks the simulator to finish the run.
    fn finish(&mut self);
}
