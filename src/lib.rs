//! # hdl-bridge - co-simulation bridge for HDL simulators
//!
//! `hdl-bridge` is a plugin loaded into a hardware-description-language
//! simulator. At start of simulation it connects to an external controller
//! over a Unix domain socket and then serves the controller's commands (read,
//! write, force and release signals, advance time, finish) from inside the
//! simulator's own callbacks.
//!
//! ## Core Concepts
//!
//! - **InvocationArgs**: The simulator's command line, searched for `-name value`
//!   and `+name+value` options
//! - **ConnectionHandle**: The single client connection to the controller
//! - **CallbackRegistrar**: Binds lifecycle triggers to bridge entry points
//! - **Dispatcher**: Per-connection state machine, one message per cycle
//! - **Bridge**: Lifecycle controller the host actually calls
//!
//! The simulator itself is reached only through the [`SimInterface`] and
//! [`Scheduler`] capabilities, so everything above runs against
//! [`MemorySim`] and [`RecordingScheduler`] in tests. The real binding lives
//! behind the `vpi` feature.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hdl_bridge::{Bridge, InvocationArgs, MemorySim, RecordingScheduler, SignalValue};
//!
//! let sim = MemorySim::new(InvocationArgs::new(["+socket+/tmp/ctl.sock"]))
//!     .with_signal("tb.dut.ready", SignalValue::Int(0));
//! let mut bridge = Bridge::new(sim, Box::new(RecordingScheduler::new()))?;
//! bridge.register_callbacks()?;
//!
//! // The host fires start of simulation.
//! let status = bridge.on_start();
//! # Ok::<(), hdl_bridge::ConfigurationError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod args;
pub mod config;
pub mod error;
pub mod protocol;
pub mod sim;

// Session machinery
pub mod bridge;
pub mod connection;
pub mod dispatcher;
pub mod registrar;

// Controller side
#[cfg(unix)]
pub mod client;

// Simulator binding
#[cfg(feature = "vpi")]
pub mod vpi;

// Re-export primary types at crate root for convenience
pub use args::InvocationArgs;
pub use bridge::{Bridge, STATUS_FATAL, STATUS_OK};
pub use config::{BridgeConfig, DispatchMode};
pub use connection::{connect, Channel, ConnectError, ConnectionHandle};
pub use dispatcher::{CloseReason, CycleOutcome, DispatchState, Dispatcher, SessionStats};
pub use error::{ApplyError, BridgeError, BridgeResult, ConfigurationError, ConnectionError, ProtocolError};
pub use protocol::{Command, Operation, Reply, Response, SignalValue, Status};
pub use registrar::{CallbackRegistrar, CallbackRegistration, EntryPoint, RecordingScheduler, Scheduler, Trigger};
pub use sim::{MemorySim, ObjectRef, SimInterface, SimTime, WriteMode};

#[cfg(unix)]
pub use client::{Controller, ControllerListener};
