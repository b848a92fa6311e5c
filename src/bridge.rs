//! Lifecycle controller.
//!
//! [`Bridge`] is what the host actually calls. It registers the bridge's
//! entry points at load time, connects and runs the first dispatch cycle at
//! start of simulation, pumps further cycles on demand, and releases the
//! connection at end of simulation.
//!
//! Every entry point returns a host status: `0` for success, non-zero for a
//! fatal plugin error. None of them panic, and each is safe to call twice.

use tracing::{debug, error, info, warn};

use crate::args::InvocationArgs;
use crate::config::{BridgeConfig, DispatchMode};
use crate::connection;
use crate::dispatcher::{CloseReason, CycleOutcome, Dispatcher};
use crate::error::{BridgeError, ConfigurationError};
use crate::registrar::{CallbackRegistrar, EntryPoint, Scheduler, Trigger};
use crate::sim::SimInterface;

/// Status returned to the host on success.
pub const STATUS_OK: i32 = 0;

/// Status returned to the host on a fatal error.
pub const STATUS_FATAL: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loaded,
    Running,
    Ended,
}

/// The bridge, bound to one host for one simulation run.
#[derive(Debug)]
pub struct Bridge<S: SimInterface> {
    config: BridgeConfig,
    args: InvocationArgs,
    sim: S,
    registrar: CallbackRegistrar,
    session: Option<Dispatcher>,
    last_close: Option<CloseReason>,
    phase: Phase,
}

impl<S: SimInterface> Bridge<S> {
    /// Creates a bridge configured from the host's invocation vector.
    ///
    /// # Errors
    /// `ConfigurationError` if an override on the command line is invalid.
    pub fn new(sim: S, scheduler: Box<dyn Scheduler>) -> Result<Self, ConfigurationError> {
        let args = sim.invocation_args();
        let config = BridgeConfig::from_args(&args)?;
        Ok(Self::build(sim, scheduler, config, args))
    }

    /// Creates a bridge with an explicit configuration.
    #[must_use]
    pub fn with_config(sim: S, scheduler: Box<dyn Scheduler>, config: BridgeConfig) -> Self {
        let args = sim.invocation_args();
        Self::build(sim, scheduler, config, args)
    }

    fn build(sim: S, scheduler: Box<dyn Scheduler>, config: BridgeConfig, args: InvocationArgs) -> Self {
        Self {
            config,
            args,
            sim,
            registrar: CallbackRegistrar::new(scheduler),
            session: None,
            last_close: None,
            phase: Phase::Loaded,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The host capability.
    #[must_use]
    pub const fn sim(&self) -> &S {
        &self.sim
    }

    /// Mutable access to the host capability.
    pub fn sim_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    /// The registrar and its ledger.
    #[must_use]
    pub const fn registrar(&self) -> &CallbackRegistrar {
        &self.registrar
    }

    /// The live session, if connected.
    #[must_use]
    pub const fn session(&self) -> Option<&Dispatcher> {
        self.session.as_ref()
    }

    /// Why the last session ended.
    #[must_use]
    pub const fn last_close(&self) -> Option<&CloseReason> {
        self.last_close.as_ref()
    }

    /// Registers start, end and service callbacks. Call once at load time.
    ///
    /// # Errors
    /// Propagates a host rejection.
    pub fn register_callbacks(&mut self) -> Result<(), ConfigurationError> {
        self.registrar.register(Trigger::StartOfSimulation, EntryPoint::Startup)?;
        self.registrar.register(Trigger::EndOfSimulation, EntryPoint::Shutdown)?;
        let task = self.config.service_task.clone();
        self.registrar.register(Trigger::SystemTask(task), EntryPoint::Service)
    }

    /// Startup path for hosts without a startup routine table.
    ///
    /// Registers the end callback, then runs [`on_start`] immediately.
    /// Such hosts declare the service task themselves, so it is not
    /// registered here.
    ///
    /// [`on_start`]: Self::on_start
    pub fn bootstrap_inline(&mut self) -> i32 {
        if let Err(err) = self.registrar.register(Trigger::EndOfSimulation, EntryPoint::Shutdown) {
            self.report_fatal(&BridgeError::from(err));
            return STATUS_FATAL;
        }
        self.on_start()
    }

    /// Routes a host callback to its entry point.
    pub fn invoke(&mut self, entry: EntryPoint) -> i32 {
        match entry {
            EntryPoint::Startup => self.on_start(),
            EntryPoint::Shutdown => self.on_end(),
            EntryPoint::Service => self.on_service(),
            EntryPoint::Resume => self.on_resume(),
        }
    }

    /// Start of simulation: connect, then run the first dispatch cycle.
    ///
    /// On a connection failure no cycle is entered and `STATUS_FATAL` is
    /// returned.
    pub fn on_start(&mut self) -> i32 {
        if self.phase != Phase::Loaded {
            warn!(phase = ?self.phase, "start callback invoked again; ignoring");
            return STATUS_OK;
        }
        self.phase = Phase::Running;

        let path = self.config.socket_path(&self.args);
        let handle = match connection::connect(path, &self.config.socket_option, self.config.max_frame_bytes) {
            Ok(handle) => handle,
            Err(err) => {
                self.report_fatal(&BridgeError::from(err));
                self.console("couldn't connect to the controller");
                return STATUS_FATAL;
            }
        };

        self.console(&format!("connected to controller at {}", handle.peer()));
        self.session = Some(Dispatcher::new(handle, self.config.max_frame_bytes));
        self.pump(false)
    }

    /// End of simulation: release the connection. Always succeeds.
    pub fn on_end(&mut self) -> i32 {
        if self.phase == Phase::Ended {
            return STATUS_OK;
        }
        self.phase = Phase::Ended;
        if let Some(mut session) = self.session.take() {
            session.shutdown(&self.sim);
            self.last_close = session.close_reason().cloned();
        }
        debug!("end of simulation");
        STATUS_OK
    }

    /// Service callback: run another dispatch cycle.
    ///
    /// While an advance is outstanding this does nothing; only
    /// [`on_resume`](Self::on_resume) may answer it.
    pub fn on_service(&mut self) -> i32 {
        if self.session.is_none() {
            debug!(phase = ?self.phase, "service callback without a live session");
            return STATUS_OK;
        }
        self.pump(false)
    }

    /// Delay callback: answer the outstanding advance, then run a cycle.
    pub fn on_resume(&mut self) -> i32 {
        if self.session.is_none() {
            debug!(phase = ?self.phase, "resume callback without a live session");
            return STATUS_OK;
        }
        self.pump(true)
    }

    fn pump(&mut self, mut resume: bool) -> i32 {
        loop {
            let Some(session) = self.session.as_mut() else {
                return STATUS_OK;
            };
            let outcome = if resume {
                resume = false;
                session.resume(&mut self.sim)
            } else {
                session.cycle(&mut self.sim)
            };
            match outcome {
                CycleOutcome::Served => {
                    if self.config.dispatch_mode == DispatchMode::Single {
                        return STATUS_OK;
                    }
                }
                CycleOutcome::Yielded { ticks } => return self.schedule_resume(ticks),
                CycleOutcome::Suspended => return STATUS_OK,
                CycleOutcome::Closed(reason) => return self.end_session(reason),
            }
        }
    }

    fn schedule_resume(&mut self, ticks: u64) -> i32 {
        match self.registrar.register(Trigger::AfterDelay(ticks), EntryPoint::Resume) {
            Ok(()) => STATUS_OK,
            Err(err) => {
                self.report_fatal(&BridgeError::from(err));
                if let Some(session) = self.session.as_mut() {
                    session.shutdown(&self.sim);
                }
                self.session = None;
                self.sim.finish();
                STATUS_FATAL
            }
        }
    }

    fn end_session(&mut self, reason: CloseReason) -> i32 {
        self.session = None;
        let status = if reason.is_error() {
            self.report_fatal(&reason);
            STATUS_FATAL
        } else {
            self.console(&format!("session ended: {reason}"));
            STATUS_OK
        };
        // Nobody is left to drive the run.
        if reason != CloseReason::Finished {
            self.sim.finish();
        }
        self.last_close = Some(reason);
        status
    }

    fn console(&mut self, line: &str) {
        info!("{line}");
        if !self.config.quiet {
            let text = format!("{} {line}", self.config.log_prefix);
            self.sim.print(&text);
        }
    }

    fn report_fatal(&mut self, err: &dyn std::fmt::Display) {
        error!(error = %err, "bridge error");
        let text = format!("{} ERROR: {err}", self.config.log_prefix);
        self.sim.print(&text);
    }
}
