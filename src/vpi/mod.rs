//! Binding to an IEEE 1364 simulator through VPI.
//!
//! Built with the `vpi` feature as a shared library the simulator loads.
//! The simulator calls [`vlog_startup_routines`] at load time (or, under the
//! `vcs` feature, the testbench calls `$hdl_bridge_vcs_init`), which builds
//! the process-global [`Bridge`] and registers its callbacks. Every callback
//! afterwards is routed back into that bridge.
//!
//! All callbacks arrive on the simulator's thread. The global lock is only
//! ever taken with `try_lock`, so a re-entrant callback is skipped instead of
//! deadlocking the simulator.

mod ffi;
mod host;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, TryLockError};

use tracing::warn;

pub use host::{VpiScheduler, VpiSim};

use crate::bridge::{Bridge, STATUS_FATAL, STATUS_OK};
use crate::config::LOG_PREFIX;
use ffi::{s_cb_data, PLI_BYTE8, PLI_INT32};

static BRIDGE: Mutex<Option<Bridge<VpiSim>>> = Mutex::new(None);

fn with_bridge(f: impl FnOnce(&mut Bridge<VpiSim>) -> i32) -> PLI_INT32 {
    let mut guard = match BRIDGE.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => {
            warn!("bridge busy; re-entrant callback skipped");
            return STATUS_OK;
        }
    };
    let Some(bridge) = guard.as_mut() else {
        return STATUS_OK;
    };
    // A panic must not unwind into the simulator.
    panic::catch_unwind(AssertUnwindSafe(|| f(bridge))).unwrap_or_else(|_| {
        host::print_line(&format!("{LOG_PREFIX} ERROR: internal panic in bridge callback"));
        STATUS_FATAL
    })
}

/// Builds the global bridge. Returns false if it could not be configured.
fn install() -> bool {
    let bridge = match Bridge::new(VpiSim::default(), Box::new(VpiScheduler)) {
        Ok(bridge) => bridge,
        Err(err) => {
            host::print_line(&format!("{LOG_PREFIX} ERROR: {err}"));
            return false;
        }
    };
    match BRIDGE.try_lock() {
        Ok(mut guard) => {
            if guard.is_some() {
                warn!("bridge already installed");
                return false;
            }
            *guard = Some(bridge);
            true
        }
        Err(TryLockError::Poisoned(poisoned)) => {
            *poisoned.into_inner() = Some(bridge);
            true
        }
        Err(TryLockError::WouldBlock) => false,
    }
}

fn init() {
    if install() {
        with_bridge(|bridge| match bridge.register_callbacks() {
            Ok(()) => STATUS_OK,
            Err(err) => {
                host::print_line(&format!("{LOG_PREFIX} ERROR: {err}"));
                STATUS_FATAL
            }
        });
    }
}

#[cfg(not(feature = "vcs"))]
extern "C" fn startup_routine() {
    init();
}

unsafe extern "C" fn on_callback(data: *mut s_cb_data) -> PLI_INT32 {
    if data.is_null() {
        return STATUS_OK;
    }
    // SAFETY: the simulator passes back the cb_data it was registered with.
    let code = unsafe { (*data).user_data } as usize;
    match host::entry_from_code(code) {
        Some(entry) => with_bridge(|bridge| bridge.invoke(entry)),
        None => {
            warn!(code, "callback with unknown entry code");
            STATUS_OK
        }
    }
}

/// Load-time table the simulator walks when it loads the library.
#[cfg(not(feature = "vcs"))]
#[no_mangle]
#[used]
#[allow(non_upper_case_globals)]
pub static vlog_startup_routines: [Option<extern "C" fn()>; 2] = [Some(startup_routine), None];

/// Manual initialisation for simulators that take an init function by name.
///
/// # Safety
/// Called by the simulator; the argument is ignored.
#[no_mangle]
pub unsafe extern "C" fn hdl_bridge_init(_data: *mut s_cb_data) -> PLI_INT32 {
    host::print_line(&format!("{LOG_PREFIX} initialized"));
    init();
    STATUS_OK
}

/// Same as [`hdl_bridge_init`], under the name some legacy simulators expect.
///
/// # Safety
/// Called by the simulator; the argument is ignored.
#[no_mangle]
pub unsafe extern "C" fn bootstrap(data: *mut s_cb_data) -> PLI_INT32 {
    // SAFETY: forwarded unchanged.
    unsafe { hdl_bridge_init(data) }
}

/// Calltf for the service system task.
///
/// Registered automatically as `$hdl_bridge_service`; hosts that declare
/// system tasks in a table file point the task at this symbol.
///
/// # Safety
/// Called by the simulator; the argument is ignored.
#[no_mangle]
pub unsafe extern "C" fn hdl_bridge_service(_user_data: *mut PLI_BYTE8) -> PLI_INT32 {
    with_bridge(Bridge::on_service)
}

/// Calltf for `$hdl_bridge_vcs_init`, for hosts that reject a second
/// startup routine table.
///
/// Registers the end callback and runs the start entry point inline.
///
/// # Safety
/// Called by the simulator; the argument is ignored.
#[cfg(feature = "vcs")]
#[no_mangle]
pub unsafe extern "C" fn hdl_bridge_vcs_init(_user_data: *mut PLI_BYTE8) -> PLI_INT32 {
    if !install() {
        return STATUS_FATAL;
    }
    with_bridge(Bridge::bootstrap_inline)
}
