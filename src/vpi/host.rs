//! [`SimInterface`] and [`Scheduler`] over the simulator's VPI routines.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::ptr;

use tracing::{debug, trace};

use super::ffi::{
    self, cbAfterDelay, cbEndOfSimulation, cbStartOfSimulation, s_cb_data, s_vpi_systf_data, s_vpi_time,
    s_vpi_value, s_vpi_vlog_info, t_vpi_value_union, vpiBinStrVal, vpiFinish, vpiForceFlag, vpiHandle, vpiNoDelay,
    vpiReleaseFlag, vpiSimTime, vpiSysTask, PLI_BYTE8, PLI_INT32,
};
use crate::args::InvocationArgs;
use crate::error::{ApplyError, ConfigurationError};
use crate::protocol::SignalValue;
use crate::registrar::{CallbackRegistration, EntryPoint, Scheduler, Trigger};
use crate::sim::{ObjectRef, SimInterface, SimTime, WriteMode};

/// Simulation interface backed by the loading simulator.
///
/// Object handles are cached per path for the whole run.
#[derive(Debug, Default)]
pub struct VpiSim {
    handles: HashMap<String, ObjectRef>,
}

impl VpiSim {
    fn handle(obj: ObjectRef) -> vpiHandle {
        obj.0 as vpiHandle
    }

    fn put(obj: ObjectRef, path: &str, bits: &str, flags: PLI_INT32, operation: &'static str) -> Result<(), ApplyError> {
        let digits = CString::new(bits).map_err(|_| ApplyError::InvalidValue {
            path: path.to_string(),
            reason: "bit string contains a NUL byte".to_string(),
        })?;
        let mut value = s_vpi_value {
            format: vpiBinStrVal,
            value: t_vpi_value_union {
                str_: digits.as_ptr().cast_mut(),
            },
        };
        let mut delay = s_vpi_time {
            type_: vpiSimTime,
            high: 0,
            low: 0,
            real: 0.0,
        };
        // SAFETY: `value` and `digits` outlive the call; the handle came from
        // vpi_handle_by_name and is never freed.
        unsafe {
            ffi::vpi_put_value(Self::handle(obj), &mut value, &mut delay, flags);
        }
        check_error(path, operation)
    }
}

fn check_error(path: &str, operation: &'static str) -> Result<(), ApplyError> {
    // SAFETY: a null info pointer asks only for the severity level.
    let level = unsafe { ffi::vpi_chk_error(ptr::null_mut()) };
    if level == 0 {
        return Ok(());
    }
    Err(ApplyError::Rejected {
        operation,
        path: path.to_string(),
        reason: format!("simulator reported an error (level {level})"),
    })
}

fn bin_str(value: &s_vpi_value) -> Option<String> {
    if value.format != vpiBinStrVal {
        return None;
    }
    // SAFETY: the simulator filled `str_` for vpiBinStrVal.
    let raw = unsafe { value.value.str_ };
    if raw.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL terminated; copied before the next VPI call.
    Some(unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned())
}

impl SimInterface for VpiSim {
    fn invocation_args(&self) -> InvocationArgs {
        let mut info = s_vpi_vlog_info {
            argc: 0,
            argv: ptr::null_mut(),
            product: ptr::null_mut(),
            version: ptr::null_mut(),
        };
        // SAFETY: `info` is a valid out-parameter.
        if unsafe { ffi::vpi_get_vlog_info(&mut info) } == 0 || info.argv.is_null() {
            return InvocationArgs::default();
        }
        let argc = usize::try_from(info.argc).unwrap_or(0);
        (0..argc)
            .filter_map(|i| {
                // SAFETY: argv holds argc entries owned by the simulator.
                let arg = unsafe { *info.argv.add(i) };
                if arg.is_null() {
                    None
                } else {
                    // SAFETY: non-null C strings from the simulator.
                    Some(unsafe { CStr::from_ptr(arg) }.to_string_lossy().into_owned())
                }
            })
            .collect()
    }

    fn lookup(&mut self, path: &str) -> Result<ObjectRef, ApplyError> {
        if let Some(obj) = self.handles.get(path) {
            return Ok(*obj);
        }
        let unknown = || ApplyError::UnknownObject { path: path.to_string() };
        let name = CString::new(path).map_err(|_| unknown())?;
        // SAFETY: `name` is NUL terminated; a null scope searches from the top.
        let handle = unsafe { ffi::vpi_handle_by_name(name.as_ptr(), ptr::null_mut()) };
        if handle.is_null() {
            return Err(unknown());
        }
        let obj = ObjectRef(handle as usize);
        trace!(path, "object handle cached");
        self.handles.insert(path.to_string(), obj);
        Ok(obj)
    }

    fn read(&mut self, obj: ObjectRef, path: &str) -> Result<SignalValue, ApplyError> {
        let mut value = s_vpi_value {
            format: vpiBinStrVal,
            value: t_vpi_value_union { str_: ptr::null_mut() },
        };
        // SAFETY: `value` is a valid out-parameter for a live handle.
        unsafe { ffi::vpi_get_value(Self::handle(obj), &mut value) };
        check_error(path, "read")?;
        bin_str(&value).map(SignalValue::Bits).ok_or_else(|| ApplyError::Rejected {
            operation: "read",
            path: path.to_string(),
            reason: "object has no binary value".to_string(),
        })
    }

    fn write(&mut self, obj: ObjectRef, path: &str, value: &SignalValue, mode: WriteMode) -> Result<(), ApplyError> {
        let bits = value.to_bits(1);
        match mode {
            WriteMode::Deposit => Self::put(obj, path, &bits, vpiNoDelay, "write"),
            WriteMode::Force => Self::put(obj, path, &bits, vpiForceFlag, "force"),
        }
    }

    fn release(&mut self, obj: ObjectRef, path: &str) -> Result<SignalValue, ApplyError> {
        let mut value = s_vpi_value {
            format: vpiBinStrVal,
            value: t_vpi_value_union { str_: ptr::null_mut() },
        };
        // SAFETY: the release flag fills `value` with the settled value.
        unsafe {
            ffi::vpi_put_value(Self::handle(obj), &mut value, ptr::null_mut(), vpiReleaseFlag);
        }
        check_error(path, "release")?;
        match bin_str(&value) {
            Some(bits) => Ok(SignalValue::Bits(bits)),
            None => self.read(obj, path),
        }
    }

    fn time(&self) -> SimTime {
        let mut t = s_vpi_time {
            type_: vpiSimTime,
            high: 0,
            low: 0,
            real: 0.0,
        };
        // SAFETY: a null object asks for the current simulation time.
        unsafe { ffi::vpi_get_time(ptr::null_mut(), &mut t) };
        SimTime((u64::from(t.high) << 32) | u64::from(t.low))
    }

    fn print(&mut self, line: &str) {
        print_line(line);
    }

    fn finish(&mut self) {
        debug!("requesting simulator finish");
        // SAFETY: vpiFinish takes one diagnostic level argument.
        unsafe {
            ffi::vpi_control(vpiFinish, 1 as PLI_INT32);
        }
    }
}

/// Writes one line through `vpi_printf`.
pub(super) fn print_line(line: &str) {
    let text = CString::new(format!("{}\n", line.replace('\0', ""))).unwrap_or_default();
    // SAFETY: "%s" consumes exactly one NUL-terminated string.
    unsafe {
        ffi::vpi_printf(b"%s\0".as_ptr().cast(), text.as_ptr());
    }
}

/// Scheduler that registers callbacks with the simulator.
#[derive(Debug, Default)]
pub struct VpiScheduler;

impl Scheduler for VpiScheduler {
    fn register(&mut self, registration: &CallbackRegistration) -> Result<(), ConfigurationError> {
        let handle = match &registration.trigger {
            Trigger::StartOfSimulation => register_cb(cbStartOfSimulation, None, registration.entry),
            Trigger::EndOfSimulation => register_cb(cbEndOfSimulation, None, registration.entry),
            Trigger::AfterDelay(ticks) => register_cb(cbAfterDelay, Some(*ticks), registration.entry),
            Trigger::SystemTask(name) => register_systf(name),
        };
        if handle.is_null() {
            return Err(ConfigurationError::RegistrationRejected {
                trigger: registration.trigger.to_string(),
            });
        }
        if !matches!(registration.trigger, Trigger::SystemTask(_)) {
            // SAFETY: callback handles are only needed to cancel, which the bridge never does.
            unsafe { ffi::vpi_free_object(handle) };
        }
        Ok(())
    }
}

const fn entry_code(entry: EntryPoint) -> usize {
    match entry {
        EntryPoint::Startup => 1,
        EntryPoint::Shutdown => 2,
        EntryPoint::Service => 3,
        EntryPoint::Resume => 4,
    }
}

/// Recovers the entry point stashed in a callback's user data.
pub(super) const fn entry_from_code(code: usize) -> Option<EntryPoint> {
    match code {
        1 => Some(EntryPoint::Startup),
        2 => Some(EntryPoint::Shutdown),
        3 => Some(EntryPoint::Service),
        4 => Some(EntryPoint::Resume),
        _ => None,
    }
}

fn register_cb(reason: PLI_INT32, delay: Option<u64>, entry: EntryPoint) -> vpiHandle {
    let mut time = s_vpi_time {
        type_: vpiSimTime,
        high: 0,
        low: 0,
        real: 0.0,
    };
    if let Some(ticks) = delay {
        time.high = (ticks >> 32) as u32;
        time.low = (ticks & u64::from(u32::MAX)) as u32;
    }
    let mut data = s_cb_data {
        reason,
        cb_rtn: Some(super::on_callback),
        obj: ptr::null_mut(),
        time: if delay.is_some() { &mut time } else { ptr::null_mut() },
        value: ptr::null_mut(),
        index: 0,
        user_data: entry_code(entry) as *mut PLI_BYTE8,
    };
    // SAFETY: the simulator copies `data` and `time` during the call.
    unsafe { ffi::vpi_register_cb(&mut data) }
}

fn register_systf(name: &str) -> vpiHandle {
    let Ok(tfname) = CString::new(name) else {
        return ptr::null_mut();
    };
    let mut data = s_vpi_systf_data {
        type_: vpiSysTask,
        sysfunctype: 0,
        // Some simulators keep the name pointer; it lives for the process.
        tfname: tfname.into_raw(),
        calltf: Some(super::hdl_bridge_service),
        compiletf: None,
        sizetf: None,
        user_data: ptr::null_mut(),
    };
    // SAFETY: `data` is fully initialised and the name is never freed.
    unsafe { ffi::vpi_register_systf(&mut data) }
}
