//! Raw declarations for the subset of `vpi_user.h` the bridge uses.
//!
//! Layouts follow IEEE 1364-2005 §27. The symbols are provided by the
//! simulator that loads the plugin, so nothing is linked at build time.

#![allow(non_camel_case_types, non_upper_case_globals, dead_code)]

use libc::{c_char, c_double, c_int, c_uint, c_void};

pub type PLI_INT32 = c_int;
pub type PLI_UINT32 = c_uint;
pub type PLI_BYTE8 = c_char;
pub type vpiHandle = *mut c_void;

// Callback reasons.
pub const cbReadWriteSynch: PLI_INT32 = 6;
pub const cbAfterDelay: PLI_INT32 = 9;
pub const cbStartOfSimulation: PLI_INT32 = 11;
pub const cbEndOfSimulation: PLI_INT32 = 12;

// Time types.
pub const vpiScaledRealTime: PLI_INT32 = 1;
pub const vpiSimTime: PLI_INT32 = 2;

// Value formats.
pub const vpiBinStrVal: PLI_INT32 = 1;
pub const vpiIntVal: PLI_INT32 = 6;

// vpi_put_value flags.
pub const vpiNoDelay: PLI_INT32 = 1;
pub const vpiForceFlag: PLI_INT32 = 5;
pub const vpiReleaseFlag: PLI_INT32 = 6;

// System task types.
pub const vpiSysTask: PLI_INT32 = 1;

// vpi_control operations.
pub const vpiStop: PLI_INT32 = 66;
pub const vpiFinish: PLI_INT32 = 67;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct s_vpi_time {
    pub type_: PLI_INT32,
    pub high: PLI_UINT32,
    pub low: PLI_UINT32,
    pub real: c_double,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union t_vpi_value_union {
    pub str_: *mut PLI_BYTE8,
    pub scalar: PLI_INT32,
    pub integer: PLI_INT32,
    pub real: c_double,
    pub time: *mut s_vpi_time,
    pub vector: *mut c_void,
    pub strength: *mut c_void,
    pub misc: *mut PLI_BYTE8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct s_vpi_value {
    pub format: PLI_INT32,
    pub value: t_vpi_value_union,
}

#[repr(C)]
pub struct s_cb_data {
    pub reason: PLI_INT32,
    pub cb_rtn: Option<unsafe extern "C" fn(*mut s_cb_data) -> PLI_INT32>,
    pub obj: vpiHandle,
    pub time: *mut s_vpi_time,
    pub value: *mut s_vpi_value,
    pub index: PLI_INT32,
    pub user_data: *mut PLI_BYTE8,
}

#[repr(C)]
pub struct s_vpi_vlog_info {
    pub argc: PLI_INT32,
    pub argv: *mut *mut PLI_BYTE8,
    pub product: *mut PLI_BYTE8,
    pub version: *mut PLI_BYTE8,
}

#[repr(C)]
pub struct s_vpi_systf_data {
    pub type_: PLI_INT32,
    pub sysfunctype: PLI_INT32,
    pub tfname: *mut PLI_BYTE8,
    pub calltf: Option<unsafe extern "C" fn(*mut PLI_BYTE8) -> PLI_INT32>,
    pub compiletf: Option<unsafe extern "C" fn(*mut PLI_BYTE8) -> PLI_INT32>,
    pub sizetf: Option<unsafe extern "C" fn(*mut PLI_BYTE8) -> PLI_INT32>,
    pub user_data: *mut PLI_BYTE8,
}

extern "C" {
    pub fn vpi_register_cb(cb_data_p: *mut s_cb_data) -> vpiHandle;
    pub fn vpi_register_systf(systf_data_p: *mut s_vpi_systf_data) -> vpiHandle;
    pub fn vpi_free_object(object: vpiHandle) -> PLI_INT32;
    pub fn vpi_get_vlog_info(vlog_info_p: *mut s_vpi_vlog_info) -> PLI_INT32;
    pub fn vpi_printf(format: *const PLI_BYTE8, ...) -> PLI_INT32;
    pub fn vpi_handle_by_name(name: *const PLI_BYTE8, scope: vpiHandle) -> vpiHandle;
    pub fn vpi_get_value(expr: vpiHandle, value_p: *mut s_vpi_value);
    pub fn vpi_put_value(
        object: vpiHandle,
        value_p: *mut s_vpi_value,
        time_p: *mut s_vpi_time,
        flags: PLI_INT32,
    ) -> vpiHandle;
    pub fn vpi_get_time(object: vpiHandle, time_p: *mut s_vpi_time);
    pub fn vpi_control(operation: PLI_INT32, ...) -> PLI_INT32;
    pub fn vpi_chk_error(error_info_p: *mut c_void) -> PLI_INT32;
}
