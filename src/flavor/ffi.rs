/*
 *  flavor/ffi.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  C ABI types for the flavor plugin interface
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! FFI types for the rtflavor plugin system
//!
//! This module defines the C-compatible types that form the stable ABI
//! between the loader and flavor plugins. All types use `#[repr(C)]`
//! so a plugin built by any toolchain sees the same layout.
//!
//! Every hook is an `Option<extern "C" fn>`: a plugin may hand over a
//! table with null entries, and it is the loader's job to refuse such a
//! table before any of its hooks become callable.

use std::ffi::{c_int, c_long, c_void};

/// Flavor plugin API version understood by this loader
pub const RTFLAVOR_API_VERSION: u32 = 1;

/// Name of the ELF section carrying the discovery stamp
pub const RTFLAVOR_STAMP_SECTION: &str = "rtapi-flavor";

/// Maximum length of a flavor name, excluding the terminating NUL
pub const RTFLAVOR_MAX_NAME_LEN: usize = 20;

/// Size of the fixed part of the stamp (five u32 fields)
pub const RTFLAVOR_STAMP_HEADER_SIZE: usize = 20;

/// Symbol every flavor plugin must export
pub const RTFLAVOR_REGISTER_SYMBOL: &[u8] = b"rtflavor_plugin_register\0";

/// Optional teardown symbol, called right before the object is unloaded
pub const RTFLAVOR_UNREGISTER_SYMBOL: &[u8] = b"rtflavor_plugin_unregister\0";

/// Task parameters handed to `task_new_hook`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlavorTaskSpec {
    /// Task period in nanoseconds (0 for a non-periodic task)
    pub period_ns: c_long,

    /// Scheduling priority
    pub priority: c_int,

    /// CPU to pin the task to, or -1 for no affinity
    pub cpu: c_int,

    /// Requested stack size in bytes (0 = backend default)
    pub stack_size: usize,

    /// Whether the task uses floating point
    pub uses_fp: bool,
}

/// Detail block passed to `exception_handler_hook`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlavorExceptionDetail {
    /// Task that raised the exception, or -1 if unknown
    pub task_id: c_int,

    /// Backend specific error code
    pub error_code: c_int,

    /// Timestamp of the exception in nanoseconds
    pub timestamp_ns: i64,
}

// Hot metadata hooks
pub type ModuleInitHook = extern "C" fn(host: *const FlavorHostApi) -> c_int;
pub type ModuleExitHook = extern "C" fn(host: *const FlavorHostApi) -> c_int;

// Runtime business logic hooks
pub type ExceptionHandlerHook =
    extern "C" fn(kind: c_int, detail: *const FlavorExceptionDetail, level: c_int) -> c_int;
pub type TaskUpdateStatsHook = extern "C" fn() -> c_int;
pub type TaskPrintThreadStatsHook = extern "C" fn(task_id: c_int);
pub type TaskNewHook = extern "C" fn(task: *const FlavorTaskSpec, task_id: c_int) -> c_int;
pub type TaskIdHook = extern "C" fn(task_id: c_int) -> c_int;
pub type TaskWaitHook = extern "C" fn(flags: c_int) -> c_int;
pub type TaskDelayHook = extern "C" fn(nsec: c_long);
pub type ClockHook = extern "C" fn() -> i64;
pub type TaskSelfHook = extern "C" fn() -> c_int;
pub type PllGetReferenceHook = extern "C" fn() -> i64;
pub type PllSetCorrectionHook = extern "C" fn(value: c_long) -> c_int;

/// Hot metadata: module lifecycle entry points, published at load time
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FlavorHotMetadata {
    /// Must equal [`RTFLAVOR_API_VERSION`]
    pub api_version: u32,

    /// Must equal the id stamped in the discovery section
    pub flavor_id: u32,

    pub module_init_hook: Option<ModuleInitHook>,
    pub module_exit_hook: Option<ModuleExitHook>,
}

/// Runtime business logic: the full task/time/exception dispatch table,
/// published by the plugin from inside its `module_init_hook`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FlavorRuntimeBusiness {
    pub exception_handler_hook: Option<ExceptionHandlerHook>,
    pub task_update_stats_hook: Option<TaskUpdateStatsHook>,
    pub task_print_thread_stats_hook: Option<TaskPrintThreadStatsHook>,
    pub task_new_hook: Option<TaskNewHook>,
    pub task_delete_hook: Option<TaskIdHook>,
    pub task_start_hook: Option<TaskIdHook>,
    pub task_stop_hook: Option<TaskIdHook>,
    pub task_pause_hook: Option<TaskIdHook>,
    pub task_wait_hook: Option<TaskWaitHook>,
    pub task_resume_hook: Option<TaskIdHook>,
    pub task_delay_hook: Option<TaskDelayHook>,
    pub get_time_hook: Option<ClockHook>,
    pub get_clocks_hook: Option<ClockHook>,
    pub task_self_hook: Option<TaskSelfHook>,
    pub task_pll_get_reference_hook: Option<PllGetReferenceHook>,
    pub task_pll_set_correction_hook: Option<PllSetCorrectionHook>,
}

// Loader callbacks handed to the plugin
pub type RegisterFlavorFn =
    extern "C" fn(context: *mut c_void, hot: *const FlavorHotMetadata) -> c_int;
pub type UnregisterFlavorFn =
    extern "C" fn(context: *mut c_void, hot: *const FlavorHotMetadata) -> c_int;
pub type ArmFlavorFn =
    extern "C" fn(context: *mut c_void, business: *const FlavorRuntimeBusiness) -> c_int;
pub type YieldFlavorFn =
    extern "C" fn(context: *mut c_void, business: *const FlavorRuntimeBusiness) -> c_int;

/// The loader side of the contract
///
/// A plugin receives a pointer to this table in its entry points and in
/// both hot metadata hooks. `context` is opaque to the plugin and must be
/// passed back unchanged.
#[repr(C)]
pub struct FlavorHostApi {
    pub api_version: u32,
    pub context: *mut c_void,
    pub register_flavor: RegisterFlavorFn,
    pub unregister_flavor: UnregisterFlavorFn,
    pub arm_flavor: ArmFlavorFn,
    pub yield_flavor: YieldFlavorFn,
}

impl FlavorHostApi {
    /// Publish hot metadata (plugin load time)
    pub fn register(&self, hot: &FlavorHotMetadata) -> c_int {
        (self.register_flavor)(self.context, hot)
    }

    /// Retract hot metadata (plugin unload time)
    pub fn unregister(&self, hot: &FlavorHotMetadata) -> c_int {
        (self.unregister_flavor)(self.context, hot)
    }

    /// Publish the runtime business table (from `module_init_hook`)
    pub fn arm(&self, business: &FlavorRuntimeBusiness) -> c_int {
        (self.arm_flavor)(self.context, business)
    }

    /// Retract the runtime business table (from `module_exit_hook`)
    pub fn yield_business(&self, business: &FlavorRuntimeBusiness) -> c_int {
        (self.yield_flavor)(self.context, business)
    }
}

// SAFETY: `context` points at the loader's registration cell, which is
// itself Sync; the function pointers are plain code addresses.
unsafe impl Send for FlavorHostApi {}
unsafe impl Sync for FlavorHostApi {}

/// Plugin entry point, resolved as [`RTFLAVOR_REGISTER_SYMBOL`]
///
/// Each plugin must export a function with this signature:
/// ```c
/// #[no_mangle]
/// pub extern "C" fn rtflavor_plugin_register(host: *const FlavorHostApi) -> c_int
/// ```
/// and call `host.register_flavor` from it.
pub type PluginRegisterFn = extern "C" fn(host: *const FlavorHostApi) -> c_int;

/// Plugin teardown entry point, resolved as [`RTFLAVOR_UNREGISTER_SYMBOL`]
pub type PluginUnregisterFn = extern "C" fn(host: *const FlavorHostApi);
