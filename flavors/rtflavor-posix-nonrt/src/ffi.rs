/*
 *  rtflavor POSIX non-realtime flavor - FFI Types
 *
 *  C ABI types matching the rtflavor plugin interface
 *  These types must match exactly with the host's FFI types
 */

use std::ffi::{c_int, c_long, c_void};

/// Flavor plugin API version
pub const RTFLAVOR_API_VERSION: u32 = 1;

/// Maximum length of a flavor name, excluding the terminating NUL
pub const RTFLAVOR_MAX_NAME_LEN: usize = 20;

/// Layout of the `rtapi-flavor` discovery section
#[repr(C)]
pub struct FlavorStampSection {
    pub api_version: u32,
    pub weight: u32,
    pub id: u32,
    pub flags: u32,
    pub magic: u32,
    pub name: [u8; RTFLAVOR_MAX_NAME_LEN + 1],
}

/// Stamp flag bits
pub const FLAVOR_DOES_IO: u32 = 1 << 0;
pub const FLAVOR_IS_RT: u32 = 1 << 1;
pub const FLAVOR_TIME_NO_CLOCK_MONOTONIC: u32 = 1 << 2;
pub const FLAVOR_NOT_RTAPI: u32 = 1 << 3;

impl FlavorStampSection {
    /// Build a stamp at compile time; the name is truncated to fit
    pub const fn new(id: u32, weight: u32, magic: u32, flags: u32, name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut buf = [0u8; RTFLAVOR_MAX_NAME_LEN + 1];
        let mut i = 0;
        while i < bytes.len() && i < RTFLAVOR_MAX_NAME_LEN {
            buf[i] = bytes[i];
            i += 1;
        }

        Self {
            api_version: RTFLAVOR_API_VERSION,
            weight,
            id,
            flags,
            magic,
            name: buf,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FlavorTaskSpec {
    pub period_ns: c_long,
    pub priority: c_int,
    pub cpu: c_int,
    pub stack_size: usize,
    pub uses_fp: bool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FlavorExceptionDetail {
    pub task_id: c_int,
    pub error_code: c_int,
    pub timestamp_ns: i64,
}

pub type ModuleInitHook = extern "C" fn(host: *const FlavorHostApi) -> c_int;
pub type ModuleExitHook = extern "C" fn(host: *const FlavorHostApi) -> c_int;

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

#[repr(C)]
pub struct FlavorHotMetadata {
    pub api_version: u32,
    pub flavor_id: u32,
    pub module_init_hook: Option<ModuleInitHook>,
    pub module_exit_hook: Option<ModuleExitHook>,
}

#[repr(C)]
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

pub type RegisterFlavorFn =
    extern "C" fn(context: *mut c_void, hot: *const FlavorHotMetadata) -> c_int;
pub type UnregisterFlavorFn =
    extern "C" fn(context: *mut c_void, hot: *const FlavorHotMetadata) -> c_int;
pub type ArmFlavorFn =
    extern "C" fn(context: *mut c_void, business: *const FlavorRuntimeBusiness) -> c_int;
pub type YieldFlavorFn =
    extern "C" fn(context: *mut c_void, business: *const FlavorRuntimeBusiness) -> c_int;

/// Host side of the contract, handed to every entry point and hot hook
#[repr(C)]
pub struct FlavorHostApi {
    pub api_version: u32,
    pub context: *mut c_void,
    pub register_flavor: RegisterFlavorFn,
    pub unregister_flavor: UnregisterFlavorFn,
    pub arm_flavor: ArmFlavorFn,
    pub yield_flavor: YieldFlavorFn,
}
