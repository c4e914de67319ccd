/*
 *  rtflavor POSIX non-realtime flavor - Flavor Implementation
 *
 *  Task bookkeeping and timing on plain POSIX threads and clocks
 */

use std::cell::Cell;
use std::collections::BTreeMap;
use std::ffi::{c_int, c_long};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::ffi::*;

pub const POSIX_NONRT_ID: u32 = 2;
pub const POSIX_NONRT_WEIGHT: u32 = 10;
pub const POSIX_NONRT_MAGIC: u32 = 1;
pub const POSIX_NONRT_NAME: &str = "posix-nonrt";

/// Discovery stamp read by the loader's scanner
#[used]
#[cfg_attr(target_os = "linux", link_section = "rtapi-flavor")]
pub static FLAVOR_STAMP: FlavorStampSection = FlavorStampSection::new(
    POSIX_NONRT_ID,
    POSIX_NONRT_WEIGHT,
    POSIX_NONRT_MAGIC,
    0,
    POSIX_NONRT_NAME,
);

#[cfg(feature = "debug-logging")]
macro_rules! plugin_log {
    ($level:ident, $($arg:tt)+) => { log::$level!($($arg)+) };
}

#[cfg(not(feature = "debug-logging"))]
macro_rules! plugin_log {
    ($level:ident, $($arg:tt)+) => {
        if false {
            let _ = format!($($arg)+);
        }
    };
}

/// Macro to catch panics in FFI functions
macro_rules! catch_panic {
    ($fallback:expr, $code:block) => {
        match catch_unwind(AssertUnwindSafe(|| $code)) {
            Ok(result) => result,
            Err(panic_info) => {
                let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("Plugin panic: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("Plugin panic: {}", s)
                } else {
                    "Plugin panic: unknown error".to_string()
                };

                plugin_log!(error, "{}", message);
                $fallback
            }
        }
    };
}

// ============================================================================
// Task Bookkeeping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Created,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct Task {
    spec: FlavorTaskSpec,
    state: TaskState,
    next_release_ns: i64,
    cycles: u64,
    overruns: u64,
    faults: u64,
}

static TASKS: Mutex<BTreeMap<c_int, Task>> = Mutex::new(BTreeMap::new());
static STATS_UPDATES: AtomicU64 = AtomicU64::new(0);

thread_local! {
    // Task bound to the calling thread by task_start
    static CURRENT: Cell<c_int> = const { Cell::new(-1) };
}

fn tasks() -> MutexGuard<'static, BTreeMap<c_int, Task>> {
    TASKS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clock_ns(clock: libc::clockid_t) -> i64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: ts is a valid, writable timespec
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        return 0;
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

fn monotonic_ns() -> i64 {
    clock_ns(libc::CLOCK_MONOTONIC)
}

fn sleep_ns(nsec: i64) {
    if nsec > 0 {
        std::thread::sleep(Duration::from_nanos(nsec as u64));
    }
}

/// Apply `change` to task `id`; -EINVAL for an unknown task
fn with_task(id: c_int, change: impl FnOnce(&mut Task) -> c_int) -> c_int {
    match tasks().get_mut(&id) {
        Some(task) => change(task),
        None => -libc::EINVAL,
    }
}

// ============================================================================
// Runtime Business Hooks
// ============================================================================

extern "C" fn exception_handler(kind: c_int, detail: *const FlavorExceptionDetail, level: c_int) -> c_int {
    catch_panic!(-libc::EFAULT, {
        if detail.is_null() {
            return -libc::EINVAL;
        }

        let detail = unsafe { &*detail };
        plugin_log!(
            warn,
            "posix-nonrt exception kind {} level {} task {} code {}",
            kind, level, detail.task_id, detail.error_code
        );

        if let Some(task) = tasks().get_mut(&detail.task_id) {
            task.faults += 1;
        }
        0
    })
}

extern "C" fn task_update_stats() -> c_int {
    catch_panic!(-libc::EFAULT, {
        STATS_UPDATES.fetch_add(1, Ordering::Relaxed);
        0
    })
}

extern "C" fn task_print_thread_stats(task_id: c_int) {
    catch_panic!((), {
        if let Some(task) = tasks().get(&task_id) {
            eprintln!(
                "posix-nonrt task {}: state {:?} period {} ns cycles {} overruns {} faults {}",
                task_id, task.state, task.spec.period_ns, task.cycles, task.overruns, task.faults
            );
        }
    })
}

extern "C" fn task_new(spec: *const FlavorTaskSpec, task_id: c_int) -> c_int {
    catch_panic!(-libc::EFAULT, {
        if spec.is_null() || task_id < 0 {
            return -libc::EINVAL;
        }

        let spec = unsafe { *spec };
        if spec.period_ns < 0 {
            return -libc::EINVAL;
        }

        let mut table = tasks();
        if table.contains_key(&task_id) {
            return -libc::EBUSY;
        }

        table.insert(task_id, Task {
            spec,
            state: TaskState::Created,
            next_release_ns: 0,
            cycles: 0,
            overruns: 0,
            faults: 0,
        });
        plugin_log!(debug, "posix-nonrt task {} created (period {} ns)", task_id, spec.period_ns);
        task_id
    })
}

extern "C" fn task_delete(task_id: c_int) -> c_int {
    catch_panic!(-libc::EFAULT, {
        if tasks().remove(&task_id).is_none() {
            return -libc::EINVAL;
        }
        CURRENT.with(|current| {
            if current.get() == task_id {
                current.set(-1);
            }
        });
        0
    })
}

/// Starting a task binds it to the calling thread
extern "C" fn task_start(task_id: c_int) -> c_int {
    catch_panic!(-libc::EFAULT, {
        let rc = with_task(task_id, |task| match task.state {
            TaskState::Created | TaskState::Stopped => {
                task.state = TaskState::Running;
                task.next_release_ns = monotonic_ns() + task.spec.period_ns as i64;
                0
            }
            TaskState::Running | TaskState::Paused => -libc::EBUSY,
        });

        if rc == 0 {
            CURRENT.with(|current| current.set(task_id));
        }
        rc
    })
}

extern "C" fn task_stop(task_id: c_int) -> c_int {
    catch_panic!(-libc::EFAULT, {
        let rc = with_task(task_id, |task| match task.state {
            TaskState::Running | TaskState::Paused => {
                task.state = TaskState::Stopped;
                0
            }
            _ => -libc::EINVAL,
        });

        CURRENT.with(|current| {
            if rc == 0 && current.get() == task_id {
                current.set(-1);
            }
        });
        rc
    })
}

extern "C" fn task_pause(task_id: c_int) -> c_int {
    catch_panic!(-libc::EFAULT, {
        with_task(task_id, |task| match task.state {
            TaskState::Running => {
                task.state = TaskState::Paused;
                0
            }
            _ => -libc::EINVAL,
        })
    })
}

extern "C" fn task_resume(task_id: c_int) -> c_int {
    catch_panic!(-libc::EFAULT, {
        with_task(task_id, |task| match task.state {
            TaskState::Paused => {
                task.state = TaskState::Running;
                task.next_release_ns = monotonic_ns() + task.spec.period_ns as i64;
                0
            }
            _ => -libc::EINVAL,
        })
    })
}

/// Sleep until the next period of the task bound to this thread
extern "C" fn task_wait(_flags: c_int) -> c_int {
    catch_panic!(-libc::EFAULT, {
        let task_id = CURRENT.with(|current| current.get());
        if task_id < 0 {
            return -libc::EINVAL;
        }

        let now = monotonic_ns();
        let mut release = 0;
        let rc = with_task(task_id, |task| {
            let period = task.spec.period_ns as i64;
            if task.state != TaskState::Running || period <= 0 {
                return -libc::EINVAL;
            }

            release = task.next_release_ns;
            task.next_release_ns += period;
            if now > release {
                task.overruns += 1;
                while task.next_release_ns <= now {
                    task.next_release_ns += period;
                }
            }
            task.cycles += 1;
            0
        });

        if rc == 0 {
            sleep_ns(release - now);
        }
        rc
    })
}

extern "C" fn task_delay(nsec: c_long) {
    catch_panic!((), {
        sleep_ns(nsec as i64);
    })
}

extern "C" fn get_time() -> i64 {
    catch_panic!(0, { monotonic_ns() })
}

extern "C" fn get_clocks() -> i64 {
    catch_panic!(0, {
        #[cfg(target_os = "linux")]
        let clock = libc::CLOCK_MONOTONIC_RAW;
        #[cfg(not(target_os = "linux"))]
        let clock = libc::CLOCK_MONOTONIC;
        clock_ns(clock)
    })
}

extern "C" fn task_self() -> c_int {
    catch_panic!(-libc::EFAULT, {
        let task_id = CURRENT.with(|current| current.get());
        if task_id < 0 { -libc::EINVAL } else { task_id }
    })
}

/// Runtime business table; no PLL support on a non-realtime host
static BUSINESS: FlavorRuntimeBusiness = FlavorRuntimeBusiness {
    exception_handler_hook: Some(exception_handler),
    task_update_stats_hook: Some(task_update_stats),
    task_print_thread_stats_hook: Some(task_print_thread_stats),
    task_new_hook: Some(task_new),
    task_delete_hook: Some(task_delete),
    task_start_hook: Some(task_start),
    task_stop_hook: Some(task_stop),
    task_pause_hook: Some(task_pause),
    task_wait_hook: Some(task_wait),
    task_resume_hook: Some(task_resume),
    task_delay_hook: Some(task_delay),
    get_time_hook: Some(get_time),
    get_clocks_hook: Some(get_clocks),
    task_self_hook: Some(task_self),
    task_pll_get_reference_hook: None,
    task_pll_set_correction_hook: None,
};

// ============================================================================
// Hot Metadata Hooks
// ============================================================================

fn host_ref<'a>(host: *const FlavorHostApi) -> Option<&'a FlavorHostApi> {
    // SAFETY: the loader passes its own host table, valid for the call
    unsafe { host.as_ref() }
}

extern "C" fn module_init(host: *const FlavorHostApi) -> c_int {
    catch_panic!(-libc::EFAULT, {
        let Some(host) = host_ref(host) else { return -libc::EINVAL };

        tasks().clear();
        plugin_log!(info, "posix-nonrt armed");
        (host.arm_flavor)(host.context, &BUSINESS)
    })
}

extern "C" fn module_exit(host: *const FlavorHostApi) -> c_int {
    catch_panic!(-libc::EFAULT, {
        let Some(host) = host_ref(host) else { return -libc::EINVAL };

        tasks().clear();
        plugin_log!(info, "posix-nonrt disarmed");
        (host.yield_flavor)(host.context, &BUSINESS)
    })
}

static HOT: FlavorHotMetadata = FlavorHotMetadata {
    api_version: RTFLAVOR_API_VERSION,
    flavor_id: POSIX_NONRT_ID,
    module_init_hook: Some(module_init),
    module_exit_hook: Some(module_exit),
};

// ============================================================================
// Plugin Registration
// ============================================================================

/// Plugin entry point - publishes the hot metadata
#[no_mangle]
pub extern "C" fn rtflavor_plugin_register(host: *const FlavorHostApi) -> c_int {
    catch_panic!(-libc::EFAULT, {
        let Some(host) = host_ref(host) else { return -libc::EINVAL };

        if host.api_version != RTFLAVOR_API_VERSION {
            return -libc::ENOEXEC;
        }

        // Volatile read keeps the stamp section referenced from an exported symbol
        let stamped_id = unsafe { std::ptr::read_volatile(&FLAVOR_STAMP.id) };
        if stamped_id != HOT.flavor_id {
            return -libc::EINVAL;
        }

        (host.register_flavor)(host.context, &HOT)
    })
}

/// Plugin teardown - retracts the hot metadata
#[no_mangle]
pub extern "C" fn rtflavor_plugin_unregister(host: *const FlavorHostApi) {
    catch_panic!((), {
        if let Some(host) = host_ref(host) {
            (host.unregister_flavor)(host.context, &HOT);
        }
    })
}
