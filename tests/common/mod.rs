/*
 *  tests/common/mod.rs
 *
 *  Shared fixtures for the flavor integration tests: stamped ELF
 *  images on disk and in-process mock flavors
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 */

#![allow(dead_code)]

use std::ffi::{c_int, c_long};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tempfile::TempDir;

use rtflavor::flavor::ffi::*;
use rtflavor::flavor::{FlavorFlags, FlavorManager, FlavorName, FlavorStamp, StaticOpener};

// ============================================================================
// ELF fixtures
// ============================================================================

#[cfg(target_endian = "little")]
const NATIVE_DATA: u8 = 1;
#[cfg(target_endian = "big")]
const NATIVE_DATA: u8 = 2;

/// Minimal 64-bit ET_DYN image carrying one extra section
pub fn shared_object(section: &str, payload: &[u8]) -> Vec<u8> {
    let mut strtab = vec![0u8];
    let name_off = strtab.len() as u32;
    strtab.extend_from_slice(section.as_bytes());
    strtab.push(0);
    let strtab_name_off = strtab.len() as u32;
    strtab.extend_from_slice(b".shstrtab\0");

    let payload_off = 64usize;
    let strtab_off = payload_off + payload.len();
    let shoff = (strtab_off + strtab.len() + 7) & !7;

    let mut out = vec![0u8; shoff];
    out[..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    out[4] = 2;
    out[5] = NATIVE_DATA;
    out[6] = 1;
    out[16..18].copy_from_slice(&3u16.to_ne_bytes());
    out[20..24].copy_from_slice(&1u32.to_ne_bytes());
    out[40..48].copy_from_slice(&(shoff as u64).to_ne_bytes());
    out[52..54].copy_from_slice(&64u16.to_ne_bytes());
    out[58..60].copy_from_slice(&64u16.to_ne_bytes());
    out[60..62].copy_from_slice(&3u16.to_ne_bytes());
    out[62..64].copy_from_slice(&2u16.to_ne_bytes());
    out[payload_off..strtab_off].copy_from_slice(payload);
    out[strtab_off..strtab_off + strtab.len()].copy_from_slice(&strtab);

    for (name, kind, offset, size) in [
        (0u32, 0u32, 0usize, 0usize),
        (name_off, 1, payload_off, payload.len()),
        (strtab_name_off, 3, strtab_off, strtab.len()),
    ] {
        let mut sh = [0u8; 64];
        sh[0..4].copy_from_slice(&name.to_ne_bytes());
        sh[4..8].copy_from_slice(&kind.to_ne_bytes());
        sh[24..32].copy_from_slice(&(offset as u64).to_ne_bytes());
        sh[32..40].copy_from_slice(&(size as u64).to_ne_bytes());
        out.extend_from_slice(&sh);
    }
    out
}

pub fn stamp(name: &str, id: u32, weight: u32) -> FlavorStamp {
    FlavorStamp {
        api_version: RTFLAVOR_API_VERSION,
        weight,
        id,
        flags: FlavorFlags::empty(),
        magic: 0x5254_0000 | id,
        name: FlavorName::from(name).unwrap(),
    }
}

/// Write a stamped object into `dir` and return its canonical path
pub fn write_stamped(dir: &Path, file: &str, stamp: &FlavorStamp) -> PathBuf {
    write_section(dir, file, &stamp.to_bytes())
}

/// Write an object whose discovery section holds `payload` verbatim
pub fn write_section(dir: &Path, file: &str, payload: &[u8]) -> PathBuf {
    let path = dir.join(file);
    fs::write(&path, shared_object(RTFLAVOR_STAMP_SECTION, payload)).unwrap();
    fs::canonicalize(&path).unwrap()
}

// ============================================================================
// Mock flavors
// ============================================================================

/// Business hook invocations across every mock flavor
pub static CALLS: AtomicUsize = AtomicUsize::new(0);
pub static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);
pub static EXIT_CALLS: AtomicUsize = AtomicUsize::new(0);
pub static REGISTER_CALLS: AtomicUsize = AtomicUsize::new(0);
pub static UNREGISTER_CALLS: AtomicUsize = AtomicUsize::new(0);

pub const MOCK_TIME_NS: i64 = 1_000_000;

fn bump() {
    CALLS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn exception_handler(_kind: c_int, _detail: *const FlavorExceptionDetail, _level: c_int) -> c_int {
    bump();
    0
}
extern "C" fn task_update_stats() -> c_int {
    bump();
    0
}
extern "C" fn task_print_thread_stats(_task_id: c_int) {
    bump();
}
extern "C" fn task_new(_task: *const FlavorTaskSpec, task_id: c_int) -> c_int {
    bump();
    task_id
}
extern "C" fn task_op(_task_id: c_int) -> c_int {
    bump();
    0
}
extern "C" fn task_wait(_flags: c_int) -> c_int {
    bump();
    0
}
extern "C" fn task_delay(_nsec: c_long) {
    bump();
}
extern "C" fn get_time() -> i64 {
    bump();
    MOCK_TIME_NS
}
extern "C" fn task_self() -> c_int {
    bump();
    0
}

pub static FULL_BUSINESS: FlavorRuntimeBusiness = FlavorRuntimeBusiness {
    exception_handler_hook: Some(exception_handler),
    task_update_stats_hook: Some(task_update_stats),
    task_print_thread_stats_hook: Some(task_print_thread_stats),
    task_new_hook: Some(task_new),
    task_delete_hook: Some(task_op),
    task_start_hook: Some(task_op),
    task_stop_hook: Some(task_op),
    task_pause_hook: Some(task_op),
    task_wait_hook: Some(task_wait),
    task_resume_hook: Some(task_op),
    task_delay_hook: Some(task_delay),
    get_time_hook: Some(get_time),
    get_clocks_hook: Some(get_time),
    task_self_hook: Some(task_self),
    task_pll_get_reference_hook: None,
    task_pll_set_correction_hook: None,
};

/// Table the next module_init_hook arms; `None` arms nothing
static NEXT_BUSINESS: Mutex<Option<&'static FlavorRuntimeBusiness>> = Mutex::new(Some(&FULL_BUSINESS));
static ARMED: Mutex<Option<&'static FlavorRuntimeBusiness>> = Mutex::new(None);

/// Reset every counter and restore the full business table
pub fn reset() {
    for counter in [&CALLS, &INIT_CALLS, &EXIT_CALLS, &REGISTER_CALLS, &UNREGISTER_CALLS] {
        counter.store(0, Ordering::SeqCst);
    }
    *NEXT_BUSINESS.lock().unwrap() = Some(&FULL_BUSINESS);
    *ARMED.lock().unwrap() = None;
}

/// Arm `table` on the next module_init_hook
pub fn arm_with(table: Option<FlavorRuntimeBusiness>) {
    *NEXT_BUSINESS.lock().unwrap() = table.map(|t| -> &'static FlavorRuntimeBusiness { Box::leak(Box::new(t)) });
}

/// Copy of the full table with one hook knocked out
pub fn business_without(hook: &str) -> FlavorRuntimeBusiness {
    let mut table = FULL_BUSINESS;
    match hook {
        "exception_handler" => table.exception_handler_hook = None,
        "task_update_stats" => table.task_update_stats_hook = None,
        "task_print_thread_stats" => table.task_print_thread_stats_hook = None,
        "task_new" => table.task_new_hook = None,
        "task_delete" => table.task_delete_hook = None,
        "task_start" => table.task_start_hook = None,
        "task_stop" => table.task_stop_hook = None,
        "task_pause" => table.task_pause_hook = None,
        "task_wait" => table.task_wait_hook = None,
        "task_resume" => table.task_resume_hook = None,
        "task_delay" => table.task_delay_hook = None,
        "get_time" => table.get_time_hook = None,
        "get_clocks" => table.get_clocks_hook = None,
        "task_self" => table.task_self_hook = None,
        other => panic!("unknown hook {}", other),
    }
    table
}

pub const REQUIRED_HOOKS: [&str; 14] = [
    "exception_handler",
    "task_update_stats",
    "task_print_thread_stats",
    "task_new",
    "task_delete",
    "task_start",
    "task_stop",
    "task_pause",
    "task_wait",
    "task_resume",
    "task_delay",
    "get_time",
    "get_clocks",
    "task_self",
];

pub extern "C" fn module_init(host: *const FlavorHostApi) -> c_int {
    INIT_CALLS.fetch_add(1, Ordering::SeqCst);
    let host = unsafe { &*host };
    let next = *NEXT_BUSINESS.lock().unwrap();
    match next {
        Some(table) => {
            *ARMED.lock().unwrap() = Some(table);
            host.arm(table)
        }
        None => 0,
    }
}

pub extern "C" fn module_exit(host: *const FlavorHostApi) -> c_int {
    EXIT_CALLS.fetch_add(1, Ordering::SeqCst);
    let host = unsafe { &*host };
    match ARMED.lock().unwrap().take() {
        Some(table) => host.yield_business(table),
        None => 0,
    }
}

/// Mock flavor module `$module` publishing hot metadata for `$id`
macro_rules! mock_flavor {
    ($module:ident, $id:expr) => {
        mock_flavor!($module, $id, Some(module_init), Some(module_exit));
    };
    ($module:ident, $id:expr, $init:expr, $exit:expr) => {
        pub mod $module {
            use super::*;

            pub static HOT: FlavorHotMetadata = FlavorHotMetadata {
                api_version: RTFLAVOR_API_VERSION,
                flavor_id: $id,
                module_init_hook: $init,
                module_exit_hook: $exit,
            };

            pub extern "C" fn register(host: *const FlavorHostApi) -> c_int {
                REGISTER_CALLS.fetch_add(1, Ordering::SeqCst);
                let host = unsafe { &*host };
                host.register(&HOT)
            }

            pub extern "C" fn unregister(host: *const FlavorHostApi) {
                UNREGISTER_CALLS.fetch_add(1, Ordering::SeqCst);
                let host = unsafe { &*host };
                host.unregister(&HOT);
            }
        }
    };
}

mock_flavor!(flavor1, 1);
mock_flavor!(flavor2, 2);
mock_flavor!(flavor3, 3);
mock_flavor!(no_init, 4, None, Some(module_exit));
mock_flavor!(no_exit, 5, Some(module_init), None);

/// Loads but refuses to run on this host
pub extern "C" fn refusing_register(_host: *const FlavorHostApi) -> c_int {
    REGISTER_CALLS.fetch_add(1, Ordering::SeqCst);
    -libc::ENODEV
}

/// Loads and reports success without publishing anything
pub extern "C" fn silent_register(_host: *const FlavorHostApi) -> c_int {
    REGISTER_CALLS.fetch_add(1, Ordering::SeqCst);
    0
}

// ============================================================================
// Manager fixture
// ============================================================================

pub type Entry = (FlavorStamp, PluginRegisterFn, Option<PluginUnregisterFn>);

pub fn entry(stamp: FlavorStamp, register: PluginRegisterFn, unregister: Option<PluginUnregisterFn>) -> Entry {
    (stamp, register, unregister)
}

/// Manager over a scratch library directory holding one object per entry
pub struct Fixture {
    pub dir: TempDir,
    pub manager: FlavorManager,
}

pub fn fixture(flavors: Vec<Entry>) -> Fixture {
    reset();
    let dir = tempfile::tempdir().unwrap();
    let mut opener = StaticOpener::new();

    for (stamp, register, unregister) in flavors {
        let file = format!("lib{}.so", stamp.name);
        let path = write_stamped(dir.path(), &file, &stamp);
        opener = opener.with(path, register, unregister);
    }

    let manager = FlavorManager::new(dir.path(), Box::new(opener));
    Fixture { dir, manager }
}
