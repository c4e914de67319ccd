/*
 *  flavor/contract.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Hook contract validation for hot metadata and runtime business tables
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

//! A table that passes validation is converted into a struct of plain
//! (non-optional) function pointers, so nothing downstream ever has to
//! ask whether a required hook is present. Only the two PLL hooks stay
//! optional.

use log::error;

use super::descriptor::ModuleDescriptor;
use super::error::FlavorError;
use super::ffi::*;

/// Validated hot metadata
#[derive(Debug, Clone, Copy)]
pub struct HotHooks {
    pub module_init: ModuleInitHook,
    pub module_exit: ModuleExitHook,
}

/// Validated runtime business logic
#[derive(Debug, Clone, Copy)]
pub struct BusinessHooks {
    pub exception_handler: ExceptionHandlerHook,
    pub task_update_stats: TaskUpdateStatsHook,
    pub task_print_thread_stats: TaskPrintThreadStatsHook,
    pub task_new: TaskNewHook,
    pub task_delete: TaskIdHook,
    pub task_start: TaskIdHook,
    pub task_stop: TaskIdHook,
    pub task_pause: TaskIdHook,
    pub task_wait: TaskWaitHook,
    pub task_resume: TaskIdHook,
    pub task_delay: TaskDelayHook,
    pub get_time: ClockHook,
    pub get_clocks: ClockHook,
    pub task_self: TaskSelfHook,
    pub pll_get_reference: Option<PllGetReferenceHook>,
    pub pll_set_correction: Option<PllSetCorrectionHook>,
}

fn report_null(flavor: &ModuleDescriptor, hook: &str) {
    error!(
        "Flavor '{}' defined in '{}' exports NULL {}. This is extremely bad.",
        flavor.name,
        flavor.path.display(),
        hook
    );
}

fn violation(flavor: &ModuleDescriptor, reason: String) -> FlavorError {
    FlavorError::ContractViolation {
        flavor: flavor.name.to_string(),
        reason,
    }
}

/// Check the hot metadata a plugin published while loading
pub fn validate_hot(flavor: &ModuleDescriptor, hot: &FlavorHotMetadata) -> Result<HotHooks, FlavorError> {
    if hot.api_version != RTFLAVOR_API_VERSION {
        return Err(violation(
            flavor,
            format!("registered api_version {} (expected {})", hot.api_version, RTFLAVOR_API_VERSION),
        ));
    }

    if hot.flavor_id != flavor.id {
        return Err(violation(
            flavor,
            format!("registered flavor id {} but the stamp on disk says {}", hot.flavor_id, flavor.id),
        ));
    }

    match (hot.module_init_hook, hot.module_exit_hook) {
        (Some(module_init), Some(module_exit)) => Ok(HotHooks { module_init, module_exit }),
        (init, exit) => {
            let mut missing = Vec::new();
            if init.is_none() {
                missing.push("module_init_hook");
            }
            if exit.is_none() {
                missing.push("module_exit_hook");
            }
            for hook in &missing {
                report_null(flavor, hook);
            }
            Err(violation(flavor, format!("missing {}", missing.join(", "))))
        }
    }
}

/// Check a runtime business table before it becomes callable
///
/// Every missing hook is reported, not just the first.
pub fn validate_business(
    flavor: &ModuleDescriptor,
    table: &FlavorRuntimeBusiness,
) -> Result<BusinessHooks, FlavorError> {
    let mut missing: Vec<&'static str> = Vec::new();

    macro_rules! require {
        ($field:ident) => {
            match table.$field {
                Some(hook) => Some(hook),
                None => {
                    report_null(flavor, stringify!($field));
                    missing.push(stringify!($field));
                    None
                }
            }
        };
    }

    let exception_handler = require!(exception_handler_hook);
    let task_update_stats = require!(task_update_stats_hook);
    let task_print_thread_stats = require!(task_print_thread_stats_hook);
    let task_new = require!(task_new_hook);
    let task_delete = require!(task_delete_hook);
    let task_start = require!(task_start_hook);
    let task_stop = require!(task_stop_hook);
    let task_pause = require!(task_pause_hook);
    let task_wait = require!(task_wait_hook);
    let task_resume = require!(task_resume_hook);
    let task_delay = require!(task_delay_hook);
    let get_time = require!(get_time_hook);
    let get_clocks = require!(get_clocks_hook);
    let task_self = require!(task_self_hook);

    let (
        Some(exception_handler), Some(task_update_stats), Some(task_print_thread_stats), Some(task_new),
        Some(task_delete), Some(task_start), Some(task_stop), Some(task_pause), Some(task_wait), Some(task_resume),
        Some(task_delay), Some(get_time), Some(get_clocks), Some(task_self),
    ) = (
        exception_handler, task_update_stats, task_print_thread_stats, task_new,
        task_delete, task_start, task_stop, task_pause, task_wait, task_resume,
        task_delay, get_time, get_clocks, task_self,
    ) else {
        return Err(violation(flavor, format!("missing {}", missing.join(", "))));
    };

    Ok(BusinessHooks {
        exception_handler,
        task_update_stats,
        task_print_thread_stats,
        task_new,
        task_delete,
        task_start,
        task_stop,
        task_pause,
        task_wait,
        task_resume,
        task_delay,
        get_time,
        get_clocks,
        task_self,
        pll_get_reference: table.task_pll_get_reference_hook,
        pll_set_correction: table.task_pll_set_correction_hook,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_int, c_long};
    use std::path::PathBuf;

    use crate::flavor::descriptor::{FlavorFlags, FlavorName};

    extern "C" fn init(_: *const FlavorHostApi) -> c_int { 0 }
    extern "C" fn exit(_: *const FlavorHostApi) -> c_int { 0 }
    extern "C" fn exception(_: c_int, _: *const FlavorExceptionDetail, _: c_int) -> c_int { 0 }
    extern "C" fn stats() -> c_int { 0 }
    extern "C" fn print_stats(_: c_int) {}
    extern "C" fn new_task(_: *const FlavorTaskSpec, _: c_int) -> c_int { 0 }
    extern "C" fn by_id(_: c_int) -> c_int { 0 }
    extern "C" fn wait(_: c_int) -> c_int { 0 }
    extern "C" fn delay(_: c_long) {}
    extern "C" fn clock() -> i64 { 42 }
    extern "C" fn self_id() -> c_int { 1 }

    fn flavor() -> ModuleDescriptor {
        ModuleDescriptor {
            name: FlavorName::from("mock").unwrap(),
            id: 9,
            weight: 1,
            magic: 1,
            flags: FlavorFlags::empty(),
            api_version: RTFLAVOR_API_VERSION,
            path: PathBuf::from("/lib/mock.so"),
        }
    }

    fn full_table() -> FlavorRuntimeBusiness {
        FlavorRuntimeBusiness {
            exception_handler_hook: Some(exception),
            task_update_stats_hook: Some(stats),
            task_print_thread_stats_hook: Some(print_stats),
            task_new_hook: Some(new_task),
            task_delete_hook: Some(by_id),
            task_start_hook: Some(by_id),
            task_stop_hook: Some(by_id),
            task_pause_hook: Some(by_id),
            task_wait_hook: Some(wait),
            task_resume_hook: Some(by_id),
            task_delay_hook: Some(delay),
            get_time_hook: Some(clock),
            get_clocks_hook: Some(clock),
            task_self_hook: Some(self_id),
            task_pll_get_reference_hook: None,
            task_pll_set_correction_hook: None,
        }
    }

    #[test]
    fn test_full_table_passes_without_pll() {
        let hooks = validate_business(&flavor(), &full_table()).unwrap();
        assert!(hooks.pll_get_reference.is_none());
        assert_eq!((hooks.get_time)(), 42);
    }

    #[test]
    fn test_each_missing_required_hook_is_rejected() {
        let strip: [(&str, fn(&mut FlavorRuntimeBusiness)); 14] = [
            ("exception_handler_hook", |t| t.exception_handler_hook = None),
            ("task_update_stats_hook", |t| t.task_update_stats_hook = None),
            ("task_print_thread_stats_hook", |t| t.task_print_thread_stats_hook = None),
            ("task_new_hook", |t| t.task_new_hook = None),
            ("task_delete_hook", |t| t.task_delete_hook = None),
            ("task_start_hook", |t| t.task_start_hook = None),
            ("task_stop_hook", |t| t.task_stop_hook = None),
            ("task_pause_hook", |t| t.task_pause_hook = None),
            ("task_wait_hook", |t| t.task_wait_hook = None),
            ("task_resume_hook", |t| t.task_resume_hook = None),
            ("task_delay_hook", |t| t.task_delay_hook = None),
            ("get_time_hook", |t| t.get_time_hook = None),
            ("get_clocks_hook", |t| t.get_clocks_hook = None),
            ("task_self_hook", |t| t.task_self_hook = None),
        ];

        for (name, remove) in strip {
            let mut table = full_table();
            remove(&mut table);
            let err = validate_business(&flavor(), &table).unwrap_err();
            assert!(matches!(err, FlavorError::ContractViolation { .. }));
            assert!(err.to_string().contains(name), "{} not named in: {}", name, err);
        }
    }

    #[test]
    fn test_pll_hooks_are_carried_through() {
        extern "C" fn reference() -> i64 { 5 }
        extern "C" fn correction(value: c_long) -> c_int { value as c_int }

        let table = FlavorRuntimeBusiness {
            task_pll_get_reference_hook: Some(reference),
            task_pll_set_correction_hook: Some(correction),
            ..full_table()
        };
        let hooks = validate_business(&flavor(), &table).unwrap();
        assert_eq!(hooks.pll_get_reference.map(|hook| hook()), Some(5));
        assert_eq!(hooks.pll_set_correction.map(|hook| hook(7)), Some(7));
    }

    #[test]
    fn test_violation_names_every_missing_hook() {
        let mut table = full_table();
        table.task_new_hook = None;
        table.get_time_hook = None;
        let message = validate_business(&flavor(), &table).unwrap_err().to_string();
        assert!(message.contains("task_new_hook"));
        assert!(message.contains("get_time_hook"));
    }

    #[test]
    fn test_hot_requires_both_hooks() {
        let hot = FlavorHotMetadata {
            api_version: RTFLAVOR_API_VERSION,
            flavor_id: 9,
            module_init_hook: Some(init),
            module_exit_hook: None,
        };
        let message = validate_hot(&flavor(), &hot).unwrap_err().to_string();
        assert!(message.contains("module_exit_hook"));

        let hot = FlavorHotMetadata { module_exit_hook: Some(exit), ..hot };
        assert!(validate_hot(&flavor(), &hot).is_ok());
    }

    #[test]
    fn test_hot_id_must_match_stamp() {
        let hot = FlavorHotMetadata {
            api_version: RTFLAVOR_API_VERSION,
            flavor_id: 10,
            module_init_hook: Some(init),
            module_exit_hook: Some(exit),
        };
        assert!(matches!(
            validate_hot(&flavor(), &hot),
            Err(FlavorError::ContractViolation { .. })
        ));
    }
}
