/*
 *  flavor/dispatch.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Dispatch facade - state-gated forwarding into the armed flavor
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

//! Every call here checks that the flavor is ARMED before touching a
//! hook; otherwise it fails with `NotPermittedInState` and the plugin is
//! never entered. Negative hook results become `Backend` errors; anything
//! else is returned as the plugin produced it.

use std::ffi::{c_int, c_long};

use super::error::FlavorError;
use super::ffi::{FlavorExceptionDetail, FlavorTaskSpec};
use super::installer::Installer;

/// Parameters for a new realtime task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    /// Period in nanoseconds, 0 for a free-running task
    pub period_ns: i64,
    pub priority: i32,
    /// CPU affinity
    pub cpu: Option<u32>,
    /// Stack size in bytes, 0 for the backend default
    pub stack_size: usize,
    pub uses_fp: bool,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            period_ns: 0,
            priority: 0,
            cpu: None,
            stack_size: 0,
            uses_fp: true,
        }
    }
}

impl From<&TaskSpec> for FlavorTaskSpec {
    fn from(spec: &TaskSpec) -> Self {
        FlavorTaskSpec {
            period_ns: spec.period_ns as c_long,
            priority: spec.priority,
            cpu: spec.cpu.map_or(-1, |cpu| cpu as c_int),
            stack_size: spec.stack_size,
            uses_fp: spec.uses_fp,
        }
    }
}

/// Exception report forwarded to the flavor's handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExceptionReport {
    pub kind: i32,
    pub task_id: Option<i32>,
    pub error_code: i32,
    pub timestamp_ns: i64,
    pub level: i32,
}

fn checked(operation: &'static str, code: c_int) -> Result<i32, FlavorError> {
    if code < 0 {
        Err(FlavorError::Backend { operation, code })
    } else {
        Ok(code)
    }
}

impl Installer {
    pub fn task_new(&self, task_id: i32, spec: &TaskSpec) -> Result<i32, FlavorError> {
        let raw = FlavorTaskSpec::from(spec);
        let code = self.with_business("task_new", |hooks| (hooks.task_new)(&raw, task_id))?;
        checked("task_new", code)
    }

    pub fn task_delete(&self, task_id: i32) -> Result<i32, FlavorError> {
        let code = self.with_business("task_delete", |hooks| (hooks.task_delete)(task_id))?;
        checked("task_delete", code)
    }

    pub fn task_start(&self, task_id: i32) -> Result<i32, FlavorError> {
        let code = self.with_business("task_start", |hooks| (hooks.task_start)(task_id))?;
        checked("task_start", code)
    }

    pub fn task_stop(&self, task_id: i32) -> Result<i32, FlavorError> {
        let code = self.with_business("task_stop", |hooks| (hooks.task_stop)(task_id))?;
        checked("task_stop", code)
    }

    pub fn task_pause(&self, task_id: i32) -> Result<i32, FlavorError> {
        let code = self.with_business("task_pause", |hooks| (hooks.task_pause)(task_id))?;
        checked("task_pause", code)
    }

    pub fn task_resume(&self, task_id: i32) -> Result<i32, FlavorError> {
        let code = self.with_business("task_resume", |hooks| (hooks.task_resume)(task_id))?;
        checked("task_resume", code)
    }

    /// Wait for the next period of the calling task; blocking is up to the flavor
    pub fn task_wait(&self, flags: i32) -> Result<i32, FlavorError> {
        let code = self.with_business("task_wait", |hooks| (hooks.task_wait)(flags))?;
        checked("task_wait", code)
    }

    pub fn task_delay(&self, nsec: i64) -> Result<(), FlavorError> {
        self.with_business("task_delay", |hooks| (hooks.task_delay)(nsec as c_long))
    }

    /// Id of the calling task, as the flavor sees it
    pub fn task_self(&self) -> Result<i32, FlavorError> {
        let code = self.with_business("task_self", |hooks| (hooks.task_self)())?;
        checked("task_self", code)
    }

    /// Monotonic time in nanoseconds
    pub fn get_time(&self) -> Result<i64, FlavorError> {
        self.with_business("get_time", |hooks| (hooks.get_time)())
    }

    pub fn get_clocks(&self) -> Result<i64, FlavorError> {
        self.with_business("get_clocks", |hooks| (hooks.get_clocks)())
    }

    /// PLL reference; 0 when the flavor has no PLL support
    pub fn pll_get_reference(&self) -> Result<i64, FlavorError> {
        self.with_business("pll_get_reference", |hooks| {
            hooks.pll_get_reference.map_or(0, |hook| hook())
        })
    }

    /// Apply a PLL correction; 0 when the flavor has no PLL support
    pub fn pll_set_correction(&self, value: i64) -> Result<i32, FlavorError> {
        let code = self.with_business("pll_set_correction", |hooks| {
            hooks.pll_set_correction.map_or(0, |hook| hook(value as c_long))
        })?;
        checked("pll_set_correction", code)
    }

    pub fn exception_handler(&self, report: &ExceptionReport) -> Result<i32, FlavorError> {
        let detail = FlavorExceptionDetail {
            task_id: report.task_id.unwrap_or(-1),
            error_code: report.error_code,
            timestamp_ns: report.timestamp_ns,
        };
        let code = self.with_business("exception_handler", |hooks| {
            (hooks.exception_handler)(report.kind, &detail, report.level)
        })?;
        checked("exception_handler", code)
    }

    pub fn task_update_stats(&self) -> Result<i32, FlavorError> {
        let code = self.with_business("task_update_stats", |hooks| (hooks.task_update_stats)())?;
        checked("task_update_stats", code)
    }

    pub fn task_print_thread_stats(&self, task_id: i32) -> Result<(), FlavorError> {
        self.with_business("task_print_thread_stats", |hooks| {
            (hooks.task_print_thread_stats)(task_id)
        })
    }
}
