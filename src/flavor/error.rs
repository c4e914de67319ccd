/*
 *  flavor/error.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Unified error types for the flavor subsystem
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

use std::path::PathBuf;
use thiserror::Error;

use super::state::FlavorState;

/// Unified error type for all flavor operations
#[derive(Debug, Error)]
pub enum FlavorError {
    /// Operation attempted while the state machine is in the wrong state
    #[error("{operation} is not permitted while flavor state is {state}")]
    NotPermittedInState {
        operation: &'static str,
        state: FlavorState,
    },

    /// A plugin broke the hook contract or declared an unsupported version
    #[error("flavor '{flavor}' violates the plugin contract: {reason}")]
    ContractViolation { flavor: String, reason: String },

    /// Filesystem or ELF failure while looking for candidates
    #[error("discovery failed on {}: {reason}", path.display())]
    Discovery { path: PathBuf, reason: String },

    /// Conflicting or malformed flavor selection input
    #[error("ambiguous flavor selection: {0}")]
    AmbiguousInput(String),

    /// Automatic selection tried every candidate and none installed
    #[error("no flavor module could be installed (tried {tried} candidates)")]
    NoRunnableModule { tried: usize },

    /// An explicitly requested flavor is not among the candidates
    #[error("requested flavor {0} was not found")]
    NotFound(String),

    /// Loading, unloading or allocation failure
    #[error("resource error: {0}")]
    Resource(String),

    /// The backend returned a negative code from one of its hooks
    #[error("flavor hook {operation} failed with code {code}")]
    Backend { operation: &'static str, code: i32 },
}

impl FlavorError {
    /// Negative errno equivalent, for callers speaking the C convention
    pub fn errno(&self) -> i32 {
        match self {
            FlavorError::NotPermittedInState { .. } => -libc::EPERM,
            FlavorError::ContractViolation { .. } => -libc::ENOEXEC,
            FlavorError::Discovery { .. } => -libc::EIO,
            FlavorError::AmbiguousInput(_) => -libc::EINVAL,
            FlavorError::NoRunnableModule { .. } => -libc::ENODEV,
            FlavorError::NotFound(_) => -libc::ENOENT,
            FlavorError::Resource(_) => -libc::ENOMEM,
            FlavorError::Backend { code, .. } => *code,
        }
    }
}

/// Collapse a façade result into the `0 / -errno` return convention
pub fn as_return_code(result: Result<i32, FlavorError>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => e.errno(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_is_negative() {
        let errors = [
            FlavorError::NotPermittedInState {
                operation: "task_new",
                state: FlavorState::Installed,
            },
            FlavorError::ContractViolation {
                flavor: "posix".into(),
                reason: "missing task_new_hook".into(),
            },
            FlavorError::Discovery {
                path: "/usr/lib/rtflavor".into(),
                reason: "no such directory".into(),
            },
            FlavorError::AmbiguousInput("both set".into()),
            FlavorError::NoRunnableModule { tried: 3 },
            FlavorError::NotFound("name 'xenomai'".into()),
            FlavorError::Resource("dlopen".into()),
        ];

        for e in &errors {
            assert!(e.errno() < 0, "{e} should map to a negative code");
        }
    }

    #[test]
    fn test_backend_code_passes_through() {
        let e = FlavorError::Backend { operation: "task_start", code: -16 };
        assert_eq!(e.errno(), -16);
        assert_eq!(as_return_code(Err(e)), -16);
        assert_eq!(as_return_code(Ok(0)), 0);
    }

    #[test]
    fn test_not_permitted_message_names_state() {
        let e = FlavorError::NotPermittedInState {
            operation: "get_time",
            state: FlavorState::Initialized,
        };
        assert_eq!(e.to_string(), "get_time is not permitted while flavor state is initialized");
        assert_eq!(e.errno(), -libc::EPERM);
    }
}
