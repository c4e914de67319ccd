/*
 *  flavor/state.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Lifecycle state of the active flavor slot
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

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of the active flavor slot
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlavorState {
    NotInitialized = 0,
    Initialized = 1,
    Installed = 2,
    Armed = 3,
    ExitRequested = 4,
    Exited = 5,
}

impl FlavorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => FlavorState::NotInitialized,
            1 => FlavorState::Initialized,
            2 => FlavorState::Installed,
            3 => FlavorState::Armed,
            4 => FlavorState::ExitRequested,
            _ => FlavorState::Exited,
        }
    }

    /// Cold metadata of a loaded module is readable in this state
    pub fn has_flavor(self) -> bool {
        matches!(
            self,
            FlavorState::Installed | FlavorState::Armed | FlavorState::ExitRequested
        )
    }
}

impl fmt::Display for FlavorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlavorState::NotInitialized => "not-initialized",
            FlavorState::Initialized => "initialized",
            FlavorState::Installed => "installed",
            FlavorState::Armed => "armed",
            FlavorState::ExitRequested => "exit-requested",
            FlavorState::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// State word shared between the control thread and dispatch callers
///
/// Stores are `Release` and loads are `Acquire`: every hook pointer
/// written before a `store` is visible to a reader that observes it.
#[derive(Debug)]
pub struct AtomicFlavorState(AtomicU8);

impl AtomicFlavorState {
    pub const fn new(state: FlavorState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> FlavorState {
        FlavorState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, state: FlavorState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_atomic() {
        let state = AtomicFlavorState::new(FlavorState::NotInitialized);
        for s in [
            FlavorState::Initialized,
            FlavorState::Installed,
            FlavorState::Armed,
            FlavorState::ExitRequested,
            FlavorState::Exited,
        ] {
            state.store(s);
            assert_eq!(state.load(), s);
        }
    }

    #[test]
    fn test_has_flavor() {
        assert!(!FlavorState::Initialized.has_flavor());
        assert!(FlavorState::Installed.has_flavor());
        assert!(FlavorState::Armed.has_flavor());
        assert!(!FlavorState::Exited.has_flavor());
    }
}
