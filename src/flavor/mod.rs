/*
 *  flavor/mod.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Flavor subsystem - discovery, installation and dispatch
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

//! Realtime flavor plugins
//!
//! A flavor is a realtime execution backend (plain POSIX threads, a
//! preemptible kernel, a realtime co-kernel) shipped as a shared object.
//! Exactly one flavor is active per process.
//!
//! ## Architecture
//!
//! 1. **FFI Layer** (`ffi.rs`) - C ABI types shared with plugins
//! 2. **Discovery** (`elf.rs`, `descriptor.rs`, `scanner.rs`, `registry.rs`) -
//!    finds stamped objects on disk and keeps them unique by name and id
//! 3. **Loader** (`loader.rs`) - opens an object and resolves its entry points
//! 4. **Installer** (`installer.rs`, `contract.rs`) - the single active slot
//!    and its state machine
//! 5. **Dispatch** (`dispatch.rs`) - state-gated forwarding into the armed flavor
//! 6. **Manager** (`manager.rs`, `selection.rs`) - startup selection policy
//!
//! ## Plugin Lifecycle
//!
//! 1. The loader opens the object and calls `rtflavor_plugin_register(host)`;
//!    the plugin answers with `host.register(&hot_metadata)`
//! 2. `arm()` calls `module_init_hook(host)`; the plugin answers with
//!    `host.arm(&runtime_business)`
//! 3. `disarm()` calls `module_exit_hook(host)`; the plugin answers with
//!    `host.yield_business(&runtime_business)`
//! 4. `uninstall()` calls `rtflavor_plugin_unregister(host)`; the plugin
//!    answers with `host.unregister(&hot_metadata)`
//!
//! ## Discovery Stamp
//!
//! Every flavor object carries an `rtapi-flavor` ELF section; see
//! [`descriptor`] for the layout.

pub mod contract;
pub mod descriptor;
pub mod dispatch;
pub mod elf;
pub mod error;
pub mod ffi;
pub mod installer;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod scanner;
pub mod selection;
pub mod state;

// Re-exports for convenience
pub use descriptor::{FlavorFlags, FlavorName, FlavorStamp, ModuleDescriptor};
pub use dispatch::{ExceptionReport, TaskSpec};
pub use error::{as_return_code, FlavorError};
pub use installer::Installer;
pub use loader::{default_opener, FlavorObject, ModuleOpener, StaticFlavor, StaticOpener};
pub use manager::{default_lib_dir, FlavorManager, DEFAULT_FLAVOR_LIB_DIR, FLAVOR_LIB_DIR_ENV};
pub use registry::{CandidateRegistry, InsertOutcome};
pub use selection::{parse_selector, FlavorSelector, SelectionSources, FLAVOR_ENV};
pub use state::FlavorState;

#[cfg(all(feature = "plugin-system", unix))]
pub use loader::DylibOpener;
