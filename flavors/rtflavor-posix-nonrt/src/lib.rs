/*
 *  rtflavor POSIX non-realtime flavor
 *
 *  A flavor plugin for rtflavor that runs tasks on ordinary POSIX
 *  threads and clocks, without realtime scheduling guarantees.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 */

//! # rtflavor POSIX non-realtime flavor
//!
//! The fallback flavor: always runnable, never realtime.
//!
//! ## Stamp
//!
//! | field  | value         |
//! |--------|---------------|
//! | id     | 2             |
//! | weight | 10            |
//! | magic  | 1             |
//! | flags  | none          |
//! | name   | `posix-nonrt` |
//!
//! ## Lifecycle
//!
//! - `rtflavor_plugin_register` publishes the hot metadata
//! - the module init hook arms the runtime business table
//! - the module exit hook yields it again
//! - `rtflavor_plugin_unregister` retracts the hot metadata
//!
//! Periodic tasks are bound to the thread that starts them; `task_wait`
//! sleeps that thread until its next release point and counts overruns.
//!
//! ## Usage
//!
//! ```bash
//! FLAVOR=posix-nonrt rtflavor
//! ```

pub mod ffi;
mod plugin;

pub use ffi::{FlavorHostApi, FlavorStampSection};
pub use plugin::{
    rtflavor_plugin_register, rtflavor_plugin_unregister, FLAVOR_STAMP, POSIX_NONRT_ID,
    POSIX_NONRT_MAGIC, POSIX_NONRT_NAME, POSIX_NONRT_WEIGHT,
};
