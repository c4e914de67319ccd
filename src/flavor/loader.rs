/*
 *  flavor/loader.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Module loader - opens flavor objects and resolves their entry points
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

use std::collections::HashMap;
use std::ffi::c_int;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::error::FlavorError;
use super::ffi::{FlavorHostApi, PluginRegisterFn, PluginUnregisterFn};

/// An opened flavor object
///
/// Dropping the box without calling [`FlavorObject::unload`] keeps the
/// code mapped for the rest of the process.
pub trait FlavorObject: Send {
    /// Canonical path the object was opened from
    fn path(&self) -> &Path;

    /// Call the plugin's register entry point
    fn register(&self, host: &FlavorHostApi) -> c_int;

    /// Call the plugin's unregister entry point, if it has one
    fn unregister(&self, host: &FlavorHostApi);

    /// Release the object
    fn unload(self: Box<Self>) -> Result<(), FlavorError>;
}

/// Source of flavor objects
pub trait ModuleOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FlavorObject>, FlavorError>;
}

#[cfg(all(feature = "plugin-system", unix))]
pub use self::dylib::DylibOpener;

#[cfg(all(feature = "plugin-system", unix))]
mod dylib {
    use super::*;

    use libloading::os::unix::{Library, RTLD_LOCAL, RTLD_NOW};
    use log::info;

    use crate::flavor::ffi::{RTFLAVOR_REGISTER_SYMBOL, RTFLAVOR_UNREGISTER_SYMBOL};

    /// Opens flavor objects with the platform dynamic loader
    ///
    /// Symbols are bound immediately and kept local to the object, so a
    /// flavor with unresolved references fails at open time rather than at
    /// its first hook call.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct DylibOpener;

    struct DylibObject {
        path: PathBuf,
        register_fn: PluginRegisterFn,
        unregister_fn: Option<PluginUnregisterFn>,
        // Owns the mapping the two entry points live in
        library: Library,
    }

    impl ModuleOpener for DylibOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn FlavorObject>, FlavorError> {
            info!("Loading flavor module from: {}", path.display());

            let library = unsafe {
                Library::open(Some(path), RTLD_NOW | RTLD_LOCAL)
                    .map_err(|e| FlavorError::Resource(format!("dlopen {}: {}", path.display(), e)))?
            };

            let register_fn: PluginRegisterFn = unsafe {
                library
                    .get::<PluginRegisterFn>(RTFLAVOR_REGISTER_SYMBOL)
                    .map(|symbol| *symbol)
                    .map_err(|e| FlavorError::Resource(format!(
                        "{} has no registration entry point: {}",
                        path.display(),
                        e
                    )))?
            };

            let unregister_fn: Option<PluginUnregisterFn> = unsafe {
                library
                    .get::<PluginUnregisterFn>(RTFLAVOR_UNREGISTER_SYMBOL)
                    .ok()
                    .map(|symbol| *symbol)
            };

            debug!(
                "Resolved entry points in {} (unregister {})",
                path.display(),
                if unregister_fn.is_some() { "present" } else { "absent" }
            );

            Ok(Box::new(DylibObject {
                path: path.to_path_buf(),
                register_fn,
                unregister_fn,
                library,
            }))
        }
    }

    impl FlavorObject for DylibObject {
        fn path(&self) -> &Path {
            &self.path
        }

        fn register(&self, host: &FlavorHostApi) -> c_int {
            (self.register_fn)(host)
        }

        fn unregister(&self, host: &FlavorHostApi) {
            if let Some(unregister) = self.unregister_fn {
                unregister(host);
            }
        }

        fn unload(self: Box<Self>) -> Result<(), FlavorError> {
            let DylibObject { path, library, .. } = *self;
            library
                .close()
                .map_err(|e| FlavorError::Resource(format!("dlclose {}: {}", path.display(), e)))
        }
    }
}

/// Entry points of a flavor linked into the host binary
#[derive(Debug, Clone, Copy)]
pub struct StaticFlavor {
    pub register: PluginRegisterFn,
    pub unregister: Option<PluginUnregisterFn>,
}

/// Serves flavors compiled into the process, keyed by the path of their
/// stamped object on disk
///
/// Discovery still reads the stamp from the file; only the code comes
/// from the host. Used for statically linked deployments and for tests.
#[derive(Debug, Default)]
pub struct StaticOpener {
    flavors: HashMap<PathBuf, StaticFlavor>,
}

impl StaticOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind entry points to a stamped file
    pub fn with(
        mut self,
        path: impl AsRef<Path>,
        register: PluginRegisterFn,
        unregister: Option<PluginUnregisterFn>,
    ) -> Self {
        let path = path.as_ref();
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.flavors.insert(key, StaticFlavor { register, unregister });
        self
    }

    pub fn len(&self) -> usize {
        self.flavors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flavors.is_empty()
    }
}

struct StaticObject {
    path: PathBuf,
    flavor: StaticFlavor,
}

impl ModuleOpener for StaticOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FlavorObject>, FlavorError> {
        let flavor = self.flavors.get(path).copied().ok_or_else(|| {
            FlavorError::Resource(format!("no built-in flavor bound to {}", path.display()))
        })?;

        debug!("Opening built-in flavor for {}", path.display());

        Ok(Box::new(StaticObject {
            path: path.to_path_buf(),
            flavor,
        }))
    }
}

impl FlavorObject for StaticObject {
    fn path(&self) -> &Path {
        &self.path
    }

    fn register(&self, host: &FlavorHostApi) -> c_int {
        (self.flavor.register)(host)
    }

    fn unregister(&self, host: &FlavorHostApi) {
        if let Some(unregister) = self.flavor.unregister {
            unregister(host);
        }
    }

    fn unload(self: Box<Self>) -> Result<(), FlavorError> {
        Ok(())
    }
}

/// Default opener for this build
#[cfg(all(feature = "plugin-system", unix))]
pub fn default_opener() -> Box<dyn ModuleOpener> {
    Box::new(DylibOpener)
}

/// Default opener for this build
#[cfg(not(all(feature = "plugin-system", unix)))]
pub fn default_opener() -> Box<dyn ModuleOpener> {
    Box::new(StaticOpener::new())
}
