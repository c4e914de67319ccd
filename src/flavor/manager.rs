/*
 *  flavor/manager.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Flavor manager - discovery, selection policy and the process-wide instance
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

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{info, warn};
use parking_lot::Mutex;

use super::descriptor::{FlavorName, ModuleDescriptor};
use super::error::FlavorError;
use super::installer::{not_permitted, Installer};
use super::loader::{default_opener, ModuleOpener};
use super::registry::CandidateRegistry;
use super::selection::{FlavorSelector, SelectionSources};
use super::state::FlavorState;

/// Environment variable overriding the directory scanned for flavors
pub const FLAVOR_LIB_DIR_ENV: &str = "FLAVOR_LIB_DIR";

/// Scan root when neither config nor environment names one
pub const DEFAULT_FLAVOR_LIB_DIR: &str = "/usr/lib/rtflavor/flavors";

static GLOBAL: OnceLock<FlavorManager> = OnceLock::new();

/// Scan root from the environment, or the built-in default
pub fn default_lib_dir() -> PathBuf {
    std::env::var_os(FLAVOR_LIB_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FLAVOR_LIB_DIR))
}

/// Candidate registry plus the installer, with the selection policy
/// between them
pub struct FlavorManager {
    installer: Installer,
    registry: Mutex<CandidateRegistry>,
    lib_dir: PathBuf,
}

impl FlavorManager {
    /// Manager scanning `lib_dir`, with its installer already INITIALIZED
    pub fn new(lib_dir: impl Into<PathBuf>, opener: Box<dyn ModuleOpener>) -> Self {
        let installer = Installer::new(opener);
        if let Err(e) = installer.initialize() {
            warn!("Flavor installer: {}", e);
        }

        Self {
            installer,
            registry: Mutex::new(CandidateRegistry::new()),
            lib_dir: lib_dir.into(),
        }
    }

    /// Set up the process-wide manager; the first caller wins
    pub fn init_global(lib_dir: impl Into<PathBuf>, opener: Box<dyn ModuleOpener>) -> &'static FlavorManager {
        let lib_dir = lib_dir.into();
        if GLOBAL.get().is_some() {
            warn!("Flavor manager already initialised; ignoring {}", lib_dir.display());
        }
        GLOBAL.get_or_init(|| FlavorManager::new(lib_dir, opener))
    }

    /// Process-wide manager, created from the environment on first use
    pub fn global() -> &'static FlavorManager {
        GLOBAL.get_or_init(|| FlavorManager::new(default_lib_dir(), default_opener()))
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    pub fn lib_dir(&self) -> &Path {
        &self.lib_dir
    }

    /// Scan the library directory once; returns the candidate count
    pub fn discover(&self) -> usize {
        let mut registry = self.registry.lock();

        if !registry.is_discovered() && !self.lib_dir.is_dir() {
            warn!(
                "{}",
                FlavorError::Discovery {
                    path: self.lib_dir.clone(),
                    reason: "not a directory".to_string(),
                }
            );
        }

        registry.discover_once(&self.lib_dir)
    }

    /// Names of every discovered candidate, in discovery order
    pub fn known_flavor_names(&self) -> Vec<String> {
        self.discover();
        self.registry.lock().names()
    }

    /// Snapshot of every discovered candidate
    pub fn candidates(&self) -> Vec<ModuleDescriptor> {
        self.discover();
        self.registry.lock().iter().cloned().collect()
    }

    fn lookup(&self, selector: &FlavorSelector) -> Option<ModuleDescriptor> {
        match selector {
            FlavorSelector::Path(path) => self.registry.lock().probe_path(path).cloned(),
            FlavorSelector::Id(id) => {
                self.discover();
                self.registry.lock().find_by_id(*id).cloned()
            }
            FlavorSelector::Name(name) => {
                self.discover();
                self.registry.lock().find_by_name(name).cloned()
            }
        }
    }

    /// Install exactly the flavor `selector` names
    pub fn install(&self, selector: &FlavorSelector) -> Result<ModuleDescriptor, FlavorError> {
        let state = self.installer.state();
        if state != FlavorState::Initialized {
            return Err(not_permitted("install", state));
        }

        let flavor = self.lookup(selector).ok_or_else(|| {
            FlavorError::NotFound(selector.to_string())
        })?;

        self.installer.install(&flavor)?;
        Ok(flavor)
    }

    pub fn install_by_name(&self, name: &str) -> Result<ModuleDescriptor, FlavorError> {
        let name = FlavorName::from(name).map_err(|_| FlavorError::NotFound(format!("name '{}'", name)))?;
        self.install(&FlavorSelector::Name(name))
    }

    pub fn install_by_id(&self, id: u32) -> Result<ModuleDescriptor, FlavorError> {
        self.install(&FlavorSelector::Id(id))
    }

    pub fn install_by_path(&self, path: &Path) -> Result<ModuleDescriptor, FlavorError> {
        self.install(&FlavorSelector::Path(path.to_path_buf()))
    }

    /// Try every candidate, heaviest first, until one installs
    pub fn install_automatic(&self) -> Result<ModuleDescriptor, FlavorError> {
        let state = self.installer.state();
        if state != FlavorState::Initialized {
            return Err(not_permitted("install", state));
        }

        self.discover();
        let ordered: Vec<ModuleDescriptor> = self
            .registry
            .lock()
            .sorted_by_weight_descending()
            .into_iter()
            .cloned()
            .collect();

        for flavor in &ordered {
            match self.installer.install(flavor) {
                Ok(()) => return Ok(flavor.clone()),
                Err(e) => warn!("Flavor '{}' (weight {}) could not be installed: {}", flavor.name, flavor.weight, e),
            }
        }

        Err(FlavorError::NoRunnableModule { tried: ordered.len() })
    }

    /// Startup selection: explicit selector if given, automatic otherwise
    pub fn startup(&self, sources: &SelectionSources) -> Result<ModuleDescriptor, FlavorError> {
        let flavor = match sources.resolve()? {
            Some(selector) => {
                info!("Flavor requested by {}", selector);
                self.install(&selector)?
            }
            None => {
                info!("No flavor requested, selecting automatically from {}", self.lib_dir.display());
                self.install_automatic()?
            }
        };

        info!("Selected flavor '{}' (id {})", flavor.name, flavor.id);
        Ok(flavor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flavor::loader::StaticOpener;

    fn empty_manager() -> (tempfile::TempDir, FlavorManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = FlavorManager::new(dir.path(), Box::new(StaticOpener::new()));
        (dir, manager)
    }

    #[test]
    fn test_new_manager_is_initialized() {
        let (_dir, manager) = empty_manager();
        assert_eq!(manager.installer().state(), FlavorState::Initialized);
        assert!(manager.known_flavor_names().is_empty());
    }

    #[test]
    fn test_automatic_with_no_candidates() {
        let (_dir, manager) = empty_manager();
        assert!(matches!(
            manager.install_automatic(),
            Err(FlavorError::NoRunnableModule { tried: 0 })
        ));
    }

    #[test]
    fn test_explicit_miss_is_not_found() {
        let (_dir, manager) = empty_manager();
        assert!(matches!(manager.install_by_name("xenomai"), Err(FlavorError::NotFound(_))));
        assert!(matches!(manager.install_by_id(42), Err(FlavorError::NotFound(_))));
        assert!(matches!(
            manager.install_by_path(Path::new("/nonexistent/libflavor.so")),
            Err(FlavorError::NotFound(_))
        ));
    }

    #[test]
    fn test_ambiguous_sources_install_nothing() {
        let (_dir, manager) = empty_manager();
        let sources = SelectionSources {
            cmdline: vec!["posix".into()],
            environment: Some("posix".into()),
        };
        assert!(matches!(manager.startup(&sources), Err(FlavorError::AmbiguousInput(_))));
        assert_eq!(manager.installer().state(), FlavorState::Initialized);
    }

    #[test]
    fn test_missing_lib_dir_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FlavorManager::new(dir.path().join("absent"), Box::new(StaticOpener::new()));
        assert_eq!(manager.discover(), 0);
    }
}
