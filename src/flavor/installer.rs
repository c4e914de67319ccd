/*
 *  flavor/installer.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Installer - owns the active flavor slot and drives its lifecycle
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

//! The active flavor slot
//!
//! ```text
//! NOT_INITIALIZED --initialize--> INITIALIZED --install--> INSTALLED --arm--> ARMED
//!                                      ^                      |  ^              |
//!                                      +------uninstall-------+  +---disarm-----+
//! ```
//!
//! Lifecycle operations (install, arm, disarm, uninstall, shutdown) are
//! serialized on one control mutex. Dispatch never takes that mutex: it
//! reads the state word with acquire ordering and the business table
//! through an `ArcSwapOption`. The table is stored before the state word
//! flips to ARMED, and the state word leaves ARMED before the table is
//! cleared, so a caller that observes ARMED always finds live hooks.
//!
//! A dispatch call holds its own reference to the business table for
//! the duration of the call. Disarm retires the table into the slot, and
//! uninstall waits until every retired table is released before the
//! object is unloaded, so no call can still be running inside code that
//! is about to be unmapped. A hook that never returns therefore blocks
//! uninstall.

use std::ffi::{c_int, c_void};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::contract::{self, BusinessHooks, HotHooks};
use super::descriptor::{FlavorFlags, FlavorName, ModuleDescriptor};
use super::error::FlavorError;
use super::ffi::{
    FlavorHostApi, FlavorHotMetadata, FlavorRuntimeBusiness, RTFLAVOR_API_VERSION,
};
use super::loader::{FlavorObject, ModuleOpener};
use super::state::{AtomicFlavorState, FlavorState};

/// A table a plugin handed to one of the host callbacks
///
/// `origin` is the plugin's own address for the table; a retraction is
/// only honoured when it names the same table.
#[derive(Clone, Copy)]
struct Published<T> {
    table: T,
    origin: usize,
}

#[derive(Default)]
struct Registrations {
    hot: Option<Published<FlavorHotMetadata>>,
    business: Option<Published<FlavorRuntimeBusiness>>,
}

/// Target of the host callbacks; `FlavorHostApi::context` points here
#[derive(Default)]
struct RegistrationCell(Mutex<Registrations>);

impl RegistrationCell {
    fn hot(&self) -> Option<FlavorHotMetadata> {
        self.0.lock().hot.map(|p| p.table)
    }

    fn business(&self) -> Option<FlavorRuntimeBusiness> {
        self.0.lock().business.map(|p| p.table)
    }

    fn take_hot(&self) -> Option<FlavorHotMetadata> {
        self.0.lock().hot.take().map(|p| p.table)
    }

    fn take_business(&self) -> Option<FlavorRuntimeBusiness> {
        self.0.lock().business.take().map(|p| p.table)
    }

    fn clear(&self) {
        let mut regs = self.0.lock();
        regs.hot = None;
        regs.business = None;
    }

    fn is_empty(&self) -> bool {
        let regs = self.0.lock();
        regs.hot.is_none() && regs.business.is_none()
    }
}

fn cell_from<'a>(context: *mut c_void) -> Option<&'a RegistrationCell> {
    // SAFETY: the only context ever handed out is the Installer's boxed
    // cell, which outlives every plugin call made through its host table
    unsafe { (context as *const RegistrationCell).as_ref() }
}

fn publish<T: Copy>(slot: &mut Option<Published<T>>, table: *const T, what: &str) -> c_int {
    if slot.is_some() {
        warn!("Flavor tried to publish its {} twice", what);
        return -libc::EBUSY;
    }

    // SAFETY: non-null checked by the caller; the plugin guarantees the
    // table is valid for the duration of the callback
    let copy = unsafe { *table };
    *slot = Some(Published { table: copy, origin: table as usize });
    debug!("Flavor published its {}", what);
    0
}

fn retract<T>(slot: &mut Option<Published<T>>, table: *const T, what: &str) -> c_int {
    match slot.as_ref().map(|published| published.origin) {
        Some(origin) if origin == table as usize => {
            *slot = None;
            debug!("Flavor retracted its {}", what);
            0
        }
        Some(_) => {
            warn!("Flavor tried to retract a {} it never published", what);
            -libc::EINVAL
        }
        None => -libc::ENOENT,
    }
}

extern "C" fn host_register_flavor(context: *mut c_void, hot: *const FlavorHotMetadata) -> c_int {
    match cell_from(context) {
        Some(cell) if !hot.is_null() => publish(&mut cell.0.lock().hot, hot, "hot metadata"),
        _ => -libc::EINVAL,
    }
}

extern "C" fn host_unregister_flavor(context: *mut c_void, hot: *const FlavorHotMetadata) -> c_int {
    match cell_from(context) {
        Some(cell) if !hot.is_null() => retract(&mut cell.0.lock().hot, hot, "hot metadata"),
        _ => -libc::EINVAL,
    }
}

extern "C" fn host_arm_flavor(context: *mut c_void, business: *const FlavorRuntimeBusiness) -> c_int {
    match cell_from(context) {
        Some(cell) if !business.is_null() => {
            publish(&mut cell.0.lock().business, business, "runtime business table")
        }
        _ => -libc::EINVAL,
    }
}

extern "C" fn host_yield_flavor(context: *mut c_void, business: *const FlavorRuntimeBusiness) -> c_int {
    match cell_from(context) {
        Some(cell) if !business.is_null() => {
            retract(&mut cell.0.lock().business, business, "runtime business table")
        }
        _ => -libc::EINVAL,
    }
}

/// Loaded object and validated lifecycle hooks of the installed flavor
#[derive(Default)]
struct ActiveSlot {
    object: Option<Box<dyn FlavorObject>>,
    hot: Option<HotHooks>,
    /// Business tables taken out of dispatch by disarm
    retired: Vec<Arc<BusinessHooks>>,
}

impl ActiveSlot {
    /// Wait for in-flight dispatch calls to release every retired table
    fn drain_retired(&mut self) {
        for hooks in self.retired.drain(..) {
            if Arc::strong_count(&hooks) > 1 {
                debug!("Waiting for in-flight flavor calls to return");
            }
            while Arc::strong_count(&hooks) > 1 {
                std::thread::yield_now();
            }
        }
    }
}

pub(super) fn not_permitted(operation: &'static str, state: FlavorState) -> FlavorError {
    FlavorError::NotPermittedInState { operation, state }
}

/// Owner of the single active flavor slot
pub struct Installer {
    state: AtomicFlavorState,
    business: ArcSwapOption<BusinessHooks>,
    cold: ArcSwapOption<ModuleDescriptor>,
    control: Mutex<ActiveSlot>,
    registrations: Box<RegistrationCell>,
    host: Box<FlavorHostApi>,
    opener: Box<dyn ModuleOpener>,
}

impl Installer {
    /// New installer in NOT_INITIALIZED, loading modules through `opener`
    pub fn new(opener: Box<dyn ModuleOpener>) -> Self {
        let registrations = Box::new(RegistrationCell::default());

        let host = Box::new(FlavorHostApi {
            api_version: RTFLAVOR_API_VERSION,
            context: &*registrations as *const RegistrationCell as *mut c_void,
            register_flavor: host_register_flavor,
            unregister_flavor: host_unregister_flavor,
            arm_flavor: host_arm_flavor,
            yield_flavor: host_yield_flavor,
        });

        Self {
            state: AtomicFlavorState::new(FlavorState::NotInitialized),
            business: ArcSwapOption::empty(),
            cold: ArcSwapOption::empty(),
            control: Mutex::new(ActiveSlot::default()),
            registrations,
            host,
            opener,
        }
    }

    #[inline]
    pub fn state(&self) -> FlavorState {
        self.state.load()
    }

    /// Process startup: NOT_INITIALIZED -> INITIALIZED
    pub fn initialize(&self) -> Result<(), FlavorError> {
        let _slot = self.control.lock();
        let state = self.state.load();

        if state != FlavorState::NotInitialized {
            return Err(not_permitted("initialize", state));
        }

        self.state.store(FlavorState::Initialized);
        debug!("Flavor subsystem initialized");
        Ok(())
    }

    /// Load `flavor` into the empty slot
    ///
    /// Any failure after the object was opened unloads it again and
    /// drops whatever it managed to register, so the slot is never left
    /// half-populated.
    pub fn install(&self, flavor: &ModuleDescriptor) -> Result<(), FlavorError> {
        let mut slot = self.control.lock();
        let state = self.state.load();

        if state != FlavorState::Initialized {
            if let Some(active) = self.cold.load_full() {
                error!(
                    "Refusing to install '{}': flavor '{}' is already installed",
                    flavor.name, active.name
                );
            }
            return Err(not_permitted("install", state));
        }

        if flavor.api_version != RTFLAVOR_API_VERSION {
            return Err(FlavorError::ContractViolation {
                flavor: flavor.name.to_string(),
                reason: format!(
                    "api_version {} is not supported (expected {})",
                    flavor.api_version, RTFLAVOR_API_VERSION
                ),
            });
        }

        // Nothing may leak in from a previous attempt
        self.registrations.clear();

        let object = self.opener.open(&flavor.path)?;
        let rc = object.register(&self.host);

        let hot = match self.accept_hot(flavor, rc) {
            Ok(hot) => hot,
            Err(e) => {
                error!("Failed to install flavor '{}': {}", flavor.name, e);
                self.force_unload(object);
                return Err(e);
            }
        };

        slot.object = Some(object);
        slot.hot = Some(hot);
        self.cold.store(Some(Arc::new(flavor.clone())));
        self.state.store(FlavorState::Installed);

        info!("Installed flavor {}", flavor);
        Ok(())
    }

    fn accept_hot(&self, flavor: &ModuleDescriptor, rc: c_int) -> Result<HotHooks, FlavorError> {
        if rc < 0 {
            return Err(FlavorError::Backend { operation: "plugin_register", code: rc });
        }

        let Some(hot) = self.registrations.hot() else {
            return Err(FlavorError::ContractViolation {
                flavor: flavor.name.to_string(),
                reason: "loaded without publishing its hot metadata".to_string(),
            });
        };

        contract::validate_hot(flavor, &hot)
    }

    fn force_unload(&self, object: Box<dyn FlavorObject>) {
        let path = object.path().to_path_buf();
        object.unregister(&self.host);

        if let Err(e) = object.unload() {
            error!("Failed to unload {}: {}", path.display(), e);
        }

        self.registrations.clear();
    }

    /// Run the module init hook and accept its business table
    pub fn arm(&self) -> Result<(), FlavorError> {
        let slot = self.control.lock();
        let state = self.state.load();

        if state != FlavorState::Installed {
            return Err(not_permitted("arm", state));
        }

        let (Some(flavor), Some(hot)) = (self.cold.load_full(), slot.hot) else {
            return Err(not_permitted("arm", state));
        };

        if self.registrations.take_business().is_some() {
            warn!("Discarding runtime business table '{}' published outside arm", flavor.name);
        }

        let rc = (hot.module_init)(&*self.host);
        if rc < 0 {
            self.registrations.take_business();
            error!("Flavor '{}' module_init_hook failed with code {}", flavor.name, rc);
            return Err(FlavorError::Backend { operation: "module_init_hook", code: rc });
        }

        let Some(table) = self.registrations.business() else {
            error!("Flavor '{}' did not supply its runtime business table", flavor.name);
            self.abort_arm(&flavor, hot);
            return Err(FlavorError::ContractViolation {
                flavor: flavor.name.to_string(),
                reason: "module_init_hook did not supply a runtime business table".to_string(),
            });
        };

        let hooks = match contract::validate_business(&flavor, &table) {
            Ok(hooks) => hooks,
            Err(e) => {
                self.abort_arm(&flavor, hot);
                return Err(e);
            }
        };

        self.business.store(Some(Arc::new(hooks)));
        self.state.store(FlavorState::Armed);

        info!("Flavor '{}' armed", flavor.name);
        Ok(())
    }

    fn abort_arm(&self, flavor: &ModuleDescriptor, hot: HotHooks) {
        let rc = (hot.module_exit)(&*self.host);
        if rc < 0 {
            warn!("Flavor '{}' module_exit_hook failed with code {} while backing out", flavor.name, rc);
        }
        self.registrations.take_business();
    }

    /// Run the module exit hook; ARMED -> INSTALLED
    ///
    /// If the exit hook fails the flavor stays armed with its hooks intact.
    pub fn disarm(&self) -> Result<(), FlavorError> {
        let mut slot = self.control.lock();
        self.disarm_locked(&mut slot)
    }

    fn disarm_locked(&self, slot: &mut ActiveSlot) -> Result<(), FlavorError> {
        let state = self.state.load();

        if state != FlavorState::Armed {
            return Err(not_permitted("disarm", state));
        }

        let Some(hot) = slot.hot else {
            return Err(not_permitted("disarm", state));
        };

        self.state.store(FlavorState::ExitRequested);
        let previous = self.business.swap(None);

        let rc = (hot.module_exit)(&*self.host);
        if rc < 0 {
            self.business.store(previous);
            self.state.store(FlavorState::Armed);
            error!("module_exit_hook failed with code {}; flavor stays armed", rc);
            return Err(FlavorError::Backend { operation: "module_exit_hook", code: rc });
        }

        if self.registrations.take_business().is_some() {
            warn!("Flavor did not yield its runtime business table on exit; cleared");
        }
        slot.retired.retain(|hooks| Arc::strong_count(hooks) > 1);
        slot.retired.extend(previous);

        self.state.store(FlavorState::Installed);
        info!("Flavor disarmed");
        Ok(())
    }

    /// Unload the installed flavor; INSTALLED -> INITIALIZED
    pub fn uninstall(&self) -> Result<(), FlavorError> {
        let mut slot = self.control.lock();
        self.uninstall_locked(&mut slot)
    }

    fn uninstall_locked(&self, slot: &mut ActiveSlot) -> Result<(), FlavorError> {
        let state = self.state.load();

        if state != FlavorState::Installed {
            return Err(not_permitted("uninstall", state));
        }

        let name = self.cold.load_full().map(|d| d.name.to_string()).unwrap_or_default();

        slot.drain_retired();

        if let Some(object) = slot.object.take() {
            let path = object.path().to_path_buf();
            object.unregister(&self.host);
            if let Err(e) = object.unload() {
                error!("Failed to unload {}: {}", path.display(), e);
            }
        }

        if self.registrations.take_hot().is_some() {
            error!(
                "Integrity error: flavor '{}' did not retract its hot metadata on unload; force-cleared",
                name
            );
        }
        self.registrations.clear();

        slot.hot = None;
        self.business.store(None);
        self.cold.store(None);
        self.state.store(FlavorState::Initialized);

        info!("Flavor '{}' uninstalled", name);
        Ok(())
    }

    /// Tear everything down and refuse further lifecycle operations
    pub fn shutdown(&self) -> Result<(), FlavorError> {
        let mut slot = self.control.lock();

        if self.state.load() == FlavorState::Armed {
            self.disarm_locked(&mut slot)?;
        }

        if self.state.load() == FlavorState::Installed {
            self.uninstall_locked(&mut slot)?;
        }

        self.state.store(FlavorState::Exited);
        info!("Flavor subsystem exited");
        Ok(())
    }

    /// Whether every slot field is clear
    pub fn slot_is_empty(&self) -> bool {
        let slot = self.control.lock();
        slot.object.is_none()
            && slot.hot.is_none()
            && slot.retired.is_empty()
            && self.business.load().is_none()
            && self.cold.load().is_none()
            && self.registrations.is_empty()
    }

    /// Hooks for a dispatch call, or a refusal if the flavor is not armed
    pub(super) fn with_business<R>(
        &self,
        operation: &'static str,
        call: impl FnOnce(&BusinessHooks) -> R,
    ) -> Result<R, FlavorError> {
        let state = self.state.load();
        if state != FlavorState::Armed {
            return Err(not_permitted(operation, state));
        }

        match self.business.load_full() {
            Some(hooks) => Ok(call(&hooks)),
            None => Err(not_permitted(operation, self.state.load())),
        }
    }

    fn installed(&self, operation: &'static str) -> Result<Arc<ModuleDescriptor>, FlavorError> {
        let state = self.state.load();
        if !state.has_flavor() {
            return Err(not_permitted(operation, state));
        }
        self.cold.load_full().ok_or_else(|| not_permitted(operation, self.state.load()))
    }

    /// Descriptor of the installed flavor, if any
    pub fn installed_flavor(&self) -> Option<Arc<ModuleDescriptor>> {
        self.installed("installed_flavor").ok()
    }

    pub fn installed_flavor_name(&self) -> Result<FlavorName, FlavorError> {
        Ok(self.installed("installed_flavor_name")?.name)
    }

    pub fn installed_flavor_id(&self) -> Result<u32, FlavorError> {
        Ok(self.installed("installed_flavor_id")?.id)
    }

    pub fn installed_flavor_magic(&self) -> Result<u32, FlavorError> {
        Ok(self.installed("installed_flavor_magic")?.magic)
    }

    /// Whether the installed flavor carries every flag in `feature`
    pub fn verify_installed_flavor_feature(&self, feature: FlavorFlags) -> Result<bool, FlavorError> {
        Ok(self.installed("verify_installed_flavor_feature")?.flags.contains(feature))
    }

    pub fn flavor_is_configured(&self) -> bool {
        self.state.load().has_flavor()
    }
}

impl Drop for Installer {
    fn drop(&mut self) {
        if self.state.load().has_flavor() {
            if let Err(e) = self.shutdown() {
                warn!("Flavor teardown on drop failed: {}", e);
            }
        }
    }
}
