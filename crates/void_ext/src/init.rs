//! Library entry point and initialization levels
//!
//! The engine loads the library through one exported symbol, then walks the
//! initialization levels up at load and down at unload. Classes are
//! registered at the level they ask for and removed at the same level on
//! the way down. The last deinitialization tears down every handle the
//! bridge still tracks before its own classes are unregistered, so leaked
//! host instances are freed while their class is still known.
//!
//! ```ignore
//! struct Game;
//!
//! impl ExtensionLibrary for Game {
//!     fn register_classes(registrar: &mut ClassRegistrar) {
//!         registrar.add::<Counter>();
//!     }
//! }
//!
//! ext_entry_point!(game_library_init, Game);
//! ```

use std::ffi::c_void;
use std::sync::OnceLock;

use parking_lot::Mutex;
use void_ext_sys::{
    install, install_builtins, Bool, ClassLibraryPtr, EngineInterface, FfiInitialization, GetProcAddressFn, InitLevel,
    InitLevelFn, FALSE, TRUE,
};

use crate::class::{self, HostClass};
use crate::config::ExtensionConfig;
use crate::error::{BridgeError, Result};
use crate::guard;
use crate::handles::HandleTable;
use crate::logging;
use crate::registry;
use crate::version::EngineVersion;

/// Entry point failure code handed back to the engine
pub const LOAD_FAILED: Bool = TRUE;

/// Hooks of one extension library
pub trait ExtensionLibrary: 'static {
    /// Configuration of the library
    fn config() -> ExtensionConfig {
        ExtensionConfig::default()
    }

    /// Queue the host classes this library provides
    fn register_classes(_registrar: &mut ClassRegistrar) {}

    /// Called after the classes of `level` are registered
    fn on_init(_level: InitLevel) {}

    /// Called before the classes of `level` are unregistered
    fn on_deinit(_level: InitLevel) {}
}

// ============================================================================
// Class registrar
// ============================================================================

#[derive(Clone, Copy)]
struct PendingClass {
    name: &'static str,
    level: InitLevel,
    register: fn() -> Result<()>,
}

/// Classes queued for registration, in declaration order
#[derive(Default)]
pub struct ClassRegistrar {
    pending: Vec<PendingClass>,
}

impl ClassRegistrar {
    /// Queue `T` for registration at its initialization level
    pub fn add<T: HostClass>(&mut self) -> &mut Self {
        self.pending.push(PendingClass { name: T::NAME, level: T::INIT_LEVEL, register: class::register_class::<T> });
        self
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Library state
// ============================================================================

struct LibraryState {
    config: ExtensionConfig,
    pending: Vec<PendingClass>,
}

fn state() -> &'static Mutex<Option<LibraryState>> {
    static STATE: OnceLock<Mutex<Option<LibraryState>>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(None))
}

/// Classes whose effective level is `level`, with the config in effect
fn classes_for(level: InitLevel) -> Option<(ExtensionConfig, Vec<PendingClass>)> {
    let guard = state().lock();
    let state = guard.as_ref()?;
    let classes = state
        .pending
        .iter()
        .filter(|p| state.config.effective_level(p.level) == level)
        .copied()
        .collect();
    Some((state.config.clone(), classes))
}

// ============================================================================
// Entry point
// ============================================================================

/// Body of the exported entry symbol; use [`ext_entry_point!`] to export it
///
/// Returns `0` on success. On failure nothing is written to `init` and the
/// engine unloads the library.
///
/// # Safety
/// Must only be called by the engine, with a valid resolver and a writable
/// initialization structure.
pub unsafe fn entry_point<L: ExtensionLibrary>(
    get_proc_address: GetProcAddressFn,
    library: ClassLibraryPtr,
    init: *mut FfiInitialization,
) -> Bool {
    match guard::guarded(|| load::<L>(get_proc_address, library, init)) {
        Ok(()) => FALSE,
        Err(err) => {
            guard::report_failure("entry_point", &err);
            LOAD_FAILED
        }
    }
}

unsafe fn load<L: ExtensionLibrary>(
    get_proc_address: GetProcAddressFn,
    library: ClassLibraryPtr,
    init: *mut FfiInitialization,
) -> Result<()> {
    let Some(init) = init.as_mut() else {
        return Err(BridgeError::NotInitialized);
    };

    // Every symbol is checked on each load, even when a previous load
    // already published the table.
    EngineInterface::load(get_proc_address)?;
    let iface = install(get_proc_address, library)?;
    install_builtins(iface)?;

    let config = L::config().with_env_overrides();
    logging::install(&config);

    let found = EngineVersion::query().ok_or(BridgeError::NotInitialized)?;
    if !found.is_compatible_with(&config.minimum_engine_version) {
        return Err(BridgeError::IncompatibleEngine { required: config.minimum_engine_version, found });
    }

    let mut registrar = ClassRegistrar::default();
    guard::guarded(|| {
        L::register_classes(&mut registrar);
        Ok(())
    })?;

    init.minimum_version = config.minimum_engine_version.into();
    init.userdata = std::ptr::null_mut::<c_void>();
    init.initialize = [None; 4];
    init.deinitialize = [None; 4];
    for level in InitLevel::ALL {
        if level >= config.minimum_init_level {
            init.initialize[level.index()] = Some(level_callbacks::<L>(level).0);
            init.deinitialize[level.index()] = Some(level_callbacks::<L>(level).1);
        }
    }

    log::info!(
        "Extension loaded into engine {found} ({} classes queued, levels from {:?})",
        registrar.len(),
        config.minimum_init_level
    );
    *state().lock() = Some(LibraryState { config, pending: registrar.pending });
    Ok(())
}

fn level_callbacks<L: ExtensionLibrary>(level: InitLevel) -> (InitLevelFn, InitLevelFn) {
    match level {
        InitLevel::Core => (initialize_level::<L, 0> as InitLevelFn, deinitialize_level::<L, 0> as InitLevelFn),
        InitLevel::Servers => (initialize_level::<L, 1> as InitLevelFn, deinitialize_level::<L, 1> as InitLevelFn),
        InitLevel::Scene => (initialize_level::<L, 2> as InitLevelFn, deinitialize_level::<L, 2> as InitLevelFn),
        InitLevel::Editor => (initialize_level::<L, 3> as InitLevelFn, deinitialize_level::<L, 3> as InitLevelFn),
    }
}

// ============================================================================
// Level callbacks
// ============================================================================

unsafe extern "C" fn initialize_level<L: ExtensionLibrary, const LEVEL: usize>(_userdata: *mut c_void) {
    let level = InitLevel::ALL[LEVEL];
    let Some((_, classes)) = classes_for(level) else {
        log::warn!("Initialization level {level:?} reached before the entry point ran");
        return;
    };

    for pending in &classes {
        if let Err(err) = (pending.register)() {
            guard::report_failure(&format!("register_class({})", pending.name), &err);
        }
    }

    if let Err(err) = guard::guarded(|| {
        L::on_init(level);
        Ok(())
    }) {
        guard::report_failure("on_init", &err);
    }
    log::debug!("Initialized level {level:?} ({} classes)", classes.len());
}

unsafe extern "C" fn deinitialize_level<L: ExtensionLibrary, const LEVEL: usize>(_userdata: *mut c_void) {
    let level = InitLevel::ALL[LEVEL];

    if let Err(err) = guard::guarded(|| {
        L::on_deinit(level);
        Ok(())
    }) {
        guard::report_failure("on_deinit", &err);
    }

    let Some((config, classes)) = classes_for(level) else {
        return;
    };
    let last = level == config.minimum_init_level;

    // Leaked host instances are freed while their class still exists.
    if last {
        let report = HandleTable::global().teardown(config.report_leaks);
        log::debug!("{} leftover handles released", report.released);
    }

    for pending in classes.iter().rev() {
        if !class::is_registered(pending.name) {
            continue;
        }
        if let Err(err) = class::unregister_class(pending.name) {
            guard::report_failure(&format!("unregister_class({})", pending.name), &err);
        }
    }

    if last {
        shutdown();
    }
    log::debug!("Deinitialized level {level:?}");
}

/// Final deinitialization: nothing of the bridge survives it
fn shutdown() {
    let leftover = class::unregister_all();
    if leftover > 0 {
        log::warn!("{leftover} classes were still registered at shutdown");
    }
    registry::reset();
    *state().lock() = None;
    log::debug!("Extension shut down");
}

/// Export the entry symbol the engine looks up when loading the library
///
/// ```ignore
/// ext_entry_point!(game_library_init, Game);
/// ```
#[macro_export]
macro_rules! ext_entry_point {
    ($symbol:ident, $library:ty) => {
        #[no_mangle]
        pub unsafe extern "C" fn $symbol(
            get_proc_address: $crate::sys::GetProcAddressFn,
            library: $crate::sys::ClassLibraryPtr,
            init: *mut $crate::sys::FfiInitialization,
        ) -> $crate::sys::Bool {
            $crate::init::entry_point::<$library>(get_proc_address, library, init)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;
    impl ExtensionLibrary for Empty {}

    #[test]
    fn test_registrar_starts_empty() {
        let mut registrar = ClassRegistrar::default();
        Empty::register_classes(&mut registrar);
        assert!(registrar.is_empty());
    }

    #[test]
    fn test_null_init_is_rejected() {
        unsafe extern "C" fn resolve(_name: *const std::ffi::c_char) -> Option<void_ext_sys::InterfaceFn> {
            None
        }
        let code = unsafe { entry_point::<Empty>(resolve, std::ptr::null_mut(), std::ptr::null_mut()) };
        assert_eq!(code, LOAD_FAILED);
    }
}
