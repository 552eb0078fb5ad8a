//! Loading an extension into the mock engine
//!
//! Drives an entry point the way the engine does: resolve, fill the
//! initialization structure, then run the level callbacks in order.

use std::result::Result;

use parking_lot::{Mutex, MutexGuard};
use void_ext_sys::*;

use crate::interface::get_proc_address;

/// Signature of an extension entry point
pub type EntryFn =
    unsafe extern "C" fn(get_proc_address: GetProcAddressFn, library: ClassLibraryPtr, init: *mut FfiInitialization) -> Bool;

static LIBRARY_TOKEN: u8 = 0;

/// Token the mock engine hands to every extension it loads
pub fn library_token() -> ClassLibraryPtr {
    &LIBRARY_TOKEN as *const u8 as ClassLibraryPtr
}

/// Serializes tests that drive process-wide extension state
pub fn exclusive() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock()
}

/// An extension whose entry point succeeded
///
/// Dropping it runs the deinitialization callbacks for every level that was
/// initialized, in reverse order.
pub struct LoadedExtension {
    init: FfiInitialization,
    initialized: Vec<InitLevel>,
}

/// Call `entry` and initialize every level the extension asks for
///
/// Returns the entry point's nonzero code on failure.
pub fn load_extension(entry: EntryFn) -> Result<LoadedExtension, Bool> {
    let mut init = FfiInitialization::default();
    let code = unsafe { entry(get_proc_address, library_token(), &mut init) };
    if code != 0 {
        log::debug!("Extension entry point failed with code {code}");
        return Err(code);
    }

    let mut extension = LoadedExtension { init, initialized: Vec::new() };
    for level in InitLevel::ALL {
        extension.initialize(level);
    }
    Ok(extension)
}

impl LoadedExtension {
    /// Minimum engine version requested by the extension
    pub fn minimum_version(&self) -> (u32, u32, u32) {
        let v = self.init.minimum_version;
        (v.major, v.minor, v.patch)
    }

    /// Levels initialized so far, in order
    pub fn initialized_levels(&self) -> &[InitLevel] {
        &self.initialized
    }

    fn initialize(&mut self, level: InitLevel) {
        if self.initialized.contains(&level) {
            return;
        }
        if let Some(callback) = self.init.initialize[level.index()] {
            unsafe { callback(self.init.userdata) };
        }
        self.initialized.push(level);
    }

    /// Run every deinitialization level
    pub fn unload(self) {
        drop(self);
    }
}

impl Drop for LoadedExtension {
    fn drop(&mut self) {
        while let Some(level) = self.initialized.pop() {
            if let Some(callback) = self.init.deinitialize[level.index()] {
                unsafe { callback(self.init.userdata) };
            }
        }
    }
}
