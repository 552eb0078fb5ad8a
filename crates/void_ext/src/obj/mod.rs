//! Engine objects
//!
//! [`Gd`] is the host's handle to an engine object. Every handle owns one
//! slot in the global [`HandleTable`](crate::handles::HandleTable), and the
//! slot's regime decides what dropping the handle does to the object.
//!
//! Classes form a static hierarchy through [`EngineClass::Parent`];
//! [`Inherits`] lets one typed facade serve a class and all its descendants.

mod classes;
mod gd;

use void_ext_sys::{try_interface, ObjectPtr, VariantType};

use crate::call;
use crate::handles::{Regime, Releaser};
use crate::registry;

pub use classes::{Engine, Node, Node2D, Object, RefCounted, Resource};
pub use gd::Gd;

// ============================================================================
// Class hierarchy
// ============================================================================

/// Signature of a virtual method a class lets subclasses override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualSignature {
    /// Engine name, with its leading underscore
    pub name: &'static str,
    pub args: &'static [VariantType],
    /// `None` for a virtual returning nothing
    pub ret: Option<VariantType>,
}

/// A class known to the engine
pub trait EngineClass: 'static {
    /// Engine name of the class
    const CLASS_NAME: &'static str;

    /// Nearest class built into the engine; the class itself for engine classes
    const ENGINE_BASE: &'static str;

    /// Virtual methods this class declares (not inherited ones)
    const VIRTUALS: &'static [VirtualSignature] = &[];

    /// Direct parent; `Object` is its own parent
    type Parent: EngineClass;
}

/// `Self` is `Base` or derives from it
///
/// # Safety
/// Only implement when the engine hierarchy agrees; facade methods of `Base`
/// are called on objects of `Self` without a runtime check.
pub unsafe trait Inherits<Base: EngineClass>: EngineClass {}

/// Find the virtual `name` declared by `T` or one of its ancestors
pub fn find_virtual<T: EngineClass>(name: &str) -> Option<&'static VirtualSignature> {
    if let Some(signature) = T::VIRTUALS.iter().find(|v| v.name == name) {
        return Some(signature);
    }
    if T::CLASS_NAME == Object::CLASS_NAME {
        return None;
    }
    find_virtual::<T::Parent>(name)
}

// ============================================================================
// Releasing
// ============================================================================

/// Engine side of a handle release
pub(crate) struct EngineReleaser;

impl Releaser for EngineReleaser {
    fn release(&self, handle: usize, regime: Regime) {
        if try_interface().is_none() {
            return;
        }
        let ptr = handle as ObjectPtr;
        match regime {
            Regime::RefCounted => match unreference(ptr) {
                Ok(true) => destroy(ptr),
                Ok(false) => {}
                Err(err) => log::error!("Failed to release reference {:#x}: {}", handle, err),
            },
            Regime::Exclusive => destroy(ptr),
            Regime::Borrowed(_) | Regime::Singleton => {}
        }
    }
}

pub(crate) fn destroy(ptr: ObjectPtr) {
    if let Some(iface) = try_interface() {
        unsafe { (iface.object_destroy)(ptr) };
    }
}

// ========== Reference counting ==========

/// Set the count of a freshly constructed object to one
pub(crate) fn init_ref(ptr: ObjectPtr) -> crate::Result<bool> {
    call::ptrcall(registry::bind_method("RefCounted", "init_ref")?, ptr, ())
}

/// Add one reference
pub(crate) fn reference(ptr: ObjectPtr) -> crate::Result<bool> {
    call::ptrcall(registry::bind_method("RefCounted", "reference")?, ptr, ())
}

/// Drop one reference; true when the object must be destroyed
pub(crate) fn unreference(ptr: ObjectPtr) -> crate::Result<bool> {
    call::ptrcall(registry::bind_method("RefCounted", "unreference")?, ptr, ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_found_on_ancestor() {
        let process = find_virtual::<Node2D>("_process");
        assert_eq!(process.map(|v| v.args), Some(&[VariantType::Float][..]));
        assert!(find_virtual::<Node2D>("_setup_local_to_scene").is_none());
        assert!(find_virtual::<Resource>("_setup_local_to_scene").is_some());
    }

    #[test]
    fn test_object_terminates_lookup() {
        assert!(find_virtual::<Object>("_ready").is_none());
        assert!(find_virtual::<RefCounted>("_process").is_none());
    }
}
