//! Outbound registry
//!
//! Resolves engine method binds, class tags and singletons by name. Every
//! successful lookup is cached for the life of the library; failed lookups
//! are never cached, so a class registered later still resolves.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;
use void_ext_sys::{interface, ClassTagPtr, MethodBindPtr, ObjectId, ObjectPtr};

use crate::builtin::StringName;
use crate::error::{BridgeError, Result};

/// Resolved engine method bind
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodBind(usize);

impl MethodBind {
    #[inline]
    pub fn as_ptr(self) -> MethodBindPtr {
        self.0 as MethodBindPtr
    }
}

impl fmt::Debug for MethodBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodBind({:#x})", self.0)
    }
}

#[derive(Default)]
struct Registry {
    binds: RwLock<HashMap<(String, String), MethodBind>>,
    tags: RwLock<HashMap<String, usize>>,
    /// Pointer and instance id of each resolved singleton
    singletons: RwLock<HashMap<String, (usize, ObjectId)>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

// ========== Method binds ==========

/// Method bind of `class.method`
pub fn bind_method(class: &str, method: &str) -> Result<MethodBind> {
    let key = (class.to_owned(), method.to_owned());
    if let Some(bind) = registry().binds.read().get(&key) {
        return Ok(*bind);
    }

    let class_name = StringName::from(class);
    let method_name = StringName::from(method);
    let ptr = unsafe { (interface().classdb_get_method_bind)(class_name.sys(), method_name.sys(), 0) };
    if ptr.is_null() {
        return Err(BridgeError::NoSuchMethod { class: key.0, method: key.1 });
    }

    // Two threads may race to resolve the same bind; both get the same pointer.
    let bind = *registry().binds.write().entry(key).or_insert(MethodBind(ptr as usize));
    Ok(bind)
}

/// Number of method binds resolved so far
pub fn cached_bind_count() -> usize {
    registry().binds.read().len()
}

// ========== Classes ==========

/// Class tag of `class`, used for casts
pub fn class_tag(class: &str) -> Result<ClassTagPtr> {
    if let Some(tag) = registry().tags.read().get(class) {
        return Ok(*tag as ClassTagPtr);
    }
    let name = StringName::from(class);
    let tag = unsafe { (interface().classdb_get_class_tag)(name.sys()) };
    if tag.is_null() {
        return Err(BridgeError::NoSuchClass(class.to_owned()));
    }
    registry().tags.write().insert(class.to_owned(), tag as usize);
    Ok(tag)
}

/// Whether the engine knows `class`
pub fn class_exists(class: &str) -> bool {
    class_tag(class).is_ok()
}

/// Drop everything cached about `class`
pub(crate) fn forget_class(class: &str) {
    registry().tags.write().remove(class);
    registry().binds.write().retain(|(owner, _), _| owner != class);
}

/// Construct a new engine object of `class`, untracked
///
/// Use [`Gd::construct`](crate::obj::Gd::construct) for a tracked handle.
pub fn construct_raw(class: &str) -> Result<ObjectPtr> {
    let name = StringName::from(class);
    let ptr = unsafe { (interface().classdb_construct_object)(name.sys()) };
    if ptr.is_null() {
        Err(BridgeError::NoSuchClass(class.to_owned()))
    } else {
        Ok(ptr)
    }
}

/// The engine singleton named `class`, untracked
///
/// A cached entry is revalidated through its instance id, never by touching
/// the cached pointer; a singleton the engine replaced is looked up again.
pub fn singleton_raw(class: &str) -> Result<ObjectPtr> {
    let cached = registry().singletons.read().get(class).copied();
    if let Some((ptr, id)) = cached {
        let ptr = ptr as ObjectPtr;
        if unsafe { (interface().object_get_instance_from_id)(id) } == ptr {
            return Ok(ptr);
        }
    }
    let name = StringName::from(class);
    let ptr = unsafe { (interface().global_get_singleton)(name.sys()) };
    if ptr.is_null() {
        registry().singletons.write().remove(class);
        return Err(BridgeError::NoSuchClass(class.to_owned()));
    }
    let id = unsafe { (interface().object_get_instance_id)(ptr) };
    registry().singletons.write().insert(class.to_owned(), (ptr as usize, id));
    Ok(ptr)
}

/// Instance id recorded for a cached singleton
pub fn cached_singleton_id(class: &str) -> Option<ObjectId> {
    registry().singletons.read().get(class).map(|(_, id)| *id)
}

/// Whether `object` derives from RefCounted
pub(crate) fn is_ref_counted(object: ObjectPtr) -> bool {
    match class_tag("RefCounted") {
        Ok(tag) => !unsafe { (interface().object_cast_to)(object, tag) }.is_null(),
        Err(_) => false,
    }
}

/// Size in bytes of an engine native structure; 0 if unknown
pub fn native_struct_size(name: &str) -> u64 {
    let name = StringName::from(name);
    unsafe { (interface().get_native_struct_size)(name.sys()) }
}

/// Clear every cache; the next lookup goes to the engine again
pub(crate) fn reset() {
    let registry = registry();
    registry.binds.write().clear();
    registry.tags.write().clear();
    registry.singletons.write().clear();
    crate::builtin::reset_method_cache();
}
