//! Callables and signals
//!
//! A custom callable is host code the engine can invoke. Its closure lives in
//! a generation-tagged table on the host; the engine only holds the table key
//! as userdata and calls back through the trampolines below. The engine
//! frees the entry through `free` when its last copy of the callable dies.

use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use void_ext_sys::{
    interface, library, Bool, CallErrorKind, ConstTypePtr, ConstVariantPtr, FfiCallError, FfiCallableCustomInfo, Int,
    ObjectId, ObjectPtr, OpaqueCallable, OpaqueSignal, OpaqueString, StringPtr, VariantPtr, FALSE, TRUE,
};

use super::{builtin_equal, call_builtin, impl_builtin, GString, StringName, Variant};
use crate::class::{with_instance_mut, HostClass};
use crate::error::{BridgeError, Result};
use crate::guard;
use crate::meta::ToVariant;
use crate::obj::{EngineClass, Gd};

/// Host closure behind a custom callable
pub type CallableFn = dyn Fn(&[&Variant]) -> Result<Variant> + Send + Sync;

// ============================================================================
// Callable table
// ============================================================================

struct CallableEntry {
    name: String,
    object_id: ObjectId,
    func: Box<CallableFn>,
}

struct TableSlot {
    generation: u32,
    entry: Option<Arc<CallableEntry>>,
}

#[derive(Default)]
struct CallableTable {
    slots: Vec<TableSlot>,
    free: Vec<u32>,
    len: usize,
}

impl CallableTable {
    fn insert(&mut self, entry: CallableEntry) -> u64 {
        let entry = Some(Arc::new(entry));
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = entry;
                key(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(TableSlot { generation: 0, entry });
                key(index, 0)
            }
        }
    }

    fn get(&self, key: u64) -> Option<Arc<CallableEntry>> {
        let (index, generation) = split(key);
        let slot = self.slots.get(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.entry.clone()
    }

    fn remove(&mut self, key: u64) -> Option<Arc<CallableEntry>> {
        let (index, generation) = split(key);
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(entry)
    }
}

#[inline]
fn key(index: u32, generation: u32) -> u64 {
    (generation as u64) << 32 | index as u64
}

#[inline]
fn split(key: u64) -> (u32, u32) {
    (key as u32, (key >> 32) as u32)
}

fn table() -> &'static Mutex<CallableTable> {
    static TABLE: OnceLock<Mutex<CallableTable>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(CallableTable::default()))
}

// Userdata is key + 1 so that a valid key is never a null pointer.
fn userdata_of(key: u64) -> *mut c_void {
    (key as usize + 1) as *mut c_void
}

fn key_of(userdata: *mut c_void) -> Option<u64> {
    (userdata as usize).checked_sub(1).map(|k| k as u64)
}

fn lookup(userdata: *mut c_void) -> Option<Arc<CallableEntry>> {
    let key = key_of(userdata)?;
    // The lock is released before the entry runs; a callable may create or
    // drop other callables from inside its body.
    table().lock().get(key)
}

/// Number of custom callables the engine still holds
pub fn callable_table_len() -> usize {
    table().lock().len
}

// ========== Trampolines ==========

unsafe extern "C" fn custom_call(
    userdata: *mut c_void,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
) {
    let Some(entry) = lookup(userdata) else {
        if !error.is_null() {
            *error = FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0);
        }
        return;
    };
    let argv = Variant::borrow_args(args, argc);
    match guard::guarded(|| (entry.func)(&argv)) {
        Ok(value) => Variant::assign_into(ret, value),
        Err(err) => {
            if !guard::is_argument_error(&err) {
                guard::report_failure(&entry.name, &err);
            }
            guard::write_call_error(error, &err);
        }
    }
}

unsafe extern "C" fn custom_is_valid(userdata: *mut c_void) -> Bool {
    let Some(entry) = lookup(userdata) else { return FALSE };
    if entry.object_id != 0 && (interface().object_get_instance_from_id)(entry.object_id).is_null() {
        return FALSE;
    }
    TRUE
}

unsafe extern "C" fn custom_free(userdata: *mut c_void) {
    let Some(key) = key_of(userdata) else { return };
    let removed = table().lock().remove(key);
    match removed {
        Some(entry) => log::trace!("Freed callable '{}'", entry.name),
        None => log::warn!("Engine freed unknown callable {:#x}", userdata as usize),
    }
}

unsafe extern "C" fn custom_to_string(userdata: *mut c_void, is_valid: *mut Bool, out: StringPtr) {
    let Some(entry) = lookup(userdata) else {
        if !is_valid.is_null() {
            *is_valid = FALSE;
        }
        return;
    };
    if !out.is_null() {
        ptr::write(out as *mut OpaqueString, GString::from(entry.name.as_str()).into_opaque());
    }
    if !is_valid.is_null() {
        *is_valid = TRUE;
    }
}

// ============================================================================
// Callable
// ============================================================================

impl_builtin!(
    /// Something the engine can invoke: an object method or host code
    Callable,
    OpaqueCallable,
    Callable
);

impl Callable {
    fn from_entry(entry: CallableEntry) -> Self {
        let object_id = entry.object_id;
        let key = table().lock().insert(entry);
        let mut info = FfiCallableCustomInfo {
            callable_userdata: userdata_of(key),
            token: library(),
            object_id,
            call_func: Some(custom_call),
            is_valid_func: Some(custom_is_valid),
            free_func: Some(custom_free),
            to_string_func: Some(custom_to_string),
        };
        unsafe { Self::new_with(|out| (interface().callable_custom_create)(out, &mut info)) }
    }

    /// Callable running a host closure
    ///
    /// `name` is what the engine prints for this callable.
    pub fn from_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[&Variant]) -> Result<Variant> + Send + Sync + 'static,
    {
        Self::from_entry(CallableEntry { name: name.to_owned(), object_id: 0, func: Box::new(f) })
    }

    /// Callable bound to a host instance
    ///
    /// Only the instance id is captured. The callable reports itself invalid
    /// once the object is gone, and the engine stops invoking it.
    pub fn from_instance_method<T, F>(object: &Gd<T>, name: &str, f: F) -> Result<Self>
    where
        T: HostClass,
        F: Fn(&mut T, &[&Variant]) -> Result<Variant> + Send + Sync + 'static,
    {
        let object_id = object.instance_id()?;
        let method = name.to_owned();
        let func = move |args: &[&Variant]| {
            let ptr = unsafe { (interface().object_get_instance_from_id)(object_id) };
            if ptr.is_null() {
                return Err(BridgeError::CallError {
                    method: method.clone(),
                    kind: CallErrorKind::InstanceIsNull,
                    argument: 0,
                    expected: 0,
                });
            }
            let instance = unsafe { (interface().object_get_instance)(ptr) };
            with_instance_mut::<T, _>(instance, |this| f(this, args))
        };
        Ok(Self::from_entry(CallableEntry { name: name.to_owned(), object_id, func: Box::new(func) }))
    }

    /// Callable naming a method on an engine object
    pub fn from_object_method<T: EngineClass>(object: &Gd<T>, method: &str) -> Result<Self> {
        let ptr: ObjectPtr = object.raw()?;
        let method = StringName::from(method);
        let args: [ConstTypePtr; 2] = [&ptr as *const ObjectPtr as ConstTypePtr, method.sys()];
        Ok(unsafe { Self::construct(2, &args) })
    }

    /// Invoke through the engine
    pub fn call(&self, args: &[Variant]) -> Result<Variant> {
        self.to_variant().call("call", args)
    }

    pub fn is_valid(&self) -> bool {
        call_builtin::<(), bool>(Self::TYPE, "is_valid", self.sys() as _, ()).unwrap_or(false)
    }

    /// Whether this callable runs host code
    pub fn is_custom(&self) -> bool {
        call_builtin::<(), bool>(Self::TYPE, "is_custom", self.sys() as _, ()).unwrap_or(false)
    }

    /// Instance id of the bound object; 0 when unbound
    pub fn object_id(&self) -> ObjectId {
        call_builtin::<(), i64>(Self::TYPE, "get_object_id", self.sys() as _, ()).unwrap_or(0) as ObjectId
    }

    /// Method name of an object-method callable; empty for custom callables
    pub fn method_name(&self) -> StringName {
        call_builtin::<(), StringName>(Self::TYPE, "get_method", self.sys() as _, ()).unwrap_or_default()
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        builtin_equal(Self::TYPE, self.sys(), other.sys())
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.to_variant().stringify())
    }
}

// ============================================================================
// Signal
// ============================================================================

impl_builtin!(
    /// A named signal on one object
    Signal,
    OpaqueSignal,
    Signal
);

impl Signal {
    /// Signal `name` of `object`
    pub fn new<T: EngineClass>(object: &Gd<T>, name: &str) -> Result<Self> {
        let ptr: ObjectPtr = object.raw()?;
        let name = StringName::from(name);
        let args: [ConstTypePtr; 2] = [&ptr as *const ObjectPtr as ConstTypePtr, name.sys()];
        Ok(unsafe { Self::construct(2, &args) })
    }

    pub fn name(&self) -> StringName {
        call_builtin::<(), StringName>(Self::TYPE, "get_name", self.sys() as _, ()).unwrap_or_default()
    }

    /// Instance id of the emitting object
    pub fn object_id(&self) -> ObjectId {
        call_builtin::<(), i64>(Self::TYPE, "get_object_id", self.sys() as _, ()).unwrap_or(0) as ObjectId
    }

    fn object(&self) -> Result<ObjectPtr> {
        let ptr = unsafe { (interface().object_get_instance_from_id)(self.object_id()) };
        if ptr.is_null() {
            Err(BridgeError::CallError {
                method: self.name().to_string(),
                kind: CallErrorKind::InstanceIsNull,
                argument: 0,
                expected: 0,
            })
        } else {
            Ok(ptr)
        }
    }

    /// Connect `callable`; the engine rejects unknown signals and duplicates
    pub fn connect(&self, callable: &Callable) -> Result<()> {
        crate::call::object_connect(self.object()?, &self.name(), callable, 0)
    }

    /// Invoke every connected callable in connection order
    pub fn emit(&self, args: &[Variant]) -> Result<()> {
        crate::call::object_emit(self.object()?, &self.name(), args)
    }
}

impl PartialEq for Signal {
    fn eq(&self, other: &Self) -> bool {
        builtin_equal(Self::TYPE, self.sys(), other.sys())
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signal({}, #{})", self.name(), self.object_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> CallableEntry {
        CallableEntry { name: name.to_owned(), object_id: 0, func: Box::new(|_| Err(BridgeError::NotInitialized)) }
    }

    #[test]
    fn test_table_reuses_slots_with_new_generation() {
        let mut table = CallableTable::default();
        let first = table.insert(entry("a"));
        assert_eq!(table.len, 1);
        assert!(table.remove(first).is_some());
        assert_eq!(table.len, 0);

        let second = table.insert(entry("b"));
        assert_ne!(first, second);
        assert_eq!(split(first).0, split(second).0);
        assert!(table.get(first).is_none());
        assert_eq!(table.get(second).map(|e| e.name.clone()), Some("b".to_owned()));
    }

    #[test]
    fn test_double_remove_is_ignored() {
        let mut table = CallableTable::default();
        let key = table.insert(entry("a"));
        assert!(table.remove(key).is_some());
        assert!(table.remove(key).is_none());
        assert_eq!(table.len, 0);
    }

    #[test]
    fn test_userdata_is_never_null() {
        assert!(!userdata_of(0).is_null());
        assert_eq!(key_of(userdata_of(0)), Some(0));
        assert_eq!(key_of(ptr::null_mut()), None);
    }
}
