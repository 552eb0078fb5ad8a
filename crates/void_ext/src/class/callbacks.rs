//! Inbound entry points the engine calls on host classes
//!
//! Every function here is handed to the engine at registration. None of them
//! may unwind: bodies run under [`guard::guarded`], failures go to the error
//! sink and the engine receives the default for the declared return.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use void_ext_sys::{
    interface, Bool, CallErrorKind, ClassCallVirtualFn, ClassInstancePtr, ConstStringNamePtr, ConstTypePtr,
    ConstVariantPtr, FfiCallError, FfiPropertyInfo, Int, ObjectPtr, OpaqueString, StringPtr, TypePtr, VariantPtr,
    FALSE, TRUE,
};

use super::builder::MAX_VIRTUALS;
use super::register::{self, ClassDescriptor, OwnedPropertyInfo};
use super::storage::{header_of, InstanceStorage};
use super::{with_instance, with_instance_mut, Base, HostClass};
use crate::builtin::{GString, StringName, Variant};
use crate::error::{BridgeError, Result};
use crate::guard;
use crate::handles::{HandleTable, Regime, ScopeId};
use crate::obj::{self, EngineClass};
use crate::registry;

fn instance_descriptor(instance: ClassInstancePtr) -> Option<Arc<ClassDescriptor>> {
    let header = unsafe { header_of(instance)? };
    register::descriptor(header.class_id)
}

fn qualified(class: &str, member: &str) -> String {
    format!("{class}.{member}")
}

// ============================================================================
// Instance lifecycle
// ============================================================================

/// Allocate the engine base object and attach a fresh host value to it
pub(crate) unsafe extern "C" fn create_instance<T: HostClass>(class_userdata: *mut c_void) -> ObjectPtr {
    match guard::guarded(|| create::<T>(class_userdata as usize as u32)) {
        Ok(object) => object,
        Err(err) => {
            guard::report_failure(&qualified(T::NAME, "init"), &err);
            ptr::null_mut()
        }
    }
}

fn create<T: HostClass>(class_id: u32) -> Result<ObjectPtr> {
    let iface = interface();
    let base = registry::construct_raw(T::ENGINE_BASE)?;
    let id = unsafe { (iface.object_get_instance_id)(base) };
    let table = HandleTable::global();
    let base_slot = match table.track(base as usize, Regime::Borrowed(ScopeId::ENGINE)) {
        Ok(slot) => slot,
        Err(err) => {
            obj::destroy(base);
            return Err(err);
        }
    };

    let value = match guard::guarded(|| Ok(T::init(Base::new(base, id)))) {
        Ok(value) => value,
        Err(err) => {
            let _ = table.forget(base_slot);
            obj::destroy(base);
            return Err(err);
        }
    };

    let storage = Box::into_raw(InstanceStorage::new(class_id, base, base_slot, value));
    let name = StringName::from(T::NAME);
    unsafe { (iface.object_set_instance)(base, name.sys(), storage as ClassInstancePtr) };

    if let Some(descriptor) = register::descriptor(class_id) {
        descriptor.live.fetch_add(1, Ordering::AcqRel);
    }
    log::trace!("Created {} instance #{id}", T::NAME);
    Ok(base)
}

/// Drop the host value; the engine frees the base object itself
pub(crate) unsafe extern "C" fn free_instance<T: HostClass>(class_userdata: *mut c_void, instance: ClassInstancePtr) {
    let result = guard::guarded(|| {
        InstanceStorage::<T>::from_instance(instance)?;
        let storage = Box::from_raw(instance as *mut InstanceStorage<T>);
        let _ = HandleTable::global().forget(storage.base_slot);
        drop(storage);
        Ok(())
    });
    match result {
        Ok(()) => {
            if let Some(descriptor) = register::descriptor(class_userdata as usize as u32) {
                descriptor.live.fetch_sub(1, Ordering::AcqRel);
            }
        }
        Err(err) => guard::report_failure(&qualified(T::NAME, "free"), &err),
    }
}

// ============================================================================
// Methods
// ============================================================================

fn method_target(method_userdata: *mut c_void) -> Result<(Arc<ClassDescriptor>, usize)> {
    let (class_id, index) = register::split_method_key(method_userdata as usize);
    let descriptor = register::descriptor(class_id)
        .filter(|d| index < d.methods.len())
        .ok_or_else(|| BridgeError::NoSuchMethod { class: format!("#{class_id}"), method: format!("#{index}") })?;
    Ok((descriptor, index))
}

/// Vararg call of a registered method
pub(crate) unsafe extern "C" fn method_call(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
) {
    let (descriptor, index) = match method_target(method_userdata) {
        Ok(target) => target,
        Err(err) => {
            guard::report_failure("method_call", &err);
            guard::write_call_error(error, &err);
            return;
        }
    };
    let method = &descriptor.methods[index];
    let argv = Variant::borrow_args(args, argc);

    match guard::guarded(|| (method.varcall)(instance, &argv)) {
        Ok(value) => {
            Variant::assign_into(ret, value);
            if !error.is_null() {
                *error = FfiCallError::OK;
            }
        }
        Err(err) => {
            if !guard::is_argument_error(&err) {
                guard::report_failure(&qualified(descriptor.name, &method.name), &err);
            }
            guard::write_call_error(error, &err);
        }
    }
}

/// Pointer call of a registered method; `ret` is uninitialized on entry
pub(crate) unsafe extern "C" fn method_ptrcall(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    let (descriptor, index) = match method_target(method_userdata) {
        Ok(target) => target,
        Err(err) => {
            guard::report_failure("method_ptrcall", &err);
            return;
        }
    };
    let method = &descriptor.methods[index];

    if let Err(err) = guard::guarded(|| (method.ptrcall)(instance, args, ret)) {
        guard::report_failure(&qualified(descriptor.name, &method.name), &err);
        (method.write_default)(ret);
    }
}

// ============================================================================
// Virtuals
// ============================================================================

unsafe extern "C" fn call_virtual<const I: usize>(instance: ClassInstancePtr, args: *const ConstTypePtr, ret: TypePtr) {
    let Some(descriptor) = instance_descriptor(instance) else {
        guard::report_failure(
            "call_virtual",
            &BridgeError::CallError {
                method: format!("virtual #{I}"),
                kind: CallErrorKind::InstanceIsNull,
                argument: 0,
                expected: 0,
            },
        );
        return;
    };
    let Some(entry) = descriptor.virtuals.get(I) else {
        return;
    };
    if let Err(err) = guard::guarded(|| (entry.call)(instance, args, ret)) {
        guard::report_failure(&qualified(descriptor.name, &entry.name), &err);
        (entry.write_default)(ret);
    }
}

macro_rules! virtual_trampolines {
    ($($index:literal)*) => {
        [$(call_virtual::<$index> as ClassCallVirtualFn),*]
    };
}

/// One monomorphized entry per override slot
static VIRTUAL_TRAMPOLINES: [ClassCallVirtualFn; MAX_VIRTUALS] = virtual_trampolines!(
    0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
    16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
);

/// Resolve a virtual the engine is about to call; `None` if not overridden
pub(crate) unsafe extern "C" fn get_virtual(
    class_userdata: *mut c_void,
    name: ConstStringNamePtr,
) -> Option<ClassCallVirtualFn> {
    let result = guard::guarded(|| {
        let name = StringName::read_sys(name);
        let index = register::descriptor(class_userdata as usize as u32)
            .and_then(|d| d.virtuals.iter().position(|v| v.name == name));
        Ok(index.and_then(|i| VIRTUAL_TRAMPOLINES.get(i).copied()))
    });
    match result {
        Ok(found) => found,
        Err(err) => {
            guard::report_failure("get_virtual", &err);
            None
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

pub(crate) unsafe extern "C" fn set_property(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    value: ConstVariantPtr,
) -> Bool {
    let Some(descriptor) = instance_descriptor(instance) else {
        return FALSE;
    };
    let name = StringName::read_sys(name);
    let Some(property) = descriptor.properties.iter().find(|p| p.name == name) else {
        return FALSE;
    };
    if value.is_null() {
        return FALSE;
    }
    let value = Variant::borrow_sys(value);
    match guard::guarded(|| (property.set)(instance, value)) {
        Ok(()) => TRUE,
        Err(err) => {
            guard::report_failure(&qualified(descriptor.name, &property.name), &err);
            FALSE
        }
    }
}

pub(crate) unsafe extern "C" fn get_property(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    ret: VariantPtr,
) -> Bool {
    let Some(descriptor) = instance_descriptor(instance) else {
        return FALSE;
    };
    let name = StringName::read_sys(name);
    let Some(property) = descriptor.properties.iter().find(|p| p.name == name) else {
        return FALSE;
    };
    match guard::guarded(|| (property.get)(instance)) {
        Ok(value) => {
            Variant::assign_into(ret, value);
            TRUE
        }
        Err(err) => {
            guard::report_failure(&qualified(descriptor.name, &property.name), &err);
            FALSE
        }
    }
}

/// Property list handed out to the engine, alive until it is freed
struct PropertyList {
    _owned: Vec<OwnedPropertyInfo>,
    _infos: Vec<FfiPropertyInfo>,
}

thread_local! {
    static PROPERTY_LISTS: RefCell<HashMap<usize, PropertyList>> = RefCell::new(HashMap::new());
}

pub(crate) unsafe extern "C" fn get_property_list(instance: ClassInstancePtr, count: *mut u32) -> *const FfiPropertyInfo {
    let descriptor = instance_descriptor(instance);
    let properties = descriptor.as_ref().map_or(&[][..], |d| d.properties.as_slice());

    let mut owned: Vec<OwnedPropertyInfo> =
        properties.iter().map(|p| OwnedPropertyInfo::new(&p.name, p.info, &p.hint)).collect();
    let infos: Vec<FfiPropertyInfo> = owned.iter_mut().map(OwnedPropertyInfo::as_ffi).collect();
    if !count.is_null() {
        *count = infos.len() as u32;
    }
    if infos.is_empty() {
        return ptr::null();
    }

    let list = infos.as_ptr();
    PROPERTY_LISTS.with(|lists| {
        lists.borrow_mut().insert(list as usize, PropertyList { _owned: owned, _infos: infos });
    });
    list
}

pub(crate) unsafe extern "C" fn free_property_list(_instance: ClassInstancePtr, list: *const FfiPropertyInfo) {
    if list.is_null() {
        return;
    }
    let freed = PROPERTY_LISTS.with(|lists| lists.borrow_mut().remove(&(list as usize)));
    if freed.is_none() {
        log::warn!("Engine freed a property list the bridge did not hand out");
    }
}

// ============================================================================
// Notifications and text
// ============================================================================

pub(crate) unsafe extern "C" fn notification<T: HostClass>(instance: ClassInstancePtr, what: i32, _reversed: Bool) {
    let result = guard::guarded(|| {
        with_instance_mut::<T, _>(instance, |this| {
            this.notification(what);
            Ok(())
        })
    });
    if let Err(err) = result {
        guard::report_failure(&qualified(T::NAME, "notification"), &err);
    }
}

/// Writes into `out` only when the host provides text
pub(crate) unsafe extern "C" fn to_string<T: HostClass>(instance: ClassInstancePtr, is_valid: *mut Bool, out: StringPtr) {
    let result = guard::guarded(|| with_instance::<T, _>(instance, |this| Ok(this.to_string())));
    let valid = match result {
        Ok(Some(text)) if !out.is_null() => {
            ptr::write(out as *mut OpaqueString, GString::from(text.as_str()).into_opaque());
            TRUE
        }
        Ok(_) => FALSE,
        Err(err) => {
            guard::report_failure(&qualified(T::NAME, "to_string"), &err);
            FALSE
        }
    };
    if !is_valid.is_null() {
        *is_valid = valid;
    }
}
