//! Publishing host classes to the engine's class database

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use void_ext_sys::{
    interface, library, FfiClassCreationInfo, FfiClassMethodInfo, FfiPropertyInfo, InitLevel, VariantType, FALSE,
    PROPERTY_USAGE_DEFAULT, PROPERTY_USAGE_NIL_IS_VARIANT, TRUE,
};

use super::builder::{ClassBuilder, MethodEntry, PropertyEntry, PropertyHint, SignalEntry, VirtualEntry};
use super::{callbacks, HostClass};
use crate::builtin::{GString, StringName};
use crate::error::{BridgeError, Result};
use crate::guard;
use crate::meta::ParamInfo;
use crate::obj::EngineClass;
use crate::registry;

// ============================================================================
// Descriptors
// ============================================================================

/// Everything the bridge knows about one registered class
pub(crate) struct ClassDescriptor {
    pub id: u32,
    pub name: &'static str,
    pub parent: &'static str,
    pub level: InitLevel,
    pub methods: Vec<MethodEntry>,
    pub properties: Vec<PropertyEntry>,
    pub signals: Vec<SignalEntry>,
    pub virtuals: Vec<VirtualEntry>,
    /// Instances currently alive
    pub live: AtomicUsize,
}

static NEXT_CLASS_ID: AtomicU32 = AtomicU32::new(1);

fn classes() -> &'static RwLock<Vec<Arc<ClassDescriptor>>> {
    static CLASSES: OnceLock<RwLock<Vec<Arc<ClassDescriptor>>>> = OnceLock::new();
    CLASSES.get_or_init(|| RwLock::new(Vec::new()))
}

pub(crate) fn descriptor(id: u32) -> Option<Arc<ClassDescriptor>> {
    classes().read().iter().find(|d| d.id == id).cloned()
}

fn descriptor_named(name: &str) -> Option<Arc<ClassDescriptor>> {
    classes().read().iter().find(|d| d.name == name).cloned()
}

/// Name of a registered class id
pub(crate) fn class_name(id: u32) -> Option<&'static str> {
    classes().read().iter().find(|d| d.id == id).map(|d| d.name)
}

/// Whether a host class of this name is registered
pub fn is_registered(name: &str) -> bool {
    classes().read().iter().any(|d| d.name == name)
}

/// Names of registered host classes, in registration order
pub fn registered_classes() -> Vec<&'static str> {
    classes().read().iter().map(|d| d.name).collect()
}

/// Instance count of a registered class
pub fn live_instances(name: &str) -> usize {
    descriptor_named(name).map_or(0, |d| d.live.load(Ordering::Acquire))
}

/// Whether host class `class` exports `property`; `None` if `class` is not a host class
pub(crate) fn has_property(class: &str, property: &str) -> Option<bool> {
    descriptor_named(class).map(|d| d.properties.iter().any(|p| p.name == property))
}

/// Method userdata: class id in the high half, method index in the low half
pub(crate) fn method_key(class_id: u32, index: usize) -> usize {
    (((class_id as u64) << 32) | index as u64) as usize
}

pub(crate) fn split_method_key(key: usize) -> (u32, usize) {
    let key = key as u64;
    ((key >> 32) as u32, (key & u64::from(u32::MAX)) as usize)
}

// ============================================================================
// Property metadata
// ============================================================================

/// Owned backing storage for one [`FfiPropertyInfo`]
pub(crate) struct OwnedPropertyInfo {
    ty: VariantType,
    name: StringName,
    class_name: StringName,
    hint: u32,
    hint_string: GString,
    usage: u32,
}

impl OwnedPropertyInfo {
    pub fn new(name: &str, info: ParamInfo, hint: &PropertyHint) -> Self {
        let usage = if info.ty == VariantType::Nil {
            hint.usage | PROPERTY_USAGE_NIL_IS_VARIANT
        } else {
            hint.usage
        };
        Self {
            ty: info.ty,
            name: StringName::from(name),
            class_name: StringName::from(info.class_name),
            hint: hint.hint,
            hint_string: GString::from(hint.hint_string.as_str()),
            usage,
        }
    }

    /// Raw view; valid while `self` is neither moved nor dropped
    pub fn as_ffi(&mut self) -> FfiPropertyInfo {
        FfiPropertyInfo {
            type_: self.ty.sys(),
            name: self.name.sys_mut(),
            class_name: self.class_name.sys_mut(),
            hint: self.hint,
            hint_string: self.hint_string.sys_mut(),
            usage: self.usage,
        }
    }
}

fn param_info(ty: VariantType) -> ParamInfo {
    ParamInfo { ty, class_name: "" }
}

// ============================================================================
// Registration
// ============================================================================

/// Register `T` with the engine
///
/// Fails with [`BridgeError::RegistrationConflict`] if a class of the same
/// name exists, and with [`BridgeError::NoSuchClass`] if the parent is
/// unknown to the engine.
pub fn register_class<T: HostClass>() -> Result<()> {
    if is_registered(T::NAME) || registry::class_exists(T::NAME) {
        return Err(BridgeError::RegistrationConflict(T::NAME.to_owned()));
    }
    let parent = <T::Base as EngineClass>::CLASS_NAME;
    if !registry::class_exists(parent) {
        return Err(BridgeError::NoSuchClass(parent.to_owned()));
    }

    let members = guard::guarded(|| {
        let mut builder = ClassBuilder::<T>::new();
        T::register(&mut builder);
        builder.finish()
    })?;

    let id = NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed);
    let descriptor = Arc::new(ClassDescriptor {
        id,
        name: T::NAME,
        parent,
        level: T::INIT_LEVEL,
        methods: members.methods,
        properties: members.properties,
        signals: members.signals,
        virtuals: members.virtuals,
        live: AtomicUsize::new(0),
    });
    classes().write().push(Arc::clone(&descriptor));

    let class_name = StringName::from(T::NAME);
    let parent_name = StringName::from(parent);
    let info = FfiClassCreationInfo {
        is_virtual: FALSE,
        is_abstract: if T::ABSTRACT { TRUE } else { FALSE },
        set_func: Some(callbacks::set_property),
        get_func: Some(callbacks::get_property),
        get_property_list_func: Some(callbacks::get_property_list),
        free_property_list_func: Some(callbacks::free_property_list),
        notification_func: Some(callbacks::notification::<T>),
        to_string_func: Some(callbacks::to_string::<T>),
        create_instance_func: Some(callbacks::create_instance::<T>),
        free_instance_func: Some(callbacks::free_instance::<T>),
        get_virtual_func: Some(callbacks::get_virtual),
        class_userdata: id as usize as *mut c_void,
    };
    unsafe { (interface().classdb_register_extension_class)(library(), class_name.sys(), parent_name.sys(), &info) };

    if !registry::class_exists(T::NAME) {
        classes().write().retain(|d| d.id != id);
        return Err(BridgeError::RegistrationConflict(T::NAME.to_owned()));
    }

    for (index, method) in descriptor.methods.iter().enumerate() {
        register_method(&class_name, method_key(id, index), method);
    }
    for property in &descriptor.properties {
        register_property(&class_name, property);
    }
    for signal in &descriptor.signals {
        register_signal(&class_name, signal);
    }

    log::debug!(
        "Registered class '{}' extending '{}' ({} methods, {} properties, {} signals, {} virtuals)",
        descriptor.name,
        descriptor.parent,
        descriptor.methods.len(),
        descriptor.properties.len(),
        descriptor.signals.len(),
        descriptor.virtuals.len()
    );
    Ok(())
}

fn register_method(class_name: &StringName, key: usize, method: &MethodEntry) {
    let none = PropertyHint::none();
    let mut owned_args: Vec<OwnedPropertyInfo> = method
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| OwnedPropertyInfo::new(&format!("arg{i}"), *p, &none))
        .collect();
    let mut args: Vec<FfiPropertyInfo> = owned_args.iter_mut().map(OwnedPropertyInfo::as_ffi).collect();
    let mut owned_ret = method.ret.map(|p| OwnedPropertyInfo::new("", p, &none));
    let mut ret = owned_ret.as_mut().map(OwnedPropertyInfo::as_ffi);
    let mut name = StringName::from(method.name.as_str());

    let info = FfiClassMethodInfo {
        name: name.sys_mut(),
        method_userdata: key as *mut c_void,
        call_func: Some(callbacks::method_call),
        ptrcall_func: Some(callbacks::method_ptrcall),
        method_flags: method.flags,
        has_return_value: if ret.is_some() { TRUE } else { FALSE },
        return_value_info: ret.as_mut().map_or(ptr::null_mut(), |r| r as *mut FfiPropertyInfo),
        argument_count: args.len() as u32,
        arguments_info: if args.is_empty() { ptr::null_mut() } else { args.as_mut_ptr() },
    };
    unsafe { (interface().classdb_register_extension_class_method)(library(), class_name.sys(), &info) };
}

fn register_property(class_name: &StringName, property: &PropertyEntry) {
    let mut owned = OwnedPropertyInfo::new(&property.name, property.info, &property.hint);
    let info = owned.as_ffi();
    unsafe { (interface().classdb_register_extension_class_property)(library(), class_name.sys(), &info) };
}

fn register_signal(class_name: &StringName, signal: &SignalEntry) {
    let hint = PropertyHint::none().with_usage(PROPERTY_USAGE_DEFAULT);
    let mut owned: Vec<OwnedPropertyInfo> =
        signal.params.iter().map(|(name, ty)| OwnedPropertyInfo::new(name, param_info(*ty), &hint)).collect();
    let args: Vec<FfiPropertyInfo> = owned.iter_mut().map(OwnedPropertyInfo::as_ffi).collect();
    let name = StringName::from(signal.name.as_str());
    let args_ptr = if args.is_empty() { ptr::null() } else { args.as_ptr() };
    unsafe {
        (interface().classdb_register_extension_class_signal)(
            library(),
            class_name.sys(),
            name.sys(),
            args_ptr,
            args.len() as i64,
        )
    };
}

// ============================================================================
// Unregistration
// ============================================================================

/// Remove a host class from the engine
///
/// Subclasses must be unregistered first; the engine refuses otherwise and
/// the class stays registered.
pub fn unregister_class(name: &str) -> Result<()> {
    let descriptor = descriptor_named(name).ok_or_else(|| BridgeError::NoSuchClass(name.to_owned()))?;
    let iface = interface();
    let class_name = StringName::from(name);

    for method in &descriptor.methods {
        let member = StringName::from(method.name.as_str());
        unsafe { (iface.classdb_unregister_extension_class_method)(library(), class_name.sys(), member.sys()) };
    }
    for signal in &descriptor.signals {
        let member = StringName::from(signal.name.as_str());
        unsafe { (iface.classdb_unregister_extension_class_signal)(library(), class_name.sys(), member.sys()) };
    }
    unsafe { (iface.classdb_unregister_extension_class)(library(), class_name.sys()) };

    registry::forget_class(name);
    if registry::class_exists(name) {
        log::error!("Engine refused to unregister class '{name}'");
        return Err(BridgeError::RegistrationConflict(name.to_owned()));
    }

    let live = descriptor.live.load(Ordering::Acquire);
    if live > 0 {
        log::warn!("{live} instance(s) of '{name}' outlive their class");
    }
    classes().write().retain(|d| d.id != descriptor.id);
    log::debug!("Unregistered class '{name}'");
    Ok(())
}

/// Unregister every host class, newest first
///
/// Returns how many classes were removed.
pub fn unregister_all() -> usize {
    let mut removed = 0;
    for name in registered_classes().into_iter().rev() {
        match unregister_class(name) {
            Ok(()) => removed += 1,
            Err(err) => log::error!("Failed to unregister '{name}': {err}"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_key_roundtrip() {
        let key = method_key(7, 3);
        assert_ne!(key, 0);
        assert_eq!(split_method_key(key), (7, 3));
    }

    #[test]
    fn test_unknown_class_id_has_no_name() {
        assert_eq!(class_name(u32::MAX), None);
        assert!(!is_registered("NeverRegistered"));
    }
}
