//! Engine-side call paths: construction, destruction, method dispatch,
//! virtual dispatch, property access and signal emission

use std::ffi::c_void;
use std::result::Result;

use void_ext_sys::*;

use crate::stats::{self, Reported, Severity};
use crate::value::*;
use crate::world::{self, ExtMethod};

pub(crate) fn engine_error(description: &str) {
    stats::record(Reported {
        severity: Severity::Error,
        description: description.to_owned(),
        message: String::new(),
        function: "mock_engine".to_owned(),
        file: file!().to_owned(),
        line: line!() as i32,
    });
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Construct an object of any class; null when the class is unknown
pub fn construct(class: &str) -> usize {
    if let Some(ext) = world::ext_class(class) {
        if ext.callbacks.is_abstract || ext.callbacks.is_virtual {
            engine_error(&format!("Class '{class}' is abstract"));
            return 0;
        }
        let Some(create) = ext.callbacks.create_instance else {
            engine_error(&format!("Class '{class}' cannot be instantiated"));
            return 0;
        };
        return unsafe { create(ext.callbacks.userdata as *mut c_void) } as usize;
    }

    match world::engine_class(class) {
        Some(info) if info.instantiable => world::spawn(info),
        Some(_) => {
            engine_error(&format!("Class '{class}' is not instantiable"));
            0
        }
        None => 0,
    }
}

/// Destroy an object, running the extension free hook first
pub fn destroy(ptr: usize) {
    let Some((class, instance, children)) =
        world::with_object(ptr, |o| (o.class.clone(), o.instance, std::mem::take(&mut o.children)))
    else {
        engine_error(&format!("Attempt to destroy unknown object {ptr:#x}"));
        return;
    };

    if instance != 0 {
        if let Some(ext) = world::nearest_ext_class(&class) {
            if let Some(free) = ext.callbacks.free_instance {
                unsafe { free(ext.callbacks.userdata as *mut c_void, instance as *mut c_void) };
            }
        }
    }

    for child in children {
        if world::object_exists(child) {
            destroy(child);
        }
    }

    if let Some(object) = world::take(ptr) {
        stats::bump(|s| s.objects_destroyed += 1);
        drop(object);
    }
}

// ============================================================================
// Method dispatch
// ============================================================================

/// Invoke an extension method through its vararg entry
pub fn varcall_ext(method: &ExtMethod, instance: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let Some(call) = method.call else {
        return Err(FfiCallError::new(CallErrorKind::InvalidMethod, 0, 0));
    };
    let slots: Vec<MockVariant> = args.iter().cloned().map(MockVariant::new).collect();
    let ptrs: Vec<ConstVariantPtr> = slots.iter().map(|v| v as *const MockVariant as ConstVariantPtr).collect();
    let mut ret = MockVariant::nil();
    let mut error = FfiCallError::OK;
    unsafe {
        call(
            method.userdata as *mut c_void,
            instance as *mut c_void,
            if ptrs.is_empty() { std::ptr::null() } else { ptrs.as_ptr() },
            ptrs.len() as Int,
            &mut ret as *mut MockVariant as VariantPtr,
            &mut error,
        );
    }
    if error.is_ok() {
        Ok(ret.value())
    } else {
        Err(error)
    }
}

/// Invoke an extension method through its pointer-call entry
///
/// Returns `None` when the argument count does not match the registration.
pub fn ptrcall_ext(method: &ExtMethod, instance: usize, args: &[Value]) -> Option<Value> {
    let ptrcall = method.ptrcall?;
    if args.len() != method.args.len() {
        return None;
    }
    let mut slots: Vec<Slot> = method
        .args
        .iter()
        .zip(args.iter().cloned())
        .map(|(ty, value)| Slot::holding(*ty, value))
        .collect();
    let ptrs: Vec<ConstTypePtr> = slots.iter().map(Slot::as_ptr).collect();
    let mut ret = Slot::uninit();
    unsafe {
        ptrcall(
            method.userdata as *mut c_void,
            instance as *mut c_void,
            if ptrs.is_empty() { std::ptr::null() } else { ptrs.as_ptr() },
            ret.as_mut_ptr(),
        );
    }
    let value = match method.ret {
        Some(ty) => unsafe {
            let value = read_native(ty, ret.as_ptr());
            destroy_native(ty, ret.as_mut_ptr());
            value
        },
        None => Value::Nil,
    };
    for (ty, slot) in method.args.iter().zip(slots.iter_mut()) {
        unsafe { destroy_native(*ty, slot.as_mut_ptr()) };
    }
    Some(value)
}

/// Dynamic call by name: extension methods first, then built-in ones
pub fn call_object_method(ptr: usize, method: &str, args: &[Value]) -> Result<Value, FfiCallError> {
    let Some(class) = world::class_of(ptr) else {
        return Err(FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0));
    };

    if let Some(ext) = world::find_ext_method(&class, method) {
        let instance = world::instance_of(ptr);
        if ext.call.is_some() {
            return varcall_ext(&ext, instance, args);
        }
        if args.len() != ext.args.len() {
            let kind = if args.len() > ext.args.len() {
                CallErrorKind::TooManyArguments
            } else {
                CallErrorKind::TooFewArguments
            };
            return Err(FfiCallError::new(kind, 0, ext.args.len() as i32));
        }
        return ptrcall_ext(&ext, instance, args).ok_or(FfiCallError::new(CallErrorKind::InvalidMethod, 0, 0));
    }

    match crate::methods::find_method(&class, method) {
        Some(bind) => crate::methods::invoke_checked(bind, ptr, args),
        None => Err(FfiCallError::new(CallErrorKind::InvalidMethod, 0, 0)),
    }
}

/// Invoke a callable with `args`
pub fn invoke_callable(callable: &CallableData, args: &[Value]) -> Result<Value, FfiCallError> {
    match callable {
        CallableData::Null => Err(FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0)),
        CallableData::Method { object, method } => match world::ptr_from_id(*object) {
            Some(ptr) => call_object_method(ptr, method, args),
            None => Err(FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0)),
        },
        CallableData::Custom(custom) => {
            if let Some(is_valid) = custom.is_valid_func {
                if unsafe { is_valid(custom.userdata as *mut c_void) } == FALSE {
                    return Err(FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0));
                }
            }
            let Some(call) = custom.call_func else {
                return Err(FfiCallError::new(CallErrorKind::InvalidMethod, 0, 0));
            };
            let slots: Vec<MockVariant> = args.iter().cloned().map(MockVariant::new).collect();
            let ptrs: Vec<ConstVariantPtr> =
                slots.iter().map(|v| v as *const MockVariant as ConstVariantPtr).collect();
            let mut ret = MockVariant::nil();
            let mut error = FfiCallError::OK;
            unsafe {
                call(
                    custom.userdata as *mut c_void,
                    if ptrs.is_empty() { std::ptr::null() } else { ptrs.as_ptr() },
                    ptrs.len() as Int,
                    &mut ret as *mut MockVariant as VariantPtr,
                    &mut error,
                );
            }
            if error.is_ok() {
                Ok(ret.value())
            } else {
                Err(error)
            }
        }
    }
}

/// Whether a callable can currently be invoked
pub fn callable_is_valid(callable: &CallableData) -> bool {
    match callable {
        CallableData::Null => false,
        CallableData::Method { object, .. } => world::ptr_from_id(*object).is_some(),
        CallableData::Custom(custom) => match custom.is_valid_func {
            Some(is_valid) => (unsafe { is_valid(custom.userdata as *mut c_void) }) != FALSE,
            None => true,
        },
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Error code: OK
pub const OK: i64 = 0;
/// Error code: unavailable
pub const ERR_UNAVAILABLE: i64 = 2;
/// Error code: invalid parameter
pub const ERR_INVALID_PARAMETER: i64 = 31;

/// Connect `callable` to `signal` on an object
pub fn connect(ptr: usize, signal: &str, callable: CallableData) -> i64 {
    let Some(class) = world::class_of(ptr) else {
        return ERR_INVALID_PARAMETER;
    };
    if !world::has_signal(&class, signal) {
        engine_error(&format!("Nonexistent signal '{signal}' in class '{class}'"));
        return ERR_INVALID_PARAMETER;
    }
    let connected = world::with_object(ptr, |o| {
        if o.connections.iter().any(|(s, c)| s == signal && c.same(&callable)) {
            false
        } else {
            o.connections.push((signal.to_owned(), callable));
            true
        }
    });
    match connected {
        Some(true) => OK,
        _ => ERR_INVALID_PARAMETER,
    }
}

/// Emit `signal` on an object, invoking every connection in order
pub fn emit(ptr: usize, signal: &str, args: &[Value]) -> i64 {
    let Some(class) = world::class_of(ptr) else {
        return ERR_INVALID_PARAMETER;
    };
    if !world::has_signal(&class, signal) {
        engine_error(&format!("Can't emit non-existing signal '{signal}'"));
        return ERR_UNAVAILABLE;
    }
    let targets: Vec<CallableData> = world::with_object(ptr, |o| {
        o.connections
            .iter()
            .filter(|(s, _)| s == signal)
            .map(|(_, c)| c.clone())
            .collect()
    })
    .unwrap_or_default();

    for target in targets {
        if let Err(err) = invoke_callable(&target, args) {
            engine_error(&format!("Error calling from signal '{signal}': {:?}", err.kind()));
        }
    }
    OK
}

// ============================================================================
// Virtuals, properties, notifications
// ============================================================================

fn name_slot(name: &str) -> Slot {
    Slot::holding(VariantType::StringName, Value::name(name))
}

/// Ask the extension for a virtual implementation on an object's class
pub fn virtual_for(ptr: usize, name: &str) -> Option<ClassCallVirtualFn> {
    let class = world::class_of(ptr)?;
    virtual_for_class(&class, name)
}

/// Ask the extension for a virtual implementation on a class
pub fn virtual_for_class(class: &str, name: &str) -> Option<ClassCallVirtualFn> {
    let ext = world::nearest_ext_class(class)?;
    let get_virtual = ext.callbacks.get_virtual?;
    let slot = name_slot(name);
    unsafe { get_virtual(ext.callbacks.userdata as *mut c_void, slot.as_ptr()) }
}

/// Call a virtual the way the engine does; `None` when not overridden
pub fn call_virtual(ptr: usize, name: &str, args: &[Value]) -> Option<Value> {
    let class = world::class_of(ptr)?;
    let info = world::find_virtual(&class, name)?;
    let function = virtual_for_class(&class, name)?;
    let instance = world::instance_of(ptr);

    let mut slots: Vec<Slot> = info
        .args
        .iter()
        .zip(args.iter().cloned())
        .map(|(ty, value)| Slot::holding(*ty, value))
        .collect();
    let ptrs: Vec<ConstTypePtr> = slots.iter().map(Slot::as_ptr).collect();
    let mut ret = Slot::uninit();
    unsafe {
        function(
            instance as *mut c_void,
            if ptrs.is_empty() { std::ptr::null() } else { ptrs.as_ptr() },
            ret.as_mut_ptr(),
        );
    }
    let value = match info.ret {
        Some(ty) => unsafe {
            let value = read_native(ty, ret.as_ptr());
            destroy_native(ty, ret.as_mut_ptr());
            value
        },
        None => Value::Nil,
    };
    for (ty, slot) in info.args.iter().zip(slots.iter_mut()) {
        unsafe { destroy_native(*ty, slot.as_mut_ptr()) };
    }
    Some(value)
}

/// Read a property through the extension's get hook
pub fn get_property(ptr: usize, name: &str) -> Option<Value> {
    let class = world::class_of(ptr)?;
    let ext = world::nearest_ext_class(&class)?;
    let get = ext.callbacks.get?;
    let slot = name_slot(name);
    let mut ret = MockVariant::nil();
    let found = unsafe {
        get(
            world::instance_of(ptr) as *mut c_void,
            slot.as_ptr(),
            &mut ret as *mut MockVariant as VariantPtr,
        )
    };
    (found != FALSE).then(|| ret.value())
}

/// Write a property through the extension's set hook
pub fn set_property(ptr: usize, name: &str, value: Value) -> bool {
    let Some(class) = world::class_of(ptr) else {
        return false;
    };
    let Some(set) = world::nearest_ext_class(&class).and_then(|e| e.callbacks.set) else {
        return false;
    };
    let slot = name_slot(name);
    let value = MockVariant::new(value);
    unsafe {
        set(
            world::instance_of(ptr) as *mut c_void,
            slot.as_ptr(),
            &value as *const MockVariant as ConstVariantPtr,
        ) != FALSE
    }
}

/// Property list published by the extension for an object
pub fn property_list(ptr: usize) -> Vec<world::ExtProperty> {
    let Some(ext) = world::class_of(ptr).and_then(|c| world::nearest_ext_class(&c)) else {
        return Vec::new();
    };
    let Some(get_list) = ext.callbacks.get_property_list else {
        return Vec::new();
    };
    let instance = world::instance_of(ptr) as *mut c_void;
    let mut count = 0u32;
    let list = unsafe { get_list(instance, &mut count) };
    let mut out = Vec::with_capacity(count as usize);
    if !list.is_null() {
        for i in 0..count as usize {
            out.push(unsafe { crate::interface::property_from_info(&*list.add(i)) });
        }
    }
    if let Some(free_list) = ext.callbacks.free_property_list {
        unsafe { free_list(instance, list) };
    }
    out
}

/// Deliver a notification
pub fn notify(ptr: usize, what: i32) {
    let Some(ext) = world::class_of(ptr).and_then(|c| world::nearest_ext_class(&c)) else {
        return;
    };
    if let Some(notification) = ext.callbacks.notification {
        unsafe { notification(world::instance_of(ptr) as *mut c_void, what, FALSE) };
    }
}

/// Text representation of an object, asking the extension first
pub fn object_to_string(ptr: usize) -> String {
    let Some(class) = world::class_of(ptr) else {
        return "<Freed Object>".to_owned();
    };
    if let Some(to_string) = world::nearest_ext_class(&class).and_then(|e| e.callbacks.to_string) {
        let mut valid = FALSE;
        let mut out = Slot::uninit();
        unsafe { to_string(world::instance_of(ptr) as *mut c_void, &mut valid, out.as_mut_ptr()) };
        if valid != FALSE {
            let text = unsafe { read_native(VariantType::String, out.as_ptr()) };
            unsafe { destroy_native(VariantType::String, out.as_mut_ptr()) };
            return text.as_text().unwrap_or_default();
        }
    }
    let id = world::id_of(ptr).unwrap_or(0);
    format!("<{class}#{id}>")
}
