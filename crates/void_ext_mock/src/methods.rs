//! Built-in method binds
//!
//! A method bind token handed to the extension is a pointer to one entry
//! of [`METHODS`].

use void_ext_sys::{CallErrorKind, FfiCallError, VariantType};

use crate::dispatch;
use crate::stats;
use crate::value::Value;
use crate::world;

/// Implementation of a built-in method over decoded arguments
pub type MethodImpl = fn(object: usize, args: &[Value]) -> Result<Value, FfiCallError>;

/// One built-in method
///
/// In `args` and `ret`, `Nil` stands for "any variant".
#[derive(Debug)]
pub struct MockMethod {
    pub class: &'static str,
    pub name: &'static str,
    pub args: &'static [VariantType],
    pub ret: Option<VariantType>,
    pub vararg: bool,
    pub imp: MethodImpl,
}

macro_rules! method {
    ($class:literal . $name:literal ( $($arg:ident),* ) -> $ret:ident = $imp:path) => {
        MockMethod {
            class: $class,
            name: $name,
            args: &[$(VariantType::$arg),*],
            ret: Some(VariantType::$ret),
            vararg: false,
            imp: $imp,
        }
    };
    ($class:literal . $name:literal ( $($arg:ident),* ) = $imp:path) => {
        MockMethod {
            class: $class,
            name: $name,
            args: &[$(VariantType::$arg),*],
            ret: None,
            vararg: false,
            imp: $imp,
        }
    };
    ($class:literal . $name:literal ( .. ) = $imp:path) => {
        MockMethod {
            class: $class,
            name: $name,
            args: &[],
            ret: Some(VariantType::Nil),
            vararg: true,
            imp: $imp,
        }
    };
}

pub static METHODS: &[MockMethod] = &[
    method!("Object"."get_class"() -> String = object_get_class),
    method!("Object"."get_instance_id"() -> Int = object_get_instance_id),
    method!("Object"."has_method"(StringName) -> Bool = object_has_method),
    method!("Object"."connect"(StringName, Callable, Int) -> Int = object_connect),
    method!("Object"."emit_signal"(..) = object_emit_signal),
    method!("Object"."call"(..) = object_call),
    method!("RefCounted"."init_ref"() -> Bool = refcounted_init_ref),
    method!("RefCounted"."reference"() -> Bool = refcounted_reference),
    method!("RefCounted"."unreference"() -> Bool = refcounted_unreference),
    method!("RefCounted"."get_reference_count"() -> Int = refcounted_get_reference_count),
    method!("Node"."set_name"(String) = node_set_name),
    method!("Node"."get_name"() -> StringName = node_get_name),
    method!("Node"."add_child"(Object) = node_add_child),
    method!("Node"."get_child_count"() -> Int = node_get_child_count),
    method!("Node"."get_child"(Int) -> Object = node_get_child),
    method!("Node2D"."set_position"(Vector2) = node2d_set_position),
    method!("Node2D"."get_position"() -> Vector2 = node2d_get_position),
    method!("Node2D"."rotate"(Float) = node2d_rotate),
    method!("Node2D"."get_rotation"() -> Float = node2d_get_rotation),
    method!("Resource"."set_name"(String) = resource_set_name),
    method!("Resource"."get_name"() -> String = resource_get_name),
    method!("Resource"."duplicate"(Bool) -> Object = resource_duplicate),
    method!("Resource"."get_rid"() -> Rid = resource_get_rid),
    method!("Engine"."get_physics_ticks_per_second"() -> Int = engine_get_physics_ticks),
    method!("Engine"."get_version_info"() -> Dictionary = engine_get_version_info),
    method!("Engine"."get_frames_per_second"() -> Float = engine_get_fps),
];

/// Find a built-in method along the chain of `class`
pub fn find_method(class: &str, name: &str) -> Option<&'static MockMethod> {
    let mut current = Some(class.to_owned());
    while let Some(class_name) = current {
        if let Some(found) = METHODS.iter().find(|m| m.class == class_name && m.name == name) {
            return Some(found);
        }
        current = world::parent_of(&class_name);
    }
    None
}

/// Validate arguments the way the vararg path does, then invoke
pub fn invoke_checked(method: &MockMethod, object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    if !method.vararg {
        let expected = method.args.len();
        if args.len() > expected {
            return Err(FfiCallError::new(CallErrorKind::TooManyArguments, 0, expected as i32));
        }
        if args.len() < expected {
            return Err(FfiCallError::new(CallErrorKind::TooFewArguments, 0, expected as i32));
        }
        for (i, (value, ty)) in args.iter().zip(method.args.iter()).enumerate() {
            if *ty != VariantType::Nil && value.ty() != *ty {
                return Err(FfiCallError::new(CallErrorKind::InvalidArgument, i as i32, ty.sys() as i32));
            }
        }
    }
    (method.imp)(object, args)
}

fn invalid(argument: i32, expected: VariantType) -> FfiCallError {
    FfiCallError::new(CallErrorKind::InvalidArgument, argument, expected.sys() as i32)
}

fn missing_instance() -> FfiCallError {
    FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0)
}

fn object_get_class(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    world::class_of(object).map(Value::String).ok_or_else(missing_instance)
}

fn object_get_instance_id(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    world::id_of(object).map(|id| Value::Int(id as i64)).ok_or_else(missing_instance)
}

fn object_has_method(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let class = world::class_of(object).ok_or_else(missing_instance)?;
    let name = args[0].as_text().ok_or_else(|| invalid(0, VariantType::StringName))?;
    let found = world::find_ext_method(&class, &name).is_some() || find_method(&class, &name).is_some();
    Ok(Value::Bool(found))
}

fn object_connect(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let signal = args[0].as_text().ok_or_else(|| invalid(0, VariantType::StringName))?;
    let Value::Callable(callable) = &args[1] else {
        return Err(invalid(1, VariantType::Callable));
    };
    Ok(Value::Int(dispatch::connect(object, &signal, callable.clone())))
}

fn object_emit_signal(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let Some(first) = args.first() else {
        return Err(FfiCallError::new(CallErrorKind::TooFewArguments, 0, 1));
    };
    let signal = first.as_text().ok_or_else(|| invalid(0, VariantType::StringName))?;
    Ok(Value::Int(dispatch::emit(object, &signal, &args[1..])))
}

fn object_call(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let Some(first) = args.first() else {
        return Err(FfiCallError::new(CallErrorKind::TooFewArguments, 0, 1));
    };
    let method = first.as_text().ok_or_else(|| invalid(0, VariantType::StringName))?;
    dispatch::call_object_method(object, &method, &args[1..])
}

fn refcounted_init_ref(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    let done = world::with_object(object, |o| match o.refcount.as_mut() {
        Some(count) if *count == 0 => {
            *count = 1;
            true
        }
        _ => false,
    })
    .ok_or_else(missing_instance)?;
    if done {
        stats::bump(|s| s.ref_increments += 1);
    }
    Ok(Value::Bool(done))
}

fn refcounted_reference(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    let done = world::with_object(object, |o| match o.refcount.as_mut() {
        Some(count) => {
            *count += 1;
            true
        }
        None => false,
    })
    .ok_or_else(missing_instance)?;
    if done {
        stats::bump(|s| s.ref_increments += 1);
    }
    Ok(Value::Bool(done))
}

fn refcounted_unreference(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    let reached_zero = world::with_object(object, |o| match o.refcount.as_mut() {
        Some(count) => {
            *count -= 1;
            *count <= 0
        }
        None => false,
    })
    .ok_or_else(missing_instance)?;
    stats::bump(|s| s.ref_decrements += 1);
    Ok(Value::Bool(reached_zero))
}

fn refcounted_get_reference_count(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    Ok(Value::Int(world::refcount(object).unwrap_or(0)))
}

fn node_set_name(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let name = args[0].as_text().unwrap_or_default();
    world::with_object(object, |o| o.name = name).ok_or_else(missing_instance)?;
    Ok(Value::Nil)
}

fn node_get_name(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    world::with_object(object, |o| Value::name(&o.name)).ok_or_else(missing_instance)
}

fn node_add_child(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let child = args[0].as_object().filter(|p| *p != 0).ok_or_else(|| invalid(0, VariantType::Object))?;
    if !world::class_of(child).map_or(false, |c| world::inherits(&c, "Node")) {
        return Err(invalid(0, VariantType::Object));
    }
    world::with_object(object, |o| o.children.push(child)).ok_or_else(missing_instance)?;
    Ok(Value::Nil)
}

fn node_get_child_count(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    world::with_object(object, |o| Value::Int(o.children.len() as i64)).ok_or_else(missing_instance)
}

fn node_get_child(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let index = args[0].as_int().unwrap_or(-1);
    let child = world::with_object(object, |o| {
        usize::try_from(index).ok().and_then(|i| o.children.get(i).copied())
    })
    .ok_or_else(missing_instance)?;
    Ok(Value::Object(child.unwrap_or(0)))
}

fn node2d_set_position(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let position = args[0].as_vector2().ok_or_else(|| invalid(0, VariantType::Vector2))?;
    world::with_object(object, |o| o.position = position).ok_or_else(missing_instance)?;
    Ok(Value::Nil)
}

fn node2d_get_position(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    world::with_object(object, |o| Value::vector2(o.position.0, o.position.1)).ok_or_else(missing_instance)
}

fn node2d_rotate(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let radians = args[0].as_float().ok_or_else(|| invalid(0, VariantType::Float))?;
    world::with_object(object, |o| o.rotation += radians).ok_or_else(missing_instance)?;
    Ok(Value::Nil)
}

fn node2d_get_rotation(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    world::with_object(object, |o| Value::Float(o.rotation)).ok_or_else(missing_instance)
}

fn resource_set_name(object: usize, args: &[Value]) -> Result<Value, FfiCallError> {
    let name = args[0].as_text().unwrap_or_default();
    world::with_object(object, |o| o.resource_name = name).ok_or_else(missing_instance)?;
    Ok(Value::Nil)
}

fn resource_get_name(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    world::with_object(object, |o| Value::String(o.resource_name.clone())).ok_or_else(missing_instance)
}

/// Returns a fresh resource holding one reference, adopted by the caller
fn resource_duplicate(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    let (class, name) =
        world::with_object(object, |o| (o.class.clone(), o.resource_name.clone())).ok_or_else(missing_instance)?;
    let copy = dispatch::construct(&class);
    if copy == 0 {
        return Ok(Value::Object(0));
    }
    world::with_object(copy, |o| o.resource_name = name);
    refcounted_init_ref(copy, &[])?;
    Ok(Value::Object(copy))
}

fn resource_get_rid(object: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    world::id_of(object).map(|id| Value::rid(id + 1000)).ok_or_else(missing_instance)
}

fn engine_get_physics_ticks(_: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    Ok(Value::Int(60))
}

fn engine_get_version_info(_: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    let (major, minor, patch) = crate::interface::engine_version();
    Ok(Value::dictionary(vec![
        (Value::string("major"), Value::Int(major as i64)),
        (Value::string("minor"), Value::Int(minor as i64)),
        (Value::string("patch"), Value::Int(patch as i64)),
    ]))
}

fn engine_get_fps(_: usize, _: &[Value]) -> Result<Value, FfiCallError> {
    Ok(Value::Float(60.0))
}
