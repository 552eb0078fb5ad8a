//! Builtin type functions: constructors, destructors, variant conversions,
//! operator evaluators and builtin methods
//!
//! Each function pointer handed out is an instantiation over the raw type
//! tag, since the ABI passes no user data to these entries.

use std::cell::RefCell;
use std::rc::Rc;

use void_ext_sys::*;

use crate::dispatch;
use crate::value::*;

macro_rules! per_type {
    ($raw:expr, $f:ident, $fty:ty) => {
        match $raw {
            1 => Some($f::<1> as $fty),
            2 => Some($f::<2> as $fty),
            3 => Some($f::<3> as $fty),
            4 => Some($f::<4> as $fty),
            5 => Some($f::<5> as $fty),
            6 => Some($f::<6> as $fty),
            7 => Some($f::<7> as $fty),
            8 => Some($f::<8> as $fty),
            9 => Some($f::<9> as $fty),
            10 => Some($f::<10> as $fty),
            11 => Some($f::<11> as $fty),
            12 => Some($f::<12> as $fty),
            13 => Some($f::<13> as $fty),
            14 => Some($f::<14> as $fty),
            15 => Some($f::<15> as $fty),
            16 => Some($f::<16> as $fty),
            17 => Some($f::<17> as $fty),
            18 => Some($f::<18> as $fty),
            19 => Some($f::<19> as $fty),
            20 => Some($f::<20> as $fty),
            21 => Some($f::<21> as $fty),
            22 => Some($f::<22> as $fty),
            23 => Some($f::<23> as $fty),
            24 => Some($f::<24> as $fty),
            25 => Some($f::<25> as $fty),
            26 => Some($f::<26> as $fty),
            27 => Some($f::<27> as $fty),
            28 => Some($f::<28> as $fty),
            29 => Some($f::<29> as $fty),
            30 => Some($f::<30> as $fty),
            31 => Some($f::<31> as $fty),
            32 => Some($f::<32> as $fty),
            33 => Some($f::<33> as $fty),
            34 => Some($f::<34> as $fty),
            35 => Some($f::<35> as $fty),
            36 => Some($f::<36> as $fty),
            37 => Some($f::<37> as $fty),
            38 => Some($f::<38> as $fty),
            _ => None,
        }
    };
}

fn vt(raw: u32) -> VariantType {
    VariantType::from_sys(raw).unwrap_or(VariantType::Nil)
}

// ============================================================================
// Conversions, construction, destruction
// ============================================================================

unsafe extern "C" fn to_variant_ctor<const T: u32>(dst: VariantPtr, src: TypePtr) {
    MockVariant::write(dst, read_native(vt(T), src));
}

unsafe extern "C" fn from_variant_ctor<const T: u32>(dst: TypePtr, src: VariantPtr) {
    write_native(vt(T), MockVariant::read(src), dst);
}

unsafe extern "C" fn default_ctor<const T: u32>(base: TypePtr, _args: *const ConstTypePtr) {
    write_native(vt(T), default_value(vt(T)), base);
}

unsafe extern "C" fn copy_ctor<const T: u32>(base: TypePtr, args: *const ConstTypePtr) {
    let src = *args;
    write_native(vt(T), read_native(vt(T), src), base);
}

unsafe extern "C" fn destructor<const T: u32>(base: TypePtr) {
    destroy_native(vt(T), base);
}

unsafe extern "C" fn string_from_name(base: TypePtr, args: *const ConstTypePtr) {
    let name = read_native(VariantType::StringName, *args);
    write_native(VariantType::String, Value::String(name.as_text().unwrap_or_default()), base);
}

unsafe extern "C" fn string_from_path(base: TypePtr, args: *const ConstTypePtr) {
    let path = read_native(VariantType::NodePath, *args);
    write_native(VariantType::String, Value::String(path.as_text().unwrap_or_default()), base);
}

unsafe extern "C" fn name_from_string(base: TypePtr, args: *const ConstTypePtr) {
    let text = read_native(VariantType::String, *args).as_text().unwrap_or_default();
    write_native(VariantType::StringName, Value::name(&text), base);
}

unsafe extern "C" fn path_from_string(base: TypePtr, args: *const ConstTypePtr) {
    let text = read_native(VariantType::String, *args).as_text().unwrap_or_default();
    write_native(VariantType::NodePath, Value::NodePath(text), base);
}

unsafe extern "C" fn callable_from_method(base: TypePtr, args: *const ConstTypePtr) {
    let object = read_native(VariantType::Object, *args).as_object().unwrap_or(0);
    let method = read_native(VariantType::StringName, *args.add(1)).as_text().unwrap_or_default();
    let data = match crate::world::id_of(object) {
        Some(object) => CallableData::Method { object, method },
        None => CallableData::Null,
    };
    write_native(VariantType::Callable, Value::Callable(data), base);
}

unsafe extern "C" fn signal_from_name(base: TypePtr, args: *const ConstTypePtr) {
    let object = read_native(VariantType::Object, *args).as_object().unwrap_or(0);
    let name = read_native(VariantType::StringName, *args.add(1)).as_text().unwrap_or_default();
    let id = crate::world::id_of(object).unwrap_or(0);
    write_native(VariantType::Signal, Value::Signal(id, name), base);
}

pub(crate) fn to_variant_constructor(raw: u32) -> Option<VariantFromTypeConstructorFn> {
    per_type!(raw, to_variant_ctor, VariantFromTypeConstructorFn)
}

pub(crate) fn from_variant_constructor(raw: u32) -> Option<TypeFromVariantConstructorFn> {
    per_type!(raw, from_variant_ctor, TypeFromVariantConstructorFn)
}

pub(crate) fn ptr_constructor(raw: u32, index: i32) -> Option<PtrConstructorFn> {
    let ty = VariantType::from_sys(raw)?;
    match index {
        0 => per_type!(raw, default_ctor, PtrConstructorFn),
        1 => per_type!(raw, copy_ctor, PtrConstructorFn),
        2 => match ty {
            VariantType::String => Some(string_from_name as PtrConstructorFn),
            VariantType::StringName => Some(name_from_string as PtrConstructorFn),
            VariantType::NodePath => Some(path_from_string as PtrConstructorFn),
            VariantType::Callable => Some(callable_from_method as PtrConstructorFn),
            VariantType::Signal => Some(signal_from_name as PtrConstructorFn),
            _ => None,
        },
        3 => match ty {
            VariantType::String => Some(string_from_path as PtrConstructorFn),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn ptr_destructor(raw: u32) -> Option<PtrDestructorFn> {
    let ty = VariantType::from_sys(raw)?;
    if has_lifecycle(ty) {
        per_type!(raw, destructor, PtrDestructorFn)
    } else {
        None
    }
}

// ============================================================================
// Operators
// ============================================================================

unsafe extern "C" fn equal_eval<const T: u32>(left: ConstTypePtr, right: ConstTypePtr, out: TypePtr) {
    let equal = value_eq(&read_native(vt(T), left), &read_native(vt(T), right));
    *(out as *mut u8) = equal as u8;
}

unsafe extern "C" fn not_equal_eval<const T: u32>(left: ConstTypePtr, right: ConstTypePtr, out: TypePtr) {
    let equal = value_eq(&read_native(vt(T), left), &read_native(vt(T), right));
    *(out as *mut u8) = (!equal) as u8;
}

pub(crate) fn operator_evaluator(op: u32, left: u32, right: u32) -> Option<PtrOperatorEvaluatorFn> {
    if left != right {
        return None;
    }
    match op {
        x if x == VariantOperator::Equal as u32 => per_type!(left, equal_eval, PtrOperatorEvaluatorFn),
        x if x == VariantOperator::NotEqual as u32 => per_type!(left, not_equal_eval, PtrOperatorEvaluatorFn),
        _ => None,
    }
}

// ============================================================================
// Builtin methods
// ============================================================================

unsafe fn arg_value(args: *const ConstTypePtr, index: usize, ty: VariantType) -> Value {
    read_native(ty, *args.add(index))
}

unsafe fn array_data<'a>(base: TypePtr) -> &'a mut ArrayData {
    &mut *(*(base as *const Rc<RefCell<ArrayData>>)).as_ptr()
}

unsafe fn dict_data<'a>(base: TypePtr) -> &'a mut DictData {
    &mut *(*(base as *const Rc<RefCell<DictData>>)).as_ptr()
}

unsafe fn packed_data<'a>(base: TypePtr) -> &'a mut PackedData {
    &mut **(base as *mut Box<PackedData>)
}

unsafe extern "C" fn string_length(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let text = &**(base as *const Box<String>);
    write_native(VariantType::Int, Value::Int(text.chars().count() as i64), ret);
}

fn path_parts(path: &str) -> (bool, Vec<String>, Vec<String>) {
    let absolute = path.starts_with('/');
    let mut sections = path.trim_start_matches('/').split(':');
    let names = sections
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    let subnames = sections.filter(|s| !s.is_empty()).map(str::to_owned).collect();
    (absolute, names, subnames)
}

unsafe fn path_of(base: TypePtr) -> (bool, Vec<String>, Vec<String>) {
    path_parts(&**(base as *const Box<String>))
}

unsafe extern "C" fn path_is_absolute(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    write_native(VariantType::Bool, Value::Bool(path_of(base).0), ret);
}

unsafe extern "C" fn path_get_name_count(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    write_native(VariantType::Int, Value::Int(path_of(base).1.len() as i64), ret);
}

unsafe extern "C" fn path_get_name(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let index = arg_value(args, 0, VariantType::Int).as_int().unwrap_or(-1);
    let names = path_of(base).1;
    let name = usize::try_from(index).ok().and_then(|i| names.get(i).cloned()).unwrap_or_default();
    write_native(VariantType::StringName, Value::name(&name), ret);
}

unsafe extern "C" fn path_get_subname_count(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    write_native(VariantType::Int, Value::Int(path_of(base).2.len() as i64), ret);
}

unsafe extern "C" fn path_get_subname(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let index = arg_value(args, 0, VariantType::Int).as_int().unwrap_or(-1);
    let subnames = path_of(base).2;
    let name = usize::try_from(index).ok().and_then(|i| subnames.get(i).cloned()).unwrap_or_default();
    write_native(VariantType::StringName, Value::name(&name), ret);
}

unsafe extern "C" fn array_size(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    write_native(VariantType::Int, Value::Int(array_data(base).items.len() as i64), ret);
}

unsafe extern "C" fn array_push_back(base: TypePtr, args: *const ConstTypePtr, _: TypePtr, _: i32) {
    let value = arg_value(args, 0, VariantType::Nil);
    let data = array_data(base);
    if let Some((ty, _)) = &data.typed {
        if value.ty() != *ty {
            dispatch::engine_error(&format!("Attempted to push_back a {} into an Array of {}", value.ty(), ty));
            return;
        }
    }
    data.items.push(MockVariant::new(value));
}

unsafe extern "C" fn array_resize(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let len = arg_value(args, 0, VariantType::Int).as_int().unwrap_or(0).max(0) as usize;
    let data = array_data(base);
    let fill = data.typed.as_ref().map_or(Value::Nil, |(ty, _)| default_value(*ty));
    data.items.resize_with(len, || MockVariant::new(fill.clone()));
    write_native(VariantType::Int, Value::Int(0), ret);
}

unsafe extern "C" fn array_clear(base: TypePtr, _: *const ConstTypePtr, _: TypePtr, _: i32) {
    array_data(base).items.clear();
}

unsafe extern "C" fn array_duplicate(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let data = array_data(base);
    let copy = ArrayData { items: data.items.clone(), typed: data.typed.clone() };
    write_native(VariantType::Array, Value::Array(Rc::new(RefCell::new(copy))), ret);
}

unsafe extern "C" fn array_has(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let needle = arg_value(args, 0, VariantType::Nil);
    let found = array_data(base).items.iter().any(|v| v.get().map_or(false, |v| value_eq(v, &needle)));
    write_native(VariantType::Bool, Value::Bool(found), ret);
}

unsafe extern "C" fn array_is_typed(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    write_native(VariantType::Bool, Value::Bool(array_data(base).typed.is_some()), ret);
}

unsafe extern "C" fn array_get_typed_builtin(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let ty = array_data(base).typed.as_ref().map_or(0, |(ty, _)| ty.sys() as i64);
    write_native(VariantType::Int, Value::Int(ty), ret);
}

unsafe extern "C" fn array_get_typed_class_name(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let name = array_data(base).typed.as_ref().map(|(_, n)| n.clone()).unwrap_or_default();
    write_native(VariantType::StringName, Value::name(&name), ret);
}

unsafe extern "C" fn dict_size(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    write_native(VariantType::Int, Value::Int(dict_data(base).entries.len() as i64), ret);
}

unsafe extern "C" fn dict_has(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let key = arg_value(args, 0, VariantType::Nil);
    write_native(VariantType::Bool, Value::Bool(dict_data(base).position(&key).is_some()), ret);
}

unsafe extern "C" fn dict_erase(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let key = arg_value(args, 0, VariantType::Nil);
    let data = dict_data(base);
    let removed = match data.position(&key) {
        Some(index) => {
            data.entries.remove(index);
            true
        }
        None => false,
    };
    write_native(VariantType::Bool, Value::Bool(removed), ret);
}

unsafe extern "C" fn dict_keys(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let keys = dict_data(base).entries.iter().map(|(k, _)| k.value()).collect();
    write_native(VariantType::Array, Value::array(keys), ret);
}

unsafe extern "C" fn dict_values(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let values = dict_data(base).entries.iter().map(|(_, v)| v.value()).collect();
    write_native(VariantType::Array, Value::array(values), ret);
}

unsafe extern "C" fn dict_clear(base: TypePtr, _: *const ConstTypePtr, _: TypePtr, _: i32) {
    dict_data(base).entries.clear();
}

unsafe extern "C" fn dict_duplicate(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let copy = DictData { entries: dict_data(base).entries.clone() };
    write_native(VariantType::Dictionary, Value::Dictionary(Rc::new(RefCell::new(copy))), ret);
}

unsafe extern "C" fn packed_size<const T: u32>(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    write_native(VariantType::Int, Value::Int(packed_data(base).len() as i64), ret);
}

unsafe extern "C" fn packed_resize<const T: u32>(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let len = arg_value(args, 0, VariantType::Int).as_int().unwrap_or(0).max(0) as usize;
    packed_data(base).resize(len);
    write_native(VariantType::Int, Value::Int(0), ret);
}

unsafe extern "C" fn packed_clear<const T: u32>(base: TypePtr, _: *const ConstTypePtr, _: TypePtr, _: i32) {
    packed_data(base).resize(0);
}

unsafe fn callable_of<'a>(base: TypePtr) -> &'a CallableData {
    &**(base as *const Box<CallableData>)
}

unsafe extern "C" fn callable_is_valid(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let valid = dispatch::callable_is_valid(callable_of(base));
    write_native(VariantType::Bool, Value::Bool(valid), ret);
}

unsafe extern "C" fn callable_is_custom(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let custom = matches!(callable_of(base), CallableData::Custom(_));
    write_native(VariantType::Bool, Value::Bool(custom), ret);
}

unsafe extern "C" fn callable_get_object_id(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let id = match callable_of(base) {
        CallableData::Method { object, .. } => *object,
        CallableData::Custom(custom) => custom.object_id,
        CallableData::Null => 0,
    };
    write_native(VariantType::Int, Value::Int(id as i64), ret);
}

unsafe extern "C" fn callable_get_method(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let name = match callable_of(base) {
        CallableData::Method { method, .. } => method.clone(),
        _ => String::new(),
    };
    write_native(VariantType::StringName, Value::name(&name), ret);
}

unsafe extern "C" fn signal_get_name(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let signal = &**(base as *const Box<(u64, String)>);
    write_native(VariantType::StringName, Value::name(&signal.1), ret);
}

unsafe extern "C" fn signal_get_object_id(base: TypePtr, _: *const ConstTypePtr, ret: TypePtr, _: i32) {
    let signal = &**(base as *const Box<(u64, String)>);
    write_native(VariantType::Int, Value::Int(signal.0 as i64), ret);
}

pub(crate) fn builtin_method(ty: VariantType, name: &str) -> Option<PtrBuiltInMethodFn> {
    if ty.is_packed_array() {
        return match name {
            "size" => per_type!(ty.sys(), packed_size, PtrBuiltInMethodFn),
            "resize" => per_type!(ty.sys(), packed_resize, PtrBuiltInMethodFn),
            "clear" => per_type!(ty.sys(), packed_clear, PtrBuiltInMethodFn),
            _ => None,
        };
    }

    let method: PtrBuiltInMethodFn = match (ty, name) {
        (VariantType::String, "length") => string_length,
        (VariantType::NodePath, "is_absolute") => path_is_absolute,
        (VariantType::NodePath, "get_name_count") => path_get_name_count,
        (VariantType::NodePath, "get_name") => path_get_name,
        (VariantType::NodePath, "get_subname_count") => path_get_subname_count,
        (VariantType::NodePath, "get_subname") => path_get_subname,
        (VariantType::Array, "size") => array_size,
        (VariantType::Array, "push_back") => array_push_back,
        (VariantType::Array, "resize") => array_resize,
        (VariantType::Array, "clear") => array_clear,
        (VariantType::Array, "duplicate") => array_duplicate,
        (VariantType::Array, "has") => array_has,
        (VariantType::Array, "is_typed") => array_is_typed,
        (VariantType::Array, "get_typed_builtin") => array_get_typed_builtin,
        (VariantType::Array, "get_typed_class_name") => array_get_typed_class_name,
        (VariantType::Dictionary, "size") => dict_size,
        (VariantType::Dictionary, "has") => dict_has,
        (VariantType::Dictionary, "erase") => dict_erase,
        (VariantType::Dictionary, "keys") => dict_keys,
        (VariantType::Dictionary, "values") => dict_values,
        (VariantType::Dictionary, "clear") => dict_clear,
        (VariantType::Dictionary, "duplicate") => dict_duplicate,
        (VariantType::Callable, "is_valid") => callable_is_valid,
        (VariantType::Callable, "is_custom") => callable_is_custom,
        (VariantType::Callable, "get_object_id") => callable_get_object_id,
        (VariantType::Callable, "get_method") => callable_get_method,
        (VariantType::Signal, "get_name") => signal_get_name,
        (VariantType::Signal, "get_object_id") => signal_get_object_id,
        _ => return None,
    };
    Some(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parts() {
        let (absolute, names, subnames) = path_parts("/root/Level/Player:position:x");
        assert!(absolute);
        assert_eq!(names, vec!["root", "Level", "Player"]);
        assert_eq!(subnames, vec!["position", "x"]);

        let (absolute, names, subnames) = path_parts("Sprite2D");
        assert!(!absolute);
        assert_eq!(names, vec!["Sprite2D"]);
        assert!(subnames.is_empty());
    }

    #[test]
    fn test_lifecycle_types_have_destructors() {
        assert!(ptr_destructor(VariantType::String.sys()).is_some());
        assert!(ptr_destructor(VariantType::Int.sys()).is_none());
        assert!(ptr_constructor(VariantType::String.sys(), 3).is_some());
        assert!(ptr_constructor(VariantType::Int.sys(), 2).is_none());
    }
}
