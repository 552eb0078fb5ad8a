//! The engine interface functions and their resolver
//!
//! Every function here has the exact C signature the extension expects.
//! [`get_proc_address`] maps symbol names to them.

use std::alloc::Layout;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::ffi::{c_char, c_void, CStr, CString};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::result::Result;

use void_ext_sys::*;

use crate::builtins;
use crate::dispatch::{self, engine_error};
use crate::methods::{self, MockMethod};
use crate::stats::{self, Reported, Severity};
use crate::value::*;
use crate::world::{self, Callbacks, ExtClass, ExtMethod, ExtProperty, ExtSignal};

// ============================================================================
// Test controls
// ============================================================================

thread_local! {
    static ENGINE_VERSION: RefCell<(u32, u32, u32)> = const { RefCell::new((4, 3, 0)) };
    static VERSION_STRING: RefCell<CString> = RefCell::new(CString::default());
    static HIDDEN: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Version reported by `get_engine_version` on this thread
pub fn engine_version() -> (u32, u32, u32) {
    ENGINE_VERSION.with(|v| *v.borrow())
}

pub fn set_engine_version(major: u32, minor: u32, patch: u32) {
    ENGINE_VERSION.with(|v| *v.borrow_mut() = (major, minor, patch));
}

/// Make the resolver report `symbol` as missing on this thread
pub fn hide_symbol(symbol: &str) {
    HIDDEN.with(|h| h.borrow_mut().insert(symbol.to_owned()));
}

pub fn reveal_all() {
    HIDDEN.with(|h| h.borrow_mut().clear());
}

// ============================================================================
// Helpers
// ============================================================================

unsafe fn c_text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

unsafe fn name_at(ptr: ConstStringNamePtr) -> String {
    if ptr.is_null() {
        return String::new();
    }
    name_of(*(ptr as *const usize))
}

unsafe fn string_at(ptr: ConstStringPtr) -> String {
    if ptr.is_null() {
        return String::new();
    }
    (**(ptr as *const Box<String>)).clone()
}

unsafe fn variant_args(args: *const ConstVariantPtr, argc: Int) -> Vec<Value> {
    if args.is_null() || argc <= 0 {
        return Vec::new();
    }
    (0..argc as usize).map(|i| MockVariant::read(*args.add(i))).collect()
}

unsafe fn set_valid(valid: *mut Bool, value: bool) {
    if !valid.is_null() {
        *valid = if value { TRUE } else { FALSE };
    }
}

unsafe fn set_error(error: *mut FfiCallError, value: FfiCallError) {
    if !error.is_null() {
        *error = value;
    }
}

fn type_from_sys(raw: u32) -> VariantType {
    VariantType::from_sys(raw).unwrap_or(VariantType::Nil)
}

/// Decode property metadata handed over by the extension
///
/// # Safety
/// The name pointers in `info` must be null or point at live names and strings.
pub unsafe fn property_from_info(info: &FfiPropertyInfo) -> ExtProperty {
    ExtProperty {
        name: name_at(info.name),
        ty: type_from_sys(info.type_),
        class_name: name_at(info.class_name),
        hint: info.hint,
        hint_string: string_at(info.hint_string),
        usage: info.usage,
    }
}

// ============================================================================
// Version, memory, diagnostics
// ============================================================================

unsafe extern "C" fn get_engine_version(out: *mut FfiEngineVersion) {
    if out.is_null() {
        return;
    }
    let (major, minor, patch) = engine_version();
    let string = VERSION_STRING.with(|s| {
        let mut s = s.borrow_mut();
        *s = CString::new(format!("Mock Engine v{major}.{minor}.{patch}")).unwrap_or_default();
        s.as_ptr()
    });
    *out = FfiEngineVersion { major, minor, patch, string };
}

const MEM_HEADER: usize = 16;

fn mem_layout(bytes: usize) -> Option<Layout> {
    Layout::from_size_align(bytes.checked_add(MEM_HEADER)?, MEM_HEADER).ok()
}

unsafe extern "C" fn mem_alloc(bytes: usize) -> *mut c_void {
    let Some(layout) = mem_layout(bytes) else {
        return std::ptr::null_mut();
    };
    let base = std::alloc::alloc(layout);
    if base.is_null() {
        return std::ptr::null_mut();
    }
    *(base as *mut usize) = bytes;
    base.add(MEM_HEADER) as *mut c_void
}

unsafe extern "C" fn mem_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let base = (ptr as *mut u8).sub(MEM_HEADER);
    let bytes = *(base as *const usize);
    if let Some(layout) = mem_layout(bytes) {
        std::alloc::dealloc(base, layout);
    }
}

unsafe extern "C" fn mem_realloc(ptr: *mut c_void, bytes: usize) -> *mut c_void {
    if ptr.is_null() {
        return mem_alloc(bytes);
    }
    let base = (ptr as *mut u8).sub(MEM_HEADER);
    let old = *(base as *const usize);
    let (Some(old_layout), Some(new_layout)) = (mem_layout(old), mem_layout(bytes)) else {
        return std::ptr::null_mut();
    };
    let grown = std::alloc::realloc(base, old_layout, new_layout.size());
    if grown.is_null() {
        return std::ptr::null_mut();
    }
    *(grown as *mut usize) = bytes;
    grown.add(MEM_HEADER) as *mut c_void
}

unsafe fn report(
    severity: Severity,
    description: *const c_char,
    message: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
) {
    stats::record(Reported {
        severity,
        description: c_text(description),
        message: c_text(message),
        function: c_text(function),
        file: c_text(file),
        line,
    });
}

unsafe extern "C" fn print_error(d: *const c_char, f: *const c_char, file: *const c_char, line: i32, _: Bool) {
    report(Severity::Error, d, std::ptr::null(), f, file, line);
}

unsafe extern "C" fn print_error_with_message(
    d: *const c_char,
    m: *const c_char,
    f: *const c_char,
    file: *const c_char,
    line: i32,
    _: Bool,
) {
    report(Severity::Error, d, m, f, file, line);
}

unsafe extern "C" fn print_warning(d: *const c_char, f: *const c_char, file: *const c_char, line: i32, _: Bool) {
    report(Severity::Warning, d, std::ptr::null(), f, file, line);
}

unsafe extern "C" fn print_warning_with_message(
    d: *const c_char,
    m: *const c_char,
    f: *const c_char,
    file: *const c_char,
    line: i32,
    _: Bool,
) {
    report(Severity::Warning, d, m, f, file, line);
}

unsafe extern "C" fn print_script_error(d: *const c_char, f: *const c_char, file: *const c_char, line: i32, _: Bool) {
    report(Severity::ScriptError, d, std::ptr::null(), f, file, line);
}

unsafe extern "C" fn print_script_error_with_message(
    d: *const c_char,
    m: *const c_char,
    f: *const c_char,
    file: *const c_char,
    line: i32,
    _: Bool,
) {
    report(Severity::ScriptError, d, m, f, file, line);
}

// ============================================================================
// Variants
// ============================================================================

unsafe extern "C" fn variant_new_copy(dst: VariantPtr, src: ConstVariantPtr) {
    MockVariant::write(dst, MockVariant::read(src));
}

unsafe extern "C" fn variant_new_nil(dst: VariantPtr) {
    MockVariant::write(dst, Value::Nil);
}

unsafe extern "C" fn variant_destroy(this: VariantPtr) {
    if !this.is_null() {
        std::ptr::drop_in_place(this as *mut MockVariant);
    }
}

fn expect_args(args: &[Value], count: usize) -> Result<(), FfiCallError> {
    match args.len().cmp(&count) {
        std::cmp::Ordering::Greater => Err(FfiCallError::new(CallErrorKind::TooManyArguments, 0, count as i32)),
        std::cmp::Ordering::Less => Err(FfiCallError::new(CallErrorKind::TooFewArguments, 0, count as i32)),
        std::cmp::Ordering::Equal => Ok(()),
    }
}

/// Dynamic method call on a builtin value
fn builtin_call(this: &Value, method: &str, args: &[Value]) -> Result<Value, FfiCallError> {
    let no_method = Err(FfiCallError::new(CallErrorKind::InvalidMethod, 0, 0));
    match (this, method) {
        (Value::String(s), "length") => expect_args(args, 0).map(|_| Value::Int(s.chars().count() as i64)),
        (Value::String(s), "to_upper") => expect_args(args, 0).map(|_| Value::String(s.to_uppercase())),
        (Value::Array(a), "size") => expect_args(args, 0).map(|_| Value::Int(a.borrow().items.len() as i64)),
        (Value::Array(a), "has") => {
            expect_args(args, 1)?;
            let found = a.borrow().items.iter().any(|v| v.get().map_or(false, |v| value_eq(v, &args[0])));
            Ok(Value::Bool(found))
        }
        (Value::Array(a), "push_back") => {
            expect_args(args, 1)?;
            let mut data = a.borrow_mut();
            if let Some((ty, _)) = &data.typed {
                if args[0].ty() != *ty {
                    return Err(FfiCallError::new(CallErrorKind::InvalidArgument, 0, ty.sys() as i32));
                }
            }
            data.items.push(MockVariant::new(args[0].clone()));
            Ok(Value::Nil)
        }
        (Value::Dictionary(d), "size") => expect_args(args, 0).map(|_| Value::Int(d.borrow().entries.len() as i64)),
        (Value::Dictionary(d), "has") => {
            expect_args(args, 1)?;
            Ok(Value::Bool(d.borrow().position(&args[0]).is_some()))
        }
        (Value::Dictionary(d), "keys") => {
            expect_args(args, 0)?;
            Ok(Value::array(d.borrow().entries.iter().map(|(k, _)| k.value()).collect()))
        }
        (Value::Dictionary(d), "values") => {
            expect_args(args, 0)?;
            Ok(Value::array(d.borrow().entries.iter().map(|(_, v)| v.value()).collect()))
        }
        (Value::Packed(_, p), "size") => expect_args(args, 0).map(|_| Value::Int(p.len() as i64)),
        (Value::Callable(c), "call") => dispatch::invoke_callable(c, args),
        (Value::Callable(c), "is_valid") => expect_args(args, 0).map(|_| Value::Bool(dispatch::callable_is_valid(c))),
        _ => no_method,
    }
}

unsafe extern "C" fn variant_call(
    this: VariantPtr,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
) {
    let receiver = MockVariant::read(this);
    let method = name_at(method);
    let args = variant_args(args, argc);
    let result = match &receiver {
        Value::Object(0) | Value::Nil => Err(FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0)),
        Value::Object(ptr) => dispatch::call_object_method(*ptr, &method, &args),
        other => builtin_call(other, &method, &args),
    };
    finish_call(result, ret, error);
}

unsafe fn finish_call(result: Result<Value, FfiCallError>, ret: VariantPtr, error: *mut FfiCallError) {
    match result {
        Ok(value) => {
            MockVariant::write(ret, value);
            set_error(error, FfiCallError::OK);
        }
        Err(err) => {
            MockVariant::write(ret, Value::Nil);
            set_error(error, err);
        }
    }
}

unsafe extern "C" fn variant_call_static(
    ty: u32,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
) {
    let method = name_at(method);
    let args = variant_args(args, argc);
    let result = match (type_from_sys(ty), method.as_str()) {
        (VariantType::String, "num_int64") => expect_args(&args, 1).and_then(|_| match &args[0] {
            Value::Int(i) => Ok(Value::String(i.to_string())),
            _ => Err(FfiCallError::new(CallErrorKind::InvalidArgument, 0, VariantType::Int.sys() as i32)),
        }),
        (VariantType::String, "chr") => expect_args(&args, 1).and_then(|_| match &args[0] {
            Value::Int(i) => {
                let ch = u32::try_from(*i).ok().and_then(char::from_u32).unwrap_or('\u{fffd}');
                Ok(Value::String(ch.to_string()))
            }
            _ => Err(FfiCallError::new(CallErrorKind::InvalidArgument, 0, VariantType::Int.sys() as i32)),
        }),
        _ => Err(FfiCallError::new(CallErrorKind::InvalidMethod, 0, 0)),
    };
    finish_call(result, ret, error);
}

fn compare(op: VariantOperator, a: &Value, b: &Value) -> Option<bool> {
    use std::cmp::Ordering;
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let x = a.as_float().or_else(|| a.as_int().map(|i| i as f64))?;
            let y = b.as_float().or_else(|| b.as_int().map(|i| i as f64))?;
            x.partial_cmp(&y)?
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => return None,
    };
    Some(match op {
        VariantOperator::Less => ordering == Ordering::Less,
        VariantOperator::LessEqual => ordering != Ordering::Greater,
        VariantOperator::Greater => ordering == Ordering::Greater,
        VariantOperator::GreaterEqual => ordering != Ordering::Less,
        VariantOperator::Equal | VariantOperator::NotEqual => return None,
    })
}

unsafe extern "C" fn variant_evaluate(op: u32, a: ConstVariantPtr, b: ConstVariantPtr, ret: VariantPtr, valid: *mut Bool) {
    let (a, b) = (MockVariant::read(a), MockVariant::read(b));
    let result = match op {
        0 => Some(value_eq(&a, &b)),
        1 => Some(!value_eq(&a, &b)),
        2 => compare(VariantOperator::Less, &a, &b),
        3 => compare(VariantOperator::LessEqual, &a, &b),
        4 => compare(VariantOperator::Greater, &a, &b),
        5 => compare(VariantOperator::GreaterEqual, &a, &b),
        _ => None,
    };
    match result {
        Some(answer) => {
            MockVariant::write(ret, Value::Bool(answer));
            set_valid(valid, true);
        }
        None => {
            MockVariant::write(ret, Value::Nil);
            set_valid(valid, false);
        }
    }
}

fn keyed_get(this: &Value, key: &Value) -> Option<Value> {
    match this {
        Value::Dictionary(d) => {
            let d = d.borrow();
            d.position(key).map(|i| d.entries[i].1.value())
        }
        Value::Array(a) => {
            let index = usize::try_from(key.as_int()?).ok()?;
            a.borrow().items.get(index).map(MockVariant::value)
        }
        Value::Object(ptr) => dispatch::get_property(*ptr, &key.as_text()?),
        _ => None,
    }
}

unsafe extern "C" fn variant_get_keyed(this: ConstVariantPtr, key: ConstVariantPtr, ret: VariantPtr, valid: *mut Bool) {
    let found = keyed_get(&MockVariant::read(this), &MockVariant::read(key));
    set_valid(valid, found.is_some());
    MockVariant::write(ret, found.unwrap_or(Value::Nil));
}

fn keyed_set(this: &Value, key: Value, value: Value) -> bool {
    match this {
        Value::Dictionary(d) => {
            let mut d = d.borrow_mut();
            match d.position(&key) {
                Some(i) => d.entries[i].1 = MockVariant::new(value),
                None => d.entries.push((MockVariant::new(key), MockVariant::new(value))),
            }
            true
        }
        Value::Array(a) => {
            let mut a = a.borrow_mut();
            if let Some((ty, _)) = &a.typed {
                if value.ty() != *ty {
                    return false;
                }
            }
            let Some(index) = key.as_int().and_then(|i| usize::try_from(i).ok()) else {
                return false;
            };
            match a.items.get_mut(index) {
                Some(slot) => {
                    *slot = MockVariant::new(value);
                    true
                }
                None => false,
            }
        }
        Value::Object(ptr) => match key.as_text() {
            Some(name) => dispatch::set_property(*ptr, &name, value),
            None => false,
        },
        _ => false,
    }
}

unsafe extern "C" fn variant_set_keyed(this: VariantPtr, key: ConstVariantPtr, value: ConstVariantPtr, valid: *mut Bool) {
    let ok = keyed_set(&MockVariant::read(this), MockVariant::read(key), MockVariant::read(value));
    set_valid(valid, ok);
}

unsafe extern "C" fn variant_get_type(this: ConstVariantPtr) -> u32 {
    if this.is_null() {
        return 0;
    }
    (*(this as *const MockVariant)).ty().sys()
}

unsafe extern "C" fn variant_stringify(this: ConstVariantPtr, out: StringPtr) {
    let text = stringify(&MockVariant::read(this));
    write_native(VariantType::String, Value::String(text), out);
}

unsafe extern "C" fn variant_hash(this: ConstVariantPtr) -> Int {
    let value = MockVariant::read(this);
    let mut hasher = DefaultHasher::new();
    value.ty().sys().hash(&mut hasher);
    stringify(&value).hash(&mut hasher);
    hasher.finish() as Int
}

unsafe extern "C" fn variant_booleanize(this: ConstVariantPtr) -> Bool {
    let truthy = match MockVariant::read(this) {
        Value::Nil => false,
        Value::Bool(b) => b,
        Value::Int(i) => i != 0,
        Value::Float(f) => f != 0.0,
        Value::String(s) | Value::NodePath(s) => !s.is_empty(),
        Value::StringName(id) => id != 0,
        Value::Object(ptr) => world::object_exists(ptr),
        Value::Array(a) => !a.borrow().items.is_empty(),
        Value::Dictionary(d) => !d.borrow().entries.is_empty(),
        Value::Packed(_, p) => !p.is_empty(),
        Value::Callable(c) => !matches!(c, CallableData::Null),
        Value::Signal(object, _) => object != 0,
        Value::Pod(_, bytes) => bytes.iter().any(|b| *b != 0),
    };
    if truthy {
        TRUE
    } else {
        FALSE
    }
}

unsafe extern "C" fn get_variant_from_type_constructor(ty: u32) -> Option<VariantFromTypeConstructorFn> {
    builtins::to_variant_constructor(ty)
}

unsafe extern "C" fn get_variant_to_type_constructor(ty: u32) -> Option<TypeFromVariantConstructorFn> {
    builtins::from_variant_constructor(ty)
}

unsafe extern "C" fn variant_get_ptr_constructor(ty: u32, index: i32) -> Option<PtrConstructorFn> {
    builtins::ptr_constructor(ty, index)
}

unsafe extern "C" fn variant_get_ptr_destructor(ty: u32) -> Option<PtrDestructorFn> {
    builtins::ptr_destructor(ty)
}

unsafe extern "C" fn variant_get_ptr_builtin_method(
    ty: u32,
    method: ConstStringNamePtr,
    _hash: Int,
) -> Option<PtrBuiltInMethodFn> {
    builtins::builtin_method(VariantType::from_sys(ty)?, &name_at(method))
}

unsafe extern "C" fn variant_get_ptr_operator_evaluator(op: u32, a: u32, b: u32) -> Option<PtrOperatorEvaluatorFn> {
    builtins::operator_evaluator(op, a, b)
}

// ============================================================================
// Strings and containers
// ============================================================================

unsafe fn utf8_input(chars: *const c_char, len: Int) -> String {
    if chars.is_null() {
        return String::new();
    }
    let bytes = if len < 0 {
        CStr::from_ptr(chars).to_bytes()
    } else {
        std::slice::from_raw_parts(chars as *const u8, len as usize)
    };
    String::from_utf8_lossy(bytes).into_owned()
}

unsafe extern "C" fn string_new_with_utf8_chars_and_len(dst: StringPtr, chars: *const c_char, len: Int) {
    write_native(VariantType::String, Value::String(utf8_input(chars, len)), dst);
}

unsafe extern "C" fn string_to_utf8_chars(this: ConstStringPtr, buf: *mut c_char, max_len: Int) -> Int {
    let text = string_at(this);
    let bytes = text.as_bytes();
    if !buf.is_null() && max_len > 0 {
        let count = bytes.len().min(max_len as usize);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf as *mut u8, count);
    }
    bytes.len() as Int
}

unsafe extern "C" fn string_name_new_with_utf8_chars_and_len(dst: StringNamePtr, chars: *const c_char, len: Int) {
    *(dst as *mut usize) = intern(&utf8_input(chars, len));
}

unsafe extern "C" fn array_operator_index(this: TypePtr, index: Int) -> VariantPtr {
    let array = &*(this as *const Rc<std::cell::RefCell<ArrayData>>);
    let mut data = array.borrow_mut();
    match usize::try_from(index).ok().and_then(|i| data.items.get_mut(i)) {
        Some(slot) => slot as *mut MockVariant as VariantPtr,
        None => {
            engine_error(&format!("Index p_index = {index} is out of bounds"));
            std::ptr::null_mut()
        }
    }
}

unsafe extern "C" fn array_set_typed(this: TypePtr, ty: u32, class_name: ConstStringNamePtr, _script: ConstVariantPtr) {
    let array = &*(this as *const Rc<std::cell::RefCell<ArrayData>>);
    let mut data = array.borrow_mut();
    if !data.items.is_empty() || data.typed.is_some() {
        engine_error("Type can only be set once, on an empty array");
        return;
    }
    data.typed = Some((type_from_sys(ty), name_at(class_name)));
}

unsafe extern "C" fn dictionary_operator_index(this: TypePtr, key: ConstVariantPtr) -> VariantPtr {
    let dict = &*(this as *const Rc<std::cell::RefCell<DictData>>);
    let key = MockVariant::read(key);
    let mut data = dict.borrow_mut();
    let index = match data.position(&key) {
        Some(i) => i,
        None => {
            data.entries.push((MockVariant::new(key), MockVariant::nil()));
            data.entries.len() - 1
        }
    };
    &mut data.entries[index].1 as *mut MockVariant as VariantPtr
}

unsafe extern "C" fn packed_array_operator_index(this: TypePtr, index: Int) -> *mut c_void {
    let data = &mut **(this as *mut Box<PackedData>);
    let ptr = usize::try_from(index).map_or(std::ptr::null_mut(), |i| data.element_ptr(i));
    if ptr.is_null() {
        engine_error(&format!("Index p_index = {index} is out of bounds"));
    }
    ptr
}

// ============================================================================
// Objects and method binds
// ============================================================================

unsafe extern "C" fn object_method_bind_call(
    method_bind: MethodBindPtr,
    object: ObjectPtr,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
) {
    stats::bump(|s| s.varcalls += 1);
    let method = &*(method_bind as *const MockMethod);
    let result = if object.is_null() || !world::object_exists(object as usize) {
        Err(FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0))
    } else {
        methods::invoke_checked(method, object as usize, &variant_args(args, argc))
    };
    finish_call(result, ret, error);
}

unsafe extern "C" fn object_method_bind_ptrcall(
    method_bind: MethodBindPtr,
    object: ObjectPtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    stats::bump(|s| {
        s.ptrcalls += 1;
        if args.is_null() {
            s.null_arg_ptrcalls += 1;
        }
    });
    let method = &*(method_bind as *const MockMethod);
    let decoded: Vec<Value> = if method.args.is_empty() {
        Vec::new()
    } else if args.is_null() {
        engine_error(&format!("Null argument array passed to '{}'", method.name));
        Vec::new()
    } else {
        method.args.iter().enumerate().map(|(i, ty)| read_native(*ty, *args.add(i))).collect()
    };

    let result = if method.vararg {
        Err(FfiCallError::new(CallErrorKind::InvalidMethod, 0, 0))
    } else if object.is_null() || !world::object_exists(object as usize) {
        Err(FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0))
    } else {
        methods::invoke_checked(method, object as usize, &decoded)
    };

    let value = match result {
        Ok(value) => value,
        Err(err) => {
            engine_error(&format!("Pointer call to '{}.{}' failed: {:?}", method.class, method.name, err.kind()));
            Value::Nil
        }
    };
    if let Some(ty) = method.ret {
        if !ret.is_null() {
            write_native(ty, value, ret);
        }
    }
}

unsafe extern "C" fn object_destroy(object: ObjectPtr) {
    dispatch::destroy(object as usize);
}

unsafe extern "C" fn global_get_singleton(name: ConstStringNamePtr) -> ObjectPtr {
    world::singleton(&name_at(name)).unwrap_or(0) as ObjectPtr
}

unsafe extern "C" fn object_set_instance(object: ObjectPtr, class_name: ConstStringNamePtr, instance: ClassInstancePtr) {
    let class = name_at(class_name);
    let known = world::with_object(object as usize, |o| {
        o.class = class.clone();
        o.instance = instance as usize;
    });
    if known.is_none() {
        engine_error(&format!("Cannot attach an instance of '{class}' to an unknown object"));
    }
}

unsafe extern "C" fn object_get_instance(object: ConstObjectPtr) -> ClassInstancePtr {
    world::instance_of(object as usize) as ClassInstancePtr
}

unsafe extern "C" fn object_get_class_name(object: ConstObjectPtr, _library: ClassLibraryPtr, out: StringNamePtr) -> Bool {
    match world::class_of(object as usize) {
        Some(class) => {
            *(out as *mut usize) = intern(&class);
            TRUE
        }
        None => FALSE,
    }
}

fn class_tag(class: &str) -> ClassTagPtr {
    if world::class_exists(class) {
        (intern(class) + 1) as ClassTagPtr
    } else {
        std::ptr::null_mut()
    }
}

unsafe extern "C" fn object_cast_to(object: ConstObjectPtr, tag: ClassTagPtr) -> ObjectPtr {
    if tag.is_null() {
        return std::ptr::null_mut();
    }
    let target = name_of(tag as usize - 1);
    match world::class_of(object as usize) {
        Some(class) if world::inherits(&class, &target) => object as ObjectPtr,
        _ => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn object_get_instance_id(object: ConstObjectPtr) -> ObjectId {
    world::id_of(object as usize).unwrap_or(0)
}

unsafe extern "C" fn object_get_instance_from_id(id: ObjectId) -> ObjectPtr {
    world::ptr_from_id(id).unwrap_or(0) as ObjectPtr
}

unsafe extern "C" fn callable_custom_create(out: TypePtr, info: *mut FfiCallableCustomInfo) {
    let data = match info.as_ref() {
        Some(info) => {
            stats::bump(|s| s.callables_created += 1);
            CallableData::Custom(Rc::new(CustomCallable::from_info(info)))
        }
        None => CallableData::Null,
    };
    write_native(VariantType::Callable, Value::Callable(data), out);
}

// ============================================================================
// Class database
// ============================================================================

unsafe extern "C" fn classdb_construct_object(class_name: ConstStringNamePtr) -> ObjectPtr {
    dispatch::construct(&name_at(class_name)) as ObjectPtr
}

unsafe extern "C" fn classdb_get_method_bind(class_name: ConstStringNamePtr, method: ConstStringNamePtr, _hash: Int) -> MethodBindPtr {
    let (class, method) = (name_at(class_name), name_at(method));
    match methods::find_method(&class, &method) {
        Some(bind) => bind as *const MockMethod as MethodBindPtr,
        None => {
            engine_error(&format!("Method '{class}.{method}' not found"));
            std::ptr::null()
        }
    }
}

unsafe extern "C" fn classdb_get_class_tag(class_name: ConstStringNamePtr) -> ClassTagPtr {
    class_tag(&name_at(class_name))
}

unsafe extern "C" fn classdb_register_extension_class(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    parent_class_name: ConstStringNamePtr,
    info: *const FfiClassCreationInfo,
) {
    let (name, parent) = (name_at(class_name), name_at(parent_class_name));
    let Some(info) = info.as_ref() else {
        engine_error(&format!("Class '{name}' registered without creation info"));
        return;
    };
    if world::class_exists(&name) {
        engine_error(&format!("Class '{name}' already exists"));
        return;
    }
    if !world::class_exists(&parent) {
        engine_error(&format!("Parent class '{parent}' of '{name}' does not exist"));
        return;
    }
    let class = ExtClass {
        name: name.clone(),
        parent,
        library: library as usize,
        callbacks: Callbacks::from_info(info),
        methods: Vec::new(),
        properties: Vec::new(),
        signals: Vec::new(),
    };
    world::with_classdb(|db| db.insert(name, class));
}

/// Run `f` on a class registered by `library`, reporting anything else
fn with_own_class(library: ClassLibraryPtr, class: &str, f: impl FnOnce(&mut ExtClass)) {
    let found = world::with_classdb(|db| match db.get_mut(class) {
        Some(ext) if ext.library == library as usize => {
            f(ext);
            true
        }
        _ => false,
    });
    if !found {
        engine_error(&format!("Class '{class}' is not registered by this extension"));
    }
}

unsafe extern "C" fn classdb_register_extension_class_method(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const FfiClassMethodInfo,
) {
    let class = name_at(class_name);
    let Some(info) = info.as_ref() else {
        engine_error(&format!("Method on '{class}' registered without info"));
        return;
    };
    let argc = info.argument_count as usize;
    let arg_infos: Vec<ExtProperty> = if info.arguments_info.is_null() {
        Vec::new()
    } else {
        (0..argc).map(|i| property_from_info(&*info.arguments_info.add(i))).collect()
    };
    let ret = if info.has_return_value != FALSE && !info.return_value_info.is_null() {
        Some(property_from_info(&*info.return_value_info).ty)
    } else {
        None
    };
    let method = ExtMethod {
        name: name_at(info.name),
        userdata: info.method_userdata as usize,
        call: info.call_func,
        ptrcall: info.ptrcall_func,
        flags: info.method_flags,
        ret,
        args: arg_infos.iter().map(|a| a.ty).collect(),
        arg_names: arg_infos.into_iter().map(|a| a.name).collect(),
    };
    if method.args.len() != argc {
        engine_error(&format!("Method '{}' declares {argc} arguments without their info", method.name));
        return;
    }
    let mut duplicate = false;
    with_own_class(library, &class, |ext| {
        if ext.method(&method.name).is_some() {
            duplicate = true;
        } else {
            ext.methods.push(method.clone());
        }
    });
    if duplicate {
        engine_error(&format!("Method '{class}.{}' already exists", method.name));
    }
}

unsafe extern "C" fn classdb_register_extension_class_property(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const FfiPropertyInfo,
) {
    let class = name_at(class_name);
    let Some(info) = info.as_ref() else {
        engine_error(&format!("Property on '{class}' registered without info"));
        return;
    };
    let property = property_from_info(info);
    with_own_class(library, &class, |ext| {
        ext.properties.retain(|p| p.name != property.name);
        ext.properties.push(property);
    });
}

unsafe extern "C" fn classdb_register_extension_class_signal(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    signal_name: ConstStringNamePtr,
    args: *const FfiPropertyInfo,
    argc: Int,
) {
    let class = name_at(class_name);
    let args = if args.is_null() || argc <= 0 {
        Vec::new()
    } else {
        (0..argc as usize)
            .map(|i| {
                let arg = property_from_info(&*args.add(i));
                (arg.name, arg.ty)
            })
            .collect()
    };
    let signal = ExtSignal { name: name_at(signal_name), args };
    with_own_class(library, &class, |ext| {
        ext.signals.retain(|s| s.name != signal.name);
        ext.signals.push(signal);
    });
}

unsafe extern "C" fn classdb_unregister_extension_class_method(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    method: ConstStringNamePtr,
) {
    let method = name_at(method);
    with_own_class(library, &name_at(class_name), |ext| ext.methods.retain(|m| m.name != method));
}

unsafe extern "C" fn classdb_unregister_extension_class_signal(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    signal: ConstStringNamePtr,
) {
    let signal = name_at(signal);
    with_own_class(library, &name_at(class_name), |ext| ext.signals.retain(|s| s.name != signal));
}

unsafe extern "C" fn classdb_unregister_extension_class(library: ClassLibraryPtr, class_name: ConstStringNamePtr) {
    let class = name_at(class_name);
    let outcome = world::with_classdb(|db| {
        match db.get(&class) {
            Some(ext) if ext.library != library as usize => return Err("is not registered by this extension"),
            None => return Err("is not registered"),
            Some(_) => {}
        }
        if db.values().any(|c| c.parent == class) {
            return Err("still has registered subclasses");
        }
        db.remove(&class);
        Ok(())
    });
    if let Err(reason) = outcome {
        engine_error(&format!("Cannot unregister class '{class}': it {reason}"));
    }
}

unsafe extern "C" fn get_native_struct_size(name: ConstStringNamePtr) -> u64 {
    match name_at(name).as_str() {
        "AudioFrame" => 8,
        "ObjectID" => 8,
        "CaretInfo" => 40,
        "Glyph" => 80,
        _ => 0,
    }
}

// ============================================================================
// Resolver
// ============================================================================

fn erase(function: *const ()) -> InterfaceFn {
    // Safety: only ever called with `extern "C"` function pointers.
    unsafe { std::mem::transmute::<*const (), InterfaceFn>(function) }
}

macro_rules! symbols {
    ($name:expr, { $( $symbol:ident ),* $(,)? }, { $( $alias:literal => $target:ident ),* $(,)? }) => {
        match $name {
            $( stringify!($symbol) => Some(erase($symbol as *const ())), )*
            $( $alias => Some(erase($target as *const ())), )*
            _ => None,
        }
    };
}

fn lookup(name: &str) -> Option<InterfaceFn> {
    symbols!(name, {
        get_engine_version,
        mem_alloc,
        mem_realloc,
        mem_free,
        print_error,
        print_error_with_message,
        print_warning,
        print_warning_with_message,
        print_script_error,
        print_script_error_with_message,
        variant_new_copy,
        variant_new_nil,
        variant_destroy,
        variant_call,
        variant_call_static,
        variant_evaluate,
        variant_get_keyed,
        variant_set_keyed,
        variant_get_type,
        variant_stringify,
        variant_hash,
        variant_booleanize,
        get_variant_from_type_constructor,
        get_variant_to_type_constructor,
        variant_get_ptr_constructor,
        variant_get_ptr_destructor,
        variant_get_ptr_builtin_method,
        variant_get_ptr_operator_evaluator,
        string_new_with_utf8_chars_and_len,
        string_to_utf8_chars,
        string_name_new_with_utf8_chars_and_len,
        array_operator_index,
        array_set_typed,
        dictionary_operator_index,
        object_method_bind_call,
        object_method_bind_ptrcall,
        object_destroy,
        global_get_singleton,
        object_set_instance,
        object_get_instance,
        object_get_class_name,
        object_cast_to,
        object_get_instance_id,
        object_get_instance_from_id,
        callable_custom_create,
        classdb_construct_object,
        classdb_get_method_bind,
        classdb_get_class_tag,
        classdb_register_extension_class,
        classdb_register_extension_class_method,
        classdb_register_extension_class_property,
        classdb_register_extension_class_signal,
        classdb_unregister_extension_class_method,
        classdb_unregister_extension_class_signal,
        classdb_unregister_extension_class,
        get_native_struct_size,
    }, {
        "packed_byte_array_operator_index" => packed_array_operator_index,
        "packed_int32_array_operator_index" => packed_array_operator_index,
        "packed_int64_array_operator_index" => packed_array_operator_index,
        "packed_float32_array_operator_index" => packed_array_operator_index,
        "packed_float64_array_operator_index" => packed_array_operator_index,
        "packed_string_array_operator_index" => packed_array_operator_index,
        "packed_vector2_array_operator_index" => packed_array_operator_index,
        "packed_vector3_array_operator_index" => packed_array_operator_index,
        "packed_vector4_array_operator_index" => packed_array_operator_index,
        "packed_color_array_operator_index" => packed_array_operator_index,
    })
}

/// The resolver handed to an extension entry point
///
/// # Safety
/// `name` must be a valid nul-terminated string.
pub unsafe extern "C" fn get_proc_address(name: *const c_char) -> Option<InterfaceFn> {
    if name.is_null() {
        return None;
    }
    let name = CStr::from_ptr(name).to_str().ok()?;
    if HIDDEN.with(|h| h.borrow().contains(name)) {
        return None;
    }
    lookup(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_interface_symbol_resolves() {
        for symbol in EngineInterface::SYMBOLS {
            assert!(lookup(symbol).is_some(), "missing {symbol}");
        }
    }

    #[test]
    fn test_hidden_symbol_is_missing() {
        hide_symbol("variant_call");
        let name = CString::new("variant_call").unwrap();
        assert!(unsafe { get_proc_address(name.as_ptr()) }.is_none());
        reveal_all();
        assert!(unsafe { get_proc_address(name.as_ptr()) }.is_some());
    }

    #[test]
    fn test_mem_roundtrip() {
        unsafe {
            let ptr = mem_alloc(24) as *mut u8;
            assert!(!ptr.is_null());
            ptr.write_bytes(7, 24);
            let ptr = mem_realloc(ptr as *mut c_void, 64) as *mut u8;
            assert_eq!(*ptr.add(23), 7);
            mem_free(ptr as *mut c_void);
        }
    }

    #[test]
    fn test_keyed_access_on_dictionary() {
        let dict = Value::dictionary(vec![(Value::string("hp"), Value::Int(10))]);
        assert_eq!(keyed_get(&dict, &Value::string("hp")).and_then(|v| v.as_int()), Some(10));
        assert!(keyed_get(&dict, &Value::string("mp")).is_none());
        assert!(keyed_set(&dict, Value::string("mp"), Value::Int(3)));
        assert_eq!(keyed_get(&dict, &Value::string("mp")).and_then(|v| v.as_int()), Some(3));
    }
}
