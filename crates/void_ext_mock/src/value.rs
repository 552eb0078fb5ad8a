//! Engine-side value representation
//!
//! A variant slot holds its tag in the first word and a boxed [`Value`] in
//! the second. Builtin types use the same storage the bridge treats as
//! opaque: strings and node paths are a `Box<String>`, names are an
//! interned id, arrays and dictionaries are shared `Rc` cells, packed
//! arrays and callables are boxed in the first of their two words.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::OnceLock;

use parking_lot::Mutex;
use void_ext_sys::{FfiCallableCustomInfo, VariantType};

// ============================================================================
// Name interning
// ============================================================================

struct Interner {
    names: Vec<String>,
    ids: HashMap<String, usize>,
}

fn interner() -> &'static Mutex<Interner> {
    static INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| {
        let mut ids = HashMap::new();
        ids.insert(String::new(), 0);
        Mutex::new(Interner { names: vec![String::new()], ids })
    })
}

/// Intern `text`, returning its stable id (the empty name is id 0)
pub fn intern(text: &str) -> usize {
    let mut interner = interner().lock();
    if let Some(&id) = interner.ids.get(text) {
        return id;
    }
    let id = interner.names.len();
    interner.names.push(text.to_owned());
    interner.ids.insert(text.to_owned(), id);
    id
}

/// Text of an interned id
pub fn name_of(id: usize) -> String {
    interner().lock().names.get(id).cloned().unwrap_or_default()
}

// ============================================================================
// Values
// ============================================================================

/// Array storage shared between every copy of one engine array
#[derive(Debug, Default)]
pub struct ArrayData {
    pub items: Vec<MockVariant>,
    pub typed: Option<(VariantType, String)>,
}

/// Dictionary storage; entries keep insertion order
#[derive(Debug, Default)]
pub struct DictData {
    pub entries: Vec<(MockVariant, MockVariant)>,
}

impl DictData {
    pub fn position(&self, key: &Value) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.get().map_or(false, |k| value_eq(k, key)))
    }
}

/// A host-implemented callable; freeing the last copy calls its free hook
#[derive(Debug)]
pub struct CustomCallable {
    pub userdata: usize,
    pub object_id: u64,
    pub call_func: Option<void_ext_sys::CallableCustomCallFn>,
    pub is_valid_func: Option<void_ext_sys::CallableCustomIsValidFn>,
    pub free_func: Option<void_ext_sys::CallableCustomFreeFn>,
    pub to_string_func: Option<void_ext_sys::CallableCustomToStringFn>,
}

impl CustomCallable {
    pub fn from_info(info: &FfiCallableCustomInfo) -> Self {
        Self {
            userdata: info.callable_userdata as usize,
            object_id: info.object_id,
            call_func: info.call_func,
            is_valid_func: info.is_valid_func,
            free_func: info.free_func,
            to_string_func: info.to_string_func,
        }
    }
}

impl Drop for CustomCallable {
    fn drop(&mut self) {
        if let Some(free) = self.free_func {
            crate::stats::bump(|s| s.callables_freed += 1);
            unsafe { free(self.userdata as *mut c_void) };
        }
    }
}

/// What a callable refers to
#[derive(Debug, Clone)]
pub enum CallableData {
    Null,
    Method { object: u64, method: String },
    Custom(Rc<CustomCallable>),
}

impl CallableData {
    /// Engine notion of callable identity
    pub fn same(&self, other: &CallableData) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Method { object: a, method: m }, Self::Method { object: b, method: n }) => a == b && m == n,
            (Self::Custom(a), Self::Custom(b)) => Rc::ptr_eq(a, b) || a.userdata == b.userdata,
            _ => false,
        }
    }
}

/// One engine value
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringName(usize),
    NodePath(String),
    /// Plain-old-data builtin (math types, colors, RIDs) as raw bytes
    Pod(VariantType, Vec<u8>),
    Object(usize),
    Callable(CallableData),
    Signal(u64, String),
    Dictionary(Rc<RefCell<DictData>>),
    Array(Rc<RefCell<ArrayData>>),
    Packed(VariantType, PackedData),
}

impl Value {
    pub fn ty(&self) -> VariantType {
        match self {
            Self::Nil => VariantType::Nil,
            Self::Bool(_) => VariantType::Bool,
            Self::Int(_) => VariantType::Int,
            Self::Float(_) => VariantType::Float,
            Self::String(_) => VariantType::String,
            Self::StringName(_) => VariantType::StringName,
            Self::NodePath(_) => VariantType::NodePath,
            Self::Pod(ty, _) => *ty,
            Self::Object(_) => VariantType::Object,
            Self::Callable(_) => VariantType::Callable,
            Self::Signal(..) => VariantType::Signal,
            Self::Dictionary(_) => VariantType::Dictionary,
            Self::Array(_) => VariantType::Array,
            Self::Packed(ty, _) => *ty,
        }
    }

    pub fn string(text: &str) -> Self {
        Self::String(text.to_owned())
    }

    pub fn name(text: &str) -> Self {
        Self::StringName(intern(text))
    }

    pub fn vector2(x: f32, y: f32) -> Self {
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&x.to_ne_bytes());
        bytes.extend_from_slice(&y.to_ne_bytes());
        Self::Pod(VariantType::Vector2, bytes)
    }

    pub fn rid(id: u64) -> Self {
        Self::Pod(VariantType::Rid, id.to_ne_bytes().to_vec())
    }

    /// A fresh dictionary holding `pairs` in order
    pub fn dictionary(pairs: Vec<(Value, Value)>) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (MockVariant::new(k), MockVariant::new(v)))
            .collect();
        Self::Dictionary(Rc::new(RefCell::new(DictData { entries })))
    }

    /// A fresh untyped array
    pub fn array(items: Vec<Value>) -> Self {
        let items = items.into_iter().map(MockVariant::new).collect();
        Self::Array(Rc::new(RefCell::new(ArrayData { items, typed: None })))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text of a string, name or path
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::String(s) | Self::NodePath(s) => Some(s.clone()),
            Self::StringName(id) => Some(name_of(*id)),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<usize> {
        match self {
            Self::Object(ptr) => Some(*ptr),
            _ => None,
        }
    }

    pub fn as_vector2(&self) -> Option<(f32, f32)> {
        match self {
            Self::Pod(VariantType::Vector2, bytes) if bytes.len() == 8 => {
                let x = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let y = f32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                Some((x, y))
            }
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

/// Engine equality
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::NodePath(x), Value::NodePath(y)) => x == y,
        (Value::StringName(x), Value::StringName(y)) => x == y,
        (Value::String(s), Value::StringName(id)) | (Value::StringName(id), Value::String(s)) => *s == name_of(*id),
        (Value::Pod(t, x), Value::Pod(u, y)) => t == u && x == y,
        (Value::Object(x), Value::Object(y)) => x == y,
        (Value::Callable(x), Value::Callable(y)) => x.same(y),
        (Value::Signal(o, n), Value::Signal(p, m)) => o == p && n == m,
        (Value::Array(x), Value::Array(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.items.len() == y.items.len()
                && x.items.iter().zip(y.items.iter()).all(|(p, q)| variant_eq(p, q))
        }
        (Value::Dictionary(x), Value::Dictionary(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.entries.len() == y.entries.len()
                && x.entries.iter().all(|(k, v)| {
                    let key = k.value();
                    y.position(&key).map_or(false, |i| variant_eq(v, &y.entries[i].1))
                })
        }
        (Value::Packed(t, x), Value::Packed(u, y)) => t == u && x.same_contents(y),
        _ => false,
    }
}

fn variant_eq(a: &MockVariant, b: &MockVariant) -> bool {
    value_eq(&a.value(), &b.value())
}

/// Engine text representation (objects are handled by the world)
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Nil => "<null>".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("{f:?}"),
        Value::String(s) | Value::NodePath(s) => s.clone(),
        Value::StringName(id) => name_of(*id),
        Value::Pod(VariantType::Vector2, _) => match value.as_vector2() {
            Some((x, y)) => format!("({x:?}, {y:?})"),
            None => String::new(),
        },
        Value::Pod(VariantType::Rid, bytes) => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8.min(bytes.len())]);
            format!("RID({})", u64::from_ne_bytes(raw))
        }
        Value::Pod(ty, _) => format!("{ty}()"),
        Value::Object(ptr) => format!("<Object#{ptr:#x}>"),
        Value::Callable(CallableData::Method { method, .. }) => format!("Callable({method})"),
        Value::Callable(_) => "Callable()".to_owned(),
        Value::Signal(_, name) => format!("Signal({name})"),
        Value::Array(items) => {
            let items = items.borrow();
            let mut out = String::from("[");
            for (i, item) in items.items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&stringify(&item.value()));
            }
            out.push(']');
            out
        }
        Value::Dictionary(dict) => {
            let dict = dict.borrow();
            let mut out = String::from("{ ");
            for (i, (k, v)) in dict.entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: {}", stringify(&k.value()), stringify(&v.value()));
            }
            out.push_str(" }");
            out
        }
        Value::Packed(_, data) => format!("[{} elements]", data.len()),
    }
}

// ============================================================================
// Packed arrays
// ============================================================================

/// Size of one element of a packed array type
pub fn packed_elem_size(ty: VariantType) -> usize {
    match ty {
        VariantType::PackedByteArray => 1,
        VariantType::PackedInt32Array | VariantType::PackedFloat32Array => 4,
        VariantType::PackedInt64Array | VariantType::PackedFloat64Array => 8,
        VariantType::PackedVector2Array => 8,
        VariantType::PackedVector3Array => 12,
        VariantType::PackedVector4Array | VariantType::PackedColorArray => 16,
        _ => 0,
    }
}

/// Contiguous packed storage, 8-byte aligned
#[derive(Debug, Clone)]
pub enum PackedData {
    Pod { elem_size: usize, len: usize, buf: Vec<u64> },
    Strings(Vec<Box<String>>),
}

impl PackedData {
    pub fn new(ty: VariantType) -> Self {
        if ty == VariantType::PackedStringArray {
            Self::Strings(Vec::new())
        } else {
            Self::Pod { elem_size: packed_elem_size(ty), len: 0, buf: Vec::new() }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Pod { len, .. } => *len,
            Self::Strings(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resize(&mut self, new_len: usize) {
        match self {
            Self::Pod { elem_size, len, buf } => {
                let old_bytes = *len * *elem_size;
                let new_bytes = new_len * *elem_size;
                buf.resize((new_bytes + 7) / 8, 0);
                *len = new_len;
                if new_bytes > old_bytes {
                    let bytes = bytes_of_mut(buf);
                    bytes[old_bytes..new_bytes].fill(0);
                }
            }
            Self::Strings(items) => items.resize_with(new_len, || Box::new(String::new())),
        }
    }

    /// Pointer to element `index`, or null when out of range
    pub fn element_ptr(&mut self, index: usize) -> *mut c_void {
        if index >= self.len() {
            return std::ptr::null_mut();
        }
        match self {
            Self::Pod { elem_size, buf, .. } => {
                let offset = index * *elem_size;
                unsafe { (buf.as_mut_ptr() as *mut u8).add(offset) as *mut c_void }
            }
            Self::Strings(items) => &mut items[index] as *mut Box<String> as *mut c_void,
        }
    }

    /// Raw element bytes
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Pod { elem_size, len, buf } => {
                let bytes = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, buf.len() * 8) };
                bytes[..len * elem_size].to_vec()
            }
            Self::Strings(_) => Vec::new(),
        }
    }

    pub fn strings(&self) -> Vec<String> {
        match self {
            Self::Strings(items) => items.iter().map(|s| s.as_str().to_owned()).collect(),
            Self::Pod { .. } => Vec::new(),
        }
    }

    pub fn from_bytes(ty: VariantType, bytes: &[u8]) -> Self {
        let mut data = Self::new(ty);
        let size = packed_elem_size(ty).max(1);
        data.resize(bytes.len() / size);
        if let Self::Pod { buf, .. } = &mut data {
            bytes_of_mut(buf)[..bytes.len()].copy_from_slice(bytes);
        }
        data
    }

    pub fn from_strings(items: &[&str]) -> Self {
        Self::Strings(items.iter().map(|s| Box::new((*s).to_owned())).collect())
    }

    fn same_contents(&self, other: &PackedData) -> bool {
        match (self, other) {
            (Self::Strings(a), Self::Strings(b)) => a == b,
            (Self::Pod { .. }, Self::Pod { .. }) => self.bytes() == other.bytes(),
            _ => false,
        }
    }
}

fn bytes_of_mut(buf: &mut [u64]) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut u8, buf.len() * 8) }
}

// ============================================================================
// Variant slots
// ============================================================================

/// Three-word variant slot as laid out by this engine
#[repr(C)]
#[derive(Debug)]
pub struct MockVariant {
    tag: usize,
    value: Option<Box<Value>>,
    reserved: usize,
}

impl MockVariant {
    pub fn new(value: Value) -> Self {
        Self { tag: value.ty().sys() as usize, value: Some(Box::new(value)), reserved: 0 }
    }

    pub fn nil() -> Self {
        Self::new(Value::Nil)
    }

    pub fn ty(&self) -> VariantType {
        VariantType::from_sys(self.tag as u32).unwrap_or(VariantType::Nil)
    }

    pub fn get(&self) -> Option<&Value> {
        self.value.as_deref()
    }

    /// Cloned payload
    pub fn value(&self) -> Value {
        self.get().cloned().unwrap_or(Value::Nil)
    }

    /// Clone the payload behind a variant pointer
    ///
    /// # Safety
    /// `ptr` must point at an initialized slot.
    pub unsafe fn read(ptr: *const c_void) -> Value {
        if ptr.is_null() {
            return Value::Nil;
        }
        (*(ptr as *const MockVariant)).value()
    }

    /// Construct a slot in uninitialized storage
    ///
    /// # Safety
    /// `ptr` must be valid for writes of three words.
    pub unsafe fn write(ptr: *mut c_void, value: Value) {
        if !ptr.is_null() {
            std::ptr::write(ptr as *mut MockVariant, MockVariant::new(value));
        }
    }

    /// Replace the payload of an initialized slot
    ///
    /// # Safety
    /// `ptr` must point at an initialized slot.
    pub unsafe fn assign(ptr: *mut c_void, value: Value) {
        if !ptr.is_null() {
            *(ptr as *mut MockVariant) = MockVariant::new(value);
        }
    }
}

impl Clone for MockVariant {
    fn clone(&self) -> Self {
        Self::new(self.value())
    }
}

// ============================================================================
// Native storage
// ============================================================================

/// Byte size of a plain-old-data builtin
pub fn pod_size(ty: VariantType) -> usize {
    match ty {
        VariantType::Vector2 | VariantType::Vector2i | VariantType::Rid => 8,
        VariantType::Vector3 | VariantType::Vector3i => 12,
        VariantType::Rect2
        | VariantType::Rect2i
        | VariantType::Vector4
        | VariantType::Vector4i
        | VariantType::Plane
        | VariantType::Quaternion
        | VariantType::Color => 16,
        VariantType::Transform2D | VariantType::Aabb => 24,
        VariantType::Basis => 36,
        VariantType::Transform3D => 48,
        VariantType::Projection => 64,
        _ => 0,
    }
}

/// Default value of a type
pub fn default_value(ty: VariantType) -> Value {
    match ty {
        VariantType::Nil => Value::Nil,
        VariantType::Bool => Value::Bool(false),
        VariantType::Int => Value::Int(0),
        VariantType::Float => Value::Float(0.0),
        VariantType::String => Value::String(String::new()),
        VariantType::StringName => Value::StringName(0),
        VariantType::NodePath => Value::NodePath(String::new()),
        VariantType::Object => Value::Object(0),
        VariantType::Callable => Value::Callable(CallableData::Null),
        VariantType::Signal => Value::Signal(0, String::new()),
        VariantType::Dictionary => Value::Dictionary(Rc::new(RefCell::new(DictData::default()))),
        VariantType::Array => Value::Array(Rc::new(RefCell::new(ArrayData::default()))),
        t if t.is_packed_array() => Value::Packed(t, PackedData::new(t)),
        pod => Value::Pod(pod, vec![0; pod_size(pod)]),
    }
}

/// Clone the value stored natively at `src`
///
/// `Nil` stands for a variant slot.
///
/// # Safety
/// `src` must point at initialized storage of type `ty`.
pub unsafe fn read_native(ty: VariantType, src: *const c_void) -> Value {
    match ty {
        VariantType::Nil => MockVariant::read(src),
        VariantType::Bool => Value::Bool(*(src as *const u8) != 0),
        VariantType::Int => Value::Int(*(src as *const i64)),
        VariantType::Float => Value::Float(*(src as *const f64)),
        VariantType::String => Value::String((**(src as *const Box<String>)).clone()),
        VariantType::NodePath => Value::NodePath((**(src as *const Box<String>)).clone()),
        VariantType::StringName => Value::StringName(*(src as *const usize)),
        VariantType::Object => Value::Object(*(src as *const usize)),
        VariantType::Callable => Value::Callable((**(src as *const Box<CallableData>)).clone()),
        VariantType::Signal => {
            let signal = &**(src as *const Box<(u64, String)>);
            Value::Signal(signal.0, signal.1.clone())
        }
        VariantType::Dictionary => Value::Dictionary((*(src as *const Rc<RefCell<DictData>>)).clone()),
        VariantType::Array => Value::Array((*(src as *const Rc<RefCell<ArrayData>>)).clone()),
        t if t.is_packed_array() => Value::Packed(t, (**(src as *const Box<PackedData>)).clone()),
        pod => Value::Pod(pod, std::slice::from_raw_parts(src as *const u8, pod_size(pod)).to_vec()),
    }
}

/// Construct `value` natively at `dst`; a mismatched value writes the default
///
/// # Safety
/// `dst` must be valid, suitably aligned, uninitialized storage of type `ty`.
pub unsafe fn write_native(ty: VariantType, value: Value, dst: *mut c_void) {
    if ty == VariantType::Nil {
        MockVariant::write(dst, value);
        return;
    }
    let value = if value.ty() == ty { value } else { default_value(ty) };
    match value {
        Value::Nil => {}
        Value::Bool(b) => *(dst as *mut u8) = b as u8,
        Value::Int(i) => *(dst as *mut i64) = i,
        Value::Float(f) => *(dst as *mut f64) = f,
        Value::String(s) | Value::NodePath(s) => std::ptr::write(dst as *mut Box<String>, Box::new(s)),
        Value::StringName(id) => *(dst as *mut usize) = id,
        Value::Object(ptr) => *(dst as *mut usize) = ptr,
        Value::Callable(data) => {
            std::ptr::write(dst as *mut Box<CallableData>, Box::new(data));
            *(dst as *mut usize).add(1) = 0;
        }
        Value::Signal(object, name) => {
            std::ptr::write(dst as *mut Box<(u64, String)>, Box::new((object, name)));
            *(dst as *mut usize).add(1) = 0;
        }
        Value::Dictionary(dict) => std::ptr::write(dst as *mut Rc<RefCell<DictData>>, dict),
        Value::Array(array) => std::ptr::write(dst as *mut Rc<RefCell<ArrayData>>, array),
        Value::Packed(_, data) => {
            std::ptr::write(dst as *mut Box<PackedData>, Box::new(data));
            *(dst as *mut usize).add(1) = 0;
        }
        Value::Pod(ty, bytes) => {
            let len = pod_size(ty).min(bytes.len());
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst as *mut u8, len);
        }
    }
}

/// Destroy native storage of type `ty`
///
/// # Safety
/// `ptr` must point at initialized storage of type `ty`, never used again.
pub unsafe fn destroy_native(ty: VariantType, ptr: *mut c_void) {
    match ty {
        VariantType::Nil => std::ptr::drop_in_place(ptr as *mut MockVariant),
        VariantType::String | VariantType::NodePath => std::ptr::drop_in_place(ptr as *mut Box<String>),
        VariantType::Callable => std::ptr::drop_in_place(ptr as *mut Box<CallableData>),
        VariantType::Signal => std::ptr::drop_in_place(ptr as *mut Box<(u64, String)>),
        VariantType::Dictionary => std::ptr::drop_in_place(ptr as *mut Rc<RefCell<DictData>>),
        VariantType::Array => std::ptr::drop_in_place(ptr as *mut Rc<RefCell<ArrayData>>),
        t if t.is_packed_array() => std::ptr::drop_in_place(ptr as *mut Box<PackedData>),
        _ => {}
    }
}

/// Aligned scratch storage big enough for any native value
#[repr(C, align(8))]
pub struct Slot {
    buf: [u64; 8],
}

impl Slot {
    pub fn uninit() -> Self {
        Self { buf: [0; 8] }
    }

    /// Storage holding `value` natively
    pub fn holding(ty: VariantType, value: Value) -> Self {
        let mut slot = Self::uninit();
        unsafe { write_native(ty, value, slot.as_mut_ptr()) };
        slot
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.buf.as_mut_ptr() as *mut c_void
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.buf.as_ptr() as *const c_void
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_slot_is_three_words() {
        assert_eq!(std::mem::size_of::<MockVariant>(), 3 * std::mem::size_of::<usize>());
    }

    #[test]
    fn test_intern_is_stable() {
        let a = intern("mock_intern_test");
        let b = intern("mock_intern_test");
        assert_eq!(a, b);
        assert_eq!(name_of(a), "mock_intern_test");
        assert_eq!(intern(""), 0);
    }

    #[test]
    fn test_packed_resize_zeroes() {
        let mut data = PackedData::new(VariantType::PackedInt32Array);
        data.resize(3);
        assert_eq!(data.bytes(), vec![0; 12]);
        let p = data.element_ptr(1) as *mut i32;
        unsafe { *p = 7 };
        data.resize(1);
        data.resize(2);
        assert_eq!(&data.bytes()[4..8], &[0, 0, 0, 0]);
        assert!(data.element_ptr(2).is_null());
    }

    #[test]
    fn test_native_string_roundtrip() {
        let mut slot = Slot::holding(VariantType::String, Value::string("héllo"));
        let value = unsafe { read_native(VariantType::String, slot.as_ptr()) };
        assert_eq!(value.as_text().as_deref(), Some("héllo"));
        unsafe { destroy_native(VariantType::String, slot.as_mut_ptr()) };
    }

    #[test]
    fn test_dictionary_equality_ignores_order() {
        let a = Value::dictionary(vec![(Value::string("a"), Value::Int(1)), (Value::string("b"), Value::Int(2))]);
        let b = Value::dictionary(vec![(Value::string("b"), Value::Int(2)), (Value::string("a"), Value::Int(1))]);
        assert!(value_eq(&a, &b));
    }
}
