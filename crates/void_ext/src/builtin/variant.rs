//! Variant: the engine's three-word tagged value
//!
//! A [`Variant`] owns its payload: clone is an engine copy, drop is an
//! engine destroy. The tag is only ever produced by the engine, through its
//! constructors, so tag and payload cannot disagree. [`VariantValue`] is the
//! host-side closed sum over every tag.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr;

use void_ext_sys::{
    interface, ConstTypePtr, ConstVariantPtr, FfiCallError, FfiVariant, VariantOperator, VariantPtr, VariantType,
    FALSE,
};

use super::*;
use crate::error::{BridgeError, Result};
use crate::frame::CallFrame;
use crate::meta::{FfiType, FromVariant, ToArg, ToVariant};
use crate::obj::{Gd, Object};

/// Engine variant slot
#[repr(transparent)]
pub struct Variant {
    opaque: FfiVariant,
    _not_send: PhantomData<*const ()>,
}

impl Variant {
    /// The nil variant
    pub fn nil() -> Self {
        unsafe { Self::new_with(|dst| (interface().variant_new_nil)(dst)) }
    }

    /// Construct in place through `init`, which must write a live variant
    pub(crate) unsafe fn new_with(init: impl FnOnce(VariantPtr)) -> Self {
        let mut raw = MaybeUninit::<FfiVariant>::uninit();
        init(raw.as_mut_ptr() as VariantPtr);
        Self::from_opaque(raw.assume_init())
    }

    /// Adopt variant storage owned by the caller
    pub(crate) unsafe fn from_opaque(opaque: FfiVariant) -> Self {
        Self { opaque, _not_send: PhantomData }
    }

    /// Copy a variant out of borrowed engine storage
    ///
    /// # Safety
    /// `src` must point at a live variant.
    pub(crate) unsafe fn from_sys_copy(src: ConstVariantPtr) -> Self {
        Self::new_with(|dst| (interface().variant_new_copy)(dst, src))
    }

    /// Borrow a variant living in engine storage without copying it
    ///
    /// # Safety
    /// `src` must point at a live variant that outlives the returned reference.
    pub(crate) unsafe fn borrow_sys<'a>(src: ConstVariantPtr) -> &'a Variant {
        &*(src as *const Variant)
    }

    /// Borrow the argument array of an inbound vararg call
    ///
    /// # Safety
    /// `args` must be null with `argc == 0`, or hold `argc` pointers to live
    /// variants that outlive the returned references.
    pub(crate) unsafe fn borrow_args<'a>(args: *const ConstVariantPtr, argc: i64) -> Vec<&'a Variant> {
        if args.is_null() || argc <= 0 {
            return Vec::new();
        }
        (0..argc as usize).map(|i| Self::borrow_sys(*args.add(i))).collect()
    }

    pub(crate) fn into_opaque(self) -> FfiVariant {
        let this = ManuallyDrop::new(self);
        this.opaque
    }

    pub(crate) fn sys(&self) -> ConstVariantPtr {
        &self.opaque as *const FfiVariant as ConstVariantPtr
    }

    pub(crate) fn sys_mut(&mut self) -> VariantPtr {
        &mut self.opaque as *mut FfiVariant as VariantPtr
    }

    /// Replace the initialized variant at `dst` with `value`
    ///
    /// # Safety
    /// `dst` must be null or point at a live variant.
    pub(crate) unsafe fn assign_into(dst: VariantPtr, value: Variant) {
        if dst.is_null() {
            return;
        }
        (interface().variant_destroy)(dst);
        ptr::write(dst as *mut FfiVariant, value.into_opaque());
    }

    /// Move `value` into uninitialized storage at `dst`
    ///
    /// # Safety
    /// `dst` must be null or valid for a write of one variant.
    pub(crate) unsafe fn write_into(dst: VariantPtr, value: Variant) {
        if !dst.is_null() {
            ptr::write(dst as *mut FfiVariant, value.into_opaque());
        }
    }

    // ========== Inspection ==========

    /// Tag of the held value
    pub fn get_type(&self) -> VariantType {
        let raw = unsafe { (interface().variant_get_type)(self.sys()) };
        VariantType::from_sys(raw).unwrap_or(VariantType::Nil)
    }

    pub fn is_nil(&self) -> bool {
        self.get_type() == VariantType::Nil
    }

    /// Convert into a typed value; the tag must match exactly
    pub fn to<T: FromVariant>(&self) -> Result<T> {
        T::from_variant(self)
    }

    /// Engine text representation
    pub fn stringify(&self) -> String {
        let text = unsafe { GString::new_with(|out| (interface().variant_stringify)(self.sys(), out)) };
        text.to_string()
    }

    /// Engine hash of the held value
    pub fn hash_code(&self) -> i64 {
        unsafe { (interface().variant_hash)(self.sys()) }
    }

    /// Engine truthiness
    pub fn booleanize(&self) -> bool {
        unsafe { (interface().variant_booleanize)(self.sys()) != FALSE }
    }

    /// Apply a binary operator; `None` when the engine rejects the operands
    pub fn evaluate(&self, op: VariantOperator, other: &Variant) -> Option<Variant> {
        let mut valid = FALSE;
        let result = unsafe {
            Self::new_with(|ret| (interface().variant_evaluate)(op as u32, self.sys(), other.sys(), ret, &mut valid))
        };
        (valid != FALSE).then_some(result)
    }

    // ========== Keyed access ==========

    /// Read `key`; the flag is false when the key is missing or the type is not keyed
    ///
    /// A missing key leaves the result at nil.
    pub fn get_keyed(&self, key: &Variant) -> (Variant, bool) {
        let mut valid = FALSE;
        let value =
            unsafe { Self::new_with(|ret| (interface().variant_get_keyed)(self.sys(), key.sys(), ret, &mut valid)) };
        (value, valid != FALSE)
    }

    /// Write `key`; false when the engine rejects the key or the value
    pub fn set_keyed(&mut self, key: &Variant, value: &Variant) -> bool {
        let mut valid = FALSE;
        unsafe { (interface().variant_set_keyed)(self.sys_mut(), key.sys(), value.sys(), &mut valid) };
        valid != FALSE
    }

    // ========== Calls ==========

    /// Dynamic method call on the held value
    pub fn call(&self, method: &str, args: &[Variant]) -> Result<Variant> {
        let name = StringName::from(method);
        let argv: Vec<ConstVariantPtr> = args.iter().map(Variant::sys).collect();
        let argv_ptr = if argv.is_empty() { ptr::null() } else { argv.as_ptr() };
        let mut error = FfiCallError::OK;
        let ret = unsafe {
            Self::new_with(|ret| {
                (interface().variant_call)(
                    self.sys() as VariantPtr,
                    name.sys(),
                    argv_ptr,
                    argv.len() as i64,
                    ret,
                    &mut error,
                )
            })
        };
        if error.is_ok() {
            Ok(ret)
        } else {
            Err(BridgeError::from_call_error(method, &error))
        }
    }

    /// Static method call on a builtin type
    pub fn call_static(ty: VariantType, method: &str, args: &[Variant]) -> Result<Variant> {
        let name = StringName::from(method);
        let argv: Vec<ConstVariantPtr> = args.iter().map(Variant::sys).collect();
        let argv_ptr = if argv.is_empty() { ptr::null() } else { argv.as_ptr() };
        let mut error = FfiCallError::OK;
        let ret = unsafe {
            Self::new_with(|ret| {
                (interface().variant_call_static)(ty.sys(), name.sys(), argv_ptr, argv.len() as i64, ret, &mut error)
            })
        };
        if error.is_ok() {
            Ok(ret)
        } else {
            Err(BridgeError::from_call_error(&format!("{ty}.{method}"), &error))
        }
    }

    // ========== Sum type ==========

    /// Unpack into the closed host-side sum
    pub fn unpack(&self) -> VariantValue {
        macro_rules! unpack {
            ($this:expr; $($tag:ident),* $(,)?) => {
                match $this.get_type() {
                    VariantType::Nil => VariantValue::Nil,
                    VariantType::Object => VariantValue::Object(Gd::<Object>::from_variant($this).ok()),
                    $( VariantType::$tag => $this.to().map(VariantValue::$tag).unwrap_or(VariantValue::Nil), )*
                }
            };
        }
        unpack!(
            self;
            Bool, Int, Float, String, Vector2, Vector2i, Rect2, Rect2i, Vector3, Vector3i, Transform2D, Vector4,
            Vector4i, Plane, Quaternion, Aabb, Basis, Transform3D, Projection, Color, StringName, NodePath, Rid,
            Callable, Signal, Dictionary, Array, PackedByteArray, PackedInt32Array, PackedInt64Array,
            PackedFloat32Array, PackedFloat64Array, PackedStringArray, PackedVector2Array, PackedVector3Array,
            PackedColorArray, PackedVector4Array,
        )
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::nil()
    }
}

impl Clone for Variant {
    fn clone(&self) -> Self {
        unsafe { Self::from_sys_copy(self.sys()) }
    }
}

impl Drop for Variant {
    fn drop(&mut self) {
        if let Some(iface) = void_ext_sys::try_interface() {
            unsafe { (iface.variant_destroy)(self.sys_mut()) };
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.evaluate(VariantOperator::Equal, other).is_some_and(|v| v.booleanize())
    }
}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_code().hash(state);
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variant({}: {})", self.get_type(), self.stringify())
    }
}

impl FfiType for Variant {
    type Ffi = FfiVariant;
    const VARIANT_TYPE: VariantType = VariantType::Nil;

    fn into_ffi(self) -> FfiVariant {
        self.into_opaque()
    }

    fn as_arg(&self) -> FfiVariant {
        self.opaque
    }

    unsafe fn from_ffi(ffi: FfiVariant) -> Result<Self> {
        Ok(Self::from_opaque(ffi))
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
        Ok(Self::from_sys_copy(ptr))
    }

    fn ffi_default() -> FfiVariant {
        Self::nil().into_opaque()
    }
}

impl ToVariant for Variant {
    fn to_variant(&self) -> Variant {
        self.clone()
    }
}

impl FromVariant for Variant {
    fn from_variant(variant: &Variant) -> Result<Self> {
        Ok(variant.clone())
    }
}

impl<'f> ToArg<'f> for &'f Variant {
    fn push(self, frame: &mut CallFrame<'f>) -> Result<()> {
        frame.push_ref(self)
    }
}

impl<'f> ToArg<'f> for Variant {
    fn push(self, frame: &mut CallFrame<'f>) -> Result<()> {
        frame.push_owned(self)
    }
}

// ============================================================================
// Closed sum
// ============================================================================

/// Host-side view of a variant, one arm per tag
#[derive(Debug, Clone, PartialEq)]
pub enum VariantValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(GString),
    Vector2(Vector2),
    Vector2i(Vector2i),
    Rect2(Rect2),
    Rect2i(Rect2i),
    Vector3(Vector3),
    Vector3i(Vector3i),
    Transform2D(Transform2D),
    Vector4(Vector4),
    Vector4i(Vector4i),
    Plane(Plane),
    Quaternion(Quaternion),
    Aabb(Aabb),
    Basis(Basis),
    Transform3D(Transform3D),
    Projection(Projection),
    Color(Color),
    StringName(StringName),
    NodePath(NodePath),
    Rid(Rid),
    /// `None` for a null object
    Object(Option<Gd<Object>>),
    Callable(Callable),
    Signal(Signal),
    Dictionary(Dictionary),
    Array(Array),
    PackedByteArray(PackedByteArray),
    PackedInt32Array(PackedInt32Array),
    PackedInt64Array(PackedInt64Array),
    PackedFloat32Array(PackedFloat32Array),
    PackedFloat64Array(PackedFloat64Array),
    PackedStringArray(PackedStringArray),
    PackedVector2Array(PackedVector2Array),
    PackedVector3Array(PackedVector3Array),
    PackedColorArray(PackedColorArray),
    PackedVector4Array(PackedVector4Array),
}

impl VariantValue {
    /// Tag of this arm
    pub fn variant_type(&self) -> VariantType {
        macro_rules! tag {
            ($this:expr; $($arm:ident),* $(,)?) => {
                match $this {
                    VariantValue::Nil => VariantType::Nil,
                    $( VariantValue::$arm(_) => VariantType::$arm, )*
                }
            };
        }
        tag!(
            self;
            Bool, Int, Float, String, Vector2, Vector2i, Rect2, Rect2i, Vector3, Vector3i, Transform2D, Vector4,
            Vector4i, Plane, Quaternion, Aabb, Basis, Transform3D, Projection, Color, StringName, NodePath, Rid,
            Object, Callable, Signal, Dictionary, Array, PackedByteArray, PackedInt32Array, PackedInt64Array,
            PackedFloat32Array, PackedFloat64Array, PackedStringArray, PackedVector2Array, PackedVector3Array,
            PackedColorArray, PackedVector4Array,
        )
    }
}

impl From<VariantValue> for Variant {
    fn from(value: VariantValue) -> Self {
        macro_rules! pack {
            ($($arm:ident),* $(,)?) => {
                match value {
                    VariantValue::Nil => Variant::nil(),
                    $( VariantValue::$arm(inner) => inner.to_variant(), )*
                }
            };
        }
        pack!(
            Bool, Int, Float, String, Vector2, Vector2i, Rect2, Rect2i, Vector3, Vector3i, Transform2D, Vector4,
            Vector4i, Plane, Quaternion, Aabb, Basis, Transform3D, Projection, Color, StringName, NodePath, Rid,
            Object, Callable, Signal, Dictionary, Array, PackedByteArray, PackedInt32Array, PackedInt64Array,
            PackedFloat32Array, PackedFloat64Array, PackedStringArray, PackedVector2Array, PackedVector3Array,
            PackedColorArray, PackedVector4Array,
        )
    }
}
