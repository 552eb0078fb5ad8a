//! Packed arrays: flat storage of one element type
//!
//! The engine shares packed storage copy-on-write; at the host boundary a
//! packed array behaves as a value. Cloning yields an independent array and
//! writes through one never show up in another.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr;

use void_ext_sys::interface::PackedArrayOperatorIndexFn;
use void_ext_sys::{interface, try_builtins, ConstTypePtr, EngineInterface, OpaquePackedArray, TypePtr, VariantType};

use super::{builtin_equal, call_builtin, constructor, Color, GString, Variant, Vector2, Vector3, Vector4};
use crate::error::{BridgeError, Result};
use crate::frame::CallFrame;
use crate::meta::{typed_from, variant_from, FfiType, FromVariant, ToArg, ToVariant};

// ============================================================================
// Element types
// ============================================================================

/// A type that can be stored in a packed array
pub trait PackedElement: Sized + 'static {
    /// Variant tag of the array holding this element
    const ARRAY_TYPE: VariantType;

    /// Engine accessor returning a pointer to one element
    fn index_fn(iface: &EngineInterface) -> PackedArrayOperatorIndexFn;

    /// Copy an element out of engine storage
    ///
    /// # Safety
    /// `ptr` must point at a live element.
    unsafe fn read(ptr: *const c_void) -> Self;

    /// Replace a live element
    ///
    /// # Safety
    /// `ptr` must point at a live element.
    unsafe fn replace(ptr: *mut c_void, value: Self);
}

macro_rules! impl_pod_element {
    ($($t:ty => $array:ident, $index:ident;)*) => {$(
        impl PackedElement for $t {
            const ARRAY_TYPE: VariantType = VariantType::$array;

            fn index_fn(iface: &EngineInterface) -> PackedArrayOperatorIndexFn {
                iface.$index
            }

            unsafe fn read(ptr: *const c_void) -> Self {
                ptr::read_unaligned(ptr as *const $t)
            }

            unsafe fn replace(ptr: *mut c_void, value: Self) {
                ptr::write_unaligned(ptr as *mut $t, value);
            }
        }
    )*};
}

impl_pod_element! {
    u8 => PackedByteArray, packed_byte_array_operator_index;
    i32 => PackedInt32Array, packed_int32_array_operator_index;
    i64 => PackedInt64Array, packed_int64_array_operator_index;
    f32 => PackedFloat32Array, packed_float32_array_operator_index;
    f64 => PackedFloat64Array, packed_float64_array_operator_index;
    Vector2 => PackedVector2Array, packed_vector2_array_operator_index;
    Vector3 => PackedVector3Array, packed_vector3_array_operator_index;
    Vector4 => PackedVector4Array, packed_vector4_array_operator_index;
    Color => PackedColorArray, packed_color_array_operator_index;
}

impl PackedElement for GString {
    const ARRAY_TYPE: VariantType = VariantType::PackedStringArray;

    fn index_fn(iface: &EngineInterface) -> PackedArrayOperatorIndexFn {
        iface.packed_string_array_operator_index
    }

    unsafe fn read(ptr: *const c_void) -> Self {
        GString::construct(void_ext_sys::builtins::CTOR_COPY, &[ptr])
    }

    unsafe fn replace(ptr: *mut c_void, value: Self) {
        drop(ptr::read(ptr as *const GString));
        ptr::write(ptr as *mut GString, value);
    }
}

// ============================================================================
// PackedArray
// ============================================================================

/// Packed array of `T`
#[repr(transparent)]
pub struct PackedArray<T: PackedElement> {
    opaque: OpaquePackedArray,
    _marker: PhantomData<(T, *const ())>,
}

pub type PackedByteArray = PackedArray<u8>;
pub type PackedInt32Array = PackedArray<i32>;
pub type PackedInt64Array = PackedArray<i64>;
pub type PackedFloat32Array = PackedArray<f32>;
pub type PackedFloat64Array = PackedArray<f64>;
pub type PackedStringArray = PackedArray<GString>;
pub type PackedVector2Array = PackedArray<Vector2>;
pub type PackedVector3Array = PackedArray<Vector3>;
pub type PackedVector4Array = PackedArray<Vector4>;
pub type PackedColorArray = PackedArray<Color>;

impl<T: PackedElement> PackedArray<T> {
    pub fn new() -> Self {
        Self::default()
    }

    unsafe fn from_opaque(opaque: OpaquePackedArray) -> Self {
        Self { opaque, _marker: PhantomData }
    }

    fn into_opaque(self) -> OpaquePackedArray {
        let this = ManuallyDrop::new(self);
        this.opaque
    }

    fn sys(&self) -> ConstTypePtr {
        &self.opaque as *const OpaquePackedArray as ConstTypePtr
    }

    fn sys_mut(&mut self) -> TypePtr {
        &mut self.opaque as *mut OpaquePackedArray as TypePtr
    }

    unsafe fn construct(index: usize, args: &[ConstTypePtr]) -> Self {
        let ctor = constructor(T::ARRAY_TYPE, index);
        let args = if args.is_empty() { ptr::null() } else { args.as_ptr() };
        let mut raw = MaybeUninit::<OpaquePackedArray>::uninit();
        ctor(raw.as_mut_ptr() as TypePtr, args);
        Self::from_opaque(raw.assume_init())
    }

    pub fn len(&self) -> usize {
        call_builtin::<(), i64>(T::ARRAY_TYPE, "size", self.sys() as _, ())
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow with default elements or shrink to `len`
    pub fn resize(&mut self, len: usize) -> Result<()> {
        let code = call_builtin::<_, i64>(T::ARRAY_TYPE, "resize", self.sys_mut(), (len as i64,))?;
        if code == 0 {
            Ok(())
        } else {
            Err(BridgeError::EngineError { method: format!("{}.resize", T::ARRAY_TYPE), code })
        }
    }

    pub fn clear(&mut self) {
        let _ = call_builtin::<(), ()>(T::ARRAY_TYPE, "clear", self.sys_mut(), ());
    }

    fn element(&self, index: usize) -> Option<*mut c_void> {
        if index >= self.len() {
            return None;
        }
        let ptr = unsafe { (T::index_fn(interface()))(self.sys() as TypePtr, index as i64) };
        (!ptr.is_null()).then_some(ptr)
    }

    /// Copy of element `index`
    pub fn get(&self, index: usize) -> Option<T> {
        self.element(index).map(|ptr| unsafe { T::read(ptr) })
    }

    /// Replace element `index`
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        match self.element(index) {
            Some(ptr) => {
                unsafe { T::replace(ptr, value) };
                Ok(())
            }
            None => Err(BridgeError::ValueOutOfRange { ty: "packed array index", value: index as i64 }),
        }
    }

    /// Append one element
    pub fn push(&mut self, value: T) -> Result<()> {
        let len = self.len();
        self.resize(len + 1)?;
        self.set(len, value)
    }

    /// Lazy iterator reading through the engine accessor
    pub fn iter(&self) -> PackedArrayIter<'_, T> {
        PackedArrayIter { array: self, index: 0, len: self.len() }
    }

    /// Copy every element out
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

impl<T: PackedElement + Clone> PackedArray<T> {
    /// Build from a slice
    pub fn from_slice(items: &[T]) -> Result<Self> {
        let mut array = Self::new();
        array.resize(items.len())?;
        for (index, item) in items.iter().enumerate() {
            array.set(index, item.clone())?;
        }
        Ok(array)
    }
}

impl<T: PackedElement> Default for PackedArray<T> {
    fn default() -> Self {
        unsafe { Self::construct(void_ext_sys::builtins::CTOR_DEFAULT, &[]) }
    }
}

impl<T: PackedElement> Clone for PackedArray<T> {
    fn clone(&self) -> Self {
        unsafe { Self::construct(void_ext_sys::builtins::CTOR_COPY, &[self.sys()]) }
    }
}

impl<T: PackedElement> Drop for PackedArray<T> {
    fn drop(&mut self) {
        let Some(table) = try_builtins() else { return };
        if let Some(destructor) = table.get(T::ARRAY_TYPE).destructor {
            unsafe { destructor(self.sys_mut()) };
        }
    }
}

impl<T: PackedElement> PartialEq for PackedArray<T> {
    fn eq(&self, other: &Self) -> bool {
        builtin_equal(T::ARRAY_TYPE, self.sys(), other.sys())
    }
}

impl<T: PackedElement> Eq for PackedArray<T> {}

impl<T: PackedElement + fmt::Debug> fmt::Debug for PackedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PackedElement> FfiType for PackedArray<T> {
    type Ffi = OpaquePackedArray;
    const VARIANT_TYPE: VariantType = T::ARRAY_TYPE;

    fn into_ffi(self) -> OpaquePackedArray {
        self.into_opaque()
    }

    fn as_arg(&self) -> OpaquePackedArray {
        self.opaque
    }

    unsafe fn from_ffi(ffi: OpaquePackedArray) -> Result<Self> {
        Ok(Self::from_opaque(ffi))
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
        Ok(Self::construct(void_ext_sys::builtins::CTOR_COPY, &[ptr]))
    }

    fn ffi_default() -> OpaquePackedArray {
        Self::default().into_opaque()
    }
}

impl<T: PackedElement> ToVariant for PackedArray<T> {
    fn to_variant(&self) -> Variant {
        variant_from(self)
    }
}

impl<T: PackedElement> FromVariant for PackedArray<T> {
    fn from_variant(variant: &Variant) -> Result<Self> {
        typed_from(variant)
    }
}

impl<'f, T: PackedElement> ToArg<'f> for &'f PackedArray<T> {
    fn push(self, frame: &mut CallFrame<'f>) -> Result<()> {
        frame.push_ref(self)
    }
}

impl<'f, T: PackedElement> ToArg<'f> for PackedArray<T> {
    fn push(self, frame: &mut CallFrame<'f>) -> Result<()> {
        frame.push_owned(self)
    }
}

impl<T: PackedElement> FromIterator<T> for PackedArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut array = Self::new();
        for item in iter {
            if PackedArray::push(&mut array, item).is_err() {
                break;
            }
        }
        array
    }
}

impl<'a, T: PackedElement> IntoIterator for &'a PackedArray<T> {
    type Item = T;
    type IntoIter = PackedArrayIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Finite iterator over a [`PackedArray`]; restart by calling `iter` again
pub struct PackedArrayIter<'a, T: PackedElement> {
    array: &'a PackedArray<T>,
    index: usize,
    len: usize,
}

impl<T: PackedElement> Iterator for PackedArrayIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.index >= self.len {
            return None;
        }
        let item = self.array.get(self.index);
        self.index += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len.saturating_sub(self.index);
        (0, Some(remaining))
    }
}
