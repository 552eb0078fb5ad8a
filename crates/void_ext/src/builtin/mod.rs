//! Builtin value types
//!
//! Each engine-managed builtin (strings, containers, callables) is a
//! `#[repr(transparent)]` wrapper over its opaque storage. Construction,
//! copy and destruction go through the lifecycle table fetched at load;
//! builtin methods are resolved by name on first use and cached.

mod array;
mod callable;
mod dictionary;
mod math;
mod packed;
mod string;
mod variant;

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;
use void_ext_sys::{builtins, interface, ConstTypePtr, PtrBuiltInMethodFn, PtrConstructorFn, TypePtr, VariantType};

use crate::error::{BridgeError, Result};
use crate::frame::CallFrame;
use crate::meta::{ArgList, FfiType};

pub use array::{Array, ArrayIter};
pub use callable::{callable_table_len, Callable, Signal};
pub use dictionary::{Dictionary, DictionaryIter};
pub use math::*;
pub use packed::{
    PackedArray, PackedArrayIter, PackedByteArray, PackedColorArray, PackedElement, PackedFloat32Array,
    PackedFloat64Array, PackedInt32Array, PackedInt64Array, PackedStringArray, PackedVector2Array,
    PackedVector3Array, PackedVector4Array,
};
pub use string::{GString, NodePath, StringName};
pub use variant::{Variant, VariantValue};

// ============================================================================
// Lifecycle
// ============================================================================

/// Pointer constructor `index` of `ty`
///
/// # Panics
/// If the engine provides no such constructor. Default and copy constructors
/// are verified at load; conversion constructors are only requested for the
/// types that define them.
pub(crate) fn constructor(ty: VariantType, index: usize) -> PtrConstructorFn {
    match builtins().get(ty).constructors.get(index).copied().flatten() {
        Some(ctor) => ctor,
        None => panic!("engine provides no pointer constructor {index} for {ty}"),
    }
}

/// Wrapper over one engine-managed builtin
///
/// Generates construction from a constructor index, `Default` through the
/// default constructor, `Clone` through the copy constructor, `Drop` through
/// the destructor, and the marshalling trait impls.
macro_rules! impl_builtin {
    ($(#[$attr:meta])* $name:ident, $opaque:ty, $vty:ident) => {
        $(#[$attr])*
        #[repr(transparent)]
        pub struct $name {
            opaque: $opaque,
            _not_send: std::marker::PhantomData<*const ()>,
        }

        impl $name {
            pub(crate) const TYPE: void_ext_sys::VariantType = void_ext_sys::VariantType::$vty;

            /// Adopt storage the engine constructed
            ///
            /// # Safety
            /// `opaque` must be a live value of this type, owned by the caller.
            pub(crate) unsafe fn from_opaque(opaque: $opaque) -> Self {
                Self { opaque, _not_send: std::marker::PhantomData }
            }

            /// Give up ownership of the storage without destroying it
            pub(crate) fn into_opaque(self) -> $opaque {
                let this = std::mem::ManuallyDrop::new(self);
                this.opaque
            }

            pub(crate) fn sys(&self) -> void_ext_sys::ConstTypePtr {
                &self.opaque as *const $opaque as void_ext_sys::ConstTypePtr
            }

            pub(crate) fn sys_mut(&mut self) -> void_ext_sys::TypePtr {
                &mut self.opaque as *mut $opaque as void_ext_sys::TypePtr
            }

            /// Construct in place through `init`, which must write a live value
            pub(crate) unsafe fn new_with(init: impl FnOnce(void_ext_sys::TypePtr)) -> Self {
                let mut raw = std::mem::MaybeUninit::<$opaque>::uninit();
                init(raw.as_mut_ptr() as void_ext_sys::TypePtr);
                Self::from_opaque(raw.assume_init())
            }

            /// Construct through pointer constructor `index`
            pub(crate) unsafe fn construct(index: usize, args: &[void_ext_sys::ConstTypePtr]) -> Self {
                let ctor = $crate::builtin::constructor(Self::TYPE, index);
                let args = if args.is_empty() { std::ptr::null() } else { args.as_ptr() };
                Self::new_with(|dst| ctor(dst, args))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                unsafe { Self::construct(void_ext_sys::builtins::CTOR_DEFAULT, &[]) }
            }
        }

        impl Clone for $name {
            fn clone(&self) -> Self {
                unsafe { Self::construct(void_ext_sys::builtins::CTOR_COPY, &[self.sys()]) }
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                let Some(table) = void_ext_sys::try_builtins() else { return };
                if let Some(destructor) = table.get(Self::TYPE).destructor {
                    unsafe { destructor(self.sys_mut()) };
                }
            }
        }

        impl $crate::meta::FfiType for $name {
            type Ffi = $opaque;
            const VARIANT_TYPE: void_ext_sys::VariantType = void_ext_sys::VariantType::$vty;

            fn into_ffi(self) -> $opaque {
                self.into_opaque()
            }

            fn as_arg(&self) -> $opaque {
                self.opaque
            }

            unsafe fn from_ffi(ffi: $opaque) -> $crate::error::Result<Self> {
                Ok(Self::from_opaque(ffi))
            }

            unsafe fn from_arg(ptr: void_ext_sys::ConstTypePtr) -> $crate::error::Result<Self> {
                Ok(Self::construct(void_ext_sys::builtins::CTOR_COPY, &[ptr]))
            }

            fn ffi_default() -> $opaque {
                Self::default().into_opaque()
            }
        }

        $crate::meta::impl_variant_conversion!($name);

        impl<'f> $crate::meta::ToArg<'f> for &'f $name {
            fn push(self, frame: &mut $crate::frame::CallFrame<'f>) -> $crate::error::Result<()> {
                frame.push_ref(self)
            }
        }

        impl<'f> $crate::meta::ToArg<'f> for $name {
            fn push(self, frame: &mut $crate::frame::CallFrame<'f>) -> $crate::error::Result<()> {
                frame.push_owned(self)
            }
        }
    };
}
pub(crate) use impl_builtin;

/// Engine equality of two values of `ty`
pub(crate) fn builtin_equal(ty: VariantType, left: ConstTypePtr, right: ConstTypePtr) -> bool {
    let Some(equal) = builtins().get(ty).equal else {
        return false;
    };
    let mut result: u8 = 0;
    unsafe { equal(left, right, &mut result as *mut u8 as TypePtr) };
    result != 0
}

// ============================================================================
// Builtin methods
// ============================================================================

type MethodKey = (VariantType, &'static str);

fn method_cache() -> &'static RwLock<HashMap<MethodKey, PtrBuiltInMethodFn>> {
    static CACHE: OnceLock<RwLock<HashMap<MethodKey, PtrBuiltInMethodFn>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Number of resolved builtin methods held in the cache
pub fn cached_builtin_method_count() -> usize {
    method_cache().read().len()
}

/// Forget every resolved builtin method
pub(crate) fn reset_method_cache() {
    method_cache().write().clear();
}

/// Resolve a builtin method of `ty`, caching the result
pub(crate) fn builtin_method(ty: VariantType, name: &'static str) -> Result<PtrBuiltInMethodFn> {
    if let Some(method) = method_cache().read().get(&(ty, name)) {
        return Ok(*method);
    }

    let method_name = StringName::from(name);
    let resolved = unsafe { (interface().variant_get_ptr_builtin_method)(ty.sys(), method_name.sys(), 0) };
    match resolved {
        Some(method) => {
            method_cache().write().entry((ty, name)).or_insert(method);
            Ok(method)
        }
        None => Err(BridgeError::NoSuchMethod { class: ty.name().to_owned(), method: name.to_owned() }),
    }
}

/// Call a builtin method on `base` through a call frame
pub(crate) fn call_builtin<'f, A, R>(ty: VariantType, name: &'static str, base: TypePtr, args: A) -> Result<R>
where
    A: ArgList<'f>,
    R: FfiType,
{
    let method = builtin_method(ty, name)?;
    let mut frame = CallFrame::open();
    args.push_all(&mut frame)?;
    let argc = A::LEN as i32;
    frame.invoke::<R>(|args, ret| unsafe { method(base, args, ret, argc) })?;
    frame.finish()
}
