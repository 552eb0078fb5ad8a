//! Type metadata and marshalling traits
//!
//! [`FfiType`] ties a host type to its ABI representation and variant tag.
//! [`ToArg`] and [`ArgList`] push typed values into a [`CallFrame`];
//! [`ParamList`] decodes the arguments of an inbound call. [`ToVariant`] and
//! [`FromVariant`] convert through the engine's per-type variant
//! constructors with a strict tag check.

use std::mem::MaybeUninit;

use void_ext_sys::{builtins, CallErrorKind, ConstTypePtr, TypePtr, VariantPtr, VariantType};

use crate::builtin::{GString, Variant};
use crate::error::{BridgeError, Result};
use crate::frame::CallFrame;

// ============================================================================
// ABI representation
// ============================================================================

/// A host type with a fixed ABI representation
pub trait FfiType: Sized + 'static {
    /// What crosses the boundary; plain bits, ownership tracked by the host type
    type Ffi: Copy + 'static;

    /// Variant tag of this type; `Nil` for `Variant` and `()`
    const VARIANT_TYPE: VariantType;

    /// Engine class restricting object values; empty for everything else
    fn class_name() -> &'static str {
        ""
    }

    /// Give up ownership, producing the ABI form
    fn into_ffi(self) -> Self::Ffi;

    /// Borrowed ABI view, valid while `self` is alive
    fn as_arg(&self) -> Self::Ffi;

    /// Adopt a value the engine constructed for us (a return slot)
    ///
    /// # Safety
    /// `ffi` must be initialized storage of this type whose ownership passes
    /// to the caller.
    unsafe fn from_ffi(ffi: Self::Ffi) -> Result<Self>;

    /// Copy a value out of borrowed storage (an argument slot)
    ///
    /// # Safety
    /// `ptr` must point at initialized storage of this type.
    unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self>;

    /// Adopt the output of the engine's from-variant constructor
    ///
    /// Identical to [`from_ffi`](Self::from_ffi) except for objects, which a
    /// variant only lends.
    ///
    /// # Safety
    /// As for [`from_ffi`](Self::from_ffi).
    unsafe fn from_variant_ffi(ffi: Self::Ffi) -> Result<Self> {
        Self::from_ffi(ffi)
    }

    /// Value written into a return slot when a host callback fails
    fn ffi_default() -> Self::Ffi;
}

/// Write `value` into uninitialized return storage
///
/// # Safety
/// `ret` must be null or valid for a write of `T::Ffi`.
pub(crate) unsafe fn write_return<T: FfiType>(ret: TypePtr, value: T) {
    if ret.is_null() {
        drop(value);
    } else {
        std::ptr::write(ret as *mut T::Ffi, value.into_ffi());
    }
}

/// Write the failure default into uninitialized return storage
///
/// # Safety
/// As for [`write_return`].
pub(crate) unsafe fn write_default<T: FfiType>(ret: TypePtr) {
    if !ret.is_null() {
        std::ptr::write(ret as *mut T::Ffi, T::ffi_default());
    }
}

impl FfiType for () {
    type Ffi = ();
    const VARIANT_TYPE: VariantType = VariantType::Nil;

    fn into_ffi(self) {}

    fn as_arg(&self) {}

    unsafe fn from_ffi(_: ()) -> Result<Self> {
        Ok(())
    }

    unsafe fn from_arg(_: ConstTypePtr) -> Result<Self> {
        Ok(())
    }

    fn ffi_default() {}
}

impl FfiType for bool {
    type Ffi = u8;
    const VARIANT_TYPE: VariantType = VariantType::Bool;

    fn into_ffi(self) -> u8 {
        self as u8
    }

    fn as_arg(&self) -> u8 {
        *self as u8
    }

    unsafe fn from_ffi(ffi: u8) -> Result<Self> {
        Ok(ffi != 0)
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
        Ok(*(ptr as *const u8) != 0)
    }

    fn ffi_default() -> u8 {
        0
    }
}

impl FfiType for i64 {
    type Ffi = i64;
    const VARIANT_TYPE: VariantType = VariantType::Int;

    fn into_ffi(self) -> i64 {
        self
    }

    fn as_arg(&self) -> i64 {
        *self
    }

    unsafe fn from_ffi(ffi: i64) -> Result<Self> {
        Ok(ffi)
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
        Ok(*(ptr as *const i64))
    }

    fn ffi_default() -> i64 {
        0
    }
}

macro_rules! impl_narrow_int {
    ($($t:ty),* $(,)?) => {$(
        impl FfiType for $t {
            type Ffi = i64;
            const VARIANT_TYPE: VariantType = VariantType::Int;

            fn into_ffi(self) -> i64 {
                self as i64
            }

            fn as_arg(&self) -> i64 {
                *self as i64
            }

            unsafe fn from_ffi(ffi: i64) -> Result<Self> {
                <$t>::try_from(ffi).map_err(|_| BridgeError::ValueOutOfRange { ty: stringify!($t), value: ffi })
            }

            unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
                Self::from_ffi(*(ptr as *const i64))
            }

            fn ffi_default() -> i64 {
                0
            }
        }
    )*};
}

impl_narrow_int!(i8, i16, i32, u8, u16, u32);

impl FfiType for f64 {
    type Ffi = f64;
    const VARIANT_TYPE: VariantType = VariantType::Float;

    fn into_ffi(self) -> f64 {
        self
    }

    fn as_arg(&self) -> f64 {
        *self
    }

    unsafe fn from_ffi(ffi: f64) -> Result<Self> {
        Ok(ffi)
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
        Ok(*(ptr as *const f64))
    }

    fn ffi_default() -> f64 {
        0.0
    }
}

impl FfiType for f32 {
    type Ffi = f64;
    const VARIANT_TYPE: VariantType = VariantType::Float;

    fn into_ffi(self) -> f64 {
        self as f64
    }

    fn as_arg(&self) -> f64 {
        *self as f64
    }

    unsafe fn from_ffi(ffi: f64) -> Result<Self> {
        Ok(ffi as f32)
    }

    unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
        Ok(*(ptr as *const f64) as f32)
    }

    fn ffi_default() -> f64 {
        0.0
    }
}

// ============================================================================
// Variant conversion
// ============================================================================

/// Conversion into an owned variant
pub trait ToVariant {
    fn to_variant(&self) -> Variant;
}

/// Checked conversion out of a variant
///
/// The variant's tag must equal the target's tag exactly; there is no
/// implicit widening. Nil converts only into `Option::None`.
pub trait FromVariant: Sized {
    fn from_variant(variant: &Variant) -> Result<Self>;

    /// Conversion into `Option<Self>`; nil is empty
    fn from_variant_opt(variant: &Variant) -> Result<Option<Self>> {
        if variant.is_nil() {
            Ok(None)
        } else {
            Self::from_variant(variant).map(Some)
        }
    }
}

impl<T: ToVariant + ?Sized> ToVariant for &T {
    fn to_variant(&self) -> Variant {
        (**self).to_variant()
    }
}

impl<T: ToVariant> ToVariant for Option<T> {
    fn to_variant(&self) -> Variant {
        match self {
            Some(value) => value.to_variant(),
            None => Variant::nil(),
        }
    }
}

impl<T: FromVariant> FromVariant for Option<T> {
    fn from_variant(variant: &Variant) -> Result<Self> {
        T::from_variant_opt(variant)
    }
}

impl ToVariant for () {
    fn to_variant(&self) -> Variant {
        Variant::nil()
    }
}

impl FromVariant for () {
    fn from_variant(variant: &Variant) -> Result<Self> {
        match variant.get_type() {
            VariantType::Nil => Ok(()),
            found => Err(BridgeError::wrong_type(VariantType::Nil, found)),
        }
    }
}

impl ToVariant for str {
    fn to_variant(&self) -> Variant {
        GString::from(self).to_variant()
    }
}

impl ToVariant for String {
    fn to_variant(&self) -> Variant {
        self.as_str().to_variant()
    }
}

impl FromVariant for String {
    fn from_variant(variant: &Variant) -> Result<Self> {
        GString::from_variant(variant)?.try_to_string()
    }
}

/// Build a variant from a typed value through the engine's to-variant constructor
pub(crate) fn variant_from<T: FfiType>(value: &T) -> Variant {
    let mut ffi = value.as_arg();
    match builtins().get(T::VARIANT_TYPE).to_variant {
        Some(ctor) => unsafe {
            Variant::new_with(|dst| ctor(dst, &mut ffi as *mut T::Ffi as TypePtr))
        },
        None => Variant::nil(),
    }
}

/// Extract a typed value through the engine's from-variant constructor
pub(crate) fn typed_from<T: FfiType>(variant: &Variant) -> Result<T> {
    let found = variant.get_type();
    if found != T::VARIANT_TYPE {
        return Err(BridgeError::wrong_type(T::VARIANT_TYPE, found));
    }
    let Some(ctor) = builtins().get(T::VARIANT_TYPE).from_variant else {
        return Err(BridgeError::wrong_type(T::VARIANT_TYPE, found));
    };
    let mut raw = MaybeUninit::<T::Ffi>::uninit();
    unsafe {
        ctor(raw.as_mut_ptr() as TypePtr, variant.sys() as VariantPtr);
        T::from_variant_ffi(raw.assume_init())
    }
}

/// Implement [`ToVariant`] and [`FromVariant`] through the engine constructors
macro_rules! impl_variant_conversion {
    ($($t:ty),* $(,)?) => {$(
        impl $crate::meta::ToVariant for $t {
            fn to_variant(&self) -> $crate::builtin::Variant {
                $crate::meta::variant_from(self)
            }
        }

        impl $crate::meta::FromVariant for $t {
            fn from_variant(variant: &$crate::builtin::Variant) -> $crate::error::Result<Self> {
                $crate::meta::typed_from(variant)
            }
        }
    )*};
}
pub(crate) use impl_variant_conversion;

impl_variant_conversion!(bool, i8, i16, i32, i64, u8, u16, u32, f32, f64);

// ============================================================================
// Outbound arguments
// ============================================================================

/// A value that can occupy one argument slot of a call frame
pub trait ToArg<'f> {
    fn push(self, frame: &mut CallFrame<'f>) -> Result<()>;
}

macro_rules! impl_to_arg_by_value {
    ($($t:ty),* $(,)?) => {$(
        impl<'f> $crate::meta::ToArg<'f> for $t {
            fn push(self, frame: &mut $crate::frame::CallFrame<'f>) -> $crate::error::Result<()> {
                frame.push_value($crate::meta::FfiType::into_ffi(self))
            }
        }
    )*};
}
pub(crate) use impl_to_arg_by_value;

impl_to_arg_by_value!(bool, i8, i16, i32, i64, u8, u16, u32, f32, f64);

impl<'f> ToArg<'f> for &str {
    fn push(self, frame: &mut CallFrame<'f>) -> Result<()> {
        frame.push_owned(GString::from(self))
    }
}

impl<'f> ToArg<'f> for String {
    fn push(self, frame: &mut CallFrame<'f>) -> Result<()> {
        frame.push_owned(GString::from(self.as_str()))
    }
}

/// An ordered tuple of outbound arguments
pub trait ArgList<'f> {
    /// Number of slots the list occupies
    const LEN: usize;

    fn push_all(self, frame: &mut CallFrame<'f>) -> Result<()>;
}

macro_rules! impl_arg_list {
    ($len:expr; $($A:ident $a:ident),*) => {
        impl<'f, $($A: ToArg<'f>),*> ArgList<'f> for ($($A,)*) {
            const LEN: usize = $len;

            #[allow(unused_variables)]
            fn push_all(self, frame: &mut CallFrame<'f>) -> Result<()> {
                let ($($a,)*) = self;
                $( $a.push(frame)?; )*
                Ok(())
            }
        }
    };
}

impl_arg_list!(0;);
impl_arg_list!(1; A0 a0);
impl_arg_list!(2; A0 a0, A1 a1);
impl_arg_list!(3; A0 a0, A1 a1, A2 a2);
impl_arg_list!(4; A0 a0, A1 a1, A2 a2, A3 a3);
impl_arg_list!(5; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4);
impl_arg_list!(6; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_arg_list!(7; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_arg_list!(8; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_arg_list!(9; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);
impl_arg_list!(10; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8, A9 a9);

// ============================================================================
// Inbound parameters
// ============================================================================

/// Declared type of one parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamInfo {
    pub ty: VariantType,
    pub class_name: &'static str,
}

impl ParamInfo {
    pub fn of<T: FfiType>() -> Self {
        Self { ty: T::VARIANT_TYPE, class_name: T::class_name() }
    }
}

fn invalid_argument(index: usize, expected: VariantType, err: BridgeError) -> BridgeError {
    match err {
        BridgeError::WrongVariantType { .. } | BridgeError::ValueOutOfRange { .. } => BridgeError::CallError {
            method: String::new(),
            kind: CallErrorKind::InvalidArgument,
            argument: index as i32,
            expected: expected.sys() as i32,
        },
        other => other,
    }
}

/// Parameter tuple of a registered host method
pub trait ParamList: Sized + 'static {
    const LEN: usize;

    /// Declared parameter types, in order
    fn param_infos() -> Vec<ParamInfo>;

    /// Decode from a pointer-call argument array
    ///
    /// Never touches `args` when the list is empty.
    ///
    /// # Safety
    /// `args` must hold `LEN` pointers to storage of the declared types.
    unsafe fn from_args(args: *const ConstTypePtr) -> Result<Self>;

    /// Decode from vararg variants; `args.len()` must equal `LEN`
    fn from_variants(args: &[&Variant]) -> Result<Self>;
}

macro_rules! impl_param_list {
    ($len:expr; $($P:ident $idx:tt),*) => {
        impl<$($P: FfiType + FromVariant),*> ParamList for ($($P,)*) {
            const LEN: usize = $len;

            fn param_infos() -> Vec<ParamInfo> {
                vec![$(ParamInfo::of::<$P>()),*]
            }

            #[allow(unused_variables)]
            unsafe fn from_args(args: *const ConstTypePtr) -> Result<Self> {
                Ok(($( $P::from_arg(*args.add($idx))?, )*))
            }

            #[allow(unused_variables)]
            fn from_variants(args: &[&Variant]) -> Result<Self> {
                if args.len() != $len {
                    return Err(BridgeError::WrongArgumentCount { expected: $len, given: args.len() });
                }
                Ok(($(
                    $P::from_variant(args[$idx]).map_err(|e| invalid_argument($idx, $P::VARIANT_TYPE, e))?,
                )*))
            }
        }
    };
}

impl_param_list!(0;);
impl_param_list!(1; P0 0);
impl_param_list!(2; P0 0, P1 1);
impl_param_list!(3; P0 0, P1 1, P2 2);
impl_param_list!(4; P0 0, P1 1, P2 2, P3 3);
impl_param_list!(5; P0 0, P1 1, P2 2, P3 3, P4 4);
impl_param_list!(6; P0 0, P1 1, P2 2, P3 3, P4 4, P5 5);
impl_param_list!(7; P0 0, P1 1, P2 2, P3 3, P4 4, P5 5, P6 6);
impl_param_list!(8; P0 0, P1 1, P2 2, P3 3, P4 4, P5 5, P6 6, P7 7);
impl_param_list!(9; P0 0, P1 1, P2 2, P3 3, P4 4, P5 5, P6 6, P7 7, P8 8);
impl_param_list!(10; P0 0, P1 1, P2 2, P3 3, P4 4, P5 5, P6 6, P7 7, P8 8, P9 9);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_ints_are_range_checked() {
        assert_eq!(unsafe { i32::from_ffi(7) }, Ok(7));
        assert_eq!(
            unsafe { u8::from_ffi(300) },
            Err(BridgeError::ValueOutOfRange { ty: "u8", value: 300 })
        );
        assert!(unsafe { u32::from_ffi(-1) }.is_err());
    }

    #[test]
    fn test_abi_widths() {
        assert_eq!(std::mem::size_of::<<bool as FfiType>::Ffi>(), 1);
        assert_eq!(std::mem::size_of::<<i16 as FfiType>::Ffi>(), 8);
        assert_eq!(std::mem::size_of::<<f32 as FfiType>::Ffi>(), 8);
        assert_eq!(std::mem::size_of::<<() as FfiType>::Ffi>(), 0);
    }

    #[test]
    fn test_empty_params_ignore_args() {
        let decoded = unsafe { <() as ParamList>::from_args(std::ptr::null()) };
        assert_eq!(decoded, Ok(()));
        assert_eq!(<(i64, f64) as ParamList>::LEN, 2);
        assert_eq!(
            <(i64, bool) as ParamList>::param_infos(),
            vec![
                ParamInfo { ty: VariantType::Int, class_name: "" },
                ParamInfo { ty: VariantType::Bool, class_name: "" }
            ]
        );
    }

    #[test]
    fn test_pointer_params_decode() {
        let (a, b) = (5i64, 1u8);
        let args = [&a as *const i64 as ConstTypePtr, &b as *const u8 as ConstTypePtr];
        let decoded = unsafe { <(i32, bool) as ParamList>::from_args(args.as_ptr()) };
        assert_eq!(decoded, Ok((5, true)));
    }
}
