//! Plain-old-data builtins
//!
//! Layouts match the engine's single-precision build. Values are passed by
//! value and need no construction or destruction.

use bytemuck::{Pod, Zeroable};
use void_ext_sys::{ConstTypePtr, VariantType};

use crate::error::Result;
use crate::meta::FfiType;

/// 2D vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Self = Self::new(0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0);

    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

/// 2D integer vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Vector2i {
    pub x: i32,
    pub y: i32,
}

impl Vector2i {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 3D vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// 3D integer vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Vector3i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Vector3i {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// 4D vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vector4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Vector4 {
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

/// 4D integer vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Vector4i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub w: i32,
}

impl Vector4i {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32, w: i32) -> Self {
        Self { x, y, z, w }
    }
}

/// Axis-aligned 2D rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Rect2 {
    pub position: Vector2,
    pub size: Vector2,
}

impl Rect2 {
    #[inline]
    pub const fn new(position: Vector2, size: Vector2) -> Self {
        Self { position, size }
    }
}

/// Axis-aligned 2D integer rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Rect2i {
    pub position: Vector2i,
    pub size: Vector2i,
}

/// 2D affine transform: two basis columns and an origin
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform2D {
    pub a: Vector2,
    pub b: Vector2,
    pub origin: Vector2,
}

impl Transform2D {
    pub const IDENTITY: Self = Self {
        a: Vector2::new(1.0, 0.0),
        b: Vector2::new(0.0, 1.0),
        origin: Vector2::ZERO,
    };
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Plane in Hessian normal form
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Plane {
    pub normal: Vector3,
    pub d: f32,
}

/// Rotation quaternion
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Self = Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Axis-aligned bounding box
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Aabb {
    pub position: Vector3,
    pub size: Vector3,
}

/// 3x3 matrix, row major
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Basis {
    pub rows: [Vector3; 3],
}

impl Basis {
    pub const IDENTITY: Self = Self {
        rows: [Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0), Vector3::new(0.0, 0.0, 1.0)],
    };
}

impl Default for Basis {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// 3D affine transform
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform3D {
    pub basis: Basis,
    pub origin: Vector3,
}

/// 4x4 projection matrix, column major
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Projection {
    pub columns: [Vector4; 4],
}

/// RGBA color, linear floats
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);

    #[inline]
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// Opaque server resource id
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(C)]
pub struct Rid {
    id: u64,
}

impl Rid {
    pub const INVALID: Self = Self { id: 0 };

    #[inline]
    pub const fn from_u64(id: u64) -> Self {
        Self { id }
    }

    #[inline]
    pub const fn to_u64(self) -> u64 {
        self.id
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.id != 0
    }
}

macro_rules! impl_pod_builtin {
    ($($t:ident),* $(,)?) => {$(
        impl FfiType for $t {
            type Ffi = $t;
            const VARIANT_TYPE: VariantType = VariantType::$t;

            fn into_ffi(self) -> Self {
                self
            }

            fn as_arg(&self) -> Self {
                *self
            }

            unsafe fn from_ffi(ffi: Self) -> Result<Self> {
                Ok(ffi)
            }

            unsafe fn from_arg(ptr: ConstTypePtr) -> Result<Self> {
                Ok(std::ptr::read_unaligned(ptr as *const $t))
            }

            fn ffi_default() -> Self {
                <$t as Zeroable>::zeroed()
            }
        }

        crate::meta::impl_variant_conversion!($t);
        crate::meta::impl_to_arg_by_value!($t);
    )*};
}

impl_pod_builtin!(
    Vector2, Vector2i, Rect2, Rect2i, Vector3, Vector3i, Transform2D, Vector4, Vector4i, Plane, Quaternion, Aabb,
    Basis, Transform3D, Projection, Color, Rid,
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_layouts_match_engine() {
        assert_eq!(size_of::<Vector2>(), 8);
        assert_eq!(size_of::<Vector3>(), 12);
        assert_eq!(size_of::<Vector4>(), 16);
        assert_eq!(size_of::<Color>(), 16);
        assert_eq!(size_of::<Rect2>(), 16);
        assert_eq!(size_of::<Plane>(), 16);
        assert_eq!(size_of::<Transform2D>(), 24);
        assert_eq!(size_of::<Aabb>(), 24);
        assert_eq!(size_of::<Basis>(), 36);
        assert_eq!(size_of::<Transform3D>(), 48);
        assert_eq!(size_of::<Projection>(), 64);
        assert_eq!(size_of::<Rid>(), 8);
    }

    #[test]
    fn test_pod_from_arg_reads_bytes() {
        let bytes: [u8; 8] = bytemuck::cast(Vector2::new(1.5, -2.0));
        let value = unsafe { Vector2::from_arg(bytes.as_ptr() as ConstTypePtr) }.unwrap();
        assert_eq!(value, Vector2::new(1.5, -2.0));
        assert_eq!(Vector2::new(3.0, 4.0).length(), 5.0);
    }

    #[test]
    fn test_identities() {
        assert_eq!(Transform2D::default().a, Vector2::new(1.0, 0.0));
        assert_eq!(Quaternion::default().w, 1.0);
        assert!(!Rid::INVALID.is_valid());
        assert!(Rid::from_u64(9).is_valid());
    }
}
