//! C ABI types shared with the engine
//!
//! Every type in this module is `#[repr(C)]` (or a plain pointer alias) and
//! mirrors the layout the engine expects. Nothing here owns engine memory;
//! ownership is the business of `void_ext`.

use std::ffi::{c_char, c_void};

// ============================================================================
// Opaque pointers
// ============================================================================

/// Pointer to an engine object
pub type ObjectPtr = *mut c_void;
/// Read-only pointer to an engine object
pub type ConstObjectPtr = *const c_void;
/// Pointer to storage of a builtin type (native layout)
pub type TypePtr = *mut c_void;
/// Read-only pointer to storage of a builtin type
pub type ConstTypePtr = *const c_void;
/// Pointer to variant storage
pub type VariantPtr = *mut c_void;
/// Read-only pointer to variant storage
pub type ConstVariantPtr = *const c_void;
/// Pointer to engine string storage
pub type StringPtr = *mut c_void;
/// Read-only pointer to engine string storage
pub type ConstStringPtr = *const c_void;
/// Pointer to interned name storage
pub type StringNamePtr = *mut c_void;
/// Read-only pointer to interned name storage
pub type ConstStringNamePtr = *const c_void;
/// Opaque method bind token from the class database
pub type MethodBindPtr = *const c_void;
/// Token identifying this extension to the engine
pub type ClassLibraryPtr = *mut c_void;
/// Host instance record attached to an engine object
pub type ClassInstancePtr = *mut c_void;
/// Engine class tag used for casts
pub type ClassTagPtr = *mut c_void;

/// Boolean as it crosses the ABI
pub type Bool = u8;
/// ABI true
pub const TRUE: Bool = 1;
/// ABI false
pub const FALSE: Bool = 0;

/// Integer as it crosses the ABI
pub type Int = i64;
/// Engine-wide object identifier
pub type ObjectId = u64;

// ============================================================================
// Opaque storage sizes
// ============================================================================

/// Machine words in a variant slot
pub const VARIANT_WORDS: usize = 3;

/// Opaque engine string (one word)
pub type OpaqueString = [usize; 1];
/// Opaque interned name (one word)
pub type OpaqueStringName = [usize; 1];
/// Opaque node path (one word)
pub type OpaqueNodePath = [usize; 1];
/// Opaque generic array (one word)
pub type OpaqueArray = [usize; 1];
/// Opaque dictionary (one word)
pub type OpaqueDictionary = [usize; 1];
/// Opaque packed array (two words)
pub type OpaquePackedArray = [usize; 2];
/// Opaque callable (two words)
pub type OpaqueCallable = [usize; 2];
/// Opaque signal (two words)
pub type OpaqueSignal = [usize; 2];

/// Variant storage: three machine words, tag and payload owned by the engine
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfiVariant {
    pub opaque: [usize; VARIANT_WORDS],
}

impl FfiVariant {
    /// All-zero storage, suitable only as a write target
    pub const fn zeroed() -> Self {
        Self { opaque: [0; VARIANT_WORDS] }
    }
}

// ============================================================================
// Variant tags
// ============================================================================

/// The engine's variant type enumeration
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantType {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl VariantType {
    /// Number of declared tags
    pub const COUNT: usize = 39;

    /// Every declared tag, in discriminant order
    pub const ALL: [VariantType; Self::COUNT] = [
        Self::Nil,
        Self::Bool,
        Self::Int,
        Self::Float,
        Self::String,
        Self::Vector2,
        Self::Vector2i,
        Self::Rect2,
        Self::Rect2i,
        Self::Vector3,
        Self::Vector3i,
        Self::Transform2D,
        Self::Vector4,
        Self::Vector4i,
        Self::Plane,
        Self::Quaternion,
        Self::Aabb,
        Self::Basis,
        Self::Transform3D,
        Self::Projection,
        Self::Color,
        Self::StringName,
        Self::NodePath,
        Self::Rid,
        Self::Object,
        Self::Callable,
        Self::Signal,
        Self::Dictionary,
        Self::Array,
        Self::PackedByteArray,
        Self::PackedInt32Array,
        Self::PackedInt64Array,
        Self::PackedFloat32Array,
        Self::PackedFloat64Array,
        Self::PackedStringArray,
        Self::PackedVector2Array,
        Self::PackedVector3Array,
        Self::PackedColorArray,
        Self::PackedVector4Array,
    ];

    /// Convert from the raw ABI value
    pub fn from_sys(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Raw ABI value
    #[inline]
    pub const fn sys(self) -> u32 {
        self as u32
    }

    /// Index into per-type tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether values of this type are packed arrays
    pub fn is_packed_array(self) -> bool {
        self >= Self::PackedByteArray
    }

    /// Engine-facing type name
    pub fn name(self) -> &'static str {
        match self {
            Self::Nil => "Nil",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "String",
            Self::Vector2 => "Vector2",
            Self::Vector2i => "Vector2i",
            Self::Rect2 => "Rect2",
            Self::Rect2i => "Rect2i",
            Self::Vector3 => "Vector3",
            Self::Vector3i => "Vector3i",
            Self::Transform2D => "Transform2D",
            Self::Vector4 => "Vector4",
            Self::Vector4i => "Vector4i",
            Self::Plane => "Plane",
            Self::Quaternion => "Quaternion",
            Self::Aabb => "AABB",
            Self::Basis => "Basis",
            Self::Transform3D => "Transform3D",
            Self::Projection => "Projection",
            Self::Color => "Color",
            Self::StringName => "StringName",
            Self::NodePath => "NodePath",
            Self::Rid => "RID",
            Self::Object => "Object",
            Self::Callable => "Callable",
            Self::Signal => "Signal",
            Self::Dictionary => "Dictionary",
            Self::Array => "Array",
            Self::PackedByteArray => "PackedByteArray",
            Self::PackedInt32Array => "PackedInt32Array",
            Self::PackedInt64Array => "PackedInt64Array",
            Self::PackedFloat32Array => "PackedFloat32Array",
            Self::PackedFloat64Array => "PackedFloat64Array",
            Self::PackedStringArray => "PackedStringArray",
            Self::PackedVector2Array => "PackedVector2Array",
            Self::PackedVector3Array => "PackedVector3Array",
            Self::PackedColorArray => "PackedColorArray",
            Self::PackedVector4Array => "PackedVector4Array",
        }
    }
}

impl std::fmt::Display for VariantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Operators understood by `variant_evaluate` and the pointer evaluators
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantOperator {
    Equal = 0,
    NotEqual = 1,
    Less = 2,
    LessEqual = 3,
    Greater = 4,
    GreaterEqual = 5,
}

// ============================================================================
// Call errors
// ============================================================================

/// Error kinds reported through [`FfiCallError`]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    Ok = 0,
    InvalidMethod = 1,
    InvalidArgument = 2,
    TooManyArguments = 3,
    TooFewArguments = 4,
    InstanceIsNull = 5,
    MethodNotConst = 6,
}

impl CallErrorKind {
    /// Convert from the raw ABI value; unknown codes map to `InvalidMethod`
    pub fn from_sys(raw: u32) -> Self {
        match raw {
            0 => Self::Ok,
            1 => Self::InvalidMethod,
            2 => Self::InvalidArgument,
            3 => Self::TooManyArguments,
            4 => Self::TooFewArguments,
            5 => Self::InstanceIsNull,
            6 => Self::MethodNotConst,
            _ => Self::InvalidMethod,
        }
    }
}

/// Call-error structure: kind, argument index, expected type or count
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FfiCallError {
    pub error: u32,
    pub argument: i32,
    pub expected: i32,
}

impl FfiCallError {
    /// A successful call
    pub const OK: Self = Self { error: 0, argument: 0, expected: 0 };

    /// Build an error of the given kind
    pub const fn new(kind: CallErrorKind, argument: i32, expected: i32) -> Self {
        Self { error: kind as u32, argument, expected }
    }

    /// Decoded kind
    pub fn kind(&self) -> CallErrorKind {
        CallErrorKind::from_sys(self.error)
    }

    /// Whether the call succeeded
    pub fn is_ok(&self) -> bool {
        self.error == CallErrorKind::Ok as u32
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialization levels, driven in order at load and in reverse at unload
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InitLevel {
    Core = 0,
    Servers = 1,
    Scene = 2,
    Editor = 3,
}

impl InitLevel {
    /// All levels in load order
    pub const ALL: [InitLevel; 4] = [Self::Core, Self::Servers, Self::Scene, Self::Editor];

    /// Convert from the raw ABI value
    pub fn from_sys(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Index into per-level tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Engine version as reported by `get_engine_version`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiEngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Human-readable version (null-terminated, engine-owned)
    pub string: *const c_char,
}

impl Default for FfiEngineVersion {
    fn default() -> Self {
        Self { major: 0, minor: 0, patch: 0, string: std::ptr::null() }
    }
}

/// Minimum engine version triple requested by the extension
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FfiVersionTriple {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Level callback: called once per level with the extension's user data
pub type InitLevelFn = unsafe extern "C" fn(userdata: *mut c_void);

/// Initialization structure filled by the extension's entry point
#[repr(C)]
#[derive(Debug)]
pub struct FfiInitialization {
    pub minimum_version: FfiVersionTriple,
    pub userdata: *mut c_void,
    pub initialize: [Option<InitLevelFn>; 4],
    pub deinitialize: [Option<InitLevelFn>; 4],
}

impl Default for FfiInitialization {
    fn default() -> Self {
        Self {
            minimum_version: FfiVersionTriple::default(),
            userdata: std::ptr::null_mut(),
            initialize: [None; 4],
            deinitialize: [None; 4],
        }
    }
}

// ============================================================================
// Class registration
// ============================================================================

pub const PROPERTY_HINT_NONE: u32 = 0;
pub const PROPERTY_HINT_RANGE: u32 = 1;
pub const PROPERTY_HINT_ENUM: u32 = 2;
pub const PROPERTY_HINT_RESOURCE_TYPE: u32 = 17;
pub const PROPERTY_HINT_TYPE_STRING: u32 = 23;

pub const PROPERTY_USAGE_NONE: u32 = 0;
pub const PROPERTY_USAGE_STORAGE: u32 = 2;
pub const PROPERTY_USAGE_EDITOR: u32 = 4;
pub const PROPERTY_USAGE_DEFAULT: u32 = PROPERTY_USAGE_STORAGE | PROPERTY_USAGE_EDITOR;
pub const PROPERTY_USAGE_NIL_IS_VARIANT: u32 = 1 << 17;

pub const METHOD_FLAG_NORMAL: u32 = 1;
pub const METHOD_FLAG_EDITOR: u32 = 2;
pub const METHOD_FLAG_CONST: u32 = 4;
pub const METHOD_FLAG_VIRTUAL: u32 = 8;
pub const METHOD_FLAG_VARARG: u32 = 16;
pub const METHOD_FLAG_STATIC: u32 = 32;
pub const METHOD_FLAGS_DEFAULT: u32 = METHOD_FLAG_NORMAL;

/// Property metadata as published to the engine
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiPropertyInfo {
    pub type_: u32,
    pub name: StringNamePtr,
    pub class_name: StringNamePtr,
    pub hint: u32,
    pub hint_string: StringPtr,
    pub usage: u32,
}

/// Vararg method entry: arguments as variants, call errors reported
pub type ClassMethodCallFn = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
);

/// Pointer-call method entry: arguments in native layout
pub type ClassMethodPtrCallFn = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
);

/// Method metadata as published to the engine
#[repr(C)]
#[derive(Debug)]
pub struct FfiClassMethodInfo {
    pub name: StringNamePtr,
    pub method_userdata: *mut c_void,
    pub call_func: Option<ClassMethodCallFn>,
    pub ptrcall_func: Option<ClassMethodPtrCallFn>,
    pub method_flags: u32,
    pub has_return_value: Bool,
    pub return_value_info: *mut FfiPropertyInfo,
    pub argument_count: u32,
    pub arguments_info: *mut FfiPropertyInfo,
}

pub type ClassSetFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, name: ConstStringNamePtr, value: ConstVariantPtr) -> Bool;
pub type ClassGetFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, name: ConstStringNamePtr, ret: VariantPtr) -> Bool;
pub type ClassGetPropertyListFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, count: *mut u32) -> *const FfiPropertyInfo;
pub type ClassFreePropertyListFn = unsafe extern "C" fn(instance: ClassInstancePtr, list: *const FfiPropertyInfo);
pub type ClassNotificationFn = unsafe extern "C" fn(instance: ClassInstancePtr, what: i32, reversed: Bool);
pub type ClassToStringFn = unsafe extern "C" fn(instance: ClassInstancePtr, is_valid: *mut Bool, out: StringPtr);
pub type ClassCreateInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void) -> ObjectPtr;
pub type ClassFreeInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void, instance: ClassInstancePtr);
pub type ClassCallVirtualFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, args: *const ConstTypePtr, ret: TypePtr);
pub type ClassGetVirtualFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: ConstStringNamePtr) -> Option<ClassCallVirtualFn>;

/// Inbound callback table for one registered class
#[repr(C)]
#[derive(Debug)]
pub struct FfiClassCreationInfo {
    pub is_virtual: Bool,
    pub is_abstract: Bool,
    pub set_func: Option<ClassSetFn>,
    pub get_func: Option<ClassGetFn>,
    pub get_property_list_func: Option<ClassGetPropertyListFn>,
    pub free_property_list_func: Option<ClassFreePropertyListFn>,
    pub notification_func: Option<ClassNotificationFn>,
    pub to_string_func: Option<ClassToStringFn>,
    pub create_instance_func: Option<ClassCreateInstanceFn>,
    pub free_instance_func: Option<ClassFreeInstanceFn>,
    pub get_virtual_func: Option<ClassGetVirtualFn>,
    pub class_userdata: *mut c_void,
}

// ============================================================================
// Custom callables
// ============================================================================

pub type CallableCustomCallFn = unsafe extern "C" fn(
    callable_userdata: *mut c_void,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
);
pub type CallableCustomIsValidFn = unsafe extern "C" fn(callable_userdata: *mut c_void) -> Bool;
pub type CallableCustomFreeFn = unsafe extern "C" fn(callable_userdata: *mut c_void);
pub type CallableCustomToStringFn =
    unsafe extern "C" fn(callable_userdata: *mut c_void, is_valid: *mut Bool, out: StringPtr);

/// Description of a host-implemented callable
#[repr(C)]
#[derive(Debug)]
pub struct FfiCallableCustomInfo {
    pub callable_userdata: *mut c_void,
    pub token: *mut c_void,
    pub object_id: ObjectId,
    pub call_func: Option<CallableCustomCallFn>,
    pub is_valid_func: Option<CallableCustomIsValidFn>,
    pub free_func: Option<CallableCustomFreeFn>,
    pub to_string_func: Option<CallableCustomToStringFn>,
}

// ============================================================================
// Builtin pointer functions
// ============================================================================

pub type VariantFromTypeConstructorFn = unsafe extern "C" fn(dst: VariantPtr, src: TypePtr);
pub type TypeFromVariantConstructorFn = unsafe extern "C" fn(dst: TypePtr, src: VariantPtr);
pub type PtrConstructorFn = unsafe extern "C" fn(base: TypePtr, args: *const ConstTypePtr);
pub type PtrDestructorFn = unsafe extern "C" fn(base: TypePtr);
pub type PtrBuiltInMethodFn =
    unsafe extern "C" fn(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: i32);
pub type PtrOperatorEvaluatorFn =
    unsafe extern "C" fn(left: ConstTypePtr, right: ConstTypePtr, result: TypePtr);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_type_table_is_dense() {
        for (i, ty) in VariantType::ALL.iter().enumerate() {
            assert_eq!(ty.index(), i);
            assert_eq!(VariantType::from_sys(i as u32), Some(*ty));
        }
        assert_eq!(VariantType::from_sys(VariantType::COUNT as u32), None);
    }

    #[test]
    fn test_variant_is_three_words() {
        assert_eq!(
            std::mem::size_of::<FfiVariant>(),
            3 * std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_call_error_kind() {
        let err = FfiCallError::new(CallErrorKind::TooFewArguments, 1, 2);
        assert!(!err.is_ok());
        assert_eq!(err.kind(), CallErrorKind::TooFewArguments);
        assert!(FfiCallError::OK.is_ok());
        assert_eq!(CallErrorKind::from_sys(99), CallErrorKind::InvalidMethod);
    }

    #[test]
    fn test_init_levels_ordered() {
        assert!(InitLevel::Core < InitLevel::Editor);
        assert_eq!(InitLevel::from_sys(2), Some(InitLevel::Scene));
        assert_eq!(InitLevel::from_sys(4), None);
    }
}
