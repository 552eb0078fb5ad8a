//! Engine interface table
//!
//! At load the engine hands the extension a single resolver function. Every
//! interface function is looked up through it by name and stored in
//! [`EngineInterface`], which is then published once, process-wide.

use std::ffi::{c_char, c_void, CStr};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;

use crate::error::{LoadError, Result};
use crate::types::*;

/// Type-erased function pointer returned by the resolver
pub type InterfaceFn = unsafe extern "C" fn();

/// The resolver handed to the entry point
pub type GetProcAddressFn = unsafe extern "C" fn(name: *const c_char) -> Option<InterfaceFn>;

// ============================================================================
// Interface function signatures
// ============================================================================

pub type GetEngineVersionFn = unsafe extern "C" fn(out: *mut FfiEngineVersion);

pub type MemAllocFn = unsafe extern "C" fn(bytes: usize) -> *mut c_void;
pub type MemReallocFn = unsafe extern "C" fn(ptr: *mut c_void, bytes: usize) -> *mut c_void;
pub type MemFreeFn = unsafe extern "C" fn(ptr: *mut c_void);

pub type PrintErrorFn = unsafe extern "C" fn(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    editor_notify: Bool,
);
pub type PrintErrorWithMessageFn = unsafe extern "C" fn(
    description: *const c_char,
    message: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    editor_notify: Bool,
);

pub type VariantNewCopyFn = unsafe extern "C" fn(dst: VariantPtr, src: ConstVariantPtr);
pub type VariantNewNilFn = unsafe extern "C" fn(dst: VariantPtr);
pub type VariantDestroyFn = unsafe extern "C" fn(this: VariantPtr);
pub type VariantCallFn = unsafe extern "C" fn(
    this: VariantPtr,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
);
pub type VariantCallStaticFn = unsafe extern "C" fn(
    ty: u32,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
);
pub type VariantEvaluateFn = unsafe extern "C" fn(
    op: u32,
    a: ConstVariantPtr,
    b: ConstVariantPtr,
    ret: VariantPtr,
    valid: *mut Bool,
);
pub type VariantGetKeyedFn =
    unsafe extern "C" fn(this: ConstVariantPtr, key: ConstVariantPtr, ret: VariantPtr, valid: *mut Bool);
pub type VariantSetKeyedFn =
    unsafe extern "C" fn(this: VariantPtr, key: ConstVariantPtr, value: ConstVariantPtr, valid: *mut Bool);
pub type VariantGetTypeFn = unsafe extern "C" fn(this: ConstVariantPtr) -> u32;
pub type VariantStringifyFn = unsafe extern "C" fn(this: ConstVariantPtr, out: StringPtr);
pub type VariantHashFn = unsafe extern "C" fn(this: ConstVariantPtr) -> Int;
pub type VariantBooleanizeFn = unsafe extern "C" fn(this: ConstVariantPtr) -> Bool;

pub type GetVariantFromTypeConstructorFn = unsafe extern "C" fn(ty: u32) -> Option<VariantFromTypeConstructorFn>;
pub type GetVariantToTypeConstructorFn = unsafe extern "C" fn(ty: u32) -> Option<TypeFromVariantConstructorFn>;
pub type VariantGetPtrConstructorFn = unsafe extern "C" fn(ty: u32, index: i32) -> Option<PtrConstructorFn>;
pub type VariantGetPtrDestructorFn = unsafe extern "C" fn(ty: u32) -> Option<PtrDestructorFn>;
pub type VariantGetPtrBuiltinMethodFn =
    unsafe extern "C" fn(ty: u32, method: ConstStringNamePtr, hash: Int) -> Option<PtrBuiltInMethodFn>;
pub type VariantGetPtrOperatorEvaluatorFn =
    unsafe extern "C" fn(op: u32, type_a: u32, type_b: u32) -> Option<PtrOperatorEvaluatorFn>;

pub type StringNewWithUtf8CharsAndLenFn = unsafe extern "C" fn(dst: StringPtr, chars: *const c_char, len: Int);
pub type StringToUtf8CharsFn = unsafe extern "C" fn(this: ConstStringPtr, buf: *mut c_char, max_len: Int) -> Int;
pub type StringNameNewWithUtf8CharsAndLenFn =
    unsafe extern "C" fn(dst: StringNamePtr, chars: *const c_char, len: Int);

pub type ArrayOperatorIndexFn = unsafe extern "C" fn(this: TypePtr, index: Int) -> VariantPtr;
pub type ArraySetTypedFn =
    unsafe extern "C" fn(this: TypePtr, ty: u32, class_name: ConstStringNamePtr, script: ConstVariantPtr);
pub type DictionaryOperatorIndexFn = unsafe extern "C" fn(this: TypePtr, key: ConstVariantPtr) -> VariantPtr;
pub type PackedArrayOperatorIndexFn = unsafe extern "C" fn(this: TypePtr, index: Int) -> *mut c_void;

pub type ObjectMethodBindCallFn = unsafe extern "C" fn(
    method_bind: MethodBindPtr,
    object: ObjectPtr,
    args: *const ConstVariantPtr,
    argc: Int,
    ret: VariantPtr,
    error: *mut FfiCallError,
);
pub type ObjectMethodBindPtrCallFn =
    unsafe extern "C" fn(method_bind: MethodBindPtr, object: ObjectPtr, args: *const ConstTypePtr, ret: TypePtr);
pub type ObjectDestroyFn = unsafe extern "C" fn(object: ObjectPtr);
pub type GlobalGetSingletonFn = unsafe extern "C" fn(name: ConstStringNamePtr) -> ObjectPtr;
pub type ObjectSetInstanceFn =
    unsafe extern "C" fn(object: ObjectPtr, class_name: ConstStringNamePtr, instance: ClassInstancePtr);
pub type ObjectGetInstanceFn = unsafe extern "C" fn(object: ConstObjectPtr) -> ClassInstancePtr;
pub type ObjectGetClassNameFn =
    unsafe extern "C" fn(object: ConstObjectPtr, library: ClassLibraryPtr, out: StringNamePtr) -> Bool;
pub type ObjectCastToFn = unsafe extern "C" fn(object: ConstObjectPtr, class_tag: ClassTagPtr) -> ObjectPtr;
pub type ObjectGetInstanceIdFn = unsafe extern "C" fn(object: ConstObjectPtr) -> ObjectId;
pub type ObjectGetInstanceFromIdFn = unsafe extern "C" fn(id: ObjectId) -> ObjectPtr;

pub type CallableCustomCreateFn = unsafe extern "C" fn(out: TypePtr, info: *mut FfiCallableCustomInfo);

pub type ClassdbConstructObjectFn = unsafe extern "C" fn(class_name: ConstStringNamePtr) -> ObjectPtr;
pub type ClassdbGetMethodBindFn =
    unsafe extern "C" fn(class_name: ConstStringNamePtr, method_name: ConstStringNamePtr, hash: Int) -> MethodBindPtr;
pub type ClassdbGetClassTagFn = unsafe extern "C" fn(class_name: ConstStringNamePtr) -> ClassTagPtr;
pub type ClassdbRegisterExtensionClassFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    parent_class_name: ConstStringNamePtr,
    info: *const FfiClassCreationInfo,
);
pub type ClassdbRegisterExtensionClassMethodFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    method_info: *const FfiClassMethodInfo,
);
pub type ClassdbRegisterExtensionClassPropertyFn =
    unsafe extern "C" fn(library: ClassLibraryPtr, class_name: ConstStringNamePtr, info: *const FfiPropertyInfo);
pub type ClassdbRegisterExtensionClassSignalFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    signal_name: ConstStringNamePtr,
    args: *const FfiPropertyInfo,
    argc: Int,
);
pub type ClassdbUnregisterExtensionClassMemberFn =
    unsafe extern "C" fn(library: ClassLibraryPtr, class_name: ConstStringNamePtr, member: ConstStringNamePtr);
pub type ClassdbUnregisterExtensionClassFn =
    unsafe extern "C" fn(library: ClassLibraryPtr, class_name: ConstStringNamePtr);
pub type GetNativeStructSizeFn = unsafe extern "C" fn(name: ConstStringNamePtr) -> u64;

// ============================================================================
// Interface table
// ============================================================================

macro_rules! engine_interface {
    ($( $field:ident : $ty:ty ),* $(,)?) => {
        /// Every engine interface function the bridge uses, resolved by name
        #[derive(Clone, Copy)]
        pub struct EngineInterface {
            $( pub $field: $ty, )*
        }

        impl EngineInterface {
            /// Names of every required symbol, in resolution order
            pub const SYMBOLS: &'static [&'static str] = &[$( stringify!($field) ),*];

            /// Resolve every function through `get_proc_address`
            ///
            /// # Safety
            /// `get_proc_address` must return pointers whose real signatures match
            /// the declared ones.
            pub unsafe fn load(get_proc_address: GetProcAddressFn) -> Result<Self> {
                Ok(Self {
                    $( $field: resolve::<$ty>(get_proc_address, concat!(stringify!($field), "\0"))?, )*
                })
            }
        }
    };
}

engine_interface! {
    get_engine_version: GetEngineVersionFn,
    mem_alloc: MemAllocFn,
    mem_realloc: MemReallocFn,
    mem_free: MemFreeFn,
    print_error: PrintErrorFn,
    print_error_with_message: PrintErrorWithMessageFn,
    print_warning: PrintErrorFn,
    print_warning_with_message: PrintErrorWithMessageFn,
    print_script_error: PrintErrorFn,
    print_script_error_with_message: PrintErrorWithMessageFn,
    variant_new_copy: VariantNewCopyFn,
    variant_new_nil: VariantNewNilFn,
    variant_destroy: VariantDestroyFn,
    variant_call: VariantCallFn,
    variant_call_static: VariantCallStaticFn,
    variant_evaluate: VariantEvaluateFn,
    variant_get_keyed: VariantGetKeyedFn,
    variant_set_keyed: VariantSetKeyedFn,
    variant_get_type: VariantGetTypeFn,
    variant_stringify: VariantStringifyFn,
    variant_hash: VariantHashFn,
    variant_booleanize: VariantBooleanizeFn,
    get_variant_from_type_constructor: GetVariantFromTypeConstructorFn,
    get_variant_to_type_constructor: GetVariantToTypeConstructorFn,
    variant_get_ptr_constructor: VariantGetPtrConstructorFn,
    variant_get_ptr_destructor: VariantGetPtrDestructorFn,
    variant_get_ptr_builtin_method: VariantGetPtrBuiltinMethodFn,
    variant_get_ptr_operator_evaluator: VariantGetPtrOperatorEvaluatorFn,
    string_new_with_utf8_chars_and_len: StringNewWithUtf8CharsAndLenFn,
    string_to_utf8_chars: StringToUtf8CharsFn,
    string_name_new_with_utf8_chars_and_len: StringNameNewWithUtf8CharsAndLenFn,
    array_operator_index: ArrayOperatorIndexFn,
    array_set_typed: ArraySetTypedFn,
    dictionary_operator_index: DictionaryOperatorIndexFn,
    packed_byte_array_operator_index: PackedArrayOperatorIndexFn,
    packed_int32_array_operator_index: PackedArrayOperatorIndexFn,
    packed_int64_array_operator_index: PackedArrayOperatorIndexFn,
    packed_float32_array_operator_index: PackedArrayOperatorIndexFn,
    packed_float64_array_operator_index: PackedArrayOperatorIndexFn,
    packed_string_array_operator_index: PackedArrayOperatorIndexFn,
    packed_vector2_array_operator_index: PackedArrayOperatorIndexFn,
    packed_vector3_array_operator_index: PackedArrayOperatorIndexFn,
    packed_vector4_array_operator_index: PackedArrayOperatorIndexFn,
    packed_color_array_operator_index: PackedArrayOperatorIndexFn,
    object_method_bind_call: ObjectMethodBindCallFn,
    object_method_bind_ptrcall: ObjectMethodBindPtrCallFn,
    object_destroy: ObjectDestroyFn,
    global_get_singleton: GlobalGetSingletonFn,
    object_set_instance: ObjectSetInstanceFn,
    object_get_instance: ObjectGetInstanceFn,
    object_get_class_name: ObjectGetClassNameFn,
    object_cast_to: ObjectCastToFn,
    object_get_instance_id: ObjectGetInstanceIdFn,
    object_get_instance_from_id: ObjectGetInstanceFromIdFn,
    callable_custom_create: CallableCustomCreateFn,
    classdb_construct_object: ClassdbConstructObjectFn,
    classdb_get_method_bind: ClassdbGetMethodBindFn,
    classdb_get_class_tag: ClassdbGetClassTagFn,
    classdb_register_extension_class: ClassdbRegisterExtensionClassFn,
    classdb_register_extension_class_method: ClassdbRegisterExtensionClassMethodFn,
    classdb_register_extension_class_property: ClassdbRegisterExtensionClassPropertyFn,
    classdb_register_extension_class_signal: ClassdbRegisterExtensionClassSignalFn,
    classdb_unregister_extension_class_method: ClassdbUnregisterExtensionClassMemberFn,
    classdb_unregister_extension_class_signal: ClassdbUnregisterExtensionClassMemberFn,
    classdb_unregister_extension_class: ClassdbUnregisterExtensionClassFn,
    get_native_struct_size: GetNativeStructSizeFn,
}

/// Look up one symbol and reinterpret it as its declared signature
unsafe fn resolve<F: Copy>(get_proc_address: GetProcAddressFn, name: &'static str) -> Result<F> {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<InterfaceFn>());

    let symbol = name.trim_end_matches('\0');
    let c_name = CStr::from_bytes_with_nul(name.as_bytes()).map_err(|_| LoadError::MissingSymbol { symbol })?;

    match get_proc_address(c_name.as_ptr()) {
        // Safety: every function pointer has the same size; the caller vouches for the signature.
        Some(raw) => Ok(std::mem::transmute_copy::<InterfaceFn, F>(&raw)),
        None => Err(LoadError::MissingSymbol { symbol }),
    }
}

impl std::fmt::Debug for EngineInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInterface")
            .field("symbols", &Self::SYMBOLS.len())
            .finish()
    }
}

// ============================================================================
// Process-global publication
// ============================================================================

static INTERFACE: OnceLock<EngineInterface> = OnceLock::new();
static LIBRARY: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

/// Resolve and publish the interface table
///
/// The table is written at most once per process; later calls return the
/// already-published table without consulting the resolver again.
///
/// # Safety
/// See [`EngineInterface::load`].
pub unsafe fn install(get_proc_address: GetProcAddressFn, library: ClassLibraryPtr) -> Result<&'static EngineInterface> {
    if let Some(table) = INTERFACE.get() {
        return Ok(table);
    }

    let table = EngineInterface::load(get_proc_address)?;
    LIBRARY.store(library, Ordering::Release);
    let _ = INTERFACE.set(table);

    log::debug!("Bound {} engine interface functions", EngineInterface::SYMBOLS.len());
    INTERFACE.get().ok_or(LoadError::NotLoaded)
}

/// The published interface table, if loaded
#[inline]
pub fn try_interface() -> Option<&'static EngineInterface> {
    INTERFACE.get()
}

/// The published interface table
///
/// # Panics
/// If called before [`install`]. Every bridge entry path installs the table
/// first, so reaching this without it is a bug in the caller.
#[inline]
pub fn interface() -> &'static EngineInterface {
    match INTERFACE.get() {
        Some(table) => table,
        None => panic!("engine interface used before it was loaded"),
    }
}

/// Whether the interface table has been published
#[inline]
pub fn is_loaded() -> bool {
    INTERFACE.get().is_some()
}

/// The extension token handed over at load
#[inline]
pub fn library() -> ClassLibraryPtr {
    LIBRARY.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn noop() {}

    unsafe extern "C" fn resolve_all(_name: *const c_char) -> Option<InterfaceFn> {
        Some(noop)
    }

    unsafe extern "C" fn resolve_none_of_variant_call(name: *const c_char) -> Option<InterfaceFn> {
        let name = CStr::from_ptr(name);
        if name.to_bytes() == b"variant_call" {
            None
        } else {
            Some(noop)
        }
    }

    #[test]
    fn test_symbol_list_is_unique() {
        let mut names = EngineInterface::SYMBOLS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EngineInterface::SYMBOLS.len());
    }

    #[test]
    fn test_load_resolves_every_symbol() {
        let table = unsafe { EngineInterface::load(resolve_all) };
        assert!(table.is_ok());
    }

    #[test]
    fn test_missing_symbol_is_named() {
        let err = unsafe { EngineInterface::load(resolve_none_of_variant_call) }.unwrap_err();
        assert_eq!(err, LoadError::MissingSymbol { symbol: "variant_call" });
        assert!(err.to_string().contains("variant_call"));
    }
}
