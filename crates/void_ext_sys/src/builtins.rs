//! Builtin lifecycle table
//!
//! Per variant type, the engine exposes constructors, a destructor, variant
//! conversions and operator evaluators as separate function pointers. They
//! are fetched once after the interface is bound and kept in a
//! process-global table indexed by [`VariantType`].

use std::sync::OnceLock;

use crate::error::{LoadError, Result};
use crate::interface::EngineInterface;
use crate::types::*;

/// Pointer constructors fetched per type (default, copy, two conversions)
pub const MAX_PTR_CONSTRUCTORS: usize = 4;

/// Pointer constructor index of the default constructor
pub const CTOR_DEFAULT: usize = 0;
/// Pointer constructor index of the copy constructor
pub const CTOR_COPY: usize = 1;

/// Lifecycle functions of one builtin type
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTypeFns {
    pub to_variant: Option<VariantFromTypeConstructorFn>,
    pub from_variant: Option<TypeFromVariantConstructorFn>,
    pub constructors: [Option<PtrConstructorFn>; MAX_PTR_CONSTRUCTORS],
    pub destructor: Option<PtrDestructorFn>,
    pub equal: Option<PtrOperatorEvaluatorFn>,
}

/// Whether values of `ty` own engine memory and need construct/destroy
pub fn has_lifecycle(ty: VariantType) -> bool {
    matches!(
        ty,
        VariantType::String
            | VariantType::StringName
            | VariantType::NodePath
            | VariantType::Callable
            | VariantType::Signal
            | VariantType::Dictionary
            | VariantType::Array
    ) || ty.is_packed_array()
}

/// Lifecycle functions for every variant type
#[derive(Debug)]
pub struct BuiltinTable {
    types: [BuiltinTypeFns; VariantType::COUNT],
}

impl BuiltinTable {
    /// Fetch every builtin function through the bound interface
    ///
    /// # Safety
    /// `iface` must be bound to a live engine.
    pub unsafe fn load(iface: &EngineInterface) -> Result<Self> {
        let mut types = [BuiltinTypeFns::default(); VariantType::COUNT];

        for ty in VariantType::ALL.iter().copied().skip(1) {
            let fns = &mut types[ty.index()];
            let raw = ty.sys();

            fns.to_variant = (iface.get_variant_from_type_constructor)(raw);
            fns.from_variant = (iface.get_variant_to_type_constructor)(raw);
            if fns.to_variant.is_none() {
                return Err(LoadError::MissingBuiltin { ty, what: "to-variant constructor" });
            }
            if fns.from_variant.is_none() {
                return Err(LoadError::MissingBuiltin { ty, what: "from-variant constructor" });
            }

            for (index, slot) in fns.constructors.iter_mut().enumerate() {
                *slot = (iface.variant_get_ptr_constructor)(raw, index as i32);
            }
            fns.destructor = (iface.variant_get_ptr_destructor)(raw);
            fns.equal = (iface.variant_get_ptr_operator_evaluator)(VariantOperator::Equal as u32, raw, raw);

            if has_lifecycle(ty) {
                if fns.constructors[CTOR_DEFAULT].is_none() {
                    return Err(LoadError::MissingBuiltin { ty, what: "default constructor" });
                }
                if fns.constructors[CTOR_COPY].is_none() {
                    return Err(LoadError::MissingBuiltin { ty, what: "copy constructor" });
                }
                if fns.destructor.is_none() {
                    return Err(LoadError::MissingBuiltin { ty, what: "destructor" });
                }
            }
        }

        Ok(Self { types })
    }

    /// Functions for one type
    #[inline]
    pub fn get(&self, ty: VariantType) -> &BuiltinTypeFns {
        &self.types[ty.index()]
    }
}

static BUILTINS: OnceLock<BuiltinTable> = OnceLock::new();

/// Fetch and publish the builtin table
///
/// # Safety
/// See [`BuiltinTable::load`].
pub unsafe fn install_builtins(iface: &EngineInterface) -> Result<&'static BuiltinTable> {
    if let Some(table) = BUILTINS.get() {
        return Ok(table);
    }
    let table = BuiltinTable::load(iface)?;
    let _ = BUILTINS.set(table);
    BUILTINS.get().ok_or(LoadError::NotLoaded)
}

/// The published builtin table, if loaded
#[inline]
pub fn try_builtins() -> Option<&'static BuiltinTable> {
    BUILTINS.get()
}

/// The published builtin table
///
/// # Panics
/// If called before [`install_builtins`].
#[inline]
pub fn builtins() -> &'static BuiltinTable {
    match BUILTINS.get() {
        Some(table) => table,
        None => panic!("builtin table used before it was loaded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_types() {
        assert!(has_lifecycle(VariantType::String));
        assert!(has_lifecycle(VariantType::PackedColorArray));
        assert!(!has_lifecycle(VariantType::Int));
        assert!(!has_lifecycle(VariantType::Vector3));
        assert!(!has_lifecycle(VariantType::Object));
    }
}
