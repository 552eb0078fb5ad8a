//! Generic array of variants
//!
//! Reference-counted on the engine side: clones share storage. An array may
//! be typed once, while empty; pushes into a typed array are checked on the
//! host before they reach the engine.

use std::fmt;

use void_ext_sys::{interface, OpaqueArray, VariantType};

use super::{builtin_equal, call_builtin, impl_builtin, StringName, Variant};
use crate::error::{BridgeError, Result};
use crate::meta::ToVariant;

impl_builtin!(
    /// Ordered, reference-counted sequence of variants
    Array,
    OpaqueArray,
    Array
);

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty array restricted to `ty` (and `class_name` for objects)
    pub fn new_typed(ty: VariantType, class_name: &str) -> Self {
        let mut array = Self::new();
        let class_name = StringName::from(class_name);
        let script = Variant::nil();
        unsafe { (interface().array_set_typed)(array.sys_mut(), ty.sys(), class_name.sys(), script.sys()) };
        array
    }

    /// Build from a list of values
    pub fn from_values<T: ToVariant>(values: &[T]) -> Result<Self> {
        let mut array = Self::new();
        for value in values {
            array.push(value)?;
        }
        Ok(array)
    }

    pub fn len(&self) -> usize {
        call_builtin::<(), i64>(Self::TYPE, "size", self.sys() as _, ())
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========== Typing ==========

    pub fn is_typed(&self) -> bool {
        call_builtin::<(), bool>(Self::TYPE, "is_typed", self.sys() as _, ()).unwrap_or(false)
    }

    /// Element type of a typed array
    pub fn typed_builtin(&self) -> Option<VariantType> {
        if !self.is_typed() {
            return None;
        }
        let raw = call_builtin::<(), i64>(Self::TYPE, "get_typed_builtin", self.sys() as _, ()).ok()?;
        u32::try_from(raw).ok().and_then(VariantType::from_sys)
    }

    /// Element class of a typed object array; empty otherwise
    pub fn typed_class_name(&self) -> StringName {
        call_builtin::<(), StringName>(Self::TYPE, "get_typed_class_name", self.sys() as _, ())
            .unwrap_or_default()
    }

    fn check_element(&self, value: &Variant) -> Result<()> {
        match self.typed_builtin() {
            Some(expected) if value.get_type() != expected => {
                Err(BridgeError::wrong_type(expected, value.get_type()))
            }
            _ => Ok(()),
        }
    }

    // ========== Elements ==========

    /// Append a value; typed arrays reject other tags before calling the engine
    pub fn push<T: ToVariant>(&mut self, value: T) -> Result<()> {
        let value = value.to_variant();
        self.check_element(&value)?;
        call_builtin::<_, ()>(Self::TYPE, "push_back", self.sys_mut(), (&value,))
    }

    fn element_ptr(&self, index: usize) -> Result<void_ext_sys::VariantPtr> {
        let len = self.len();
        if index >= len {
            return Err(BridgeError::ValueOutOfRange { ty: "Array index", value: index as i64 });
        }
        let ptr = unsafe { (interface().array_operator_index)(self.sys() as _, index as i64) };
        if ptr.is_null() {
            Err(BridgeError::ValueOutOfRange { ty: "Array index", value: index as i64 })
        } else {
            Ok(ptr)
        }
    }

    /// Copy of element `index`
    pub fn get(&self, index: usize) -> Result<Variant> {
        let ptr = self.element_ptr(index)?;
        Ok(unsafe { Variant::from_sys_copy(ptr) })
    }

    /// Replace element `index`
    pub fn set<T: ToVariant>(&mut self, index: usize, value: T) -> Result<()> {
        let value = value.to_variant();
        self.check_element(&value)?;
        let ptr = self.element_ptr(index)?;
        unsafe { Variant::assign_into(ptr, value) };
        Ok(())
    }

    /// Grow with nil (or the element default) or shrink to `len`
    pub fn resize(&mut self, len: usize) -> Result<()> {
        let code = call_builtin::<_, i64>(Self::TYPE, "resize", self.sys_mut(), (len as i64,))?;
        if code == 0 {
            Ok(())
        } else {
            Err(BridgeError::EngineError { method: "Array.resize".to_owned(), code })
        }
    }

    pub fn clear(&mut self) {
        let _ = call_builtin::<(), ()>(Self::TYPE, "clear", self.sys_mut(), ());
    }

    /// Whether an element equal to `value` is present
    pub fn contains<T: ToVariant>(&self, value: T) -> bool {
        let value = value.to_variant();
        call_builtin::<_, bool>(Self::TYPE, "has", self.sys() as _, (&value,)).unwrap_or(false)
    }

    /// Shallow copy with its own storage
    pub fn duplicate(&self) -> Self {
        call_builtin::<(), Array>(Self::TYPE, "duplicate", self.sys() as _, ()).unwrap_or_default()
    }

    /// Iterate over copies of the elements
    pub fn iter(&self) -> ArrayIter<'_> {
        ArrayIter { array: self, index: 0, len: self.len() }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        builtin_equal(Self::TYPE, self.sys(), other.sys())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a Array {
    type Item = Variant;
    type IntoIter = ArrayIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over an [`Array`]; the length is fixed when iteration starts
pub struct ArrayIter<'a> {
    array: &'a Array,
    index: usize,
    len: usize,
}

impl Iterator for ArrayIter<'_> {
    type Item = Variant;

    fn next(&mut self) -> Option<Variant> {
        if self.index >= self.len {
            return None;
        }
        let item = self.array.get(self.index).ok();
        self.index += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len.saturating_sub(self.index);
        (0, Some(remaining))
    }
}
