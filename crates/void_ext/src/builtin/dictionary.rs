//! Dictionary: variant keys to variant values, in insertion order

use std::fmt;

use void_ext_sys::{interface, OpaqueDictionary};

use super::{builtin_equal, call_builtin, impl_builtin, Array, Variant};
use crate::meta::ToVariant;

impl_builtin!(
    /// Reference-counted map; keys are unique by engine equality
    Dictionary,
    OpaqueDictionary,
    Dictionary
);

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
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

    pub fn contains_key<K: ToVariant>(&self, key: K) -> bool {
        let key = key.to_variant();
        call_builtin::<_, bool>(Self::TYPE, "has", self.sys() as _, (&key,)).unwrap_or(false)
    }

    /// Copy of the value under `key`
    pub fn get<K: ToVariant>(&self, key: K) -> Option<Variant> {
        let key = key.to_variant();
        if !self.contains_key(&key) {
            return None;
        }
        // Indexing inserts missing keys, so only index after the check.
        let slot = unsafe { (interface().dictionary_operator_index)(self.sys() as _, key.sys()) };
        if slot.is_null() {
            None
        } else {
            Some(unsafe { Variant::from_sys_copy(slot) })
        }
    }

    /// Insert or replace, returning the previous value
    pub fn insert<K: ToVariant, V: ToVariant>(&mut self, key: K, value: V) -> Option<Variant> {
        let key = key.to_variant();
        let previous = self.get(&key);
        let slot = unsafe { (interface().dictionary_operator_index)(self.sys_mut(), key.sys()) };
        unsafe { Variant::assign_into(slot, value.to_variant()) };
        previous
    }

    /// Remove `key`, returning its value
    pub fn remove<K: ToVariant>(&mut self, key: K) -> Option<Variant> {
        let key = key.to_variant();
        let previous = self.get(&key)?;
        let _ = call_builtin::<_, bool>(Self::TYPE, "erase", self.sys_mut(), (&key,));
        Some(previous)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Array {
        call_builtin::<(), Array>(Self::TYPE, "keys", self.sys() as _, ()).unwrap_or_default()
    }

    /// Values in insertion order
    pub fn values(&self) -> Array {
        call_builtin::<(), Array>(Self::TYPE, "values", self.sys() as _, ()).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        let _ = call_builtin::<(), ()>(Self::TYPE, "clear", self.sys_mut(), ());
    }

    /// Shallow copy with its own storage
    pub fn duplicate(&self) -> Self {
        call_builtin::<(), Dictionary>(Self::TYPE, "duplicate", self.sys() as _, ()).unwrap_or_default()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> DictionaryIter<'_> {
        DictionaryIter { dict: self, keys: self.keys(), index: 0 }
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        builtin_equal(Self::TYPE, self.sys(), other.sys())
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (Variant, Variant);
    type IntoIter = DictionaryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a snapshot of a [`Dictionary`]'s keys
pub struct DictionaryIter<'a> {
    dict: &'a Dictionary,
    keys: Array,
    index: usize,
}

impl Iterator for DictionaryIter<'_> {
    type Item = (Variant, Variant);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.get(self.index).ok()?;
            self.index += 1;
            // Entries removed since the snapshot are skipped.
            if let Some(value) = self.dict.get(&key) {
                return Some((key, value));
            }
        }
    }
}
