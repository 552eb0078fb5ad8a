//! Engine strings, interned names and node paths

use std::ffi::c_char;
use std::fmt;
use std::hash::{Hash, Hasher};

use void_ext_sys::{interface, OpaqueNodePath, OpaqueString, OpaqueStringName};

use super::{builtin_equal, call_builtin, impl_builtin};
use crate::error::{BridgeError, Result};

// ============================================================================
// GString
// ============================================================================

impl_builtin!(
    /// Engine-owned UTF-8 string
    GString,
    OpaqueString,
    String
);

impl GString {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the text out of engine memory
    ///
    /// Fails when the engine hands back bytes that are not valid UTF-8.
    pub fn try_to_string(&self) -> Result<String> {
        let iface = interface();
        let len = unsafe { (iface.string_to_utf8_chars)(self.sys(), std::ptr::null_mut(), 0) };
        let len = usize::try_from(len).map_err(|_| BridgeError::InvalidString(format!("negative length {len}")))?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            unsafe { (iface.string_to_utf8_chars)(self.sys(), buf.as_mut_ptr() as *mut c_char, len as i64) };
        }
        String::from_utf8(buf).map_err(|e| BridgeError::InvalidString(e.to_string()))
    }

    /// Length in code points
    pub fn len(&self) -> usize {
        call_builtin::<(), i64>(Self::TYPE, "length", self.sys() as _, ())
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for GString {
    fn from(text: &str) -> Self {
        // Explicit length, so interior NULs survive the crossing.
        unsafe {
            Self::new_with(|dst| {
                (interface().string_new_with_utf8_chars_and_len)(
                    dst,
                    text.as_ptr() as *const c_char,
                    text.len() as i64,
                )
            })
        }
    }
}

impl From<&String> for GString {
    fn from(text: &String) -> Self {
        Self::from(text.as_str())
    }
}

impl From<&StringName> for GString {
    fn from(name: &StringName) -> Self {
        unsafe { Self::construct(2, &[name.sys()]) }
    }
}

impl From<&NodePath> for GString {
    fn from(path: &NodePath) -> Self {
        unsafe { Self::construct(3, &[path.sys()]) }
    }
}

impl PartialEq for GString {
    fn eq(&self, other: &Self) -> bool {
        builtin_equal(Self::TYPE, self.sys(), other.sys())
    }
}

impl Eq for GString {}

impl Hash for GString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl fmt::Display for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_to_string() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("\u{fffd}"),
        }
    }
}

impl fmt::Debug for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GString({:?})", self.to_string())
    }
}

// ============================================================================
// StringName
// ============================================================================

impl_builtin!(
    /// Interned name; equality is identity of the interned entry
    StringName,
    OpaqueStringName,
    StringName
);

impl StringName {
    /// Text of a name living in engine storage
    ///
    /// # Safety
    /// `ptr` must be null or point at a live name.
    pub(crate) unsafe fn read_sys(ptr: void_ext_sys::ConstTypePtr) -> String {
        if ptr.is_null() {
            return String::new();
        }
        Self::construct(void_ext_sys::builtins::CTOR_COPY, &[ptr]).to_string()
    }
}

impl From<&str> for StringName {
    fn from(text: &str) -> Self {
        unsafe {
            Self::new_with(|dst| {
                (interface().string_name_new_with_utf8_chars_and_len)(
                    dst,
                    text.as_ptr() as *const c_char,
                    text.len() as i64,
                )
            })
        }
    }
}

impl From<&GString> for StringName {
    fn from(text: &GString) -> Self {
        unsafe { Self::construct(2, &[text.sys()]) }
    }
}

impl PartialEq for StringName {
    fn eq(&self, other: &Self) -> bool {
        self.opaque == other.opaque
    }
}

impl Eq for StringName {}

impl Hash for StringName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.opaque.hash(state);
    }
}

impl fmt::Display for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&GString::from(self), f)
    }
}

impl fmt::Debug for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringName({:?})", self.to_string())
    }
}

// ============================================================================
// NodePath
// ============================================================================

impl_builtin!(
    /// Path to a node, with optional property subnames after `:`
    NodePath,
    OpaqueNodePath,
    NodePath
);

impl NodePath {
    /// Whether the path starts at the scene root
    pub fn is_absolute(&self) -> bool {
        call_builtin::<(), bool>(Self::TYPE, "is_absolute", self.sys() as _, ()).unwrap_or(false)
    }

    /// Number of node names
    pub fn name_count(&self) -> usize {
        self.count("get_name_count")
    }

    /// Node name `index`
    pub fn name(&self, index: usize) -> Result<StringName> {
        self.component("get_name", index, self.name_count())
    }

    /// Number of property subnames
    pub fn subname_count(&self) -> usize {
        self.count("get_subname_count")
    }

    /// Property subname `index`
    pub fn subname(&self, index: usize) -> Result<StringName> {
        self.component("get_subname", index, self.subname_count())
    }

    fn count(&self, method: &'static str) -> usize {
        call_builtin::<(), i64>(Self::TYPE, method, self.sys() as _, ())
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
    }

    fn component(&self, method: &'static str, index: usize, count: usize) -> Result<StringName> {
        if index >= count {
            return Err(BridgeError::ValueOutOfRange { ty: "NodePath index", value: index as i64 });
        }
        call_builtin::<_, StringName>(Self::TYPE, method, self.sys() as _, (index as i64,))
    }
}

impl From<&str> for NodePath {
    fn from(text: &str) -> Self {
        let text = GString::from(text);
        unsafe { Self::construct(2, &[text.sys()]) }
    }
}

impl From<&GString> for NodePath {
    fn from(text: &GString) -> Self {
        unsafe { Self::construct(2, &[text.sys()]) }
    }
}

impl PartialEq for NodePath {
    fn eq(&self, other: &Self) -> bool {
        builtin_equal(Self::TYPE, self.sys(), other.sys())
    }
}

impl Eq for NodePath {}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&GString::from(self), f)
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({:?})", self.to_string())
    }
}
