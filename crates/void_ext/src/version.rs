//! Engine version compatibility

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use void_ext_sys::{FfiEngineVersion, FfiVersionTriple};

/// Semantic engine version
#[derive(Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl EngineVersion {
    #[inline]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Oldest engine this bridge speaks to
    pub const MINIMUM: EngineVersion = EngineVersion::new(4, 1, 0);

    /// Whether an engine at this version can load an extension requiring `required`
    ///
    /// The major version must match; minor and patch must be at least the
    /// required ones.
    pub fn is_compatible_with(&self, required: &EngineVersion) -> bool {
        self.major == required.major && (self.minor, self.patch) >= (required.minor, required.patch)
    }

    /// Parse from "major.minor.patch"; the patch component may be omitted
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }

    /// Version reported by the running engine
    pub fn query() -> Option<Self> {
        let iface = void_ext_sys::try_interface()?;
        let mut raw = FfiEngineVersion::default();
        unsafe { (iface.get_engine_version)(&mut raw) };
        Some(Self::from(raw))
    }

    #[inline]
    pub const fn to_u64(&self) -> u64 {
        (self.major as u64) << 42 | (self.minor as u64) << 21 | self.patch as u64
    }
}

impl From<FfiEngineVersion> for EngineVersion {
    fn from(raw: FfiEngineVersion) -> Self {
        Self::new(raw.major, raw.minor, raw.patch)
    }
}

impl From<EngineVersion> for FfiVersionTriple {
    fn from(v: EngineVersion) -> Self {
        FfiVersionTriple { major: v.major, minor: v.minor, patch: v.patch }
    }
}

impl TryFrom<String> for EngineVersion {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("invalid engine version '{s}'"))
    }
}

impl PartialOrd for EngineVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EngineVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_u64().cmp(&other.to_u64())
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl fmt::Debug for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineVersion({})", self)
    }
}

impl Default for EngineVersion {
    fn default() -> Self {
        Self::MINIMUM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!(EngineVersion::parse("4.3.1"), Some(EngineVersion::new(4, 3, 1)));
        assert_eq!(EngineVersion::parse("4.2"), Some(EngineVersion::new(4, 2, 0)));
        assert_eq!(EngineVersion::parse("4"), None);
        assert_eq!(EngineVersion::parse("4.x.0"), None);
        assert_eq!(EngineVersion::parse("4.1.0.7"), None);
    }

    #[test]
    fn test_version_compatibility() {
        let required = EngineVersion::new(4, 2, 0);
        assert!(EngineVersion::new(4, 2, 0).is_compatible_with(&required));
        assert!(EngineVersion::new(4, 3, 0).is_compatible_with(&required));
        assert!(!EngineVersion::new(4, 1, 9).is_compatible_with(&required));
        assert!(!EngineVersion::new(5, 0, 0).is_compatible_with(&required));
    }

    #[test]
    fn test_version_ordering() {
        assert!(EngineVersion::new(4, 1, 0) < EngineVersion::new(4, 1, 1));
        assert!(EngineVersion::new(4, 1, 9) < EngineVersion::new(4, 2, 0));
        assert!(EngineVersion::new(3, 9, 9) < EngineVersion::new(4, 0, 0));
    }
}
