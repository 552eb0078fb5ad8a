//! Error types for the extension bridge

use thiserror::Error;
use void_ext_sys::{CallErrorKind, LoadError, VariantType};

use crate::handles::{ScopeId, SlotId};
use crate::version::EngineVersion;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Flat classification of every bridge error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoSuchMethod,
    NoSuchClass,
    NoSuchProperty,
    WrongVariantType,
    WrongArgumentCount,
    CallError,
    UseAfterFree,
    RegistrationConflict,
    VirtualMismatch,
    FatalInterfaceMissing,
    /// Misuse of the bridge itself (sealed frames, busy instances, bad config)
    Internal,
}

/// Errors that can occur while crossing the engine boundary
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    /// Method bind lookup returned null
    #[error("Method '{class}.{method}' not found")]
    NoSuchMethod { class: String, method: String },

    /// Class database lookup returned null
    #[error("Class '{0}' not found")]
    NoSuchClass(String),

    /// Property accessor invoked on an unknown name
    #[error("Property '{property}' not found on '{class}'")]
    NoSuchProperty { class: String, property: String },

    /// Variant conversion tag mismatch
    #[error("Expected a variant of type {expected}, found {found}")]
    WrongVariantType { expected: VariantType, found: VariantType },

    /// An object is not an instance of the expected class
    #[error("Expected an object of class '{expected}', found '{found}'")]
    ClassMismatch { expected: String, found: String },

    /// Call with a different argument count than registered
    #[error("Wrong argument count: expected {expected}, given {given}")]
    WrongArgumentCount { expected: usize, given: usize },

    /// The engine reported a call error
    #[error("Call to '{method}' failed: {kind:?} (argument {argument}, expected {expected})")]
    CallError { method: String, kind: CallErrorKind, argument: i32, expected: i32 },

    /// A released handle was accessed
    #[error("Use of released handle {0:?}")]
    UseAfterFree(SlotId),

    /// A handle was released twice
    #[error("Handle {0:?} released twice")]
    DoubleRelease(SlotId),

    /// Class name already registered
    #[error("Class '{0}' is already registered")]
    RegistrationConflict(String),

    /// Declared override does not match the parent's virtual
    #[error("'{method}' on '{class}' does not match any virtual of its parent")]
    VirtualMismatch { class: String, method: String },

    /// A class declared more virtual overrides than can be dispatched
    #[error("Class '{class}' overrides {count} virtuals, more than supported")]
    TooManyVirtuals { class: String, count: usize },

    /// A required engine symbol could not be resolved
    #[error(transparent)]
    FatalInterfaceMissing(#[from] LoadError),

    /// Push after the frame was sealed by an invoke
    #[error("Call frame is sealed")]
    FrameSealed,

    /// Return slot read before the engine wrote it
    #[error("Return slot read before it was written")]
    ReturnSlotUnwritten,

    /// Text could not cross the boundary
    #[error("Invalid string: {0}")]
    InvalidString(String),

    /// A host instance is already borrowed
    #[error("Instance of '{class}' is already borrowed")]
    InstanceBusy { class: &'static str },

    /// Host code panicked inside a callback
    #[error("Host panic: {0}")]
    HostPanic(String),

    /// The running engine is older than required
    #[error("Engine {found} is not compatible with required {required}")]
    IncompatibleEngine { required: EngineVersion, found: EngineVersion },

    /// The engine interface has not been bound
    #[error("Extension bridge is not initialized")]
    NotInitialized,

    /// A scope was exited out of order or used from another thread
    #[error("Scope mismatch: expected {expected:?}, found {found:?}")]
    ScopeMismatch { expected: ScopeId, found: ScopeId },

    /// An engine integer does not fit the host type
    #[error("Value {value} does not fit in {ty}")]
    ValueOutOfRange { ty: &'static str, value: i64 },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// An engine method returned a nonzero error code
    #[error("'{method}' returned engine error {code}")]
    EngineError { method: String, code: i64 },
}

impl BridgeError {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSuchMethod { .. } => ErrorKind::NoSuchMethod,
            Self::NoSuchClass(_) => ErrorKind::NoSuchClass,
            Self::NoSuchProperty { .. } => ErrorKind::NoSuchProperty,
            Self::WrongVariantType { .. } | Self::ClassMismatch { .. } => ErrorKind::WrongVariantType,
            Self::WrongArgumentCount { .. } => ErrorKind::WrongArgumentCount,
            Self::CallError { .. } | Self::EngineError { .. } => ErrorKind::CallError,
            Self::UseAfterFree(_) | Self::DoubleRelease(_) => ErrorKind::UseAfterFree,
            Self::RegistrationConflict(_) => ErrorKind::RegistrationConflict,
            Self::VirtualMismatch { .. } | Self::TooManyVirtuals { .. } => ErrorKind::VirtualMismatch,
            Self::FatalInterfaceMissing(_) | Self::IncompatibleEngine { .. } => ErrorKind::FatalInterfaceMissing,
            Self::FrameSealed
            | Self::ReturnSlotUnwritten
            | Self::InvalidString(_)
            | Self::InstanceBusy { .. }
            | Self::HostPanic(_)
            | Self::NotInitialized
            | Self::ScopeMismatch { .. }
            | Self::ValueOutOfRange { .. }
            | Self::Config(_) => ErrorKind::Internal,
        }
    }

    /// Build a call error from the engine's call-error structure
    pub fn from_call_error(method: &str, error: &void_ext_sys::FfiCallError) -> Self {
        Self::CallError {
            method: method.to_owned(),
            kind: error.kind(),
            argument: error.argument,
            expected: error.expected,
        }
    }

    pub(crate) fn wrong_type(expected: VariantType, found: VariantType) -> Self {
        Self::WrongVariantType { expected, found }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_symbol_is_fatal() {
        let err: BridgeError = LoadError::MissingSymbol { symbol: "variant_call" }.into();
        assert_eq!(err.kind(), ErrorKind::FatalInterfaceMissing);
        assert!(err.to_string().contains("variant_call"));
    }

    #[test]
    fn test_call_error_translation() {
        let raw = void_ext_sys::FfiCallError::new(CallErrorKind::TooFewArguments, 0, 2);
        let err = BridgeError::from_call_error("Node.add_child", &raw);
        assert_eq!(err.kind(), ErrorKind::CallError);
        match err {
            BridgeError::CallError { kind, expected, .. } => {
                assert_eq!(kind, CallErrorKind::TooFewArguments);
                assert_eq!(expected, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
