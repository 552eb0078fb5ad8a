//! Containing host failures inside upcalls
//!
//! Nothing may unwind across the C ABI. Every inbound callback runs its body
//! through [`guarded`]; a failure is reported to the engine's error sink once
//! and the callback hands back the default for its declared return.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe, Location};

use void_ext_sys::{CallErrorKind, FfiCallError};

use crate::error::{BridgeError, Result};
use crate::logging;

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "Unknown panic".to_owned()
    }
}

/// Run `f`, turning a panic into [`BridgeError::HostPanic`]
pub(crate) fn guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(BridgeError::HostPanic(panic_message(payload.as_ref()))),
    }
}

/// Send one failed upcall to the engine's error sink
#[track_caller]
pub(crate) fn report_failure(function: &str, err: &BridgeError) {
    let location = Location::caller();
    logging::report_error(&format!("{function}: {err}"), function, location.file(), location.line());
}

/// Whether the caller passed bad arguments, as opposed to host code failing
pub(crate) fn is_argument_error(err: &BridgeError) -> bool {
    matches!(err, BridgeError::WrongArgumentCount { .. } | BridgeError::CallError { .. })
}

/// Fill the engine's call-error structure from a bridge error
///
/// # Safety
/// `error` must be null or valid for a write.
pub(crate) unsafe fn write_call_error(error: *mut FfiCallError, err: &BridgeError) {
    if error.is_null() {
        return;
    }
    *error = match err {
        BridgeError::WrongArgumentCount { expected, given } => {
            let kind = if given > expected {
                CallErrorKind::TooManyArguments
            } else {
                CallErrorKind::TooFewArguments
            };
            FfiCallError::new(kind, 0, *expected as i32)
        }
        BridgeError::CallError { kind, argument, expected, .. } => FfiCallError::new(*kind, *argument, *expected),
        BridgeError::UseAfterFree(_) => FfiCallError::new(CallErrorKind::InstanceIsNull, 0, 0),
        _ => FfiCallError::new(CallErrorKind::InvalidMethod, 0, 0),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_becomes_error() {
        let result: Result<i64> = guarded(|| panic!("boom in ping"));
        match result {
            Err(BridgeError::HostPanic(message)) => assert!(message.contains("boom in ping")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ok_passes_through() {
        assert_eq!(guarded(|| Ok(7)), Ok(7));
    }

    #[test]
    fn test_argument_count_maps_to_call_error() {
        let mut error = FfiCallError::OK;
        unsafe { write_call_error(&mut error, &BridgeError::WrongArgumentCount { expected: 1, given: 3 }) };
        assert_eq!(error.kind(), CallErrorKind::TooManyArguments);
        assert_eq!(error.expected, 1);

        unsafe { write_call_error(&mut error, &BridgeError::WrongArgumentCount { expected: 2, given: 0 }) };
        assert_eq!(error.kind(), CallErrorKind::TooFewArguments);
    }

    #[test]
    fn test_host_failure_is_invalid_method() {
        let mut error = FfiCallError::OK;
        let err = BridgeError::HostPanic("x".into());
        assert!(!is_argument_error(&err));
        unsafe { write_call_error(&mut error, &err) };
        assert_eq!(error.kind(), CallErrorKind::InvalidMethod);
    }
}
